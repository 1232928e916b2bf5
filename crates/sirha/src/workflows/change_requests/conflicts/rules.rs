use super::super::domain::{Conflict, ConflictKind, EnrollmentStatus, Group};
use super::policy::raise;
use super::DetectionInput;

/// Groups the student keeps if the change goes through.
fn retained_groups<'a>(input: DetectionInput<'a>) -> impl Iterator<Item = &'a Group> + 'a {
    input
        .enrollments
        .iter()
        .filter(move |enrollment| {
            enrollment.status == EnrollmentStatus::Enrolled
                && enrollment.period_id == input.request.period_id
                && enrollment.id != input.request.source_enrollment_id
        })
        .filter_map(move |enrollment| {
            input
                .enrolled_groups
                .iter()
                .find(|group| group.id == enrollment.group_id)
        })
}

pub(crate) fn schedule_overlap(input: &DetectionInput<'_>) -> Option<Conflict> {
    let mut clashes = Vec::new();
    for group in retained_groups(*input) {
        if group.id == input.target_group.id {
            continue;
        }
        for slot in &input.target_group.schedule {
            if let Some(other) = group.schedule.iter().find(|other| slot.overlaps(other)) {
                clashes.push(format!("{} ({} vs {})", group.code, slot, other));
            }
        }
    }

    if clashes.is_empty() {
        return None;
    }

    Some(raise(
        input.request,
        ConflictKind::ScheduleOverlap,
        Some(input.target_group.id.clone()),
        format!(
            "group {} overlaps with current schedule: {}",
            input.target_group.code,
            clashes.join("; ")
        ),
        input.now,
    ))
}

pub(crate) fn capacity_exceeded(input: &DetectionInput<'_>) -> Option<Conflict> {
    let group = input.target_group;
    if !group.is_full() {
        return None;
    }

    Some(raise(
        input.request,
        ConflictKind::CapacityExceeded,
        Some(group.id.clone()),
        format!(
            "group {} is full ({}/{} seats taken)",
            group.code, group.enrolled, group.capacity
        ),
        input.now,
    ))
}

pub(crate) fn prerequisites_unmet(input: &DetectionInput<'_>) -> Option<Conflict> {
    let missing: Vec<&str> = input
        .target_subject
        .prerequisites
        .iter()
        .filter(|prerequisite| !input.completed_subjects.contains(*prerequisite))
        .map(|prerequisite| prerequisite.as_str())
        .collect();

    if missing.is_empty() {
        return None;
    }

    Some(raise(
        input.request,
        ConflictKind::PrerequisiteUnmet,
        Some(input.target_group.id.clone()),
        format!(
            "{} requires {} which the student has not approved",
            input.target_subject.mnemonic,
            missing.join(", ")
        ),
        input.now,
    ))
}

pub(crate) fn duplicate_enrollment(input: &DetectionInput<'_>) -> Option<Conflict> {
    let group =
        retained_groups(*input).find(|group| group.subject_id == input.target_subject.id)?;

    Some(raise(
        input.request,
        ConflictKind::DuplicateEnrollment,
        Some(group.id.clone()),
        format!(
            "student already enrolled in {} through group {}",
            input.target_subject.mnemonic, group.code
        ),
        input.now,
    ))
}

pub(crate) fn period_closed(input: &DetectionInput<'_>) -> Option<Conflict> {
    if !input.period.change_window_closed(input.now) {
        return None;
    }

    Some(raise(
        input.request,
        ConflictKind::PeriodClosed,
        None,
        format!(
            "change window for {} closed at {}",
            input.period.name,
            input.period.change_window_closes_at.format("%Y-%m-%d %H:%M UTC")
        ),
        input.now,
    ))
}
