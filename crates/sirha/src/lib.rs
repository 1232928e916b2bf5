//! SIRHA: lifecycle and conflict resolution engine for academic schedule-change requests.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
