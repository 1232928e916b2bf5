//! One-shot startup tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::AdminBootstrapConfig;
use crate::workflows::change_requests::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Student,
    Coordinator,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub role: UserRole,
}

/// Identity store owned by the authentication layer.
pub trait UserDirectory: Send + Sync {
    fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>, BootstrapError>;
    fn create(&self, account: UserAccount) -> Result<UserAccount, BootstrapError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("account {0} already exists")]
    Duplicate(String),
    #[error("user directory unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Created(UserAccount),
    AlreadyPresent(UserAccount),
    Skipped,
}

/// Seed the administrator account if it is configured and missing.
///
/// Query-then-create: running it on every start is harmless.
pub fn ensure_admin<D>(
    directory: &D,
    config: &AdminBootstrapConfig,
) -> Result<BootstrapOutcome, BootstrapError>
where
    D: UserDirectory + ?Sized,
{
    let Some(email) = config.email.as_deref() else {
        return Ok(BootstrapOutcome::Skipped);
    };
    let email = email.to_ascii_lowercase();

    if let Some(existing) = directory.find_by_email(&email)? {
        return Ok(BootstrapOutcome::AlreadyPresent(existing));
    }

    let account = directory.create(UserAccount {
        id: UserId(format!("admin:{email}")),
        email,
        display_name: config.display_name.clone(),
        role: UserRole::Admin,
    })?;
    info!(user_id = %account.id, "administrator account seeded");
    Ok(BootstrapOutcome::Created(account))
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryUserDirectory {
    accounts: Arc<Mutex<HashMap<String, UserAccount>>>,
}

impl UserDirectory for InMemoryUserDirectory {
    fn find_by_email(&self, email: &str) -> Result<Option<UserAccount>, BootstrapError> {
        let guard = self.accounts.lock().expect("directory mutex poisoned");
        Ok(guard.get(&email.to_ascii_lowercase()).cloned())
    }

    fn create(&self, account: UserAccount) -> Result<UserAccount, BootstrapError> {
        let mut guard = self.accounts.lock().expect("directory mutex poisoned");
        let key = account.email.to_ascii_lowercase();
        if guard.contains_key(&key) {
            return Err(BootstrapError::Duplicate(key));
        }
        guard.insert(key, account.clone());
        Ok(account)
    }
}
