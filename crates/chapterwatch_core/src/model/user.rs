//! Notification recipient.

use super::ModelValidationError;
use serde::{Deserialize, Serialize};

/// Row identifier of a user record.
pub type UserId = i64;

/// A person who receives update notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    /// Delivery address handed to the notifier.
    pub email: String,
    pub name: Option<String>,
    /// Inactive users keep their subscriptions but receive nothing.
    pub active: bool,
}

impl User {
    /// Creates an active, not-yet-persisted user (`id == 0`).
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: 0,
            email: email.into(),
            name: None,
            active: true,
        }
    }

    /// Checks the fields storage relies on.
    pub fn validate(&self) -> Result<(), ModelValidationError> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(ModelValidationError::EmptyEmail);
        }
        if !email.contains('@') {
            return Err(ModelValidationError::InvalidEmail(email.to_string()));
        }
        Ok(())
    }
}
