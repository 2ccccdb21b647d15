use serde::{Deserialize, Serialize};

use gatehouse_core::UserId;

/// Identity of an authenticated caller.
///
/// Built from a verified session token and dropped at the end of the request;
/// roles are deliberately not carried here and are re-resolved per check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    subject_id: UserId,
    email: String,
}

impl Principal {
    pub fn new(subject_id: UserId, email: impl Into<String>) -> Self {
        Self {
            subject_id,
            email: email.into(),
        }
    }

    pub fn subject_id(&self) -> UserId {
        self.subject_id
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}
