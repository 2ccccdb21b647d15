//! User accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::UserId;

/// A stored account.
///
/// `password_hash` is a PHC string and is never serialized into responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new account (the password is already hashed).
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
}
