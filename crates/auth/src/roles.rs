use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{AssignmentId, RoleId, UserId};

/// Role granting full administrative access.
pub const ADMIN: &str = "admin";

/// Role held by every ordinary signed-up account.
pub const USER: &str = "user";

/// A named role (`name` is unique across the store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Case-insensitive name comparison, used by ownership checks.
    pub fn is_named(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// One row linking a user to a role.
///
/// Rows are not deduplicated: assigning the same role twice yields two
/// assignments with distinct ids, each removable on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: AssignmentId,
    pub user_id: UserId,
    pub role_id: RoleId,
}

/// Returns true if any role in `roles` carries `name` (ignoring case).
pub fn contains_role(roles: &[Role], name: &str) -> bool {
    roles.iter().any(|r| r.is_named(name))
}
