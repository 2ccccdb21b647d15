use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{PermissionId, RoleId};

/// A permission as stored. Read-only from the gateway's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: String,
    pub description: String,
    pub resource: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Denormalized role + permission row produced by joining grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub role_name: String,
    pub role_description: String,
    pub permission_id: PermissionId,
    pub permission_name: String,
    pub permission_action: String,
    pub permission_description: String,
    pub permission_resource: String,
}

impl RolePermission {
    pub fn join(role: &crate::Role, permission: &Permission) -> Self {
        Self {
            role_id: role.id,
            role_name: role.name.clone(),
            role_description: role.description.clone(),
            permission_id: permission.id,
            permission_name: permission.name.clone(),
            permission_action: permission.action.clone(),
            permission_description: permission.description.clone(),
            permission_resource: permission.resource.clone(),
        }
    }
}
