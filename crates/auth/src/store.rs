//! Persistence boundary for RBAC and accounts.
//!
//! Implementations own every row; callers never cache results across
//! requests. All methods report failures as [`DomainError`] so the engine can
//! classify them without knowing the backend.

use async_trait::async_trait;

use gatehouse_core::{AssignmentId, DomainResult, RoleId, UserId};

use crate::{NewUser, Permission, Role, RoleAssignment, RolePermission, User};

#[async_trait]
pub trait AuthzStore: Send + Sync {
    async fn user_roles(&self, user: UserId) -> DomainResult<Vec<Role>>;

    async fn user_permissions(&self, user: UserId) -> DomainResult<Vec<Permission>>;

    async fn has_role(&self, user: UserId, role: &str) -> DomainResult<bool>;

    /// `roles` is non-empty and free of duplicates; the engine guarantees it.
    async fn has_all_roles(&self, user: UserId, roles: &[String]) -> DomainResult<bool>;

    /// `roles` is non-empty; the engine guarantees it.
    async fn has_any_role(&self, user: UserId, roles: &[String]) -> DomainResult<bool>;

    async fn has_permission(&self, user: UserId, permission: &str) -> DomainResult<bool>;

    /// Fails with `Conflict` when the name is taken.
    async fn create_role(&self, name: &str, description: &str) -> DomainResult<Role>;

    /// `None` leaves the column unchanged.
    async fn update_role(
        &self,
        id: RoleId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> DomainResult<Role>;

    async fn role_by_id(&self, id: RoleId) -> DomainResult<Role>;

    async fn role_by_name(&self, name: &str) -> DomainResult<Role>;

    async fn all_roles(&self) -> DomainResult<Vec<Role>>;

    async fn role_permissions(&self, role: RoleId) -> DomainResult<Vec<RolePermission>>;

    async fn all_role_permissions(&self) -> DomainResult<Vec<RolePermission>>;

    /// Always inserts a new row; `NotFound` if the role does not exist.
    async fn assign_role(&self, user: UserId, role: RoleId) -> DomainResult<RoleAssignment>;

    /// Returns the number of rows deleted (0 or 1).
    async fn remove_assignment(&self, id: AssignmentId) -> DomainResult<u64>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` when the email is taken.
    async fn create_user(&self, user: NewUser) -> DomainResult<User>;

    async fn user_by_id(&self, id: UserId) -> DomainResult<User>;

    async fn user_by_email(&self, email: &str) -> DomainResult<User>;

    async fn all_users(&self) -> DomainResult<Vec<User>>;
}
