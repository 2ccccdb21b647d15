//! In-memory store for tests and local development.
//!
//! Implements both [`AuthzStore`] and [`UserStore`] over one lock-guarded set
//! of tables, with sequences standing in for database-assigned ids.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use gatehouse_core::{AssignmentId, DomainError, DomainResult, PermissionId, RoleId, UserId};

use crate::{
    AuthzStore, NewUser, Permission, Role, RoleAssignment, RolePermission, User, UserStore,
};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, Permission>,
    grants: BTreeSet<(RoleId, PermissionId)>,
    assignments: BTreeMap<AssignmentId, RoleAssignment>,
    last_user: i64,
    last_role: i64,
    last_permission: i64,
    last_assignment: i64,
}

impl Tables {
    /// Distinct roles held by `user`, in assignment order.
    fn roles_of(&self, user: UserId) -> Vec<Role> {
        let mut seen = BTreeSet::new();
        self.assignments
            .values()
            .filter(|a| a.user_id == user && seen.insert(a.role_id))
            .filter_map(|a| self.roles.get(&a.role_id).cloned())
            .collect()
    }

    fn role_named(&self, name: &str) -> Option<&Role> {
        self.roles.values().find(|r| r.name == name)
    }

    fn projection(&self, filter: Option<RoleId>) -> Vec<RolePermission> {
        self.grants
            .iter()
            .filter(|(role_id, _)| filter.is_none_or(|f| f == *role_id))
            .filter_map(|(role_id, perm_id)| {
                let role = self.roles.get(role_id)?;
                let perm = self.permissions.get(perm_id)?;
                Some(RolePermission::join(role, perm))
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    latency: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`, to exercise timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert a permission row. Permissions have no write path through the
    /// gateway, so fixtures and dev seeding go through here.
    pub fn seed_permission(
        &self,
        name: &str,
        resource: &str,
        action: &str,
        description: &str,
    ) -> DomainResult<Permission> {
        let mut t = self.write()?;
        t.last_permission += 1;
        let now = Utc::now();
        let permission = Permission {
            id: PermissionId::new(t.last_permission),
            name: name.to_string(),
            description: description.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            created_at: now,
            updated_at: now,
        };
        t.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    /// Grant `permission` to `role`.
    pub fn grant(&self, role: RoleId, permission: PermissionId) -> DomainResult<()> {
        let mut t = self.write()?;
        if !t.roles.contains_key(&role) {
            return Err(DomainError::not_found("role"));
        }
        if !t.permissions.contains_key(&permission) {
            return Err(DomainError::not_found("permission"));
        }
        t.grants.insert((role, permission));
        Ok(())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn read(&self) -> DomainResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| DomainError::unavailable("in-memory store lock poisoned"))
    }

    fn write(&self) -> DomainResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| DomainError::unavailable("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl AuthzStore for InMemoryStore {
    async fn user_roles(&self, user: UserId) -> DomainResult<Vec<Role>> {
        self.simulate_latency().await;
        Ok(self.read()?.roles_of(user))
    }

    async fn user_permissions(&self, user: UserId) -> DomainResult<Vec<Permission>> {
        self.simulate_latency().await;
        let t = self.read()?;
        let role_ids: BTreeSet<RoleId> = t.roles_of(user).iter().map(|r| r.id).collect();
        let perm_ids: BTreeSet<PermissionId> = t
            .grants
            .iter()
            .filter(|(role_id, _)| role_ids.contains(role_id))
            .map(|(_, perm_id)| *perm_id)
            .collect();
        Ok(perm_ids
            .iter()
            .filter_map(|id| t.permissions.get(id).cloned())
            .collect())
    }

    async fn has_role(&self, user: UserId, role: &str) -> DomainResult<bool> {
        self.simulate_latency().await;
        Ok(self.read()?.roles_of(user).iter().any(|r| r.name == role))
    }

    async fn has_all_roles(&self, user: UserId, roles: &[String]) -> DomainResult<bool> {
        self.simulate_latency().await;
        let held: BTreeSet<String> = self.read()?.roles_of(user).into_iter().map(|r| r.name).collect();
        Ok(roles.iter().all(|name| held.contains(name)))
    }

    async fn has_any_role(&self, user: UserId, roles: &[String]) -> DomainResult<bool> {
        self.simulate_latency().await;
        let held = self.read()?.roles_of(user);
        Ok(held.iter().any(|r| roles.contains(&r.name)))
    }

    async fn has_permission(&self, user: UserId, permission: &str) -> DomainResult<bool> {
        let perms = self.user_permissions(user).await?;
        Ok(perms.iter().any(|p| p.name == permission))
    }

    async fn create_role(&self, name: &str, description: &str) -> DomainResult<Role> {
        self.simulate_latency().await;
        let mut t = self.write()?;
        if t.role_named(name).is_some() {
            return Err(DomainError::conflict(format!("role '{name}' already exists")));
        }
        t.last_role += 1;
        let now = Utc::now();
        let role = Role {
            id: RoleId::new(t.last_role),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        t.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(
        &self,
        id: RoleId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> DomainResult<Role> {
        self.simulate_latency().await;
        let mut t = self.write()?;
        if let Some(name) = name {
            if t.role_named(name).is_some_and(|other| other.id != id) {
                return Err(DomainError::conflict(format!("role '{name}' already exists")));
            }
        }
        let role = t.roles.get_mut(&id).ok_or(DomainError::not_found("role"))?;
        if let Some(name) = name {
            role.name = name.to_string();
        }
        if let Some(description) = description {
            role.description = description.to_string();
        }
        role.updated_at = Utc::now();
        Ok(role.clone())
    }

    async fn role_by_id(&self, id: RoleId) -> DomainResult<Role> {
        self.simulate_latency().await;
        self.read()?
            .roles
            .get(&id)
            .cloned()
            .ok_or(DomainError::not_found("role"))
    }

    async fn role_by_name(&self, name: &str) -> DomainResult<Role> {
        self.simulate_latency().await;
        self.read()?
            .role_named(name)
            .cloned()
            .ok_or(DomainError::not_found("role"))
    }

    async fn all_roles(&self) -> DomainResult<Vec<Role>> {
        self.simulate_latency().await;
        Ok(self.read()?.roles.values().cloned().collect())
    }

    async fn role_permissions(&self, role: RoleId) -> DomainResult<Vec<RolePermission>> {
        self.simulate_latency().await;
        let t = self.read()?;
        if !t.roles.contains_key(&role) {
            return Err(DomainError::not_found("role"));
        }
        Ok(t.projection(Some(role)))
    }

    async fn all_role_permissions(&self) -> DomainResult<Vec<RolePermission>> {
        self.simulate_latency().await;
        Ok(self.read()?.projection(None))
    }

    async fn assign_role(&self, user: UserId, role: RoleId) -> DomainResult<RoleAssignment> {
        self.simulate_latency().await;
        let mut t = self.write()?;
        if !t.roles.contains_key(&role) {
            return Err(DomainError::not_found("role"));
        }
        t.last_assignment += 1;
        let assignment = RoleAssignment {
            id: AssignmentId::new(t.last_assignment),
            user_id: user,
            role_id: role,
        };
        t.assignments.insert(assignment.id, assignment);
        Ok(assignment)
    }

    async fn remove_assignment(&self, id: AssignmentId) -> DomainResult<u64> {
        self.simulate_latency().await;
        Ok(self.write()?.assignments.remove(&id).map_or(0, |_| 1))
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create_user(&self, user: NewUser) -> DomainResult<User> {
        self.simulate_latency().await;
        let mut t = self.write()?;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(DomainError::conflict("email already registered"));
        }
        t.last_user += 1;
        let now = Utc::now();
        let user = User {
            id: UserId::new(t.last_user),
            email: user.email,
            username: user.username,
            password_hash: user.password_hash,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn user_by_id(&self, id: UserId) -> DomainResult<User> {
        self.simulate_latency().await;
        self.read()?
            .users
            .get(&id)
            .cloned()
            .ok_or(DomainError::not_found("user"))
    }

    async fn user_by_email(&self, email: &str) -> DomainResult<User> {
        self.simulate_latency().await;
        self.read()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(DomainError::not_found("user"))
    }

    async fn all_users(&self) -> DomainResult<Vec<User>> {
        self.simulate_latency().await;
        Ok(self.read()?.users.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn role_names_are_unique() {
        let store = InMemoryStore::new();
        store.create_role("admin", "").await.unwrap();

        let err = store.create_role("admin", "again").await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn duplicate_assignments_are_independent_rows() {
        let store = InMemoryStore::new();
        let role = store.create_role("user", "").await.unwrap();
        let user = UserId::new(1);

        let first = store.assign_role(user, role.id).await.unwrap();
        let second = store.assign_role(user, role.id).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(store.user_roles(user).await.unwrap().len(), 1);

        assert_eq!(store.remove_assignment(first.id).await.unwrap(), 1);
        assert!(store.has_role(user, "user").await.unwrap());

        assert_eq!(store.remove_assignment(second.id).await.unwrap(), 1);
        assert!(!store.has_role(user, "user").await.unwrap());
    }

    #[tokio::test]
    async fn assigning_unknown_role_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.assign_role(UserId::new(1), RoleId::new(99)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn permissions_flow_through_grants() {
        let store = InMemoryStore::new();
        let editor = store.create_role("editor", "").await.unwrap();
        let write = store.seed_permission("problem.write", "problem", "write", "").unwrap();
        store.seed_permission("problem.delete", "problem", "delete", "").unwrap();
        store.grant(editor.id, write.id).unwrap();

        let user = UserId::new(5);
        store.assign_role(user, editor.id).await.unwrap();

        assert!(store.has_permission(user, "problem.write").await.unwrap());
        assert!(!store.has_permission(user, "problem.delete").await.unwrap());

        let projection = store.role_permissions(editor.id).await.unwrap();
        assert_eq!(projection.len(), 1);
        assert_eq!(projection[0].role_name, "editor");
        assert_eq!(projection[0].permission_resource, "problem");
    }

    #[tokio::test]
    async fn emails_are_unique() {
        let store = InMemoryStore::new();
        let new = || NewUser {
            email: "a@b.com".into(),
            username: "ab".into(),
            password_hash: "x".into(),
        };
        let created = store.create_user(new()).await.unwrap();
        assert_eq!(store.user_by_email("a@b.com").await.unwrap().id, created.id);
        assert!(matches!(store.create_user(new()).await, Err(DomainError::Conflict(_))));
    }
}
