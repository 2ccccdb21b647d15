//! Authorization engine: RBAC questions answered against an [`AuthzStore`].
//!
//! Every store call gets its own deadline. A timeout or backend failure is an
//! [`AuthzError::Internal`] and callers must treat it as a denial.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use gatehouse_core::{AssignmentId, DomainError, DomainResult, RoleId, UserId};

use crate::{AuthzStore, Permission, Role, RoleAssignment, RolePermission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    /// Store failure or deadline exceeded. Never exposed verbatim.
    #[error("{operation} failed: {reason}")]
    Internal {
        operation: &'static str,
        reason: String,
    },
}

impl AuthzError {
    fn from_store(operation: &'static str, err: DomainError) -> Self {
        match err {
            DomainError::NotFound(entity) => Self::NotFound(entity),
            DomainError::Conflict(msg) => Self::Conflict(msg),
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Invalid(msg),
            DomainError::Unavailable(reason) => Self::Internal { operation, reason },
        }
    }
}

/// Partial role update. Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl RoleUpdate {
    fn normalized(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Built once at startup and shared; holds no per-request state.
#[derive(Clone)]
pub struct AuthorizationEngine {
    store: Arc<dyn AuthzStore>,
    timeout: Duration,
}

impl AuthorizationEngine {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(store: Arc<dyn AuthzStore>) -> Self {
        Self {
            store,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = DomainResult<T>>,
    ) -> Result<T, AuthzError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                let err = AuthzError::from_store(operation, err);
                if matches!(err, AuthzError::Internal { .. }) {
                    tracing::error!(operation, error = %err, "authorization store call failed");
                }
                Err(err)
            }
            Err(_) => {
                tracing::error!(operation, timeout_ms = self.timeout.as_millis() as u64, "authorization store call timed out");
                Err(AuthzError::Internal {
                    operation,
                    reason: format!("timed out after {:?}", self.timeout),
                })
            }
        }
    }

    pub async fn user_roles(&self, user: UserId) -> Result<Vec<Role>, AuthzError> {
        self.bounded("user_roles", self.store.user_roles(user)).await
    }

    pub async fn user_permissions(&self, user: UserId) -> Result<Vec<Permission>, AuthzError> {
        self.bounded("user_permissions", self.store.user_permissions(user))
            .await
    }

    pub async fn has_role(&self, user: UserId, role: &str) -> Result<bool, AuthzError> {
        self.bounded("has_role", self.store.has_role(user, role)).await
    }

    /// Vacuously true for an empty list.
    pub async fn has_all_roles(&self, user: UserId, roles: &[String]) -> Result<bool, AuthzError> {
        if roles.is_empty() {
            return Ok(true);
        }
        let mut distinct = roles.to_vec();
        distinct.sort();
        distinct.dedup();
        self.bounded("has_all_roles", self.store.has_all_roles(user, &distinct))
            .await
    }

    /// Also true for an empty list: an empty requirement admits everyone.
    pub async fn has_any_role(&self, user: UserId, roles: &[String]) -> Result<bool, AuthzError> {
        if roles.is_empty() {
            return Ok(true);
        }
        self.bounded("has_any_role", self.store.has_any_role(user, roles))
            .await
    }

    pub async fn has_permission(&self, user: UserId, permission: &str) -> Result<bool, AuthzError> {
        self.bounded("has_permission", self.store.has_permission(user, permission))
            .await
    }

    pub async fn create_role(&self, name: &str, description: &str) -> Result<Role, AuthzError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthzError::Invalid("role name is required".into()));
        }
        self.bounded("create_role", self.store.create_role(name, description))
            .await
    }

    pub async fn update_role(&self, id: RoleId, update: &RoleUpdate) -> Result<Role, AuthzError> {
        let name = RoleUpdate::normalized(&update.name);
        let description = RoleUpdate::normalized(&update.description);
        self.bounded("update_role", self.store.update_role(id, name, description))
            .await
    }

    pub async fn role_by_id(&self, id: RoleId) -> Result<Role, AuthzError> {
        self.bounded("role_by_id", self.store.role_by_id(id)).await
    }

    pub async fn role_by_name(&self, name: &str) -> Result<Role, AuthzError> {
        self.bounded("role_by_name", self.store.role_by_name(name)).await
    }

    pub async fn all_roles(&self) -> Result<Vec<Role>, AuthzError> {
        self.bounded("all_roles", self.store.all_roles()).await
    }

    pub async fn role_permissions(&self, role: RoleId) -> Result<Vec<RolePermission>, AuthzError> {
        self.bounded("role_permissions", self.store.role_permissions(role))
            .await
    }

    pub async fn all_role_permissions(&self) -> Result<Vec<RolePermission>, AuthzError> {
        self.bounded("all_role_permissions", self.store.all_role_permissions())
            .await
    }

    pub async fn assign_role(&self, user: UserId, role: RoleId) -> Result<RoleAssignment, AuthzError> {
        self.bounded("assign_role", self.store.assign_role(user, role))
            .await
    }

    /// Removes one assignment by its surrogate id, not by `(user, role)`.
    pub async fn remove_role(&self, assignment: AssignmentId) -> Result<(), AuthzError> {
        let removed = self
            .bounded("remove_role", self.store.remove_assignment(assignment))
            .await?;
        if removed == 0 {
            return Err(AuthzError::NotFound("role assignment"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
