//! `gatehouse-auth`: session tokens and the RBAC engine.
//!
//! Nothing in this crate knows about HTTP. Persistence is reached only
//! through the [`store`] traits, so the engine runs the same against the
//! in-memory store in tests and Postgres in production.

pub mod engine;
pub mod memory;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod session;
pub mod store;
pub mod user;

pub use engine::{AuthorizationEngine, AuthzError, RoleUpdate};
pub use memory::InMemoryStore;
pub use password::{hash_password, verify_password, PasswordError};
pub use permissions::{Permission, RolePermission};
pub use principal::Principal;
pub use roles::{Role, RoleAssignment};
pub use session::{SessionClaims, SessionError, SessionManager};
pub use store::{AuthzStore, UserStore};
pub use user::{NewUser, User};
