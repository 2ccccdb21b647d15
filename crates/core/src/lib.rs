//! `gatehouse-core`: identifiers and the shared error model.
//!
//! No IO lives here; every other crate in the workspace builds on these types.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{AssignmentId, PermissionId, RoleId, UserId};
