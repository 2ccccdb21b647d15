//! Request bodies. Every body rejects unknown fields.

use serde::Deserialize;

use crate::validation::{Validate, ValidationErrors};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub username: String,
}

impl Validate for CreateUserRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors
            .required("email", &self.email)
            .email("email", &self.email)
            .required("password", &self.password)
            .min_len("password", &self.password, 8)
            .required("username", &self.username)
            .min_len("username", &self.username, 2);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors
            .required("email", &self.email)
            .email("email", &self.email)
            .required("password", &self.password)
            .min_len("password", &self.password, 8);
        errors.into_result()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Validate for CreateRoleRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors
            .required("name", &self.name)
            .min_len("name", self.name.trim(), 2);
        errors.into_result()
    }
}

/// Partial update; absent or blank fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRoleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Validate for UpdateRoleRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleNameQuery {
    #[serde(default)]
    pub query: String,
}
