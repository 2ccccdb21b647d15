//! Postgres-backed RBAC and account store.
//!
//! ## Error mapping
//!
//! | SQLSTATE | Meaning | `DomainError` |
//! |---|---|---|
//! | 23505 | unique violation | `Conflict` |
//! | 23503 | foreign key violation | `NotFound` |
//! | other | anything else | `Unavailable` |
//!
//! Queries are built at runtime (no compile-time checking) so the crate builds
//! without a live database.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use gatehouse_auth::{
    AuthzStore, NewUser, Permission, Role, RoleAssignment, RolePermission, User, UserStore,
};
use gatehouse_core::{AssignmentId, DomainError, DomainResult, PermissionId, RoleId, UserId};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

const ROLE_COLUMNS: &str = "r.id, r.name, r.description, r.created_at, r.updated_at";

const ROLE_PERMISSION_SELECT: &str = r#"
    SELECT r.id AS role_id, r.name AS role_name, r.description AS role_description,
           p.id AS permission_id, p.name AS permission_name, p.action AS permission_action,
           p.description AS permission_description, p.resource AS permission_resource
    FROM role_permissions rp
    INNER JOIN roles r ON rp.role_id = r.id
    INNER JOIN permissions p ON rp.permission_id = p.id
"#;

/// Store over a shared `PgPool`; the pool serializes connection use.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> DomainResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables if missing and seed the `admin` and `user` roles.
    pub async fn ensure_schema(&self) -> DomainResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn exists(&self, operation: &'static str, sql: &str, user: UserId, name: &str) -> DomainResult<bool> {
        let row = sqlx::query(sql)
            .bind(user.get())
            .bind(name)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.try_get::<bool, _>(0).map_err(|e| map_sqlx_error(operation, e))
    }

    async fn role_where(&self, operation: &'static str, clause: &str, bind: RoleKey<'_>) -> DomainResult<Role> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE {clause}");
        let query = sqlx::query(&sql);
        let query = match bind {
            RoleKey::Id(id) => query.bind(id.get()),
            RoleKey::Name(name) => query.bind(name),
        };
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?
            .ok_or(DomainError::not_found("role"))?;
        role_from_row(&row).map_err(|e| map_sqlx_error(operation, e))
    }
}

enum RoleKey<'a> {
    Id(RoleId),
    Name(&'a str),
}

#[async_trait]
impl AuthzStore for PgStore {
    async fn user_roles(&self, user: UserId) -> DomainResult<Vec<Role>> {
        let sql = format!(
            "SELECT DISTINCT {ROLE_COLUMNS} FROM user_roles ur \
             INNER JOIN roles r ON ur.role_id = r.id \
             WHERE ur.user_id = $1 ORDER BY r.id"
        );
        let rows = sqlx::query(&sql)
            .bind(user.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("user_roles", e))?;
        collect(rows, role_from_row, "user_roles")
    }

    async fn user_permissions(&self, user: UserId) -> DomainResult<Vec<Permission>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT p.id, p.name, p.description, p.resource, p.action, p.created_at, p.updated_at
            FROM user_roles ur
            INNER JOIN role_permissions rp ON ur.role_id = rp.role_id
            INNER JOIN permissions p ON rp.permission_id = p.id
            WHERE ur.user_id = $1
            ORDER BY p.id
            "#,
        )
        .bind(user.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_permissions", e))?;
        collect(rows, permission_from_row, "user_permissions")
    }

    async fn has_role(&self, user: UserId, role: &str) -> DomainResult<bool> {
        self.exists(
            "has_role",
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_roles ur
                INNER JOIN roles r ON ur.role_id = r.id
                WHERE ur.user_id = $1 AND r.name = $2
            )
            "#,
            user,
            role,
        )
        .await
    }

    async fn has_all_roles(&self, user: UserId, roles: &[String]) -> DomainResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(DISTINCT r.name)
            FROM user_roles ur
            INNER JOIN roles r ON ur.role_id = r.id
            WHERE ur.user_id = $1 AND r.name = ANY($2)
            "#,
        )
        .bind(user.get())
        .bind(roles)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_all_roles", e))?;
        let held: i64 = row.try_get(0).map_err(|e| map_sqlx_error("has_all_roles", e))?;
        Ok(held as usize == roles.len())
    }

    async fn has_any_role(&self, user: UserId, roles: &[String]) -> DomainResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_roles ur
                INNER JOIN roles r ON ur.role_id = r.id
                WHERE ur.user_id = $1 AND r.name = ANY($2)
            )
            "#,
        )
        .bind(user.get())
        .bind(roles)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_any_role", e))?;
        row.try_get::<bool, _>(0).map_err(|e| map_sqlx_error("has_any_role", e))
    }

    async fn has_permission(&self, user: UserId, permission: &str) -> DomainResult<bool> {
        self.exists(
            "has_permission",
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_roles ur
                INNER JOIN role_permissions rp ON ur.role_id = rp.role_id
                INNER JOIN permissions p ON rp.permission_id = p.id
                WHERE ur.user_id = $1 AND p.name = $2
            )
            "#,
            user,
            permission,
        )
        .await
    }

    async fn create_role(&self, name: &str, description: &str) -> DomainResult<Role> {
        let row = sqlx::query(
            "INSERT INTO roles (name, description) VALUES ($1, $2) \
             RETURNING id, name, description, created_at, updated_at",
        )
        .bind(name)
        .bind(description)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_role", e))?;
        role_from_row(&row).map_err(|e| map_sqlx_error("create_role", e))
    }

    async fn update_role(
        &self,
        id: RoleId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> DomainResult<Role> {
        let row = sqlx::query(
            r#"
            UPDATE roles
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, description, created_at, updated_at
            "#,
        )
        .bind(id.get())
        .bind(name)
        .bind(description)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?
        .ok_or(DomainError::not_found("role"))?;
        role_from_row(&row).map_err(|e| map_sqlx_error("update_role", e))
    }

    async fn role_by_id(&self, id: RoleId) -> DomainResult<Role> {
        self.role_where("role_by_id", "r.id = $1", RoleKey::Id(id)).await
    }

    async fn role_by_name(&self, name: &str) -> DomainResult<Role> {
        self.role_where("role_by_name", "r.name = $1", RoleKey::Name(name))
            .await
    }

    async fn all_roles(&self) -> DomainResult<Vec<Role>> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles r ORDER BY r.id");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("all_roles", e))?;
        collect(rows, role_from_row, "all_roles")
    }

    async fn role_permissions(&self, role: RoleId) -> DomainResult<Vec<RolePermission>> {
        // distinguishes "no grants" from "no such role"
        self.role_by_id(role).await?;

        let sql = format!("{ROLE_PERMISSION_SELECT} WHERE rp.role_id = $1 ORDER BY p.id");
        let rows = sqlx::query(&sql)
            .bind(role.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_permissions", e))?;
        collect(rows, role_permission_from_row, "role_permissions")
    }

    async fn all_role_permissions(&self) -> DomainResult<Vec<RolePermission>> {
        let sql = format!("{ROLE_PERMISSION_SELECT} ORDER BY r.id, p.id");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("all_role_permissions", e))?;
        collect(rows, role_permission_from_row, "all_role_permissions")
    }

    async fn assign_role(&self, user: UserId, role: RoleId) -> DomainResult<RoleAssignment> {
        let row = sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) RETURNING id, user_id, role_id",
        )
        .bind(user.get())
        .bind(role.get())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("assign_role", e))?;

        let read = |row: &PgRow| -> Result<RoleAssignment, sqlx::Error> {
            Ok(RoleAssignment {
                id: AssignmentId::new(row.try_get("id")?),
                user_id: UserId::new(row.try_get("user_id")?),
                role_id: RoleId::new(row.try_get("role_id")?),
            })
        };
        read(&row).map_err(|e| map_sqlx_error("assign_role", e))
    }

    async fn remove_assignment(&self, id: AssignmentId) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM user_roles WHERE id = $1")
            .bind(id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_assignment", e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: NewUser) -> DomainResult<User> {
        let row = sqlx::query(
            "INSERT INTO users (username, email, password) VALUES ($1, $2, $3) \
             RETURNING id, email, username, password, created_at, updated_at",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_user", e))?;
        user_from_row(&row).map_err(|e| map_sqlx_error("create_user", e))
    }

    async fn user_by_id(&self, id: UserId) -> DomainResult<User> {
        let row = sqlx::query(
            "SELECT id, email, username, password, created_at, updated_at \
             FROM users WHERE id = $1 AND NOT is_deleted",
        )
        .bind(id.get())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_by_id", e))?
        .ok_or(DomainError::not_found("user"))?;
        user_from_row(&row).map_err(|e| map_sqlx_error("user_by_id", e))
    }

    async fn user_by_email(&self, email: &str) -> DomainResult<User> {
        let row = sqlx::query(
            "SELECT id, email, username, password, created_at, updated_at \
             FROM users WHERE email = $1 AND NOT is_deleted",
        )
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_by_email", e))?
        .ok_or(DomainError::not_found("user"))?;
        user_from_row(&row).map_err(|e| map_sqlx_error("user_by_email", e))
    }

    async fn all_users(&self) -> DomainResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, email, username, password, created_at, updated_at \
             FROM users WHERE NOT is_deleted ORDER BY id",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("all_users", e))?;
        collect(rows, user_from_row, "all_users")
    }
}

fn collect<T>(
    rows: Vec<PgRow>,
    read: fn(&PgRow) -> Result<T, sqlx::Error>,
    operation: &'static str,
) -> DomainResult<Vec<T>> {
    rows.iter()
        .map(|row| read(row).map_err(|e| map_sqlx_error(operation, e)))
        .collect()
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: RoleId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, sqlx::Error> {
    Ok(Permission {
        id: PermissionId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        resource: row.try_get("resource")?,
        action: row.try_get("action")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn role_permission_from_row(row: &PgRow) -> Result<RolePermission, sqlx::Error> {
    Ok(RolePermission {
        role_id: RoleId::new(row.try_get("role_id")?),
        role_name: row.try_get("role_name")?,
        role_description: row.try_get("role_description")?,
        permission_id: PermissionId::new(row.try_get("permission_id")?),
        permission_name: row.try_get("permission_name")?,
        permission_action: row.try_get("permission_action")?,
        permission_description: row.try_get("permission_description")?,
        permission_resource: row.try_get("permission_resource")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: UserId::new(row.try_get("id")?),
        email: row.try_get("email")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Map SQLx errors to DomainError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DomainError {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => DomainError::conflict(match db_err.table() {
                Some("users") => "email already registered".to_string(),
                _ => "role name already exists".to_string(),
            }),
            Some("23503") => match db_err.constraint() {
                Some(c) if c.contains("user_fk") => DomainError::not_found("user"),
                _ => DomainError::not_found("role"),
            },
            _ => DomainError::unavailable(format!(
                "database error in {}: {}",
                operation,
                db_err.message()
            )),
        },
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            DomainError::unavailable(format!("connection pool unavailable in {}", operation))
        }
        _ => DomainError::unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}
