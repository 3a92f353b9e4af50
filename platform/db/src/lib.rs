//! Database layer for the role/permission model: connection settings, the
//! permission and role registries, assignment, seeding and a resolved-role
//! cache.

mod cache;
mod seed;
mod store;

use platform_authz::AuthzError;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

pub use cache::{DEFAULT_CACHE_TTL, RoleCache};
pub use seed::{IntegrityReport, SeedOptions, SeedReport, seed, verify_integrity};
pub use store::{
    AssignmentReport, RoleChange, RoleMetadataPolicy, assign_permissions, ensure_permission,
    ensure_role, list_roles, load_role, resolve_role, role_permission_names,
};

/// Shared connection pool alias.
pub type DbPool = DatabaseConnection;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database url missing")]
    MissingUrl,
    #[error("role {0} not found")]
    RoleNotFound(Uuid),
    #[error(transparent)]
    Authz(#[from] AuthzError),
    #[error(transparent)]
    Db(#[from] DbErr),
}

pub type DbResult<T> = Result<T, DbError>;

/// Environment-driven connection settings.
#[derive(Clone, Debug, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_url_key")]
    env_key: String,
    #[serde(default)]
    sql_logging: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self::new(default_url_key())
    }
}

fn default_url_key() -> String {
    "DATABASE_URL".to_string()
}

impl DatabaseSettings {
    pub fn new(env_key: impl Into<String>) -> Self {
        Self {
            env_key: env_key.into(),
            sql_logging: false,
        }
    }

    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.sql_logging = std::env::var("SQL_LOGGING")
            .ok()
            .map(|val| matches!(val.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        settings
    }

    pub fn database_url(&self) -> DbResult<String> {
        std::env::var(&self.env_key).map_err(|_| DbError::MissingUrl)
    }
}

pub async fn connect(settings: &DatabaseSettings) -> DbResult<DbPool> {
    let mut options = ConnectOptions::new(settings.database_url()?);
    options.sqlx_logging(settings.sql_logging);
    Ok(Database::connect(options).await?)
}
