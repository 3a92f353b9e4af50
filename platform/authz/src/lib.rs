//! Authorization primitives for the admin console.
//!
//! Everything here is pure: the catalog describes which permissions exist and
//! which role holds which, and [`ResolvedRole`] answers capability questions
//! once a role's permission set has been loaded. Storage lives in
//! `platform-db`.

mod catalog;
mod menu;
mod permission;
mod role;

use thiserror::Error;

pub use catalog::{Catalog, PermissionSpec, RoleSpec};
pub use menu::{ADMIN_MENU, MenuItem, accessible_menu};
pub use permission::{WILDCARD, covers, split_name};
pub use role::{KnownRole, ResolvedRole, RoleMetadata};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("permission name must not be empty")]
    EmptyPermissionName,
    #[error("permission {0} declared more than once")]
    DuplicatePermission(String),
    #[error("unknown role {0}")]
    UnknownRole(String),
    #[error("role {0} declared more than once")]
    DuplicateRole(String),
    #[error("grants reference undeclared role {0}")]
    UndeclaredRole(String),
    #[error("role {0} must be granted the `*` permission")]
    MissingWildcardGrant(String),
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),
    #[error("permission {permission} denied for role {role}")]
    Denied { role: String, permission: String },
}
