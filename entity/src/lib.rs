//! SeaORM entities for the role/permission tables.

pub mod permission;
pub mod role;
pub mod role_permission;
