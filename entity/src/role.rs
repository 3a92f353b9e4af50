use crate::{permission, role_permission};
use sea_orm::prelude::{DateTimeWithTimeZone, *};
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "roles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub name: String,
    pub description: String,
    /// Seniority ranking, 10 for Master Admin down to 1.
    pub access_level: i32,
    pub is_admin: bool,
    pub can_manage_users: bool,
    pub can_manage_roles: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "role_permission::Entity")]
    RolePermission,
}

impl Related<role_permission::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RolePermission.def()
    }
}

impl Related<permission::Entity> for Entity {
    fn to() -> RelationDef {
        role_permission::Relation::Permission.def()
    }

    fn via() -> Option<RelationDef> {
        Some(role_permission::Relation::Role.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
