use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(DeriveIden)]
enum RolePermissions {
    Table,
    PermissionId,
}

#[derive(DeriveIden)]
enum Permissions {
    Table,
    Resource,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // The composite primary key already serves lookups by role_id.
        manager
            .create_index(
                Index::create()
                    .name("idx_role_permissions_permission")
                    .table(RolePermissions::Table)
                    .col(RolePermissions::PermissionId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_permissions_resource")
                    .table(Permissions::Table)
                    .col(Permissions::Resource)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_permissions_resource")
                    .table(Permissions::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_role_permissions_permission")
                    .table(RolePermissions::Table)
                    .to_owned(),
            )
            .await
    }
}
