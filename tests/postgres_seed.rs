use anyhow::{Context, Result};
use entity::{permission, role, role_permission};
use masthead_tests::migrated_postgres;
use platform_authz::{Catalog, KnownRole};
use platform_db::{
    DbPool, RoleMetadataPolicy, SeedOptions, load_role, seed, verify_integrity,
};
use sea_orm::{ColumnTrait, EntityTrait, ModelTrait, PaginatorTrait, QueryFilter};
use testcontainers::clients::Cli;

async fn counts(pool: &DbPool) -> Result<(u64, u64, u64)> {
    Ok((
        permission::Entity::find().count(pool).await?,
        role::Entity::find().count(pool).await?,
        role_permission::Entity::find().count(pool).await?,
    ))
}

#[tokio::test]
#[ignore = "requires docker"]
async fn builtin_catalog_seeds_idempotently_on_postgres() -> Result<()> {
    let docker = Cli::default();
    let (_container, pool) = migrated_postgres(&docker).await?;
    let catalog = Catalog::builtin()?;

    let first = seed(&pool, &catalog, SeedOptions::default()).await?;
    assert_eq!(first.roles_created, KnownRole::ALL.len());
    let before = counts(&pool).await?;

    let second = seed(
        &pool,
        &catalog,
        SeedOptions {
            role_metadata: RoleMetadataPolicy::Preserve,
            prune: false,
        },
    )
    .await?;
    assert_eq!(second.permissions_created, 0);
    assert_eq!(second.roles_created, 0);
    assert_eq!(counts(&pool).await?, before);

    let master = load_role(&pool, "Master Admin")
        .await?
        .context("master admin missing")?;
    assert!(master.has_permission(Some("system.security")));
    assert!(master.metadata.can_manage_roles);

    let reviewers = load_role(&pool, "Reviewers")
        .await?
        .context("reviewers missing")?;
    assert!(reviewers.has_permission(Some("content.approve")));
    assert!(!reviewers.has_permission(Some("content.publish")));

    assert!(verify_integrity(&pool).await?.is_clean());
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn deleting_a_role_cascades_to_assignments() -> Result<()> {
    let docker = Cli::default();
    let (_container, pool) = migrated_postgres(&docker).await?;
    seed(&pool, &Catalog::builtin()?, SeedOptions::default()).await?;

    let writers = role::Entity::find()
        .filter(role::Column::Name.eq("Staff Writers"))
        .one(&pool)
        .await?
        .context("staff writers missing")?;
    let writers_id = writers.id;
    let held = role_permission::Entity::find()
        .filter(role_permission::Column::RoleId.eq(writers_id))
        .count(&pool)
        .await?;
    assert!(held > 0);

    writers.delete(&pool).await?;
    let remaining = role_permission::Entity::find()
        .filter(role_permission::Column::RoleId.eq(writers_id))
        .count(&pool)
        .await?;
    assert_eq!(remaining, 0);
    assert!(verify_integrity(&pool).await?.is_clean());
    Ok(())
}
