mod config;
mod http;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use migration::{Migrator, MigratorTrait};
use platform_db::{self, DatabaseSettings, DbPool, RoleCache, RoleMetadataPolicy, SeedOptions};
use platform_obs::{ObsConfig, init_tracing};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    http::{AppState, ServeConfig},
};

#[derive(Parser, Debug)]
#[command(name = "masthead", version, about = "Admin role and permission management")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP authorization API.
    Serve(ServeCommand),
    /// Run database migrations.
    #[command(subcommand)]
    Migrate(MigrateCommand),
    /// Reconcile roles, permissions and assignments with the catalog.
    Seed(SeedCommand),
    /// Exit with status 0 when the role holds the permission, 1 otherwise.
    Check {
        #[arg(long)]
        role: String,
        #[arg(long)]
        permission: String,
    },
    /// Report dangling assignments and roles without permissions.
    Verify,
    /// Print the effective catalog as JSON.
    #[command(name = "catalog:print")]
    CatalogPrint {
        #[arg(long, value_name = "FILE")]
        catalog: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum MigrateCommand {
    /// Apply pending migrations.
    Up,
    /// Rollback the most recent migration.
    Down,
}

#[derive(Args, Debug)]
struct ServeCommand {
    #[arg(long, default_value = "0.0.0.0")]
    host: std::net::IpAddr,
    #[arg(long, default_value_t = 8080)]
    port: u16,
    #[arg(long, help = "Allow starting even when migrations are pending")]
    allow_dirty: bool,
}

impl From<&ServeCommand> for ServeConfig {
    fn from(value: &ServeCommand) -> Self {
        ServeConfig::new(value.host, value.port)
    }
}

#[derive(Args, Debug)]
struct SeedCommand {
    #[arg(long, value_name = "FILE", help = "Catalog JSON to seed instead of the configured one")]
    catalog: Option<PathBuf>,
    #[arg(long, help = "Leave metadata of existing roles untouched")]
    preserve_role_metadata: bool,
    #[arg(long, help = "Delete stored roles the catalog does not declare")]
    prune: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing(ObsConfig::default())?;
    run(Cli::parse(), AppConfig::load).await
}

/// Dispatch a command. `load_config` is only called by the commands that read
/// the application config.
async fn run(cli: Cli, load_config: fn() -> Result<AppConfig>) -> Result<()> {
    match cli.command {
        Command::Serve(cmd) => run_server(cmd, Arc::new(load_config()?)).await,
        Command::Migrate(action) => match action {
            MigrateCommand::Up => migrate_up().await,
            MigrateCommand::Down => migrate_down().await,
        },
        Command::Seed(cmd) => run_seed(cmd, &load_config()?).await,
        Command::Check { role, permission } => run_check(&role, &permission).await,
        Command::Verify => run_verify().await,
        Command::CatalogPrint { catalog } => catalog_print(catalog, &load_config()?),
    }
}

async fn setup_pool() -> Result<DbPool> {
    let settings = DatabaseSettings::from_env();
    platform_db::connect(&settings)
        .await
        .context("failed to connect to database")
}

async fn run_seed(cmd: SeedCommand, config: &AppConfig) -> Result<()> {
    let catalog = config.load_catalog(cmd.catalog.as_deref())?;
    let role_metadata = if cmd.preserve_role_metadata {
        RoleMetadataPolicy::Preserve
    } else {
        config.role_metadata
    };
    let pool = setup_pool().await?;
    let report = platform_db::seed(
        &pool,
        &catalog,
        SeedOptions {
            role_metadata,
            prune: cmd.prune,
        },
    )
    .await?;
    for (role, permission) in report.skipped() {
        warn!(%role, %permission, "grant skipped: permission not in catalog");
    }
    info!(
        permissions = catalog.permissions.len(),
        roles = catalog.roles.len(),
        "seed complete"
    );
    Ok(())
}

async fn run_check(role: &str, permission: &str) -> Result<()> {
    let pool = setup_pool().await?;
    let Some(resolved) = platform_db::load_role(&pool, role).await? else {
        bail!("role {role} not found");
    };
    if resolved.has_permission(Some(permission)) {
        println!("allowed");
        Ok(())
    } else {
        println!("denied");
        bail!("role {role} does not hold {permission}")
    }
}

async fn run_verify() -> Result<()> {
    let pool = setup_pool().await?;
    let report = platform_db::verify_integrity(&pool).await?;
    for role in &report.roles_without_permissions {
        warn!(%role, "role holds no permissions");
    }
    if !report.is_clean() {
        bail!(
            "{} role assignments reference missing rows",
            report.dangling_assignments
        );
    }
    info!("role assignments are consistent");
    Ok(())
}

fn catalog_print(path: Option<PathBuf>, config: &AppConfig) -> Result<()> {
    let catalog = config.load_catalog(path.as_deref())?;
    println!("{}", catalog.to_json_pretty()?);
    Ok(())
}

async fn run_server(cmd: ServeCommand, config: Arc<AppConfig>) -> Result<()> {
    let pool = setup_pool().await?;
    ensure_migrations(&pool, cmd.allow_dirty).await?;
    let state = AppState {
        pool,
        cache: Arc::new(RoleCache::with_ttl(
            config.permission_cache,
            config.permission_cache_ttl,
        )),
        config,
    };
    http::serve((&cmd).into(), state).await
}

async fn ensure_migrations(pool: &DbPool, allow_dirty: bool) -> Result<()> {
    let pending = Migrator::get_pending_migrations(pool).await?;
    if !pending.is_empty() && !allow_dirty {
        bail!("pending migrations detected; run `masthead migrate up` or pass --allow-dirty");
    }
    Ok(())
}

async fn migrate_up() -> Result<()> {
    let pool = setup_pool().await?;
    Migrator::up(&pool, None).await?;
    info!("database migrations applied");
    Ok(())
}

async fn migrate_down() -> Result<()> {
    let pool = setup_pool().await?;
    Migrator::down(&pool, Some(1)).await?;
    info!("most recent migration rolled back");
    Ok(())
}
