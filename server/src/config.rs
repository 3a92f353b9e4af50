use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use platform_authz::Catalog;
use platform_db::{DEFAULT_CACHE_TTL, RoleMetadataPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub catalog_path: Option<PathBuf>,
    pub permission_cache: bool,
    pub permission_cache_ttl: Duration,
    pub role_metadata: RoleMetadataPolicy,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog_path: None,
            permission_cache: true,
            permission_cache_ttl: DEFAULT_CACHE_TTL,
            role_metadata: RoleMetadataPolicy::default(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let catalog_path = std::env::var("RBAC_CATALOG_PATH")
            .ok()
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);

        let permission_cache = env_flag("PERMISSION_CACHE", true);
        let permission_cache_ttl = match std::env::var("PERMISSION_CACHE_TTL_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.trim()
                    .parse()
                    .with_context(|| format!("invalid PERMISSION_CACHE_TTL_SECS {raw}"))?,
            ),
            Err(_) => DEFAULT_CACHE_TTL,
        };

        let role_metadata = match std::env::var("ROLE_METADATA_POLICY") {
            Ok(raw) => raw.parse().map_err(|err: String| anyhow!(err))?,
            Err(_) => RoleMetadataPolicy::default(),
        };

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .filter_map(|s| {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            })
            .collect::<Vec<_>>();

        Ok(Self {
            catalog_path,
            permission_cache,
            permission_cache_ttl,
            role_metadata,
            cors_allowed_origins,
        })
    }

    /// The catalog at `override_path`, else the configured path, else the
    /// built-in one.
    pub fn load_catalog(&self, override_path: Option<&Path>) -> Result<Catalog> {
        match override_path.or(self.catalog_path.as_deref()) {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read catalog {}", path.display()))?;
                Catalog::from_json(&raw)
                    .with_context(|| format!("invalid catalog {}", path.display()))
            }
            None => Catalog::builtin().context("built-in catalog is invalid"),
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|val| matches!(val.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}
