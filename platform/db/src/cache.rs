use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use platform_authz::ResolvedRole;
use sea_orm::ConnectionTrait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{DbResult, store::load_role};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug)]
struct CachedRole {
    role: Arc<ResolvedRole>,
    expires_at: Instant,
}

/// Memoizes resolved roles by name for at most `ttl`.
///
/// Lookups that find no role are not cached. Writers in this process should
/// call [`RoleCache::invalidate_all`]; changes made by other processes show up
/// once the entry expires.
#[derive(Debug)]
pub struct RoleCache {
    enabled: bool,
    ttl: Duration,
    // Bumped on every invalidation so loads started earlier are discarded.
    generation: AtomicU64,
    entries: RwLock<HashMap<String, CachedRole>>,
}

impl Default for RoleCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RoleCache {
    pub fn new(enabled: bool) -> Self {
        Self::with_ttl(enabled, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(enabled: bool, ttl: Duration) -> Self {
        Self {
            enabled: enabled && !ttl.is_zero(),
            ttl,
            generation: AtomicU64::new(0),
            entries: RwLock::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn resolve<C>(&self, conn: &C, name: &str) -> DbResult<Option<Arc<ResolvedRole>>>
    where
        C: ConnectionTrait,
    {
        if !self.enabled {
            return Ok(load_role(conn, name).await?.map(Arc::new));
        }
        if let Some(hit) = self.entries.read().await.get(name)
            && Instant::now() < hit.expires_at
        {
            debug!(role = name, "role cache hit");
            return Ok(Some(hit.role.clone()));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let Some(resolved) = load_role(conn, name).await?.map(Arc::new) else {
            return Ok(None);
        };
        self.store(name, resolved.clone(), generation).await;
        Ok(Some(resolved))
    }

    /// Insert unless an invalidation happened after `generation` was read.
    async fn store(&self, name: &str, role: Arc<ResolvedRole>, generation: u64) -> bool {
        let mut entries = self.entries.write().await;
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(role = name, "cache invalidated during load; not stored");
            return false;
        }
        entries.insert(
            name.to_string(),
            CachedRole {
                role,
                expires_at: Instant::now() + self.ttl,
            },
        );
        true
    }

    pub async fn invalidate_all(&self) {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(evicted = entries.len(), "role cache invalidated");
        entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
