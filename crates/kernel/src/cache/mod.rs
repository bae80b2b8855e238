//! Optional key-value cache.
//!
//! The cache only ever speeds things up: every caller has a durable fallback,
//! so every cache failure is logged and swallowed. The backend is connected
//! lazily on first use; concurrent first users wait on the same attempt. A
//! failed connect disables the cache for the rest of the process.

mod memory;
mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// How long a rendered public page stays cached.
const PAGE_TTL: Duration = Duration::from_secs(300);

/// Errors raised by a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// A cache backend with per-key expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Set `key` to expire after `ttl` (`SET key value PX ms`).
    async fn set_px(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Returns how many keys were removed.
    async fn del(&self, key: &str) -> Result<u64, CacheError>;

    /// Remove every key starting with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

/// Where the backend comes from.
enum CacheSource {
    Disabled,
    Redis(String),
    Memory,
    Backend(Arc<dyn CacheBackend>),
}

/// Process-wide cache handle.
#[derive(Clone)]
pub struct CacheLayer {
    inner: Arc<CacheLayerInner>,
}

struct CacheLayerInner {
    source: CacheSource,
    backend: OnceCell<Option<Arc<dyn CacheBackend>>>,
}

impl CacheLayer {
    fn from_source(source: CacheSource) -> Self {
        Self {
            inner: Arc::new(CacheLayerInner {
                source,
                backend: OnceCell::new(),
            }),
        }
    }

    /// A cache that is never available.
    pub fn disabled() -> Self {
        Self::from_source(CacheSource::Disabled)
    }

    /// Redis at `url`, connected on first use.
    pub fn redis(url: impl Into<String>) -> Self {
        Self::from_source(CacheSource::Redis(url.into()))
    }

    /// In-process cache.
    pub fn memory() -> Self {
        Self::from_source(CacheSource::Memory)
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self::from_source(CacheSource::Backend(backend))
    }

    /// Which kind of cache was configured.
    pub fn source_name(&self) -> &'static str {
        match &self.inner.source {
            CacheSource::Disabled => "disabled",
            CacheSource::Redis(_) => "redis",
            CacheSource::Memory => "memory",
            CacheSource::Backend(backend) => backend.name(),
        }
    }

    /// The connected backend, or `None` when the cache is unavailable.
    pub async fn backend(&self) -> Option<Arc<dyn CacheBackend>> {
        self.inner
            .backend
            .get_or_init(|| self.connect())
            .await
            .clone()
    }

    async fn connect(&self) -> Option<Arc<dyn CacheBackend>> {
        let backend: Arc<dyn CacheBackend> = match &self.inner.source {
            CacheSource::Disabled => {
                debug!("cache disabled");
                return None;
            }
            CacheSource::Memory => Arc::new(MemoryCache::new()),
            CacheSource::Backend(backend) => Arc::clone(backend),
            CacheSource::Redis(url) => match RedisCache::connect(url).await {
                Ok(cache) => Arc::new(cache),
                Err(e) => {
                    warn!(error = %e, "cache connection failed, continuing without cache");
                    return None;
                }
            },
        };
        info!(backend = backend.name(), "cache connected");
        Some(backend)
    }

    /// Store `value` under `key` for `ttl`. Zero TTLs are not stored.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let Some(backend) = self.backend().await else {
            return;
        };
        if let Err(e) = backend.set_px(key, value, ttl).await {
            warn!(error = %e, "cache set failed");
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let backend = self.backend().await?;
        match backend.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "cache get failed");
                None
            }
        }
    }

    /// `None` when the cache cannot answer.
    pub async fn exists(&self, key: &str) -> Option<bool> {
        let backend = self.backend().await?;
        match backend.exists(key).await {
            Ok(found) => Some(found),
            Err(e) => {
                warn!(error = %e, "cache exists failed");
                None
            }
        }
    }

    pub async fn del(&self, key: &str) -> u64 {
        let Some(backend) = self.backend().await else {
            return 0;
        };
        backend.del(key).await.unwrap_or_else(|e| {
            warn!(error = %e, "cache delete failed");
            0
        })
    }

    pub async fn delete_prefix(&self, prefix: &str) -> u64 {
        let Some(backend) = self.backend().await else {
            return 0;
        };
        backend.delete_prefix(prefix).await.unwrap_or_else(|e| {
            warn!(error = %e, prefix, "cache prefix delete failed");
            0
        })
    }

    fn page_prefix(collection: &str) -> String {
        format!("page:{collection}:")
    }

    fn page_key(collection: &str, language: &str, path: &str) -> String {
        format!("{}{language}:{path}", Self::page_prefix(collection))
    }

    pub async fn get_page(&self, collection: &str, language: &str, path: &str) -> Option<String> {
        self.get(&Self::page_key(collection, language, path)).await
    }

    pub async fn set_page(&self, collection: &str, language: &str, path: &str, body: &str) {
        self.set(&Self::page_key(collection, language, path), body, PAGE_TTL)
            .await;
    }

    /// Drop every cached page of a collection.
    pub async fn flush_pages(&self, collection: &str) {
        let removed = self.delete_prefix(&Self::page_prefix(collection)).await;
        if removed > 0 {
            debug!(collection, removed, "page cache flushed");
        }
    }
}

impl std::fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("source", &self.source_name())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_is_silent() {
        let cache = CacheLayer::disabled();
        cache.set("k", "v", Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.exists("k").await, None);
        assert_eq!(cache.del("k").await, 0);
    }

    #[tokio::test]
    async fn failed_connect_disables_cache() {
        let cache = CacheLayer::redis("redis://127.0.0.1:1/");
        assert!(cache.backend().await.is_none());
        cache.set("k", "v", Duration::from_secs(10)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn pages_are_flushed_per_collection() {
        let cache = CacheLayer::memory();
        cache.set_page("pages", "en", "/about", "{}").await;
        cache.set_page("posts", "en", "/hello", "{}").await;

        cache.flush_pages("pages").await;

        assert_eq!(cache.get_page("pages", "en", "/about").await, None);
        assert_eq!(
            cache.get_page("posts", "en", "/hello").await.as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn zero_ttl_is_not_stored() {
        let cache = CacheLayer::memory();
        cache.set("k", "v", Duration::ZERO).await;
        assert_eq!(cache.exists("k").await, Some(false));
    }
}
