// Cache-aside ROM loader: cache first, network on miss, detached write-back.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::ContentCache;
use super::progress::{download_status, LoadingIndicator};
use crate::config::pace;
use crate::error::LaunchError;
use crate::source::traits::{DownloadProgress, RomSource};

/// Where resolved content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOrigin {
    Cache,
    Network,
}

pub struct ContentLoader {
    cache: Arc<dyn ContentCache>,
    source: Arc<dyn RomSource>,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
    cache_hit_delay: Option<Duration>,
}

impl ContentLoader {
    pub fn new(cache: Arc<dyn ContentCache>, source: Arc<dyn RomSource>) -> Self {
        Self {
            cache,
            source,
            pending_writes: Mutex::new(Vec::new()),
            cache_hit_delay: None,
        }
    }

    pub fn with_cache_hit_delay(mut self, delay: Option<Duration>) -> Self {
        self.cache_hit_delay = delay;
        self
    }

    /// Resolve the ROM bytes for `name`, consulting the cache under `key` first.
    ///
    /// An empty `key` skips the cache in both directions.
    pub async fn resolve(
        &self,
        name: &str,
        key: &str,
        loading: &dyn LoadingIndicator,
    ) -> Result<(Bytes, ContentOrigin), LaunchError> {
        if !key.is_empty() {
            if let Some(data) = self.cache.get(key).await {
                loading.update_text("ROM found in cache!");
                pace(self.cache_hit_delay).await;
                return Ok((data, ContentOrigin::Cache));
            }
        }

        loading.update_text("Downloading ROM...");
        let report = |p: DownloadProgress| loading.update_text(&download_status(&p));
        let data = self.source.fetch(name, &report).await?;

        self.spawn_cache_write(key, data.clone());
        Ok((data, ContentOrigin::Network))
    }

    /// Persist a fresh download without blocking the caller. Failures are only logged.
    fn spawn_cache_write(&self, key: &str, data: Bytes) {
        if key.is_empty() {
            debug!("rom caching disabled: no cache key");
            return;
        }

        let cache = Arc::clone(&self.cache);
        let key = key.to_string();
        let handle = tokio::spawn(async move {
            if let Err(e) = cache.put(&key, data).await {
                warn!("Failed to cache ROM \"{}\": {}", key, e);
            }
        });
        self.pending_writes.lock().push(handle);
    }

    /// Wait for every detached cache write started so far.
    pub async fn flush_cache_writes(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.pending_writes.lock());
        if handles.is_empty() {
            return;
        }
        info!("waiting for {} pending cache write(s)", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("cache write task failed: {}", e);
            }
        }
    }
}
