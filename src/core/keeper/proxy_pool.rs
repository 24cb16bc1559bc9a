//! Proxy Pool
//!
//! Holds the current ordered set of egress paths. Readers take snapshots;
//! refresh and eviction are serialized behind a single write lock. The remote
//! fetch in [`ProxyPool::refresh`] runs before the lock is taken, so a slow
//! source never stalls eviction or snapshot readers, and heartbeats never touch
//! the pool at all.
//!
//! Refresh is fail-open: a fetch error or an empty list leaves the existing
//! contents exactly as they were.

use crate::core::keeper::debug_logger::get_logger;
use crate::core::keeper::sources::{parse_proxy_list, render_proxy_list};
use crate::core::keeper::transport::{HttpClientTrait, HttpMethod, HttpRequest};
use crate::core::keeper::types::{write_atomic, EgressPath, KeeperError};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Where the authoritative path list comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolSource {
    /// No proxies: a single direct path
    Direct,
    /// Local newline-delimited file
    File(PathBuf),
    /// Remote plaintext list, persisted to `cache_file` after each successful fetch
    Remote { url: String, cache_file: PathBuf },
}

impl PoolSource {
    pub fn describe(&self) -> String {
        match self {
            PoolSource::Direct => "direct".to_string(),
            PoolSource::File(path) => path.display().to_string(),
            PoolSource::Remote { url, .. } => url.clone(),
        }
    }

    /// Whether periodic refresh has anything to do
    pub fn is_refreshable(&self) -> bool {
        !matches!(self, PoolSource::Direct)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("source returned no usable paths")]
    Empty,
}

/// Outcome of dropping a path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eviction {
    /// The path was still in the pool and has been removed
    pub removed: bool,
    pub replacement: Option<EgressPath>,
}

pub struct ProxyPool {
    source: PoolSource,
    paths: RwLock<Vec<EgressPath>>,
    fetcher: Arc<dyn HttpClientTrait>,
}

impl ProxyPool {
    /// Build a pool with fixed initial contents (no I/O)
    pub fn with_paths(source: PoolSource, paths: Vec<EgressPath>, fetcher: Arc<dyn HttpClientTrait>) -> Self {
        Self {
            source,
            paths: RwLock::new(paths),
            fetcher,
        }
    }

    /// Load the initial pool from `source`
    ///
    /// Remote sources fall back to their cache file when the fetch fails.
    ///
    /// # Errors
    ///
    /// Returns `KeeperError::StartupFatal` when no non-empty list can be obtained.
    pub async fn load(source: PoolSource, fetcher: Arc<dyn HttpClientTrait>) -> Result<Self, KeeperError> {
        let logger = get_logger();

        let paths = match &source {
            PoolSource::Direct => vec![EgressPath::Direct],
            PoolSource::File(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    KeeperError::StartupFatal(format!(
                        "Failed to load proxies from {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                parse_proxy_list(&content)
            }
            PoolSource::Remote { url, cache_file } => {
                match fetch_list(fetcher.as_ref(), url).await {
                    Ok(paths) => {
                        if let Err(e) = write_atomic(cache_file, render_proxy_list(&paths).as_bytes()).await {
                            logger.warn(
                                "ProxyPool",
                                &format!("Could not persist proxy list to {}: {}", cache_file.display(), e),
                            );
                        }
                        paths
                    }
                    Err(e) => {
                        logger.warn(
                            "ProxyPool",
                            &format!(
                                "Fetching proxies from {} failed ({}), falling back to {}",
                                url,
                                e,
                                cache_file.display()
                            ),
                        );
                        match tokio::fs::read_to_string(cache_file).await {
                            Ok(content) => parse_proxy_list(&content),
                            Err(_) => Vec::new(),
                        }
                    }
                }
            }
        };

        if paths.is_empty() {
            return Err(KeeperError::StartupFatal(format!(
                "Proxy source {} yielded no usable paths",
                source.describe()
            )));
        }

        logger.pool_refreshed(&source.describe(), paths.len());
        Ok(Self::with_paths(source, paths, fetcher))
    }

    pub fn source(&self) -> &PoolSource {
        &self.source
    }

    /// Current pool snapshot, in pool order
    pub async fn current(&self) -> Vec<EgressPath> {
        self.paths.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.paths.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.paths.read().await.is_empty()
    }

    /// Replace the pool contents from the source
    ///
    /// Returns the new pool size. On any fetch error the pool is untouched. A
    /// fresh list is kept even when the cache file cannot be written.
    pub async fn refresh(&self) -> Result<usize, PoolError> {
        let fetched = match &self.source {
            PoolSource::Direct => return Ok(self.len().await),
            PoolSource::File(path) => {
                let content = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| PoolError::Fetch(format!("{}: {}", path.display(), e)))?;
                parse_proxy_list(&content)
            }
            PoolSource::Remote { url, .. } => fetch_list(self.fetcher.as_ref(), url).await?,
        };

        if fetched.is_empty() {
            return Err(PoolError::Empty);
        }

        let mut paths = self.paths.write().await;
        *paths = fetched;
        if let PoolSource::Remote { cache_file, .. } = &self.source {
            if let Err(e) = write_atomic(cache_file, render_proxy_list(&paths).as_bytes()).await {
                get_logger().warn(
                    "ProxyPool",
                    &format!("Could not persist proxy list to {}: {}", cache_file.display(), e),
                );
            }
        }
        Ok(paths.len())
    }

    /// Remove a known-bad path and pick a replacement not in `exclude`
    ///
    /// `removed` is false when another window already dropped the path. The
    /// replacement is `None` when every remaining path is excluded.
    pub async fn evict(&self, path: &EgressPath, exclude: &HashSet<EgressPath>) -> Eviction {
        let mut paths = self.paths.write().await;
        let before = paths.len();
        paths.retain(|candidate| candidate != path);
        Eviction {
            removed: paths.len() != before,
            replacement: first_available(&paths, path, exclude),
        }
    }

    /// Pick a path not in `exclude` without changing the pool
    pub async fn replacement(&self, exclude: &HashSet<EgressPath>) -> Option<EgressPath> {
        let paths = self.paths.read().await;
        paths.iter().find(|candidate| !exclude.contains(*candidate)).cloned()
    }

    /// Up to `count` paths not in `exclude`, in pool order
    pub async fn take_available(&self, count: usize, exclude: &HashSet<EgressPath>) -> Vec<EgressPath> {
        let paths = self.paths.read().await;
        paths
            .iter()
            .filter(|candidate| !exclude.contains(*candidate))
            .take(count)
            .cloned()
            .collect()
    }
}

fn first_available(paths: &[EgressPath], evicted: &EgressPath, exclude: &HashSet<EgressPath>) -> Option<EgressPath> {
    paths
        .iter()
        .find(|candidate| *candidate != evicted && !exclude.contains(*candidate))
        .cloned()
}

async fn fetch_list(fetcher: &dyn HttpClientTrait, url: &str) -> Result<Vec<EgressPath>, PoolError> {
    let request = HttpRequest {
        method: HttpMethod::Get,
        url: url.to_string(),
        headers: vec![("Accept".to_string(), "text/plain".to_string())],
        body: Vec::new(),
        proxy: None,
        timeout: FETCH_TIMEOUT,
    };

    let response = fetcher
        .execute(request)
        .await
        .map_err(|e| PoolError::Fetch(e.to_string()))?;
    if !(200..300).contains(&response.status) {
        return Err(PoolError::Fetch(format!("HTTP {}", response.status)));
    }

    let body = String::from_utf8_lossy(&response.body);
    let paths = parse_proxy_list(&body);
    if paths.is_empty() {
        return Err(PoolError::Empty);
    }
    Ok(paths)
}

/// Refresh `pool` every `interval` until the task is aborted
pub async fn run_refresher(pool: Arc<ProxyPool>, interval: Duration) {
    let logger = get_logger();
    let source = pool.source().describe();

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick fires immediately; the pool was just loaded
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match pool.refresh().await {
            Ok(count) => logger.pool_refreshed(&source, count),
            Err(e) => logger.pool_refresh_failed(&source, &e.to_string()),
        }
    }
}
