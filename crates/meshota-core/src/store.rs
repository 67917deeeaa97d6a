//! Manifest store: fetch, cache and coalesce vendor manifest requests
//!
//! The store is the only state shared between update sessions. Cache entries
//! are whole `Arc<Manifest>` values swapped under a short-lived lock, so a
//! reader never sees a manifest that is half replaced.
//!
//! Freshness rules:
//! - a cached manifest younger than the TTL is served without I/O;
//! - an expired or invalidated manifest triggers one fetch, shared by every
//!   caller that arrives while it is in flight;
//! - a refresh that fails to reach the endpoint leaves the old entry in place
//!   and hands it back marked stale, together with the fetch error;
//! - a refresh that returns malformed content fails the lookup.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ManifestStoreConfig;
use crate::error::OtaError;
use crate::manifest::{Manifest, ManifestEntry};
use crate::source::{HttpManifestSource, ManifestSource};

/// Result of a manifest lookup
#[derive(Debug, Clone)]
pub struct ManifestLookup {
    /// The manifest to use
    pub manifest: Arc<Manifest>,

    /// Set when the manifest is an expired cache entry served because the
    /// refresh failed
    pub stale: Option<OtaError>,
}

impl ManifestLookup {
    /// Whether the manifest could not be refreshed
    pub fn is_stale(&self) -> bool {
        self.stale.is_some()
    }
}

struct CacheSlot {
    manifest: Arc<Manifest>,
    refreshed: Instant,
    /// Age the manifest already had when the slot was created (restored records)
    age_offset: Duration,
    invalidated: bool,
}

impl CacheSlot {
    fn fresh(manifest: Arc<Manifest>) -> Self {
        Self {
            manifest,
            refreshed: Instant::now(),
            age_offset: Duration::ZERO,
            invalidated: false,
        }
    }

    fn age(&self) -> Duration {
        self.refreshed.elapsed().saturating_add(self.age_offset)
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        !self.invalidated && self.age() <= ttl
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Manifest>, OtaError>>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

enum Joined {
    Fetch(u64, SharedFetch),
    Cached(Arc<Manifest>),
}

/// Owned, lifecycle-scoped manifest cache
pub struct ManifestStore {
    source: Arc<dyn ManifestSource>,
    config: ManifestStoreConfig,
    cache: Arc<RwLock<HashMap<String, CacheSlot>>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_fetch_id: AtomicU64,
}

impl ManifestStore {
    /// Create an empty in-memory store
    pub fn new(source: Arc<dyn ManifestSource>, config: ManifestStoreConfig) -> Self {
        Self {
            source,
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Mutex::new(HashMap::new()),
            next_fetch_id: AtomicU64::new(0),
        }
    }

    /// Create a store backed by [`HttpManifestSource`]
    pub fn with_http(config: ManifestStoreConfig) -> Result<Self, OtaError> {
        let source = HttpManifestSource::new(&config)?;
        Ok(Self::new(Arc::new(source), config))
    }

    /// Create a store and restore any persisted manifest records
    pub async fn open(
        source: Arc<dyn ManifestSource>,
        config: ManifestStoreConfig,
    ) -> Result<Self, OtaError> {
        let store = Self::new(source, config);
        if let Some(dir) = store.config.persist_dir.clone() {
            let restored = store.restore(&dir).await?;
            info!(
                "Restored {} persisted manifests from {}",
                restored,
                dir.display()
            );
        }
        Ok(store)
    }

    /// Store configuration
    pub fn config(&self) -> &ManifestStoreConfig {
        &self.config
    }

    /// Get the manifest published at `url`
    ///
    /// # Errors
    ///
    /// Returns [`OtaError::Fetch`] when the endpoint cannot be reached and no
    /// cached copy exists, and [`OtaError::Parse`] whenever the endpoint
    /// serves malformed content.
    pub async fn get_manifest(&self, url: &str) -> Result<ManifestLookup, OtaError> {
        if let Some(manifest) = self.fresh_entry(url) {
            debug!("Manifest cache hit: {}", url);
            return Ok(ManifestLookup {
                manifest,
                stale: None,
            });
        }

        let (id, fetch) = match self.join_or_start_fetch(url) {
            Joined::Fetch(id, fetch) => (id, fetch),
            Joined::Cached(manifest) => {
                return Ok(ManifestLookup {
                    manifest,
                    stale: None,
                });
            }
        };
        let result = fetch.await;
        self.finish_fetch(url, id);

        match result {
            Ok(manifest) => Ok(ManifestLookup {
                manifest,
                stale: None,
            }),
            Err(error @ OtaError::Fetch { .. }) => {
                let cached = self
                    .cache
                    .read()
                    .get(url)
                    .map(|slot| slot.manifest.clone());
                match cached {
                    Some(manifest) => {
                        warn!(
                            "Serving stale manifest for {} (fetched at {}): {}",
                            url, manifest.fetched_at, error
                        );
                        Ok(ManifestLookup {
                            manifest,
                            stale: Some(error),
                        })
                    }
                    None => Err(error),
                }
            }
            // Malformed content is never papered over with an old copy.
            Err(error) => Err(error),
        }
    }

    /// Force the next lookup of `url` to refetch
    ///
    /// The old entry stays available as a stale fallback. Returns whether an
    /// entry existed.
    pub fn invalidate(&self, url: &str) -> bool {
        match self.cache.write().get_mut(url) {
            Some(slot) => {
                slot.invalidated = true;
                true
            }
            None => false,
        }
    }

    /// Force every cached manifest to refetch on next lookup
    pub fn invalidate_all(&self) {
        for slot in self.cache.write().values_mut() {
            slot.invalidated = true;
        }
    }

    /// Drop every cached manifest
    pub fn clear(&self) {
        self.cache.write().clear();
    }

    /// URLs currently held in the cache
    pub fn cached_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.cache.read().keys().cloned().collect();
        urls.sort();
        urls
    }

    fn fresh_entry(&self, url: &str) -> Option<Arc<Manifest>> {
        let cache = self.cache.read();
        cache
            .get(url)
            .filter(|slot| slot.is_fresh(self.config.ttl))
            .map(|slot| slot.manifest.clone())
    }

    fn join_or_start_fetch(&self, url: &str) -> Joined {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(url)
            && existing.fetch.peek().is_none()
        {
            debug!("Joining in-flight manifest fetch: {}", url);
            return Joined::Fetch(existing.id, existing.fetch.clone());
        }

        // A fetch may have filled the cache since the unlocked check.
        if let Some(manifest) = self.fresh_entry(url) {
            debug!("Manifest cached by a concurrent fetch: {}", url);
            return Joined::Cached(manifest);
        }

        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let fetch = self.fetch_task(url.to_string());
        in_flight.insert(
            url.to_string(),
            InFlight {
                id,
                fetch: fetch.clone(),
            },
        );
        Joined::Fetch(id, fetch)
    }

    fn finish_fetch(&self, url: &str, id: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(url).is_some_and(|f| f.id == id) {
            in_flight.remove(url);
        }
    }

    fn fetch_task(&self, url: String) -> SharedFetch {
        let source = self.source.clone();
        let cache = self.cache.clone();
        let ttl = self.config.ttl;
        let persist_dir = self.config.persist_dir.clone();

        async move {
            let entries = source.fetch(&url).await?;
            let manifest = Arc::new(Manifest::new(url.clone(), entries, ttl));
            cache
                .write()
                .insert(url.clone(), CacheSlot::fresh(manifest.clone()));
            info!(
                "Cached manifest {} with {} entries",
                url,
                manifest.entries.len()
            );

            if let Some(dir) = persist_dir
                && let Err(e) = persist_record(&dir, &manifest).await
            {
                warn!("Failed to persist manifest {}: {}", url, e);
            }
            Ok(manifest)
        }
        .boxed()
        .shared()
    }

    async fn restore(&self, dir: &Path) -> Result<usize, OtaError> {
        let records = load_records(dir).await?;
        let now = chrono::Utc::now();
        let mut cache = self.cache.write();
        let mut restored = 0usize;
        for record in records {
            let age = now
                .signed_duration_since(record.fetched_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let manifest = Arc::new(Manifest {
                source_url: record.url.clone(),
                fetched_at: record.fetched_at,
                entries: record.entries,
                ttl: self.config.ttl,
            });
            cache.insert(
                record.url,
                CacheSlot {
                    manifest,
                    refreshed: Instant::now(),
                    age_offset: age,
                    invalidated: false,
                },
            );
            restored = restored.saturating_add(1);
        }
        Ok(restored)
    }
}

/// On-disk form of a cached manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedManifest {
    url: String,
    fetched_at: chrono::DateTime<chrono::Utc>,
    entries: Vec<ManifestEntry>,
}

fn record_path(dir: &Path, url: &str) -> PathBuf {
    use sha2::{Digest, Sha256};
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    dir.join(format!("manifest-{}.json", digest.get(..16).unwrap_or(&digest)))
}

async fn persist_record(dir: &Path, manifest: &Manifest) -> anyhow::Result<()> {
    use anyhow::Context;

    tokio::fs::create_dir_all(dir)
        .await
        .context("Failed to create manifest cache directory")?;

    let record = PersistedManifest {
        url: manifest.source_url.clone(),
        fetched_at: manifest.fetched_at,
        entries: manifest.entries.clone(),
    };
    let content =
        serde_json::to_string_pretty(&record).context("Failed to serialize manifest record")?;

    let path = record_path(dir, &manifest.source_url);
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content)
        .await
        .context("Failed to write manifest record")?;
    tokio::fs::rename(&tmp, &path)
        .await
        .context("Failed to move manifest record into place")?;

    debug!("Persisted manifest record: {}", path.display());
    Ok(())
}

async fn load_records(dir: &Path) -> Result<Vec<PersistedManifest>, OtaError> {
    let io_error = |e: std::io::Error| {
        OtaError::Config(format!(
            "cannot read manifest cache {}: {e}",
            dir.display()
        ))
    };

    if !tokio::fs::try_exists(dir).await.map_err(io_error)? {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let parsed = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<PersistedManifest>(&bytes)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping unreadable manifest record {}: {}", path.display(), e),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        calls: AtomicUsize,
        fail: parking_lot::Mutex<bool>,
        garbled: parking_lot::Mutex<bool>,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: parking_lot::Mutex::new(false),
                garbled: parking_lot::Mutex::new(false),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ManifestSource for CountingSource {
        async fn fetch(&self, url: &str) -> Result<Vec<ManifestEntry>, OtaError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if *self.fail.lock() {
                return Err(OtaError::Fetch {
                    url: url.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            if *self.garbled.lock() {
                return Err(OtaError::Parse {
                    url: url.to_string(),
                    message: "expected value at line 1 column 1".to_string(),
                });
            }
            Ok(vec![ManifestEntry {
                image_type: 0,
                manufacturer_code: 4107,
                model_id: None,
                manufacturer_name: None,
                file_version: u32::try_from(call).unwrap_or(u32::MAX),
                file_size: 4,
                url: "https://vendor.invalid/fw.ota".to_string(),
                checksum: String::new(),
            }])
        }
    }

    const URL: &str = "https://vendor.invalid/index.json";

    fn store(source: Arc<CountingSource>, ttl: Duration) -> ManifestStore {
        ManifestStore::new(source, ManifestStoreConfig::default().with_ttl(ttl))
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_within_ttl_and_refetched_after() -> Result<(), OtaError> {
        let source = CountingSource::new();
        let store = store(source.clone(), Duration::from_secs(60));

        store.get_manifest(URL).await?;
        store.get_manifest(URL).await?;
        assert_eq!(source.calls(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        let lookup = store.get_manifest(URL).await?;
        assert_eq!(source.calls(), 2);
        assert!(!lookup.is_stale());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_share_one_fetch() -> Result<(), OtaError> {
        let source = CountingSource::new();
        let store = store(source.clone(), Duration::from_secs(60));

        let (a, b, c) = tokio::join!(
            store.get_manifest(URL),
            store.get_manifest(URL),
            store.get_manifest(URL)
        );
        assert_eq!(source.calls(), 1);
        assert!(Arc::ptr_eq(&a?.manifest, &b?.manifest));
        assert!(c.is_ok());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_serves_stale_copy() -> Result<(), OtaError> {
        let source = CountingSource::new();
        let store = store(source.clone(), Duration::from_secs(10));
        let first = store.get_manifest(URL).await?;

        *source.fail.lock() = true;
        tokio::time::advance(Duration::from_secs(11)).await;
        let lookup = store.get_manifest(URL).await?;

        assert!(lookup.is_stale());
        assert!(matches!(lookup.stale, Some(OtaError::Fetch { .. })));
        assert!(Arc::ptr_eq(&lookup.manifest, &first.manifest));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_refresh_is_not_served_stale() -> Result<(), OtaError> {
        let source = CountingSource::new();
        let store = store(source.clone(), Duration::from_secs(10));
        store.get_manifest(URL).await?;

        *source.garbled.lock() = true;
        tokio::time::advance(Duration::from_secs(11)).await;
        let result = store.get_manifest(URL).await;

        assert!(matches!(result, Err(OtaError::Parse { .. })));
        assert_eq!(source.calls(), 2);
        // The old entry is still held for a later fetch failure.
        assert_eq!(store.cached_urls(), vec![URL.to_string()]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_after_finished_fetch_uses_cache() -> Result<(), OtaError> {
        let source = CountingSource::new();
        let store = store(source.clone(), Duration::from_secs(60));
        store.get_manifest(URL).await?;

        // A completed shared fetch left in the table must not trigger a refetch
        // while the cache already holds its result.
        let stale_handle = store.fetch_task(URL.to_string());
        stale_handle.clone().await?;
        store.in_flight.lock().insert(
            URL.to_string(),
            InFlight {
                id: u64::MAX,
                fetch: stale_handle,
            },
        );
        let calls_before = source.calls();

        match store.join_or_start_fetch(URL) {
            Joined::Cached(manifest) => assert_eq!(manifest.source_url, URL),
            Joined::Fetch(..) => return Err(OtaError::Config("expected cache hit".into())),
        }
        assert_eq!(source.calls(), calls_before);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_cache_propagates() {
        let source = CountingSource::new();
        *source.fail.lock() = true;
        let store = store(source, Duration::from_secs(10));
        assert!(matches!(
            store.get_manifest(URL).await,
            Err(OtaError::Fetch { .. })
        ));
        assert!(store.cached_urls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_refetch() -> Result<(), OtaError> {
        let source = CountingSource::new();
        let store = store(source.clone(), Duration::from_secs(3600));
        store.get_manifest(URL).await?;

        assert!(store.invalidate(URL));
        assert!(!store.invalidate("https://other.invalid/index.json"));
        let lookup = store.get_manifest(URL).await?;
        assert_eq!(source.calls(), 2);
        assert_eq!(lookup.manifest.entries.first().map(|e| e.file_version), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_persisted_records_survive_restart() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let config = ManifestStoreConfig::default()
            .with_ttl(Duration::from_secs(3600))
            .with_persist_dir(dir.path().to_path_buf());

        let source = CountingSource::new();
        let first = ManifestStore::open(source.clone(), config.clone()).await?;
        first.get_manifest(URL).await?;
        assert_eq!(source.calls(), 1);
        drop(first);

        let restarted = ManifestStore::open(source.clone(), config).await?;
        let lookup = restarted.get_manifest(URL).await?;
        assert_eq!(source.calls(), 1, "restored record should be served without refetch");
        assert_eq!(lookup.manifest.source_url, URL);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_records_are_refetched_after_restart() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let record = PersistedManifest {
            url: URL.to_string(),
            fetched_at: chrono::Utc::now() - chrono::Duration::hours(2),
            entries: Vec::new(),
        };
        tokio::fs::write(record_path(dir.path(), URL), serde_json::to_vec(&record)?).await?;
        tokio::fs::write(dir.path().join("garbage.json"), b"{not json").await?;

        let config = ManifestStoreConfig::default()
            .with_ttl(Duration::from_secs(3600))
            .with_persist_dir(dir.path().to_path_buf());
        let source = CountingSource::new();
        let store = ManifestStore::open(source.clone(), config).await?;
        assert_eq!(store.cached_urls(), vec![URL.to_string()]);

        store.get_manifest(URL).await?;
        assert_eq!(source.calls(), 1);
        Ok(())
    }
}
