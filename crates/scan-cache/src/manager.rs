//! # Scan Cache Manager
//!
//! Resolves scan identifiers to content, serving from disk when a bundle is
//! cached and otherwise running one streamed download per identifier.
//! Callers that ask for an identifier that is already downloading join the
//! running session instead of starting a second transfer.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::downloader::StreamDownloader;
use crate::events::{ContentOrigin, LoadedContent, ScanEvent};
use crate::identifier::{ScanDescriptor, ScanId};
use crate::source::{BundleSource, HttpBundleSource};
use crate::store::{CacheMetadata, DeleteOutcome, DiskStore, EntryState};
use crate::{CacheConfig, ScanCacheError};

type LoadResult = Result<LoadedContent, ScanCacheError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// Bookkeeping for one in-flight download.
struct DownloadSession {
    generation: u64,
    url: String,
    cancel: CancellationToken,
    result: SharedLoad,
}

struct Inner {
    config: CacheConfig,
    store: DiskStore,
    downloader: StreamDownloader,
    events: broadcast::Sender<ScanEvent>,
    sessions: Mutex<HashMap<ScanId, DownloadSession>>,
    loaded: Mutex<BTreeSet<ScanId>>,
    next_generation: AtomicU64,
}

/// Cache manager for scan content bundles
///
/// Cloning is cheap; all clones share the same sessions and event channel.
#[derive(Clone)]
pub struct ScanCacheManager {
    inner: Arc<Inner>,
}

impl ScanCacheManager {
    /// Create a manager that downloads over HTTP.
    pub fn new(config: CacheConfig) -> Result<Self, ScanCacheError> {
        let source = Arc::new(HttpBundleSource::new(&config)?);
        Ok(Self::with_source(config, source))
    }

    /// Create a manager with a custom bundle source.
    pub fn with_source(config: CacheConfig, source: Arc<dyn BundleSource>) -> Self {
        let store = DiskStore::new(config.cache_root(), config.bundle_file_name.clone());
        let downloader = StreamDownloader::new(source, config.fragment_size);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        debug!(root = ?store.root(), "Scan cache initialized");

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                downloader,
                events,
                sessions: Mutex::new(HashMap::new()),
                loaded: Mutex::new(BTreeSet::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &DiskStore {
        &self.inner.store
    }

    /// Whether a download session is active for `id`.
    pub fn is_downloading(&self, id: &ScanId) -> bool {
        self.inner.sessions.lock().contains_key(id)
    }

    /// Number of active download sessions.
    pub fn active_downloads(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// True iff the leaf directory holds at least one file and no download
    /// currently owns it.
    pub async fn is_cached(&self, id: &ScanId) -> bool {
        !self.is_downloading(id) && self.inner.store.has_payload(id).await
    }

    pub async fn entry_state(&self, id: &ScanId) -> EntryState {
        if self.is_downloading(id) {
            return EntryState::Downloading;
        }
        self.inner.store.entry_state(id).await
    }

    /// Load a scan from a server listing entry.
    pub async fn load_scan(
        &self,
        site_id: i64,
        slab_id: i64,
        scan: &ScanDescriptor,
    ) -> Result<LoadedContent, ScanCacheError> {
        self.load_or_fetch(scan.identifier(site_id, slab_id), &scan.url)
            .await
    }

    /// Resolve `id` to content, reading the cached bundle or downloading it
    /// from `url`.
    pub async fn load_or_fetch(&self, id: ScanId, url: &str) -> Result<LoadedContent, ScanCacheError> {
        self.inner.emit(ScanEvent::LoadScans(vec![id]));

        if let Some(pending) = self.pending_session(&id) {
            debug!(scan = %id, "Joining download in progress");
            return pending.await;
        }

        if self.inner.store.has_payload(&id).await {
            // A session may have claimed the directory since the first check
            if let Some(pending) = self.pending_session(&id) {
                return pending.await;
            }
            if let Some(content) = self.inner.load_from_disk(&id).await? {
                return Ok(content);
            }
        }

        self.start_or_join(id, url).await
    }

    /// Fire-and-forget variant of [`load_or_fetch`](Self::load_or_fetch);
    /// progress and completion are reported through events.
    pub fn spawn_load(&self, id: ScanId, url: impl Into<String>) -> JoinHandle<LoadResult> {
        let this = self.clone();
        let url = url.into();
        tokio::spawn(async move { this.load_or_fetch(id, &url).await })
    }

    fn pending_session(&self, id: &ScanId) -> Option<SharedLoad> {
        self.inner
            .sessions
            .lock()
            .get(id)
            .map(|session| session.result.clone())
    }

    fn start_or_join(&self, id: ScanId, url: &str) -> SharedLoad {
        let mut sessions = self.inner.sessions.lock();
        if let Some(session) = sessions.get(&id) {
            if session.url != url {
                warn!(scan = %id, running = %session.url, requested = %url, "Download already running from a different URL");
            }
            return session.result.clone();
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let result = self
            .inner
            .clone()
            .run_session(id, url.to_string(), generation, cancel.clone())
            .boxed()
            .shared();

        sessions.insert(
            id,
            DownloadSession {
                generation,
                url: url.to_string(),
                cancel,
                result: result.clone(),
            },
        );
        drop(sessions);

        // Drive the session even if every caller drops its future
        tokio::spawn(result.clone());
        result
    }

    /// Abort the download for `id`, delete its partial file and clear its
    /// bookkeeping. Returns whether a running transfer was cancelled.
    pub async fn cancel(&self, id: &ScanId) -> bool {
        let pending = self
            .inner
            .sessions
            .lock()
            .get(id)
            .map(|session| (session.cancel.clone(), session.result.clone()));

        let Some((token, result)) = pending else {
            debug!(scan = %id, "No download in progress to cancel");
            return false;
        };

        info!(scan = %id, "Cancelling scan download");
        token.cancel();
        matches!(result.await, Err(ScanCacheError::Cancelled))
    }

    /// Cancel every running download. Returns the number cancelled.
    pub async fn cancel_all(&self) -> usize {
        let ids: Vec<ScanId> = self.inner.sessions.lock().keys().copied().collect();
        let results = futures::future::join_all(ids.iter().map(|id| self.cancel(id))).await;
        results.into_iter().filter(|cancelled| *cancelled).count()
    }

    /// Explicitly evict a cached bundle. A running download for the same
    /// identifier is cancelled first. Loaded content is not touched.
    pub async fn delete_cached(&self, id: &ScanId) -> Result<DeleteOutcome, ScanCacheError> {
        if self.cancel(id).await {
            debug!(scan = %id, "Cancelled download before deleting cached scan");
        }

        let outcome = self.inner.store.delete(id).await?;
        if outcome.removed_anything() {
            info!(scan = %id, "Deleted cached scan");
            self.inner.emit(ScanEvent::CachedScanDeleted(*id));
        }
        Ok(outcome)
    }

    /// Forget content previously handed out for `id`.
    pub fn unload_scan(&self, id: &ScanId) -> bool {
        if !self.inner.loaded.lock().remove(id) {
            return false;
        }
        debug!(scan = %id, "Scan unloaded");
        self.inner.emit(ScanEvent::ScanUnloaded(*id));
        true
    }

    /// Unload every loaded scan, one event per scan.
    pub fn unload_all(&self) -> usize {
        let unloaded = std::mem::take(&mut *self.inner.loaded.lock());
        for id in &unloaded {
            self.inner.emit(ScanEvent::ScanUnloaded(*id));
        }
        unloaded.len()
    }

    pub fn loaded_scan_count(&self) -> usize {
        self.inner.loaded.lock().len()
    }

    pub fn loaded_scans(&self) -> Vec<ScanId> {
        self.inner.loaded.lock().iter().copied().collect()
    }

    /// Entries of a server listing that are cached locally.
    pub async fn cached_scans(
        &self,
        site_id: i64,
        slab_id: i64,
        scans: &[ScanDescriptor],
    ) -> Vec<ScanDescriptor> {
        let mut cached = Vec::new();
        for scan in scans {
            if self.is_cached(&scan.identifier(site_id, slab_id)).await {
                cached.push(scan.clone());
            }
        }
        cached
    }

    /// Every identifier cached on disk.
    pub async fn list_cached(&self) -> Result<Vec<ScanId>, ScanCacheError> {
        let mut cached = self.inner.store.list_cached().await?;
        cached.retain(|id| !self.is_downloading(id));
        Ok(cached)
    }
}

impl Inner {
    fn emit(&self, event: ScanEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn mark_loaded(&self, content: &LoadedContent) {
        self.loaded.lock().insert(content.id);
        self.emit(ScanEvent::ScansLoaded(content.clone()));
    }

    async fn load_from_disk(&self, id: &ScanId) -> Result<Option<LoadedContent>, ScanCacheError> {
        debug!(scan = %id, "Loading scan bundle from disk");
        let Some((path, data)) = self.store.read_first(id).await? else {
            return Ok(None);
        };

        let content = LoadedContent {
            id: *id,
            path,
            data,
            origin: ContentOrigin::Disk,
        };
        self.mark_loaded(&content);
        Ok(Some(content))
    }

    async fn run_session(
        self: Arc<Self>,
        id: ScanId,
        url: String,
        generation: u64,
        cancel: CancellationToken,
    ) -> LoadResult {
        let result = self.download_and_read(&id, &url, generation, &cancel).await;

        if let Err(err) = &result {
            if let Err(e) = self.store.remove_partial(&id).await {
                warn!(scan = %id, error = %e, "Failed to remove partial bundle");
            }

            if err.is_cancelled() {
                info!(scan = %id, "Scan download cancelled");
                self.emit(ScanEvent::ScanLoadCancelled(id));
            } else {
                warn!(scan = %id, url = %url, error = %err, "Scan download failed");
                self.emit(ScanEvent::ScanLoadFailed {
                    id,
                    reason: err.to_string(),
                });
            }
        }

        self.finish_session(&id, generation);

        if let Ok(content) = &result {
            self.mark_loaded(content);
        }
        result
    }

    async fn download_and_read(
        &self,
        id: &ScanId,
        url: &str,
        generation: u64,
        cancel: &CancellationToken,
    ) -> LoadResult {
        // Another session may have completed between the caller's cache check
        // and this one being registered
        if self.store.has_payload(id).await {
            if let Ok(Some((path, data))) = self.store.read_first(id).await {
                debug!(scan = %id, "Bundle already cached, skipping download");
                self.finish_session(id, generation);
                return Ok(LoadedContent {
                    id: *id,
                    path,
                    data,
                    origin: ContentOrigin::Disk,
                });
            }
        }

        let destination = self.store.prepare_destination(id).await?;

        let scan = *id;
        let events = self.events.clone();
        let summary = self
            .downloader
            .download(id, url, &destination, cancel, move |progress| {
                let _ = events.send(ScanEvent::ScansLoading { id: scan, progress });
            })
            .await?;

        let metadata = CacheMetadata::new(url, summary.bytes_written)
            .with_content_type_option(summary.content_type)
            .with_etag_option(summary.etag)
            .with_last_modified_option(summary.last_modified);
        if let Err(e) = self.store.write_metadata(id, &metadata).await {
            warn!(scan = %id, error = %e, "Failed to record cache metadata");
        }

        // Read back through the cache path so callers always get the on-disk bytes
        let (path, data) = self.store.read_first(id).await?.ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("bundle for scan {id} vanished after download"),
            )
        })?;

        // The entry is Cached from here on; subscribers may query or delete it
        self.finish_session(id, generation);
        info!(scan = %id, bytes = summary.bytes_written, "Scan bundle cached");
        self.emit(ScanEvent::ScanBundleCached(*id));

        Ok(LoadedContent {
            id: *id,
            path,
            data,
            origin: ContentOrigin::Network,
        })
    }

    fn finish_session(&self, id: &ScanId, generation: u64) {
        let mut sessions = self.sessions.lock();
        if sessions.get(id).map(|s| s.generation) == Some(generation) {
            sessions.remove(id);
        }
    }
}
