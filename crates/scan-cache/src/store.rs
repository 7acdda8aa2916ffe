//! # Disk Store
//!
//! On-disk layout of cached scan bundles:
//!
//! ```text
//! <app-data-root>/Cached Data/<site_id>/<slab_id>/<scan_id>/<bundle-file>
//! ```
//!
//! A leaf directory holds exactly one payload file. The optional metadata
//! sidecar lives next to the leaf directory (`<scan_id>.meta.json`) so the
//! leaf layout stays compatible with caches written without it.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::identifier::ScanId;

/// Cache state of a single identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// No payload on disk
    Absent,
    /// Payload present and not known to be damaged
    Cached,
    /// A download session currently owns the leaf directory
    Downloading,
    /// Payload present but empty or shorter than its recorded size
    Corrupt,
}

/// Result of an explicit eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Number of payload files removed
    Deleted(usize),
    /// The leaf directory exists but holds no files
    EmptyDirectory,
    /// The leaf directory does not exist
    NotFound,
}

impl DeleteOutcome {
    pub fn removed_anything(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted(n) if *n > 0)
    }
}

/// Metadata recorded after a completed download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// URL the bundle was fetched from
    pub source_url: String,
    /// Size of the payload in bytes
    pub size: u64,
    /// Unix timestamp (seconds) of the completed download
    pub cached_at: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheMetadata {
    pub fn new(source_url: impl Into<String>, size: u64) -> Self {
        Self {
            source_url: source_url.into(),
            size,
            cached_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            content_type: None,
            etag: None,
            last_modified: None,
        }
    }

    pub fn with_content_type_option(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_etag_option(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    pub fn with_last_modified_option(mut self, last_modified: Option<String>) -> Self {
        self.last_modified = last_modified;
        self
    }
}

/// File-system backed store for scan bundles
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
    bundle_file_name: String,
}

impl DiskStore {
    /// Create a store rooted at an already resolved cache directory.
    pub fn new(root: impl Into<PathBuf>, bundle_file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bundle_file_name: bundle_file_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Leaf directory for an identifier.
    pub fn scan_dir(&self, id: &ScanId) -> PathBuf {
        self.root.join(id.relative_dir())
    }

    /// Destination path for a new download.
    pub fn bundle_path(&self, id: &ScanId) -> PathBuf {
        self.scan_dir(id).join(&self.bundle_file_name)
    }

    fn metadata_path(&self, id: &ScanId) -> PathBuf {
        self.root
            .join(id.site_id.to_string())
            .join(id.slab_id.to_string())
            .join(format!("{}.meta.json", id.scan_id))
    }

    /// Regular files in the leaf directory, sorted by name. `None` when the
    /// directory does not exist.
    async fn payload_files(&self, id: &ScanId) -> io::Result<Option<Vec<PathBuf>>> {
        let dir = self.scan_dir(id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(Some(files))
    }

    /// True iff the leaf directory exists and contains at least one file.
    pub async fn has_payload(&self, id: &ScanId) -> bool {
        match self.payload_files(id).await {
            Ok(Some(files)) => !files.is_empty(),
            Ok(None) => false,
            Err(e) => {
                warn!(scan = %id, error = %e, "Failed to inspect cache directory");
                false
            }
        }
    }

    /// On-disk state, ignoring any in-flight download.
    pub async fn entry_state(&self, id: &ScanId) -> EntryState {
        let first = match self.payload_files(id).await {
            Ok(Some(files)) => files.into_iter().next(),
            Ok(None) => None,
            Err(e) => {
                warn!(scan = %id, error = %e, "Failed to inspect cache directory");
                None
            }
        };

        let Some(path) = first else {
            return EntryState::Absent;
        };

        let size = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to stat cached bundle");
                return EntryState::Corrupt;
            }
        };

        if size == 0 {
            return EntryState::Corrupt;
        }

        match self.read_metadata(id).await {
            Some(meta) if size < meta.size => EntryState::Corrupt,
            _ => EntryState::Cached,
        }
    }

    /// Read the first payload file of the leaf directory.
    pub async fn read_first(&self, id: &ScanId) -> io::Result<Option<(PathBuf, Bytes)>> {
        let Some(files) = self.payload_files(id).await? else {
            debug!(dir = ?self.scan_dir(id), "Cache directory not found");
            return Ok(None);
        };

        if files.len() > 1 {
            warn!(scan = %id, count = files.len(), "Multiple files in cache directory, using the first");
        }

        let Some(path) = files.into_iter().next() else {
            return Ok(None);
        };

        let data = fs::read(&path).await?;
        debug!(path = ?path, size = data.len(), "Read cached bundle");
        Ok(Some((path, Bytes::from(data))))
    }

    /// Create the leaf directory and remove a previous bundle file so that a
    /// new download starts from an empty file.
    pub async fn prepare_destination(&self, id: &ScanId) -> io::Result<PathBuf> {
        let path = self.bundle_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => debug!(path = ?path, "Removed previous bundle before download"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.remove_metadata(id).await;
        fs::create_dir_all(self.scan_dir(id)).await?;
        Ok(path)
    }

    /// Remove a partially written bundle. Missing files are fine.
    pub async fn remove_partial(&self, id: &ScanId) -> io::Result<()> {
        let path = self.bundle_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = ?path, "Removed partial bundle");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Delete every payload file of an identifier plus its metadata.
    pub async fn delete(&self, id: &ScanId) -> io::Result<DeleteOutcome> {
        let dir = self.scan_dir(id);
        let Some(files) = self.payload_files(id).await? else {
            warn!(path = ?dir, "Couldn't delete cached scan: directory not found");
            return Ok(DeleteOutcome::NotFound);
        };

        if files.is_empty() {
            warn!(path = ?dir, "Couldn't delete cached scan: no files found, empty folder");
            return Ok(DeleteOutcome::EmptyDirectory);
        }

        let mut removed = 0;
        for file in &files {
            fs::remove_file(file).await?;
            removed += 1;
        }
        self.remove_metadata(id).await;

        debug!(scan = %id, count = removed, "Deleted cached scan files");
        Ok(DeleteOutcome::Deleted(removed))
    }

    /// Write metadata atomically: temp file then rename.
    pub async fn write_metadata(&self, id: &ScanId, metadata: &CacheMetadata) -> io::Result<()> {
        let meta_path = self.metadata_path(id);
        let temp_path = meta_path.with_extension("tmp");

        let json = serde_json::to_vec(metadata).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Failed to serialize metadata: {e}"),
            )
        })?;

        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::write(&temp_path, &json).await {
            warn!(path = ?temp_path, error = %e, "Failed to write cache metadata file");
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &meta_path).await {
            warn!(from = ?temp_path, to = ?meta_path, error = %e, "Failed to rename metadata file");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }

    /// Metadata for an identifier. Unreadable sidecars are treated as absent.
    pub async fn read_metadata(&self, id: &ScanId) -> Option<CacheMetadata> {
        let path = self.metadata_path(id);
        let bytes = fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to parse cache metadata");
                None
            }
        }
    }

    async fn remove_metadata(&self, id: &ScanId) {
        let path = self.metadata_path(id);
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = ?path, error = %e, "Failed to remove cache metadata file");
            }
        }
    }

    /// Every identifier with a payload on disk, sorted.
    pub async fn list_cached(&self) -> io::Result<Vec<ScanId>> {
        let mut cached = Vec::new();

        for (site_id, site_dir) in numbered_dirs(&self.root).await? {
            for (slab_id, slab_dir) in numbered_dirs(&site_dir).await? {
                for (scan_id, _) in numbered_dirs(&slab_dir).await? {
                    let id = ScanId::new(site_id, slab_id, scan_id);
                    if self.has_payload(&id).await {
                        cached.push(id);
                    }
                }
            }
        }

        cached.sort();
        Ok(cached)
    }
}

/// Sub-directories of `dir` whose names parse as integers.
async fn numbered_dirs(dir: &Path) -> io::Result<Vec<(i64, PathBuf)>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(n) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i64>().ok())
        {
            dirs.push((n, entry.path()));
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> DiskStore {
        DiskStore::new(dir.path().join("Cached Data"), "scan.assetbundle")
    }

    async fn put(store: &DiskStore, id: &ScanId, data: &[u8]) -> PathBuf {
        let path = store.prepare_destination(id).await.unwrap();
        fs::write(&path, data).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_layout_is_site_slab_scan() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let path = store.bundle_path(&ScanId::new(1, 2, 3));
        assert_eq!(
            path,
            dir.path()
                .join("Cached Data")
                .join("1")
                .join("2")
                .join("3")
                .join("scan.assetbundle")
        );
    }

    #[tokio::test]
    async fn test_empty_directory_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let id = ScanId::new(1, 2, 3);

        assert!(!store.has_payload(&id).await);
        fs::create_dir_all(store.scan_dir(&id)).await.unwrap();
        assert!(!store.has_payload(&id).await);
        assert_eq!(store.entry_state(&id).await, EntryState::Absent);

        put(&store, &id, b"bundle").await;
        assert!(store.has_payload(&id).await);
        assert!(store.has_payload(&id).await);
        assert_eq!(store.entry_state(&id).await, EntryState::Cached);
    }

    #[tokio::test]
    async fn test_read_first_uses_sorted_first_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let id = ScanId::new(1, 1, 1);
        let leaf = store.scan_dir(&id);
        fs::create_dir_all(&leaf).await.unwrap();
        fs::write(leaf.join("b.bundle"), b"second").await.unwrap();
        fs::write(leaf.join("a.bundle"), b"first").await.unwrap();

        let (path, data) = store.read_first(&id).await.unwrap().unwrap();
        assert_eq!(path, leaf.join("a.bundle"));
        assert_eq!(&data[..], b"first");

        assert!(store.read_first(&ScanId::new(9, 9, 9)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entry_state_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let empty = ScanId::new(1, 2, 3);
        put(&store, &empty, b"").await;
        assert_eq!(store.entry_state(&empty).await, EntryState::Corrupt);
        // Presence-only check still reports the empty file as cached
        assert!(store.has_payload(&empty).await);

        let truncated = ScanId::new(1, 2, 4);
        put(&store, &truncated, b"1234").await;
        store
            .write_metadata(&truncated, &CacheMetadata::new("http://example.com/b", 10))
            .await
            .unwrap();
        assert_eq!(store.entry_state(&truncated).await, EntryState::Corrupt);

        let complete = ScanId::new(1, 2, 5);
        put(&store, &complete, b"1234").await;
        store
            .write_metadata(&complete, &CacheMetadata::new("http://example.com/c", 4))
            .await
            .unwrap();
        assert_eq!(store.entry_state(&complete).await, EntryState::Cached);
        assert_eq!(store.read_metadata(&complete).await.unwrap().size, 4);
    }

    #[tokio::test]
    async fn test_delete_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let id = ScanId::new(4, 5, 6);

        assert_eq!(store.delete(&id).await.unwrap(), DeleteOutcome::NotFound);

        fs::create_dir_all(store.scan_dir(&id)).await.unwrap();
        assert_eq!(store.delete(&id).await.unwrap(), DeleteOutcome::EmptyDirectory);

        put(&store, &id, b"bundle").await;
        store
            .write_metadata(&id, &CacheMetadata::new("http://example.com/x", 6))
            .await
            .unwrap();
        let outcome = store.delete(&id).await.unwrap();
        assert_eq!(outcome, DeleteOutcome::Deleted(1));
        assert!(outcome.removed_anything());
        assert!(!store.has_payload(&id).await);
        assert!(store.read_metadata(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_prepare_destination_resets_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let id = ScanId::new(1, 2, 3);

        put(&store, &id, b"old bundle").await;
        let path = store.prepare_destination(&id).await.unwrap();
        assert!(!fs::try_exists(&path).await.unwrap());
        assert!(fs::try_exists(store.scan_dir(&id)).await.unwrap());

        store.remove_partial(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_cached_skips_foreign_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        put(&store, &ScanId::new(2, 1, 7), b"x").await;
        put(&store, &ScanId::new(1, 2, 3), b"y").await;
        fs::create_dir_all(store.scan_dir(&ScanId::new(1, 2, 4))).await.unwrap();
        fs::create_dir_all(store.root().join("notes")).await.unwrap();
        store
            .write_metadata(&ScanId::new(1, 2, 3), &CacheMetadata::new("u", 1))
            .await
            .unwrap();

        let cached = store.list_cached().await.unwrap();
        assert_eq!(cached, vec![ScanId::new(1, 2, 3), ScanId::new(2, 1, 7)]);
    }

    #[tokio::test]
    async fn test_list_cached_on_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path().join("nowhere"), "scan.assetbundle");
        assert!(store.list_cached().await.unwrap().is_empty());
    }
}
