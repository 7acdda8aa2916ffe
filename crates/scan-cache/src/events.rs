//! Lifecycle events published by the cache manager.

use std::path::PathBuf;

use bytes::Bytes;

use crate::identifier::ScanId;

/// Where loaded content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOrigin {
    Disk,
    Network,
}

/// Bundle content ready to be instantiated by the caller.
#[derive(Debug, Clone)]
pub struct LoadedContent {
    pub id: ScanId,
    /// File the content was read from
    pub path: PathBuf,
    pub data: Bytes,
    pub origin: ContentOrigin,
}

/// Cumulative byte counts for one download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
}

impl DownloadProgress {
    /// Normalized progress in `[0, 1]`, `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_downloaded as f64 / total as f64).clamp(0.0, 1.0)),
            None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A load was requested
    LoadScans(Vec<ScanId>),
    /// Download progress for one identifier
    ScansLoading {
        id: ScanId,
        progress: DownloadProgress,
    },
    /// Content is ready for instantiation
    ScansLoaded(LoadedContent),
    ScanUnloaded(ScanId),
    /// A download completed and the bundle is now on disk
    ScanBundleCached(ScanId),
    CachedScanDeleted(ScanId),
    ScanLoadCancelled(ScanId),
    ScanLoadFailed {
        id: ScanId,
        reason: String,
    },
}

impl ScanEvent {
    /// Stable event name shared with collaborators.
    pub fn name(&self) -> &'static str {
        match self {
            ScanEvent::LoadScans(_) => "load_scans",
            ScanEvent::ScansLoading { .. } => "scans_loading",
            ScanEvent::ScansLoaded(_) => "scans_loaded",
            ScanEvent::ScanUnloaded(_) => "scan_unloaded",
            ScanEvent::ScanBundleCached(_) => "scan_bundle_cached",
            ScanEvent::CachedScanDeleted(_) => "cached_scan_deleted",
            ScanEvent::ScanLoadCancelled(_) => "scan_load_cancelled",
            ScanEvent::ScanLoadFailed { .. } => "scan_load_failed",
        }
    }

    /// Identifier the event refers to, if it refers to exactly one.
    pub fn scan_id(&self) -> Option<ScanId> {
        match self {
            ScanEvent::LoadScans(ids) if ids.len() == 1 => Some(ids[0]),
            ScanEvent::LoadScans(_) => None,
            ScanEvent::ScansLoading { id, .. } => Some(*id),
            ScanEvent::ScansLoaded(content) => Some(content.id),
            ScanEvent::ScanUnloaded(id)
            | ScanEvent::ScanBundleCached(id)
            | ScanEvent::CachedScanDeleted(id)
            | ScanEvent::ScanLoadCancelled(id) => Some(*id),
            ScanEvent::ScanLoadFailed { id, .. } => Some(*id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction() {
        let p = DownloadProgress {
            bytes_downloaded: 4096,
            total_bytes: Some(12288),
        };
        assert!((p.fraction().unwrap() - 1.0 / 3.0).abs() < 1e-9);

        let unknown = DownloadProgress {
            bytes_downloaded: 10,
            total_bytes: None,
        };
        assert_eq!(unknown.fraction(), None);

        let overrun = DownloadProgress {
            bytes_downloaded: 20,
            total_bytes: Some(10),
        };
        assert_eq!(overrun.fraction(), Some(1.0));
    }

    #[test]
    fn test_event_names() {
        let id = ScanId::new(1, 2, 3);
        assert_eq!(ScanEvent::LoadScans(vec![id]).name(), "load_scans");
        assert_eq!(ScanEvent::ScanBundleCached(id).name(), "scan_bundle_cached");
        assert_eq!(ScanEvent::CachedScanDeleted(id).name(), "cached_scan_deleted");
        assert_eq!(ScanEvent::ScanLoadCancelled(id).name(), "scan_load_cancelled");
        assert_eq!(ScanEvent::ScanUnloaded(id).scan_id(), Some(id));
        assert_eq!(ScanEvent::LoadScans(vec![id, id]).scan_id(), None);
    }
}
