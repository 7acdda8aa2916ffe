//! # Streamed Downloader
//!
//! Writes a bundle transfer to disk fragment by fragment so that payloads
//! of hundreds of megabytes never sit in memory as a whole. The file
//! handle is held for the whole session, and every transport read races
//! against the session's cancellation token.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use futures::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::events::DownloadProgress;
use crate::identifier::ScanId;
use crate::source::BundleSource;
use crate::ScanCacheError;

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

pub struct StreamDownloader {
    source: Arc<dyn BundleSource>,
    fragment_size: usize,
}

impl StreamDownloader {
    pub fn new(source: Arc<dyn BundleSource>, fragment_size: usize) -> Self {
        Self {
            source,
            fragment_size: fragment_size.max(1),
        }
    }

    /// Stream `url` into `destination`, truncating any existing file.
    ///
    /// `on_progress` runs after every fragment written, in write order, with
    /// cumulative byte counts. Returns [`ScanCacheError::Cancelled`] once
    /// `cancel` fires; the partially written file is left for the caller to
    /// remove.
    #[instrument(skip(self, cancel, on_progress), fields(scan = %id), level = "debug")]
    pub async fn download<F>(
        &self,
        id: &ScanId,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<DownloadSummary, ScanCacheError>
    where
        F: FnMut(DownloadProgress) + Send,
    {
        let started = Instant::now();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScanCacheError::Cancelled),
            opened = self.source.open(url) => opened?,
        };

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(destination)
            .await?;

        info!(url = %url, path = ?destination, "Downloading scan bundle");

        let mut writer = FragmentWriter {
            file,
            pending: BytesMut::with_capacity(self.fragment_size),
            fragment_size: self.fragment_size,
            progress: DownloadProgress {
                bytes_downloaded: 0,
                total_bytes: opened.content_length,
            },
        };

        let mut body = opened.body;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanCacheError::Cancelled),
                next = body.next() => next,
            };

            match next {
                Some(chunk) => {
                    writer.push(&chunk?, &mut on_progress).await?;
                }
                None => break,
            }
        }

        let bytes_written = writer.finish(&mut on_progress).await?;

        if let Some(expected) = opened.content_length {
            if bytes_written < expected {
                return Err(ScanCacheError::Truncated {
                    expected,
                    received: bytes_written,
                });
            }
        }

        info!(
            bytes = bytes_written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Download completed successfully"
        );

        Ok(DownloadSummary {
            path: destination.to_path_buf(),
            bytes_written,
            content_length: opened.content_length,
            content_type: opened.content_type,
            etag: opened.etag,
            last_modified: opened.last_modified,
        })
    }
}

/// Regroups transport chunks into fixed-size fragments.
struct FragmentWriter {
    file: File,
    pending: BytesMut,
    fragment_size: usize,
    progress: DownloadProgress,
}

impl FragmentWriter {
    async fn push<F>(&mut self, chunk: &[u8], on_progress: &mut F) -> Result<(), ScanCacheError>
    where
        F: FnMut(DownloadProgress),
    {
        self.pending.extend_from_slice(chunk);
        while self.pending.len() >= self.fragment_size {
            let fragment = self.pending.split_to(self.fragment_size);
            self.write_fragment(&fragment, on_progress).await?;
        }
        Ok(())
    }

    async fn write_fragment<F>(
        &mut self,
        fragment: &[u8],
        on_progress: &mut F,
    ) -> Result<(), ScanCacheError>
    where
        F: FnMut(DownloadProgress),
    {
        self.file.write_all(fragment).await?;
        self.progress.bytes_downloaded += fragment.len() as u64;
        debug!(
            bytes = self.progress.bytes_downloaded,
            total = ?self.progress.total_bytes,
            "Wrote fragment"
        );
        on_progress(self.progress);
        Ok(())
    }

    /// Flush the trailing partial fragment and sync the file.
    async fn finish<F>(mut self, on_progress: &mut F) -> Result<u64, ScanCacheError>
    where
        F: FnMut(DownloadProgress),
    {
        if !self.pending.is_empty() {
            let rest = self.pending.split();
            self.write_fragment(&rest, on_progress).await?;
        }
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.progress.bytes_downloaded)
    }
}
