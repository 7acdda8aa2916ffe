//! # Scan Cache
//!
//! Local cache and streamed downloader for slab scan content bundles.
//!
//! Content is addressed by a `(site, slab, scan)` identifier and stored as
//! `<app-data-root>/Cached Data/<site>/<slab>/<scan>/<bundle-file>`.
//!
//! ## Features
//!
//! - Cache-first resolution with no network I/O on a hit
//! - Streamed download to disk with per-fragment progress
//! - At most one transfer per identifier; concurrent requests join it
//! - Cancellation that removes partially written bundles
//! - Explicit eviction and lifecycle events over a broadcast channel

pub mod builder;
pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod identifier;
pub mod manager;
pub mod source;
pub mod store;

pub use builder::CacheConfigBuilder;
pub use config::CacheConfig;
pub use error::ScanCacheError;
pub use events::{ContentOrigin, DownloadProgress, LoadedContent, ScanEvent};
pub use identifier::{ScanDescriptor, ScanId};
pub use manager::ScanCacheManager;
pub use source::{BundleSource, BundleStream, HttpBundleSource, create_client};
pub use store::{CacheMetadata, DeleteOutcome, DiskStore, EntryState};
