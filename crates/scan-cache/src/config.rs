use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

const DEFAULT_USER_AGENT: &str = concat!("scan-cache/", env!("CARGO_PKG_VERSION"));

/// Name of the cache tree below the application data root.
pub const CACHE_DIR_NAME: &str = "Cached Data";

/// File name used for newly downloaded bundles.
pub const DEFAULT_BUNDLE_FILE_NAME: &str = "scan.assetbundle";

/// Configurable options for the scan cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Application data root; the cache lives in `<root>/Cached Data`
    pub app_data_root: PathBuf,

    /// File name written for each downloaded bundle
    pub bundle_file_name: String,

    /// Size of the fragments written to disk between progress reports
    pub fragment_size: usize,

    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,

    /// Overall timeout for a download request, zero disables it
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// Whether to follow redirects
    pub follow_redirects: bool,

    /// User agent string
    pub user_agent: String,

    /// Extra HTTP headers for bundle requests
    pub headers: HeaderMap,

    /// Whether to use system proxy settings if available
    pub use_system_proxy: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            app_data_root: std::env::temp_dir().join("scan-cache"),
            bundle_file_name: DEFAULT_BUNDLE_FILE_NAME.to_owned(),
            fragment_size: 1024 * 1024, // 1 MiB
            event_capacity: 256,
            // Bundles run to hundreds of MB, so no overall deadline by default
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: CacheConfig::get_default_headers(),
            use_system_proxy: true,
        }
    }
}

impl CacheConfig {
    pub fn builder() -> crate::builder::CacheConfigBuilder {
        crate::builder::CacheConfigBuilder::new()
    }

    /// Directory holding the `<site>/<slab>/<scan>` tree.
    pub fn cache_root(&self) -> PathBuf {
        self.app_data_root.join(CACHE_DIR_NAME)
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/octet-stream, */*;q=0.8"),
        );

        // Bundles are written to disk as-is
        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("identity"),
        );

        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }
}
