//! # Builder for CacheConfig
//!
//! Fluent construction of [`CacheConfig`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use scan_cache::CacheConfig;
//!
//! let config = CacheConfig::builder()
//!     .with_app_data_root("/tmp/slab-viewer")
//!     .with_fragment_size(256 * 1024)
//!     .with_connect_timeout(Duration::from_secs(15))
//!     .with_user_agent("SlabViewer/2.1")
//!     .build();
//!
//! assert!(config.cache_root().ends_with("Cached Data"));
//! ```

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::CacheConfig;

/// Builder for creating CacheConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }

    /// Set the application data root that holds the `Cached Data` tree
    pub fn with_app_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.app_data_root = root.into();
        self
    }

    /// Set the file name used for downloaded bundles
    pub fn with_bundle_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.bundle_file_name = name.into();
        self
    }

    /// Set the fragment size; values below one byte are raised to one
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.config.fragment_size = size.max(1);
        self
    }

    /// Set the lifecycle event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    /// Set the overall timeout for a download request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set whether to follow redirects
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.config.follow_redirects = follow;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a custom HTTP header, invalid names or values are ignored
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Merge headers into the defaults, later values win
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in headers.iter() {
            self.config.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Set whether to use system proxy settings
    pub fn with_system_proxy(mut self, use_system_proxy: bool) -> Self {
        self.config.use_system_proxy = use_system_proxy;
        self
    }

    /// Build the CacheConfig instance
    pub fn build(self) -> CacheConfig {
        self.config
    }
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = CacheConfigBuilder::new().build();
        assert_eq!(config.fragment_size, 1024 * 1024);
        assert_eq!(config.bundle_file_name, "scan.assetbundle");
        assert_eq!(config.timeout, Duration::ZERO);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.follow_redirects);
        assert!(config.use_system_proxy);
        assert!(config.headers.contains_key(reqwest::header::ACCEPT));
    }

    #[test]
    fn test_builder_customization() {
        let config = CacheConfigBuilder::new()
            .with_app_data_root("/data/app")
            .with_bundle_file_name("bundle.bin")
            .with_fragment_size(4096)
            .with_read_timeout(Duration::from_secs(5))
            .with_follow_redirects(false)
            .with_user_agent("SlabViewer/1.0")
            .with_header("X-Device", "tablet-7")
            .with_system_proxy(false)
            .build();

        assert_eq!(config.cache_root(), PathBuf::from("/data/app").join("Cached Data"));
        assert_eq!(config.bundle_file_name, "bundle.bin");
        assert_eq!(config.fragment_size, 4096);
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert!(!config.follow_redirects);
        assert_eq!(config.user_agent, "SlabViewer/1.0");
        assert!(!config.use_system_proxy);

        let header_value = config.headers.get("X-Device").unwrap();
        assert_eq!(header_value.to_str().unwrap(), "tablet-7");
    }

    #[test]
    fn test_invalid_values_are_clamped_or_ignored() {
        let config = CacheConfigBuilder::new()
            .with_fragment_size(0)
            .with_event_capacity(0)
            .with_header("bad header", "value")
            .build();

        assert_eq!(config.fragment_size, 1);
        assert_eq!(config.event_capacity, 1);
        assert!(!config.headers.contains_key("bad header"));
    }
}
