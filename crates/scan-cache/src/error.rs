use std::sync::Arc;

use reqwest::StatusCode;

/// Errors produced while resolving, downloading or evicting scan content.
///
/// The enum is `Clone` so a single download result can be handed to every
/// caller joined on the same session; non-clonable sources are wrapped in
/// `Arc`.
#[derive(Debug, thiserror::Error, Clone)]
pub enum ScanCacheError {
    #[error("Network error: {source}")]
    Network {
        #[from]
        source: Arc<reqwest::Error>,
    },

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("Server returned status code {0}")]
    Status(StatusCode),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },

    #[error("Stream ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    #[error("Cache metadata error: {0}")]
    Metadata(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Download cancelled")]
    Cancelled,
}

impl ScanCacheError {
    /// Transport-level failure: unreachable host, timeout, bad status or a
    /// short body.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ScanCacheError::Network { .. }
                | ScanCacheError::Url(_)
                | ScanCacheError::Status(_)
                | ScanCacheError::Truncated { .. }
                | ScanCacheError::Tls(_)
        )
    }

    /// Local filesystem failure.
    pub fn is_filesystem(&self) -> bool {
        matches!(
            self,
            ScanCacheError::Io { .. } | ScanCacheError::Metadata(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanCacheError::Cancelled)
    }
}

// Manual conversions because of the Arc wrapping.
impl From<reqwest::Error> for ScanCacheError {
    fn from(err: reqwest::Error) -> Self {
        ScanCacheError::Network {
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for ScanCacheError {
    fn from(err: std::io::Error) -> Self {
        ScanCacheError::Io {
            source: Arc::new(err),
        }
    }
}

impl From<serde_json::Error> for ScanCacheError {
    fn from(err: serde_json::Error) -> Self {
        ScanCacheError::Metadata(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        let io: ScanCacheError = std::io::Error::other("disk full").into();
        assert!(io.is_filesystem());
        assert!(!io.is_network());

        let status = ScanCacheError::Status(StatusCode::NOT_FOUND);
        assert!(status.is_network());
        assert!(!status.is_cancelled());

        assert!(ScanCacheError::Cancelled.is_cancelled());
        assert!(!ScanCacheError::Cancelled.is_network());
        assert!(!ScanCacheError::Cancelled.is_filesystem());
    }

    #[test]
    fn test_cloned_error_keeps_message() {
        let err: ScanCacheError = std::io::Error::other("locked").into();
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert!(cloned.to_string().contains("locked"));
    }
}
