//! # Bundle Sources
//!
//! The transport seam between the cache and the content server. The
//! production implementation streams a single HTTP GET through reqwest;
//! any other implementation only has to hand back an ordered stream of
//! byte chunks.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, Response, Url};
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, info, instrument};

use crate::{CacheConfig, ScanCacheError};

/// An opened bundle transfer.
pub struct BundleStream {
    /// Announced body length, if the server sent one
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Body chunks in transport order
    pub body: BoxStream<'static, Result<Bytes, ScanCacheError>>,
}

impl std::fmt::Debug for BundleStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleStream")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("etag", &self.etag)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

/// Opens streamed transfers for bundle URLs.
#[async_trait]
pub trait BundleSource: Send + Sync {
    /// Start fetching `url`. Resolves once the response head is available.
    async fn open(&self, url: &str) -> Result<BundleStream, ScanCacheError>;
}

/// Create a reqwest Client with the provided configuration
pub fn create_client(config: &CacheConfig) -> Result<Client, ScanCacheError> {
    let provider = Arc::new(aws_lc_rs::default_provider());

    // Build platform default TLS configuration
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ScanCacheError::Tls(e.to_string()))?
        .with_platform_verifier()
        .map_err(|e| ScanCacheError::Tls(e.to_string()))?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(2)
        .user_agent(&config.user_agent)
        .default_headers(config.headers.clone())
        .use_preconfigured_tls(tls_config)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if config.use_system_proxy {
        // reqwest picks up system proxy settings unless told otherwise
        debug!("Using system proxy settings for bundle downloads");
    } else {
        client_builder = client_builder.no_proxy();
        debug!("Proxy disabled for bundle downloads");
    }

    client_builder.build().map_err(ScanCacheError::from)
}

fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Streams bundles over HTTP with reqwest.
#[derive(Debug, Clone)]
pub struct HttpBundleSource {
    client: Client,
}

impl HttpBundleSource {
    pub fn new(config: &CacheConfig) -> Result<Self, ScanCacheError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BundleSource for HttpBundleSource {
    #[instrument(skip(self), level = "debug")]
    async fn open(&self, url: &str) -> Result<BundleStream, ScanCacheError> {
        let url = url
            .parse::<Url>()
            .map_err(|e| ScanCacheError::Url(format!("{url}: {e}")))?;

        info!(url = %url, "Starting bundle request");
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(ScanCacheError::Status(response.status()));
        }

        let content_length = response.content_length();
        match content_length {
            Some(len) => debug!(url = %url, size = len, "Bundle size announced"),
            None => debug!(url = %url, "Content length not available"),
        }

        let content_type = header_string(&response, reqwest::header::CONTENT_TYPE);
        let etag = header_string(&response, reqwest::header::ETAG);
        let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ScanCacheError::from))
            .boxed();

        Ok(BundleStream {
            content_length,
            content_type,
            etag,
            last_modified,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    //! Minimal HTTP/1.1 server for exercising the reqwest source.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub struct StubServer {
        pub base_url: String,
        pub requests: Arc<AtomicUsize>,
    }

    impl StubServer {
        pub fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    /// Serve `fragments` with the given status and a `Content-Length` equal to
    /// their sum, pausing between fragments.
    pub async fn spawn(status: u16, fragments: Vec<Vec<u8>>, pause: Duration) -> StubServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let fragments = fragments.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);

                    let total: usize = fragments.iter().map(|f| f.len()).sum();
                    let response_head = format!(
                        "HTTP/1.1 {status} Stub\r\nContent-Length: {total}\r\nContent-Type: application/octet-stream\r\nETag: \"stub\"\r\nConnection: close\r\n\r\n"
                    );
                    if socket.write_all(response_head.as_bytes()).await.is_err() {
                        return;
                    }
                    for fragment in fragments {
                        if socket.write_all(&fragment).await.is_err() {
                            return;
                        }
                        let _ = socket.flush().await;
                        tokio::time::sleep(pause).await;
                    }
                    let _ = socket.shutdown().await;
                });
            }
        });

        StubServer {
            base_url: format!("http://{addr}"),
            requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn source() -> HttpBundleSource {
        let config = CacheConfig::builder().with_system_proxy(false).build();
        HttpBundleSource::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_open_streams_body_and_headers() {
        let server = test_server::spawn(
            200,
            vec![vec![1u8; 1000], vec![2u8; 500]],
            Duration::from_millis(10),
        )
        .await;

        let stream = source()
            .open(&format!("{}/bundle.bin", server.base_url))
            .await
            .unwrap();
        assert_eq!(stream.content_length, Some(1500));
        assert_eq!(stream.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(stream.etag.as_deref(), Some("\"stub\""));

        let chunks: Vec<Bytes> = stream
            .body
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        let body: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(body.len(), 1500);
        assert!(body[..1000].iter().all(|b| *b == 1));
        assert!(body[1000..].iter().all(|b| *b == 2));
        assert_eq!(server.request_count(), 1);
    }

    #[tokio::test]
    async fn test_open_rejects_error_status() {
        let server = test_server::spawn(404, vec![b"missing".to_vec()], Duration::ZERO).await;

        let err = source()
            .open(&format!("{}/bundle.bin", server.base_url))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanCacheError::Status(s) if s.as_u16() == 404));
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_url() {
        let err = source().open("not a url").await.unwrap_err();
        assert!(matches!(err, ScanCacheError::Url(_)));
    }

    #[tokio::test]
    async fn test_with_client_shares_configured_client() {
        let server = test_server::spawn(200, vec![b"shared".to_vec()], Duration::ZERO).await;
        let config = CacheConfig::builder().with_system_proxy(false).build();
        let client = create_client(&config).unwrap();
        let first = HttpBundleSource::with_client(client.clone());
        let second = HttpBundleSource::with_client(client);

        for source in [first, second] {
            let stream = source
                .open(&format!("{}/bundle.bin", server.base_url))
                .await
                .unwrap();
            assert_eq!(stream.content_length, Some(6));
        }
        assert_eq!(server.request_count(), 2);
    }
}
