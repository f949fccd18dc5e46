use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use tracing::debug;

use crate::errors::{SessionError, StreamError};

/// Incremental body of an opened stream resource.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// Opens stream resources for a consumer.
#[async_trait::async_trait]
pub trait ByteSource: Send + Sync {
    /// Opens `url`.
    ///
    /// `Ok(None)` means the resource opened but exposes no readable body.
    async fn open(&self, url: &str) -> Result<Option<ByteStream>, StreamError>;
}

/// `ByteSource` backed by HTTP GET requests.
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Creates a source whose connections time out after `connect_timeout`.
    ///
    /// No overall request timeout is set; streams may stay open indefinitely.
    pub fn new(connect_timeout: Duration) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an already configured client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ByteSource for HttpSource {
    async fn open(&self, url: &str) -> Result<Option<ByteStream>, StreamError> {
        debug!(url, "opening stream");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StreamError::open(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::open(format!("unexpected status {status}")));
        }
        let stream = response
            .bytes_stream()
            .map(|item| item.map_err(|e| StreamError::read(e.to_string())));
        Ok(Some(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn read_all(mut stream: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.expect("chunk"));
        }
        out
    }

    #[tokio::test]
    async fn http_source_streams_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("data: {\"type\":\"start\"}\n\n", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let source = HttpSource::new(Duration::from_secs(5)).expect("source");
        let stream = source
            .open(&format!("{}/events", server.uri()))
            .await
            .expect("open")
            .expect("body");
        assert_eq!(read_all(stream).await, b"data: {\"type\":\"start\"}\n\n");
    }

    #[tokio::test]
    async fn http_source_treats_error_status_as_open_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpSource::new(Duration::from_secs(5)).expect("source");
        let err = match source.open(&format!("{}/missing", server.uri())).await {
            Ok(_) => panic!("404 should fail to open"),
            Err(err) => err,
        };
        assert!(err.is_fatal());
        assert!(matches!(err, StreamError::Open { message } if message.contains("404")));
    }
}
