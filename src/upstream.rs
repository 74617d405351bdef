use crate::config::UpstreamConfig;
use crate::io_struct::{AggregatedResponse, UpstreamRequest};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub const API_KEY_HEADER: &str = "api-key";
pub const EVENT_STREAM: &str = "text/event-stream";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("status code: {code}, body: {body}")]
    Status { code: u16, body: String },

    #[error("failed to decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("upstream response contained no choices")]
    EmptyChoices,
}

impl UpstreamError {
    /// Raw provider body for status errors.
    pub fn body(&self) -> Option<&str> {
        match self {
            UpstreamError::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        UpstreamError::Transport(Box::new(e))
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

/// Live body of a streaming upstream call. Owned by exactly one request;
/// dropping it (or calling [`UpstreamStream::close`]) releases the connection.
pub struct UpstreamStream {
    body: ByteStream,
}

impl UpstreamStream {
    pub fn new<S>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, UpstreamError>> + Send + 'static,
    {
        Self {
            body: Box::pin(body),
        }
    }

    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, UpstreamError>> {
        self.body.next().await
    }

    pub fn close(self) {
        log::debug!("Releasing upstream stream");
    }
}

impl std::fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStream").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    config: Arc<UpstreamConfig>,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    fn post(&self, req: &UpstreamRequest) -> reqwest::RequestBuilder {
        self.client
            .post(self.config.chat_completions_url())
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(req)
    }

    /// Sends `req` with streaming disabled and decodes the full body.
    pub async fn request_aggregated(
        &self,
        req: UpstreamRequest,
    ) -> Result<AggregatedResponse, UpstreamError> {
        let req = req.with_stream(false);
        log::debug!(
            "Sending aggregated request for model {} ({} messages)",
            req.model,
            req.messages.len()
        );
        let resp = self.post(&req).send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                code: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Sends `req` with streaming enabled and hands back the unread body.
    pub async fn request_streaming(
        &self,
        req: UpstreamRequest,
    ) -> Result<UpstreamStream, UpstreamError> {
        let req = req.with_stream(true);
        log::debug!(
            "Sending streaming request for model {} ({} messages)",
            req.model,
            req.messages.len()
        );
        let resp = self.post(&req).header(ACCEPT, EVENT_STREAM).send().await?;
        let status = resp.status();
        if !status.is_success() {
            // Reading the body to the end also releases the connection.
            let body = match resp.text().await {
                Ok(body) => body,
                Err(e) => {
                    log::warn!("Failed to read upstream error body: {}", e);
                    String::new()
                }
            };
            return Err(UpstreamError::Status {
                code: status.as_u16(),
                body,
            });
        }
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(UpstreamError::from));
        Ok(UpstreamStream::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_status_error_keeps_body() {
        let err = UpstreamError::Status {
            code: 500,
            body: "rate limited".to_string(),
        };
        assert_eq!(err.body(), Some("rate limited"));
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(err.to_string(), "status code: 500, body: rate limited");
        assert_eq!(UpstreamError::EmptyChoices.body(), None);
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_in_order() {
        let mut upstream = UpstreamStream::new(stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
        ]));
        assert_eq!(upstream.next_chunk().await.unwrap().unwrap(), "a");
        assert_eq!(upstream.next_chunk().await.unwrap().unwrap(), "b");
        assert!(upstream.next_chunk().await.is_none());
        upstream.close();
    }
}
