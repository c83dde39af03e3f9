//! Attachment transfer over HTTP
//!
//! A fetch reports start, progress and a finish outcome through a
//! `ProgressSink`. Cancellation resolves as `FetchError::Cancelled`, never as a
//! transport failure.

use async_trait::async_trait;
use elect_common::events::DownloadOutcome;
use elect_common::{EventBus, ImportEvent};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::FetchError;

const USER_AGENT: &str = concat!("elect-loader/", env!("CARGO_PKG_VERSION"));

/// Upper bound on the buffer reserved from an announced Content-Length
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Receiver of transfer progress
pub trait ProgressSink: Send + Sync {
    /// Called before any bytes move
    fn on_start(&self, uri: &str);

    /// `total` is None when the server did not announce a length
    fn on_progress(&self, uri: &str, received: u64, total: Option<u64>);

    fn on_finish(&self, uri: &str, outcome: DownloadOutcome);
}

/// Sink that discards everything
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_start(&self, _uri: &str) {}
    fn on_progress(&self, _uri: &str, _received: u64, _total: Option<u64>) {}
    fn on_finish(&self, _uri: &str, _outcome: DownloadOutcome) {}
}

/// Sink broadcasting download events on the event bus
pub struct EventProgressSink {
    session_id: Option<Uuid>,
    event_bus: EventBus,
}

impl EventProgressSink {
    pub fn new(session_id: Option<Uuid>, event_bus: EventBus) -> Self {
        Self {
            session_id,
            event_bus,
        }
    }
}

impl ProgressSink for EventProgressSink {
    fn on_start(&self, uri: &str) {
        tracing::debug!(uri, "Download started");
        self.event_bus.emit_lossy(ImportEvent::DownloadStarted {
            session_id: self.session_id,
            uri: uri.to_string(),
        });
    }

    fn on_progress(&self, uri: &str, received: u64, total: Option<u64>) {
        self.event_bus.emit_lossy(ImportEvent::DownloadProgress {
            session_id: self.session_id,
            uri: uri.to_string(),
            received,
            total,
        });
    }

    fn on_finish(&self, uri: &str, outcome: DownloadOutcome) {
        tracing::debug!(uri, outcome = ?outcome, "Download finished");
        self.event_bus.emit_lossy(ImportEvent::DownloadFinished {
            session_id: self.session_id,
            uri: uri.to_string(),
            outcome,
        });
    }
}

/// Fetches the bytes behind a URI
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(
        &self,
        uri: &str,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError>;
}

/// reqwest-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self { client })
    }

    async fn download(
        &self,
        uri: &str,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let mut response = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            response = self.client.get(uri).send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let total = response.content_length();
        let mut body = Vec::with_capacity(total.unwrap_or(0).min(MAX_PREALLOCATION) as usize);

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                chunk = response.chunk() => chunk?,
            };

            match chunk {
                Some(bytes) => {
                    body.extend_from_slice(&bytes);
                    sink.on_progress(uri, body.len() as u64, total);
                }
                None => break,
            }
        }

        Ok(body)
    }
}

#[async_trait]
impl AttachmentFetcher for HttpFetcher {
    async fn fetch(
        &self,
        uri: &str,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, FetchError> {
        sink.on_start(uri);

        let result = self.download(uri, sink, cancel).await;

        let outcome = match &result {
            Ok(_) => DownloadOutcome::Succeeded,
            Err(FetchError::Cancelled) => DownloadOutcome::Cancelled,
            Err(_) => DownloadOutcome::Failed,
        };
        sink.on_finish(uri, outcome);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl ProgressSink for Recorder {
        fn on_start(&self, _uri: &str) {
            self.calls.lock().unwrap().push("start".into());
        }
        fn on_progress(&self, _uri: &str, received: u64, _total: Option<u64>) {
            self.calls.lock().unwrap().push(format!("progress {}", received));
        }
        fn on_finish(&self, _uri: &str, outcome: DownloadOutcome) {
            self.calls.lock().unwrap().push(format!("finish {:?}", outcome));
        }
    }

    #[tokio::test]
    async fn test_pre_cancelled_fetch_reports_cancelled() {
        let fetcher = HttpFetcher::new().unwrap();
        let sink = Recorder::default();
        let token = CancellationToken::new();
        token.cancel();

        let result = fetcher.fetch("http://127.0.0.1:9/never", &sink, &token).await;

        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert_eq!(
            *sink.calls.lock().unwrap(),
            vec!["start".to_string(), "finish Cancelled".to_string()]
        );
    }
}
