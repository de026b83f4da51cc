//! HTTP/2 server push draining.
//!
//! Pushed resources are never requested by callers. Left unread they would
//! hold connection-level flow-control window and buffer state, so every
//! promise is read to the end and discarded.

use h2::client::{PushPromise, PushPromises};
use http::{HeaderMap, Request, Uri};
use tokio::sync::watch;

/// Counters describing drained pushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushStats {
    /// Push promises received.
    pub received: u64,
    /// Pushed responses read to completion.
    pub drained: u64,
    /// Pushed responses that failed before completion.
    pub failed: u64,
    /// Body bytes discarded across all drained pushes.
    pub bytes_discarded: u64,
}

/// A pushed exchange once draining has finished.
#[derive(Debug)]
pub(crate) struct PushRecord {
    pub promise: Request<()>,
    /// URL of the request the push was attached to.
    pub original_url: Uri,
    pub original_headers: HeaderMap,
    /// Body bytes discarded, or the error that stopped the read.
    pub outcome: Result<u64, h2::Error>,
}

/// Consumes server pushes for the HTTP/2 transport.
#[derive(Debug)]
pub struct PushDrainHandler {
    stats: watch::Sender<PushStats>,
}

impl Default for PushDrainHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl PushDrainHandler {
    pub fn new() -> Self {
        let (stats, _) = watch::channel(PushStats::default());
        Self { stats }
    }

    /// Current counters.
    pub fn stats(&self) -> PushStats {
        *self.stats.borrow()
    }

    /// Receiver notified each time a push is received or finishes draining.
    pub fn subscribe(&self) -> watch::Receiver<PushStats> {
        self.stats.subscribe()
    }

    /// Drain every push promise attached to one request.
    ///
    /// Runs until the parent stream can no longer carry promises. Each pushed
    /// response is drained on its own task so one slow push cannot hold back
    /// the others.
    pub async fn drain(
        self: std::sync::Arc<Self>,
        mut pushes: PushPromises,
        original_url: Uri,
        original_headers: HeaderMap,
    ) {
        while let Some(next) = pushes.push_promise().await {
            match next {
                Ok(promise) => {
                    self.stats.send_modify(|s| s.received += 1);
                    let handler = std::sync::Arc::clone(&self);
                    let url = original_url.clone();
                    let headers = original_headers.clone();
                    tokio::spawn(async move {
                        handler.handle_push(promise, url, headers).await;
                    });
                }
                Err(e) => {
                    tracing::debug!(url = %original_url, "push promise stream ended: {}", e);
                    break;
                }
            }
        }
    }

    /// Read one pushed response to completion and discard it.
    pub async fn handle_push(&self, push: PushPromise, original_url: Uri, original_headers: HeaderMap) {
        let (promise, response) = push.into_parts();
        let outcome = match response.await {
            Ok(response) => discard_body(response.into_body()).await,
            Err(e) => Err(e),
        };
        self.record(PushRecord {
            promise,
            original_url,
            original_headers,
            outcome,
        });
    }

    /// Log a finished push and fold it into the counters.
    pub(crate) fn record(&self, record: PushRecord) {
        match record.outcome {
            Ok(bytes) => {
                tracing::debug!(
                    pushed = %record.promise.uri(),
                    original = %record.original_url,
                    original_headers = record.original_headers.len(),
                    bytes,
                    "drained server push"
                );
                self.stats.send_modify(|s| {
                    s.drained += 1;
                    s.bytes_discarded += bytes;
                });
            }
            Err(e) => {
                tracing::debug!(
                    pushed = %record.promise.uri(),
                    original = %record.original_url,
                    "server push failed: {}",
                    e
                );
                self.stats.send_modify(|s| s.failed += 1);
            }
        }
    }
}

/// Read `body` to the end, releasing flow-control capacity for every chunk.
async fn discard_body(mut body: h2::RecvStream) -> Result<u64, h2::Error> {
    let mut total = 0u64;
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        total += chunk.len() as u64;
        let _ = body.flow_control().release_capacity(chunk.len());
    }
    Ok(total)
}
