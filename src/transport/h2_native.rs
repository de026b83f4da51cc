//! Native HTTP/2 transport using h2 crate directly.
//!
//! hyper's HTTP/2 client refuses server push and hides SETTINGS, so this
//! transport drives `h2` itself: SETTINGS come from [`Http2Settings`], push is
//! enabled and every promise is handed to the [`PushDrainHandler`].
//!
//! One connection is kept per authority and shared by all requests
//! (multiplexing). Connections come from the [`Connect`] hook, which for a
//! negotiated transport returns the stream handshaken during negotiation.
//! Each authority has its own slot, so opening a connection to one host never
//! waits on another.

use bytes::Bytes;
use h2::client::{Builder, SendRequest};
use http::Request;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::fingerprint::http2::Http2Settings;
use crate::response::Response;
use crate::transport::dial::{authority_addr, Connect};
use crate::transport::push::PushDrainHandler;
use crate::version::HttpVersion;

/// A live connection and the id that tells it apart from its successors.
struct Connection {
    id: u64,
    sender: SendRequest<Bytes>,
}

/// Connection for one authority. Held while that authority dials.
type Slot = Arc<tokio::sync::Mutex<Option<Connection>>>;

/// HTTP/2 transport with push draining.
pub struct H2Transport {
    connector: Arc<dyn Connect>,
    settings: Http2Settings,
    push_handler: Arc<PushDrainHandler>,
    /// Slots by dial address
    slots: Mutex<HashMap<String, Slot>>,
    next_id: AtomicU64,
}

impl H2Transport {
    pub fn new(
        connector: Arc<dyn Connect>,
        settings: Http2Settings,
        push_handler: Arc<PushDrainHandler>,
    ) -> Self {
        Self {
            connector,
            settings,
            push_handler,
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// SETTINGS announced on new connections.
    pub fn settings(&self) -> &Http2Settings {
        &self.settings
    }

    /// Send `request` and buffer the whole response.
    ///
    /// Push promises attached to the request are drained in the background
    /// and never surface here.
    pub async fn round_trip(&self, request: Request<Bytes>) -> Result<Response> {
        let addr = authority_addr(request.uri())
            .ok_or_else(|| Error::http_protocol("Request URI has no host"))?;
        let mut sender = self.ready_sender(&addr).await?;

        let (parts, body) = request.into_parts();
        let url = parts.uri.clone();
        let original_headers = parts.headers.clone();
        let has_body = !body.is_empty();
        let head = Request::from_parts(parts, ());

        let (mut response_future, mut send_stream) = sender
            .send_request(head, !has_body)
            .map_err(|e| Error::http_protocol(format!("Failed to send HTTP/2 request: {}", e)))?;

        let pushes = response_future.push_promises();
        let handler = Arc::clone(&self.push_handler);
        tokio::spawn(handler.drain(pushes, url.clone(), original_headers));

        if has_body {
            send_stream
                .send_data(body, true)
                .map_err(|e| Error::http_protocol(format!("Failed to send request body: {}", e)))?;
        }

        let response = response_future
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/2 response error: {}", e)))?;

        let (parts, mut body) = response.into_parts();
        let mut body_bytes = Vec::new();
        while let Some(chunk) = body.data().await {
            let chunk = chunk
                .map_err(|e| Error::http_protocol(format!("Failed to read response body: {}", e)))?;
            body_bytes.extend_from_slice(&chunk);
            let _ = body.flow_control().release_capacity(chunk.len());
        }

        Ok(
            Response::from_parts(parts.status, &parts.headers, Bytes::from(body_bytes), HttpVersion::Http2)
                .with_url(url.to_string()),
        )
    }

    fn slot(&self, addr: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(addr.to_string()).or_default())
    }

    /// A sender with stream capacity on the connection for `addr`, dialing if needed.
    ///
    /// Only the slot for `addr` is locked while dialing, and no lock is held
    /// while waiting for stream capacity.
    async fn ready_sender(&self, addr: &str) -> Result<SendRequest<Bytes>> {
        let slot = self.slot(addr);

        let cached = slot
            .lock()
            .await
            .as_ref()
            .map(|conn| (conn.id, conn.sender.clone()));
        if let Some((id, sender)) = cached {
            match sender.ready().await {
                Ok(sender) => return Ok(sender),
                Err(e) => {
                    tracing::debug!(addr, "HTTP/2 connection unusable, redialing: {}", e);
                    let mut current = slot.lock().await;
                    if current.as_ref().is_some_and(|conn| conn.id == id) {
                        *current = None;
                    }
                }
            }
        }

        let mut current = slot.lock().await;
        let sender = match current.as_ref() {
            // Opened by a concurrent request while this one waited
            Some(conn) => conn.sender.clone(),
            None => {
                let sender = self.open(addr).await?;
                *current = Some(Connection {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    sender: sender.clone(),
                });
                sender
            }
        };
        drop(current);

        sender
            .ready()
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/2 not ready: {}", e)))
    }

    async fn open(&self, addr: &str) -> Result<SendRequest<Bytes>> {
        let io = self.connector.connect(addr).await?;

        let mut builder = Builder::new();
        builder
            .header_table_size(self.settings.header_table_size)
            .initial_window_size(self.settings.initial_window_size)
            .initial_connection_window_size(self.settings.initial_connection_window_size)
            .max_concurrent_streams(self.settings.max_concurrent_streams)
            .max_frame_size(self.settings.max_frame_size)
            .max_header_list_size(self.settings.max_header_list_size)
            .enable_push(true);

        let (sender, connection) = builder
            .handshake::<_, Bytes>(io)
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/2 handshake failed: {}", e)))?;

        // No I/O happens unless the connection future is polled
        let addr = addr.to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(addr, "HTTP/2 connection error: {}", e);
            }
        });

        Ok(sender)
    }
}
