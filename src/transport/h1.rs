//! HTTP/1.1 transport via hyper.
//!
//! Serves two roles: the plaintext transport for `http` URLs, and the
//! fallback transport chosen when a TLS handshake does not negotiate `h2`.
//! Both obtain connections from a [`Connect`] hook and keep at most
//! `max_idle` idle keep-alive connections around.

use bytes::Bytes;
use http::header::{HeaderValue, HOST};
use http::Request;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::intercept::Interceptor;
use crate::response::Response;
use crate::transport::dial::{authority_addr, Connect};
use crate::transport::io::{ByteCounter, CountingStream};
use crate::version::HttpVersion;

struct IdleConnection {
    addr: String,
    sender: SendRequest<Full<Bytes>>,
}

/// HTTP/1.1 transport with keep-alive and a bounded idle pool.
pub struct H1Transport {
    connector: Arc<dyn Connect>,
    idle: Mutex<Vec<IdleConnection>>,
    max_idle: usize,
    interceptor: Option<Arc<dyn Interceptor>>,
    byte_counter: Option<ByteCounter>,
}

impl H1Transport {
    /// Create a transport that obtains connections from `connector`.
    pub fn new(connector: Arc<dyn Connect>) -> Self {
        Self {
            connector,
            idle: Mutex::new(Vec::new()),
            max_idle: 1,
            interceptor: None,
            byte_counter: None,
        }
    }

    /// Maximum idle connections kept for reuse (0 disables reuse).
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Forward exchanges to an interception collaborator.
    pub fn with_interceptor(mut self, interceptor: Option<Arc<dyn Interceptor>>) -> Self {
        self.interceptor = interceptor;
        self
    }

    /// Report connection I/O to a byte counter.
    pub fn with_byte_counter(mut self, counter: Option<ByteCounter>) -> Self {
        self.byte_counter = counter;
        self
    }

    /// Number of idle connections currently pooled.
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Send `request` and buffer the whole response.
    pub async fn round_trip(&self, mut request: Request<Bytes>) -> Result<Response> {
        let addr = authority_addr(request.uri())
            .ok_or_else(|| Error::http_protocol("Request URI has no host"))?;

        if let Some(interceptor) = &self.interceptor {
            interceptor.on_request(&mut request);
        }
        let url = request.uri().to_string();
        let request = into_origin_form(request)?;

        let mut sender = match self.checkout(&addr).await {
            Some(sender) => sender,
            None => self.open(&addr).await?,
        };

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/1.1 request failed: {}", e)))?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| Error::http_protocol(format!("Failed to read body: {}", e)))?
            .to_bytes();

        self.checkin(addr, sender);

        let response = Response::from_parts(parts.status, &parts.headers, body, HttpVersion::Http1_1)
            .with_url(url);
        if let Some(interceptor) = &self.interceptor {
            interceptor.on_response(&response);
        }
        Ok(response)
    }

    /// Take a pooled connection to `addr` that is still usable.
    async fn checkout(&self, addr: &str) -> Option<SendRequest<Full<Bytes>>> {
        loop {
            let mut sender = {
                let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
                let pos = idle.iter().position(|conn| conn.addr == addr)?;
                idle.swap_remove(pos).sender
            };
            if sender.ready().await.is_ok() {
                tracing::debug!(addr, "reusing idle HTTP/1.1 connection");
                return Some(sender);
            }
        }
    }

    fn checkin(&self, addr: String, sender: SendRequest<Full<Bytes>>) {
        if sender.is_closed() {
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(IdleConnection { addr, sender });
        }
    }

    async fn open(&self, addr: &str) -> Result<SendRequest<Full<Bytes>>> {
        let stream = self.connector.connect(addr).await?;
        let io = TokioIo::new(CountingStream::new(stream, self.byte_counter.clone()));

        let (sender, conn) = http1::handshake(io)
            .await
            .map_err(|e| Error::http_protocol(format!("HTTP/1.1 handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::error!("HTTP/1.1 connection error: {}", e);
            }
        });

        Ok(sender)
    }
}

/// Rewrite an absolute-form request into origin-form with a Host header.
fn into_origin_form(request: Request<Bytes>) -> Result<Request<Full<Bytes>>> {
    let (mut parts, body) = request.into_parts();

    if !parts.headers.contains_key(HOST) {
        if let Some(authority) = parts.uri.authority() {
            let value = HeaderValue::from_str(authority.as_str())
                .map_err(|e| Error::http_protocol(format!("Invalid host header: {}", e)))?;
            parts.headers.insert(HOST, value);
        }
    }

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    parts.uri = path
        .parse()
        .map_err(|e| Error::http_protocol(format!("Invalid request path: {}", e)))?;

    Ok(Request::from_parts(parts, Full::new(body)))
}
