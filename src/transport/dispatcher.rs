//! Request entry point: routes by scheme and memoizes the negotiated transport.

use bytes::Bytes;
use http::Request;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::fingerprint::http2::Http2Settings;
use crate::fingerprint::profiles::FingerprintProfile;
use crate::intercept::Interceptor;
use crate::policy::{IssuerPolicy, NoIssuerPolicy};
use crate::response::Response;
use crate::transport::connector::{FingerprintedConnector, TlsOptions};
use crate::transport::dial::{authority_addr, Dial, PlainConnect};
use crate::transport::h1::H1Transport;
use crate::transport::io::{ByteCounter, Direction};
use crate::transport::negotiator::{
    Negotiated, Negotiator, NegotiatorConfig, DEFAULT_MAX_PENDING_STREAMS,
};
use crate::transport::push::{PushDrainHandler, PushStats};
use crate::transport::tcp::TcpDialer;
use crate::version::HttpVersion;

/// HTTP transport that picks its wire protocol from the first TLS handshake.
///
/// `http` URLs go over a plaintext HTTP/1.1 transport. The first `https`
/// request performs one fingerprinted handshake, commits the instance to
/// HTTP/2 or HTTP/1.1 according to ALPN, and reuses that handshake for the
/// request itself. Clones share all state.
///
/// ```no_run
/// # async fn run() -> veil::Result<()> {
/// use bytes::Bytes;
///
/// let transport = veil::Transport::builder()
///     .fingerprint(veil::FingerprintProfile::Chrome131)
///     .build()?;
///
/// let request = http::Request::get("https://example.com/")
///     .body(Bytes::new())
///     .map_err(|e| veil::Error::http_protocol(e.to_string()))?;
/// let response = transport.round_trip(request).await?;
/// println!("{} over {}", response.status, response.http_version());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    negotiator: Arc<Negotiator>,
    plaintext: OnceLock<H1Transport>,
    dialer: Arc<dyn Dial>,
    network: String,
    interceptor: Option<Arc<dyn Interceptor>>,
    byte_counter: Option<ByteCounter>,
    max_idle_connections: usize,
    push_handler: Arc<PushDrainHandler>,
}

impl Transport {
    /// Start configuring a transport.
    pub fn builder() -> TransportBuilder {
        TransportBuilder::default()
    }

    /// Send `request` and return the buffered response.
    ///
    /// The request URI must be absolute.
    pub async fn round_trip(&self, request: Request<Bytes>) -> Result<Response> {
        let scheme = request.uri().scheme_str().unwrap_or_default();
        if scheme.eq_ignore_ascii_case("http") {
            return self.plaintext().round_trip(request).await;
        }
        if !scheme.eq_ignore_ascii_case("https") {
            return Err(Error::UnsupportedScheme(scheme.to_string()));
        }

        let negotiator = &self.inner.negotiator;
        if let Some(transport) = negotiator.resolved() {
            return transport.round_trip(request).await;
        }

        let addr = authority_addr(request.uri())
            .ok_or_else(|| Error::http_protocol("Request URI has no host"))?;

        match negotiator.negotiate(&addr).await? {
            Negotiated::TransportSelected(version) => {
                tracing::debug!(addr, %version, "delegating to negotiated transport");
                let transport = negotiator.resolved().ok_or(Error::InvariantViolation(
                    "transport selected but none resolved",
                ))?;
                transport.round_trip(request).await
            }
            Negotiated::Stream(stream) => {
                stream.close().await;
                Err(Error::InvariantViolation(
                    "dispatcher received a stream instead of a transport selection",
                ))
            }
        }
    }

    fn plaintext(&self) -> &H1Transport {
        self.inner.plaintext.get_or_init(|| {
            let connect = PlainConnect::new(Arc::clone(&self.inner.dialer), self.inner.network.clone());
            H1Transport::new(Arc::new(connect))
                .with_max_idle(self.inner.max_idle_connections)
                .with_interceptor(self.inner.interceptor.clone())
                .with_byte_counter(self.inner.byte_counter.clone())
        })
    }

    /// Protocol the `https` path is committed to, once negotiated.
    pub fn negotiated_protocol(&self) -> Option<HttpVersion> {
        self.inner.negotiator.resolved().map(|t| t.version())
    }

    /// Handshaken streams parked for a protocol transport but not yet claimed.
    pub async fn pending_streams(&self) -> usize {
        self.inner.negotiator.pending_streams().await
    }

    /// TLS handshakes completed by this transport.
    pub fn handshakes(&self) -> u64 {
        self.inner.negotiator.handshakes()
    }

    /// Server push counters.
    pub fn push_stats(&self) -> PushStats {
        self.inner.push_handler.stats()
    }

    /// Receiver that changes whenever a push is received or drained.
    pub fn subscribe_pushes(&self) -> watch::Receiver<PushStats> {
        self.inner.push_handler.subscribe()
    }
}

/// Builder for [`Transport`].
pub struct TransportBuilder {
    dialer: Option<Arc<dyn Dial>>,
    network: String,
    fingerprint: FingerprintProfile,
    root_certs: Vec<Vec<u8>>,
    accept_invalid_certs: bool,
    key_log_file: Option<PathBuf>,
    verbose: bool,
    disable_issuer_policy: bool,
    policy: Arc<dyn IssuerPolicy>,
    http2: Http2Settings,
    interceptor: Option<Arc<dyn Interceptor>>,
    byte_counter: Option<ByteCounter>,
    cancellation: Option<CancellationToken>,
    connect_timeout: Option<Duration>,
    max_pending_streams: usize,
    max_idle_connections: usize,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self {
            dialer: None,
            network: "tcp".to_string(),
            fingerprint: FingerprintProfile::default(),
            root_certs: Vec::new(),
            accept_invalid_certs: false,
            key_log_file: None,
            verbose: false,
            disable_issuer_policy: false,
            policy: Arc::new(NoIssuerPolicy),
            http2: Http2Settings::default(),
            interceptor: None,
            byte_counter: None,
            cancellation: None,
            connect_timeout: None,
            max_pending_streams: DEFAULT_MAX_PENDING_STREAMS,
            max_idle_connections: 1,
        }
    }
}

impl TransportBuilder {
    /// Raw stream collaborator. Defaults to [`TcpDialer`].
    pub fn dialer(mut self, dialer: impl Dial) -> Self {
        self.dialer = Some(Arc::new(dialer));
        self
    }

    /// Network name passed to the dialer (`tcp`, `tcp4`, `tcp6`).
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// TLS ClientHello profile.
    pub fn fingerprint(mut self, profile: FingerprintProfile) -> Self {
        self.fingerprint = profile;
        self
    }

    /// Trust an additional root certificate (DER or PEM).
    pub fn add_root_certificate(mut self, cert: impl Into<Vec<u8>>) -> Self {
        self.root_certs.push(cert.into());
        self
    }

    /// Skip certificate and hostname verification.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Append TLS secrets in NSS key-log format to `path`.
    pub fn key_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_log_file = Some(path.into());
        self
    }

    /// Log dial and handshake attempts at `info`.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Accept protected hosts regardless of certificate issuer.
    pub fn disable_issuer_policy(mut self, disable: bool) -> Self {
        self.disable_issuer_policy = disable;
        self
    }

    /// Protected hosts and acceptable issuers.
    pub fn issuer_policy(mut self, policy: impl IssuerPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// SETTINGS for HTTP/2 connections.
    pub fn http2_settings(mut self, settings: Http2Settings) -> Self {
        self.http2 = settings;
        self
    }

    /// Interception collaborator for the HTTP/1.1 transports.
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptor = Some(Arc::new(interceptor));
        self
    }

    /// Callback told about every read and write on transport streams.
    pub fn byte_counter<F>(mut self, counter: F) -> Self
    where
        F: Fn(Direction, usize) + Send + Sync + 'static,
    {
        self.byte_counter = Some(Arc::new(counter));
        self
    }

    /// Parent cancellation scope. New negotiations fail once it is cancelled.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Deadline for dial plus TLS handshake.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Cap on handshaken streams parked for protocol transports.
    pub fn max_pending_streams(mut self, max: usize) -> Self {
        self.max_pending_streams = max;
        self
    }

    /// Idle keep-alive connections kept by each HTTP/1.1 transport.
    pub fn max_idle_connections(mut self, max: usize) -> Self {
        self.max_idle_connections = max;
        self
    }

    pub fn build(self) -> Result<Transport> {
        let options = TlsOptions {
            root_certs: self.root_certs,
            accept_invalid_certs: self.accept_invalid_certs,
            key_log_path: self.key_log_file,
        };
        let connector = FingerprintedConnector::new(&self.fingerprint.tls_fingerprint(), &options)?;

        let dialer = self
            .dialer
            .unwrap_or_else(|| Arc::new(TcpDialer::new()) as Arc<dyn Dial>);
        let cancel = self
            .cancellation
            .map(|parent| parent.child_token())
            .unwrap_or_else(CancellationToken::new);
        let push_handler = Arc::new(PushDrainHandler::new());

        tracing::debug!(
            profile = self.fingerprint.name(),
            key_logging = connector.key_logging(),
            "building transport"
        );

        let negotiator = Negotiator::new(NegotiatorConfig {
            dialer: Arc::clone(&dialer),
            network: self.network.clone(),
            connector,
            policy: self.policy,
            disable_issuer_policy: self.disable_issuer_policy,
            verbose: self.verbose,
            connect_timeout: self.connect_timeout,
            cancel,
            max_pending_streams: self.max_pending_streams,
            http2: self.http2,
            push_handler: Arc::clone(&push_handler),
            interceptor: self.interceptor.clone(),
            byte_counter: self.byte_counter.clone(),
            fallback_max_idle: self.max_idle_connections,
        });

        Ok(Transport {
            inner: Arc::new(Inner {
                negotiator,
                plaintext: OnceLock::new(),
                dialer,
                network: self.network,
                interceptor: self.interceptor,
                byte_counter: self.byte_counter,
                max_idle_connections: self.max_idle_connections,
                push_handler,
            }),
        })
    }
}
