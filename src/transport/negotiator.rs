//! Protocol negotiation with a single TLS handshake per connection attempt.
//!
//! The wire protocol is only known once ALPN completes, yet the protocol
//! engines want a dial hook that hands back a ready connection. The
//! negotiator bridges the two in two phases:
//!
//! 1. The dispatcher calls [`Negotiator::negotiate`]. The negotiator dials,
//!    handshakes, checks the issuer policy, builds the protocol transport that
//!    matches ALPN and parks the handshaken stream under its hostname.
//! 2. The dispatcher hands the request to the new transport. Its dial hook
//!    ([`Redial`]) re-enters [`Negotiator::connect`], which claims the parked
//!    stream instead of dialing again.
//!
//! Once a transport is resolved it is never replaced. Later dials for other
//! hosts (or after a connection closes) miss the cache and return a freshly
//! handshaken stream directly. Those handshakes offer only the committed
//! protocol, and a stream that still disagrees is closed and reported as
//! [`Error::ProtocolMismatch`].

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_boring::SslStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::fingerprint::http2::Http2Settings;
use crate::intercept::Interceptor;
use crate::policy::{check_issuer, IssuerPolicy};
use crate::response::Response;
use crate::transport::connector::{
    AlpnProtocol, FingerprintedConnector, HandshakeInfo, MaybeHttpsStream,
};
use crate::transport::dial::{host_of, Connect, Dial};
use crate::transport::h1::H1Transport;
use crate::transport::h2_native::H2Transport;
use crate::transport::io::{BoxedIo, ByteCounter, CountingStream};
use crate::transport::push::PushDrainHandler;
use crate::version::HttpVersion;

/// Default cap on parked handshaken streams.
pub const DEFAULT_MAX_PENDING_STREAMS: usize = 8;

/// Logs a dial/handshake attempt at `info` when verbose, `debug` otherwise.
macro_rules! attempt_event {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

/// Outcome of one negotiation call.
#[derive(Debug)]
pub enum Negotiated {
    /// A handshaken stream for a protocol transport's dial hook.
    Stream(MaybeHttpsStream),
    /// A protocol transport is resolved; the caller should delegate to it.
    TransportSelected(HttpVersion),
}

/// The protocol transport chosen by the first successful handshake.
pub enum ProtocolTransport {
    /// `h2` was negotiated.
    Http2(H2Transport),
    /// Anything else: HTTP/1.1 over TLS.
    Fallback(H1Transport),
}

impl ProtocolTransport {
    pub fn version(&self) -> HttpVersion {
        match self {
            Self::Http2(_) => HttpVersion::Http2,
            Self::Fallback(_) => HttpVersion::Http1_1,
        }
    }

    pub async fn round_trip(&self, request: http::Request<bytes::Bytes>) -> Result<Response> {
        match self {
            Self::Http2(transport) => transport.round_trip(request).await,
            Self::Fallback(transport) => transport.round_trip(request).await,
        }
    }
}

struct PendingStream {
    stream: MaybeHttpsStream,
    seq: u64,
}

/// Handshaken streams not yet claimed by a protocol transport.
#[derive(Default)]
pub(crate) struct NegotiationState {
    pending: HashMap<String, PendingStream>,
    next_seq: u64,
}

impl NegotiationState {
    /// Park `stream` for `host`.
    ///
    /// Returns the streams pushed out: a previous stream for the same host and,
    /// when the map is over `max`, the oldest entries. The caller closes them.
    pub(crate) fn park(
        &mut self,
        host: &str,
        stream: MaybeHttpsStream,
        max: usize,
    ) -> Vec<MaybeHttpsStream> {
        let mut displaced = Vec::new();
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(old) = self.pending.insert(host.to_string(), PendingStream { stream, seq }) {
            tracing::warn!(host, "replacing unclaimed handshaken stream");
            displaced.push(old.stream);
        }

        while self.pending.len() > max.max(1) {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|(_, p)| p.seq)
                .map(|(h, _)| h.clone());
            let Some(oldest) = oldest else { break };
            if let Some(evicted) = self.pending.remove(&oldest) {
                tracing::warn!(host = %oldest, "evicting unclaimed handshaken stream");
                displaced.push(evicted.stream);
            }
        }

        displaced
    }

    /// Remove and return the parked stream for `host`.
    pub(crate) fn claim(&mut self, host: &str) -> Option<MaybeHttpsStream> {
        self.pending.remove(host).map(|p| p.stream)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Everything the negotiator needs, gathered by the transport builder.
pub(crate) struct NegotiatorConfig {
    pub dialer: Arc<dyn Dial>,
    pub network: String,
    pub connector: FingerprintedConnector,
    pub policy: Arc<dyn IssuerPolicy>,
    pub disable_issuer_policy: bool,
    pub verbose: bool,
    pub connect_timeout: Option<Duration>,
    pub cancel: CancellationToken,
    pub max_pending_streams: usize,
    pub http2: Http2Settings,
    pub push_handler: Arc<PushDrainHandler>,
    pub interceptor: Option<Arc<dyn Interceptor>>,
    pub byte_counter: Option<ByteCounter>,
    pub fallback_max_idle: usize,
}

/// Which entry point reached the negotiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Caller {
    /// The dispatcher, looking for a transport.
    Dispatcher,
    /// A protocol transport's dial hook, looking for a stream.
    Redial,
}

/// Performs handshakes, parks their streams and resolves the protocol transport.
pub struct Negotiator {
    this: Weak<Negotiator>,
    config: NegotiatorConfig,
    state: Mutex<NegotiationState>,
    resolved: OnceLock<ProtocolTransport>,
    handshakes: AtomicU64,
}

impl Negotiator {
    pub(crate) fn new(config: NegotiatorConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            state: Mutex::new(NegotiationState::default()),
            resolved: OnceLock::new(),
            handshakes: AtomicU64::new(0),
        })
    }

    /// The resolved protocol transport, if any handshake has succeeded.
    pub fn resolved(&self) -> Option<&ProtocolTransport> {
        self.resolved.get()
    }

    /// Number of handshaken streams waiting to be claimed.
    pub async fn pending_streams(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Completed TLS handshakes, including ones rejected by the issuer policy.
    pub fn handshakes(&self) -> u64 {
        self.handshakes.load(Ordering::Relaxed)
    }

    /// Dispatcher entry point.
    ///
    /// Returns `TransportSelected` as soon as a transport is resolved, without
    /// touching parked streams that belong to in-flight dial hooks.
    pub async fn negotiate(&self, addr: &str) -> Result<Negotiated> {
        self.run(addr, Caller::Dispatcher).await
    }

    /// Dial-hook entry point: a parked stream for the host if there is one,
    /// otherwise a fresh handshake.
    pub async fn connect(&self, addr: &str) -> Result<Negotiated> {
        self.run(addr, Caller::Redial).await
    }

    async fn run(&self, addr: &str, caller: Caller) -> Result<Negotiated> {
        let mut state = self.state.lock().await;
        let host = host_of(addr);
        let key = host.to_ascii_lowercase();

        match caller {
            Caller::Redial => {
                if let Some(stream) = state.claim(&key) {
                    tracing::debug!(host, "claimed handshaken stream");
                    return Ok(Negotiated::Stream(stream));
                }
            }
            Caller::Dispatcher => {
                if let Some(transport) = self.resolved.get() {
                    return Ok(Negotiated::TransportSelected(transport.version()));
                }
            }
        }

        if self.config.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let committed = self.resolved.get().map(|t| t.version());
        let (stream, info) = self
            .dial_and_handshake(addr, host, committed.map(alpn_for))
            .await?;

        if let Some(committed) = committed {
            // HTTP/1.1 also covers servers that never acknowledge ALPN
            if committed.supports_multiplexing() != info.alpn.is_h2() {
                tracing::warn!(
                    host,
                    alpn = ?info.alpn,
                    %committed,
                    "handshake did not select the committed protocol"
                );
                stream.close().await;
                return Err(Error::ProtocolMismatch {
                    host: host.to_string(),
                    committed,
                });
            }
            return Ok(Negotiated::Stream(stream));
        }

        let transport = self.build_transport(info.alpn);
        let version = transport.version();
        attempt_event!(self.config.verbose, host, %version, "protocol transport resolved");
        // Set only under the negotiation lock, after the check above.
        let _ = self.resolved.set(transport);

        let displaced = state.park(&key, stream, self.config.max_pending_streams);
        drop(state);
        close_all(displaced);

        Ok(Negotiated::TransportSelected(version))
    }

    /// Dial, handshake and apply the issuer policy, bounded by the connect
    /// timeout and the cancellation scope. `only` restricts the ALPN offer.
    async fn dial_and_handshake(
        &self,
        addr: &str,
        host: &str,
        only: Option<AlpnProtocol>,
    ) -> Result<(MaybeHttpsStream, HandshakeInfo)> {
        let bounded = async {
            match self.config.connect_timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.dial_once(addr, host, only)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::ConnectTimeout(limit)),
                    }
                }
                None => self.dial_once(addr, host, only).await,
            }
        };

        let (tls, info) = tokio::select! {
            biased;
            _ = self.config.cancel.cancelled() => return Err(Error::Cancelled),
            result = bounded => result?,
        };
        self.handshakes.fetch_add(1, Ordering::Relaxed);

        attempt_event!(
            self.config.verbose,
            host,
            alpn = ?info.alpn,
            issuer = info.issuer.as_deref().unwrap_or("<none>"),
            "TLS handshake complete"
        );

        let stream = MaybeHttpsStream::Https(tls);
        match check_issuer(
            self.config.policy.as_ref(),
            host,
            info.issuer.as_deref(),
            self.config.disable_issuer_policy,
        ) {
            Ok(decision) => tracing::debug!(host, %decision, "issuer policy"),
            Err(e) => {
                stream.close().await;
                return Err(e);
            }
        }

        Ok((stream, info))
    }

    async fn dial_once(
        &self,
        addr: &str,
        host: &str,
        only: Option<AlpnProtocol>,
    ) -> Result<(SslStream<BoxedIo>, HandshakeInfo)> {
        attempt_event!(self.config.verbose, addr, network = %self.config.network, "dialing");
        let raw = self
            .config
            .dialer
            .dial(&self.config.network, addr)
            .await
            .map_err(|e| Error::dial(addr, e))?;
        let raw: BoxedIo = match &self.config.byte_counter {
            Some(counter) => Box::new(CountingStream::new(raw, Some(Arc::clone(counter)))),
            None => raw,
        };

        attempt_event!(self.config.verbose, host, alpn = ?only, "TLS handshake");
        self.config.connector.handshake(host, raw, only).await
    }

    fn build_transport(&self, alpn: AlpnProtocol) -> ProtocolTransport {
        let redial: Arc<dyn Connect> = Arc::new(Redial {
            negotiator: self.this.clone(),
        });

        // Bytes are already counted on the raw stream under TLS.
        if alpn.is_h2() {
            ProtocolTransport::Http2(H2Transport::new(
                redial,
                self.config.http2.clone(),
                Arc::clone(&self.config.push_handler),
            ))
        } else {
            ProtocolTransport::Fallback(
                H1Transport::new(redial)
                    .with_max_idle(self.config.fallback_max_idle)
                    .with_interceptor(self.config.interceptor.clone()),
            )
        }
    }
}

/// Dial hook of the negotiated transports.
///
/// Holds the negotiator weakly: the negotiator owns the transport that owns
/// this hook.
pub struct Redial {
    negotiator: Weak<Negotiator>,
}

impl Connect for Redial {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, Result<MaybeHttpsStream>> {
        Box::pin(async move {
            let negotiator = self
                .negotiator
                .upgrade()
                .ok_or_else(|| Error::connection("transport has been dropped"))?;
            match negotiator.connect(addr).await? {
                Negotiated::Stream(stream) => Ok(stream),
                Negotiated::TransportSelected(_) => Err(Error::InvariantViolation(
                    "dial hook received a transport selection instead of a stream",
                )),
            }
        })
    }
}

/// ALPN offer for redials once `version` is committed.
fn alpn_for(version: HttpVersion) -> AlpnProtocol {
    match version {
        HttpVersion::Http2 => AlpnProtocol::H2,
        HttpVersion::Http1_1 => AlpnProtocol::Http1,
    }
}

fn close_all(streams: Vec<MaybeHttpsStream>) {
    for stream in streams {
        tokio::spawn(stream.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn plain_pair() -> (MaybeHttpsStream, DuplexStream) {
        let (ours, theirs) = duplex(64);
        (MaybeHttpsStream::Http(Box::new(ours)), theirs)
    }

    #[test]
    fn test_redials_offer_only_the_committed_protocol() {
        assert_eq!(alpn_for(HttpVersion::Http2), AlpnProtocol::H2);
        assert_eq!(alpn_for(HttpVersion::Http1_1), AlpnProtocol::Http1);
    }

    #[test]
    fn test_claim_is_at_most_once() {
        let mut state = NegotiationState::default();
        let (stream, _peer) = plain_pair();
        assert!(state.park("example.test", stream, 8).is_empty());

        assert!(state.claim("example.test").is_some());
        assert!(state.claim("example.test").is_none());
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn test_park_replaces_stream_for_same_host() {
        let mut state = NegotiationState::default();
        let (first, _p1) = plain_pair();
        let (second, _p2) = plain_pair();

        assert!(state.park("example.test", first, 8).is_empty());
        let displaced = state.park("example.test", second, 8);

        assert_eq!(displaced.len(), 1);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_park_evicts_oldest_over_cap() {
        let mut state = NegotiationState::default();
        let (a, _pa) = plain_pair();
        let (b, _pb) = plain_pair();
        let (c, _pc) = plain_pair();

        state.park("a.test", a, 2);
        state.park("b.test", b, 2);
        let displaced = state.park("c.test", c, 2);

        assert_eq!(displaced.len(), 1);
        assert!(state.claim("a.test").is_none());
        assert!(state.claim("b.test").is_some());
        assert!(state.claim("c.test").is_some());
    }

    #[tokio::test]
    async fn test_displaced_streams_are_closed() {
        let mut state = NegotiationState::default();
        let (first, mut peer) = plain_pair();
        let (second, _p2) = plain_pair();

        state.park("example.test", first, 8);
        close_all(state.park("example.test", second, 8));

        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(Duration::from_secs(5), peer.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
