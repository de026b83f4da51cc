//! Dial collaborator: produces raw byte streams for the negotiator.

use futures_util::future::BoxFuture;
use std::future::Future;
use std::io;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transport::connector::MaybeHttpsStream;
use crate::transport::io::BoxedIo;

/// Establishes a raw byte stream to `addr` (`host:port`).
///
/// Implementations must be safe to call concurrently from different
/// transports. A single transport serializes its own TLS dials through the
/// negotiation lock.
pub trait Dial: Send + Sync + 'static {
    fn dial<'a>(&'a self, network: &'a str, addr: &'a str) -> BoxFuture<'a, io::Result<BoxedIo>>;
}

/// Adapts an async closure into a [`Dial`] implementation.
///
/// ```no_run
/// use veil::transport::dial::DialFn;
/// use veil::transport::io::BoxedIo;
///
/// let dialer = DialFn::new(|_network: String, addr: String| async move {
///     let stream = tokio::net::TcpStream::connect(addr).await?;
///     Ok::<_, std::io::Error>(Box::new(stream) as BoxedIo)
/// });
/// ```
pub struct DialFn<F> {
    f: F,
}

impl<F> DialFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Dial for DialFn<F>
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = io::Result<BoxedIo>> + Send + 'static,
{
    fn dial<'a>(&'a self, network: &'a str, addr: &'a str) -> BoxFuture<'a, io::Result<BoxedIo>> {
        Box::pin((self.f)(network.to_string(), addr.to_string()))
    }
}

/// Dial hook of a protocol transport: yields a connection ready for HTTP.
///
/// Plaintext transports dial through the collaborator directly; negotiated
/// transports re-enter the negotiator so they pick up the stream that was
/// handshaken while the protocol was discovered.
pub trait Connect: Send + Sync {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, Result<MaybeHttpsStream>>;
}

/// [`Connect`] for plaintext HTTP: the dial collaborator's raw stream as-is.
pub struct PlainConnect {
    dialer: Arc<dyn Dial>,
    network: String,
}

impl PlainConnect {
    pub fn new(dialer: Arc<dyn Dial>, network: impl Into<String>) -> Self {
        Self {
            dialer,
            network: network.into(),
        }
    }
}

impl Connect for PlainConnect {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, Result<MaybeHttpsStream>> {
        Box::pin(async move {
            let raw = self
                .dialer
                .dial(&self.network, addr)
                .await
                .map_err(|e| Error::dial(addr, e))?;
            Ok(MaybeHttpsStream::Http(raw))
        })
    }
}

/// Split `host:port` into its host part, stripping IPv6 brackets.
///
/// Addresses without a port are returned unchanged.
pub fn host_of(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
        return addr;
    }
    match addr.rsplit_once(':') {
        // More than one colon without brackets is a bare IPv6 literal.
        Some((host, _)) if !host.contains(':') => host,
        _ => addr,
    }
}

/// Dial address for a request URI: `host:port`, defaulting the port from the scheme.
pub fn authority_addr(uri: &http::Uri) -> Option<String> {
    let host = uri.host()?;
    let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
        Some(s) if s.eq_ignore_ascii_case("https") => 443,
        _ => 80,
    });
    Some(format!("{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("example.test:443"), "example.test");
        assert_eq!(host_of("example.test"), "example.test");
        assert_eq!(host_of("[::1]:8443"), "::1");
        assert_eq!(host_of("::1"), "::1");
        assert_eq!(host_of("127.0.0.1:80"), "127.0.0.1");
    }

    #[test]
    fn test_authority_addr_defaults_port_from_scheme() {
        let uri: http::Uri = "https://example.test/path".parse().unwrap();
        assert_eq!(authority_addr(&uri).as_deref(), Some("example.test:443"));

        let uri: http::Uri = "HTTP://example.test/".parse().unwrap();
        assert_eq!(authority_addr(&uri).as_deref(), Some("example.test:80"));

        let uri: http::Uri = "https://example.test:8443/".parse().unwrap();
        assert_eq!(authority_addr(&uri).as_deref(), Some("example.test:8443"));

        let uri: http::Uri = "/relative".parse().unwrap();
        assert_eq!(authority_addr(&uri), None);
    }
}
