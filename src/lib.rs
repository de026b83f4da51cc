//! # Veil
//!
//! HTTP client transport that negotiates its wire protocol per connection.
//!
//! A single fingerprinted TLS handshake (BoringSSL, browser-like ClientHello)
//! both discovers the protocol through ALPN and carries the first request:
//! the handshaken stream is parked and handed to whichever protocol transport
//! (HTTP/2 via `h2`, or HTTP/1.1 via hyper) ALPN selected. Protected hosts are
//! only accepted with certificates from allowed issuers, and HTTP/2 server
//! pushes are drained without ever reaching the caller.

pub mod error;
pub mod fingerprint;
pub mod intercept;
pub mod policy;
pub mod response;
pub mod transport;
pub mod version;

// Re-exports
pub use error::{Error, Result};
pub use fingerprint::{FingerprintProfile, Http2Settings};
pub use intercept::Interceptor;
pub use policy::{AllowListPolicy, IssuerPolicy, NoIssuerPolicy};
pub use response::Response;
pub use transport::{
    BoxedIo, Dial, DialFn, Direction, PushStats, TcpDialer, Transport, TransportBuilder,
};
pub use version::HttpVersion;
