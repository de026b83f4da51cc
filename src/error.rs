//! Error types for veil crate.

use std::io;
use std::time::Duration;

use crate::version::HttpVersion;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or using a transport.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request URL scheme is neither `http` nor `https`.
    #[error("Unsupported URL scheme: '{0}'")]
    UnsupportedScheme(String),

    /// The dial collaborator could not establish a raw stream.
    #[error("Dial to {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// TLS handshake did not complete. The raw stream has been closed.
    #[error("TLS handshake with {host} failed: {message}")]
    Handshake { host: String, message: String },

    /// Protected host presented a certificate from a disallowed issuer.
    #[error("Certificate issuer for {host} rejected by policy: {issuer}")]
    PolicyViolation { host: String, issuer: String },

    /// The negotiation state machine produced an impossible outcome.
    #[error("Negotiation invariant violated: {0}")]
    InvariantViolation(&'static str),

    /// The transport's cancellation scope was cancelled before negotiation.
    #[error("Transport cancelled")]
    Cancelled,

    /// Dial + TLS handshake exceeded the connect timeout.
    #[error("Connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// TLS configuration error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// HTTP protocol error reported by the protocol engine.
    #[error("HTTP protocol error: {0}")]
    HttpProtocol(String),

    /// A later handshake did not select the protocol the transport is
    /// committed to. The stream has been closed.
    #[error("{host} did not negotiate {committed}")]
    ProtocolMismatch { host: String, committed: HttpVersion },

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),
}

impl Error {
    /// Create a dial error for `addr`.
    pub fn dial(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Dial {
            addr: addr.into(),
            source,
        }
    }

    /// Create a handshake error.
    pub fn handshake(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handshake {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP protocol error.
    pub fn http_protocol(message: impl Into<String>) -> Self {
        Self::HttpProtocol(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// True when the request was blocked by the issuer policy rather than
    /// by a network or protocol failure.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }
}
