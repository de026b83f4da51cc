//! HTTP transport implementations.
//!
//! - Protocol negotiation over fingerprinted BoringSSL handshakes
//! - HTTP/1.1 via hyper, HTTP/2 via h2 with server push draining

pub mod connector;
pub mod dial;
pub mod dispatcher;
pub mod h1;
pub mod h2_native;
pub mod io;
pub mod negotiator;
pub mod push;
pub mod tcp;

pub use connector::{AlpnProtocol, FingerprintedConnector, HandshakeInfo, MaybeHttpsStream};
pub use dial::{Connect, Dial, DialFn};
pub use dispatcher::{Transport, TransportBuilder};
pub use io::{BoxedIo, ByteCounter, Direction};
pub use negotiator::{Negotiated, ProtocolTransport};
pub use push::{PushDrainHandler, PushStats};
pub use tcp::{TcpDialer, TcpFingerprint};
