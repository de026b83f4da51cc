//! TCP/IP stack fingerprinting for browser impersonation.
//!
//! Configures TCP socket options to match browser behavior:
//! - Initial window size
//! - TTL (Time To Live)
//! - MSS (Maximum Segment Size)
//! - Window scaling
//! - SACK (Selective Acknowledgment)
//! - TCP timestamps
//!
//! These options are detectable before TLS handshake (p0f-style fingerprinting).
//!
//! [`TcpDialer`] is the default dial collaborator and applies them.

use futures_util::future::BoxFuture;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpStream};
use tokio::task;

use crate::transport::dial::Dial;
use crate::transport::io::BoxedIo;

/// TCP/IP fingerprint configuration.
#[derive(Debug, Clone)]
pub struct TcpFingerprint {
    /// Initial receive window size (bytes).
    /// Chrome: 65535 (default), can be adjusted via socket buffer size
    pub window_size: u32,
    /// Initial TTL (Time To Live) for IPv4 packets.
    /// macOS: 64, Linux: 64, Windows: 128
    pub ttl: u8,
    /// Maximum Segment Size (MSS).
    /// Typically 1460 for Ethernet (1500 MTU - 40 IP/TCP headers)
    pub mss: u16,
    /// Window scaling factor (RFC 1323).
    /// Chrome: typically 6-7 (64KB * 2^6 = 4MB window)
    pub window_scale: u8,
    /// Enable SACK (Selective Acknowledgment).
    /// Modern browsers: true
    pub sack_permitted: bool,
    /// Enable TCP timestamps (RFC 1323).
    /// Modern browsers: true
    pub timestamps: bool,
}

impl Default for TcpFingerprint {
    fn default() -> Self {
        // Chrome defaults on macOS
        Self {
            window_size: 65535,
            ttl: 64,   // macOS default
            mss: 1460, // Ethernet MTU - headers
            window_scale: 6,
            sack_permitted: true,
            timestamps: true,
        }
    }
}

impl TcpFingerprint {
    /// Create Chrome TCP fingerprint.
    pub fn chrome() -> Self {
        Self::default()
    }

    /// Create Firefox TCP fingerprint.
    /// Firefox uses similar TCP settings to Chrome.
    pub fn firefox() -> Self {
        Self::default()
    }
}

/// Configure a TCP socket with fingerprint settings.
///
/// Uses socket2 crate for cross-platform socket options.
/// MSS, window scaling, SACK and timestamps are negotiated by the OS during
/// the TCP handshake and cannot be set portably.
pub fn configure_tcp_socket(socket: &socket2::Socket, fp: &TcpFingerprint) -> io::Result<()> {
    // Receive buffer size influences the advertised window
    socket.set_recv_buffer_size(fp.window_size as usize)?;
    socket.set_send_buffer_size(fp.window_size as usize)?;
    socket.set_ttl_v4(fp.ttl as u32)?;
    Ok(())
}

/// Default dial collaborator: resolves `host:port` and opens a TCP stream.
///
/// `network` follows the usual conventions: `tcp` accepts any address family,
/// `tcp4` and `tcp6` restrict resolution to one family.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    tcp_fingerprint: Option<TcpFingerprint>,
}

impl TcpDialer {
    /// Create a dialer using OS socket defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dialer that applies TCP fingerprint socket options.
    pub fn with_fingerprint(tcp_fp: TcpFingerprint) -> Self {
        Self {
            tcp_fingerprint: Some(tcp_fp),
        }
    }

    async fn resolve(network: &str, addr: &str) -> io::Result<SocketAddr> {
        let wanted: fn(&SocketAddr) -> bool = match network {
            "tcp" | "" => |_| true,
            "tcp4" => SocketAddr::is_ipv4,
            "tcp6" => SocketAddr::is_ipv6,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported network: {}", other),
                ))
            }
        };

        lookup_host(addr)
            .await?
            .find(wanted)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no {} addresses found for {}", network, addr),
                )
            })
    }

    async fn connect(&self, network: &str, addr: &str) -> io::Result<TcpStream> {
        let socket_addr = Self::resolve(network, addr).await?;

        let Some(tcp_fp) = self.tcp_fingerprint.clone() else {
            return TcpStream::connect(socket_addr).await;
        };

        let domain = match socket_addr {
            SocketAddr::V4(_) => Domain::IPV4,
            SocketAddr::V6(_) => Domain::IPV6,
        };

        // Socket options must be applied before connect, which socket2 does synchronously
        let std_stream = task::spawn_blocking(move || -> io::Result<std::net::TcpStream> {
            let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
            configure_tcp_socket(&socket, &tcp_fp)?;
            socket.connect(&socket_addr.into())?;
            // Required by tokio before conversion
            socket.set_nonblocking(true)?;
            Ok(socket.into())
        })
        .await
        .map_err(io::Error::other)??;

        TcpStream::from_std(std_stream)
    }
}

impl Dial for TcpDialer {
    fn dial<'a>(&'a self, network: &'a str, addr: &'a str) -> BoxFuture<'a, io::Result<BoxedIo>> {
        Box::pin(async move {
            let stream = self.connect(network, addr).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedIo)
        })
    }
}
