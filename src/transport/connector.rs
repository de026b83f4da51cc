//! Fingerprinted BoringSSL connector.
//!
//! Wraps a raw dialed stream in a TLS client session whose ClientHello follows
//! a [`TlsFingerprint`], performs the handshake and reports what was
//! negotiated: the ALPN protocol and the peer certificate chain.

use boring::ssl::{
    SslConnector, SslConnectorBuilder, SslMethod, SslRef, SslSessionCacheMode, SslVerifyMode,
    SslVersion,
};
use boring::x509::{X509NameRef, X509};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_boring::SslStream;

use crate::error::{Error, Result};
use crate::fingerprint::tls::{CertCompression, TlsFingerprint};
use crate::transport::io::BoxedIo;

// FFI bindings for BoringSSL extension control
use boring_sys::{CRYPTO_BUFFER, SSL, SSL_CTX};
use std::os::raw::c_int;

extern "C" {
    /// Enable GREASE (Generate Random Extensions And Sustain Extensibility)
    pub fn SSL_CTX_set_grease_enabled(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
    /// Enable extension order permutation (Chrome 110+ behavior)
    pub fn SSL_CTX_set_permute_extensions(ctx: *mut SSL_CTX, enabled: c_int) -> c_int;
}

/// ALPN protocols offered in the ClientHello, in preference order.
const ALPN_PROTOS: &[u8] = b"\x02h2\x08http/1.1";

/// Copy a decompressed certificate into a fresh CRYPTO_BUFFER.
///
/// Returns 1 on success, 0 on failure, as BoringSSL expects.
unsafe fn emit_decompressed(
    decoded: io::Result<usize>,
    decompressed: &[u8],
    uncompressed_len: usize,
    out: *mut *mut CRYPTO_BUFFER,
) -> c_int {
    match decoded {
        Ok(_) if decompressed.len() == uncompressed_len => {
            // CRYPTO_BUFFER_new copies the data; pool may be null for one-off buffers
            let buffer = boring_sys::CRYPTO_BUFFER_new(
                decompressed.as_ptr(),
                decompressed.len(),
                std::ptr::null_mut(),
            );
            if buffer.is_null() {
                return 0;
            }
            *out = buffer;
            1
        }
        _ => 0,
    }
}

/// Brotli certificate decompression callback for BoringSSL.
unsafe extern "C" fn decompress_brotli_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let decoded = brotli::Decompressor::new(compressed, uncompressed_len)
        .read_to_end(&mut decompressed);
    emit_decompressed(decoded, &decompressed, uncompressed_len, out)
}

/// Zlib certificate decompression callback for BoringSSL.
unsafe extern "C" fn decompress_zlib_cert(
    _ssl: *mut SSL,
    out: *mut *mut CRYPTO_BUFFER,
    uncompressed_len: usize,
    in_: *const u8,
    in_len: usize,
) -> c_int {
    let compressed = std::slice::from_raw_parts(in_, in_len);
    let mut decompressed = Vec::with_capacity(uncompressed_len);
    let decoded = flate2::read::DeflateDecoder::new(compressed).read_to_end(&mut decompressed);
    emit_decompressed(decoded, &decompressed, uncompressed_len, out)
}

/// Options for building a [`FingerprintedConnector`].
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Extra trust anchors (DER or PEM).
    pub root_certs: Vec<Vec<u8>>,
    /// Skip certificate chain and hostname verification.
    pub accept_invalid_certs: bool,
    /// Append NSS key-log lines to this file.
    pub key_log_path: Option<std::path::PathBuf>,
}

/// Negotiated ALPN protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlpnProtocol {
    /// HTTP/2 ("h2")
    H2,
    /// HTTP/1.1 ("http/1.1")
    Http1,
    /// No ALPN negotiated or unknown protocol
    Unknown,
}

impl AlpnProtocol {
    fn from_selected(selected: Option<&[u8]>) -> Self {
        match selected {
            Some(b"h2") => Self::H2,
            Some(b"http/1.1") => Self::Http1,
            _ => Self::Unknown,
        }
    }

    /// Check if HTTP/2 was negotiated.
    pub fn is_h2(&self) -> bool {
        matches!(self, Self::H2)
    }

    /// ALPN wire list offering only this protocol. `Unknown` offers both.
    fn wire(&self) -> &'static [u8] {
        match self {
            Self::H2 => b"\x02h2",
            Self::Http1 => b"\x08http/1.1",
            Self::Unknown => ALPN_PROTOS,
        }
    }
}

/// What a completed handshake negotiated.
#[derive(Debug, Clone)]
pub struct HandshakeInfo {
    /// Protocol selected by the server through ALPN.
    pub alpn: AlpnProtocol,
    /// Peer certificates in DER, leaf first.
    pub peer_certificates: Vec<Vec<u8>>,
    /// Issuer distinguished name of the leaf certificate.
    pub issuer: Option<String>,
}

impl HandshakeInfo {
    fn from_ssl(ssl: &SslRef) -> Self {
        let leaf = ssl.peer_certificate();
        let leaf_der = leaf.as_ref().and_then(|cert| cert.to_der().ok());

        let mut peer_certificates = Vec::new();
        if let Some(der) = &leaf_der {
            peer_certificates.push(der.clone());
        }
        if let Some(chain) = ssl.peer_cert_chain() {
            for der in chain.iter().filter_map(|cert| cert.to_der().ok()) {
                if Some(&der) != leaf_der.as_ref() {
                    peer_certificates.push(der);
                }
            }
        }

        Self {
            alpn: AlpnProtocol::from_selected(ssl.selected_alpn_protocol()),
            peer_certificates,
            issuer: leaf.map(|cert| format_name(cert.issuer_name())),
        }
    }
}

/// Render an X.509 name as `SN=value, SN=value`.
fn format_name(name: &X509NameRef) -> String {
    name.entries()
        .map(|entry| {
            let key = entry.object().nid().short_name().unwrap_or("?");
            let value = entry
                .data()
                .as_utf8()
                .map(|s| s.to_string())
                .unwrap_or_default();
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stream that can be either HTTP (raw dialed stream) or HTTPS (TLS).
pub enum MaybeHttpsStream {
    /// Raw stream for plaintext HTTP.
    Http(BoxedIo),
    /// TLS-wrapped stream for HTTPS.
    Https(SslStream<BoxedIo>),
}

impl MaybeHttpsStream {
    /// Get the negotiated ALPN protocol.
    ///
    /// Plain streams report `Unknown` (no TLS = no ALPN).
    pub fn alpn_protocol(&self) -> AlpnProtocol {
        match self {
            MaybeHttpsStream::Http(_) => AlpnProtocol::Unknown,
            MaybeHttpsStream::Https(stream) => {
                AlpnProtocol::from_selected(stream.ssl().selected_alpn_protocol())
            }
        }
    }

    /// Check if HTTP/2 was negotiated via ALPN.
    pub fn is_h2(&self) -> bool {
        self.alpn_protocol().is_h2()
    }

    /// Best-effort graceful close (TLS close_notify, then FIN).
    pub async fn close(mut self) {
        if let Err(e) = self.shutdown().await {
            tracing::debug!("stream shutdown failed: {}", e);
        }
    }
}

impl fmt::Debug for MaybeHttpsStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaybeHttpsStream::Http(_) => f.write_str("MaybeHttpsStream::Http"),
            MaybeHttpsStream::Https(_) => f
                .debug_tuple("MaybeHttpsStream::Https")
                .field(&self.alpn_protocol())
                .finish(),
        }
    }
}

impl AsyncRead for MaybeHttpsStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_read(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeHttpsStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_write(cx, buf),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_flush(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            MaybeHttpsStream::Http(stream) => Pin::new(stream).poll_shutdown(cx),
            MaybeHttpsStream::Https(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Open the key-log file for appending.
///
/// Key logging is diagnostics only: any failure disables it.
fn open_key_log(path: &Path) -> Option<Arc<Mutex<File>>> {
    if path.as_os_str().is_empty() {
        return None;
    }
    match OpenOptions::new().append(true).create(true).open(path) {
        Ok(file) => Some(Arc::new(Mutex::new(file))),
        Err(e) => {
            tracing::debug!(path = %path.display(), "key log disabled: {}", e);
            None
        }
    }
}

/// BoringSSL connector producing fingerprinted TLS sessions.
#[derive(Clone)]
pub struct FingerprintedConnector {
    ssl: SslConnector,
    accept_invalid_certs: bool,
    key_logging: bool,
}

impl FingerprintedConnector {
    /// Build a connector for `fingerprint`.
    pub fn new(fingerprint: &TlsFingerprint, options: &TlsOptions) -> Result<Self> {
        let mut builder = SslConnector::builder(SslMethod::tls_client())
            .map_err(|e| Error::tls(format!("Failed to create SSL connector: {}", e)))?;

        for cert_bytes in &options.root_certs {
            let cert = X509::from_der(cert_bytes).or_else(|_| X509::from_pem(cert_bytes));
            match cert {
                Ok(cert) => {
                    if let Err(e) = builder.cert_store_mut().add_cert(cert) {
                        tracing::warn!("Failed to add root certificate: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Ignoring unparseable root certificate: {}", e),
            }
        }

        if options.accept_invalid_certs {
            builder.set_verify(SslVerifyMode::NONE);
        }

        if !fingerprint.is_default() || fingerprint.enable_kyber {
            apply_fingerprint(&mut builder, fingerprint)?;
        }

        builder
            .set_min_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|e| Error::tls(format!("Failed to set min TLS version: {}", e)))?;
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_3))
            .map_err(|e| Error::tls(format!("Failed to set max TLS version: {}", e)))?;

        // Session resumption, as browsers do
        builder.set_session_cache_mode(SslSessionCacheMode::CLIENT);

        builder
            .set_alpn_protos(ALPN_PROTOS)
            .map_err(|e| Error::tls(format!("Failed to set ALPN: {}", e)))?;

        let key_log = options.key_log_path.as_deref().and_then(open_key_log);
        let key_logging = key_log.is_some();
        if let Some(file) = key_log {
            builder.set_keylog_callback(move |_, line| {
                if let Ok(mut file) = file.lock() {
                    let _ = writeln!(file, "{}", line);
                }
            });
        }

        Ok(Self {
            ssl: builder.build(),
            accept_invalid_certs: options.accept_invalid_certs,
            key_logging,
        })
    }

    /// Whether handshake secrets are being written to a key log.
    pub fn key_logging(&self) -> bool {
        self.key_logging
    }

    /// Handshake over `stream` with SNI `host`.
    ///
    /// `only` restricts the ALPN offer to one protocol; `None` offers `h2`
    /// and `http/1.1`. On failure the raw stream is shut down before the
    /// error is returned.
    pub async fn handshake(
        &self,
        host: &str,
        stream: BoxedIo,
        only: Option<AlpnProtocol>,
    ) -> Result<(SslStream<BoxedIo>, HandshakeInfo)> {
        let mut config = self
            .ssl
            .configure()
            .map_err(|e| Error::tls(format!("Failed to configure SSL: {}", e)))?;
        if self.accept_invalid_certs {
            config.set_verify_hostname(false);
        }
        if let Some(protocol) = only {
            config
                .set_alpn_protos(protocol.wire())
                .map_err(|e| Error::tls(format!("Failed to set ALPN: {}", e)))?;
        }

        match tokio_boring::connect(config, host, stream).await {
            Ok(tls) => {
                let info = HandshakeInfo::from_ssl(tls.ssl());
                Ok((tls, info))
            }
            Err(e) => {
                let message = e.to_string();
                if let Some(mut raw) = e.into_source_stream() {
                    let _ = raw.shutdown().await;
                }
                Err(Error::handshake(host, message))
            }
        }
    }
}

/// Shape the ClientHello: ciphers, groups, sigalgs, GREASE, cert compression.
fn apply_fingerprint(builder: &mut SslConnectorBuilder, fp: &TlsFingerprint) -> Result<()> {
    if !fp.cipher_list.is_empty() {
        builder
            .set_cipher_list(&fp.cipher_list.join(":"))
            .map_err(|e| Error::tls(format!("Failed to set cipher list: {}", e)))?;
    }

    let curves = match (fp.enable_kyber, fp.curves.is_empty()) {
        (true, true) => Some("X25519Kyber768Draft00".to_string()),
        (true, false) => Some(format!("X25519Kyber768Draft00:{}", fp.curves.join(":"))),
        (false, false) => Some(fp.curves.join(":")),
        (false, true) => None,
    };
    if let Some(curves) = curves {
        builder
            .set_curves_list(&curves)
            .map_err(|e| Error::tls(format!("Failed to set curves: {}", e)))?;
    }

    if !fp.sigalgs.is_empty() {
        builder
            .set_sigalgs_list(&fp.sigalgs.join(":"))
            .map_err(|e| Error::tls(format!("Failed to set signature algorithms: {}", e)))?;
    }

    // Extension order is permuted by both Chrome and Firefox; only Chrome sends GREASE
    unsafe {
        let ctx = builder.as_ptr() as *mut SSL_CTX;
        SSL_CTX_set_grease_enabled(ctx, fp.grease as c_int);
        SSL_CTX_set_permute_extensions(ctx, 1);

        // Only decompression callbacks: the client never compresses its own chain
        match fp.cert_compression {
            CertCompression::Brotli => {
                let _ = boring_sys::SSL_CTX_add_cert_compression_alg(
                    ctx,
                    boring_sys::TLSEXT_cert_compression_brotli as u16,
                    None,
                    Some(decompress_brotli_cert),
                );
            }
            CertCompression::Zlib => {
                let _ = boring_sys::SSL_CTX_add_cert_compression_alg(
                    ctx,
                    boring_sys::TLSEXT_cert_compression_zlib as u16,
                    None,
                    Some(decompress_zlib_cert),
                );
            }
            CertCompression::None => {}
        }
    }

    Ok(())
}
