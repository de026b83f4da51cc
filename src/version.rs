//! HTTP version of a resolved transport.

/// Wire protocol a transport speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP/1.1, plaintext or over TLS.
    Http1_1,
    /// HTTP/2 over TLS.
    Http2,
}

impl HttpVersion {
    /// Get human-readable version string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http1_1 => "HTTP/1.1",
            Self::Http2 => "HTTP/2",
        }
    }

    /// Check if this version supports multiplexing.
    pub fn supports_multiplexing(&self) -> bool {
        matches!(self, Self::Http2)
    }
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
