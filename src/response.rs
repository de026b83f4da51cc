//! HTTP response returned by every transport.

use bytes::Bytes;
use http::HeaderMap;

use crate::error::{Error, Result};
use crate::version::HttpVersion;

/// Fully buffered HTTP response.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<String>,
    body: Bytes,
    http_version: HttpVersion,
    pub effective_url: Option<String>,
}

impl Response {
    pub fn new(status: u16, headers: Vec<String>, body: Bytes, http_version: HttpVersion) -> Self {
        Self { status, headers, body, http_version, effective_url: None }
    }

    /// Build from engine parts, flattening the header map into `name: value` lines.
    pub(crate) fn from_parts(
        status: http::StatusCode,
        headers: &HeaderMap,
        body: Bytes,
        http_version: HttpVersion,
    ) -> Self {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                format!("{}: {}", name.as_str(), String::from_utf8_lossy(value.as_bytes()))
            })
            .collect();
        Self::new(status.as_u16(), headers, body, http_version)
    }

    /// Set the effective URL (the URL that was actually requested).
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.effective_url = Some(url.into());
        self
    }

    pub fn http_version(&self) -> &str { self.http_version.as_str() }
    pub fn version(&self) -> HttpVersion { self.http_version }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn into_body(self) -> Bytes { self.body }
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();
        for header in &self.headers {
            if let Some((key, value)) = header.split_once(':') {
                if key.trim().to_lowercase() == name_lower {
                    return Some(value.trim());
                }
            }
        }
        None
    }

    pub fn content_type(&self) -> Option<&str> { self.get_header("Content-Type") }

    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| Error::http_protocol(format!("UTF-8 decode error: {}", e)))
    }
}
