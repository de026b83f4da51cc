//! Certificate issuer policy for protected hosts.
//!
//! Some hosts must only be reached through certificates issued by a known set
//! of CAs. The check runs on the leaf certificate right after the handshake
//! and fails closed: a protected host without a leaf issuer is rejected.

use std::collections::HashSet;
use std::fmt;

use crate::error::{Error, Result};

/// Decides which hosts need an issuer check and which issuers are acceptable.
pub trait IssuerPolicy: Send + Sync {
    /// Whether connections to `host` must pass the issuer check.
    fn is_protected(&self, host: &str) -> bool;

    /// Whether a leaf certificate issued by `issuer` is acceptable.
    fn is_allowed_issuer(&self, issuer: &str) -> bool;
}

/// Policy that protects nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIssuerPolicy;

impl IssuerPolicy for NoIssuerPolicy {
    fn is_protected(&self, _host: &str) -> bool {
        false
    }

    fn is_allowed_issuer(&self, _issuer: &str) -> bool {
        true
    }
}

/// Protected hostnames plus allowed issuer-name substrings.
///
/// ```
/// use veil::policy::{AllowListPolicy, IssuerPolicy};
///
/// let policy = AllowListPolicy::new()
///     .protect_host("shop.example")
///     .allow_issuer("DigiCert");
///
/// assert!(policy.is_protected("SHOP.example"));
/// assert!(policy.is_allowed_issuer("C=US, O=DigiCert Inc, CN=DigiCert TLS RSA SHA256 2020 CA1"));
/// assert!(!policy.is_allowed_issuer("CN=Fake CA"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct AllowListPolicy {
    protected: HashSet<String>,
    allowed_issuers: Vec<String>,
}

impl AllowListPolicy {
    /// Create an empty policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the issuer check for `host` (case-insensitive).
    pub fn protect_host(mut self, host: impl Into<String>) -> Self {
        self.protected.insert(host.into().to_ascii_lowercase());
        self
    }

    /// Require the issuer check for every host in `hosts`.
    pub fn protect_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for host in hosts {
            self = self.protect_host(host);
        }
        self
    }

    /// Accept leaf certificates whose issuer name contains `fragment`.
    pub fn allow_issuer(mut self, fragment: impl Into<String>) -> Self {
        self.allowed_issuers.push(fragment.into());
        self
    }
}

impl IssuerPolicy for AllowListPolicy {
    fn is_protected(&self, host: &str) -> bool {
        self.protected.contains(&host.to_ascii_lowercase())
    }

    fn is_allowed_issuer(&self, issuer: &str) -> bool {
        self.allowed_issuers
            .iter()
            .any(|fragment| issuer.contains(fragment.as_str()))
    }
}

/// Outcome of running the issuer check for one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Host is not protected; any issuer is accepted.
    Unprotected,
    /// Host is protected and the issuer is on the allow-list.
    Allowed,
    /// Host is protected but the check was disabled by configuration.
    Bypassed,
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unprotected => "unprotected",
            Self::Allowed => "allowed",
            Self::Bypassed => "bypassed",
        })
    }
}

/// Run `policy` against the leaf issuer presented by `host`.
pub(crate) fn check_issuer(
    policy: &dyn IssuerPolicy,
    host: &str,
    issuer: Option<&str>,
    bypass: bool,
) -> Result<PolicyDecision> {
    if !policy.is_protected(host) {
        return Ok(PolicyDecision::Unprotected);
    }

    if bypass {
        tracing::warn!(
            host,
            issuer = issuer.unwrap_or("<none>"),
            "issuer policy disabled by configuration; accepting protected host"
        );
        return Ok(PolicyDecision::Bypassed);
    }

    match issuer {
        Some(issuer) if policy.is_allowed_issuer(issuer) => Ok(PolicyDecision::Allowed),
        other => {
            let issuer = other.unwrap_or("<none>").to_string();
            tracing::warn!(host, %issuer, "certificate issuer rejected for protected host");
            Err(Error::PolicyViolation {
                host: host.to_string(),
                issuer,
            })
        }
    }
}
