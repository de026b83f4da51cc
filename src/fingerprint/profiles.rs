//! Browser fingerprint profiles.

use super::tls::TlsFingerprint;

/// Handshake identity used for the ClientHello.
///
/// The transport treats the profile as data: it is resolved into a
/// [`TlsFingerprint`] once, when the connector is built.
///
/// Note: Chrome randomizes TLS extension order since v110, so JA3 hashes of
/// real Chrome traffic vary between connections. JA4 sorts extensions and is
/// stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintProfile {
    /// Chrome 131 on macOS.
    #[default]
    Chrome131,
    /// Firefox 133 on macOS.
    Firefox133,
    /// No fingerprinting - use default BoringSSL settings.
    None,
}

impl FingerprintProfile {
    /// Get the TLS fingerprint for this profile.
    pub fn tls_fingerprint(&self) -> TlsFingerprint {
        match self {
            FingerprintProfile::Chrome131 => TlsFingerprint::chrome_131(),
            FingerprintProfile::Firefox133 => TlsFingerprint::firefox_133(),
            FingerprintProfile::None => TlsFingerprint::default(),
        }
    }

    /// Short name used in log events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome131 => "chrome131",
            Self::Firefox133 => "firefox133",
            Self::None => "none",
        }
    }
}
