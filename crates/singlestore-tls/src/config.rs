//! TLS configuration options.

use std::path::PathBuf;
use std::sync::Arc;

use bitflags::bitflags;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::TlsError;

/// How TLS is negotiated and how strictly the server certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SslMode {
    /// Never use TLS.
    None,
    /// Use TLS if the server supports it; accept any certificate.
    #[default]
    Preferred,
    /// Always use TLS; accept any certificate.
    Required,
    /// Always use TLS; verify the chain but not the host name.
    VerifyCa,
    /// Always use TLS; verify the chain and the host name.
    VerifyFull,
}

impl SslMode {
    /// Decide whether to upgrade, given whether the server advertises SSL.
    ///
    /// Returns an error when TLS is mandatory and the server cannot provide it.
    pub fn should_negotiate(self, server_supports_ssl: bool) -> Result<bool, TlsError> {
        match self {
            Self::None => Ok(false),
            Self::Preferred => Ok(server_supports_ssl),
            Self::Required | Self::VerifyCa | Self::VerifyFull => {
                if server_supports_ssl {
                    Ok(true)
                } else {
                    Err(TlsError::ServerDoesNotSupportSsl)
                }
            }
        }
    }

    /// Whether the server certificate chain is validated.
    #[must_use]
    pub fn verifies_chain(self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }

    /// Whether the server host name is validated.
    #[must_use]
    pub fn verifies_host_name(self) -> bool {
        matches!(self, Self::VerifyFull)
    }
}

bitflags! {
    /// Set of TLS protocol versions the client may offer.
    ///
    /// An empty set means "client default" (TLS 1.2 and 1.3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TlsVersions: u8 {
        /// TLS 1.0
        const TLS10 = 0x01;
        /// TLS 1.1
        const TLS11 = 0x02;
        /// TLS 1.2
        const TLS12 = 0x04;
        /// TLS 1.3
        const TLS13 = 0x08;

        /// The pre-1.2 versions.
        const LEGACY = Self::TLS10.bits() | Self::TLS11.bits();
    }
}

impl TlsVersions {
    /// Whether at least one version in the set can be negotiated by rustls.
    #[must_use]
    pub fn is_negotiable(self) -> bool {
        self.is_empty() || self.intersects(Self::TLS12 | Self::TLS13)
    }

    /// The rustls protocol versions for this set.
    pub fn to_rustls(self) -> Result<Vec<&'static rustls::SupportedProtocolVersion>, TlsError> {
        if self.is_empty() {
            return Ok(vec![&rustls::version::TLS13, &rustls::version::TLS12]);
        }
        let mut versions = Vec::with_capacity(2);
        if self.contains(Self::TLS13) {
            versions.push(&rustls::version::TLS13);
        }
        if self.contains(Self::TLS12) {
            versions.push(&rustls::version::TLS12);
        }
        if versions.is_empty() {
            return Err(TlsError::NoCompatibleVersions);
        }
        Ok(versions)
    }
}

/// Client authentication credentials for mutual TLS.
///
/// This is wrapped in an Arc because `PrivateKeyDer` doesn't implement Clone.
#[derive(Clone)]
pub struct ClientAuth {
    /// Client certificate chain.
    pub certificates: Vec<CertificateDer<'static>>,
    /// Client private key.
    pub key: Arc<PrivateKeyDer<'static>>,
}

impl ClientAuth {
    /// Create new client authentication credentials.
    pub fn new(certificates: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self {
            certificates,
            key: Arc::new(key),
        }
    }
}

impl std::fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAuth")
            .field("certificates_count", &self.certificates.len())
            .field("has_key", &true)
            .finish()
    }
}

/// Where the client certificate comes from.
#[derive(Clone)]
pub enum ClientCertificate {
    /// A PEM certificate chain and a PEM private key.
    Pem {
        /// Certificate chain file.
        certificate_file: PathBuf,
        /// Private key file.
        key_file: PathBuf,
    },
    /// A PKCS#12 (.pfx) archive holding the certificate and its private key.
    Pkcs12 {
        /// Archive file.
        file: PathBuf,
        /// Archive password; `None` for an unprotected archive.
        password: Option<String>,
    },
    /// Credentials already loaded in memory.
    Loaded(ClientAuth),
}

impl std::fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pem {
                certificate_file,
                key_file,
            } => f
                .debug_struct("Pem")
                .field("certificate_file", certificate_file)
                .field("key_file", key_file)
                .finish(),
            Self::Pkcs12 { file, password } => f
                .debug_struct("Pkcs12")
                .field("file", file)
                .field("password", &password.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            Self::Loaded(auth) => f.debug_tuple("Loaded").field(auth).finish(),
        }
    }
}

/// TLS configuration for SingleStore connections.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    /// Negotiation and verification mode.
    pub ssl_mode: SslMode,

    /// Protocol versions to offer.
    pub versions: TlsVersions,

    /// PEM bundle of extra trusted CA certificates.
    pub ca_file: Option<PathBuf>,

    /// Extra trusted root certificates supplied in memory.
    pub root_certificates: Vec<CertificateDer<'static>>,

    /// Client certificate for mutual TLS.
    pub client_certificate: Option<ClientCertificate>,

    /// Server name for SNI and verification; defaults to the connection host.
    pub server_name: Option<String>,
}

impl TlsConfig {
    /// Create a new TLS configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SSL mode.
    #[must_use]
    pub fn ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl_mode = mode;
        self
    }

    /// Set the TLS versions to offer.
    #[must_use]
    pub fn versions(mut self, versions: TlsVersions) -> Self {
        self.versions = versions;
        self
    }

    /// Trust the CA certificates in a PEM bundle file.
    #[must_use]
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Add a custom root certificate to trust.
    #[must_use]
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.root_certificates.push(cert);
        self
    }

    /// Use a client certificate.
    #[must_use]
    pub fn client_certificate(mut self, certificate: ClientCertificate) -> Self {
        self.client_certificate = Some(certificate);
        self
    }

    /// Set the server name for certificate validation.
    #[must_use]
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Check if client certificate authentication is configured.
    #[must_use]
    pub fn has_client_certificate(&self) -> bool {
        self.client_certificate.is_some()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_should_negotiate() {
        assert!(!SslMode::None.should_negotiate(true).unwrap());
        assert!(SslMode::Preferred.should_negotiate(true).unwrap());
        assert!(!SslMode::Preferred.should_negotiate(false).unwrap());
        assert!(SslMode::Required.should_negotiate(true).unwrap());
        assert!(matches!(
            SslMode::VerifyFull.should_negotiate(false),
            Err(TlsError::ServerDoesNotSupportSsl)
        ));
    }

    #[test]
    fn test_mode_verification() {
        assert!(!SslMode::Required.verifies_chain());
        assert!(SslMode::VerifyCa.verifies_chain());
        assert!(!SslMode::VerifyCa.verifies_host_name());
        assert!(SslMode::VerifyFull.verifies_host_name());
    }

    #[test]
    fn test_versions_to_rustls() {
        assert_eq!(TlsVersions::empty().to_rustls().unwrap().len(), 2);
        let versions = (TlsVersions::TLS11 | TlsVersions::TLS12).to_rustls().unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, rustls::ProtocolVersion::TLSv1_2);
        assert!(matches!(
            TlsVersions::LEGACY.to_rustls(),
            Err(TlsError::NoCompatibleVersions)
        ));
    }

    #[test]
    fn test_is_negotiable() {
        assert!(TlsVersions::empty().is_negotiable());
        assert!(TlsVersions::TLS13.is_negotiable());
        assert!(!TlsVersions::TLS10.is_negotiable());
    }

    #[test]
    fn test_pkcs12_password_redacted() {
        let cert = ClientCertificate::Pkcs12 {
            file: "client.pfx".into(),
            password: Some("hunter2".into()),
        };
        let debug = format!("{cert:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
