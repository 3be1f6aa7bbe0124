//! TLS connector for establishing encrypted connections.

use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{AlertDescription, ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::certificates::{load_ca_file, resolve_client_certificate};
use crate::config::{ClientAuth, SslMode, TlsConfig};
use crate::error::TlsError;
use crate::verifier::{AcceptAnyServerCert, ChainOnlyVerifier, webpki_verifier};

// =============================================================================
// TLS Connector
// =============================================================================

/// TLS connector for SingleStore connections.
///
/// The upgrade happens in the middle of the handshake conversation: after the
/// client sends the SSL request, the same socket is handed to
/// [`TlsConnector::connect`].
pub struct TlsConnector {
    config: TlsConfig,
    inner: TokioTlsConnector,
    has_client_auth: bool,
}

impl TlsConnector {
    /// Create a new TLS connector with the given configuration.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        let client_auth = config
            .client_certificate
            .as_ref()
            .map(resolve_client_certificate)
            .transpose()?;
        let has_client_auth = client_auth.is_some();
        let client_config = Self::build_client_config(&config, client_auth)?;
        let inner = TokioTlsConnector::from(Arc::new(client_config));

        Ok(Self {
            config,
            inner,
            has_client_auth,
        })
    }

    fn provider() -> Arc<CryptoProvider> {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    /// Build the rustls client configuration.
    fn build_client_config(
        config: &TlsConfig,
        client_auth: Option<ClientAuth>,
    ) -> Result<ClientConfig, TlsError> {
        let provider = Self::provider();
        let versions = config.versions.to_rustls()?;
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&versions)
            .map_err(|e| TlsError::Configuration(format!("failed to set TLS versions: {e}")))?;

        let builder = match config.ssl_mode {
            SslMode::None | SslMode::Preferred | SslMode::Required => {
                tracing::debug!(
                    ssl_mode = ?config.ssl_mode,
                    "server certificate will not be validated"
                );
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(provider)))
            }
            SslMode::VerifyCa => {
                let verifier = webpki_verifier(Self::build_root_store(config)?, provider)?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(ChainOnlyVerifier::new(verifier)))
            }
            SslMode::VerifyFull => {
                let verifier = webpki_verifier(Self::build_root_store(config)?, provider)?;
                builder.with_webpki_verifier(verifier)
            }
        };

        match client_auth {
            Some(auth) => builder
                .with_client_auth_cert(auth.certificates.clone(), auth.key.clone_key())
                .map_err(|e| TlsError::Configuration(format!("client auth setup failed: {e}"))),
            None => Ok(builder.with_no_client_auth()),
        }
    }

    /// Build the root certificate store: the Mozilla roots plus any
    /// configured CA bundle and in-memory roots.
    fn build_root_store(config: &TlsConfig) -> Result<RootCertStore, TlsError> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut extra = config.root_certificates.clone();
        if let Some(path) = &config.ca_file {
            extra.extend(load_ca_file(path)?);
        }
        let (added, ignored) = root_store.add_parsable_certificates(extra);
        if ignored > 0 {
            tracing::warn!(added, ignored, "some CA certificates could not be used");
        }

        Ok(root_store)
    }

    /// Perform the TLS handshake over `stream`.
    ///
    /// `host` is used for SNI and, under [`SslMode::VerifyFull`], host name
    /// verification, unless the configuration overrides the server name.
    pub async fn connect<S>(&self, stream: S, host: &str) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = self.config.server_name.as_deref().unwrap_or(host);
        let dns_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::InvalidServerName(server_name.to_string()))?;

        tracing::debug!(server_name = %server_name, ssl_mode = ?self.config.ssl_mode, "performing TLS handshake");

        let tls_stream = self
            .inner
            .connect(dns_name, stream)
            .await
            .map_err(|e| self.classify(e))?;

        let (_, session) = tls_stream.get_ref();
        tracing::info!(
            protocol = ?session.protocol_version(),
            cipher_suite = ?session.negotiated_cipher_suite().map(|s| s.suite()),
            "TLS handshake completed"
        );

        Ok(tls_stream)
    }

    /// Map a handshake failure onto the error a caller can act on.
    fn classify(&self, err: std::io::Error) -> TlsError {
        tracing::debug!(error = %err, "TLS handshake failed");
        let rustls_error = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            .cloned();
        match rustls_error {
            Some(
                rustls::Error::AlertReceived(AlertDescription::ProtocolVersion)
                | rustls::Error::PeerIncompatible(_),
            ) => TlsError::UnsupportedVersions(err),
            Some(_) => TlsError::Authentication(err),
            None if self.has_client_auth => TlsError::ClientCertificateRejected(err),
            None => TlsError::Io(err),
        }
    }

    /// Whether a client certificate is presented.
    #[must_use]
    pub fn has_client_auth(&self) -> bool {
        self.has_client_auth
    }

    /// Get the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .field("has_client_auth", &self.has_client_auth)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::TlsVersions;

    #[test]
    fn test_default_config() {
        assert!(TlsConnector::new(TlsConfig::default()).is_ok());
    }

    #[test]
    fn test_each_mode_builds() {
        for mode in [
            SslMode::Preferred,
            SslMode::Required,
            SslMode::VerifyCa,
            SslMode::VerifyFull,
        ] {
            let connector = TlsConnector::new(TlsConfig::new().ssl_mode(mode)).unwrap();
            assert!(!connector.has_client_auth());
        }
    }

    #[test]
    fn test_legacy_only_versions_rejected() {
        let config = TlsConfig::new().versions(TlsVersions::TLS10 | TlsVersions::TLS11);
        assert!(matches!(
            TlsConnector::new(config),
            Err(TlsError::NoCompatibleVersions)
        ));
    }

    #[test]
    fn test_missing_ca_file() {
        let config = TlsConfig::new()
            .ssl_mode(SslMode::VerifyCa)
            .ca_file("/nonexistent/bundle.pem");
        assert!(matches!(
            TlsConnector::new(config),
            Err(TlsError::CaFileNotFound(_))
        ));
    }

    #[test]
    fn test_classify_plain_io() {
        let connector = TlsConnector::new(TlsConfig::default()).unwrap();
        let err = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        assert!(matches!(connector.classify(err), TlsError::Io(_)));
    }

    #[test]
    fn test_classify_version_alert() {
        let connector = TlsConnector::new(TlsConfig::default()).unwrap();
        let err = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::AlertReceived(AlertDescription::ProtocolVersion),
        );
        let classified = connector.classify(err);
        assert!(matches!(classified, TlsError::UnsupportedVersions(_)));
        assert_eq!(
            classified.to_string(),
            "The server doesn't support the client's specified TLS versions."
        );
    }

    #[test]
    fn test_classify_certificate_error() {
        let connector = TlsConnector::new(TlsConfig::default()).unwrap();
        let err = std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        assert_eq!(
            connector.classify(err).to_string(),
            "SSL Authentication Error"
        );
    }
}
