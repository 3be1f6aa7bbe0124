//! Session configuration.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use singlestore_auth::{AuthOptions, BoxError, Credentials, HostInfo, PasswordProvider};
use singlestore_tls::{ClientAuth, TlsConfig};

use crate::error::Error;
use crate::proxy::ProxyDetector;

/// Default SingleStore port.
pub const DEFAULT_PORT: u16 = 3306;

/// Default number of prepared statements cached per session.
pub const DEFAULT_STATEMENT_CACHE_SIZE: usize = 256;

/// How the session reaches the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionProtocol {
    /// TCP to each configured host in turn.
    #[default]
    Tcp,
    /// Unix domain socket at the given path.
    Unix(PathBuf),
    /// Windows named pipe with the given name.
    NamedPipe(String),
}

/// Supplies a client certificate at connect time.
///
/// Used when no certificate is configured in [`TlsConfig`].
#[async_trait]
pub trait ClientCertificateProvider: Send + Sync {
    /// Produce the certificate chain and private key.
    async fn provide_client_certificate(&self) -> Result<ClientAuth, BoxError>;
}

/// Timeouts for the phases of a session's life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Time to open the transport and finish the handshake (default: 15s).
    pub connect_timeout: Duration,
    /// Default timeout for command execution; `None` waits forever (default: 30s).
    pub command_timeout: Option<Duration>,
    /// Timeout for the out-of-band connection that kills a running query (default: 2s).
    pub cancellation_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            command_timeout: Some(Duration::from_secs(30)),
            cancellation_timeout: Duration::from_secs(2),
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the command timeout; `None` disables it.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the timeout used by the kill-query connection.
    #[must_use]
    pub fn cancellation_timeout(mut self, timeout: Duration) -> Self {
        self.cancellation_timeout = timeout;
        self
    }
}

/// Configuration for a SingleStore session.
///
/// This struct is marked `#[non_exhaustive]`; build it with [`Config::new()`]
/// and the builder methods.
#[derive(Clone)]
#[non_exhaustive]
pub struct Config {
    /// Host names or IP addresses, tried in order.
    pub hosts: Vec<String>,

    /// Server port (default: 3306).
    pub port: u16,

    /// Transport used to reach the server.
    pub protocol: ConnectionProtocol,

    /// User name and password.
    pub credentials: Credentials,

    /// Initial database.
    pub database: Option<String>,

    /// TLS configuration.
    pub tls: TlsConfig,

    /// Request the compressed protocol when the server offers it.
    pub use_compression: bool,

    /// Allow asking the server for its RSA public key over an insecure channel.
    pub allow_public_key_retrieval: bool,

    /// File holding the server's RSA public key.
    pub server_rsa_public_key_file: Option<PathBuf>,

    /// Reported to the server as the `program_name` connection attribute.
    pub application_name: String,

    /// Extra connection attributes as `key:value` pairs separated by commas.
    pub connection_attributes: String,

    /// Enable `SO_KEEPALIVE` on TCP sockets.
    pub keepalive: bool,

    /// Query the server for its real version and connection id after login.
    pub fetch_server_details: bool,

    /// Decides whether the server sits behind a proxy that hides its identity.
    pub proxy_detector: Option<Arc<dyn ProxyDetector>>,

    /// Supplies the password when none is configured.
    pub password_provider: Option<Arc<dyn PasswordProvider>>,

    /// Supplies the client certificate when none is configured.
    pub client_certificate_provider: Option<Arc<dyn ClientCertificateProvider>>,

    /// Maximum number of prepared statements kept per session; `0` disables eviction.
    pub statement_cache_size: usize,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost".to_string()],
            port: DEFAULT_PORT,
            protocol: ConnectionProtocol::Tcp,
            credentials: Credentials::new("", ""),
            database: None,
            tls: TlsConfig::default(),
            use_compression: false,
            allow_public_key_retrieval: false,
            server_rsa_public_key_file: None,
            application_name: String::new(),
            connection_attributes: String::new(),
            keepalive: false,
            fetch_server_details: true,
            proxy_detector: None,
            password_provider: None,
            client_certificate_provider: None,
            statement_cache_size: DEFAULT_STATEMENT_CACHE_SIZE,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("hosts", &self.hosts)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("credentials", &self.credentials)
            .field("database", &self.database)
            .field("tls", &self.tls)
            .field("use_compression", &self.use_compression)
            .field("allow_public_key_retrieval", &self.allow_public_key_retrieval)
            .field("server_rsa_public_key_file", &self.server_rsa_public_key_file)
            .field("application_name", &self.application_name)
            .field("connection_attributes", &self.connection_attributes)
            .field("keepalive", &self.keepalive)
            .field("fetch_server_details", &self.fetch_server_details)
            .field("proxy_detector", &self.proxy_detector.is_some())
            .field("password_provider", &self.password_provider.is_some())
            .field(
                "client_certificate_provider",
                &self.client_certificate_provider.is_some(),
            )
            .field("statement_cache_size", &self.statement_cache_size)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.hosts = vec![host.into()];
        self
    }

    /// Set the hosts to try, in order.
    #[must_use]
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Set the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Connect over a Unix domain socket.
    #[must_use]
    pub fn unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.protocol = ConnectionProtocol::Unix(path.into());
        self
    }

    /// Connect over a Windows named pipe.
    #[must_use]
    pub fn named_pipe(mut self, name: impl Into<String>) -> Self {
        self.protocol = ConnectionProtocol::NamedPipe(name.into());
        self
    }

    /// Set the user name and password.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the TLS configuration.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Request the compressed protocol.
    #[must_use]
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.use_compression = enabled;
        self
    }

    /// Allow retrieving the server's RSA public key.
    #[must_use]
    pub fn allow_public_key_retrieval(mut self, allow: bool) -> Self {
        self.allow_public_key_retrieval = allow;
        self
    }

    /// Read the server's RSA public key from a file.
    #[must_use]
    pub fn server_rsa_public_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_rsa_public_key_file = Some(path.into());
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set extra connection attributes, e.g. `"team:billing,region:eu"`.
    #[must_use]
    pub fn connection_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.connection_attributes = attributes.into();
        self
    }

    /// Enable or disable TCP keepalive.
    #[must_use]
    pub fn keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }

    /// Enable or disable the post-login server details query.
    #[must_use]
    pub fn fetch_server_details(mut self, fetch: bool) -> Self {
        self.fetch_server_details = fetch;
        self
    }

    /// Set the proxy detector.
    #[must_use]
    pub fn proxy_detector(mut self, detector: Arc<dyn ProxyDetector>) -> Self {
        self.proxy_detector = Some(detector);
        self
    }

    /// Set the password provider.
    #[must_use]
    pub fn password_provider(mut self, provider: Arc<dyn PasswordProvider>) -> Self {
        self.password_provider = Some(provider);
        self
    }

    /// Set the client certificate provider.
    #[must_use]
    pub fn client_certificate_provider(
        mut self,
        provider: Arc<dyn ClientCertificateProvider>,
    ) -> Self {
        self.client_certificate_provider = Some(provider);
        self
    }

    /// Set the prepared-statement cache size.
    #[must_use]
    pub fn statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    /// Set the timeout configuration.
    #[must_use]
    pub fn timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Check the configuration for values no connection could succeed with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.protocol == ConnectionProtocol::Tcp && self.hosts.iter().all(|h| h.trim().is_empty())
        {
            return Err(Error::Config("at least one host is required".into()));
        }
        if self.timeouts.connect_timeout.is_zero() {
            return Err(Error::Config("connect timeout must be positive".into()));
        }
        for pair in self.connection_attributes.split(',').filter(|p| !p.is_empty()) {
            if !pair.contains(':') {
                return Err(Error::Config(format!(
                    "invalid connection attribute '{pair}'; expected key:value"
                )));
            }
        }
        Ok(())
    }

    /// Options passed to the authenticator.
    #[must_use]
    pub fn auth_options(&self) -> AuthOptions {
        AuthOptions {
            server_rsa_public_key_file: self.server_rsa_public_key_file.clone(),
            allow_public_key_retrieval: self.allow_public_key_retrieval,
        }
    }

    /// Details of `host` passed to the password provider.
    #[must_use]
    pub fn host_info(&self, host: &str) -> HostInfo {
        HostInfo {
            host: host.to_string(),
            port: self.port,
            user: self.credentials.username().to_string(),
            database: self.database.clone(),
        }
    }
}
