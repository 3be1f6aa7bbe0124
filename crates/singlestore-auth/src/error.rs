//! Authentication error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The server asked for a plugin this client does not implement.
    #[error("Authentication method '{0}' is not supported.")]
    UnsupportedPlugin(String),

    /// The server asked for the pre-4.1 password hash.
    #[error(
        "'MySQL Server is requesting the insecure pre-4.1 auth mechanism (mysql_old_password). The user password must be upgraded; see https://dev.mysql.com/doc/refman/5.7/en/account-upgrades.html."
    )]
    OldPasswordNotSupported,

    /// The plugin sends the password in clear text and the channel is not secure.
    #[error("Authentication method '{0}' requires a secure connection.")]
    RequiresSecureConnection(String),

    /// The plugin needs the server RSA key and there is no way to get it.
    #[error(
        "Authentication method '{0}' failed. Either use a secure connection, specify the server's RSA public key with ServerRSAPublicKeyFile, or set AllowPublicKeyRetrieval=True."
    )]
    PublicKeyUnavailable(String),

    /// The configured RSA public key file could not be read.
    #[error("Couldn't load server's RSA public key from '{}'", .path.display())]
    PublicKeyFile {
        /// Configured file.
        path: PathBuf,
        /// Read failure.
        #[source]
        source: std::io::Error,
    },

    /// The RSA public key could not be parsed.
    #[error("Couldn't load server's RSA public key; try using a secure connection instead.")]
    InvalidPublicKey(String),

    /// RSA encryption failed.
    #[error("RSA encryption failed: {0}")]
    Encryption(String),

    /// An installable plugin was requested but has not been registered.
    #[error("Authentication method '{0}' requires a plugin to be installed before connecting.")]
    PluginNotInstalled(String),

    /// A registered plugin failed to produce a response.
    #[error("authentication plugin '{plugin}' failed: {message}")]
    Plugin {
        /// Plugin name.
        plugin: String,
        /// Failure description.
        message: String,
    },

    /// The password provider callback failed.
    #[error("Failed to obtain password via ProvidePasswordCallback")]
    CallbackFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The server sent a payload that does not fit the exchange.
    #[error("protocol error during authentication: {0}")]
    Protocol(#[from] mysql_protocol::ProtocolError),
}

/// Result type for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
