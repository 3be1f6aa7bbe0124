//! Authentication plugin names and the registry of installable plugins.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::AuthError;

/// An authentication plugin the server can ask for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthPlugin {
    /// `mysql_native_password`: SHA-1 challenge/response.
    NativePassword,
    /// `mysql_clear_password`: password in clear text, secure channels only.
    ClearPassword,
    /// `caching_sha2_password`: SHA-256 scramble with server-side cache.
    CachingSha2Password,
    /// `sha256_password`: RSA-encrypted or clear text password.
    Sha256Password,
    /// `mysql_old_password`: pre-4.1 hash, never supported.
    OldPassword,
    /// Any other plugin, resolved through [`install_plugin`].
    External(String),
}

impl AuthPlugin {
    /// `mysql_native_password`
    pub const NATIVE_PASSWORD: &'static str = "mysql_native_password";
    /// `mysql_clear_password`
    pub const CLEAR_PASSWORD: &'static str = "mysql_clear_password";
    /// `caching_sha2_password`
    pub const CACHING_SHA2_PASSWORD: &'static str = "caching_sha2_password";
    /// `sha256_password`
    pub const SHA256_PASSWORD: &'static str = "sha256_password";
    /// `mysql_old_password`
    pub const OLD_PASSWORD: &'static str = mysql_protocol::OLD_PASSWORD_PLUGIN;
    /// `auth_gssapi_client`
    pub const GSSAPI: &'static str = "auth_gssapi_client";
    /// `client_ed25519`
    pub const ED25519: &'static str = "client_ed25519";

    /// Look up a plugin by its wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            Self::NATIVE_PASSWORD => Self::NativePassword,
            Self::CLEAR_PASSWORD => Self::ClearPassword,
            Self::CACHING_SHA2_PASSWORD => Self::CachingSha2Password,
            Self::SHA256_PASSWORD => Self::Sha256Password,
            Self::OLD_PASSWORD => Self::OldPassword,
            other => Self::External(other.to_string()),
        }
    }

    /// The wire name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::NativePassword => Self::NATIVE_PASSWORD,
            Self::ClearPassword => Self::CLEAR_PASSWORD,
            Self::CachingSha2Password => Self::CACHING_SHA2_PASSWORD,
            Self::Sha256Password => Self::SHA256_PASSWORD,
            Self::OldPassword => Self::OLD_PASSWORD,
            Self::External(name) => name,
        }
    }

    /// Choose the plugin for the handshake response.
    ///
    /// With plugin auth the server names the plugin; otherwise the
    /// secure-connection capability separates native from old passwords.
    /// Only native, SHA-256 and caching SHA-2 may start an exchange; anything
    /// else is rejected up front.
    pub fn for_handshake(
        advertised: Option<&str>,
        plugin_auth: bool,
        secure_connection: bool,
    ) -> Result<Self, AuthError> {
        let plugin = match (plugin_auth, advertised) {
            (true, Some(name)) => Self::from_name(name),
            (true, None) => Self::NativePassword,
            (false, _) if secure_connection => Self::NativePassword,
            (false, _) => Self::OldPassword,
        };
        match plugin {
            Self::NativePassword | Self::Sha256Password | Self::CachingSha2Password => Ok(plugin),
            other => Err(AuthError::UnsupportedPlugin(other.name().to_string())),
        }
    }
}

impl fmt::Display for AuthPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A plugin installed at runtime, such as an Ed25519 or GSSAPI implementation.
pub trait ExternalAuthPlugin: Send + Sync {
    /// The wire name the server uses to request this plugin.
    fn name(&self) -> &str;

    /// Compute the response to the server's challenge.
    fn create_response(&self, password: &str, challenge: &[u8]) -> Result<Vec<u8>, AuthError>;
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn ExternalAuthPlugin>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a plugin; a later registration under the same name replaces the
/// earlier one.
pub fn install_plugin(plugin: Arc<dyn ExternalAuthPlugin>) {
    let name = plugin.name().to_string();
    tracing::debug!(plugin = %name, "installing authentication plugin");
    REGISTRY.write().insert(name, plugin);
}

/// Find a registered plugin by name.
#[must_use]
pub fn registered_plugin(name: &str) -> Option<Arc<dyn ExternalAuthPlugin>> {
    REGISTRY.read().get(name).cloned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Reverse;

    impl ExternalAuthPlugin for Reverse {
        fn name(&self) -> &str {
            "test_reverse_plugin"
        }

        fn create_response(&self, password: &str, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
            let mut out: Vec<u8> = password.bytes().rev().collect();
            out.extend_from_slice(challenge);
            Ok(out)
        }
    }

    #[test]
    fn test_from_name_round_trip() {
        for name in [
            AuthPlugin::NATIVE_PASSWORD,
            AuthPlugin::CLEAR_PASSWORD,
            AuthPlugin::CACHING_SHA2_PASSWORD,
            AuthPlugin::SHA256_PASSWORD,
            AuthPlugin::OLD_PASSWORD,
            AuthPlugin::ED25519,
        ] {
            assert_eq!(AuthPlugin::from_name(name).name(), name);
        }
        assert_eq!(
            AuthPlugin::from_name("client_ed25519"),
            AuthPlugin::External("client_ed25519".into())
        );
    }

    #[test]
    fn test_for_handshake() {
        assert_eq!(
            AuthPlugin::for_handshake(Some("caching_sha2_password"), true, true).unwrap(),
            AuthPlugin::CachingSha2Password
        );
        assert_eq!(
            AuthPlugin::for_handshake(None, false, true).unwrap(),
            AuthPlugin::NativePassword
        );
        assert!(matches!(
            AuthPlugin::for_handshake(None, false, false),
            Err(AuthError::UnsupportedPlugin(name)) if name == "mysql_old_password"
        ));
        let err = AuthPlugin::for_handshake(Some("dialog"), true, true).unwrap_err();
        assert_eq!(err.to_string(), "Authentication method 'dialog' is not supported.");
    }

    #[test]
    fn test_registry() {
        assert!(registered_plugin("test_reverse_plugin").is_none());
        install_plugin(Arc::new(Reverse));
        let plugin = registered_plugin("test_reverse_plugin").unwrap();
        assert_eq!(plugin.create_response("ab", b"!").unwrap(), b"ba!");
    }
}
