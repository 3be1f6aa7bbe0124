//! # singlestore-auth
//!
//! Authentication for SingleStore connections.
//!
//! This crate holds the password scrambles, RSA password encryption and the
//! plugin-switch state machine. It performs no IO of its own: the session
//! implements [`AuthChannel`] and the [`Authenticator`] drives the exchange
//! over it.
//!
//! ## Supported plugins
//!
//! | Plugin | Insecure channel | Secure channel |
//! |--------|------------------|----------------|
//! | `mysql_native_password` | SHA-1 scramble | SHA-1 scramble |
//! | `caching_sha2_password` | scramble, then RSA on full auth | scramble, then clear text |
//! | `sha256_password` | RSA-encrypted password | clear text |
//! | `mysql_clear_password` | rejected | clear text |
//! | `mysql_old_password` | rejected | rejected |
//! | `client_ed25519`, `auth_gssapi_client` | via [`install_plugin`] | via [`install_plugin`] |
//!
//! The RSA public key comes from a configured file, or from the server when
//! public key retrieval is allowed.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod authenticator;
pub mod credentials;
pub mod error;
pub mod plugin;
pub mod provider;
pub mod rsa_key;
pub mod scramble;

pub use authenticator::{AuthChannel, AuthOptions, Authenticator};
pub use credentials::Credentials;
pub use error::AuthError;
pub use plugin::{AuthPlugin, ExternalAuthPlugin, install_plugin, registered_plugin};
pub use provider::{BoxError, HostInfo, PasswordProvider, resolve_credentials};
