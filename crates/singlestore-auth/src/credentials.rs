//! Credential types for authentication.

use std::borrow::Cow;

/// User name and password for the handshake.
///
/// Credentials are designed to minimize copying of sensitive data.
#[derive(Clone, Default)]
pub struct Credentials {
    username: Cow<'static, str>,
    password: Cow<'static, str>,
}

impl Credentials {
    /// Create credentials from a user name and password.
    pub fn new(
        username: impl Into<Cow<'static, str>>,
        password: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The user name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password; empty when none is configured.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Whether a non-empty password is configured.
    #[must_use]
    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    /// Replace the password, e.g. with one obtained from a provider.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<Cow<'static, str>>) -> Self {
        self.password = password.into();
        self
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose sensitive data in debug output
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}
