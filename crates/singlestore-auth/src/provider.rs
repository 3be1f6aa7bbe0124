//! Password provider callback.

use async_trait::async_trait;

use crate::credentials::Credentials;
use crate::error::AuthError;

/// Boxed error returned by user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Connection details passed to a [`PasswordProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Host name being connected to.
    pub host: String,
    /// Port being connected to.
    pub port: u16,
    /// User name from the configuration.
    pub user: String,
    /// Initial database, if any.
    pub database: Option<String>,
}

/// Supplies the password at connect time, for example a short-lived token.
///
/// Called at most once per connection attempt, and only when no password is
/// configured.
#[async_trait]
pub trait PasswordProvider: Send + Sync {
    /// Produce the password for `host`.
    async fn provide_password(&self, host: &HostInfo) -> Result<String, BoxError>;
}

#[async_trait]
impl<F> PasswordProvider for F
where
    F: Fn(&HostInfo) -> Result<String, BoxError> + Send + Sync,
{
    async fn provide_password(&self, host: &HostInfo) -> Result<String, BoxError> {
        self(host)
    }
}

/// Resolve the password for a connection attempt.
///
/// A configured password always wins; otherwise the provider is asked. Any
/// provider failure becomes [`AuthError::CallbackFailed`].
pub async fn resolve_credentials(
    credentials: &Credentials,
    provider: Option<&dyn PasswordProvider>,
    host: &HostInfo,
) -> Result<Credentials, AuthError> {
    match provider {
        Some(provider) if !credentials.has_password() => {
            tracing::debug!(host = %host.host, user = %host.user, "requesting password from provider");
            let password = provider
                .provide_password(host)
                .await
                .map_err(AuthError::CallbackFailed)?;
            Ok(credentials.clone().with_password(password))
        }
        _ => Ok(credentials.clone()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn host() -> HostInfo {
        HostInfo {
            host: "db".into(),
            port: 3306,
            user: "app".into(),
            database: None,
        }
    }

    #[tokio::test]
    async fn test_provider_used_without_password() {
        let provider = |info: &HostInfo| -> Result<String, BoxError> { Ok(format!("token-{}", info.user)) };
        let creds = resolve_credentials(&Credentials::new("app", ""), Some(&provider), &host())
            .await
            .unwrap();
        assert_eq!(creds.password(), "token-app");
    }

    #[tokio::test]
    async fn test_configured_password_wins() {
        let provider = |_: &HostInfo| -> Result<String, BoxError> { Ok("other".into()) };
        let creds = resolve_credentials(&Credentials::new("app", "pw"), Some(&provider), &host())
            .await
            .unwrap();
        assert_eq!(creds.password(), "pw");
    }

    #[tokio::test]
    async fn test_provider_failure_wrapped() {
        let provider = |_: &HostInfo| -> Result<String, BoxError> { Err("vault unavailable".into()) };
        let err = resolve_credentials(&Credentials::new("app", ""), Some(&provider), &host())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CallbackFailed(_)));
    }
}
