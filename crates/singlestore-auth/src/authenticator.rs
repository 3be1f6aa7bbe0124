//! The authentication exchange that follows the handshake response.
//!
//! The [`Authenticator`] knows the password and the current challenge and
//! drives plugin switches over an [`AuthChannel`]. The channel is the session:
//! it frames payloads, keeps the packet sequence running and turns server ERR
//! payloads into errors, so the exchange here only ever sees the bytes that
//! matter to the plugin.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use mysql_protocol::auth::{caching_sha2_status, public_key_request};
use mysql_protocol::{AuthMoreData, AuthSwitchRequest, sentinel};

use crate::error::AuthError;
use crate::plugin::{AuthPlugin, registered_plugin};
use crate::rsa_key::{encrypt_password, read_public_key_file};
use crate::scramble::{caching_sha2, clear_password, native_password, trim_zero_byte};

/// The link the exchange runs over.
#[async_trait]
pub trait AuthChannel: Send {
    /// Error type of the channel; authentication failures convert into it.
    type Error: From<AuthError> + Send;

    /// Send one payload as a reply within the current conversation.
    async fn send_auth_data(&mut self, payload: Bytes) -> Result<(), Self::Error>;

    /// Receive the next payload. A server ERR payload must come back as `Err`.
    async fn receive_auth_data(&mut self) -> Result<Bytes, Self::Error>;

    /// Whether the transport is encrypted.
    fn is_secure(&self) -> bool;
}

/// Options that affect how the password may be sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthOptions {
    /// PEM file holding the server's RSA public key.
    pub server_rsa_public_key_file: Option<PathBuf>,
    /// Allow asking the server for its RSA public key over an insecure link.
    pub allow_public_key_retrieval: bool,
}

/// Drives one authentication exchange.
pub struct Authenticator {
    password: String,
    options: AuthOptions,
    challenge: Bytes,
}

impl Authenticator {
    /// Create an authenticator seeded with the challenge from the initial
    /// handshake.
    pub fn new(password: impl Into<String>, options: AuthOptions, challenge: Bytes) -> Self {
        Self {
            password: password.into(),
            options,
            challenge,
        }
    }

    /// The current challenge. Native switches and RSA exchanges replace it.
    #[must_use]
    pub fn challenge(&self) -> &[u8] {
        &self.challenge
    }

    /// Plugin name and auth response for the handshake response.
    ///
    /// `caching_sha2_password` answers with its scramble; every other
    /// starting plugin answers with the native hash and lets the server
    /// switch if it disagrees.
    #[must_use]
    pub fn initial_response(&self, plugin: &AuthPlugin) -> (&'static str, Vec<u8>) {
        match plugin {
            AuthPlugin::CachingSha2Password => (
                AuthPlugin::CACHING_SHA2_PASSWORD,
                caching_sha2(trim_zero_byte(&self.challenge), &self.password),
            ),
            _ => (
                AuthPlugin::NATIVE_PASSWORD,
                native_password(&self.challenge, &self.password),
            ),
        }
    }

    /// Native hash of the password with the current challenge, used to
    /// re-authenticate optimistically with a change-user command.
    #[must_use]
    pub fn native_response(&self) -> Vec<u8> {
        native_password(&self.challenge, &self.password)
    }

    /// Continue the exchange from the first reply to the handshake response
    /// and return the final payload, which the caller verifies as OK.
    pub async fn complete<C: AuthChannel>(
        &mut self,
        channel: &mut C,
        initial: &AuthPlugin,
        reply: Bytes,
    ) -> Result<Bytes, C::Error> {
        let mut payload = reply;
        if *initial == AuthPlugin::CachingSha2Password
            && payload.first() == Some(&sentinel::AUTH_MORE_DATA)
        {
            let challenge = self.challenge.clone();
            payload = self
                .caching_sha2_outcome(channel, AuthPlugin::CACHING_SHA2_PASSWORD, &challenge, payload)
                .await?;
        }
        while payload.first() == Some(&sentinel::EOF) {
            payload = self.switch(channel, payload).await?;
        }
        Ok(payload)
    }

    /// Answer one authentication switch request and return the server's reply.
    pub async fn switch<C: AuthChannel>(
        &mut self,
        channel: &mut C,
        payload: Bytes,
    ) -> Result<Bytes, C::Error> {
        let request = AuthSwitchRequest::decode(&mut payload.clone()).map_err(AuthError::from)?;
        tracing::debug!(plugin = %request.plugin_name, "switching authentication method");

        match AuthPlugin::from_name(&request.plugin_name) {
            AuthPlugin::NativePassword => {
                self.challenge = request.data;
                let response = native_password(&self.challenge, &self.password);
                self.send_and_receive(channel, response).await
            }
            AuthPlugin::ClearPassword => {
                if !channel.is_secure() {
                    tracing::warn!(plugin = %request.plugin_name, "plugin requires a secure connection");
                    return Err(AuthError::RequiresSecureConnection(request.plugin_name).into());
                }
                let response = clear_password(&self.password);
                self.send_and_receive(channel, response).await
            }
            AuthPlugin::CachingSha2Password => {
                let response = caching_sha2(trim_zero_byte(&request.data), &self.password);
                channel.send_auth_data(Bytes::from(response)).await?;
                let reply = channel.receive_auth_data().await?;
                // An empty password can be accepted without the status byte.
                if reply.first() == Some(&sentinel::OK) {
                    return Ok(reply);
                }
                self.caching_sha2_outcome(
                    channel,
                    AuthPlugin::CACHING_SHA2_PASSWORD,
                    &request.data,
                    reply,
                )
                .await
            }
            AuthPlugin::Sha256Password => {
                self.full_authentication(channel, AuthPlugin::SHA256_PASSWORD, &request.data)
                    .await
            }
            AuthPlugin::OldPassword => {
                tracing::warn!("server requested mysql_old_password");
                Err(AuthError::OldPasswordNotSupported.into())
            }
            AuthPlugin::External(name) => {
                let Some(plugin) = registered_plugin(&name) else {
                    tracing::warn!(plugin = %name, "authentication method not available");
                    let err = if name == AuthPlugin::ED25519 || name == AuthPlugin::GSSAPI {
                        AuthError::PluginNotInstalled(name)
                    } else {
                        AuthError::UnsupportedPlugin(name)
                    };
                    return Err(err.into());
                };
                let response = plugin.create_response(&self.password, &request.data)?;
                self.send_and_receive(channel, response).await
            }
        }
    }

    async fn send_and_receive<C: AuthChannel>(
        &self,
        channel: &mut C,
        response: Vec<u8>,
    ) -> Result<Bytes, C::Error> {
        channel.send_auth_data(Bytes::from(response)).await?;
        channel.receive_auth_data().await
    }

    async fn caching_sha2_outcome<C: AuthChannel>(
        &mut self,
        channel: &mut C,
        plugin_name: &str,
        challenge: &Bytes,
        reply: Bytes,
    ) -> Result<Bytes, C::Error> {
        let status = AuthMoreData::decode(&mut reply.clone()).map_err(AuthError::from)?;
        if status.data.first() == Some(&caching_sha2_status::FAST_AUTH_SUCCESS) {
            tracing::trace!("caching_sha2_password fast authentication succeeded");
            return channel.receive_auth_data().await;
        }
        tracing::debug!("caching_sha2_password requires full authentication");
        self.full_authentication(channel, plugin_name, challenge)
            .await
    }

    /// Send the full password: RSA-encrypted over an insecure link, in clear
    /// text otherwise. An empty password always goes in clear text.
    async fn full_authentication<C: AuthChannel>(
        &mut self,
        channel: &mut C,
        plugin_name: &str,
        challenge: &Bytes,
    ) -> Result<Bytes, C::Error> {
        if channel.is_secure() || self.password.is_empty() {
            let response = clear_password(&self.password);
            return self.send_and_receive(channel, response).await;
        }

        let public_key = self.rsa_public_key(channel, plugin_name).await?;
        self.challenge = Bytes::copy_from_slice(trim_zero_byte(challenge));
        let encrypted = encrypt_password(&public_key, &self.password, &self.challenge)?;
        self.send_and_receive(channel, encrypted).await
    }

    async fn rsa_public_key<C: AuthChannel>(
        &self,
        channel: &mut C,
        plugin_name: &str,
    ) -> Result<String, C::Error> {
        if let Some(path) = &self.options.server_rsa_public_key_file {
            return Ok(read_public_key_file(path)?);
        }

        if self.options.allow_public_key_retrieval {
            let request = if plugin_name == AuthPlugin::CACHING_SHA2_PASSWORD {
                public_key_request::CACHING_SHA2
            } else {
                public_key_request::SHA256
            };
            channel
                .send_auth_data(Bytes::copy_from_slice(&[request]))
                .await?;
            let reply = channel.receive_auth_data().await?;
            let key = AuthMoreData::decode(&mut reply.clone()).map_err(AuthError::from)?;
            return Ok(String::from_utf8_lossy(&key.data).into_owned());
        }

        tracing::warn!(plugin = %plugin_name, "no way to obtain the server RSA public key");
        Err(AuthError::PublicKeyUnavailable(plugin_name.to_string()).into())
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("password", &"[REDACTED]")
            .field("options", &self.options)
            .field("challenge_len", &self.challenge.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::{Oaep, RsaPrivateKey};
    use sha1::Sha1;

    use super::*;
    use crate::plugin::{ExternalAuthPlugin, install_plugin};
    use crate::scramble::xor_password;

    const CHALLENGE: &[u8] = b"abcdefghijklmnopqrst\0";
    const OK: &[u8] = &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];

    /// A scripted server: replies are handed out in order, sends are recorded.
    struct Script {
        replies: VecDeque<Bytes>,
        sent: Vec<Bytes>,
        secure: bool,
    }

    impl Script {
        fn new(secure: bool, replies: &[&[u8]]) -> Self {
            Self {
                replies: replies.iter().map(|r| Bytes::copy_from_slice(r)).collect(),
                sent: Vec::new(),
                secure,
            }
        }
    }

    #[async_trait]
    impl AuthChannel for Script {
        type Error = AuthError;

        async fn send_auth_data(&mut self, payload: Bytes) -> Result<(), AuthError> {
            self.sent.push(payload);
            Ok(())
        }

        async fn receive_auth_data(&mut self) -> Result<Bytes, AuthError> {
            Ok(self.replies.pop_front().unwrap())
        }

        fn is_secure(&self) -> bool {
            self.secure
        }
    }

    fn switch(plugin: &str, data: &[u8]) -> Bytes {
        let mut payload = vec![0xFE];
        payload.extend_from_slice(plugin.as_bytes());
        payload.push(0);
        payload.extend_from_slice(data);
        Bytes::from(payload)
    }

    fn authenticator(password: &str, options: AuthOptions) -> Authenticator {
        Authenticator::new(password, options, Bytes::from_static(CHALLENGE))
    }

    #[test]
    fn test_initial_response() {
        let auth = authenticator("pw", AuthOptions::default());
        let (name, response) = auth.initial_response(&AuthPlugin::CachingSha2Password);
        assert_eq!(name, "caching_sha2_password");
        assert_eq!(response, caching_sha2(&CHALLENGE[..20], "pw"));

        let (name, response) = auth.initial_response(&AuthPlugin::Sha256Password);
        assert_eq!(name, "mysql_native_password");
        assert_eq!(response, native_password(CHALLENGE, "pw"));
    }

    #[tokio::test]
    async fn test_immediate_ok() {
        let mut auth = authenticator("pw", AuthOptions::default());
        let mut channel = Script::new(false, &[]);
        let reply = auth
            .complete(&mut channel, &AuthPlugin::NativePassword, Bytes::from_static(OK))
            .await
            .unwrap();
        assert_eq!(&reply[..], OK);
        assert!(channel.sent.is_empty());
    }

    #[tokio::test]
    async fn test_native_switch_updates_challenge() {
        let mut auth = authenticator("pw", AuthOptions::default());
        let mut channel = Script::new(false, &[OK]);
        let new_challenge = b"ABCDEFGHIJKLMNOPQRST";
        auth.complete(
            &mut channel,
            &AuthPlugin::CachingSha2Password,
            switch("mysql_native_password", new_challenge),
        )
        .await
        .unwrap();
        assert_eq!(auth.challenge(), new_challenge);
        assert_eq!(&channel.sent[0][..], native_password(new_challenge, "pw"));
    }

    #[tokio::test]
    async fn test_clear_password_requires_secure_channel() {
        let mut auth = authenticator("pw", AuthOptions::default());
        let mut channel = Script::new(false, &[]);
        let err = auth
            .switch(&mut channel, switch("mysql_clear_password", b""))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Authentication method 'mysql_clear_password' requires a secure connection."
        );

        let mut channel = Script::new(true, &[OK]);
        auth.switch(&mut channel, switch("mysql_clear_password", b""))
            .await
            .unwrap();
        assert_eq!(&channel.sent[0][..], b"pw\0");
    }

    #[tokio::test]
    async fn test_caching_sha2_fast_auth() {
        let mut auth = authenticator("pw", AuthOptions::default());
        let mut channel = Script::new(false, &[&[0x01, 0x03], OK]);
        let reply = auth
            .switch(&mut channel, switch("caching_sha2_password", CHALLENGE))
            .await
            .unwrap();
        assert_eq!(&reply[..], OK);
        assert_eq!(&channel.sent[0][..], caching_sha2(&CHALLENGE[..20], "pw"));
        assert_eq!(channel.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_caching_sha2_initial_continuation() {
        let mut auth = authenticator("pw", AuthOptions::default());
        let mut channel = Script::new(false, &[OK]);
        let reply = auth
            .complete(
                &mut channel,
                &AuthPlugin::CachingSha2Password,
                Bytes::from_static(&[0x01, 0x03]),
            )
            .await
            .unwrap();
        assert_eq!(&reply[..], OK);
        assert!(channel.sent.is_empty());
    }

    #[tokio::test]
    async fn test_caching_sha2_full_auth_secure() {
        let mut auth = authenticator("pw", AuthOptions::default());
        let mut channel = Script::new(true, &[&[0x01, 0x04], OK]);
        auth.switch(&mut channel, switch("caching_sha2_password", CHALLENGE))
            .await
            .unwrap();
        assert_eq!(&channel.sent[1][..], b"pw\0");
    }

    #[tokio::test]
    async fn test_full_auth_insecure_without_key() {
        let mut auth = authenticator("pw", AuthOptions::default());
        let mut channel = Script::new(false, &[&[0x01, 0x04]]);
        let err = auth
            .switch(&mut channel, switch("caching_sha2_password", CHALLENGE))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PublicKeyUnavailable(ref p) if p == "caching_sha2_password"));
        assert!(err.to_string().contains("AllowPublicKeyRetrieval=True"));
    }

    #[tokio::test]
    async fn test_sha256_empty_password_is_sent_clear() {
        let mut auth = authenticator("", AuthOptions::default());
        let mut channel = Script::new(false, &[OK]);
        auth.switch(&mut channel, switch("sha256_password", CHALLENGE))
            .await
            .unwrap();
        assert_eq!(&channel.sent[0][..], b"\0");
    }

    #[tokio::test]
    async fn test_public_key_retrieval() {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let mut key_reply = vec![0x01];
        key_reply.extend_from_slice(pem.as_bytes());

        for (plugin, request_byte, replies) in [
            (
                "caching_sha2_password",
                0x02,
                vec![&[0x01u8, 0x04][..], &key_reply[..], OK],
            ),
            ("sha256_password", 0x01, vec![&key_reply[..], OK]),
        ] {
            let options = AuthOptions {
                allow_public_key_retrieval: true,
                ..AuthOptions::default()
            };
            let mut auth = authenticator("secret", options);
            let mut channel = Script::new(false, &replies);
            auth.switch(&mut channel, switch(plugin, CHALLENGE))
                .await
                .unwrap();

            let sent = &channel.sent;
            let encrypted = sent.last().unwrap();
            assert_eq!(&sent[sent.len() - 2][..], &[request_byte]);
            let decrypted = private.decrypt(Oaep::new::<Sha1>(), encrypted).unwrap();
            assert_eq!(decrypted, xor_password("secret", &CHALLENGE[..20]));
            assert_eq!(auth.challenge(), &CHALLENGE[..20]);
        }
    }

    #[tokio::test]
    async fn test_old_password_rejected() {
        let mut auth = authenticator("pw", AuthOptions::default());
        let mut channel = Script::new(false, &[]);
        let err = auth
            .switch(&mut channel, Bytes::from_static(&[0xFE]))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::OldPasswordNotSupported));
    }

    #[tokio::test]
    async fn test_unknown_and_uninstalled_plugins() {
        let mut auth = authenticator("pw", AuthOptions::default());
        let mut channel = Script::new(false, &[]);
        let err = auth
            .switch(&mut channel, switch("dialog", b""))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Authentication method 'dialog' is not supported.");

        let err = auth
            .switch(&mut channel, switch("auth_gssapi_client", b""))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PluginNotInstalled(_)));
    }

    struct Echo;

    impl ExternalAuthPlugin for Echo {
        fn name(&self) -> &str {
            "test_echo_auth"
        }

        fn create_response(&self, password: &str, challenge: &[u8]) -> Result<Vec<u8>, AuthError> {
            Ok([password.as_bytes(), challenge].concat())
        }
    }

    #[tokio::test]
    async fn test_external_plugin() {
        install_plugin(Arc::new(Echo));
        let mut auth = authenticator("pw", AuthOptions::default());
        let mut channel = Script::new(false, &[OK]);
        auth.switch(&mut channel, switch("test_echo_auth", b"xyz"))
            .await
            .unwrap();
        assert_eq!(&channel.sent[0][..], b"pwxyz");
    }
}
