//! The server session: one authenticated connection and its lifecycle.
//!
//! ## Connect sequence
//!
//! ```text
//! open transport (each host, each address) → initial handshake
//!   → [SSL request → TLS handshake] → handshake response → auth switches → OK
//!   → [compression] → [server details query] → SET NAMES → Connected
//! ```
//!
//! A failed TLS negotiation may restart the whole sequence with legacy TLS
//! versions; the pool remembers versions learned that way.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use mysql_protocol::command as wire;
use mysql_protocol::error_code::{CLIENT_INTERACTION_TIMEOUT, QUERY_INTERRUPTED};
use mysql_protocol::{
    Capabilities, ChangeUser, ErrPacket, HandshakeResponse, InitialHandshake, OkPacket,
    ServerStatus, ServerVersion, charset, sentinel,
};
use singlestore_auth::scramble::native_password;
use singlestore_auth::{
    AuthChannel, AuthPlugin, Authenticator, Credentials, resolve_credentials,
};
use singlestore_codec::{PayloadHandler, Transport};
use singlestore_tls::{ClientCertificate, TlsConnector, TlsVersions, legacy_retry_versions};
use tokio::net::{TcpSocket, TcpStream};

use crate::attributes;
use crate::cancel::CancelHandle;
use crate::config::{Config, ConnectionProtocol};
use crate::error::{Error, ErrorKind, Result, ServerError};
use crate::metadata::MetadataArena;
use crate::pool::{SessionOwner, SessionPool};
use crate::procedure::ProcedureEntry;
use crate::proxy::{AzureGatewayDetector, ProxyContext, ProxyDetector};
use crate::state::{SessionShared, SessionState};
use crate::statement_cache::StatementCache;

static NEXT_SESSION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

const NOT_CONNECTED: &str = "ServerSession is not connected.";

const SERVER_DETAILS_QUERY: &[u8] =
    b"SELECT CONNECTION_ID(), VERSION(), @@memsql_version, @@aggregator_id;";

fn not_connected() -> Error {
    Error::InvalidOperation(NOT_CONNECTED.into())
}

/// One connection to a SingleStore server.
pub struct Session {
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) config: Arc<Config>,
    handler: Option<PayloadHandler<Transport>>,
    pool: Option<Arc<dyn SessionPool>>,
    pool_generation: u64,
    host: String,
    credentials: Credentials,
    server_capabilities: Capabilities,
    client_capabilities: Capabilities,
    connection_attributes: Option<Bytes>,
    mysql_compat_version: ServerVersion,
    server_version: ServerVersion,
    aggregator_id: i32,
    auth_plugin_data: Bytes,
    character_set: u8,
    pub(crate) no_backslash_escapes: bool,
    database_override: Option<String>,
    pub(crate) statement_cache: StatementCache,
    pub(crate) procedures: HashMap<String, ProcedureEntry>,
    pub(crate) arena: MetadataArena,
    created_at: Instant,
    last_leased_at: Option<Instant>,
    last_returned_at: Option<Instant>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("connection_id", &self.shared.connection_id())
            .field("host", &self.host)
            .field("server_version", &self.server_version)
            .field("pool_generation", &self.pool_generation)
            .field("statement_cache", &self.statement_cache)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(config: Arc<Config>, pool: Option<Arc<dyn SessionPool>>) -> Self {
        let (pool_id, sequence, pool_generation) = match &pool {
            Some(pool) => (pool.id(), pool.next_session_sequence(), pool.generation()),
            None => (0, NEXT_SESSION_SEQUENCE.fetch_add(1, Ordering::Relaxed), 0),
        };
        Self {
            shared: SessionShared::new(format!("{pool_id}.{sequence}")),
            handler: None,
            pool,
            pool_generation,
            host: String::new(),
            credentials: config.credentials.clone(),
            server_capabilities: Capabilities::empty(),
            client_capabilities: Capabilities::empty(),
            connection_attributes: None,
            mysql_compat_version: ServerVersion::empty(),
            server_version: ServerVersion::empty(),
            aggregator_id: -1,
            auth_plugin_data: Bytes::new(),
            character_set: charset::UTF8_GENERAL_CI,
            no_backslash_escapes: false,
            database_override: None,
            statement_cache: StatementCache::new(config.statement_cache_size),
            procedures: HashMap::new(),
            arena: MetadataArena::new(),
            created_at: Instant::now(),
            last_leased_at: None,
            last_returned_at: None,
            config,
        }
    }

    /// Connect and authenticate a standalone session.
    pub async fn connect(config: Config) -> Result<Self> {
        Self::connect_with(Arc::new(config), None).await
    }

    /// Connect and authenticate a session owned by `pool`.
    pub async fn connect_with(
        config: Arc<Config>,
        pool: Option<Arc<dyn SessionPool>>,
    ) -> Result<Self> {
        config.validate()?;
        let mut session = Self::new(config, pool);
        session.shared.lock().await.begin_connect()?;

        let timeout = session.config.timeouts.connect_timeout;
        let outcome = match tokio::time::timeout(timeout, session.establish()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout("Connect Timeout expired.".into())),
        };
        match outcome {
            Ok(()) => Ok(session),
            Err(err) => {
                tracing::debug!(session_id = %session.shared.id, error = %err, "connect failed");
                session.shared.lock().await.set_failed();
                if let Some(mut handler) = session.handler.take() {
                    if let Err(e) = handler.shutdown().await {
                        tracing::trace!(error = %e, "shutdown after failed connect");
                    }
                }
                Err(wrap_connect_error(err))
            }
        }
    }

    async fn establish(&mut self) -> Result<()> {
        let mut versions = self
            .pool
            .as_ref()
            .and_then(|pool| pool.tls_versions())
            .unwrap_or(self.config.tls.versions);
        let mut learned_versions = false;

        loop {
            self.open_transport().await?;
            match self.login(versions).await {
                Ok(()) => break,
                Err(Error::Tls(err)) => {
                    let Some(retry) = legacy_retry_versions(versions, &err) else {
                        return Err(Error::Tls(err));
                    };
                    self.handler = None;
                    versions = retry;
                    learned_versions = true;
                }
                Err(err) => return Err(err),
            }
        }
        if learned_versions {
            if let Some(pool) = &self.pool {
                pool.set_tls_versions(versions);
            }
        }

        if self.should_fetch_server_details() {
            self.load_server_details().await?;
        }
        self.character_set =
            if self.server_version.version() >= ServerVersion::SUPPORTS_UTF8MB4 {
                charset::UTF8MB4_GENERAL_CI
            } else {
                charset::UTF8_GENERAL_CI
            };
        self.send_set_names().await?;

        self.handler_mut()?.set_timeout(None);
        self.shared.lock().await.set(SessionState::Connected);
        tracing::info!(
            session_id = %self.shared.id,
            connection_id = self.shared.connection_id(),
            host = %self.host,
            server_version = %self.server_version,
            secure = self.is_secure(),
            compressed = self.is_compressed(),
            "connected"
        );
        Ok(())
    }

    async fn open_transport(&mut self) -> Result<()> {
        let config = Arc::clone(&self.config);
        let transport = match &config.protocol {
            ConnectionProtocol::Tcp => self.open_tcp().await?,
            ConnectionProtocol::Unix(path) => {
                self.host = "localhost".into();
                open_unix(path).await?
            }
            ConnectionProtocol::NamedPipe(name) => {
                self.host = "localhost".into();
                open_named_pipe(name).await?
            }
        };
        self.handler = Some(PayloadHandler::new(transport));
        Ok(())
    }

    async fn open_tcp(&mut self) -> Result<Transport> {
        let config = Arc::clone(&self.config);
        for host in config.hosts.iter().filter(|h| !h.trim().is_empty()) {
            let addresses: Vec<SocketAddr> =
                match tokio::net::lookup_host((host.as_str(), config.port)).await {
                    Ok(addresses) => addresses.collect(),
                    Err(e) => {
                        tracing::debug!(host = %host, error = %e, "host lookup failed");
                        continue;
                    }
                };
            for address in addresses {
                tracing::debug!(host = %host, ip = %address.ip(), port = config.port, "connecting");
                match connect_socket(address, config.keepalive).await {
                    Ok(stream) => {
                        self.host.clone_from(host);
                        return Ok(Transport::Tcp(stream));
                    }
                    Err(e) => {
                        tracing::debug!(host = %host, ip = %address.ip(), error = %e, "connection attempt failed");
                    }
                }
            }
        }
        Err(Error::unable_to_connect(
            "Unable to connect to any of the specified SingleStore hosts.",
        ))
    }

    async fn login(&mut self, tls_versions: TlsVersions) -> Result<()> {
        let config = Arc::clone(&self.config);
        let payload = self.receive_reply().await?;
        let handshake = InitialHandshake::decode(&mut payload.clone())?;
        let server_capabilities = handshake.capabilities.negotiable();
        let plugin = AuthPlugin::for_handshake(
            handshake.auth_plugin_name.as_deref(),
            server_capabilities.contains(Capabilities::PLUGIN_AUTH),
            server_capabilities.contains(Capabilities::SECURE_CONNECTION),
        )?;

        self.server_capabilities = server_capabilities;
        self.mysql_compat_version = ServerVersion::from_bytes(&handshake.server_version);
        self.shared.set_connection_id(handshake.connection_id);
        self.auth_plugin_data = handshake.auth_plugin_data.clone();
        tracing::debug!(
            session_id = %self.shared.id,
            connection_id = handshake.connection_id,
            server_version = %self.mysql_compat_version,
            plugin = %plugin,
            "received initial handshake"
        );

        let use_tls = config
            .tls
            .ssl_mode
            .should_negotiate(server_capabilities.contains(Capabilities::SSL))?;
        let use_compression =
            config.use_compression && server_capabilities.contains(Capabilities::COMPRESS);
        self.client_capabilities = self.requested_capabilities(use_tls, use_compression);
        self.connection_attributes = self
            .client_capabilities
            .contains(Capabilities::CONNECTION_ATTRIBUTES)
            .then(|| attributes::encode(&config.application_name, &config.connection_attributes));

        if use_tls {
            self.upgrade_tls(tls_versions).await?;
        }

        let credentials = resolve_credentials(
            &config.credentials,
            config.password_provider.as_deref(),
            &config.host_info(&self.host),
        )
        .await?;
        let mut authenticator = Authenticator::new(
            credentials.password(),
            config.auth_options(),
            self.auth_plugin_data.clone(),
        );
        let (plugin_name, auth_response) = authenticator.initial_response(&plugin);
        let response = HandshakeResponse {
            capabilities: self.client_capabilities,
            character_set: charset::UTF8_GENERAL_CI,
            username: credentials.username().to_string(),
            auth_response: Bytes::from(auth_response),
            database: config.database.clone(),
            auth_plugin_name: plugin_name.to_string(),
            connection_attributes: self.connection_attributes.clone(),
        };
        self.send_reply(response.encode_to_bytes()).await?;

        let reply = self.receive_reply().await?;
        let reply = authenticator.complete(self, &plugin, reply).await?;
        self.verify_ok(&reply)?;
        self.auth_plugin_data = Bytes::copy_from_slice(authenticator.challenge());
        self.credentials = credentials;

        if use_compression {
            self.handler_mut()?.enable_compression();
        }
        Ok(())
    }

    fn requested_capabilities(&self, use_tls: bool, use_compression: bool) -> Capabilities {
        let server = self.server_capabilities;
        let mut capabilities = (Capabilities::CLIENT_DEFAULT & server)
            | (server & (Capabilities::CONNECTION_ATTRIBUTES | Capabilities::DEPRECATE_EOF));
        capabilities.remove(Capabilities::LOCAL_FILES);
        if self.config.database.as_deref().is_some_and(|db| !db.is_empty()) {
            capabilities |= Capabilities::CONNECT_WITH_DB;
        }
        if use_tls {
            capabilities |= Capabilities::SSL;
        }
        if use_compression {
            capabilities |= Capabilities::COMPRESS;
        }
        capabilities
    }

    async fn upgrade_tls(&mut self, versions: TlsVersions) -> Result<()> {
        let config = Arc::clone(&self.config);
        let request = HandshakeResponse::encode_ssl_request(
            self.client_capabilities,
            charset::UTF8_GENERAL_CI,
        );
        self.send_reply(request).await?;

        let mut tls = config.tls.clone();
        tls.versions = versions;
        if tls.client_certificate.is_none() {
            if let Some(provider) = &config.client_certificate_provider {
                let auth = provider
                    .provide_client_certificate()
                    .await
                    .map_err(Error::CertificateCallbackFailed)?;
                tls.client_certificate = Some(ClientCertificate::Loaded(auth));
            }
        }
        let connector = TlsConnector::new(tls)?;

        let handler = self.handler.take().ok_or_else(not_connected)?;
        let (transport, sequence) = handler.into_transport()?;
        let stream = connector.connect(transport, &self.host).await?;
        tracing::info!(session_id = %self.shared.id, host = %self.host, ?versions, "TLS negotiated");
        self.handler = Some(PayloadHandler::resume(
            Transport::Tls(Box::new(stream)),
            sequence,
        ));
        Ok(())
    }

    fn should_fetch_server_details(&self) -> bool {
        if self.config.fetch_server_details {
            return true;
        }
        let detector: &dyn ProxyDetector = match &self.config.proxy_detector {
            Some(detector) => detector.as_ref(),
            None => &AzureGatewayDetector,
        };
        detector.is_proxy(&ProxyContext {
            host: &self.host,
            user: self.credentials.username(),
            server_version: self.mysql_compat_version.original(),
            is_tcp: self.config.protocol == ConnectionProtocol::Tcp,
        })
    }

    async fn load_server_details(&mut self) -> Result<()> {
        let payload = wire::encode_query(SERVER_DETAILS_QUERY, self.supports_query_attributes());
        self.send(payload).await?;
        let results = match self.receive_results().await {
            Ok(results) => results,
            Err(Error::Server(err)) => {
                tracing::warn!(
                    session_id = %self.shared.id,
                    code = err.code,
                    message = %err.message,
                    "failed to fetch server details"
                );
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let Some(row) = results.first().and_then(|result| result.rows.first()) else {
            return Ok(());
        };
        if let Some(id) = row.get_i64(0) {
            self.shared.set_connection_id(id as u32);
        }
        if let Some(version) = row.get_str(1) {
            self.mysql_compat_version = ServerVersion::parse(version);
        }
        if let Some(version) = row.get_str(2) {
            self.server_version = ServerVersion::parse(version);
        }
        self.aggregator_id = row.get_i64(3).map_or(-1, |id| id as i32);
        tracing::debug!(
            session_id = %self.shared.id,
            connection_id = self.shared.connection_id(),
            mysql_version = %self.mysql_compat_version,
            server_version = %self.server_version,
            aggregator_id = self.aggregator_id,
            "fetched server details"
        );
        Ok(())
    }

    async fn send_set_names(&mut self) -> Result<()> {
        let sql: &[u8] = if self.character_set == charset::UTF8MB4_GENERAL_CI {
            b"SET NAMES utf8mb4;"
        } else {
            b"SET NAMES utf8;"
        };
        self.send(wire::encode_query(sql, self.supports_query_attributes()))
            .await?;
        let reply = self.receive_reply().await?;
        self.verify_ok(&reply)?;
        Ok(())
    }

    // Payload exchange

    fn handler_mut(&mut self) -> Result<&mut PayloadHandler<Transport>> {
        self.handler.as_mut().ok_or_else(not_connected)
    }

    /// Start a new conversation and send `payload`.
    pub(crate) async fn send(&mut self, payload: Bytes) -> Result<()> {
        self.handler_mut()?.start_new_conversation();
        self.send_reply(payload).await
    }

    /// Send `payload` within the current conversation.
    pub(crate) async fn send_reply(&mut self, payload: Bytes) -> Result<()> {
        self.shared.lock().await.verify_can_communicate()?;
        if let Err(err) = self.handler_mut()?.write_payload(payload).await {
            self.shared.set_failed().await;
            return Err(err.into());
        }
        Ok(())
    }

    /// Receive the next payload; an ERR payload becomes [`Error::Server`].
    pub(crate) async fn receive_reply(&mut self) -> Result<Bytes> {
        self.shared.lock().await.verify_can_communicate()?;
        let payload = match self.handler_mut()?.read_payload().await {
            Ok(payload) => payload,
            Err(err) => {
                self.shared.set_failed().await;
                return Err(err.into());
            }
        };
        if payload.first() == Some(&sentinel::ERROR) {
            let error = ServerError::from(ErrPacket::decode(&mut payload.clone())?);
            if error.code == CLIENT_INTERACTION_TIMEOUT {
                self.shared.set_failed().await;
            }
            return Err(error.into());
        }
        Ok(payload)
    }

    /// Parse an OK payload and track the server's backslash-escape mode.
    pub(crate) fn verify_ok(&mut self, payload: &Bytes) -> Result<OkPacket> {
        let ok = OkPacket::decode(&mut payload.clone())?;
        self.no_backslash_escapes = ok.status.contains(ServerStatus::NO_BACKSLASH_ESCAPES);
        Ok(ok)
    }

    /// Apply `timeout` to each following read and write.
    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.handler_mut()?.set_timeout(timeout);
        Ok(())
    }

    /// The timeout applied to reads and writes, `None` when unbounded or closed.
    pub(crate) fn current_timeout(&self) -> Option<Duration> {
        self.handler.as_ref().and_then(PayloadHandler::timeout)
    }

    /// Put back a timeout saved with [`current_timeout`](Self::current_timeout),
    /// if the transport is still open.
    pub(crate) fn restore_timeout(&mut self, timeout: Option<Duration>) {
        if let Some(handler) = self.handler.as_mut() {
            handler.set_timeout(timeout);
        }
    }

    pub(crate) fn supports_query_attributes(&self) -> bool {
        self.client_capabilities
            .contains(Capabilities::QUERY_ATTRIBUTES)
    }

    pub(crate) fn supports_deprecate_eof(&self) -> bool {
        self.client_capabilities.contains(Capabilities::DEPRECATE_EOF)
    }

    // Session operations

    /// Check the connection with `COM_PING`.
    ///
    /// Returns `false` and leaves the session failed when the transport is
    /// broken or the server has closed the idle session.
    pub async fn try_ping(&mut self) -> Result<bool> {
        self.shared.lock().await.verify_connected()?;
        let outcome = async {
            self.send(wire::encode_ping()).await?;
            let reply = self.receive_reply().await?;
            self.verify_ok(&reply)
        }
        .await;
        match outcome {
            Ok(_) => Ok(true),
            Err(err)
                if err.is_io()
                    || err.kind() == ErrorKind::Timeout
                    || err.is_server_error(CLIENT_INTERACTION_TIMEOUT) =>
            {
                tracing::debug!(session_id = %self.shared.id, error = %err, "ping failed");
                self.shared.set_failed().await;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Reset session state with `COM_RESET_CONNECTION`, then select
    /// `database` if one is given.
    pub async fn reset_connection(&mut self, database: Option<&str>) -> Result<()> {
        if self.server_version.version() < ServerVersion::SUPPORTS_RESET_CONNECTION {
            return Err(Error::InvalidOperation(format!(
                "Resetting connection is not supported in SingleStore {}",
                self.server_version
            )));
        }
        tracing::debug!(session_id = %self.shared.id, "resetting connection");
        self.send(wire::encode_reset_connection()).await?;
        let reply = self.receive_reply().await?;
        self.verify_ok(&reply)?;

        if let Some(database) = database.filter(|db| !db.is_empty()) {
            self.send(wire::encode_init_database(database)).await?;
            let reply = self.receive_reply().await?;
            self.verify_ok(&reply)?;
            self.database_override =
                (self.config.database.as_deref() != Some(database)).then(|| database.to_string());
        } else {
            self.database_override = None;
        }
        Ok(())
    }

    /// Restore the session to its freshly-connected state before reuse.
    ///
    /// Returns `false` when the session should be discarded instead.
    pub async fn try_reset_connection(&mut self) -> Result<bool> {
        match self.reset_for_reuse().await {
            Ok(()) => Ok(true),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::Io
                        | ErrorKind::Timeout
                        | ErrorKind::Disposed
                        | ErrorKind::InvalidOperation
                ) || err.is_server_error(CLIENT_INTERACTION_TIMEOUT) =>
            {
                tracing::warn!(session_id = %self.shared.id, error = %err, "ignoring reset failure");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn reset_for_reuse(&mut self) -> Result<()> {
        self.shared.lock().await.verify_connected()?;
        self.statement_cache.clear();

        if self.database_override.is_none()
            && self.server_version.version() >= ServerVersion::SUPPORTS_RESET_CONNECTION
        {
            self.reset_connection(None).await?;
        } else {
            self.change_user().await?;
        }
        self.send_set_names().await
    }

    async fn change_user(&mut self) -> Result<()> {
        let config = Arc::clone(&self.config);
        let auth_response = native_password(&self.auth_plugin_data, self.credentials.password());
        let request = ChangeUser {
            username: self.credentials.username(),
            auth_response: &auth_response,
            database: config.database.as_deref().unwrap_or(""),
            character_set: self.character_set,
            auth_plugin_name: AuthPlugin::NATIVE_PASSWORD,
            connection_attributes: self.connection_attributes.as_deref(),
        }
        .encode();
        tracing::debug!(session_id = %self.shared.id, "changing user to reset session");
        self.send(request).await?;

        let reply = self.receive_reply().await?;
        let mut authenticator = Authenticator::new(
            self.credentials.password(),
            config.auth_options(),
            self.auth_plugin_data.clone(),
        );
        let reply = authenticator
            .complete(self, &AuthPlugin::NativePassword, reply)
            .await?;
        self.verify_ok(&reply)?;
        self.auth_plugin_data = Bytes::copy_from_slice(authenticator.challenge());
        self.database_override = None;
        Ok(())
    }

    /// Select `database` with `COM_INIT_DB`.
    pub async fn change_database(&mut self, database: &str) -> Result<()> {
        self.shared.lock().await.verify_connected()?;
        self.send(wire::encode_init_database(database)).await?;
        let reply = self.receive_reply().await?;
        self.verify_ok(&reply)?;
        self.database_override = Some(database.to_string());
        Ok(())
    }

    /// The database selected by [`Session::change_database`] or the configuration.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database_override
            .as_deref()
            .or(self.config.database.as_deref())
    }

    /// Close the session.
    ///
    /// A connected or failed session first tries to send `COM_QUIT`; failures
    /// while closing are ignored.
    pub async fn close(&mut self) {
        let send_quit = {
            let mut guard = self.shared.lock().await;
            match guard.state() {
                SessionState::Closed => return,
                SessionState::Connected | SessionState::Failed => {
                    guard.set(SessionState::Closing);
                    true
                }
                _ => false,
            }
        };
        if let Some(handler) = self.handler.as_mut() {
            if send_quit {
                handler.start_new_conversation();
                if let Err(e) = handler.write_payload(wire::encode_quit()).await {
                    tracing::debug!(session_id = %self.shared.id, error = %e, "failed to send quit");
                }
            }
        }
        self.statement_cache.clear();
        if let Some(mut handler) = self.handler.take() {
            if let Err(e) = handler.shutdown().await {
                tracing::trace!(session_id = %self.shared.id, error = %e, "shutdown failed");
            }
        }
        self.shared.lock().await.set(SessionState::Closed);
        tracing::debug!(session_id = %self.shared.id, "session closed");
    }

    // Pool bookkeeping

    /// Record that a pool has handed this session out.
    pub fn mark_leased(&mut self) {
        self.last_leased_at = Some(Instant::now());
    }

    /// Hand the session back to its pool, recording how long it was leased.
    ///
    /// A session without a pool is closed.
    pub async fn return_to_pool(mut self) {
        let now = Instant::now();
        self.last_returned_at = Some(now);
        match self.pool.clone() {
            Some(pool) => {
                if let Some(leased) = self.last_leased_at {
                    pool.record_use_time(now.duration_since(leased));
                }
                tracing::trace!(session_id = %self.shared.id, "returning session to pool");
                pool.return_session(self).await;
            }
            None => self.close().await,
        }
    }

    /// Register the object notified when this session fails.
    pub fn set_owner(&self, owner: Weak<dyn SessionOwner>) {
        self.shared.set_owner(owner);
    }

    /// A handle that can cancel this session's running command from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        let mut config = (*self.config).clone();
        if !self.host.is_empty() {
            config.hosts = vec![self.host.clone()];
        }
        config.fetch_server_details = false;
        config.statement_cache_size = 1;
        config.timeouts.connect_timeout = self.config.timeouts.cancellation_timeout;
        config.timeouts.command_timeout = Some(self.config.timeouts.cancellation_timeout);
        CancelHandle::new(Arc::clone(&self.shared), Arc::new(config))
    }

    // Accessors

    /// Session id, `"{pool_id}.{sequence}"`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SessionState {
        self.shared.state().await
    }

    /// Server connection id.
    #[must_use]
    pub fn connection_id(&self) -> u32 {
        self.shared.connection_id()
    }

    /// The MySQL-compatible version the server reports.
    #[must_use]
    pub fn mysql_compat_version(&self) -> &ServerVersion {
        &self.mysql_compat_version
    }

    /// The native SingleStore version; empty when it was not fetched.
    #[must_use]
    pub fn server_version(&self) -> &ServerVersion {
        &self.server_version
    }

    /// Aggregator id, or `-1` when unknown.
    #[must_use]
    pub fn aggregator_id(&self) -> i32 {
        self.aggregator_id
    }

    /// The host this session connected to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The configuration the session was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Collation id chosen for the session.
    #[must_use]
    pub fn character_set(&self) -> u8 {
        self.character_set
    }

    /// Whether the transport is encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.handler
            .as_ref()
            .is_some_and(|handler| handler.get_ref().is_secure())
    }

    /// Whether the compressed protocol is active.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.handler
            .as_ref()
            .is_some_and(PayloadHandler::is_compressed)
    }

    /// Generation of the pool when this session was created.
    #[must_use]
    pub fn pool_generation(&self) -> u64 {
        self.pool_generation
    }

    /// When the session was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When a pool last handed the session out.
    #[must_use]
    pub fn last_leased_at(&self) -> Option<Instant> {
        self.last_leased_at
    }

    /// When the session was last returned to its pool.
    #[must_use]
    pub fn last_returned_at(&self) -> Option<Instant> {
        self.last_returned_at
    }

    /// Number of cached prepared commands.
    #[must_use]
    pub fn prepared_statement_count(&self) -> usize {
        self.statement_cache.len()
    }
}

#[async_trait]
impl AuthChannel for Session {
    type Error = Error;

    async fn send_auth_data(&mut self, payload: Bytes) -> Result<()> {
        self.send_reply(payload).await
    }

    async fn receive_auth_data(&mut self) -> Result<Bytes> {
        self.receive_reply().await
    }

    fn is_secure(&self) -> bool {
        Session::is_secure(self)
    }
}

async fn connect_socket(address: SocketAddr, keepalive: bool) -> std::io::Result<TcpStream> {
    let socket = if address.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if keepalive {
        socket.set_keepalive(true)?;
    }
    let stream = socket.connect(address).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(unix)]
async fn open_unix(path: &Path) -> Result<Transport> {
    let stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| Error::UnableToConnect {
            message: format!("Unable to connect to Unix socket '{}'", path.display()),
            source: Some(Box::new(e.into())),
        })?;
    Ok(Transport::Unix(stream))
}

#[cfg(not(unix))]
async fn open_unix(_path: &Path) -> Result<Transport> {
    Err(Error::NotSupported(
        "Unix domain sockets are not supported on this platform".into(),
    ))
}

#[cfg(windows)]
async fn open_named_pipe(name: &str) -> Result<Transport> {
    let path = format!(r"\\.\pipe\{name}");
    let client = tokio::net::windows::named_pipe::ClientOptions::new()
        .open(&path)
        .map_err(|e| Error::UnableToConnect {
            message: format!("Unable to connect to named pipe '{path}'"),
            source: Some(Box::new(e.into())),
        })?;
    Ok(Transport::NamedPipe(client))
}

#[cfg(not(windows))]
async fn open_named_pipe(_name: &str) -> Result<Transport> {
    Err(Error::NotSupported(
        "Named pipes are not supported on this platform".into(),
    ))
}

fn wrap_connect_error(err: Error) -> Error {
    if err.is_io() {
        Error::UnableToConnect {
            message: "Couldn't connect to server".into(),
            source: Some(Box::new(err)),
        }
    } else {
        err
    }
}

/// Whether `err` reports the interruption of the running statement.
pub(crate) fn is_query_interrupted(err: &Error) -> bool {
    err.is_server_error(QUERY_INTERRUPTED)
}
