//! Mock SingleStore server for unit testing.
//!
//! This module provides an in-process server speaking the MySQL client/server
//! protocol, so the session engine can be tested over real TCP without a
//! database instance.
//!
//! ## Features
//!
//! - Initial handshake with `mysql_native_password`, `caching_sha2_password`
//!   or `mysql_clear_password`
//! - SSL request followed by a TLS upgrade with a self-signed certificate
//! - Compressed protocol framing when the client asks for it
//! - An optional Unix domain socket listener next to the TCP one
//! - Configurable responses for SQL queries, including multi-statement payloads
//! - `KILL QUERY` across connections, interrupting [`MockResponse::Sleep`]
//! - Prepare, ping, reset, change user and quit
//! - A log of every command received, for assertions
//!
//! ## Example
//!
//! ```rust,ignore
//! use singlestore_testing::mock_server::{MockResponse, MockServer};
//!
//! #[tokio::test]
//! async fn test_query() {
//!     let server = MockServer::builder()
//!         .with_response("SELECT 42", MockResponse::scalar_int(42))
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let config = server.session_config();
//!     // Connect a session with config...
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::io::{Read as _, Write as _};
use std::net::SocketAddr;
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use mysql_protocol::codec::{write_lenenc_bytes, write_lenenc_int, write_null_terminated};
use mysql_protocol::column::encode_column_definition;
use mysql_protocol::packet::{COMPRESSED_HEADER_SIZE, CompressedHeader, MIN_COMPRESS_LENGTH};
use mysql_protocol::{
    Capabilities, ColumnFlags, ColumnType, CommandKind, MAX_PACKET_SIZE, PACKET_HEADER_SIZE,
    PacketHeader, ServerStatus, charset, error_code,
};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use singlestore_client::{Config, Credentials};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio_rustls::TlsAcceptor;

/// Plugin name of `mysql_native_password`.
pub const NATIVE_PASSWORD: &str = "mysql_native_password";

/// Plugin name of `caching_sha2_password`.
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";

/// Plugin name of `mysql_clear_password`.
pub const CLEAR_PASSWORD: &str = "mysql_clear_password";

const NONCE_LEN: usize = 20;
const FIRST_CONNECTION_ID: u32 = 1000;
const ACCESS_DENIED_STATE: &str = "28000";
const GENERAL_STATE: &str = "HY000";

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The client sent a payload larger than `max_allowed_packet`.
    #[error("Packet of {0} bytes exceeds max_allowed_packet")]
    PacketTooLarge(usize),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// Return rows with columns.
    Rows {
        /// Column definitions.
        columns: Vec<MockColumn>,
        /// Row data; `None` is SQL NULL.
        rows: Vec<Vec<Option<String>>>,
    },

    /// Return an OK payload (for INSERT/UPDATE/DELETE and statements without rows).
    Affected {
        /// Rows affected.
        rows: u64,
        /// Last generated insert id.
        last_insert_id: u64,
    },

    /// Return an error.
    Error {
        /// Error code.
        code: u16,
        /// Five-character SQL state.
        sql_state: String,
        /// Error message.
        message: String,
    },

    /// Run for the given time, then return a single `0`.
    ///
    /// A `KILL QUERY` for the connection ends it early with
    /// "Query execution was interrupted".
    Sleep(Duration),

    /// Compute the response from the statement text.
    Custom(Arc<dyn Fn(&str) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", rows)
                .finish(),
            Self::Affected {
                rows,
                last_insert_id,
            } => f
                .debug_struct("Affected")
                .field("rows", rows)
                .field("last_insert_id", last_insert_id)
                .finish(),
            Self::Error {
                code,
                sql_state,
                message,
            } => f
                .debug_struct("Error")
                .field("code", code)
                .field("sql_state", sql_state)
                .field("message", message)
                .finish(),
            Self::Sleep(duration) => f.debug_tuple("Sleep").field(duration).finish(),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

impl MockResponse {
    /// Return a single integer.
    pub fn scalar_int(value: i64) -> Self {
        Self::rows(vec![MockColumn::bigint("value")], vec![vec![Some(value.to_string())]])
    }

    /// Return a single string.
    pub fn scalar_string(value: impl Into<String>) -> Self {
        Self::rows(vec![MockColumn::varchar("value")], vec![vec![Some(value.into())]])
    }

    /// Return an OK payload with no affected rows.
    pub fn empty() -> Self {
        Self::affected(0)
    }

    /// Return an OK payload with `count` affected rows.
    pub fn affected(count: u64) -> Self {
        Self::Affected {
            rows: count,
            last_insert_id: 0,
        }
    }

    /// Return an error with SQL state `HY000`.
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            sql_state: GENERAL_STATE.to_string(),
            message: message.into(),
        }
    }

    /// Return rows.
    pub fn rows(columns: Vec<MockColumn>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self::Rows { columns, rows }
    }

    /// Run for `duration` unless killed.
    pub fn sleep(duration: Duration) -> Self {
        Self::Sleep(duration)
    }
}

/// Mock column definition.
#[derive(Debug, Clone)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
    /// Display length.
    pub length: u32,
}

impl MockColumn {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, column_type: ColumnType, length: u32) -> Self {
        Self {
            name: name.into(),
            column_type,
            length,
        }
    }

    /// Create a BIGINT column.
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::LONGLONG, 20)
    }

    /// Create a VARCHAR column.
    pub fn varchar(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::VAR_STRING, 255)
    }

    fn encode(&self) -> Bytes {
        let (character_set, flags) = if self.column_type == ColumnType::LONGLONG {
            (u16::from(charset::BINARY), ColumnFlags::BINARY)
        } else {
            (u16::from(charset::UTF8MB4_GENERAL_CI), ColumnFlags::empty())
        };
        encode_column_definition(
            "mock",
            "",
            &self.name,
            character_set,
            self.length,
            self.column_type,
            flags,
            0,
        )
    }
}

/// A command received by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedCommand {
    /// `COM_QUERY` with its text.
    Query(String),
    /// `COM_STMT_PREPARE` with its text.
    Prepare(String),
    /// `COM_STMT_CLOSE` with the statement id.
    CloseStatement(u32),
    /// `COM_PING`.
    Ping,
    /// `COM_RESET_CONNECTION`.
    ResetConnection,
    /// `COM_INIT_DB` with the database name.
    InitDatabase(String),
    /// `COM_CHANGE_USER` with the user name.
    ChangeUser(String),
    /// `COM_QUIT`.
    Quit,
    /// A password received in clear text during authentication, and
    /// whether the connection was TLS at the time.
    ClearTextPassword {
        /// Whether the connection was upgraded to TLS.
        secure: bool,
    },
}

/// A command together with the connection that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    /// Server connection id.
    pub connection_id: u32,
    /// The command.
    pub command: ReceivedCommand,
}

/// Configuration for the mock server.
pub struct MockServerConfig {
    /// Pre-configured responses for specific statements.
    responses: HashMap<String, MockResponse>,
    /// Default response for unmatched statements.
    default_response: MockResponse,
    /// Stored procedures and their parameter names.
    procedures: HashMap<String, Vec<String>>,
    /// Version string sent in the handshake and returned by `VERSION()`.
    server_version: String,
    /// Version returned by `@@memsql_version`.
    native_version: String,
    /// Value of `@@aggregator_id`.
    aggregator_id: i32,
    /// Accepted user name.
    user: String,
    /// Accepted password.
    password: String,
    /// Default authentication plugin.
    auth_plugin: String,
    /// TLS acceptor; SSL is advertised only when set.
    tls: Option<TlsAcceptor>,
    /// Certificate presented by the TLS acceptor.
    certificate: Option<CertificateDer<'static>>,
    /// Whether `DEPRECATE_EOF` is advertised.
    deprecate_eof: bool,
    /// Largest payload accepted from a client.
    max_allowed_packet: usize,
    /// Whether `COMPRESS` is advertised.
    compression: bool,
    /// Whether `caching_sha2_password` may accept the scramble without
    /// asking for the full password.
    fast_auth: bool,
    /// Path of the Unix domain socket listener, if any.
    #[cfg(unix)]
    unix_socket: Option<PathBuf>,
}

/// Builder for `MockServer`.
pub struct MockServerBuilder {
    config: MockServerConfig,
    generate_certificate: bool,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        let mut responses = HashMap::new();
        responses.insert("SELECT 1".to_string(), MockResponse::scalar_int(1));
        Self {
            config: MockServerConfig {
                responses,
                default_response: MockResponse::empty(),
                procedures: HashMap::new(),
                server_version: "5.7.32".to_string(),
                native_version: "8.5.10".to_string(),
                aggregator_id: 1,
                user: "root".to_string(),
                password: "secret".to_string(),
                auth_plugin: CACHING_SHA2_PASSWORD.to_string(),
                tls: None,
                certificate: None,
                deprecate_eof: true,
                max_allowed_packet: 64 * 1024 * 1024,
                compression: false,
                fast_auth: true,
                #[cfg(unix)]
                unix_socket: None,
            },
            generate_certificate: false,
        }
    }

    /// Add a response for a specific statement.
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(sql.into(), response);
        self
    }

    /// Set the default response for unmatched statements.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.config.default_response = response;
        self
    }

    /// Declare a stored procedure with `IN` parameters named `parameters`.
    pub fn with_procedure(mut self, name: impl Into<String>, parameters: &[&str]) -> Self {
        self.config.procedures.insert(
            name.into().to_lowercase(),
            parameters.iter().map(|p| (*p).to_string()).collect(),
        );
        self
    }

    /// Set the MySQL-compatible version string.
    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.config.server_version = version.into();
        self
    }

    /// Set the version returned by `@@memsql_version`.
    pub fn with_native_version(mut self, version: impl Into<String>) -> Self {
        self.config.native_version = version.into();
        self
    }

    /// Set the accepted credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.user = user.into();
        self.config.password = password.into();
        self
    }

    /// Set the default authentication plugin.
    pub fn with_auth_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.config.auth_plugin = plugin.into();
        self
    }

    /// Advertise SSL and upgrade to TLS with a generated self-signed certificate.
    pub fn with_tls(mut self) -> Self {
        self.generate_certificate = true;
        self
    }

    /// Enable or disable `DEPRECATE_EOF`.
    pub fn with_deprecate_eof(mut self, enabled: bool) -> Self {
        self.config.deprecate_eof = enabled;
        self
    }

    /// Set the largest payload accepted from a client.
    pub fn with_max_allowed_packet(mut self, size: usize) -> Self {
        self.config.max_allowed_packet = size;
        self
    }

    /// Advertise `COMPRESS` and switch to compressed framing after login
    /// when the client asks for it.
    pub fn with_compression(mut self) -> Self {
        self.config.compression = true;
        self
    }

    /// Make `caching_sha2_password` always ask for the full password, as a
    /// server with an empty authentication cache does.
    pub fn with_full_auth(mut self) -> Self {
        self.config.fast_auth = false;
        self
    }

    /// Also listen on a Unix domain socket at `path`, replacing any stale
    /// socket file.
    #[cfg(unix)]
    pub fn with_unix_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.unix_socket = Some(path.into());
        self
    }

    /// Build and start the mock server.
    pub async fn build(mut self) -> Result<MockServer> {
        if self.generate_certificate {
            let (certificate, acceptor) = self_signed_acceptor()?;
            self.config.certificate = Some(certificate);
            self.config.tls = Some(acceptor);
        }
        MockServer::start(self.config).await
    }
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn self_signed_acceptor() -> Result<(CertificateDer<'static>, TlsAcceptor)> {
    let generated = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .map_err(|e| MockServerError::Tls(e.to_string()))?;
    let certificate = generated.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        generated.signing_key.serialize_der(),
    ));
    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| MockServerError::Tls(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(vec![certificate.clone()], key)
    .map_err(|e| MockServerError::Tls(e.to_string()))?;
    Ok((certificate, TlsAcceptor::from(Arc::new(config))))
}

/// Per-connection kill signal.
#[derive(Default)]
struct KillSwitch {
    killed: AtomicBool,
    notify: Notify,
}

impl KillSwitch {
    fn kill(&self) {
        self.killed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn take(&self) -> bool {
        self.killed.swap(false, Ordering::AcqRel)
    }

    /// Wait `duration`; returns `true` when killed first.
    async fn sleep(&self, duration: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + duration;
        loop {
            if self.take() {
                return true;
            }
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return false,
                () = self.notify.notified() => {}
            }
        }
    }
}

/// State shared by every connection of one server.
struct ServerState {
    next_connection_id: AtomicU32,
    connections: Mutex<HashMap<u32, Arc<KillSwitch>>>,
    commands: Mutex<Vec<RecordedCommand>>,
    connection_count: Mutex<usize>,
}

impl ServerState {
    async fn record(&self, connection_id: u32, command: ReceivedCommand) {
        tracing::trace!(connection_id, ?command, "mock server received command");
        self.commands.lock().await.push(RecordedCommand {
            connection_id,
            command,
        });
    }
}

/// A mock SingleStore server for testing.
///
/// This server handles the connection handshake and responds to commands
/// based on pre-configured responses.
pub struct MockServer {
    /// Server address.
    addr: SocketAddr,
    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,
    /// Server configuration.
    config: Arc<MockServerConfig>,
    /// State shared with connection tasks.
    state: Arc<ServerState>,
}

impl MockServer {
    /// Create a new builder for the mock server.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start the mock server on an available port.
    pub async fn start(config: MockServerConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let config = Arc::new(config);
        let state = Arc::new(ServerState {
            next_connection_id: AtomicU32::new(FIRST_CONNECTION_ID),
            connections: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            connection_count: Mutex::new(0),
        });

        let server = Self {
            addr,
            shutdown_tx: shutdown_tx.clone(),
            config: config.clone(),
            state: state.clone(),
        };

        #[cfg(unix)]
        if let Some(path) = &config.unix_socket {
            let _ = std::fs::remove_file(path);
            let listener = tokio::net::UnixListener::bind(path)?;
            let config = config.clone();
            let state = state.clone();
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            match result {
                                Ok((stream, _peer_addr)) => {
                                    spawn_connection(stream, config.clone(), state.clone());
                                }
                                Err(e) => {
                                    tracing::error!("Accept error: {}", e);
                                    break;
                                }
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            break;
                        }
                    }
                }
            });
        }

        // Spawn the accept loop
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _peer_addr)) => {
                                spawn_connection(stream, config.clone(), state.clone());
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Ok(server)
    }

    /// Get the server's listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the host string for connection configuration.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Get the port number.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Path of the Unix domain socket listener, when one was configured.
    #[cfg(unix)]
    pub fn unix_socket_path(&self) -> Option<&Path> {
        self.config.unix_socket.as_deref()
    }

    /// The certificate presented on TLS upgrades, when TLS is enabled.
    pub fn certificate(&self) -> Option<&CertificateDer<'static>> {
        self.config.certificate.as_ref()
    }

    /// A session configuration pointing at this server with its credentials.
    pub fn session_config(&self) -> Config {
        Config::new()
            .host(self.host())
            .port(self.port())
            .credentials(Credentials::new(
                self.config.user.clone(),
                self.config.password.clone(),
            ))
    }

    /// Get the current connection count.
    pub async fn connection_count(&self) -> usize {
        *self.state.connection_count.lock().await
    }

    /// Every command received so far, in arrival order.
    pub async fn commands(&self) -> Vec<RecordedCommand> {
        self.state.commands.lock().await.clone()
    }

    /// The text of every `COM_QUERY` received so far.
    pub async fn queries(&self) -> Vec<String> {
        self.state
            .commands
            .lock()
            .await
            .iter()
            .filter_map(|recorded| match &recorded.command {
                ReceivedCommand::Query(sql) => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Stop the server.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop();
        #[cfg(unix)]
        if let Some(path) = &self.config.unix_socket {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Serve one accepted stream on its own task.
fn spawn_connection<S>(stream: S, config: Arc<MockServerConfig>, state: Arc<ServerState>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        *state.connection_count.lock().await += 1;
        let connection_id = state.next_connection_id.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = handle_connection(stream, connection_id, config, &state).await {
            tracing::debug!(connection_id, "Connection error: {}", e);
        }
        state.connections.lock().await.remove(&connection_id);
        let mut count = state.connection_count.lock().await;
        *count = count.saturating_sub(1);
    });
}

/// Framed payload IO over one client stream.
struct Connection<S> {
    stream: S,
    sequence: u8,
    max_allowed_packet: usize,
    compression: Option<CompressedFrames>,
}

/// Compressed frame state: frame sequence and inflated bytes not yet read.
#[derive(Default)]
struct CompressedFrames {
    sequence: u8,
    inflated: BytesMut,
}

impl CompressedFrames {
    /// Append one frame carrying `data` to `dst`, deflating it when that
    /// makes it smaller.
    fn write_frame(&mut self, data: &[u8], dst: &mut BytesMut) -> Result<()> {
        let deflated = if data.len() >= MIN_COMPRESS_LENGTH {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::fast());
            encoder.write_all(data)?;
            Some(encoder.finish()?).filter(|out| out.len() < data.len())
        } else {
            None
        };
        let (body, uncompressed_length) = match &deflated {
            Some(out) => (&out[..], data.len() as u32),
            None => (data, 0),
        };
        CompressedHeader {
            compressed_length: body.len() as u32,
            sequence: self.sequence,
            uncompressed_length,
        }
        .encode(dst);
        self.sequence = self.sequence.wrapping_add(1);
        dst.put_slice(body);
        Ok(())
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    fn new(stream: S, sequence: u8, max_allowed_packet: usize) -> Self {
        Self {
            stream,
            sequence,
            max_allowed_packet,
            compression: None,
        }
    }

    /// Fill `buf` from the stream, inflating compressed frames as needed.
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let Some(frames) = self.compression.as_mut() else {
            self.stream.read_exact(buf).await?;
            return Ok(());
        };
        while frames.inflated.len() < buf.len() {
            let mut header = [0u8; COMPRESSED_HEADER_SIZE];
            self.stream.read_exact(&mut header).await?;
            let header = CompressedHeader::decode(&mut &header[..])
                .map_err(|e| MockServerError::Protocol(e.to_string()))?;
            frames.sequence = header.sequence.wrapping_add(1);
            let mut body = vec![0u8; header.compressed_length as usize];
            self.stream.read_exact(&mut body).await?;
            if header.is_compressed() {
                let mut inflated = Vec::with_capacity(header.uncompressed_length as usize);
                ZlibDecoder::new(&body[..]).read_to_end(&mut inflated)?;
                frames.inflated.extend_from_slice(&inflated);
            } else {
                frames.inflated.extend_from_slice(&body);
            }
        }
        buf.copy_from_slice(&frames.inflated.split_to(buf.len()));
        Ok(())
    }

    /// Write packet bytes, wrapping them in compressed frames when enabled.
    async fn write_raw(&mut self, raw: &[u8]) -> Result<()> {
        match self.compression.as_mut() {
            None => self.stream.write_all(raw).await?,
            Some(frames) => {
                let mut out = BytesMut::with_capacity(raw.len() + COMPRESSED_HEADER_SIZE);
                for chunk in raw.chunks(MAX_PACKET_SIZE) {
                    frames.write_frame(chunk, &mut out)?;
                }
                self.stream.write_all(&out).await?;
            }
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Read one payload, reassembling continuation packets.
    async fn read_payload(&mut self) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        loop {
            let mut header = [0u8; PACKET_HEADER_SIZE];
            self.read_exact(&mut header).await?;
            let header = PacketHeader::decode(&mut &header[..])
                .map_err(|e| MockServerError::Protocol(e.to_string()))?;
            self.sequence = header.sequence.wrapping_add(1);

            let total = payload.len() + header.payload_length();
            if total > self.max_allowed_packet {
                return Err(MockServerError::PacketTooLarge(total));
            }
            let start = payload.len();
            payload.resize(total, 0);
            self.read_exact(&mut payload[start..]).await?;
            if !header.has_continuation() {
                return Ok(payload.freeze());
            }
        }
    }

    /// Write one payload, splitting it into packets.
    async fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(payload.len() + PACKET_HEADER_SIZE);
        let mut offset = 0;
        loop {
            let len = (payload.len() - offset).min(MAX_PACKET_SIZE);
            PacketHeader::new(len as u32, self.sequence).encode(&mut buf);
            self.sequence = self.sequence.wrapping_add(1);
            buf.put_slice(&payload[offset..offset + len]);
            offset += len;
            if len < MAX_PACKET_SIZE {
                break;
            }
        }
        self.write_raw(&buf).await
    }

    async fn write_ok(&mut self, affected_rows: u64, last_insert_id: u64, status: ServerStatus) -> Result<()> {
        let payload = ok_payload(0x00, affected_rows, last_insert_id, status);
        self.write_payload(&payload).await
    }

    async fn write_error(&mut self, code: u16, sql_state: &str, message: &str) -> Result<()> {
        self.write_payload(&err_payload(code, sql_state, message)).await
    }
}

fn ok_payload(header: u8, affected_rows: u64, last_insert_id: u64, status: ServerStatus) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u8(header);
    write_lenenc_int(&mut buf, affected_rows);
    write_lenenc_int(&mut buf, last_insert_id);
    buf.put_u16_le(status.bits());
    buf.put_u16_le(0);
    buf.freeze()
}

fn eof_payload(status: ServerStatus) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(0xFE);
    buf.put_u16_le(0);
    buf.put_u16_le(status.bits());
    buf.freeze()
}

fn err_payload(code: u16, sql_state: &str, message: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(9 + message.len());
    buf.put_u8(0xFF);
    buf.put_u16_le(code);
    buf.put_u8(b'#');
    buf.put_slice(sql_state.as_bytes());
    buf.put_slice(message.as_bytes());
    buf.freeze()
}

/// Connection-level facts the command loop needs.
struct Session {
    id: u32,
    nonce: [u8; NONCE_LEN],
    deprecate_eof: bool,
    secure: bool,
    next_statement_id: u32,
    kill: Arc<KillSwitch>,
}

fn server_capabilities(config: &MockServerConfig) -> Capabilities {
    let mut capabilities = Capabilities::LONG_PASSWORD
        | Capabilities::FOUND_ROWS
        | Capabilities::LONG_FLAG
        | Capabilities::CONNECT_WITH_DB
        | Capabilities::LOCAL_FILES
        | Capabilities::PROTOCOL_41
        | Capabilities::INTERACTIVE
        | Capabilities::TRANSACTIONS
        | Capabilities::SECURE_CONNECTION
        | Capabilities::MULTI_STATEMENTS
        | Capabilities::MULTI_RESULTS
        | Capabilities::PS_MULTI_RESULTS
        | Capabilities::PLUGIN_AUTH
        | Capabilities::CONNECTION_ATTRIBUTES
        | Capabilities::PLUGIN_AUTH_LENENC_CLIENT_DATA;
    if config.deprecate_eof {
        capabilities |= Capabilities::DEPRECATE_EOF;
    }
    if config.tls.is_some() {
        capabilities |= Capabilities::SSL;
    }
    if config.compression {
        capabilities |= Capabilities::COMPRESS;
    }
    capabilities
}

fn nonce_for(connection_id: u32) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    for (i, byte) in nonce.iter_mut().enumerate() {
        *byte = b'a' + ((connection_id as usize * 7 + i * 13) % 26) as u8;
    }
    nonce
}

fn handshake_payload(
    config: &MockServerConfig,
    connection_id: u32,
    nonce: &[u8; NONCE_LEN],
) -> Bytes {
    let capabilities = server_capabilities(config).bits() as u32;
    let mut buf = BytesMut::with_capacity(128);
    buf.put_u8(10);
    write_null_terminated(&mut buf, config.server_version.as_bytes());
    buf.put_u32_le(connection_id);
    buf.put_slice(&nonce[..8]);
    buf.put_u8(0);
    buf.put_u16_le(capabilities as u16);
    buf.put_u8(charset::UTF8_GENERAL_CI);
    buf.put_u16_le(ServerStatus::AUTOCOMMIT.bits());
    buf.put_u16_le((capabilities >> 16) as u16);
    buf.put_u8(NONCE_LEN as u8 + 1);
    buf.put_bytes(0, 10);
    buf.put_slice(&nonce[8..]);
    buf.put_u8(0);
    write_null_terminated(&mut buf, config.auth_plugin.as_bytes());
    buf.freeze()
}

/// Fields of a handshake response the mock checks.
struct LoginRequest {
    capabilities: Capabilities,
    username: String,
    auth_response: Bytes,
    plugin: String,
}

fn take_null_terminated(src: &mut Bytes) -> Result<String> {
    let end = src
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| MockServerError::Protocol("missing NUL terminator".into()))?;
    let value = String::from_utf8_lossy(&src[..end]).into_owned();
    src.advance(end + 1);
    Ok(value)
}

fn take_lenenc_bytes(src: &mut Bytes) -> Result<Bytes> {
    let first = *src
        .first()
        .ok_or_else(|| MockServerError::Protocol("truncated length".into()))?;
    let (prefix, len) = match first {
        0xFC if src.len() >= 3 => (3, usize::from(u16::from_le_bytes([src[1], src[2]]))),
        0xFC..=0xFF => {
            return Err(MockServerError::Protocol("unsupported length prefix".into()));
        }
        n => (1, usize::from(n)),
    };
    if src.len() < prefix + len {
        return Err(MockServerError::Protocol("truncated value".into()));
    }
    src.advance(prefix);
    Ok(src.split_to(len))
}

fn parse_login(mut payload: Bytes) -> Result<LoginRequest> {
    if payload.len() < 32 {
        return Err(MockServerError::Protocol("short handshake response".into()));
    }
    let capabilities = Capabilities::from_bits_retain(u64::from(payload.get_u32_le()));
    payload.advance(28);
    let username = take_null_terminated(&mut payload)?;
    let auth_response = if capabilities.contains(Capabilities::PLUGIN_AUTH_LENENC_CLIENT_DATA) {
        take_lenenc_bytes(&mut payload)?
    } else {
        let len = usize::from(payload.get_u8());
        payload.split_to(len)
    };
    if capabilities.contains(Capabilities::CONNECT_WITH_DB) {
        take_null_terminated(&mut payload)?;
    }
    let plugin = if capabilities.contains(Capabilities::PLUGIN_AUTH) {
        take_null_terminated(&mut payload)?
    } else {
        NATIVE_PASSWORD.to_string()
    };
    Ok(LoginRequest {
        capabilities,
        username,
        auth_response,
        plugin,
    })
}

fn native_scramble(nonce: &[u8], password: &str) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(stage2);
    let stage3 = hasher.finalize();
    stage1.iter().zip(stage3.iter()).map(|(a, b)| a ^ b).collect()
}

fn sha2_scramble(nonce: &[u8], password: &str) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }
    let digest1 = Sha256::digest(password.as_bytes());
    let digest2 = Sha256::digest(digest1);
    let mut hasher = Sha256::new();
    hasher.update(digest2);
    hasher.update(nonce);
    let digest3 = hasher.finalize();
    digest1.iter().zip(digest3.iter()).map(|(a, b)| a ^ b).collect()
}

/// Handle a single client connection.
async fn handle_connection<S: AsyncRead + AsyncWrite + Unpin>(
    mut stream: S,
    connection_id: u32,
    config: Arc<MockServerConfig>,
    state: &ServerState,
) -> Result<()> {
    let nonce = nonce_for(connection_id);
    let mut plain = Connection::new(&mut stream, 0, config.max_allowed_packet);
    plain
        .write_payload(&handshake_payload(&config, connection_id, &nonce))
        .await?;
    let first = plain.read_payload().await?;
    let sequence = plain.sequence;

    let kill = Arc::new(KillSwitch::default());
    state
        .connections
        .lock()
        .await
        .insert(connection_id, kill.clone());
    let mut session = Session {
        id: connection_id,
        nonce,
        deprecate_eof: false,
        secure: false,
        next_statement_id: 1,
        kill,
    };

    let wants_tls = first.len() == 32
        && Capabilities::from_bits_retain(u64::from((&first[..4]).get_u32_le()))
            .contains(Capabilities::SSL);
    if !wants_tls {
        return serve(plain, first, &mut session, &config, state).await;
    }

    let acceptor = config
        .tls
        .clone()
        .ok_or_else(|| MockServerError::Protocol("SSL requested but not offered".into()))?;
    let tls = acceptor.accept(stream).await?;
    tracing::debug!(connection_id, "mock server upgraded to TLS");
    session.secure = true;
    let mut secure = Connection::new(tls, sequence, config.max_allowed_packet);
    let login = secure.read_payload().await?;
    serve(secure, login, &mut session, &config, state).await
}

/// Authenticate, then run the command loop.
async fn serve<S: AsyncRead + AsyncWrite + Unpin>(
    mut conn: Connection<S>,
    login: Bytes,
    session: &mut Session,
    config: &MockServerConfig,
    state: &ServerState,
) -> Result<()> {
    let request = parse_login(login)?;
    session.deprecate_eof =
        config.deprecate_eof && request.capabilities.contains(Capabilities::DEPRECATE_EOF);
    if !authenticate(&mut conn, session, config, state, &request.username, &request.plugin, request.auth_response).await? {
        return Ok(());
    }
    if config.compression && request.capabilities.contains(Capabilities::COMPRESS) {
        tracing::debug!(connection_id = session.id, "mock server enabled compression");
        conn.compression = Some(CompressedFrames::default());
    }

    loop {
        let payload = match conn.read_payload().await {
            Ok(p) => p,
            Err(MockServerError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Client disconnected
                break;
            }
            Err(e) => return Err(e),
        };
        let Some((&command, body)) = payload.split_first() else {
            return Err(MockServerError::Protocol("empty command".into()));
        };
        let body = payload.slice(payload.len() - body.len()..);

        match command {
            c if c == CommandKind::Quit.as_u8() => {
                state.record(session.id, ReceivedCommand::Quit).await;
                break;
            }
            c if c == CommandKind::Query.as_u8() => {
                let sql = String::from_utf8_lossy(&body).into_owned();
                state.record(session.id, ReceivedCommand::Query(sql.clone())).await;
                run_query(&mut conn, session, config, state, &sql).await?;
            }
            c if c == CommandKind::Ping.as_u8() => {
                state.record(session.id, ReceivedCommand::Ping).await;
                conn.write_ok(0, 0, ServerStatus::AUTOCOMMIT).await?;
            }
            c if c == CommandKind::ResetConnection.as_u8() => {
                state.record(session.id, ReceivedCommand::ResetConnection).await;
                conn.write_ok(0, 0, ServerStatus::AUTOCOMMIT).await?;
            }
            c if c == CommandKind::InitDatabase.as_u8() => {
                let database = String::from_utf8_lossy(&body).into_owned();
                state.record(session.id, ReceivedCommand::InitDatabase(database)).await;
                conn.write_ok(0, 0, ServerStatus::AUTOCOMMIT).await?;
            }
            c if c == CommandKind::ChangeUser.as_u8() => {
                let mut body = body;
                let username = take_null_terminated(&mut body)?;
                let len = usize::from(body.get_u8());
                let auth_response = body.split_to(len);
                take_null_terminated(&mut body)?;
                body.advance(2);
                let plugin = take_null_terminated(&mut body)?;
                state.record(session.id, ReceivedCommand::ChangeUser(username.clone())).await;
                if !authenticate(&mut conn, session, config, state, &username, &plugin, auth_response).await? {
                    break;
                }
            }
            c if c == CommandKind::StatementPrepare.as_u8() => {
                let sql = String::from_utf8_lossy(&body).into_owned();
                state.record(session.id, ReceivedCommand::Prepare(sql.clone())).await;
                prepare(&mut conn, session, &sql).await?;
            }
            c if c == CommandKind::StatementClose.as_u8() => {
                let mut body = body;
                let id = body.get_u32_le();
                state.record(session.id, ReceivedCommand::CloseStatement(id)).await;
            }
            other => {
                tracing::debug!("Unexpected command byte: {:#04x}", other);
                conn.write_error(error_code::UNKNOWN_COMMAND, "08S01", "Unknown command")
                    .await?;
            }
        }
    }

    Ok(())
}

/// Run the authentication exchange; returns `false` after rejecting the client.
async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    session: &Session,
    config: &MockServerConfig,
    state: &ServerState,
    username: &str,
    plugin: &str,
    mut response: Bytes,
) -> Result<bool> {
    if plugin != config.auth_plugin {
        let mut switch = BytesMut::with_capacity(32);
        switch.put_u8(0xFE);
        write_null_terminated(&mut switch, config.auth_plugin.as_bytes());
        switch.put_slice(&session.nonce);
        switch.put_u8(0);
        conn.write_payload(&switch).await?;
        response = conn.read_payload().await?;
    }

    let user_ok = username == config.user;
    let accepted = if config.auth_plugin == CACHING_SHA2_PASSWORD {
        if config.fast_auth
            && user_ok
            && response[..] == sha2_scramble(&session.nonce, &config.password)[..]
        {
            conn.write_payload(&[0x01, 0x03]).await?;
            true
        } else if user_ok && (session.secure || !config.fast_auth) {
            conn.write_payload(&[0x01, 0x04]).await?;
            let reply = conn.read_payload().await?;
            // A lone 0x02 asks for the RSA public key, which the mock lacks.
            if reply[..] == [0x02] {
                false
            } else {
                clear_password_matches(&reply, session, config, state).await
            }
        } else {
            false
        }
    } else if config.auth_plugin == CLEAR_PASSWORD {
        user_ok && clear_password_matches(&response, session, config, state).await
    } else {
        user_ok && response[..] == native_scramble(&session.nonce, &config.password)[..]
    };

    if accepted {
        conn.write_ok(0, 0, ServerStatus::AUTOCOMMIT).await?;
        return Ok(true);
    }
    let message = format!(
        "Access denied for user '{username}'@'localhost' (using password: {})",
        if config.password.is_empty() { "NO" } else { "YES" }
    );
    conn.write_error(error_code::ACCESS_DENIED, ACCESS_DENIED_STATE, &message)
        .await?;
    Ok(false)
}

async fn clear_password_matches(
    reply: &[u8],
    session: &Session,
    config: &MockServerConfig,
    state: &ServerState,
) -> bool {
    state
        .record(
            session.id,
            ReceivedCommand::ClearTextPassword {
                secure: session.secure,
            },
        )
        .await;
    let password = reply.strip_suffix(&[0]).unwrap_or(reply);
    password == config.password.as_bytes()
}

fn find_response(sql: &str, session: &Session, config: &MockServerConfig) -> MockResponse {
    let trimmed = sql.trim();
    if let Some(response) = config.responses.get(trimmed) {
        return match response {
            MockResponse::Custom(f) => f(trimmed),
            other => other.clone(),
        };
    }
    let upper = trimmed.to_ascii_uppercase();
    if upper.starts_with("SET NAMES") || upper == "DO SLEEP(0)" {
        return MockResponse::empty();
    }
    if upper.contains("@@MEMSQL_VERSION") {
        return MockResponse::rows(
            vec![
                MockColumn::bigint("CONNECTION_ID()"),
                MockColumn::varchar("VERSION()"),
                MockColumn::varchar("@@memsql_version"),
                MockColumn::bigint("@@aggregator_id"),
            ],
            vec![vec![
                Some(session.id.to_string()),
                Some(config.server_version.clone()),
                Some(config.native_version.clone()),
                Some(config.aggregator_id.to_string()),
            ]],
        );
    }
    if upper == "SELECT DATABASE()" {
        return MockResponse::scalar_string("mock");
    }
    if upper.starts_with("SELECT COUNT(*) FROM INFORMATION_SCHEMA.ROUTINES") {
        let count = quoted_after(trimmed, "ROUTINE_NAME = ")
            .is_some_and(|name| config.procedures.contains_key(&name.to_lowercase()));
        return MockResponse::scalar_int(i64::from(count));
    }
    if upper.starts_with("SELECT ORDINAL_POSITION") {
        let parameters = quoted_after(trimmed, "SPECIFIC_NAME = ")
            .and_then(|name| config.procedures.get(&name.to_lowercase()))
            .cloned()
            .unwrap_or_default();
        return MockResponse::rows(
            vec![
                MockColumn::bigint("ORDINAL_POSITION"),
                MockColumn::varchar("PARAMETER_MODE"),
                MockColumn::varchar("PARAMETER_NAME"),
            ],
            parameters
                .into_iter()
                .enumerate()
                .map(|(i, name)| vec![Some((i + 1).to_string()), Some("IN".into()), Some(name)])
                .collect(),
        );
    }
    match &config.default_response {
        MockResponse::Custom(f) => f(trimmed),
        other => other.clone(),
    }
}

/// The single-quoted literal following `marker`.
fn quoted_after<'a>(sql: &'a str, marker: &str) -> Option<&'a str> {
    let start = sql.find(marker)? + marker.len();
    let rest = sql[start..].strip_prefix('\'')?;
    let end = rest.find('\'')?;
    Some(&rest[..end])
}

fn kill_target(sql: &str) -> Option<u32> {
    let upper = sql.trim().to_ascii_uppercase();
    upper.strip_prefix("KILL QUERY ")?.trim().parse().ok()
}

/// Answer a `COM_QUERY`, one result per `;`-separated statement.
async fn run_query<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    session: &Session,
    config: &MockServerConfig,
    state: &ServerState,
    sql: &str,
) -> Result<()> {
    if session.kill.take() {
        return conn
            .write_error(error_code::QUERY_INTERRUPTED, "70100", "Query execution was interrupted")
            .await;
    }

    let statements: Vec<&str> = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if statements.is_empty() {
        return conn
            .write_error(error_code::PARSE_ERROR, "42000", "Query was empty")
            .await;
    }

    for (i, statement) in statements.iter().enumerate() {
        let mut status = ServerStatus::AUTOCOMMIT;
        if i + 1 < statements.len() {
            status |= ServerStatus::MORE_RESULTS_EXIST;
        }

        if let Some(target) = kill_target(statement) {
            let switch = state.connections.lock().await.get(&target).cloned();
            match switch {
                Some(switch) => {
                    switch.kill();
                    conn.write_ok(0, 0, status).await?;
                }
                None => {
                    return conn
                        .write_error(1094, GENERAL_STATE, &format!("Unknown thread id: {target}"))
                        .await;
                }
            }
            continue;
        }

        match find_response(statement, session, config) {
            MockResponse::Rows { columns, rows } => {
                write_rows(conn, session, &columns, &rows, status).await?;
            }
            MockResponse::Affected {
                rows,
                last_insert_id,
            } => conn.write_ok(rows, last_insert_id, status).await?,
            MockResponse::Error {
                code,
                sql_state,
                message,
            } => return conn.write_error(code, &sql_state, &message).await,
            MockResponse::Sleep(duration) => {
                if session.kill.sleep(duration).await {
                    return conn
                        .write_error(
                            error_code::QUERY_INTERRUPTED,
                            "70100",
                            "Query execution was interrupted",
                        )
                        .await;
                }
                let columns = [MockColumn::bigint("SLEEP")];
                write_rows(conn, session, &columns, &[vec![Some("0".into())]], status).await?;
            }
            MockResponse::Custom(_) => {
                return conn
                    .write_error(error_code::PARSE_ERROR, "42000", "Custom response returned Custom")
                    .await;
            }
        }
    }
    Ok(())
}

async fn write_rows<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    session: &Session,
    columns: &[MockColumn],
    rows: &[Vec<Option<String>>],
    status: ServerStatus,
) -> Result<()> {
    let mut count = BytesMut::with_capacity(9);
    write_lenenc_int(&mut count, columns.len() as u64);
    conn.write_payload(&count).await?;
    for column in columns {
        conn.write_payload(&column.encode()).await?;
    }
    if !session.deprecate_eof {
        conn.write_payload(&eof_payload(status)).await?;
    }
    for row in rows {
        let mut buf = BytesMut::new();
        for value in row {
            match value {
                Some(text) => write_lenenc_bytes(&mut buf, text.as_bytes()),
                None => buf.put_u8(0xFB),
            }
        }
        conn.write_payload(&buf).await?;
    }
    let end = if session.deprecate_eof {
        ok_payload(0xFE, 0, 0, status)
    } else {
        eof_payload(status)
    };
    conn.write_payload(&end).await
}

/// Answer `COM_STMT_PREPARE`: one parameter per `?`, one column for `SELECT`.
async fn prepare<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    session: &mut Session,
    sql: &str,
) -> Result<()> {
    if sql.trim().is_empty() || sql.to_ascii_uppercase().contains("DELIMITER") {
        return conn
            .write_error(
                error_code::PARSE_ERROR,
                "42000",
                "You have an error in your SQL syntax",
            )
            .await;
    }
    let parameters = sql.matches('?').count();
    let columns = usize::from(sql.trim_start().to_ascii_uppercase().starts_with("SELECT"));
    let statement_id = session.next_statement_id;
    session.next_statement_id += 1;

    let mut buf = BytesMut::with_capacity(12);
    buf.put_u8(0x00);
    buf.put_u32_le(statement_id);
    buf.put_u16_le(columns as u16);
    buf.put_u16_le(parameters as u16);
    buf.put_u8(0);
    buf.put_u16_le(0);
    conn.write_payload(&buf).await?;

    for (count, name) in [(parameters, "?"), (columns, "value")] {
        if count == 0 {
            continue;
        }
        for _ in 0..count {
            conn.write_payload(&MockColumn::varchar(name).encode()).await?;
        }
        if !session.deprecate_eof {
            conn.write_payload(&eof_payload(ServerStatus::AUTOCOMMIT)).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use mysql_protocol::InitialHandshake;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockServer::builder()
            .with_server_version("8.0.0")
            .build()
            .await
            .unwrap();

        assert!(server.port() > 0);
        assert_eq!(server.host(), "127.0.0.1");
        assert!(server.certificate().is_none());
    }

    #[test]
    fn test_handshake_decodes() {
        let config = MockServerBuilder::new().config;
        let nonce = nonce_for(1000);
        let payload = handshake_payload(&config, 1000, &nonce);
        let handshake = InitialHandshake::decode(&mut payload.clone()).unwrap();

        assert_eq!(handshake.connection_id, 1000);
        assert_eq!(&handshake.auth_plugin_data[..NONCE_LEN], &nonce);
        assert_eq!(handshake.auth_plugin_name.as_deref(), Some(CACHING_SHA2_PASSWORD));
        assert!(handshake.capabilities.contains(Capabilities::DEPRECATE_EOF));
        assert!(!handshake.capabilities.contains(Capabilities::SSL));
        assert!(!nonce.contains(&0));
    }

    #[test]
    fn test_mock_response_error() {
        let response = MockResponse::error(1146, "Table 'db.t' doesn't exist");
        match response {
            MockResponse::Error {
                code,
                sql_state,
                message,
            } => {
                assert_eq!(code, 1146);
                assert_eq!(sql_state, "HY000");
                assert_eq!(message, "Table 'db.t' doesn't exist");
            }
            _ => panic!("Expected error response"),
        }
    }

    #[test]
    fn test_err_payload_layout() {
        let payload = err_payload(1317, "70100", "interrupted");
        assert_eq!(payload[0], 0xFF);
        assert_eq!(u16::from_le_bytes([payload[1], payload[2]]), 1317);
        assert_eq!(&payload[3..9], b"#70100");
        assert_eq!(&payload[9..], b"interrupted");
    }

    #[test]
    fn test_kill_target() {
        assert_eq!(kill_target("KILL QUERY 1001"), Some(1001));
        assert_eq!(kill_target("kill query 7 "), Some(7));
        assert_eq!(kill_target("KILL 7"), None);
    }

    #[test]
    fn test_quoted_after() {
        let sql = "SELECT COUNT(*) FROM information_schema.ROUTINES WHERE ROUTINE_SCHEMA = 'db' AND ROUTINE_NAME = 'add_user'";
        assert_eq!(quoted_after(sql, "ROUTINE_NAME = "), Some("add_user"));
        assert_eq!(quoted_after(sql, "SPECIFIC_NAME = "), None);
    }

    #[tokio::test]
    async fn test_kill_switch_wakes_sleeper() {
        let switch = Arc::new(KillSwitch::default());
        let sleeper = {
            let switch = switch.clone();
            tokio::spawn(async move { switch.sleep(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        switch.kill();
        assert!(sleeper.await.unwrap());
        assert!(!switch.sleep(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_payload_framing_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = Connection::new(client, 3, 1024);
        let mut reader = Connection::new(server, 0, 1024);

        writer.write_payload(b"hello").await.unwrap();
        assert_eq!(&reader.read_payload().await.unwrap()[..], b"hello");
        assert_eq!(reader.sequence, 4);

        let mut small = Connection::new(reader.stream, 0, 4);
        writer.write_payload(b"too long").await.unwrap();
        assert!(matches!(
            small.read_payload().await,
            Err(MockServerError::PacketTooLarge(8))
        ));
    }

    #[tokio::test]
    async fn test_compressed_framing_over_duplex() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut writer = Connection::new(client, 0, 1 << 20);
        let mut reader = Connection::new(server, 0, 1 << 20);
        writer.compression = Some(CompressedFrames::default());
        reader.compression = Some(CompressedFrames::default());

        let large = vec![b'z'; 10_000];
        writer.write_payload(b"tiny").await.unwrap();
        writer.write_payload(&large).await.unwrap();
        assert_eq!(&reader.read_payload().await.unwrap()[..], b"tiny");
        assert_eq!(&reader.read_payload().await.unwrap()[..], &large[..]);
        assert_eq!(reader.sequence, 2);
        assert_eq!(reader.compression.as_ref().unwrap().sequence, 2);
    }
}
