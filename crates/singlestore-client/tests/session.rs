//! End-to-end session tests against the in-process mock server.
//!
//! Covers connecting, authentication (plain and over TLS), Unix domain
//! sockets, compression, server details, ping, reset and graceful close.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use singlestore_client::{
    Command, Credentials, ErrorKind, Session, SessionState, SslMode, TlsConfig,
};
use singlestore_testing::{
    CLEAR_PASSWORD, MockResponse, MockServer, NATIVE_PASSWORD, ReceivedCommand,
};

async fn wait_for_command(server: &MockServer, expected: &ReceivedCommand) {
    for _ in 0..100 {
        if server
            .commands()
            .await
            .iter()
            .any(|recorded| &recorded.command == expected)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never received {expected:?}");
}

async fn received_clear_text_password(server: &MockServer) -> bool {
    server
        .commands()
        .await
        .iter()
        .any(|recorded| matches!(recorded.command, ReceivedCommand::ClearTextPassword { .. }))
}

#[cfg(unix)]
fn socket_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("singlestore-{name}-{}.sock", std::process::id()))
}

// =============================================================================
// Connect and authenticate
// =============================================================================

#[tokio::test]
async fn test_connect_over_tls_with_caching_sha2() {
    let server = MockServer::builder().with_tls().build().await.unwrap();
    let config = server
        .session_config()
        .tls(TlsConfig::new().ssl_mode(SslMode::Required));

    let mut session = Session::connect(config).await.unwrap();
    assert_eq!(session.state().await, SessionState::Connected);
    assert!(session.is_secure());

    let results = session.execute(&Command::new("SELECT 1")).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].scalar_i64(), Some(1));

    session.close().await;
    assert_eq!(session.state().await, SessionState::Closed);
    wait_for_command(&server, &ReceivedCommand::Quit).await;
}

#[tokio::test]
async fn test_connect_without_tls_uses_fast_auth() {
    let server = MockServer::builder().build().await.unwrap();

    let mut session = Session::connect(server.session_config()).await.unwrap();
    assert!(!session.is_secure());
    let results = session.execute(&Command::new("SELECT 1")).await.unwrap();
    assert_eq!(results[0].scalar_i64(), Some(1));
    session.close().await;
}

#[tokio::test]
async fn test_connect_with_native_password() {
    let server = MockServer::builder()
        .with_auth_plugin(NATIVE_PASSWORD)
        .with_deprecate_eof(false)
        .build()
        .await
        .unwrap();

    let mut session = Session::connect(server.session_config()).await.unwrap();
    let results = session.execute(&Command::new("SELECT 1")).await.unwrap();
    assert_eq!(results[0].scalar_i64(), Some(1));
    session.close().await;
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let server = MockServer::builder().build().await.unwrap();
    let config = server
        .session_config()
        .credentials(Credentials::new("root", "wrong"));

    let err = Session::connect(config).await.unwrap_err();
    assert_eq!(err.server_error_code(), Some(1045));
    assert!(err.to_string().contains("Access denied for user 'root'"));
}

#[tokio::test]
async fn test_required_tls_fails_when_server_has_none() {
    let server = MockServer::builder().build().await.unwrap();
    let config = server
        .session_config()
        .tls(TlsConfig::new().ssl_mode(SslMode::Required));

    let err = Session::connect(config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnableToConnect);
}

#[tokio::test]
async fn test_clear_password_is_refused_without_tls() {
    let server = MockServer::builder()
        .with_auth_plugin(CLEAR_PASSWORD)
        .build()
        .await
        .unwrap();

    let err = Session::connect(server.session_config()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(
        err.to_string(),
        "Authentication method 'mysql_clear_password' requires a secure connection."
    );
    assert!(!received_clear_text_password(&server).await);
}

#[tokio::test]
async fn test_clear_password_over_tls() {
    let server = MockServer::builder()
        .with_tls()
        .with_auth_plugin(CLEAR_PASSWORD)
        .build()
        .await
        .unwrap();
    let config = server
        .session_config()
        .tls(TlsConfig::new().ssl_mode(SslMode::Required));

    let mut session = Session::connect(config).await.unwrap();
    assert!(session.is_secure());
    wait_for_command(&server, &ReceivedCommand::ClearTextPassword { secure: true }).await;
    session.close().await;
}

// =============================================================================
// Unix domain sockets
// =============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_connect_over_unix_socket() {
    let path = socket_path("connect");
    let server = MockServer::builder()
        .with_unix_socket(&path)
        .build()
        .await
        .unwrap();
    let config = server.session_config().unix_socket(&path);

    let mut session = Session::connect(config).await.unwrap();
    assert!(!session.is_secure());
    let results = session.execute(&Command::new("SELECT 1")).await.unwrap();
    assert_eq!(results[0].scalar_i64(), Some(1));
    session.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_full_auth_does_not_send_clear_password() {
    let path = socket_path("full-auth");
    let server = MockServer::builder()
        .with_unix_socket(&path)
        .with_full_auth()
        .build()
        .await
        .unwrap();
    let config = server.session_config().unix_socket(&path);

    let err = Session::connect(config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(
        err.to_string()
            .starts_with("Authentication method 'caching_sha2_password' failed."),
        "{err}"
    );
    assert!(!received_clear_text_password(&server).await);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_refuses_clear_password_plugin() {
    let path = socket_path("clear-password");
    let server = MockServer::builder()
        .with_unix_socket(&path)
        .with_auth_plugin(CLEAR_PASSWORD)
        .build()
        .await
        .unwrap();
    let config = server.session_config().unix_socket(&path);

    let err = Session::connect(config).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Authentication method 'mysql_clear_password' requires a secure connection."
    );
    assert!(!received_clear_text_password(&server).await);
}

#[tokio::test]
async fn test_full_auth_over_tls_sends_password() {
    let server = MockServer::builder()
        .with_tls()
        .with_full_auth()
        .build()
        .await
        .unwrap();
    let config = server
        .session_config()
        .tls(TlsConfig::new().ssl_mode(SslMode::Required));

    let mut session = Session::connect(config).await.unwrap();
    wait_for_command(&server, &ReceivedCommand::ClearTextPassword { secure: true }).await;
    session.close().await;
}

// =============================================================================
// Compression
// =============================================================================

#[tokio::test]
async fn test_compressed_session_reads_multi_packet_result() {
    // Larger than one wire packet, so the row spans packets and frames.
    let large = "x".repeat(17 * 1024 * 1024 + 100);
    let server = MockServer::builder()
        .with_compression()
        .with_response(
            "SELECT payload FROM blobs",
            MockResponse::scalar_string(large.clone()),
        )
        .build()
        .await
        .unwrap();
    let config = server.session_config().use_compression(true);

    let mut session = Session::connect(config).await.unwrap();
    assert!(session.is_compressed());

    let results = session.execute(&Command::new("SELECT 1")).await.unwrap();
    assert_eq!(results[0].scalar_i64(), Some(1));

    let results = session
        .execute(&Command::new("SELECT payload FROM blobs"))
        .await
        .unwrap();
    assert_eq!(results[0].rows.len(), 1);
    assert_eq!(results[0].rows[0].get_str(0), Some(large.as_str()));

    // Frame sequences restart with the next command.
    assert!(session.try_ping().await.unwrap());
    let results = session.execute(&Command::new("SELECT 1")).await.unwrap();
    assert_eq!(results[0].scalar_i64(), Some(1));
    session.close().await;
}

#[tokio::test]
async fn test_compression_needs_server_support() {
    let server = MockServer::builder().build().await.unwrap();
    let config = server.session_config().use_compression(true);

    let mut session = Session::connect(config).await.unwrap();
    assert!(!session.is_compressed());
    let results = session.execute(&Command::new("SELECT 1")).await.unwrap();
    assert_eq!(results[0].scalar_i64(), Some(1));
    session.close().await;
}

// =============================================================================
// Server details and character set
// =============================================================================

#[tokio::test]
async fn test_server_details_are_loaded() {
    let server = MockServer::builder()
        .with_server_version("5.7.32")
        .with_native_version("8.5.10")
        .build()
        .await
        .unwrap();

    let mut session = Session::connect(server.session_config().fetch_server_details(true))
        .await
        .unwrap();
    assert!(session.connection_id() >= 1000);
    assert_eq!(session.mysql_compat_version().original(), "5.7.32");
    assert_eq!(session.server_version().original(), "8.5.10");
    assert_eq!(session.aggregator_id(), 1);
    assert_eq!(session.character_set(), 45);

    let queries = server.queries().await;
    assert!(queries.iter().any(|q| q.contains("@@memsql_version")));
    assert!(queries.iter().any(|q| q == "SET NAMES utf8mb4;"));
    session.close().await;
}

#[tokio::test]
async fn test_old_server_uses_utf8() {
    let server = MockServer::builder()
        .with_native_version("7.1.2")
        .build()
        .await
        .unwrap();

    let mut session = Session::connect(server.session_config().fetch_server_details(true))
        .await
        .unwrap();
    assert_eq!(session.character_set(), 33);
    assert!(server.queries().await.iter().any(|q| q == "SET NAMES utf8;"));
    session.close().await;
}

// =============================================================================
// Ping, reset and database selection
// =============================================================================

#[tokio::test]
async fn test_ping_and_reset() {
    let server = MockServer::builder().build().await.unwrap();
    let mut session = Session::connect(server.session_config()).await.unwrap();

    assert!(session.try_ping().await.unwrap());
    assert!(session.try_reset_connection().await.unwrap());
    assert_eq!(session.state().await, SessionState::Connected);

    let commands: Vec<_> = server
        .commands()
        .await
        .into_iter()
        .map(|recorded| recorded.command)
        .collect();
    assert!(commands.contains(&ReceivedCommand::Ping));
    assert!(commands.contains(&ReceivedCommand::ResetConnection));
    session.close().await;
}

#[tokio::test]
async fn test_reset_after_database_change_uses_change_user() {
    let server = MockServer::builder().build().await.unwrap();
    let mut session = Session::connect(server.session_config()).await.unwrap();

    session.change_database("analytics").await.unwrap();
    assert_eq!(session.database(), Some("analytics"));
    wait_for_command(&server, &ReceivedCommand::InitDatabase("analytics".into())).await;

    assert!(session.try_reset_connection().await.unwrap());
    assert_eq!(session.database(), None);
    wait_for_command(&server, &ReceivedCommand::ChangeUser("root".into())).await;

    let results = session.execute(&Command::new("SELECT 1")).await.unwrap();
    assert_eq!(results[0].scalar_i64(), Some(1));
    session.close().await;
}

#[tokio::test]
async fn test_closed_session_rejects_commands() {
    let server = MockServer::builder().build().await.unwrap();
    let mut session = Session::connect(server.session_config()).await.unwrap();
    session.close().await;

    let err = session.execute(&Command::new("SELECT 1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disposed);
    // Closing twice is harmless.
    session.close().await;
}
