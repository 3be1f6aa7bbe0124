//! Session pool integration tests.
//!
//! Each test runs its own in-process mock server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use singlestore_client::{Command, SessionState};
use singlestore_pool::{Pool, PoolConfig, PoolError};
use singlestore_testing::{MockServer, ReceivedCommand};

async fn pool_with(server: &MockServer, config: PoolConfig) -> Pool {
    Pool::new(config, server.session_config()).unwrap()
}

// =============================================================================
// Lease and return
// =============================================================================

#[tokio::test]
async fn test_session_is_reused_after_release() {
    let server = MockServer::builder().build().await.unwrap();
    let pool = pool_with(&server, PoolConfig::new().max_sessions(2)).await;

    let mut session = pool.get().await.unwrap();
    assert!(session.id().starts_with(&format!("{}.", pool.id())));
    let results = session.execute(&Command::new("SELECT 1")).await.unwrap();
    assert_eq!(results[0].scalar_i64(), Some(1));
    let first_id = session.id().to_string();
    assert_eq!(pool.status().in_use, 1);
    session.release().await;

    let status = pool.status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.in_use, 0);
    assert!(pool.average_use_time().is_some());

    let session = pool.get().await.unwrap();
    assert_eq!(session.id(), first_id);
    assert_eq!(server.connection_count().await, 1);
    session.release().await;

    assert!(
        server
            .commands()
            .await
            .iter()
            .any(|recorded| recorded.command == ReceivedCommand::ResetConnection)
    );
    pool.close().await;
}

#[tokio::test]
async fn test_acquire_times_out_at_capacity() {
    let server = MockServer::builder().build().await.unwrap();
    let config = PoolConfig::new()
        .max_sessions(1)
        .acquire_timeout(Duration::from_millis(100));
    let pool = pool_with(&server, config).await;

    let held = pool.get().await.unwrap();
    let err = pool.get().await.unwrap_err();
    assert!(matches!(err, PoolError::AcquisitionTimeout(_)));

    held.release().await;
    let session = pool.get().await.unwrap();
    session.release().await;
    pool.close().await;
}

#[tokio::test]
async fn test_detached_session_frees_its_slot() {
    let server = MockServer::builder().build().await.unwrap();
    let config = PoolConfig::new()
        .max_sessions(1)
        .acquire_timeout(Duration::from_millis(500));
    let pool = pool_with(&server, config).await;

    let mut detached = pool.get().await.unwrap().detach().unwrap();
    let session = pool.get().await.unwrap();
    assert_ne!(session.id(), detached.id());
    session.release().await;

    detached.close().await;
    pool.close().await;
}

// =============================================================================
// Clear and close
// =============================================================================

#[tokio::test]
async fn test_clear_retires_sessions() {
    let server = MockServer::builder().build().await.unwrap();
    let pool = pool_with(&server, PoolConfig::new().max_sessions(2)).await;

    let idle = pool.get().await.unwrap();
    let idle_id = idle.id().to_string();
    idle.release().await;
    let leased = pool.get().await.unwrap();
    assert_eq!(leased.id(), idle_id);

    pool.clear().await;
    assert_eq!(pool.status().generation, 1);

    // The leased session belongs to the old generation and is closed.
    leased.release().await;
    assert_eq!(pool.status().idle, 0);

    let fresh = pool.get().await.unwrap();
    assert_ne!(fresh.id(), idle_id);
    assert_eq!(fresh.pool_generation(), 1);
    fresh.release().await;
    pool.close().await;
}

#[tokio::test]
async fn test_closed_pool_rejects_leases() {
    let server = MockServer::builder().build().await.unwrap();
    let pool = pool_with(&server, PoolConfig::new()).await;

    let session = pool.get().await.unwrap();
    session.release().await;
    pool.close().await;

    assert!(pool.is_closed());
    assert_eq!(pool.status().idle, 0);
    assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn test_ping_on_lease() {
    let server = MockServer::builder().build().await.unwrap();
    let config = PoolConfig::new().ping_on_lease(true).reset_on_return(false);
    let pool = pool_with(&server, config).await;

    let session = pool.get().await.unwrap();
    session.release().await;
    let session = pool.get().await.unwrap();
    assert_eq!(session.state().await, SessionState::Connected);
    session.release().await;

    let commands: Vec<_> = server
        .commands()
        .await
        .into_iter()
        .map(|recorded| recorded.command)
        .collect();
    assert!(commands.contains(&ReceivedCommand::Ping));
    assert!(!commands.contains(&ReceivedCommand::ResetConnection));
    pool.close().await;
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let server = MockServer::builder().build().await.unwrap();
    let err = Pool::new(PoolConfig::new().max_sessions(0), server.session_config()).unwrap_err();
    assert!(matches!(err, PoolError::Configuration(_)));
}
