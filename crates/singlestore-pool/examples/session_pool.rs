//! Session pool example.
//!
//! # Running
//!
//! ```bash
//! export SINGLESTORE_HOST=localhost
//! export SINGLESTORE_USER=root
//! export SINGLESTORE_PASSWORD=secret
//!
//! cargo run --example session_pool
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use singlestore_client::{Command, Config, Credentials};
use singlestore_pool::{Pool, PoolConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let host = std::env::var("SINGLESTORE_HOST").unwrap_or_else(|_| "localhost".into());
    let user = std::env::var("SINGLESTORE_USER").unwrap_or_else(|_| "root".into());
    let password = std::env::var("SINGLESTORE_PASSWORD").unwrap_or_default();

    let config = Config::new()
        .host(host)
        .credentials(Credentials::new(user, password));
    let pool = Pool::new(
        PoolConfig::new()
            .max_sessions(4)
            .acquire_timeout(Duration::from_secs(5)),
        config,
    )?;

    let mut tasks = Vec::new();
    for i in 0..8_i64 {
        let pool = pool.clone();
        tasks.push(tokio::spawn(async move {
            let mut session = pool.get().await?;
            let results = session.execute(&Command::new("SELECT ?").bind(i)).await?;
            let value = results[0].scalar_i64();
            session.release().await;
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(value)
        }));
    }
    for task in tasks {
        println!("result: {:?}", task.await??);
    }

    let status = pool.status();
    println!(
        "idle={} in_use={} max={} average use={:?}",
        status.idle,
        status.in_use,
        status.max,
        pool.average_use_time()
    );
    pool.close().await;
    Ok(())
}
