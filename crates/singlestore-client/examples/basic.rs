//! Basic session usage.
//!
//! # Running
//!
//! ```bash
//! export SINGLESTORE_HOST=localhost
//! export SINGLESTORE_USER=root
//! export SINGLESTORE_PASSWORD=secret
//!
//! cargo run --example basic
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use singlestore_client::{Command, Config, Credentials, Session};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let host = std::env::var("SINGLESTORE_HOST").unwrap_or_else(|_| "localhost".into());
    let user = std::env::var("SINGLESTORE_USER").unwrap_or_else(|_| "root".into());
    let password = std::env::var("SINGLESTORE_PASSWORD").unwrap_or_default();

    let config = Config::new()
        .host(host)
        .port(3306)
        .credentials(Credentials::new(user, password));

    let mut session = Session::connect(config).await?;
    println!(
        "Connected to SingleStore {} (MySQL {}), connection id {}",
        session.server_version().original(),
        session.mysql_compat_version().original(),
        session.connection_id()
    );

    let results = session
        .execute(&Command::new("SELECT ? + 1").bind(41))
        .await?;
    println!("SELECT ? + 1 => {:?}", results[0].scalar_i64());

    let results = session
        .execute_batch(&[
            Command::new("SELECT DATABASE()"),
            Command::new("SELECT @@memsql_version"),
        ])
        .await?;
    for result in &results {
        for row in &result.rows {
            println!("  {:?}", row.get_str(0));
        }
    }

    session.close().await;
    Ok(())
}
