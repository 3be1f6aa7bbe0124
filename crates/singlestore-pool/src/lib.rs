//! # singlestore-pool
//!
//! Bounded session pool for `singlestore-client`.
//!
//! The session engine only needs a pool to lease sessions out and take them
//! back; this crate supplies that collaborator. It does not evict idle
//! sessions or keep a minimum size.
//!
//! ## Features
//!
//! - A semaphore caps the number of leased sessions
//! - Returned sessions are reset before reuse (`COM_RESET_CONNECTION` or
//!   `COM_CHANGE_USER`)
//! - Optional `COM_PING` on lease
//! - Sessions that failed, or that belong to a cleared generation, are closed
//!   instead of reused
//! - TLS versions learned by a legacy-TLS retry are shared by later sessions
//!
//! ## Example
//!
//! ```rust,ignore
//! use singlestore_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .max_sessions(20)
//!     .acquire_timeout(Duration::from_secs(5));
//!
//! let pool = Pool::new(config, session_config)?;
//! let mut session = pool.get().await?;
//! session.execute(&Command::new("SELECT 1")).await?;
//! session.release().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod pool;

pub use config::PoolConfig;
pub use error::PoolError;
pub use pool::{Pool, PoolStatus, PooledSession};
