//! The seam between a session and the pool that owns it.
//!
//! The pool implementation lives in `singlestore-pool`; the session only sees
//! these traits.

use std::time::Duration;

use async_trait::async_trait;
use singlestore_tls::TlsVersions;

use crate::session::Session;

/// A pool that leases sessions.
#[async_trait]
pub trait SessionPool: Send + Sync {
    /// Pool identifier; session ids are `"{pool_id}.{seq}"`.
    fn id(&self) -> u64;

    /// Next session sequence number within this pool.
    fn next_session_sequence(&self) -> u64;

    /// Current generation; sessions from an older generation are discarded on return.
    fn generation(&self) -> u64;

    /// TLS versions learned by an earlier legacy-TLS retry, if any.
    fn tls_versions(&self) -> Option<TlsVersions>;

    /// Remember the TLS versions that let a connection succeed.
    fn set_tls_versions(&self, versions: TlsVersions);

    /// Record how long a session was leased.
    fn record_use_time(&self, elapsed: Duration);

    /// Take a session back.
    async fn return_session(&self, session: Session);
}

/// Notified when an owned session fails.
pub trait SessionOwner: Send + Sync {
    /// The session with id `session_id` entered the failed state.
    fn session_failed(&self, session_id: &str);
}
