//! Session pool implementation.

use std::collections::{HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use singlestore_client::{
    Config, Session, SessionOwner, SessionPool, SessionState, TlsVersions,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::error::PoolError;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A bounded pool of SingleStore sessions.
///
/// Cloning a `Pool` is cheap; clones share the same sessions.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

#[derive(Debug, Default)]
struct UseStats {
    leases: u64,
    total: Duration,
}

struct PoolInner {
    id: u64,
    config: PoolConfig,
    session_config: Arc<Config>,
    idle: Mutex<VecDeque<Session>>,
    permits: Arc<Semaphore>,
    sequence: AtomicU64,
    generation: AtomicU64,
    tls_versions: Mutex<Option<TlsVersions>>,
    failed: Mutex<HashSet<String>>,
    closed: AtomicBool,
    stats: Mutex<UseStats>,
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

impl Pool {
    /// Create a pool that opens sessions with `session_config`.
    ///
    /// No session is opened until the first [`Pool::get`].
    pub fn new(config: PoolConfig, session_config: Config) -> Result<Self, PoolError> {
        config.validate()?;
        session_config.validate()?;
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(pool_id = id, max_sessions = config.max_sessions, "creating session pool");
        Ok(Self {
            inner: Arc::new(PoolInner {
                id,
                permits: Arc::new(Semaphore::new(config.max_sessions as usize)),
                config,
                session_config: Arc::new(session_config),
                idle: Mutex::new(VecDeque::new()),
                sequence: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                tls_versions: Mutex::new(None),
                failed: Mutex::new(HashSet::new()),
                closed: AtomicBool::new(false),
                stats: Mutex::new(UseStats::default()),
            }),
        })
    }

    /// Lease a session from the pool.
    ///
    /// Reuses an idle session when one is available and opens a new one
    /// otherwise. Waits for a returned session when the pool is at capacity,
    /// up to the acquire timeout.
    pub async fn get(&self) -> Result<PooledSession, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        tracing::trace!(pool_id = self.inner.id, "acquiring session from pool");

        let timeout = self.inner.config.acquire_timeout;
        let permit = match tokio::time::timeout(
            timeout,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::PoolClosed),
            Err(_) => return Err(PoolError::AcquisitionTimeout(timeout)),
        };

        let mut session = match self.take_idle().await? {
            Some(session) => session,
            None => self.open().await?,
        };
        let owner: std::sync::Weak<dyn SessionOwner> = Arc::<PoolInner>::downgrade(&self.inner);
        session.set_owner(owner);
        session.mark_leased();
        tracing::debug!(pool_id = self.inner.id, session_id = session.id(), "leased session");
        Ok(PooledSession {
            session: Some(session),
            permit: Some(permit),
        })
    }

    async fn take_idle(&self) -> Result<Option<Session>, PoolError> {
        loop {
            let Some(mut session) = self.inner.idle.lock().pop_front() else {
                return Ok(None);
            };
            if !self.inner.config.ping_on_lease || session.try_ping().await? {
                return Ok(Some(session));
            }
            tracing::debug!(session_id = session.id(), "discarding idle session that failed ping");
            self.inner.discard(session).await;
        }
    }

    async fn open(&self) -> Result<Session, PoolError> {
        let pool: Arc<dyn SessionPool> = self.inner.clone();
        let session =
            Session::connect_with(Arc::clone(&self.inner.session_config), Some(pool)).await?;
        Ok(session)
    }

    /// Discard every idle session and retire sessions currently leased.
    ///
    /// Leased sessions are closed instead of reused when they come back.
    pub async fn clear(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(pool_id = self.inner.id, generation, "clearing session pool");
        self.inner.close_idle().await;
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let max = self.inner.config.max_sessions;
        let in_use = max.saturating_sub(self.inner.permits.available_permits() as u32);
        PoolStatus {
            idle: self.inner.idle.lock().len() as u32,
            in_use,
            max,
            generation: self.inner.generation.load(Ordering::Acquire),
        }
    }

    /// Mean time sessions were leased for, over every return so far.
    #[must_use]
    pub fn average_use_time(&self) -> Option<Duration> {
        let stats = self.inner.stats.lock();
        u32::try_from(stats.leases)
            .ok()
            .filter(|leases| *leases > 0)
            .map(|leases| stats.total / leases)
    }

    /// Close the pool and every idle session.
    ///
    /// Leased sessions are closed when they are returned.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();
        self.inner.close_idle().await;
        tracing::info!(pool_id = self.inner.id, "session pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Identifier used as the prefix of session ids.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl PoolInner {
    async fn close_idle(&self) {
        let sessions: Vec<Session> = self.idle.lock().drain(..).collect();
        for session in sessions {
            self.discard(session).await;
        }
    }

    async fn discard(&self, mut session: Session) {
        self.failed.lock().remove(session.id());
        session.close().await;
    }

    fn should_discard(&self, session: &Session, state: SessionState) -> bool {
        self.closed.load(Ordering::Acquire)
            || session.pool_generation() != self.generation.load(Ordering::Acquire)
            || self.failed.lock().contains(session.id())
            || state != SessionState::Connected
    }
}

#[async_trait]
impl SessionPool for PoolInner {
    fn id(&self) -> u64 {
        self.id
    }

    fn next_session_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn tls_versions(&self) -> Option<TlsVersions> {
        *self.tls_versions.lock()
    }

    fn set_tls_versions(&self, versions: TlsVersions) {
        tracing::warn!(pool_id = self.id, ?versions, "pool restricted to legacy TLS versions");
        *self.tls_versions.lock() = Some(versions);
    }

    fn record_use_time(&self, elapsed: Duration) {
        let mut stats = self.stats.lock();
        stats.leases += 1;
        stats.total += elapsed;
    }

    async fn return_session(&self, mut session: Session) {
        let state = session.state().await;
        if self.should_discard(&session, state) {
            tracing::debug!(session_id = session.id(), %state, "closing returned session");
            self.discard(session).await;
            return;
        }
        if self.config.reset_on_return {
            match session.try_reset_connection().await {
                Ok(true) => {}
                Ok(false) => {
                    self.discard(session).await;
                    return;
                }
                Err(err) => {
                    tracing::warn!(session_id = session.id(), error = %err, "session reset failed");
                    self.discard(session).await;
                    return;
                }
            }
        }
        tracing::trace!(session_id = session.id(), "session returned to idle queue");
        self.idle.lock().push_back(session);
    }
}

impl SessionOwner for PoolInner {
    fn session_failed(&self, session_id: &str) {
        tracing::debug!(pool_id = self.id, session_id, "pooled session failed");
        self.failed.lock().insert(session_id.to_string());
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle sessions available.
    pub idle: u32,
    /// Number of sessions currently leased.
    pub in_use: u32,
    /// Maximum leased sessions.
    pub max: u32,
    /// Current pool generation.
    pub generation: u64,
}

/// A session leased from the pool.
///
/// Call [`PooledSession::release`] to hand it back. Dropping it also returns
/// the session, from a spawned task, when a tokio runtime is available.
pub struct PooledSession {
    session: Option<Session>,
    permit: Option<OwnedSemaphorePermit>,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("session", &self.session)
            .finish()
    }
}

impl PooledSession {
    /// Return the session to the pool.
    pub async fn release(mut self) {
        let permit = self.permit.take();
        if let Some(session) = self.session.take() {
            session.return_to_pool().await;
        }
        drop(permit);
    }

    /// Take the session out of the pool's accounting.
    ///
    /// The session will not be returned to the pool; its slot is freed.
    #[must_use]
    pub fn detach(mut self) -> Option<Session> {
        self.session.take()
    }
}

impl Deref for PooledSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        match &self.session {
            Some(session) => session,
            None => unreachable!("pooled session used after release"),
        }
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Session {
        match &mut self.session {
            Some(session) => session,
            None => unreachable!("pooled session used after release"),
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    session.return_to_pool().await;
                    drop(permit);
                });
            }
            Err(_) => {
                tracing::debug!(session_id = session.id(), "no runtime; dropping pooled session");
            }
        }
    }
}
