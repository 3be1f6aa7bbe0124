//! Session lifecycle state.
//!
//! ## State Transitions
//!
//! ```text
//! Created -> Connecting -> Connected (via connect)
//! Connected -> Querying (via start_querying)
//! Querying -> CancelingQuery (via try_start_cancel)
//! CancelingQuery -> Querying (via abort_cancel)
//! Querying -> Connected (via finish_querying)
//! CancelingQuery -> ClearingPendingCancellation -> Connected (via finish_querying)
//! Connected | Failed -> Closing -> Closed (via close)
//! any -> Failed (via set_failed)
//! ```
//!
//! The state, the id of the running command and the cancel attempt counter
//! live together behind one async mutex. A cancel holds that mutex while it
//! kills the query, so the command cannot finish and a new one cannot start
//! until the kill is resolved.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::pool::SessionOwner;

/// Maximum cancel attempts per command.
pub const MAX_CANCEL_ATTEMPTS: u32 = 10;

const CONNECTION_REUSE_MESSAGE: &str =
    "This SingleStoreConnection is already in use. See https://fl.vu/mysql-conn-reuse";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Constructed, not yet connecting.
    Created,
    /// Opening the transport and authenticating.
    Connecting,
    /// Idle and usable.
    Connected,
    /// A command is running.
    Querying,
    /// A kill for the running command is being issued.
    CancelingQuery,
    /// The command finished while a kill was in flight; the kill is being absorbed.
    ClearingPendingCancellation,
    /// Shutting down.
    Closing,
    /// Shut down.
    Closed,
    /// Unusable after an error.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The mutex-protected part of a session.
#[derive(Debug)]
pub(crate) struct StateMachine {
    state: SessionState,
    active_command_id: u32,
    cancel_attempts: u32,
}

impl StateMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: SessionState::Created,
            active_command_id: 0,
            cancel_attempts: 0,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn active_command_id(&self) -> u32 {
        self.active_command_id
    }

    pub(crate) fn set(&mut self, state: SessionState) {
        tracing::debug!(from = %self.state, to = %state, "session state change");
        self.state = state;
    }

    pub(crate) fn begin_connect(&mut self) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(Error::InvalidOperation(format!(
                "Expected state to be Created but was {}.",
                self.state
            )));
        }
        self.set(SessionState::Connecting);
        Ok(())
    }

    /// Fail unless the session is idle and connected.
    pub(crate) fn verify_connected(&self) -> Result<()> {
        match self.state {
            SessionState::Connected => Ok(()),
            SessionState::Closed => Err(Error::Disposed),
            other => {
                tracing::error!(state = %other, "session used in an invalid state");
                Err(Error::InvalidOperation(format!(
                    "Expected state to be Connected but was {other}."
                )))
            }
        }
    }

    /// Fail unless bytes may be exchanged in the current state.
    pub(crate) fn verify_can_communicate(&self) -> Result<()> {
        match self.state {
            SessionState::Connecting
            | SessionState::Connected
            | SessionState::Querying
            | SessionState::CancelingQuery
            | SessionState::ClearingPendingCancellation
            | SessionState::Closing => Ok(()),
            SessionState::Closed => Err(Error::Disposed),
            other => {
                tracing::error!(state = %other, "send or receive on a session that is not connected");
                Err(Error::InvalidOperation("ServerSession is not connected.".into()))
            }
        }
    }

    pub(crate) fn start_querying(&mut self, command_id: u32) -> Result<()> {
        if matches!(
            self.state,
            SessionState::Querying | SessionState::CancelingQuery
        ) {
            tracing::error!(state = %self.state, command_id, "session already in use");
            return Err(Error::InvalidOperation(CONNECTION_REUSE_MESSAGE.into()));
        }
        self.verify_connected()?;
        self.set(SessionState::Querying);
        self.cancel_attempts = 0;
        self.active_command_id = command_id;
        Ok(())
    }

    /// End the running command. Returns `true` when a kill may still be in
    /// flight and must be absorbed before the session is reused.
    pub(crate) fn finish_querying(&mut self) -> Result<bool> {
        self.active_command_id = 0;
        match self.state {
            SessionState::Querying => {
                self.set(SessionState::Connected);
                Ok(false)
            }
            SessionState::CancelingQuery => {
                self.set(SessionState::ClearingPendingCancellation);
                Ok(true)
            }
            SessionState::Failed => Ok(false),
            other => Err(Error::InvalidOperation(format!(
                "Expected state to be Querying or Failed but was {other}."
            ))),
        }
    }

    pub(crate) fn finish_clearing(&mut self) {
        if self.state == SessionState::ClearingPendingCancellation {
            self.set(SessionState::Connected);
        }
    }

    pub(crate) fn try_start_cancel(&mut self, command_id: u32) -> bool {
        if self.active_command_id != command_id || self.state != SessionState::Querying {
            return false;
        }
        if self.cancel_attempts >= MAX_CANCEL_ATTEMPTS {
            return false;
        }
        self.cancel_attempts += 1;
        self.set(SessionState::CancelingQuery);
        true
    }

    pub(crate) fn abort_cancel(&mut self, command_id: u32) {
        if self.active_command_id == command_id && self.state == SessionState::CancelingQuery {
            self.set(SessionState::Querying);
        }
    }

    pub(crate) fn set_failed(&mut self) {
        self.set(SessionState::Failed);
    }
}

/// State shared between a session and its cancel handles.
pub(crate) struct SessionShared {
    pub(crate) id: String,
    state: Mutex<StateMachine>,
    connection_id: AtomicU32,
    owner: parking_lot::Mutex<Option<Weak<dyn SessionOwner>>>,
}

impl fmt::Debug for SessionShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionShared")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id())
            .finish_non_exhaustive()
    }
}

impl SessionShared {
    pub(crate) fn new(id: String) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: Mutex::new(StateMachine::new()),
            connection_id: AtomicU32::new(0),
            owner: parking_lot::Mutex::new(None),
        })
    }

    pub(crate) async fn lock(&self) -> tokio::sync::MutexGuard<'_, StateMachine> {
        self.state.lock().await
    }

    pub(crate) async fn state(&self) -> SessionState {
        self.state.lock().await.state()
    }

    pub(crate) fn connection_id(&self) -> u32 {
        self.connection_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_connection_id(&self, id: u32) {
        self.connection_id.store(id, Ordering::Release);
    }

    pub(crate) fn set_owner(&self, owner: Weak<dyn SessionOwner>) {
        *self.owner.lock() = Some(owner);
    }

    /// Mark the session failed and tell its owner, if the owner is still alive.
    pub(crate) async fn set_failed(&self) {
        self.state.lock().await.set_failed();
        let owner = self.owner.lock().as_ref().and_then(Weak::upgrade);
        if let Some(owner) = owner {
            owner.session_failed(&self.id);
        }
    }

    pub(crate) async fn try_start_cancel(&self, command_id: u32) -> bool {
        self.state.lock().await.try_start_cancel(command_id)
    }

    pub(crate) async fn abort_cancel(&self, command_id: u32) {
        self.state.lock().await.abort_cancel(command_id);
    }

    /// Run `kill` for the session's connection id while holding the state lock.
    ///
    /// Returns `Ok(false)` without calling `kill` when `command_id` is no
    /// longer the command being canceled.
    pub(crate) async fn do_cancel<F, Fut>(&self, command_id: u32, kill: F) -> Result<bool>
    where
        F: FnOnce(u32) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let guard = self.state.lock().await;
        if guard.active_command_id() != command_id
            || guard.state() != SessionState::CancelingQuery
        {
            tracing::debug!(
                session_id = %self.id,
                command_id,
                active_command_id = guard.active_command_id(),
                "cancel skipped: command no longer running"
            );
            return Ok(false);
        }
        let connection_id = self.connection_id();
        tracing::debug!(session_id = %self.id, connection_id, command_id, "killing query");
        kill(connection_id).await?;
        drop(guard);
        Ok(true)
    }
}
