//! Query cancellation support.
//!
//! A [`CancelHandle`] cancels the command running on a session from another
//! task. The server has no out-of-band cancel signal, so the handle opens a
//! second, short-lived connection and issues `KILL QUERY <connection id>`.
//!
//! ## Avoiding the wrong kill
//!
//! The kill runs while the session's state lock is held. The session cannot
//! finish the command (or start the next one) until the kill has been
//! delivered, and a kill for a command that already finished is skipped. If
//! the kill lands after the query completed, the session absorbs the pending
//! interruption before it is reused.
//!
//! ## Example
//!
//! ```rust,ignore
//! let handle = session.cancel_handle();
//! let command = Command::new("SELECT SLEEP(60)");
//! let id = command.id();
//!
//! tokio::spawn(async move {
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     handle.cancel_command(id).await;
//! });
//!
//! let err = session.execute(&command).await.unwrap_err();
//! ```

use std::sync::Arc;

use crate::command::Command;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::state::SessionShared;

/// Cancels commands running on one session.
///
/// Cloneable and `Send + Sync`; may be used from any task.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<SessionShared>,
    config: Arc<Config>,
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("session_id", &self.shared.id)
            .field("connection_id", &self.shared.connection_id())
            .finish()
    }
}

impl CancelHandle {
    /// `config` is the configuration of the kill connection.
    pub(crate) fn new(shared: Arc<SessionShared>, config: Arc<Config>) -> Self {
        Self { shared, config }
    }

    /// Signal `command`'s cancellation token and kill it if it is running.
    pub async fn cancel(&self, command: &Command) {
        if let Some(token) = command.token() {
            token.cancel();
        }
        self.cancel_command(command.id()).await;
    }

    /// Kill the command with id `command_id` if it is the one running.
    ///
    /// Best effort: returns without doing anything when another command is
    /// running, when a cancel is already in flight, or after the retry limit
    /// is reached. Failures are logged, not returned.
    pub async fn cancel_command(&self, command_id: u32) {
        if !self.shared.try_start_cancel(command_id).await {
            tracing::debug!(session_id = %self.shared.id, command_id, "cancel not started");
            return;
        }
        let config = Arc::clone(&self.config);
        let outcome = self
            .shared
            .do_cancel(command_id, |connection_id| kill_query(config, connection_id))
            .await;
        if let Err(err) = outcome {
            tracing::warn!(
                session_id = %self.shared.id,
                command_id,
                error = %err,
                "failed to cancel query"
            );
            self.shared.abort_cancel(command_id).await;
        }
    }
}

/// Run `KILL QUERY` for `connection_id` on a fresh connection.
async fn kill_query(config: Arc<Config>, connection_id: u32) -> Result<()> {
    let timeout = config.timeouts.cancellation_timeout;
    let mut session = Session::connect_with(config, None).await?;
    let sql = format!("KILL QUERY {connection_id}");
    let outcome = match tokio::time::timeout(timeout, session.run_internal(&sql)).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(Error::Timeout(format!(
            "KILL QUERY {connection_id} did not complete within {timeout:?}"
        ))),
    };
    session.close().await;
    outcome
}
