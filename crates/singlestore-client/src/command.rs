//! Commands and the cursor over a list of commands.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::sql::{Parameters, Value};

static NEXT_COMMAND_ID: AtomicU32 = AtomicU32::new(1);

/// Allocate a command id for work the session issues on its own behalf.
pub(crate) fn next_command_id() -> u32 {
    NEXT_COMMAND_ID.fetch_add(1, Ordering::Relaxed)
}

/// How a command's text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandType {
    /// SQL text, possibly several statements.
    #[default]
    Text,
    /// The name of a stored procedure.
    StoredProcedure,
}

/// A unit of work sent to the server.
///
/// Every command has a process-unique id; the session records the id of the
/// running command so a cancel can target exactly that command.
#[derive(Debug, Clone)]
pub struct Command {
    id: u32,
    text: String,
    command_type: CommandType,
    parameters: Parameters,
    timeout: Option<Duration>,
    cancellation: Option<CancellationToken>,
}

impl Command {
    /// A SQL text command.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_type(text, CommandType::Text)
    }

    /// A stored procedure call by name.
    pub fn stored_procedure(name: impl Into<String>) -> Self {
        Self::with_type(name, CommandType::StoredProcedure)
    }

    fn with_type(text: impl Into<String>, command_type: CommandType) -> Self {
        Self {
            id: next_command_id(),
            text: text.into(),
            command_type,
            parameters: Parameters::new(),
            timeout: None,
            cancellation: None,
        }
    }

    /// Replace the parameters.
    #[must_use]
    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Add a positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.parameters = self.parameters.push(value);
        self
    }

    /// Add a named parameter.
    #[must_use]
    pub fn bind_named(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.parameters = self.parameters.named(name, value);
        self
    }

    /// Override the configured command timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Use `token` to observe cancellation.
    #[must_use]
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// The command id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The SQL text or procedure name.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// How the text is interpreted.
    #[must_use]
    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    /// The bound parameters.
    #[must_use]
    pub fn bound_parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// The timeout override, if any.
    #[must_use]
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    /// The token observed for cancellation, if one was attached.
    #[must_use]
    pub fn token(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// A cursor over a list of commands and, within the current command, its
/// prepared statements.
#[derive(Debug, Clone)]
pub struct CommandListPosition<'a> {
    commands: &'a [Command],
    command_index: usize,
    prepared_statement_index: usize,
}

impl<'a> CommandListPosition<'a> {
    /// Start at the first command.
    #[must_use]
    pub fn new(commands: &'a [Command]) -> Self {
        Self {
            commands,
            command_index: 0,
            prepared_statement_index: 0,
        }
    }

    /// All commands.
    #[must_use]
    pub fn commands(&self) -> &'a [Command] {
        self.commands
    }

    /// Index of the current command.
    #[must_use]
    pub fn command_index(&self) -> usize {
        self.command_index
    }

    /// Index of the current prepared statement within the current command.
    #[must_use]
    pub fn prepared_statement_index(&self) -> usize {
        self.prepared_statement_index
    }

    /// The current command, or `None` once every command has been consumed.
    #[must_use]
    pub fn current(&self) -> Option<&'a Command> {
        self.commands.get(self.command_index)
    }

    /// Commands not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> &'a [Command] {
        self.commands.get(self.command_index..).unwrap_or_default()
    }

    /// Whether every command has been consumed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.command_index >= self.commands.len()
    }

    /// Move to the next prepared statement of the current command.
    pub fn advance_statement(&mut self) {
        self.prepared_statement_index += 1;
    }

    /// Move to the next command.
    pub fn advance_command(&mut self) {
        self.command_index += 1;
        self.prepared_statement_index = 0;
    }

    /// Consume every remaining command.
    pub fn finish(&mut self) {
        self.command_index = self.commands.len();
        self.prepared_statement_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_unique() {
        let a = Command::new("SELECT 1");
        let b = Command::new("SELECT 1");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_builder() {
        let token = CancellationToken::new();
        let cmd = Command::stored_procedure("add_order")
            .bind_named("@id", 5)
            .timeout(Duration::from_secs(3))
            .cancellation_token(token.clone());
        assert_eq!(cmd.command_type(), CommandType::StoredProcedure);
        assert_eq!(cmd.bound_parameters().len(), 1);
        assert_eq!(cmd.timeout_override(), Some(Duration::from_secs(3)));
        assert!(!cmd.is_cancellation_requested());
        token.cancel();
        assert!(cmd.is_cancellation_requested());
        assert!(!Command::new("SELECT 1").is_cancellation_requested());
    }

    #[test]
    fn test_position() {
        let commands = [Command::new("a"), Command::new("b")];
        let mut position = CommandListPosition::new(&commands);
        assert_eq!(position.current().map(Command::text), Some("a"));
        position.advance_statement();
        assert_eq!(position.prepared_statement_index(), 1);
        position.advance_command();
        assert_eq!(position.prepared_statement_index(), 0);
        assert_eq!(position.remaining().len(), 1);
        position.finish();
        assert!(position.is_finished());
        assert!(position.current().is_none());
        assert!(position.remaining().is_empty());
    }
}
