//! Server-side statement preparation.
//!
//! Each statement of a command is sent as `COM_STMT_PREPARE`; the reply is a
//! header followed by parameter and column definitions, read into the
//! session's metadata arena. Prepared commands are cached per session by
//! their text.

use std::sync::Arc;

use mysql_protocol::command as wire;
use mysql_protocol::{ColumnDefinition, StmtPrepareOk};

use crate::command::{Command, CommandType};
use crate::dispatcher::delimiter_error;
use crate::error::{Error, Result};
use crate::procedure::parse_name;
use crate::session::Session;
use crate::sql;

/// One statement prepared on the server.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Server-assigned statement id.
    pub statement_id: u32,
    /// The text that was prepared.
    pub sql: String,
    /// Parameter definitions.
    pub parameters: Vec<ColumnDefinition>,
    /// Result column definitions.
    pub columns: Vec<ColumnDefinition>,
}

/// The prepared statements of one command, in statement order.
#[derive(Debug, Clone)]
pub struct PreparedStatements {
    statements: Vec<PreparedStatement>,
}

impl PreparedStatements {
    /// Wrap `statements`.
    #[must_use]
    pub fn new(statements: Vec<PreparedStatement>) -> Self {
        Self { statements }
    }

    /// The statements.
    #[must_use]
    pub fn statements(&self) -> &[PreparedStatement] {
        &self.statements
    }

    /// Number of statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Whether there are no statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// The texts sent to the server for a text command.
fn text_statements(command: &Command) -> Result<Vec<String>> {
    let texts: Vec<String> = sql::split(command.text())
        .iter()
        .map(|statement| sql::prepare_text(statement, command.bound_parameters()))
        .collect();
    if texts.is_empty() {
        return Err(Error::InvalidOperation(
            "The CommandText property has not been properly initialized.".into(),
        ));
    }
    Ok(texts)
}

impl Session {
    /// Prepare every statement of `command` on the server.
    ///
    /// Results are cached by command text; a cached command is returned
    /// without contacting the server. Statements evicted from the cache are
    /// closed.
    pub async fn prepare(&mut self, command: &Command) -> Result<Arc<PreparedStatements>> {
        if let Some(cached) = self.statement_cache.get(command.text()) {
            return Ok(cached);
        }
        self.shared.lock().await.verify_connected()?;

        let texts = match command.command_type() {
            CommandType::Text => text_statements(command)?,
            CommandType::StoredProcedure => {
                let default_schema = self.current_database().await?;
                let (schema, name) = parse_name(command.text(), &default_schema);
                let entry = self.load_procedure(&schema, &name).await?;
                vec![entry.procedure()?.prepare_text(command.text())]
            }
        };

        self.shared.lock().await.start_querying(command.id())?;
        let outcome = self.prepare_statements(command.text(), texts).await;
        if self.shared.lock().await.finish_querying()? {
            self.clear_pending_cancellation().await;
        }
        let statements = Arc::new(PreparedStatements::new(outcome?));

        if let Some(displaced) = self
            .statement_cache
            .insert(command.text().to_string(), Arc::clone(&statements))
        {
            self.close_statements(&displaced).await?;
        }
        Ok(statements)
    }

    async fn prepare_statements(
        &mut self,
        command_text: &str,
        texts: Vec<String>,
    ) -> Result<Vec<PreparedStatement>> {
        let mut prepared = Vec::with_capacity(texts.len());
        for text in texts {
            match self.prepare_one(command_text, text).await {
                Ok(statement) => prepared.push(statement),
                Err(err) => {
                    // Release what the server already holds for this command.
                    let partial = PreparedStatements::new(prepared);
                    if let Err(e) = self.close_statements(&partial).await {
                        tracing::debug!(session_id = %self.shared.id, error = %e, "failed to close partial prepare");
                    }
                    return Err(err);
                }
            }
        }
        Ok(prepared)
    }

    async fn prepare_one(&mut self, command_text: &str, sql: String) -> Result<PreparedStatement> {
        self.send(wire::encode_prepare(sql.as_bytes())).await?;
        let reply = match self.receive_reply().await {
            Ok(reply) => reply,
            Err(Error::Server(err)) => return Err(delimiter_error(err, command_text)),
            Err(err) => return Err(err),
        };
        let ok = StmtPrepareOk::decode(&mut reply.clone())?;
        let parameters = self.read_definitions(usize::from(ok.parameter_count)).await?;
        let columns = self.read_definitions(usize::from(ok.column_count)).await?;
        tracing::debug!(
            session_id = %self.shared.id,
            statement_id = ok.statement_id,
            parameters = parameters.len(),
            columns = columns.len(),
            "prepared statement"
        );
        Ok(PreparedStatement {
            statement_id: ok.statement_id,
            sql,
            parameters,
            columns,
        })
    }

    /// Remove `command_text` from the cache and close its statements.
    ///
    /// Returns `false` when nothing was cached for the text.
    pub async fn close_prepared(&mut self, command_text: &str) -> Result<bool> {
        match self.statement_cache.remove(command_text) {
            Some(statements) => {
                self.close_statements(&statements).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_statements(&mut self, statements: &PreparedStatements) -> Result<()> {
        for statement in statements.statements() {
            tracing::trace!(
                session_id = %self.shared.id,
                statement_id = statement.statement_id,
                "closing prepared statement"
            );
            self.send(wire::encode_statement_close(statement.statement_id))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_text_statements() {
        let command = Command::new("SELECT ?; SELECT @id, @user_var").bind(1).bind_named("@id", 2);
        assert_eq!(
            text_statements(&command).unwrap(),
            vec!["SELECT ?".to_string(), "SELECT ?, @user_var".to_string()]
        );

        let err = text_statements(&Command::new(" ; ")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_prepared_statements() {
        let statements = PreparedStatements::new(Vec::new());
        assert!(statements.is_empty());
        assert_eq!(statements.len(), 0);
    }
}
