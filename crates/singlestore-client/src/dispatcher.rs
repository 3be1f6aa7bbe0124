//! Command dispatch.
//!
//! One or more commands become a single `COM_QUERY` payload: every statement
//! of every command, parameters substituted as literals and stored
//! procedures rewritten to `CALL`, joined with `;`. The session then runs the
//! payload under its state machine and reads every result.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use mysql_protocol::command as wire;
use tokio::task::JoinHandle;

use crate::command::{Command, CommandListPosition, CommandType, next_command_id};
use crate::error::{Error, Result, ServerError};
use crate::procedure::{self, CachedProcedure, ProcedureEntry, cache_key, parse_name};
use crate::result::ResultSet;
use crate::session::{Session, is_query_interrupted};
use crate::sql;

/// Payloads above this size that fail to send are reported as too large for
/// the server's `max_allowed_packet`.
const PACKET_TOO_LARGE_THRESHOLD: usize = 4_194_304;

/// Writes a list of commands as one text-protocol query.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatenatedPayloadCreator;

impl ConcatenatedPayloadCreator {
    /// Write every remaining command of `position` into `dst`.
    ///
    /// Returns `false` without writing when no command remains, and fails
    /// when the commands hold no statement at all (text made only of `;`).
    /// Stored procedures must already be present in `procedures`.
    pub(crate) fn write_query_command(
        self,
        position: &mut CommandListPosition<'_>,
        procedures: &HashMap<String, ProcedureEntry>,
        default_schema: &str,
        dst: &mut BytesMut,
        query_attributes: bool,
        no_backslash_escapes: bool,
    ) -> Result<bool> {
        if position.is_finished() {
            return Ok(false);
        }
        wire::write_query_header(dst, query_attributes);
        let mut separate = false;
        while let Some(command) = position.current() {
            if command.text().trim().is_empty() {
                return Err(Error::InvalidOperation(
                    "The CommandText property has not been properly initialized.".into(),
                ));
            }
            match command.command_type() {
                CommandType::Text => {
                    for statement in sql::split(command.text()) {
                        if separate {
                            dst.put_u8(b';');
                        }
                        separate = true;
                        sql::write_substituted(
                            dst,
                            &statement,
                            command.bound_parameters(),
                            no_backslash_escapes,
                        )?;
                    }
                }
                CommandType::StoredProcedure => {
                    let (schema, name) = parse_name(command.text(), default_schema);
                    let entry = procedures
                        .get(&cache_key(&schema, &name))
                        .ok_or_else(|| procedure::not_found(&name, &schema))?;
                    if separate {
                        dst.put_u8(b';');
                    }
                    separate = true;
                    entry.procedure()?.write_call(
                        dst,
                        command.text(),
                        command.bound_parameters(),
                        no_backslash_escapes,
                    )?;
                }
            }
            position.advance_command();
        }
        if !separate {
            return Err(Error::InvalidOperation(
                "The CommandText property has not been properly initialized.".into(),
            ));
        }
        Ok(true)
    }
}

/// Report a large payload whose send, or first reply, failed at the transport
/// as a `max_allowed_packet` problem.
///
/// The server may close the connection only after the whole payload is
/// buffered, so the failure can surface on the read instead of the write.
fn translate_send_error(len: usize, err: Error) -> Error {
    if len > PACKET_TOO_LARGE_THRESHOLD && (err.is_io() || err.is_protocol_error()) {
        Error::PacketTooLarge {
            megabytes: len / 1_000_000,
            source: Box::new(err),
        }
    } else {
        err
    }
}

/// An interruption the caller asked for becomes [`Error::Canceled`].
fn translate_interrupted(err: Error, commands: &[Command]) -> Error {
    if is_query_interrupted(&err) && commands.iter().any(Command::is_cancellation_requested) {
        match err {
            Error::Server(server) => Error::Canceled {
                source: Some(server),
            },
            other => other,
        }
    } else {
        err
    }
}

impl Session {
    /// Execute `command` and read all of its results.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Canceled`] when the command's token was canceled
    /// before sending or the server interrupted it after a cancel.
    pub async fn execute(&mut self, command: &Command) -> Result<Vec<ResultSet>> {
        self.execute_batch(std::slice::from_ref(command)).await
    }

    /// Execute `commands` as one payload and read all of their results.
    ///
    /// The first command's timeout and cancellation token govern the batch.
    pub async fn execute_batch(&mut self, commands: &[Command]) -> Result<Vec<ResultSet>> {
        let Some(first) = commands.first() else {
            return Ok(Vec::new());
        };
        if commands.iter().any(Command::is_cancellation_requested) {
            return Err(Error::Canceled { source: None });
        }
        self.shared.lock().await.verify_connected()?;

        let previous = self.current_timeout();
        let timeout = first
            .timeout_override()
            .or(self.config.timeouts.command_timeout);
        self.set_timeout(timeout)?;
        let outcome = self.run_commands(first, commands).await;
        self.restore_timeout(previous);
        outcome
    }

    async fn run_commands(
        &mut self,
        first: &Command,
        commands: &[Command],
    ) -> Result<Vec<ResultSet>> {
        let default_schema = self.load_procedures(commands).await?;

        let mut payload = BytesMut::new();
        let mut position = CommandListPosition::new(commands);
        ConcatenatedPayloadCreator.write_query_command(
            &mut position,
            &self.procedures,
            default_schema.as_deref().unwrap_or_default(),
            &mut payload,
            self.supports_query_attributes(),
            self.no_backslash_escapes,
        )?;
        tracing::debug!(
            session_id = %self.shared.id,
            command_id = first.id(),
            commands = commands.len(),
            bytes = payload.len(),
            "executing"
        );

        let watcher = self.watch_cancellation(first);
        let outcome = self.run_query_payload(first.id(), payload.freeze()).await;
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        outcome.map_err(|err| translate_interrupted(err, commands))
    }

    /// Run one SQL string on the session's own behalf.
    pub(crate) async fn run_internal(&mut self, sql: &str) -> Result<Vec<ResultSet>> {
        let payload = wire::encode_query(sql.as_bytes(), self.supports_query_attributes());
        self.run_query_payload(next_command_id(), payload).await
    }

    /// Send `payload` as command `command_id` and read its results.
    async fn run_query_payload(
        &mut self,
        command_id: u32,
        payload: Bytes,
    ) -> Result<Vec<ResultSet>> {
        self.shared.lock().await.start_querying(command_id)?;
        let len = payload.len();
        let outcome = match self.send(payload).await {
            Ok(()) => match self.receive_reply().await {
                Ok(first) => self.read_results(first).await,
                Err(err) => Err(translate_send_error(len, err)),
            },
            Err(err) => Err(translate_send_error(len, err)),
        };
        if self.shared.lock().await.finish_querying()? {
            self.clear_pending_cancellation().await;
        }
        outcome
    }

    /// Kill the command through a cancel handle when its token fires.
    fn watch_cancellation(&self, command: &Command) -> Option<JoinHandle<()>> {
        let token = command.token()?.clone();
        let handle = self.cancel_handle();
        let command_id = command.id();
        Some(tokio::spawn(async move {
            token.cancelled().await;
            handle.cancel_command(command_id).await;
        }))
    }

    /// Absorb a kill that may have arrived after the command finished.
    pub(crate) async fn clear_pending_cancellation(&mut self) {
        tracing::debug!(session_id = %self.shared.id, "clearing pending cancellation");
        let outcome = async {
            let payload = wire::encode_query(b"DO SLEEP(0);", self.supports_query_attributes());
            self.send(payload).await?;
            let reply = self.receive_reply().await?;
            self.verify_ok(&reply).map(|_| ())
        }
        .await;
        match outcome {
            Ok(()) => {}
            Err(err) if is_query_interrupted(&err) => {
                tracing::trace!(session_id = %self.shared.id, "absorbed pending kill");
            }
            Err(err) => {
                tracing::debug!(session_id = %self.shared.id, error = %err, "failed to clear pending cancellation");
            }
        }
        self.shared.lock().await.finish_clearing();
    }

    /// Load metadata for every stored procedure in `commands` that is not
    /// cached yet.
    ///
    /// Returns the default schema when any command is a stored procedure.
    async fn load_procedures(&mut self, commands: &[Command]) -> Result<Option<String>> {
        if !commands
            .iter()
            .any(|c| c.command_type() == CommandType::StoredProcedure)
        {
            return Ok(None);
        }
        let default_schema = self.current_database().await?;
        for command in commands
            .iter()
            .filter(|c| c.command_type() == CommandType::StoredProcedure)
        {
            let (schema, name) = parse_name(command.text(), &default_schema);
            self.load_procedure(&schema, &name).await?;
        }
        Ok(Some(default_schema))
    }

    /// Cache metadata for `schema.name`, returning the cached entry.
    pub(crate) async fn load_procedure(
        &mut self,
        schema: &str,
        name: &str,
    ) -> Result<ProcedureEntry> {
        let key = cache_key(schema, name);
        if let Some(entry) = self.procedures.get(&key) {
            return Ok(entry.clone());
        }
        let sql = procedure::metadata_query(schema, name)?;
        let mut payload = BytesMut::with_capacity(sql.len() + 3);
        wire::write_query_header(&mut payload, self.supports_query_attributes());
        payload.extend_from_slice(&sql);
        let results = self
            .run_query_payload(next_command_id(), payload.freeze())
            .await?;
        let cached = CachedProcedure::from_results(schema, name, &results)?;
        tracing::debug!(
            session_id = %self.shared.id,
            schema,
            name,
            found = cached.is_some(),
            "loaded procedure metadata"
        );
        let entry = ProcedureEntry::new(schema, name, cached);
        self.procedures.insert(key, entry.clone());
        Ok(entry)
    }

    /// The session's current database, asking the server when none is known.
    pub(crate) async fn current_database(&mut self) -> Result<String> {
        if let Some(database) = self.database().filter(|db| !db.is_empty()) {
            return Ok(database.to_string());
        }
        let results = self.run_internal("SELECT DATABASE();").await?;
        Ok(results
            .first()
            .and_then(|result| result.rows.first())
            .and_then(|row| row.get_str(0))
            .unwrap_or_default()
            .to_string())
    }
}

/// A delimiter error is a parse error on text that uses `DELIMITER`.
pub(crate) fn delimiter_error(err: ServerError, sql_text: &str) -> Error {
    if err.code == mysql_protocol::error_code::PARSE_ERROR
        && sql_text.to_ascii_lowercase().contains("delimiter")
        && sql::split(sql_text)
            .iter()
            .any(|statement| sql::is_delimiter_statement(&statement.sql))
    {
        Error::DelimiterNotSupported(err)
    } else {
        Error::Server(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::procedure::{ParameterDirection, ProcedureParameter};
    use singlestore_codec::CodecError;
    use tokio_util::sync::CancellationToken;

    fn write(commands: &[Command], procedures: &HashMap<String, ProcedureEntry>) -> Result<BytesMut> {
        let mut dst = BytesMut::new();
        let mut position = CommandListPosition::new(commands);
        assert!(ConcatenatedPayloadCreator.write_query_command(
            &mut position,
            procedures,
            "app",
            &mut dst,
            false,
            false,
        )?);
        assert!(position.is_finished());
        Ok(dst)
    }

    #[test]
    fn test_concatenates_statements_and_commands() {
        let commands = [
            Command::new("SELECT ?; SELECT @name").bind(1).bind_named("@name", "x"),
            Command::new("UPDATE t SET a = 1;"),
        ];
        let payload = write(&commands, &HashMap::new()).unwrap();
        assert_eq!(payload[0], 0x03);
        assert_eq!(&payload[1..], b"SELECT 1;SELECT 'x';UPDATE t SET a = 1");
    }

    #[test]
    fn test_query_attributes_block() {
        let commands = [Command::new("SELECT 1")];
        let mut dst = BytesMut::new();
        let mut position = CommandListPosition::new(&commands);
        ConcatenatedPayloadCreator
            .write_query_command(&mut position, &HashMap::new(), "", &mut dst, true, false)
            .unwrap();
        assert_eq!(&dst[..3], &[0x03, 0x00, 0x01]);
        assert!(
            !ConcatenatedPayloadCreator
                .write_query_command(&mut position, &HashMap::new(), "", &mut dst, true, false)
                .unwrap()
        );
    }

    #[test]
    fn test_empty_command_text() {
        let err = write(&[Command::new("  ")], &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn test_separators_only_are_rejected() {
        let mut dst = BytesMut::new();
        let commands = [Command::new(";"), Command::new(" ; ;\n")];
        let mut position = CommandListPosition::new(&commands);
        let err = ConcatenatedPayloadCreator
            .write_query_command(&mut position, &HashMap::new(), "", &mut dst, false, false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);

        // An empty command next to a real one contributes nothing.
        let payload = write(&[Command::new(";"), Command::new("SELECT 1")], &HashMap::new()).unwrap();
        assert_eq!(&payload[1..], b"SELECT 1");
    }

    #[test]
    fn test_stored_procedure_call() {
        let procedure = CachedProcedure {
            schema: "app".into(),
            name: "add_order".into(),
            parameters: vec![ProcedureParameter {
                position: 1,
                name: "qty".into(),
                direction: ParameterDirection::In,
            }],
        };
        let mut procedures = HashMap::new();
        procedures.insert(
            cache_key("app", "add_order"),
            ProcedureEntry::new("app", "add_order", Some(procedure)),
        );
        procedures.insert(cache_key("app", "gone"), ProcedureEntry::new("app", "gone", None));

        let commands = [
            Command::stored_procedure("add_order").bind_named("@qty", 3),
            Command::new("SELECT 1"),
        ];
        let payload = write(&commands, &procedures).unwrap();
        assert_eq!(&payload[1..], b"CALL add_order(3);SELECT 1");

        let err = write(&[Command::stored_procedure("gone")], &procedures).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Procedure or function 'gone' cannot be found in database 'app'."
        );
    }

    #[test]
    fn test_packet_too_large() {
        let io = || Error::Codec(CodecError::ConnectionClosed);
        let err = translate_send_error(16_000_001, io());
        assert_eq!(err.kind(), ErrorKind::PacketTooLarge);
        assert_eq!(
            err.to_string(),
            "Error submitting 16MB packet; ensure 'max_allowed_packet' is greater than 16MB."
        );
        assert_eq!(translate_send_error(1_000, io()).kind(), ErrorKind::Io);
        assert_eq!(
            translate_send_error(16_000_001, Error::Disposed).kind(),
            ErrorKind::Disposed
        );
    }

    #[test]
    fn test_interrupted_translation() {
        let interrupted = || {
            Error::Server(ServerError {
                code: mysql_protocol::error_code::QUERY_INTERRUPTED,
                sql_state: "70100".into(),
                message: "Query execution was interrupted".into(),
            })
        };
        let plain = [Command::new("SELECT SLEEP(10)")];
        assert_eq!(translate_interrupted(interrupted(), &plain).kind(), ErrorKind::Server);

        let token = CancellationToken::new();
        let requested = [Command::new("SELECT SLEEP(10)").cancellation_token(token.clone())];
        token.cancel();
        let err = translate_interrupted(interrupted(), &requested);
        assert!(err.is_canceled());
        assert!(err.server_error().is_some());
    }

    #[test]
    fn test_delimiter_error() {
        let parse_error = || ServerError {
            code: mysql_protocol::error_code::PARSE_ERROR,
            sql_state: "42000".into(),
            message: "You have an error in your SQL syntax".into(),
        };
        let err = delimiter_error(parse_error(), "DELIMITER $$\nCREATE PROCEDURE p() BEGIN END $$");
        assert_eq!(err.kind(), ErrorKind::DelimiterNotSupported);
        let err = delimiter_error(parse_error(), "SELECT delimiter FROM t");
        assert_eq!(err.kind(), ErrorKind::Server);
    }
}
