//! Stored procedure metadata.
//!
//! A stored-procedure command is sent as `CALL name(...)`. The parameter list
//! comes from `information_schema` and is cached per session by procedure
//! name; a [`ProcedureEntry::Missing`] records that the procedure does not
//! exist so the lookup is not repeated.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::result::ResultSet;
use crate::sql::{Parameters, Value, write_literal};

/// Direction of a stored procedure parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterDirection {
    /// `IN`
    In,
    /// `OUT`
    Out,
    /// `INOUT`
    InOut,
}

impl ParameterDirection {
    fn parse(mode: &str) -> Self {
        match mode.to_ascii_uppercase().as_str() {
            "OUT" => Self::Out,
            "INOUT" => Self::InOut,
            _ => Self::In,
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureParameter {
    /// 1-based position.
    pub position: u32,
    /// Declared name.
    pub name: String,
    /// Direction.
    pub direction: ParameterDirection,
}

/// A stored procedure's declared parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedProcedure {
    /// Database holding the procedure.
    pub schema: String,
    /// Procedure name.
    pub name: String,
    /// Parameters in declaration order.
    pub parameters: Vec<ProcedureParameter>,
}

/// Split `schema.name` (either part optionally back-quoted) and fall back to
/// `default_schema`.
#[must_use]
pub fn parse_name(name: &str, default_schema: &str) -> (String, String) {
    let (first, rest) = split_identifier(name.trim());
    match rest.strip_prefix('.') {
        Some(rest) => (first, split_identifier(rest).0),
        None => (default_schema.to_string(), first),
    }
}

fn split_identifier(s: &str) -> (String, &str) {
    let Some(quoted) = s.strip_prefix('`') else {
        let end = s.find('.').unwrap_or(s.len());
        return (s[..end].to_string(), &s[end..]);
    };
    let mut out = String::new();
    let mut chars = quoted.char_indices();
    while let Some((i, c)) = chars.next() {
        if c != '`' {
            out.push(c);
        } else if quoted[i + 1..].starts_with('`') {
            out.push('`');
            chars.next();
        } else {
            return (out, &quoted[i + 1..]);
        }
    }
    (out, "")
}

/// The query that loads a procedure's metadata: its existence, then its
/// parameters.
pub(crate) fn metadata_query(schema: &str, name: &str) -> Result<BytesMut> {
    let mut sql = BytesMut::with_capacity(256);
    let schema = Value::Text(schema.to_string());
    let name = Value::Text(name.to_string());
    sql.put_slice(b"SELECT COUNT(*) FROM information_schema.ROUTINES WHERE ROUTINE_SCHEMA = ");
    write_literal(&mut sql, &schema, false)?;
    sql.put_slice(b" AND ROUTINE_NAME = ");
    write_literal(&mut sql, &name, false)?;
    sql.put_slice(
        b"; SELECT ORDINAL_POSITION, PARAMETER_MODE, PARAMETER_NAME FROM information_schema.PARAMETERS WHERE SPECIFIC_SCHEMA = ",
    );
    write_literal(&mut sql, &schema, false)?;
    sql.put_slice(b" AND SPECIFIC_NAME = ");
    write_literal(&mut sql, &name, false)?;
    sql.put_slice(b" ORDER BY ORDINAL_POSITION");
    Ok(sql)
}

impl CachedProcedure {
    /// Build from the two result sets of [`metadata_query`]. Returns `None`
    /// when the procedure does not exist.
    pub(crate) fn from_results(
        schema: &str,
        name: &str,
        results: &[ResultSet],
    ) -> Result<Option<Self>> {
        let [routines, parameters] = results else {
            return Err(Error::InvalidOperation(format!(
                "expected 2 result sets loading procedure metadata, got {}",
                results.len()
            )));
        };
        let exists = routines
            .rows
            .first()
            .and_then(|row| row.get_i64(0))
            .is_some_and(|count| count > 0);
        if !exists {
            return Ok(None);
        }

        let parameters = parameters
            .rows
            .iter()
            .filter_map(|row| {
                let position = row.get_i64(0)?;
                // Position 0 is a function's return value.
                (position > 0).then(|| ProcedureParameter {
                    position: position as u32,
                    direction: ParameterDirection::parse(row.get_str(1).unwrap_or("IN")),
                    name: row.get_str(2).unwrap_or_default().to_string(),
                })
            })
            .collect();
        Ok(Some(Self {
            schema: schema.to_string(),
            name: name.to_string(),
            parameters,
        }))
    }

    /// `CALL name(?,?,...);` for a server-side prepare.
    #[must_use]
    pub fn prepare_text(&self, command_text: &str) -> String {
        let marks = vec!["?"; self.parameters.len()].join(",");
        format!("CALL {command_text}({marks});")
    }

    /// Append `CALL name(v1, v2, ...)` with the values bound by name.
    pub fn write_call(
        &self,
        dst: &mut BytesMut,
        command_text: &str,
        parameters: &Parameters,
        no_backslash_escapes: bool,
    ) -> Result<()> {
        dst.put_slice(b"CALL ");
        dst.put_slice(command_text.as_bytes());
        dst.put_u8(b'(');
        for (i, declared) in self.parameters.iter().enumerate() {
            if declared.direction != ParameterDirection::In {
                return Err(Error::NotSupported(format!(
                    "Output parameter '{}' of procedure '{}' is not supported",
                    declared.name, self.name
                )));
            }
            let parameter = parameters.find(&declared.name).ok_or_else(|| {
                Error::InvalidOperation(format!(
                    "Parameter '{}' not found in the collection.",
                    declared.name
                ))
            })?;
            if i > 0 {
                dst.put_u8(b',');
            }
            write_literal(dst, &parameter.value, no_backslash_escapes)?;
        }
        dst.put_u8(b')');
        Ok(())
    }
}

/// A session's cached lookup of one procedure.
#[derive(Debug, Clone)]
pub(crate) enum ProcedureEntry {
    Found(Arc<CachedProcedure>),
    Missing { schema: String, name: String },
}

impl ProcedureEntry {
    pub(crate) fn new(schema: &str, name: &str, procedure: Option<CachedProcedure>) -> Self {
        match procedure {
            Some(procedure) => Self::Found(Arc::new(procedure)),
            None => Self::Missing {
                schema: schema.to_string(),
                name: name.to_string(),
            },
        }
    }

    /// The procedure, or the not-found error.
    pub(crate) fn procedure(&self) -> Result<&CachedProcedure> {
        match self {
            Self::Found(procedure) => Ok(procedure),
            Self::Missing { schema, name } => Err(not_found(name, schema)),
        }
    }
}

/// Cache key for a procedure reference.
pub(crate) fn cache_key(schema: &str, name: &str) -> String {
    format!("`{schema}`.`{name}`").to_ascii_lowercase()
}

/// The error for a stored procedure that does not exist.
pub(crate) fn not_found(name: &str, schema: &str) -> Error {
    Error::InvalidOperation(format!(
        "Procedure or function '{name}' cannot be found in database '{schema}'."
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn procedure(directions: &[ParameterDirection]) -> CachedProcedure {
        CachedProcedure {
            schema: "app".into(),
            name: "add_order".into(),
            parameters: directions
                .iter()
                .enumerate()
                .map(|(i, d)| ProcedureParameter {
                    position: i as u32 + 1,
                    name: format!("p{}", i + 1),
                    direction: *d,
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(parse_name("proc", "db"), ("db".into(), "proc".into()));
        assert_eq!(parse_name("other.proc", "db"), ("other".into(), "proc".into()));
        assert_eq!(parse_name("`a.b`", "db"), ("db".into(), "a.b".into()));
        assert_eq!(parse_name("`s`.`p`", "db"), ("s".into(), "p".into()));
    }

    #[test]
    fn test_prepare_text() {
        assert_eq!(procedure(&[]).prepare_text("add_order"), "CALL add_order();");
        assert_eq!(
            procedure(&[ParameterDirection::In, ParameterDirection::In]).prepare_text("add_order"),
            "CALL add_order(?,?);"
        );
    }

    #[test]
    fn test_write_call() {
        let proc = procedure(&[ParameterDirection::In, ParameterDirection::In]);
        let params = Parameters::new().named("@p2", "x").named("p1", 7);
        let mut buf = BytesMut::new();
        proc.write_call(&mut buf, "add_order", &params, false).unwrap();
        assert_eq!(&buf[..], b"CALL add_order(7,'x')");

        let missing = Parameters::new().named("p1", 7);
        assert!(proc.write_call(&mut BytesMut::new(), "add_order", &missing, false).is_err());

        let out = procedure(&[ParameterDirection::Out]);
        let err = out
            .write_call(&mut BytesMut::new(), "add_order", &Parameters::new().named("p1", 1), false)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotSupported);
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(
            not_found("nope", "app").to_string(),
            "Procedure or function 'nope' cannot be found in database 'app'."
        );
    }

    #[test]
    fn test_entry_caches_absence() {
        let missing = ProcedureEntry::new("app", "nope", None);
        assert_eq!(
            missing.procedure().unwrap_err().to_string(),
            "Procedure or function 'nope' cannot be found in database 'app'."
        );
        let found = ProcedureEntry::new("app", "add_order", Some(procedure(&[])));
        assert_eq!(found.procedure().unwrap().name, "add_order");
        assert_eq!(cache_key("App", "Add_Order"), cache_key("app", "add_order"));
    }
}
