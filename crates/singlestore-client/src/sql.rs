//! Statement splitting and client-side parameter substitution.
//!
//! A command's text may hold several statements separated by `;`. The
//! scanner tracks quoted strings (`'`, `"`, with backslash escapes), quoted
//! identifiers (`` ` ``) and comments (`-- `, `#`, `/* */`) so that
//! separators and placeholders inside them are ignored. Placeholders are `?`
//! (positional, numbered across the whole command) and `@name` / `?name`
//! (named). `@@name` is a system variable, never a placeholder.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// A parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// Boolean, sent as `true` / `false`.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer.
    UInt(u64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident as $conv:ty),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::$variant(<$conv>::from(v))
            }
        })*
    };
}

value_from! {
    bool => Bool as bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Float as f64,
    f64 => Float as f64,
    String => Text as String,
    &str => Text as String,
    Vec<u8> => Bytes as Vec<u8>,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A named or positional command parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Name without its `@` / `?` prefix; `None` for positional parameters.
    pub name: Option<String>,
    /// The value.
    pub value: Value,
}

/// The parameters of one command, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    items: Vec<Parameter>,
}

impl Parameters {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional parameter.
    #[must_use]
    pub fn push(mut self, value: impl Into<Value>) -> Self {
        self.items.push(Parameter {
            name: None,
            value: value.into(),
        });
        self
    }

    /// Append a named parameter; a leading `@` or `?` is ignored.
    #[must_use]
    pub fn named(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.items.push(Parameter {
            name: Some(normalize_name(name).to_string()),
            value: value.into(),
        });
        self
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Parameter at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Parameter> {
        self.items.get(index)
    }

    /// Parameter named `name`, compared case-insensitively.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Parameter> {
        let name = normalize_name(name);
        self.items.iter().find(|p| {
            p.name
                .as_deref()
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.items.iter()
    }
}

fn normalize_name(name: &str) -> &str {
    let name = name.strip_prefix(['@', '?']).unwrap_or(name);
    name.trim_matches('`')
}

/// A placeholder within a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// `?`, numbered from zero across the command.
    Positional(usize),
    /// `@name` or `?name`.
    Named(String),
}

/// A placeholder and its byte range in the statement text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Byte offset within [`Statement::sql`].
    pub offset: usize,
    /// Length in bytes.
    pub len: usize,
    /// What the placeholder refers to.
    pub kind: PlaceholderKind,
}

/// One statement of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    /// Statement text without the separator and surrounding whitespace.
    pub sql: String,
    /// Placeholders in text order.
    pub placeholders: Vec<Placeholder>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lexer {
    Code,
    Quoted(u8),
    QuotedEscape(u8),
    LineComment,
    BlockComment,
}

fn is_identifier_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'.' || b >= 0x80
}

/// Split `sql` into statements, dropping empty ones.
#[must_use]
pub fn split(sql: &str) -> Vec<Statement> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut placeholders: Vec<Placeholder> = Vec::new();
    let mut start = 0;
    let mut positional = 0;
    let mut state = Lexer::Code;
    let mut i = 0;

    let mut finish = |start: usize, end: usize, placeholders: &mut Vec<Placeholder>| {
        let raw = &sql[start..end];
        let trimmed_start = raw.len() - raw.trim_start().len();
        let text = raw.trim();
        let taken = std::mem::take(placeholders);
        if text.is_empty() {
            return;
        }
        let base = start + trimmed_start;
        statements.push(Statement {
            sql: text.to_string(),
            placeholders: taken
                .into_iter()
                .map(|p| Placeholder {
                    offset: p.offset - base,
                    ..p
                })
                .collect(),
        });
    };

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            Lexer::Quoted(q) => {
                if b == b'\\' && q != b'`' {
                    state = Lexer::QuotedEscape(q);
                } else if b == q {
                    state = Lexer::Code;
                }
                i += 1;
            }
            Lexer::QuotedEscape(q) => {
                state = Lexer::Quoted(q);
                i += 1;
            }
            Lexer::LineComment => {
                if b == b'\n' {
                    state = Lexer::Code;
                }
                i += 1;
            }
            Lexer::BlockComment => {
                if b == b'*' && bytes.get(i + 1) == Some(&b'/') {
                    state = Lexer::Code;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            Lexer::Code => match b {
                b'\'' | b'"' | b'`' => {
                    state = Lexer::Quoted(b);
                    i += 1;
                }
                b'#' => {
                    state = Lexer::LineComment;
                    i += 1;
                }
                b'-' if bytes.get(i + 1) == Some(&b'-')
                    && bytes.get(i + 2).is_none_or(|c| c.is_ascii_whitespace()) =>
                {
                    state = Lexer::LineComment;
                    i += 2;
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    state = Lexer::BlockComment;
                    i += 2;
                }
                b';' => {
                    finish(start, i, &mut placeholders);
                    i += 1;
                    start = i;
                }
                b'?' => {
                    let len = 1 + bytes[i + 1..]
                        .iter()
                        .take_while(|c| is_identifier_byte(**c))
                        .count();
                    let kind = if len == 1 {
                        positional += 1;
                        PlaceholderKind::Positional(positional - 1)
                    } else {
                        PlaceholderKind::Named(sql[i + 1..i + len].to_string())
                    };
                    placeholders.push(Placeholder {
                        offset: i,
                        len,
                        kind,
                    });
                    i += len;
                }
                b'@' if bytes.get(i + 1) == Some(&b'@') => {
                    let len = 2 + bytes[i + 2..]
                        .iter()
                        .take_while(|c| is_identifier_byte(**c))
                        .count();
                    i += len;
                }
                b'@' => {
                    let len = 1 + bytes[i + 1..]
                        .iter()
                        .take_while(|c| is_identifier_byte(**c))
                        .count();
                    if len > 1 {
                        placeholders.push(Placeholder {
                            offset: i,
                            len,
                            kind: PlaceholderKind::Named(sql[i + 1..i + len].to_string()),
                        });
                    }
                    i += len;
                }
                _ => i += 1,
            },
        }
    }
    finish(start, bytes.len(), &mut placeholders);
    statements
}

/// Whether `statement` is a client-side `DELIMITER` command.
#[must_use]
pub fn is_delimiter_statement(statement: &str) -> bool {
    let statement = statement.trim_start();
    statement
        .get(..10)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("delimiter "))
}

/// Append `value` as a SQL literal.
///
/// With `no_backslash_escapes` (the server's `NO_BACKSLASH_ESCAPES` mode)
/// backslashes are copied unchanged.
pub fn write_literal(dst: &mut BytesMut, value: &Value, no_backslash_escapes: bool) -> Result<()> {
    match value {
        Value::Null => dst.put_slice(b"NULL"),
        Value::Bool(true) => dst.put_slice(b"true"),
        Value::Bool(false) => dst.put_slice(b"false"),
        Value::Int(v) => dst.put_slice(v.to_string().as_bytes()),
        Value::UInt(v) => dst.put_slice(v.to_string().as_bytes()),
        Value::Float(v) if v.is_finite() => dst.put_slice(format!("{v:?}").as_bytes()),
        Value::Float(v) => {
            return Err(Error::InvalidOperation(format!(
                "{v} cannot be sent as a SQL value"
            )));
        }
        Value::Text(s) => write_quoted(dst, s.as_bytes(), no_backslash_escapes),
        Value::Bytes(b) => {
            dst.put_slice(b"_binary");
            write_quoted(dst, b, no_backslash_escapes);
        }
    }
    Ok(())
}

fn write_quoted(dst: &mut BytesMut, bytes: &[u8], no_backslash_escapes: bool) {
    dst.reserve(bytes.len() + 2);
    dst.put_u8(b'\'');
    for &b in bytes {
        match b {
            b'\'' => dst.put_slice(b"''"),
            b'\\' if !no_backslash_escapes => dst.put_slice(b"\\\\"),
            0 if !no_backslash_escapes => dst.put_slice(b"\\0"),
            _ => dst.put_u8(b),
        }
    }
    dst.put_u8(b'\'');
}

/// Append `statement` with every placeholder replaced by its literal value.
///
/// A named placeholder with no matching parameter is left as written, so that
/// user variables such as `@total` pass through.
pub fn write_substituted(
    dst: &mut BytesMut,
    statement: &Statement,
    parameters: &Parameters,
    no_backslash_escapes: bool,
) -> Result<()> {
    let sql = statement.sql.as_bytes();
    let mut copied = 0;
    for placeholder in &statement.placeholders {
        let parameter = match &placeholder.kind {
            PlaceholderKind::Positional(index) => {
                let positional = parameters
                    .iter()
                    .filter(|p| p.name.is_none())
                    .nth(*index)
                    .or_else(|| parameters.get(*index));
                Some(positional.ok_or_else(|| {
                    Error::InvalidOperation(format!(
                        "Parameter index {index} is out of range; the command has {} parameters.",
                        parameters.len()
                    ))
                })?)
            }
            PlaceholderKind::Named(name) => parameters.find(name),
        };
        if let Some(parameter) = parameter {
            dst.put_slice(&sql[copied..placeholder.offset]);
            write_literal(dst, &parameter.value, no_backslash_escapes)?;
            copied = placeholder.offset + placeholder.len;
        }
    }
    dst.put_slice(&sql[copied..]);
    Ok(())
}

/// The statement text for a server-side prepare: each placeholder that
/// refers to a parameter becomes `?`.
#[must_use]
pub fn prepare_text(statement: &Statement, parameters: &Parameters) -> String {
    let mut out = String::with_capacity(statement.sql.len());
    let mut copied = 0;
    for placeholder in &statement.placeholders {
        let is_parameter = match &placeholder.kind {
            PlaceholderKind::Positional(_) => true,
            PlaceholderKind::Named(name) => parameters.find(name).is_some(),
        };
        if is_parameter {
            out.push_str(&statement.sql[copied..placeholder.offset]);
            out.push('?');
            copied = placeholder.offset + placeholder.len;
        }
    }
    out.push_str(&statement.sql[copied..]);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn texts(sql: &str) -> Vec<String> {
        split(sql).into_iter().map(|s| s.sql).collect()
    }

    #[test]
    fn test_split_simple() {
        assert_eq!(texts("SELECT 1; SELECT 2;"), ["SELECT 1", "SELECT 2"]);
        assert_eq!(texts("SELECT 1"), ["SELECT 1"]);
        assert!(texts(" ; ;\n").is_empty());
    }

    #[test]
    fn test_split_ignores_quoted_and_comments() {
        assert_eq!(
            texts("SELECT 'a;b', \"c;d\", `e;f`; SELECT 2"),
            ["SELECT 'a;b', \"c;d\", `e;f`", "SELECT 2"]
        );
        assert_eq!(
            texts("SELECT 'it\\'s;' ; SELECT 'x'';y'"),
            ["SELECT 'it\\'s;'", "SELECT 'x'';y'"]
        );
        assert_eq!(
            texts("SELECT 1 -- a;b\n; SELECT 2 # c;d\n; /* e;f */ SELECT 3"),
            ["SELECT 1 -- a;b", "SELECT 2 # c;d", "/* e;f */ SELECT 3"]
        );
        // `--` without a following space is an operator.
        assert_eq!(texts("SELECT 1--1; SELECT 2"), ["SELECT 1--1", "SELECT 2"]);
    }

    #[test]
    fn test_placeholders() {
        let statements = split("SELECT ?, @id, @@version, '?' FROM t; SELECT ?name, ?");
        assert_eq!(statements.len(), 2);
        let first = &statements[0];
        assert_eq!(first.placeholders.len(), 2);
        assert_eq!(first.placeholders[0].kind, PlaceholderKind::Positional(0));
        assert_eq!(first.placeholders[0].offset, 7);
        assert_eq!(first.placeholders[1].kind, PlaceholderKind::Named("id".into()));
        let second = &statements[1];
        assert_eq!(second.placeholders[0].kind, PlaceholderKind::Named("name".into()));
        assert_eq!(second.placeholders[1].kind, PlaceholderKind::Positional(1));
        assert_eq!(&second.sql[second.placeholders[1].offset..], "?");
    }

    #[test]
    fn test_delimiter_detection() {
        assert!(is_delimiter_statement("DELIMITER $$"));
        assert!(is_delimiter_statement("  delimiter //"));
        assert!(!is_delimiter_statement("DELIMITER"));
        assert!(!is_delimiter_statement("SELECT 'delimiter '"));
    }

    #[test]
    fn test_literals() {
        let mut buf = BytesMut::new();
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Int(-5),
            Value::Float(1.5),
            Value::Text("it's a \\ test".into()),
            Value::Bytes(vec![0, b'\'']),
        ] {
            write_literal(&mut buf, &value, false).unwrap();
            buf.put_u8(b' ');
        }
        assert_eq!(
            &buf[..],
            b"NULL true -5 1.5 'it''s a \\\\ test' _binary'\\0''' ".as_slice()
        );

        let mut raw = BytesMut::new();
        write_literal(&mut raw, &Value::Text("a\\b".into()), true).unwrap();
        assert_eq!(&raw[..], b"'a\\b'");
        assert!(write_literal(&mut raw, &Value::Float(f64::NAN), false).is_err());
    }

    #[test]
    fn test_substitution() {
        let statement = &split("SELECT ?, @name, @unset")[0];
        let parameters = Parameters::new().push(1).named("@name", "x");
        let mut buf = BytesMut::new();
        write_substituted(&mut buf, statement, &parameters, false).unwrap();
        assert_eq!(&buf[..], b"SELECT 1, 'x', @unset");
        assert_eq!(prepare_text(statement, &parameters), "SELECT ?, ?, @unset");

        let err = write_substituted(&mut buf, &split("SELECT ?, ?")[0], &Parameters::new().push(1), false)
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    proptest! {
        #[test]
        fn prop_split_without_separators_is_identity(body in "[a-zA-Z0-9 ,()=]{1,40}") {
            let statements = split(&body);
            let trimmed = body.trim();
            if trimmed.is_empty() {
                prop_assert!(statements.is_empty());
            } else {
                prop_assert_eq!(statements.len(), 1);
                prop_assert_eq!(&statements[0].sql, trimmed);
            }
        }

        #[test]
        fn prop_quoted_text_round_trips(text in "[^\\x00]{0,40}") {
            let mut buf = BytesMut::new();
            write_literal(&mut buf, &Value::Text(text.clone()), false).unwrap();
            let sql = format!("SELECT {}; SELECT 2", String::from_utf8(buf.to_vec()).unwrap());
            prop_assert_eq!(split(&sql).len(), 2);
        }
    }
}
