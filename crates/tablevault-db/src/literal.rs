//! Rendering of row values into re-insertable `INSERT` statements.

use std::fmt::Write as _;

/// SQL dialect a statement is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

/// One column value, borrowed from the driver's row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SqlValue<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(&'a str),
    Blob(&'a [u8]),
}

impl SqlValue<'_> {
    fn render(&self, dialect: Dialect, out: &mut String) {
        match self {
            Self::Null => out.push_str("NULL"),
            Self::Integer(v) => {
                let _ = write!(out, "{v}");
            }
            Self::Real(v) if v.is_finite() => {
                let _ = write!(out, "{v:?}");
            }
            Self::Real(v) => {
                let word = if v.is_nan() {
                    "NaN"
                } else if v.is_sign_positive() {
                    "Infinity"
                } else {
                    "-Infinity"
                };
                out.push('\'');
                out.push_str(word);
                out.push('\'');
            }
            Self::Text(s) => match dialect {
                Dialect::Postgres => out.push_str(&pg_escape::quote_literal(s)),
                Dialect::Sqlite => {
                    out.push('\'');
                    out.push_str(&s.replace('\'', "''"));
                    out.push('\'');
                }
            },
            Self::Blob(bytes) => {
                let hex = bytes.iter().fold(String::new(), |mut acc, b| {
                    let _ = write!(acc, "{b:02x}");
                    acc
                });
                match dialect {
                    Dialect::Postgres => {
                        let _ = write!(out, "'\\x{hex}'::bytea");
                    }
                    Dialect::Sqlite => {
                        let _ = write!(out, "X'{hex}'");
                    }
                }
            }
        }
    }
}

/// Render `INSERT INTO "table" ("a", "b") VALUES (...);`.
///
/// `table` and `columns` must already be quoted identifiers.
#[must_use]
pub fn insert_statement(
    dialect: Dialect,
    table: &str,
    columns: &[String],
    values: &[SqlValue<'_>],
) -> String {
    let mut out = String::with_capacity(64 + values.len() * 16);
    let _ = write!(out, "INSERT INTO {table} ({}) VALUES (", columns.join(", "));
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        value.render(dialect, &mut out);
    }
    out.push_str(");");
    out
}
