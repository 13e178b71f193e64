//! Series identity: the validated storage key and the registry descriptor.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest identifier accepted as a series id.
pub const MAX_SERIES_ID_LEN: usize = 63;

/// Name of the registry table. Never usable as a series id.
pub const REGISTRY_TABLE: &str = "series_registry";

/// SQLite keywords (https://sqlite.org/lang_keywords.html). Compared case-insensitively.
const RESERVED_WORDS: &[&str] = &[
    "ABORT", "ACTION", "ADD", "AFTER", "ALL", "ALTER", "ALWAYS", "ANALYZE", "AND", "AS", "ASC",
    "ATTACH", "AUTOINCREMENT", "BEFORE", "BEGIN", "BETWEEN", "BY", "CASCADE", "CASE", "CAST",
    "CHECK", "COLLATE", "COLUMN", "COMMIT", "CONFLICT", "CONSTRAINT", "CREATE", "CROSS",
    "CURRENT", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP", "DATABASE", "DEFAULT",
    "DEFERRABLE", "DEFERRED", "DELETE", "DESC", "DETACH", "DISTINCT", "DO", "DROP", "EACH",
    "ELSE", "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXCLUSIVE", "EXISTS", "EXPLAIN", "FAIL",
    "FILTER", "FIRST", "FOLLOWING", "FOR", "FOREIGN", "FROM", "FULL", "GENERATED", "GLOB",
    "GROUP", "GROUPS", "HAVING", "IF", "IGNORE", "IMMEDIATE", "IN", "INDEX", "INDEXED",
    "INITIALLY", "INNER", "INSERT", "INSTEAD", "INTERSECT", "INTO", "IS", "ISNULL", "JOIN",
    "KEY", "LAST", "LEFT", "LIKE", "LIMIT", "MATCH", "MATERIALIZED", "NATURAL", "NO", "NOT",
    "NOTHING", "NOTNULL", "NULL", "NULLS", "OF", "OFFSET", "ON", "OR", "ORDER", "OTHERS",
    "OUTER", "OVER", "PARTITION", "PLAN", "PRAGMA", "PRECEDING", "PRIMARY", "QUERY", "RAISE",
    "RANGE", "RECURSIVE", "REFERENCES", "REGEXP", "REINDEX", "RELEASE", "RENAME", "REPLACE",
    "RESTRICT", "RETURNING", "RIGHT", "ROLLBACK", "ROW", "ROWS", "SAVEPOINT", "SELECT", "SET",
    "TABLE", "TEMP", "TEMPORARY", "THEN", "TIES", "TO", "TRANSACTION", "TRIGGER", "UNBOUNDED",
    "UNION", "UNIQUE", "UPDATE", "USING", "VACUUM", "VALUES", "VIEW", "VIRTUAL", "WHEN",
    "WHERE", "WINDOW", "WITH", "WITHOUT",
];

/// Why a candidate series id was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesIdError {
    #[error("series id is empty")]
    Empty,

    #[error("series id '{0}' is longer than {MAX_SERIES_ID_LEN} characters")]
    TooLong(String),

    #[error("series id '{id}' contains invalid character {ch:?} (allowed: A-Z a-z 0-9 _)")]
    InvalidCharacter { id: String, ch: char },

    #[error("series id '{0}' must start with a letter or underscore")]
    InvalidStart(String),

    #[error("series id '{0}' is a reserved word")]
    Reserved(String),
}

/// A validated storage identifier for one series.
///
/// Construction is the only validation point: every `SeriesId` in the process
/// is safe to quote into an SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SeriesId(String);

impl SeriesId {
    pub fn new(id: impl Into<String>) -> Result<Self, SeriesIdError> {
        let id = id.into();
        let mut chars = id.chars();
        let first = chars.next().ok_or(SeriesIdError::Empty)?;

        if id.len() > MAX_SERIES_ID_LEN {
            return Err(SeriesIdError::TooLong(id));
        }
        if let Some(ch) = id.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
            return Err(SeriesIdError::InvalidCharacter { id, ch });
        }
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(SeriesIdError::InvalidStart(id));
        }

        let upper = id.to_ascii_uppercase();
        if upper.starts_with("SQLITE_")
            || id.eq_ignore_ascii_case(REGISTRY_TABLE)
            || RESERVED_WORDS.contains(&upper.as_str())
        {
            return Err(SeriesIdError::Reserved(id));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted SQL identifier for this series' table.
    pub(crate) fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl TryFrom<String> for SeriesId {
    type Error = SeriesIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SeriesId> for String {
    fn from(id: SeriesId) -> Self {
        id.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One registered series: external provider symbol → internal storage id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesDescriptor {
    /// Symbol as the provider knows it (e.g. `^GSPC`).
    pub symbol: String,
    pub id: SeriesId,
    /// Optional grouping tag (country, sector).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl SeriesDescriptor {
    pub fn new(symbol: impl Into<String>, id: SeriesId) -> Self {
        Self {
            symbol: symbol.into(),
            id,
            group: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}
