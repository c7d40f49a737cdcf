use std::collections::BTreeMap;
use std::fmt;

use rusqlite::types::Value;

/// Where a record was read from. Candidate rows always come from a snapshot;
/// the tag survives into the audit summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSource {
    Live,
    Snapshot(String),
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSource::Live => write!(f, "live"),
            RecordSource::Snapshot(id) => write!(f, "snapshot:{}", id),
        }
    }
}

/// One row, keyed by column name. Identity is the unique-key projection,
/// never the rowid: internal ids are not stable across a restore.
#[derive(Debug, Clone)]
pub struct Record {
    pub source: RecordSource,
    values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(source: RecordSource) -> Self {
        Record {
            source,
            values: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, column: &str, value: Value) {
        self.values.insert(column.to_string(), value);
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn key(&self, key_columns: &[String]) -> Key {
        Key(key_columns
            .iter()
            .map(|c| KeyPart::from_value(self.values.get(c).unwrap_or(&Value::Null)))
            .collect())
    }
}

/// A single unique-key component. Reals are compared by bit pattern so keys
/// can live in a `HashSet`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Null,
    Integer(i64),
    Real(u64),
    Text(String),
    Blob(Vec<u8>),
}

impl KeyPart {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => KeyPart::Null,
            Value::Integer(i) => KeyPart::Integer(*i),
            Value::Real(r) => KeyPart::Real(r.to_bits()),
            Value::Text(t) => KeyPart::Text(t.clone()),
            Value::Blob(b) => KeyPart::Blob(b.clone()),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Null => write!(f, "NULL"),
            KeyPart::Integer(i) => write!(f, "{}", i),
            KeyPart::Real(bits) => write!(f, "{}", f64::from_bits(*bits)),
            KeyPart::Text(t) => write!(f, "{}", t),
            KeyPart::Blob(b) => write!(f, "<blob:{}B>", b.len()),
        }
    }
}

/// Unique-key projection of a record, in declared key-column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(pub Vec<KeyPart>);

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() == 1 {
            return write!(f, "{}", self.0[0]);
        }
        let joined = self
            .0
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "({})", joined)
    }
}
