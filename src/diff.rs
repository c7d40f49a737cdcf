use std::collections::HashSet;
use std::fmt;

use rusqlite::Connection;

use crate::record::{Key, KeyPart, Record};
use crate::schema::{self, TableSchema};

/// Why a candidate was refused. Kept on the candidate and reported in the
/// run summary, never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    DuplicateInSource,
    DanglingForeignKey { column: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::DuplicateInSource => write!(f, "duplicate-in-source"),
            RejectReason::DanglingForeignKey { column } => write!(f, "dangling-fk:{}", column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateState {
    Pending,
    Valid,
    Rejected(RejectReason),
    Inserted,
}

/// A snapshot row whose unique key is absent from the live table.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: Record,
    pub key: Key,
    pub state: CandidateState,
}

impl Candidate {
    pub fn reject(&mut self, reason: RejectReason) {
        self.state = CandidateState::Rejected(reason);
    }

    pub fn is_valid(&self) -> bool {
        self.state == CandidateState::Valid
    }
}

/// Loads only the key-column projection of the live table. Full rows never
/// leave the store here; one set of keys is all the diff needs.
pub fn live_key_set(conn: &Connection, schema: &TableSchema) -> anyhow::Result<HashSet<Key>> {
    let select_list = schema
        .key_columns
        .iter()
        .map(|c| schema::quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {} FROM {}",
        select_list,
        schema::quote_ident(&schema.table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let width = schema.key_columns.len();
    let keys = stmt
        .query_map([], |row| {
            let mut parts = Vec::with_capacity(width);
            for i in 0..width {
                parts.push(KeyPart::from_value(&row.get(i)?));
            }
            Ok(Key(parts))
        })?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(keys)
}

/// Walks the snapshot records and produces one candidate per key missing
/// from the live set. If the snapshot itself repeats a key (corrupt
/// history), the first occurrence wins and later ones come back rejected as
/// duplicate-in-source. Read-only with respect to the live store.
pub fn diff_candidates(
    live_keys: &HashSet<Key>,
    key_columns: &[String],
    records: &mut dyn Iterator<Item = rusqlite::Result<Record>>,
) -> anyhow::Result<Vec<Candidate>> {
    let mut seen: HashSet<Key> = HashSet::new();
    let mut candidates = Vec::new();
    for record in records {
        let record = record?;
        let key = record.key(key_columns);
        if live_keys.contains(&key) {
            continue;
        }
        let state = if seen.insert(key.clone()) {
            CandidateState::Pending
        } else {
            CandidateState::Rejected(RejectReason::DuplicateInSource)
        };
        candidates.push(Candidate { record, key, state });
    }
    Ok(candidates)
}
