use log::warn;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};

use crate::diff::{Candidate, CandidateState, RejectReason};
use crate::schema;

/// One foreign-key probe: does `value` in `column` still resolve to a live
/// row? Backed by the live store in production, stubbed in tests.
pub trait ExistenceCheck {
    fn column(&self) -> &str;
    fn exists(&self, value: &Value) -> anyhow::Result<bool>;
}

/// Existence probe against a referenced table in the live store.
pub struct LiveReference<'c> {
    conn: &'c Connection,
    column: String,
    sql: String,
}

impl<'c> LiveReference<'c> {
    pub fn new(conn: &'c Connection, column: &str, parent_table: &str, parent_column: &str) -> Self {
        LiveReference {
            conn,
            column: column.to_string(),
            sql: format!(
                "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
                schema::quote_ident(parent_table),
                schema::quote_ident(parent_column)
            ),
        }
    }
}

impl ExistenceCheck for LiveReference<'_> {
    fn column(&self) -> &str {
        &self.column
    }

    fn exists(&self, value: &Value) -> anyhow::Result<bool> {
        let hit: Option<i64> = self
            .conn
            .query_row(&self.sql, [value], |row| row.get(0))
            .optional()?;
        Ok(hit.is_some())
    }
}

/// Builds one checker per declared foreign key of `table`, read from the
/// live store. A NULL "to" column means the reference targets the parent's
/// primary key.
pub fn foreign_key_checks<'c>(
    conn: &'c Connection,
    table: &str,
) -> anyhow::Result<Vec<LiveReference<'c>>> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA foreign_key_list({})",
        schema::quote_ident(table)
    ))?;
    let refs = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut checks = Vec::with_capacity(refs.len());
    for (parent_table, from, to) in refs {
        let parent_column = match to {
            Some(c) => c,
            None => primary_key_column(conn, &parent_table)?,
        };
        checks.push(LiveReference::new(conn, &from, &parent_table, &parent_column));
    }
    Ok(checks)
}

fn primary_key_column(conn: &Connection, table: &str) -> anyhow::Result<String> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", schema::quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        let pk: i64 = row.get(5)?;
        if pk == 1 {
            return Ok(name);
        }
    }
    anyhow::bail!("referenced table {} has no primary key", table)
}

/// Stamps every pending candidate `Valid` or `Rejected(dangling-fk:<col>)`.
/// NULL or absent foreign-key values pass: a nullable reference to nothing
/// is not dangling. Rejected candidates stay in the slice so the caller can
/// audit exactly why a row was not restored.
pub fn validate<C: ExistenceCheck>(
    candidates: &mut [Candidate],
    checks: &[C],
) -> anyhow::Result<()> {
    for candidate in candidates.iter_mut() {
        if candidate.state != CandidateState::Pending {
            continue;
        }
        let mut rejected = false;
        for check in checks {
            let value = candidate.record.get(check.column());
            let value = match value {
                None | Some(Value::Null) => continue,
                Some(v) => v,
            };
            if !check.exists(value)? {
                warn!(
                    "candidate {} rejected: dangling-fk:{}",
                    candidate.key,
                    check.column()
                );
                candidate.reject(RejectReason::DanglingForeignKey {
                    column: check.column().to_string(),
                });
                rejected = true;
                break;
            }
        }
        if !rejected {
            candidate.state = CandidateState::Valid;
        }
    }
    Ok(())
}
