use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};

use crate::error::EngineError;
use crate::record::{Record, RecordSource};
use crate::schema::{self, TableSchema};

/// Inclusive key-range filter, e.g. "date between A and B".
#[derive(Debug, Clone)]
pub struct KeyRange {
    pub column: String,
    pub lo: String,
    pub hi: String,
}

/// Read-only handle to one historical snapshot file. Snapshots are immutable;
/// any number of readers may work on the same file independently.
#[derive(Debug)]
pub struct SnapshotReader {
    pub id: String,
    pub path: PathBuf,
    conn: Connection,
}

impl SnapshotReader {
    pub fn open(id: impl Into<String>, path: &Path) -> Result<Self, EngineError> {
        let unreadable = |reason: String| EngineError::SnapshotUnreadable {
            path: path.to_path_buf(),
            reason,
        };
        if !path.is_file() {
            return Err(unreadable("file does not exist".to_string()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| unreadable(e.to_string()))?;
        // SQLite opens lazily; force a header read so a corrupt or
        // non-database file fails here, not mid-scan.
        conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
            .map_err(|e| unreadable(e.to_string()))?;
        Ok(SnapshotReader {
            id: id.into(),
            path: path.to_path_buf(),
            conn,
        })
    }

    /// Introspects the snapshot's own column set for `table`. The snapshot
    /// may carry a different column set than the live store; it only has to
    /// contain the expected key columns (and the range column, when one is
    /// used) or the run fails with `SchemaMismatch`.
    pub fn table_schema(
        &self,
        table: &str,
        expected_key: &[String],
        range: Option<&KeyRange>,
    ) -> Result<TableSchema, EngineError> {
        let schema = schema::introspect_table(&self.conn, table, Some(expected_key))?;
        if let Some(range) = range {
            if !schema.has_column(&range.column) {
                return Err(EngineError::SchemaMismatch {
                    table: table.to_string(),
                    missing: range.column.clone(),
                });
            }
        }
        Ok(schema)
    }

    /// Streams the snapshot's rows for one table through `consume`, in rowid
    /// order. The scan is lazy and restartable: nothing is buffered, the
    /// file is never written, and calling `scan` again re-reads from the
    /// start.
    pub fn scan<T>(
        &self,
        schema: &TableSchema,
        range: Option<&KeyRange>,
        consume: impl FnOnce(&mut dyn Iterator<Item = rusqlite::Result<Record>>) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let names = schema.column_names();
        let select_list = names
            .iter()
            .map(|n| schema::quote_ident(n))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!(
            "SELECT {} FROM {}",
            select_list,
            schema::quote_ident(&schema.table)
        );
        if let Some(range) = range {
            sql.push_str(&format!(
                " WHERE {} BETWEEN ?1 AND ?2",
                schema::quote_ident(&range.column)
            ));
        }
        sql.push_str(" ORDER BY rowid");

        let mut stmt = self.conn.prepare(&sql)?;
        let source = RecordSource::Snapshot(self.id.clone());
        let map_row = move |row: &rusqlite::Row<'_>| -> rusqlite::Result<Record> {
            let mut record = Record::new(source.clone());
            for (i, name) in names.iter().enumerate() {
                record.set(name, row.get::<_, Value>(i)?);
            }
            Ok(record)
        };
        let mut iter = match range {
            Some(range) => stmt.query_map([&range.lo, &range.hi], map_row)?,
            None => stmt.query_map([], map_row)?,
        };
        consume(&mut iter)
    }
}
