use rusqlite::{Connection, OptionalExtension};

use crate::error::EngineError;

/// SQLite affinity class of a declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
    Numeric,
}

impl ColumnType {
    fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            ColumnType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::Text
        } else if upper.is_empty() || upper.contains("BLOB") {
            ColumnType::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ColumnType::Real
        } else {
            ColumnType::Numeric
        }
    }
}

/// Runtime-discovered shape of one table. The live store and a snapshot may
/// disagree on column sets, so this is derived per file, never hand-coded.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<(String, ColumnType)>,
    pub key_columns: Vec<String>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn missing_columns(&self, wanted: &[String]) -> Vec<String> {
        wanted
            .iter()
            .filter(|c| !self.has_column(c))
            .cloned()
            .collect()
    }
}

/// Discovers the column set and unique key of `table`.
///
/// Key resolution order: explicit caller-supplied columns, a declared
/// primary key that is not a lone rowid-alias integer, the first non-partial
/// unique index, then a lone integer primary key as a last resort. Tables
/// with none of these fail with `AmbiguousKey`.
pub fn introspect_table(
    conn: &Connection,
    table: &str,
    explicit_key: Option<&[String]>,
) -> Result<TableSchema, EngineError> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(EngineError::TableNotFound {
            table: table.to_string(),
        });
    }

    let mut columns: Vec<(String, ColumnType)> = Vec::new();
    let mut pk_parts: Vec<(i64, String)> = Vec::new();
    {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            let declared: String = row.get(2)?;
            let pk: i64 = row.get(5)?;
            if pk > 0 {
                pk_parts.push((pk, name.clone()));
            }
            columns.push((name, ColumnType::from_declared(&declared)));
        }
    }

    pk_parts.sort_by_key(|(ord, _)| *ord);
    let pk_columns: Vec<String> = pk_parts.into_iter().map(|(_, name)| name).collect();

    let schema_with_key = |key_columns: Vec<String>| TableSchema {
        table: table.to_string(),
        columns: columns.clone(),
        key_columns,
    };

    if let Some(explicit) = explicit_key {
        let schema = schema_with_key(explicit.to_vec());
        let missing = schema.missing_columns(explicit);
        if !missing.is_empty() {
            return Err(EngineError::SchemaMismatch {
                table: table.to_string(),
                missing: missing.join(", "),
            });
        }
        return Ok(schema);
    }

    let rowid_alias_pk = pk_columns.len() == 1
        && columns
            .iter()
            .any(|(n, t)| n == &pk_columns[0] && *t == ColumnType::Integer);

    if !pk_columns.is_empty() && !rowid_alias_pk {
        return Ok(schema_with_key(pk_columns));
    }

    if let Some(index_columns) = first_unique_index(conn, table)? {
        return Ok(schema_with_key(index_columns));
    }

    // A synthetic integer id is not stable across restores, but when the
    // table declares nothing else it is the only identity available.
    if rowid_alias_pk {
        return Ok(schema_with_key(pk_columns));
    }

    Err(EngineError::AmbiguousKey {
        table: table.to_string(),
    })
}

fn first_unique_index(
    conn: &Connection,
    table: &str,
) -> Result<Option<Vec<String>>, EngineError> {
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quote_ident(table)))?;
    let indexes = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (name, unique, origin, partial) in indexes {
        if unique == 0 || partial != 0 || origin == "pk" {
            continue;
        }
        let mut info = conn.prepare(&format!("PRAGMA index_info({})", quote_ident(&name)))?;
        let cols = info
            .query_map([], |row| row.get::<_, Option<String>>(2))?
            .collect::<Result<Vec<_>, _>>()?;
        // Expression index members come back NULL; such an index cannot
        // serve as a key projection.
        if cols.iter().any(|c| c.is_none()) {
            continue;
        }
        return Ok(Some(cols.into_iter().flatten().collect()));
    }
    Ok(None)
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
