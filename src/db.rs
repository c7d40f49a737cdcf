use std::path::Path;

use anyhow::Context;
use rusqlite::{Connection, OpenFlags};

pub fn open_live(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open live store {}", path.display()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(conn)
}

/// Diff and validation only ever read the live store; open it read-only so a
/// dry run cannot touch the file.
pub fn open_live_readonly(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open live store {} read-only", path.display()))?;
    Ok(conn)
}
