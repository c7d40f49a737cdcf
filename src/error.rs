use std::path::PathBuf;

use thiserror::Error;

/// Failure kinds for a reconciliation run. Structural errors abort the run;
/// per-row problems are carried on the candidates instead (see
/// `diff::RejectReason`).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("table not found: {table}")]
    TableNotFound { table: String },

    #[error(
        "no primary key or unique index found for table {table}; pass an explicit key column list"
    )]
    AmbiguousKey { table: String },

    #[error("snapshot {} is not readable: {reason}", path.display())]
    SnapshotUnreadable { path: PathBuf, reason: String },

    #[error("table {table} is missing expected column(s): {missing}")]
    SchemaMismatch { table: String, missing: String },

    #[error("safety backup failed, no rows were written: {reason}")]
    SafetyBackupFailed { reason: String },

    #[error("snapshot copy failed: {reason}")]
    CopyFailed { reason: String },

    #[error("restore transaction rolled back: {reason}")]
    TransactionAborted { reason: String },

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Structural errors mean the run could not interpret the schema at all;
    /// the CLI maps them to exit code 2.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EngineError::TableNotFound { .. }
                | EngineError::AmbiguousKey { .. }
                | EngineError::SnapshotUnreadable { .. }
                | EngineError::SchemaMismatch { .. }
        )
    }
}
