use log::info;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::backup::{BackupManager, SAFETY_LABEL};
use crate::cancel::CancelFlag;
use crate::diff::{Candidate, CandidateState};
use crate::error::EngineError;
use crate::schema::{self, TableSchema};

/// Ordered, deduplicated valid candidates for one table. Built once per run;
/// `execute` takes the plan by value, so a plan cannot run twice.
#[derive(Debug)]
pub struct RestorePlan {
    pub table: String,
    pub candidates: Vec<Candidate>,
}

impl RestorePlan {
    /// Keeps only the `Valid` candidates, in snapshot order. Rejected ones
    /// stay with the caller for the audit summary.
    pub fn from_candidates(table: &str, candidates: &[Candidate]) -> Self {
        RestorePlan {
            table: table.to_string(),
            candidates: candidates.iter().filter(|c| c.is_valid()).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}

#[derive(Debug)]
pub struct RestoreOutcome {
    pub inserted: usize,
    pub safety_snapshot: Option<String>,
}

/// Inserts the plan's rows into the live table inside one transaction.
///
/// A safety snapshot of the live file is taken first; if that fails nothing
/// is written. Inserts go through the live schema's full column list, so a
/// snapshot with a different column set still lands correctly: columns the
/// snapshot lacks become NULL, columns the live table lacks are dropped.
/// Any insert failure, or cooperative cancellation between rows, rolls the
/// whole transaction back.
pub fn execute(
    conn: &Connection,
    live_schema: &TableSchema,
    plan: RestorePlan,
    backups: &BackupManager,
    cancel: Option<&CancelFlag>,
) -> Result<RestoreOutcome, EngineError> {
    if plan.is_empty() {
        // Nothing to protect, nothing to write.
        return Ok(RestoreOutcome {
            inserted: 0,
            safety_snapshot: None,
        });
    }

    let safety = backups
        .create_snapshot(conn, SAFETY_LABEL)
        .map_err(|e| EngineError::SafetyBackupFailed {
            reason: e.to_string(),
        })?;

    let columns = live_schema.column_names();
    let placeholders = (1..=columns.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let column_list = columns
        .iter()
        .map(|c| schema::quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        schema::quote_ident(&plan.table),
        column_list,
        placeholders
    );

    let tx = conn.unchecked_transaction()?;
    let mut candidates = plan.candidates;
    let outcome = {
        let mut stmt = tx.prepare(&sql)?;
        let mut inserted = 0usize;
        let mut aborted: Option<String> = None;
        for candidate in candidates.iter_mut() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                aborted = Some(format!("cancelled by caller after {} row(s)", inserted));
                break;
            }
            let values: Vec<Value> = columns
                .iter()
                .map(|c| candidate.record.get(c).cloned().unwrap_or(Value::Null))
                .collect();
            match stmt.execute(params_from_iter(values)) {
                Ok(_) => {
                    candidate.state = CandidateState::Inserted;
                    inserted += 1;
                }
                Err(e) => {
                    aborted = Some(format!("insert failed for key {}: {}", candidate.key, e));
                    break;
                }
            }
        }
        (inserted, aborted)
    };

    match outcome {
        (_, Some(reason)) => {
            tx.rollback()?;
            Err(EngineError::TransactionAborted { reason })
        }
        (inserted, None) => {
            tx.commit()
                .map_err(|e| EngineError::TransactionAborted {
                    reason: format!("commit failed: {}", e),
                })?;
            info!(
                "restored {} row(s) into {} (safety snapshot {})",
                inserted, plan.table, safety.id
            );
            Ok(RestoreOutcome {
                inserted,
                safety_snapshot: Some(safety.id),
            })
        }
    }
}
