use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use uuid::Uuid;

use crate::diff::{Candidate, CandidateState};
use crate::restore::RestoreOutcome;

// Text output stays scannable; the JSON form always carries every rejection.
const TEXT_SAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub key: String,
    pub reason: String,
    pub source: String,
}

/// The structured summary every run emits, successful or not: what was
/// seen, what was valid, what was rejected and why, and what was written.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub mode: String,
    pub table: String,
    pub snapshot: String,
    pub candidates_seen: usize,
    pub valid: usize,
    pub rejected_by_reason: BTreeMap<String, usize>,
    pub rejections: Vec<Rejection>,
    pub candidate_sample: Vec<String>,
    pub inserted: usize,
    pub safety_snapshot: Option<String>,
}

impl RunSummary {
    pub fn new(mode: &str, table: &str, snapshot: &str, candidates: &[Candidate]) -> Self {
        let mut rejected_by_reason: BTreeMap<String, usize> = BTreeMap::new();
        let mut rejections = Vec::new();
        let mut valid = 0usize;
        let mut sample = Vec::new();
        for candidate in candidates {
            match &candidate.state {
                CandidateState::Rejected(reason) => {
                    let reason = reason.to_string();
                    *rejected_by_reason.entry(reason.clone()).or_insert(0) += 1;
                    rejections.push(Rejection {
                        key: candidate.key.to_string(),
                        reason,
                        source: candidate.record.source.to_string(),
                    });
                }
                CandidateState::Valid | CandidateState::Inserted => {
                    valid += 1;
                    if sample.len() < TEXT_SAMPLE_LIMIT {
                        sample.push(candidate.key.to_string());
                    }
                }
                CandidateState::Pending => {
                    if sample.len() < TEXT_SAMPLE_LIMIT {
                        sample.push(candidate.key.to_string());
                    }
                }
            }
        }
        RunSummary {
            run_id: Uuid::new_v4().to_string(),
            mode: mode.to_string(),
            table: table.to_string(),
            snapshot: snapshot.to_string(),
            candidates_seen: candidates.len(),
            valid,
            rejected_by_reason,
            rejections,
            candidate_sample: sample,
            inserted: 0,
            safety_snapshot: None,
        }
    }

    pub fn with_outcome(mut self, outcome: &RestoreOutcome) -> Self {
        self.inserted = outcome.inserted;
        self.safety_snapshot = outcome.safety_snapshot.clone();
        self
    }

    pub fn rejected(&self) -> usize {
        self.rejections.len()
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} {} against {} (run {})",
            self.mode, self.table, self.snapshot, self.run_id
        );
        let _ = writeln!(
            out,
            "  candidates: {} seen, {} valid, {} rejected",
            self.candidates_seen,
            self.valid,
            self.rejected()
        );
        for (reason, count) in &self.rejected_by_reason {
            let _ = writeln!(out, "    {}: {}", reason, count);
        }
        if !self.candidate_sample.is_empty() {
            let _ = writeln!(out, "  sample keys:");
            for key in &self.candidate_sample {
                let _ = writeln!(out, "    {}", key);
            }
        }
        for rejection in self.rejections.iter().take(TEXT_SAMPLE_LIMIT) {
            let _ = writeln!(
                out,
                "  rejected {} ({}) from {}",
                rejection.key, rejection.reason, rejection.source
            );
        }
        if self.rejections.len() > TEXT_SAMPLE_LIMIT {
            let _ = writeln!(
                out,
                "  ... {} more rejection(s) in --json output",
                self.rejections.len() - TEXT_SAMPLE_LIMIT
            );
        }
        match &self.safety_snapshot {
            Some(id) => {
                let _ = writeln!(out, "  inserted: {} (safety snapshot {})", self.inserted, id);
            }
            None => {
                let _ = writeln!(out, "  inserted: {}", self.inserted);
            }
        }
        out
    }
}
