//! Run reports
//!
//! A [`RunReport`] covers every unit of the work list, in input order, using
//! the final cache; units not yet processed count as pending. [`write_reports`]
//! renders it under the job namespace:
//!
//! - `<ns>_full.json`: the report with every outcome
//! - `<ns>_summary.txt`: bucket counts and listings for humans
//! - `<ns>_links.txt`: `unit_id<TAB>value` for every Found outcome
//! - `<ns>_summary.json`: counts and cursor only

use crate::error::{EnrichError, EnrichResult};
use crate::store::{write_atomic, Cache};
use crate::types::{CacheKeying, Outcome, OutcomeStatus, WorkUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

/// Per-status unit counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub found: usize,
    pub ambiguous: usize,
    pub missing: usize,
    pub error: usize,
    /// Units without an outcome yet
    pub pending: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Found => self.found += 1,
            OutcomeStatus::Ambiguous => self.ambiguous += 1,
            OutcomeStatus::Missing => self.missing += 1,
            OutcomeStatus::Error => self.error += 1,
        }
    }

    pub fn get(&self, status: OutcomeStatus) -> usize {
        match status {
            OutcomeStatus::Found => self.found,
            OutcomeStatus::Ambiguous => self.ambiguous,
            OutcomeStatus::Missing => self.missing,
            OutcomeStatus::Error => self.error,
        }
    }

    pub fn resolved(&self) -> usize {
        self.found + self.ambiguous + self.missing + self.error
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub job: String,
    pub total_units: usize,
    /// Cursor when this run started
    pub start_index: usize,
    /// Cursor when this run stopped
    pub next_index: usize,
    pub processed_this_run: usize,
    pub cache_hits: usize,
    /// Stopped by cancellation before the end of its range
    pub interrupted: bool,
    pub counts: StatusCounts,
    /// Found outcomes per deciding strategy
    pub found_by_source: BTreeMap<String, usize>,
    /// Outcomes in input order
    pub outcomes: Vec<Outcome>,
    pub generated_at: DateTime<Utc>,
}

impl RunReport {
    /// Aggregate the cache over the work list
    pub fn from_cache(job: &str, units: &[WorkUnit], keying: CacheKeying, cache: &Cache) -> Self {
        let mut counts = StatusCounts::default();
        let mut found_by_source = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(units.len());

        for unit in units {
            match cache.get(&unit.cache_key(keying)) {
                Some(outcome) => {
                    counts.add(outcome.status);
                    if outcome.status == OutcomeStatus::Found {
                        let source = outcome.source_tag.clone().unwrap_or_default();
                        *found_by_source.entry(source).or_insert(0) += 1;
                    }
                    outcomes.push(outcome.clone());
                }
                None => counts.pending += 1,
            }
        }

        Self {
            job: job.to_string(),
            total_units: units.len(),
            start_index: 0,
            next_index: 0,
            processed_this_run: 0,
            cache_hits: 0,
            interrupted: false,
            counts,
            found_by_source,
            outcomes,
            generated_at: Utc::now(),
        }
    }

    pub fn outcome(&self, unit_id: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.unit_id == unit_id)
    }

    pub fn with_status(&self, status: OutcomeStatus) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(move |o| o.status == status)
    }

    pub fn is_complete(&self) -> bool {
        self.next_index >= self.total_units
    }

    /// Human-readable summary
    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        let rule = "=".repeat(60);

        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "{} run summary ({})", self.job, self.generated_at.to_rfc3339());
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "Units:           {}", self.total_units);
        let _ = writeln!(
            out,
            "Cursor:          {} -> {}{}",
            self.start_index,
            self.next_index,
            if self.interrupted { " (interrupted)" } else { "" }
        );
        let _ = writeln!(out, "This run:        {} ({} from cache)", self.processed_this_run, self.cache_hits);
        let _ = writeln!(out, "Found:           {}", self.counts.found);
        let _ = writeln!(out, "Ambiguous:       {}", self.counts.ambiguous);
        let _ = writeln!(out, "Missing:         {}", self.counts.missing);
        let _ = writeln!(out, "Error:           {}", self.counts.error);
        let _ = writeln!(out, "Pending:         {}", self.counts.pending);

        if !self.found_by_source.is_empty() {
            let _ = writeln!(out, "\nFound by source:");
            for (source, count) in &self.found_by_source {
                let _ = writeln!(out, "  {:<20} {}", source, count);
            }
        }

        for status in [OutcomeStatus::Found, OutcomeStatus::Ambiguous] {
            if self.counts.get(status) == 0 {
                continue;
            }
            let _ = writeln!(out, "\n{} ({}):", status.as_str().to_uppercase(), self.counts.get(status));
            for outcome in self.with_status(status) {
                let _ = write!(out, "  {}", outcome.unit_id);
                if let Some(value) = &outcome.value {
                    let _ = write!(out, " -> {}", value);
                }
                let _ = write!(out, " (confidence {:.4}", outcome.confidence);
                if let Some(source) = &outcome.source_tag {
                    let _ = write!(out, ", {}", source);
                }
                let _ = writeln!(out, ")");
                if status == OutcomeStatus::Ambiguous {
                    for candidate in outcome.candidates.iter().take(3) {
                        let _ = writeln!(out, "      ? {} ({:.4})", candidate.label, candidate.score);
                    }
                }
            }
        }

        if self.counts.missing > 0 {
            let _ = writeln!(out, "\nMISSING ({}):", self.counts.missing);
            for outcome in self.with_status(OutcomeStatus::Missing) {
                let _ = writeln!(out, "  {}", outcome.unit_id);
            }
        }

        if self.counts.error > 0 {
            let _ = writeln!(out, "\nERRORS ({}):", self.counts.error);
            for outcome in self.with_status(OutcomeStatus::Error) {
                let _ = writeln!(
                    out,
                    "  {}: {}",
                    outcome.unit_id,
                    outcome.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        out
    }

    /// `unit_id<TAB>value` per Found outcome
    pub fn links_text(&self) -> String {
        self.with_status(OutcomeStatus::Found)
            .filter_map(|o| o.value.as_ref().map(|v| format!("{}\t{}\n", o.unit_id, v)))
            .collect()
    }

    pub fn summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "job": self.job,
            "total_units": self.total_units,
            "start_index": self.start_index,
            "next_index": self.next_index,
            "processed_this_run": self.processed_this_run,
            "cache_hits": self.cache_hits,
            "interrupted": self.interrupted,
            "counts": self.counts,
            "found_by_source": self.found_by_source,
            "generated_at": self.generated_at,
        })
    }
}

/// Files written by [`write_reports`]
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub full: PathBuf,
    pub summary_text: PathBuf,
    pub links: PathBuf,
    pub summary_json: PathBuf,
}

impl ReportPaths {
    pub fn in_dir(dir: &Path, namespace: &str) -> Self {
        Self {
            full: dir.join(format!("{}_full.json", namespace)),
            summary_text: dir.join(format!("{}_summary.txt", namespace)),
            links: dir.join(format!("{}_links.txt", namespace)),
            summary_json: dir.join(format!("{}_summary.json", namespace)),
        }
    }
}

pub fn write_reports(report: &RunReport, dir: &Path, namespace: &str) -> EnrichResult<ReportPaths> {
    let paths = ReportPaths::in_dir(dir, namespace);

    let full = to_json(report)?;
    let summary = to_json(&report.summary_json())?;

    write_file(&paths.full, full.as_bytes())?;
    write_file(&paths.summary_text, report.summary_text().as_bytes())?;
    write_file(&paths.links, report.links_text().as_bytes())?;
    write_file(&paths.summary_json, summary.as_bytes())?;

    info!(dir = %dir.display(), namespace, "Reports written");
    Ok(paths)
}

fn to_json<T: Serialize>(value: &T) -> EnrichResult<String> {
    serde_json::to_string_pretty(value)
        .map(|mut s| {
            s.push('\n');
            s
        })
        .map_err(|e| EnrichError::Report(e.to_string()))
}

fn write_file(path: &Path, bytes: &[u8]) -> EnrichResult<()> {
    write_atomic(path, bytes).map_err(|e| EnrichError::Report(format!("{}: {}", path.display(), e)))
}
