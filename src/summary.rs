// src/summary.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::classifier::Category;
use crate::pipeline::aggregator::Counters;
use crate::sink::CommitReceipt;

/// Final result of a run whose output is confirmed durable.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub error_count: u64,
    pub warning_count: u64,
    pub info_count: u64,
    pub output_path: PathBuf,
    pub unparseable_count: u64,
    pub skipped_count: u64,
    pub lines_read: u64,
    pub committed_bytes: u64,
    /// Most bytes the output buffer held at once
    pub peak_buffered_bytes: usize,
    pub by_code: BTreeMap<u16, u64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl Summary {
    pub(crate) fn new(
        counters: Counters,
        receipt: CommitReceipt,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Summary {
            error_count: counters.error,
            warning_count: counters.warning,
            info_count: counters.info,
            output_path: receipt.destination,
            unparseable_count: counters.unparseable,
            skipped_count: counters.skipped,
            lines_read: counters.lines_read,
            committed_bytes: receipt.bytes,
            peak_buffered_bytes: receipt.peak_buffered,
            by_code: counters.by_code,
            started_at,
            finished_at: Utc::now(),
            elapsed,
        }
    }

    pub fn count(&self, category: Category) -> u64 {
        match category {
            Category::Info => self.info_count,
            Category::Warning => self.warning_count,
            Category::Error => self.error_count,
            Category::Unparseable => self.unparseable_count,
        }
    }

    /// Share of all lines read, in percent.
    pub fn percentage(&self, category: Category) -> f64 {
        if self.lines_read == 0 {
            return 0.0;
        }
        self.count(category) as f64 * 100.0 / self.lines_read as f64
    }

    pub fn lines_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.lines_read as f64 / secs
        } else {
            0.0
        }
    }
}

/// Receives the summary of a successful run, exactly once.
pub trait SummaryReporter {
    fn report(&mut self, summary: &Summary);
}

impl<F: FnMut(&Summary)> SummaryReporter for F {
    fn report(&mut self, summary: &Summary) {
        self(summary)
    }
}

/// Reports through `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl SummaryReporter for TracingReporter {
    fn report(&mut self, summary: &Summary) {
        info!(
            errors = summary.error_count,
            warnings = summary.warning_count,
            infos = summary.info_count,
            unparseable = summary.unparseable_count,
            skipped = summary.skipped_count,
            lines = summary.lines_read,
            output = %summary.output_path.display(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "log analysis complete"
        );
    }
}
