// src/pipeline/aggregator.rs
use serde::Serialize;
use std::collections::BTreeMap;

use crate::classifier::{Category, Classification};
use crate::source::RawLine;

/// Line text bound for the error output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    pub line_number: u64,
    pub text: String,
}

/// Per-run category counts
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub info: u64,
    pub warning: u64,
    pub error: u64,
    pub unparseable: u64,
    /// Oversized lines dropped by the source
    pub skipped: u64,
    pub lines_read: u64,
    /// Lines per status code, in-band codes only
    pub by_code: BTreeMap<u16, u64>,
}

impl Counters {
    pub fn get(&self, category: Category) -> u64 {
        match category {
            Category::Info => self.info,
            Category::Warning => self.warning,
            Category::Error => self.error,
            Category::Unparseable => self.unparseable,
        }
    }

    /// Lines whose status code fell into a band.
    pub fn classified(&self) -> u64 {
        self.info + self.warning + self.error
    }
}

/// What the caller should do with a line after counting it
#[derive(Debug, PartialEq, Eq)]
pub enum Route {
    /// Append to the error output
    Forward(OutputRecord),
    Counted,
    Dropped,
}

/// Counts classified lines and picks out the ones bound for the sink.
///
/// Knows nothing about I/O; the pipeline issues the writes.
#[derive(Debug, Default)]
pub struct Aggregator {
    counters: Counters,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&mut self, line: RawLine, classification: &Classification) -> Route {
        self.counters.lines_read += 1;
        match classification.category {
            Category::Unparseable => {
                self.counters.unparseable += 1;
                return Route::Dropped;
            }
            Category::Info => self.counters.info += 1,
            Category::Warning => self.counters.warning += 1,
            Category::Error => self.counters.error += 1,
        }
        if let Some(code) = classification.code {
            *self.counters.by_code.entry(code).or_insert(0) += 1;
        }

        if classification.category == Category::Error {
            Route::Forward(OutputRecord {
                line_number: line.number,
                text: line.text,
            })
        } else {
            Route::Counted
        }
    }

    pub fn record_skipped(&mut self) {
        self.counters.lines_read += 1;
        self.counters.skipped += 1;
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn finish(self) -> Counters {
        self.counters
    }
}
