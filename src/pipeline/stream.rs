// src/pipeline/stream.rs
use chrono::Utc;
use std::io::BufRead;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::error::{ConfigError, OutputStatus, ProcessingError, RunError};
use crate::pipeline::aggregator::{Aggregator, Route};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::state::PipelineState;
use crate::sink::{Capacity, DurableWrite, ResultSink};
use crate::source::{LineSource, SourceLine};
use crate::summary::{Summary, SummaryReporter};

/// One classification run: source → classifier → aggregator → sink.
///
/// A pipeline is consumed by its run, so counters and the sink handle are
/// never shared between runs.
pub struct LogPipeline {
    config: PipelineConfig,
    classifier: Classifier,
    cancel: CancellationToken,
    state: PipelineState,
}

impl LogPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let classifier = Classifier::with_pattern(&config.status_pattern)?;
        Ok(LogPipeline {
            config,
            classifier,
            cancel: CancellationToken::new(),
            state: PipelineState::Idle,
        })
    }

    /// Use an externally owned token to stop the run.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Classify `input` and write its error lines to `output`.
    ///
    /// The reporter is called once, only after the output is confirmed on
    /// stable storage. The input is opened first, so a missing input never
    /// creates or touches the output file.
    pub fn run(
        self,
        input: &Path,
        output: &Path,
        reporter: &mut dyn SummaryReporter,
    ) -> Result<Summary, RunError> {
        let config = self.config.clone();
        self.run_with(
            || LineSource::open(input, &config),
            || ResultSink::open(output, &config),
            reporter,
        )
    }

    /// Like [`run`](Self::run) with caller-supplied source and sink openers.
    pub fn run_with<R, M, OS, OK>(
        mut self,
        open_source: OS,
        open_sink: OK,
        reporter: &mut dyn SummaryReporter,
    ) -> Result<Summary, RunError>
    where
        R: BufRead,
        M: DurableWrite,
        OS: FnOnce() -> Result<LineSource<R>, ProcessingError>,
        OK: FnOnce() -> Result<ResultSink<M>, ProcessingError>,
    {
        let started_at = Utc::now();
        let start_time = Instant::now();

        self.transition(PipelineState::Opening);
        if self.cancel.is_cancelled() {
            return Err(self.fail(ProcessingError::Cancelled, OutputStatus::Untouched));
        }
        let mut source = match open_source() {
            Ok(source) => source,
            Err(e) => return Err(self.fail(e, OutputStatus::Untouched)),
        };
        let mut sink = match open_sink() {
            Ok(sink) => sink,
            Err(e) => return Err(self.fail(e, OutputStatus::Untouched)),
        };

        self.transition(PipelineState::Streaming);
        let mut aggregator = Aggregator::new();
        if let Err(e) = self.stream(&mut source, &mut sink, &mut aggregator) {
            // a sink that already failed is not written to again
            let output = sink.abandon();
            return Err(self.fail(e, output));
        }
        drop(source);

        self.transition(PipelineState::Draining);
        if self.cancel.is_cancelled() {
            let output = sink.abandon();
            return Err(self.fail(ProcessingError::Cancelled, output));
        }
        let pending = match sink.close() {
            Ok(pending) => pending,
            Err(e) => {
                let output = match &e {
                    ProcessingError::SinkWrite {
                        path,
                        committed_lines,
                        torn_bytes,
                        ..
                    } => OutputStatus::new(path, *committed_lines, *torn_bytes),
                    _ => OutputStatus::Untouched,
                };
                return Err(self.fail(e, output));
            }
        };
        let committed = pending.lines();
        let receipt = match pending.wait() {
            Ok(receipt) => receipt,
            Err(e) => {
                let output = match &e {
                    ProcessingError::SinkCommit { path, .. } => {
                        OutputStatus::new(path, committed, 0)
                    }
                    _ => OutputStatus::Untouched,
                };
                return Err(self.fail(e, output));
            }
        };

        self.transition(PipelineState::Done);
        let summary = Summary::new(aggregator.finish(), receipt, started_at, start_time.elapsed());
        info!(
            lines = summary.lines_read,
            errors = summary.error_count,
            lines_per_sec = summary.lines_per_second().round(),
            "run finished"
        );
        reporter.report(&summary);
        Ok(summary)
    }

    /// The consumer loop. Returns once the source is exhausted.
    fn stream<R: BufRead, M: DurableWrite>(
        &self,
        source: &mut LineSource<R>,
        sink: &mut ResultSink<M>,
        aggregator: &mut Aggregator,
    ) -> Result<(), ProcessingError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ProcessingError::Cancelled);
            }
            let line = match source.next_line()? {
                Some(SourceLine::Line(line)) => line,
                Some(SourceLine::Oversized { number, length }) => {
                    warn!(line = number, length, "skipping oversized line");
                    aggregator.record_skipped();
                    continue;
                }
                None => return Ok(()),
            };

            let number = line.number;
            let classification = self.classifier.classify(&line.text);
            if let Route::Forward(record) = aggregator.route(line, &classification) {
                if sink.write(&record)? == Capacity::Exhausted {
                    if self.cancel.is_cancelled() {
                        return Err(ProcessingError::Cancelled);
                    }
                    sink.drain()?;
                }
            }

            if self.config.progress_interval > 0 && number % self.config.progress_interval == 0 {
                let counters = aggregator.counters();
                info!(
                    lines = number,
                    errors = counters.error,
                    warnings = counters.warning,
                    "progress"
                );
            }
        }
    }

    fn transition(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(next) {
            error!(from = %self.state, to = %next, "illegal pipeline transition");
            debug_assert!(false, "illegal pipeline transition {} -> {}", self.state, next);
        }
        debug!(state = %next, "pipeline transition");
        self.state = next;
    }

    fn fail(&mut self, error: ProcessingError, output: OutputStatus) -> RunError {
        let next = match error {
            ProcessingError::Cancelled => PipelineState::Cancelled,
            _ => PipelineState::Failed,
        };
        self.transition(next);
        match next {
            PipelineState::Cancelled => warn!(%output, "run cancelled"),
            _ => error!(error = %error, %output, "run failed"),
        }
        RunError {
            error,
            state: next,
            output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tracing_test::traced_test;

    const MIXED: &str = "A \"GET / HTTP/1.1\" 200 - \"-\"\n\
                         B \"GET /x HTTP/1.1\" 404 - \"-\"\n\
                         C \"GET /y HTTP/1.1\" 301 - \"-\"\n\
                         D no-status-here\n";

    fn memory_run(
        pipeline: LogPipeline,
        input: &'static str,
    ) -> Result<Summary, RunError> {
        let max = pipeline.config().max_line_length;
        let hwm = pipeline.config().sink_high_water_mark;
        pipeline.run_with(
            || Ok(LineSource::from_reader(Cursor::new(input), max)),
            || Ok(ResultSink::new(Vec::new(), "memory", hwm)),
            &mut |_: &Summary| {},
        )
    }

    #[test]
    #[traced_test]
    fn test_transitions_are_logged() {
        let pipeline = LogPipeline::new(PipelineConfig::default()).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Idle);
        memory_run(pipeline, MIXED).unwrap();
        assert!(logs_contain("state=opening"));
        assert!(logs_contain("state=streaming"));
        assert!(logs_contain("state=draining"));
        assert!(logs_contain("state=done"));
        assert!(!logs_contain("illegal pipeline transition"));
    }

    #[test]
    #[traced_test]
    fn test_progress_logging() {
        let config = PipelineConfig {
            progress_interval: 2,
            ..Default::default()
        };
        let pipeline = LogPipeline::new(config).unwrap();
        memory_run(pipeline, MIXED).unwrap();
        assert!(logs_contain("progress"));
        assert!(logs_contain("lines=4"));
    }

    #[test]
    fn test_invalid_pattern_rejected_up_front() {
        let config = PipelineConfig {
            status_pattern: "[".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            LogPipeline::new(config),
            Err(ConfigError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_pre_cancelled_run_never_opens() {
        let pipeline = LogPipeline::new(PipelineConfig::default()).unwrap();
        pipeline.cancellation_token().cancel();
        let err = pipeline
            .run_with(
                || -> Result<LineSource<Cursor<Vec<u8>>>, ProcessingError> {
                    panic!("source opened after cancellation")
                },
                || Ok(ResultSink::new(Vec::new(), "memory", 16)),
                &mut |_: &Summary| panic!("summary after cancellation"),
            )
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.output, OutputStatus::Untouched);
    }
}
