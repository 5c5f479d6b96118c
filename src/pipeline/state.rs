// src/pipeline/state.rs
use serde::Serialize;
use std::fmt;

/// Lifecycle of a single pipeline run.
///
/// `Draining` covers the gap between "input exhausted" and "output confirmed
/// on stable storage". `Done` is only reachable from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Opening,
    Streaming,
    Draining,
    Done,
    Failed,
    Cancelled,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Opening)
                | (Opening, Streaming)
                | (Opening, Failed)
                | (Opening, Cancelled)
                | (Streaming, Draining)
                | (Streaming, Failed)
                | (Streaming, Cancelled)
                | (Draining, Done)
                | (Draining, Failed)
                | (Draining, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Failed | PipelineState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Opening => "opening",
            PipelineState::Streaming => "streaming",
            PipelineState::Draining => "draining",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
            PipelineState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
