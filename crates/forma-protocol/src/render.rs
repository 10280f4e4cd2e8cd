//! Evaluation results and the state published to presentation

use crate::message::WorkerReply;
use serde::Serialize;

/// Outcome of evaluating one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EvaluationResult {
    /// The kernel produced a model asset
    #[serde(rename_all = "camelCase")]
    Model { asset_url: String },
    /// Evaluation raised a fault
    Failure { message: String },
}

impl EvaluationResult {
    /// Asset URL if the evaluation succeeded
    pub fn asset_url(&self) -> Option<&str> {
        match self {
            Self::Model { asset_url } => Some(asset_url),
            Self::Failure { .. } => None,
        }
    }

    /// Check if the evaluation produced a model
    pub fn is_model(&self) -> bool {
        matches!(self, Self::Model { .. })
    }

    /// The reply that ends this evaluation on the wire
    pub fn to_reply(&self) -> WorkerReply {
        WorkerReply::Result {
            asset_url: self.asset_url().map(str::to_string),
        }
    }
}

/// A result plus every line captured while producing it
///
/// `log_lines` is append-only and kept for failures too, so it carries
/// whatever was printed before the fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    pub result: EvaluationResult,
    pub log_lines: Vec<String>,
}

/// What presentation collaborators render
///
/// Every dispatch starts a new generation and clears the previous asset and
/// log lines before any new output is admitted, so output of two different
/// submissions is never visible at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderState {
    generation: u64,
    current_asset_url: Option<String>,
    log_lines: Vec<String>,
}

impl RenderState {
    /// Start a new generation with empty output
    pub fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.current_asset_url = None;
        self.log_lines.clear();
        self.generation
    }

    /// Fold one worker reply into the state
    pub fn apply(&mut self, reply: WorkerReply) {
        match reply {
            WorkerReply::Log { log } => self.log_lines.push(log),
            WorkerReply::Result {
                asset_url: Some(url),
            } => self.current_asset_url = Some(url),
            // Failure: the logs already describe the fault
            WorkerReply::Result { asset_url: None } => {}
        }
    }

    /// Append a line that did not come from the worker
    pub fn push_log(&mut self, line: impl Into<String>) {
        self.log_lines.push(line.into());
    }

    /// Submission counter; zero before the first dispatch
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Model currently on display
    pub fn current_asset_url(&self) -> Option<&str> {
        self.current_asset_url.as_deref()
    }

    /// Console output of the current generation, in arrival order
    pub fn log_lines(&self) -> &[String] {
        &self.log_lines
    }

    /// Check if nothing has been produced for the current generation
    pub fn is_empty(&self) -> bool {
        self.current_asset_url.is_none() && self.log_lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_clears_previous_output() {
        let mut state = RenderState::default();
        state.begin();
        state.apply(WorkerReply::log("first run"));
        state.apply(WorkerReply::Result {
            asset_url: Some("model://1".into()),
        });
        assert_eq!(state.current_asset_url(), Some("model://1"));

        assert_eq!(state.begin(), 2);
        assert!(state.is_empty());
        assert_eq!(state.generation(), 2);
    }

    #[test]
    fn test_failure_keeps_url_empty() {
        let mut state = RenderState::default();
        state.begin();
        state.apply(WorkerReply::log("before fault"));
        state.apply(WorkerReply::log("Error: boom"));
        state.apply(WorkerReply::Result { asset_url: None });

        assert_eq!(state.current_asset_url(), None);
        assert_eq!(state.log_lines(), ["before fault", "Error: boom"]);
    }

    #[test]
    fn test_result_to_reply() {
        let ok = EvaluationResult::Model {
            asset_url: "model://7".into(),
        };
        assert!(ok.is_model());
        assert_eq!(
            ok.to_reply(),
            WorkerReply::Result {
                asset_url: Some("model://7".into())
            }
        );

        let failed = EvaluationResult::Failure {
            message: "bad".into(),
        };
        assert_eq!(failed.to_reply(), WorkerReply::Result { asset_url: None });
    }
}
