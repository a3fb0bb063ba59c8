//! Progress events emitted during a streaming run.
//!
//! One event object per notification, consumed in emission order. Steps
//! execute sequentially, so events never interleave across steps of the
//! same run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    StepStart {
        step_number: u32,
        provider: String,
        action: String,
        input: Value,
    },
    #[serde(rename_all = "camelCase")]
    StepComplete {
        step_number: u32,
        raw_output: Value,
    },
    #[serde(rename_all = "camelCase")]
    StepError { step_number: u32, error: String },
    WorkflowComplete { summary: String },
    Error { message: String },
}

impl ProgressEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProgressEvent::StepStart { .. } => "step_start",
            ProgressEvent::StepComplete { .. } => "step_complete",
            ProgressEvent::StepError { .. } => "step_error",
            ProgressEvent::WorkflowComplete { .. } => "workflow_complete",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

/// Where a streaming run sends its progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event; the non-streaming `run` path uses this.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwarding into an unbounded channel (SSE bridges subscribe here).
impl ProgressSink for tokio::sync::mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_shape() {
        let event = ProgressEvent::StepStart {
            step_number: 2,
            provider: "web-search".to_string(),
            action: "query".to_string(),
            input: serde_json::json!({ "q": "x" }),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "step_start");
        assert_eq!(json["data"]["stepNumber"], 2);
        assert_eq!(json["data"]["provider"], "web-search");
    }

    #[test]
    fn test_event_names() {
        assert_eq!(
            ProgressEvent::WorkflowComplete {
                summary: String::new()
            }
            .name(),
            "workflow_complete"
        );
        assert_eq!(
            ProgressEvent::Error {
                message: String::new()
            }
            .name(),
            "error"
        );
    }
}
