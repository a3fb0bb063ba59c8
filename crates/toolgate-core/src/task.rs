//! Task and workflow models.
//!
//! A task carries an ordered list of tool-invocation steps. Steps are
//! immutable once the workflow is fixed; status and result are mutated
//! exclusively by the workflow engine during a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(TaskStatus::Created),
            "IN_PROGRESS" => Some(TaskStatus::InProgress),
            "COMPLETED" => Some(TaskStatus::Completed),
            "FAILED" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// One unit of workflow execution, targeting one provider capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// 1-based; defines execution order.
    pub step_number: u32,
    pub provider_name: String,
    /// Capability identifier on the provider.
    pub action: String,
    /// Invocation payload. String values may reference prior outputs via
    /// `${steps.N.output}` or `${steps.N.output.path.to.field}`.
    #[serde(default)]
    pub input: Value,
}

/// Outcome of one step, kept for the final attempt only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_number: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Short natural-language rendering of the output, when derivable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Invocation attempts used (0 for steps that never ran).
    pub attempts: u32,
}

impl StepResult {
    pub fn succeeded(
        step_number: u32,
        raw_output: Value,
        summary: Option<String>,
        attempts: u32,
    ) -> Self {
        Self {
            step_number,
            success: true,
            raw_output: Some(raw_output),
            error: None,
            summary,
            attempts,
        }
    }

    pub fn failed(step_number: u32, error: String, attempts: u32) -> Self {
        Self {
            step_number,
            success: false,
            raw_output: None,
            error: Some(error),
            summary: None,
            attempts,
        }
    }

    pub fn skipped(step_number: u32, reason: &str) -> Self {
        Self {
            step_number,
            success: false,
            raw_output: None,
            error: Some(format!("skipped: {}", reason)),
            summary: None,
            attempts: 0,
        }
    }
}

/// Aggregated outcome of a full run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Ordered by step_number; exactly one entry per workflow step.
    pub steps: Vec<StepResult>,
    pub overall_success: bool,
    pub summary: String,
}

/// A unit of work submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub owner_id: String,
    pub status: TaskStatus,
    pub workflow: Vec<WorkflowStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(owner_id: &str, workflow: Vec<WorkflowStep>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            status: TaskStatus::Created,
            workflow,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A workflow submitted as a standalone YAML file (CLI entry path).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowFile {
    #[serde(default)]
    pub owner_id: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowFile {
    pub fn from_yaml(yaml: &str) -> Result<Self, BrokerError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| BrokerError::InvalidWorkflow(format!("Failed to parse workflow: {}", e)))
    }

    pub fn from_file(path: &str) -> Result<Self, BrokerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::InvalidWorkflow(format!(
                "Failed to read workflow file '{}': {}",
                path, e
            ))
        })?;
        Self::from_yaml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workflow_file() {
        let yaml = r#"
ownerId: alice
steps:
  - stepNumber: 1
    providerName: web-search
    action: query
    input:
      q: "rust workflow engines"
  - stepNumber: 2
    providerName: notes
    action: append
    input: "${steps.1.output}"
"#;
        let wf = WorkflowFile::from_yaml(yaml).unwrap();
        assert_eq!(wf.owner_id.as_deref(), Some("alice"));
        assert_eq!(wf.steps.len(), 2);
        assert_eq!(wf.steps[0].provider_name, "web-search");
        assert_eq!(wf.steps[1].input, serde_json::json!("${steps.1.output}"));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TaskStatus::Created,
            TaskStatus::InProgress,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("NOPE"), None);
    }

    #[test]
    fn test_step_missing_input_defaults_to_null() {
        let yaml = r#"
steps:
  - stepNumber: 1
    providerName: fs
    action: list
"#;
        let wf = WorkflowFile::from_yaml(yaml).unwrap();
        assert_eq!(wf.steps[0].input, Value::Null);
    }
}
