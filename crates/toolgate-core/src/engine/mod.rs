//! Workflow Execution Engine — runs an ordered step list against pooled
//! connections.
//!
//! Per run: pre-flight validation (duplicate step numbers, auth gate),
//! then strictly sequential step execution with bounded retry, parameter
//! propagation between steps, incremental persistence, and progress
//! events. Step failures are non-fatal by default; only the auth gate
//! and configured hard-stop providers abort a run.

pub mod events;
mod template;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::auth::AuthGate;
use crate::config::EngineConfig;
use crate::error::BrokerError;
use crate::pool::ConnectionPool;
use crate::registry::ProviderRegistry;
use crate::store::TaskStore;
use crate::task::{ExecutionResult, StepResult, TaskStatus, WorkflowStep};
use crate::transport::InvokeResult;

pub use events::{NullSink, ProgressEvent, ProgressSink};

/// Caller-initiated cancellation signal for one run.
///
/// Cancelling stops new step invocations; an in-flight invocation is
/// left to complete or hit its own timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip the auth gate pre-flight (trusted internal callers).
    pub skip_auth_check: bool,
    pub cancel: CancelHandle,
}

/// Executes task workflows against the connection pool.
pub struct WorkflowEngine {
    pool: Arc<ConnectionPool>,
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn TaskStore>,
    auth: Arc<dyn AuthGate>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        pool: Arc<ConnectionPool>,
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn TaskStore>,
        auth: Arc<dyn AuthGate>,
        config: EngineConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            store,
            auth,
            config,
        }
    }

    /// Run a task's workflow to completion and return the full result.
    pub async fn run(
        &self,
        task_id: &str,
        options: RunOptions,
    ) -> Result<ExecutionResult, BrokerError> {
        self.run_streaming(task_id, options, &NullSink).await
    }

    /// Identical execution semantics to [`run`], emitting one progress
    /// event per step transition to `sink`, in step order, terminated by
    /// exactly one `workflow_complete` or `error`.
    ///
    /// [`run`]: WorkflowEngine::run
    pub async fn run_streaming(
        &self,
        task_id: &str,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ExecutionResult, BrokerError> {
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("Task {}", task_id)))?;

        let mut steps = task.workflow.clone();
        steps.sort_by_key(|s| s.step_number);

        // Pre-flight: malformed workflows never start executing
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.step_number) {
                let err = BrokerError::InvalidWorkflow(format!(
                    "duplicate step number {}",
                    step.step_number
                ));
                sink.emit(ProgressEvent::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
        }

        // Pre-flight: every auth-required provider must be verified for
        // the owner before any step runs
        if !options.skip_auth_check {
            let mut unverified = Vec::new();
            let mut checked = HashSet::new();
            for step in &steps {
                if !checked.insert(step.provider_name.clone()) {
                    continue;
                }
                // A provider missing from the registry surfaces as its own
                // step's connect failure, not a pre-flight error
                if let Some(descriptor) = self.registry.get(&step.provider_name) {
                    if descriptor.auth_required
                        && !self
                            .auth
                            .is_verified(&task.owner_id, &step.provider_name)
                            .await?
                    {
                        unverified.push(step.provider_name.clone());
                    }
                }
            }
            if !unverified.is_empty() {
                unverified.sort();
                let err = BrokerError::NeedsAuth(unverified);
                sink.emit(ProgressEvent::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
        }

        tracing::info!(
            "[WorkflowEngine] Starting run for task {} ({} steps)",
            task.id,
            steps.len()
        );
        self.store
            .update_status(&task.id, TaskStatus::InProgress)
            .await?;

        let mut results: Vec<StepResult> = Vec::with_capacity(steps.len());
        let mut outputs: HashMap<u32, Value> = HashMap::new();
        let mut abort: Option<String> = None;

        for step in &steps {
            if abort.is_none() && options.cancel.is_cancelled() {
                abort = Some("run cancelled".to_string());
            }
            if let Some(reason) = &abort {
                let result = StepResult::skipped(step.step_number, reason);
                self.store.save_step_result(&task.id, &result).await?;
                results.push(result);
                continue;
            }

            sink.emit(ProgressEvent::StepStart {
                step_number: step.step_number,
                provider: step.provider_name.clone(),
                action: step.action.clone(),
                input: step.input.clone(),
            });

            let step_result = self.execute_step(&task.owner_id, step, &mut outputs).await;

            self.store.save_step_result(&task.id, &step_result).await?;

            if step_result.success {
                sink.emit(ProgressEvent::StepComplete {
                    step_number: step.step_number,
                    raw_output: step_result.raw_output.clone().unwrap_or(Value::Null),
                });
            } else {
                tracing::warn!(
                    "[WorkflowEngine] Step {} ({}/{}) failed: {}",
                    step.step_number,
                    step.provider_name,
                    step.action,
                    step_result.error.as_deref().unwrap_or("unknown")
                );
                sink.emit(ProgressEvent::StepError {
                    step_number: step.step_number,
                    error: step_result.error.clone().unwrap_or_default(),
                });
                if self
                    .config
                    .hard_stop_providers
                    .iter()
                    .any(|p| p == &step.provider_name)
                {
                    abort = Some(format!(
                        "hard-stop provider '{}' failed",
                        step.provider_name
                    ));
                }
            }

            results.push(step_result);
        }

        let overall_success = results.iter().all(|r| r.success);
        let summary = build_summary(&results);
        let result = ExecutionResult {
            steps: results,
            overall_success,
            summary: summary.clone(),
        };

        self.store.save_result(&task.id, &result).await?;
        let final_status = if abort.is_some() {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        self.store.update_status(&task.id, final_status).await?;

        tracing::info!(
            "[WorkflowEngine] Run complete for task {} ({}, {} steps)",
            task.id,
            final_status.as_str(),
            result.steps.len()
        );
        sink.emit(ProgressEvent::WorkflowComplete { summary });

        Ok(result)
    }

    /// Resolve a step's input and invoke it, retrying transport-class
    /// failures up to the configured attempt bound.
    async fn execute_step(
        &self,
        owner_id: &str,
        step: &WorkflowStep,
        outputs: &mut HashMap<u32, Value>,
    ) -> StepResult {
        let resolved = match template::resolve_input(&step.input, outputs) {
            Ok(v) => v,
            Err(missing) => {
                return StepResult::failed(
                    step.step_number,
                    BrokerError::MissingInput(missing).to_string(),
                    0,
                );
            }
        };

        let (attempts, outcome) = self
            .invoke_with_retry(owner_id, &step.provider_name, &step.action, &resolved)
            .await;

        match outcome {
            Ok(result) if !result.is_error => {
                outputs.insert(step.step_number, result.content.clone());
                let summary = summarize_output(&result.content);
                StepResult::succeeded(step.step_number, result.content, summary, attempts)
            }
            // The tool itself reported a definitive failure; keep its
            // native response alongside the error
            Ok(result) => {
                let mut step_result = StepResult::failed(
                    step.step_number,
                    format!("tool error: {}", truncate_content(&render_text(&result.content), 300)),
                    attempts,
                );
                step_result.raw_output = Some(result.content);
                step_result
            }
            Err(e) => StepResult::failed(step.step_number, e.to_string(), attempts),
        }
    }

    async fn invoke_with_retry(
        &self,
        owner_id: &str,
        provider_name: &str,
        action: &str,
        args: &Value,
    ) -> (u32, Result<InvokeResult, BrokerError>) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self
                .pool
                .invoke(owner_id, provider_name, action, args.clone())
                .await
            {
                Ok(result) => return (attempts, Ok(result)),
                Err(e) if e.is_retryable() && attempts < self.config.max_attempts => {
                    tracing::warn!(
                        "[WorkflowEngine] Attempt {} for {}/{} failed: {} (retrying)",
                        attempts,
                        provider_name,
                        action,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(
                        self.config.retry_backoff_ms * attempts as u64,
                    ))
                    .await;
                }
                Err(e) => return (attempts, Err(e)),
            }
        }
    }
}

/// Render provider output as plain text: text content items joined, bare
/// strings as-is, anything else as compact JSON.
fn render_text(content: &Value) -> String {
    if let Some(items) = content.as_array() {
        let texts: Vec<&str> = items
            .iter()
            .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
            .collect();
        if !texts.is_empty() {
            return texts.join("\n");
        }
    }
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn summarize_output(content: &Value) -> Option<String> {
    let text = render_text(content);
    if text.is_empty() || text == "null" {
        None
    } else {
        Some(truncate_content(&text, 200))
    }
}

fn build_summary(results: &[StepResult]) -> String {
    let ok = results.iter().filter(|r| r.success).count();
    let mut summary = if results.is_empty() {
        "no steps to execute".to_string()
    } else {
        format!("{}/{} steps succeeded", ok, results.len())
    };

    let failures: Vec<String> = results
        .iter()
        .filter(|r| !r.success)
        .map(|r| {
            format!(
                "step {}: {}",
                r.step_number,
                truncate_content(r.error.as_deref().unwrap_or("unknown"), 120)
            )
        })
        .collect();
    if !failures.is_empty() {
        summary.push_str("; failed: ");
        summary.push_str(&failures.join("; "));
    }
    summary
}

/// Truncate content to a maximum length for summaries and logs.
fn truncate_content(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i <= max_len.saturating_sub(3))
            .last()
            .map(|(i, _)| i)
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SqliteAuthGate;
    use crate::config::PoolLimits;
    use crate::db::Database;
    use crate::pool::ConnectionState;
    use crate::provider::{ProviderDescriptor, TransportKind};
    use crate::store::SqliteTaskStore;
    use crate::task::Task;
    use crate::transport::mock::MockTransport;
    use crate::transport::{ChannelError, InvokeResult};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct CollectorSink(Arc<Mutex<Vec<ProgressEvent>>>);

    impl ProgressSink for CollectorSink {
        fn emit(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl CollectorSink {
        fn events(&self) -> Vec<ProgressEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Harness {
        engine: WorkflowEngine,
        pool: Arc<ConnectionPool>,
        transport: MockTransport,
        store: SqliteTaskStore,
        gate: SqliteAuthGate,
    }

    fn descriptor(name: &str, auth_required: bool) -> ProviderDescriptor {
        ProviderDescriptor {
            name: name.to_string(),
            display_name: None,
            description: None,
            category: None,
            transport: TransportKind::Stdio,
            command: Some(format!("tool-{}", name)),
            args: None,
            env: None,
            url: None,
            headers: None,
            auth_required,
            auth_params: if auth_required {
                vec!["apiKey".to_string()]
            } else {
                Vec::new()
            },
            enabled: true,
        }
    }

    fn harness(providers: Vec<ProviderDescriptor>, config: EngineConfig) -> Harness {
        let registry = Arc::new(ProviderRegistry::from_providers(providers).unwrap());
        let transport = MockTransport::new();
        let pool = Arc::new(ConnectionPool::new(
            registry.clone(),
            Arc::new(transport.clone()),
            PoolLimits::default(),
        ));
        let db = Database::open_in_memory().unwrap();
        let store = SqliteTaskStore::new(db.clone());
        let gate = SqliteAuthGate::new(db);
        let engine = WorkflowEngine::new(
            pool.clone(),
            registry,
            Arc::new(store.clone()),
            Arc::new(gate.clone()),
            config,
        );
        Harness {
            engine,
            pool,
            transport,
            store,
            gate,
        }
    }

    fn fast_retries() -> EngineConfig {
        EngineConfig {
            max_attempts: 3,
            retry_backoff_ms: 1,
            hard_stop_providers: Vec::new(),
        }
    }

    fn step(n: u32, provider: &str, action: &str, input: Value) -> WorkflowStep {
        WorkflowStep {
            step_number: n,
            provider_name: provider.to_string(),
            action: action.to_string(),
            input,
        }
    }

    async fn make_task(store: &SqliteTaskStore, owner: &str, steps: Vec<WorkflowStep>) -> String {
        let task = Task::new(owner, steps);
        store.save_task(&task).await.unwrap();
        task.id
    }

    #[tokio::test]
    async fn test_empty_workflow_completes_immediately() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        let task_id = make_task(&h.store, "alice", vec![]).await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();

        assert!(result.overall_success);
        assert!(result.steps.is_empty());
        let task = h.store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_duplicate_step_numbers_rejected_before_execution() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        let task_id = make_task(
            &h.store,
            "alice",
            vec![
                step(1, "fs", "list", json!({})),
                step(1, "fs", "read", json!({})),
            ],
        )
        .await;

        let err = h.engine.run(&task_id, RunOptions::default()).await.unwrap_err();

        assert!(matches!(err, BrokerError::InvalidWorkflow(_)));
        assert!(h.transport.invocations().is_empty());
        assert!(h.store.get_step_results(&task_id).await.unwrap().is_empty());
        let task = h.store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Created);
    }

    #[tokio::test]
    async fn test_non_fatal_failure_continues_to_later_steps() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        h.transport.set_invoke(|_, capability, args| {
            if capability == "explode" {
                Ok(InvokeResult::tool_error(json!({ "message": "boom" })))
            } else {
                Ok(InvokeResult::ok(json!({ "capability": capability, "args": args })))
            }
        });
        let task_id = make_task(
            &h.store,
            "alice",
            vec![
                step(1, "fs", "list", json!({})),
                step(2, "fs", "explode", json!({})),
                step(3, "fs", "read", json!({})),
            ],
        )
        .await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();

        assert_eq!(result.steps.len(), 3);
        assert!(result.steps[0].success);
        assert!(!result.steps[1].success);
        // A definitive tool error is never retried
        assert_eq!(result.steps[1].attempts, 1);
        assert!(result.steps[2].success);
        assert!(!result.overall_success);

        let task = h.store.get_task(&task_id).await.unwrap().unwrap();
        // Non-fatal failures still complete the run
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(h.store.get_step_results(&task_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_failures_are_retried() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        h.transport.set_invoke(move |_, _, _| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ChannelError::Fatal("pipe burst".to_string()))
            } else {
                Ok(InvokeResult::ok(json!("recovered")))
            }
        });
        let task_id = make_task(&h.store, "alice", vec![step(1, "fs", "list", json!({}))]).await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();

        assert!(result.overall_success);
        assert_eq!(result.steps[0].attempts, 3);
        // Each fatal failure evicted the connection, so it was reopened
        assert_eq!(h.transport.opened(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_records_failure() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        h.transport.set_invoke(|_, _, _| Err(ChannelError::Fatal("dead".to_string())));
        let task_id = make_task(&h.store, "alice", vec![step(1, "fs", "list", json!({}))]).await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();

        assert!(!result.overall_success);
        assert_eq!(result.steps[0].attempts, 3);
        assert!(result.steps[0].error.as_deref().unwrap().contains("dead"));
    }

    #[tokio::test]
    async fn test_unverified_auth_provider_aborts_preflight() {
        let h = harness(
            vec![descriptor("fs", false), descriptor("mail", true)],
            fast_retries(),
        );
        let task_id = make_task(
            &h.store,
            "alice",
            vec![
                step(1, "fs", "list", json!({})),
                step(2, "mail", "send", json!({})),
            ],
        )
        .await;

        let sink = CollectorSink::default();
        let err = h
            .engine
            .run_streaming(&task_id, RunOptions::default(), &sink)
            .await
            .unwrap_err();

        match err {
            BrokerError::NeedsAuth(providers) => assert_eq!(providers, vec!["mail"]),
            other => panic!("expected NeedsAuth, got {:?}", other),
        }
        // Fail fast: nothing ran, nothing was persisted
        assert!(h.transport.invocations().is_empty());
        assert!(h.store.get_step_results(&task_id).await.unwrap().is_empty());
        let task = h.store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Created);
        // One terminal error event, nothing else
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "error");
    }

    #[tokio::test]
    async fn test_verified_provider_passes_auth_gate() {
        let h = harness(vec![descriptor("mail", true)], fast_retries());
        h.gate.mark_verified("alice", "mail").await.unwrap();
        let task_id = make_task(&h.store, "alice", vec![step(1, "mail", "send", json!({}))]).await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();
        assert!(result.overall_success);
    }

    #[tokio::test]
    async fn test_skip_auth_check_bypasses_gate() {
        let h = harness(vec![descriptor("mail", true)], fast_retries());
        let task_id = make_task(&h.store, "alice", vec![step(1, "mail", "send", json!({}))]).await;

        let options = RunOptions {
            skip_auth_check: true,
            ..RunOptions::default()
        };
        let result = h.engine.run(&task_id, options).await.unwrap();
        assert!(result.overall_success);
    }

    #[tokio::test]
    async fn test_hard_stop_provider_aborts_remaining_steps() {
        let config = EngineConfig {
            hard_stop_providers: vec!["payments".to_string()],
            ..fast_retries()
        };
        let h = harness(
            vec![descriptor("payments", false), descriptor("fs", false)],
            config,
        );
        h.transport.set_invoke(|provider, _, _| {
            if provider == "payments" {
                Ok(InvokeResult::tool_error(json!({ "message": "declined" })))
            } else {
                Ok(InvokeResult::ok(json!("ok")))
            }
        });
        let task_id = make_task(
            &h.store,
            "alice",
            vec![
                step(1, "payments", "charge", json!({})),
                step(2, "fs", "list", json!({})),
                step(3, "fs", "read", json!({})),
            ],
        )
        .await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();

        assert_eq!(result.steps.len(), 3);
        assert!(!result.steps[0].success);
        assert!(result.steps[1].error.as_deref().unwrap().starts_with("skipped:"));
        assert!(result.steps[2].error.as_deref().unwrap().starts_with("skipped:"));
        // Only the hard-stop step ever reached a provider
        assert_eq!(h.transport.invocations().len(), 1);

        let task = h.store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_parameter_propagation_between_steps() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        h.transport.set_invoke(|_, capability, args| {
            if capability == "produce" {
                Ok(InvokeResult::ok(json!({ "token": "abc123" })))
            } else {
                Ok(InvokeResult::ok(json!({ "received": args })))
            }
        });
        let task_id = make_task(
            &h.store,
            "alice",
            vec![
                step(1, "fs", "produce", json!({})),
                step(2, "fs", "consume", json!({ "auth": "${steps.1.output.token}" })),
            ],
        )
        .await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();

        assert!(result.overall_success);
        assert_eq!(
            result.steps[1].raw_output.as_ref().unwrap()["received"]["auth"],
            "abc123"
        );
    }

    #[tokio::test]
    async fn test_unresolvable_reference_is_step_level_missing_input() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        let task_id = make_task(
            &h.store,
            "alice",
            vec![
                step(1, "fs", "list", json!({})),
                step(2, "fs", "consume", json!("${steps.1.output.nope}")),
                step(3, "fs", "read", json!({})),
            ],
        )
        .await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();

        assert!(!result.steps[1].success);
        assert!(result.steps[1].error.as_deref().unwrap().contains("Missing input"));
        assert_eq!(result.steps[1].attempts, 0);
        // The run keeps going
        assert!(result.steps[2].success);
    }

    #[tokio::test]
    async fn test_reference_to_failed_step_is_missing_input() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        h.transport.set_invoke(|_, capability, _| {
            if capability == "explode" {
                Ok(InvokeResult::tool_error(json!({ "message": "boom" })))
            } else {
                Ok(InvokeResult::ok(json!("ok")))
            }
        });
        let task_id = make_task(
            &h.store,
            "alice",
            vec![
                step(1, "fs", "explode", json!({})),
                step(2, "fs", "consume", json!("${steps.1.output}")),
            ],
        )
        .await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();
        assert!(!result.steps[1].success);
        assert!(result.steps[1].error.as_deref().unwrap().contains("Missing input"));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_a_step_failure_not_a_crash() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        let task_id = make_task(
            &h.store,
            "alice",
            vec![
                step(1, "ghost", "whatever", json!({})),
                step(2, "fs", "list", json!({})),
            ],
        )
        .await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();

        assert!(!result.steps[0].success);
        assert!(result.steps[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Unknown provider"));
        assert!(result.steps[1].success);
        assert!(!result.overall_success);
    }

    #[tokio::test]
    async fn test_streaming_events_ordered_and_paired() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        h.transport.set_invoke(|_, capability, _| {
            if capability == "explode" {
                Ok(InvokeResult::tool_error(json!({ "message": "boom" })))
            } else {
                Ok(InvokeResult::ok(json!("ok")))
            }
        });
        let task_id = make_task(
            &h.store,
            "alice",
            vec![
                step(1, "fs", "list", json!({})),
                step(2, "fs", "explode", json!({})),
                step(3, "fs", "read", json!({})),
            ],
        )
        .await;

        let sink = CollectorSink::default();
        h.engine
            .run_streaming(&task_id, RunOptions::default(), &sink)
            .await
            .unwrap();

        let names: Vec<&str> = sink.events().iter().map(|e| e.name()).collect();
        assert_eq!(
            names,
            vec![
                "step_start",
                "step_complete",
                "step_start",
                "step_error",
                "step_start",
                "step_complete",
                "workflow_complete",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_and_run_streaming_produce_identical_results() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        h.transport.set_invoke(|_, capability, _| match capability {
            "one" => Ok(InvokeResult::ok(json!({ "n": 1 }))),
            "two" => Ok(InvokeResult::ok(json!({ "n": 2 }))),
            _ => Ok(InvokeResult::ok(json!({ "n": 3 }))),
        });
        let steps = vec![
            step(1, "fs", "one", json!({})),
            step(2, "fs", "two", json!("${steps.1.output.n}")),
            step(3, "fs", "three", json!({})),
        ];
        let plain_id = make_task(&h.store, "alice", steps.clone()).await;
        let streamed_id = make_task(&h.store, "alice", steps).await;

        let plain = h.engine.run(&plain_id, RunOptions::default()).await.unwrap();
        let sink = CollectorSink::default();
        let streamed = h
            .engine
            .run_streaming(&streamed_id, RunOptions::default(), &sink)
            .await
            .unwrap();

        assert_eq!(plain, streamed);
    }

    #[tokio::test]
    async fn test_cancellation_skips_remaining_and_releases_connection() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        h.transport.set_invoke_delay(Duration::from_millis(100));
        let task_id = make_task(
            &h.store,
            "alice",
            vec![
                step(1, "fs", "list", json!({})),
                step(2, "fs", "read", json!({})),
                step(3, "fs", "stat", json!({})),
            ],
        )
        .await;

        let cancel = CancelHandle::new();
        let options = RunOptions {
            skip_auth_check: false,
            cancel: cancel.clone(),
        };
        let run = {
            let engine = h.engine;
            let task_id = task_id.clone();
            tokio::spawn(async move { engine.run(&task_id, options).await })
        };

        // Cancel while step 1's invocation is in flight
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let result = run.await.unwrap().unwrap();

        // The in-flight step completed; everything after was skipped
        assert!(result.steps[0].success);
        assert!(result.steps[1].error.as_deref().unwrap().starts_with("skipped:"));
        assert!(result.steps[2].error.as_deref().unwrap().starts_with("skipped:"));
        assert_eq!(h.transport.invocations().len(), 1);

        // The connection is never left stuck in Busy
        let state = h.pool.connection_state("alice", "fs").await.unwrap();
        assert!(matches!(
            state,
            ConnectionState::Idle | ConnectionState::Ready
        ));

        let task = h.store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_step_summaries_render_text_content() {
        let h = harness(vec![descriptor("fs", false)], fast_retries());
        h.transport.set_invoke(|_, _, _| {
            Ok(InvokeResult::ok(json!([
                { "type": "text", "text": "line one" },
                { "type": "text", "text": "line two" }
            ])))
        });
        let task_id = make_task(&h.store, "alice", vec![step(1, "fs", "cat", json!({}))]).await;

        let result = h.engine.run(&task_id, RunOptions::default()).await.unwrap();
        assert_eq!(
            result.steps[0].summary.as_deref(),
            Some("line one\nline two")
        );
    }

    #[test]
    fn test_build_summary_mentions_failures() {
        let results = vec![
            StepResult::succeeded(1, json!("a"), None, 1),
            StepResult::failed(2, "tool error: boom".to_string(), 1),
        ];
        let summary = build_summary(&results);
        assert!(summary.starts_with("1/2 steps succeeded"));
        assert!(summary.contains("step 2"));
    }
}
