//! Integration tests for the toolgate CLI stack.
//!
//! These exercise the same code paths as the binary — state construction,
//! task submission, engine runs against the real transport layer — using
//! in-memory SQLite databases for isolation. Providers point at commands
//! that cannot spawn, so transport failures are exercised end to end
//! without any live tool server.

use std::io::Write;
use std::sync::Arc;

use toolgate_core::config::BrokerConfig;
use toolgate_core::engine::RunOptions;
use toolgate_core::error::BrokerError;
use toolgate_core::store::TaskStore;
use toolgate_core::task::{Task, TaskStatus, WorkflowFile, WorkflowStep};
use toolgate_core::{AppState, AppStateInner, Database};

fn test_state(config_yaml: &str) -> AppState {
    let config = BrokerConfig::from_yaml(config_yaml).expect("config parses");
    let db = Database::open_in_memory().expect("in-memory database opens");
    Arc::new(AppStateInner::new(db, config).expect("state builds"))
}

fn step(n: u32, provider: &str, action: &str) -> WorkflowStep {
    WorkflowStep {
        step_number: n,
        provider_name: provider.to_string(),
        action: action.to_string(),
        input: serde_json::json!({}),
    }
}

#[tokio::test]
async fn test_run_with_unspawnable_provider_records_failure() {
    let state = test_state(
        r#"
engine:
  maxAttempts: 2
  retryBackoffMs: 1
providers:
  - name: ghost-tool
    type: stdio
    command: "toolgate-test-missing-binary"
"#,
    );

    let task = Task::new("default", vec![step(1, "ghost-tool", "noop")]);
    state.task_store.save_task(&task).await.unwrap();

    let result = state
        .engine
        .run(&task.id, RunOptions::default())
        .await
        .unwrap();

    // The spawn failure is a step-level outcome, not a crash
    assert!(!result.overall_success);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].attempts, 2);
    assert!(result.steps[0]
        .error
        .as_deref()
        .unwrap()
        .contains("Transport failure"));

    let stored = state.task_store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.result.unwrap(), result);
    // Nothing lingers in the pool after a failed open
    assert_eq!(state.pool.status().await.total_connections, 0);
}

#[tokio::test]
async fn test_auth_gate_blocks_until_granted() {
    let state = test_state(
        r#"
engine:
  maxAttempts: 1
providers:
  - name: locked-tool
    type: stdio
    command: "toolgate-test-missing-binary"
    authRequired: true
    authParams: [apiKey]
"#,
    );

    let task = Task::new("alice", vec![step(1, "locked-tool", "noop")]);
    state.task_store.save_task(&task).await.unwrap();

    let err = state
        .engine
        .run(&task.id, RunOptions::default())
        .await
        .unwrap_err();
    match err {
        BrokerError::NeedsAuth(providers) => assert_eq!(providers, vec!["locked-tool"]),
        other => panic!("expected NeedsAuth, got {:?}", other),
    }
    // Pre-flight abort leaves the task untouched
    let stored = state.task_store.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Created);
    assert!(state
        .task_store
        .get_step_results(&task.id)
        .await
        .unwrap()
        .is_empty());

    // After granting the verification the run proceeds (and then fails at
    // the transport, which is the expected outcome without a live tool)
    state
        .auth_gate
        .mark_verified("alice", "locked-tool")
        .await
        .unwrap();
    assert_eq!(
        state.auth_gate.list_verified("alice").await.unwrap(),
        vec!["locked-tool"]
    );

    let result = state
        .engine
        .run(&task.id, RunOptions::default())
        .await
        .unwrap();
    assert!(!result.overall_success);
    assert_eq!(result.steps.len(), 1);
}

#[tokio::test]
async fn test_workflow_file_round_trip_through_store() {
    let state = test_state(
        r#"
providers:
  - name: fs
    type: stdio
    command: "toolgate-test-missing-binary"
"#,
    );

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
ownerId: alice
steps:
  - stepNumber: 1
    providerName: fs
    action: list
    input:
      path: "/tmp"
  - stepNumber: 2
    providerName: fs
    action: read
    input: "${{steps.1.output}}"
"#
    )
    .unwrap();

    let workflow = WorkflowFile::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(workflow.owner_id.as_deref(), Some("alice"));

    let task = Task::new("alice", workflow.steps);
    state.task_store.save_task(&task).await.unwrap();

    let tasks = state.task_store.list_by_owner("alice").await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].workflow.len(), 2);
    assert_eq!(tasks[0].status, TaskStatus::Created);
}
