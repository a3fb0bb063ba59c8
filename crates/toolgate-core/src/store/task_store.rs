//! Task persistence.
//!
//! The engine writes through the [`TaskStore`] trait so callers can swap
//! the backing store; the shipped implementation is SQLite. Step results
//! are persisted incrementally, one row per step, so a crash mid-run
//! leaves a partially-populated, inspectable result.

use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::BrokerError;
use crate::task::{ExecutionResult, StepResult, Task, TaskStatus, WorkflowStep};

/// Durable, idempotent task persistence consumed by the engine.
#[async_trait::async_trait]
pub trait TaskStore: Send + Sync {
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, BrokerError>;

    async fn get_workflow(&self, task_id: &str) -> Result<Vec<WorkflowStep>, BrokerError>;

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), BrokerError>;

    /// Upsert one step's outcome. Only the final attempt's outcome is
    /// kept for a given step number.
    async fn save_step_result(
        &self,
        task_id: &str,
        result: &StepResult,
    ) -> Result<(), BrokerError>;

    /// Store the final aggregated result on the task.
    async fn save_result(
        &self,
        task_id: &str,
        result: &ExecutionResult,
    ) -> Result<(), BrokerError>;
}

/// SQLite-backed task store.
#[derive(Clone)]
pub struct SqliteTaskStore {
    db: Database,
}

impl SqliteTaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new (or updated) task record.
    pub async fn save_task(&self, task: &Task) -> Result<(), BrokerError> {
        let t = task.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, owner_id, status, workflow, result, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                       owner_id = excluded.owner_id,
                       status = excluded.status,
                       workflow = excluded.workflow,
                       result = excluded.result,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        t.id,
                        t.owner_id,
                        t.status.as_str(),
                        serde_json::to_string(&t.workflow).unwrap_or_else(|_| "[]".to_string()),
                        t.result
                            .as_ref()
                            .and_then(|r| serde_json::to_string(r).ok()),
                        t.created_at.timestamp_millis(),
                        t.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// List tasks for one owner, most recent first.
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Task>, BrokerError> {
        let owner = owner_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, status, workflow, result, created_at, updated_at
                     FROM tasks WHERE owner_id = ?1 ORDER BY created_at DESC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![owner], |row| Ok(row_to_task(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Per-step outcomes persisted so far, ordered by step number.
    /// Useful for inspecting a run that crashed before completion.
    pub async fn get_step_results(
        &self,
        task_id: &str,
    ) -> Result<Vec<StepResult>, BrokerError> {
        let id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT payload FROM step_results
                     WHERE task_id = ?1 ORDER BY step_number ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id], |row| {
                        let payload: String = row.get(0)?;
                        Ok(payload)
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map(|payloads| {
                payloads
                    .iter()
                    .filter_map(|p| serde_json::from_str(p).ok())
                    .collect()
            })
    }
}

#[async_trait::async_trait]
impl TaskStore for SqliteTaskStore {
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, BrokerError> {
        let id = task_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, owner_id, status, workflow, result, created_at, updated_at
                     FROM tasks WHERE id = ?1",
                )?;
                stmt.query_row(rusqlite::params![id], |row| Ok(row_to_task(row)))
                    .optional()
            })
            .await
    }

    async fn get_workflow(&self, task_id: &str) -> Result<Vec<WorkflowStep>, BrokerError> {
        let id = task_id.to_string();
        let workflow: Option<String> = self
            .db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare("SELECT workflow FROM tasks WHERE id = ?1")?;
                stmt.query_row(rusqlite::params![id], |row| row.get(0))
                    .optional()
            })
            .await?;

        match workflow {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| BrokerError::Database(format!("Malformed workflow column: {}", e))),
            None => Err(BrokerError::NotFound(format!("Task {}", task_id))),
        }
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<(), BrokerError> {
        let id = task_id.to_string();
        let status_str = status.as_str().to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![status_str, now, id],
                )?;
                Ok(())
            })
            .await
    }

    async fn save_step_result(
        &self,
        task_id: &str,
        result: &StepResult,
    ) -> Result<(), BrokerError> {
        let id = task_id.to_string();
        let step_number = result.step_number;
        let payload = serde_json::to_string(result)
            .map_err(|e| BrokerError::Internal(format!("Failed to serialize step result: {}", e)))?;
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO step_results (task_id, step_number, payload, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(task_id, step_number) DO UPDATE SET
                       payload = excluded.payload,
                       updated_at = excluded.updated_at",
                    rusqlite::params![id, step_number, payload, now],
                )?;
                Ok(())
            })
            .await
    }

    async fn save_result(
        &self,
        task_id: &str,
        result: &ExecutionResult,
    ) -> Result<(), BrokerError> {
        let id = task_id.to_string();
        let json = serde_json::to_string(result)
            .map_err(|e| BrokerError::Internal(format!("Failed to serialize result: {}", e)))?;
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE tasks SET result = ?1, updated_at = ?2 WHERE id = ?3",
                    rusqlite::params![json, now, id],
                )?;
                Ok(())
            })
            .await
    }
}

use rusqlite::Row;

fn row_to_task(row: &Row<'_>) -> Task {
    let workflow_str: String = row.get(3).unwrap_or_else(|_| "[]".to_string());
    let result_str: Option<String> = row.get(4).unwrap_or(None);
    let created_ms: i64 = row.get(5).unwrap_or(0);
    let updated_ms: i64 = row.get(6).unwrap_or(0);

    Task {
        id: row.get(0).unwrap_or_default(),
        owner_id: row.get(1).unwrap_or_default(),
        status: TaskStatus::from_str(&row.get::<_, String>(2).unwrap_or_default())
            .unwrap_or(TaskStatus::Created),
        workflow: serde_json::from_str(&workflow_str).unwrap_or_default(),
        result: result_str.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: chrono::DateTime::from_timestamp_millis(created_ms)
            .unwrap_or_else(Utc::now),
        updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
            .unwrap_or_else(Utc::now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_store() -> SqliteTaskStore {
        SqliteTaskStore::new(Database::open_in_memory().unwrap())
    }

    fn sample_task() -> Task {
        Task::new(
            "alice",
            vec![WorkflowStep {
                step_number: 1,
                provider_name: "fs".to_string(),
                action: "list".to_string(),
                input: json!({ "path": "/tmp" }),
            }],
        )
    }

    #[tokio::test]
    async fn test_task_round_trip() {
        let store = test_store();
        let task = sample_task();
        store.save_task(&task).await.unwrap();

        let loaded = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.owner_id, "alice");
        assert_eq!(loaded.status, TaskStatus::Created);
        assert_eq!(loaded.workflow, task.workflow);
        assert!(loaded.result.is_none());

        let workflow = store.get_workflow(&task.id).await.unwrap();
        assert_eq!(workflow, task.workflow);
    }

    #[tokio::test]
    async fn test_get_missing_task() {
        let store = test_store();
        assert!(store.get_task("nope").await.unwrap().is_none());
        assert!(matches!(
            store.get_workflow("nope").await,
            Err(BrokerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_step_result_upsert_keeps_final_attempt() {
        let store = test_store();
        let task = sample_task();
        store.save_task(&task).await.unwrap();

        store
            .save_step_result(&task.id, &StepResult::failed(1, "flaky".to_string(), 1))
            .await
            .unwrap();
        store
            .save_step_result(
                &task.id,
                &StepResult::succeeded(1, json!("ok"), None, 2),
            )
            .await
            .unwrap();

        let results = store.get_step_results(&task.id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_status_and_result_update() {
        let store = test_store();
        let task = sample_task();
        store.save_task(&task).await.unwrap();

        store
            .update_status(&task.id, TaskStatus::InProgress)
            .await
            .unwrap();
        let result = ExecutionResult {
            steps: vec![StepResult::succeeded(1, json!("done"), None, 1)],
            overall_success: true,
            summary: "1/1 steps succeeded".to_string(),
        };
        store.save_result(&task.id, &result).await.unwrap();
        store
            .update_status(&task.id, TaskStatus::Completed)
            .await
            .unwrap();

        let loaded = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.result.unwrap(), result);
    }
}
