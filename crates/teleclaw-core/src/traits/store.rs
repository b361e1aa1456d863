//! Record store — durable storage for tasks and their execution history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Task, TaskExecutionRecord, TaskStatus};

/// Source of truth for task definitions, run status, and execution history.
///
/// Task listings are ordered by priority (highest first), then by creation
/// time. Execution listings are newest first.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn name(&self) -> &str;

    async fn create_task(&self, task: &Task) -> Result<()>;
    async fn find_task_by_id(&self, id: &str) -> Result<Option<Task>>;
    async fn find_all_tasks(&self) -> Result<Vec<Task>>;
    async fn find_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;
    async fn find_tasks_by_account(&self, account_id: &str) -> Result<Vec<Task>>;

    /// Replace the stored definition. Status is left untouched.
    async fn update_task(&self, task: &Task) -> Result<()>;

    /// Unconditionally set the status. Returns false if the task is missing.
    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<bool>;

    /// Set the status only if it currently equals `expected`.
    /// Returns whether the transition happened.
    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool>;

    async fn update_next_run(&self, id: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()>;

    /// Returns false if the task did not exist.
    async fn delete_task(&self, id: &str) -> Result<bool>;

    async fn create_execution_record(&self, record: &TaskExecutionRecord) -> Result<()>;
    async fn find_executions_by_task(
        &self,
        task_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TaskExecutionRecord>>;
    async fn find_executions_by_account(
        &self,
        account_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TaskExecutionRecord>>;
    async fn find_recent_executions(&self, limit: usize) -> Result<Vec<TaskExecutionRecord>>;
    async fn find_failed_executions(&self, limit: usize) -> Result<Vec<TaskExecutionRecord>>;

    /// Delete records executed before `cutoff`. Returns how many were removed.
    async fn delete_executions_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
