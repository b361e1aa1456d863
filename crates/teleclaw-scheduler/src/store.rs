//! In-memory record store — process-local, for tests and embedding.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teleclaw_core::error::{Result, TeleclawError};
use teleclaw_core::traits::RecordStore;
use teleclaw_core::types::{Task, TaskExecutionRecord, TaskStatus};

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    executions: Vec<TaskExecutionRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Priority first (highest wins), then oldest first.
pub(crate) fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

fn newest_first(mut records: Vec<TaskExecutionRecord>, limit: Option<usize>) -> Vec<TaskExecutionRecord> {
    records.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    records
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.lock();
        if inner.tasks.contains_key(&task.id) {
            return Err(TeleclawError::Store(format!("duplicate task id {}", task.id)));
        }
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn find_task_by_id(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.lock().tasks.get(id).cloned())
    }

    async fn find_all_tasks(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.lock().tasks.values().cloned().collect();
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    async fn find_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .lock()
            .tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    async fn find_tasks_by_account(&self, account_id: &str) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .lock()
            .tasks
            .values()
            .filter(|t| t.uses_account(account_id))
            .cloned()
            .collect();
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.lock();
        let stored = inner
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| TeleclawError::TaskNotFound(task.id.clone()))?;
        let status = stored.status;
        *stored = task.clone();
        stored.status = status;
        Ok(())
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<bool> {
        let mut inner = self.lock();
        match inner.tasks.get_mut(id) {
            Some(task) => {
                task.status = status;
                task.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool> {
        let mut inner = self.lock();
        match inner.tasks.get_mut(id) {
            Some(task) if task.status == expected => {
                task.status = new;
                task.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_next_run(&self, id: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        if let Some(task) = self.lock().tasks.get_mut(id) {
            task.next_run_at = next_run_at;
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        Ok(self.lock().tasks.remove(id).is_some())
    }

    async fn create_execution_record(&self, record: &TaskExecutionRecord) -> Result<()> {
        self.lock().executions.push(record.clone());
        Ok(())
    }

    async fn find_executions_by_task(
        &self,
        task_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TaskExecutionRecord>> {
        let records = self
            .lock()
            .executions
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        Ok(newest_first(records, limit))
    }

    async fn find_executions_by_account(
        &self,
        account_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TaskExecutionRecord>> {
        let records = self
            .lock()
            .executions
            .iter()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        Ok(newest_first(records, limit))
    }

    async fn find_recent_executions(&self, limit: usize) -> Result<Vec<TaskExecutionRecord>> {
        let records = self.lock().executions.clone();
        Ok(newest_first(records, Some(limit)))
    }

    async fn find_failed_executions(&self, limit: usize) -> Result<Vec<TaskExecutionRecord>> {
        let records = self
            .lock()
            .executions
            .iter()
            .filter(|r| !r.success)
            .cloned()
            .collect();
        Ok(newest_first(records, Some(limit)))
    }

    async fn delete_executions_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.lock();
        let before = inner.executions.len();
        inner.executions.retain(|r| r.executed_at >= cutoff);
        Ok(before - inner.executions.len())
    }
}
