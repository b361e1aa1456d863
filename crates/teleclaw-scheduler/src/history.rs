//! Execution history — queries and maintenance over persisted
//! execution records.

use std::sync::Arc;

use teleclaw_core::error::{Result, TeleclawError};
use teleclaw_core::traits::{Clock, RecordStore};
use teleclaw_core::types::{ExecutionStats, TaskExecutionRecord};

#[derive(Clone)]
pub struct ExecutionHistory {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl ExecutionHistory {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records of one task, newest first.
    pub async fn get_task_history(
        &self,
        task_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TaskExecutionRecord>> {
        self.store.find_executions_by_task(task_id, limit).await
    }

    pub async fn get_task_execution_stats(&self, task_id: &str) -> Result<ExecutionStats> {
        let records = self.store.find_executions_by_task(task_id, None).await?;
        Ok(ExecutionStats::from_records(&records))
    }

    pub async fn get_account_execution_stats(&self, account_id: &str) -> Result<ExecutionStats> {
        let records = self.store.find_executions_by_account(account_id, None).await?;
        Ok(ExecutionStats::from_records(&records))
    }

    /// Delete records older than `days` days. Returns how many were removed.
    pub async fn cleanup_old_executions(&self, days: u32) -> Result<usize> {
        if days == 0 {
            return Err(TeleclawError::Validation(
                "cleanup window must be at least 1 day".into(),
            ));
        }
        let cutoff = chrono::TimeDelta::try_days(i64::from(days))
            .and_then(|window| self.clock.now().checked_sub_signed(window));
        let Some(cutoff) = cutoff else {
            // Nothing can be older than the representable past.
            return Ok(0);
        };
        let removed = self.store.delete_executions_before(cutoff).await?;
        tracing::info!("🧹 Removed {removed} execution records older than {days} days");
        Ok(removed)
    }

    pub async fn get_recent_executions(&self, limit: usize) -> Result<Vec<TaskExecutionRecord>> {
        self.store.find_recent_executions(limit).await
    }

    pub async fn get_failed_executions(&self, limit: usize) -> Result<Vec<TaskExecutionRecord>> {
        self.store.find_failed_executions(limit).await
    }
}
