//! Task scheduler — the lifecycle controller.
//!
//! Owns task CRUD, start/stop, restart recovery and the map of running
//! task runners. Lifecycle operations on one task are serialized; different
//! tasks never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use teleclaw_core::error::{Result, TeleclawError};
use teleclaw_core::traits::{
    AccessResolver, ActionTransport, Clock, ContentRenderer, RecordStore, StatusSink, SystemClock,
};
use teleclaw_core::types::{
    NewTask, StatusKind, Task, TaskStats, TaskStatus, TaskStatusEvent, TaskType, TaskUpdate,
};

use crate::dedup::CommentDedup;
use crate::history::ExecutionHistory;
use crate::locks::AccountLocks;
use crate::notify::{TracingSink, publish_quietly};
use crate::precheck::{PrecheckSummary, precheck};
use crate::render::TemplateRenderer;
use crate::runner::{RunHandle, RunnerDeps, TaskRunner};
use crate::validate::{validate_new, validate_task};

/// Result of [`TaskScheduler::start_task`].
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    /// The task is running after the call.
    pub started: bool,
    /// It was already running; nothing was done.
    pub already_running: bool,
    pub message: String,
    /// Absent when the task was already running.
    pub precheck: Option<PrecheckSummary>,
}

/// A task that `restore_running_tasks` had to force-stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreFailure {
    pub task_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub failed: Vec<RestoreFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StopAllReport {
    pub stopped: usize,
    /// (task id, error) for every task that could not be stopped cleanly.
    pub failures: Vec<(String, String)>,
}

/// How a runner is being attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attach {
    Start,
    Resume,
}

pub struct TaskScheduler {
    store: Arc<dyn RecordStore>,
    resolver: Arc<dyn AccessResolver>,
    deps: RunnerDeps,
    running: Mutex<HashMap<String, RunHandle>>,
    guards: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TaskScheduler {
    /// Scheduler with template rendering, log-only status events and the
    /// system clock.
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<dyn AccessResolver>,
        transport: Arc<dyn ActionTransport>,
    ) -> Self {
        let deps = RunnerDeps {
            store: Arc::clone(&store),
            transport,
            renderer: Arc::new(TemplateRenderer::new()),
            sink: Arc::new(TracingSink),
            clock: Arc::new(SystemClock),
            locks: Arc::new(AccountLocks::new()),
            dedup: Arc::new(CommentDedup::default()),
        };
        Self {
            store,
            resolver,
            deps,
            running: Mutex::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ContentRenderer>) -> Self {
        self.deps.renderer = renderer;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.deps.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.deps.clock = clock;
        self
    }

    /// Share account locks with another scheduler in the same process.
    pub fn with_locks(mut self, locks: Arc<AccountLocks>) -> Self {
        self.deps.locks = locks;
        self
    }

    pub fn with_dedup_capacity(mut self, capacity: usize) -> Self {
        self.deps.dedup = Arc::new(CommentDedup::new(capacity));
        self
    }

    pub fn locks(&self) -> &Arc<AccountLocks> {
        &self.deps.locks
    }

    /// Queries over persisted execution records.
    pub fn history(&self) -> ExecutionHistory {
        ExecutionHistory::new(Arc::clone(&self.store), Arc::clone(&self.deps.clock))
    }

    // ── CRUD ─────────────────────────────────────────────

    pub async fn create_task(&self, def: NewTask) -> Result<Task> {
        validate_new(&def)?;
        let task = Task::from_new(def);
        self.store.create_task(&task).await?;
        tracing::info!(
            "📅 Task created: '{}' ({}, {}, {} accounts × {} targets)",
            task.name,
            task.id,
            task.task_type,
            task.account_ids.len(),
            task.target_ids.len()
        );
        Ok(task)
    }

    /// Update a stopped task. Running tasks must be stopped first.
    pub async fn update_task(&self, id: &str, update: TaskUpdate) -> Result<Task> {
        let guard = self.guard(id);
        let _lock = guard.lock().await;

        let task = self.require(id).await?;
        if task.is_running() || self.is_attached(id) {
            return Err(TeleclawError::TaskRunning(id.to_string()));
        }
        let merged = update.apply(&task);
        validate_task(&merged)?;
        self.store.update_task(&merged).await?;
        tracing::info!("✏️ Task updated: '{}' ({})", merged.name, merged.id);
        Ok(merged)
    }

    /// Delete a task, stopping it first if it is running.
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        {
            let guard = self.guard(id);
            let _lock = guard.lock().await;

            let task = self.require(id).await?;
            self.stop_locked(&task).await?;
            if !self.store.delete_task(id).await? {
                return Err(TeleclawError::TaskNotFound(id.to_string()));
            }
        }
        self.guards
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        tracing::info!("🗑️ Task deleted: {id}");
        Ok(())
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        self.store.find_task_by_id(id).await
    }

    /// All tasks, highest priority first.
    pub async fn get_all_tasks(&self) -> Result<Vec<Task>> {
        self.store.find_all_tasks().await
    }

    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.store.find_tasks_by_status(status).await
    }

    pub async fn get_tasks_by_account_id(&self, account_id: &str) -> Result<Vec<Task>> {
        self.store.find_tasks_by_account(account_id).await
    }

    // ── Lifecycle ────────────────────────────────────────

    /// Precheck and start a task. Starting a running task is a no-op.
    pub async fn start_task(&self, id: &str) -> Result<StartOutcome> {
        self.start_with(id, true).await
    }

    /// Precheck and persist a task as running without attaching a runner in
    /// this process. A daemon picks it up through
    /// [`restore_running_tasks`](Self::restore_running_tasks).
    pub async fn enable_task(&self, id: &str) -> Result<StartOutcome> {
        self.start_with(id, false).await
    }

    async fn start_with(&self, id: &str, attach: bool) -> Result<StartOutcome> {
        let guard = self.guard(id);
        let _lock = guard.lock().await;

        let task = self.require(id).await?;
        if self.is_attached(id) || (!attach && task.is_running()) {
            return Ok(StartOutcome {
                started: true,
                already_running: true,
                message: format!("Task {id} is already running"),
                precheck: None,
            });
        }

        let summary = precheck(&task, self.resolver.as_ref()).await;
        if let Err(e) = summary.enforce(id) {
            tracing::warn!("⚠️ Task {id} failed precheck: {}", summary.describe());
            if task.is_running() {
                // Persisted as running without a runner: leave it stopped.
                self.mark_stopped(id).await?;
            }
            return Err(e);
        }

        if !self
            .store
            .compare_and_set_status(id, TaskStatus::Stopped, TaskStatus::Running)
            .await?
            && !task.is_running()
        {
            return Err(TeleclawError::Store(format!(
                "status of task {id} changed concurrently"
            )));
        }

        if !attach {
            tracing::info!("▶️ Task {id} marked running ({})", summary.describe());
            return Ok(StartOutcome {
                started: true,
                already_running: false,
                message: format!("Task marked running ({})", summary.describe()),
                precheck: Some(summary),
            });
        }

        match self.attach(task, &summary, Attach::Start).await {
            Ok(live) => Ok(StartOutcome {
                started: true,
                already_running: false,
                message: format!("Task started ({})", live.describe()),
                precheck: Some(live),
            }),
            Err(e) => {
                if let Err(store_err) = self.mark_stopped(id).await {
                    tracing::error!("❌ Failed to mark task {id} stopped: {store_err}");
                }
                Err(e)
            }
        }
    }

    /// Stop a task. Stopping a stopped task is a no-op.
    /// Returns whether anything was stopped.
    pub async fn stop_task(&self, id: &str) -> Result<bool> {
        let guard = self.guard(id);
        let _lock = guard.lock().await;

        let task = self.require(id).await?;
        self.stop_locked(&task).await
    }

    /// Same as [`stop_task`](Self::stop_task).
    pub async fn pause_task(&self, id: &str) -> Result<bool> {
        self.stop_task(id).await
    }

    /// Reattach every task persisted as running. Called once at process start.
    ///
    /// A task whose precheck now fails is forced to stopped; the others are
    /// resumed without a fresh "started" notification.
    pub async fn restore_running_tasks(&self) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();
        let persisted = self.store.find_tasks_by_status(TaskStatus::Running).await?;
        tracing::info!("🔁 Restoring {} running tasks", persisted.len());

        for task in persisted {
            let id = task.id.clone();
            match self.restore_one(task).await {
                Ok(()) => report.restored.push(id),
                Err(e) => {
                    tracing::warn!("⚠️ Task {id} not restored: {e}");
                    publish_quietly(
                        self.deps.sink.as_ref(),
                        TaskStatusEvent::new(&id, StatusKind::RestoreFailed, e.to_string()),
                    )
                    .await;
                    report.failed.push(RestoreFailure {
                        task_id: id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "🔁 Restore finished: {} resumed, {} stopped",
            report.restored.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn restore_one(&self, task: Task) -> Result<()> {
        let guard = self.guard(&task.id);
        let _lock = guard.lock().await;

        if self.is_attached(&task.id) {
            return Ok(());
        }
        let id = task.id.clone();
        let summary = precheck(&task, self.resolver.as_ref()).await;
        let attached = match summary.enforce(&id) {
            Ok(()) => self.attach(task, &summary, Attach::Resume).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if attached.is_err()
            && let Err(store_err) = self.mark_stopped(&id).await
        {
            tracing::error!("❌ Failed to force-stop task {id}: {store_err}");
        }
        attached
    }

    /// Stop every running task. One failure does not prevent the rest.
    pub async fn stop_all_tasks(&self) -> StopAllReport {
        let mut report = StopAllReport::default();
        for id in self.running_task_ids() {
            match self.stop_task(&id).await {
                Ok(true) => report.stopped += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("⚠️ Failed to stop task {id}: {e}");
                    report.failures.push((id, e.to_string()));
                }
            }
        }
        tracing::info!("⏹️ Stopped {} tasks", report.stopped);
        report
    }

    /// In-memory counters; `None` unless the task is running.
    pub fn get_task_stats(&self, id: &str) -> Option<TaskStats> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(RunHandle::stats)
    }

    /// Ids of tasks with an attached runner.
    pub fn running_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn is_attached(&self, id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(id)
    }

    // ── Internals ────────────────────────────────────────

    fn guard(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut guards = self.guards.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(guards.entry(id.to_string()).or_default())
    }

    async fn require(&self, id: &str) -> Result<Task> {
        self.store
            .find_task_by_id(id)
            .await?
            .ok_or_else(|| TeleclawError::TaskNotFound(id.to_string()))
    }

    /// Spawn the runner and register it. For channel monitoring, pairs whose
    /// listener could not be attached are re-checked against the task's
    /// policy; the returned summary reflects the pairs the runner listens on.
    async fn attach(
        &self,
        task: Task,
        summary: &PrecheckSummary,
        how: Attach,
    ) -> Result<PrecheckSummary> {
        let id = task.id.clone();
        let listens = task.task_type == TaskType::ChannelMonitoring;
        let runner = TaskRunner::new(
            task,
            summary.ready_pairs.clone(),
            summary.blocked_pairs.clone(),
            self.deps.clone(),
        );
        let handle = runner.start().await;

        let live = if listens {
            let ctx = handle.context();
            summary.with_pairs(ctx.ready_pairs(), ctx.blocked_pairs())
        } else {
            summary.clone()
        };
        if let Err(e) = live.enforce(&id) {
            tracing::warn!(
                "⚠️ Task {id} lost its pairs while subscribing: {}",
                live.describe()
            );
            handle.shutdown().await;
            return Err(e);
        }

        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), handle);

        let kind = match how {
            Attach::Start => StatusKind::Started,
            Attach::Resume => StatusKind::Resumed,
        };
        publish_quietly(
            self.deps.sink.as_ref(),
            TaskStatusEvent::new(&id, kind, live.describe()),
        )
        .await;
        Ok(live)
    }

    /// Caller holds the task's lifecycle guard.
    async fn stop_locked(&self, task: &Task) -> Result<bool> {
        let handle = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task.id);
        let was_attached = handle.is_some();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }

        if !was_attached && !task.is_running() {
            return Ok(false);
        }
        self.mark_stopped(&task.id).await?;
        publish_quietly(
            self.deps.sink.as_ref(),
            TaskStatusEvent::new(&task.id, StatusKind::Stopped, "stopped"),
        )
        .await;
        Ok(true)
    }

    async fn mark_stopped(&self, id: &str) -> Result<()> {
        self.store.update_task_status(id, TaskStatus::Stopped).await?;
        self.store.update_next_run(id, None).await
    }
}
