//! Task runner — the execution engine of one running task.
//!
//! A runner owns the task's trigger loop, its current ready/blocked pair
//! sets and its in-memory counters. Every trigger goes through the same
//! execution body:
//!
//! 1. skip if a previous execution of this task is still in flight
//! 2. skip outside the configured daily window
//! 3. pick a ready pair (random for timer ticks, the post's own pair for
//!    inbound posts after the probability and dedup checks)
//! 4. take the account lock or skip
//! 5. random delay, then one transport call with the task's retry budget
//! 6. persist the execution record and mark the post commented, then
//!    release the account
//! 7. update counters, demote the pair on `write_forbidden`, publish a
//!    status event

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::seq::SliceRandom;
use teleclaw_core::traits::{
    ActionTransport, Clock, CommentRequest, ContentRenderer, Delivery, InboundMessage,
    PostRequest, RecordStore, StatusSink, TransportError,
};
use teleclaw_core::types::{
    BlockCode, BlockedPair, MIN_INTERVAL_MINUTES, ReadyPair, StatusKind, Task,
    TaskExecutionRecord, TaskStats, TaskStatusEvent, TaskType,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dedup::CommentDedup;
use crate::locks::AccountLocks;
use crate::notify::publish_quietly;
use crate::trigger::{IntervalTrigger, SubscriptionFeed, Trigger, TriggerSource};

/// Collaborators shared by every runner of one scheduler.
#[derive(Clone)]
pub struct RunnerDeps {
    pub store: Arc<dyn RecordStore>,
    pub transport: Arc<dyn ActionTransport>,
    pub renderer: Arc<dyn ContentRenderer>,
    pub sink: Arc<dyn StatusSink>,
    pub clock: Arc<dyn Clock>,
    pub locks: Arc<AccountLocks>,
    pub dedup: Arc<CommentDedup>,
}

#[derive(Default)]
struct PairSets {
    ready: Vec<ReadyPair>,
    blocked: Vec<BlockedPair>,
}

/// In-memory state of a running task.
pub struct TaskContext {
    task: Task,
    pairs: Mutex<PairSets>,
    subscribed: Mutex<Vec<ReadyPair>>,
    executing: AtomicBool,
    stats: Mutex<TaskStats>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(task: Task, ready: Vec<ReadyPair>, blocked: Vec<BlockedPair>) -> Self {
        Self {
            task,
            pairs: Mutex::new(PairSets { ready, blocked }),
            subscribed: Mutex::new(Vec::new()),
            executing: AtomicBool::new(false),
            stats: Mutex::new(TaskStats::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn ready_pairs(&self) -> Vec<ReadyPair> {
        self.lock_pairs().ready.clone()
    }

    pub fn blocked_pairs(&self) -> Vec<BlockedPair> {
        self.lock_pairs().blocked.clone()
    }

    pub fn stats(&self) -> TaskStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// False once the task has been stopped.
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    fn lock_pairs(&self) -> std::sync::MutexGuard<'_, PairSets> {
        self.pairs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pick_ready(&self) -> Option<ReadyPair> {
        self.lock_pairs().ready.choose(&mut rand::thread_rng()).cloned()
    }

    fn find_ready(&self, account_id: &str, target_id: &str) -> Option<ReadyPair> {
        self.lock_pairs()
            .ready
            .iter()
            .find(|p| p.account_id == account_id && p.target_id == target_id)
            .cloned()
    }

    /// Move `pair` from ready to blocked. Returns false if it was not ready.
    fn demote(&self, pair: &ReadyPair, code: BlockCode, message: &str) -> bool {
        let mut pairs = self.lock_pairs();
        let before = pairs.ready.len();
        pairs.ready.retain(|p| p != pair);
        if pairs.ready.len() == before {
            return false;
        }
        pairs.blocked.push(BlockedPair::from_ready(pair, code, message));
        true
    }

    fn note_attempt(&self, success: bool, at: DateTime<Utc>) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        if success {
            stats.execution_count += 1;
        } else {
            stats.failure_count += 1;
        }
        stats.last_execution_time = Some(at);
    }
}

/// Marks the task as executing until dropped.
struct InFlight(Arc<TaskContext>);

impl InFlight {
    fn begin(ctx: &Arc<TaskContext>) -> Option<Self> {
        ctx.executing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(Arc::clone(ctx)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.executing.store(false, Ordering::SeqCst);
    }
}

/// Why an execution did not deliver.
struct Failure {
    message: String,
    retry_count: u32,
    write_forbidden: bool,
}

impl Failure {
    fn local(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry_count: 0,
            write_forbidden: false,
        }
    }
}

impl From<TransportError> for Failure {
    fn from(e: TransportError) -> Self {
        Self {
            write_forbidden: e.is_write_forbidden(),
            retry_count: e.retry_count,
            message: e.to_string(),
        }
    }
}

pub struct TaskRunner {
    ctx: Arc<TaskContext>,
    deps: RunnerDeps,
}

impl TaskRunner {
    pub fn new(
        task: Task,
        ready: Vec<ReadyPair>,
        blocked: Vec<BlockedPair>,
        deps: RunnerDeps,
    ) -> Self {
        Self {
            ctx: Arc::new(TaskContext::new(task, ready, blocked)),
            deps,
        }
    }

    /// Set up the trigger source and spawn the trigger loop.
    pub async fn start(self) -> RunHandle {
        let runner = Arc::new(self);
        let source: Box<dyn TriggerSource> = match runner.ctx.task.task_type {
            TaskType::GroupPosting => {
                let minutes = runner.ctx.task.config.interval.unwrap_or(MIN_INTERVAL_MINUTES);
                Box::new(IntervalTrigger::every_minutes(minutes))
            }
            TaskType::ChannelMonitoring => Box::new(runner.subscribe().await),
        };

        let ctx = Arc::clone(&runner.ctx);
        let transport = Arc::clone(&runner.deps.transport);
        let join = tokio::spawn(runner.run(source));
        RunHandle {
            ctx,
            transport,
            join,
        }
    }

    /// Attach a channel listener to every ready pair.
    async fn subscribe(&self) -> SubscriptionFeed {
        let (tx, feed) = SubscriptionFeed::channel();
        for pair in self.ctx.ready_pairs() {
            match self.deps.transport.listen_to_channel(&pair, tx.clone()).await {
                Ok(()) => {
                    tracing::debug!(
                        "👂 [{}] listening on {}/{}",
                        self.ctx.task.id,
                        pair.account_id,
                        pair.target_id
                    );
                    self.ctx
                        .subscribed
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(pair);
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ [{}] cannot listen on {}/{}: {e}",
                        self.ctx.task.id,
                        pair.account_id,
                        pair.target_id
                    );
                    self.ctx.demote(&pair, BlockCode::Unknown, &e.to_string());
                }
            }
        }
        feed
    }

    async fn run(self: Arc<Self>, mut source: Box<dyn TriggerSource>) {
        let period = source.period();
        loop {
            let trigger = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break,
                next = source.next() => match next {
                    Some(trigger) => trigger,
                    None => break,
                },
            };

            if let Some(period) = period {
                self.record_next_run(period).await;
            }

            let Some(in_flight) = InFlight::begin(&self.ctx) else {
                tracing::debug!(
                    "⏭️ [{}] previous execution still running, trigger dropped",
                    self.ctx.task.id
                );
                continue;
            };
            let runner = Arc::clone(&self);
            tokio::spawn(async move {
                let _in_flight = in_flight;
                runner.execute(trigger).await;
            });
        }
        tracing::debug!("Trigger loop of {} ended", self.ctx.task.id);
    }

    async fn record_next_run(&self, period: Duration) {
        if !self.ctx.is_active() {
            return;
        }
        let next = self.deps.clock.now() + chrono::Duration::seconds(period.as_secs() as i64);
        if let Err(e) = self.deps.store.update_next_run(&self.ctx.task.id, Some(next)).await {
            tracing::warn!("⚠️ [{}] failed to persist next run: {e}", self.ctx.task.id);
        }
    }

    /// Decide whether an inbound post should be commented on, and by which pair.
    fn admit(&self, message: &InboundMessage) -> Option<ReadyPair> {
        let task = &self.ctx.task;
        let Some(pair) = self.ctx.find_ready(&message.account_id, &message.target_id) else {
            tracing::debug!(
                "[{}] post {} on {}/{} has no ready pair",
                task.id,
                message.message_id,
                message.account_id,
                message.target_id
            );
            return None;
        };
        if message.comments_disabled {
            tracing::debug!("[{}] comments disabled on {}", task.id, message.message_id);
            return None;
        }
        let probability = task.config.comment_probability.unwrap_or(0.0);
        let sample: f64 = rand::random();
        if sample > probability {
            tracing::debug!(
                "🎲 [{}] skipping {} (sample {sample:.3} > {probability})",
                task.id,
                message.message_id
            );
            return None;
        }
        if self
            .deps
            .dedup
            .seen(&pair.account_id, &pair.target_id, &message.message_id)
        {
            tracing::debug!("[{}] already commented on {}", task.id, message.message_id);
            return None;
        }
        Some(pair)
    }

    async fn execute(&self, trigger: Trigger) {
        let task = &self.ctx.task;

        if let Some(range) = &task.config.time_range {
            let now = self.deps.clock.local_hhmm();
            if !range.contains(&now) {
                tracing::debug!(
                    "🌙 [{}] {now} outside {}-{}, skipping",
                    task.id,
                    range.start,
                    range.end
                );
                return;
            }
        }

        let (pair, inbound) = match trigger {
            Trigger::Tick => match self.ctx.pick_ready() {
                Some(pair) => (pair, None),
                None => {
                    tracing::debug!("💤 [{}] no ready pairs left, idle", task.id);
                    return;
                }
            },
            Trigger::Inbound(message) => match self.admit(&message) {
                Some(pair) => (pair, Some(message)),
                None => return,
            },
        };

        let Some(lease) = self.deps.locks.try_lease(&pair.account_id) else {
            tracing::debug!(
                "🔒 [{}] account {} busy, skipping",
                task.id,
                pair.account_id
            );
            return;
        };

        let delay = random_delay(task.config.random_delay);
        if !delay.is_zero() {
            tracing::debug!("⏳ [{}] waiting {:?} before acting", task.id, delay);
            tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => {
                    tracing::debug!("[{}] stopped during delay, action abandoned", task.id);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let mut record = TaskExecutionRecord::new(
            &task.id,
            &pair.account_id,
            &pair.target_id,
            self.deps.clock.now(),
        );
        record.target_message_id = inbound.as_ref().map(|m| m.message_id.clone());

        let outcome = self.perform(&pair, inbound.as_ref(), &mut record).await;

        match &outcome {
            Ok(delivery) => {
                record.success = true;
                record.retry_count = delivery.retry_count;
            }
            Err(failure) => {
                record.error_message = Some(failure.message.clone());
                record.retry_count = failure.retry_count;
            }
        }

        if let Err(e) = self.deps.store.create_execution_record(&record).await {
            tracing::error!("❌ [{}] failed to persist execution record: {e}", task.id);
        }
        if record.success
            && let Some(message) = &inbound
        {
            self.deps
                .dedup
                .mark_seen(&pair.account_id, &pair.target_id, &message.message_id);
        }
        drop(lease);
        self.ctx.note_attempt(record.success, record.executed_at);

        match outcome {
            Ok(_) => {
                let event = TaskStatusEvent::new(
                    &task.id,
                    StatusKind::ExecutionSucceeded,
                    format!("{} → {}", pair.account_id, pair.target_id),
                );
                publish_quietly(self.deps.sink.as_ref(), event).await;
            }
            Err(failure) => {
                tracing::warn!(
                    "⚠️ [{}] {} → {} failed: {}",
                    task.id,
                    pair.account_id,
                    pair.target_id,
                    failure.message
                );
                if failure.write_forbidden {
                    self.demote(&pair, &failure.message).await;
                }
                let event = TaskStatusEvent::new(
                    &task.id,
                    StatusKind::ExecutionFailed,
                    format!("{} → {}: {}", pair.account_id, pair.target_id, failure.message),
                );
                publish_quietly(self.deps.sink.as_ref(), event).await;
            }
        }
    }

    /// Render content and make the single transport call.
    async fn perform(
        &self,
        pair: &ReadyPair,
        inbound: Option<&InboundMessage>,
        record: &mut TaskExecutionRecord,
    ) -> Result<Delivery, Failure> {
        let task = &self.ctx.task;
        let content = match self
            .deps
            .renderer
            .render(task, pair, inbound, record.executed_at)
        {
            Ok(content) if !content.trim().is_empty() => content,
            Ok(_) => return Err(Failure::local("no content to send")),
            Err(e) => return Err(Failure::local(format!("render failed: {e}"))),
        };
        record.content = content.clone();

        let budget = task.config.retry_budget();
        let sent = match inbound {
            None => {
                let request = PostRequest {
                    account_id: pair.account_id.clone(),
                    target_id: pair.target_id.clone(),
                    transport_target_id: pair.transport_target_id.clone(),
                    content,
                };
                self.deps.transport.send_with_retry(&request, budget).await
            }
            Some(message) => {
                let request = CommentRequest {
                    account_id: pair.account_id.clone(),
                    target_id: pair.target_id.clone(),
                    transport_target_id: pair.transport_target_id.clone(),
                    reply_to_message_id: message.message_id.clone(),
                    content,
                };
                self.deps.transport.send_comment_with_retry(&request, budget).await
            }
        };
        sent.map_err(Failure::from)
    }

    async fn demote(&self, pair: &ReadyPair, message: &str) {
        if !self.ctx.is_active() {
            tracing::debug!(
                "[{}] stopped, not demoting {}/{}",
                self.ctx.task.id,
                pair.account_id,
                pair.target_id
            );
            return;
        }
        if self.ctx.demote(pair, BlockCode::WriteForbidden, message) {
            tracing::warn!(
                "🚫 [{}] {}/{} can no longer write, removed from ready pairs",
                self.ctx.task.id,
                pair.account_id,
                pair.target_id
            );
            let event = TaskStatusEvent::new(
                &self.ctx.task.id,
                StatusKind::PairBlocked,
                format!(
                    "{}/{}: {}",
                    pair.account_id,
                    pair.target_id,
                    BlockCode::WriteForbidden
                ),
            );
            publish_quietly(self.deps.sink.as_ref(), event).await;
        }
    }
}

/// Uniform delay in `[0, max_minutes]`, saturating at `Duration::MAX`.
fn random_delay(max_minutes: Option<f64>) -> Duration {
    match max_minutes {
        Some(max) if max.is_finite() && max > 0.0 => {
            let upper = max * 60.0;
            let secs = if upper.is_finite() {
                rand::thread_rng().gen_range(0.0..=upper)
            } else {
                f64::MAX
            };
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        }
        _ => Duration::ZERO,
    }
}

/// Handle to a spawned runner, owned by the scheduler.
pub struct RunHandle {
    ctx: Arc<TaskContext>,
    transport: Arc<dyn ActionTransport>,
    join: JoinHandle<()>,
}

impl RunHandle {
    pub fn context(&self) -> &Arc<TaskContext> {
        &self.ctx
    }

    pub fn stats(&self) -> TaskStats {
        self.ctx.stats()
    }

    /// Cancel the trigger loop and pending delays, then tear down channel
    /// listeners. A transport call already in flight runs to completion.
    pub async fn shutdown(self) {
        self.ctx.cancel.cancel();

        let subscribed =
            std::mem::take(&mut *self.ctx.subscribed.lock().unwrap_or_else(|e| e.into_inner()));
        for pair in subscribed {
            if let Err(e) = self
                .transport
                .stop_listening(&pair.account_id, &pair.target_id)
                .await
            {
                tracing::warn!(
                    "⚠️ [{}] failed to stop listening on {}/{}: {e}",
                    self.ctx.task.id,
                    pair.account_id,
                    pair.target_id
                );
            }
        }

        if let Err(e) = self.join.await {
            tracing::warn!("⚠️ [{}] trigger loop ended abnormally: {e}", self.ctx.task.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::HistorySink;
    use crate::render::TemplateRenderer;
    use crate::store::MemoryStore;
    use crate::testing::{
        HookedStore, RecordingTransport, inbound, monitoring_def, posting_task, ready,
    };
    use chrono::TimeZone;
    use teleclaw_core::traits::{FixedClock, SystemClock, TransportErrorCode};
    use teleclaw_core::types::TimeRange;

    struct Harness {
        store: Arc<MemoryStore>,
        transport: Arc<RecordingTransport>,
        sink: Arc<HistorySink>,
        locks: Arc<AccountLocks>,
        deps: RunnerDeps,
    }

    fn harness_with(transport: RecordingTransport, clock: Arc<dyn Clock>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(transport);
        let sink = Arc::new(HistorySink::default());
        let locks = Arc::new(AccountLocks::new());
        let deps = RunnerDeps {
            store: store.clone(),
            transport: transport.clone(),
            renderer: Arc::new(TemplateRenderer::new()),
            sink: sink.clone(),
            clock,
            locks: locks.clone(),
            dedup: Arc::new(CommentDedup::default()),
        };
        Harness {
            store,
            transport,
            sink,
            locks,
            deps,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingTransport::new(), Arc::new(SystemClock))
    }

    async fn start(h: &Harness, task: Task, ready: Vec<ReadyPair>) -> RunHandle {
        h.store.create_task(&task).await.unwrap();
        TaskRunner::new(task, ready, Vec::new(), h.deps.clone()).start().await
    }

    async fn advance(d: Duration) {
        tokio::time::sleep(d).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_fires_immediately() {
        let h = harness();
        let task = posting_task(&["a1"], &["g1"]);
        let handle = start(&h, task.clone(), vec![ready("a1", "g1")]).await;
        advance(Duration::from_secs(1)).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "hello g1");
        assert_eq!(sent[0].reply_to, None);

        let stats = handle.stats();
        assert_eq!(stats.execution_count, 1);
        assert_eq!(stats.failure_count, 0);
        assert!(stats.last_execution_time.is_some());

        let records = h.store.find_executions_by_task(&task.id, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        let stored = h.store.find_task_by_id(&task.id).await.unwrap().unwrap();
        assert!(stored.next_run_at.is_some());
        assert!(!handle.context().is_executing());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_interval() {
        let h = harness();
        let handle = start(&h, posting_task(&["a1"], &["g1"]), vec![ready("a1", "g1")]).await;
        advance(Duration::from_secs(25 * 60)).await;
        // t=0, t=10m, t=20m
        assert_eq!(h.transport.sent_count(), 3);
        handle.shutdown().await;
        advance(Duration::from_secs(60 * 60)).await;
        assert_eq!(h.transport.sent_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outside_time_range_skips() {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap()));
        let h = harness_with(RecordingTransport::new(), clock.clone());
        let mut task = posting_task(&["a1"], &["g1"]);
        task.config.time_range = Some(TimeRange::new("08:00", "20:00"));
        let handle = start(&h, task, vec![ready("a1", "g1")]).await;
        advance(Duration::from_secs(1)).await;
        assert_eq!(h.transport.sent_count(), 0);

        clock.set(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap());
        advance(Duration::from_secs(10 * 60)).await;
        assert_eq!(h.transport.sent_count(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_account_skips_without_error() {
        let h = harness();
        assert!(h.locks.try_acquire("a1"));
        let handle = start(&h, posting_task(&["a1"], &["g1"]), vec![ready("a1", "g1")]).await;
        advance(Duration::from_secs(1)).await;

        assert_eq!(h.transport.sent_count(), 0);
        assert_eq!(handle.stats(), TaskStats::default());
        assert!(h.locks.is_held("a1"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_account_held_until_comment_is_recorded() {
        let h = harness();
        let store = Arc::new(HookedStore::new());
        let held = Arc::new(Mutex::new(Vec::new()));
        let (locks, seen) = (h.locks.clone(), held.clone());
        store.on_record(move |record| {
            seen.lock().unwrap().push(locks.is_held(&record.account_id));
        });
        let deps = RunnerDeps {
            store: store.clone(),
            ..h.deps.clone()
        };

        let task = Task::from_new(monitoring_def(&["a1"], &["c1"]));
        store.create_task(&task).await.unwrap();
        let handle = TaskRunner::new(task, vec![ready("a1", "c1")], Vec::new(), deps)
            .start()
            .await;
        assert!(h.transport.emit(inbound("a1", "c1", "m1")));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(*held.lock().unwrap(), vec![true]);
        assert!(!h.locks.is_held("a1"));
        assert!(h.deps.dedup.seen("a1", "c1", "m1"));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_forbidden_demotes_pair() {
        let h = harness();
        h.transport.fail_target("g1", TransportErrorCode::WriteForbidden);
        let task = posting_task(&["a1"], &["g1"]);
        let handle = start(&h, task.clone(), vec![ready("a1", "g1")]).await;
        advance(Duration::from_secs(35 * 60)).await;

        // The failed pair is never selected again.
        assert_eq!(h.transport.sent_count(), 1);
        assert!(handle.context().ready_pairs().is_empty());
        let blocked = handle.context().blocked_pairs();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].code, BlockCode::WriteForbidden);
        assert_eq!(handle.stats().failure_count, 1);

        let records = h.store.find_executions_by_task(&task.id, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert!(records[0].error_message.is_some());
        assert!(
            h.sink
                .for_task(&task.id)
                .iter()
                .any(|e| e.kind == StatusKind::PairBlocked)
        );
        assert!(!h.locks.is_held("a1"));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_demoted_pair_not_reselected_among_others() {
        let h = harness();
        h.transport.fail_target("g1", TransportErrorCode::WriteForbidden);
        let handle = start(
            &h,
            posting_task(&["a1"], &["g1", "g2"]),
            vec![ready("a1", "g1"), ready("a1", "g2")],
        )
        .await;
        advance(Duration::from_secs(95 * 60)).await;

        let to_g1 = h.transport.sent().iter().filter(|s| s.target_id == "g1").count();
        assert!(to_g1 <= 1);
        assert_eq!(h.transport.sent_count(), 10);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failures_keep_pair_ready() {
        let h = harness();
        h.transport.fail_target("g1", TransportErrorCode::FloodWait);
        let handle = start(&h, posting_task(&["a1"], &["g1"]), vec![ready("a1", "g1")]).await;
        advance(Duration::from_secs(15 * 60)).await;

        assert_eq!(h.transport.sent_count(), 2);
        assert_eq!(handle.context().ready_pairs().len(), 1);
        assert_eq!(handle.stats().failure_count, 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_render_is_recorded_as_failure() {
        let h = harness();
        let mut task = posting_task(&["a1"], &["g1"]);
        task.config.templates.clear();
        let handle = start(&h, task.clone(), vec![ready("a1", "g1")]).await;
        advance(Duration::from_secs(1)).await;

        assert_eq!(h.transport.sent_count(), 0);
        let records = h.store.find_executions_by_task(&task.id, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_message.as_deref(), Some("no content to send"));
        assert_eq!(handle.stats().failure_count, 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_random_delay() {
        let h = harness();
        let mut task = posting_task(&["a1"], &["g1"]);
        task.config.random_delay = Some(5.0);
        let handle = start(&h, task, vec![ready("a1", "g1")]).await;
        advance(Duration::from_millis(1)).await;
        assert!(h.locks.is_held("a1"));

        handle.shutdown().await;
        advance(Duration::from_secs(10 * 60)).await;
        assert_eq!(h.transport.sent_count(), 0);
        assert!(!h.locks.is_held("a1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_call_completes_after_stop() {
        let h = harness_with(
            RecordingTransport::new().with_latency(Duration::from_secs(30)),
            Arc::new(SystemClock),
        );
        h.transport.fail_target("g1", TransportErrorCode::WriteForbidden);
        let task = posting_task(&["a1"], &["g1"]);
        let handle = start(&h, task.clone(), vec![ready("a1", "g1")]).await;
        advance(Duration::from_secs(1)).await;

        let ctx = Arc::clone(handle.context());
        handle.shutdown().await;
        advance(Duration::from_secs(60)).await;

        // Recorded, but the stale context is left alone.
        let records = h.store.find_executions_by_task(&task.id, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(ctx.ready_pairs().len(), 1);
        assert!(!ctx.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_execution_drops_overlapping_ticks() {
        let h = harness_with(
            RecordingTransport::new().with_latency(Duration::from_secs(15 * 60)),
            Arc::new(SystemClock),
        );
        let handle = start(&h, posting_task(&["a1"], &["g1"]), vec![ready("a1", "g1")]).await;
        advance(Duration::from_secs(12 * 60)).await;
        assert!(handle.context().is_executing());
        advance(Duration::from_secs(10 * 60)).await;
        // The tick at 10m was dropped while the first call was still running.
        assert_eq!(h.transport.sent_count(), 1);
        assert!(h.transport.max_overlap() <= 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_monitoring_comments_once_per_post() {
        let h = harness();
        let task = Task::from_new(monitoring_def(&["a1"], &["c1"]));
        let handle = start(&h, task.clone(), vec![ready("a1", "c1")]).await;
        assert_eq!(h.transport.listening_count(), 1);

        assert!(h.transport.emit(inbound("a1", "c1", "m1")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.transport.emit(inbound("a1", "c1", "m1")));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].reply_to.as_deref(), Some("m1"));
        let records = h.store.find_executions_by_task(&task.id, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target_message_id.as_deref(), Some("m1"));

        handle.shutdown().await;
        assert_eq!(h.transport.listening_count(), 0);
    }

    #[tokio::test]
    async fn test_monitoring_skips_disabled_and_improbable_posts() {
        let h = harness();
        let mut def = monitoring_def(&["a1"], &["c1", "c2"]);
        def.config.comment_probability = Some(1.0);
        let task = Task::from_new(def);
        let handle = start(&h, task, vec![ready("a1", "c1")]).await;

        let mut disabled = inbound("a1", "c1", "m1");
        disabled.comments_disabled = true;
        assert!(h.transport.emit(disabled));
        // c2 was never ready, so nobody listens there.
        assert!(!h.transport.emit(inbound("a1", "c2", "m2")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.transport.sent_count(), 0);
        handle.shutdown().await;

        let h = harness();
        let mut def = monitoring_def(&["a1"], &["c1"]);
        def.config.comment_probability = Some(0.0);
        let handle = start(&h, Task::from_new(def), vec![ready("a1", "c1")]).await;
        for i in 0..5 {
            h.transport.emit(inbound("a1", "c1", &format!("m{i}")));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(h.transport.sent_count(), 0);
        handle.shutdown().await;
    }

    #[test]
    fn test_random_delay_bounds() {
        assert_eq!(random_delay(None), Duration::ZERO);
        assert_eq!(random_delay(Some(0.0)), Duration::ZERO);
        for _ in 0..100 {
            assert!(random_delay(Some(2.0)) <= Duration::from_secs(120));
        }
    }

    #[test]
    fn test_random_delay_saturates_on_huge_bound() {
        for _ in 0..100 {
            assert!(random_delay(Some(1e30)) > Duration::ZERO);
        }
        assert_eq!(random_delay(Some(f64::MAX)), Duration::MAX);
    }
}
