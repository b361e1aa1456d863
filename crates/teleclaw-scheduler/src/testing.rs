//! Fake collaborators shared by the scheduler tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use teleclaw_core::error::{Result, TeleclawError};
use teleclaw_core::traits::{
    AccessRequest, AccessResolver, ActionTransport, CommentRequest, Delivery, InboundMessage,
    MessageSender, PostRequest, RecordStore, TransportError, TransportErrorCode,
};
use teleclaw_core::types::{
    BlockCode, BlockedPair, NewTask, PairResolution, ReadyPair, Task, TaskConfig,
    TaskExecutionRecord, TaskStatus, TaskType,
};

use crate::store::MemoryStore;

pub fn transport_id(target_id: &str) -> String {
    format!("tg:{target_id}")
}

pub fn posting_def(accounts: &[&str], targets: &[&str]) -> NewTask {
    NewTask {
        name: "posting".into(),
        task_type: TaskType::GroupPosting,
        account_ids: accounts.iter().map(|s| s.to_string()).collect(),
        target_ids: targets.iter().map(|s| s.to_string()).collect(),
        config: TaskConfig {
            interval: Some(10),
            templates: vec!["hello {target}".into()],
            ..Default::default()
        },
        priority: None,
    }
}

pub fn monitoring_def(accounts: &[&str], targets: &[&str]) -> NewTask {
    NewTask {
        name: "monitoring".into(),
        task_type: TaskType::ChannelMonitoring,
        account_ids: accounts.iter().map(|s| s.to_string()).collect(),
        target_ids: targets.iter().map(|s| s.to_string()).collect(),
        config: TaskConfig {
            comment_probability: Some(1.0),
            templates: vec!["nice post".into()],
            ..Default::default()
        },
        priority: None,
    }
}

pub fn posting_task(accounts: &[&str], targets: &[&str]) -> Task {
    Task::from_new(posting_def(accounts, targets))
}

pub fn ready(account_id: &str, target_id: &str) -> ReadyPair {
    ReadyPair {
        account_id: account_id.into(),
        target_id: target_id.into(),
        transport_target_id: transport_id(target_id),
    }
}

pub fn inbound(account_id: &str, target_id: &str, message_id: &str) -> InboundMessage {
    InboundMessage {
        account_id: account_id.into(),
        target_id: target_id.into(),
        message_id: message_id.into(),
        text: "new post".into(),
        comments_disabled: false,
        received_at: Utc::now(),
    }
}

#[derive(Clone, Copy)]
enum Script {
    Ready,
    Blocked(BlockCode),
    Fail,
}

/// Access resolver answering from a per-pair script.
pub struct ScriptedResolver {
    default: Mutex<Script>,
    overrides: Mutex<HashMap<(String, String), Script>>,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn all_ready() -> Self {
        Self {
            default: Mutex::new(Script::Ready),
            overrides: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn all_blocked(code: BlockCode) -> Self {
        let resolver = Self::all_ready();
        resolver.set_default_blocked(code);
        resolver
    }

    pub fn block(self, account_id: &str, target_id: &str, code: BlockCode) -> Self {
        self.set(account_id, target_id, Script::Blocked(code));
        self
    }

    pub fn fail(self, account_id: &str, target_id: &str) -> Self {
        self.set(account_id, target_id, Script::Fail);
        self
    }

    pub fn set_default_blocked(&self, code: BlockCode) {
        *self.default.lock().unwrap() = Script::Blocked(code);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set(&self, account_id: &str, target_id: &str, script: Script) {
        self.overrides
            .lock()
            .unwrap()
            .insert((account_id.to_string(), target_id.to_string()), script);
    }
}

#[async_trait]
impl AccessResolver for ScriptedResolver {
    async fn check_and_prepare(&self, request: &AccessRequest) -> Result<PairResolution> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (request.account_id.clone(), request.target_id.clone());
        let script = self
            .overrides
            .lock()
            .unwrap()
            .get(&key)
            .copied()
            .unwrap_or(*self.default.lock().unwrap());
        match script {
            Script::Ready => Ok(PairResolution::Ready(ready(&request.account_id, &request.target_id))),
            Script::Blocked(code) => Ok(PairResolution::Blocked(BlockedPair {
                account_id: request.account_id.clone(),
                target_id: request.target_id.clone(),
                transport_target_id: transport_id(&request.target_id),
                code,
                message: format!("scripted {code}"),
                auto_join_attempted: request.auto_join_enabled,
            })),
            Script::Fail => Err(TeleclawError::Access("resolver offline".into())),
        }
    }
}

/// One call seen by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentAction {
    pub account_id: String,
    pub target_id: String,
    pub content: String,
    pub reply_to: Option<String>,
}

/// Transport that records calls and detects per-account overlap.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentAction>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_overlap: AtomicUsize,
    failures: Mutex<HashMap<String, TransportErrorCode>>,
    listeners: Mutex<HashMap<(String, String), MessageSender>>,
    deaf: Mutex<HashSet<String>>,
    latency: Mutex<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call takes this long.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().unwrap() = latency;
        self
    }

    /// Calls to `target_id` fail with `code`.
    pub fn fail_target(&self, target_id: &str, code: TransportErrorCode) {
        self.failures
            .lock()
            .unwrap()
            .insert(target_id.to_string(), code);
    }

    /// Listening on `target_id` fails.
    pub fn fail_listen(&self, target_id: &str) {
        self.deaf.lock().unwrap().insert(target_id.to_string());
    }

    pub fn sent(&self) -> Vec<SentAction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Highest number of simultaneous calls observed for any one account.
    pub fn max_overlap(&self) -> usize {
        self.max_overlap.load(Ordering::SeqCst)
    }

    pub fn listening_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Push an inbound post to whoever listens on its channel.
    pub fn emit(&self, message: InboundMessage) -> bool {
        let key = (message.account_id.clone(), message.target_id.clone());
        match self.listeners.lock().unwrap().get(&key) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    async fn perform(&self, action: SentAction) -> std::result::Result<Delivery, TransportError> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let n = in_flight.entry(action.account_id.clone()).or_insert(0);
            *n += 1;
            self.max_overlap.fetch_max(*n, Ordering::SeqCst);
        }
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(n) = in_flight.get_mut(&action.account_id) {
                *n -= 1;
            }
        }
        let failure = self.failures.lock().unwrap().get(&action.target_id).copied();
        self.sent.lock().unwrap().push(action);
        match failure {
            Some(code) => Err(TransportError::new(code, "scripted failure", 0)),
            None => Ok(Delivery {
                message_id: Some(format!("msg-{}", self.sent_count())),
                retry_count: 0,
            }),
        }
    }
}

#[async_trait]
impl ActionTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_with_retry(
        &self,
        request: &PostRequest,
        _max_retries: u32,
    ) -> std::result::Result<Delivery, TransportError> {
        self.perform(SentAction {
            account_id: request.account_id.clone(),
            target_id: request.target_id.clone(),
            content: request.content.clone(),
            reply_to: None,
        })
        .await
    }

    async fn send_comment_with_retry(
        &self,
        request: &CommentRequest,
        _max_retries: u32,
    ) -> std::result::Result<Delivery, TransportError> {
        self.perform(SentAction {
            account_id: request.account_id.clone(),
            target_id: request.target_id.clone(),
            content: request.content.clone(),
            reply_to: Some(request.reply_to_message_id.clone()),
        })
        .await
    }

    async fn listen_to_channel(&self, pair: &ReadyPair, on_message: MessageSender) -> Result<()> {
        if self.deaf.lock().unwrap().contains(&pair.target_id) {
            return Err(TeleclawError::Transport(format!(
                "cannot subscribe to {}",
                pair.target_id
            )));
        }
        self.listeners.lock().unwrap().insert(
            (pair.account_id.clone(), pair.target_id.clone()),
            on_message,
        );
        Ok(())
    }

    async fn stop_listening(&self, account_id: &str, target_id: &str) -> Result<()> {
        self.listeners
            .lock()
            .unwrap()
            .remove(&(account_id.to_string(), target_id.to_string()));
        Ok(())
    }
}

type RecordHook = Box<dyn Fn(&TaskExecutionRecord) + Send + Sync>;

/// [`MemoryStore`] with scripted status-write failures and a hook on
/// execution records.
#[derive(Default)]
pub struct HookedStore {
    inner: MemoryStore,
    stuck: Mutex<HashSet<String>>,
    on_record: Mutex<Option<RecordHook>>,
}

impl HookedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status updates of `task_id` fail.
    pub fn fail_status_of(&self, task_id: &str) {
        self.stuck.lock().unwrap().insert(task_id.to_string());
    }

    /// Called with every execution record before it is stored.
    pub fn on_record(&self, hook: impl Fn(&TaskExecutionRecord) + Send + Sync + 'static) {
        *self.on_record.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl RecordStore for HookedStore {
    fn name(&self) -> &str {
        "hooked"
    }

    async fn create_task(&self, task: &Task) -> Result<()> {
        self.inner.create_task(task).await
    }

    async fn find_task_by_id(&self, id: &str) -> Result<Option<Task>> {
        self.inner.find_task_by_id(id).await
    }

    async fn find_all_tasks(&self) -> Result<Vec<Task>> {
        self.inner.find_all_tasks().await
    }

    async fn find_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.inner.find_tasks_by_status(status).await
    }

    async fn find_tasks_by_account(&self, account_id: &str) -> Result<Vec<Task>> {
        self.inner.find_tasks_by_account(account_id).await
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        self.inner.update_task(task).await
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<bool> {
        if self.stuck.lock().unwrap().contains(id) {
            return Err(TeleclawError::Store(format!("disk full while updating {id}")));
        }
        self.inner.update_task_status(id, status).await
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: TaskStatus,
        new: TaskStatus,
    ) -> Result<bool> {
        self.inner.compare_and_set_status(id, expected, new).await
    }

    async fn update_next_run(&self, id: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        self.inner.update_next_run(id, next_run_at).await
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        self.inner.delete_task(id).await
    }

    async fn create_execution_record(&self, record: &TaskExecutionRecord) -> Result<()> {
        if let Some(hook) = self.on_record.lock().unwrap().as_ref() {
            hook(record);
        }
        self.inner.create_execution_record(record).await
    }

    async fn find_executions_by_task(
        &self,
        task_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TaskExecutionRecord>> {
        self.inner.find_executions_by_task(task_id, limit).await
    }

    async fn find_executions_by_account(
        &self,
        account_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TaskExecutionRecord>> {
        self.inner.find_executions_by_account(account_id, limit).await
    }

    async fn find_recent_executions(&self, limit: usize) -> Result<Vec<TaskExecutionRecord>> {
        self.inner.find_recent_executions(limit).await
    }

    async fn find_failed_executions(&self, limit: usize) -> Result<Vec<TaskExecutionRecord>> {
        self.inner.find_failed_executions(limit).await
    }

    async fn delete_executions_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.delete_executions_before(cutoff).await
    }
}
