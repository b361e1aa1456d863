//! Domain types — tasks, pairs, execution records, and status events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TeleclawError};

/// Smallest allowed posting interval, in minutes.
pub const MIN_INTERVAL_MINUTES: u32 = 10;
/// Largest allowed random pre-action delay, in minutes (one day).
pub const MAX_RANDOM_DELAY_MINUTES: f64 = 1440.0;
/// Priority assigned when a definition does not name one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Post into groups on a recurring timer.
    #[default]
    GroupPosting,
    /// Watch channels and comment on new posts.
    ChannelMonitoring,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::GroupPosting => "group_posting",
            TaskType::ChannelMonitoring => "channel_monitoring",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = TeleclawError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "group_posting" => Ok(TaskType::GroupPosting),
            "channel_monitoring" => Ok(TaskType::ChannelMonitoring),
            other => Err(TeleclawError::Validation(format!(
                "unknown task type '{other}'"
            ))),
        }
    }
}

/// Persisted run state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Stopped,
    Running,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Stopped => "stopped",
            TaskStatus::Running => "running",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = TeleclawError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stopped" => Ok(TaskStatus::Stopped),
            "running" => Ok(TaskStatus::Running),
            other => Err(TeleclawError::Validation(format!(
                "unknown task status '{other}'"
            ))),
        }
    }
}

/// How a task reacts to blocked pairs at start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecheckPolicy {
    /// Start with whatever is ready.
    #[default]
    Partial,
    /// Any blocked pair prevents start.
    Strict,
}

impl std::fmt::Display for PrecheckPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrecheckPolicy::Partial => f.write_str("partial"),
            PrecheckPolicy::Strict => f.write_str("strict"),
        }
    }
}

/// Daily wall-clock window, `HH:mm` on both ends, inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: String,
    pub end: String,
}

impl TimeRange {
    pub fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    /// Both ends are zero-padded `HH:mm` with valid hour and minute.
    pub fn is_well_formed(&self) -> bool {
        is_hhmm(&self.start) && is_hhmm(&self.end)
    }

    /// Whether `hhmm` falls inside the window.
    ///
    /// A window with `start > end` spans midnight.
    pub fn contains(&self, hhmm: &str) -> bool {
        let (start, end) = (self.start.as_str(), self.end.as_str());
        if start <= end {
            hhmm >= start && hhmm <= end
        } else {
            hhmm >= start || hhmm <= end
        }
    }
}

fn is_hhmm(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return false;
    }
    let digits = |a: u8, b: u8| -> Option<u32> {
        if a.is_ascii_digit() && b.is_ascii_digit() {
            Some(((a - b'0') * 10 + (b - b'0')) as u32)
        } else {
            None
        }
    };
    matches!(
        (digits(bytes[0], bytes[1]), digits(bytes[3], bytes[4])),
        (Some(h), Some(m)) if h < 24 && m < 60
    )
}

/// Task-type-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Posting period in minutes (group posting only).
    #[serde(default)]
    pub interval: Option<u32>,
    /// Chance of acting on an inbound post (channel monitoring only).
    #[serde(default)]
    pub comment_probability: Option<f64>,
    /// Upper bound of the random pre-action delay, in minutes.
    #[serde(default)]
    pub random_delay: Option<f64>,
    #[serde(default)]
    pub retry_on_error: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "bool_true")]
    pub auto_join_enabled: bool,
    #[serde(default)]
    pub precheck_policy: PrecheckPolicy,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    /// Content templates; one is picked at random per action.
    #[serde(default)]
    pub templates: Vec<String>,
}

fn default_max_retries() -> u32 { 3 }
fn bool_true() -> bool { true }

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            interval: None,
            comment_probability: None,
            random_delay: None,
            retry_on_error: false,
            max_retries: default_max_retries(),
            auto_join_enabled: true,
            precheck_policy: PrecheckPolicy::Partial,
            time_range: None,
            templates: Vec::new(),
        }
    }
}

impl TaskConfig {
    /// Retry budget handed to the transport: zero unless retries are enabled.
    pub fn retry_budget(&self) -> u32 {
        if self.retry_on_error { self.max_retries } else { 0 }
    }
}

/// A persisted automation definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// Human-readable label, may be empty.
    #[serde(default)]
    pub name: String,
    pub task_type: TaskType,
    pub account_ids: Vec<String>,
    pub target_ids: Vec<String>,
    pub config: TaskConfig,
    pub priority: u8,
    pub status: TaskStatus,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Materialize a validated definition as a stopped task.
    pub fn from_new(def: NewTask) -> Self {
        let now = Utc::now();
        Self {
            id: format!("task-{}", uuid::Uuid::new_v4().simple()),
            name: def.name,
            task_type: def.task_type,
            account_ids: dedup_ids(def.account_ids),
            target_ids: dedup_ids(def.target_ids),
            config: def.config,
            priority: def.priority.unwrap_or(DEFAULT_PRIORITY),
            status: TaskStatus::Stopped,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    /// Whether the task involves the given account.
    pub fn uses_account(&self, account_id: &str) -> bool {
        self.account_ids.iter().any(|a| a == account_id)
    }
}

/// Drop duplicates while keeping first-seen order.
pub fn dedup_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Input to task creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub name: String,
    pub task_type: TaskType,
    pub account_ids: Vec<String>,
    pub target_ids: Vec<String>,
    #[serde(default)]
    pub config: TaskConfig,
    #[serde(default)]
    pub priority: Option<u8>,
}

/// Partial update of a stopped task. `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub account_ids: Option<Vec<String>>,
    #[serde(default)]
    pub target_ids: Option<Vec<String>>,
    #[serde(default)]
    pub config: Option<TaskConfig>,
    #[serde(default)]
    pub priority: Option<u8>,
}

impl TaskUpdate {
    /// Merge into a copy of `task`.
    pub fn apply(&self, task: &Task) -> Task {
        let mut merged = task.clone();
        if let Some(name) = &self.name {
            merged.name = name.clone();
        }
        if let Some(accounts) = &self.account_ids {
            merged.account_ids = dedup_ids(accounts.clone());
        }
        if let Some(targets) = &self.target_ids {
            merged.target_ids = dedup_ids(targets.clone());
        }
        if let Some(config) = &self.config {
            merged.config = config.clone();
        }
        if let Some(priority) = self.priority {
            merged.priority = priority;
        }
        merged.updated_at = Utc::now();
        merged
    }
}

/// Reason an account cannot currently act on a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCode {
    AccountNotFound,
    AccountInactive,
    SessionInvalid,
    TargetNotFound,
    NotMember,
    JoinPending,
    JoinFailed,
    WriteForbidden,
    Banned,
    FloodWait,
    Unknown,
}

impl BlockCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockCode::AccountNotFound => "account_not_found",
            BlockCode::AccountInactive => "account_inactive",
            BlockCode::SessionInvalid => "session_invalid",
            BlockCode::TargetNotFound => "target_not_found",
            BlockCode::NotMember => "not_member",
            BlockCode::JoinPending => "join_pending",
            BlockCode::JoinFailed => "join_failed",
            BlockCode::WriteForbidden => "write_forbidden",
            BlockCode::Banned => "banned",
            BlockCode::FloodWait => "flood_wait",
            BlockCode::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for BlockCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, currently usable (account, target) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReadyPair {
    pub account_id: String,
    pub target_id: String,
    /// Identifier the transport uses for the target (chat id, peer handle).
    pub transport_target_id: String,
}

/// A combination the access resolver rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedPair {
    pub account_id: String,
    pub target_id: String,
    pub transport_target_id: String,
    pub code: BlockCode,
    pub message: String,
    pub auto_join_attempted: bool,
}

impl BlockedPair {
    /// Demote a ready pair after a runtime rejection.
    pub fn from_ready(pair: &ReadyPair, code: BlockCode, message: &str) -> Self {
        Self {
            account_id: pair.account_id.clone(),
            target_id: pair.target_id.clone(),
            transport_target_id: pair.transport_target_id.clone(),
            code,
            message: message.to_string(),
            auto_join_attempted: false,
        }
    }
}

/// Outcome of resolving one (account, target) combination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PairResolution {
    Ready(ReadyPair),
    Blocked(BlockedPair),
}

/// Immutable audit row, one per execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionRecord {
    pub id: String,
    pub task_id: String,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    pub account_id: String,
    pub target_id: String,
    /// Inbound message the action replied to (channel monitoring).
    pub target_message_id: Option<String>,
    pub content: String,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl TaskExecutionRecord {
    pub fn new(task_id: &str, account_id: &str, target_id: &str, executed_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            executed_at,
            success: false,
            account_id: account_id.to_string(),
            target_id: target_id.to_string(),
            target_message_id: None,
            content: String::new(),
            error_message: None,
            retry_count: 0,
        }
    }
}

/// In-memory counters of a running task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub execution_count: u64,
    pub failure_count: u64,
    pub last_execution_time: Option<DateTime<Utc>>,
}

/// Aggregate over persisted execution records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Fraction of successful executions, 0.0 when there are none.
    pub success_rate: f64,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    pub fn from_records(records: &[TaskExecutionRecord]) -> Self {
        let total = records.len();
        let succeeded = records.iter().filter(|r| r.success).count();
        Self {
            total,
            succeeded,
            failed: total - succeeded,
            success_rate: if total == 0 { 0.0 } else { succeeded as f64 / total as f64 },
            last_executed_at: records.iter().map(|r| r.executed_at).max(),
        }
    }
}

/// Kind of status change reported to the status sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Started,
    Resumed,
    Stopped,
    RestoreFailed,
    ExecutionSucceeded,
    ExecutionFailed,
    PairBlocked,
}

/// Best-effort telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    pub task_id: String,
    pub kind: StatusKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl TaskStatusEvent {
    pub fn new(task_id: &str, kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_inclusive() {
        let range = TimeRange::new("09:00", "17:30");
        assert!(range.contains("09:00"));
        assert!(range.contains("17:30"));
        assert!(range.contains("12:15"));
        assert!(!range.contains("08:59"));
        assert!(!range.contains("17:31"));
    }

    #[test]
    fn test_time_range_across_midnight() {
        let range = TimeRange::new("22:00", "02:00");
        assert!(range.contains("23:10"));
        assert!(range.contains("01:59"));
        assert!(!range.contains("12:00"));
    }

    #[test]
    fn test_time_range_format() {
        assert!(TimeRange::new("00:00", "23:59").is_well_formed());
        assert!(!TimeRange::new("9:00", "10:00").is_well_formed());
        assert!(!TimeRange::new("24:00", "10:00").is_well_formed());
        assert!(!TimeRange::new("10:60", "11:00").is_well_formed());
        assert!(!TimeRange::new("ab:cd", "11:00").is_well_formed());
    }

    #[test]
    fn test_retry_budget() {
        let mut config = TaskConfig::default();
        assert_eq!(config.retry_budget(), 0);
        config.retry_on_error = true;
        config.max_retries = 4;
        assert_eq!(config.retry_budget(), 4);
    }

    #[test]
    fn test_from_new_defaults() {
        let task = Task::from_new(NewTask {
            task_type: TaskType::GroupPosting,
            account_ids: vec!["a1".into(), "a1".into(), "a2".into()],
            target_ids: vec!["g1".into()],
            ..Default::default()
        });
        assert_eq!(task.status, TaskStatus::Stopped);
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert_eq!(task.account_ids, vec!["a1", "a2"]);
        assert!(task.id.starts_with("task-"));
    }

    #[test]
    fn test_update_keeps_unset_fields() {
        let task = Task::from_new(NewTask {
            name: "morning".into(),
            task_type: TaskType::GroupPosting,
            account_ids: vec!["a1".into()],
            target_ids: vec!["g1".into()],
            ..Default::default()
        });
        let merged = TaskUpdate {
            priority: Some(9),
            ..Default::default()
        }
        .apply(&task);
        assert_eq!(merged.priority, 9);
        assert_eq!(merged.name, "morning");
        assert_eq!(merged.account_ids, task.account_ids);
    }

    #[test]
    fn test_execution_stats() {
        let now = Utc::now();
        let mut ok = TaskExecutionRecord::new("t", "a", "g", now);
        ok.success = true;
        let failed = TaskExecutionRecord::new("t", "a", "g", now - chrono::Duration::minutes(5));
        let stats = ExecutionStats::from_records(&[ok, failed]);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.last_executed_at, Some(now));
    }
}
