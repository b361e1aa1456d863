//! # TeleClaw Scheduler
//!
//! Task scheduling and execution engine: turns task definitions into
//! running, restart-recoverable streams of timed posts and event-driven
//! channel comments, one action at a time per account.
//!
//! ## Architecture
//! ```text
//! TaskScheduler (lifecycle: create/update/delete/start/stop/restore)
//!   ├── precheck   → resolve account × target into ready/blocked pairs
//!   ├── TaskRunner (one per running task)
//!   │     ├── IntervalTrigger  (group_posting, every N minutes)
//!   │     ├── SubscriptionFeed (channel_monitoring, inbound posts)
//!   │     └── execute → AccountLocks → delay → ActionTransport → record
//!   ├── CommentDedup  (once per post per account/channel)
//!   └── StatusSink    (tracing, broadcast, history, fanout)
//!
//! RecordStore: MemoryStore | SqliteStore
//! ```

pub mod dedup;
pub mod engine;
pub mod history;
pub mod locks;
pub mod notify;
pub mod persistence;
pub mod precheck;
pub mod render;
pub mod runner;
pub mod store;
pub mod trigger;
pub mod validate;

#[cfg(test)]
mod testing;

pub use dedup::CommentDedup;
pub use engine::{RestoreFailure, RestoreReport, StartOutcome, StopAllReport, TaskScheduler};
pub use history::ExecutionHistory;
pub use locks::{AccountLease, AccountLocks};
pub use notify::{BroadcastSink, FanoutSink, HistorySink, TracingSink};
pub use persistence::SqliteStore;
pub use precheck::{PrecheckSummary, precheck};
pub use render::TemplateRenderer;
pub use runner::{RunHandle, TaskContext, TaskRunner};
pub use store::MemoryStore;
pub use trigger::{IntervalTrigger, SubscriptionFeed, Trigger, TriggerSource};
