//! Access resolver — decides whether an account can currently act on a target.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{PairResolution, TaskType};

/// One (account, target) lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub account_id: String,
    pub target_id: String,
    pub task_type: TaskType,
    /// Resolver may try to join the target before giving up.
    pub auto_join_enabled: bool,
}

#[async_trait]
pub trait AccessResolver: Send + Sync {
    /// Resolve a pair into ready or blocked, attempting remedial actions
    /// (such as auto-join) when allowed.
    ///
    /// An `Err` means the resolver itself failed; callers treat it as a
    /// blocked pair with an unknown reason.
    async fn check_and_prepare(&self, request: &AccessRequest) -> Result<PairResolution>;
}
