//! Precheck engine — resolves a task's account × target cross-product into
//! ready and blocked pairs before the task runs.

use std::collections::BTreeMap;

use serde::Serialize;
use teleclaw_core::error::{PrecheckFailure, Result, TeleclawError};
use teleclaw_core::traits::{AccessRequest, AccessResolver};
use teleclaw_core::types::{BlockCode, BlockedPair, PairResolution, PrecheckPolicy, ReadyPair, Task};

/// Result of one precheck pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrecheckSummary {
    pub policy: PrecheckPolicy,
    pub auto_join_enabled: bool,
    pub ready_pairs: Vec<ReadyPair>,
    pub blocked_pairs: Vec<BlockedPair>,
    /// Blocked pairs per reason code.
    pub blocked_reason_counts: BTreeMap<String, usize>,
}

impl PrecheckSummary {
    /// Why this summary forbids a start, if it does.
    pub fn failure(&self) -> Option<PrecheckFailure> {
        if self.ready_pairs.is_empty() {
            Some(PrecheckFailure::NoReadyPairs)
        } else if self.policy == PrecheckPolicy::Strict && !self.blocked_pairs.is_empty() {
            Some(PrecheckFailure::StrictPolicyViolated)
        } else {
            None
        }
    }

    /// The same pass with its pair sets replaced, e.g. after channel
    /// listeners were attached and some pairs dropped out.
    pub fn with_pairs(
        &self,
        ready_pairs: Vec<ReadyPair>,
        blocked_pairs: Vec<BlockedPair>,
    ) -> Self {
        Self {
            policy: self.policy,
            auto_join_enabled: self.auto_join_enabled,
            blocked_reason_counts: reason_counts(&blocked_pairs),
            ready_pairs,
            blocked_pairs,
        }
    }

    /// Apply the task's failure policy.
    pub fn enforce(&self, task_id: &str) -> Result<()> {
        match self.failure() {
            None => Ok(()),
            Some(reason) => Err(TeleclawError::Precheck {
                task_id: task_id.to_string(),
                reason,
                blocked_reasons: self.blocked_reason_counts.clone(),
            }),
        }
    }

    /// One-line description for logs and start results.
    pub fn describe(&self) -> String {
        if self.blocked_pairs.is_empty() {
            format!("{} ready", self.ready_pairs.len())
        } else {
            let reasons: Vec<String> = self
                .blocked_reason_counts
                .iter()
                .map(|(code, n)| format!("{code}={n}"))
                .collect();
            format!(
                "{} ready, {} blocked ({})",
                self.ready_pairs.len(),
                self.blocked_pairs.len(),
                reasons.join(", ")
            )
        }
    }
}

/// Resolve every (account, target) pair of `task` exactly once.
///
/// Never fails: resolver errors become blocked pairs with
/// [`BlockCode::Unknown`].
pub async fn precheck(task: &Task, resolver: &dyn AccessResolver) -> PrecheckSummary {
    let mut ready_pairs = Vec::new();
    let mut blocked_pairs = Vec::new();

    for account_id in &task.account_ids {
        for target_id in &task.target_ids {
            let request = AccessRequest {
                account_id: account_id.clone(),
                target_id: target_id.clone(),
                task_type: task.task_type,
                auto_join_enabled: task.config.auto_join_enabled,
            };
            match resolver.check_and_prepare(&request).await {
                Ok(PairResolution::Ready(pair)) => ready_pairs.push(pair),
                Ok(PairResolution::Blocked(pair)) => blocked_pairs.push(pair),
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Access check failed for {}/{} in task {}: {e}",
                        account_id,
                        target_id,
                        task.id
                    );
                    blocked_pairs.push(BlockedPair {
                        account_id: account_id.clone(),
                        target_id: target_id.clone(),
                        transport_target_id: target_id.clone(),
                        code: BlockCode::Unknown,
                        message: e.to_string(),
                        auto_join_attempted: false,
                    });
                }
            }
        }
    }

    let blocked_reason_counts = reason_counts(&blocked_pairs);

    tracing::debug!(
        "🔎 Precheck {}: {} ready, {} blocked",
        task.id,
        ready_pairs.len(),
        blocked_pairs.len()
    );

    PrecheckSummary {
        policy: task.config.precheck_policy,
        auto_join_enabled: task.config.auto_join_enabled,
        ready_pairs,
        blocked_pairs,
        blocked_reason_counts,
    }
}

fn reason_counts(blocked: &[BlockedPair]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for pair in blocked {
        *counts.entry(pair.code.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}
