//! Collaborators for running the engine without a messaging backend.
//! Every pair is ready and every action is logged instead of sent.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use teleclaw_core::error::Result;
use teleclaw_core::traits::{
    AccessRequest, AccessResolver, ActionTransport, CommentRequest, Delivery, MessageSender,
    PostRequest, TransportError,
};
use teleclaw_core::types::{PairResolution, ReadyPair};

/// Treats every account as able to act on every target.
pub struct OpenResolver;

#[async_trait]
impl AccessResolver for OpenResolver {
    async fn check_and_prepare(&self, request: &AccessRequest) -> Result<PairResolution> {
        Ok(PairResolution::Ready(ReadyPair {
            account_id: request.account_id.clone(),
            target_id: request.target_id.clone(),
            transport_target_id: request.target_id.clone(),
        }))
    }
}

/// Logs posts and comments and reports them delivered.
#[derive(Default)]
pub struct DryRunTransport {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<(String, String), MessageSender>>,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn delivered(&self) -> Delivery {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Delivery {
            message_id: Some(format!("dry-{n}")),
            retry_count: 0,
        }
    }
}

#[async_trait]
impl ActionTransport for DryRunTransport {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn send_with_retry(
        &self,
        request: &PostRequest,
        _max_retries: u32,
    ) -> std::result::Result<Delivery, TransportError> {
        tracing::info!(
            "📤 [dry-run] {} → {}: {}",
            request.account_id,
            request.transport_target_id,
            request.content
        );
        Ok(self.delivered())
    }

    async fn send_comment_with_retry(
        &self,
        request: &CommentRequest,
        _max_retries: u32,
    ) -> std::result::Result<Delivery, TransportError> {
        tracing::info!(
            "💬 [dry-run] {} → {} #{}: {}",
            request.account_id,
            request.transport_target_id,
            request.reply_to_message_id,
            request.content
        );
        Ok(self.delivered())
    }

    async fn listen_to_channel(&self, pair: &ReadyPair, on_message: MessageSender) -> Result<()> {
        tracing::info!("👂 [dry-run] listening on {}/{}", pair.account_id, pair.target_id);
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((pair.account_id.clone(), pair.target_id.clone()), on_message);
        Ok(())
    }

    async fn stop_listening(&self, account_id: &str, target_id: &str) -> Result<()> {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(account_id.to_string(), target_id.to_string()));
        Ok(())
    }
}
