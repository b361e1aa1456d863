//! Action transport — performs posts and comments on the messaging network
//! and delivers inbound channel posts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::types::ReadyPair;

/// Post into a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRequest {
    pub account_id: String,
    pub target_id: String,
    pub transport_target_id: String,
    pub content: String,
}

/// Comment on a channel post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentRequest {
    pub account_id: String,
    pub target_id: String,
    pub transport_target_id: String,
    /// The post being commented on.
    pub reply_to_message_id: String,
    pub content: String,
}

/// A completed send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Identifier of the created message, when the network reports one.
    pub message_id: Option<String>,
    /// Retries consumed before success.
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorCode {
    /// The account may not write to the target.
    WriteForbidden,
    FloodWait,
    TargetGone,
    SessionInvalid,
    Network,
    Other,
}

/// A send that failed after the retry budget was exhausted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct TransportError {
    pub code: TransportErrorCode,
    pub message: String,
    pub retry_count: u32,
}

impl TransportError {
    pub fn new(code: TransportErrorCode, message: impl Into<String>, retry_count: u32) -> Self {
        Self {
            code,
            message: message.into(),
            retry_count,
        }
    }

    pub fn is_write_forbidden(&self) -> bool {
        self.code == TransportErrorCode::WriteForbidden
    }
}

/// A new post seen on a monitored channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub account_id: String,
    pub target_id: String,
    pub message_id: String,
    #[serde(default)]
    pub text: String,
    /// The channel disabled comments on this post.
    #[serde(default)]
    pub comments_disabled: bool,
    pub received_at: DateTime<Utc>,
}

/// Where a channel listener delivers inbound posts.
pub type MessageSender = mpsc::UnboundedSender<InboundMessage>;

#[async_trait]
pub trait ActionTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Post, retrying up to `max_retries` times on transient errors.
    async fn send_with_retry(
        &self,
        request: &PostRequest,
        max_retries: u32,
    ) -> std::result::Result<Delivery, TransportError>;

    /// Comment, retrying up to `max_retries` times on transient errors.
    async fn send_comment_with_retry(
        &self,
        request: &CommentRequest,
        max_retries: u32,
    ) -> std::result::Result<Delivery, TransportError>;

    /// Start delivering new posts of the pair's channel to `on_message`.
    async fn listen_to_channel(&self, pair: &ReadyPair, on_message: MessageSender) -> Result<()>;

    async fn stop_listening(&self, account_id: &str, target_id: &str) -> Result<()>;
}
