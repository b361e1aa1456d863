//! Content renderer — produces the text of a post or comment.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::traits::transport::InboundMessage;
use crate::types::{ReadyPair, Task};

pub trait ContentRenderer: Send + Sync {
    /// Render content for one action. `inbound` is the post being commented
    /// on, if any. An empty string means there is nothing to send.
    fn render(
        &self,
        task: &Task,
        pair: &ReadyPair,
        inbound: Option<&InboundMessage>,
        now: DateTime<Utc>,
    ) -> Result<String>;
}
