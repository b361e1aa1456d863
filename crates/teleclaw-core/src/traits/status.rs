//! Status sink — best-effort telemetry for task state changes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::TaskStatusEvent;

/// Receives status events. Errors are swallowed by callers and never
/// affect scheduling.
#[async_trait]
pub trait StatusSink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, event: &TaskStatusEvent) -> Result<()>;
}
