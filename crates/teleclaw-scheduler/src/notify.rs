//! Status sinks — where task status events go.
//! Lightweight: no queues. Every publish is best-effort.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use teleclaw_core::error::{Result, TeleclawError};
use teleclaw_core::traits::StatusSink;
use teleclaw_core::types::{StatusKind, TaskStatusEvent};
use tokio::sync::broadcast;

/// Publish and swallow any failure. Status delivery never affects scheduling.
pub async fn publish_quietly(sink: &dyn StatusSink, event: TaskStatusEvent) {
    if let Err(e) = sink.publish(&event).await {
        tracing::debug!("Status sink '{}' dropped event for {}: {e}", sink.name(), event.task_id);
    }
}

/// Mirrors events into the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl StatusSink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn publish(&self, event: &TaskStatusEvent) -> Result<()> {
        match event.kind {
            StatusKind::Started => tracing::info!("▶️ [{}] started: {}", event.task_id, event.message),
            StatusKind::Resumed => tracing::info!("🔁 [{}] resumed: {}", event.task_id, event.message),
            StatusKind::Stopped => tracing::info!("⏹️ [{}] stopped: {}", event.task_id, event.message),
            StatusKind::RestoreFailed => {
                tracing::warn!("⚠️ [{}] not restored: {}", event.task_id, event.message)
            }
            StatusKind::ExecutionSucceeded => {
                tracing::info!("✅ [{}] {}", event.task_id, event.message)
            }
            StatusKind::ExecutionFailed => {
                tracing::warn!("❌ [{}] {}", event.task_id, event.message)
            }
            StatusKind::PairBlocked => {
                tracing::warn!("🚫 [{}] pair blocked: {}", event.task_id, event.message)
            }
        }
        Ok(())
    }
}

/// Broadcasts events to live subscribers (dashboards, websockets).
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<TaskStatusEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskStatusEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl StatusSink for BroadcastSink {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn publish(&self, event: &TaskStatusEvent) -> Result<()> {
        // No subscribers is not a failure.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

/// Keeps the most recent events in memory (ring buffer).
#[derive(Debug)]
pub struct HistorySink {
    events: Mutex<VecDeque<TaskStatusEvent>>,
    capacity: usize,
}

impl HistorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<TaskStatusEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Events for one task, oldest first.
    pub fn for_task(&self, task_id: &str) -> Vec<TaskStatusEvent> {
        self.history()
            .into_iter()
            .filter(|e| e.task_id == task_id)
            .collect()
    }
}

impl Default for HistorySink {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl StatusSink for HistorySink {
    fn name(&self) -> &str {
        "history"
    }

    async fn publish(&self, event: &TaskStatusEvent) -> Result<()> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push_back(event.clone());
        while events.len() > self.capacity {
            events.pop_front();
        }
        Ok(())
    }
}

/// Sends each event to several sinks; one failing sink does not stop the others.
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn StatusSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn StatusSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn StatusSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl StatusSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn publish(&self, event: &TaskStatusEvent) -> Result<()> {
        let mut failed = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.publish(event).await {
                failed.push(format!("{}: {e}", sink.name()));
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(TeleclawError::Transport(failed.join("; ")))
        }
    }
}
