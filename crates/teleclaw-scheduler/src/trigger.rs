//! Trigger sources — what wakes a task runner up.
//!
//! Group posting runs off an [`IntervalTrigger`]; channel monitoring runs off
//! a [`SubscriptionFeed`] fed by the transport's channel listeners. The runner
//! only sees [`Trigger`]s, so the execution body is the same for both.

use std::time::Duration;

use async_trait::async_trait;
use teleclaw_core::traits::{InboundMessage, MessageSender};
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

/// One reason to attempt an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Timer fired.
    Tick,
    /// A new post arrived on a monitored channel.
    Inbound(InboundMessage),
}

#[async_trait]
pub trait TriggerSource: Send {
    /// Wait for the next trigger. `None` means the source is exhausted.
    async fn next(&mut self) -> Option<Trigger>;

    /// Period between triggers, for sources that have one.
    fn period(&self) -> Option<Duration> {
        None
    }
}

/// Fires immediately, then every `period`.
pub struct IntervalTrigger {
    interval: Interval,
    period: Duration,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        // A slow execution must not cause a burst of catch-up ticks.
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, period }
    }

    pub fn every_minutes(minutes: u32) -> Self {
        Self::new(Duration::from_secs(u64::from(minutes) * 60))
    }
}

#[async_trait]
impl TriggerSource for IntervalTrigger {
    async fn next(&mut self) -> Option<Trigger> {
        self.interval.tick().await;
        Some(Trigger::Tick)
    }

    fn period(&self) -> Option<Duration> {
        Some(self.period)
    }
}

/// Inbound posts from every channel listener of one task.
pub struct SubscriptionFeed {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl SubscriptionFeed {
    /// A feed plus the sender handed to each channel listener.
    pub fn channel() -> (MessageSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl TriggerSource for SubscriptionFeed {
    async fn next(&mut self) -> Option<Trigger> {
        self.rx.recv().await.map(Trigger::Inbound)
    }
}
