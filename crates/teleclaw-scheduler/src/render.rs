//! Default content renderer — random template with simple placeholders.
//!
//! Placeholders: `{account}`, `{target}`, `{date}`, `{time}`, `{post}`
//! (text of the post being commented on, empty for group posts).

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use teleclaw_core::error::Result;
use teleclaw_core::traits::{ContentRenderer, InboundMessage};
use teleclaw_core::types::{ReadyPair, Task};

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Substitute placeholders in one template.
    pub fn fill(
        template: &str,
        pair: &ReadyPair,
        inbound: Option<&InboundMessage>,
        now: DateTime<Utc>,
    ) -> String {
        template
            .replace("{account}", &pair.account_id)
            .replace("{target}", &pair.target_id)
            .replace("{date}", &now.format("%Y-%m-%d").to_string())
            .replace("{time}", &now.format("%H:%M").to_string())
            .replace("{post}", inbound.map(|m| m.text.as_str()).unwrap_or(""))
    }
}

impl ContentRenderer for TemplateRenderer {
    fn render(
        &self,
        task: &Task,
        pair: &ReadyPair,
        inbound: Option<&InboundMessage>,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let template = task.config.templates.choose(&mut rand::thread_rng());
        Ok(template
            .map(|t| Self::fill(t, pair, inbound, now).trim().to_string())
            .unwrap_or_default())
    }
}
