//! Task definition validation. Reports the first violated constraint.

use teleclaw_core::error::{Result, TeleclawError};
use teleclaw_core::types::{
    MAX_RANDOM_DELAY_MINUTES, MIN_INTERVAL_MINUTES, NewTask, Task, TaskConfig, TaskType,
};

/// Validate a definition before it is persisted.
pub fn validate_new(def: &NewTask) -> Result<()> {
    validate_parts(
        def.task_type,
        &def.account_ids,
        &def.target_ids,
        def.priority,
        &def.config,
    )
}

/// Validate a merged task (after an update).
pub fn validate_task(task: &Task) -> Result<()> {
    validate_parts(
        task.task_type,
        &task.account_ids,
        &task.target_ids,
        Some(task.priority),
        &task.config,
    )
}

fn validate_parts(
    task_type: TaskType,
    account_ids: &[String],
    target_ids: &[String],
    priority: Option<u8>,
    config: &TaskConfig,
) -> Result<()> {
    if account_ids.is_empty() {
        return invalid("at least one account is required");
    }
    if account_ids.iter().any(|a| a.trim().is_empty()) {
        return invalid("account ids must not be blank");
    }
    if target_ids.is_empty() {
        return invalid("at least one target is required");
    }
    if target_ids.iter().any(|t| t.trim().is_empty()) {
        return invalid("target ids must not be blank");
    }
    if let Some(p) = priority
        && !(1..=10).contains(&p)
    {
        return invalid(&format!("priority must be between 1 and 10, got {p}"));
    }

    match task_type {
        TaskType::GroupPosting => match config.interval {
            None => return invalid("interval is required for group_posting"),
            Some(minutes) if minutes < MIN_INTERVAL_MINUTES => {
                return invalid(&format!(
                    "interval must be at least {MIN_INTERVAL_MINUTES} minutes, got {minutes}"
                ));
            }
            Some(_) => {}
        },
        TaskType::ChannelMonitoring => match config.comment_probability {
            None => return invalid("comment_probability is required for channel_monitoring"),
            Some(p) if !(0.0..=1.0).contains(&p) => {
                return invalid(&format!(
                    "comment_probability must be between 0 and 1, got {p}"
                ));
            }
            Some(_) => {}
        },
    }

    if let Some(delay) = config.random_delay
        && (!delay.is_finite() || delay < 0.0)
    {
        return invalid(&format!("random_delay must be non-negative, got {delay}"));
    }
    if let Some(delay) = config.random_delay
        && delay > MAX_RANDOM_DELAY_MINUTES
    {
        return invalid(&format!(
            "random_delay must be at most {MAX_RANDOM_DELAY_MINUTES} minutes, got {delay}"
        ));
    }
    if config.retry_on_error && config.max_retries < 1 {
        return invalid("max_retries must be at least 1 when retry_on_error is enabled");
    }
    if let Some(range) = &config.time_range
        && !range.is_well_formed()
    {
        return invalid(&format!(
            "time_range must be HH:mm-HH:mm, got {}-{}",
            range.start, range.end
        ));
    }
    Ok(())
}

fn invalid(message: &str) -> Result<()> {
    Err(TeleclawError::Validation(message.to_string()))
}
