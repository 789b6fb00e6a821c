use super::{types::Config, ConfigError};
use crate::job::Stage;

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Watched prefix is set and the output prefix does not sit inside it
/// - Retry, polling and stage budgets are usable
/// - The lease outlives the longest gap between two renewals
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    // Trigger validation
    let watched = &config.trigger.watched_prefix;
    if watched.is_empty() {
        return Err(invalid("trigger.watched_prefix cannot be empty"));
    }
    let output = &config.storage.output_prefix;
    if output.is_empty() {
        return Err(invalid("storage.output_prefix cannot be empty"));
    }
    if output.starts_with(watched.as_str()) {
        return Err(invalid(format!(
            "storage.output_prefix '{}' is inside trigger.watched_prefix '{}'",
            output, watched
        )));
    }

    // Orchestrator validation
    let orchestrator = &config.orchestrator;
    if orchestrator.max_concurrent_jobs == 0 {
        return Err(invalid("orchestrator.max_concurrent_jobs cannot be 0"));
    }
    if orchestrator.lease_ttl_secs == 0 {
        return Err(invalid("orchestrator.lease_ttl_secs cannot be 0"));
    }

    let poll = &orchestrator.poll;
    if poll.initial_interval_ms == 0 {
        return Err(invalid("orchestrator.poll.initial_interval_ms cannot be 0"));
    }
    if poll.max_interval_ms < poll.initial_interval_ms {
        return Err(invalid(
            "orchestrator.poll.max_interval_ms cannot be below initial_interval_ms",
        ));
    }
    if poll.multiplier.is_nan() || poll.multiplier <= 0.0 {
        return Err(invalid("orchestrator.poll.multiplier must be positive"));
    }

    for stage in Stage::ALL {
        let retry = orchestrator.retry_for(stage);
        if retry.max_attempts == 0 {
            return Err(invalid(format!(
                "retry max_attempts for the {} stage cannot be 0",
                stage
            )));
        }
        if orchestrator.stage(stage).timeout_ms() == 0 {
            return Err(invalid(format!(
                "orchestrator.stages.{}.timeout cannot be 0",
                stage
            )));
        }
    }

    // Renewed before every call, so a gap is one call or one delay.
    let lease_ms = orchestrator.lease_ttl().as_millis();
    let summary_ms = orchestrator.budget_for(Stage::Summary).as_millis();
    if lease_ms <= summary_ms {
        return Err(invalid(format!(
            "orchestrator.lease_ttl_secs ({}s) must exceed the summary stage budget ({}ms)",
            orchestrator.lease_ttl_secs, summary_ms
        )));
    }
    if lease_ms <= u128::from(poll.max_interval_ms) {
        return Err(invalid(
            "orchestrator.lease_ttl_secs must exceed orchestrator.poll.max_interval_ms",
        ));
    }
    for stage in Stage::ALL {
        if lease_ms <= u128::from(orchestrator.retry_for(stage).max_delay_ms) {
            return Err(invalid(format!(
                "orchestrator.lease_ttl_secs must exceed the retry max_delay_ms of the {} stage",
                stage
            )));
        }
    }

    Ok(())
}
