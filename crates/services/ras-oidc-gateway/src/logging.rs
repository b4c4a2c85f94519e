use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber in the configured format.
pub fn init(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_filter()).context("Invalid log filter")?;
    let logging = &config.logging;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(logging.target)
        .with_line_number(logging.line_numbers)
        .with_thread_ids(logging.thread_ids);

    let result = match logging.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.pretty().try_init(),
    };

    result.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
