//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{CourierConfig, LogOutput};

/// Validates the entire configuration.
pub fn validate_config(config: &CourierConfig) -> ConfigResult<()> {
    validate_logging(config)?;
    validate_server(config)?;
    validate_intervals(config)?;
    Ok(())
}

fn validate_logging(config: &CourierConfig) -> ConfigResult<()> {
    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

fn validate_server(config: &CourierConfig) -> ConfigResult<()> {
    if !config.server.enabled {
        return Ok(());
    }

    if config.server.port == 0 {
        return Err(ConfigError::InvalidPort(config.server.port));
    }

    if config.server.socket_addr().is_none() {
        return Err(ConfigError::validation(format!(
            "server.host must be an IP address, got '{}'",
            config.server.host
        )));
    }

    // The webhook endpoints cannot verify anything without a secret.
    if config.auth.token_secret.trim().is_empty() {
        return Err(ConfigError::missing_field("auth.token_secret"));
    }

    Ok(())
}

fn validate_intervals(config: &CourierConfig) -> ConfigResult<()> {
    let checks = [
        ("dispatcher.poll_interval_ms", config.dispatcher.poll_interval_ms),
        ("channels.reconnect_delay_ms", config.channels.reconnect_delay_ms),
        ("channels.refresh_interval_secs", config.channels.refresh_interval_secs),
        ("channels.request_timeout_ms", config.channels.request_timeout_ms),
        (
            "retention.incoming_log_days",
            u64::from(config.retention.incoming_log_days),
        ),
    ];

    for (field, value) in checks {
        if value == 0 {
            return Err(ConfigError::validation(format!(
                "{field} must be greater than 0"
            )));
        }
    }
    Ok(())
}
