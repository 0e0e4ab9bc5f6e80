use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Tracking concurrency and attempt budget are at least 1
/// - Tracking poll interval is not 0
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    // Tracking validation
    let tracking = &config.tracking;
    if tracking.concurrency == 0 {
        return Err(ConfigError::ValidationError(
            "tracking.concurrency must be at least 1".to_string(),
        ));
    }
    if tracking.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "tracking.max_attempts must be at least 1".to_string(),
        ));
    }
    if tracking.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "tracking.poll_interval_ms cannot be 0".to_string(),
        ));
    }
    if tracking.retry_max_delay_secs < tracking.retry_base_delay_secs {
        return Err(ConfigError::ValidationError(
            "tracking.retry_max_delay_secs cannot be lower than tracking.retry_base_delay_secs"
                .to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::tracking::TrackingConfig;
    use std::net::IpAddr;

    fn assert_invalid(config: &Config, field: &str) {
        let err = validate_config(config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref msg) if msg.contains(field)));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            ..Default::default()
        };
        assert_invalid(&config, "server.port");
    }

    #[test]
    fn test_validate_tracking_limits() {
        let config = Config {
            tracking: TrackingConfig {
                concurrency: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_invalid(&config, "tracking.concurrency");

        let config = Config {
            tracking: TrackingConfig {
                max_attempts: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_invalid(&config, "tracking.max_attempts");

        let config = Config {
            tracking: TrackingConfig {
                poll_interval_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_invalid(&config, "tracking.poll_interval_ms");

        let config = Config {
            tracking: TrackingConfig {
                retry_base_delay_secs: 60,
                retry_max_delay_secs: 30,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_invalid(&config, "tracking.retry_max_delay_secs");
    }

    #[test]
    fn test_zero_delays_are_valid() {
        let config = Config {
            tracking: TrackingConfig {
                kickoff_delay_secs: 0,
                follow_up_delay_secs: 0,
                reconcile_interval_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }
}
