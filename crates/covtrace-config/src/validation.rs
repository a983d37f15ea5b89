// SPDX-FileCopyrightText: 2026 Covtrace Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as positive sizes, bucket widths that divide a day, and well-formed URLs.

use crate::diagnostic::ConfigError;
use crate::model::CovtraceConfig;

const MINUTES_PER_DAY: u32 = 24 * 60;

const EPHEMERAL_SCHEMES: &[&str] = &["redis://", "rediss://", "unix://"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns every validation error found; does not fail fast.
pub fn validate_config(config: &CovtraceConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if config.storage.database_path.trim().is_empty() {
        fail("storage.database_path must not be empty".to_string());
    }

    if let Some(url) = &config.ephemeral.url {
        if !EPHEMERAL_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
            fail(format!(
                "ephemeral.url `{url}` must be a redis://, rediss:// or unix:// URL"
            ));
        }
    }
    if config.ephemeral.namespace.trim().is_empty() {
        fail("ephemeral.namespace must not be empty".to_string());
    }
    if config.ephemeral.connect_timeout_ms == 0 {
        fail("ephemeral.connect_timeout_ms must be at least 1".to_string());
    }

    let radius = config.presence.radius_units;
    if !radius.is_finite() || radius <= 0.0 || radius > 3600.0 {
        fail(format!(
            "presence.radius_units must be in (0, 3600] arc-seconds, got {radius}"
        ));
    }

    let bucket = config.presence.bucket_minutes;
    if bucket == 0 || bucket > MINUTES_PER_DAY {
        fail(format!(
            "presence.bucket_minutes must be between 1 and {MINUTES_PER_DAY}, got {bucket}"
        ));
    }

    if config.presence.ttl_days == 0 {
        fail("presence.ttl_days must be at least 1".to_string());
    }

    if config.trace.page_size == 0 {
        fail("trace.page_size must be at least 1".to_string());
    }
    if config.trace.concurrency == 0 {
        fail("trace.concurrency must be at least 1".to_string());
    }
    if config.trace.operation_ttl_secs == 0 {
        fail("trace.operation_ttl_secs must be at least 1".to_string());
    }
    if config.trace.missed_day_capacity == 0 {
        fail("trace.missed_day_capacity must be at least 1".to_string());
    }

    if config.notify.retry_attempts == 0 {
        fail("notify.retry_attempts must be at least 1".to_string());
    }
    if config.notify.failure_capacity == 0 {
        fail("notify.failure_capacity must be at least 1".to_string());
    }
    if config.notify.broadcast_page_size == 0 {
        fail("notify.broadcast_page_size must be at least 1".to_string());
    }

    if let Some(endpoint) = &config.push.endpoint {
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            fail(format!(
                "push.endpoint `{endpoint}` must be an http:// or https:// URL"
            ));
        }
    }
    if config.push.retry_base_delay_ms > config.push.retry_max_delay_ms {
        fail(format!(
            "push.retry_base_delay_ms ({}) must not exceed push.retry_max_delay_ms ({})",
            config.push.retry_base_delay_ms, config.push.retry_max_delay_ms
        ));
    }

    if config.fanout.concurrency == 0 {
        fail("fanout.concurrency must be at least 1".to_string());
    }
    if config.fanout.announce_interval_secs == 0 {
        fail("fanout.announce_interval_secs must be at least 1".to_string());
    }
    if config.fanout.load_page_size == 0 {
        fail("fanout.load_page_size must be at least 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_message(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        let config = CovtraceConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = CovtraceConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "database_path"));
    }

    #[test]
    fn zero_radius_fails_validation() {
        let mut config = CovtraceConfig::default();
        config.presence.radius_units = 0.0;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "radius_units"));
    }

    #[test]
    fn nan_radius_fails_validation() {
        let mut config = CovtraceConfig::default();
        config.presence.radius_units = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn bucket_wider_than_a_day_fails_validation() {
        let mut config = CovtraceConfig::default();
        config.presence.bucket_minutes = MINUTES_PER_DAY + 1;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "bucket_minutes"));
    }

    #[test]
    fn non_http_endpoint_fails_validation() {
        let mut config = CovtraceConfig::default();
        config.push.endpoint = Some("ftp://push".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "push.endpoint"));
    }

    #[test]
    fn errors_are_collected_not_fail_fast() {
        let mut config = CovtraceConfig::default();
        config.trace.page_size = 0;
        config.trace.concurrency = 0;
        config.fanout.concurrency = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3, "expected three errors, got {errors:?}");
    }

    #[test]
    fn inverted_backoff_bounds_fail_validation() {
        let mut config = CovtraceConfig::default();
        config.push.retry_base_delay_ms = 10_000;
        config.push.retry_max_delay_ms = 100;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "retry_base_delay_ms"));
    }

    #[test]
    fn ephemeral_url_must_name_a_redis_scheme() {
        let mut config = CovtraceConfig::default();
        config.ephemeral.url = Some("http://cache:6379".to_string());
        config.ephemeral.namespace = " ".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "ephemeral.url"));
        assert!(has_message(&errors, "ephemeral.namespace"));

        config.ephemeral.url = Some("redis://127.0.0.1:6379/0".to_string());
        config.ephemeral.namespace = "covtrace".to_string();
        assert!(validate_config(&config).is_ok());
    }
}
