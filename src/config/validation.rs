//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Compile every regex and custom attribute once, so a bad pattern or
//!   expression refuses the config instead of failing at request time
//! - Validate value ranges (cache sizes, export interval, addresses)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RouterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted, at startup and on every reload

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{CustomAttributeConfig, RouterConfig};
use crate::telemetry::attributes::{AttributeError, CustomAttributeSet};
use crate::telemetry::filter::{compile_patterns, FilterError};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("router.config_version must not be empty")]
    EmptyConfigVersion,

    #[error("router.feature_flags: {0}")]
    FeatureFlag(String),

    #[error("engine.{field} must not be negative, got {value}")]
    NegativeCacheSize { field: &'static str, value: i64 },

    #[error("telemetry.metrics.export_interval_secs must be greater than 0")]
    ZeroExportInterval,

    #[error("{field}: {source}")]
    Pattern {
        field: &'static str,
        #[source]
        source: FilterError,
    },

    #[error("{field}: {source}")]
    Attribute {
        field: &'static str,
        #[source]
        source: AttributeError,
    },

    #[error("{field}: invalid socket address {value:?}")]
    Address { field: &'static str, value: String },

    #[error("observability.log_level: unknown level {0:?}")]
    LogLevel(String),
}

/// Check a config, collecting every problem.
pub fn validate_config(config: &RouterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_router(config, &mut errors);
    validate_engine(config, &mut errors);
    validate_telemetry(config, &mut errors);

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }
    if config.admin.enabled {
        check_address("admin.bind_address", &config.admin.bind_address, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_router(config: &RouterConfig, errors: &mut Vec<ValidationError>) {
    if config.router.config_version.trim().is_empty() {
        errors.push(ValidationError::EmptyConfigVersion);
    }
    let mut seen = HashSet::new();
    for flag in &config.router.feature_flags {
        if flag.trim().is_empty() {
            errors.push(ValidationError::FeatureFlag("empty feature flag name".into()));
        } else if !seen.insert(flag.as_str()) {
            errors.push(ValidationError::FeatureFlag(format!("duplicate feature flag {flag:?}")));
        }
    }
}

fn validate_engine(config: &RouterConfig, errors: &mut Vec<ValidationError>) {
    let engine = &config.engine;
    let sizes = [
        ("normalization_cache_size", engine.normalization_cache_size),
        ("validation_cache_size", engine.validation_cache_size),
        ("execution_plan_cache_size", engine.execution_plan_cache_size),
        ("persisted_operations_cache_size", engine.persisted_operations_cache_size),
        ("operation_hash_cache_size", engine.operation_hash_cache_size),
    ];
    for (field, value) in sizes {
        if value < 0 {
            errors.push(ValidationError::NegativeCacheSize { field, value });
        }
    }
}

fn validate_telemetry(config: &RouterConfig, errors: &mut Vec<ValidationError>) {
    let metrics = &config.telemetry.metrics;
    if metrics.enabled && metrics.export_interval_secs == 0 {
        errors.push(ValidationError::ZeroExportInterval);
    }

    let patterns = [
        ("telemetry.metrics.exclude_metrics", &metrics.exclude_metrics),
        ("telemetry.metrics.exclude_metric_labels", &metrics.exclude_metric_labels),
        ("telemetry.metrics.debug_export.exclude_metrics", &metrics.debug_export.exclude_metrics),
    ];
    for (field, list) in patterns {
        // Report each bad pattern, not only the first of a list.
        for pattern in list {
            if let Err(source) = compile_patterns(std::slice::from_ref(pattern)) {
                errors.push(ValidationError::Pattern { field, source });
            }
        }
    }

    check_attributes("telemetry.metrics.attributes", &metrics.attributes, errors);
    check_attributes("telemetry.tracing.attributes", &config.telemetry.tracing.attributes, errors);

    if metrics.prometheus.enabled {
        check_address(
            "telemetry.metrics.prometheus.listen_addr",
            &metrics.prometheus.listen_addr,
            errors,
        );
    }
}

fn check_attributes(
    field: &'static str,
    attributes: &[CustomAttributeConfig],
    errors: &mut Vec<ValidationError>,
) {
    if let Err(failures) = CustomAttributeSet::compile(attributes) {
        errors.extend(
            failures
                .into_iter()
                .map(|source| ValidationError::Attribute { field, source }),
        );
    }
}

fn check_address(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ValueFromConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&RouterConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = RouterConfig::default();
        config.router.config_version = String::new();
        config.router.feature_flags = vec!["a".into(), "a".into()];
        config.engine.validation_cache_size = -1;
        config.telemetry.metrics.exclude_metrics = vec!["(".into(), "ok".into(), "[".into()];
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 6);
        assert!(matches!(errors[0], ValidationError::EmptyConfigVersion));
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::NegativeCacheSize { field: "validation_cache_size", value: -1 }
        )));
    }

    #[test]
    fn bad_expression_refuses_config() {
        let mut config = RouterConfig::default();
        config.telemetry.tracing.attributes = vec![CustomAttributeConfig {
            key: "broken".into(),
            default: None,
            value_from: Some(ValueFromConfig {
                expression: Some("request.nope".into()),
                ..ValueFromConfig::default()
            }),
        }];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().starts_with("telemetry.tracing.attributes"));
    }

    #[test]
    fn addresses_are_checked_only_when_enabled() {
        let mut config = RouterConfig::default();
        config.telemetry.metrics.prometheus.listen_addr = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.telemetry.metrics.prometheus.enabled = true;
        assert!(matches!(
            validate_config(&config).unwrap_err()[0],
            ValidationError::Address { .. }
        ));
    }
}
