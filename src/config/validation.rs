//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Compile the default frontend rule (a broken rule is fatal at startup)
//! - Validate value ranges (wait > 0, backoff ordering)
//! - Check addresses and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProviderConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProviderConfig;
use crate::provider::template::{Template, TemplateError};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("catalog.frontend_rule does not compile: {0}")]
    FrontendRule(TemplateError),

    #[error("registry.endpoint {0:?} is not a valid http(s) URL")]
    Endpoint(String),

    #[error("registry.wait_secs must be greater than zero")]
    ZeroWait,

    #[error("registry.retry_base_delay_ms ({base}) exceeds retry_max_delay_ms ({max})")]
    Backoff { base: u64, max: u64 },

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),

    #[error("observability.log_format {0:?} must be \"pretty\" or \"json\"")]
    LogFormat(String),
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &ProviderConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = Template::parse(&config.catalog.frontend_rule) {
        errors.push(ValidationError::FrontendRule(e));
    }

    match Url::parse(&config.registry.endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {}
        _ => errors.push(ValidationError::Endpoint(config.registry.endpoint.clone())),
    }

    if config.registry.wait_secs == 0 {
        errors.push(ValidationError::ZeroWait);
    }

    if config.registry.retry_base_delay_ms > config.registry.retry_max_delay_ms {
        errors.push(ValidationError::Backoff {
            base: config.registry.retry_base_delay_ms,
            max: config.registry.retry_max_delay_ms,
        });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "json") {
        errors.push(ValidationError::LogFormat(config.observability.log_format.clone()));
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

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&ProviderConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ProviderConfig::default();
        config.catalog.frontend_rule = "Host:{{nope}}".into();
        config.registry.endpoint = "consul:8500".into();
        config.registry.wait_secs = 0;
        config.registry.retry_base_delay_ms = 10;
        config.registry.retry_max_delay_ms = 1;
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "everywhere".into();
        config.observability.log_format = "xml".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 6);
        assert_eq!(
            errors[0],
            ValidationError::FrontendRule(TemplateError::UnknownFunction("nope".into()))
        );
        assert!(errors.contains(&ValidationError::ZeroWait));
        assert!(errors.contains(&ValidationError::Backoff { base: 10, max: 1 }));
    }

    #[test]
    fn test_metrics_address_ignored_when_disabled() {
        let mut config = ProviderConfig::default();
        config.observability.metrics_address = "everywhere".into();
        assert!(validate_config(&config).is_ok());
    }
}
