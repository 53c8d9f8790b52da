//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the provider.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the catalog provider.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// How catalog entries are turned into routing configuration.
    pub catalog: CatalogConfig,

    /// Registry connection settings.
    pub registry: RegistryConfig,

    /// Where generated configuration is written.
    pub output: OutputConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Settings consumed by the configuration builder.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CatalogConfig {
    /// Domain suffix available to rule templates as `.Domain`.
    pub domain: String,

    /// Attribute key prefix (e.g. "traefik"). Empty disables prefixing.
    pub prefix: String,

    /// Expose services that carry no `enable` attribute.
    pub exposed_by_default: bool,

    /// Default frontend rule template.
    pub frontend_rule: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            prefix: "traefik".to_string(),
            exposed_by_default: true,
            frontend_rule: "Host:{{.ServiceName}}.{{.Domain}}".to_string(),
        }
    }
}

/// Registry (Consul) connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base URL of the registry HTTP API.
    pub endpoint: String,

    /// Datacenter to query. Empty uses the agent's datacenter.
    pub datacenter: String,

    /// ACL token sent as `X-Consul-Token`. Empty sends none.
    pub token: String,

    /// Maximum server-side wait for blocking queries, in seconds.
    pub wait_secs: u64,

    /// Only report instances passing their health checks.
    pub passing_only: bool,

    /// Base delay for retry backoff after registry errors, in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum retry backoff, in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8500".to_string(),
            datacenter: String::new(),
            token: String::new(),
            wait_secs: 300,
            passing_only: true,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 30_000,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    /// File receiving the JSON configuration. `None` writes to stdout.
    pub path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ProviderConfig = toml::from_str("").unwrap();
        assert_eq!(config, ProviderConfig::default());
        assert_eq!(config.catalog.frontend_rule, "Host:{{.ServiceName}}.{{.Domain}}");
        assert_eq!(config.registry.wait_secs, 300);
        assert!(config.output.path.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config: ProviderConfig = toml::from_str(
            r#"
            [catalog]
            prefix = ""
            exposed_by_default = false

            [registry]
            endpoint = "https://consul.internal:8501"
            token = "secret"

            [output]
            path = "/var/run/routing.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.catalog.prefix, "");
        assert!(!config.catalog.exposed_by_default);
        assert_eq!(config.catalog.domain, "localhost");
        assert_eq!(config.registry.endpoint, "https://consul.internal:8501");
        assert!(config.registry.passing_only);
        assert_eq!(config.output.path.as_deref(), Some("/var/run/routing.json"));
    }
}
