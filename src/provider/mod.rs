//! Catalog-to-routing-configuration provider.
//!
//! # Data Flow
//! ```text
//! ServiceRecord[] (one catalog snapshot)
//!     → builder.rs   filter exposed instances per service
//!     → ordering.rs  sort instances into a stable order
//!     → tags.rs      read routing attributes from tags
//!     → template.rs  render the frontend rule
//!     → naming.rs    assign frontend/backend/route/server ids
//!     → RoutingConfig
//!
//! Service listing snapshots:
//!     previous WatchState, current WatchState
//!     → diff.rs (added, removed)
//!     → registry::watch starts/stops service watches
//! ```
//!
//! # Design Decisions
//! - Everything here is synchronous and free of I/O
//! - A service's bad data only affects that service
//! - Same input snapshot, same output bytes

pub mod builder;
pub mod diff;
pub mod naming;
pub mod ordering;
pub mod tags;
pub mod template;

use serde::Serialize;

use crate::config::CatalogConfig;
use crate::provider::tags::TagAccessor;
use crate::provider::template::{RuleEngine, TemplateError};
use crate::routing::RoutingConfig;

/// Name this provider publishes its configuration under.
pub const PROVIDER_NAME: &str = "consul_catalog";

/// A configuration update for the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMessage {
    pub provider_name: &'static str,
    pub configuration: RoutingConfig,
}

impl ConfigMessage {
    pub fn new(configuration: RoutingConfig) -> Self {
        Self {
            provider_name: PROVIDER_NAME,
            configuration,
        }
    }
}

/// Compiled provider settings.
///
/// Construction compiles the default frontend rule, so a `CatalogProvider`
/// always holds a usable template.
#[derive(Debug, Clone)]
pub struct CatalogProvider {
    exposed_by_default: bool,
    rules: RuleEngine,
}

impl CatalogProvider {
    pub fn new(config: &CatalogConfig) -> Result<Self, TemplateError> {
        let accessor = TagAccessor::new(config.prefix.clone());
        let rules = RuleEngine::new(&config.frontend_rule, accessor, config.domain.clone())?;
        Ok(Self {
            exposed_by_default: config.exposed_by_default,
            rules,
        })
    }

    pub fn accessor(&self) -> &TagAccessor {
        self.rules.accessor()
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn exposed_by_default(&self) -> bool {
        self.exposed_by_default
    }
}
