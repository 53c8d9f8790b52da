//! Catalog provider library.
//!
//! Turns a service-registry catalog into routing configuration for a reverse
//! proxy, and keeps that configuration current while the catalog changes.

pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod provider;
pub mod registry;
pub mod resilience;
pub mod routing;

pub use config::ProviderConfig;
pub use lifecycle::Shutdown;
pub use provider::{CatalogProvider, ConfigMessage};
pub use routing::RoutingConfig;
