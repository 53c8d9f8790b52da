//! Routing configuration model.
//!
//! # Data Flow
//! ```text
//! provider::builder
//!     → RoutingConfig { frontends, backends }
//!     → ConfigMessage (serialized as JSON for the proxy)
//! ```
//!
//! # Design Decisions
//! - Maps are ordered so equal configurations serialize to equal bytes
//! - Optional policies are omitted from the output, not emitted as null
//! - Field names follow the proxy's camelCase schema

pub mod types;

pub use types::{Backend, CircuitBreaker, Frontend, LoadBalancer, MaxConn, Route, RoutingConfig, Server, Stickiness};
