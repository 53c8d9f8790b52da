//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! Registry (Consul HTTP API)
//!     → consul.rs (blocking queries, JSON decoding)
//!     → CatalogClient trait (indexed snapshots)
//!     → watch.rs
//!         catalog loop: service list → diff → start/stop service watches
//!         service watch: instances → snapshot store → rebuild signal
//!     → provider (routing configuration)
//! ```
//!
//! # Design Decisions
//! - The client is a trait so watch logic is testable without a registry
//! - Snapshots are replaced, never patched
//! - Every long-poll is cancellable by dropping its future

pub mod consul;
pub mod watch;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One registry-reported endpoint of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInstance {
    /// Name of the service this instance implements.
    pub service: String,
    /// Registry node hosting the instance.
    pub node: String,
    /// Address of the node.
    pub node_address: String,
    /// Instance address; overrides the node address when non-empty.
    pub address: String,
    pub port: u16,
    /// Instance-level tags.
    pub tags: Vec<String>,
}

impl ServiceInstance {
    /// Instance address if set, else the node address.
    pub fn effective_address(&self) -> &str {
        if self.address.is_empty() {
            &self.node_address
        } else {
            &self.address
        }
    }
}

/// One logical service with its service-level attributes and current instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceRecord {
    pub name: String,
    /// Service-level tags.
    pub attributes: Vec<String>,
    pub instances: Vec<ServiceInstance>,
}

/// A registry response tagged with its change index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indexed<T> {
    pub index: u64,
    pub value: T,
}

/// Errors talking to the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Request could not be sent or the response could not be read.
    #[error("registry transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Registry answered with a non-success status.
    #[error("registry returned status {status} for {path}")]
    Status { status: u16, path: String },

    /// Response body did not match the expected shape.
    #[error("registry response decode error: {0}")]
    Decode(String),

    /// Registry endpoint is unusable.
    #[error("invalid registry endpoint: {0}")]
    Endpoint(String),
}

impl RegistryError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::Transport(_) => "transport",
            RegistryError::Status { .. } => "status",
            RegistryError::Decode(_) => "decode",
            RegistryError::Endpoint(_) => "endpoint",
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Read access to a service catalog with blocking-query semantics.
///
/// Both calls may block until the registry's index moves past `index`
/// (or a server-side wait elapses). Passing `0` returns immediately.
#[async_trait]
pub trait CatalogClient: Send + Sync + 'static {
    /// All known services mapped to their service-level tags.
    async fn services(&self, index: u64) -> RegistryResult<Indexed<HashMap<String, Vec<String>>>>;

    /// Current instances of one service.
    async fn service_instances(&self, service: &str, index: u64) -> RegistryResult<Indexed<Vec<ServiceInstance>>>;
}
