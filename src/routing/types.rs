//! Routing configuration handed to the proxy.
//!
//! All maps are ordered so that serializing an unchanged configuration
//! produces identical bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Complete routing configuration produced from one catalog snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoutingConfig {
    pub frontends: BTreeMap<String, Frontend>,
    pub backends: BTreeMap<String, Backend>,
}

impl RoutingConfig {
    pub fn is_empty(&self) -> bool {
        self.frontends.is_empty() && self.backends.is_empty()
    }

    /// Frontends whose backend id has no entry in `backends`.
    pub fn dangling_frontends(&self) -> Vec<&str> {
        self.frontends
            .iter()
            .filter(|(_, frontend)| !self.backends.contains_key(&frontend.backend))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// A named set of matching rules dispatching to one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Frontend {
    /// Backend id this frontend forwards to.
    pub backend: String,
    pub routes: BTreeMap<String, Route>,
    pub pass_host_header: bool,
    pub priority: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<String>,
    /// `user:hash` credentials.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub basic_auth: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub rule: String,
}

/// A pool of weighted servers plus balancing and resilience policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Backend {
    pub servers: BTreeMap<String, Server>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreaker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer: Option<LoadBalancer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_conn: Option<MaxConn>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub url: String,
    pub weight: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stickiness: Option<Stickiness>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stickiness {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
}

/// Connection limit; only emitted when both fields are known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxConn {
    pub amount: i64,
    pub extractor_func: String,
}
