//! Consul HTTP API client.
//!
//! # Responsibilities
//! - Issue blocking queries against `/v1/catalog/services` and
//!   `/v1/health/service/<name>`
//! - Carry the change index from `X-Consul-Index` back to the caller
//! - Decode Consul's JSON into [`ServiceInstance`] values
//!
//! # Design Decisions
//! - The request timeout exceeds the blocking wait so a quiet catalog is not
//!   reported as a transport failure
//! - Bodies are decoded from bytes so shape errors surface as `Decode`

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use url::Url;

use crate::config::RegistryConfig;
use crate::registry::{CatalogClient, Indexed, RegistryError, RegistryResult, ServiceInstance};

const INDEX_HEADER: &str = "X-Consul-Index";
const TOKEN_HEADER: &str = "X-Consul-Token";

/// Extra time allowed on top of the blocking wait. Consul adds up to
/// wait/16 of its own jitter.
const REQUEST_SLACK: Duration = Duration::from_secs(5);

/// Catalog client backed by a Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http_client: HttpClient,
    base: Url,
    datacenter: Option<String>,
    token: Option<String>,
    wait: Duration,
    passing_only: bool,
}

impl ConsulClient {
    pub fn new(config: &RegistryConfig) -> RegistryResult<Self> {
        let base = Url::parse(&config.endpoint)
            .map_err(|e| RegistryError::Endpoint(format!("{}: {}", config.endpoint, e)))?;
        if base.cannot_be_a_base() {
            return Err(RegistryError::Endpoint(config.endpoint.clone()));
        }

        let wait = Duration::from_secs(config.wait_secs);
        let http_client = HttpClient::builder()
            .timeout(wait + wait / 16 + REQUEST_SLACK)
            .build()?;

        Ok(Self {
            http_client,
            base,
            datacenter: non_empty(&config.datacenter),
            token: non_empty(&config.token),
            wait,
            passing_only: config.passing_only,
        })
    }

    fn url(&self, segments: &[&str]) -> RegistryResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RegistryError::Endpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, url: Url, index: u64, passing: bool) -> RegistryResult<Indexed<Vec<u8>>> {
        let path = url.path().to_string();

        let mut query: Vec<(&str, String)> = Vec::with_capacity(4);
        if index > 0 {
            query.push(("index", index.to_string()));
            query.push(("wait", format!("{}s", self.wait.as_secs())));
        }
        if let Some(dc) = &self.datacenter {
            query.push(("dc", dc.clone()));
        }
        if passing {
            query.push(("passing", "1".to_string()));
        }

        let mut request = self.http_client.get(url).query(&query);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }

        tracing::trace!(path = %path, index, "Registry query");
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status {
                status: status.as_u16(),
                path,
            });
        }

        let index = parse_index(response.headers())?;
        let body = response.bytes().await?;
        Ok(Indexed {
            index,
            value: body.to_vec(),
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Read the change index of a blocking query response.
pub fn parse_index(headers: &HeaderMap) -> RegistryResult<u64> {
    let value = headers
        .get(INDEX_HEADER)
        .ok_or_else(|| RegistryError::Decode(format!("missing {} header", INDEX_HEADER)))?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| RegistryError::Decode(format!("invalid {} header: {:?}", INDEX_HEADER, value)))
}

/// Decode a `/v1/catalog/services` body.
pub fn decode_services(body: &[u8]) -> RegistryResult<HashMap<String, Vec<String>>> {
    let raw: HashMap<String, Option<Vec<String>>> =
        serde_json::from_slice(body).map_err(|e| RegistryError::Decode(e.to_string()))?;
    Ok(raw
        .into_iter()
        .map(|(name, tags)| (name, tags.unwrap_or_default()))
        .collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: HealthNode,
    service: HealthService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthNode {
    node: String,
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthService {
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Decode a `/v1/health/service/<name>` body.
pub fn decode_instances(body: &[u8]) -> RegistryResult<Vec<ServiceInstance>> {
    let entries: Vec<HealthEntry> =
        serde_json::from_slice(body).map_err(|e| RegistryError::Decode(e.to_string()))?;
    Ok(entries
        .into_iter()
        .map(|entry| ServiceInstance {
            service: entry.service.service,
            node: entry.node.node,
            node_address: entry.node.address,
            address: entry.service.address,
            port: entry.service.port,
            tags: entry.service.tags.unwrap_or_default(),
        })
        .collect())
}

#[async_trait]
impl CatalogClient for ConsulClient {
    async fn services(&self, index: u64) -> RegistryResult<Indexed<HashMap<String, Vec<String>>>> {
        let url = self.url(&["v1", "catalog", "services"])?;
        let response = self.get(url, index, false).await?;
        Ok(Indexed {
            index: response.index,
            value: decode_services(&response.value)?,
        })
    }

    async fn service_instances(&self, service: &str, index: u64) -> RegistryResult<Indexed<Vec<ServiceInstance>>> {
        let url = self.url(&["v1", "health", "service", service])?;
        let response = self.get(url, index, self.passing_only).await?;
        Ok(Indexed {
            index: response.index,
            value: decode_instances(&response.value)?,
        })
    }
}
