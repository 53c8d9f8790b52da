//! Catalog watching and configuration publishing.
//!
//! # Responsibilities
//! - Long-poll the service listing and diff it against the previous one
//! - Run one instance watch per listed service, stopped when it disappears
//! - Keep the latest snapshot of every watched service
//! - Rebuild and publish the routing configuration when it changes
//!
//! # Data Flow
//! ```text
//! catalog loop (single writer of WatchState)
//!     services(index) → watch_state → changed_service_keys
//!     → added:   insert snapshot, spawn service watch (child token)
//!     → removed: cancel token, drop snapshot
//!     → rebuild signal
//!
//! service watch (one task per service)
//!     service_instances(name, index) → snapshot.instances → rebuild signal
//!
//! publisher
//!     rebuild signal → snapshot copy → build_config
//!     → compare with last published → ConfigMessage
//! ```
//!
//! # Design Decisions
//! - Rebuild signals coalesce; one build covers any number of updates
//! - Cancelling a watch drops its in-flight query
//! - Registry errors back off and retry; they never end a watch

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::CatalogConfig;
use crate::observability::metrics;
use crate::provider::diff::{self, WatchState};
use crate::provider::template::TemplateError;
use crate::provider::{CatalogProvider, ConfigMessage};
use crate::registry::{CatalogClient, Indexed, RegistryError, ServiceInstance, ServiceRecord};
use crate::resilience::backoff::Backoff;
use crate::routing::RoutingConfig;

/// Retry timing for failed registry queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> Backoff {
        Backoff::new(self.base_delay_ms, self.max_delay_ms)
    }
}

/// Handle for replacing provider settings while the watcher runs.
#[derive(Clone)]
pub struct ProviderHandle {
    provider: Arc<ArcSwap<CatalogProvider>>,
    rebuild: Arc<Notify>,
}

impl ProviderHandle {
    /// Compile `config` and swap it in. The current settings stay in place
    /// when the default rule does not compile.
    pub fn reload(&self, config: &CatalogConfig) -> Result<(), TemplateError> {
        let provider = CatalogProvider::new(config)?;
        self.provider.store(Arc::new(provider));
        tracing::info!(domain = %config.domain, prefix = %config.prefix, "Catalog settings reloaded");
        self.rebuild.notify_one();
        Ok(())
    }

    pub fn current(&self) -> Arc<CatalogProvider> {
        self.provider.load_full()
    }
}

/// Watches a catalog and publishes routing configuration.
pub struct CatalogWatcher<C: CatalogClient> {
    client: Arc<C>,
    provider: Arc<ArcSwap<CatalogProvider>>,
    snapshots: Arc<DashMap<String, ServiceRecord>>,
    rebuild: Arc<Notify>,
    retry: RetryPolicy,
}

impl<C: CatalogClient> CatalogWatcher<C> {
    pub fn new(client: C, provider: CatalogProvider, retry: RetryPolicy) -> Self {
        Self {
            client: Arc::new(client),
            provider: Arc::new(ArcSwap::from_pointee(provider)),
            snapshots: Arc::new(DashMap::new()),
            rebuild: Arc::new(Notify::new()),
            retry,
        }
    }

    pub fn provider_handle(&self) -> ProviderHandle {
        ProviderHandle {
            provider: self.provider.clone(),
            rebuild: self.rebuild.clone(),
        }
    }

    /// Run until `token` is cancelled or the receiving side of `updates` closes.
    pub async fn run(self, token: CancellationToken, updates: mpsc::Sender<ConfigMessage>) {
        let publisher = Publisher {
            provider: self.provider.clone(),
            snapshots: self.snapshots.clone(),
            rebuild: self.rebuild.clone(),
            updates,
        };
        // The publisher stopping (receiver gone) ends the catalog loop too.
        let publisher_token = token.clone();
        let publisher = tokio::spawn(async move {
            publisher.run(&publisher_token).await;
            publisher_token.cancel();
        });

        self.watch_catalog(&token).await;

        if let Err(e) = publisher.await {
            tracing::error!(error = %e, "Publisher task failed");
        }
        tracing::info!("Catalog watcher stopped");
    }

    async fn watch_catalog(&self, token: &CancellationToken) {
        let mut state = WatchState::new();
        let mut watches: HashMap<String, (CancellationToken, JoinHandle<()>)> = HashMap::new();
        let mut index = 0u64;
        let mut backoff = self.retry.backoff();
        let mut first_listing = true;

        loop {
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = self.client.services(index) => result,
            };

            let Indexed { index: next, value } = match result {
                Ok(response) => {
                    backoff.reset();
                    response
                }
                Err(e) => {
                    if !retry_after_error(token, &mut backoff, &e, None).await {
                        break;
                    }
                    continue;
                }
            };
            index = next_index(index, next);

            let current = diff::watch_state(&value);
            let (added, removed) = diff::changed_service_keys(&current, &state);
            // The first listing always publishes, even when the catalog is empty.
            let mut changed = first_listing || !added.is_empty() || !removed.is_empty();
            first_listing = false;

            for name in &removed {
                if let Some((service_token, _)) = watches.remove(name) {
                    service_token.cancel();
                }
                self.snapshots.remove(name);
                tracing::info!(service = %name, "Service removed from catalog");
            }

            for (name, service) in &current {
                if added.contains(name) {
                    continue;
                }
                let attributes_changed = state.get(name).is_some_and(|previous| previous.tags != service.tags);
                if attributes_changed {
                    if let Some(mut record) = self.snapshots.get_mut(name) {
                        record.attributes = service.tags.clone();
                    }
                    changed = true;
                }
            }

            for name in &added {
                let attributes = current.get(name).map(|s| s.tags.clone()).unwrap_or_default();
                self.snapshots.insert(
                    name.clone(),
                    ServiceRecord {
                        name: name.clone(),
                        attributes,
                        instances: Vec::new(),
                    },
                );
                let service_token = token.child_token();
                let handle = tokio::spawn(watch_service(
                    self.client.clone(),
                    name.clone(),
                    self.snapshots.clone(),
                    self.rebuild.clone(),
                    service_token.clone(),
                    self.retry,
                ));
                watches.insert(name.clone(), (service_token, handle));
                tracing::info!(service = %name, "Service added to catalog");
            }

            state = current;
            metrics::record_watched_services(watches.len());

            if changed {
                self.rebuild.notify_one();
            }
        }

        for (_, (service_token, handle)) in watches.drain() {
            service_token.cancel();
            let _ = handle.await;
        }
        metrics::record_watched_services(0);
    }
}

/// Sleep out the backoff delay. Returns `false` if cancelled meanwhile.
async fn retry_after_error(
    token: &CancellationToken,
    backoff: &mut Backoff,
    error: &RegistryError,
    service: Option<&str>,
) -> bool {
    metrics::record_registry_error(error.kind());
    let delay = backoff.next_delay();
    tracing::warn!(
        service = service.unwrap_or("<catalog>"),
        error = %error,
        attempt = backoff.attempt(),
        delay_ms = delay.as_millis() as u64,
        "Registry query failed, retrying"
    );
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn watch_service<C: CatalogClient>(
    client: Arc<C>,
    name: String,
    snapshots: Arc<DashMap<String, ServiceRecord>>,
    rebuild: Arc<Notify>,
    token: CancellationToken,
    retry: RetryPolicy,
) {
    let mut index = 0u64;
    let mut backoff = retry.backoff();
    let mut last: Option<Vec<ServiceInstance>> = None;

    loop {
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = client.service_instances(&name, index) => result,
        };

        let Indexed { index: next, value } = match result {
            Ok(response) => {
                backoff.reset();
                response
            }
            Err(e) => {
                if !retry_after_error(&token, &mut backoff, &e, Some(&name)).await {
                    break;
                }
                continue;
            }
        };
        index = next_index(index, next);

        if last.as_ref() == Some(&value) || token.is_cancelled() {
            continue;
        }

        let updated = match snapshots.get_mut(&name) {
            Some(mut record) => {
                record.instances = value.clone();
                true
            }
            None => false,
        };
        if updated {
            tracing::debug!(service = %name, instances = value.len(), "Service instances changed");
            last = Some(value);
            rebuild.notify_one();
        }
    }

    tracing::debug!(service = %name, "Service watch stopped");
}

/// Index for the next blocking query. An index that moved backwards means
/// the registry's state was reset, so the next query starts over.
pub fn next_index(previous: u64, reported: u64) -> u64 {
    if reported < previous {
        0
    } else {
        reported
    }
}

/// Copy the current snapshots, ordered by service name.
pub fn collect_snapshot(snapshots: &DashMap<String, ServiceRecord>) -> Vec<ServiceRecord> {
    let mut services: Vec<ServiceRecord> = snapshots.iter().map(|entry| entry.value().clone()).collect();
    services.sort_by(|a, b| a.name.cmp(&b.name));
    services
}

struct Publisher {
    provider: Arc<ArcSwap<CatalogProvider>>,
    snapshots: Arc<DashMap<String, ServiceRecord>>,
    rebuild: Arc<Notify>,
    updates: mpsc::Sender<ConfigMessage>,
}

impl Publisher {
    async fn run(self, token: &CancellationToken) {
        let mut last: Option<RoutingConfig> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.rebuild.notified() => {}
            }

            let services = collect_snapshot(&self.snapshots);
            let configuration = self.provider.load().build_config(&services);

            if last.as_ref() == Some(&configuration) {
                tracing::debug!("Configuration unchanged, not publishing");
                continue;
            }

            tracing::info!(
                services = services.len(),
                frontends = configuration.frontends.len(),
                backends = configuration.backends.len(),
                "Publishing configuration"
            );
            last = Some(configuration.clone());

            if self.updates.send(ConfigMessage::new(configuration)).await.is_err() {
                tracing::warn!("Configuration receiver closed, stopping publisher");
                break;
            }
            metrics::record_publish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_index() {
        assert_eq!(next_index(0, 7), 7);
        assert_eq!(next_index(7, 7), 7);
        assert_eq!(next_index(7, 9), 9);
        assert_eq!(next_index(9, 3), 0);
    }

    #[test]
    fn test_collect_snapshot_is_sorted() {
        let snapshots = DashMap::new();
        for name in ["web", "api", "db"] {
            snapshots.insert(
                name.to_string(),
                ServiceRecord {
                    name: name.to_string(),
                    attributes: Vec::new(),
                    instances: vec![ServiceInstance {
                        service: name.to_string(),
                        ..Default::default()
                    }],
                },
            );
        }

        let names: Vec<String> = collect_snapshot(&snapshots).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["api", "db", "web"]);
    }

    #[test]
    fn test_provider_handle_keeps_settings_on_bad_rule() {
        let watcher = CatalogWatcher::new(NoCatalog, CatalogProvider::new(&CatalogConfig::default()).unwrap(), RetryPolicy::default());
        let handle = watcher.provider_handle();

        let broken = CatalogConfig {
            frontend_rule: "Host:{{.ServiceName".into(),
            ..Default::default()
        };
        assert!(handle.reload(&broken).is_err());
        assert_eq!(handle.current().rules().domain(), "localhost");

        let updated = CatalogConfig {
            domain: "example.org".into(),
            ..Default::default()
        };
        handle.reload(&updated).unwrap();
        assert_eq!(handle.current().rules().domain(), "example.org");
    }

    struct NoCatalog;

    #[async_trait::async_trait]
    impl CatalogClient for NoCatalog {
        async fn services(&self, _index: u64) -> crate::registry::RegistryResult<Indexed<HashMap<String, Vec<String>>>> {
            Err(RegistryError::Decode("empty".into()))
        }

        async fn service_instances(
            &self,
            _service: &str,
            _index: u64,
        ) -> crate::registry::RegistryResult<Indexed<Vec<ServiceInstance>>> {
            Err(RegistryError::Decode("empty".into()))
        }
    }
}
