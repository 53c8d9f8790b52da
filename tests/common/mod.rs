//! Shared utilities for integration testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use catalog_provider::registry::{CatalogClient, Indexed, RegistryError, RegistryResult, ServiceInstance};
use catalog_provider::ConfigMessage;

#[derive(Default)]
struct State {
    services: HashMap<String, Vec<String>>,
    instances: HashMap<String, Vec<ServiceInstance>>,
}

struct Inner {
    state: Mutex<State>,
    version: watch::Sender<u64>,
    failures: AtomicU32,
}

/// An in-memory catalog with blocking-query semantics.
///
/// Every mutation bumps one global index, like a registry's raft index.
/// Queries with a non-zero index block until the index moves past it.
#[derive(Clone)]
pub struct InMemoryCatalog {
    inner: Arc<Inner>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        let (version, _) = watch::channel(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                version,
                failures: AtomicU32::new(0),
            }),
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut State)) {
        f(&mut self.inner.state.lock().unwrap());
        self.inner.version.send_modify(|v| *v += 1);
    }

    /// Register `service` with service-level tags and its instances.
    pub fn put_service(&self, service: &str, attributes: &[&str], instances: Vec<ServiceInstance>) {
        let service = service.to_string();
        let attributes = attributes.iter().map(|s| s.to_string()).collect();
        self.mutate(|state| {
            state.services.insert(service.clone(), attributes);
            state.instances.insert(service, instances);
        });
    }

    pub fn set_instances(&self, service: &str, instances: Vec<ServiceInstance>) {
        let service = service.to_string();
        self.mutate(|state| {
            state.instances.insert(service, instances);
        });
    }

    pub fn set_attributes(&self, service: &str, attributes: &[&str]) {
        let service = service.to_string();
        let attributes = attributes.iter().map(|s| s.to_string()).collect();
        self.mutate(|state| {
            state.services.insert(service, attributes);
        });
    }

    pub fn remove_service(&self, service: &str) {
        self.mutate(|state| {
            state.services.remove(service);
            state.instances.remove(service);
        });
    }

    /// Make the next `count` queries of any kind fail.
    pub fn fail_next(&self, count: u32) {
        self.inner.failures.store(count, Ordering::SeqCst);
    }

    async fn wait_past(&self, index: u64) -> RegistryResult<u64> {
        let take_failure = self
            .inner
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if take_failure {
            return Err(RegistryError::Status {
                status: 500,
                path: "/in-memory".into(),
            });
        }

        let mut rx = self.inner.version.subscribe();
        if index > 0 {
            rx.wait_for(|v| *v > index)
                .await
                .map_err(|e| RegistryError::Decode(e.to_string()))?;
        }
        let version = *rx.borrow();
        Ok(version)
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn services(&self, index: u64) -> RegistryResult<Indexed<HashMap<String, Vec<String>>>> {
        let index = self.wait_past(index).await?;
        let value = self.inner.state.lock().unwrap().services.clone();
        Ok(Indexed { index, value })
    }

    async fn service_instances(&self, service: &str, index: u64) -> RegistryResult<Indexed<Vec<ServiceInstance>>> {
        let index = self.wait_past(index).await?;
        let value = self
            .inner
            .state
            .lock()
            .unwrap()
            .instances
            .get(service)
            .cloned()
            .unwrap_or_default();
        Ok(Indexed { index, value })
    }
}

/// Build an instance whose node and instance address match.
#[allow(dead_code)]
pub fn instance(service: &str, address: &str, port: u16, tags: &[&str]) -> ServiceInstance {
    ServiceInstance {
        service: service.into(),
        node: format!("node-{}", address),
        node_address: address.into(),
        address: address.into(),
        port,
        tags: tags.iter().map(|s| s.to_string()).collect(),
    }
}

/// Receive messages until one satisfies `predicate`.
#[allow(dead_code)]
pub async fn next_matching<F>(rx: &mut mpsc::Receiver<ConfigMessage>, predicate: F) -> ConfigMessage
where
    F: Fn(&ConfigMessage) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let message = rx.recv().await.expect("publisher closed");
            if predicate(&message) {
                return message;
            }
        }
    })
    .await
    .expect("no matching configuration published")
}
