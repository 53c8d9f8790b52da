//! Watch-state diffing.
//!
//! Compares two snapshots of the watched service set by key only. Services
//! present in both snapshots are not reported even if their descriptor
//! changed; detecting that is the per-service watch's job.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Lightweight descriptor of a watched service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedService {
    pub name: String,
    pub tags: Vec<String>,
}

/// Services currently being watched, keyed by service name.
pub type WatchState = HashMap<String, WatchedService>;

/// Keys added in `current` and removed since `previous`.
pub fn changed_service_keys<V>(
    current: &HashMap<String, V>,
    previous: &HashMap<String, V>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let added = current
        .keys()
        .filter(|key| !previous.contains_key(*key))
        .cloned()
        .collect();
    let removed = previous
        .keys()
        .filter(|key| !current.contains_key(*key))
        .cloned()
        .collect();
    (added, removed)
}

/// Build a watch state from a registry service listing.
pub fn watch_state(services: &HashMap<String, Vec<String>>) -> WatchState {
    services
        .iter()
        .map(|(name, tags)| {
            (
                name.clone(),
                WatchedService {
                    name: name.clone(),
                    tags: tags.clone(),
                },
            )
        })
        .collect()
}
