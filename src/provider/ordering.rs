//! Deterministic ordering of registry entries.
//!
//! Registries return instances in no particular order. Server ids carry the
//! instance's position, so entries are sorted before ids are assigned; an
//! unchanged instance set then yields the same ids on every poll.

use std::cmp::Ordering;

use crate::registry::ServiceInstance;

/// Total order: service, effective address, node address, port, then node
/// name and tags.
pub fn compare(a: &ServiceInstance, b: &ServiceInstance) -> Ordering {
    a.service
        .cmp(&b.service)
        .then_with(|| a.effective_address().cmp(b.effective_address()))
        .then_with(|| a.node_address.cmp(&b.node_address))
        .then_with(|| a.port.cmp(&b.port))
        .then_with(|| a.node.cmp(&b.node))
        .then_with(|| a.tags.cmp(&b.tags))
}

/// Sort `instances` in place.
pub fn normalize(instances: &mut [ServiceInstance]) {
    instances.sort_by(compare);
}
