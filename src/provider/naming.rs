//! Identifiers for generated frontends, backends, routes and servers.
//!
//! # Design Decisions
//! - Ids are pure functions of their inputs; no hashing, no counters
//! - Server ids end with the instance's ordinal in the normalized order,
//!   which keeps them distinct even when every other component matches
//! - Sanitizing is total: anything outside `[A-Za-z0-9-]` becomes `-`

use crate::registry::ServiceInstance;

const SEPARATOR: &str = "--";

/// Replace every character outside ASCII alphanumerics and `-` with `-`.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// Server id: `service--address--port--tag...--ordinal`.
pub fn server_name(instance: &ServiceInstance, ordinal: usize) -> String {
    let mut parts = vec![
        sanitize(&instance.service),
        sanitize(instance.effective_address()),
        instance.port.to_string(),
    ];
    parts.extend(instance.tags.iter().filter(|tag| !tag.is_empty()).map(|tag| sanitize(tag)));
    parts.push(ordinal.to_string());
    parts.join(SEPARATOR)
}

pub fn frontend_name(service: &str) -> String {
    format!("frontend-{}", service)
}

pub fn backend_name(service: &str) -> String {
    format!("backend-{}", service)
}

/// Route id keyed by the rule's matcher kind, e.g. `route-host-web` for `Host:...`.
pub fn route_name(rule: &str, service: &str) -> String {
    let kind = rule
        .split_once(':')
        .map(|(kind, _)| kind.trim())
        .filter(|kind| !kind.is_empty() && kind.chars().all(|c| c.is_ascii_alphabetic()))
        .map(|kind| kind.to_ascii_lowercase())
        .unwrap_or_else(|| "host".to_string());
    format!("route-{}-{}", sanitize(&kind), service)
}
