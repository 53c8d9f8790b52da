//! Routing configuration builder.
//!
//! # Responsibilities
//! - Decide which instances of a service are exposed
//! - Read per-instance and per-service routing attributes
//! - Assemble one frontend and one backend per exposed service
//!
//! # Attribute Resolution
//! - Instance attributes (weight, protocol, enable, passHostHeader) are read
//!   from the instance's tags first, then from the service's attributes
//! - Backend and frontend policies are read from service attributes only
//! - Malformed values fall back to defaults; nothing aborts the build

use crate::observability::metrics;
use crate::provider::{naming, ordering, CatalogProvider};
use crate::registry::{ServiceInstance, ServiceRecord};
use crate::routing::{Backend, CircuitBreaker, Frontend, LoadBalancer, MaxConn, Route, RoutingConfig, Server, Stickiness};

pub const LABEL_ENABLE: &str = "enable";
pub const LABEL_PROTOCOL: &str = "protocol";
pub const LABEL_WEIGHT: &str = "backend.weight";
pub const LABEL_PASS_HOST_HEADER: &str = "backend.passHostHeader";
pub const LABEL_LOAD_BALANCER: &str = "backend.loadbalancer";
pub const LABEL_STICKINESS: &str = "backend.loadbalancer.stickiness";
pub const LABEL_STICKINESS_COOKIE: &str = "backend.loadbalancer.stickiness.cookieName";
pub const LABEL_CIRCUIT_BREAKER: &str = "backend.circuitbreaker";
pub const LABEL_MAXCONN_AMOUNT: &str = "backend.maxconn.amount";
pub const LABEL_MAXCONN_EXTRACTOR: &str = "backend.maxconn.extractorfunc";
pub const LABEL_BASIC_AUTH: &str = "frontend.auth.basic";
pub const LABEL_PRIORITY: &str = "frontend.priority";
pub const LABEL_ENTRY_POINTS: &str = "frontend.entryPoints";

pub const DEFAULT_WEIGHT: i64 = 1;
pub const DEFAULT_LOAD_BALANCER: &str = "wrr";

/// Why a service produced no configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skipped {
    NoExposedInstances,
    EmptyRule,
    RuleFailed,
}

impl CatalogProvider {
    /// Build the routing configuration for a catalog snapshot.
    pub fn build_config(&self, services: &[ServiceRecord]) -> RoutingConfig {
        let mut config = RoutingConfig::default();

        for service in services {
            match self.build_service(service) {
                Ok((frontend, backend)) => {
                    config.frontends.insert(naming::frontend_name(&service.name), frontend);
                    config.backends.insert(naming::backend_name(&service.name), backend);
                }
                Err(reason) => {
                    tracing::debug!(service = %service.name, reason = ?reason, "Service omitted from configuration");
                }
            }
        }

        metrics::record_config_build(config.frontends.len(), config.backends.len());
        config
    }

    /// Whether `instance` is exposed.
    ///
    /// A parsable `enable` attribute (instance tags first, then service
    /// attributes) overrides the default; anything else leaves it in place.
    pub fn node_filter(&self, instance: &ServiceInstance, service_attributes: &[String]) -> bool {
        let layers: [&[String]; 2] = [&instance.tags, service_attributes];
        self.accessor()
            .bool_attribute(LABEL_ENABLE, &layers)
            .unwrap_or(self.exposed_by_default())
    }

    fn build_service(&self, service: &ServiceRecord) -> Result<(Frontend, Backend), Skipped> {
        let attributes = service.attributes.as_slice();

        let mut instances: Vec<ServiceInstance> = service
            .instances
            .iter()
            .filter(|instance| self.node_filter(instance, attributes))
            .cloned()
            .collect();
        if instances.is_empty() {
            return Err(Skipped::NoExposedInstances);
        }
        ordering::normalize(&mut instances);

        let rule = self.frontend_rule(service)?;
        if rule.is_empty() {
            return Err(Skipped::EmptyRule);
        }

        let servers = instances
            .iter()
            .enumerate()
            .map(|(ordinal, instance)| (naming::server_name(instance, ordinal), self.server(instance, attributes)))
            .collect();

        let pass_host_header = {
            let layers: [&[String]; 2] = [&instances[0].tags, attributes];
            self.accessor()
                .bool_attribute(LABEL_PASS_HOST_HEADER, &layers)
                .unwrap_or(false)
        };

        let service_layer: [&[String]; 1] = [attributes];
        let mut routes = std::collections::BTreeMap::new();
        routes.insert(naming::route_name(&rule, &service.name), Route { rule });

        let frontend = Frontend {
            backend: naming::backend_name(&service.name),
            routes,
            pass_host_header,
            priority: self.accessor().int_attribute(LABEL_PRIORITY, &service_layer).unwrap_or(0),
            entry_points: self.accessor().list_attribute(LABEL_ENTRY_POINTS, &service_layer),
            basic_auth: self.accessor().list_attribute(LABEL_BASIC_AUTH, &service_layer),
        };

        let backend = Backend {
            servers,
            circuit_breaker: self.circuit_breaker(attributes),
            load_balancer: self.load_balancer(attributes),
            max_conn: self.max_conn(&service.name, attributes),
        };

        Ok((frontend, backend))
    }

    fn frontend_rule(&self, service: &ServiceRecord) -> Result<String, Skipped> {
        match self.rules().frontend_rule(&service.name, &service.attributes) {
            Ok(resolved) => {
                if let Some(error) = &resolved.override_error {
                    tracing::warn!(
                        service = %service.name,
                        error = %error,
                        "Custom frontend rule failed, using default rule"
                    );
                    metrics::record_rule_fallback();
                }
                Ok(resolved.rule)
            }
            Err(error) => {
                tracing::warn!(service = %service.name, error = %error, "Default frontend rule failed to render");
                metrics::record_rule_fallback();
                Err(Skipped::RuleFailed)
            }
        }
    }

    fn server(&self, instance: &ServiceInstance, attributes: &[String]) -> Server {
        let layers: [&[String]; 2] = [&instance.tags, attributes];
        let accessor = self.accessor();

        let weight = accessor.int_attribute(LABEL_WEIGHT, &layers).unwrap_or(DEFAULT_WEIGHT);
        let scheme = match accessor.find_layered(LABEL_PROTOCOL, &layers) {
            Some("https") => "https",
            Some("http") | None => "http",
            Some(other) => {
                tracing::debug!(service = %instance.service, protocol = %other, "Unsupported protocol, using http");
                "http"
            }
        };

        let address = instance.effective_address();
        let url = if address.contains(':') {
            format!("{}://[{}]:{}", scheme, address, instance.port)
        } else {
            format!("{}://{}:{}", scheme, address, instance.port)
        };

        Server { url, weight }
    }

    fn circuit_breaker(&self, attributes: &[String]) -> Option<CircuitBreaker> {
        self.accessor()
            .find(LABEL_CIRCUIT_BREAKER, attributes)
            .filter(|expression| !expression.is_empty())
            .map(|expression| CircuitBreaker {
                expression: expression.to_string(),
            })
    }

    fn load_balancer(&self, attributes: &[String]) -> Option<LoadBalancer> {
        let accessor = self.accessor();
        let layer: [&[String]; 1] = [attributes];

        let method = accessor.find(LABEL_LOAD_BALANCER, attributes).filter(|m| !m.is_empty());
        let stickiness = accessor
            .bool_attribute(LABEL_STICKINESS, &layer)
            .filter(|sticky| *sticky)
            .map(|_| Stickiness {
                cookie_name: accessor
                    .find(LABEL_STICKINESS_COOKIE, attributes)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string),
            });

        if method.is_none() && stickiness.is_none() {
            return None;
        }
        Some(LoadBalancer {
            method: method.unwrap_or(DEFAULT_LOAD_BALANCER).to_string(),
            stickiness,
        })
    }

    fn max_conn(&self, service: &str, attributes: &[String]) -> Option<MaxConn> {
        let accessor = self.accessor();
        let amount = accessor.find(LABEL_MAXCONN_AMOUNT, attributes).filter(|v| !v.is_empty());
        let extractor = accessor.find(LABEL_MAXCONN_EXTRACTOR, attributes).filter(|v| !v.is_empty());

        match (amount, extractor) {
            (Some(amount), Some(extractor)) => match amount.trim().parse::<i64>() {
                Ok(amount) => Some(MaxConn {
                    amount,
                    extractor_func: extractor.to_string(),
                }),
                Err(e) => {
                    tracing::warn!(service = %service, value = %amount, error = %e, "Invalid maxconn amount, omitting maxconn");
                    None
                }
            },
            (None, None) => None,
            _ => {
                tracing::debug!(service = %service, "Incomplete maxconn attributes, omitting maxconn");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::config::CatalogConfig;

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn provider(exposed_by_default: bool) -> CatalogProvider {
        CatalogProvider::new(&CatalogConfig {
            domain: "localhost".into(),
            prefix: "traefik".into(),
            exposed_by_default,
            frontend_rule: "Host:{{.ServiceName}}.{{.Domain}}".into(),
        })
        .unwrap()
    }

    fn instance(service: &str, address: &str, port: u16, instance_tags: &[&str]) -> ServiceInstance {
        ServiceInstance {
            service: service.into(),
            node: "localhost".into(),
            node_address: address.into(),
            address: address.into(),
            port,
            tags: tags(instance_tags),
        }
    }

    #[test]
    fn test_empty_catalog() {
        let config = provider(true).build_config(&[]);
        assert!(config.is_empty());
    }

    #[test]
    fn test_service_without_instances_is_omitted() {
        let services = vec![ServiceRecord {
            name: "test".into(),
            ..Default::default()
        }];
        assert!(provider(true).build_config(&services).is_empty());
    }

    #[test]
    fn test_full_service() {
        let services = vec![ServiceRecord {
            name: "test".into(),
            attributes: tags(&[
                "traefik.backend.loadbalancer=drr",
                "traefik.backend.circuitbreaker=NetworkErrorRatio() > 0.5",
                "random.foo=bar",
                "traefik.backend.maxconn.amount=1000",
                "traefik.backend.maxconn.extractorfunc=client.ip",
                "traefik.frontend.auth.basic=test:$apr1$H6uskkkW$IgXLP6ewTrSuBkTrqE8wj/,test2:$apr1$d9hr9HBB$4HxwgUir3HP4EsggP/QNo0",
            ]),
            instances: vec![instance(
                "test",
                "127.0.0.1",
                80,
                &[
                    "traefik.backend.weight=42",
                    "random.foo=bar",
                    "traefik.backend.passHostHeader=true",
                    "traefik.protocol=https",
                ],
            )],
        }];

        let config = provider(true).build_config(&services);

        let mut routes = BTreeMap::new();
        routes.insert(
            "route-host-test".to_string(),
            Route {
                rule: "Host:test.localhost".into(),
            },
        );
        let mut expected_frontends = BTreeMap::new();
        expected_frontends.insert(
            "frontend-test".to_string(),
            Frontend {
                backend: "backend-test".into(),
                routes,
                pass_host_header: true,
                priority: 0,
                entry_points: Vec::new(),
                basic_auth: tags(&[
                    "test:$apr1$H6uskkkW$IgXLP6ewTrSuBkTrqE8wj/",
                    "test2:$apr1$d9hr9HBB$4HxwgUir3HP4EsggP/QNo0",
                ]),
            },
        );

        let mut servers = BTreeMap::new();
        servers.insert(
            "test--127-0-0-1--80--traefik-backend-weight-42--random-foo-bar--traefik-backend-passHostHeader-true--traefik-protocol-https--0"
                .to_string(),
            Server {
                url: "https://127.0.0.1:80".into(),
                weight: 42,
            },
        );
        let mut expected_backends = BTreeMap::new();
        expected_backends.insert(
            "backend-test".to_string(),
            Backend {
                servers,
                circuit_breaker: Some(CircuitBreaker {
                    expression: "NetworkErrorRatio() > 0.5".into(),
                }),
                load_balancer: Some(LoadBalancer {
                    method: "drr".into(),
                    stickiness: None,
                }),
                max_conn: Some(MaxConn {
                    amount: 1000,
                    extractor_func: "client.ip".into(),
                }),
            },
        );

        assert_eq!(config.frontends, expected_frontends);
        assert_eq!(config.backends, expected_backends);
        assert!(config.dangling_frontends().is_empty());
    }

    #[test]
    fn test_node_filter() {
        let cases = [
            ("exposed", true, vec!["".to_string()], true),
            ("exposed and tolerated by valid label value", true, tags(&["", "traefik.enable=true"]), true),
            ("exposed and tolerated by invalid label value", true, tags(&["", "traefik.enable=bad"]), true),
            ("exposed but overridden by label", true, tags(&["", "traefik.enable=false"]), false),
            ("non-exposed", false, vec!["".to_string()], false),
            ("non-exposed but overridden by label", false, tags(&["", "traefik.enable=true"]), true),
        ];
        for (desc, exposed_by_default, instance_tags, expected) in cases {
            let mut node = instance("api", "10.0.0.1", 80, &[]);
            node.tags = instance_tags;
            assert_eq!(provider(exposed_by_default).node_filter(&node, &[]), expected, "{}", desc);
        }
    }

    #[test]
    fn test_service_level_enable() {
        let provider = provider(false);
        let node = instance("api", "10.0.0.1", 80, &[]);
        assert!(provider.node_filter(&node, &tags(&["traefik.enable=true"])));

        // instance tags win over service attributes
        let node = instance("api", "10.0.0.1", 80, &["traefik.enable=false"]);
        assert!(!provider.node_filter(&node, &tags(&["traefik.enable=true"])));
    }

    #[test]
    fn test_non_exposed_service_is_omitted() {
        let services = vec![ServiceRecord {
            name: "hidden".into(),
            attributes: Vec::new(),
            instances: vec![instance("hidden", "10.0.0.1", 80, &[])],
        }];
        assert!(provider(false).build_config(&services).is_empty());

        let services = vec![ServiceRecord {
            name: "off".into(),
            attributes: tags(&["traefik.enable=false"]),
            instances: vec![instance("off", "10.0.0.1", 80, &[])],
        }];
        assert!(provider(true).build_config(&services).is_empty());
    }

    #[test]
    fn test_defaults_and_malformed_values() {
        let services = vec![ServiceRecord {
            name: "web".into(),
            attributes: tags(&[
                "traefik.backend.maxconn.amount=lots",
                "traefik.backend.maxconn.extractorfunc=client.ip",
                "traefik.frontend.priority=high",
            ]),
            instances: vec![
                instance("web", "10.0.0.2", 8080, &["traefik.backend.weight=heavy", "traefik.protocol=gopher"]),
                instance("web", "10.0.0.1", 8080, &["traefik.backend.weight=0"]),
            ],
        }];
        let config = provider(true).build_config(&services);
        let backend = &config.backends["backend-web"];
        let servers: Vec<_> = backend.servers.iter().collect();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].0, "web--10-0-0-1--8080--traefik-backend-weight-0--0");
        assert_eq!(servers[0].1.weight, 0);
        assert_eq!(servers[0].1.url, "http://10.0.0.1:8080");
        assert_eq!(servers[1].1.weight, DEFAULT_WEIGHT);
        assert_eq!(servers[1].1.url, "http://10.0.0.2:8080");

        assert!(backend.max_conn.is_none());
        assert!(backend.load_balancer.is_none());
        assert!(backend.circuit_breaker.is_none());

        let frontend = &config.frontends["frontend-web"];
        assert_eq!(frontend.priority, 0);
        assert!(!frontend.pass_host_header);
        assert!(frontend.basic_auth.is_empty());
    }

    #[test]
    fn test_incomplete_maxconn_is_omitted() {
        let provider = provider(true);
        assert!(provider
            .max_conn("svc", &tags(&["traefik.backend.maxconn.amount=10"]))
            .is_none());
        assert!(provider
            .max_conn("svc", &tags(&["traefik.backend.maxconn.extractorfunc=client.ip"]))
            .is_none());
    }

    #[test]
    fn test_stickiness() {
        let provider = provider(true);
        assert!(provider.load_balancer(&[]).is_none());

        let lb = provider
            .load_balancer(&tags(&["traefik.backend.loadbalancer.stickiness=true"]))
            .unwrap();
        assert_eq!(lb.method, DEFAULT_LOAD_BALANCER);
        assert_eq!(lb.stickiness, Some(Stickiness { cookie_name: None }));

        let lb = provider
            .load_balancer(&tags(&[
                "traefik.backend.loadbalancer=drr",
                "traefik.backend.loadbalancer.stickiness=false",
            ]))
            .unwrap();
        assert!(lb.stickiness.is_none());

        let lb = provider
            .load_balancer(&tags(&[
                "traefik.backend.loadbalancer.stickiness=true",
                "traefik.backend.loadbalancer.stickiness.cookieName=route",
            ]))
            .unwrap();
        assert_eq!(lb.stickiness.unwrap().cookie_name.as_deref(), Some("route"));
    }

    #[test]
    fn test_frontend_extras() {
        let services = vec![ServiceRecord {
            name: "app".into(),
            attributes: tags(&[
                "traefik.frontend.rule=PathPrefix:{{getTag \"contextPath\" .Attributes \"/\"}}",
                "contextPath=/bar",
                "traefik.frontend.priority=10",
                "traefik.frontend.entryPoints=http,https",
                "traefik.backend.passHostHeader=true",
            ]),
            instances: vec![instance("app", "10.0.0.1", 80, &[])],
        }];
        let config = provider(true).build_config(&services);
        let frontend = &config.frontends["frontend-app"];
        assert_eq!(frontend.routes["route-pathprefix-app"].rule, "PathPrefix:/bar");
        assert_eq!(frontend.priority, 10);
        assert_eq!(frontend.entry_points, tags(&["http", "https"]));
        assert!(frontend.pass_host_header);
    }

    #[test]
    fn test_broken_rule_isolated_per_service() {
        let provider = CatalogProvider::new(&CatalogConfig {
            frontend_rule: "Host:{{getTag \"sub\" .Domain \"x\"}}".into(),
            ..Default::default()
        })
        .unwrap();
        let services = vec![
            ServiceRecord {
                name: "broken".into(),
                attributes: Vec::new(),
                instances: vec![instance("broken", "10.0.0.1", 80, &[])],
            },
            ServiceRecord {
                name: "custom".into(),
                attributes: tags(&["traefik.frontend.rule=Host:custom.example.com"]),
                instances: vec![instance("custom", "10.0.0.2", 80, &[])],
            },
        ];
        let config = provider.build_config(&services);
        assert!(!config.frontends.contains_key("frontend-broken"));
        assert!(!config.backends.contains_key("backend-broken"));
        assert_eq!(
            config.frontends["frontend-custom"].routes["route-host-custom"].rule,
            "Host:custom.example.com"
        );
    }

    #[test]
    fn test_empty_rule_is_omitted() {
        let services = vec![ServiceRecord {
            name: "blank".into(),
            attributes: tags(&["traefik.frontend.rule={{getTag \"nothing\" .Attributes \"\"}}"]),
            instances: vec![instance("blank", "10.0.0.1", 80, &[])],
        }];
        assert!(provider(true).build_config(&services).is_empty());
    }

    #[test]
    fn test_rebuild_is_stable_under_reordering() {
        let a = instance("web", "10.0.0.2", 80, &["x=1"]);
        let b = instance("web", "10.0.0.1", 80, &["x=2"]);
        let c = instance("web", "", 81, &[]);
        let mut c = c;
        c.node_address = "10.0.0.3".into();

        let first = vec![ServiceRecord {
            name: "web".into(),
            attributes: Vec::new(),
            instances: vec![a.clone(), b.clone(), c.clone()],
        }];
        let second = vec![ServiceRecord {
            name: "web".into(),
            attributes: Vec::new(),
            instances: vec![c, a, b],
        }];

        let provider = provider(true);
        let one = serde_json::to_string(&provider.build_config(&first)).unwrap();
        let two = serde_json::to_string(&provider.build_config(&second)).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn test_ipv6_server_url() {
        let provider = provider(true);
        let node = instance("v6", "fe80::1", 8080, &[]);
        assert_eq!(provider.server(&node, &[]).url, "http://[fe80::1]:8080");
    }
}
