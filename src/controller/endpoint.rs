// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Endpoints reconciler - derives load-balancer rules from Service/Endpoints
//! pairs sharing a key.

use crate::controller::Controller;
use crate::error::Result;
use crate::watch::{object_key, WatchHandler};
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::HashMap;
use tracing::{debug, error, info};

impl Controller {
    pub(crate) fn enqueue_add_endpoint(&self, ep: &Endpoints) {
        if !self.leader.is_self() {
            return;
        }
        self.update_endpoint_queue.add_rate_limited(object_key(ep));
    }

    pub(crate) fn enqueue_update_endpoint(&self, old: &Endpoints, new: &Endpoints) {
        if !self.leader.is_self() {
            return;
        }
        if old.metadata.resource_version == new.metadata.resource_version {
            return;
        }
        // Nothing to reconcile when the endpoints stayed empty.
        if subset_count(old) == 0 && subset_count(new) == 0 {
            return;
        }
        self.update_endpoint_queue.add_rate_limited(object_key(new));
    }

    /// Synchronize the load-balancer rules for one Service/Endpoints pair.
    ///
    /// Every declared Service port whose target resolves yields one VIP rule
    /// on the load balancer matching the port's protocol; a port without any
    /// backing address has its VIP removed instead.
    pub(crate) async fn handle_update_endpoint(&self, key: &str) -> Result<()> {
        let Some(ep) = self.endpoints.get(key) else {
            return Ok(());
        };
        let Some(svc) = self.services.get(key) else {
            return Ok(());
        };
        info!("update endpoint {}", key);

        let cluster_ip = svc
            .spec
            .as_ref()
            .and_then(|s| s.cluster_ip.as_deref())
            .unwrap_or("");
        if cluster_ip.is_empty() || cluster_ip == "None" {
            debug!("service {} is headless, skipping", key);
            return Ok(());
        }

        let (backends, port_by_name) = collect_subsets(&ep);

        let ports = svc.spec.as_ref().and_then(|s| s.ports.as_ref());
        for port in ports.into_iter().flatten() {
            let vip = format!("{}:{}", cluster_ip, port.port);
            let target_port = match port.target_port.as_ref() {
                Some(IntOrString::Int(n)) if *n != 0 => *n,
                Some(IntOrString::String(name)) => match port_by_name.get(name.as_str()) {
                    Some(p) => *p,
                    // No identity is known for this port; leave it alone.
                    None => continue,
                },
                _ => match port_by_name.get("") {
                    Some(p) => *p,
                    None => continue,
                },
            };

            let load_balancer = if matches!(port.protocol.as_deref(), None | Some("TCP")) {
                &self.config.cluster_tcp_loadbalancer
            } else {
                &self.config.cluster_udp_loadbalancer
            };

            if backends.is_empty() {
                // Drop the VIP rather than carrying a dead entry.
                if let Err(e) = self.backend.delete_load_balancer_vip(&vip, load_balancer).await {
                    error!("failed to delete vip {} from {}: {}", vip, load_balancer, e);
                    return Err(e);
                }
            } else {
                let targets = format_backends(&backends, target_port);
                if let Err(e) = self
                    .backend
                    .create_load_balancer_rule(load_balancer, &vip, &targets)
                    .await
                {
                    error!("failed to update vip {} on {}: {}", vip, load_balancer, e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

impl WatchHandler<Endpoints> for Controller {
    fn on_add(&self, ep: &Endpoints) {
        self.enqueue_add_endpoint(ep);
    }

    fn on_update(&self, old: &Endpoints, new: &Endpoints) {
        self.enqueue_update_endpoint(old, new);
    }

    fn on_delete(&self, _ep: &Endpoints) {}
}

fn subset_count(ep: &Endpoints) -> usize {
    ep.subsets.as_ref().map_or(0, |s| s.len())
}

/// Aggregate backing addresses and the named-port resolution map across all
/// subsets. Unnamed subset ports map from the empty string.
fn collect_subsets(ep: &Endpoints) -> (Vec<String>, HashMap<String, i32>) {
    let mut backends = Vec::new();
    let mut port_by_name = HashMap::new();
    for subset in ep.subsets.iter().flatten() {
        for addr in subset.addresses.iter().flatten() {
            if !addr.ip.is_empty() {
                backends.push(addr.ip.clone());
            }
        }
        for port in subset.ports.iter().flatten() {
            port_by_name.insert(port.name.clone().unwrap_or_default(), port.port);
        }
    }
    (backends, port_by_name)
}

/// Join backing addresses into the `ip:port` list a load-balancer rule takes.
fn format_backends(backends: &[String], target_port: i32) -> String {
    backends
        .iter()
        .map(|ip| format!("{}:{}", ip, target_port))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Controller;
    use crate::test_utils::{test_config, BackendCall, MockBackend, MockService};
    use k8s_openapi::api::core::v1::{
        EndpointAddress, EndpointPort, EndpointSubset, Service, ServicePort, ServiceSpec,
    };
    use kube::api::ObjectMeta;
    use std::sync::Arc;

    fn metadata(namespace: &str, name: &str, resource_version: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some(resource_version.to_string()),
            ..Default::default()
        }
    }

    fn make_service(cluster_ip: Option<&str>, ports: Vec<ServicePort>) -> Service {
        Service {
            metadata: metadata("default", "web", "1"),
            spec: Some(ServiceSpec {
                cluster_ip: cluster_ip.map(|s| s.to_string()),
                ports: Some(ports),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn make_port(port: i32, protocol: Option<&str>, target: Option<IntOrString>) -> ServicePort {
        ServicePort {
            port,
            protocol: protocol.map(|p| p.to_string()),
            target_port: target,
            ..Default::default()
        }
    }

    fn make_endpoints(addresses: Vec<&str>, ports: Vec<(&str, i32)>) -> Endpoints {
        Endpoints {
            metadata: metadata("default", "web", "1"),
            subsets: Some(vec![EndpointSubset {
                addresses: Some(
                    addresses
                        .into_iter()
                        .map(|ip| EndpointAddress {
                            ip: ip.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ports: Some(
                    ports
                        .into_iter()
                        .map(|(name, port)| EndpointPort {
                            name: (!name.is_empty()).then(|| name.to_string()),
                            port,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }]),
        }
    }

    fn test_controller(backend: &Arc<MockBackend>) -> Arc<Controller> {
        Controller::new(
            MockService::new().into_client(),
            test_config(),
            Arc::clone(backend) as Arc<dyn crate::backend::NetworkBackend>,
        )
    }

    #[tokio::test]
    async fn test_named_target_port_maps_vip_to_backends() {
        let backend = MockBackend::new();
        let ctrl = test_controller(&backend);
        ctrl.services.insert(make_service(
            Some("10.0.0.5"),
            vec![make_port(80, Some("TCP"), Some(IntOrString::String("http".to_string())))],
        ));
        ctrl.endpoints
            .insert(make_endpoints(vec!["10.1.1.2", "10.1.1.3"], vec![("http", 8080)]));

        ctrl.handle_update_endpoint("default/web").await.unwrap();

        assert_eq!(
            backend.calls(),
            vec![BackendCall::CreateLoadBalancerRule {
                load_balancer: "cluster-tcp-lb".to_string(),
                vip: "10.0.0.5:80".to_string(),
                backends: "10.1.1.2:8080,10.1.1.3:8080".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_zero_backends_deletes_the_vip() {
        let backend = MockBackend::new();
        let ctrl = test_controller(&backend);
        ctrl.services.insert(make_service(
            Some("10.0.0.5"),
            vec![make_port(80, Some("TCP"), Some(IntOrString::Int(8080)))],
        ));
        ctrl.endpoints
            .insert(make_endpoints(vec![], vec![("http", 8080)]));

        ctrl.handle_update_endpoint("default/web").await.unwrap();

        assert_eq!(
            backend.calls(),
            vec![BackendCall::DeleteLoadBalancerVip {
                vip: "10.0.0.5:80".to_string(),
                load_balancer: "cluster-tcp-lb".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_headless_service_produces_no_calls() {
        let backend = MockBackend::new();
        let ctrl = test_controller(&backend);
        ctrl.services.insert(make_service(
            Some("None"),
            vec![make_port(80, Some("TCP"), Some(IntOrString::Int(8080)))],
        ));
        ctrl.endpoints
            .insert(make_endpoints(vec!["10.1.1.2"], vec![("", 8080)]));

        ctrl.handle_update_endpoint("default/web").await.unwrap();
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_service_or_endpoints_is_success() {
        let backend = MockBackend::new();
        let ctrl = test_controller(&backend);

        // Neither object cached.
        ctrl.handle_update_endpoint("default/web").await.unwrap();

        // Endpoints without an owning Service.
        ctrl.endpoints
            .insert(make_endpoints(vec!["10.1.1.2"], vec![("", 8080)]));
        ctrl.handle_update_endpoint("default/web").await.unwrap();

        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_named_target_skips_only_that_port() {
        let backend = MockBackend::new();
        let ctrl = test_controller(&backend);
        ctrl.services.insert(make_service(
            Some("10.0.0.5"),
            vec![
                make_port(443, Some("TCP"), Some(IntOrString::String("https".to_string()))),
                make_port(80, Some("TCP"), Some(IntOrString::Int(8080))),
            ],
        ));
        ctrl.endpoints
            .insert(make_endpoints(vec!["10.1.1.2"], vec![("http", 8080)]));

        ctrl.handle_update_endpoint("default/web").await.unwrap();

        assert_eq!(
            backend.calls(),
            vec![BackendCall::CreateLoadBalancerRule {
                load_balancer: "cluster-tcp-lb".to_string(),
                vip: "10.0.0.5:80".to_string(),
                backends: "10.1.1.2:8080".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_udp_ports_use_the_udp_load_balancer() {
        let backend = MockBackend::new();
        let ctrl = test_controller(&backend);
        ctrl.services.insert(make_service(
            Some("10.0.0.5"),
            vec![make_port(53, Some("UDP"), Some(IntOrString::Int(5353)))],
        ));
        ctrl.endpoints
            .insert(make_endpoints(vec!["10.1.1.2"], vec![("", 5353)]));

        ctrl.handle_update_endpoint("default/web").await.unwrap();

        assert_eq!(
            backend.calls(),
            vec![BackendCall::CreateLoadBalancerRule {
                load_balancer: "cluster-udp-lb".to_string(),
                vip: "10.0.0.5:53".to_string(),
                backends: "10.1.1.2:5353".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_unnamed_target_resolves_through_unnamed_subset_port() {
        let backend = MockBackend::new();
        let ctrl = test_controller(&backend);
        ctrl.services
            .insert(make_service(Some("10.0.0.5"), vec![make_port(80, None, None)]));
        ctrl.endpoints
            .insert(make_endpoints(vec!["10.1.1.2"], vec![("", 8080)]));

        ctrl.handle_update_endpoint("default/web").await.unwrap();

        assert_eq!(
            backend.calls(),
            vec![BackendCall::CreateLoadBalancerRule {
                load_balancer: "cluster-tcp-lb".to_string(),
                vip: "10.0.0.5:80".to_string(),
                backends: "10.1.1.2:8080".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_backend_failure_aborts_remaining_ports() {
        let backend = MockBackend::new();
        backend.fail_load_balancer_calls();
        let ctrl = test_controller(&backend);
        ctrl.services.insert(make_service(
            Some("10.0.0.5"),
            vec![
                make_port(80, Some("TCP"), Some(IntOrString::Int(8080))),
                make_port(443, Some("TCP"), Some(IntOrString::Int(8443))),
            ],
        ));
        ctrl.endpoints
            .insert(make_endpoints(vec!["10.1.1.2"], vec![("", 8080)]));

        assert!(ctrl.handle_update_endpoint("default/web").await.is_err());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_suppressed_for_unchanged_resource_version() {
        let backend = MockBackend::new();
        let ctrl = test_controller(&backend);
        ctrl.leader.set_leader("switchyard-0");

        let ep = make_endpoints(vec!["10.1.1.2"], vec![("", 8080)]);
        ctrl.enqueue_update_endpoint(&ep, &ep);
        assert_eq!(ctrl.update_endpoint_queue.len(), 0);
    }

    #[tokio::test]
    async fn test_update_suppressed_when_subsets_stay_empty() {
        let backend = MockBackend::new();
        let ctrl = test_controller(&backend);
        ctrl.leader.set_leader("switchyard-0");

        let mut old = make_endpoints(vec![], vec![]);
        old.subsets = None;
        old.metadata.resource_version = Some("1".to_string());
        let mut new = old.clone();
        new.metadata.resource_version = Some("2".to_string());

        ctrl.enqueue_update_endpoint(&old, &new);
        assert_eq!(ctrl.update_endpoint_queue.len(), 0);

        // A transition out of empty is enqueued.
        let populated = make_endpoints(vec!["10.1.1.2"], vec![("", 8080)]);
        let mut populated_new = populated.clone();
        populated_new.metadata.resource_version = Some("3".to_string());
        ctrl.enqueue_update_endpoint(&old, &populated_new);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ctrl.update_endpoint_queue.len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_gated_on_leadership() {
        let backend = MockBackend::new();
        let ctrl = test_controller(&backend);

        let ep = make_endpoints(vec!["10.1.1.2"], vec![("", 8080)]);
        ctrl.enqueue_add_endpoint(&ep);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ctrl.update_endpoint_queue.len(), 0);

        ctrl.leader.set_leader("switchyard-0");
        ctrl.enqueue_add_endpoint(&ep);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(ctrl.update_endpoint_queue.len(), 1);
    }
}
