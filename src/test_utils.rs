// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mock Kubernetes API service and an in-memory network
//! backend recording every call.

use crate::backend::{NetworkBackend, PortAssignment};
use crate::config::Config;
use crate::error::{Result, SwitchyardError};
use async_trait::async_trait;
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// One request seen by the mock API service.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// A mock HTTP service that returns predefined responses based on request
/// method and path, recording every request it sees.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a response for requests matching the method and exact path
    pub fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses.lock().unwrap().insert(
            (method.to_string(), path.to_string()),
            (status, body.to_string()),
        );
        self
    }

    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    /// Every request recorded so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Recorded requests matching a method and path prefix
    pub fn requests_matching(&self, method: &str, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path.starts_with(path))
            .collect()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        // Try exact match first
        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Try prefix match for paths like /api/v1/namespaces/foo
        for ((m, p), resp) in responses.iter() {
            if m == method && path.starts_with(p) {
                return Some(resp.clone());
            }
        }

        None
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let response = self.find_response(&method, &path);
        let requests = Arc::clone(&self.requests);
        let (_parts, body) = req.into_parts();

        Box::pin(async move {
            let bytes = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
            requests.lock().unwrap().push(RecordedRequest {
                method,
                path,
                body: String::from_utf8_lossy(&bytes).to_string(),
            });

            match response {
                Some((status, body)) => Ok(Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(body.into_bytes()))
                    .unwrap()),
                None => {
                    // Default 404 for unmatched requests
                    let body = r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"not found","reason":"NotFound","code":404}"#;
                    Ok(Response::builder()
                        .status(404)
                        .header("content-type", "application/json")
                        .body(Body::from(body.as_bytes().to_vec()))
                        .unwrap())
                }
            }
        })
    }
}

/// Configuration with deterministic backend object names
pub fn test_config() -> Config {
    Config {
        pod_name: "switchyard-0".to_string(),
        pod_namespace: "kube-system".to_string(),
        nb_address: "tcp:127.0.0.1:6641".to_string(),
        cluster_router: "cluster-router".to_string(),
        node_switch: "node-switch".to_string(),
        node_switch_cidr: "100.64.0.0/16".to_string(),
        node_switch_gateway: "100.64.0.1".to_string(),
        default_logical_switch: "cluster-default".to_string(),
        cluster_tcp_loadbalancer: "cluster-tcp-lb".to_string(),
        cluster_udp_loadbalancer: "cluster-udp-lb".to_string(),
    }
}

/// Create a mock node JSON response
pub fn node_json(name: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": { "name": name, "uid": "test-uid" }
    })
    .to_string()
}

/// Create a mock pod JSON response
pub fn pod_json(namespace: &str, name: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": namespace, "uid": "test-uid" }
    })
    .to_string()
}

/// Create a mock namespace JSON response
pub fn namespace_json(name: &str) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name, "uid": "test-uid" }
    })
    .to_string()
}

/// One call issued against the [`MockBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreatePort {
        switch: String,
        port: String,
    },
    DeletePort {
        port: String,
    },
    AddStaticRoute {
        destination: String,
        nexthop: String,
        router: String,
    },
    DeleteStaticRoute {
        destination: String,
        router: String,
    },
    CreateLoadBalancerRule {
        load_balancer: String,
        vip: String,
        backends: String,
    },
    DeleteLoadBalancerVip {
        vip: String,
        load_balancer: String,
    },
}

/// In-memory [`NetworkBackend`] honoring the idempotency contracts:
/// repeated creates return the existing object, deletes of absent objects
/// succeed.
pub struct MockBackend {
    assignment: PortAssignment,
    calls: Mutex<Vec<BackendCall>>,
    ports: Mutex<HashMap<String, (String, PortAssignment)>>,
    routes: Mutex<HashMap<(String, String), String>>,
    vips: Mutex<HashMap<(String, String), String>>,
    fail_load_balancer: AtomicBool,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            assignment: PortAssignment {
                ip_address: "100.64.0.2/16".to_string(),
                mac_address: "0a:00:00:00:00:01".to_string(),
                cidr: "100.64.0.0/16".to_string(),
                gateway: "100.64.0.1".to_string(),
            },
            calls: Mutex::new(Vec::new()),
            ports: Mutex::new(HashMap::new()),
            routes: Mutex::new(HashMap::new()),
            vips: Mutex::new(HashMap::new()),
            fail_load_balancer: AtomicBool::new(false),
        })
    }

    /// Make every load-balancer operation fail until reset
    pub fn fail_load_balancer_calls(&self) {
        self.fail_load_balancer.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn port_count(&self) -> usize {
        self.ports.lock().unwrap().len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.lock().unwrap().len()
    }

    pub fn vip(&self, load_balancer: &str, vip: &str) -> Option<String> {
        self.vips
            .lock()
            .unwrap()
            .get(&(load_balancer.to_string(), vip.to_string()))
            .cloned()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl NetworkBackend for MockBackend {
    async fn create_port(
        &self,
        switch: &str,
        port: &str,
        _ip: Option<&str>,
        _mac: Option<&str>,
    ) -> Result<PortAssignment> {
        self.record(BackendCall::CreatePort {
            switch: switch.to_string(),
            port: port.to_string(),
        });
        let mut ports = self.ports.lock().unwrap();
        let (_, assignment) = ports
            .entry(port.to_string())
            .or_insert_with(|| (switch.to_string(), self.assignment.clone()));
        Ok(assignment.clone())
    }

    async fn delete_port(&self, port: &str) -> Result<()> {
        self.record(BackendCall::DeletePort {
            port: port.to_string(),
        });
        self.ports.lock().unwrap().remove(port);
        Ok(())
    }

    async fn add_static_route(
        &self,
        _policy: Option<&str>,
        destination: &str,
        nexthop: &str,
        router: &str,
    ) -> Result<()> {
        self.record(BackendCall::AddStaticRoute {
            destination: destination.to_string(),
            nexthop: nexthop.to_string(),
            router: router.to_string(),
        });
        self.routes.lock().unwrap().insert(
            (router.to_string(), destination.to_string()),
            nexthop.to_string(),
        );
        Ok(())
    }

    async fn delete_static_route(&self, destination: &str, router: &str) -> Result<()> {
        self.record(BackendCall::DeleteStaticRoute {
            destination: destination.to_string(),
            router: router.to_string(),
        });
        self.routes
            .lock()
            .unwrap()
            .remove(&(router.to_string(), destination.to_string()));
        Ok(())
    }

    async fn create_load_balancer_rule(
        &self,
        load_balancer: &str,
        vip: &str,
        backends: &str,
    ) -> Result<()> {
        if self.fail_load_balancer.load(Ordering::SeqCst) {
            return Err(SwitchyardError::BackendError(
                "injected load balancer failure".to_string(),
            ));
        }
        self.record(BackendCall::CreateLoadBalancerRule {
            load_balancer: load_balancer.to_string(),
            vip: vip.to_string(),
            backends: backends.to_string(),
        });
        self.vips.lock().unwrap().insert(
            (load_balancer.to_string(), vip.to_string()),
            backends.to_string(),
        );
        Ok(())
    }

    async fn delete_load_balancer_vip(&self, vip: &str, load_balancer: &str) -> Result<()> {
        if self.fail_load_balancer.load(Ordering::SeqCst) {
            return Err(SwitchyardError::BackendError(
                "injected load balancer failure".to_string(),
            ));
        }
        self.record(BackendCall::DeleteLoadBalancerVip {
            vip: vip.to_string(),
            load_balancer: load_balancer.to_string(),
        });
        self.vips
            .lock()
            .unwrap()
            .remove(&(load_balancer.to_string(), vip.to_string()));
        Ok(())
    }
}
