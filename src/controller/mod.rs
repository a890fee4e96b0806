// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Controller runtime: queues, caches, and the startup/shutdown protocol.
//!
//! One rate-limited queue exists per (resource type, change kind); a
//! dedicated worker drains each queue, so deliveries of the same key are
//! serialized within a queue while distinct queues run fully concurrently.
//! Enqueueing is gated on leadership at watch-event time: work already
//! queued when leadership is lost is still drained and applied.

pub mod endpoint;
pub mod namespace;
pub mod node;
pub mod pod;
pub mod service;

use crate::backend::{NetworkBackend, PortAssignment};
use crate::config::Config;
use crate::constants::annotations;
use crate::error::{Result, SwitchyardError};
use crate::leader::{Election, LeaderGate};
use crate::queue::{run_worker, WorkQueue};
use crate::watch::WatchCache;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Node, Pod, Service};
use kube::{Api, Client};
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

pub struct Controller {
    pub(crate) client: Client,
    pub(crate) config: Config,
    pub(crate) backend: Arc<dyn NetworkBackend>,
    pub(crate) leader: Arc<LeaderGate>,

    pub(crate) pods: Arc<WatchCache<Pod>>,
    pub(crate) namespaces: Arc<WatchCache<Namespace>>,
    pub(crate) nodes: Arc<WatchCache<Node>>,
    pub(crate) services: Arc<WatchCache<Service>>,
    pub(crate) endpoints: Arc<WatchCache<Endpoints>>,

    pub(crate) add_pod_queue: Arc<WorkQueue>,
    pub(crate) update_pod_queue: Arc<WorkQueue>,
    pub(crate) delete_pod_queue: Arc<WorkQueue>,
    pub(crate) add_namespace_queue: Arc<WorkQueue>,
    pub(crate) update_namespace_queue: Arc<WorkQueue>,
    pub(crate) delete_namespace_queue: Arc<WorkQueue>,
    pub(crate) add_node_queue: Arc<WorkQueue>,
    pub(crate) delete_node_queue: Arc<WorkQueue>,
    pub(crate) add_service_queue: Arc<WorkQueue>,
    pub(crate) update_service_queue: Arc<WorkQueue>,
    pub(crate) update_endpoint_queue: Arc<WorkQueue>,
}

impl Controller {
    pub fn new(client: Client, config: Config, backend: Arc<dyn NetworkBackend>) -> Arc<Self> {
        let leader = Arc::new(LeaderGate::new(&config.pod_name));

        Arc::new(Self {
            client,
            config,
            backend,
            leader,

            pods: WatchCache::new(),
            namespaces: WatchCache::new(),
            nodes: WatchCache::new(),
            services: WatchCache::new(),
            endpoints: WatchCache::new(),

            add_pod_queue: WorkQueue::new("AddPod"),
            update_pod_queue: WorkQueue::new("UpdatePod"),
            delete_pod_queue: WorkQueue::new("DeletePod"),
            add_namespace_queue: WorkQueue::new("AddNamespace"),
            update_namespace_queue: WorkQueue::new("UpdateNamespace"),
            delete_namespace_queue: WorkQueue::new("DeleteNamespace"),
            add_node_queue: WorkQueue::new("AddNode"),
            delete_node_queue: WorkQueue::new("DeleteNode"),
            add_service_queue: WorkQueue::new("AddService"),
            update_service_queue: WorkQueue::new("UpdateService"),
            update_endpoint_queue: WorkQueue::new("UpdateEndpoint"),
        })
    }

    /// Run the controller until the shutdown signal fires.
    ///
    /// Blocks until a leader exists, then until every cache has absorbed its
    /// initial listing, and only then starts the workers. A shutdown before
    /// the caches sync is fatal; after workers start it drains in-flight
    /// items and exits.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("starting network controller");

        let election = Election::new(
            self.client.clone(),
            &self.config.pod_namespace,
            Arc::clone(&self.leader),
        );
        tokio::spawn(election.run());
        self.leader.wait_for_any().await;

        let watch_tasks = vec![
            tokio::spawn(
                Arc::clone(&self.pods)
                    .run(Api::<Pod>::all(self.client.clone()), Arc::clone(&self)),
            ),
            tokio::spawn(
                Arc::clone(&self.namespaces)
                    .run(Api::<Namespace>::all(self.client.clone()), Arc::clone(&self)),
            ),
            tokio::spawn(
                Arc::clone(&self.nodes)
                    .run(Api::<Node>::all(self.client.clone()), Arc::clone(&self)),
            ),
            tokio::spawn(
                Arc::clone(&self.services)
                    .run(Api::<Service>::all(self.client.clone()), Arc::clone(&self)),
            ),
            tokio::spawn(
                Arc::clone(&self.endpoints)
                    .run(Api::<Endpoints>::all(self.client.clone()), Arc::clone(&self)),
            ),
        ];

        info!("waiting for caches to sync");
        let caches_synced = async {
            tokio::join!(
                self.pods.wait_until_synced(),
                self.namespaces.wait_until_synced(),
                self.nodes.wait_until_synced(),
                self.services.wait_until_synced(),
                self.endpoints.wait_until_synced(),
            );
        };
        tokio::select! {
            _ = caches_synced => info!("caches synced"),
            _ = shutdown.changed() => {
                return Err(SwitchyardError::StartupError(
                    "shut down before caches synced".to_string(),
                ));
            }
        }

        let workers = vec![
            spawn_worker(&self, &self.add_pod_queue, |c, key| async move {
                c.handle_add_pod(&key).await
            }),
            spawn_worker(&self, &self.update_pod_queue, |c, key| async move {
                c.handle_update_pod(&key).await
            }),
            spawn_worker(&self, &self.delete_pod_queue, |c, key| async move {
                c.handle_delete_pod(&key).await
            }),
            spawn_worker(&self, &self.add_namespace_queue, |c, key| async move {
                c.handle_add_namespace(&key).await
            }),
            spawn_worker(&self, &self.update_namespace_queue, |c, key| async move {
                c.handle_update_namespace(&key).await
            }),
            spawn_worker(&self, &self.delete_namespace_queue, |c, key| async move {
                c.handle_delete_namespace(&key).await
            }),
            spawn_worker(&self, &self.add_node_queue, |c, key| async move {
                c.handle_add_node(&key).await
            }),
            spawn_worker(&self, &self.delete_node_queue, |c, key| async move {
                c.handle_delete_node(&key).await
            }),
            spawn_worker(&self, &self.add_service_queue, |c, key| async move {
                c.handle_add_service(&key).await
            }),
            spawn_worker(&self, &self.update_service_queue, |c, key| async move {
                c.handle_update_service(&key).await
            }),
            spawn_worker(&self, &self.update_endpoint_queue, |c, key| async move {
                c.handle_update_endpoint(&key).await
            }),
        ];
        info!("started workers");

        let _ = shutdown.changed().await;
        info!("shutting down workers");
        for queue in self.queues() {
            queue.shut_down();
        }
        for worker in workers {
            let _ = worker.await;
        }
        for task in watch_tasks {
            task.abort();
        }
        Ok(())
    }

    fn queues(&self) -> [&Arc<WorkQueue>; 11] {
        [
            &self.add_pod_queue,
            &self.update_pod_queue,
            &self.delete_pod_queue,
            &self.add_namespace_queue,
            &self.update_namespace_queue,
            &self.delete_namespace_queue,
            &self.add_node_queue,
            &self.delete_node_queue,
            &self.add_service_queue,
            &self.update_service_queue,
            &self.update_endpoint_queue,
        ]
    }
}

/// Spawn the dedicated worker loop draining one queue into a handler.
fn spawn_worker<H, Fut>(
    ctrl: &Arc<Controller>,
    queue: &Arc<WorkQueue>,
    handler: H,
) -> JoinHandle<()>
where
    H: Fn(Arc<Controller>, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let ctrl = Arc::clone(ctrl);
    tokio::spawn(run_worker(Arc::clone(queue), move |key| {
        handler(Arc::clone(&ctrl), key)
    }))
}

/// The annotation payload recording a port assignment.
pub(crate) fn identity_annotations(
    nic: &PortAssignment,
    switch: &str,
    port_name: &str,
) -> serde_json::Value {
    let mut payload = serde_json::Map::new();
    payload.insert(annotations::IP_ADDRESS.to_string(), json!(nic.ip_address));
    payload.insert(annotations::MAC_ADDRESS.to_string(), json!(nic.mac_address));
    payload.insert(annotations::CIDR.to_string(), json!(nic.cidr));
    payload.insert(annotations::GATEWAY.to_string(), json!(nic.gateway));
    payload.insert(annotations::LOGICAL_SWITCH.to_string(), json!(switch));
    payload.insert(annotations::PORT_NAME.to_string(), json!(port_name));
    serde_json::Value::Object(payload)
}

/// JSON patch writing the whole annotations map: `add` when the object has
/// no annotations yet, `replace` otherwise. Existing annotations are
/// overwritten, not merged.
pub(crate) fn annotations_patch(
    existing: Option<&BTreeMap<String, String>>,
    value: serde_json::Value,
) -> Result<json_patch::Patch> {
    let op = if existing.map_or(true, |a| a.is_empty()) {
        "add"
    } else {
        "replace"
    };
    Ok(serde_json::from_value(json!([
        { "op": op, "path": "/metadata/annotations", "value": value }
    ]))?)
}

/// JSON patch setting one annotation key, leaving the rest of the map alone.
pub(crate) fn single_annotation_patch(
    existing: Option<&BTreeMap<String, String>>,
    key: &str,
    value: &str,
) -> Result<json_patch::Patch> {
    let doc = if existing.map_or(true, |a| a.is_empty()) {
        let mut map = serde_json::Map::new();
        map.insert(key.to_string(), json!(value));
        json!([
            { "op": "add", "path": "/metadata/annotations", "value": map }
        ])
    } else {
        json!([
            { "op": "add", "path": annotation_pointer(key), "value": value }
        ])
    };
    Ok(serde_json::from_value(doc)?)
}

/// JSON pointer addressing one annotation key, with `~` and `/` escaped.
pub(crate) fn annotation_pointer(key: &str) -> String {
    format!(
        "/metadata/annotations/{}",
        key.replace('~', "~0").replace('/', "~1")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment() -> PortAssignment {
        PortAssignment {
            ip_address: "100.64.0.2/16".to_string(),
            mac_address: "0a:00:00:00:00:01".to_string(),
            cidr: "100.64.0.0/16".to_string(),
            gateway: "100.64.0.1".to_string(),
        }
    }

    #[test]
    fn test_identity_annotations_carry_full_assignment() {
        let payload = identity_annotations(&assignment(), "node-switch", "node-node1");
        assert_eq!(payload[annotations::IP_ADDRESS], "100.64.0.2/16");
        assert_eq!(payload[annotations::MAC_ADDRESS], "0a:00:00:00:00:01");
        assert_eq!(payload[annotations::CIDR], "100.64.0.0/16");
        assert_eq!(payload[annotations::GATEWAY], "100.64.0.1");
        assert_eq!(payload[annotations::LOGICAL_SWITCH], "node-switch");
        assert_eq!(payload[annotations::PORT_NAME], "node-node1");
    }

    #[test]
    fn test_annotations_patch_adds_when_map_is_absent() {
        let patch = annotations_patch(None, json!({"a": "b"})).unwrap();
        let doc = serde_json::to_value(&patch).unwrap();
        assert_eq!(doc[0]["op"], "add");
        assert_eq!(doc[0]["path"], "/metadata/annotations");
    }

    #[test]
    fn test_annotations_patch_replaces_when_map_is_populated() {
        let mut existing = BTreeMap::new();
        existing.insert("other".to_string(), "annotation".to_string());

        let patch = annotations_patch(Some(&existing), json!({"a": "b"})).unwrap();
        let doc = serde_json::to_value(&patch).unwrap();
        assert_eq!(doc[0]["op"], "replace");
    }

    #[test]
    fn test_annotations_patch_adds_when_map_is_empty() {
        let existing = BTreeMap::new();
        let patch = annotations_patch(Some(&existing), json!({"a": "b"})).unwrap();
        let doc = serde_json::to_value(&patch).unwrap();
        assert_eq!(doc[0]["op"], "add");
    }

    #[test]
    fn test_annotation_pointer_escapes_slashes() {
        assert_eq!(
            annotation_pointer("switchyard.io/logical-switch"),
            "/metadata/annotations/switchyard.io~1logical-switch"
        );
    }

    #[test]
    fn test_single_annotation_patch_targets_one_key() {
        let mut existing = BTreeMap::new();
        existing.insert("other".to_string(), "annotation".to_string());

        let patch =
            single_annotation_patch(Some(&existing), "switchyard.io/logical-switch", "ls1")
                .unwrap();
        let doc = serde_json::to_value(&patch).unwrap();
        assert_eq!(doc[0]["op"], "add");
        assert_eq!(
            doc[0]["path"],
            "/metadata/annotations/switchyard.io~1logical-switch"
        );
        assert_eq!(doc[0]["value"], "ls1");
    }
}
