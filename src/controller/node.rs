// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Node reconciler - provisions a switch port and a static route per node
//! and records the assignment in node annotations.

use crate::controller::{annotations_patch, identity_annotations, Controller};
use crate::error::Result;
use crate::watch::{object_key, WatchHandler};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Patch, PatchParams};
use kube::Api;
use tracing::{debug, error, info};

impl Controller {
    pub(crate) fn enqueue_add_node(&self, node: &Node) {
        if !self.leader.is_self() {
            return;
        }
        let key = object_key(node);
        debug!("enqueue add node {}", key);
        self.add_node_queue.add_rate_limited(key);
    }

    pub(crate) fn enqueue_delete_node(&self, node: &Node) {
        if !self.leader.is_self() {
            return;
        }
        let key = object_key(node);
        debug!("enqueue delete node {}", key);
        self.delete_node_queue.add_rate_limited(key);
    }

    /// Provision the node's switch port, static route, and annotations.
    ///
    /// Every step is idempotent, so a retry after a partial failure
    /// completes the missing pieces without duplicating the done ones.
    pub(crate) async fn handle_add_node(&self, key: &str) -> Result<()> {
        let Some(node) = self.nodes.get(key) else {
            return Ok(());
        };
        info!("add node {}", key);

        let port_name = format!("node-{}", key);
        let nic = self
            .backend
            .create_port(&self.config.node_switch, &port_name, None, None)
            .await?;

        // An absent internal IP yields an empty destination and a degenerate
        // route; the object carries no address to do better with.
        let node_ip = node_internal_ip(&node);
        self.backend
            .add_static_route(
                None,
                &node_ip,
                nic.ip_without_prefix(),
                &self.config.cluster_router,
            )
            .await?;

        let payload = identity_annotations(&nic, &self.config.node_switch, &port_name);
        let patch = annotations_patch(node.metadata.annotations.as_ref(), payload)?;
        let nodes: Api<Node> = Api::all(self.client.clone());
        if let Err(e) = nodes
            .patch(key, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
        {
            error!("patch node {} failed: {}", key, e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Tear down the node's switch port and static route.
    ///
    /// The node is fetched directly from the API rather than the local
    /// cache, which may already have dropped the object during teardown.
    pub(crate) async fn handle_delete_node(&self, key: &str) -> Result<()> {
        info!("delete node {}", key);
        self.backend.delete_port(&format!("node-{}", key)).await?;

        let nodes: Api<Node> = Api::all(self.client.clone());
        let node = match nodes.get(key).await {
            Ok(node) => node,
            Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let node_ip = node_internal_ip(&node);
        self.backend
            .delete_static_route(&node_ip, &self.config.cluster_router)
            .await
    }
}

impl WatchHandler<Node> for Controller {
    fn on_add(&self, node: &Node) {
        self.enqueue_add_node(node);
    }

    fn on_update(&self, _old: &Node, _new: &Node) {}

    fn on_delete(&self, node: &Node) {
        self.enqueue_delete_node(node);
    }
}

/// First reported internal IP of the node, or empty when none is present.
fn node_internal_ip(node: &Node) -> String {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .into_iter()
        .flatten()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
        .unwrap_or_default()
}
