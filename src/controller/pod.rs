// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pod reconciler - provisions a switch port per pod on its namespace's
//! logical switch and records the assignment in pod annotations.

use crate::constants::annotations;
use crate::controller::{annotations_patch, identity_annotations, Controller};
use crate::error::Result;
use crate::watch::{object_key, WatchHandler};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::Api;
use tracing::{debug, error, info};

impl Controller {
    pub(crate) fn enqueue_add_pod(&self, pod: &Pod) {
        if !self.leader.is_self() {
            return;
        }
        let key = object_key(pod);
        debug!("enqueue add pod {}", key);
        self.add_pod_queue.add_rate_limited(key);
    }

    pub(crate) fn enqueue_update_pod(&self, old: &Pod, new: &Pod) {
        if !self.leader.is_self() {
            return;
        }
        if old.metadata.resource_version == new.metadata.resource_version {
            return;
        }
        self.update_pod_queue.add_rate_limited(object_key(new));
    }

    pub(crate) fn enqueue_delete_pod(&self, pod: &Pod) {
        if !self.leader.is_self() {
            return;
        }
        let key = object_key(pod);
        debug!("enqueue delete pod {}", key);
        self.delete_pod_queue.add_rate_limited(key);
    }

    /// Provision the pod's switch port and record the assignment.
    pub(crate) async fn handle_add_pod(&self, key: &str) -> Result<()> {
        let Some(pod) = self.pods.get(key) else {
            return Ok(());
        };
        if pod
            .spec
            .as_ref()
            .and_then(|s| s.host_network)
            .unwrap_or(false)
        {
            debug!("pod {} uses host networking, skipping", key);
            return Ok(());
        }
        info!("add pod {}", key);

        let Some((namespace, name)) = key.split_once('/') else {
            // Pods are namespaced; a bare key cannot address one.
            return Ok(());
        };
        let switch = self.logical_switch_for_namespace(namespace);
        let port_name = format!("{}-{}", namespace, name);
        let nic = self
            .backend
            .create_port(&switch, &port_name, None, None)
            .await?;

        let payload = identity_annotations(&nic, &switch, &port_name);
        let patch = annotations_patch(pod.metadata.annotations.as_ref(), payload)?;
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        if let Err(e) = pods
            .patch(name, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
        {
            error!("patch pod {} failed: {}", key, e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Re-derive the pod's port; creation is idempotent, so this is the add
    /// path again.
    pub(crate) async fn handle_update_pod(&self, key: &str) -> Result<()> {
        self.handle_add_pod(key).await
    }

    /// Release the pod's switch port.
    pub(crate) async fn handle_delete_pod(&self, key: &str) -> Result<()> {
        info!("delete pod {}", key);
        let port_name = key.replace('/', "-");
        self.backend.delete_port(&port_name).await
    }

    /// The logical switch a namespace designates for its pods.
    fn logical_switch_for_namespace(&self, namespace: &str) -> String {
        self.namespaces
            .get(namespace)
            .and_then(|ns| {
                ns.metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(annotations::LOGICAL_SWITCH).cloned())
            })
            .unwrap_or_else(|| self.config.default_logical_switch.clone())
    }
}

impl WatchHandler<Pod> for Controller {
    fn on_add(&self, pod: &Pod) {
        self.enqueue_add_pod(pod);
    }

    fn on_update(&self, old: &Pod, new: &Pod) {
        self.enqueue_update_pod(old, new);
    }

    fn on_delete(&self, pod: &Pod) {
        self.enqueue_delete_pod(pod);
    }
}
