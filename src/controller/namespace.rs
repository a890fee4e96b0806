// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Namespace reconciler - records the logical switch designated for a
//! namespace's pods.

use crate::constants::annotations;
use crate::controller::{single_annotation_patch, Controller};
use crate::error::Result;
use crate::watch::{object_key, WatchHandler};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Patch, PatchParams};
use kube::Api;
use tracing::{debug, error, info};

impl Controller {
    pub(crate) fn enqueue_add_namespace(&self, ns: &Namespace) {
        if !self.leader.is_self() {
            return;
        }
        self.add_namespace_queue.add_rate_limited(object_key(ns));
    }

    pub(crate) fn enqueue_update_namespace(&self, old: &Namespace, new: &Namespace) {
        if !self.leader.is_self() {
            return;
        }
        if old.metadata.resource_version == new.metadata.resource_version {
            return;
        }
        self.update_namespace_queue.add_rate_limited(object_key(new));
    }

    pub(crate) fn enqueue_delete_namespace(&self, ns: &Namespace) {
        if !self.leader.is_self() {
            return;
        }
        self.delete_namespace_queue.add_rate_limited(object_key(ns));
    }

    /// Ensure the namespace designates a logical switch for its pods. A
    /// switch already recorded by an operator is left untouched.
    pub(crate) async fn handle_add_namespace(&self, key: &str) -> Result<()> {
        let Some(ns) = self.namespaces.get(key) else {
            return Ok(());
        };

        let already_designated = ns
            .metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(annotations::LOGICAL_SWITCH));
        if already_designated {
            return Ok(());
        }
        info!("add namespace {}", key);

        let patch = single_annotation_patch(
            ns.metadata.annotations.as_ref(),
            annotations::LOGICAL_SWITCH,
            &self.config.default_logical_switch,
        )?;
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if let Err(e) = namespaces
            .patch(key, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
        {
            error!("patch namespace {} failed: {}", key, e);
            return Err(e.into());
        }
        Ok(())
    }

    pub(crate) async fn handle_update_namespace(&self, key: &str) -> Result<()> {
        self.handle_add_namespace(key).await
    }

    /// Nothing to tear down: switch lifecycle is outside the backend
    /// capability set and pod ports are released by the pod queue.
    pub(crate) async fn handle_delete_namespace(&self, key: &str) -> Result<()> {
        debug!("delete namespace {}", key);
        Ok(())
    }
}

impl WatchHandler<Namespace> for Controller {
    fn on_add(&self, ns: &Namespace) {
        self.enqueue_add_namespace(ns);
    }

    fn on_update(&self, old: &Namespace, new: &Namespace) {
        self.enqueue_update_namespace(old, new);
    }

    fn on_delete(&self, ns: &Namespace) {
        self.enqueue_delete_namespace(ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{namespace_json, test_config, MockBackend, MockService};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn make_namespace(name: &str, annotations: Option<BTreeMap<String, String>>) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn test_controller(mock: &MockService, backend: &Arc<MockBackend>) -> Arc<Controller> {
        Controller::new(
            mock.clone().into_client(),
            test_config(),
            Arc::clone(backend) as Arc<dyn crate::backend::NetworkBackend>,
        )
    }

    #[tokio::test]
    async fn test_add_namespace_designates_default_switch() {
        let mock =
            MockService::new().on_patch("/api/v1/namespaces/tenant", 200, &namespace_json("tenant"));
        let backend = MockBackend::new();
        let ctrl = test_controller(&mock, &backend);
        ctrl.namespaces.insert(make_namespace("tenant", None));

        ctrl.handle_add_namespace("tenant").await.unwrap();

        let patches = mock.requests_matching("PATCH", "/api/v1/namespaces/tenant");
        assert_eq!(patches.len(), 1);
        let doc: serde_json::Value = serde_json::from_str(&patches[0].body).unwrap();
        assert_eq!(doc[0]["op"], "add");
        assert_eq!(doc[0]["path"], "/metadata/annotations");
        assert_eq!(
            doc[0]["value"][annotations::LOGICAL_SWITCH],
            "cluster-default"
        );
    }

    #[tokio::test]
    async fn test_add_namespace_preserves_unrelated_annotations() {
        let mock =
            MockService::new().on_patch("/api/v1/namespaces/tenant", 200, &namespace_json("tenant"));
        let backend = MockBackend::new();
        let ctrl = test_controller(&mock, &backend);

        let mut existing = BTreeMap::new();
        existing.insert("team".to_string(), "platform".to_string());
        ctrl.namespaces.insert(make_namespace("tenant", Some(existing)));

        ctrl.handle_add_namespace("tenant").await.unwrap();

        let patches = mock.requests_matching("PATCH", "/api/v1/namespaces/tenant");
        let doc: serde_json::Value = serde_json::from_str(&patches[0].body).unwrap();
        // A targeted single-key add, not a whole-map write.
        assert_eq!(
            doc[0]["path"],
            "/metadata/annotations/switchyard.io~1logical-switch"
        );
    }

    #[tokio::test]
    async fn test_add_namespace_respects_existing_designation() {
        let mock = MockService::new();
        let backend = MockBackend::new();
        let ctrl = test_controller(&mock, &backend);

        let mut existing = BTreeMap::new();
        existing.insert(
            annotations::LOGICAL_SWITCH.to_string(),
            "tenant-switch".to_string(),
        );
        ctrl.namespaces.insert(make_namespace("tenant", Some(existing)));

        ctrl.handle_add_namespace("tenant").await.unwrap();
        assert!(mock.requests_matching("PATCH", "/api/v1/namespaces/tenant").is_empty());
    }

    #[tokio::test]
    async fn test_delete_namespace_is_a_no_op() {
        let mock = MockService::new();
        let backend = MockBackend::new();
        let ctrl = test_controller(&mock, &backend);

        ctrl.handle_delete_namespace("tenant").await.unwrap();
        assert!(backend.calls().is_empty());
        assert!(mock.requests().is_empty());
    }
}
