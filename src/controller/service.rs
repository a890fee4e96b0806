// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Service reconciler - a Service change re-derives the load-balancer state
//! for its key through the Endpoints synchronization path, since declared
//! ports and the cluster IP live on the Service.

use crate::controller::Controller;
use crate::error::Result;
use crate::watch::{object_key, WatchHandler};
use k8s_openapi::api::core::v1::Service;
use tracing::{debug, info};

impl Controller {
    pub(crate) fn enqueue_add_service(&self, svc: &Service) {
        if !self.leader.is_self() {
            return;
        }
        let key = object_key(svc);
        debug!("enqueue add service {}", key);
        self.add_service_queue.add_rate_limited(key);
    }

    pub(crate) fn enqueue_update_service(&self, old: &Service, new: &Service) {
        if !self.leader.is_self() {
            return;
        }
        if old.metadata.resource_version == new.metadata.resource_version {
            return;
        }
        // Only port or cluster-IP changes affect load-balancer state.
        let old_spec = old.spec.as_ref();
        let new_spec = new.spec.as_ref();
        let ports_unchanged = old_spec.and_then(|s| s.ports.as_ref())
            == new_spec.and_then(|s| s.ports.as_ref());
        let ip_unchanged = old_spec.and_then(|s| s.cluster_ip.as_ref())
            == new_spec.and_then(|s| s.cluster_ip.as_ref());
        if ports_unchanged && ip_unchanged {
            return;
        }
        self.update_service_queue.add_rate_limited(object_key(new));
    }

    pub(crate) async fn handle_add_service(&self, key: &str) -> Result<()> {
        info!("add service {}", key);
        self.handle_update_endpoint(key).await
    }

    pub(crate) async fn handle_update_service(&self, key: &str) -> Result<()> {
        info!("update service {}", key);
        self.handle_update_endpoint(key).await
    }
}

impl WatchHandler<Service> for Controller {
    fn on_add(&self, svc: &Service) {
        self.enqueue_add_service(svc);
    }

    fn on_update(&self, old: &Service, new: &Service) {
        self.enqueue_update_service(old, new);
    }

    fn on_delete(&self, _svc: &Service) {}
}
