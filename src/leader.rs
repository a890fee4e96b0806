// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Leader election gate for running multiple controller replicas safely.
//!
//! Only the replica holding the election lease enqueues work. The gate holds
//! the identity of the current holder as observed by the election loop; every
//! enqueue path reads it, the election loop is its only writer.

use crate::constants::election;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

/// Process-wide record of the current leader identity.
///
/// An empty identity means no leader is known. Writes are rare single
/// transitions from the election loop; reads happen on every watch event.
pub struct LeaderGate {
    identity: String,
    leader: RwLock<String>,
}

impl LeaderGate {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            leader: RwLock::new(String::new()),
        }
    }

    /// The identity this process campaigns with.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// True iff the recorded leader is this process.
    pub fn is_self(&self) -> bool {
        *self.leader.read().unwrap() == self.identity
    }

    /// True iff any leader is currently recorded.
    pub fn has_any(&self) -> bool {
        !self.leader.read().unwrap().is_empty()
    }

    /// Record the observed leader identity; empty clears it.
    pub fn set_leader(&self, identity: &str) {
        let mut leader = self.leader.write().unwrap();
        if *leader != identity {
            info!("leader changed to '{}'", identity);
        }
        *leader = identity.to_string();
    }

    /// Block until some replica holds leadership, polling at a fixed interval.
    pub async fn wait_for_any(&self) {
        loop {
            if self.has_any() {
                return;
            }
            info!("waiting for a leader");
            tokio::time::sleep(Duration::from_secs(election::WAIT_POLL_SECS)).await;
        }
    }
}

/// Election loop campaigning for the controller lease and publishing every
/// observed transition into the [`LeaderGate`].
pub struct Election {
    lease_lock: LeaseLock,
    gate: Arc<LeaderGate>,
    renew_interval: Duration,
}

impl Election {
    pub fn new(client: Client, namespace: &str, gate: Arc<LeaderGate>) -> Self {
        let lease_lock = LeaseLock::new(
            client,
            namespace,
            LeaseLockParams {
                holder_id: gate.identity().to_string(),
                lease_name: election::LEASE_NAME.to_string(),
                lease_ttl: Duration::from_secs(election::LEASE_TTL_SECS),
            },
        );

        Self {
            lease_lock,
            gate,
            renew_interval: Duration::from_secs(election::RENEW_INTERVAL_SECS),
        }
    }

    /// Campaign forever: try to acquire or renew the lease on every tick and
    /// publish the resulting holder into the gate.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.renew_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            match self.lease_lock.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {
                    self.gate.set_leader(self.gate.identity());
                }
                Ok(result) => {
                    let holder = result
                        .lease
                        .as_ref()
                        .and_then(|l| l.spec.as_ref())
                        .and_then(|s| s.holder_identity.clone())
                        .unwrap_or_default();
                    if self.gate.is_self() {
                        warn!(new_holder = %holder, "lost leadership");
                    }
                    self.gate.set_leader(&holder);
                }
                Err(e) => {
                    // Transient API failure: keep the last observed holder.
                    warn!(error = %e, "failed to refresh leader lease");
                }
            }
        }
    }
}
