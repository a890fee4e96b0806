// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Network backend abstraction.
//!
//! Every operation is idempotent: creates succeed and return the existing
//! object when called again, deletes succeed when the object is already
//! gone. Reconcilers rely on this contract instead of application-level
//! locking when concurrent keys touch the same backend objects.

use crate::error::Result;
use async_trait::async_trait;

pub mod nbctl;

pub use nbctl::NbctlClient;

/// Addresses assigned to a logical switch port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortAssignment {
    /// Assigned IP address in CIDR form, e.g. `100.64.0.2/16`
    pub ip_address: String,
    /// Assigned MAC address
    pub mac_address: String,
    /// Subnet of the owning switch
    pub cidr: String,
    /// Gateway of the subnet
    pub gateway: String,
}

impl PortAssignment {
    /// The host portion of the assigned address, without the CIDR suffix.
    pub fn ip_without_prefix(&self) -> &str {
        self.ip_address.split('/').next().unwrap_or_default()
    }
}

/// Operations the controller issues against the software-defined network.
#[async_trait]
pub trait NetworkBackend: Send + Sync {
    /// Create a port on a logical switch. Calling again with the same name
    /// returns the existing assignment.
    async fn create_port(
        &self,
        switch: &str,
        port: &str,
        ip: Option<&str>,
        mac: Option<&str>,
    ) -> Result<PortAssignment>;

    /// Delete a port. Succeeds when the port does not exist.
    async fn delete_port(&self, port: &str) -> Result<()>;

    /// Install a static route on a logical router. Re-adding an identical
    /// route neither errors nor duplicates.
    async fn add_static_route(
        &self,
        policy: Option<&str>,
        destination: &str,
        nexthop: &str,
        router: &str,
    ) -> Result<()>;

    /// Remove a static route. Succeeds when the route is absent.
    async fn delete_static_route(&self, destination: &str, router: &str) -> Result<()>;

    /// Create or replace the rule for a VIP on a load balancer.
    async fn create_load_balancer_rule(
        &self,
        load_balancer: &str,
        vip: &str,
        backends: &str,
    ) -> Result<()>;

    /// Remove a VIP from a load balancer. Succeeds when the VIP is absent.
    async fn delete_load_balancer_vip(&self, vip: &str, load_balancer: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_without_prefix_strips_cidr_suffix() {
        let assignment = PortAssignment {
            ip_address: "100.64.0.2/16".to_string(),
            mac_address: "0a:00:00:00:00:01".to_string(),
            cidr: "100.64.0.0/16".to_string(),
            gateway: "100.64.0.1".to_string(),
        };
        assert_eq!(assignment.ip_without_prefix(), "100.64.0.2");
    }

    #[test]
    fn test_ip_without_prefix_passes_bare_address_through() {
        let assignment = PortAssignment {
            ip_address: "100.64.0.2".to_string(),
            mac_address: "0a:00:00:00:00:01".to_string(),
            cidr: "100.64.0.0/16".to_string(),
            gateway: "100.64.0.1".to_string(),
        };
        assert_eq!(assignment.ip_without_prefix(), "100.64.0.2");
    }
}
