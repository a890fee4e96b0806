// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! `ovn-nbctl` backed implementation of [`NetworkBackend`].
//!
//! Talks to the OVN northbound database through the CLI. Idempotency comes
//! from `--may-exist`/`--if-exists` on create/delete operations and from
//! writing load-balancer VIPs as column updates, which replace any prior
//! value for the same VIP.

use crate::backend::{NetworkBackend, PortAssignment};
use crate::error::{Result, SwitchyardError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Attempts to read a dynamically assigned address before giving up.
const DYNAMIC_ADDRESS_ATTEMPTS: u32 = 20;
/// Delay between those attempts.
const DYNAMIC_ADDRESS_RETRY_DELAY: Duration = Duration::from_millis(250);

pub struct NbctlClient {
    db_address: String,
    switch_cidr: String,
    switch_gateway: String,
}

impl NbctlClient {
    pub fn new(db_address: &str, switch_cidr: &str, switch_gateway: &str) -> Self {
        Self {
            db_address: db_address.to_string(),
            switch_cidr: switch_cidr.to_string(),
            switch_gateway: switch_gateway.to_string(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!("ovn-nbctl {}", args.join(" "));
        let output = Command::new("ovn-nbctl")
            .arg(format!("--db={}", self.db_address))
            .args(args)
            .output()
            .await
            .map_err(|e| SwitchyardError::BackendError(format!("failed to run ovn-nbctl: {}", e)))?;

        if !output.status.success() {
            return Err(SwitchyardError::BackendError(format!(
                "ovn-nbctl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Poll until the northbound daemon has assigned dynamic addresses to
    /// the port.
    async fn wait_dynamic_addresses(&self, port: &str) -> Result<String> {
        for _ in 0..DYNAMIC_ADDRESS_ATTEMPTS {
            let raw = self
                .run(&["get", "logical_switch_port", port, "dynamic_addresses"])
                .await?;
            let trimmed = raw.trim().trim_matches('"');
            if !trimmed.is_empty() && trimmed != "[]" {
                return Ok(trimmed.to_string());
            }
            tokio::time::sleep(DYNAMIC_ADDRESS_RETRY_DELAY).await;
        }
        Err(SwitchyardError::BackendError(format!(
            "no dynamic address assigned to port {}",
            port
        )))
    }

    fn assignment(&self, mac_address: String, ip: String) -> PortAssignment {
        let ip_address = if ip.contains('/') {
            ip
        } else {
            format!("{}/{}", ip, self.prefix_len())
        };
        PortAssignment {
            ip_address,
            mac_address,
            cidr: self.switch_cidr.clone(),
            gateway: self.switch_gateway.clone(),
        }
    }

    fn prefix_len(&self) -> &str {
        self.switch_cidr.split('/').nth(1).unwrap_or("24")
    }
}

#[async_trait]
impl NetworkBackend for NbctlClient {
    async fn create_port(
        &self,
        switch: &str,
        port: &str,
        ip: Option<&str>,
        mac: Option<&str>,
    ) -> Result<PortAssignment> {
        self.run(&["--may-exist", "lsp-add", switch, port]).await?;

        if let (Some(ip), Some(mac)) = (ip, mac) {
            let addresses = format!("{} {}", mac, ip);
            self.run(&["lsp-set-addresses", port, &addresses]).await?;
            return Ok(self.assignment(mac.to_string(), ip.to_string()));
        }

        self.run(&["lsp-set-addresses", port, "dynamic"]).await?;
        let raw = self.wait_dynamic_addresses(port).await?;
        let (mac_address, ip) = parse_dynamic_addresses(&raw)?;
        Ok(self.assignment(mac_address, ip))
    }

    async fn delete_port(&self, port: &str) -> Result<()> {
        self.run(&["--if-exists", "lsp-del", port]).await.map(drop)
    }

    async fn add_static_route(
        &self,
        policy: Option<&str>,
        destination: &str,
        nexthop: &str,
        router: &str,
    ) -> Result<()> {
        let policy_flag = format!("--policy={}", policy.unwrap_or("dst-ip"));
        self.run(&[
            "--may-exist",
            &policy_flag,
            "lr-route-add",
            router,
            destination,
            nexthop,
        ])
        .await
        .map(drop)
    }

    async fn delete_static_route(&self, destination: &str, router: &str) -> Result<()> {
        self.run(&["--if-exists", "lr-route-del", router, destination])
            .await
            .map(drop)
    }

    async fn create_load_balancer_rule(
        &self,
        load_balancer: &str,
        vip: &str,
        backends: &str,
    ) -> Result<()> {
        let column = format!("vips:\"{}\"=\"{}\"", vip, backends);
        self.run(&["set", "load_balancer", load_balancer, &column])
            .await
            .map(drop)
    }

    async fn delete_load_balancer_vip(&self, vip: &str, load_balancer: &str) -> Result<()> {
        let quoted = format!("\"{}\"", vip);
        self.run(&[
            "--if-exists",
            "remove",
            "load_balancer",
            load_balancer,
            "vips",
            &quoted,
        ])
        .await
        .map(drop)
    }
}

/// Parse the `dynamic_addresses` column value, `"<mac> <ip>"`.
fn parse_dynamic_addresses(raw: &str) -> Result<(String, String)> {
    let cleaned = raw.trim().trim_matches('"');
    let mut parts = cleaned.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(mac), Some(ip)) => Ok((mac.to_string(), ip.to_string())),
        _ => Err(SwitchyardError::BackendError(format!(
            "malformed dynamic address entry: {:?}",
            raw
        ))),
    }
}
