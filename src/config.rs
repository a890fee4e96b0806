// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;

/// Controller configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of this pod, used as the leader election identity
    pub pod_name: String,
    /// Namespace this pod runs in, where the election lease is kept
    pub pod_namespace: String,
    /// Address of the network backend northbound database
    pub nb_address: String,
    /// Logical router carrying node static routes
    pub cluster_router: String,
    /// Logical switch carrying node ports
    pub node_switch: String,
    /// Subnet of the node switch
    pub node_switch_cidr: String,
    /// Gateway of the node switch subnet
    pub node_switch_gateway: String,
    /// Logical switch for pods whose namespace does not designate one
    pub default_logical_switch: String,
    /// Load balancer carrying TCP service rules
    pub cluster_tcp_loadbalancer: String,
    /// Load balancer carrying UDP service rules
    pub cluster_udp_loadbalancer: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let pod_name = env::var("POD_NAME").context("POD_NAME environment variable not set")?;
        let pod_namespace =
            env::var("POD_NAMESPACE").context("POD_NAMESPACE environment variable not set")?;

        Ok(Config {
            pod_name,
            pod_namespace,
            nb_address: env_or("NB_ADDRESS", "tcp:127.0.0.1:6641"),
            cluster_router: env_or("CLUSTER_ROUTER", "cluster-router"),
            node_switch: env_or("NODE_SWITCH", "node-switch"),
            node_switch_cidr: env_or("NODE_SWITCH_CIDR", "100.64.0.0/16"),
            node_switch_gateway: env_or("NODE_SWITCH_GATEWAY", "100.64.0.1"),
            default_logical_switch: env_or("DEFAULT_LOGICAL_SWITCH", "cluster-default"),
            cluster_tcp_loadbalancer: env_or("CLUSTER_TCP_LOADBALANCER", "cluster-tcp-lb"),
            cluster_udp_loadbalancer: env_or("CLUSTER_UDP_LOADBALANCER", "cluster-udp-lb"),
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}
