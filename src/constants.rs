// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Kubernetes annotation keys used by Switchyard to record network identities
pub mod annotations {
    /// Assigned IP address, in CIDR form
    pub const IP_ADDRESS: &str = "switchyard.io/ip-address";
    /// Assigned MAC address
    pub const MAC_ADDRESS: &str = "switchyard.io/mac-address";
    /// Subnet of the logical switch the port lives on
    pub const CIDR: &str = "switchyard.io/cidr";
    /// Gateway address of that subnet
    pub const GATEWAY: &str = "switchyard.io/gateway";
    /// Logical switch the port was created on
    pub const LOGICAL_SWITCH: &str = "switchyard.io/logical-switch";
    /// Name of the logical switch port
    pub const PORT_NAME: &str = "switchyard.io/port-name";
}

/// Leader election timing
pub mod election {
    /// Name of the Lease object realizing the election lock
    pub const LEASE_NAME: &str = "switchyard-leader";
    /// Time before the lease expires if not renewed, in seconds
    pub const LEASE_TTL_SECS: u64 = 15;
    /// How often the lease is renewed, in seconds
    pub const RENEW_INTERVAL_SECS: u64 = 5;
    /// Polling interval while waiting for any leader at startup, in seconds
    pub const WAIT_POLL_SECS: u64 = 1;
}

/// Work queue retry backoff
pub mod backoff {
    /// Delay applied to the first delivery attempt of a key, in milliseconds
    pub const BASE_DELAY_MS: u64 = 5;
    /// Cap on the delay between retries of a failing key, in seconds
    pub const MAX_DELAY_SECS: u64 = 1000;
}
