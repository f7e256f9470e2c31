// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Handshake polling and PLC simulator configuration

use serde::{Deserialize, Serialize};

/// Settings of the daemon's status poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Interval between two status polls, in milliseconds.
    /// `0` disables the poller.
    pub poll_interval_ms: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

/// Embedded Modbus TCP server simulating the PLC gateway.
///
/// When enabled, the daemon serves a simulated gateway on `address:port` and
/// the bridge connects to it instead of the `plc` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Flag to enable or disable the simulator.
    ///
    /// Disabled by default.
    pub enabled: bool,

    /// The network address the simulator binds to.
    pub address: String,

    /// The TCP port the simulator listens on.
    pub port: u16,

    /// Mirror the automation to CNC output image into the status area.
    #[serde(default = "default_loopback")]
    pub loopback: bool,
}

fn default_loopback() -> bool {
    true
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1".to_string(),
            port: 5020,
            loopback: default_loopback(),
        }
    }
}
