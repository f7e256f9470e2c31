// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PLC gateway configuration
//!
//! This module defines the structure describing how to reach the
//! PROFINET/Modbus TCP gateway in front of the CNC's PLC.

use serde::{Deserialize, Serialize};

/// Configuration of the Modbus TCP session to the PLC gateway.
///
/// # Fields
///
/// * `address` - IP address or hostname of the gateway (default: 127.0.0.1)
/// * `port` - Modbus TCP port of the gateway (default: 502)
/// * `unit_id` - Modbus unit identifier (default: 1)
/// * `timeout_ms` - Deadline for connect and for each register request (default: 3000)
/// * `status_register` - First register of the CNC status area (default: 4)
/// * `status_word_count` - Number of status words in that area (default: 2)
///
/// # Example
///
/// ```
/// use cnc_profinet_bridge::config::PlcConfig;
///
/// let plc = PlcConfig {
///     address: "192.168.0.20".to_string(),
///     port: 502,
///     ..PlcConfig::default()
/// };
/// assert_eq!(plc.status_register, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// Network address of the gateway.
    pub address: String,

    /// The TCP port of the gateway.
    ///
    /// Valid range is 1-65535. Default value is 502, the standard Modbus TCP port.
    pub port: u16,

    /// Modbus unit identifier of the gateway.
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Timeout in milliseconds applied to connect and to every register request.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// First holding register of the CNC to automation status area.
    ///
    /// Must not overlap the command quartet (registers 0-3).
    #[serde(default = "default_status_register")]
    pub status_register: u16,

    /// Number of status words exposed in the status area.
    #[serde(default = "default_status_word_count")]
    pub status_word_count: u16,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_status_register() -> u16 {
    4
}

fn default_status_word_count() -> u16 {
    2
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 502,
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
            status_register: default_status_register(),
            status_word_count: default_status_word_count(),
        }
    }
}
