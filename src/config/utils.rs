// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::{debug, warn};

use super::{Config, CONFIG_SCHEMA};
use crate::transport::READY;

/// Largest status area the bridge will read in one request.
pub const MAX_STATUS_WORDS: u16 = 64;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// ### Example
///
/// ```bash
/// ./cnc_profinet_bridge --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// ### Validation Rules
///
/// - **Ports**: the PLC port and, when enabled, the simulator port must not be 0
/// - **Timeouts**: PLC and loader timeouts must be positive
/// - **Status area**: must start after the command quartet and hold 1 to 64 words
/// - **Loader URL**: must be an absolute `http` or `https` URL
/// - **Addresses**: a CNC address that is not an IP only raises a warning
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.plc.port == 0 {
        anyhow::bail!("PLC port must be between 1 and 65535");
    }
    if config.plc.timeout_ms == 0 {
        anyhow::bail!("PLC timeout must be greater than 0 ms");
    }
    if config.plc.status_register <= READY {
        anyhow::bail!(
            "Status area starting at register {} overlaps the command registers 0-{}",
            config.plc.status_register,
            READY
        );
    }
    if config.plc.status_word_count == 0 || config.plc.status_word_count > MAX_STATUS_WORDS {
        anyhow::bail!(
            "Status word count must be between 1 and {}, got {}",
            MAX_STATUS_WORDS,
            config.plc.status_word_count
        );
    }
    if config
        .plc
        .status_register
        .checked_add(config.plc.status_word_count)
        .is_none()
    {
        anyhow::bail!("Status area exceeds the register address space");
    }

    let loader_url = url::Url::parse(&config.loader.base_url)
        .with_context(|| format!("Invalid loader base URL: {}", config.loader.base_url))?;
    if !matches!(loader_url.scheme(), "http" | "https") {
        anyhow::bail!(
            "Loader base URL must use http or https, got {}",
            loader_url.scheme()
        );
    }
    if config.loader.timeout_ms == 0 {
        anyhow::bail!("Loader timeout must be greater than 0 ms");
    }

    if !is_valid_ip_address(&config.cnc.ip_address) {
        // The loader resolves it, just warn
        warn!(
            "CNC address '{}' is not an IP address",
            config.cnc.ip_address
        );
    }

    if config.simulator.enabled && config.simulator.port == 0 {
        anyhow::bail!("Simulator port must be between 1 and 65535");
    }

    Ok(())
}
