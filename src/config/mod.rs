// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the CNC PROFINET bridge
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings for the bridge. The configuration is backed by a
//! YAML file and validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! - `plc`: Modbus TCP session to the PROFINET gateway (address, port, timeout, status area)
//! - `cnc`: the CNC controller as known by the file loader
//! - `loader`: companion HTTP service loading files into the CNC's memory
//! - `handshake`: status poller settings
//! - `simulator`: embedded simulated gateway
//!
//! ## Usage
//!
//! ```no_run
//! use cnc_profinet_bridge::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("192.168.0.20".to_string()),             // PLC address
//!     Some(502),                                    // PLC port
//!     Some("192.168.0.21".to_string()),             // CNC address
//!     Some("http://localhost:7083".to_string()),    // Loader URL
//!     false,                                        // Simulate
//! );
//! ```

pub mod loader;
pub mod plc;
pub mod simulator;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

// Re-export all types for public API
pub use loader::{CncConfig, LoaderConfig};
pub use plc::PlcConfig;
pub use simulator::{HandshakeConfig, SimulatorConfig};
pub use utils::{is_valid_ip_address, output_config_schema};

/// Embedded JSON schema of the configuration file.
pub const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Root configuration structure for the bridge.
///
/// The configuration is deserialized from and serialized to YAML using serde.
/// Before deserialization the document is validated against the embedded JSON
/// schema. Every section falls back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Modbus TCP session to the PLC gateway.
    #[serde(default)]
    pub plc: PlcConfig,

    /// The CNC controller targeted by file loads.
    #[serde(default)]
    pub cnc: CncConfig,

    /// Companion file loader service.
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Status poller settings.
    #[serde(default)]
    pub handshake: HandshakeConfig,

    /// Embedded simulated gateway.
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Creating sample configuration file at {:?}", sample_path);

        // Create parent directories if they don't exist
        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with the default configuration. A file that
    /// fails schema validation, deserialization or the additional rules makes
    /// this function write a `*.sample.yaml` next to it and return an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // First step: convert YAML to a generic Value
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;

        // Convert to JSON Value for validation
        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        let schema: serde_json::Value =
            serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        // Perform additional specific validations
        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Run the additional rules on an in-memory configuration.
    pub fn validate(&self) -> Result<()> {
        utils::validate_specific_rules(self)
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only values that are explicitly provided override the configuration.
    ///
    /// # Parameters
    ///
    /// * `plc_address` - Address of the PLC gateway
    /// * `plc_port` - Modbus TCP port of the PLC gateway
    /// * `cnc_address` - IP address of the CNC forwarded to the loader
    /// * `loader_url` - Base URL of the file loader service
    /// * `simulate` - If true, enables the embedded simulated gateway
    pub fn apply_args(
        &mut self,
        plc_address: Option<String>,
        plc_port: Option<u16>,
        cnc_address: Option<String>,
        loader_url: Option<String>,
        simulate: bool,
    ) {
        if let Some(address) = plc_address {
            debug!("Overriding PLC address from command line: {}", address);
            self.plc.address = address;
        }
        if let Some(port) = plc_port {
            debug!("Overriding PLC port from command line: {}", port);
            self.plc.port = port;
        }
        if let Some(address) = cnc_address {
            debug!("Overriding CNC address from command line: {}", address);
            self.cnc.ip_address = address;
        }
        if let Some(url) = loader_url {
            debug!("Overriding loader URL from command line: {}", url);
            self.loader.base_url = url;
        }
        if simulate {
            debug!("Enabling the simulated PLC gateway from command line");
            self.simulator.enabled = true;
        }
    }
}
