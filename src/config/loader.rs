// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! CNC and file loader configuration

use serde::{Deserialize, Serialize};

/// The CNC controller itself, as seen by the file loader service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CncConfig {
    /// IP address of the CNC, forwarded to the loader with each request
    pub ip_address: String,
}

impl Default for CncConfig {
    fn default() -> Self {
        Self {
            ip_address: "127.0.0.1".to_string(),
        }
    }
}

/// Companion HTTP service loading program files into the CNC's memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Base URL of the service; requests go to `<base_url>/load`
    pub base_url: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_loader_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_loader_timeout_ms() -> u64 {
    10_000
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://host.docker.internal:7083".to_string(),
            timeout_ms: default_loader_timeout_ms(),
        }
    }
}
