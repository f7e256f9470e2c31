// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! File loader client
//!
//! Program files are not transferred over the PLC link. A companion HTTP
//! service (a TNC Remo front-end) loads them into the CNC's memory when it
//! receives:
//!
//! ```text
//! POST <base_url>/load
//! {"filename": "<name>", "ip_address": "<cnc ip>"}
//! ```
//!
//! Exactly one request is sent per call, with no retry and no authentication.

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::{CncConfig, LoaderConfig};
use crate::error::{BridgeError, BridgeResult};

/// Body of a load request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLoadRequest {
    pub filename: String,
    pub ip_address: String,
}

/// HTTP client of the loader service.
#[derive(Debug, Clone)]
pub struct FileLoader {
    /// `<base_url>/load`
    endpoint: Url,
    /// CNC address forwarded with every request
    cnc_ip: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl FileLoader {
    /// Create a loader posting to `<base_url>/load` on behalf of `cnc_ip`.
    pub fn new(base_url: &str, cnc_ip: impl Into<String>) -> BridgeResult<Self> {
        let invalid = |e: url::ParseError| {
            BridgeError::LoaderError(format!("invalid base URL '{}': {}", base_url, e))
        };
        let mut base = Url::parse(base_url).map_err(invalid)?;
        // Keep any path prefix: "http://h/api" must become "http://h/api/load"
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join("load").map_err(invalid)?;

        Ok(Self {
            endpoint,
            cnc_ip: cnc_ip.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        })
    }

    /// Create a loader from the `loader` and `cnc` configuration sections.
    pub fn from_config(loader: &LoaderConfig, cnc: &CncConfig) -> BridgeResult<Self> {
        Ok(Self::new(&loader.base_url, cnc.ip_address.clone())?
            .with_timeout(Duration::from_millis(loader.timeout_ms)))
    }

    /// Set the request timeout (default 10 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL the requests are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Ask the loader service to load `filename` into the CNC.
    ///
    /// Returns the service's JSON response re-serialized as a string.
    ///
    /// # Errors
    ///
    /// `LoaderError` on a network failure or timeout, a non-2xx status, or a
    /// body that is not JSON.
    pub async fn load_file(&self, filename: &str) -> BridgeResult<String> {
        let request = FileLoadRequest {
            filename: filename.to_string(),
            ip_address: self.cnc_ip.clone(),
        };
        info!("Requesting load of '{}' on CNC {}", filename, self.cnc_ip);
        debug!("POST {} {:?}", self.endpoint, request);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!("Loader request for '{}' failed: {}", filename, e);
                BridgeError::LoaderError(format!("request to {} failed: {}", self.endpoint, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("Loader answered {} for '{}': {}", status, filename, error_text);
            return Err(BridgeError::LoaderError(format!(
                "HTTP {} - {}",
                status, error_text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::LoaderError(format!("invalid JSON response: {}", e)))?;
        debug!("Loader response: {}", body);
        Ok(body.to_string())
    }
}
