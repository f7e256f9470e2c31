// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP register transport
//!
//! A persistent Modbus TCP client session to the PROFINET gateway. The bridge
//! is the Modbus client (master) and the gateway the server (slave).
//!
//! Every connect and request is bounded by the configured timeout. An I/O
//! failure or a timeout drops the session, so the next call reports
//! `ConnectionError` until [`RegisterTransport::connect`] is called again.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use super::RegisterTransport;
use crate::config::PlcConfig;
use crate::error::{BridgeError, BridgeResult};

/// Modbus TCP session to the PLC gateway.
pub struct ModbusTcpTransport {
    /// `host:port` of the gateway
    endpoint: String,
    /// Modbus unit identifier
    unit_id: u8,
    /// Deadline applied to connect and to every request
    timeout: Duration,
    /// Open client context, `None` while disconnected
    ctx: Option<Context>,
}

impl ModbusTcpTransport {
    /// Create a transport for `address:port`. No connection is made yet.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: format!("{}:{}", address.into(), port),
            unit_id: 1,
            timeout: Duration::from_secs(3),
            ctx: None,
        }
    }

    /// Create a transport from the `plc` configuration section.
    pub fn from_config(config: &PlcConfig) -> Self {
        Self::new(config.address.clone(), config.port)
            .with_unit_id(config.unit_id)
            .with_timeout(Duration::from_millis(config.timeout_ms))
    }

    /// Set the Modbus unit identifier (default 1).
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Set the per-operation timeout (default 3 s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `host:port` this transport talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn not_connected(&self) -> BridgeError {
        BridgeError::ConnectionError {
            endpoint: self.endpoint.clone(),
            reason: "not connected".to_string(),
        }
    }

    // The client context is not `Sync`: no `&self` across this await.
    async fn resolve(endpoint: String) -> BridgeResult<SocketAddr> {
        let mut addrs = match tokio::net::lookup_host(endpoint.clone()).await {
            Ok(addrs) => addrs,
            Err(e) => {
                return Err(BridgeError::ConnectionError {
                    endpoint,
                    reason: format!("cannot resolve address: {e}"),
                })
            }
        };
        addrs.next().ok_or(BridgeError::ConnectionError {
            endpoint,
            reason: "address resolved to nothing".to_string(),
        })
    }

    // The session is unusable after an I/O error or a timeout.
    fn drop_session(&mut self, operation: &'static str, reason: &str) {
        warn!(
            "Dropping Modbus session to {} after {} failure: {}",
            self.endpoint, operation, reason
        );
        self.ctx = None;
    }
}

#[async_trait]
impl RegisterTransport for ModbusTcpTransport {
    async fn connect(&mut self) -> BridgeResult<()> {
        if self.ctx.is_some() {
            debug!("Already connected to {}", self.endpoint);
            return Ok(());
        }

        let socket_addr = Self::resolve(self.endpoint.clone()).await?;
        info!(
            "Connecting to PLC gateway at {} (unit {})",
            socket_addr, self.unit_id
        );

        let ctx = timeout(self.timeout, tcp::connect_slave(socket_addr, Slave(self.unit_id)))
            .await
            .map_err(|_| BridgeError::ConnectionError {
                endpoint: self.endpoint.clone(),
                reason: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|e| BridgeError::ConnectionError {
                endpoint: self.endpoint.clone(),
                reason: e.to_string(),
            })?;

        self.ctx = Some(ctx);
        info!("Connected to PLC gateway at {}", self.endpoint);
        Ok(())
    }

    async fn read_holding_registers(&mut self, offset: u16, count: u16) -> BridgeResult<Vec<u16>> {
        const OPERATION: &str = "read holding registers";
        let deadline = self.timeout;
        let ctx = match self.ctx.as_mut() {
            Some(ctx) => ctx,
            None => return Err(self.not_connected()),
        };

        debug!("Reading {} holding registers starting from {}", count, offset);
        let result = timeout(deadline, ctx.read_holding_registers(offset, count)).await;
        let response = match result {
            Err(_) => {
                let reason = format!("timed out after {deadline:?}");
                self.drop_session(OPERATION, &reason);
                return Err(BridgeError::transport(OPERATION, reason));
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                self.drop_session(OPERATION, &reason);
                return Err(BridgeError::transport(OPERATION, reason));
            }
            Ok(Ok(response)) => response,
        };

        let values = response.map_err(|code| {
            BridgeError::transport(OPERATION, format!("modbus exception: {code}"))
        })?;

        if values.len() != count as usize {
            return Err(BridgeError::transport(
                OPERATION,
                format!("expected {} registers, received {}", count, values.len()),
            ));
        }

        debug!("Read registers {}..{}: {:?}", offset, offset.saturating_add(count), values);
        Ok(values)
    }

    async fn write_multiple_registers(&mut self, offset: u16, values: &[u16]) -> BridgeResult<()> {
        const OPERATION: &str = "write multiple registers";
        if values.len() < 2 {
            return Err(BridgeError::transport(
                OPERATION,
                format!("a paired write needs at least 2 values, got {}", values.len()),
            ));
        }

        let deadline = self.timeout;
        let ctx = match self.ctx.as_mut() {
            Some(ctx) => ctx,
            None => return Err(self.not_connected()),
        };

        debug!(
            "Writing {:?} to holding registers starting at {}",
            values, offset
        );
        let result = timeout(deadline, ctx.write_multiple_registers(offset, values)).await;
        let response = match result {
            Err(_) => {
                let reason = format!("timed out after {deadline:?}");
                self.drop_session(OPERATION, &reason);
                return Err(BridgeError::transport(OPERATION, reason));
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                self.drop_session(OPERATION, &reason);
                return Err(BridgeError::transport(OPERATION, reason));
            }
            Ok(Ok(response)) => response,
        };

        response
            .map_err(|code| BridgeError::transport(OPERATION, format!("modbus exception: {code}")))
    }

    async fn close(&mut self) -> BridgeResult<()> {
        if let Some(mut ctx) = self.ctx.take() {
            info!("Closing Modbus session to {}", self.endpoint);
            if let Err(e) = ctx.disconnect().await {
                // The socket is released either way
                warn!("Error while disconnecting from {}: {}", self.endpoint, e);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }
}
