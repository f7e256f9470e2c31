// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register transport
//!
//! This module provides the register-level access to the PROFINET/Modbus
//! gateway in front of the CNC's PLC:
//! - `ModbusTcpTransport`: a persistent Modbus TCP session
//! - `SimulatedPlc`: an in-memory gateway image for tests and dry runs
//!
//! ## Register Map
//!
//! | Register | Name | Direction | Description |
//! |----------|------|-----------|-------------|
//! | 0 | CMD_WORD | write | Encoded bit address of the target flag |
//! | 1 | TRIGGER | write | Value to apply, always written together with CMD_WORD |
//! | 2 | RESULT | read | Acknowledgement from the CNC side (opaque) |
//! | 3 | READY | read | Non-zero when a new command may be issued |
//! | 4.. | status area | read | CNC to automation status bytes, one per register |
//!
//! The status area base and length come from the configuration.

pub mod modbus_tcp;
pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::PlcConfig;
use crate::error::BridgeResult;

pub use modbus_tcp::ModbusTcpTransport;
pub use simulated::{PlcOperation, SimulatedPlc};

/// Command word register: encoded bit address of the target flag.
pub const CMD_WORD: u16 = 0;
/// Trigger register: value paired with the command word.
pub const TRIGGER: u16 = 1;
/// Result register: synchronous acknowledgement from the CNC side.
pub const RESULT: u16 = 2;
/// Ready register: liveness flag checked before a new command.
pub const READY: u16 = 3;

/// Layout of the registers exchanged with the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    /// First register of the CNC to automation status area
    pub status_register: u16,
    /// Number of status words (bytes) in the status area
    pub status_word_count: u16,
}

impl RegisterMap {
    pub const CMD_WORD: u16 = CMD_WORD;
    pub const TRIGGER: u16 = TRIGGER;
    pub const RESULT: u16 = RESULT;
    pub const READY: u16 = READY;

    /// Register holding the given status word.
    pub fn status_word_register(&self, word_index: u16) -> u16 {
        self.status_register + word_index
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            status_register: 4,
            status_word_count: 2,
        }
    }
}

impl From<&PlcConfig> for RegisterMap {
    fn from(config: &PlcConfig) -> Self {
        Self {
            status_register: config.status_register,
            status_word_count: config.status_word_count,
        }
    }
}

/// Register-level access to the PLC gateway.
///
/// Implementations never retry on their own: a failed write is reported to
/// the caller, who decides whether sending it again is safe.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Establish the session. Calling it while connected is a no-op.
    async fn connect(&mut self) -> BridgeResult<()>;

    /// Read `count` holding registers starting at `offset` (function code 0x03).
    async fn read_holding_registers(&mut self, offset: u16, count: u16) -> BridgeResult<Vec<u16>>;

    /// Write two or more consecutive holding registers in a single request
    /// (function code 0x10).
    async fn write_multiple_registers(&mut self, offset: u16, values: &[u16]) -> BridgeResult<()>;

    /// Release the session. Safe to call multiple times.
    async fn close(&mut self) -> BridgeResult<()>;

    /// Whether a session is currently open.
    fn is_connected(&self) -> bool;
}

/// Transport shared between the dispatcher, the handshake and the daemon.
///
/// Every user holds the lock for its whole request sequence, which keeps
/// command/value pairs from different callers from interleaving.
pub type SharedTransport = Arc<Mutex<Box<dyn RegisterTransport>>>;

/// Wrap a transport for sharing.
pub fn shared<T: RegisterTransport + 'static>(transport: T) -> SharedTransport {
    Arc::new(Mutex::new(Box::new(transport)))
}
