// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error taxonomy of the bridge
//!
//! Every layer below the bridge façade reports failures with [`BridgeError`].
//! Nothing is retried automatically: a retried write could trigger a physical
//! action twice, so the caller always decides.

use thiserror::Error;

/// Errors raised by the address codec, the register transport, the handshake
/// protocol, the command dispatcher and the file loader.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid bit address '{address}': {reason}")]
    InvalidAddressFormat { address: String, reason: String },

    #[error("Bit {bit} of address '{address}' is out of range (0-7)")]
    BitOutOfRange { address: String, bit: u32 },

    #[error("Connection error with {endpoint}: {reason}")]
    ConnectionError { endpoint: String, reason: String },

    #[error("Transport error during {operation}: {reason}")]
    TransportError {
        operation: &'static str,
        reason: String,
    },

    #[error("Malformed arguments for command '{command}': {reason}")]
    MalformedArguments { command: String, reason: String },

    #[error("Unknown command '{0}'")]
    UnknownCommand(String),

    #[error("Error when sending command '{command}': {source}")]
    CommandExecutionError {
        command: String,
        #[source]
        source: Box<BridgeError>,
    },

    #[error("PLC is not ready for a new command (READY register = {ready})")]
    NotReady { ready: u16 },

    #[error("Flag '{0}' is driven by the CNC and cannot be written")]
    ReadOnlyFlag(&'static str),

    #[error("File loader error: {0}")]
    LoaderError(String),
}

impl BridgeError {
    /// Shorthand for an address parsing failure.
    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        BridgeError::InvalidAddressFormat {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a transport failure.
    pub(crate) fn transport(operation: &'static str, reason: impl ToString) -> Self {
        BridgeError::TransportError {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Wrap `self` with the name of the command that was being executed.
    pub fn in_command(self, command: &str) -> Self {
        match self {
            // Already carries a command name
            err @ BridgeError::CommandExecutionError { .. } => err,
            other => BridgeError::CommandExecutionError {
                command: command.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// True when the failure is at the connection level and the caller may
    /// want to reconnect before trying again.
    ///
    /// Protocol and application errors (bad address, unknown command, PLC not
    /// ready, Modbus exception) return `false`.
    pub fn is_connection_error(&self) -> bool {
        match self {
            BridgeError::ConnectionError { .. } => true,
            BridgeError::CommandExecutionError { source, .. } => source.is_connection_error(),
            _ => false,
        }
    }

    /// Name of the command attached to this error, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            BridgeError::MalformedArguments { command, .. }
            | BridgeError::CommandExecutionError { command, .. } => Some(command),
            BridgeError::UnknownCommand(command) => Some(command),
            _ => None,
        }
    }
}

/// Result type used across the bridge core.
pub type BridgeResult<T> = Result<T, BridgeError>;
