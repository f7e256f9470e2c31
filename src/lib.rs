// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! CNC PROFINET bridge library
//!
//! This library drives a Heidenhain TNC7 through the PROFINET/Modbus TCP
//! gateway in front of its PLC, and triggers program loads through the
//! companion loader service.

pub mod address;
pub mod bridge;
pub mod config;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod loader;
pub mod modbus;
pub mod transport;

pub use bridge::CncBridge;
pub use error::{BridgeError, BridgeResult};
