// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module provides a Modbus TCP server that plays the role of the
//! PROFINET gateway, so the bridge can run and be tested without hardware.
//!
//! ## Key Components
//!
//! - `PlcSimulatorService`: answers Modbus requests from a `SimulatedPlc` image
//! - `serve_simulator`: accept loop binding the service to a TCP listener
//!
//! ## Usage
//!
//! The simulator is started by the daemon when `simulator.enabled` is set
//! (or with `--simulate`):
//!
//! ```no_run
//! use cnc_profinet_bridge::modbus::serve_simulator;
//! use cnc_profinet_bridge::transport::{RegisterMap, SimulatedPlc};
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> std::io::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:5020").await?;
//! serve_simulator(listener, SimulatedPlc::new(RegisterMap::default())).await
//! # }
//! ```

pub mod plc_simulator;
pub use plc_simulator::{serve_simulator, PlcSimulatorService};
