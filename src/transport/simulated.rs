// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated PLC gateway
//!
//! An in-memory model of the PROFINET/Modbus gateway used for tests and for
//! running the bridge without hardware (`--simulate`). The same image is
//! served over Modbus TCP by [`crate::modbus::PlcSimulatorService`].
//!
//! Behaviour:
//! - a write covering both `CMD_WORD` and `TRIGGER` applies the command: bit
//!   `CMD_WORD` of the automation to CNC output image is set (value != 0) or
//!   cleared (value == 0) and the value is echoed into `RESULT`
//! - `READY` reads 1, or 0 while the simulator is marked busy
//! - in loopback mode the status area mirrors the output image, otherwise it
//!   only changes through [`SimulatedPlc::set_status_bit`]
//! - only `CMD_WORD` and `TRIGGER` are writable

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use tokio_modbus::prelude::ExceptionCode;

use super::{RegisterMap, RegisterTransport, CMD_WORD, READY, RESULT, TRIGGER};
use crate::address::BitAddress;
use crate::error::{BridgeError, BridgeResult};

/// Size of the output area in bytes (`QX0.0` to `QX8191.7`).
const OUTPUT_AREA_BYTES: usize = 8192;

/// Most recent operations kept in the log; older entries are dropped.
pub const OPERATION_LOG_CAPACITY: usize = 1024;

/// One register operation seen by the simulator, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlcOperation {
    Read { offset: u16, count: u16 },
    Write { offset: u16, values: Vec<u16> },
}

/// Register image of the simulated gateway.
#[derive(Debug)]
pub struct PlcImage {
    map: RegisterMap,
    cmd_word: u16,
    trigger: u16,
    result: u16,
    busy: bool,
    loopback: bool,
    /// Automation to CNC output area, indexed by byte
    output: Vec<u8>,
    /// CNC to automation status bytes
    status: Vec<u8>,
    operations: VecDeque<PlcOperation>,
}

impl PlcImage {
    fn new(map: RegisterMap, loopback: bool) -> Self {
        Self {
            map,
            cmd_word: 0,
            trigger: 0,
            result: 0,
            busy: false,
            loopback,
            output: vec![0; OUTPUT_AREA_BYTES],
            status: vec![0; map.status_word_count as usize],
            operations: VecDeque::with_capacity(OPERATION_LOG_CAPACITY),
        }
    }

    /// Serve a read of `count` registers starting at `addr`.
    pub fn read(&mut self, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
        self.record(PlcOperation::Read {
            offset: addr,
            count: cnt,
        });

        let mut response_values = Vec::with_capacity(cnt.into());
        for i in 0..cnt {
            let reg_addr = addr.checked_add(i).ok_or(ExceptionCode::IllegalDataAddress)?;
            match self.register(reg_addr) {
                Some(value) => response_values.push(value),
                None => {
                    error!(
                        "Exception::IllegalDataAddress - Register {} not mapped",
                        reg_addr
                    );
                    return Err(ExceptionCode::IllegalDataAddress);
                }
            }
        }

        debug!("Simulator read {} registers from {}", cnt, addr);
        Ok(response_values)
    }

    /// Serve a write of `values` starting at `addr`.
    pub fn write(&mut self, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        self.record(PlcOperation::Write {
            offset: addr,
            values: values.to_vec(),
        });

        // The whole request is rejected before any register changes
        let first = addr as usize;
        if let Some(reg_addr) = (first..first + values.len()).find(|r| !is_writable(*r)) {
            error!(
                "Exception::IllegalDataAddress - Register {} is not writable",
                reg_addr
            );
            return Err(ExceptionCode::IllegalDataAddress);
        }

        for (i, value) in values.iter().enumerate() {
            if first + i == CMD_WORD as usize {
                self.cmd_word = *value;
            } else {
                self.trigger = *value;
            }
        }

        // A command is only applied when the word and its value arrive together
        let covers_pair = addr == CMD_WORD && values.len() >= 2;
        if covers_pair {
            self.apply_command();
        }
        Ok(())
    }

    fn record(&mut self, operation: PlcOperation) {
        if self.operations.len() == OPERATION_LOG_CAPACITY {
            self.operations.pop_front();
        }
        self.operations.push_back(operation);
    }

    fn apply_command(&mut self) {
        let target = BitAddress::from_offset(self.cmd_word);
        let byte = target.byte() as usize;
        let mask = 1u8 << target.bit();
        if self.trigger != 0 {
            self.output[byte] |= mask;
        } else {
            self.output[byte] &= !mask;
        }
        self.result = self.trigger;
        debug!(
            "Simulator applied {} = {} (output byte {} = {:#010b})",
            target, self.trigger, byte, self.output[byte]
        );
    }

    fn register(&self, addr: u16) -> Option<u16> {
        match addr {
            CMD_WORD => Some(self.cmd_word),
            TRIGGER => Some(self.trigger),
            RESULT => Some(self.result),
            READY => Some(if self.busy { 0 } else { 1 }),
            a if a >= self.map.status_register
                && a - self.map.status_register < self.map.status_word_count =>
            {
                let index = (a - self.map.status_register) as usize;
                Some(self.status_byte(index) as u16)
            }
            _ => None,
        }
    }

    fn status_byte(&self, index: usize) -> u8 {
        let area = if self.loopback {
            &self.output
        } else {
            &self.status
        };
        area.get(index).copied().unwrap_or(0)
    }

    /// Byte of the automation to CNC output area.
    pub fn output_byte(&self, byte: u16) -> u8 {
        self.output.get(byte as usize).copied().unwrap_or(0)
    }
}

fn is_writable(register: usize) -> bool {
    register == CMD_WORD as usize || register == TRIGGER as usize
}

/// In-memory gateway implementing [`RegisterTransport`].
///
/// Clones share the same image, so a test can keep a handle for inspection
/// while the bridge owns another.
#[derive(Clone)]
pub struct SimulatedPlc {
    image: Arc<Mutex<PlcImage>>,
    connected: bool,
    offline: Arc<Mutex<bool>>,
    latency: Duration,
}

impl SimulatedPlc {
    /// Simulator with the given register layout, status area in loopback mode.
    pub fn new(map: RegisterMap) -> Self {
        Self::with_loopback(map, true)
    }

    /// Simulator with an explicit loopback setting.
    pub fn with_loopback(map: RegisterMap, loopback: bool) -> Self {
        Self {
            image: Arc::new(Mutex::new(PlcImage::new(map, loopback))),
            connected: false,
            offline: Arc::new(Mutex::new(false)),
            latency: Duration::ZERO,
        }
    }

    /// Delay every register operation, to widen race windows in tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Lock the shared image.
    ///
    /// A poisoned lock still holds a consistent image, so it is recovered.
    pub fn image(&self) -> MutexGuard<'_, PlcImage> {
        self.image.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark the CNC side busy (`READY` = 0) or idle.
    pub fn set_busy(&self, busy: bool) {
        self.image().busy = busy;
    }

    /// Make the simulated gateway unreachable.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap_or_else(|p| p.into_inner()) = offline;
    }

    /// Drive a CNC to automation status bit (ignored in loopback mode).
    pub fn set_status_bit(&self, word_index: u16, bit_index: u8, value: bool) {
        if bit_index > crate::address::MAX_BIT {
            return;
        }
        let mut image = self.image();
        if let Some(byte) = image.status.get_mut(word_index as usize) {
            if value {
                *byte |= 1 << bit_index;
            } else {
                *byte &= !(1 << bit_index);
            }
        }
    }

    /// Most recent operations, oldest first (at most
    /// [`OPERATION_LOG_CAPACITY`]).
    pub fn operations(&self) -> Vec<PlcOperation> {
        self.image().operations.iter().cloned().collect()
    }

    /// Forget the recorded operations.
    pub fn clear_operations(&self) {
        self.image().operations.clear();
    }

    fn is_offline(&self) -> bool {
        *self.offline.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check_session(&mut self) -> BridgeResult<()> {
        if self.is_offline() {
            self.connected = false;
        }
        if !self.connected {
            return Err(BridgeError::ConnectionError {
                endpoint: "simulated PLC".to_string(),
                reason: "not connected".to_string(),
            });
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl RegisterTransport for SimulatedPlc {
    async fn connect(&mut self) -> BridgeResult<()> {
        if self.is_offline() {
            return Err(BridgeError::ConnectionError {
                endpoint: "simulated PLC".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.connected = true;
        Ok(())
    }

    async fn read_holding_registers(&mut self, offset: u16, count: u16) -> BridgeResult<Vec<u16>> {
        self.check_session()?;
        self.simulate_latency().await;
        self.image().read(offset, count).map_err(|code| {
            BridgeError::transport("read holding registers", format!("modbus exception: {code}"))
        })
    }

    async fn write_multiple_registers(&mut self, offset: u16, values: &[u16]) -> BridgeResult<()> {
        if values.len() < 2 {
            return Err(BridgeError::transport(
                "write multiple registers",
                format!("a paired write needs at least 2 values, got {}", values.len()),
            ));
        }
        self.check_session()?;
        self.simulate_latency().await;
        self.image().write(offset, values).map_err(|code| {
            BridgeError::transport("write multiple registers", format!("modbus exception: {code}"))
        })
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.is_offline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paired_write_sets_and_clears_output_bit() {
        let mut plc = SimulatedPlc::new(RegisterMap::default());
        plc.connect().await.unwrap();

        plc.write_multiple_registers(CMD_WORD, &[9, 1]).await.unwrap();
        assert_eq!(plc.image().output_byte(1), 0b0000_0010);
        assert_eq!(plc.read_holding_registers(RESULT, 1).await.unwrap(), vec![1]);

        plc.write_multiple_registers(CMD_WORD, &[9, 0]).await.unwrap();
        assert_eq!(plc.image().output_byte(1), 0);
    }

    #[tokio::test]
    async fn test_loopback_status_area() {
        let mut plc = SimulatedPlc::new(RegisterMap::default());
        plc.connect().await.unwrap();

        plc.write_multiple_registers(CMD_WORD, &[4, 1]).await.unwrap();
        let status = plc.read_holding_registers(4, 2).await.unwrap();
        assert_eq!(status, vec![0b0001_0000, 0]);
    }

    #[tokio::test]
    async fn test_driven_status_area() {
        let mut plc = SimulatedPlc::with_loopback(RegisterMap::default(), false);
        plc.connect().await.unwrap();

        plc.write_multiple_registers(CMD_WORD, &[4, 1]).await.unwrap();
        assert_eq!(plc.read_holding_registers(4, 2).await.unwrap(), vec![0, 0]);

        plc.set_status_bit(1, 6, true);
        assert_eq!(plc.read_holding_registers(4, 2).await.unwrap(), vec![0, 0b0100_0000]);
    }

    #[tokio::test]
    async fn test_ready_and_unmapped_registers() {
        let mut plc = SimulatedPlc::new(RegisterMap::default());
        plc.connect().await.unwrap();

        assert_eq!(plc.read_holding_registers(READY, 1).await.unwrap(), vec![1]);
        plc.set_busy(true);
        assert_eq!(plc.read_holding_registers(READY, 1).await.unwrap(), vec![0]);

        assert!(matches!(
            plc.read_holding_registers(100, 1).await,
            Err(BridgeError::TransportError { .. })
        ));
        assert!(matches!(
            plc.write_multiple_registers(RESULT, &[1, 1]).await,
            Err(BridgeError::TransportError { .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_write_changes_nothing() {
        let mut plc = SimulatedPlc::new(RegisterMap::default());
        plc.connect().await.unwrap();

        // RESULT is not writable, so CMD_WORD and TRIGGER stay untouched too
        assert!(plc.write_multiple_registers(CMD_WORD, &[9, 1, 5]).await.is_err());
        assert_eq!(plc.read_holding_registers(CMD_WORD, 3).await.unwrap(), vec![0, 0, 0]);
        assert_eq!(plc.image().output_byte(1), 0);

        assert!(plc.write_multiple_registers(TRIGGER, &[1, 1]).await.is_err());
        assert_eq!(plc.read_holding_registers(TRIGGER, 1).await.unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_operation_log_is_bounded() {
        let mut plc = SimulatedPlc::new(RegisterMap::default());
        plc.connect().await.unwrap();

        for _ in 0..OPERATION_LOG_CAPACITY {
            plc.read_holding_registers(READY, 1).await.unwrap();
        }
        plc.write_multiple_registers(CMD_WORD, &[4, 1]).await.unwrap();

        let operations = plc.operations();
        assert_eq!(operations.len(), OPERATION_LOG_CAPACITY);
        assert_eq!(
            operations.last(),
            Some(&PlcOperation::Write {
                offset: CMD_WORD,
                values: vec![4, 1]
            })
        );

        plc.clear_operations();
        assert!(plc.operations().is_empty());
    }

    #[tokio::test]
    async fn test_status_area_larger_than_output_image() {
        let map = RegisterMap {
            status_register: 4,
            status_word_count: 9000,
        };
        let mut plc = SimulatedPlc::new(map);
        plc.connect().await.unwrap();

        plc.write_multiple_registers(CMD_WORD, &[8191 * 8 + 7, 1]).await.unwrap();
        assert_eq!(plc.read_holding_registers(4 + 8191, 1).await.unwrap(), vec![0b1000_0000]);
        // Past the output image the loopback reads as zero
        assert_eq!(plc.read_holding_registers(4 + 8500, 2).await.unwrap(), vec![0, 0]);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let mut plc = SimulatedPlc::new(RegisterMap::default());
        assert!(matches!(
            plc.read_holding_registers(0, 1).await,
            Err(BridgeError::ConnectionError { .. })
        ));

        plc.connect().await.unwrap();
        plc.connect().await.unwrap();
        assert!(plc.is_connected());

        plc.close().await.unwrap();
        plc.close().await.unwrap();
        assert!(!plc.is_connected());

        plc.set_offline(true);
        assert!(plc.connect().await.is_err());
    }
}
