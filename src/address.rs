// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! PROFINET bit address codec
//!
//! The gateway identifies one bit of the PLC output area with the symbolic
//! `QX<byte>.<bit>` notation. On the Modbus side the same bit is addressed by
//! its linear offset `byte * 8 + bit`, which is what gets written into the
//! command word register.
//!
//! ```
//! use cnc_profinet_bridge::address::{encode, BitAddress};
//!
//! assert_eq!(encode("QX0.4").unwrap(), 4);
//! assert_eq!(encode("qx1.1").unwrap(), 9);
//! assert_eq!(BitAddress::from_offset(9).to_string(), "QX1.1");
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, BridgeResult};

/// Prefix of an output bit address, compared case-insensitively.
const OUTPUT_PREFIX: &str = "QX";

/// Highest valid bit index inside a byte.
pub const MAX_BIT: u8 = 7;

/// A single bit of the PLC output area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitAddress {
    byte: u16,
    bit: u8,
}

impl BitAddress {
    /// Build an address from its byte and bit indices.
    pub fn new(byte: u16, bit: u8) -> BridgeResult<Self> {
        let label = format!("{OUTPUT_PREFIX}{byte}.{bit}");
        if bit > MAX_BIT {
            return Err(BridgeError::BitOutOfRange {
                address: label,
                bit: bit as u32,
            });
        }
        if byte.checked_mul(8).and_then(|b| b.checked_add(bit as u16)).is_none() {
            return Err(BridgeError::invalid_address(
                &label,
                "linear offset does not fit a 16-bit register",
            ));
        }
        Ok(Self { byte, bit })
    }

    /// Inverse of [`BitAddress::offset`].
    pub fn from_offset(offset: u16) -> Self {
        Self {
            byte: offset / 8,
            bit: (offset % 8) as u8,
        }
    }

    /// Parse the `QX<byte>.<bit>` notation.
    pub fn parse(address: &str) -> BridgeResult<Self> {
        let trimmed = address.trim();

        let body = match trimmed.get(..OUTPUT_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(OUTPUT_PREFIX) => {
                &trimmed[OUTPUT_PREFIX.len()..]
            }
            _ => {
                return Err(BridgeError::invalid_address(
                    address,
                    format!("missing '{OUTPUT_PREFIX}' prefix"),
                ))
            }
        };

        let (byte_part, bit_part) = body
            .split_once('.')
            .ok_or_else(|| BridgeError::invalid_address(address, "missing '.' separator"))?;

        let byte = parse_digits(address, byte_part, "byte")?;
        let bit = parse_digits(address, bit_part, "bit")?;

        if bit > MAX_BIT as u32 {
            return Err(BridgeError::BitOutOfRange {
                address: address.to_string(),
                bit,
            });
        }

        let byte = u16::try_from(byte)
            .map_err(|_| BridgeError::invalid_address(address, "byte index too large"))?;
        Self::new(byte, bit as u8).map_err(|_| {
            BridgeError::invalid_address(address, "linear offset does not fit a 16-bit register")
        })
    }

    /// Byte index inside the output area.
    pub fn byte(&self) -> u16 {
        self.byte
    }

    /// Bit index inside the byte, always in `0..=7`.
    pub fn bit(&self) -> u8 {
        self.bit
    }

    /// Zero-based linear bit index, usable as a register value.
    pub fn offset(&self) -> u16 {
        self.byte * 8 + self.bit as u16
    }
}

impl fmt::Display for BitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{OUTPUT_PREFIX}{}.{}", self.byte, self.bit)
    }
}

impl FromStr for BitAddress {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Encode a `QX<byte>.<bit>` address into its linear offset.
pub fn encode(address: &str) -> BridgeResult<u16> {
    BitAddress::parse(address).map(|a| a.offset())
}

// Plain ASCII digits only: `u32::from_str` would also accept a leading '+'.
fn parse_digits(address: &str, part: &str, what: &str) -> BridgeResult<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BridgeError::invalid_address(
            address,
            format!("{what} part '{part}' is not a non-negative integer"),
        ));
    }
    part.parse::<u32>()
        .map_err(|_| BridgeError::invalid_address(address, format!("{what} part is too large")))
}
