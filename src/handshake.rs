// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Handshake protocol between the automation cell and the CNC
//!
//! The automation side and the CNC coordinate through named bits:
//!
//! | Flag | Word.Bit | Direction |
//! |------|----------|-----------|
//! | `operator_protection_OK` | 0.7 | CNC to automation |
//! | `CNC_fault` | 0.4 | CNC to automation |
//! | `M365` | 0.5 | CNC to automation |
//! | `program_in_progress` | 1.1 | CNC to automation |
//! | `NC_part` | 1.6 | CNC to automation |
//! | `neg_error` | 0.4 | automation to CNC |
//! | `finished_loading` | 1.1 | automation to CNC |
//!
//! Commands travel in the `CMD_WORD`/`TRIGGER` pair, `RESULT` carries the
//! acknowledgement and `READY` tells whether a new command may be issued:
//!
//! ```text
//! Idle --(write CMD_WORD + TRIGGER)--> AwaitingResult --(RESULT read)--> Idle
//! ```
//!
//! Flag values are only meaningful right after a fresh register read, so
//! nothing here caches PLC state: every query goes to the transport.

use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::{json, Map, Value};

use crate::address::BitAddress;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::{RegisterMap, SharedTransport, CMD_WORD, READY, RESULT};

/// Which side drives a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagDirection {
    /// Written by the CNC, read-only for the bridge
    CncToAutomation,
    /// Written by the bridge
    AutomationToCnc,
}

/// Named handshake bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeFlag {
    OperatorProtectionOk,
    CncFault,
    ProgramInProgress,
    M365,
    NcPart,
    NegError,
    FinishedLoading,
}

struct FlagEntry {
    flag: HandshakeFlag,
    name: &'static str,
    direction: FlagDirection,
    word: u16,
    bit: u8,
}

static FLAG_TABLE: [FlagEntry; 7] = [
    FlagEntry {
        flag: HandshakeFlag::OperatorProtectionOk,
        name: "operator_protection_OK",
        direction: FlagDirection::CncToAutomation,
        word: 0,
        bit: 7,
    },
    FlagEntry {
        flag: HandshakeFlag::CncFault,
        name: "CNC_fault",
        direction: FlagDirection::CncToAutomation,
        word: 0,
        bit: 4,
    },
    FlagEntry {
        flag: HandshakeFlag::ProgramInProgress,
        name: "program_in_progress",
        direction: FlagDirection::CncToAutomation,
        word: 1,
        bit: 1,
    },
    FlagEntry {
        flag: HandshakeFlag::M365,
        name: "M365",
        direction: FlagDirection::CncToAutomation,
        word: 0,
        bit: 5,
    },
    FlagEntry {
        flag: HandshakeFlag::NcPart,
        name: "NC_part",
        direction: FlagDirection::CncToAutomation,
        word: 1,
        bit: 6,
    },
    FlagEntry {
        flag: HandshakeFlag::NegError,
        name: "neg_error",
        direction: FlagDirection::AutomationToCnc,
        word: 0,
        bit: 4,
    },
    FlagEntry {
        flag: HandshakeFlag::FinishedLoading,
        name: "finished_loading",
        direction: FlagDirection::AutomationToCnc,
        word: 1,
        bit: 1,
    },
];

impl HandshakeFlag {
    /// Flags reported by the CNC.
    pub const CNC_TO_AUTOMATION: [HandshakeFlag; 5] = [
        HandshakeFlag::OperatorProtectionOk,
        HandshakeFlag::CncFault,
        HandshakeFlag::ProgramInProgress,
        HandshakeFlag::M365,
        HandshakeFlag::NcPart,
    ];

    /// Flags driven by the bridge.
    pub const AUTOMATION_TO_CNC: [HandshakeFlag; 2] =
        [HandshakeFlag::NegError, HandshakeFlag::FinishedLoading];

    fn entry(&self) -> &'static FlagEntry {
        let index = match self {
            HandshakeFlag::OperatorProtectionOk => 0,
            HandshakeFlag::CncFault => 1,
            HandshakeFlag::ProgramInProgress => 2,
            HandshakeFlag::M365 => 3,
            HandshakeFlag::NcPart => 4,
            HandshakeFlag::NegError => 5,
            HandshakeFlag::FinishedLoading => 6,
        };
        &FLAG_TABLE[index]
    }

    /// Look a flag up by its protocol name (`CNC_fault`, `finished_loading`, ...).
    ///
    /// Matching is case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        FLAG_TABLE
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.flag)
    }

    pub fn name(&self) -> &'static str {
        self.entry().name
    }

    pub fn direction(&self) -> FlagDirection {
        self.entry().direction
    }

    pub fn word_index(&self) -> u16 {
        self.entry().word
    }

    pub fn bit_index(&self) -> u8 {
        self.entry().bit
    }

    /// Output-area address used to drive this flag through `CMD_WORD`.
    pub fn bit_address(&self) -> BitAddress {
        BitAddress::from_offset(self.word_index() * 8 + self.bit_index() as u16)
    }
}

impl fmt::Display for HandshakeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}.{})", self.name(), self.word_index(), self.bit_index())
    }
}

/// Caller-visible handshake state, derived from `READY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    AwaitingResult,
}

/// Status words and `READY` from one fresh read.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// Raw status words, indexed by word
    pub words: Vec<u16>,
    /// `READY` register was non-zero
    pub ready: bool,
    /// When the registers were read
    pub read_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Bit `bit` of status word `word`, `None` outside the status area.
    pub fn bit(&self, word: u16, bit: u8) -> Option<bool> {
        self.words
            .get(word as usize)
            .map(|value| bit < 16 && value & (1 << bit) != 0)
    }

    /// State of a flag, `None` when its word is outside the status area.
    pub fn get(&self, flag: HandshakeFlag) -> Option<bool> {
        self.bit(flag.word_index(), flag.bit_index())
    }

    /// State of a flag, `false` when its word is outside the status area.
    pub fn is_set(&self, flag: HandshakeFlag) -> bool {
        self.get(flag).unwrap_or(false)
    }

    /// CNC flags that differ between `previous` and `self`.
    pub fn changes_since(&self, previous: &StatusSnapshot) -> Vec<(HandshakeFlag, bool)> {
        HandshakeFlag::CNC_TO_AUTOMATION
            .iter()
            .filter(|flag| self.get(**flag) != previous.get(**flag))
            .map(|flag| (*flag, self.is_set(*flag)))
            .collect()
    }

    /// JSON view of the CNC flags.
    pub fn to_json(&self) -> Value {
        let mut flags = Map::new();
        for flag in HandshakeFlag::CNC_TO_AUTOMATION {
            flags.insert(flag.name().to_string(), Value::Bool(self.is_set(flag)));
        }
        json!({
            "ready": self.ready,
            "flags": flags,
            "words": self.words,
            "read_at": self.read_at.to_rfc3339(),
        })
    }
}

/// Outcome of a command accepted by the PLC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    pub address: BitAddress,
    pub value: u16,
    /// Content of `RESULT` right after the write, opaque to the bridge
    pub result: u16,
}

/// Handshake protocol layered over a shared transport.
#[derive(Clone)]
pub struct Handshake {
    transport: SharedTransport,
    map: RegisterMap,
}

impl Handshake {
    pub fn new(transport: SharedTransport, map: RegisterMap) -> Self {
        Self { transport, map }
    }

    pub fn register_map(&self) -> RegisterMap {
        self.map
    }

    /// Fresh read of `READY`.
    pub async fn is_ready(&self) -> BridgeResult<bool> {
        let mut transport = self.transport.lock().await;
        let ready = transport.read_holding_registers(READY, 1).await?;
        Ok(ready.first().copied().unwrap_or(0) != 0)
    }

    /// Current state as seen by a caller about to issue a command.
    pub async fn state(&self) -> BridgeResult<HandshakeState> {
        Ok(if self.is_ready().await? {
            HandshakeState::Idle
        } else {
            HandshakeState::AwaitingResult
        })
    }

    /// Fresh read of `READY` and of the status area.
    pub async fn read_status(&self) -> BridgeResult<StatusSnapshot> {
        let count = self.map.status_word_count;
        let mut transport = self.transport.lock().await;

        let (ready, words) = if self.map.status_register == READY + 1 {
            // Contiguous: one request covers READY and the status words
            let mut registers = transport
                .read_holding_registers(READY, count.saturating_add(1))
                .await?;
            let ready = if registers.is_empty() { 0 } else { registers.remove(0) };
            (ready, registers)
        } else {
            let ready = transport.read_holding_registers(READY, 1).await?;
            let words = transport
                .read_holding_registers(self.map.status_register, count)
                .await?;
            (ready.first().copied().unwrap_or(0), words)
        };

        Ok(StatusSnapshot {
            words,
            ready: ready != 0,
            read_at: Utc::now(),
        })
    }

    /// Issue one command: check `READY`, write `[address, value]` into
    /// `CMD_WORD`/`TRIGGER` in one request, then read `RESULT`.
    ///
    /// The session stays locked for the whole sequence. When the PLC is not
    /// ready the command is neither written nor queued.
    pub async fn issue(&self, address: BitAddress, value: u16) -> BridgeResult<Acknowledgement> {
        let mut transport = self.transport.lock().await;

        let ready = transport
            .read_holding_registers(READY, 1)
            .await?
            .first()
            .copied()
            .unwrap_or(0);
        if ready == 0 {
            warn!("Refusing to write {} = {}: PLC not ready", address, value);
            return Err(BridgeError::NotReady { ready });
        }

        debug!("Handshake Idle -> AwaitingResult ({} = {})", address, value);
        transport
            .write_multiple_registers(CMD_WORD, &[address.offset(), value])
            .await?;

        let result = transport
            .read_holding_registers(RESULT, 1)
            .await?
            .first()
            .copied()
            .ok_or_else(|| {
                BridgeError::transport("read holding registers", "empty RESULT response")
            })?;
        debug!("Handshake AwaitingResult -> Idle (RESULT = {})", result);

        Ok(Acknowledgement {
            address,
            value,
            result,
        })
    }

    /// Drive an automation to CNC flag.
    pub async fn write_flag(
        &self,
        flag: HandshakeFlag,
        value: bool,
    ) -> BridgeResult<Acknowledgement> {
        if flag.direction() != FlagDirection::AutomationToCnc {
            return Err(BridgeError::ReadOnlyFlag(flag.name()));
        }
        info!("Setting handshake flag {} to {}", flag, value);
        self.issue(flag.bit_address(), value as u16).await
    }
}
