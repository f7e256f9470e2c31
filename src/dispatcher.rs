// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Command dispatcher
//!
//! Maps a command name and its JSON arguments onto register operations.
//! The command set is closed:
//!
//! | Command | Arguments | Response |
//! |---------|-----------|----------|
//! | `set_profinet_bit` | `profinet_address` (`"QX<byte>.<bit>"`), `profinet_value` | registers read back, e.g. `[1]` |
//! | `set_handshake_flag` | `flag` (flag name), `value` (bool) | `{"flag", "value", "result"}` |
//! | `read_handshake_flags` | none | `{"ready", "flags", "words", "read_at"}` |
//!
//! Arguments are parsed before the command name is looked up, so a malformed
//! payload is reported as such even for an unknown command.

use log::{debug, info};
use serde_json::{json, Map, Value};

use crate::address::BitAddress;
use crate::error::{BridgeError, BridgeResult};
use crate::handshake::{Handshake, HandshakeFlag};
use crate::transport::{RegisterMap, SharedTransport, CMD_WORD, TRIGGER};

pub const SET_PROFINET_BIT: &str = "set_profinet_bit";
pub const SET_HANDSHAKE_FLAG: &str = "set_handshake_flag";
pub const READ_HANDSHAKE_FLAGS: &str = "read_handshake_flags";

/// Commands understood by [`CommandDispatcher`].
pub const COMMANDS: [&str; 3] = [SET_PROFINET_BIT, SET_HANDSHAKE_FLAG, READ_HANDSHAKE_FLAGS];

/// A command name with its parsed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub name: String,
    pub args: Map<String, Value>,
}

impl CommandRequest {
    /// Parse `args_json` as a JSON object. Blank input means no arguments.
    pub fn parse(name: &str, args_json: &str) -> BridgeResult<Self> {
        let args = if args_json.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(args_json) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(BridgeError::MalformedArguments {
                        command: name.to_string(),
                        reason: format!("expected a JSON object, got {}", other),
                    })
                }
                Err(e) => {
                    return Err(BridgeError::MalformedArguments {
                        command: name.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        };
        Ok(Self {
            name: name.to_string(),
            args,
        })
    }

    fn malformed(&self, reason: impl Into<String>) -> BridgeError {
        BridgeError::MalformedArguments {
            command: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn arg(&self, key: &str) -> BridgeResult<&Value> {
        self.args
            .get(key)
            .ok_or_else(|| self.malformed(format!("missing argument '{}'", key)))
    }

    /// String argument.
    pub fn str_arg(&self, key: &str) -> BridgeResult<&str> {
        self.arg(key)?
            .as_str()
            .ok_or_else(|| self.malformed(format!("argument '{}' must be a string", key)))
    }

    /// Register value argument: an integer in 0..=65535 or a boolean.
    pub fn register_arg(&self, key: &str) -> BridgeResult<u16> {
        match self.arg(key)? {
            Value::Bool(b) => Ok(*b as u16),
            Value::Number(n) => n
                .as_u64()
                .and_then(|v| u16::try_from(v).ok())
                .ok_or_else(|| {
                    self.malformed(format!(
                        "argument '{}' must fit a 16-bit register, got {}",
                        key, n
                    ))
                }),
            other => Err(self.malformed(format!(
                "argument '{}' must be an integer, got {}",
                key, other
            ))),
        }
    }

    /// Boolean argument. `0` and `1` are accepted too.
    pub fn bool_arg(&self, key: &str) -> BridgeResult<bool> {
        match self.arg(key)? {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
            Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
            other => Err(self.malformed(format!(
                "argument '{}' must be a boolean, got {}",
                key, other
            ))),
        }
    }
}

/// Routes commands onto an injected transport.
#[derive(Clone)]
pub struct CommandDispatcher {
    transport: SharedTransport,
    handshake: Handshake,
}

impl CommandDispatcher {
    pub fn new(transport: SharedTransport, map: RegisterMap) -> Self {
        let handshake = Handshake::new(transport.clone(), map);
        Self {
            transport,
            handshake,
        }
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Execute `command_name` with `args_json` and return its response text.
    ///
    /// # Errors
    ///
    /// - `MalformedArguments` when the arguments are not a JSON object or a
    ///   required argument is missing or ill-typed
    /// - `UnknownCommand` for a name outside the command set, without any
    ///   register access
    /// - `CommandExecutionError` wrapping encoding, transport and handshake
    ///   failures
    pub async fn dispatch(&self, command_name: &str, args_json: &str) -> BridgeResult<String> {
        let request = CommandRequest::parse(command_name, args_json)?;
        self.dispatch_request(&request).await
    }

    /// Execute an already parsed request.
    pub async fn dispatch_request(&self, request: &CommandRequest) -> BridgeResult<String> {
        debug!("Dispatching command {} with {:?}", request.name, request.args);
        match request.name.as_str() {
            SET_PROFINET_BIT => self.set_profinet_bit(request).await,
            SET_HANDSHAKE_FLAG => self.set_handshake_flag(request).await,
            READ_HANDSHAKE_FLAGS => self.read_handshake_flags(request).await,
            _ => Err(BridgeError::UnknownCommand(request.name.clone())),
        }
    }

    async fn set_profinet_bit(&self, request: &CommandRequest) -> BridgeResult<String> {
        let address = request.str_arg("profinet_address")?;
        let value = request.register_arg("profinet_value")?;
        let address = BitAddress::parse(address).map_err(|e| e.in_command(&request.name))?;

        info!("Setting PROFINET bit {} to {}", address, value);
        let registers = {
            let mut transport = self.transport.lock().await;
            transport
                .write_multiple_registers(CMD_WORD, &[address.offset(), value])
                .await
                .map_err(|e| e.in_command(&request.name))?;
            transport
                .read_holding_registers(TRIGGER, 1)
                .await
                .map_err(|e| e.in_command(&request.name))?
        };

        Ok(Value::from(registers).to_string())
    }

    async fn set_handshake_flag(&self, request: &CommandRequest) -> BridgeResult<String> {
        let name = request.str_arg("flag")?;
        let value = request.bool_arg("value")?;
        let flag = HandshakeFlag::from_name(name)
            .ok_or_else(|| request.malformed(format!("unknown handshake flag '{}'", name)))?;

        let ack = self
            .handshake
            .write_flag(flag, value)
            .await
            .map_err(|e| e.in_command(&request.name))?;

        Ok(json!({
            "flag": flag.name(),
            "value": value,
            "result": ack.result,
        })
        .to_string())
    }

    async fn read_handshake_flags(&self, request: &CommandRequest) -> BridgeResult<String> {
        let snapshot = self
            .handshake
            .read_status()
            .await
            .map_err(|e| e.in_command(&request.name))?;
        Ok(snapshot.to_json().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{shared, RegisterTransport, SimulatedPlc, READY, RESULT};
    use async_trait::async_trait;
    use mockall::{mock, predicate::eq, Sequence};

    mock! {
        pub Transport {}

        #[async_trait]
        impl RegisterTransport for Transport {
            async fn connect(&mut self) -> BridgeResult<()>;
            async fn read_holding_registers(
                &mut self,
                offset: u16,
                count: u16,
            ) -> BridgeResult<Vec<u16>>;
            async fn write_multiple_registers(
                &mut self,
                offset: u16,
                values: &[u16],
            ) -> BridgeResult<()>;
            async fn close(&mut self) -> BridgeResult<()>;
            fn is_connected(&self) -> bool;
        }
    }

    fn dispatcher(mock: MockTransport) -> CommandDispatcher {
        CommandDispatcher::new(shared(mock), RegisterMap::default())
    }

    #[tokio::test]
    async fn test_set_profinet_bit_writes_pair_then_reads_value() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        mock.expect_write_multiple_registers()
            .withf(|offset, values| *offset == CMD_WORD && values == [4u16, 1].as_slice())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_read_holding_registers()
            .with(eq(TRIGGER), eq(1))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![1]));

        let response = dispatcher(mock)
            .dispatch(
                "set_profinet_bit",
                r#"{"profinet_address": "QX0.4", "profinet_value": 1}"#,
            )
            .await
            .unwrap();
        assert_eq!(response, "[1]");
    }

    #[tokio::test]
    async fn test_unknown_command_does_not_touch_transport() {
        // No expectation: any call panics
        let mock = MockTransport::new();
        let err = dispatcher(mock).dispatch("reboot", "{}").await.unwrap_err();
        assert!(matches!(err, BridgeError::UnknownCommand(ref name) if name == "reboot"));
    }

    #[tokio::test]
    async fn test_malformed_arguments() {
        let dispatcher = dispatcher(MockTransport::new());

        for (command, args) in [
            ("set_profinet_bit", "not json"),
            ("set_profinet_bit", "[1, 2]"),
            ("set_profinet_bit", r#"{"profinet_value": 1}"#),
            ("set_profinet_bit", r#"{"profinet_address": "QX0.4", "profinet_value": -1}"#),
            ("set_profinet_bit", r#"{"profinet_address": "QX0.4", "profinet_value": 70000}"#),
            ("set_handshake_flag", r#"{"flag": "finished_loading"}"#),
            ("set_handshake_flag", r#"{"flag": "no_such_flag", "value": true}"#),
            ("unknown", "{"),
        ] {
            let err = dispatcher.dispatch(command, args).await.unwrap_err();
            assert!(
                matches!(err, BridgeError::MalformedArguments { .. }),
                "{command} {args}: {err:?}"
            );
            assert_eq!(err.command(), Some(command));
        }
    }

    #[tokio::test]
    async fn test_invalid_address_is_wrapped_without_io() {
        let err = dispatcher(MockTransport::new())
            .dispatch(
                "set_profinet_bit",
                r#"{"profinet_address": "QX0.8", "profinet_value": 1}"#,
            )
            .await
            .unwrap_err();
        match err {
            BridgeError::CommandExecutionError { command, source } => {
                assert_eq!(command, "set_profinet_bit");
                assert!(matches!(*source, BridgeError::BitOutOfRange { bit: 8, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_wrapped() {
        let mut mock = MockTransport::new();
        mock.expect_write_multiple_registers()
            .times(1)
            .returning(|_, _| {
                Err(BridgeError::ConnectionError {
                    endpoint: "10.0.0.5:502".to_string(),
                    reason: "not connected".to_string(),
                })
            });
        mock.expect_read_holding_registers().never();

        let err = dispatcher(mock)
            .dispatch(
                "set_profinet_bit",
                r#"{"profinet_address": "QX1.1", "profinet_value": 0}"#,
            )
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(err.command(), Some("set_profinet_bit"));
        assert!(err.to_string().contains("Error when sending command 'set_profinet_bit'"));
    }

    #[tokio::test]
    async fn test_set_handshake_flag_checks_ready_first() {
        let mut mock = MockTransport::new();
        let mut seq = Sequence::new();
        mock.expect_read_holding_registers()
            .with(eq(READY), eq(1))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![1]));
        mock.expect_write_multiple_registers()
            .withf(|offset, values| *offset == CMD_WORD && values == [9u16, 1].as_slice())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        mock.expect_read_holding_registers()
            .with(eq(RESULT), eq(1))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(vec![1]));

        let response = dispatcher(mock)
            .dispatch("set_handshake_flag", r#"{"flag": "finished_loading", "value": true}"#)
            .await
            .unwrap();
        let response: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(response["flag"], "finished_loading");
        assert_eq!(response["value"], true);
        assert_eq!(response["result"], 1);
    }

    #[tokio::test]
    async fn test_set_handshake_flag_not_ready() {
        let mut mock = MockTransport::new();
        mock.expect_read_holding_registers()
            .with(eq(READY), eq(1))
            .times(1)
            .returning(|_, _| Ok(vec![0]));
        mock.expect_write_multiple_registers().never();

        let err = dispatcher(mock)
            .dispatch("set_handshake_flag", r#"{"flag": "neg_error", "value": 1}"#)
            .await
            .unwrap_err();
        match err {
            BridgeError::CommandExecutionError { source, .. } => {
                assert!(matches!(*source, BridgeError::NotReady { ready: 0 }))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_handshake_flags_on_simulator() {
        let mut plc = SimulatedPlc::with_loopback(RegisterMap::default(), false);
        plc.connect().await.unwrap();
        plc.set_status_bit(0, 7, true);
        plc.set_status_bit(1, 1, true);

        let dispatcher = CommandDispatcher::new(shared(plc), RegisterMap::default());
        let response = dispatcher.dispatch("read_handshake_flags", "").await.unwrap();
        let response: Value = serde_json::from_str(&response).unwrap();

        assert_eq!(response["ready"], true);
        assert_eq!(response["flags"]["operator_protection_OK"], true);
        assert_eq!(response["flags"]["program_in_progress"], true);
        assert_eq!(response["flags"]["CNC_fault"], false);
        assert_eq!(response["words"], json!([0b1000_0000, 0b0000_0010]));
    }
}
