// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! CNC device façade
//!
//! [`CncBridge`] is the object the automation controller talks to. It owns
//! the register transport, the command dispatcher and the file loader, and
//! accepts two request envelopes:
//!
//! ```json
//! {"commandJson": "{\"command\": \"set_profinet_bit\", \"profinet_address\": \"QX0.4\", \"profinet_value\": 1}"}
//! {"commandName": "set_profinet_bit", "commandArgs": "{\"profinet_address\": \"QX0.4\", \"profinet_value\": 1}"}
//! ```
//!
//! Besides the dispatcher commands both paths accept `load_file` with a
//! `filename` argument.

use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::dispatcher::{CommandDispatcher, CommandRequest};
use crate::error::{BridgeError, BridgeResult};
use crate::handshake::Handshake;
use crate::loader::FileLoader;
use crate::transport::{
    shared, ModbusTcpTransport, RegisterMap, RegisterTransport, SharedTransport,
};

/// Command routed to the file loader instead of the PLC.
pub const LOAD_FILE: &str = "load_file";

/// Name reported for errors in an envelope that could not be read.
const ENVELOPE: &str = "request";

/// Inbound request, in either of the accepted shapes.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandEnvelope {
    /// `{"commandName": "...", "commandArgs": "<json>"}`
    Structured {
        #[serde(rename = "commandName")]
        command_name: String,
        /// JSON text, or an inline object
        #[serde(rename = "commandArgs", default)]
        command_args: Option<Value>,
    },
    /// `{"commandJson": "<json>"}` where the inner object carries `command`
    Legacy {
        #[serde(rename = "commandJson")]
        command_json: Value,
    },
}

fn value_as_json_text(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
    }
}

/// The CNC as seen by the automation controller.
pub struct CncBridge {
    transport: SharedTransport,
    dispatcher: CommandDispatcher,
    loader: FileLoader,
}

impl CncBridge {
    /// Build a bridge over `transport`. Nothing is connected yet.
    pub fn new(config: &Config, transport: SharedTransport) -> BridgeResult<Self> {
        let map = RegisterMap::from(&config.plc);
        Ok(Self {
            dispatcher: CommandDispatcher::new(transport.clone(), map),
            loader: FileLoader::from_config(&config.loader, &config.cnc)?,
            transport,
        })
    }

    /// Build a bridge over a Modbus TCP session to `config.plc`.
    pub fn from_config(config: &Config) -> BridgeResult<Self> {
        Self::new(config, shared(ModbusTcpTransport::from_config(&config.plc)))
    }

    /// Build a bridge over any transport implementation.
    pub fn with_transport<T: RegisterTransport + 'static>(
        config: &Config,
        transport: T,
    ) -> BridgeResult<Self> {
        Self::new(config, shared(transport))
    }

    /// Open the PLC session. A no-op when already connected.
    pub async fn connect(&self) -> BridgeResult<()> {
        self.transport.lock().await.connect().await
    }

    /// Close the PLC session. Safe to call more than once.
    pub async fn shutdown(&self) -> BridgeResult<()> {
        info!("Shutting down CNC bridge");
        self.transport.lock().await.close().await
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_connected()
    }

    pub fn transport(&self) -> SharedTransport {
        self.transport.clone()
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn handshake(&self) -> &Handshake {
        self.dispatcher.handshake()
    }

    /// Legacy entry point: `command_json` is an object whose `command` key
    /// names the command and whose other keys are its arguments.
    pub async fn execute_command(&self, command_json: &str) -> BridgeResult<String> {
        info!("Sending command: {}", command_json);
        let mut object = match serde_json::from_str::<Value>(command_json) {
            Ok(Value::Object(object)) => object,
            Ok(other) => {
                return Err(BridgeError::MalformedArguments {
                    command: ENVELOPE.to_string(),
                    reason: format!("expected a JSON object, got {}", other),
                })
            }
            Err(e) => {
                return Err(BridgeError::MalformedArguments {
                    command: ENVELOPE.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let name = match object.remove("command") {
            Some(Value::String(name)) => name,
            _ => {
                return Err(BridgeError::MalformedArguments {
                    command: ENVELOPE.to_string(),
                    reason: "missing string field 'command'".to_string(),
                })
            }
        };

        self.execute(CommandRequest { name, args: object }).await
    }

    /// Structured entry point.
    pub async fn execute_command_v2(
        &self,
        command_name: &str,
        command_args: &str,
    ) -> BridgeResult<String> {
        info!("Sending command: {}", command_name);
        let request = CommandRequest::parse(command_name, command_args)?;
        self.execute(request).await
    }

    /// Accept either envelope shape.
    pub async fn handle_request(&self, envelope_json: &str) -> BridgeResult<String> {
        let envelope: CommandEnvelope =
            serde_json::from_str(envelope_json).map_err(|e| BridgeError::MalformedArguments {
                command: ENVELOPE.to_string(),
                reason: format!(
                    "expected {{\"commandJson\"}} or {{\"commandName\", \"commandArgs\"}}: {}",
                    e
                ),
            })?;
        debug!("Received {:?}", envelope);

        match envelope {
            CommandEnvelope::Structured {
                command_name,
                command_args,
            } => {
                self.execute_command_v2(&command_name, &value_as_json_text(command_args))
                    .await
            }
            CommandEnvelope::Legacy { command_json } => {
                self.execute_command(&value_as_json_text(Some(command_json)))
                    .await
            }
        }
    }

    /// Load `filename` into the CNC's memory through the loader service.
    pub async fn load_file(&self, filename: &str) -> BridgeResult<String> {
        self.loader
            .load_file(filename)
            .await
            .map_err(|e| e.in_command(LOAD_FILE))
    }

    async fn execute(&self, request: CommandRequest) -> BridgeResult<String> {
        if request.name == LOAD_FILE {
            let filename = filename_arg(&request.args)?;
            return self.load_file(filename).await;
        }
        self.dispatcher.dispatch_request(&request).await
    }
}

fn filename_arg(args: &Map<String, Value>) -> BridgeResult<&str> {
    args.get("filename")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::MalformedArguments {
            command: LOAD_FILE.to_string(),
            reason: "missing string argument 'filename'".to_string(),
        })
}
