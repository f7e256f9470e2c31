// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP server exposing the simulated PLC gateway
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The simulated gateway is the server,
//! the bridge is the client.
//!
//! ## Supported Function Codes
//!
//! | Code | Request | Registers |
//! |------|---------|-----------|
//! | 0x03 | Read Holding Registers | command quartet and status area |
//! | 0x06 | Write Single Register | `CMD_WORD` or `TRIGGER`, stored without applying |
//! | 0x10 | Write Multiple Registers | `CMD_WORD` + `TRIGGER` together applies the command |
//!
//! Any other function code is answered with `IllegalFunction`.

use std::future;

use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};

use crate::transport::SimulatedPlc;

/// Modbus service answering from a [`SimulatedPlc`] image.
///
/// Every connection gets its own service, all sharing the same image.
#[derive(Clone)]
pub struct PlcSimulatorService {
    plc: SimulatedPlc,
}

impl PlcSimulatorService {
    pub fn new(plc: SimulatedPlc) -> Self {
        Self { plc }
    }
}

impl tokio_modbus::server::Service for PlcSimulatorService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Simulator received Modbus request: {:?}", req);
        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => self
                .plc
                .image()
                .read(addr, cnt)
                .map(Response::ReadHoldingRegisters),
            Request::WriteMultipleRegisters(addr, values) => self
                .plc
                .image()
                .write(addr, &values)
                .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16)),
            Request::WriteSingleRegister(addr, value) => self
                .plc
                .image()
                .write(addr, std::slice::from_ref(&value))
                .map(|_| Response::WriteSingleRegister(addr, value)),
            _ => {
                error!(
                    "SIMULATOR: Exception::IllegalFunction - Unimplemented function code in request: {req:?}"
                );
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

/// Serve `plc` over Modbus TCP on `listener` until the task is aborted.
pub async fn serve_simulator(listener: TcpListener, plc: SimulatedPlc) -> std::io::Result<()> {
    let server = Server::new(listener);

    let on_connected = move |stream, socket_addr| {
        let plc = plc.clone();
        async move {
            accept_tcp_connection(stream, socket_addr, move |peer| {
                info!("PLC simulator accepted connection from {}", peer);
                Ok(Some(PlcSimulatorService::new(plc.clone())))
            })
        }
    };

    let on_process_error = |err| {
        error!("PLC simulator error: {err}");
    };

    server.serve(&on_connected, on_process_error).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RegisterMap, CMD_WORD, RESULT};
    use tokio_modbus::server::Service;

    #[tokio::test]
    async fn test_service_applies_paired_write() {
        let plc = SimulatedPlc::new(RegisterMap::default());
        let service = PlcSimulatorService::new(plc.clone());

        let response = service
            .call(Request::WriteMultipleRegisters(CMD_WORD, vec![9, 1].into()))
            .await
            .unwrap();
        assert_eq!(response, Response::WriteMultipleRegisters(CMD_WORD, 2));
        assert_eq!(plc.image().output_byte(1), 0b0000_0010);

        let response = service
            .call(Request::ReadHoldingRegisters(RESULT, 1))
            .await
            .unwrap();
        assert_eq!(response, Response::ReadHoldingRegisters(vec![1]));
    }

    #[tokio::test]
    async fn test_single_register_write_does_not_apply() {
        let plc = SimulatedPlc::new(RegisterMap::default());
        let service = PlcSimulatorService::new(plc.clone());

        service
            .call(Request::WriteSingleRegister(CMD_WORD, 9))
            .await
            .unwrap();
        assert_eq!(plc.image().output_byte(1), 0);
    }

    #[tokio::test]
    async fn test_unsupported_function() {
        let service = PlcSimulatorService::new(SimulatedPlc::new(RegisterMap::default()));
        let result = service.call(Request::ReadCoils(0, 1)).await;
        assert_eq!(result, Err(ExceptionCode::IllegalFunction));
    }
}
