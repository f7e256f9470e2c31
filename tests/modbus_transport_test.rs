// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the Modbus TCP transport against the simulated PLC gateway
//!
//! These tests start the simulator server on an ephemeral port and drive it
//! through `ModbusTcpTransport`, covering the session lifecycle, the paired
//! command write, error reporting and timeouts.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time;
use tokio_modbus::prelude::*;

use cnc_profinet_bridge::config::Config;
use cnc_profinet_bridge::error::BridgeError;
use cnc_profinet_bridge::handshake::{Handshake, HandshakeFlag};
use cnc_profinet_bridge::modbus::serve_simulator;
use cnc_profinet_bridge::transport::{
    shared, ModbusTcpTransport, RegisterMap, RegisterTransport, SimulatedPlc, CMD_WORD, READY,
    RESULT, TRIGGER,
};
use cnc_profinet_bridge::CncBridge;

/// Test utility function to start the simulated gateway in the background
async fn start_test_server(
) -> Result<(SocketAddr, SimulatedPlc, tokio::task::JoinHandle<()>), Box<dyn std::error::Error>> {
    // Use port 0 to let the OS assign an available port
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;

    let plc = SimulatedPlc::new(RegisterMap::default());
    let server_plc = plc.clone();
    let handle = tokio::spawn(async move {
        if let Err(e) = serve_simulator(listener, server_plc).await {
            eprintln!("Server error: {}", e);
        }
    });

    // Give the server a moment to start
    time::sleep(Duration::from_millis(100)).await;

    Ok((socket_addr, plc, handle))
}

fn transport_for(addr: SocketAddr) -> ModbusTcpTransport {
    ModbusTcpTransport::new(addr.ip().to_string(), addr.port())
        .with_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn test_connect_is_idempotent_and_close_repeatable() -> Result<(), Box<dyn std::error::Error>>
{
    let (socket_addr, _plc, _server_handle) = start_test_server().await?;
    let mut transport = transport_for(socket_addr);

    assert!(!transport.is_connected());
    transport.connect().await?;
    transport.connect().await?;
    assert!(transport.is_connected());

    assert_eq!(transport.read_holding_registers(READY, 1).await?, vec![1]);

    transport.close().await?;
    transport.close().await?;
    assert!(!transport.is_connected());

    let err = transport.read_holding_registers(READY, 1).await.unwrap_err();
    assert!(err.is_connection_error());

    // A closed session can be reopened
    transport.connect().await?;
    assert_eq!(transport.read_holding_registers(READY, 1).await?, vec![1]);
    transport.close().await?;

    Ok(())
}

#[tokio::test]
async fn test_paired_write_reaches_the_gateway() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, plc, _server_handle) = start_test_server().await?;
    let mut transport = transport_for(socket_addr);
    transport.connect().await?;

    transport.write_multiple_registers(CMD_WORD, &[4, 1]).await?;
    assert_eq!(transport.read_holding_registers(TRIGGER, 1).await?, vec![1]);
    assert_eq!(transport.read_holding_registers(RESULT, 1).await?, vec![1]);
    assert_eq!(plc.image().output_byte(0), 0b0001_0000);

    // Status area mirrors the output image in loopback mode
    assert_eq!(transport.read_holding_registers(4, 2).await?, vec![0b0001_0000, 0]);

    transport.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_single_value_write_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, plc, _server_handle) = start_test_server().await?;
    let mut transport = transport_for(socket_addr);
    transport.connect().await?;

    let err = transport.write_multiple_registers(CMD_WORD, &[4]).await.unwrap_err();
    assert!(matches!(err, BridgeError::TransportError { .. }));
    assert!(!err.is_connection_error());

    // Nothing was sent and the session survives
    assert!(plc.operations().is_empty());
    assert!(transport.is_connected());

    transport.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_modbus_exception_is_a_transport_error() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _plc, _server_handle) = start_test_server().await?;
    let mut transport = transport_for(socket_addr);
    transport.connect().await?;

    // Register 100 is outside the map
    let err = transport.read_holding_registers(100, 1).await.unwrap_err();
    match &err {
        BridgeError::TransportError { reason, .. } => assert!(reason.contains("exception")),
        other => panic!("unexpected error: {other:?}"),
    }
    // Exceptions do not drop the session
    assert!(transport.is_connected());

    // RESULT is read-only
    let err = transport.write_multiple_registers(RESULT, &[1, 1]).await.unwrap_err();
    assert!(matches!(err, BridgeError::TransportError { .. }));

    transport.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_connection_refused() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut transport = transport_for(addr);
    let err = transport.connect().await.unwrap_err();
    assert!(matches!(err, BridgeError::ConnectionError { .. }));
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_unresponsive_gateway_times_out() -> Result<(), Box<dyn std::error::Error>> {
    // Accepts connections but never answers
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let _silent = tokio::spawn(async move {
        let mut sockets = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            sockets.push(socket);
        }
    });

    let mut transport = ModbusTcpTransport::new(addr.ip().to_string(), addr.port())
        .with_timeout(Duration::from_millis(200));
    transport.connect().await?;

    let started = std::time::Instant::now();
    let err = transport.read_holding_registers(READY, 1).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(2));
    match &err {
        BridgeError::TransportError { reason, .. } => assert!(reason.contains("timed out")),
        other => panic!("unexpected error: {other:?}"),
    }

    // The session was dropped, the caller decides whether to reconnect
    assert!(!transport.is_connected());
    assert!(transport
        .read_holding_registers(READY, 1)
        .await
        .unwrap_err()
        .is_connection_error());

    Ok(())
}

#[tokio::test]
async fn test_handshake_over_tcp() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, plc, _server_handle) = start_test_server().await?;
    let mut transport = transport_for(socket_addr);
    transport.connect().await?;
    let handshake = Handshake::new(shared(transport), RegisterMap::default());

    let ack = handshake.write_flag(HandshakeFlag::FinishedLoading, true).await?;
    assert_eq!(ack.result, 1);
    let snapshot = handshake.read_status().await?;
    assert_eq!(snapshot.bit(1, 1), Some(true));

    plc.set_busy(true);
    let err = handshake
        .write_flag(HandshakeFlag::NegError, true)
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotReady { ready: 0 }));
    assert_eq!(plc.image().output_byte(0), 0);

    Ok(())
}

#[tokio::test]
async fn test_bridge_commands_over_tcp() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, plc, _server_handle) = start_test_server().await?;

    let mut config = Config::default();
    config.plc.address = socket_addr.ip().to_string();
    config.plc.port = socket_addr.port();
    let bridge = CncBridge::from_config(&config)?;
    bridge.connect().await?;

    let response = bridge
        .execute_command_v2(
            "set_profinet_bit",
            r#"{"profinet_address": "QX1.6", "profinet_value": 1}"#,
        )
        .await?;
    assert_eq!(response, "[1]");
    assert_eq!(plc.image().output_byte(1), 0b0100_0000);

    let response = bridge
        .handle_request(r#"{"commandName": "read_handshake_flags", "commandArgs": "{}"}"#)
        .await?;
    let flags: serde_json::Value = serde_json::from_str(&response)?;
    // Loopback: QX1.6 shows up as NC_part
    assert_eq!(flags["flags"]["NC_part"], true);

    bridge.shutdown().await?;

    // The raw client still sees the command registers
    let mut ctx = tcp::connect(socket_addr).await?;
    let data = ctx.read_holding_registers(CMD_WORD, 4).await??;
    assert_eq!(data, vec![14, 1, 1, 1]);
    ctx.disconnect().await?;

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_tcp_transport_across_tasks() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, plc, _server_handle) = start_test_server().await?;
    let transport = shared(transport_for(socket_addr));

    let connector = transport.clone();
    tokio::spawn(async move { connector.lock().await.connect().await }).await??;

    let mut handles = Vec::new();
    for byte in 0..4u16 {
        let transport = transport.clone();
        handles.push(tokio::spawn(async move {
            let mut session = transport.lock().await;
            session.write_multiple_registers(CMD_WORD, &[byte * 8, 1]).await?;
            session.read_holding_registers(RESULT, 1).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await??, vec![1]);
    }
    for byte in 0..4u16 {
        assert_eq!(plc.image().output_byte(byte), 0b0000_0001);
    }

    transport.lock().await.close().await?;
    Ok(())
}
