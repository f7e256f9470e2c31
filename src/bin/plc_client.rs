// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use clap::Parser;
use std::error::Error;
use tokio::time::Duration;

use cnc_profinet_bridge::handshake::{Handshake, HandshakeFlag};
use cnc_profinet_bridge::transport::{
    shared, ModbusTcpTransport, RegisterMap, RegisterTransport, CMD_WORD, READY, RESULT, TRIGGER,
};

/// Modbus client dumping the command registers and handshake flags of a PLC gateway
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Modbus server address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus server port
    #[clap(long, default_value = "502")]
    port: u16,

    /// Modbus unit identifier
    #[clap(long, default_value = "1")]
    unit_id: u8,

    /// First register of the status area
    #[clap(long, default_value = "4")]
    status_register: u16,

    /// Number of status words
    #[clap(long, default_value = "2")]
    status_words: u16,

    /// Request timeout in milliseconds
    #[clap(long, default_value = "1000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();

    let mut transport = ModbusTcpTransport::new(args.address.clone(), args.port)
        .with_unit_id(args.unit_id)
        .with_timeout(Duration::from_millis(args.timeout_ms));
    println!("Connecting to PLC gateway at {}", transport.endpoint());
    transport.connect().await?;

    let quartet = transport.read_holding_registers(CMD_WORD, 4).await?;
    println!("Raw register values: {:?}", quartet);
    for (register, value) in [CMD_WORD, TRIGGER, RESULT, READY].iter().zip(&quartet) {
        match *register {
            CMD_WORD => println!(
                "Register {}: CMD_WORD = {} (QX{}.{})",
                register,
                value,
                value / 8,
                value % 8
            ),
            TRIGGER => println!("Register {}: TRIGGER = {}", register, value),
            RESULT => println!("Register {}: RESULT = {}", register, value),
            _ => println!(
                "Register {}: READY = {} ({})",
                register,
                value,
                if *value != 0 { "ready" } else { "busy" }
            ),
        }
    }

    let map = RegisterMap {
        status_register: args.status_register,
        status_word_count: args.status_words,
    };
    let handshake = Handshake::new(shared(transport), map);
    let snapshot = handshake.read_status().await?;

    for (i, word) in snapshot.words.iter().enumerate() {
        println!(
            "Register {}: status word {} = {:#010b}",
            map.status_word_register(i as u16),
            i,
            word
        );
    }
    for flag in HandshakeFlag::CNC_TO_AUTOMATION {
        match snapshot.get(flag) {
            Some(value) => println!("{}: {}", flag, value),
            None => println!("{}: outside the status area", flag),
        }
    }

    Ok(())
}
