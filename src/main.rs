// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the CNC PROFINET bridge
use anyhow::Result;
use clap::Parser;
use log::info;

use std::path::PathBuf;
use tokio::signal;

use cnc_profinet_bridge::config::{self, Config};
use cnc_profinet_bridge::daemon::Daemon;
use cnc_profinet_bridge::transport::{RegisterMap, SimulatedPlc};
use cnc_profinet_bridge::CncBridge;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file (default: config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate a configuration file and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Print the configuration JSON schema and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Address of the PLC gateway
    #[arg(long)]
    plc_address: Option<String>,

    /// Modbus TCP port of the PLC gateway
    #[arg(long)]
    plc_port: Option<u16>,

    /// IP address of the CNC, forwarded to the loader
    #[arg(long)]
    cnc_address: Option<String>,

    /// Base URL of the file loader service
    #[arg(long)]
    loader_url: Option<String>,

    /// Use the simulated PLC gateway instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// Execute one command and exit (e.g. set_profinet_bit)
    #[arg(long, value_name = "NAME")]
    command: Option<String>,

    /// JSON arguments of --command
    #[arg(long, value_name = "JSON", default_value = "{}", requires = "command")]
    args: String,

    /// Handle one request envelope ({"commandJson"} or {"commandName", "commandArgs"}) and exit
    #[arg(long, value_name = "JSON", conflicts_with = "command")]
    request: Option<String>,

    /// Ask the loader service to load a file into the CNC and exit
    #[arg(long, value_name = "FILENAME", conflicts_with_all = ["command", "request"])]
    load_file: Option<String>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

impl Args {
    fn is_one_shot(&self) -> bool {
        self.command.is_some() || self.request.is_some() || self.load_file.is_some()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger with appropriate level based on verbose and quiet flags
    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = &args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }

        Config::from_file(validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;

    config.apply_args(
        args.plc_address.clone(),
        args.plc_port,
        args.cnc_address.clone(),
        args.loader_url.clone(),
        args.simulate,
    );
    config.validate()?;

    if args.is_one_shot() {
        return run_one_shot(&args, &config).await;
    }

    info!("Starting in daemon mode");
    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, terminating daemon");
            daemon.shutdown();
            daemon.join().await?;
        }
        Err(err) => {
            eprintln!("Error waiting for shutdown signal: {}", err);
        }
    }

    Ok(())
}

/// Run a single command, request or file load and print its response.
async fn run_one_shot(args: &Args, config: &Config) -> Result<()> {
    let bridge = if config.simulator.enabled {
        info!("Using the in-process simulated PLC gateway");
        CncBridge::with_transport(
            config,
            SimulatedPlc::with_loopback(RegisterMap::from(&config.plc), config.simulator.loopback),
        )?
    } else {
        CncBridge::from_config(config)?
    };

    // The loader does not need the PLC session
    let needs_plc = args.load_file.is_none();
    if needs_plc {
        bridge.connect().await?;
    }

    let outcome = match (&args.load_file, &args.request, &args.command) {
        (Some(filename), _, _) => bridge.load_file(filename).await,
        (None, Some(request), _) => bridge.handle_request(request).await,
        (None, None, Some(command)) => bridge.execute_command_v2(command, &args.args).await,
        (None, None, None) => return Ok(()),
    };

    if needs_plc {
        if let Err(e) = bridge.shutdown().await {
            log::warn!("Failed to close the PLC session: {}", e);
        }
    }

    let response = outcome?;
    println!("{}", response);
    Ok(())
}
