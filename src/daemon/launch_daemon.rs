// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the cnc-profinet-bridge project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Daemon launcher
//!
//! Starts the long-running parts of the bridge:
//! - the simulated PLC gateway, when `simulator.enabled` is set
//! - the CNC bridge and its Modbus TCP session
//! - the status poller logging `READY` and CNC flag transitions
//! - a heartbeat
//!
//! The daemon system allows for graceful startup and shutdown of these services,
//! with all tasks watching a shared `running` flag.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time;

use crate::bridge::CncBridge;
use crate::config::Config;
use crate::handshake::StatusSnapshot;
use crate::modbus::serve_simulator;
use crate::transport::{RegisterMap, SimulatedPlc};

/// Longest a task sleeps before checking the `running` flag again.
const RUNNING_CHECK_INTERVAL: Duration = Duration::from_millis(250);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep for `duration`, returning early once `running` is cleared.
async fn sleep_while_running(running: &AtomicBool, duration: Duration) {
    let mut remaining = duration;
    while !remaining.is_zero() && running.load(Ordering::SeqCst) {
        let step = remaining.min(RUNNING_CHECK_INTERVAL);
        time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
}

/// Main daemon structure that manages the bridge and its background tasks
///
/// # Fields
///
/// * `tasks` - Collection of task handles for all spawned background tasks
/// * `running` - Atomic flag shared between tasks to coordinate shutdown
/// * `bridge` - The CNC bridge, available once launched
/// * `simulator` - Image of the simulated gateway, when enabled
/// * `simulator_addr` - Address the simulated gateway listens on
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    bridge: Option<Arc<CncBridge>>,
    simulator: Option<SimulatedPlc>,
    simulator_addr: Option<SocketAddr>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            bridge: None,
            simulator: None,
            simulator_addr: None,
        }
    }

    /// Launch all configured tasks based on configuration
    ///
    /// With the simulator enabled the bridge connects to the simulated
    /// gateway instead of `config.plc`.
    ///
    /// # Errors
    ///
    /// Fails if the simulator cannot bind its address or if the bridge cannot
    /// open its session to the PLC.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let mut effective = config.clone();

        if config.simulator.enabled {
            let addr = self.start_simulator(config).await?;
            effective.plc.address = addr.ip().to_string();
            effective.plc.port = addr.port();
        }

        let bridge = Arc::new(
            CncBridge::from_config(&effective).context("Failed to create the CNC bridge")?,
        );
        info!(
            "Connecting to PLC gateway at {}:{}",
            effective.plc.address, effective.plc.port
        );
        bridge
            .connect()
            .await
            .context("Failed to connect to the PLC gateway")?;
        self.bridge = Some(bridge.clone());

        if config.handshake.poll_interval_ms > 0 {
            self.start_status_poller(
                bridge,
                Duration::from_millis(config.handshake.poll_interval_ms),
            )?;
        } else {
            debug!("Status poller disabled");
        }

        self.start_heartbeat()?;

        Ok(())
    }

    /// The running bridge, `None` before [`Daemon::launch`].
    pub fn bridge(&self) -> Option<Arc<CncBridge>> {
        self.bridge.clone()
    }

    /// Image of the simulated gateway, when enabled.
    pub fn simulator(&self) -> Option<&SimulatedPlc> {
        self.simulator.as_ref()
    }

    /// Address the simulated gateway listens on, when enabled.
    pub fn simulator_addr(&self) -> Option<SocketAddr> {
        self.simulator_addr
    }

    /// Bind and serve the simulated gateway
    ///
    /// The listener is bound before returning so a busy port is reported to
    /// the caller. The server task is aborted once `running` is cleared.
    async fn start_simulator(&mut self, config: &Config) -> Result<SocketAddr> {
        let bind_addr = format!("{}:{}", config.simulator.address, config.simulator.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind the PLC simulator on {}", bind_addr))?;
        let local_addr = listener.local_addr()?;
        info!("Starting PLC simulator on {}", local_addr);

        let plc = SimulatedPlc::with_loopback(
            RegisterMap::from(&config.plc),
            config.simulator.loopback,
        );
        self.simulator = Some(plc.clone());
        self.simulator_addr = Some(local_addr);

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let server_handle = tokio::spawn(async move {
                if let Err(e) = serve_simulator(listener, plc).await {
                    error!("PLC simulator error: {}", e);
                }
            });

            while running.load(Ordering::SeqCst) {
                time::sleep(RUNNING_CHECK_INTERVAL).await;
            }

            info!("Shutting down PLC simulator...");
            server_handle.abort();
            match time::timeout(JOIN_TIMEOUT, server_handle).await {
                Ok(_) => info!("PLC simulator shut down successfully"),
                Err(_) => warn!("PLC simulator shutdown timed out, forcing termination"),
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(local_addr)
    }

    /// Start the status poller
    ///
    /// Every `interval` the poller reads `READY` and the status area and
    /// logs what changed since the previous poll. On a connection-level
    /// failure it tries to reopen the session before the next poll; reads
    /// are side-effect free so this never repeats a command.
    fn start_status_poller(&mut self, bridge: Arc<CncBridge>, interval: Duration) -> Result<()> {
        info!("Starting status poller every {:?}", interval);

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let mut previous: Option<StatusSnapshot> = None;

            while running.load(Ordering::SeqCst) {
                match bridge.handshake().read_status().await {
                    Ok(snapshot) => {
                        log_transitions(previous.as_ref(), &snapshot);
                        previous = Some(snapshot);
                    }
                    Err(e) if e.is_connection_error() => {
                        warn!("Status poll failed: {}", e);
                        previous = None;
                        if let Err(e) = bridge.connect().await {
                            warn!("Reconnection to the PLC gateway failed: {}", e);
                        } else {
                            info!("Reconnected to the PLC gateway");
                        }
                    }
                    Err(e) => {
                        warn!("Status poll failed: {}", e);
                    }
                }
                sleep_while_running(&running, interval).await;
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start a heartbeat task that logs system status periodically
    fn start_heartbeat(&mut self) -> Result<()> {
        info!("Starting heartbeat monitor");

        let running = self.running.clone();
        let bridge = self.bridge.clone();
        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let connected = match &bridge {
                    Some(bridge) => bridge.is_connected().await,
                    None => false,
                };
                debug!("Daemon heartbeat: running, PLC connected: {}", connected);
                sleep_while_running(&running, HEARTBEAT_INTERVAL).await;
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete, then close the PLC session
    ///
    /// Should be called after [`Daemon::shutdown`]. A task that panics or
    /// does not finish within 5 seconds is logged and skipped.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match time::timeout(JOIN_TIMEOUT, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("Task failed: {}", e),
                Ok(Err(e)) => error!("Task panicked: {}", e),
                Err(_) => warn!("Task did not complete within timeout period, may be hung"),
            }
        }

        if let Some(bridge) = self.bridge {
            if let Err(e) = bridge.shutdown().await {
                warn!("Failed to close the PLC session: {}", e);
            }
        }
        Ok(())
    }
}

fn log_transitions(previous: Option<&StatusSnapshot>, current: &StatusSnapshot) {
    let Some(previous) = previous else {
        info!("PLC status: {}", current.to_json());
        return;
    };

    if previous.ready != current.ready {
        info!(
            "READY changed: {} -> {}",
            previous.ready as u8, current.ready as u8
        );
    }
    for (flag, value) in current.changes_since(previous) {
        info!("Flag {} changed to {}", flag, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulated_config() -> Config {
        let mut config = Config::default();
        config.simulator.enabled = true;
        config.simulator.port = 0;
        config.handshake.poll_interval_ms = 50;
        config
    }

    #[tokio::test]
    async fn test_daemon_runs_bridge_against_simulator() {
        let mut daemon = Daemon::new();
        daemon.launch(&simulated_config()).await.unwrap();

        assert!(daemon.simulator_addr().is_some());
        let bridge = daemon.bridge().unwrap();
        assert!(bridge.is_connected().await);

        let response = bridge
            .execute_command_v2(
                "set_handshake_flag",
                r#"{"flag": "finished_loading", "value": true}"#,
            )
            .await
            .unwrap();
        assert!(response.contains("\"result\":1"));
        assert_eq!(daemon.simulator().unwrap().image().output_byte(1), 0b0000_0010);

        daemon.shutdown();
        daemon.join().await.unwrap();
        assert!(!bridge.is_connected().await);
    }

    #[tokio::test]
    async fn test_launch_fails_without_gateway() {
        let mut config = Config::default();
        // Nothing listens on the discard port
        config.plc.address = "127.0.0.1".to_string();
        config.plc.port = 9;
        config.plc.timeout_ms = 500;

        let mut daemon = Daemon::new();
        assert!(daemon.launch(&config).await.is_err());
        assert!(daemon.bridge().is_none());
    }

    #[tokio::test]
    async fn test_sleep_while_running_returns_early() {
        let running = AtomicBool::new(false);
        let started = std::time::Instant::now();
        sleep_while_running(&running, Duration::from_secs(30)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
