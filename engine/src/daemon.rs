//! Daemon mode: calloop event loop around the IPC server.
//!
//! Host ticks run on a repeating timer so signal loss and calibration
//! timeouts progress even when no gaze samples arrive. SIGTERM/SIGINT
//! request a graceful shutdown; the socket is removed on exit.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use calloop::signals::{Signal, Signals};
use calloop::timer::{TimeoutAction, Timer};
use calloop::EventLoop;
use tracing::{info, warn};

use crate::ipc::IpcServer;
use crate::state::DaemonState;

/// Event loop parameters.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    /// Override the IPC socket path.
    pub socket_path: Option<PathBuf>,
    /// Host tick period in milliseconds.
    pub tick_ms: u64,
    /// Maximum time to block waiting for events.
    pub poll_interval_ms: u64,
    /// Exit after N seconds (for CI).
    pub exit_after: Option<u64>,
    /// Log all IPC messages.
    pub ipc_trace: bool,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            socket_path: None,
            tick_ms: 50,
            poll_interval_ms: 10,
            exit_after: None,
            ipc_trace: false,
        }
    }
}

/// Run the daemon until a signal, the exit timer or a session exit.
pub fn run(mut state: DaemonState, options: DaemonOptions) -> anyhow::Result<()> {
    let mut event_loop = EventLoop::<DaemonState>::try_new()?;
    let handle = event_loop.handle();

    state.ipc_server.ipc_trace = options.ipc_trace;
    let ipc_path = options
        .socket_path
        .clone()
        .unwrap_or_else(IpcServer::default_socket_path);
    state.ipc_server.socket_path = ipc_path.clone();
    IpcServer::bind(&ipc_path, &handle)?;

    let signals = Signals::new(&[Signal::SIGTERM, Signal::SIGINT])
        .map_err(|e| anyhow!("failed to create signal source: {}", e))?;
    handle
        .insert_source(signals, |event, _, state: &mut DaemonState| {
            info!("Received signal {:?}, initiating graceful shutdown", event.signal());
            state.running = false;
        })
        .map_err(|e| anyhow!("failed to register signal handler: {}", e.error))?;

    if let Some(seconds) = options.exit_after {
        info!("Will exit after {} seconds", seconds);
        handle
            .insert_source(
                Timer::from_duration(Duration::from_secs(seconds)),
                |_, _, state: &mut DaemonState| {
                    info!("exit timer fired");
                    state.running = false;
                    TimeoutAction::Drop
                },
            )
            .map_err(|e| anyhow!("failed to register exit timer: {}", e.error))?;
    }

    let tick = Duration::from_millis(options.tick_ms.max(1));
    handle
        .insert_source(Timer::from_duration(tick), move |_, _, state: &mut DaemonState| {
            state.tick_all();
            TimeoutAction::ToDuration(tick)
        })
        .map_err(|e| anyhow!("failed to register tick timer: {}", e.error))?;

    // Periodic status logging (every 60 seconds)
    handle
        .insert_source(
            Timer::from_duration(Duration::from_secs(60)),
            |_, _, state: &mut DaemonState| {
                info!(
                    surfaces = state.surfaces.len(),
                    clients = state.ipc_server.clients.len(),
                    gaze_samples = state.gaze_samples,
                    tracking = state.session.tracking_enabled(),
                    "daemon status"
                );
                TimeoutAction::ToDuration(Duration::from_secs(60))
            },
        )
        .map_err(|e| anyhow!("failed to register status timer: {}", e.error))?;

    let poll_interval = Duration::from_millis(options.poll_interval_ms.max(1));
    info!(
        tick_ms = options.tick_ms,
        poll_interval_ms = options.poll_interval_ms,
        "gaze-dwell daemon initialized, entering event loop"
    );

    while state.running {
        IpcServer::poll_clients(&mut state);
        event_loop.dispatch(Some(poll_interval), &mut state)?;
        state.flush_outbound();
    }

    // Deliver whatever the final tick queued (session-exit status).
    IpcServer::poll_clients(&mut state);

    if let Err(e) = std::fs::remove_file(&state.ipc_server.socket_path) {
        warn!("failed to remove IPC socket: {}", e);
    }
    if state.persist_config {
        match state.save_config() {
            Ok(path) => info!(path = %path.display(), "configuration persisted"),
            Err(e) => warn!("failed to persist configuration: {:#}", e),
        }
    }

    info!(
        surfaces = state.surfaces.len(),
        clients = state.ipc_server.clients.len(),
        "gaze-dwell daemon shutting down"
    );
    Ok(())
}
