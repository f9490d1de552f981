//! gaze-dwell daemon: dwell-based gaze interaction over a Unix socket.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gaze_dwell::config::EngineConfig;
use gaze_dwell::daemon::{self, DaemonOptions};
use gaze_dwell::replay;
use gaze_dwell::state::DaemonState;

#[derive(Parser, Debug)]
#[command(name = "gaze-dwell", about = "Dwell-based gaze interaction engine")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/gaze-dwell/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// IPC socket path (default: $XDG_RUNTIME_DIR/gaze-dwell.sock)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Host tick period in milliseconds
    #[arg(long, default_value = "50")]
    tick_ms: u64,

    /// Exit after N seconds
    #[arg(long)]
    exit_after: Option<u64>,

    /// Write the active config back to the config file on shutdown
    #[arg(long)]
    persist_config: bool,

    /// Replay a trace file against one engine, print effects and exit
    #[arg(long, value_name = "TRACE")]
    replay: Option<PathBuf>,

    /// Log all IPC messages to stderr
    #[arg(long)]
    ipc_trace: bool,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("gaze-dwell").join("config.json"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("gaze-dwell {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gaze_dwell=info".into()),
        )
        .init();

    let config_path = cli.config.clone().or_else(default_config_path);
    let config = match &config_path {
        Some(path) => EngineConfig::load_or_default(path)?,
        None => EngineConfig::default(),
    };

    if let Some(trace) = cli.replay {
        let engine = replay::replay_file(&trace, config, cli.tick_ms as f64)
            .with_context(|| format!("replay of {} failed", trace.display()))?;
        for line in replay::effect_lines(engine.effectors()) {
            println!("{}", line);
        }
        println!("{}", engine.status_sexp());
        return Ok(());
    }

    info!("gaze-dwell v{} starting", env!("CARGO_PKG_VERSION"));

    let mut state = DaemonState::with_system_clock(config);
    state.config_path = config_path;
    state.persist_config = cli.persist_config;

    daemon::run(
        state,
        DaemonOptions {
            socket_path: cli.socket,
            tick_ms: cli.tick_ms,
            exit_after: cli.exit_after,
            ipc_trace: cli.ipc_trace,
            ..DaemonOptions::default()
        },
    )
}
