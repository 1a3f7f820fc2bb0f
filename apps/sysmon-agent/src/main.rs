use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use serde::{Deserialize, Serialize};
use sysmon_common::{EnforcementMode, OperationKind, ProcessFilter, ProcessId, ANY_PROCESS};
use sysmon_framework::control::protocol::DEFAULT_SOCKET_PATH;
use sysmon_framework::control::ControlServer;
use sysmon_framework::event_sink::DEFAULT_CAPACITY;
use sysmon_framework::{EventSink, KernelController, LocalChannel, PolicySnapshot, PolicyStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "sysmon-agent")]
struct Args {
    /// Path to the compiled kprobe object
    #[arg(short, long, default_value = "target/bpfel-unknown-none/release/sysmon-ebpf")]
    bpf_obj: PathBuf,

    /// Control socket to listen on
    #[arg(short, long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// Initial policy and sizing (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Events kept in memory for pollers (overrides the config file)
    #[arg(long)]
    event_capacity: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AgentConfig {
    #[serde(default)]
    mode: EnforcementMode,
    #[serde(default = "default_target")]
    target: OperationKind,
    #[serde(default = "default_pid")]
    pid: ProcessId,
    #[serde(default)]
    event_capacity: Option<usize>,
}

fn default_target() -> OperationKind {
    OperationKind::Open
}

fn default_pid() -> ProcessId {
    ANY_PROCESS
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            mode: EnforcementMode::Off,
            target: default_target(),
            pid: default_pid(),
            event_capacity: None,
        }
    }
}

impl AgentConfig {
    fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        info!("Loaded agent configuration from {}", path.display());
        Ok(config)
    }

    fn initial_policy(&self) -> PolicySnapshot {
        PolicySnapshot {
            mode: self.mode,
            target: self.target,
            process_filter: ProcessFilter::from_raw(self.pid),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let args = Args::parse();

    // 1. Load config
    let config = match &args.config {
        Some(path) => AgentConfig::from_file(path)?,
        None => AgentConfig::default(),
    };
    let capacity = args
        .event_capacity
        .or(config.event_capacity)
        .unwrap_or(DEFAULT_CAPACITY);
    let sink = Arc::new(EventSink::with_capacity(capacity));
    let store = Arc::new(PolicyStore::with_snapshot(config.initial_policy()));

    // 2. Load and attach probes, then push the initial policy into the kernel
    let mut kernel = KernelController::start(&args.bpf_obj, Arc::clone(&sink))?;
    let channel = Arc::new(LocalChannel::new(Arc::clone(&store)).with_mirror(kernel.mirror()));
    channel.sync_mirror()?;
    let policy = store.snapshot();
    info!(
        "Initial policy: mode={} target={} pid={}",
        policy.mode,
        policy.target,
        policy.process_filter.raw()
    );

    // 3. Serve the control socket
    let cancel = CancellationToken::new();
    let server = ControlServer::bind(&args.socket, Arc::clone(&channel), Arc::clone(&sink))?;
    let server_task = tokio::spawn(server.serve(cancel.clone()));

    // 4. Process events
    info!("Agent is running. Press Ctrl+C to stop.");
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        kernel.pump_events();
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Received Ctrl+C, cleaning up...");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {}
        }
    }

    cancel.cancel();
    if let Err(e) = server_task.await {
        error!("Control server task failed: {}", e);
    }
    kernel.pump_events();
    let detached = kernel.attached().len();
    drop(kernel);
    info!("Detached {} kprobes, {} events recorded", detached, sink.len());
    Ok(())
}
