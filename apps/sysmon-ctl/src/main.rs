use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgGroup, CommandFactory, Parser};
use sysmon_common::{EnforcementMode, FsmConfig, OperationKind, ProcessId};
use sysmon_framework::control::protocol::DEFAULT_SOCKET_PATH;
use sysmon_framework::control::ControlClient;
use sysmon_framework::{ControlChannel, ControlRequest, Fsm, Orchestrator, OrchestratorConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "sysmon-ctl",
    about = "Control the sysmon agent: set the enforcement mode, the monitored syscall and process, or cycle through an FSM",
    group(ArgGroup::new("mode").args(["off", "log", "block"]))
)]
struct Args {
    /// Disable monitoring
    #[arg(long)]
    off: bool,

    /// Log calls to the target syscall
    #[arg(long)]
    log: bool,

    /// Deny calls to the target syscall
    #[arg(long)]
    block: bool,

    /// Target syscall: open, read or write
    #[arg(long, value_name = "NAME", value_parser = parse_operation)]
    syscall: Option<OperationKind>,

    /// Only act on this process (-1 for all processes)
    #[arg(long, allow_negative_numbers = true)]
    pid: Option<ProcessId>,

    /// Run the FSM described by this JSON file (requires --log)
    #[arg(long, value_name = "FSM_JSON", requires = "log")]
    file: Option<PathBuf>,

    /// Agent control socket
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    /// FSM poll interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Give up on a state after this many polls (at least 1)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    max_polls: Option<u32>,
}

impl Args {
    fn mode(&self) -> Option<EnforcementMode> {
        if self.off {
            Some(EnforcementMode::Off)
        } else if self.log {
            Some(EnforcementMode::Log)
        } else if self.block {
            Some(EnforcementMode::Block)
        } else {
            None
        }
    }

    fn has_action(&self) -> bool {
        self.mode().is_some() || self.syscall.is_some() || self.pid.is_some()
    }
}

fn parse_operation(name: &str) -> Result<OperationKind, String> {
    name.parse::<OperationKind>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    if std::env::args_os().len() <= 1 {
        let _ = Args::command().print_help();
        return ExitCode::FAILURE;
    }
    let args = Args::parse();
    if !args.has_action() {
        let _ = Args::command().print_help();
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("[ERROR] {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let client = ControlClient::connect(&args.socket).await.with_context(|| {
        format!(
            "cannot reach the sysmon agent at {}; is sysmon-agent running?",
            args.socket.display()
        )
    })?;

    if let Some(mode) = args.mode() {
        let ack = client.apply(ControlRequest::SetMode(mode)).await?;
        println!("[INFO] Mode changed to: {}", ack.snapshot.mode);
    }
    if let Some(operation) = args.syscall {
        let ack = client
            .apply(ControlRequest::SetTargetOperation(operation))
            .await?;
        println!("[INFO] Target syscall changed to: {}", ack.snapshot.target);
    }
    if let Some(pid) = args.pid {
        let ack = client.apply(ControlRequest::SetTargetProcess(pid)).await?;
        println!(
            "[INFO] Target PID changed to: {}",
            ack.snapshot.process_filter.raw()
        );
    }

    let Some(path) = &args.file else {
        client.close().await?;
        return Ok(());
    };

    let config = FsmConfig::from_file(path)
        .with_context(|| format!("failed to load FSM from {}", path.display()))?;
    let fsm = Fsm::from_config(&config)?;
    println!(
        "[FSM] Loaded FSM with {} states: {}",
        fsm.len(),
        config.describe()
    );
    println!("[FSM] Press Ctrl+C to stop");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            println!("\n[FSM] Stopping...");
            on_interrupt.cancel();
        }
    });

    let client = Arc::new(client);
    let orchestrator_config = OrchestratorConfig {
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        max_polls: args.max_polls,
        ..OrchestratorConfig::default()
    };
    let mut orchestrator =
        Orchestrator::new(Arc::clone(&client), Arc::clone(&client), fsm, orchestrator_config);
    let result = orchestrator.run(&cancel).await;
    drop(orchestrator);

    if let Ok(client) = Arc::try_unwrap(client) {
        client.close().await?;
    }
    result?;
    Ok(())
}
