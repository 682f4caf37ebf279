//! cmdlink - wrap command-line programs with streaming capture and control.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cmdlink::config::CmdlinkConfig;
use cmdlink::display::{self, ConsoleTransport, CONSOLE_OBSERVER_ID};
use cmdlink::session::{SessionOrchestrator, SessionSpec, SessionStatus, StaticRegistry};

#[derive(Parser)]
#[command(
    name = "cmdlink",
    about = "Wrap command-line programs with streaming capture and control",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single wrapped command, streaming its output.
    Run {
        /// The command to execute.
        command: String,
        /// Arguments passed to the command.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Tool label override (otherwise resolved from the registry).
        #[arg(long)]
        tool: Option<String>,
        /// Working directory for the command.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Environment overrides as KEY=VALUE (repeatable).
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,
        /// Execute through `sh -c` instead of direct exec.
        #[arg(long)]
        shell: bool,
        /// Kill the command after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Suppress lifecycle banners, printing raw output only.
        #[arg(short, long)]
        quiet: bool,
    },
}

fn parse_env(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{value}`"))
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = CmdlinkConfig::load_or_default(cli.config.as_deref());

    match cli.command {
        Commands::Run {
            command,
            args,
            tool,
            cwd,
            env,
            shell,
            timeout,
            quiet,
        } => {
            let mut spec = SessionSpec::new(command)
                .args(args)
                .use_shell(shell)
                .manual_start();
            if let Some(tool) = tool {
                spec = spec.tool(tool);
            }
            if let Some(cwd) = cwd {
                spec = spec.working_dir(cwd);
            }
            for (key, value) in env {
                spec = spec.env(key, value);
            }
            if let Some(secs) = timeout {
                spec = spec.run_timeout(Duration::from_secs(secs));
            }

            let code = run_command(config, &spec, quiet).await;
            std::process::exit(code);
        }
    }
}

/// Wrap one command to completion; returns the process exit code to forward.
async fn run_command(config: CmdlinkConfig, spec: &SessionSpec, quiet: bool) -> i32 {
    let mut orchestrator = SessionOrchestrator::new(
        config,
        Box::new(StaticRegistry::with_known_tools()),
        Arc::new(ConsoleTransport::new(quiet)),
    );

    let id = match orchestrator.create_session(spec) {
        Ok(id) => id,
        Err(e) => {
            display::print_error(&e.to_string());
            return 1;
        }
    };
    if let Err(e) = orchestrator.attach_observer(&id, CONSOLE_OBSERVER_ID) {
        display::print_error(&e.to_string());
        return 1;
    }
    if !quiet {
        if let Ok(snapshot) = orchestrator.snapshot(&id) {
            display::print_session_start(&snapshot.tool, &id, &snapshot.command);
        }
    }
    if let Err(e) = orchestrator.start_session(&id) {
        display::print_error(&e.to_string());
        return 1;
    }

    let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
    tokio::spawn(forward_stdin(stdin_tx));

    // Drive events, stdin forwarding, flush deadlines, and Ctrl-C on one
    // thread of control until the session reaches a terminal state.
    let mut flush_tick = tokio::time::interval(Duration::from_millis(500));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut interrupted = false;

    loop {
        tokio::select! {
            alive = orchestrator.pump() => {
                if !alive {
                    break;
                }
            }
            maybe_line = stdin_rx.recv() => {
                if let Some(line) = maybe_line {
                    let text = format!("{line}\n");
                    if let Err(e) = orchestrator
                        .send_input(&id, &text, Some(CONSOLE_OBSERVER_ID))
                        .await
                    {
                        tracing::debug!(error = %e, "input dropped");
                    }
                }
            }
            _ = flush_tick.tick() => {
                orchestrator.flush_stale_lines();
            }
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    let force = interrupted;
                    interrupted = true;
                    tracing::info!(force, "interrupt received, terminating session");
                    if let Err(e) = orchestrator.terminate_session(&id, force) {
                        tracing::debug!(error = %e, "terminate on interrupt failed");
                    }
                }
            }
        }

        match orchestrator.snapshot(&id) {
            Ok(snapshot) if snapshot.status.is_terminal() => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    orchestrator.drain_pending();

    let Ok(snapshot) = orchestrator.snapshot(&id) else {
        return 1;
    };
    if !quiet {
        display::print_session_end(snapshot.exit_code, snapshot.signal);
    }
    match (snapshot.status, snapshot.exit_code, snapshot.signal) {
        (SessionStatus::Terminated, Some(code), _) => code,
        (SessionStatus::Terminated, None, Some(signal)) => 128 + signal,
        _ => 1,
    }
}

/// Forward terminal input lines to the session, until EOF.
async fn forward_stdin(tx: mpsc::Sender<String>) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}
