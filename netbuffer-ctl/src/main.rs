use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use netbuffer_ctl::{
    Command, ComposeBackend, ComposeProject, ConfigError, ContainerStatus, Descriptor, Error,
    LogOptions, Outcome, Runtime, dispatch,
};
use tabled::{Table, Tabled};
use tokio::sync::oneshot;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netbuffer", version)]
#[command(about = "Lifecycle commands for the netbuffer service", long_about = None)]
struct Cli {
    /// Service descriptor file
    #[arg(short, long, global = true, default_value = "netbuffer.json")]
    file: PathBuf,

    /// Orchestration command line
    #[arg(long, global = true, default_value = "docker compose")]
    compose: String,

    /// More log output (repeat for trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the image if needed and start the service detached
    Run,

    /// Stop the running service
    Stop,

    /// Follow service logs (exit with Ctrl+C)
    Logs {
        /// Number of lines to show from the end of the logs
        #[arg(short = 'n', long)]
        tail: Option<u32>,

        /// Show timestamps
        #[arg(short, long)]
        timestamps: bool,
    },

    /// Restart the service in place
    Restart,

    /// Open an interactive session inside the running container
    Shell {
        /// Command to run instead of the configured shell
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Reclaim unused runtime resources
    Clean,

    /// Show container status
    Ps {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

impl From<Commands> for Command {
    fn from(cmd: Commands) -> Self {
        match cmd {
            Commands::Run => Command::Run,
            Commands::Stop => Command::Stop,
            Commands::Logs { tail, timestamps } => Command::Logs(LogOptions { tail, timestamps }),
            Commands::Restart => Command::Restart,
            Commands::Shell { command } => Command::Shell(command),
            Commands::Clean => Command::Clean,
            Commands::Ps { .. } => Command::Ps,
        }
    }
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "PORTS")]
    ports: String,
}

impl From<ContainerStatus> for StatusRow {
    fn from(c: ContainerStatus) -> Self {
        Self {
            name: c.name,
            service: c.service,
            state: c.state,
            status: c.status,
            ports: if c.ports.is_empty() {
                "-".to_string()
            } else {
                c.ports.join(", ")
            },
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["netbuffer_ctl", "netbuffer"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

/// Execute one lifecycle command and return the process exit status.
async fn execute(cli: Cli) -> Result<i32, Error> {
    // Descriptor and runtime are validated before anything touches the
    // container runtime.
    let descriptor = Descriptor::load(&cli.file)?;
    let runtime = Runtime::parse(&cli.compose).ok_or_else(|| ConfigError::Invalid {
        field: "compose",
        reason: "empty command line".to_string(),
    })?;

    let project = ComposeProject::prepare(&descriptor).await?;
    let backend = ComposeBackend::new(runtime, project);

    // Interrupts end an attached log stream. Holding the handler also keeps
    // an interactive shell's Ctrl+C from killing this process.
    let (cancel_tx, cancel_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(());
        }
    });

    let json = matches!(cli.command, Commands::Ps { json: true });
    let command = Command::from(cli.command);
    let name = command.name();

    let outcome = dispatch(command, &backend, &descriptor.shell, cancel_rx).await?;

    match &outcome {
        Outcome::Done => match name {
            "run" => println!(
                "Started {} on port {}",
                descriptor.name, descriptor.host_port
            ),
            "stop" => println!("Stopped {}", descriptor.name),
            "restart" => println!("Restarted {}", descriptor.name),
            "clean" => println!("Pruned unused runtime resources"),
            _ => {}
        },
        Outcome::Streamed { lines } => debug!(lines, "Log stream closed"),
        Outcome::Snapshot(status) => print_status(status, json),
        Outcome::Session { exit_code } => debug!(exit_code, "Shell session ended"),
    }

    Ok(outcome.exit_code())
}

fn print_status(status: &[ContainerStatus], json: bool) {
    if json {
        match serde_json::to_string_pretty(status) {
            Ok(out) => println!("{out}"),
            Err(e) => eprintln!("Error: {e}"),
        }
    } else if status.is_empty() {
        println!("No containers found");
    } else {
        let rows: Vec<StatusRow> = status.iter().cloned().map(StatusRow::from).collect();
        println!("{}", Table::new(rows));
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match execute(cli).await {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("Error: {e}");
            exit_code(e.exit_code())
        }
    }
}
