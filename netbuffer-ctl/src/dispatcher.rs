//! Lifecycle dispatcher: one command per invocation, mapped onto exactly
//! one backend operation.

use tracing::debug;

use crate::backend::{Backend, Cancel, ContainerStatus, LogOptions};
use crate::error::BackendError;

/// Operator-facing lifecycle commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Build the image if needed and start the service detached.
    Run,
    /// Stop the running service.
    Stop,
    /// Follow combined service logs until cancelled.
    Logs(LogOptions),
    /// Restart the service in place.
    Restart,
    /// Interactive session inside the running container. Empty means the
    /// descriptor's shell.
    Shell(Vec<String>),
    /// Reclaim unused runtime resources.
    Clean,
    /// Container status snapshot.
    Ps,
}

impl Command {
    /// Every command, in help order.
    #[cfg(test)]
    pub const NAMES: [&'static str; 7] = [
        "run", "stop", "logs", "restart", "shell", "clean", "ps",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::Run => "run",
            Command::Stop => "stop",
            Command::Logs(_) => "logs",
            Command::Restart => "restart",
            Command::Shell(_) => "shell",
            Command::Clean => "clean",
            Command::Ps => "ps",
        }
    }
}

/// Terminal result of a successful invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// Log stream ended, either by operator interrupt or by the runtime.
    Streamed { lines: u64 },
    Snapshot(Vec<ContainerStatus>),
    /// Shell session finished with the given exit code.
    Session { exit_code: i32 },
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Session { exit_code } => *exit_code,
            _ => 0,
        }
    }
}

/// Execute `command` against `backend`.
///
/// Backend errors are returned untouched. No retry, rollback or implicit
/// recovery is attempted.
pub async fn dispatch<B: Backend + ?Sized>(
    command: Command,
    backend: &B,
    default_shell: &[String],
    cancel: Cancel,
) -> Result<Outcome, BackendError> {
    let name = command.name();
    debug!(command = name, "Dispatching");

    let result = match command {
        Command::Run => backend.build_and_start().await.map(|()| Outcome::Done),
        Command::Stop => backend.stop().await.map(|()| Outcome::Done),
        Command::Logs(options) => backend
            .stream_logs(&options, cancel)
            .await
            .map(|lines| Outcome::Streamed { lines }),
        Command::Restart => backend.restart().await.map(|()| Outcome::Done),
        Command::Shell(cmd) => {
            let cmd = if cmd.is_empty() {
                default_shell
            } else {
                cmd.as_slice()
            };
            backend
                .exec_shell(cmd)
                .await
                .map(|exit_code| Outcome::Session { exit_code })
        }
        Command::Clean => backend.prune().await.map(|()| Outcome::Done),
        Command::Ps => backend.list_status().await.map(Outcome::Snapshot),
    };

    // The caller prints the single diagnostic line.
    if let Err(e) = &result {
        debug!(command = name, fatal = e.is_fatal(), "Command failed");
    }
    result
}
