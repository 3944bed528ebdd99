//! Compose backend: drives the project through the `docker compose` CLI
//! (or a compatible implementation).

use std::io::IsTerminal;
use std::os::unix::process::ExitStatusExt;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::{Backend, Cancel, ContainerStatus, LogOptions};
use crate::error::BackendError;
use crate::recipe::ComposeProject;

/// How to invoke the orchestration CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runtime {
    /// Executable, e.g. `docker`.
    pub program: String,
    /// Leading arguments selecting compose, e.g. `["compose"]`.
    pub compose_args: Vec<String>,
    /// Container engine used for system-wide verbs (`system prune`).
    pub engine: String,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            compose_args: vec!["compose".to_string()],
            engine: "docker".to_string(),
        }
    }
}

impl Runtime {
    /// Parse a command line such as `docker compose`, `podman compose` or
    /// `docker-compose`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        let compose_args: Vec<String> = parts.collect();
        let engine = if compose_args.is_empty() {
            program
                .strip_suffix("-compose")
                .unwrap_or(&program)
                .to_string()
        } else {
            program.clone()
        };
        Some(Self {
            program,
            compose_args,
            engine,
        })
    }
}

/// Backend bound to a single compose project for one invocation.
pub struct ComposeBackend {
    runtime: Runtime,
    project: ComposeProject,
}

impl ComposeBackend {
    pub fn new(runtime: Runtime, project: ComposeProject) -> Self {
        Self { runtime, project }
    }

    fn compose(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.runtime.program);
        cmd.args(&self.runtime.compose_args)
            .arg("-p")
            .arg(&self.project.name)
            .arg("-f")
            .arg(&self.project.compose_file)
            .args(args)
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> BackendError {
        BackendError::Spawn {
            program: self.runtime.program.clone(),
            source,
        }
    }

    /// Run a short-lived compose command, capturing its output.
    async fn run(&self, args: &[&str]) -> Result<Output, BackendError> {
        debug!(
            program = %self.runtime.program,
            args = %args.join(" "),
            "Executing compose command"
        );
        self.compose(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))
    }

    /// Containers of the managed service (all states).
    async fn service_containers(&self) -> Result<Vec<ContainerStatus>, BackendError> {
        let all = self.list_status().await?;
        Ok(all
            .into_iter()
            .filter(|c| c.service == self.project.service)
            .collect())
    }
}

/// The runtime's final diagnostic: the last non-empty stderr line. Build
/// progress and earlier lines only go to the debug log.
fn failure_message(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(status = %output.status, stderr = %stderr.trim_end(), "Compose command failed");
    match stderr.lines().map(str::trim).rev().find(|l| !l.is_empty()) {
        Some(line) => line.to_string(),
        None => format!("exited with {}", output.status),
    }
}

#[async_trait]
impl Backend for ComposeBackend {
    async fn build_and_start(&self) -> Result<(), BackendError> {
        info!(project = %self.project.name, "Building image");
        let output = self.run(&["build"]).await?;
        if !output.status.success() {
            return Err(BackendError::Build(failure_message(&output)));
        }

        info!(project = %self.project.name, "Starting service");
        let output = self.run(&["up", "-d"]).await?;
        if !output.status.success() {
            return Err(BackendError::Start(failure_message(&output)));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), BackendError> {
        info!(project = %self.project.name, "Stopping service");
        let output = self.run(&["stop"]).await?;
        if !output.status.success() {
            return Err(BackendError::Stop(failure_message(&output)));
        }
        Ok(())
    }

    async fn stream_logs(
        &self,
        options: &LogOptions,
        mut cancel: Cancel,
    ) -> Result<u64, BackendError> {
        if self.service_containers().await?.is_empty() {
            return Err(BackendError::NotFound(self.project.service.clone()));
        }

        let tail = options.tail.map(|n| n.to_string());
        let mut args = vec!["logs", "-f", "--no-color"];
        if let Some(tail) = &tail {
            args.extend(["--tail", tail.as_str()]);
        }
        if options.timestamps {
            args.push("-t");
        }
        args.push(&self.project.service);

        debug!(args = %args.join(" "), "Attaching to log stream");
        let mut child = self
            .compose(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let Some(stdout) = child.stdout.take() else {
            return Err(self.spawn_error(std::io::Error::other("log stream has no stdout")));
        };
        let mut lines = BufReader::new(stdout).lines();
        let mut out = tokio::io::stdout();
        let mut relayed = 0u64;
        let mut cancel_open = true;

        loop {
            tokio::select! {
                res = &mut cancel, if cancel_open => {
                    match res {
                        Ok(()) => {
                            debug!(lines = relayed, "Log stream cancelled");
                            let _ = child.kill().await;
                            return Ok(relayed);
                        }
                        // Sender gone without a request: keep following.
                        Err(_) => cancel_open = false,
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if out.write_all(line.as_bytes()).await.is_err()
                                || out.write_all(b"\n").await.is_err()
                            {
                                let _ = child.kill().await;
                                return Ok(relayed);
                            }
                            let _ = out.flush().await;
                            relayed += 1;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = child.kill().await;
                            return Err(self.spawn_error(e));
                        }
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|e| self.spawn_error(e))?;
        if !status.success() {
            return Err(BackendError::NotFound(self.project.service.clone()));
        }
        Ok(relayed)
    }

    async fn restart(&self) -> Result<(), BackendError> {
        if self.service_containers().await?.is_empty() {
            return Err(BackendError::Restart(format!(
                "no containers for project {}",
                self.project.name
            )));
        }

        info!(project = %self.project.name, "Restarting service");
        let output = self.run(&["restart"]).await?;
        if !output.status.success() {
            return Err(BackendError::Restart(failure_message(&output)));
        }
        Ok(())
    }

    async fn exec_shell(&self, command: &[String]) -> Result<i32, BackendError> {
        let running = self
            .service_containers()
            .await?
            .iter()
            .any(ContainerStatus::is_running);
        if !running {
            return Err(BackendError::NotRunning(self.project.service.clone()));
        }

        let mut args = vec!["exec"];
        if !std::io::stdin().is_terminal() {
            args.push("-T");
        }
        args.push(&self.project.service);
        args.extend(command.iter().map(String::as_str));

        debug!(args = %args.join(" "), "Attaching shell session");
        let status = self
            .compose(&args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let code = match (status.code(), status.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 255,
        };
        Ok(code)
    }

    async fn prune(&self) -> Result<(), BackendError> {
        info!(engine = %self.runtime.engine, "Pruning unused runtime resources");
        let output = Command::new(&self.runtime.engine)
            .args(["system", "prune", "-f"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| BackendError::Spawn {
                program: self.runtime.engine.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(BackendError::Prune(failure_message(&output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(summary) = stdout.lines().rev().find(|l| !l.trim().is_empty()) {
            info!("{}", summary.trim());
        }
        Ok(())
    }

    async fn list_status(&self) -> Result<Vec<ContainerStatus>, BackendError> {
        let output = self.run(&["ps", "--all", "--format", "json"]).await?;
        if !output.status.success() {
            return Err(BackendError::Status(failure_message(&output)));
        }
        parse_ps(&String::from_utf8_lossy(&output.stdout)).map_err(BackendError::Status)
    }
}

/// `ps --format json` entry. Older compose releases print one JSON array,
/// newer ones one object per line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    publishers: Option<Vec<Publisher>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Publisher {
    #[serde(default, rename = "URL")]
    url: String,
    #[serde(default)]
    target_port: u16,
    #[serde(default)]
    published_port: u16,
    #[serde(default)]
    protocol: String,
}

impl From<PsEntry> for ContainerStatus {
    fn from(entry: PsEntry) -> Self {
        let ports = entry
            .publishers
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.published_port != 0)
            .map(|p| {
                let host = if p.url.is_empty() {
                    "0.0.0.0"
                } else {
                    p.url.as_str()
                };
                format!(
                    "{}:{}->{}/{}",
                    host, p.published_port, p.target_port, p.protocol
                )
            })
            .collect();
        Self {
            name: entry.name,
            service: entry.service,
            state: entry.state,
            status: entry.status,
            ports,
        }
    }
}

fn parse_ps(stdout: &str) -> Result<Vec<ContainerStatus>, String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<PsEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| format!("unexpected ps output: {e}"))?
    } else {
        trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str::<PsEntry>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("unexpected ps output: {e}"))?
    };

    Ok(entries.into_iter().map(ContainerStatus::from).collect())
}
