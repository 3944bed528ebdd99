//! Backend adapter: lifecycle verbs translated into orchestration runtime
//! calls.
//!
//! Implementations hold no mutable state between calls. All state lives in
//! the container runtime and is re-queried on every operation.

pub mod compose;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::BackendError;

pub use compose::{ComposeBackend, Runtime};

/// Resolves when the operator asks an attached stream to stop.
pub type Cancel = oneshot::Receiver<()>;

/// Options for following the service log stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Number of trailing lines to show before following (all when `None`).
    pub tail: Option<u32>,
    pub timestamps: bool,
}

/// Snapshot of one project container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub name: String,
    pub service: String,
    /// Runtime state, e.g. `running`, `exited`, `created`.
    pub state: String,
    /// Human readable status, e.g. `Up 3 minutes`.
    pub status: String,
    pub ports: Vec<String>,
}

impl ContainerStatus {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// One operation per lifecycle command.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Build the image, then start the service detached. Start is not
    /// attempted when the build fails.
    async fn build_and_start(&self) -> Result<(), BackendError>;

    /// Stop running containers. Stopping a stopped service is a no-op.
    async fn stop(&self) -> Result<(), BackendError>;

    /// Follow the combined log stream until `cancel` fires or the stream
    /// ends. Returns the number of lines relayed.
    async fn stream_logs(
        &self,
        options: &LogOptions,
        cancel: Cancel,
    ) -> Result<u64, BackendError>;

    /// Stop then start in one orchestration call.
    async fn restart(&self) -> Result<(), BackendError>;

    /// Attach an interactive session to the running service container.
    /// Returns the session's exit code.
    async fn exec_shell(&self, command: &[String]) -> Result<i32, BackendError>;

    /// Reclaim unused runtime resources system-wide.
    async fn prune(&self) -> Result<(), BackendError>;

    /// Current container state of the project.
    async fn list_status(&self) -> Result<Vec<ContainerStatus>, BackendError>;
}
