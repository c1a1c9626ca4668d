use crate::error::RuntimeError;
use crate::types::{ContainerEvent, ContainerInfo};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod docker;
pub use docker::DockerRuntime;

#[async_trait]
pub trait ContainerRuntime {
    /// Stream container start/stop events, replaying from `since` (Unix
    /// seconds). Events are sent in the order the runtime emits them.
    async fn monitor(&self, since: i64, event_tx: mpsc::Sender<ContainerEvent>) -> Result<()>;
}

/// Read access to container labels.
#[async_trait]
pub trait ContainerMetadata: Send + Sync {
    /// Inspect one container. `NotFound` if it is already gone.
    async fn read_labels(&self, container_id: &str) -> Result<ContainerInfo, RuntimeError>;

    /// All currently running containers.
    async fn running(&self) -> Result<Vec<ContainerInfo>, RuntimeError>;
}
