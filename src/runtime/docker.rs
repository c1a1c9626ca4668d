use super::{ContainerMetadata, ContainerRuntime};
use crate::error::RuntimeError;
use crate::types::{ContainerEvent, ContainerInfo, Lifecycle};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::errors::Error as DockerError;
use bollard::models::EventMessage;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon (unix socket on Linux, or
    /// whatever `DOCKER_HOST` points at).
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    fn events_options(since: i64) -> EventsOptions<String> {
        EventsOptions::<String> {
            since: Some(since.to_string()),
            filters: [
                ("type", ["container"].as_slice()),
                ("event", ["start", "die", "stop"].as_slice()),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn monitor(&self, since: i64, event_tx: mpsc::Sender<ContainerEvent>) -> Result<()> {
        let mut resume = Resume::new(since);

        loop {
            let mut stream = self.docker.events(Some(Self::events_options(resume.since)));

            info!("Listening for container start/stop events since {}", resume.since);
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(message) => {
                        let Some(event) = container_event(message) else {
                            continue;
                        };
                        resume.observe(&event);
                        debug!("Container event: {} for {}", event.lifecycle, event.display_name());
                        if event_tx.send(event).await.is_err() {
                            return Err(anyhow!("Event channel closed"));
                        }
                    }
                    Err(e) => {
                        error!("Error in Docker event stream: {}", e);
                        break; // Break inner loop to reconnect
                    }
                }
            }

            let delay = resume.next_delay();
            warn!("Docker event stream ended. Reconnecting in {}s...", delay.as_secs());
            sleep(delay).await;
        }
    }
}

/// Where to resubscribe from and how long to wait before doing so.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Resume {
    /// Time of the last event seen, Unix seconds.
    since: i64,
    backoff: Duration,
}

impl Resume {
    fn new(since: i64) -> Self {
        Self {
            since,
            backoff: MIN_BACKOFF,
        }
    }

    /// A received event resets the backoff and moves the replay point.
    fn observe(&mut self, event: &ContainerEvent) {
        self.backoff = MIN_BACKOFF;
        if let Some(time) = event.time {
            self.since = self.since.max(time);
        }
    }

    /// Delay before the next reconnect; each call doubles the following one.
    fn next_delay(&mut self) -> Duration {
        let delay = self.backoff;
        self.backoff = next_backoff(delay);
        delay
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

#[async_trait]
impl ContainerMetadata for DockerRuntime {
    async fn read_labels(&self, container_id: &str) -> Result<ContainerInfo, RuntimeError> {
        let detail = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| not_found_or(e, container_id))?;

        Ok(ContainerInfo {
            id: detail.id.unwrap_or_else(|| container_id.to_string()),
            name: detail
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            labels: detail.config.and_then(|c| c.labels).unwrap_or_default(),
        })
    }

    async fn running(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let opts = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self.docker.list_containers(Some(opts)).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                Some(ContainerInfo {
                    id,
                    name,
                    labels: c.labels.unwrap_or_default(),
                })
            })
            .collect())
    }
}

/// Convert a raw Docker event into a [`ContainerEvent`], dropping anything
/// that is not a container start/stop with an actor id.
fn container_event(message: EventMessage) -> Option<ContainerEvent> {
    let lifecycle = Lifecycle::from_action(message.action.as_deref()?)?;
    let actor = message.actor?;
    let container_id = actor.id.filter(|id| !id.is_empty())?;

    Some(ContainerEvent {
        lifecycle,
        container_id,
        attributes: actor.attributes.unwrap_or_default(),
        time: message.time,
    })
}

fn not_found_or(err: DockerError, container_id: &str) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(container_id.to_string()),
        other => RuntimeError::Docker(other),
    }
}
