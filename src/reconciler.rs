//! Converges pfSense host override aliases with container labels.
//!
//! Each start or stop is handled to completion before the next one, so
//! for any one container the last event seen decides the final state.
//! Adds are idempotent and removes tolerate absence, which makes every
//! path here safe to repeat: the startup sync overlapping a live start
//! collapses to a single alias.

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::dns::DnsApi;
use crate::error::{ApiError, ReconcileError, RuntimeError};
use crate::runtime::ContainerMetadata;
use crate::types::{AliasRequest, ContainerEvent, ContainerInfo, Lifecycle};

/// What a single reconciliation step ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Added,
    AlreadyPresent,
    Removed,
    AlreadyAbsent,
    /// The named host override does not exist on the appliance.
    OverrideMissing,
    /// The alias name already belongs to a different override.
    MappedElsewhere(String),
    /// The container carries no usable alias labels.
    NoRequest,
    /// The container does not ask for removal on stop.
    Retained,
    /// The container was gone before its labels could be read.
    ContainerGone,
}

/// Counts from one startup sync pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub containers: usize,
    pub requested: usize,
    pub added: usize,
    pub failed: usize,
}

pub struct Reconciler<D, M> {
    dns: D,
    metadata: M,
}

impl<D: DnsApi, M: ContainerMetadata> Reconciler<D, M> {
    pub fn new(dns: D, metadata: M) -> Self {
        Self { dns, metadata }
    }

    /// Consume events until the channel closes.
    pub async fn run(&self, mut event_rx: mpsc::Receiver<ContainerEvent>) {
        while let Some(event) = event_rx.recv().await {
            self.handle(&event).await;
        }
        info!("Event channel closed, reconciler stopping");
    }

    /// Handle one event. Failures are logged and never stop the caller.
    pub async fn handle(&self, event: &ContainerEvent) -> Option<Outcome> {
        let result = match event.lifecycle {
            Lifecycle::Start => self.on_start(event).await,
            Lifecycle::Stop => self.on_stop(event).await,
        };
        match result {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(
                    "Failed to handle {} of container '{}': {}",
                    event.lifecycle,
                    event.display_name(),
                    e
                );
                None
            }
        }
    }

    async fn on_start(&self, event: &ContainerEvent) -> Result<Outcome, ReconcileError> {
        let container = match self.metadata.read_labels(&event.container_id).await {
            Ok(c) => c,
            Err(RuntimeError::NotFound(_)) => {
                warn!("Container not found: {}", event.display_name());
                return Ok(Outcome::ContainerGone);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(request) = AliasRequest::from_labels(&container.labels) else {
            debug!("Container '{}' declares no alias", container.name);
            return Ok(Outcome::NoRequest);
        };

        info!("Container '{}' is starting...", container.name);
        Ok(self.ensure_alias(&request).await?)
    }

    async fn on_stop(&self, event: &ContainerEvent) -> Result<Outcome, ReconcileError> {
        let labels = match self.metadata.read_labels(&event.container_id).await {
            Ok(c) => c.labels,
            // Removed already; Docker copies the labels onto the event.
            Err(RuntimeError::NotFound(_)) if !event.attributes.is_empty() => {
                event.attributes.clone()
            }
            Err(RuntimeError::NotFound(_)) => {
                debug!("Container {} gone, labels unavailable", event.display_name());
                return Ok(Outcome::ContainerGone);
            }
            Err(e) => return Err(e.into()),
        };
        let Some(request) = AliasRequest::from_labels(&labels) else {
            debug!("Container '{}' declares no alias", event.display_name());
            return Ok(Outcome::NoRequest);
        };
        if !request.remove_on_stop {
            debug!(
                "Keeping alias {} of container '{}'",
                request.alias_name,
                event.display_name()
            );
            return Ok(Outcome::Retained);
        }

        info!("Container '{}' is stopping...", event.display_name());
        Ok(self.retract_alias(&request).await?)
    }

    /// Make sure the alias exists under its override.
    ///
    /// An alias already present is applied again: a create whose apply
    /// failed leaves it stored but not live.
    pub async fn ensure_alias(&self, request: &AliasRequest) -> Result<Outcome, ApiError> {
        let overrides = self.dns.host_overrides().await?;

        let Some(parent) = overrides.iter().find(|o| o.name == request.override_host) else {
            warn!("Host override {} not found.", request.override_host);
            return Ok(Outcome::OverrideMissing);
        };
        if parent.alias(&request.alias_name).is_some() {
            debug!(
                "Alias {} already present on {}",
                request.alias_name, request.override_host
            );
            self.dns.apply().await?;
            return Ok(Outcome::AlreadyPresent);
        }
        if let Some(owner) = overrides.iter().find(|o| o.answers_for(&request.alias_name)) {
            warn!("Alias {} already mapped to {}.", request.alias_name, owner.name);
            return Ok(Outcome::MappedElsewhere(owner.name.to_string()));
        }

        match self
            .dns
            .add_alias(parent.id, &request.alias_name, &request.description)
            .await
        {
            Ok(()) => {
                info!(
                    "Alias {} added to host override {}.",
                    request.alias_name, request.override_host
                );
                Ok(Outcome::Added)
            }
            Err(ApiError::Conflict(_)) => {
                self.dns.apply().await?;
                Ok(Outcome::AlreadyPresent)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the alias from its override if it is there. An absent alias
    /// is applied again, like a present one in [`Self::ensure_alias`].
    pub async fn retract_alias(&self, request: &AliasRequest) -> Result<Outcome, ApiError> {
        let parent = match self.dns.find_override(&request.override_host).await {
            Ok(parent) => parent,
            Err(ApiError::NotFound(_)) => {
                warn!("Host override {} not found.", request.override_host);
                return Ok(Outcome::OverrideMissing);
            }
            Err(e) => return Err(e),
        };

        match self.dns.remove_alias(parent.id, &request.alias_name).await {
            Ok(()) => {
                info!(
                    "Alias {} removed from host override {}.",
                    request.alias_name, request.override_host
                );
                Ok(Outcome::Removed)
            }
            Err(ApiError::NotFound(_)) => {
                debug!(
                    "Alias {} not present on {}",
                    request.alias_name, request.override_host
                );
                self.dns.apply().await?;
                Ok(Outcome::AlreadyAbsent)
            }
            Err(e) => Err(e),
        }
    }

    /// Ensure the alias of every running container. One container failing
    /// does not stop the pass.
    pub async fn startup_sync(&self) -> Result<SyncSummary, RuntimeError> {
        info!("Scanning existing Docker containers for aliases to add...");
        let containers = self.metadata.running().await?;

        let mut summary = SyncSummary {
            containers: containers.len(),
            ..Default::default()
        };
        for container in &containers {
            let Some(request) = AliasRequest::from_labels(&container.labels) else {
                continue;
            };
            summary.requested += 1;
            match self.sync_one(container, &request).await {
                Ok(Outcome::Added) => summary.added += 1,
                Ok(_) => {}
                Err(e) => {
                    summary.failed += 1;
                    warn!(
                        "Failed to sync alias {} for container '{}': {}",
                        request.alias_name, container.name, e
                    );
                }
            }
        }

        if summary.requested == 0 {
            info!("No aliases found during startup.");
        } else {
            info!(
                "Startup sync done: {} containers, {} aliases requested, {} added, {} failed",
                summary.containers, summary.requested, summary.added, summary.failed
            );
        }
        Ok(summary)
    }

    async fn sync_one(
        &self,
        container: &ContainerInfo,
        request: &AliasRequest,
    ) -> Result<Outcome, ApiError> {
        info!(
            "Adding alias '{}' for container '{}' ({})",
            request.alias_name, container.name, container.id
        );
        self.ensure_alias(request).await
    }
}
