use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{AliasEntry, Fqdn, HostOverride};

pub mod pfsense;
pub use pfsense::PfSense;

/// Host override alias store on the DNS appliance.
///
/// Implementors provide the four raw calls; lookups and the add/remove
/// operations used by the reconciler are built on top of them.
#[async_trait]
pub trait DnsApi: Send + Sync {
    /// Every host override, with its aliases.
    async fn host_overrides(&self) -> Result<Vec<HostOverride>, ApiError>;

    async fn create_alias(
        &self,
        override_id: u64,
        alias: &Fqdn,
        description: &str,
    ) -> Result<(), ApiError>;

    async fn delete_alias(&self, override_id: u64, alias_id: u64) -> Result<(), ApiError>;

    /// Make pending changes live on the resolver.
    async fn apply(&self) -> Result<(), ApiError>;

    /// Look up a host override by name.
    async fn find_override(&self, name: &Fqdn) -> Result<HostOverride, ApiError> {
        self.host_overrides()
            .await?
            .into_iter()
            .find(|o| &o.name == name)
            .ok_or_else(|| ApiError::NotFound(format!("host override {name}")))
    }

    /// Current aliases under one override.
    async fn list_aliases(&self, override_id: u64) -> Result<Vec<AliasEntry>, ApiError> {
        self.host_overrides()
            .await?
            .into_iter()
            .find(|o| o.id == override_id)
            .map(|o| o.aliases)
            .ok_or_else(|| ApiError::NotFound(format!("host override #{override_id}")))
    }

    /// Create an alias and apply it. Fails with `Conflict` if it already exists.
    async fn add_alias(
        &self,
        override_id: u64,
        alias: &Fqdn,
        description: &str,
    ) -> Result<(), ApiError> {
        self.create_alias(override_id, alias, description).await?;
        self.apply().await
    }

    /// Delete an alias by name and apply. Fails with `NotFound` if it is absent.
    async fn remove_alias(&self, override_id: u64, alias: &Fqdn) -> Result<(), ApiError> {
        let entry = self
            .list_aliases(override_id)
            .await?
            .into_iter()
            .find(|a| &a.name == alias)
            .ok_or_else(|| ApiError::NotFound(format!("alias {alias}")))?;
        self.delete_alias(override_id, entry.id).await?;
        self.apply().await
    }
}
