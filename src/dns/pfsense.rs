//! Client for the pfSense REST API (v2) DNS resolver endpoints.
//!
//! Only host override aliases are touched: overrides are listed, and
//! aliases are created under or deleted from them. Every successful
//! mutation is followed by an `apply` so Unbound picks it up.

use async_trait::async_trait;
use log::{info, warn};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::DnsApi;
use crate::config::Config;
use crate::error::{ApiError, ConfigError};
use crate::types::{AliasEntry, Fqdn, HostOverride};

const API_KEY_HEADER: &str = "X-API-Key";

pub struct PfSense {
    client: Client,
    base: Url,
}

impl PfSense {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let base = cfg.api_base()?;

        let mut headers = HeaderMap::new();
        let mut key = HeaderValue::from_str(cfg.pfsense_api_token.trim())
            .map_err(|_| ConfigError::InvalidToken)?;
        key.set_sensitive(true);
        headers.insert(API_KEY_HEADER, key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(cfg.timeout())
            .danger_accept_invalid_certs(!cfg.pfsense_verify_tls)
            .build()?;

        info!("pfSense API set to {}", base);
        Ok(Self { client, base })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl DnsApi for PfSense {
    async fn host_overrides(&self) -> Result<Vec<HostOverride>, ApiError> {
        let response = self.client.get(self.endpoint("host_overrides")).send().await?;
        let body = check(response, "list host overrides").await?.text().await?;
        parse_host_overrides(&body)
    }

    async fn create_alias(
        &self,
        override_id: u64,
        alias: &Fqdn,
        description: &str,
    ) -> Result<(), ApiError> {
        let body = NewAlias {
            parent_id: override_id,
            host: alias.host(),
            domain: alias.domain(),
            descr: description,
        };
        let response = self
            .client
            .post(self.endpoint("host_override/alias"))
            .json(&body)
            .send()
            .await?;
        check(response, "create alias").await?;
        Ok(())
    }

    async fn delete_alias(&self, override_id: u64, alias_id: u64) -> Result<(), ApiError> {
        let body = AliasRef {
            parent_id: override_id,
            id: alias_id,
        };
        let response = self
            .client
            .delete(self.endpoint("host_override/alias"))
            .json(&body)
            .send()
            .await?;
        check(response, "delete alias").await?;
        Ok(())
    }

    async fn apply(&self) -> Result<(), ApiError> {
        let response = self.client.post(self.endpoint("apply")).send().await?;
        check(response, "apply").await?;
        Ok(())
    }
}

/// Turn a non-success status into the matching [`ApiError`].
async fn check(response: Response, context: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!("API call failed during '{}': HTTP {}", context, status.as_u16());
    Err(status_error(status, body))
}

fn status_error(status: StatusCode, body: String) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth(status.as_u16()),
        StatusCode::NOT_FOUND => ApiError::NotFound(body),
        StatusCode::CONFLICT => ApiError::Conflict(body),
        _ => ApiError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

#[derive(Serialize)]
struct NewAlias<'a> {
    parent_id: u64,
    host: &'a str,
    domain: &'a str,
    descr: &'a str,
}

#[derive(Serialize)]
struct AliasRef {
    parent_id: u64,
    id: u64,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Deserialize)]
struct WireOverride {
    id: u64,
    host: String,
    domain: String,
    #[serde(default)]
    aliases: Option<Vec<WireAlias>>,
}

#[derive(Deserialize)]
struct WireAlias {
    #[serde(default)]
    id: Option<u64>,
    host: String,
    domain: String,
    #[serde(default)]
    descr: Option<String>,
}

fn parse_host_overrides(body: &str) -> Result<Vec<HostOverride>, ApiError> {
    let envelope: Envelope<Vec<WireOverride>> = serde_json::from_str(body)?;
    Ok(envelope
        .data
        .unwrap_or_default()
        .into_iter()
        .filter_map(WireOverride::into_override)
        .collect())
}

impl WireOverride {
    /// Records whose names cannot be split are skipped; nothing here can
    /// attach to them anyway.
    fn into_override(self) -> Option<HostOverride> {
        let name = Fqdn::from_parts(&self.host, &self.domain)?;
        let aliases = self
            .aliases
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .filter_map(|(position, alias)| {
                Some(AliasEntry {
                    id: alias.id.unwrap_or(position as u64),
                    name: Fqdn::from_parts(&alias.host, &alias.domain)?,
                    description: alias.descr.unwrap_or_default(),
                })
            })
            .collect();
        Some(HostOverride {
            id: self.id,
            name,
            aliases,
        })
    }
}
