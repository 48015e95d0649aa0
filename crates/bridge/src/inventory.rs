//! Target inventory client.
//!
//! The dashboard serves its server inventory as `{"servers": [...]}`. Only
//! the fields a session needs are read; everything else is ignored.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{BridgeError, Result};
use crate::target::{Target, TargetId, DEFAULT_USER};
use protocol::DEFAULT_REMOTE_PORT;

#[derive(Debug, Deserialize)]
struct InventoryDocument {
    #[serde(default)]
    servers: Vec<ServerRecord>,
}

#[derive(Debug, Deserialize)]
struct ServerRecord {
    id: Option<String>,
    name: Option<String>,
    hostname: Option<String>,
    host: Option<String>,
    #[serde(default)]
    access: AccessRecord,
}

#[derive(Debug, Default, Deserialize)]
struct AccessRecord {
    #[serde(default)]
    ssh: bool,
    ssh_user: Option<String>,
    ssh_port: Option<u16>,
}

impl ServerRecord {
    fn into_target(self) -> Option<Target> {
        let id = self
            .id
            .filter(|s| !s.is_empty())
            .or_else(|| self.hostname.clone())?;
        let address = self
            .host
            .filter(|s| !s.is_empty())
            .or_else(|| self.hostname.clone())?;
        let display_name = self.name.or(self.hostname).unwrap_or_else(|| id.clone());

        Some(
            Target::new(id, address)
                .with_display_name(display_name)
                .with_default_user(
                    self.access
                        .ssh_user
                        .filter(|u| !u.is_empty())
                        .unwrap_or_else(|| DEFAULT_USER.to_string()),
                )
                .with_port(self.access.ssh_port.unwrap_or(DEFAULT_REMOTE_PORT))
                .with_interactive_access(self.access.ssh),
        )
    }
}

/// Targets known to the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    targets: Vec<Target>,
}

impl Inventory {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// Parse an inventory document. Records without an id or address are
    /// skipped.
    pub fn from_json(text: &str) -> Result<Self> {
        let document: InventoryDocument =
            serde_json::from_str(text).map_err(protocol::ProtocolError::from)?;
        let mut targets = Vec::with_capacity(document.servers.len());
        for record in document.servers {
            match record.into_target() {
                Some(target) => targets.push(target),
                None => tracing::warn!("Skipping inventory record without id or address"),
            }
        }
        Ok(Self { targets })
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn find(&self, id: &TargetId) -> Option<&Target> {
        self.targets.iter().find(|t| &t.id == id)
    }

    /// Look up a target, failing with [`BridgeError::UnknownTarget`].
    pub fn require(&self, id: &TargetId) -> Result<&Target> {
        self.find(id)
            .ok_or_else(|| BridgeError::UnknownTarget(id.clone()))
    }

    /// Targets that allow interactive sessions.
    pub fn interactive(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(|t| t.interactive_access_allowed)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// HTTP client for the inventory endpoint.
#[derive(Debug, Clone)]
pub struct InventoryClient {
    http: reqwest::Client,
    url: Url,
}

impl InventoryClient {
    pub fn new(base: &Url, path: &str, timeout: Duration) -> Result<Self> {
        let url = base
            .join(path)
            .map_err(|e| BridgeError::InvalidEndpoint(format!("{}{}: {}", base, path, e)))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn fetch(&self) -> Result<Inventory> {
        tracing::debug!(url = %self.url, "Fetching inventory");
        let body = self
            .http
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let inventory = Inventory::from_json(&body)?;
        tracing::info!(count = inventory.len(), "Inventory loaded");
        Ok(inventory)
    }
}
