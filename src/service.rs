//! Collaborator-facing operations
//!
//! [`PanelService`] resolves panel ids through a [`ProfileStore`], keeps one
//! driver (and so one session) per panel, and serializes mutations per
//! `(panel, inbound)` pair, or per panel where users are account-level.
//! Reads are not serialized.
//!
//! A mutation that was applied on the panel is never reported as a plain
//! failure: if building access afterwards fails, the error is
//! [`PanelError::Committed`] and carries the record the panel now holds.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{PanelProfile, PanelsConfig, ProvisionSettings};
use crate::driver::{Access, Capabilities, ClientStatus, PanelDriver, resolve_driver};
use crate::error::{PanelError, Result};
use crate::model::{ClientRecord, InboundDescriptor, Plan, Protocol};

// ============================================================================
// Collaborators
// ============================================================================

/// Source of panel profiles
pub trait ProfileStore: Send + Sync {
    fn get_profile(&self, panel_id: &str) -> Option<PanelProfile>;
}

impl ProfileStore for PanelsConfig {
    fn get_profile(&self, panel_id: &str) -> Option<PanelProfile> {
        self.profile(panel_id).cloned()
    }
}

/// An inbound seen on a panel at some point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnownInbound {
    pub panel_id: String,
    pub protocol: Protocol,
    pub tag: String,
}

/// Optional persistence of discovered inbounds. Nothing here depends on
/// its contents; panels are always asked directly.
pub trait InboundCache: Send + Sync {
    fn list_known_inbounds(&self, panel_id: &str) -> Vec<KnownInbound>;
    fn record_discovered_inbound(&self, panel_id: &str, protocol: &Protocol, tag: &str);
}

/// Process-local [`InboundCache`]
#[derive(Debug, Default)]
pub struct MemoryInboundCache {
    entries: Mutex<Vec<KnownInbound>>,
}

impl InboundCache for MemoryInboundCache {
    fn list_known_inbounds(&self, panel_id: &str) -> Vec<KnownInbound> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.panel_id == panel_id)
            .cloned()
            .collect()
    }

    fn record_discovered_inbound(&self, panel_id: &str, protocol: &Protocol, tag: &str) {
        let entry = KnownInbound {
            panel_id: panel_id.to_string(),
            protocol: protocol.clone(),
            tag: tag.to_string(),
        };
        let mut entries = self.entries.lock();
        if !entries.contains(&entry) {
            entries.push(entry);
        }
    }
}

/// Cache that remembers nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInboundCache;

impl InboundCache for NoInboundCache {
    fn list_known_inbounds(&self, _panel_id: &str) -> Vec<KnownInbound> {
        Vec::new()
    }

    fn record_discovered_inbound(&self, _panel_id: &str, _protocol: &Protocol, _tag: &str) {}
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Provisioned {
    pub owner_label: String,
    pub access: Access,
    pub record: ClientRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct Renewed {
    pub record: ClientRecord,
    /// Set when the client now lives under a different label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_owner_label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rotated {
    pub access: Access,
    pub record: ClientRecord,
    /// Set when the client now lives under a different label; callers must persist it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_owner_label: Option<String>,
}

fn relabeled(previous: &str, record: &ClientRecord) -> Option<String> {
    (record.owner_label != previous).then(|| record.owner_label.clone())
}

// ============================================================================
// Panel Service
// ============================================================================

type MutationLock = Arc<tokio::sync::Mutex<()>>;

pub struct PanelService<S> {
    store: S,
    settings: ProvisionSettings,
    cache: Arc<dyn InboundCache>,
    drivers: Mutex<HashMap<String, Arc<PanelDriver>>>,
    locks: Mutex<HashMap<(String, String), MutationLock>>,
}

impl<S: ProfileStore> PanelService<S> {
    pub fn new(store: S, settings: ProvisionSettings) -> Self {
        Self {
            store,
            settings,
            cache: Arc::new(NoInboundCache),
            drivers: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn InboundCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Driver for a panel, created on first use and kept for the service lifetime
    pub fn driver(&self, panel_id: &str) -> Result<Arc<PanelDriver>> {
        if let Some(driver) = self.drivers.lock().get(panel_id) {
            return Ok(Arc::clone(driver));
        }

        let profile = self
            .store
            .get_profile(panel_id)
            .ok_or_else(|| PanelError::Config(format!("unknown panel '{}'", panel_id)))?;
        let driver = Arc::new(resolve_driver(&profile, &self.settings)?);
        debug!("Resolved {} driver for panel '{}'", profile.family, panel_id);

        Ok(Arc::clone(
            self.drivers
                .lock()
                .entry(panel_id.to_string())
                .or_insert(driver),
        ))
    }

    /// Lock serializing mutations on one `(panel, inbound)` pair. Account-level
    /// panels ignore the inbound, so all their mutations share the panel's lock.
    fn mutation_lock(&self, driver: &PanelDriver, panel_id: &str, inbound_id: &str) -> MutationLock {
        let inbound_id = if driver.capabilities().account_level {
            ""
        } else {
            inbound_id
        };
        let key = (panel_id.to_string(), inbound_id.to_string());
        Arc::clone(self.locks.lock().entry(key).or_default())
    }

    pub fn capabilities(&self, panel_id: &str) -> Result<Capabilities> {
        Ok(self.driver(panel_id)?.capabilities())
    }

    /// Lists inbounds straight from the panel and records them in the cache
    pub async fn list_inbounds(&self, panel_id: &str) -> Result<Vec<InboundDescriptor>> {
        let inbounds = self.driver(panel_id)?.list_inbounds().await?;
        for inbound in &inbounds {
            let tag = if inbound.tag.is_empty() {
                &inbound.id
            } else {
                &inbound.tag
            };
            self.cache
                .record_discovered_inbound(panel_id, &inbound.protocol, tag);
        }
        Ok(inbounds)
    }

    pub fn known_inbounds(&self, panel_id: &str) -> Vec<KnownInbound> {
        self.cache.list_known_inbounds(panel_id)
    }

    /// Creates a client and returns what it needs to connect.
    ///
    /// Account-level panels ignore `inbound_id` and attach the user to the
    /// profile's services instead.
    pub async fn provision(&self, panel_id: &str, inbound_id: &str, plan: &Plan) -> Result<Provisioned> {
        let driver = self.driver(panel_id)?;
        let lock = self.mutation_lock(&driver, panel_id, inbound_id);
        let _guard = lock.lock().await;

        let record = if driver.capabilities().create_on_inbound {
            driver.create_client(inbound_id, plan).await?
        } else {
            driver.create_account(plan).await?
        };

        let access = match driver.access(inbound_id, &record).await {
            Ok(access) => access,
            Err(e) => {
                warn!(
                    "Client '{}' was created on panel '{}' but its access could not be built: {}",
                    record.owner_label, panel_id, e
                );
                return Err(PanelError::committed("provision", record, e));
            }
        };

        Ok(Provisioned {
            owner_label: record.owner_label.clone(),
            access,
            record,
        })
    }

    pub async fn renew(
        &self,
        panel_id: &str,
        inbound_id: &str,
        owner_label: &str,
        plan: &Plan,
    ) -> Result<Renewed> {
        let driver = self.driver(panel_id)?;
        let lock = self.mutation_lock(&driver, panel_id, inbound_id);
        let _guard = lock.lock().await;

        let record = driver.renew_client(inbound_id, owner_label, plan).await?;
        Ok(Renewed {
            new_owner_label: relabeled(owner_label, &record),
            record,
        })
    }

    pub async fn rotate_key(&self, panel_id: &str, inbound_id: &str, owner_label: &str) -> Result<Rotated> {
        let driver = self.driver(panel_id)?;
        let lock = self.mutation_lock(&driver, panel_id, inbound_id);
        let _guard = lock.lock().await;

        let record = driver.rotate_client_key(inbound_id, owner_label).await?;
        let new_owner_label = relabeled(owner_label, &record);
        if let Some(label) = &new_owner_label {
            warn!(
                "Client '{}' on panel '{}' is now '{}'",
                owner_label, panel_id, label
            );
        }

        let access = match driver.access(inbound_id, &record).await {
            Ok(access) => access,
            Err(e) => return Err(PanelError::committed("rotate key", record, e)),
        };
        Ok(Rotated {
            access,
            record,
            new_owner_label,
        })
    }

    pub async fn status(&self, panel_id: &str, owner_label: &str) -> Result<ClientStatus> {
        self.driver(panel_id)?.status(owner_label).await
    }

    pub async fn list_all_clients(&self, panel_id: &str) -> Result<Vec<ClientRecord>> {
        self.driver(panel_id)?.list_all_clients().await
    }
}
