//! Panel driver facade
//!
//! One driver per vendor lineage. Drivers declare their optional
//! capabilities up front and answer [`PanelError::Unsupported`] for
//! anything they lack; callers never probe for a capability by trying it.

use serde::Serialize;
use url::Url;

use crate::catalog::classic::ClassicUser;
use crate::config::{PanelProfile, ProvisionSettings, VendorFamily};
use crate::error::{PanelError, Result};
use crate::http::PanelClient;
use crate::model::{ClientRecord, InboundDescriptor, Plan};
use crate::uri::{ConnectionUri, decode_subscription, is_known_uri};

pub mod marzban;
pub mod marzneshin;
pub mod xui;

pub use marzban::MarzbanDriver;
pub use marzneshin::MarzneshinDriver;
pub use xui::XuiDriver;

// ============================================================================
// Capabilities & Results
// ============================================================================

/// Optional capabilities of a driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// A first-class endpoint lists every user of the panel
    pub list_all_clients: bool,
    /// Clients are created on a chosen inbound
    pub create_on_inbound: bool,
    /// Updates in place can be verified; otherwise delete and recreate
    pub in_place_update: bool,
    /// Credentials belong to accounts rather than inbounds
    pub account_level: bool,
}

/// What a client needs to connect
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Access {
    pub uris: Vec<ConnectionUri>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_url: Option<String>,
}

/// Current allowance and usage of a client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStatus {
    pub owner_label: String,
    pub quota_bytes: u64,
    pub used_bytes: u64,
    /// Raw panel expiry
    pub expiry: i64,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_url: Option<String>,
}

impl ClientStatus {
    pub fn from_record(record: &ClientRecord, subscription_url: Option<String>) -> Self {
        Self {
            owner_label: record.owner_label.clone(),
            quota_bytes: record.quota_bytes,
            used_bytes: record.used_bytes,
            expiry: record.expiry,
            enabled: record.enabled,
            subscription_url,
        }
    }
}

// ============================================================================
// Panel Driver
// ============================================================================

#[derive(Debug)]
pub enum PanelDriver {
    Marzban(MarzbanDriver),
    Marzneshin(MarzneshinDriver),
    Xui(XuiDriver),
}

/// Picks the driver for a profile's vendor family
pub fn resolve_driver(profile: &PanelProfile, settings: &ProvisionSettings) -> Result<PanelDriver> {
    let client = PanelClient::new(profile.clone(), settings)?;
    Ok(match profile.family {
        VendorFamily::Marzban => PanelDriver::Marzban(MarzbanDriver::new(client, settings)),
        VendorFamily::Marzneshin => {
            PanelDriver::Marzneshin(MarzneshinDriver::new(client, settings))
        }
        VendorFamily::ThreeXui | VendorFamily::Xui | VendorFamily::XuiLegacy => {
            PanelDriver::Xui(XuiDriver::new(client, settings))
        }
    })
}

impl PanelDriver {
    pub fn profile(&self) -> &PanelProfile {
        match self {
            PanelDriver::Marzban(d) => d.profile(),
            PanelDriver::Marzneshin(d) => d.profile(),
            PanelDriver::Xui(d) => d.profile(),
        }
    }

    pub fn family(&self) -> VendorFamily {
        self.profile().family
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            PanelDriver::Marzban(_) => MarzbanDriver::CAPABILITIES,
            PanelDriver::Marzneshin(_) => MarzneshinDriver::CAPABILITIES,
            PanelDriver::Xui(d) => d.capabilities(),
        }
    }

    pub async fn list_inbounds(&self) -> Result<Vec<InboundDescriptor>> {
        match self {
            PanelDriver::Marzban(d) => d.list_inbounds().await,
            PanelDriver::Marzneshin(d) => d.list_inbounds().await,
            PanelDriver::Xui(d) => d.list_inbounds().await,
        }
    }

    /// Re-reads one inbound, including its clients where the panel has them
    pub async fn fetch_inbound(&self, inbound_id: &str) -> Result<InboundDescriptor> {
        match self {
            PanelDriver::Marzban(d) => d.fetch_inbound(inbound_id).await,
            PanelDriver::Marzneshin(d) => d.fetch_inbound(inbound_id).await,
            PanelDriver::Xui(d) => d.fetch_inbound(inbound_id).await,
        }
    }

    /// Creates a client on an inbound
    pub async fn create_client(&self, inbound_id: &str, plan: &Plan) -> Result<ClientRecord> {
        match self {
            PanelDriver::Marzban(d) => d.create_client(inbound_id, plan).await,
            PanelDriver::Marzneshin(_) => {
                Err(PanelError::unsupported("create_on_inbound", self.family()))
            }
            PanelDriver::Xui(d) => d.create_client(inbound_id, plan).await,
        }
    }

    /// Creates an account-level user attached to the profile's services
    pub async fn create_account(&self, plan: &Plan) -> Result<ClientRecord> {
        match self {
            PanelDriver::Marzneshin(d) => d.create_account(plan).await,
            _ => Err(PanelError::unsupported("create_account", self.family())),
        }
    }

    pub async fn renew_client(
        &self,
        inbound_id: &str,
        owner_label: &str,
        plan: &Plan,
    ) -> Result<ClientRecord> {
        match self {
            PanelDriver::Marzban(d) => d.renew_client(owner_label, plan).await,
            PanelDriver::Marzneshin(d) => d.renew_client(owner_label, plan).await,
            PanelDriver::Xui(d) => d.renew_client(inbound_id, owner_label, plan).await,
        }
    }

    /// Reissues key material; the returned record's label may differ
    pub async fn rotate_client_key(
        &self,
        inbound_id: &str,
        owner_label: &str,
    ) -> Result<ClientRecord> {
        match self {
            PanelDriver::Marzban(d) => d.rotate_client_key(owner_label).await,
            PanelDriver::Marzneshin(d) => d.rotate_client_key(owner_label).await,
            PanelDriver::Xui(d) => d.rotate_client_key(inbound_id, owner_label).await,
        }
    }

    pub async fn list_all_clients(&self) -> Result<Vec<ClientRecord>> {
        match self {
            PanelDriver::Marzban(d) => d.list_all_clients().await,
            _ => Err(PanelError::unsupported("list_all_clients", self.family())),
        }
    }

    pub async fn status(&self, owner_label: &str) -> Result<ClientStatus> {
        match self {
            PanelDriver::Marzban(d) => d.status(owner_label).await,
            PanelDriver::Marzneshin(d) => d.status(owner_label).await,
            PanelDriver::Xui(d) => d.status(owner_label).await,
        }
    }

    /// Connection URIs and subscription URL for a client
    pub async fn access(&self, inbound_id: &str, record: &ClientRecord) -> Result<Access> {
        match self {
            PanelDriver::Marzban(d) => d.access(&record.owner_label).await,
            PanelDriver::Marzneshin(d) => d.access(&record.owner_label).await,
            PanelDriver::Xui(d) => d.access(inbound_id, record).await,
        }
    }
}

// ============================================================================
// Shared Helpers
// ============================================================================

/// Makes a panel-reported subscription path absolute
pub fn absolute_url(profile: &PanelProfile, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    let root = profile
        .subscription_root()
        .and_then(|r| Url::parse(r).ok())
        .or_else(|| profile.base().ok())?;
    root.join(raw).ok().map(String::from)
}

/// Access from the subscription document, for when URIs cannot be built
pub(crate) async fn subscription_access(client: &PanelClient, url: String) -> Result<Access> {
    let body = client.fetch_public(&url).await?;
    Ok(Access {
        uris: decode_subscription(&body),
        subscription_url: Some(url),
    })
}

/// Classic panels report links with the user; the subscription covers users without
pub(crate) async fn classic_access(client: &PanelClient, user: ClassicUser) -> Result<Access> {
    let subscription_url = user
        .subscription_url
        .as_deref()
        .and_then(|u| absolute_url(client.profile(), u));

    let uris: Vec<ConnectionUri> = user
        .links
        .iter()
        .map(|l| l.trim())
        .filter(|l| is_known_uri(l))
        .map(ConnectionUri::new)
        .collect();

    match subscription_url {
        Some(url) if uris.is_empty() => subscription_access(client, url).await,
        subscription_url => Ok(Access {
            uris,
            subscription_url,
        }),
    }
}

pub(crate) fn client_not_found(owner_label: &str, scope: &str) -> PanelError {
    PanelError::NotFound(format!("client '{}' on {}", owner_label, scope))
}
