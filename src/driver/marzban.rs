//! Marzban driver
//!
//! Users are account-level: one username carries a proxy setting per
//! protocol and a set of inbound tags. Owner label and username are the
//! same thing here.

use std::fmt;

use chrono::Utc;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::{Access, Capabilities, ClientStatus, absolute_url, classic_access, client_not_found};
use crate::catalog::CatalogReader;
use crate::catalog::classic::{ClassicUser, parse_marzban_user, parse_user_page};
use crate::config::{PanelProfile, ProvisionSettings};
use crate::error::{PanelError, Result};
use crate::http::{PanelClient, RequestSpec};
use crate::model::{ClientRecord, InboundDescriptor, Plan, Protocol};
use crate::probe::probe;
use crate::provision::{
    LABEL_ATTEMPTS, flow_for, generate_label, labels_exhausted, new_client_record, new_key,
    renewal_target,
};
use crate::quota::{ExpiryPolicy, ExpiryUnit};

/// Marzban stores `expire` in unix seconds
const NATIVE_UNIT: ExpiryUnit = ExpiryUnit::Seconds;

const INBOUNDS_PATH: &str = "/api/inbounds";

fn user_path(username: &str) -> String {
    format!("/api/user/{}", urlencoding::encode(username))
}

/// Proxy settings for one protocol of a new or rekeyed user
fn proxy_settings(protocol: &Protocol, key: &str, flow: Option<&str>) -> Value {
    let mut settings = Map::new();
    if protocol.uses_uuid() {
        settings.insert("id".to_string(), json!(key));
        if let Some(flow) = flow {
            settings.insert("flow".to_string(), json!(flow));
        }
    } else {
        settings.insert("password".to_string(), json!(key));
    }
    Value::Object(settings)
}

/// Every proxy of a user with fresh key material, other settings kept
fn regenerated_proxies(proxies: Option<&Value>) -> Map<String, Value> {
    let Some(proxies) = proxies.and_then(Value::as_object) else {
        return Map::new();
    };

    proxies
        .iter()
        .map(|(name, settings)| {
            let protocol = Protocol::from(name.as_str());
            let mut settings = settings.as_object().cloned().unwrap_or_default();
            let field = if protocol.uses_uuid() { "id" } else { "password" };
            settings.insert(field.to_string(), json!(new_key(&protocol, None)));
            (name.clone(), Value::Object(settings))
        })
        .collect()
}

pub struct MarzbanDriver {
    client: PanelClient,
    reader: CatalogReader,
    policy: ExpiryPolicy,
    label_prefix: String,
    page_size: u32,
}

impl MarzbanDriver {
    pub const CAPABILITIES: Capabilities = Capabilities {
        list_all_clients: true,
        create_on_inbound: true,
        in_place_update: true,
        account_level: true,
    };

    pub fn new(client: PanelClient, settings: &ProvisionSettings) -> Self {
        Self {
            client,
            reader: CatalogReader::marzban(),
            policy: settings.expiry_policy(),
            label_prefix: settings.label_prefix.clone(),
            page_size: settings.page_size,
        }
    }

    pub fn profile(&self) -> &PanelProfile {
        self.client.profile()
    }

    pub async fn list_inbounds(&self) -> Result<Vec<InboundDescriptor>> {
        let value = self.client.get_json(INBOUNDS_PATH).await?;
        self.reader.read_list(INBOUNDS_PATH, &value)
    }

    /// Inbounds are addressed by tag
    pub async fn fetch_inbound(&self, inbound_id: &str) -> Result<InboundDescriptor> {
        self.list_inbounds()
            .await?
            .into_iter()
            .find(|i| i.id == inbound_id || i.tag == inbound_id)
            .ok_or_else(|| {
                PanelError::NotFound(format!("inbound '{}' on panel '{}'", inbound_id, self.profile().id))
            })
    }

    // ========================================================================
    // Users
    // ========================================================================

    async fn try_get_user(&self, username: &str) -> Result<Option<ClassicUser>> {
        let path = user_path(username);
        match self.client.get_json(&path).await {
            Ok(value) => parse_marzban_user(&value)
                .map(Some)
                .ok_or_else(|| PanelError::malformed(&path, "user has no username")),
            Err(PanelError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_user(&self, username: &str) -> Result<ClassicUser> {
        self.try_get_user(username).await?.ok_or_else(|| {
            client_not_found(username, &format!("panel '{}'", self.profile().id))
        })
    }

    async fn unused_label(&self) -> Result<String> {
        for _ in 0..LABEL_ATTEMPTS {
            let label = generate_label(&self.label_prefix);
            if self.try_get_user(&label).await?.is_none() {
                return Ok(label);
            }
        }
        Err(labels_exhausted(&format!("users of panel '{}'", self.profile().id)))
    }

    pub async fn create_client(&self, inbound_id: &str, plan: &Plan) -> Result<ClientRecord> {
        let inbound = self.fetch_inbound(inbound_id).await?;
        let label = self.unused_label().await?;
        let flow = flow_for(&inbound, self.profile().vless_flow.as_deref());
        let record = new_client_record(&inbound, &label, plan, NATIVE_UNIT, Utc::now(), flow);

        let protocol = inbound.protocol.as_str().to_string();
        let mut proxies = Map::new();
        proxies.insert(
            protocol.clone(),
            proxy_settings(&inbound.protocol, &record.identifier, record.flow.as_deref()),
        );
        let mut inbounds = Map::new();
        inbounds.insert(protocol, json!([inbound.tag]));

        let body = json!({
            "username": label,
            "proxies": proxies,
            "inbounds": inbounds,
            "data_limit": record.quota_bytes,
            "expire": record.expiry,
            "data_limit_reset_strategy": "no_reset",
            "status": "active",
        });

        let identifier = record.identifier.as_str();
        let candidates = [RequestSpec::post_json("/api/user", body)];
        probe(&self.client, "create user", &candidates, |_| {
            let label = label.as_str();
            async move {
                Ok(self
                    .try_get_user(label)
                    .await?
                    .is_some_and(|u| u.record.identifier == identifier))
            }
        })
        .await?;

        info!("Created user '{}' on panel '{}'", label, self.profile().id);
        Ok(self.get_user(&label).await?.record)
    }

    pub async fn renew_client(&self, owner_label: &str, plan: &Plan) -> Result<ClientRecord> {
        let current = self.get_user(owner_label).await?.record;
        let target = renewal_target(&current, plan, NATIVE_UNIT, Utc::now(), &self.policy);
        debug!(
            "Renewing '{}': quota {} -> {}, expire {} -> {}",
            owner_label, current.quota_bytes, target.quota_bytes, current.expiry, target.expiry
        );

        let body = json!({
            "data_limit": target.quota_bytes,
            "expire": target.expiry,
            "status": "active",
        });
        let candidates = [RequestSpec::put_json(user_path(owner_label), body)];
        let target = &target;
        probe(&self.client, "renew user", &candidates, |_| async move {
            Ok(self.try_get_user(owner_label).await?.is_some_and(|u| {
                target.is_met_by(u.record.quota_bytes, u.record.expiry, &self.policy)
            }))
        })
        .await?;

        info!("Renewed user '{}' on panel '{}'", owner_label, self.profile().id);
        Ok(self.get_user(owner_label).await?.record)
    }

    /// New proxy keys via update, or a subscription revoke that regenerates them
    pub async fn rotate_client_key(&self, owner_label: &str) -> Result<ClientRecord> {
        let current = self.get_user(owner_label).await?.record;
        let proxies = regenerated_proxies(current.extra.get("proxies"));
        let path = user_path(owner_label);

        let candidates = [
            RequestSpec::put_json(&path, json!({ "proxies": proxies })),
            RequestSpec::post_empty(format!("{}/revoke_sub", path)),
        ];
        let previous = current.identifier.as_str();
        probe(&self.client, "rotate user key", &candidates, |_| async move {
            Ok(self
                .try_get_user(owner_label)
                .await?
                .is_some_and(|u| u.record.identifier != previous))
        })
        .await?;

        info!("Rotated keys of user '{}' on panel '{}'", owner_label, self.profile().id);
        Ok(self.get_user(owner_label).await?.record)
    }

    /// Pages through `/api/users` until a short page or the reported total
    pub async fn list_all_clients(&self) -> Result<Vec<ClientRecord>> {
        let limit = u64::from(self.page_size);
        let mut offset = 0u64;
        let mut records = Vec::new();

        loop {
            let path = format!("/api/users?offset={}&limit={}", offset, limit);
            let value = self.client.get_json(&path).await?;
            let (users, total) = parse_user_page(&value)
                .ok_or_else(|| PanelError::malformed(&path, "no users array"))?;

            let count = users.len() as u64;
            records.extend(users.into_iter().map(|u| u.record));
            offset += count;
            debug!("Listed {} user(s), {} so far", count, records.len());

            if count < limit || total.is_some_and(|t| offset >= t) {
                break;
            }
        }

        Ok(records)
    }

    pub async fn status(&self, owner_label: &str) -> Result<ClientStatus> {
        let user = self.get_user(owner_label).await?;
        let url = user
            .subscription_url
            .as_deref()
            .and_then(|u| absolute_url(self.profile(), u));
        Ok(ClientStatus::from_record(&user.record, url))
    }

    pub async fn access(&self, owner_label: &str) -> Result<Access> {
        let user = self.get_user(owner_label).await?;
        classic_access(&self.client, user).await
    }
}

impl fmt::Debug for MarzbanDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarzbanDriver")
            .field("client", &self.client)
            .field("page_size", &self.page_size)
            .finish()
    }
}
