//! Marzneshin driver
//!
//! Users are created against services rather than inbounds and carry a
//! single server-generated key. Expiry travels as an ISO timestamp plus an
//! expire strategy.

use std::fmt;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{Access, Capabilities, ClientStatus, absolute_url, classic_access, client_not_found};
use crate::catalog::CatalogReader;
use crate::catalog::classic::{ClassicUser, format_iso_expiry, parse_marzneshin_user};
use crate::config::{PanelProfile, ProvisionSettings};
use crate::error::{PanelError, Result};
use crate::http::{PanelClient, RequestSpec};
use crate::model::{ClientRecord, InboundDescriptor, Plan};
use crate::probe::probe;
use crate::provision::{LABEL_ATTEMPTS, generate_label, labels_exhausted, renewal_target};
use crate::quota::{ExpiryPolicy, ExpiryUnit, initial_expiry};

/// Expiry is normalized to unix seconds when users are read
const NATIVE_UNIT: ExpiryUnit = ExpiryUnit::Seconds;

fn user_path(username: &str) -> String {
    format!("/api/users/{}", urlencoding::encode(username))
}

/// `expire_strategy` and `expire_date` for a raw expiry in seconds
fn expire_fields(expiry: i64) -> (&'static str, Value) {
    match format_iso_expiry(expiry) {
        Some(date) if expiry > 0 => ("fixed_date", Value::String(date)),
        _ => ("never", Value::Null),
    }
}

pub struct MarzneshinDriver {
    client: PanelClient,
    reader: CatalogReader,
    policy: ExpiryPolicy,
    label_prefix: String,
    page_size: u32,
}

impl MarzneshinDriver {
    pub const CAPABILITIES: Capabilities = Capabilities {
        list_all_clients: false,
        create_on_inbound: false,
        in_place_update: true,
        account_level: true,
    };

    pub fn new(client: PanelClient, settings: &ProvisionSettings) -> Self {
        Self {
            client,
            reader: CatalogReader::marzneshin(),
            policy: settings.expiry_policy(),
            label_prefix: settings.label_prefix.clone(),
            page_size: settings.page_size,
        }
    }

    pub fn profile(&self) -> &PanelProfile {
        self.client.profile()
    }

    pub async fn list_inbounds(&self) -> Result<Vec<InboundDescriptor>> {
        let path = format!("/api/inbounds?page=1&size={}", self.page_size);
        let value = self.client.get_json(&path).await?;
        self.reader.read_list(&path, &value)
    }

    pub async fn fetch_inbound(&self, inbound_id: &str) -> Result<InboundDescriptor> {
        self.list_inbounds()
            .await?
            .into_iter()
            .find(|i| i.id == inbound_id || i.tag == inbound_id)
            .ok_or_else(|| {
                PanelError::NotFound(format!("inbound '{}' on panel '{}'", inbound_id, self.profile().id))
            })
    }

    async fn try_get_user(&self, username: &str) -> Result<Option<ClassicUser>> {
        let path = user_path(username);
        match self.client.get_json(&path).await {
            Ok(value) => parse_marzneshin_user(&value)
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

    /// Creates a user attached to the profile's `service_ids`
    pub async fn create_account(&self, plan: &Plan) -> Result<ClientRecord> {
        if self.profile().service_ids.is_empty() {
            return Err(PanelError::Config(format!(
                "panel '{}' has no service_ids for new users",
                self.profile().id
            )));
        }

        let label = self.unused_label().await?;

        let quota_bytes = plan.quota_bytes();
        let expiry = initial_expiry(plan.duration_days, Utc::now(), NATIVE_UNIT);
        let (strategy, date) = expire_fields(expiry);
        let body = json!({
            "username": label,
            "service_ids": self.profile().service_ids,
            "data_limit": quota_bytes,
            "data_limit_reset_strategy": "no_reset",
            "expire_strategy": strategy,
            "expire_date": date,
        });

        let candidates = [RequestSpec::post_json("/api/users", body)];
        let label_ref = label.as_str();
        probe(&self.client, "create user", &candidates, |_| async move {
            Ok(self
                .try_get_user(label_ref)
                .await?
                .is_some_and(|u| u.record.quota_bytes == quota_bytes))
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

        let (strategy, date) = expire_fields(target.unit.to_seconds(target.expiry));
        let body = json!({
            "username": owner_label,
            "data_limit": target.quota_bytes,
            "expire_strategy": strategy,
            "expire_date": date,
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

    /// Revoking the subscription makes the panel issue a new key
    pub async fn rotate_client_key(&self, owner_label: &str) -> Result<ClientRecord> {
        let current = self.get_user(owner_label).await?.record;
        let candidates = [RequestSpec::post_empty(format!(
            "{}/revoke_sub",
            user_path(owner_label)
        ))];
        let previous = current.identifier.as_str();
        probe(&self.client, "rotate user key", &candidates, |_| async move {
            Ok(self
                .try_get_user(owner_label)
                .await?
                .is_some_and(|u| u.record.identifier != previous))
        })
        .await?;

        info!("Rotated key of user '{}' on panel '{}'", owner_label, self.profile().id);
        Ok(self.get_user(owner_label).await?.record)
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

impl fmt::Debug for MarzneshinDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarzneshinDriver")
            .field("client", &self.client)
            .finish()
    }
}
