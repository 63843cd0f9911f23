//! X-UI lineage driver (3x-ui, x-ui, legacy x-ui)
//!
//! Clients live inside an inbound's `settings.clients`. The three forks
//! differ in the case of their API root and in whether `updateClient`
//! actually applies, so every mutation is probed across all roots and
//! verified by re-reading the inbound.

use std::fmt;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info};

use super::{Access, Capabilities, ClientStatus, client_not_found, subscription_access};
use crate::catalog::CatalogReader;
use crate::catalog::xui::{client_key, clients_settings};
use crate::config::{PanelProfile, ProvisionSettings, VendorFamily};
use crate::error::{PanelError, Result};
use crate::http::{PanelClient, PanelResponse, RequestSpec};
use crate::model::{ClientRecord, InboundDescriptor, Plan};
use crate::probe::probe;
use crate::provision::{
    LABEL_ATTEMPTS, flow_for, generate_label, holds_record, labels_exhausted, lacks_client,
    meets_target, new_client_record, rekeyed, renewal_target, rotated_label, with_target,
};
use crate::quota::{ExpiryPolicy, ExpiryUnit};
use crate::uri::UriBuilder;

/// X-UI stores `expiryTime` in milliseconds
const NATIVE_UNIT: ExpiryUnit = ExpiryUnit::Millis;

/// Inbound list served to the web UI, present on every fork
const UI_LIST_PATH: &str = "/xui/inbound/list";

/// API roots per fork
const API_ROOTS: [(VendorFamily, &str); 3] = [
    (VendorFamily::ThreeXui, "/panel/api/inbounds"),
    (VendorFamily::Xui, "/xui/API/inbounds"),
    (VendorFamily::XuiLegacy, "/xui/api/inbounds"),
];

/// API roots to probe, the family's own first
fn api_roots(family: VendorFamily) -> Vec<&'static str> {
    let own = API_ROOTS.iter().filter(|(f, _)| *f == family);
    let rest = API_ROOTS.iter().filter(|(f, _)| *f != family);
    own.chain(rest).map(|(_, root)| *root).collect()
}

pub struct XuiDriver {
    client: PanelClient,
    reader: CatalogReader,
    uris: UriBuilder,
    roots: Vec<&'static str>,
    policy: ExpiryPolicy,
    label_prefix: String,
}

impl XuiDriver {
    pub fn new(client: PanelClient, settings: &ProvisionSettings) -> Self {
        let profile = client.profile();
        Self {
            reader: CatalogReader::xui(),
            uris: UriBuilder::new(profile, &settings.fingerprint),
            roots: api_roots(profile.family),
            policy: settings.expiry_policy(),
            label_prefix: settings.label_prefix.clone(),
            client,
        }
    }

    pub fn profile(&self) -> &PanelProfile {
        self.client.profile()
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            list_all_clients: false,
            create_on_inbound: true,
            in_place_update: self.profile().family != VendorFamily::XuiLegacy,
            account_level: false,
        }
    }

    // ========================================================================
    // Inbounds
    // ========================================================================

    pub async fn list_inbounds(&self) -> Result<Vec<InboundDescriptor>> {
        let mut candidates: Vec<RequestSpec> = self
            .roots
            .iter()
            .map(|root| RequestSpec::get(format!("{}/list", root)))
            .collect();
        candidates.push(RequestSpec::post_empty(UI_LIST_PATH));

        let response = probe(&self.client, "list inbounds", &candidates, |r| {
            let parsed = r
                .json()
                .is_some_and(|v| self.reader.read_list("inbound list", &v).is_ok());
            async move { Ok(parsed) }
        })
        .await?;

        let value = response
            .json()
            .ok_or_else(|| PanelError::malformed("inbound list", "response is not JSON"))?;
        self.reader.read_list("inbound list", &value)
    }

    /// Detail endpoint first; panels without one are served from the list
    pub async fn fetch_inbound(&self, inbound_id: &str) -> Result<InboundDescriptor> {
        let candidates: Vec<RequestSpec> = self
            .roots
            .iter()
            .map(|root| RequestSpec::get(format!("{}/get/{}", root, inbound_id)))
            .collect();

        let detail = probe(&self.client, "fetch inbound", &candidates, |r| {
            let matches = self.parse_detail(r).is_some_and(|i| i.id == inbound_id);
            async move { Ok(matches) }
        })
        .await;

        match detail {
            Ok(response) => self.parse_detail(&response).ok_or_else(|| {
                PanelError::malformed(&format!("inbound {}", inbound_id), "detail vanished")
            }),
            Err(PanelError::ProbeExhausted { .. }) => {
                debug!("No detail endpoint answered for inbound {}, using the list", inbound_id);
                self.list_inbounds()
                    .await?
                    .into_iter()
                    .find(|i| i.id == inbound_id)
                    .ok_or_else(|| {
                        PanelError::NotFound(format!(
                            "inbound {} on panel '{}'",
                            inbound_id,
                            self.profile().id
                        ))
                    })
            }
            Err(e) => Err(e),
        }
    }

    fn parse_detail(&self, response: &PanelResponse) -> Option<InboundDescriptor> {
        let value = response.json()?;
        self.reader.read_one("inbound detail", &value).ok()
    }

    // ========================================================================
    // Clients
    // ========================================================================

    pub async fn create_client(&self, inbound_id: &str, plan: &Plan) -> Result<ClientRecord> {
        let inbound = self.fetch_inbound(inbound_id).await?;
        let label = self.unused_label(&inbound, || generate_label(&self.label_prefix))?;
        let flow = flow_for(&inbound, self.profile().vless_flow.as_deref());
        let record = new_client_record(&inbound, &label, plan, NATIVE_UNIT, Utc::now(), flow);

        self.add_client(&inbound, &record, "create client").await?;
        info!(
            "Created client '{}' on inbound {} of panel '{}'",
            record.owner_label,
            inbound.id,
            self.profile().id
        );
        Ok(record)
    }

    pub async fn renew_client(
        &self,
        inbound_id: &str,
        owner_label: &str,
        plan: &Plan,
    ) -> Result<ClientRecord> {
        let inbound = self.fetch_inbound(inbound_id).await?;
        let current = find_client(&inbound, owner_label)?;
        let target = renewal_target(current, plan, NATIVE_UNIT, Utc::now(), &self.policy);
        let renewed = with_target(current, &target);
        debug!(
            "Renewing '{}': quota {} -> {}, expiry {} -> {} ({})",
            owner_label, current.quota_bytes, target.quota_bytes, current.expiry, target.expiry, target.unit
        );

        if self.capabilities().in_place_update {
            self.update_client(&inbound, current, &renewed, "renew client", |fresh| {
                meets_target(fresh, owner_label, &target, &self.policy)
            })
            .await?;
        } else {
            self.delete_client(&inbound, current, "renew client").await?;
            if let Err(e) = self.add_client(&inbound, &renewed, "renew client").await {
                error!(
                    "Client '{}' was deleted from inbound {} but could not be recreated (identifier {}, quota {}, expiry {})",
                    renewed.owner_label, inbound.id, renewed.identifier, renewed.quota_bytes, renewed.expiry
                );
                return Err(e);
            }
        }

        info!("Renewed client '{}' on inbound {}", owner_label, inbound.id);
        Ok(renewed)
    }

    /// In place where updates apply; otherwise the client is recreated
    /// under a new label before the old one is deleted
    pub async fn rotate_client_key(
        &self,
        inbound_id: &str,
        owner_label: &str,
    ) -> Result<ClientRecord> {
        let inbound = self.fetch_inbound(inbound_id).await?;
        let current = find_client(&inbound, owner_label)?;

        if self.capabilities().in_place_update {
            let rotated = rekeyed(current, &inbound, None);
            self.update_client(&inbound, current, &rotated, "rotate client key", |fresh| {
                holds_record(fresh, &rotated, NATIVE_UNIT, &self.policy)
            })
            .await?;
            info!("Rotated key of client '{}' on inbound {}", owner_label, inbound.id);
            return Ok(rotated);
        }

        let label = self.unused_label(&inbound, || rotated_label(owner_label))?;
        let rotated = rekeyed(current, &inbound, Some(&label));
        self.add_client(&inbound, &rotated, "rotate client key").await?;
        self.delete_client(&inbound, current, "rotate client key").await?;
        info!(
            "Rotated key of client '{}' on inbound {} by recreating it as '{}'",
            owner_label, inbound.id, rotated.owner_label
        );
        Ok(rotated)
    }

    pub async fn status(&self, owner_label: &str) -> Result<ClientStatus> {
        for inbound in self.list_inbounds().await? {
            if let Some(client) = inbound.find_client(owner_label) {
                return Ok(ClientStatus::from_record(client, self.subscription_url(client)));
            }
        }
        Err(client_not_found(
            owner_label,
            &format!("panel '{}'", self.profile().id),
        ))
    }

    pub async fn access(&self, inbound_id: &str, record: &ClientRecord) -> Result<Access> {
        let inbound = self.fetch_inbound(inbound_id).await?;
        let subscription_url = self.subscription_url(record);

        match self.uris.build(record, &inbound) {
            Ok(uris) => Ok(Access {
                uris,
                subscription_url,
            }),
            Err(e @ PanelError::Unsupported { .. }) => match subscription_url {
                Some(url) => {
                    debug!("{}, falling back to the subscription document", e);
                    subscription_access(&self.client, url).await
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// `{subscription_base}/{subId}`, or `/sub/{subId}` on the panel's origin
    pub fn subscription_url(&self, record: &ClientRecord) -> Option<String> {
        if record.sub_id.is_empty() {
            return None;
        }
        let root = match self.profile().subscription_root() {
            Some(root) => root.to_string(),
            None => format!("{}/sub", self.client.base().origin().ascii_serialization()),
        };
        Some(format!("{}/{}", root, record.sub_id))
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    fn unused_label<G>(&self, inbound: &InboundDescriptor, generate: G) -> Result<String>
    where
        G: Fn() -> String,
    {
        (0..LABEL_ATTEMPTS)
            .map(|_| generate())
            .find(|label| inbound.find_client(label).is_none())
            .ok_or_else(|| labels_exhausted(&format!("inbound {}", inbound.id)))
    }

    /// JSON then form body for each API root
    fn client_candidates(&self, action: &str, inbound_id: &str, settings: &str) -> Vec<RequestSpec> {
        let id = inbound_id
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(inbound_id));

        self.roots
            .iter()
            .flat_map(|root| {
                let path = format!("{}/{}", root, action);
                let mut body = serde_json::Map::new();
                body.insert("id".to_string(), id.clone());
                body.insert("settings".to_string(), Value::from(settings));
                [
                    RequestSpec::post_json(&path, Value::Object(body)),
                    RequestSpec::post_form(
                        path,
                        vec![
                            ("id".to_string(), inbound_id.to_string()),
                            ("settings".to_string(), settings.to_string()),
                        ],
                    ),
                ]
            })
            .collect()
    }

    async fn add_client(
        &self,
        inbound: &InboundDescriptor,
        record: &ClientRecord,
        operation: &str,
    ) -> Result<()> {
        let settings = clients_settings(&inbound.protocol, &[record]);
        let candidates = self.client_candidates("addClient", &inbound.id, &settings);
        let inbound_id = inbound.id.as_str();

        probe(&self.client, operation, &candidates, |_| async move {
            let fresh = self.fetch_inbound(inbound_id).await?;
            Ok(holds_record(&fresh, record, NATIVE_UNIT, &self.policy))
        })
        .await?;
        Ok(())
    }

    async fn update_client<P>(
        &self,
        inbound: &InboundDescriptor,
        current: &ClientRecord,
        updated: &ClientRecord,
        operation: &str,
        check: P,
    ) -> Result<()>
    where
        P: Fn(&InboundDescriptor) -> bool,
    {
        let key = urlencoding::encode(client_key(&inbound.protocol, current)).into_owned();
        let settings = clients_settings(&inbound.protocol, &[updated]);
        let candidates =
            self.client_candidates(&format!("updateClient/{}", key), &inbound.id, &settings);
        let inbound_id = inbound.id.as_str();
        let check = &check;

        probe(&self.client, operation, &candidates, |_| async move {
            let fresh = self.fetch_inbound(inbound_id).await?;
            Ok(check(&fresh))
        })
        .await?;
        Ok(())
    }

    async fn delete_client(
        &self,
        inbound: &InboundDescriptor,
        record: &ClientRecord,
        operation: &str,
    ) -> Result<()> {
        let key = urlencoding::encode(client_key(&inbound.protocol, record)).into_owned();
        let candidates: Vec<RequestSpec> = self
            .roots
            .iter()
            .map(|root| RequestSpec::post_empty(format!("{}/{}/delClient/{}", root, inbound.id, key)))
            .collect();
        let inbound_id = inbound.id.as_str();
        let owner_label = record.owner_label.as_str();

        probe(&self.client, operation, &candidates, |_| async move {
            let fresh = self.fetch_inbound(inbound_id).await?;
            Ok(lacks_client(&fresh, owner_label))
        })
        .await?;
        debug!("Deleted client '{}' from inbound {}", owner_label, inbound_id);
        Ok(())
    }
}

fn find_client<'a>(inbound: &'a InboundDescriptor, owner_label: &str) -> Result<&'a ClientRecord> {
    inbound
        .find_client(owner_label)
        .ok_or_else(|| client_not_found(owner_label, &format!("inbound {}", inbound.id)))
}

impl fmt::Debug for XuiDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XuiDriver")
            .field("client", &self.client)
            .field("roots", &self.roots)
            .finish()
    }
}
