//! Client provisioning building blocks
//!
//! Record construction, renewal targets, key material and the
//! verification predicates the drivers hand to the prober.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::Value;
use uuid::Uuid;

use crate::error::PanelError;
use crate::model::{ClientRecord, InboundDescriptor, Network, Plan, Protocol, Security};
use crate::quota::{Allowance, ExpiryPolicy, ExpiryUnit, Extension, Target, extend, initial_expiry};

const LABEL_SUFFIX_LEN: usize = 6;
const SECRET_LEN: usize = 16;
const SUB_ID_LEN: usize = 16;

/// Generated labels checked against a panel before giving up
pub const LABEL_ATTEMPTS: usize = 8;

// ============================================================================
// Random Material
// ============================================================================

fn random_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_lowercase(len: usize) -> String {
    random_alphanumeric(len).to_ascii_lowercase()
}

/// New owner label, `{prefix}_{suffix}`
pub fn generate_label(prefix: &str) -> String {
    let prefix = prefix.trim().trim_end_matches('_');
    let suffix = random_lowercase(LABEL_SUFFIX_LEN);
    if prefix.is_empty() {
        suffix
    } else {
        format!("{}_{}", prefix, suffix)
    }
}

/// Every generated label was reported as taken by `scope`
pub fn labels_exhausted(scope: &str) -> PanelError {
    PanelError::Rejected {
        endpoint: scope.to_string(),
        status: 409,
        body: format!("no free owner label after {} attempts", LABEL_ATTEMPTS),
    }
}

/// Label for a recreated client: the stem before the last `_` and a new suffix
pub fn rotated_label(old: &str) -> String {
    let stem = match old.rsplit_once('_') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => old,
    };
    loop {
        let label = generate_label(stem);
        if label != old {
            return label;
        }
    }
}

pub fn new_sub_id() -> String {
    random_lowercase(SUB_ID_LEN)
}

/// Fresh identifier material for a client of `inbound`
pub fn new_identifier(inbound: &InboundDescriptor) -> String {
    new_key(&inbound.protocol, inbound.ss_method.as_deref())
}

/// UUID for VLESS/VMess, a key sized for 2022 ciphers, otherwise a random secret
pub fn new_key(protocol: &Protocol, ss_method: Option<&str>) -> String {
    match protocol {
        Protocol::Vless | Protocol::Vmess => Uuid::new_v4().to_string(),
        Protocol::Shadowsocks => match ss_method {
            Some(method) if method.starts_with("2022-") => {
                let len = if method.contains("128") { 16 } else { 32 };
                let mut key = vec![0u8; len];
                rand::rng().fill(key.as_mut_slice());
                STANDARD.encode(key)
            }
            _ => random_alphanumeric(SECRET_LEN),
        },
        _ => random_alphanumeric(SECRET_LEN),
    }
}

/// Flow for a new client: only VLESS over raw tcp with tls or reality carries one
pub fn flow_for(inbound: &InboundDescriptor, configured: Option<&str>) -> Option<String> {
    let flow = configured.map(str::trim).filter(|f| !f.is_empty())?;
    let eligible = inbound.protocol == Protocol::Vless
        && inbound.network == Network::Tcp
        && matches!(inbound.security, Security::Tls | Security::Reality);
    eligible.then(|| flow.to_string())
}

// ============================================================================
// Records
// ============================================================================

/// Builds a new client for `inbound` with the plan's allowance
pub fn new_client_record(
    inbound: &InboundDescriptor,
    owner_label: &str,
    plan: &Plan,
    unit: ExpiryUnit,
    now: DateTime<Utc>,
    flow: Option<String>,
) -> ClientRecord {
    let mut record = ClientRecord::new(&new_identifier(inbound), owner_label);
    record.quota_bytes = plan.quota_bytes();
    record.expiry = initial_expiry(plan.duration_days, now, unit);
    record.enabled = true;
    record.sub_id = new_sub_id();
    record.flow = flow;
    record.extra.insert("tgId".to_string(), Value::String(String::new()));
    record.extra.insert("reset".to_string(), Value::from(0));
    record
}

/// Renewal target for `current`, detecting the expiry unit from its value
pub fn renewal_target(
    current: &ClientRecord,
    plan: &Plan,
    native_unit: ExpiryUnit,
    now: DateTime<Utc>,
    policy: &ExpiryPolicy,
) -> Target {
    extend(
        Allowance {
            quota_bytes: current.quota_bytes,
            expiry: current.expiry,
            native_unit,
        },
        Extension {
            quota_bytes: plan.quota_bytes(),
            duration_days: plan.duration_days,
        },
        now,
        policy,
    )
}

/// Target describing the allowance `record` already has
pub fn target_of(record: &ClientRecord, native_unit: ExpiryUnit, policy: &ExpiryPolicy) -> Target {
    Target {
        quota_bytes: record.quota_bytes,
        expiry: record.expiry,
        unit: policy.detect_unit(record.expiry, native_unit),
    }
}

/// `current` with the target allowance applied and re-enabled
pub fn with_target(current: &ClientRecord, target: &Target) -> ClientRecord {
    let mut record = current.clone();
    record.quota_bytes = target.quota_bytes;
    record.expiry = target.expiry;
    record.enabled = true;
    record
}

/// `current` with new key material, keeping allowance and limits
pub fn rekeyed(
    current: &ClientRecord,
    inbound: &InboundDescriptor,
    owner_label: Option<&str>,
) -> ClientRecord {
    let mut record = current.clone();
    loop {
        record.identifier = new_identifier(inbound);
        if record.identifier != current.identifier {
            break;
        }
    }
    record.sub_id = new_sub_id();
    if let Some(label) = owner_label {
        record.owner_label = label.to_string();
    }
    record
}

// ============================================================================
// Verification Predicates
// ============================================================================

/// The label exists and carries the expected identifier
pub fn has_client(inbound: &InboundDescriptor, owner_label: &str, identifier: &str) -> bool {
    inbound
        .find_client(owner_label)
        .is_some_and(|c| c.identifier == identifier)
}

pub fn lacks_client(inbound: &InboundDescriptor, owner_label: &str) -> bool {
    inbound.find_client(owner_label).is_none()
}

/// The record's label exists with its identifier and allowance
pub fn holds_record(
    inbound: &InboundDescriptor,
    record: &ClientRecord,
    native_unit: ExpiryUnit,
    policy: &ExpiryPolicy,
) -> bool {
    let target = target_of(record, native_unit, policy);
    inbound
        .find_client(&record.owner_label)
        .is_some_and(|c| {
            c.identifier == record.identifier && target.is_met_by(c.quota_bytes, c.expiry, policy)
        })
}

/// The label exists and its allowance meets `target`
pub fn meets_target(
    inbound: &InboundDescriptor,
    owner_label: &str,
    target: &Target,
    policy: &ExpiryPolicy,
) -> bool {
    inbound
        .find_client(owner_label)
        .is_some_and(|c| target.is_met_by(c.quota_bytes, c.expiry, policy))
}
