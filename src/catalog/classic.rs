//! Marzban and Marzneshin shapes
//!
//! Classic panels attach credentials to accounts rather than to inbounds,
//! so their users are normalized here as well.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

use super::{embedded, int, text, uint};
use crate::model::{ClientRecord, InboundDescriptor, Network, Protocol, Security};

/// Order in which a user's proxies are consulted for its identifier
const PROXY_ORDER: [&str; 4] = ["vless", "vmess", "trojan", "shadowsocks"];

// ============================================================================
// Inbounds
// ============================================================================

/// Marzban `GET /api/inbounds`: `{"vless": [{"tag": ..., ...}], "vmess": [...]}`
pub fn parse_protocol_map(value: &Value) -> Option<Vec<InboundDescriptor>> {
    let map = value.as_object()?;
    let mut recognized = false;
    let mut inbounds = Vec::new();

    for (protocol, entries) in map {
        let Some(entries) = entries.as_array() else {
            continue;
        };
        recognized = true;
        for entry in entries {
            if let Some(inbound) = parse_marzban_inbound(protocol, entry) {
                inbounds.push(inbound);
            }
        }
    }

    recognized.then_some(inbounds)
}

fn parse_marzban_inbound(protocol_key: &str, entry: &Value) -> Option<InboundDescriptor> {
    let tag = text(entry.get("tag"))?;
    let protocol = entry
        .get("protocol")
        .and_then(Value::as_str)
        .map(Protocol::from)
        .unwrap_or_else(|| Protocol::from(protocol_key));
    let port = int(entry.get("port"))
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(0);

    let mut inbound = InboundDescriptor::new(&tag, protocol, port);
    inbound.tag = tag.clone();
    inbound.remark = tag;
    inbound.network = entry
        .get("network")
        .and_then(Value::as_str)
        .map(Network::from)
        .unwrap_or_default();
    inbound.security = entry
        .get("tls")
        .and_then(Value::as_str)
        .map(Security::parse)
        .unwrap_or_default();
    Some(inbound)
}

/// Marzneshin inbound item; `config` may be a JSON string or an object
pub fn parse_marzneshin_inbound(entry: &Value) -> Option<InboundDescriptor> {
    let tag = text(entry.get("tag"))?;
    let id = text(entry.get("id")).unwrap_or_else(|| tag.clone());
    let protocol = Protocol::from(entry.get("protocol")?.as_str()?);
    let config = embedded(entry, "config");

    let port = int(config.get("port"))
        .or_else(|| int(entry.get("port")))
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(0);

    let mut inbound = InboundDescriptor::new(&id, protocol, port);
    inbound.tag = tag.clone();
    inbound.remark = tag;
    inbound.network = config
        .get("network")
        .and_then(Value::as_str)
        .map(Network::from)
        .unwrap_or_default();
    inbound.security = config
        .get("tls")
        .or_else(|| config.get("security"))
        .and_then(Value::as_str)
        .map(Security::parse)
        .unwrap_or_default();
    Some(inbound)
}

// ============================================================================
// Users
// ============================================================================

/// A classic panel user with the access material the panel reports
#[derive(Debug, Clone, PartialEq)]
pub struct ClassicUser {
    pub record: ClientRecord,
    pub links: Vec<String>,
    pub subscription_url: Option<String>,
}

pub fn parse_marzban_user(value: &Value) -> Option<ClassicUser> {
    let username = text(value.get("username"))?;
    let proxies = value.get("proxies").cloned().unwrap_or(Value::Null);

    let mut record = ClientRecord::new(&proxy_identifier(&proxies).unwrap_or_default(), &username);
    record.quota_bytes = uint(value.get("data_limit"));
    record.used_bytes = uint(value.get("used_traffic"));
    record.expiry = int(value.get("expire")).unwrap_or(0);
    record.enabled = matches!(
        value.get("status").and_then(Value::as_str),
        Some("active") | Some("on_hold") | None
    );
    record.flow = text(proxies["vless"].get("flow"));

    let subscription_url = text(value.get("subscription_url"));
    record.sub_id = subscription_url
        .as_deref()
        .and_then(last_segment)
        .unwrap_or_default();

    let mut extra = Map::new();
    for key in ["proxies", "inbounds", "status", "data_limit_reset_strategy"] {
        if let Some(v) = value.get(key) {
            extra.insert(key.to_string(), v.clone());
        }
    }
    record.extra = extra;

    Some(ClassicUser {
        record,
        links: links(value),
        subscription_url,
    })
}

pub fn parse_marzneshin_user(value: &Value) -> Option<ClassicUser> {
    let username = text(value.get("username"))?;

    let mut record = ClientRecord::new(&text(value.get("key")).unwrap_or_default(), &username);
    record.quota_bytes = uint(value.get("data_limit"));
    record.used_bytes = uint(value.get("used_traffic"));
    record.expiry = value
        .get("expire_date")
        .and_then(Value::as_str)
        .and_then(parse_iso_expiry)
        .unwrap_or(0);
    record.enabled = value.get("enabled").and_then(Value::as_bool).unwrap_or(true);

    let subscription_url = text(value.get("subscription_url"));
    record.sub_id = subscription_url
        .as_deref()
        .and_then(last_segment)
        .unwrap_or_default();

    let mut extra = Map::new();
    for key in ["service_ids", "expire_strategy", "usage_duration"] {
        if let Some(v) = value.get(key) {
            extra.insert(key.to_string(), v.clone());
        }
    }
    record.extra = extra;

    Some(ClassicUser {
        record,
        links: links(value),
        subscription_url,
    })
}

/// Marzban `GET /api/users`: `{"users": [...], "total": n}`
pub fn parse_user_page(value: &Value) -> Option<(Vec<ClassicUser>, Option<u64>)> {
    let users = value
        .get("users")
        .or_else(|| value.get("items"))
        .and_then(Value::as_array)?;
    let total = value.get("total").and_then(Value::as_u64);
    Some((users.iter().filter_map(parse_marzban_user).collect(), total))
}

fn proxy_identifier(proxies: &Value) -> Option<String> {
    PROXY_ORDER.iter().find_map(|proto| {
        let settings = proxies.get(*proto)?;
        text(settings.get("id")).or_else(|| text(settings.get("password")))
    })
}

fn links(value: &Value) -> Vec<String> {
    value
        .get("links")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn last_segment(url: &str) -> Option<String> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(String::from)
}

// ============================================================================
// ISO Expiry
// ============================================================================

/// Parses Marzneshin's `expire_date` (naive values are UTC) into unix seconds
pub fn parse_iso_expiry(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive).timestamp())
}

/// Formats unix seconds as an RFC 3339 UTC timestamp
pub fn format_iso_expiry(seconds: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}
