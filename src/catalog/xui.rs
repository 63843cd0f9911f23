//! X-UI lineage inbound shapes
//!
//! `settings` and `streamSettings` are JSON-encoded strings on 3x-ui and
//! x-ui, and inline objects in raw xray configs; both are accepted.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use tracing::trace;

use super::{embedded, int, strings, text, uint};
use crate::model::{
    ClientRecord, ExternalEndpoint, InboundDescriptor, Network, Protocol, Security,
    TransportParams,
};

/// Client keys mapped onto [`ClientRecord`] fields; everything else goes to `extra`
const KNOWN_CLIENT_KEYS: [&str; 9] = [
    "id",
    "password",
    "email",
    "totalGB",
    "expiryTime",
    "enable",
    "subId",
    "limitIp",
    "flow",
];

// ============================================================================
// Inbounds
// ============================================================================

pub fn parse_inbound(raw: &Value) -> Option<InboundDescriptor> {
    let protocol = Protocol::from(raw.get("protocol")?.as_str()?);
    let tag = text(raw.get("tag")).unwrap_or_default();
    let id = text(raw.get("id")).or_else(|| (!tag.is_empty()).then(|| tag.clone()))?;

    let settings = embedded(raw, "settings");
    let stream = embedded(raw, "streamSettings");

    let network = stream
        .get("network")
        .and_then(Value::as_str)
        .map(Network::from)
        .unwrap_or_default();
    let security = stream
        .get("security")
        .and_then(Value::as_str)
        .map(Security::parse)
        .unwrap_or_default();

    let mut transport = TransportParams::default();
    read_network(&stream, &network, &mut transport);
    read_security(&stream, security, &mut transport);

    let stats = client_stats(raw);
    let clients = settings
        .get("clients")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|c| parse_client(c, &protocol, &stats))
                .collect()
        })
        .unwrap_or_default();

    let inbound = InboundDescriptor {
        id,
        tag,
        remark: text(raw.get("remark")).unwrap_or_default(),
        port: int(raw.get("port"))
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(0),
        listen: text(raw.get("listen")),
        enabled: raw.get("enable").and_then(Value::as_bool).unwrap_or(true),
        network,
        security,
        transport,
        external: external_proxies(&stream),
        ss_method: text(settings.get("method")),
        ss_password: text(settings.get("password")),
        clients,
        protocol,
    };

    trace!(
        "Parsed inbound {} ({} {}:{}/{}, {} clients)",
        inbound.id,
        inbound.protocol,
        inbound.network,
        inbound.port,
        inbound.security,
        inbound.clients.len()
    );
    Some(inbound)
}

fn read_network(stream: &Value, network: &Network, transport: &mut TransportParams) {
    match network {
        Network::Ws => {
            let ws = &stream["wsSettings"];
            transport.path = text(ws.get("path"));
            transport.host = text(ws.get("host")).or_else(|| text(ws["headers"].get("Host")));
        }
        Network::Grpc => {
            transport.service_name = text(stream["grpcSettings"].get("serviceName"));
        }
        Network::Tcp => {
            let header = &stream["tcpSettings"]["header"];
            if header.get("type").and_then(Value::as_str) == Some("http") {
                transport.header_type = Some("http".to_string());
                let request = &header["request"];
                transport.path = strings(request.get("path")).into_iter().next();
                transport.host = strings(request["headers"].get("Host")).into_iter().next();
            }
        }
        Network::Other(_) => {
            let name = format!("{}Settings", network.as_str());
            let settings = &stream[name.as_str()];
            transport.path = text(settings.get("path"));
            transport.host = text(settings.get("host"));
        }
    }
}

fn read_security(stream: &Value, security: Security, transport: &mut TransportParams) {
    match security {
        Security::Tls => {
            let tls = &stream["tlsSettings"];
            transport.server_names = text(tls.get("serverName")).into_iter().collect();
            transport.alpn = strings(tls.get("alpn"));
            transport.fingerprint =
                text(tls["settings"].get("fingerprint")).or_else(|| text(tls.get("fingerprint")));
        }
        Security::Reality => {
            let reality = &stream["realitySettings"];
            transport.server_names = strings(reality.get("serverNames"));
            if transport.server_names.is_empty() {
                transport.server_names = text(reality["settings"].get("serverName"))
                    .into_iter()
                    .collect();
            }
            transport.short_ids = strings(reality.get("shortIds"));
            transport.public_key = text(reality["settings"].get("publicKey"));
            transport.fingerprint = text(reality["settings"].get("fingerprint"));
        }
        Security::None => {}
    }
}

fn external_proxies(stream: &Value) -> Vec<ExternalEndpoint> {
    let Some(items) = stream.get("externalProxy").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let host = text(item.get("dest"))?;
            let port = int(item.get("port")).and_then(|p| u16::try_from(p).ok())?;
            let force_tls = match item.get("forceTls").and_then(Value::as_str) {
                Some("tls") => Some(Security::Tls),
                Some("none") => Some(Security::None),
                _ => None,
            };
            Some(ExternalEndpoint {
                host,
                port,
                remark: text(item.get("remark")).unwrap_or_default(),
                force_tls,
            })
        })
        .collect()
}

// ============================================================================
// Clients
// ============================================================================

/// Traffic used per email, from `clientStats`
fn client_stats(raw: &Value) -> HashMap<String, u64> {
    raw.get("clientStats")
        .and_then(Value::as_array)
        .map(|stats| {
            stats
                .iter()
                .filter_map(|s| {
                    let email = text(s.get("email"))?;
                    let used = uint(s.get("up")).saturating_add(uint(s.get("down")));
                    Some((email, used))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn identifier_key(protocol: &Protocol) -> &'static str {
    match protocol {
        Protocol::Trojan | Protocol::Shadowsocks => "password",
        _ => "id",
    }
}

pub fn parse_client(
    raw: &Value,
    protocol: &Protocol,
    stats: &HashMap<String, u64>,
) -> Option<ClientRecord> {
    let object = raw.as_object()?;
    let owner_label = text(object.get("email"))?;
    let identifier = text(object.get(identifier_key(protocol)))
        .or_else(|| text(object.get("id")))
        .or_else(|| text(object.get("password")))
        .unwrap_or_default();

    let extra: Map<String, Value> = object
        .iter()
        .filter(|(k, _)| !KNOWN_CLIENT_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Some(ClientRecord {
        identifier,
        quota_bytes: uint(object.get("totalGB")),
        used_bytes: stats.get(&owner_label).copied().unwrap_or(0),
        expiry: int(object.get("expiryTime")).unwrap_or(0),
        enabled: object.get("enable").and_then(Value::as_bool).unwrap_or(true),
        sub_id: text(object.get("subId")).unwrap_or_default(),
        limit_ip: u32::try_from(uint(object.get("limitIp"))).unwrap_or(u32::MAX),
        flow: text(object.get("flow")),
        extra,
        owner_label,
    })
}

/// Serializes a client back into the X-UI `settings.clients` entry shape
pub fn client_json(protocol: &Protocol, client: &ClientRecord) -> Value {
    let mut object = client.extra.clone();
    object.insert(
        identifier_key(protocol).to_string(),
        Value::String(client.identifier.clone()),
    );
    object.insert("email".to_string(), json!(client.owner_label));
    object.insert("totalGB".to_string(), json!(client.quota_bytes));
    object.insert("expiryTime".to_string(), json!(client.expiry));
    object.insert("enable".to_string(), json!(client.enabled));
    object.insert("subId".to_string(), json!(client.sub_id));
    object.insert("limitIp".to_string(), json!(client.limit_ip));
    if let Some(flow) = &client.flow
        && matches!(protocol, Protocol::Vless)
    {
        object.insert("flow".to_string(), json!(flow));
    }
    Value::Object(object)
}

/// The `settings` string X-UI expects when adding or updating clients
pub fn clients_settings(protocol: &Protocol, clients: &[&ClientRecord]) -> String {
    let entries: Vec<Value> = clients.iter().map(|c| client_json(protocol, c)).collect();
    json!({ "clients": entries }).to_string()
}

/// Path key X-UI uses to address a client in update and delete calls
pub fn client_key<'a>(protocol: &Protocol, client: &'a ClientRecord) -> &'a str {
    match protocol {
        Protocol::Shadowsocks => &client.owner_label,
        _ => &client.identifier,
    }
}
