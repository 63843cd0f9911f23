//! Normalized panel data
//!
//! Every vendor shape is converted into these types by the catalog reader
//! before any provisioning logic looks at it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bytes per GiB; plan quotas are given in GB and panels count binary units
pub const BYTES_PER_GB: f64 = 1_073_741_824.0;

// ============================================================================
// Protocol / Network / Security
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(into = "String", from = "String")]
pub enum Protocol {
    Vless,
    Vmess,
    Trojan,
    Shadowsocks,
    Other(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Vless => "vless",
            Protocol::Vmess => "vmess",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Other(s) => s,
        }
    }

    /// Protocols whose client identifier is a UUID rather than a password
    pub fn uses_uuid(&self) -> bool {
        matches!(self, Protocol::Vless | Protocol::Vmess)
    }
}

impl From<String> for Protocol {
    fn from(s: String) -> Self {
        Protocol::from(s.as_str())
    }
}

impl From<&str> for Protocol {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "vless" => Protocol::Vless,
            "vmess" => Protocol::Vmess,
            "trojan" => Protocol::Trojan,
            "shadowsocks" | "ss" => Protocol::Shadowsocks,
            other => Protocol::Other(other.to_string()),
        }
    }
}

impl From<Protocol> for String {
    fn from(p: Protocol) -> Self {
        p.as_str().to_string()
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transport network of an inbound
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(into = "String", from = "String")]
pub enum Network {
    #[default]
    Tcp,
    Ws,
    Grpc,
    Other(String),
}

impl Network {
    pub fn as_str(&self) -> &str {
        match self {
            Network::Tcp => "tcp",
            Network::Ws => "ws",
            Network::Grpc => "grpc",
            Network::Other(s) => s,
        }
    }
}

impl From<String> for Network {
    fn from(s: String) -> Self {
        Network::from(s.as_str())
    }
}

impl From<&str> for Network {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "tcp" | "raw" => Network::Tcp,
            "ws" | "websocket" => Network::Ws,
            "grpc" | "gun" => Network::Grpc,
            other => Network::Other(other.to_string()),
        }
    }
}

impl From<Network> for String {
    fn from(n: Network) -> Self {
        n.as_str().to_string()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Security {
    #[default]
    None,
    Tls,
    Reality,
}

impl Security {
    pub fn as_str(&self) -> &'static str {
        match self {
            Security::None => "none",
            Security::Tls => "tls",
            Security::Reality => "reality",
        }
    }

    /// Unknown values (including "xtls" of old forks) count as no security
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls" => Security::Tls,
            "reality" => Security::Reality,
            _ => Security::None,
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Transport and security parameters needed to build connection URIs
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TransportParams {
    /// ws path, or the first request path of tcp http obfuscation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Host header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// tcp header type, "http" when obfuscation is on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_names: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alpn: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,

    /// Reality public key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_ids: Vec<String>,
}

impl TransportParams {
    pub fn sni(&self) -> Option<&str> {
        self.server_names.first().map(String::as_str)
    }

    pub fn short_id(&self) -> Option<&str> {
        self.short_ids.first().map(String::as_str)
    }
}

/// Alternative public endpoint advertised for an inbound
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ExternalEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub remark: String,
    /// Security override; `None` keeps the inbound's own setting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_tls: Option<Security>,
}

/// A proxy entry point exposed by a panel
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InboundDescriptor {
    /// Numeric id for X-UI panels, tag for classic panels
    pub id: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub remark: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub security: Security,
    #[serde(default)]
    pub transport: TransportParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external: Vec<ExternalEndpoint>,
    /// Shadowsocks cipher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ss_method: Option<String>,
    /// Shadowsocks server key (2022 ciphers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ss_password: Option<String>,
    #[serde(default)]
    pub clients: Vec<ClientRecord>,
}

fn default_true() -> bool {
    true
}

impl InboundDescriptor {
    pub fn new(id: &str, protocol: Protocol, port: u16) -> Self {
        Self {
            id: id.to_string(),
            tag: String::new(),
            remark: String::new(),
            protocol,
            port,
            listen: None,
            enabled: true,
            network: Network::Tcp,
            security: Security::None,
            transport: TransportParams::default(),
            external: Vec::new(),
            ss_method: None,
            ss_password: None,
            clients: Vec::new(),
        }
    }

    /// Locate a client by owner label
    pub fn find_client(&self, owner_label: &str) -> Option<&ClientRecord> {
        self.clients.iter().find(|c| c.owner_label == owner_label)
    }

    pub fn display_name(&self) -> &str {
        if !self.remark.is_empty() {
            &self.remark
        } else if !self.tag.is_empty() {
            &self.tag
        } else {
            &self.id
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// End-user credential attached to an inbound or, on classic panels, to an account
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClientRecord {
    /// UUID for VLESS/VMess, password for Trojan/Shadowsocks
    pub identifier: String,
    pub owner_label: String,
    /// Traffic allowance in bytes, 0 is unlimited
    #[serde(default)]
    pub quota_bytes: u64,
    #[serde(default)]
    pub used_bytes: u64,
    /// Raw panel value; seconds or milliseconds, 0 is never, negative is delayed start
    #[serde(default)]
    pub expiry: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub sub_id: String,
    #[serde(default)]
    pub limit_ip: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    /// Vendor fields carried through delete+recreate untouched
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ClientRecord {
    pub fn new(identifier: &str, owner_label: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            owner_label: owner_label.to_string(),
            quota_bytes: 0,
            used_bytes: 0,
            expiry: 0,
            enabled: true,
            sub_id: String::new(),
            limit_ip: 0,
            flow: None,
            extra: Map::new(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.quota_bytes == 0
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Quota and duration supplied by an order or renewal
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct Plan {
    pub quota_gb: f64,
    pub duration_days: u32,
}

impl Plan {
    pub fn new(quota_gb: f64, duration_days: u32) -> Self {
        Self {
            quota_gb,
            duration_days,
        }
    }

    /// Quota in bytes; negative or non-finite sizes count as 0
    pub fn quota_bytes(&self) -> u64 {
        if !self.quota_gb.is_finite() || self.quota_gb <= 0.0 {
            return 0;
        }
        (self.quota_gb * BYTES_PER_GB).round() as u64
    }
}
