//! Connection URI codec
//!
//! Builds `vless://`, `vmess://`, `trojan://` and `ss://` connection strings
//! from a client and its inbound, and decodes subscription documents back
//! into the same strings. Output is deterministic for a given input.

mod params;
mod shadowsocks;
mod trojan;
mod vless;
mod vmess;

pub mod base64;
pub mod subscription;

pub use shadowsocks::ShadowsocksEncoder;
pub use subscription::{decode_subscription, is_known_uri};
pub use trojan::TrojanEncoder;
pub use vless::VLessEncoder;
pub use vmess::VMessEncoder;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::config::{PanelProfile, VendorFamily};
use crate::error::{PanelError, Result};
use crate::model::{ClientRecord, InboundDescriptor, Protocol, Security};

/// Scheme prefixes accepted from subscription documents
pub const KNOWN_SCHEMES: [&str; 5] = ["vless://", "vmess://", "trojan://", "ss://", "hy2://"];

// ============================================================================
// Connection URI
// ============================================================================

#[derive(Serialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConnectionUri(String);

impl ConnectionUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scheme(&self) -> &str {
        self.0.split("://").next().unwrap_or_default()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ConnectionUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Encoder Trait
// ============================================================================

/// Address a URI points at
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub security: Security,
    pub remark: String,
}

impl Endpoint {
    /// Host formatted for the authority part, bracketing IPv6 literals
    pub fn authority_host(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

/// Everything an encoder needs for one URI
pub struct UriContext<'a> {
    pub client: &'a ClientRecord,
    pub inbound: &'a InboundDescriptor,
    pub endpoint: &'a Endpoint,
    /// Unescaped fragment label
    pub label: &'a str,
    /// uTLS fingerprint used when the inbound names none
    pub fingerprint: &'a str,
}

/// Encodes one protocol's connection string
pub trait UriEncoder: Send + Sync {
    /// Scheme without `://`
    fn scheme(&self) -> &str;

    fn protocol(&self) -> Protocol;

    fn encode(&self, ctx: &UriContext<'_>) -> Result<String>;
}

// ============================================================================
// Encoder Registry
// ============================================================================

#[derive(Default, Clone)]
pub struct EncoderRegistry {
    encoders: HashMap<String, Arc<dyn UriEncoder>>,
}

impl EncoderRegistry {
    pub fn new() -> Self {
        Self {
            encoders: HashMap::new(),
        }
    }

    pub fn with_builtin_encoders() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(VLessEncoder));
        registry.register(Arc::new(VMessEncoder));
        registry.register(Arc::new(TrojanEncoder));
        registry.register(Arc::new(ShadowsocksEncoder));
        registry
    }

    pub fn register(&mut self, encoder: Arc<dyn UriEncoder>) {
        self.encoders
            .insert(encoder.protocol().as_str().to_string(), encoder);
    }

    pub fn get(&self, protocol: &Protocol) -> Option<&Arc<dyn UriEncoder>> {
        self.encoders.get(protocol.as_str())
    }
}

// ============================================================================
// URI Builder
// ============================================================================

/// Builds connection URIs for clients of one panel
#[derive(Clone)]
pub struct UriBuilder {
    family: VendorFamily,
    host: Option<String>,
    fingerprint: String,
    registry: EncoderRegistry,
}

impl UriBuilder {
    pub fn new(profile: &PanelProfile, fingerprint: &str) -> Self {
        Self {
            family: profile.family,
            host: connection_host(profile),
            fingerprint: fingerprint.to_string(),
            registry: EncoderRegistry::with_builtin_encoders(),
        }
    }

    /// Whether URIs can be built for this inbound's protocol
    pub fn supports(&self, inbound: &InboundDescriptor) -> bool {
        self.registry.get(&inbound.protocol).is_some()
    }

    /// One URI per external proxy of the inbound, or one for the inbound itself
    pub fn build(
        &self,
        client: &ClientRecord,
        inbound: &InboundDescriptor,
    ) -> Result<Vec<ConnectionUri>> {
        let encoder = self
            .registry
            .get(&inbound.protocol)
            .ok_or_else(|| PanelError::unsupported("connection URIs for this protocol", self.family))?;

        let endpoints = self.endpoints(inbound)?;
        let mut uris = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            let label = label(&endpoint.remark, &client.owner_label);
            let ctx = UriContext {
                client,
                inbound,
                endpoint,
                label: &label,
                fingerprint: &self.fingerprint,
            };
            uris.push(ConnectionUri::new(encoder.encode(&ctx)?));
        }

        debug!(
            "Built {} {} URI(s) for '{}' on inbound {}",
            uris.len(),
            encoder.scheme(),
            client.owner_label,
            inbound.id
        );
        Ok(uris)
    }

    fn endpoints(&self, inbound: &InboundDescriptor) -> Result<Vec<Endpoint>> {
        if !inbound.external.is_empty() {
            return Ok(inbound
                .external
                .iter()
                .map(|e| Endpoint {
                    host: e.host.clone(),
                    port: e.port,
                    security: e.force_tls.unwrap_or(inbound.security),
                    remark: if e.remark.is_empty() {
                        inbound.remark.clone()
                    } else {
                        e.remark.clone()
                    },
                })
                .collect());
        }

        let host = self
            .host
            .clone()
            .or_else(|| inbound.transport.host.clone())
            .or_else(|| inbound.transport.sni().map(String::from))
            .ok_or_else(|| {
                PanelError::malformed(&inbound.id, "no host available for connection URIs")
            })?;

        Ok(vec![Endpoint {
            host,
            port: inbound.port,
            security: inbound.security,
            remark: inbound.remark.clone(),
        }])
    }
}

/// Host clients connect to: subscription override, else the panel's host
pub fn connection_host(profile: &PanelProfile) -> Option<String> {
    profile
        .subscription_root()
        .and_then(|root| Url::parse(root).ok())
        .and_then(|url| url.host_str().map(String::from))
        .or_else(|| {
            profile
                .base()
                .ok()
                .and_then(|url| url.host_str().map(String::from))
        })
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
}

/// Fragment label, `{remark}-{owner}` or just the owner
pub fn label(remark: &str, owner_label: &str) -> String {
    if remark.is_empty() {
        owner_label.to_string()
    } else {
        format!("{}-{}", remark, owner_label)
    }
}
