//! VMess connection strings
//!
//! VMess links are Base64 encoded JSON:
//! vmess://BASE64({"v": "2", "ps": "label", "add": "host", "port": "443", ...})

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

use crate::error::{PanelError, Result};
use crate::model::{Network, Protocol, Security};

use super::{UriContext, UriEncoder};

pub struct VMessEncoder;

/// Fixed-shape envelope; field order is the serialization order
#[derive(Serialize, Debug)]
struct VMessJson<'a> {
    v: &'a str,
    ps: &'a str,
    add: &'a str,
    port: String,
    id: &'a str,
    aid: &'a str,
    net: &'a str,
    #[serde(rename = "type")]
    header_type: &'a str,
    host: &'a str,
    path: &'a str,
    tls: &'a str,
    sni: &'a str,
}

impl UriEncoder for VMessEncoder {
    fn scheme(&self) -> &str {
        "vmess"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Vmess
    }

    fn encode(&self, ctx: &UriContext<'_>) -> Result<String> {
        let transport = &ctx.inbound.transport;
        let add = ctx.endpoint.host.clone();

        let path = match ctx.inbound.network {
            Network::Grpc => transport.service_name.as_deref(),
            _ => transport.path.as_deref(),
        };
        let (tls, sni) = match ctx.endpoint.security {
            Security::Tls => ("tls", transport.sni().or(transport.host.as_deref())),
            _ => ("", None),
        };

        let envelope = VMessJson {
            v: "2",
            ps: ctx.label,
            add: &add,
            port: ctx.endpoint.port.to_string(),
            id: &ctx.client.identifier,
            aid: "0",
            net: ctx.inbound.network.as_str(),
            header_type: transport.header_type.as_deref().unwrap_or("none"),
            host: transport.host.as_deref().unwrap_or_default(),
            path: path.unwrap_or_default(),
            tls,
            sni: sni.unwrap_or_default(),
        };

        let json = serde_json::to_string(&envelope)
            .map_err(|e| PanelError::malformed(&ctx.inbound.id, e.to_string()))?;
        Ok(format!("vmess://{}", STANDARD.encode(json)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClientRecord, InboundDescriptor};
    use crate::uri::Endpoint;
    use serde_json::Value;

    fn decode(uri: &str) -> Value {
        let payload = uri.strip_prefix("vmess://").unwrap();
        let bytes = STANDARD.decode(payload).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_vmess_ws_tls_envelope() {
        let client = ClientRecord::new("b831381d-6324-4d53-ad4f-8cda48b30811", "alice");
        let mut inbound = InboundDescriptor::new("3", Protocol::Vmess, 443);
        inbound.network = Network::Ws;
        inbound.security = Security::Tls;
        inbound.transport.path = Some("/vm".to_string());
        inbound.transport.host = Some("cdn.example.com".to_string());
        inbound.transport.server_names = vec!["v.example.com".to_string()];
        let endpoint = Endpoint {
            host: "v.example.com".to_string(),
            port: 443,
            security: Security::Tls,
            remark: "FR".to_string(),
        };
        let ctx = UriContext {
            client: &client,
            inbound: &inbound,
            endpoint: &endpoint,
            label: "FR-alice",
            fingerprint: "chrome",
        };
        let uri = VMessEncoder.encode(&ctx).unwrap();
        let json = decode(&uri);
        assert_eq!(json["v"], "2");
        assert_eq!(json["ps"], "FR-alice");
        assert_eq!(json["add"], "v.example.com");
        assert_eq!(json["port"], "443");
        assert_eq!(json["id"], "b831381d-6324-4d53-ad4f-8cda48b30811");
        assert_eq!(json["aid"], "0");
        assert_eq!(json["net"], "ws");
        assert_eq!(json["type"], "none");
        assert_eq!(json["host"], "cdn.example.com");
        assert_eq!(json["path"], "/vm");
        assert_eq!(json["tls"], "tls");
        assert_eq!(json["sni"], "v.example.com");
        assert_eq!(json.as_object().unwrap().len(), 12);
    }

    #[test]
    fn test_vmess_grpc_path_is_service_name() {
        let client = ClientRecord::new("id", "bob");
        let mut inbound = InboundDescriptor::new("4", Protocol::Vmess, 8443);
        inbound.network = Network::Grpc;
        inbound.transport.service_name = Some("grpc-svc".to_string());
        let endpoint = Endpoint {
            host: "g.example.com".to_string(),
            port: 8443,
            security: Security::None,
            remark: String::new(),
        };
        let ctx = UriContext {
            client: &client,
            inbound: &inbound,
            endpoint: &endpoint,
            label: "bob",
            fingerprint: "chrome",
        };
        let json = decode(&VMessEncoder.encode(&ctx).unwrap());
        assert_eq!(json["path"], "grpc-svc");
        assert_eq!(json["tls"], "");
        assert_eq!(json["sni"], "");
    }
}
