//! Query parameters shared by VLESS and Trojan URIs

use crate::model::{Network, Security};

use super::UriContext;

/// Transport then security parameters, in a fixed order
pub fn stream_params(ctx: &UriContext<'_>) -> Vec<(&'static str, String)> {
    let transport = &ctx.inbound.transport;
    let mut params: Vec<(&'static str, String)> = Vec::new();

    params.push(("type", ctx.inbound.network.as_str().to_string()));
    match &ctx.inbound.network {
        Network::Ws | Network::Other(_) => {
            push_opt(&mut params, "path", transport.path.as_deref());
            push_opt(&mut params, "host", transport.host.as_deref());
        }
        Network::Grpc => {
            push_opt(&mut params, "serviceName", transport.service_name.as_deref());
        }
        Network::Tcp => {
            if let Some(header_type) = transport.header_type.as_deref() {
                params.push(("headerType", header_type.to_string()));
                push_opt(&mut params, "path", transport.path.as_deref());
                push_opt(&mut params, "host", transport.host.as_deref());
            }
        }
    }

    let security = ctx.endpoint.security;
    params.push(("security", security.as_str().to_string()));
    let fingerprint = transport
        .fingerprint
        .as_deref()
        .filter(|f| !f.is_empty())
        .unwrap_or(ctx.fingerprint);

    match security {
        Security::Tls => {
            let sni = transport.sni().or(transport.host.as_deref());
            push_opt(&mut params, "sni", sni);
            if !transport.alpn.is_empty() {
                params.push(("alpn", transport.alpn.join(",")));
            }
            push_opt(&mut params, "fp", Some(fingerprint));
        }
        Security::Reality => {
            push_opt(&mut params, "sni", transport.sni());
            push_opt(&mut params, "pbk", transport.public_key.as_deref());
            push_opt(&mut params, "sid", transport.short_id());
            push_opt(&mut params, "fp", Some(fingerprint));
        }
        Security::None => {}
    }

    params
}

fn push_opt(params: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        params.push((key, value.to_string()));
    }
}

/// Joins parameters into a query string, percent-encoding values
pub fn query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClientRecord, InboundDescriptor, Protocol};
    use crate::uri::Endpoint;

    fn render(inbound: &InboundDescriptor, security: Security) -> String {
        let client = ClientRecord::new("id", "alice");
        let endpoint = Endpoint {
            host: "h".to_string(),
            port: 443,
            security,
            remark: String::new(),
        };
        let ctx = UriContext {
            client: &client,
            inbound,
            endpoint: &endpoint,
            label: "alice",
            fingerprint: "chrome",
        };
        query(&stream_params(&ctx))
    }

    #[test]
    fn test_reality_params() {
        let mut inbound = InboundDescriptor::new("1", Protocol::Vless, 443);
        inbound.security = Security::Reality;
        inbound.transport.server_names = vec!["www.microsoft.com".to_string()];
        inbound.transport.public_key = Some("PBK".to_string());
        inbound.transport.short_ids = vec!["6ba8".to_string()];
        assert_eq!(
            render(&inbound, Security::Reality),
            "type=tcp&security=reality&sni=www.microsoft.com&pbk=PBK&sid=6ba8&fp=chrome"
        );
    }

    #[test]
    fn test_grpc_tls_with_alpn() {
        let mut inbound = InboundDescriptor::new("1", Protocol::Trojan, 443);
        inbound.network = Network::Grpc;
        inbound.transport.service_name = Some("svc".to_string());
        inbound.transport.server_names = vec!["t.example.com".to_string()];
        inbound.transport.alpn = vec!["h2".to_string(), "http/1.1".to_string()];
        inbound.transport.fingerprint = Some("firefox".to_string());
        assert_eq!(
            render(&inbound, Security::Tls),
            "type=grpc&serviceName=svc&security=tls&sni=t.example.com&alpn=h2%2Chttp%2F1.1&fp=firefox"
        );
    }

    #[test]
    fn test_tcp_http_obfuscation() {
        let mut inbound = InboundDescriptor::new("1", Protocol::Vless, 80);
        inbound.transport.header_type = Some("http".to_string());
        inbound.transport.path = Some("/index".to_string());
        inbound.transport.host = Some("speedtest.net".to_string());
        assert_eq!(
            render(&inbound, Security::None),
            "type=tcp&headerType=http&path=%2Findex&host=speedtest.net&security=none"
        );
    }
}
