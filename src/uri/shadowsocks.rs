//! Shadowsocks connection strings (SIP002)
//!
//! Format: ss://base64url(method:password)@host:port#label
//! 2022 ciphers carry `method:server_key:client_key`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{PanelError, Result};
use crate::model::Protocol;

use super::{UriContext, UriEncoder};

pub struct ShadowsocksEncoder;

impl UriEncoder for ShadowsocksEncoder {
    fn scheme(&self) -> &str {
        "ss"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Shadowsocks
    }

    fn encode(&self, ctx: &UriContext<'_>) -> Result<String> {
        let inbound = ctx.inbound;
        let method = inbound
            .ss_method
            .as_deref()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| PanelError::malformed(&inbound.id, "shadowsocks inbound has no method"))?;

        let userinfo = match inbound.ss_password.as_deref() {
            Some(server_key) if method.starts_with("2022-") && !server_key.is_empty() => {
                format!("{}:{}:{}", method, server_key, ctx.client.identifier)
            }
            _ => format!("{}:{}", method, ctx.client.identifier),
        };

        Ok(format!(
            "ss://{}@{}:{}#{}",
            URL_SAFE_NO_PAD.encode(userinfo),
            ctx.endpoint.authority_host(),
            ctx.endpoint.port,
            urlencoding::encode(ctx.label)
        ))
    }
}
