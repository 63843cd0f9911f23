//! VLESS connection strings
//!
//! Format: vless://uuid@host:port?encryption=none&params#label

use crate::error::Result;
use crate::model::Protocol;

use super::params::{query, stream_params};
use super::{UriContext, UriEncoder};

pub struct VLessEncoder;

impl UriEncoder for VLessEncoder {
    fn scheme(&self) -> &str {
        "vless"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Vless
    }

    fn encode(&self, ctx: &UriContext<'_>) -> Result<String> {
        let mut params = vec![("encryption", "none".to_string())];
        params.extend(stream_params(ctx));
        if let Some(flow) = ctx.client.flow.as_deref().filter(|f| !f.is_empty()) {
            params.push(("flow", flow.to_string()));
        }

        Ok(format!(
            "vless://{}@{}:{}?{}#{}",
            ctx.client.identifier,
            ctx.endpoint.authority_host(),
            ctx.endpoint.port,
            query(&params),
            urlencoding::encode(ctx.label)
        ))
    }
}
