//! Trojan connection strings
//!
//! Format: trojan://password@host:port?params#label

use crate::error::Result;
use crate::model::Protocol;

use super::params::{query, stream_params};
use super::{UriContext, UriEncoder};

pub struct TrojanEncoder;

impl UriEncoder for TrojanEncoder {
    fn scheme(&self) -> &str {
        "trojan"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Trojan
    }

    fn encode(&self, ctx: &UriContext<'_>) -> Result<String> {
        Ok(format!(
            "trojan://{}@{}:{}?{}#{}",
            urlencoding::encode(&ctx.client.identifier),
            ctx.endpoint.authority_host(),
            ctx.endpoint.port,
            query(&stream_params(ctx)),
            urlencoding::encode(ctx.label)
        ))
    }
}
