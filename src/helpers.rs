//! CLI-side utilities
//!
//! Reading panels files and subscription documents from disk or over HTTP,
//! and the interactive inbound picker.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::get_version;
use crate::model::InboundDescriptor;

/// Timeout for fetching panels files and subscription documents
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Sources
// ============================================================================

pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Replaces a leading `~` with the user's home directory
pub fn expand_tilde(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    let home = if cfg!(windows) {
        std::env::var("USERPROFILE")
    } else {
        std::env::var("HOME")
    };
    match home {
        Ok(home) => format!("{}{}", home, rest),
        Err(_) => path.to_string(),
    }
}

/// Reads a file path or an http(s) URL into a string
pub async fn read_source(source: &str) -> Result<String> {
    if is_remote(source) {
        return fetch_text(source).await;
    }
    let path = expand_tilde(source);
    debug!("Reading {}", path);
    tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path))
}

pub async fn fetch_text(url: &str) -> Result<String> {
    debug!("Fetching {}", url);

    let client = reqwest::Client::builder()
        .user_agent(format!("panelkit/{}", get_version()))
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("{} responded with status {}", url, status);
    }

    response
        .text()
        .await
        .with_context(|| format!("Failed to read body of {}", url))
}

// ============================================================================
// Inbound Picker
// ============================================================================

/// Asks the operator to pick an inbound; `None` when there is nothing to
/// pick or the prompt was aborted
pub fn prompt_inbound(inbounds: &[InboundDescriptor]) -> Option<String> {
    use dialoguer::{Select, theme::ColorfulTheme};

    if inbounds.is_empty() {
        return None;
    }

    let items: Vec<String> = inbounds
        .iter()
        .map(|i| {
            format!(
                "{} | {} {}/{} :{} ({} clients)",
                i.id,
                i.display_name(),
                i.protocol,
                i.network,
                i.port,
                i.clients.len()
            )
        })
        .collect();

    let picked = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Inbound for the new client")
        .items(&items)
        .default(0)
        .interact();

    match picked {
        Ok(index) => {
            let id = inbounds[index].id.clone();
            info!("Picked inbound {}", id);
            Some(id)
        }
        Err(e) => {
            warn!("Inbound prompt aborted: {}", e);
            None
        }
    }
}
