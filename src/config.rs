//! Panels file configuration
//!
//! The panels file is TOML with a `[settings]` table and one `[[panels]]`
//! entry per panel profile. It can be loaded from a local path or a URL.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::helpers::read_source;
use crate::quota::{DEFAULT_MILLIS_THRESHOLD, ExpiryPolicy};

pub mod profile;

pub use profile::{PanelProfile, VendorFamily};

// ============================================================================
// Provision Settings
// ============================================================================

/// Tunables shared by every panel driver
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProvisionSettings {
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,

    /// Raw expiry values above this are milliseconds, otherwise seconds
    #[serde(default = "default_millis_threshold")]
    pub millis_threshold: i64,

    /// Allowed drift when verifying a written expiry
    #[serde(default = "default_tolerance")]
    pub expiry_tolerance_secs: i64,

    /// Prefix of generated owner labels
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,

    /// uTLS fingerprint put into URIs when the inbound names none
    #[serde(default = "default_fingerprint")]
    pub fingerprint: String,

    /// Page size for user listing endpoints
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_timeout(),
            millis_threshold: default_millis_threshold(),
            expiry_tolerance_secs: default_tolerance(),
            label_prefix: default_label_prefix(),
            fingerprint: default_fingerprint(),
            page_size: default_page_size(),
        }
    }
}

impl ProvisionSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy {
            millis_threshold: self.millis_threshold,
            tolerance_secs: self.expiry_tolerance_secs,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        if self.millis_threshold <= 0 {
            bail!("millis_threshold must be greater than zero");
        }
        if self.expiry_tolerance_secs < 0 {
            bail!("expiry_tolerance_secs must not be negative");
        }
        if self.page_size == 0 {
            bail!("page_size must be greater than zero");
        }
        Ok(())
    }
}

fn default_timeout() -> u64 {
    15
}

fn default_millis_threshold() -> i64 {
    DEFAULT_MILLIS_THRESHOLD
}

fn default_tolerance() -> i64 {
    2
}

fn default_label_prefix() -> String {
    "user".to_string()
}

fn default_fingerprint() -> String {
    "chrome".to_string()
}

fn default_page_size() -> u32 {
    100
}

// ============================================================================
// Panels Config
// ============================================================================

/// Contents of a panels file
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PanelsConfig {
    #[serde(default)]
    pub settings: ProvisionSettings,

    #[serde(default)]
    pub panels: Vec<PanelProfile>,
}

impl PanelsConfig {
    /// Parse and validate a panels file from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PanelsConfig =
            toml::from_str(content).context("Failed to parse panels config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;

        let mut seen = HashSet::new();
        for panel in &self.panels {
            if panel.id.trim().is_empty() {
                bail!("Panel id must not be empty");
            }
            if !seen.insert(panel.id.as_str()) {
                bail!("Duplicate panel id: {}", panel.id);
            }

            let base = panel
                .base()
                .with_context(|| format!("Invalid base_url for panel {}", panel.id))?;
            if base.scheme() != "http" && base.scheme() != "https" {
                bail!("base_url of panel {} must be http or https", panel.id);
            }

            if panel.pre_shared_token().is_none() && panel.username.is_empty() {
                bail!(
                    "Panel {} needs either api_token or username/password",
                    panel.id
                );
            }
        }
        Ok(())
    }

    /// Look up a profile by id
    pub fn profile(&self, panel_id: &str) -> Option<&PanelProfile> {
        self.panels.iter().find(|p| p.id == panel_id)
    }

    /// Load panels config from a file path or an http(s) URL
    pub async fn load(source: &str) -> Result<Self> {
        let content = read_source(source)
            .await
            .with_context(|| format!("Failed to load panels config from {}", source))?;
        Self::from_toml(&content)
    }
}
