use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

// ============================================================================
// Vendor Family
// ============================================================================

/// Panel software a profile talks to
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VendorFamily {
    #[serde(rename = "marzban")]
    Marzban,
    #[serde(rename = "marzneshin")]
    Marzneshin,
    /// MHSanaei 3x-ui, API under `/panel/api/inbounds`
    #[serde(rename = "3x-ui", alias = "3xui", alias = "sanaei")]
    ThreeXui,
    /// alireza0 x-ui, API under `/xui/API/inbounds`
    #[serde(rename = "x-ui", alias = "xui")]
    Xui,
    /// Older forks serving `/xui/api/inbounds`
    #[serde(rename = "x-ui-legacy")]
    XuiLegacy,
}

impl VendorFamily {
    pub const ALL: [VendorFamily; 5] = [
        VendorFamily::Marzban,
        VendorFamily::Marzneshin,
        VendorFamily::ThreeXui,
        VendorFamily::Xui,
        VendorFamily::XuiLegacy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VendorFamily::Marzban => "marzban",
            VendorFamily::Marzneshin => "marzneshin",
            VendorFamily::ThreeXui => "3x-ui",
            VendorFamily::Xui => "x-ui",
            VendorFamily::XuiLegacy => "x-ui-legacy",
        }
    }

    /// Cookie-session panels descended from x-ui
    pub fn is_xui_lineage(&self) -> bool {
        matches!(
            self,
            VendorFamily::ThreeXui | VendorFamily::Xui | VendorFamily::XuiLegacy
        )
    }
}

impl fmt::Display for VendorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Panel Profile
// ============================================================================

/// Connection details for one panel, owned by the configuration store
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct PanelProfile {
    /// Identifier used by callers to address this panel
    pub id: String,

    pub family: VendorFamily,

    /// Panel root, including any secret web base path (e.g. "https://host:2053/abc")
    pub base_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Pre-shared API token; when set no login round trip is made
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    /// Public subscription root, also used as the connection host for URIs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_base: Option<String>,

    /// Marzneshin services attached to account-level users
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_ids: Vec<u64>,

    /// Flow set on new VLESS clients of reality/tcp inbounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vless_flow: Option<String>,
}

impl fmt::Debug for PanelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |set: bool| if set { "<redacted>" } else { "<none>" };
        f.debug_struct("PanelProfile")
            .field("id", &self.id)
            .field("family", &self.family)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &redacted(!self.password.is_empty()))
            .field("api_token", &redacted(self.api_token.is_some()))
            .field("subscription_base", &self.subscription_base)
            .field("service_ids", &self.service_ids)
            .field("vless_flow", &self.vless_flow)
            .finish()
    }
}

impl PanelProfile {
    pub fn new(id: &str, family: VendorFamily, base_url: &str) -> Self {
        Self {
            id: id.to_string(),
            family,
            base_url: base_url.to_string(),
            username: String::new(),
            password: String::new(),
            api_token: None,
            subscription_base: None,
            service_ids: Vec::new(),
            vless_flow: None,
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.api_token = Some(token.to_string());
        self
    }

    pub fn with_subscription_base(mut self, base: &str) -> Self {
        self.subscription_base = Some(base.to_string());
        self
    }

    /// Parsed base URL with a guaranteed trailing slash, ready for `Url::join`
    pub fn base(&self) -> Result<Url, url::ParseError> {
        let trimmed = self.base_url.trim();
        if trimmed.ends_with('/') {
            Url::parse(trimmed)
        } else {
            Url::parse(&format!("{}/", trimmed))
        }
    }

    /// Token that skips the login exchange, if one is configured
    pub fn pre_shared_token(&self) -> Option<&str> {
        self.api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Subscription override without a trailing slash
    pub fn subscription_root(&self) -> Option<&str> {
        self.subscription_base
            .as_deref()
            .map(|s| s.trim().trim_end_matches('/'))
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let profile = PanelProfile::new("de-1", VendorFamily::ThreeXui, "https://de.example.com")
            .with_credentials("admin", "hunter2")
            .with_token("tok-abc");
        let shown = format!("{:?}", profile);
        assert!(shown.contains("admin"));
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("tok-abc"));
        assert!(shown.contains("<redacted>"));

        let bare = PanelProfile::new("de-1", VendorFamily::ThreeXui, "https://de.example.com");
        assert!(format!("{:?}", bare).contains("<none>"));
    }

    #[test]
    fn test_family_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            family: VendorFamily,
        }

        for family in VendorFamily::ALL {
            let toml_str = format!("family = \"{}\"", family.as_str());
            let parsed: Wrapper = toml::from_str(&toml_str).unwrap();
            assert_eq!(parsed.family, family);
        }

        let alias: Wrapper = toml::from_str("family = \"sanaei\"").unwrap();
        assert_eq!(alias.family, VendorFamily::ThreeXui);
    }

    #[test]
    fn test_family_lineage() {
        assert!(!VendorFamily::Marzban.is_xui_lineage());
        assert!(!VendorFamily::Marzneshin.is_xui_lineage());
        assert!(VendorFamily::ThreeXui.is_xui_lineage());
        assert!(VendorFamily::Xui.is_xui_lineage());
        assert!(VendorFamily::XuiLegacy.is_xui_lineage());
    }

    #[test]
    fn test_base_adds_trailing_slash() {
        let profile = PanelProfile::new("p", VendorFamily::ThreeXui, "https://panel.example.com/secret");
        let base = profile.base().unwrap();
        assert_eq!(base.as_str(), "https://panel.example.com/secret/");
        assert_eq!(
            base.join("panel/api/inbounds/list").unwrap().as_str(),
            "https://panel.example.com/secret/panel/api/inbounds/list"
        );
    }

    #[test]
    fn test_pre_shared_token_ignores_blank() {
        let profile = PanelProfile::new("p", VendorFamily::Marzban, "https://m.example.com")
            .with_token("   ");
        assert!(profile.pre_shared_token().is_none());

        let profile = profile.with_token("abc");
        assert_eq!(profile.pre_shared_token(), Some("abc"));
    }

    #[test]
    fn test_subscription_root_strips_slash() {
        let profile = PanelProfile::new("p", VendorFamily::ThreeXui, "https://a.example.com")
            .with_subscription_base("https://sub.example.com:2096/sub/");
        assert_eq!(
            profile.subscription_root(),
            Some("https://sub.example.com:2096/sub")
        );
    }
}
