//! Session acquisition
//!
//! A session is acquired in a fixed order: a pre-shared token is used as is,
//! otherwise the panel's login endpoint is tried with a form body and then
//! with a JSON body. Sessions are not refreshed in the background; the
//! client drops a session on the first 401 and logs in again.

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use reqwest::header::COOKIE;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::VendorFamily;
use crate::error::{PanelError, Result};
use crate::http::{PanelClient, PanelResponse, RequestSpec};

// ============================================================================
// Session
// ============================================================================

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    Cookie(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer(_) => write!(f, "Bearer(<redacted>)"),
            Credential::Cookie(_) => write!(f, "Cookie(<redacted>)"),
        }
    }
}

/// Ephemeral credentials of one panel, never persisted
#[derive(Debug, Clone)]
pub struct Session {
    pub credential: Credential,
    pub acquired_at: DateTime<Utc>,
}

impl Session {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            acquired_at: Utc::now(),
        }
    }

    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Credential::Bearer(token) => builder.bearer_auth(token),
            Credential::Cookie(cookie) => builder.header(COOKIE, cookie),
        }
    }
}

// ============================================================================
// Auth Manager
// ============================================================================

/// Where a successful login puts the credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    /// OAuth2 password flow, `{"access_token": ...}` in the body
    AccessToken,
    /// Session cookie in `Set-Cookie`
    Cookie,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthManager {
    login_path: &'static str,
    source: TokenSource,
}

impl AuthManager {
    pub fn for_family(family: VendorFamily) -> Self {
        match family {
            VendorFamily::Marzban => Self {
                login_path: "/api/admin/token",
                source: TokenSource::AccessToken,
            },
            VendorFamily::Marzneshin => Self {
                login_path: "/api/admins/token",
                source: TokenSource::AccessToken,
            },
            VendorFamily::ThreeXui | VendorFamily::Xui | VendorFamily::XuiLegacy => Self {
                login_path: "/login",
                source: TokenSource::Cookie,
            },
        }
    }

    pub fn login_path(&self) -> &'static str {
        self.login_path
    }

    /// Acquires a session for the client's profile.
    ///
    /// Transport errors propagate as is; refused logins become
    /// [`PanelError::AuthFailure`] carrying the reason of each attempt.
    pub async fn authenticate(&self, client: &PanelClient) -> Result<Session> {
        let profile = client.profile();

        if let Some(token) = profile.pre_shared_token() {
            debug!("Using pre-shared token for panel '{}'", profile.id);
            return Ok(Session::new(Credential::Bearer(token.to_string())));
        }

        let form = RequestSpec::post_form(
            self.login_path,
            vec![
                ("username".to_string(), profile.username.clone()),
                ("password".to_string(), profile.password.clone()),
            ],
        );
        let json = RequestSpec::post_json(
            self.login_path,
            json!({
                "username": profile.username,
                "password": profile.password,
            }),
        );

        let mut reasons = Vec::new();
        for spec in [form, json] {
            let response = client.send_unauthenticated(&spec).await?;
            match self.session_from(&response) {
                Ok(session) => {
                    info!(
                        "Logged in to panel '{}' ({} login)",
                        profile.id,
                        spec.encoding()
                    );
                    return Ok(session);
                }
                Err(reason) => {
                    warn!(
                        "{} login to panel '{}' refused: {}",
                        spec.encoding(),
                        profile.id,
                        reason
                    );
                    reasons.push(format!("{} login: {}", spec.encoding(), reason));
                }
            }
        }

        Err(PanelError::AuthFailure {
            panel: profile.id.clone(),
            reason: reasons.join("; "),
        })
    }

    fn session_from(&self, response: &PanelResponse) -> std::result::Result<Session, String> {
        if !response.is_success() {
            return Err(format!("status {}", response.status));
        }

        match self.source {
            TokenSource::AccessToken => response
                .json()
                .and_then(|v| v.get("access_token")?.as_str().map(String::from))
                .filter(|t| !t.is_empty())
                .map(|t| Session::new(Credential::Bearer(t)))
                .ok_or_else(|| "no access_token in response".to_string()),
            TokenSource::Cookie => {
                if !response.envelope_ok() {
                    return Err(response
                        .envelope_msg()
                        .unwrap_or_else(|| "panel reported failure".to_string()));
                }
                cookie_header(&response.set_cookies)
                    .map(|c| Session::new(Credential::Cookie(c)))
                    .ok_or_else(|| "no session cookie in response".to_string())
            }
        }
    }
}

/// Builds a `Cookie` header value from `Set-Cookie` lines
pub fn cookie_header(set_cookies: &[String]) -> Option<String> {
    let pairs: Vec<&str> = set_cookies
        .iter()
        .filter_map(|line| line.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('=') && !pair.ends_with('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}
