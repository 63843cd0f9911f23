//! Panel HTTP plumbing
//!
//! [`PanelClient`] owns the HTTP client and the session of one panel
//! profile. Every authenticated call goes through [`PanelClient::execute`],
//! which logs in lazily and replays a call once after a 401.

use std::fmt;

use parking_lot::Mutex;
use reqwest::header::SET_COOKIE;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use crate::auth::{AuthManager, Session};
use crate::config::{PanelProfile, ProvisionSettings};
use crate::error::{PanelError, Result, truncate_body};
use crate::get_version;

// ============================================================================
// Request Specs
// ============================================================================

/// Body encoding of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Form,
    Empty,
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Json => write!(f, "json"),
            Encoding::Form => write!(f, "form"),
            Encoding::Empty => write!(f, "empty"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    None,
    Json(Value),
    Form(Vec<(String, String)>),
}

/// One request shape: method, path relative to the panel root, body
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub body: Body,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: Body::None,
        }
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Body::Json(body),
        }
    }

    pub fn post_form(path: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Body::Form(fields),
        }
    }

    pub fn post_empty(path: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Body::None,
        }
    }

    pub fn put_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::PUT,
            path: path.into(),
            body: Body::Json(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            body: Body::None,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self.body {
            Body::None => Encoding::Empty,
            Body::Json(_) => Encoding::Json,
            Body::Form(_) => Encoding::Form,
        }
    }
}

impl fmt::Display for RequestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Buffered panel response
#[derive(Debug, Clone)]
pub struct PanelResponse {
    pub status: u16,
    pub body: String,
    pub set_cookies: Vec<String>,
}

impl PanelResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED.as_u16()
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }

    /// False when an X-UI style envelope reports `"success": false`
    pub fn envelope_ok(&self) -> bool {
        match self.json() {
            Some(Value::Object(map)) => !matches!(map.get("success"), Some(Value::Bool(false))),
            _ => true,
        }
    }

    /// `msg` of an X-UI envelope, if any
    pub fn envelope_msg(&self) -> Option<String> {
        self.json()?
            .get("msg")?
            .as_str()
            .filter(|m| !m.is_empty())
            .map(String::from)
    }
}

// ============================================================================
// Panel Client
// ============================================================================

/// HTTP access to one panel, holding its session
pub struct PanelClient {
    http: Client,
    profile: PanelProfile,
    base: Url,
    auth: AuthManager,
    session: Mutex<Option<Session>>,
}

impl PanelClient {
    pub fn new(profile: PanelProfile, settings: &ProvisionSettings) -> Result<Self> {
        let base = profile.base().map_err(|e| {
            PanelError::Config(format!("invalid base_url for panel '{}': {}", profile.id, e))
        })?;

        let http = Client::builder()
            .user_agent(format!("panelkit/{}", get_version()))
            .timeout(settings.timeout())
            .build()
            .map_err(|e| PanelError::Config(format!("failed to build HTTP client: {}", e)))?;

        let auth = AuthManager::for_family(profile.family);

        Ok(Self {
            http,
            profile,
            base,
            auth,
            session: Mutex::new(None),
        })
    }

    pub fn profile(&self) -> &PanelProfile {
        &self.profile
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolves a panel-relative path against the base URL
    pub fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| PanelError::Config(format!("invalid request path '{}': {}", path, e)))
    }

    pub fn has_session(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Drops the current session so the next call logs in again
    pub fn invalidate_session(&self) {
        self.session.lock().take();
    }

    async fn session(&self) -> Result<Session> {
        let cached = self.session.lock().clone();
        if let Some(session) = cached {
            return Ok(session);
        }
        self.login().await
    }

    async fn login(&self) -> Result<Session> {
        let session = self.auth.authenticate(self).await?;
        *self.session.lock() = Some(session.clone());
        Ok(session)
    }

    /// Sends an authenticated request.
    ///
    /// A 401 invalidates the session, triggers exactly one re-login and
    /// replays the call; a second 401 is an [`PanelError::AuthFailure`].
    pub async fn execute(&self, spec: &RequestSpec) -> Result<PanelResponse> {
        let session = self.session().await?;
        let response = self.send(spec, Some(&session)).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        warn!(
            "Panel '{}' answered 401 to {}, re-authenticating",
            self.profile.id, spec
        );
        self.invalidate_session();
        let session = self.login().await?;

        let response = self.send(spec, Some(&session)).await?;
        if response.is_unauthorized() {
            self.invalidate_session();
            return Err(PanelError::AuthFailure {
                panel: self.profile.id.clone(),
                reason: format!("{} still unauthorized after re-login", spec),
            });
        }
        Ok(response)
    }

    /// Like [`execute`](Self::execute) but maps 404 and other failures to errors
    pub async fn execute_ok(&self, spec: &RequestSpec) -> Result<PanelResponse> {
        let response = self.execute(spec).await?;
        if response.status == StatusCode::NOT_FOUND.as_u16() {
            return Err(PanelError::NotFound(spec.to_string()));
        }
        if !response.is_success() || !response.envelope_ok() {
            return Err(PanelError::Rejected {
                endpoint: spec.to_string(),
                status: response.status,
                body: truncate_body(&response.body),
            });
        }
        Ok(response)
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let spec = RequestSpec::get(path);
        let response = self.execute_ok(&spec).await?;
        response
            .json()
            .ok_or_else(|| PanelError::malformed(&spec.to_string(), "response is not JSON"))
    }

    /// Sends a request without credentials, used for login calls
    pub async fn send_unauthenticated(&self, spec: &RequestSpec) -> Result<PanelResponse> {
        self.send(spec, None).await
    }

    async fn send(&self, spec: &RequestSpec, session: Option<&Session>) -> Result<PanelResponse> {
        let url = self.url(&spec.path)?;
        debug!("{} {} ({})", spec.method, url.path(), spec.encoding());

        let mut builder = self.http.request(spec.method.clone(), url);
        if let Some(session) = session {
            builder = session.apply(builder);
        }
        builder = match &spec.body {
            Body::None => builder,
            Body::Json(value) => builder.json(value),
            Body::Form(fields) => builder.form(fields),
        };

        let response = builder.send().await.map_err(|source| PanelError::Transport {
            endpoint: spec.to_string(),
            source,
        })?;

        let status = response.status().as_u16();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(String::from)
            .collect();
        let body = response.text().await.map_err(|source| PanelError::Transport {
            endpoint: spec.to_string(),
            source,
        })?;

        debug!("{} -> {}", spec, status);
        trace!("Response body: {}", truncate_body(&body));

        Ok(PanelResponse {
            status,
            body,
            set_cookies,
        })
    }

    /// Unauthenticated GET of an absolute URL, used for subscription documents
    pub async fn fetch_public(&self, url: &str) -> Result<String> {
        debug!("Fetching subscription document: {}", url);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| PanelError::Transport {
                endpoint: url.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| PanelError::Transport {
            endpoint: url.to_string(),
            source,
        })?;

        match status {
            StatusCode::OK => Ok(body),
            StatusCode::NOT_FOUND => Err(PanelError::NotFound(url.to_string())),
            s if s.is_success() => Ok(body),
            s => Err(PanelError::Rejected {
                endpoint: url.to_string(),
                status: s.as_u16(),
                body: truncate_body(&body),
            }),
        }
    }
}

impl fmt::Debug for PanelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelClient")
            .field("panel", &self.profile.id)
            .field("family", &self.profile.family)
            .field("base", &self.base.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VendorFamily;
    use serde_json::json;

    fn response(status: u16, body: &str) -> PanelResponse {
        PanelResponse {
            status,
            body: body.to_string(),
            set_cookies: Vec::new(),
        }
    }

    #[test]
    fn test_envelope_ok() {
        assert!(response(200, r#"{"success":true,"obj":[]}"#).envelope_ok());
        assert!(!response(200, r#"{"success":false,"msg":"nope"}"#).envelope_ok());
        assert!(response(200, r#"[1,2]"#).envelope_ok());
        assert!(response(200, "not json").envelope_ok());
    }

    #[test]
    fn test_envelope_msg() {
        let r = response(200, r#"{"success":false,"msg":"Duplicate email"}"#);
        assert_eq!(r.envelope_msg().as_deref(), Some("Duplicate email"));
        assert!(response(200, r#"{"success":true,"msg":""}"#).envelope_msg().is_none());
    }

    #[test]
    fn test_status_classes() {
        assert!(response(204, "").is_success());
        assert!(!response(302, "").is_success());
        assert!(response(401, "").is_unauthorized());
    }

    #[test]
    fn test_request_spec_encoding() {
        assert_eq!(RequestSpec::get("/a").encoding(), Encoding::Empty);
        assert_eq!(
            RequestSpec::post_json("/a", json!({})).encoding(),
            Encoding::Json
        );
        assert_eq!(
            RequestSpec::post_form("/a", Vec::new()).encoding(),
            Encoding::Form
        );
        assert_eq!(RequestSpec::delete("/a/b").to_string(), "DELETE /a/b");
    }

    #[test]
    fn test_url_keeps_web_base_path() {
        let profile = PanelProfile::new("p", VendorFamily::ThreeXui, "https://h.example.com:2053/secret");
        let client = PanelClient::new(profile, &ProvisionSettings::default()).unwrap();
        assert_eq!(
            client.url("/panel/api/inbounds/list").unwrap().as_str(),
            "https://h.example.com:2053/secret/panel/api/inbounds/list"
        );
        assert_eq!(
            client.url("api/users?offset=0&limit=10").unwrap().as_str(),
            "https://h.example.com:2053/secret/api/users?offset=0&limit=10"
        );
        assert!(!client.has_session());
    }
}
