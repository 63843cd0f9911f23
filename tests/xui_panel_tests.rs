//! End-to-end tests against a stateful fake X-UI panel.
//!
//! The fake keeps one inbound in memory and serves the add/update/delete
//! client endpoints under every API root, so verification-by-refetch runs
//! against real state changes (or deliberately missing ones).

use std::sync::{Arc, Mutex};

use panelkit::config::{PanelProfile, PanelsConfig, ProvisionSettings, VendorFamily};
use panelkit::driver::resolve_driver;
use panelkit::error::{AttemptOutcome, ErrorKind};
use panelkit::model::Plan;
use panelkit::service::{InboundCache, MemoryInboundCache, PanelService};
use serde_json::{Value, json};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const ROOTS: [&str; 3] = ["/panel/api/inbounds", "/xui/API/inbounds", "/xui/api/inbounds"];
const SESSION_COOKIE: &str = "3x-ui=MTcwMDAwMDAwMA";

// ============================================================================
// Fake panel
// ============================================================================

struct State {
    clients: Vec<Value>,
    /// When false the panel answers success but changes nothing
    applies_mutations: bool,
    logins: usize,
    mutations: Vec<String>,
    /// Reads still answered once a client was deleted; `None` is unlimited
    reads_after_delete: Option<usize>,
    deleted: bool,
}

#[derive(Clone)]
struct FakeXui {
    state: Arc<Mutex<State>>,
}

impl FakeXui {
    fn new(applies_mutations: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                clients: Vec::new(),
                applies_mutations,
                logins: 0,
                mutations: Vec::new(),
                reads_after_delete: None,
                deleted: false,
            })),
        }
    }

    fn with_client(self, client: Value) -> Self {
        self.state.lock().unwrap().clients.push(client);
        self
    }

    fn failing_reads_after_delete(self, answered: usize) -> Self {
        self.state.lock().unwrap().reads_after_delete = Some(answered);
        self
    }

    fn clients(&self) -> Vec<Value> {
        self.state.lock().unwrap().clients.clone()
    }

    fn client(&self, email: &str) -> Option<Value> {
        self.clients().into_iter().find(|c| c["email"] == email)
    }

    fn inbound(state: &State) -> Value {
        json!({
            "id": 1,
            "up": 0,
            "down": 0,
            "total": 0,
            "remark": "DE",
            "enable": true,
            "expiryTime": 0,
            "listen": "",
            "port": 8443,
            "protocol": "vless",
            "settings": json!({"clients": state.clients, "decryption": "none"}).to_string(),
            "streamSettings": json!({
                "network": "ws",
                "security": "tls",
                "wsSettings": {"path": "/ws", "headers": {"Host": "cdn.example.com"}},
                "tlsSettings": {"serverName": "de.example.com"}
            }).to_string(),
            "tag": "inbound-8443",
            "clientStats": []
        })
    }

    /// `settings.clients` of an add/update body, JSON or form encoded
    fn submitted_clients(request: &Request) -> Vec<Value> {
        let content_type = request
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let settings = if content_type.starts_with("application/json") {
            serde_json::from_slice::<Value>(&request.body)
                .ok()
                .and_then(|v| v["settings"].as_str().map(String::from))
        } else {
            url::form_urlencoded::parse(&request.body)
                .find(|(k, _)| k == "settings")
                .map(|(_, v)| v.into_owned())
        };

        settings
            .and_then(|s| serde_json::from_str::<Value>(&s).ok())
            .and_then(|v| v["clients"].as_array().cloned())
            .unwrap_or_default()
    }
}

fn ok(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

impl Respond for FakeXui {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();
        let path = request.url.path().to_string();
        let method = request.method.as_str().to_string();

        if path == "/login" {
            let form: Vec<(String, String)> = url::form_urlencoded::parse(&request.body)
                .into_owned()
                .collect();
            let valid = form.contains(&("username".to_string(), "admin".to_string()))
                && form.contains(&("password".to_string(), "secret".to_string()));
            if !valid {
                return ok(json!({"success": false, "msg": "wrong username or password"}));
            }
            state.logins += 1;
            return ok(json!({"success": true, "msg": "Login successfully"}))
                .insert_header("set-cookie", format!("{}; Path=/; HttpOnly", SESSION_COOKIE));
        }

        let cookie = request
            .headers
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !cookie.contains(SESSION_COOKIE) {
            return ResponseTemplate::new(401);
        }

        let Some(rest) = ROOTS.iter().find_map(|root| path.strip_prefix(root)) else {
            return ResponseTemplate::new(404).set_body_string("404 page not found");
        };

        if method == "GET" && state.deleted {
            match state.reads_after_delete {
                Some(0) => return ResponseTemplate::new(500).set_body_string("database is locked"),
                Some(left) => state.reads_after_delete = Some(left - 1),
                None => {}
            }
        }

        match (method.as_str(), rest) {
            ("GET", "/list") => ok(json!({"success": true, "obj": [Self::inbound(&state)]})),
            ("GET", "/get/1") => ok(json!({"success": true, "obj": Self::inbound(&state)})),
            ("POST", "/addClient") => {
                state.mutations.push(format!("{} {}", method, path));
                let submitted = Self::submitted_clients(request);
                if submitted
                    .iter()
                    .any(|s| state.clients.iter().any(|c| c["email"] == s["email"]))
                {
                    return ok(json!({"success": false, "msg": "Duplicate email"}));
                }
                if state.applies_mutations {
                    state.clients.extend(submitted);
                }
                ok(json!({"success": true, "msg": "Client(s) added"}))
            }
            ("POST", rest) if rest.starts_with("/updateClient/") => {
                state.mutations.push(format!("{} {}", method, path));
                let key = rest.trim_start_matches("/updateClient/").to_string();
                let submitted = Self::submitted_clients(request);
                if state.applies_mutations
                    && let Some(new) = submitted.into_iter().next()
                    && let Some(slot) = state.clients.iter_mut().find(|c| c["id"] == key.as_str())
                {
                    *slot = new;
                }
                ok(json!({"success": true, "msg": "Client updated"}))
            }
            ("POST", rest) if rest.starts_with("/1/delClient/") => {
                state.mutations.push(format!("{} {}", method, path));
                let key = rest.trim_start_matches("/1/delClient/").to_string();
                if state.applies_mutations {
                    state.clients.retain(|c| c["id"] != key.as_str());
                    state.deleted = true;
                }
                ok(json!({"success": true, "msg": "Client deleted"}))
            }
            _ => ResponseTemplate::new(404).set_body_string("404 page not found"),
        }
    }
}

async fn start(fake: &FakeXui) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(fake.clone())
        .mount(&server)
        .await;
    server
}

fn profile(server: &MockServer, family: VendorFamily) -> PanelProfile {
    PanelProfile::new("de-1", family, &server.uri()).with_credentials("admin", "secret")
}

fn existing_client(email: &str) -> Value {
    json!({
        "id": "3f1e9c1a-0000-4000-8000-000000000001",
        "email": email,
        "totalGB": 5_368_709_120u64,
        "expiryTime": 4_102_444_800_000i64,
        "enable": true,
        "subId": "abcd1234efgh5678",
        "limitIp": 2,
        "flow": "",
        "tgId": "",
        "reset": 0
    })
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_provision_creates_verified_client_with_uri() {
    let fake = FakeXui::new(true);
    let server = start(&fake).await;
    let config = PanelsConfig {
        settings: ProvisionSettings::default(),
        panels: vec![profile(&server, VendorFamily::ThreeXui)],
    };
    let cache = Arc::new(MemoryInboundCache::default());
    let service = PanelService::new(config, ProvisionSettings::default()).with_cache(cache.clone());

    let inbounds = service.list_inbounds("de-1").await.unwrap();
    assert_eq!(inbounds.len(), 1);
    assert_eq!(cache.list_known_inbounds("de-1")[0].tag, "inbound-8443");

    let provisioned = service
        .provision("de-1", "1", &Plan::new(20.0, 30))
        .await
        .unwrap();

    let label = provisioned.owner_label.clone();
    assert!(label.starts_with("user_"));
    let stored = fake.client(&label).expect("client stored on the panel");
    assert_eq!(stored["totalGB"], 21_474_836_480u64);
    assert_eq!(stored["id"], provisioned.record.identifier.as_str());

    assert_eq!(provisioned.access.uris.len(), 1);
    let expected = format!(
        "vless://{}@127.0.0.1:8443?encryption=none&type=ws&path=%2Fws&host=cdn.example.com&security=tls&sni=de.example.com&fp=chrome#DE-{}",
        provisioned.record.identifier, label
    );
    assert_eq!(provisioned.access.uris[0].as_str(), expected);

    let sub = provisioned.access.subscription_url.as_deref().unwrap();
    assert!(sub.ends_with(&format!("/sub/{}", provisioned.record.sub_id)));

    // One login serves every call
    assert_eq!(fake.state.lock().unwrap().logins, 1);
}

#[tokio::test]
async fn test_lying_panel_exhausts_all_six_candidates() {
    let fake = FakeXui::new(false);
    let server = start(&fake).await;
    let driver = resolve_driver(
        &profile(&server, VendorFamily::ThreeXui),
        &ProvisionSettings::default(),
    )
    .unwrap();

    let err = driver
        .create_client("1", &Plan::new(10.0, 30))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProbeExhausted);
    let attempts = err.attempts();
    assert_eq!(attempts.len(), 6);
    for attempt in attempts {
        assert_eq!(attempt.status, 200);
        assert_eq!(attempt.outcome, AttemptOutcome::Unverified);
        assert!(attempt.path.ends_with("/addClient"));
        assert!(attempt.body.contains("Client(s) added"));
    }
    assert_eq!(attempts[0].path, "/panel/api/inbounds/addClient");
    assert_eq!(attempts[5].path, "/xui/api/inbounds/addClient");
    assert!(fake.clients().is_empty());
}

#[tokio::test]
async fn test_renew_in_place_adds_quota_and_time() {
    let fake = FakeXui::new(true).with_client(existing_client("alice"));
    let server = start(&fake).await;
    let driver = resolve_driver(
        &profile(&server, VendorFamily::Xui),
        &ProvisionSettings::default(),
    )
    .unwrap();

    let renewed = driver
        .renew_client("1", "alice", &Plan::new(10.0, 30))
        .await
        .unwrap();

    assert_eq!(renewed.quota_bytes, 16_106_127_360);
    assert_eq!(renewed.expiry, 4_102_444_800_000 + 30 * 86_400_000);
    assert_eq!(renewed.owner_label, "alice");

    let stored = fake.client("alice").unwrap();
    assert_eq!(stored["totalGB"], 16_106_127_360u64);
    assert_eq!(stored["expiryTime"], 4_102_444_800_000i64 + 30 * 86_400_000);
    assert_eq!(stored["limitIp"], 2);
    assert_eq!(stored["tgId"], "");

    let mutations = fake.state.lock().unwrap().mutations.clone();
    assert_eq!(mutations.len(), 1);
    assert!(mutations[0].starts_with("POST /xui/API/inbounds/updateClient/3f1e9c1a"));
}

#[tokio::test]
async fn test_renew_unknown_label_is_not_found() {
    let fake = FakeXui::new(true).with_client(existing_client("alice"));
    let server = start(&fake).await;
    let driver = resolve_driver(
        &profile(&server, VendorFamily::ThreeXui),
        &ProvisionSettings::default(),
    )
    .unwrap();

    let err = driver
        .renew_client("1", "bob", &Plan::new(10.0, 30))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(fake.state.lock().unwrap().mutations.is_empty());
}

#[tokio::test]
async fn test_legacy_rotate_recreates_under_new_label() {
    let fake = FakeXui::new(true).with_client(existing_client("shop_42_ab12cd"));
    let server = start(&fake).await;
    let driver = resolve_driver(
        &profile(&server, VendorFamily::XuiLegacy),
        &ProvisionSettings::default(),
    )
    .unwrap();

    let rotated = driver
        .rotate_client_key("1", "shop_42_ab12cd")
        .await
        .unwrap();

    assert_ne!(rotated.owner_label, "shop_42_ab12cd");
    assert!(rotated.owner_label.starts_with("shop_42_"));
    assert_ne!(rotated.identifier, "3f1e9c1a-0000-4000-8000-000000000001");

    assert!(fake.client("shop_42_ab12cd").is_none());
    let stored = fake.client(&rotated.owner_label).unwrap();
    assert_eq!(stored["id"], rotated.identifier.as_str());
    assert_eq!(stored["totalGB"], 5_368_709_120u64);
    assert_eq!(stored["expiryTime"], 4_102_444_800_000i64);
    assert_eq!(stored["limitIp"], 2);

    let mutations = fake.state.lock().unwrap().mutations.clone();
    assert!(mutations.iter().all(|m| !m.contains("updateClient")));
    assert!(mutations[0].ends_with("/xui/api/inbounds/addClient"));
    assert!(mutations[1].contains("/xui/api/inbounds/1/delClient/"));
}

#[tokio::test]
async fn test_legacy_rotate_reports_new_label_when_refetch_fails() {
    let fake = FakeXui::new(true)
        .with_client(existing_client("shop_42_ab12cd"))
        .failing_reads_after_delete(1);
    let server = start(&fake).await;
    let config = PanelsConfig {
        settings: ProvisionSettings::default(),
        panels: vec![profile(&server, VendorFamily::XuiLegacy)],
    };
    let service = PanelService::new(config, ProvisionSettings::default());

    let err = service
        .rotate_key("de-1", "1", "shop_42_ab12cd")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Committed);
    let record = err.committed_record().expect("committed record");
    assert_ne!(record.owner_label, "shop_42_ab12cd");
    assert!(record.owner_label.starts_with("shop_42_"));
    assert!(err.to_string().contains(&record.owner_label));

    // The panel holds only the recreated client
    assert!(fake.client("shop_42_ab12cd").is_none());
    let stored = fake.client(&record.owner_label).unwrap();
    assert_eq!(stored["id"], record.identifier.as_str());
}

#[tokio::test]
async fn test_legacy_renew_recreates_under_same_label() {
    let fake = FakeXui::new(true).with_client(existing_client("alice"));
    let server = start(&fake).await;
    let driver = resolve_driver(
        &profile(&server, VendorFamily::XuiLegacy),
        &ProvisionSettings::default(),
    )
    .unwrap();

    let renewed = driver
        .renew_client("1", "alice", &Plan::new(10.0, 0))
        .await
        .unwrap();

    assert_eq!(renewed.owner_label, "alice");
    assert_eq!(renewed.identifier, "3f1e9c1a-0000-4000-8000-000000000001");
    let stored = fake.client("alice").unwrap();
    assert_eq!(stored["totalGB"], 16_106_127_360u64);
    assert_eq!(stored["expiryTime"], 4_102_444_800_000i64);
    assert_eq!(fake.clients().len(), 1);
}

#[tokio::test]
async fn test_in_place_rotate_keeps_label() {
    let fake = FakeXui::new(true).with_client(existing_client("alice"));
    let server = start(&fake).await;
    let config = PanelsConfig {
        settings: ProvisionSettings::default(),
        panels: vec![profile(&server, VendorFamily::ThreeXui)],
    };
    let service = PanelService::new(config, ProvisionSettings::default());

    let rotated = service.rotate_key("de-1", "1", "alice").await.unwrap();
    assert!(rotated.new_owner_label.is_none());
    assert_ne!(rotated.record.identifier, "3f1e9c1a-0000-4000-8000-000000000001");
    assert_eq!(
        fake.client("alice").unwrap()["id"],
        rotated.record.identifier.as_str()
    );
    assert!(rotated.access.uris[0]
        .as_str()
        .starts_with(&format!("vless://{}@", rotated.record.identifier)));
}

#[tokio::test]
async fn test_status_scans_inbounds() {
    let fake = FakeXui::new(true).with_client(existing_client("alice"));
    let server = start(&fake).await;
    let driver = resolve_driver(
        &profile(&server, VendorFamily::ThreeXui),
        &ProvisionSettings::default(),
    )
    .unwrap();

    let status = driver.status("alice").await.unwrap();
    assert_eq!(status.quota_bytes, 5_368_709_120);
    assert_eq!(status.expiry, 4_102_444_800_000);
    assert!(status.subscription_url.unwrap().ends_with("/sub/abcd1234efgh5678"));

    let err = driver.status("nobody").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_wrong_password_is_auth_failure() {
    let fake = FakeXui::new(true);
    let server = start(&fake).await;
    let profile = PanelProfile::new("de-1", VendorFamily::ThreeXui, &server.uri())
        .with_credentials("admin", "wrong");
    let driver = resolve_driver(&profile, &ProvisionSettings::default()).unwrap();

    let err = driver.list_inbounds().await.unwrap_err();
    assert!(err.is_auth_failure());
    let message = err.to_string();
    assert!(message.contains("form login: wrong username or password"));
    assert!(message.contains("json login"));
}
