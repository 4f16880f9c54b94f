#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use tempfile::TempDir;

use wvrelay::auth::TokenService;
use wvrelay::config::{ClientProfile, DeviceProfile, Endpoints, Profile};
use wvrelay::device::DeviceSessionManager;
use wvrelay::error::{Error, Result};
use wvrelay::proxy::LicenseProxy;
use wvrelay::session::AccessSession;
use wvrelay::signing::SigningAgent;
use wvrelay::store::FileCredentialStore;
use wvrelay::upstream::UpstreamClient;

pub const NEW_LICENSE: &[u8] = b"new-license";
pub const RENEWED_LICENSE: &[u8] = b"renewed-license";
pub const MANIFEST_USER_AGENT: &str = "ManifestAgent/1.0";

pub fn jwt(claims: Value) -> String {
    format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

pub fn future_exp() -> i64 {
    Utc::now().timestamp() + 3600
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// In-process stand-in for the identity provider, entitlement API, DRM
/// license server and manifest host.
#[derive(Default)]
pub struct Upstream {
    base: OnceLock<String>,
    pub fail_token: AtomicBool,
    pub fail_teardown: AtomicBool,
    pub token_calls: AtomicUsize,
    pub sign_in_calls: AtomicUsize,
    pub asset_calls: AtomicUsize,
    pub setup_calls: AtomicUsize,
    pub new_license_calls: AtomicUsize,
    pub renewal_calls: AtomicUsize,
    pub manifest_calls: AtomicUsize,
    pub token_requests: Mutex<Vec<(String, String)>>,
    pub sign_in_requests: Mutex<Vec<(HeaderMap, Value)>>,
    pub asset_requests: Mutex<Vec<(HeaderMap, String)>>,
    pub manifest_agents: Mutex<Vec<String>>,
    pub new_license_auth: Mutex<Vec<String>>,
    pub renewal_auth: Mutex<Vec<String>>,
    pub teardowns: Mutex<Vec<String>>,
    pub events: Mutex<Vec<String>>,
}

impl Upstream {
    pub fn base(&self) -> &str {
        self.base.get().map(String::as_str).unwrap_or_default()
    }

    pub fn teardowns(&self) -> Vec<String> {
        self.teardowns.lock().expect("lock").clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("lock").clone()
    }

    fn event(&self, event: String) {
        self.events.lock().expect("lock").push(event);
    }
}

pub async fn spawn_upstream() -> Arc<Upstream> {
    let upstream = Arc::new(Upstream::default());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    upstream
        .base
        .set(format!("http://{}", addr))
        .expect("base set once");

    let app = Router::new()
        .route("/token", post(token))
        .route("/signin", post(sign_in))
        .route("/assets/:asset/path", get(asset))
        .route("/drm/setup", post(setup))
        .route("/drm/new", post(new_license))
        .route("/drm/renewal", post(renewal))
        .route("/drm/teardown", post(teardown))
        .route("/manifests/:name", get(manifest))
        .with_state(Arc::clone(&upstream));
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("upstream serve");
    });
    upstream
}

async fn token(State(up): State<Arc<Upstream>>, headers: HeaderMap, body: String) -> Response {
    let n = up.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
    up.token_requests
        .lock()
        .expect("lock")
        .push((header(&headers, "authorization"), body));
    if up.fail_token.load(Ordering::SeqCst) {
        return (StatusCode::BAD_GATEWAY, "identity provider down").into_response();
    }
    Json(json!({
        "access_token": format!("access-{}", n),
        "token_type": "Bearer",
        "scope": "openid profile customer_info offline_access",
        "expires_in": 3600,
        "issued_at": Utc::now().timestamp_millis(),
        "status": "approved",
        "id_token": jwt(json!({ "sub": "user", "user_sa": "sa", "user_ca": "ca", "exp": future_exp() })),
        "refresh_token_expires_in": 0
    }))
    .into_response()
}

async fn sign_in(State(up): State<Arc<Upstream>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    up.sign_in_calls.fetch_add(1, Ordering::SeqCst);
    up.sign_in_requests.lock().expect("lock").push((headers, body));
    Json(json!({
        "DeviceId": "dev-1",
        "Model": "web",
        "DasEncriptedKey": "enc-key",
        "SignKeyId": "kid-1",
        "SignAlgo": "ES256",
        "EncryptedSignKey": "esk-1"
    }))
    .into_response()
}

async fn asset(
    State(up): State<Arc<Upstream>>,
    Path(asset): Path<String>,
    headers: HeaderMap,
    uri: axum::http::Uri,
) -> Response {
    up.asset_calls.fetch_add(1, Ordering::SeqCst);
    up.event(format!("asset:{}", asset));
    up.asset_requests
        .lock()
        .expect("lock")
        .push((headers, uri.query().unwrap_or_default().to_string()));
    if asset == "missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "Error": { "Code": "404", "Title": "NotFound", "Message": "unknown asset" } })),
        )
            .into_response();
    }
    // "opaque-*" assets carry a content-license token without decodable claims.
    let clm = if asset.starts_with("opaque-") {
        OPAQUE_CLM_TOKEN.to_string()
    } else {
        clm_token(&asset)
    };
    Json(json!({
        "Path": format!("{}/manifests/{}.mpd", up.base(), asset),
        "Offset": 0,
        "SessionId": format!("sess-{}", asset),
        "ClmToken": clm,
        "Metadata": { "AssetId": asset, "Service": "EPGC" }
    }))
    .into_response()
}

pub const OPAQUE_CLM_TOKEN: &str = "opaque-content-license";

pub fn clm_token(asset: &str) -> String {
    jwt(json!({
        "typ": "ContentAuthZ",
        "jti": format!("clm-{}", asset),
        "device": { "accountId": "acc" },
        "exp": future_exp()
    }))
}

async fn setup(State(up): State<Arc<Upstream>>, headers: HeaderMap) -> Response {
    let n = up.setup_calls.fetch_add(1, Ordering::SeqCst) + 1;
    up.event(format!("setup:{}", header(&headers, "nv-authorizations")));
    Json(json!({
        "heartbeat": 60,
        "sessionToken": jwt(json!({ "sessionId": format!("s{}", n), "heartbeat": 60, "exp": future_exp() }))
    }))
    .into_response()
}

async fn new_license(State(up): State<Arc<Upstream>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    up.new_license_calls.fetch_add(1, Ordering::SeqCst);
    up.new_license_auth
        .lock()
        .expect("lock")
        .push(header(&headers, "nv-authorizations"));
    if body["challenge"].as_str().unwrap_or_default().is_empty() {
        return (StatusCode::BAD_REQUEST, "missing challenge").into_response();
    }
    Json(json!({ "status": "OK", "errorCode": 0, "license": [STANDARD.encode(NEW_LICENSE)] })).into_response()
}

async fn renewal(State(up): State<Arc<Upstream>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let n = up.renewal_calls.fetch_add(1, Ordering::SeqCst) + 1;
    up.renewal_auth
        .lock()
        .expect("lock")
        .push(header(&headers, "nv-authorizations"));
    if body["challenge"].as_str().unwrap_or_default().is_empty() {
        return (StatusCode::BAD_REQUEST, "missing challenge").into_response();
    }
    // Slow enough for concurrent renewals to overlap if they were not serialized.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    Json(json!({
        "license": STANDARD.encode(RENEWED_LICENSE),
        "sessionToken": jwt(json!({ "sessionId": format!("r{}", n), "exp": future_exp() })),
        "errorCode": 0
    }))
    .into_response()
}

async fn teardown(State(up): State<Arc<Upstream>>, headers: HeaderMap) -> Response {
    let token = header(&headers, "nv-authorizations");
    up.event(format!("teardown:{}", token));
    up.teardowns.lock().expect("lock").push(token);
    if up.fail_teardown.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "teardown failed").into_response();
    }
    StatusCode::OK.into_response()
}

async fn manifest(State(up): State<Arc<Upstream>>, Path(name): Path<String>, headers: HeaderMap) -> Response {
    up.manifest_calls.fetch_add(1, Ordering::SeqCst);
    up.manifest_agents
        .lock()
        .expect("lock")
        .push(header(&headers, "user-agent"));
    format!("<MPD id=\"{}\"/>", name.trim_end_matches(".mpd")).into_response()
}

pub fn endpoints(base: &str) -> Endpoints {
    Endpoints {
        token: format!("{}/token", base),
        sign_in: format!("{}/signin", base),
        asset: format!("{}/assets/{{asset}}/path", base),
        license_setup: format!("{}/drm/setup", base),
        license_new: format!("{}/drm/new", base),
        license_renewal: format!("{}/drm/renewal", base),
        license_teardown: format!("{}/drm/teardown", base),
    }
}

pub fn profile() -> Profile {
    Profile {
        user_agent: "TestAgent/1.0".to_string(),
        client: ClientProfile {
            authn_id: None,
            authz_id: "authz".to_string(),
            authz_basic: "YmFzaWM=".to_string(),
            account_id: "acc".to_string(),
            profile_id: "prof".to_string(),
        },
        device: DeviceProfile {
            id: "dev-1".to_string(),
            ..DeviceProfile::default()
        },
    }
}

pub fn identity_token() -> String {
    jwt(json!({ "sub": "user", "exp": future_exp() }))
}

/// Credential directory with the requested records present.
pub async fn store_with(identity: bool, access: bool) -> (TempDir, Arc<FileCredentialStore>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileCredentialStore::new(dir.path().join("identity.json"), dir.path().join("access.json"));

    if identity {
        let now = Utc::now().timestamp();
        let record = json!({
            "id_token": identity_token(),
            "token_type": "Bearer",
            "scope": "openid",
            "issued_at": now,
            "expires_at": now + 86_400,
            "refresh_token": "refresh",
            "profile": { "sub": "user", "user_ca": "ca", "user_sa": "sa" }
        });
        tokio::fs::write(store.identity_path(), record.to_string())
            .await
            .expect("write identity");
    }
    if access {
        let record = AccessSession {
            access_token: "access-0".to_string(),
            expires_in: 3600,
            access_token_expiration_date: String::new(),
            id_token: identity_token(),
            issued_at: 0,
            scope: "openid".to_string(),
            status: "approved".to_string(),
            token_type: "Bearer".to_string(),
            user_sa: None,
            user_ca: None,
        };
        tokio::fs::write(store.access_path(), serde_json::to_vec(&record).expect("json"))
            .await
            .expect("write access");
    }
    (dir, Arc::new(store))
}

/// Signing agent double that records every call.
#[derive(Default)]
pub struct FakeAgent {
    pub calls: Mutex<Vec<String>>,
    pub fail_challenge: AtomicBool,
}

impl FakeAgent {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("lock").push(call);
    }
}

pub const SIGNATURE: &[u8] = &[1, 2, 250];

#[async_trait]
impl SigningAgent for FakeAgent {
    async fn open_device_session(&self) -> Result<String> {
        self.record("open".to_string());
        Ok("das-1".to_string())
    }

    async fn get_challenge(&self, session_id: &str) -> Result<String> {
        self.record(format!("challenge:{}", session_id));
        if self.fail_challenge.load(Ordering::SeqCst) {
            return Err(Error::SigningAgent("challenge refused".to_string()));
        }
        Ok(format!("challenge-for-{}", session_id))
    }

    async fn import_signing_key(&self, session_id: &str, encrypted_key: &str) -> Result<()> {
        self.record(format!("import:{}:{}", session_id, encrypted_key));
        Ok(())
    }

    async fn sign(&self, session_id: &str, key_id: &str, message: &str, encoding: &str) -> Result<Vec<u8>> {
        self.record(format!("sign:{}:{}:{}:{}", session_id, key_id, encoding, message));
        Ok(SIGNATURE.to_vec())
    }
}

pub struct Harness {
    pub upstream: Arc<Upstream>,
    pub agent: Arc<FakeAgent>,
    pub store: Arc<FileCredentialStore>,
    pub tokens: Arc<TokenService>,
    pub device: Arc<DeviceSessionManager>,
    pub proxy: Arc<LicenseProxy>,
    _dir: TempDir,
}

/// Components wired against a fresh upstream, nothing refreshed yet.
pub async fn harness_unready() -> Harness {
    let upstream = spawn_upstream().await;
    let (dir, store) = store_with(true, true).await;
    let endpoints = endpoints(upstream.base());
    let profile = profile();
    let http = reqwest::Client::new();

    let tokens = Arc::new(TokenService::new(
        http.clone(),
        endpoints.token.clone(),
        profile.client.clone(),
        store.clone(),
    ));
    let agent = Arc::new(FakeAgent::default());
    let signing: Arc<dyn SigningAgent> = agent.clone();
    let device = Arc::new(DeviceSessionManager::new(
        http.clone(),
        endpoints.sign_in.clone(),
        profile.clone(),
        signing,
        Arc::clone(&tokens),
    ));
    let proxy = Arc::new(LicenseProxy::new(
        Arc::clone(&tokens),
        Arc::clone(&device),
        UpstreamClient::new(http, endpoints, profile, "6.1.0", MANIFEST_USER_AGENT),
    ));

    Harness {
        upstream,
        agent,
        store,
        tokens,
        device,
        proxy,
        _dir: dir,
    }
}

/// Components with a published access session and a signed-in device.
pub async fn harness() -> Harness {
    let h = harness_unready().await;
    h.tokens.refresh().await.expect("refresh");
    h.device.sign_in().await.expect("sign in");
    h
}

pub fn active_token(state: &wvrelay::proxy::ProxyState) -> String {
    state
        .active()
        .map(|session| session.license_session_token.clone())
        .expect("active session")
}
