#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::StatusCode;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oidc_token_runtime::channel::{ChannelError, ChannelRequest, MessageChannel};
use oidc_token_runtime::url::Url;
use oidc_token_runtime::{
    AuthConfig, Collaborators, HttpRequest, HttpResponse, OAuthService, Transport, TransportError,
    compute_at_hash,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::mpsc;

pub mod tracing {
    use tracing_subscriber::filter::LevelFilter;

    pub fn init_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(LevelFilter::DEBUG)
            .try_init();
    }
}

pub const ISSUER: &str = "https://idp.example";
pub const CLIENT_ID: &str = "app";
pub const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

pub const DISCOVERY_URL: &str = "https://idp.example/.well-known/openid-configuration";
pub const JWKS_URL: &str = "https://idp.example/jwks";
pub const TOKEN_URL: &str = "https://idp.example/token";
pub const USERINFO_URL: &str = "https://idp.example/userinfo";

pub fn discovery_document() -> serde_json::Value {
    serde_json::json!({
        "issuer": ISSUER,
        "authorization_endpoint": "https://idp.example/auth",
        "token_endpoint": TOKEN_URL,
        "userinfo_endpoint": USERINFO_URL,
        "end_session_endpoint": "https://idp.example/logout",
        "check_session_iframe": "https://idp.example/check-session",
        "jwks_uri": JWKS_URL,
        "response_types_supported": ["id_token token", "id_token"],
        "id_token_signing_alg_values_supported": ["HS256"],
    })
}

pub fn jwks() -> serde_json::Value {
    serde_json::json!({
        "keys": [{
            "kty": "oct",
            "kid": "k1",
            "alg": "HS256",
            "k": URL_SAFE_NO_PAD.encode(SECRET),
        }]
    })
}

/// An identity provider answering requests by url (ignoring the query).
#[derive(Debug, Default)]
pub struct MockProvider {
    responses: Mutex<HashMap<String, (StatusCode, String)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockProvider {
    /// Serves `discovery_document()` and `jwks()`.
    pub fn new() -> Arc<Self> {
        let provider = Arc::new(Self::default());
        provider.respond(DISCOVERY_URL, StatusCode::OK, discovery_document().to_string());
        provider.respond(JWKS_URL, StatusCode::OK, jwks().to_string());
        provider
    }

    pub fn respond(&self, url: &str, status: StatusCode, body: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_owned(), (status, body.into()));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.url.as_str().starts_with(url))
            .count()
    }
}

#[async_trait]
impl Transport for MockProvider {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let key = request.url[..url::Position::AfterPath].to_owned();
        self.requests.lock().unwrap().push(request);
        match self.responses.lock().unwrap().get(&key) {
            Some((status, body)) => Ok(HttpResponse {
                status: *status,
                body: body.clone(),
            }),
            None => Err(TransportError::Other {
                message: format!("connection refused: {key}"),
            }),
        }
    }
}

/// Stands in for the hidden frame of a browser host.
#[derive(Debug)]
pub struct HiddenFrame {
    sender: mpsc::UnboundedSender<ChannelRequest>,
}

#[async_trait]
impl MessageChannel for HiddenFrame {
    async fn send(&self, request: ChannelRequest) -> Result<(), ChannelError> {
        self.sender.send(request).map_err(|_| ChannelError::Send {
            message: "frame closed".to_owned(),
        })
    }
}

pub fn config() -> AuthConfig {
    AuthConfig::new(
        Url::parse(ISSUER).unwrap(),
        CLIENT_ID,
        Url::parse("https://app.example/callback").unwrap(),
    )
}

pub fn service(
    config: AuthConfig,
    provider: Arc<MockProvider>,
) -> (OAuthService, mpsc::UnboundedReceiver<ChannelRequest>) {
    let (sender, frame) = mpsc::unbounded_channel();
    let collaborators =
        Collaborators::new(Arc::new(HiddenFrame { sender })).with_transport(provider);
    (OAuthService::new(config, collaborators), frame)
}

pub fn query(url: &Url, key: &str) -> String {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| panic!("'{key}' missing in {url}"))
}

pub fn claims(nonce: &str, lifetime: i64) -> serde_json::Value {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    serde_json::json!({
        "iss": ISSUER,
        "sub": "user-1",
        "aud": CLIENT_ID,
        "exp": now + lifetime,
        "iat": now,
        "nonce": nonce,
        "sid": "session-1",
    })
}

pub fn mint_id_token(claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("k1".to_owned());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

pub struct Answer<'a> {
    pub access_token: &'a str,
    pub expires_in: i64,
    pub id_token_lifetime: i64,
    pub session_state: &'a str,
}

impl Default for Answer<'_> {
    fn default() -> Self {
        Self {
            access_token: "AT1",
            expires_in: 3600,
            id_token_lifetime: 7200,
            session_state: "S1",
        }
    }
}

/// The fragment the provider redirects to when answering `login_url`.
pub fn fragment(login_url: &Url, answer: &Answer<'_>) -> String {
    let mut claims = claims(&query(login_url, "nonce"), answer.id_token_lifetime);
    claims["at_hash"] = serde_json::json!(compute_at_hash(answer.access_token, Algorithm::HS256));
    fragment_with_id_token(login_url, answer, &mint_id_token(&claims))
}

pub fn fragment_with_id_token(login_url: &Url, answer: &Answer<'_>, id_token: &str) -> String {
    let fragment = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("access_token", answer.access_token)
        .append_pair("token_type", "bearer")
        .append_pair("expires_in", &answer.expires_in.to_string())
        .append_pair("id_token", id_token)
        .append_pair("state", &query(login_url, "state"))
        .append_pair("session_state", answer.session_state)
        .finish();
    format!("#{fragment}")
}
