use crate::DiscoveryEndpoint;
use itertools::Itertools;
use std::time::Duration;
use url::Url;

/// Configuration of an [`OAuthService`](crate::OAuthService).
///
/// Replace it through [`OAuthService::configure`](crate::OAuthService::configure). Doing so
/// cancels all timers, listeners and session checks of the previous configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Issuer identifier of the identity provider, e.g. "https://idp.example".
    pub issuer: Url,

    /// The name of this client as registered at the identity provider.
    pub client_id: String,

    /// Url the provider redirects to after an interactive login.
    pub redirect_uri: Url,

    /// Requested scopes. "openid" is added automatically while `oidc` is enabled.
    pub scope: Vec<String>,

    /// Defaults to "id_token token" when `oidc` is enabled and to "token" otherwise.
    pub response_type: Option<String>,

    /// Overrides the discovery document location derived from `issuer`.
    pub discovery_endpoint: Option<DiscoveryEndpoint>,

    /// Whether ID tokens are requested and validated.
    /// Defaults to `true`.
    pub oidc: bool,

    /// Whether an access token is requested in the implicit flow.
    /// Defaults to `true`.
    pub request_access_token: bool,

    /// Which endpoints must be served over https.
    pub require_https: RequireHttps,

    /// Require every endpoint of the discovery document to share the issuer's origin
    /// (or one of `trusted_origins`).
    /// Defaults to `true`.
    pub strict_discovery_document_validation: bool,

    /// Additional origins endpoints may be served from under strict discovery validation.
    pub trusted_origins: Vec<Url>,

    /// Skip comparing the discovery document's and the ID token's issuer with `issuer`.
    pub skip_issuer_check: bool,

    /// Accept ID tokens without a `sub` claim and skip comparing the user profile's subject.
    pub skip_subject_check: bool,

    /// Whether to poll the provider's session state after a login.
    pub session_checks_enabled: bool,

    /// Redirect target of the hidden silent-refresh round trip. Silent refresh is unavailable
    /// without it.
    pub silent_refresh_redirect_uri: Option<Url>,

    /// Send the current ID token as `id_token_hint` during silent refresh.
    pub use_id_token_hint_for_silent_refresh: bool,

    /// Url the provider redirects to after logging out.
    pub post_logout_redirect_uri: Option<Url>,

    /// Overrides the discovered authorization endpoint.
    pub login_url: Option<Url>,

    /// Overrides the discovered end-session endpoint.
    pub logout_url: Option<Url>,

    /// Used when no discovery document provides one.
    pub token_endpoint: Option<Url>,

    /// Used when no discovery document provides one.
    pub userinfo_endpoint: Option<Url>,

    /// Added to every login url.
    pub custom_query_params: Vec<(String, String)>,

    /// Sent as `client_secret` to the token endpoint, for providers insisting on one even for
    /// public clients.
    pub dummy_client_secret: Option<String>,

    /// Separates the random part of `state` from caller supplied state.
    /// Defaults to ";".
    pub nonce_state_separator: String,

    pub advanced: AdvancedOptions,
}

impl AuthConfig {
    pub fn new(issuer: Url, client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            issuer,
            client_id: client_id.into(),
            redirect_uri,
            scope: Vec::new(),
            response_type: None,
            discovery_endpoint: None,
            oidc: true,
            request_access_token: true,
            require_https: RequireHttps::default(),
            strict_discovery_document_validation: true,
            trusted_origins: Vec::new(),
            skip_issuer_check: false,
            skip_subject_check: false,
            session_checks_enabled: false,
            silent_refresh_redirect_uri: None,
            use_id_token_hint_for_silent_refresh: false,
            post_logout_redirect_uri: None,
            login_url: None,
            logout_url: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            custom_query_params: Vec::new(),
            dummy_client_secret: None,
            nonce_state_separator: ";".to_owned(),
            advanced: AdvancedOptions::default(),
        }
    }

    pub(crate) fn discovery_endpoint(&self) -> DiscoveryEndpoint {
        match &self.discovery_endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let mut url = self.issuer.clone();
                let path = format!(
                    "{}/.well-known/openid-configuration",
                    url.path().trim_end_matches('/')
                );
                url.set_path(&path);
                url
            }
        }
    }

    /// The issuer as compared against `iss` values.
    pub(crate) fn issuer_str(&self) -> &str {
        self.issuer.as_str().trim_end_matches('/')
    }

    pub(crate) fn response_type(&self) -> &str {
        match (&self.response_type, self.oidc, self.request_access_token) {
            (Some(response_type), _, _) => response_type,
            (None, true, true) => "id_token token",
            (None, true, false) => "id_token",
            (None, false, _) => "token",
        }
    }

    pub(crate) fn scope(&self) -> String {
        let mut configured = self.scope.iter().map(|it| it.trim()).filter(|it| !it.is_empty());
        match self.oidc {
            true => ["openid"]
                .into_iter()
                .chain(configured.filter(|it| *it != "openid"))
                .join(" "),
            false => configured.join(" "),
        }
    }
}

/// Which urls must use https.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequireHttps {
    Always,

    /// Plain http is accepted for localhost.
    #[default]
    RemoteOnly,

    Never,
}

impl RequireHttps {
    pub(crate) fn permits(self, url: &Url) -> bool {
        if url.scheme() == "https" {
            return true;
        }
        match self {
            RequireHttps::Always => false,
            RequireHttps::Never => true,
            RequireHttps::RemoteOnly => match url.host() {
                Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
                Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
                Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
                None => false,
            },
        }
    }
}

/// When the `at_hash` claim binds an ID token to the access token it arrived with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AtHashPolicy {
    /// Check if both an access token and the claim are present.
    #[default]
    WhenPresent,

    /// Reject ID tokens arriving with an access token but without the claim.
    Required,

    Disabled,
}

#[derive(Debug, Clone)]
pub struct AdvancedOptions {
    /// Interval of provider session checks.
    /// Defaults to `Duration::from_secs(3)`.
    pub session_check_interval: Duration,

    /// How long to wait for the answer to a single session check.
    /// Defaults to `Duration::from_secs(5)`.
    pub session_check_timeout: Duration,

    /// How long to wait for the answer of a silent refresh.
    /// Defaults to `Duration::from_secs(20)`.
    pub silent_refresh_timeout: Duration,

    /// How long a detected session change waits for a silent refresh to succeed before the
    /// local session is terminated.
    /// Defaults to `Duration::from_secs(25)`.
    pub session_change_grace: Duration,

    /// Tolerated clock difference when checking `exp` and `iat`.
    /// Defaults to `Duration::from_secs(60)`.
    pub clock_skew: Duration,

    /// Time between `TokenExpires` and `TokenExpired` in addition to the token's remaining
    /// lifetime.
    /// Defaults to `Duration::from_secs(5)`.
    pub expired_grace: Duration,

    /// Fraction of a token's lifetime after which `TokenExpires` fires. Clamped to `[0, 1]`,
    /// non-finite values count as `1.0`.
    /// Defaults to `1.0`.
    pub timeout_factor: f64,

    /// `at_hash` policy of implicit-flow responses.
    pub at_hash_policy: AtHashPolicy,

    /// `at_hash` policy of token endpoint responses (password, refresh and custom grants).
    pub token_endpoint_at_hash_policy: AtHashPolicy,

    /// Events buffered per subscriber before slow subscribers start missing events.
    /// Defaults to `64`.
    pub event_capacity: usize,

    /// Prefix of every storage key.
    /// Defaults to `"oidc_token_runtime__"`.
    pub storage_key_prefix: String,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            session_check_interval: Duration::from_secs(3),
            session_check_timeout: Duration::from_secs(5),
            silent_refresh_timeout: Duration::from_secs(20),
            session_change_grace: Duration::from_secs(25),
            clock_skew: Duration::from_secs(60),
            expired_grace: Duration::from_secs(5),
            timeout_factor: 1.0,
            at_hash_policy: AtHashPolicy::WhenPresent,
            token_endpoint_at_hash_policy: AtHashPolicy::WhenPresent,
            event_capacity: 64,
            storage_key_prefix: "oidc_token_runtime__".to_owned(),
        }
    }
}
