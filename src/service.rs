use crate::channel::{ChannelMessage, MessageChannel, MessageHub};
use crate::config::AuthConfig;
use crate::error::OAuthError;
use crate::events::{EventSubscription, OAuthEvent};
use crate::internal::discovery::{Discovered, DiscoveryClient};
use crate::internal::flow::{FlowExecutor, LoginResult, LoginUrlOptions};
use crate::internal::scheduler::ExpirationScheduler;
use crate::internal::session_check::SessionCheckCoordinator;
use crate::internal::silent_refresh::SilentRefreshCoordinator;
use crate::internal::token_store::TokenStore;
use crate::internal::{Shared, TaskHandle, TaskSlot, clear_local_session};
use crate::logout::create_logout_url;
use crate::request::{ReqwestTransport, Transport};
use crate::storage::{MemoryStorage, OAuthStorage};
use crate::token::TokenKind;
use crate::token_claims::IdTokenClaims;
use crate::token_validation::decode_id_token;
use crate::validation_handler::{JwksValidationHandler, ValidationHandler};
use crate::{AccessToken, RefreshToken};
use http::HeaderMap;
use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;
use time::OffsetDateTime;
use url::Url;

/// The host-provided parts of an [`OAuthService`].
#[derive(Clone)]
pub struct Collaborators {
    /// Where tokens and pending nonces are persisted.
    /// Defaults to a [`MemoryStorage`].
    pub storage: Arc<dyn OAuthStorage>,

    /// Defaults to a [`ReqwestTransport`].
    pub transport: Arc<dyn Transport>,

    /// Defaults to the [`JwksValidationHandler`].
    pub validation_handler: Arc<dyn ValidationHandler>,

    pub channel: Arc<dyn MessageChannel>,
}

impl Collaborators {
    pub fn new(channel: Arc<dyn MessageChannel>) -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
            transport: Arc::new(ReqwestTransport::default()),
            validation_handler: Arc::new(JwksValidationHandler),
            channel,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn OAuthStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_validation_handler(mut self, validation_handler: Arc<dyn ValidationHandler>) -> Self {
        self.validation_handler = validation_handler;
        self
    }
}

/// Entry point of the runtime. Cheap to clone, all clones share the same state.
///
/// Background work (expiration timers, automatic refresh, session checks) runs on the tokio
/// runtime and stops once the last clone is dropped. Its failures are only reported through
/// [`OAuthService::events`].
#[derive(Clone)]
pub struct OAuthService {
    shared: Arc<Shared>,
    discovery: DiscoveryClient,
    scheduler: ExpirationScheduler,
    flow: FlowExecutor,
    silent_refresh: SilentRefreshCoordinator,
    session_check: SessionCheckCoordinator,
    hub: MessageHub,
    automatic_refresh: TaskSlot,
}

impl std::fmt::Debug for OAuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthService")
            .field("config", &self.shared.config())
            .field("discovered", &self.discovery.discovered().is_some())
            .field(
                "armed_timers",
                &TokenKind::ALL
                    .into_iter()
                    .filter(|kind| self.scheduler.is_armed(*kind))
                    .collect::<Vec<_>>(),
            )
            .field("pending_messages", &self.hub.len())
            .field("session_checks", &self.session_check.is_running())
            .field("automatic_refresh", &self.automatic_refresh.is_running())
            .finish()
    }
}

impl OAuthService {
    /// Tokens already present in `collaborators.storage` get their expiration timers armed
    /// if this is called from within a tokio runtime.
    ///
    /// `advanced.storage_key_prefix` is only read here. Later configurations keep the prefix.
    pub fn new(config: AuthConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            storage,
            transport,
            validation_handler,
            channel,
        } = collaborators;

        let store = TokenStore::new(storage, &config.advanced.storage_key_prefix);
        let shared = Arc::new(Shared::new(config, store, transport));
        let hub = MessageHub::new();
        let discovery = DiscoveryClient::new(shared.clone());
        let scheduler = ExpirationScheduler::new(shared.clone());
        let flow = FlowExecutor::new(
            shared.clone(),
            discovery.clone(),
            scheduler.clone(),
            validation_handler,
        );
        let silent_refresh =
            SilentRefreshCoordinator::new(shared.clone(), flow.clone(), channel.clone(), hub.clone());
        let session_check = SessionCheckCoordinator::new(
            shared.clone(),
            discovery.clone(),
            scheduler.clone(),
            silent_refresh.clone(),
            channel,
            hub.clone(),
        );

        if tokio::runtime::Handle::try_current().is_ok() {
            scheduler.arm_all();
        }

        Self {
            shared,
            discovery,
            scheduler,
            flow,
            silent_refresh,
            session_check,
            hub,
            automatic_refresh: TaskSlot::default(),
        }
    }

    pub fn config(&self) -> Arc<AuthConfig> {
        self.shared.config()
    }

    /// Replaces the configuration.
    ///
    /// Stops session checks, automatic refresh, pending silent refreshes and timers, and
    /// forgets the discovery document. Stored tokens are dropped if the issuer or client
    /// changed, otherwise their timers are re-armed.
    /// Must be called from within a tokio runtime.
    pub fn configure(&self, config: AuthConfig) {
        let previous = self.shared.config();
        self.session_check.stop();
        self.automatic_refresh.clear();
        self.silent_refresh.cancel();
        self.scheduler.clear();
        self.discovery.forget();

        if previous.issuer != config.issuer || previous.client_id != config.client_id {
            tracing::debug!("Issuer or client changed. Dropping stored tokens.");
            self.shared.store.clear();
        }
        self.shared.set_config(config);
        self.scheduler.arm_all();
    }

    /// Subscribes to all events published from now on.
    pub fn events(&self) -> EventSubscription {
        self.shared.events.subscribe()
    }

    /// Loads the discovery document and its key set. Starts session checks if enabled and a
    /// session is known.
    pub async fn load_discovery_document(&self, url: Option<Url>) -> Result<Discovered, OAuthError> {
        let discovered = self.discovery.load(url).await?;
        if self.has_valid_id_token() && !self.session_check.is_running() {
            self.session_check.start();
        }
        Ok(discovered)
    }

    /// The currently loaded discovery document.
    pub fn discovered(&self) -> Option<Discovered> {
        self.discovery.discovered()
    }

    /// Re-fetches the key set of the loaded discovery document.
    pub async fn reload_jwks(&self) -> Result<Arc<JwkSet>, OAuthError> {
        self.discovery.load_jwks().await
    }

    /// Loads the discovery document and, if a callback fragment is given, processes it.
    pub async fn load_discovery_document_and_try_login(
        &self,
        fragment: Option<&str>,
    ) -> Result<Option<LoginResult>, OAuthError> {
        self.load_discovery_document(None).await?;
        match fragment {
            Some(fragment) => self.try_login(fragment).await.map(Some),
            None => Ok(None),
        }
    }

    /// Url to navigate to for an interactive login.
    pub fn login_url(&self, options: LoginUrlOptions) -> Result<Url, OAuthError> {
        self.flow.build_login_url(&options)
    }

    /// Processes the fragment of the url the provider redirected to after a login.
    pub async fn try_login(&self, fragment: &str) -> Result<LoginResult, OAuthError> {
        let result = self.flow.handle_implicit_response(fragment).await?;
        if !self.session_check.is_running() {
            self.session_check.start();
        }
        Ok(result)
    }

    /// Resource owner password credentials grant. Fails with `OidcModeEnabled` while `oidc`
    /// is enabled.
    pub async fn exchange_password(
        &self,
        username: &str,
        password: &str,
        headers: HeaderMap,
    ) -> Result<(), OAuthError> {
        self.flow.exchange_password(username, password, headers).await
    }

    pub async fn exchange_password_and_load_profile(
        &self,
        username: &str,
        password: &str,
        headers: HeaderMap,
    ) -> Result<serde_json::Map<String, serde_json::Value>, OAuthError> {
        self.flow.exchange_password(username, password, headers).await?;
        self.flow.load_user_profile().await
    }

    /// Exchanges the stored refresh token for new tokens.
    pub async fn refresh_token(&self) -> Result<(), OAuthError> {
        self.flow.exchange_refresh_token().await
    }

    /// Exchanges `token` using the extension grant `grant_type`. The token is sent as
    /// `assertion`.
    pub async fn exchange_custom_grant(
        &self,
        token: &str,
        grant_type: &str,
        headers: HeaderMap,
    ) -> Result<(), OAuthError> {
        self.flow.exchange_custom_grant(token, grant_type, headers).await
    }

    /// Renews tokens without user interaction through the [`MessageChannel`].
    pub async fn silent_refresh(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<LoginResult, OAuthError> {
        self.silent_refresh.run(params).await
    }

    /// Refreshes tokens whenever one is about to expire: through the refresh token grant if a
    /// refresh token is stored, through a silent refresh otherwise.
    /// Must be called from within a tokio runtime.
    pub fn setup_automatic_silent_refresh(&self, params: Vec<(String, String)>) {
        let mut events = self.shared.events.subscribe();
        let shared = self.shared.clone();
        let flow = self.flow.clone();
        let silent_refresh = self.silent_refresh.clone();

        self.automatic_refresh.replace(TaskHandle::spawn(async move {
            while let Some(event) = events.next().await {
                let OAuthEvent::TokenExpires { kind } = event else {
                    continue;
                };
                tracing::debug!(kind = ?kind, "Token expires. Refreshing automatically.");
                let result = match shared.store.refresh_token() {
                    Some(_) => flow.exchange_refresh_token().await,
                    None => silent_refresh.run(params.clone()).await.map(|_| ()),
                };
                if let Err(err) = result {
                    tracing::error!(?err, "Automatic refresh failed");
                }
                // Both tokens usually expire together. One refresh renews both.
                events.drain();
            }
        }));
    }

    pub fn stop_automatic_silent_refresh(&self) {
        self.automatic_refresh.clear();
    }

    /// Returns whether session checks are running afterwards. They require
    /// `session_checks_enabled` and a discovery document offering a `check_session_iframe`.
    /// Must be called from within a tokio runtime.
    pub fn start_session_checks(&self) -> bool {
        self.session_check.start()
    }

    pub fn stop_session_checks(&self) {
        self.session_check.stop();
    }

    /// Hands an answer of the [`MessageChannel`] back to the runtime. Returns whether a
    /// pending silent refresh or session check was waiting for it.
    pub fn deliver_message(&self, message: ChannelMessage) -> bool {
        self.hub.deliver(message)
    }

    /// Loads the user profile from the userinfo endpoint using the stored access token.
    pub async fn load_user_profile(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, OAuthError> {
        self.flow.load_user_profile().await
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.shared.store.access_token()
    }

    pub fn id_token(&self) -> Option<String> {
        self.shared.store.id_token()
    }

    pub fn refresh_token_value(&self) -> Option<RefreshToken> {
        self.shared.store.refresh_token()
    }

    /// Claims of the stored ID token. Not validated again.
    pub fn identity_claims(&self) -> Option<IdTokenClaims> {
        let id_token = self.shared.store.id_token()?;
        decode_id_token(&id_token)
            .inspect_err(|err| tracing::warn!(%err, "Stored ID token is not decodable"))
            .ok()
            .map(|parsed| parsed.claims)
    }

    pub fn access_token_expiration(&self) -> Option<OffsetDateTime> {
        self.shared.store.token(TokenKind::AccessToken)?.expires_at()
    }

    pub fn id_token_expiration(&self) -> Option<OffsetDateTime> {
        self.shared.store.token(TokenKind::IdToken)?.expires_at()
    }

    pub fn has_valid_access_token(&self) -> bool {
        self.shared.store.valid_token(TokenKind::AccessToken).is_some()
    }

    pub fn has_valid_id_token(&self) -> bool {
        self.shared.store.valid_token(TokenKind::IdToken).is_some()
    }

    /// Refresh tokens carry no lifetime. Any stored, non-empty one counts as valid until the
    /// provider rejects it.
    pub fn has_valid_refresh_token(&self) -> bool {
        self.shared
            .store
            .refresh_token()
            .is_some_and(|refresh_token| !refresh_token.is_empty())
    }

    /// `Bearer <access token>`, as long as the access token is valid.
    pub fn authorization_header(&self) -> Option<String> {
        self.shared
            .store
            .valid_token(TokenKind::AccessToken)
            .map(|token| format!("Bearer {}", token.value))
    }

    /// Forgets the local session and publishes `Logout`.
    ///
    /// Unless `no_redirect` is set, returns the end-session url to navigate to, carrying the
    /// ID token as `id_token_hint` and the configured `post_logout_redirect_uri`. `None` if no
    /// end-session endpoint is known.
    pub fn log_out(&self, no_redirect: bool) -> Option<Url> {
        let config = self.shared.config();
        let id_token = self.shared.store.id_token();

        self.session_check.stop();
        clear_local_session(&self.shared, &self.scheduler, &self.silent_refresh);

        if no_redirect {
            return None;
        }
        let end_session_endpoint = self.discovery.end_session_endpoint(&config)?;
        Some(create_logout_url(
            end_session_endpoint,
            id_token.as_deref(),
            config.post_logout_redirect_uri.as_ref(),
        ))
    }
}
