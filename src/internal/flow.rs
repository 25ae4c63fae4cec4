use crate::config::{AtHashPolicy, AuthConfig};
use crate::error::{
    AuthorizationDeniedSnafu, IdTokenValidationSnafu, InsecureEndpointSnafu, LoginResponseSnafu, NetworkSnafu,
    NoRefreshTokenSnafu, NotLoggedInSnafu, OAuthError, OidcModeEnabledSnafu, UserProfileSnafu,
};
use crate::events::OAuthEvent;
use crate::internal::Shared;
use crate::internal::discovery::DiscoveryClient;
use crate::internal::scheduler::ExpirationScheduler;
use crate::internal::token_store::{NewToken, TokenCommit};
use crate::login::{LoginUrlParams, create_login_url};
use crate::nonce::Nonce;
use crate::request::{self, RequestError};
use crate::response::{CallbackErrorResponse, CallbackResponse, ImplicitLoginResponse, SuccessTokenResponse};
use crate::token::TokenKind;
use crate::token_claims::{IdTokenClaims, ParsedIdToken};
use crate::token_validation::{NonceCheck, ValidationContext, decode_id_token, validate_id_token};
use crate::validation_handler::ValidationHandler;
use crate::SessionState;
use http::HeaderMap;
use snafu::{OptionExt, ResultExt};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use url::Url;

/// Options of an interactive (or silent) authorization request.
#[derive(Debug, Clone, Default)]
pub struct LoginUrlOptions {
    /// Caller state, returned as [`LoginResult::state`] once the login completes.
    pub additional_state: Option<String>,

    pub login_hint: Option<String>,

    /// Overrides the configured `redirect_uri`.
    pub redirect_uri: Option<Url>,

    /// Adds `prompt=none`.
    pub no_prompt: bool,

    /// Appended after the configured custom query parameters.
    pub params: Vec<(String, String)>,

    pub id_token_hint: Option<String>,
}

/// Outcome of a successfully processed login response.
#[derive(Debug, Clone)]
pub struct LoginResult {
    /// The `additional_state` the login was started with.
    pub state: Option<String>,

    /// Claims of the received ID token. `None` unless `oidc` is enabled.
    pub claims: Option<IdTokenClaims>,

    pub session_state: Option<SessionState>,
}

/// Executes the implicit flow and every grant against the token endpoint.
#[derive(Clone)]
pub(crate) struct FlowExecutor {
    shared: Arc<Shared>,
    discovery: DiscoveryClient,
    scheduler: ExpirationScheduler,
    validation_handler: Arc<dyn ValidationHandler>,
}

impl FlowExecutor {
    pub(crate) fn new(
        shared: Arc<Shared>,
        discovery: DiscoveryClient,
        scheduler: ExpirationScheduler,
        validation_handler: Arc<dyn ValidationHandler>,
    ) -> Self {
        Self {
            shared,
            discovery,
            scheduler,
            validation_handler,
        }
    }

    /// Builds the authorization url and binds a fresh nonce to the generated state.
    pub(crate) fn build_login_url(&self, options: &LoginUrlOptions) -> Result<Url, OAuthError> {
        let config = self.shared.config();
        let authorization_endpoint = self.discovery.authorization_endpoint(&config)?;
        snafu::ensure!(
            config.require_https.permits(&authorization_endpoint),
            InsecureEndpointSnafu {
                url: authorization_endpoint
            }
        );

        let state = match &options.additional_state {
            Some(additional_state) => format!(
                "{}{}{additional_state}",
                Nonce::new().as_str(),
                config.nonce_state_separator
            ),
            None => Nonce::new().into_string(),
        };
        let nonce = Nonce::new();
        let redirect_uri = options.redirect_uri.as_ref().unwrap_or(&config.redirect_uri);
        let scope = config.scope();

        let login_url = create_login_url(
            authorization_endpoint,
            &LoginUrlParams {
                response_type: config.response_type(),
                client_id: &config.client_id,
                state: &state,
                redirect_uri: redirect_uri.as_str(),
                scope: &scope,
                nonce: config.oidc.then_some(nonce.as_str()),
                login_hint: options.login_hint.as_deref(),
                prompt_none: options.no_prompt,
                id_token_hint: options.id_token_hint.as_deref(),
                custom_query_params: &config.custom_query_params,
                params: &options.params,
            },
        );
        self.shared.store.store_nonce(&state, nonce.as_str());
        Ok(login_url)
    }

    /// Processes the fragment the provider redirected to after an implicit-flow login.
    pub(crate) async fn handle_implicit_response(
        &self,
        fragment: &str,
    ) -> Result<LoginResult, OAuthError> {
        let config = self.shared.config();
        let response = match CallbackResponse::from_fragment(fragment) {
            CallbackResponse::Success(response) => response,
            CallbackResponse::Error(CallbackErrorResponse { error, state }) => {
                if let Some(state) = &state {
                    self.shared.store.take_nonce(state);
                }
                tracing::warn!(%error, "Provider answered the authorization request with an error");
                self.shared.events.publish(OAuthEvent::TokenError {
                    reason: error.to_string(),
                });
                return AuthorizationDeniedSnafu {
                    error_response: error,
                }
                .fail();
            }
        };
        let ImplicitLoginResponse {
            access_token,
            id_token,
            expires_in,
            state,
            session_state,
            scope: _,
        } = response;

        let state = state.context(LoginResponseSnafu {
            reason: "missing 'state'",
        })?;
        let access_token = match config.request_access_token {
            true => Some(access_token.context(LoginResponseSnafu {
                reason: "missing 'access_token'",
            })?),
            false => access_token,
        };
        let id_token = match config.oidc {
            true => Some(id_token.context(LoginResponseSnafu {
                reason: "missing 'id_token'",
            })?),
            false => None,
        };

        let Some(nonce) = self.shared.store.take_nonce(&state) else {
            tracing::warn!("Login response carries a state no login was started with");
            self.shared.events.publish(OAuthEvent::InvalidNonceInState);
            return LoginResponseSnafu {
                reason: "unknown 'state'",
            }
            .fail();
        };

        let now = OffsetDateTime::now_utc();
        let parsed = match &id_token {
            Some(id_token) => Some(
                self.validate(
                    &config,
                    id_token,
                    access_token.as_deref(),
                    NonceCheck::Expect(nonce),
                    config.advanced.at_hash_policy,
                    now,
                )
                .await?,
            ),
            None => None,
        };

        self.commit(
            &TokenCommit {
                access_token: access_token.map(|value| NewToken {
                    value,
                    expires_in: expires_in.map(Duration::seconds),
                }),
                id_token: parsed.as_ref().map(|parsed| id_token_commit(parsed, now)),
                refresh_token: None,
                session_state: session_state.clone(),
            },
            now,
        );
        self.shared.events.publish(OAuthEvent::TokenReceived);

        Ok(LoginResult {
            state: state
                .split_once(config.nonce_state_separator.as_str())
                .map(|(_, additional_state)| additional_state.to_owned()),
            claims: parsed.map(|parsed| parsed.claims),
            session_state,
        })
    }

    /// Resource owner password credentials grant. Only available while `oidc` is disabled.
    pub(crate) async fn exchange_password(
        &self,
        username: &str,
        password: &str,
        headers: HeaderMap,
    ) -> Result<(), OAuthError> {
        let config = self.shared.config();
        snafu::ensure!(!config.oidc, OidcModeEnabledSnafu {});
        let params = vec![
            ("grant_type".to_owned(), "password".to_owned()),
            ("username".to_owned(), username.to_owned()),
            ("password".to_owned(), password.to_owned()),
        ];
        self.exchange(&config, params, headers)
            .await
            .inspect_err(|err| self.publish_token_error(err))
    }

    pub(crate) async fn exchange_refresh_token(&self) -> Result<(), OAuthError> {
        let config = self.shared.config();
        let refresh_token = self
            .shared
            .store
            .refresh_token()
            .context(NoRefreshTokenSnafu {})?;
        let params = vec![
            ("grant_type".to_owned(), "refresh_token".to_owned()),
            ("refresh_token".to_owned(), refresh_token),
        ];

        match self.exchange(&config, params, HeaderMap::new()).await {
            Ok(()) => {
                tracing::debug!("Refreshed tokens");
                self.shared.events.publish(OAuthEvent::TokenRefreshed);
                Ok(())
            }
            Err(err) => {
                if let Some(error_response) = err.error_response()
                    && error_response.is_likely_session_ended()
                {
                    tracing::info!(
                        %error_response,
                        "The known refresh_token is no longer usable. Dropping it."
                    );
                    self.shared.store.remove_refresh_token();
                }
                self.shared.events.publish(OAuthEvent::TokenRefreshError {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Exchanges `token` (sent as `assertion`) using an extension grant.
    pub(crate) async fn exchange_custom_grant(
        &self,
        token: &str,
        grant_type: &str,
        headers: HeaderMap,
    ) -> Result<(), OAuthError> {
        let config = self.shared.config();
        let params = vec![
            ("grant_type".to_owned(), grant_type.to_owned()),
            ("assertion".to_owned(), token.to_owned()),
        ];
        self.exchange(&config, params, headers)
            .await
            .inspect_err(|err| self.publish_token_error(err))
    }

    /// Loads the user profile from the userinfo endpoint.
    pub(crate) async fn load_user_profile(
        &self,
    ) -> Result<serde_json::Map<String, serde_json::Value>, OAuthError> {
        let config = self.shared.config();
        let access_token = self
            .shared
            .store
            .valid_token(TokenKind::AccessToken)
            .context(NotLoggedInSnafu {})?
            .value;
        let userinfo_endpoint = self.discovery.userinfo_endpoint(&config)?;
        snafu::ensure!(
            config.require_https.permits(&userinfo_endpoint),
            InsecureEndpointSnafu {
                url: userinfo_endpoint
            }
        );

        let result = request::retrieve_user_info(
            &*self.shared.transport,
            userinfo_endpoint,
            &access_token,
        )
        .await
        .context(NetworkSnafu {})
        .and_then(|profile| {
            self.check_profile_subject(&config, &profile)?;
            Ok(profile)
        });

        match &result {
            Ok(_) => self.shared.events.publish(OAuthEvent::UserProfileLoaded),
            Err(err) => {
                tracing::warn!(?err, "Could not load user profile");
                self.shared.events.publish(OAuthEvent::UserProfileLoadError {
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    fn check_profile_subject(
        &self,
        config: &AuthConfig,
        profile: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), OAuthError> {
        if !config.oidc || config.skip_subject_check {
            return Ok(());
        }
        let expected = self
            .shared
            .store
            .id_token()
            .and_then(|id_token| decode_id_token(&id_token).ok())
            .and_then(|parsed| parsed.claims.subject);
        let actual = profile.get("sub").and_then(serde_json::Value::as_str);
        snafu::ensure!(
            expected.is_some() && expected.as_deref() == actual,
            UserProfileSnafu {
                reason: "'sub' of the profile does not match the ID token's subject",
            }
        );
        Ok(())
    }

    fn publish_token_error(&self, err: &OAuthError) {
        tracing::warn!(?err, "Token request failed");
        self.shared.events.publish(OAuthEvent::TokenError {
            reason: err.to_string(),
        });
    }

    async fn exchange(
        &self,
        config: &AuthConfig,
        params: Vec<(String, String)>,
        headers: HeaderMap,
    ) -> Result<(), OAuthError> {
        let response = self.fetch_token(config, params, headers).await?;
        self.commit_token_response(config, response).await
    }

    async fn fetch_token(
        &self,
        config: &AuthConfig,
        mut params: Vec<(String, String)>,
        headers: HeaderMap,
    ) -> Result<SuccessTokenResponse, OAuthError> {
        let token_endpoint = self.discovery.token_endpoint(config)?;
        snafu::ensure!(
            config.require_https.permits(&token_endpoint),
            InsecureEndpointSnafu { url: token_endpoint }
        );

        params.push(("client_id".to_owned(), config.client_id.clone()));
        let scope = config.scope();
        if !scope.is_empty() {
            params.push(("scope".to_owned(), scope));
        }
        if let Some(client_secret) = &config.dummy_client_secret {
            params.push(("client_secret".to_owned(), client_secret.clone()));
        }

        request::request_token(&*self.shared.transport, token_endpoint, params, headers)
            .await
            .map_err(|err| match err {
                RequestError::ErrResponse { error_response } => {
                    OAuthError::TokenEndpoint { error_response }
                }
                source => OAuthError::Network { source },
            })
    }

    /// ID tokens failing validation are never stored, and neither is anything they arrived with.
    async fn commit_token_response(
        &self,
        config: &AuthConfig,
        response: SuccessTokenResponse,
    ) -> Result<(), OAuthError> {
        let now = OffsetDateTime::now_utc();
        let parsed = match (&response.id_token, config.oidc) {
            (Some(id_token), true) => Some(
                self.validate(
                    config,
                    id_token,
                    Some(&response.access_token),
                    NonceCheck::Skip,
                    config.advanced.token_endpoint_at_hash_policy,
                    now,
                )
                .await?,
            ),
            _ => None,
        };

        self.commit(
            &TokenCommit {
                access_token: Some(NewToken {
                    value: response.access_token,
                    expires_in: response.expires_in.map(Duration::seconds),
                }),
                id_token: parsed.as_ref().map(|parsed| id_token_commit(parsed, now)),
                refresh_token: response.refresh_token,
                session_state: response.session_state,
            },
            now,
        );
        self.shared.events.publish(OAuthEvent::TokenReceived);
        Ok(())
    }

    fn commit(&self, commit: &TokenCommit, now: OffsetDateTime) {
        self.shared.store.commit(commit, now);
        self.scheduler.arm_all();
    }

    async fn validate(
        &self,
        config: &AuthConfig,
        id_token: &str,
        access_token: Option<&str>,
        nonce: NonceCheck,
        at_hash_policy: AtHashPolicy,
        now: OffsetDateTime,
    ) -> Result<ParsedIdToken, OAuthError> {
        let jwks = self.discovery.jwks();
        let expected_issuer = self.discovery.expected_issuer(config);
        let context = ValidationContext {
            expected_issuer: expected_issuer.as_deref(),
            client_id: &config.client_id,
            nonce,
            jwks: jwks.as_deref(),
            clock_skew: config.advanced.clock_skew,
            at_hash_policy,
            skip_subject_check: config.skip_subject_check,
            now,
        };
        validate_id_token(id_token, access_token, &context, &*self.validation_handler)
            .await
            .inspect_err(|err| {
                tracing::warn!(%err, "Rejected ID token");
                self.shared.events.publish(OAuthEvent::TokenValidationError {
                    reason: err.reason,
                });
            })
            .context(IdTokenValidationSnafu {})
    }
}

fn id_token_commit(parsed: &ParsedIdToken, now: OffsetDateTime) -> NewToken {
    NewToken {
        value: parsed.raw.clone(),
        expires_in: Some(parsed.claims.expires_at - now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::test_support::{MockTransport, config, shared_with, unsigned_token};
    use crate::token::MAX_TOKEN_LIFETIME;
    use crate::validation_handler::NullValidationHandler;
    use assertr::prelude::*;
    use http::StatusCode;

    fn executor(config: AuthConfig, transport: Arc<MockTransport>) -> FlowExecutor {
        let shared = shared_with(config, transport);
        let discovery = DiscoveryClient::new(shared.clone());
        let scheduler = ExpirationScheduler::new(shared.clone());
        FlowExecutor::new(shared, discovery, scheduler, Arc::new(NullValidationHandler))
    }

    fn login_config() -> AuthConfig {
        let mut config = config();
        config.login_url = Some(Url::parse("https://idp.example/auth").unwrap());
        config.token_endpoint = Some(Url::parse("https://idp.example/token").unwrap());
        config
    }

    fn query(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    fn id_token(nonce: &str) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        unsigned_token(serde_json::json!({
            "iss": "https://idp.example",
            "sub": "user-1",
            "aud": "app",
            "exp": now + 300,
            "iat": now,
            "nonce": nonce,
        }))
    }

    #[tokio::test]
    async fn login_url_binds_nonce_to_state() {
        let flow = executor(login_config(), Arc::new(MockTransport::default()));
        let url = flow
            .build_login_url(&LoginUrlOptions {
                additional_state: Some("/home".to_owned()),
                ..LoginUrlOptions::default()
            })
            .unwrap();

        let state = query(&url, "state").unwrap();
        let nonce = query(&url, "nonce").unwrap();
        assert_that(state.ends_with(";/home")).is_true();
        assert_that(query(&url, "response_type")).is_equal_to(Some("id_token token".to_owned()));
        assert_that(query(&url, "scope")).is_equal_to(Some("openid".to_owned()));
        assert_that(flow.shared.store.take_nonce(&state)).is_equal_to(Some(nonce));
    }

    #[tokio::test]
    async fn login_url_requires_an_authorization_endpoint() {
        let flow = executor(config(), Arc::new(MockTransport::default()));
        let result = flow.build_login_url(&LoginUrlOptions::default());
        assert_that(matches!(result, Err(OAuthError::NoDiscoveryDocument))).is_true();
    }

    #[tokio::test]
    async fn implicit_response_is_committed() {
        let flow = executor(login_config(), Arc::new(MockTransport::default()));
        let mut events = flow.shared.events.subscribe();
        let url = flow
            .build_login_url(&LoginUrlOptions {
                additional_state: Some("/home".to_owned()),
                ..LoginUrlOptions::default()
            })
            .unwrap();
        let state = query(&url, "state").unwrap();
        let nonce = query(&url, "nonce").unwrap();

        let fragment = format!(
            "#access_token=AT1&token_type=bearer&expires_in=3600&id_token={}&state={}&session_state=S1",
            id_token(&nonce),
            url::form_urlencoded::byte_serialize(state.as_bytes()).collect::<String>(),
        );
        let result = flow.handle_implicit_response(&fragment).await.unwrap();

        assert_that(result.state).is_equal_to(Some("/home".to_owned()));
        assert_that(result.claims.unwrap().subject).is_equal_to(Some("user-1".to_owned()));
        assert_that(flow.shared.store.access_token()).is_equal_to(Some("AT1".to_owned()));
        assert_that(flow.shared.store.session_state()).is_equal_to(Some("S1".to_owned()));
        assert_that(flow.scheduler.is_armed(TokenKind::AccessToken)).is_true();
        assert_that(events.drain()).is_equal_to(vec![OAuthEvent::TokenReceived]);
    }

    #[tokio::test]
    async fn implicit_response_with_absurd_lifetime_is_clamped() {
        let flow = executor(login_config(), Arc::new(MockTransport::default()));
        let url = flow.build_login_url(&LoginUrlOptions::default()).unwrap();
        let state = query(&url, "state").unwrap();
        let nonce = query(&url, "nonce").unwrap();

        let fragment = format!(
            "access_token=AT1&expires_in=999999999999&id_token={}&state={}",
            id_token(&nonce),
            url::form_urlencoded::byte_serialize(state.as_bytes()).collect::<String>(),
        );
        flow.handle_implicit_response(&fragment).await.unwrap();

        let record = flow.shared.store.valid_token(TokenKind::AccessToken).unwrap();
        assert_that(record.expires_in).is_equal_to(Some(MAX_TOKEN_LIFETIME));
        assert_that(flow.scheduler.is_armed(TokenKind::AccessToken)).is_true();
    }

    #[tokio::test]
    async fn implicit_response_with_unknown_state_is_rejected() {
        let flow = executor(login_config(), Arc::new(MockTransport::default()));
        let mut events = flow.shared.events.subscribe();
        let fragment = format!("access_token=AT1&id_token={}&state=unknown", id_token("N"));

        let result = flow.handle_implicit_response(&fragment).await;

        assert_that(matches!(result, Err(OAuthError::LoginResponse { .. }))).is_true();
        assert_that(flow.shared.store.access_token()).is_none();
        assert_that(events.drain()).is_equal_to(vec![OAuthEvent::InvalidNonceInState]);
    }

    #[tokio::test]
    async fn implicit_error_response_is_published() {
        let flow = executor(login_config(), Arc::new(MockTransport::default()));
        let mut events = flow.shared.events.subscribe();

        let result = flow
            .handle_implicit_response("#error=login_required&state=S")
            .await;

        assert_that(matches!(result, Err(OAuthError::AuthorizationDenied { .. }))).is_true();
        let published = events.drain();
        assert_that(published.len()).is_equal_to(1);
        assert_that(published[0].event_type()).is_equal_to("token_error");
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_does_not_touch_the_network() {
        let transport = Arc::new(MockTransport::default());
        let flow = executor(login_config(), transport.clone());

        let result = flow.exchange_refresh_token().await;

        assert_that(matches!(result, Err(OAuthError::NoRefreshToken))).is_true();
        assert_that(transport.requests()).is_empty();
    }

    #[tokio::test]
    async fn invalid_grant_drops_the_refresh_token() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(
            "https://idp.example/token",
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Session not active"}"#,
        );
        let flow = executor(login_config(), transport.clone());
        flow.shared.store.commit(
            &TokenCommit {
                refresh_token: Some("RT1".to_owned()),
                ..TokenCommit::default()
            },
            OffsetDateTime::now_utc(),
        );
        let mut events = flow.shared.events.subscribe();

        let result = flow.exchange_refresh_token().await;

        assert_that(result.unwrap_err().error_response().is_some()).is_true();
        assert_that(flow.shared.store.refresh_token()).is_none();
        assert_that(events.drain()[0].event_type()).is_equal_to("token_refresh_error");
    }

    #[tokio::test]
    async fn password_grant_is_refused_in_oidc_mode() {
        let flow = executor(login_config(), Arc::new(MockTransport::default()));
        let result = flow.exchange_password("user", "secret", HeaderMap::new()).await;
        assert_that(matches!(result, Err(OAuthError::OidcModeEnabled))).is_true();
    }

    #[tokio::test]
    async fn password_grant_stores_tokens() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(
            "https://idp.example/token",
            StatusCode::OK,
            r#"{"access_token":"AT1","expires_in":300,"refresh_token":"RT1","token_type":"Bearer"}"#,
        );
        let mut config = login_config();
        config.oidc = false;
        config.dummy_client_secret = Some("dummy".to_owned());
        let flow = executor(config, transport.clone());

        flow.exchange_password("user", "secret", HeaderMap::new())
            .await
            .unwrap();

        assert_that(flow.shared.store.access_token()).is_equal_to(Some("AT1".to_owned()));
        assert_that(flow.shared.store.refresh_token()).is_equal_to(Some("RT1".to_owned()));
        let form = transport.requests()[0].form.clone().unwrap();
        assert_that(form.contains(&("grant_type".to_owned(), "password".to_owned()))).is_true();
        assert_that(form.contains(&("client_secret".to_owned(), "dummy".to_owned()))).is_true();
    }

    #[tokio::test]
    async fn password_grant_with_absurd_lifetime_is_clamped() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(
            "https://idp.example/token",
            StatusCode::OK,
            r#"{"access_token":"AT1","expires_in":999999999999}"#,
        );
        let mut config = login_config();
        config.oidc = false;
        let flow = executor(config, transport);

        flow.exchange_password("user", "secret", HeaderMap::new())
            .await
            .unwrap();

        let now = OffsetDateTime::now_utc();
        let expires_at = flow
            .shared
            .store
            .token(TokenKind::AccessToken)
            .and_then(|record| record.expires_at())
            .unwrap();
        assert_that(expires_at <= now + MAX_TOKEN_LIFETIME).is_true();
        assert_that(expires_at > now).is_true();
        assert_that(flow.scheduler.is_armed(TokenKind::AccessToken)).is_true();
    }

    #[tokio::test]
    async fn user_profile_is_not_requested_with_an_unusable_access_token() {
        let transport = Arc::new(MockTransport::default());
        let mut config = login_config();
        config.oidc = false;
        config.userinfo_endpoint = Some(Url::parse("https://idp.example/userinfo").unwrap());
        let flow = executor(config, transport.clone());
        flow.shared.store.commit(
            &TokenCommit {
                access_token: Some(NewToken {
                    value: "AT\n1".to_owned(),
                    expires_in: Some(Duration::seconds(300)),
                }),
                ..TokenCommit::default()
            },
            OffsetDateTime::now_utc(),
        );
        let mut events = flow.shared.events.subscribe();

        let result = flow.load_user_profile().await;

        assert_that(matches!(
            result,
            Err(OAuthError::Network {
                source: RequestError::BearerHeader { .. }
            })
        ))
        .is_true();
        assert_that(transport.requests()).is_empty();
        assert_that(events.drain()[0].event_type()).is_equal_to("user_profile_load_error");
    }

    #[tokio::test]
    async fn custom_grant_sends_the_token_as_assertion() {
        let transport = Arc::new(MockTransport::default());
        transport.respond(
            "https://idp.example/token",
            StatusCode::OK,
            r#"{"access_token":"AT2","expires_in":300}"#,
        );
        let flow = executor(login_config(), transport.clone());

        flow.exchange_custom_grant("external", "urn:example:grant", HeaderMap::new())
            .await
            .unwrap();

        let form = transport.requests()[0].form.clone().unwrap();
        assert_that(form.contains(&("assertion".to_owned(), "external".to_owned()))).is_true();
        assert_that(flow.shared.store.access_token()).is_equal_to(Some("AT2".to_owned()));
    }
}
