use crate::config::AuthConfig;
use crate::error::{
    DiscoveryFormatSnafu, DiscoveryValidationSnafu, MissingEndpointSnafu, NetworkSnafu,
    NoDiscoveryDocumentSnafu, OAuthError,
};
use crate::events::OAuthEvent;
use crate::internal::Shared;
use crate::request;
use crate::token_validation::issuers_match;
use crate::{AuthorizationEndpoint, DiscoveryEndpoint, EndSessionEndpoint, JwkSetEndpoint, TokenEndpoint, UserInfoEndpoint};
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use time::OffsetDateTime;
use url::Url;

/// Provider metadata.
///
/// See: <https://openid.net/specs/openid-connect-discovery-1_0.html#ProviderMetadata>
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: AuthorizationEndpoint,
    pub token_endpoint: Option<TokenEndpoint>,
    pub userinfo_endpoint: Option<UserInfoEndpoint>,
    pub end_session_endpoint: Option<EndSessionEndpoint>,
    pub check_session_iframe: Option<Url>,
    pub jwks_uri: JwkSetEndpoint,
    #[serde(default = "default_grant_types_supported")]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

fn default_grant_types_supported() -> Vec<String> {
    vec!["authorization_code".to_owned(), "implicit".to_owned()]
}

impl DiscoveryDocument {
    fn endpoints(&self) -> impl Iterator<Item = (&'static str, &Url)> {
        [
            ("authorization_endpoint", Some(&self.authorization_endpoint)),
            ("token_endpoint", self.token_endpoint.as_ref()),
            ("userinfo_endpoint", self.userinfo_endpoint.as_ref()),
            ("end_session_endpoint", self.end_session_endpoint.as_ref()),
            ("check_session_iframe", self.check_session_iframe.as_ref()),
            ("jwks_uri", Some(&self.jwks_uri)),
        ]
        .into_iter()
        .filter_map(|(name, url)| url.map(|url| (name, url)))
    }
}

/// A validated discovery document together with the key set it points to.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub document: Arc<DiscoveryDocument>,
    pub jwks: Arc<JwkSet>,

    /// The discovery endpoint used to query this information.
    pub source: DiscoveryEndpoint,

    pub retrieved: OffsetDateTime,
}

/// Fetches, validates and caches provider metadata.
#[derive(Clone)]
pub(crate) struct DiscoveryClient {
    shared: Arc<Shared>,
    state: Arc<RwLock<Option<Discovered>>>,
}

impl DiscoveryClient {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            state: Arc::default(),
        }
    }

    pub(crate) fn discovered(&self) -> Option<Discovered> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn document(&self) -> Option<Arc<DiscoveryDocument>> {
        self.discovered().map(|it| it.document)
    }

    pub(crate) fn jwks(&self) -> Option<Arc<JwkSet>> {
        self.discovered().map(|it| it.jwks)
    }

    pub(crate) fn forget(&self) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Loads the document from `url` or from the configured discovery endpoint, then its key
    /// set. Nothing is cached unless both succeed.
    pub(crate) async fn load(&self, url: Option<Url>) -> Result<Discovered, OAuthError> {
        let config = self.shared.config();
        let source = url.unwrap_or_else(|| config.discovery_endpoint());
        tracing::debug!(%source, "Loading discovery document");

        let document = match self.fetch_document(&config, &source).await {
            Ok(document) => document,
            Err(err) => {
                let event = match &err {
                    OAuthError::DiscoveryValidation { reason } => {
                        OAuthEvent::DiscoveryDocumentValidationError {
                            reason: reason.clone(),
                        }
                    }
                    other => OAuthEvent::DiscoveryDocumentLoadError {
                        reason: other.to_string(),
                    },
                };
                tracing::warn!(?err, %source, "Could not load discovery document");
                self.shared.events.publish(event);
                return Err(err);
            }
        };

        let jwks = self.fetch_jwks(document.jwks_uri.clone()).await?;

        // A reconfiguration while loading invalidates this result.
        if !Arc::ptr_eq(&config, &self.shared.config()) {
            return DiscoveryValidationSnafu {
                reason: "configuration changed while loading the discovery document",
            }
            .fail();
        }

        let discovered = Discovered {
            document: Arc::new(document),
            jwks: Arc::new(jwks),
            source,
            retrieved: OffsetDateTime::now_utc(),
        };
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(discovered.clone());
        self.shared.events.publish(OAuthEvent::DiscoveryDocumentLoaded);
        Ok(discovered)
    }

    /// Re-fetches the key set of the loaded document, e.g. after the provider rotated keys.
    pub(crate) async fn load_jwks(&self) -> Result<Arc<JwkSet>, OAuthError> {
        let jwks_uri = self
            .document()
            .context(NoDiscoveryDocumentSnafu {})?
            .jwks_uri
            .clone();
        let jwks = Arc::new(self.fetch_jwks(jwks_uri).await?);

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.as_mut() {
            Some(discovered) => {
                discovered.jwks = jwks.clone();
                Ok(jwks)
            }
            None => NoDiscoveryDocumentSnafu {}.fail(),
        }
    }

    async fn fetch_jwks(&self, jwks_uri: JwkSetEndpoint) -> Result<JwkSet, OAuthError> {
        request::retrieve_jwk_set(&*self.shared.transport, jwks_uri)
            .await
            .inspect_err(|err| {
                tracing::warn!(?err, "Could not load JWK set");
                self.shared.events.publish(OAuthEvent::JwksLoadError {
                    reason: err.to_string(),
                });
            })
            .context(NetworkSnafu {})
    }

    async fn fetch_document(
        &self,
        config: &AuthConfig,
        source: &Url,
    ) -> Result<DiscoveryDocument, OAuthError> {
        snafu::ensure!(
            config.require_https.permits(source),
            DiscoveryValidationSnafu {
                reason: format!("discovery endpoint '{source}' does not use https"),
            }
        );

        let body = request::retrieve_text(&*self.shared.transport, source.clone())
            .await
            .context(NetworkSnafu {})?;
        let document = serde_json::from_str::<DiscoveryDocument>(&body).map_err(|err| {
            DiscoveryFormatSnafu {
                reason: err.to_string(),
            }
            .build()
        })?;

        validate_document(config, &document)?;
        Ok(document)
    }

    pub(crate) fn authorization_endpoint(
        &self,
        config: &AuthConfig,
    ) -> Result<AuthorizationEndpoint, OAuthError> {
        if let Some(login_url) = &config.login_url {
            return Ok(login_url.clone());
        }
        Ok(self
            .document()
            .context(NoDiscoveryDocumentSnafu {})?
            .authorization_endpoint
            .clone())
    }

    pub(crate) fn token_endpoint(&self, config: &AuthConfig) -> Result<TokenEndpoint, OAuthError> {
        match self.document() {
            Some(document) => document.token_endpoint.clone(),
            None => config.token_endpoint.clone(),
        }
        .context(MissingEndpointSnafu {
            endpoint: "token_endpoint",
        })
    }

    pub(crate) fn userinfo_endpoint(
        &self,
        config: &AuthConfig,
    ) -> Result<UserInfoEndpoint, OAuthError> {
        match self.document() {
            Some(document) => document.userinfo_endpoint.clone(),
            None => config.userinfo_endpoint.clone(),
        }
        .context(MissingEndpointSnafu {
            endpoint: "userinfo_endpoint",
        })
    }

    pub(crate) fn end_session_endpoint(&self, config: &AuthConfig) -> Option<EndSessionEndpoint> {
        config
            .logout_url
            .clone()
            .or_else(|| self.document()?.end_session_endpoint.clone())
    }

    pub(crate) fn check_session_iframe(&self) -> Option<Url> {
        self.document()?.check_session_iframe.clone()
    }

    /// The issuer ID tokens must carry. `None` if issuer checks are disabled.
    pub(crate) fn expected_issuer(&self, config: &AuthConfig) -> Option<String> {
        if config.skip_issuer_check {
            return None;
        }
        Some(match self.document() {
            Some(document) => document.issuer.clone(),
            None => config.issuer_str().to_owned(),
        })
    }
}

fn validate_document(config: &AuthConfig, document: &DiscoveryDocument) -> Result<(), OAuthError> {
    if !config.skip_issuer_check {
        snafu::ensure!(
            issuers_match(&document.issuer, config.issuer_str()),
            DiscoveryValidationSnafu {
                reason: format!(
                    "issuer '{}' does not match the configured issuer '{}'",
                    document.issuer,
                    config.issuer_str()
                ),
            }
        );
    }

    for (name, url) in document.endpoints() {
        snafu::ensure!(
            config.require_https.permits(url),
            DiscoveryValidationSnafu {
                reason: format!("{name} '{url}' does not use https"),
            }
        );
        if config.strict_discovery_document_validation {
            let origin = url.origin();
            let trusted = origin == config.issuer.origin()
                || config
                    .trusted_origins
                    .iter()
                    .any(|trusted| trusted.origin() == origin);
            snafu::ensure!(
                trusted,
                DiscoveryValidationSnafu {
                    reason: format!("{name} '{url}' is not served from the issuer's origin"),
                }
            );
        }
    }
    Ok(())
}
