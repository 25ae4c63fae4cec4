//! OAuth2 / OpenID Connect client runtime.
//!
//! Drives the implicit and password grant flows, validates ID tokens, keeps tokens fresh through
//! expiration timers and silent re-authentication, and detects provider-side session changes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use oidc_token_runtime::{
//!     AuthConfig, Collaborators, OAuthEvent, OAuthService, channel::{ChannelError, ChannelRequest, MessageChannel},
//!     url::Url,
//! };
//!
//! struct HiddenFrame;
//!
//! #[async_trait::async_trait]
//! impl MessageChannel for HiddenFrame {
//!     async fn send(&self, request: ChannelRequest) -> Result<(), ChannelError> {
//!         // Open a hidden frame / post a message and later feed the answer into
//!         // `OAuthService::deliver_message`.
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), oidc_token_runtime::OAuthError> {
//! let config = AuthConfig::new(
//!     Url::parse("https://idp.example").unwrap(),
//!     "my-client",
//!     Url::parse("https://app.example/callback").unwrap(),
//! );
//! let service = OAuthService::new(config, Collaborators::new(Arc::new(HiddenFrame)));
//! let mut events = service.events();
//!
//! service.load_discovery_document(None).await?;
//! let login_url = service.login_url(Default::default())?;
//! // Navigate to `login_url`, then hand the callback fragment back:
//! let result = service.try_login("#access_token=...&id_token=...&state=...").await?;
//!
//! while let Some(event) = events.next().await {
//!     if let OAuthEvent::TokenExpires { .. } = event {
//!         service.silent_refresh(Vec::new()).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
mod config;
mod error;
mod events;
mod internal;
mod login;
mod logout;
mod nonce;
mod request;
mod response;
mod service;
pub mod storage;
mod time_ext;
mod token;
mod token_claims;
mod token_validation;
mod validation_handler;

// Library exports (additional to pub modules).
pub use config::*;
pub use error::*;
pub use events::*;
pub use internal::discovery::{Discovered, DiscoveryDocument};
pub use internal::flow::{LoginResult, LoginUrlOptions};
pub use nonce::Nonce;
pub use request::{HttpRequest, HttpResponse, RequestError, ReqwestTransport, Transport, TransportError};
pub use response::{ErrorResponse, KnownOidcErrorCode, OidcErrorCode};
pub use service::*;
pub use token::{TokenKind, TokenRecord};
pub use token_claims::{Audiences, IdTokenClaims, IdTokenHeader, ParsedIdToken};
pub use token_validation::{
    IdTokenValidationError, IdTokenValidationReason, NonceCheck, ValidationContext, compute_at_hash,
    decode_id_token, validate_id_token,
};
pub use validation_handler::{
    JwksValidationHandler, NullValidationHandler, SignatureError, SignatureValidationParams,
    ValidationHandler,
};
pub mod url {
    pub use url::Url;
}
pub mod http {
    pub use http::HeaderMap;
}
pub mod jwk {
    pub use jsonwebtoken::jwk::JwkSet;
}

type DiscoveryEndpoint = url::Url;
type JwkSetEndpoint = url::Url;
type AuthorizationEndpoint = url::Url;
type TokenEndpoint = url::Url;
type UserInfoEndpoint = url::Url;
type EndSessionEndpoint = url::Url;

type SessionState = String;
type AccessToken = String;
type RefreshToken = String;
