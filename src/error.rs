use crate::channel::ChannelError;
use crate::request::RequestError;
use crate::response::ErrorResponse;
use crate::token_validation::IdTokenValidationError;
use snafu::Snafu;

/// Every failure an [`OAuthService`](crate::OAuthService) operation can reject with.
///
/// Failures originating from background work (expiration timers, automatic refresh, session
/// checks) are never returned through this type. They are published as
/// [`OAuthEvent`](crate::OAuthEvent)s instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum OAuthError {
    #[snafu(display("OAuthError: Request failed"))]
    Network { source: RequestError },

    #[snafu(display("OAuthError: Discovery document was rejected: {reason}"))]
    DiscoveryValidation { reason: String },

    #[snafu(display("OAuthError: Discovery document is malformed: {reason}"))]
    DiscoveryFormat { reason: String },

    #[snafu(display("OAuthError: ID token was rejected"))]
    IdTokenValidation { source: IdTokenValidationError },

    #[snafu(display("OAuthError: Login response was rejected: {reason}"))]
    LoginResponse { reason: String },

    #[snafu(display("OAuthError: Provider refused the authorization request: {error_response}"))]
    AuthorizationDenied { error_response: ErrorResponse },

    #[snafu(display("OAuthError: Silent refresh timed out"))]
    SilentRefreshTimeout,

    #[snafu(display("OAuthError: Silent refresh failed: {reason}"))]
    SilentRefresh { reason: String },

    #[snafu(display("OAuthError: No refresh token stored"))]
    NoRefreshToken,

    #[snafu(display("OAuthError: No discovery document loaded"))]
    NoDiscoveryDocument,

    #[snafu(display("OAuthError: No '{endpoint}' known"))]
    MissingEndpoint { endpoint: &'static str },

    #[snafu(display("OAuthError: Endpoint '{url}' does not use https"))]
    InsecureEndpoint { url: url::Url },

    #[snafu(display("OAuthError: Operation is not available while 'oidc' is enabled"))]
    OidcModeEnabled,

    #[snafu(display("OAuthError: No valid access token"))]
    NotLoggedIn,

    #[snafu(display("OAuthError: Token endpoint returned an error: {error_response:?}"))]
    TokenEndpoint { error_response: ErrorResponse },

    #[snafu(display("OAuthError: Could not load user profile: {reason}"))]
    UserProfile { reason: String },

    #[snafu(display("OAuthError: Message channel failed"))]
    Channel { source: ChannelError },
}

impl OAuthError {
    /// The error response sent by the provider, if this error carries one.
    pub fn error_response(&self) -> Option<&ErrorResponse> {
        match self {
            OAuthError::TokenEndpoint { error_response }
            | OAuthError::AuthorizationDenied { error_response } => Some(error_response),
            _ => None,
        }
    }
}
