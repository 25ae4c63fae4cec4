use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Parameters handed back through the redirect URI fragment after an implicit-flow login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallbackResponse {
    Success(ImplicitLoginResponse),
    Error(CallbackErrorResponse),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct ImplicitLoginResponse {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<i64>,
    pub state: Option<String>,
    pub session_state: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallbackErrorResponse {
    pub error: ErrorResponse,
    pub state: Option<String>,
}

impl CallbackResponse {
    /// Parses a URL fragment. A leading `#` or `?` is optional.
    pub(crate) fn from_fragment(fragment: &str) -> Self {
        let fragment = fragment
            .strip_prefix('#')
            .or_else(|| fragment.strip_prefix('?'))
            .unwrap_or(fragment);
        let mut map: HashMap<String, String> = url::form_urlencoded::parse(fragment.as_bytes())
            .into_owned()
            .collect();

        if let Some(error) = map.remove("error") {
            return CallbackResponse::Error(CallbackErrorResponse {
                error: ErrorResponse {
                    error: OidcErrorCode::parse(error),
                    error_description: map.remove("error_description"),
                    error_uri: map.remove("error_uri"),
                },
                state: map.remove("state"),
            });
        }

        let expires_in = map.remove("expires_in").and_then(|raw| {
            raw.parse::<i64>()
                .inspect_err(|err| {
                    tracing::warn!(?err, raw, "Could not parse 'expires_in' parameter. Ignoring it.");
                })
                .ok()
        });

        CallbackResponse::Success(ImplicitLoginResponse {
            access_token: map.remove("access_token"),
            id_token: map.remove("id_token"),
            expires_in,
            state: map.remove("state"),
            session_state: map.remove("session_state"),
            scope: map.remove("scope"),
        })
    }
}

/// An enumeration representing the response to token requests, including
/// success and error responses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub(crate) enum TokenResponse {
    Success(SuccessTokenResponse),
    Error(ErrorResponse),
}

/// A structure representing a successful token response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct SuccessTokenResponse {
    pub access_token: String,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub id_token: Option<String>,
    pub session_state: Option<String>,
    pub scope: Option<String>,
}

/// See [RFC 6749 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6749#section-5.2) and
/// [OpenID Connect Core Section 3.1.2.6](https://openid.net/specs/openid-connect-core-1_0.html#AuthError)
/// for details.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum KnownOidcErrorCode {
    /// The request is missing a required parameter, includes an unsupported parameter value
    /// (other than grant type), repeats a parameter, includes multiple credentials,
    /// utilizes more than one mechanism for authenticating the client, or is otherwise malformed.
    #[serde(rename = "invalid_request")]
    InvalidRequest,

    /// Client authentication failed (e.g., unknown client, no client authentication included,
    /// or unsupported authentication method).
    #[serde(rename = "invalid_client")]
    InvalidClient,

    /// The provided authorization grant (e.g., resource owner credentials) or refresh token is
    /// invalid, expired, revoked, does not match the redirection URI used in the authorization
    /// request, or was issued to another client.
    #[serde(rename = "invalid_grant")]
    InvalidGrant,

    /// The authenticated client is not authorized to use this authorization grant type.
    #[serde(rename = "unauthorized_client")]
    UnauthorizedClient,

    /// The authorization grant type is not supported by the authorization server.
    #[serde(rename = "unsupported_grant_type")]
    UnsupportedGrantType,

    /// The requested scope is invalid, unknown, malformed, or exceeds the scope granted by the
    /// resource owner.
    #[serde(rename = "invalid_scope")]
    InvalidScope,

    /// The resource owner or authorization server denied the request.
    #[serde(rename = "access_denied")]
    AccessDenied,

    /// The authorization server does not support obtaining a token using this method.
    #[serde(rename = "unsupported_response_type")]
    UnsupportedResponseType,

    #[serde(rename = "server_error")]
    ServerError,

    #[serde(rename = "temporarily_unavailable")]
    TemporarilyUnavailable,

    /// The authorization server requires end-user interaction of some form to proceed.
    /// Returned when `prompt=none` was requested.
    #[serde(rename = "interaction_required")]
    InteractionRequired,

    /// The authorization server requires end-user authentication.
    /// Returned when `prompt=none` was requested but the user is not logged in.
    #[serde(rename = "login_required")]
    LoginRequired,

    #[serde(rename = "account_selection_required")]
    AccountSelectionRequired,

    #[serde(rename = "consent_required")]
    ConsentRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OidcErrorCode {
    Known(KnownOidcErrorCode),
    Unknown(String),
}

impl OidcErrorCode {
    pub(crate) fn parse(error: String) -> Self {
        serde_json::from_value(serde_json::Value::String(error.clone()))
            .unwrap_or(OidcErrorCode::Unknown(error))
    }
}

/// OAuth/OIDC error response received from the identity provider.
///
/// Errors follow the OAuth 2.0 error response format.
///
/// See [RFC 6749 Section 5.2](https://datatracker.ietf.org/doc/html/rfc6749#section-5.2) for details.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    /// The error code (e.g., `invalid_client` or `invalid_grant`).
    pub error: OidcErrorCode,

    /// OPTIONAL. Human-readable ASCII text providing additional information, used to assist the
    /// client developer in understanding the error that occurred.
    pub error_description: Option<String>,

    /// OPTIONAL. A URI identifying a human-readable web page with information about the error.
    pub error_uri: Option<String>,
}

impl ErrorResponse {
    /// Check if this error likely indicates the session has ended, regardless of the specific
    /// error description. Any `invalid_grant` error suggests the session or token is no longer
    /// valid.
    pub fn is_likely_session_ended(&self) -> bool {
        self.error == OidcErrorCode::Known(KnownOidcErrorCode::InvalidGrant)
    }

    /// Check if the provider refused a `prompt=none` authentication, as happens during silent
    /// refresh when no provider session exists.
    pub fn is_interaction_required(&self) -> bool {
        matches!(
            self.error,
            OidcErrorCode::Known(
                KnownOidcErrorCode::InteractionRequired
                    | KnownOidcErrorCode::LoginRequired
                    | KnownOidcErrorCode::AccountSelectionRequired
                    | KnownOidcErrorCode::ConsentRequired
            )
        )
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error {
            OidcErrorCode::Known(known) => {
                let code = serde_json::to_value(known)
                    .ok()
                    .and_then(|it| it.as_str().map(str::to_owned))
                    .unwrap_or_else(|| format!("{known:?}"));
                f.write_str(&code)?;
            }
            OidcErrorCode::Unknown(code) => f.write_str(code)?,
        }
        if let Some(description) = &self.error_description {
            write!(f, ": {description}")?;
        }
        Ok(())
    }
}
