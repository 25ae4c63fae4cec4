use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use time::OffsetDateTime;

/// See: <https://openid.net/specs/openid-connect-core-1_0.html#IDToken>
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub(crate) struct StandardIdTokenClaims {
    pub(crate) iss: String,
    pub(crate) sub: Option<String>,
    pub(crate) aud: RawAudiences,
    pub(crate) exp: i64,
    pub(crate) iat: Option<i64>,
    pub(crate) auth_time: Option<i64>,
    pub(crate) nonce: Option<String>,
    pub(crate) at_hash: Option<String>,
    pub(crate) acr: Option<String>,
    pub(crate) amr: Option<Vec<String>>,
    pub(crate) azp: Option<String>,
    pub(crate) sid: Option<String>,
    #[serde(flatten)]
    pub(crate) remaining: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub(crate) enum RawAudiences {
    Single(String),
    Multiple(Vec<String>),
}

/// Header of a compact-serialized ID token.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IdTokenHeader {
    pub alg: jsonwebtoken::Algorithm,
    pub kid: Option<String>,
    pub typ: Option<String>,
}

/// An ID token that passed validation, in raw and in decoded form.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedIdToken {
    pub raw: String,
    pub header: IdTokenHeader,
    pub claims: IdTokenClaims,
}

/// See: <https://openid.net/specs/openid-connect-core-1_0.html#IDToken>
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IdTokenClaims {
    /// (iss) REQUIRED. Issuer Identifier for the Issuer of the response.
    pub issuer: String,

    /// (sub) REQUIRED. Subject Identifier. Only absent when subject checks were disabled.
    pub subject: Option<String>,

    /// (aud) REQUIRED. Audience(s) that this ID Token is intended for.
    /// It MUST contain the OAuth 2.0 `client_id` of the Relying Party as an audience value.
    pub audiences: Audiences,

    /// (`exp`) REQUIRED. Expiration time on or after which the ID Token MUST NOT be accepted for
    /// processing.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// (`iat`) Time at which the JWT was issued.
    #[serde(with = "time::serde::rfc3339::option")]
    pub issued_at: Option<OffsetDateTime>,

    /// (`auth_time`) Time when the End-User authentication occurred.
    #[serde(with = "time::serde::rfc3339::option")]
    pub auth_time: Option<OffsetDateTime>,

    /// (`nonce`) String value used to associate a Client session with an ID Token, and to
    /// mitigate replay attacks.
    pub nonce: Option<String>,

    /// (`at_hash`) Access Token hash value.
    pub access_token_hash: Option<String>,

    /// (`acr`) Authentication Context Class Reference.
    pub auth_context_class_reference: Option<String>,

    /// (`amr`) Authentication Methods References.
    pub authentication_methods_references: Option<Vec<String>>,

    /// (`azp`) Authorized party - the party to which the ID Token was issued.
    pub authorized_party: Option<String>,

    /// (`sid`) Session ID, as used by front- and back-channel logout.
    pub session_id: Option<String>,

    /// Every other claim, e.g. `email` or `preferred_username`.
    pub additional_claims: HashMap<String, serde_json::Value>,
}

impl IdTokenClaims {
    /// Looks up and deserializes a non-standard claim.
    pub fn claim<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.additional_claims
            .get(name)
            .and_then(|it| serde_json::from_value(it.clone()).ok())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub(crate) enum IdTokenClaimsError {
    #[snafu(display("IdTokenClaimsError: '{claim}' holds an unrepresentable timestamp: {value}"))]
    Timestamp {
        claim: &'static str,
        value: i64,
        source: time::error::ComponentRange,
    },
}

fn timestamp(value: i64, claim: &'static str) -> Result<OffsetDateTime, IdTokenClaimsError> {
    OffsetDateTime::from_unix_timestamp(value).context(TimestampSnafu { claim, value })
}

impl TryFrom<StandardIdTokenClaims> for IdTokenClaims {
    type Error = IdTokenClaimsError;

    fn try_from(raw: StandardIdTokenClaims) -> Result<Self, Self::Error> {
        Ok(Self {
            issuer: raw.iss,
            subject: raw.sub,
            audiences: match raw.aud {
                RawAudiences::Single(s) => Audiences::Single(s),
                RawAudiences::Multiple(m) => Audiences::Multiple(m),
            },
            expires_at: timestamp(raw.exp, "exp")?,
            issued_at: raw.iat.map(|iat| timestamp(iat, "iat")).transpose()?,
            auth_time: raw
                .auth_time
                .map(|auth_time| timestamp(auth_time, "auth_time"))
                .transpose()?,
            nonce: raw.nonce,
            access_token_hash: raw.at_hash,
            auth_context_class_reference: raw.acr,
            authentication_methods_references: raw.amr,
            authorized_party: raw.azp,
            session_id: raw.sid,
            additional_claims: raw.remaining,
        })
    }
}

/// Represents the audience(s) (`aud` claim) from an ID token.
///
/// The `OpenID Connect` specification allows the `audience` to be either a single string
/// or an array of strings. This enum handles both cases.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Audiences {
    /// A single audience value (common case).
    Single(String),

    /// Multiple audience values.
    Multiple(Vec<String>),
}

impl Audiences {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Audiences::Single(single) => std::slice::from_ref(single),
            Audiences::Multiple(multiple) => multiple,
        };
        slice.iter().map(String::as_str)
    }

    pub fn contains(&self, audience: &str) -> bool {
        self.iter().any(|it| it == audience)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
