use crate::config::AtHashPolicy;
use crate::time_ext::StdDurationExt;
use crate::token_claims::{IdTokenClaims, IdTokenHeader, ParsedIdToken, StandardIdTokenClaims};
use crate::validation_handler::{SignatureValidationParams, ValidationHandler};
use base64::Engine;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use jsonwebtoken::Algorithm;
use jsonwebtoken::jwk::JwkSet;
use sha2::{Digest, Sha256, Sha384, Sha512};
use snafu::Snafu;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

/// Accepts base64url input with or without trailing padding.
const URL_SAFE_INDIFFERENT: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdTokenValidationReason {
    Expired,
    WrongAudience,
    WrongIssuer,
    NonceMismatch,
    AtHashMismatch,
    BadSignature,
    Malformed,
}

impl IdTokenValidationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            IdTokenValidationReason::Expired => "expired",
            IdTokenValidationReason::WrongAudience => "wrong_audience",
            IdTokenValidationReason::WrongIssuer => "wrong_issuer",
            IdTokenValidationReason::NonceMismatch => "nonce_mismatch",
            IdTokenValidationReason::AtHashMismatch => "at_hash_mismatch",
            IdTokenValidationReason::BadSignature => "bad_signature",
            IdTokenValidationReason::Malformed => "malformed",
        }
    }
}

impl fmt::Display for IdTokenValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("IdTokenValidationError: {reason}: {detail}"))]
pub struct IdTokenValidationError {
    pub reason: IdTokenValidationReason,
    pub detail: String,
}

impl IdTokenValidationError {
    fn new(reason: IdTokenValidationReason, detail: impl Into<String>) -> Self {
        IdTokenValidationSnafu {
            reason,
            detail: detail.into(),
        }
        .build()
    }
}

/// How the `nonce` claim is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonceCheck {
    /// The claim must equal this value.
    Expect(String),

    /// Token-endpoint grants carry no nonce binding.
    Skip,
}

/// Everything the validator compares the token against.
#[derive(Debug, Clone)]
pub struct ValidationContext<'a> {
    /// `None` disables the issuer check.
    pub expected_issuer: Option<&'a str>,
    pub client_id: &'a str,
    pub nonce: NonceCheck,
    pub jwks: Option<&'a JwkSet>,
    pub clock_skew: Duration,
    pub at_hash_policy: AtHashPolicy,
    pub skip_subject_check: bool,
    pub now: OffsetDateTime,
}

/// Compares issuer identifiers, ignoring a trailing slash.
pub(crate) fn issuers_match(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    name: &str,
) -> Result<T, IdTokenValidationError> {
    let bytes = URL_SAFE_INDIFFERENT.decode(segment).map_err(|err| {
        IdTokenValidationError::new(
            IdTokenValidationReason::Malformed,
            format!("{name} is not base64url encoded: {err}"),
        )
    })?;
    serde_json::from_slice(&bytes).map_err(|err| {
        IdTokenValidationError::new(
            IdTokenValidationReason::Malformed,
            format!("{name} is not valid JSON: {err}"),
        )
    })
}

/// Structurally decodes an ID token without checking any of its claims.
pub fn decode_id_token(id_token: &str) -> Result<ParsedIdToken, IdTokenValidationError> {
    let (claims, header) = decode_raw(id_token)?;
    Ok(ParsedIdToken {
        raw: id_token.to_owned(),
        header,
        claims: convert_claims(claims)?,
    })
}

fn decode_raw(
    id_token: &str,
) -> Result<(StandardIdTokenClaims, IdTokenHeader), IdTokenValidationError> {
    let parts = id_token.split('.').collect::<Vec<_>>();
    let [header, claims, _signature] = parts.as_slice() else {
        return Err(IdTokenValidationError::new(
            IdTokenValidationReason::Malformed,
            format!("expected 3 dot-separated parts, got {}", parts.len()),
        ));
    };
    let header = decode_segment::<IdTokenHeader>(header, "header")?;
    let claims = decode_segment::<StandardIdTokenClaims>(claims, "claims")?;
    Ok((claims, header))
}

fn convert_claims(raw: StandardIdTokenClaims) -> Result<IdTokenClaims, IdTokenValidationError> {
    IdTokenClaims::try_from(raw).map_err(|err| {
        IdTokenValidationError::new(IdTokenValidationReason::Malformed, err.to_string())
    })
}

/// Computes the `at_hash` value of `access_token` for a token signed with `alg`.
///
/// This is the base64url encoding of the left-most half of the hash of the access token, using
/// the hash function of the signature algorithm.
pub fn compute_at_hash(access_token: &str, alg: Algorithm) -> String {
    fn left_half(digest: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2])
    }
    match alg {
        Algorithm::HS256 | Algorithm::RS256 | Algorithm::PS256 | Algorithm::ES256 => {
            left_half(&Sha256::digest(access_token.as_bytes()))
        }
        Algorithm::HS384 | Algorithm::RS384 | Algorithm::PS384 | Algorithm::ES384 => {
            left_half(&Sha384::digest(access_token.as_bytes()))
        }
        Algorithm::HS512 | Algorithm::RS512 | Algorithm::PS512 | Algorithm::EdDSA => {
            left_half(&Sha512::digest(access_token.as_bytes()))
        }
    }
}

/// Validates an ID token.
///
/// Checks run in this order and stop at the first failure:
/// structure, time, issuer, audience, nonce, `at_hash`, signature.
pub async fn validate_id_token(
    id_token: &str,
    access_token: Option<&str>,
    context: &ValidationContext<'_>,
    handler: &dyn ValidationHandler,
) -> Result<ParsedIdToken, IdTokenValidationError> {
    use IdTokenValidationReason as Reason;

    let (raw_claims, header) = decode_raw(id_token)?;
    if raw_claims.sub.is_none() && !context.skip_subject_check {
        return Err(IdTokenValidationError::new(
            Reason::Malformed,
            "missing 'sub' claim",
        ));
    }
    tracing::trace!(?header, "Decoded ID token header");

    let now = context.now.unix_timestamp();
    let skew = context.clock_skew.to_time_duration().whole_seconds();
    if raw_claims.exp <= now.saturating_sub(skew) {
        return Err(IdTokenValidationError::new(
            Reason::Expired,
            format!("token expired at {}", raw_claims.exp),
        ));
    }
    if let Some(iat) = raw_claims.iat
        && iat > now.saturating_add(skew)
    {
        return Err(IdTokenValidationError::new(
            Reason::Expired,
            format!("token issued in the future at {iat}"),
        ));
    }

    if let Some(expected_issuer) = context.expected_issuer
        && !issuers_match(&raw_claims.iss, expected_issuer)
    {
        return Err(IdTokenValidationError::new(
            Reason::WrongIssuer,
            format!("expected '{expected_issuer}', got '{}'", raw_claims.iss),
        ));
    }

    let claims = convert_claims(raw_claims)?;

    if !claims.audiences.contains(context.client_id) {
        return Err(IdTokenValidationError::new(
            Reason::WrongAudience,
            format!("'{}' is not among the audiences", context.client_id),
        ));
    }
    if claims.audiences.len() > 1
        && let Some(azp) = &claims.authorized_party
        && azp != context.client_id
    {
        return Err(IdTokenValidationError::new(
            Reason::WrongAudience,
            format!("authorized party '{azp}' is not '{}'", context.client_id),
        ));
    }

    if let NonceCheck::Expect(expected) = &context.nonce
        && claims.nonce.as_deref() != Some(expected.as_str())
    {
        return Err(IdTokenValidationError::new(
            Reason::NonceMismatch,
            "nonce claim does not match the nonce bound to the returned state",
        ));
    }

    if let Some(access_token) = access_token {
        match (context.at_hash_policy, &claims.access_token_hash) {
            (AtHashPolicy::Disabled, _) | (AtHashPolicy::WhenPresent, None) => {}
            (AtHashPolicy::Required, None) => {
                return Err(IdTokenValidationError::new(
                    Reason::AtHashMismatch,
                    "missing 'at_hash' claim",
                ));
            }
            (_, Some(at_hash)) => {
                if compute_at_hash(access_token, header.alg) != *at_hash {
                    return Err(IdTokenValidationError::new(
                        Reason::AtHashMismatch,
                        "access token does not match 'at_hash' claim",
                    ));
                }
            }
        }
    }

    handler
        .validate_signature(&SignatureValidationParams {
            id_token,
            header: &header,
            claims: &claims,
            jwks: context.jwks,
        })
        .await
        .map_err(|err| IdTokenValidationError::new(Reason::BadSignature, err.to_string()))?;

    Ok(ParsedIdToken {
        raw: id_token.to_owned(),
        header,
        claims,
    })
}
