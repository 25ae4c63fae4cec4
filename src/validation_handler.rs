use crate::token_claims::{IdTokenClaims, IdTokenHeader};
use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use snafu::{OptionExt, ResultExt, Snafu};

/// Input of a signature check. Claims were already checked when this is called.
#[derive(Debug, Clone, Copy)]
pub struct SignatureValidationParams<'a> {
    pub id_token: &'a str,
    pub header: &'a IdTokenHeader,
    pub claims: &'a IdTokenClaims,
    pub jwks: Option<&'a JwkSet>,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SignatureError {
    #[snafu(display("SignatureError: No JWK set loaded"))]
    NoJwkSet,

    #[snafu(display(
        "SignatureError: Could not find a JWK which would match the tokens 'kid': {token_kid:?}"
    ))]
    NoMatchingJwk { token_kid: Option<String> },

    #[snafu(display("SignatureError: Could not construct DecodingKey from JWK"))]
    JwkToDecodingKey { source: jsonwebtoken::errors::Error },

    #[snafu(display("SignatureError: Could not verify JWT: {source}"))]
    Verify { source: jsonwebtoken::errors::Error },

    #[snafu(display("SignatureError: {reason}"))]
    Rejected { reason: String },
}

/// Verifies the signature of an ID token.
#[async_trait]
pub trait ValidationHandler: Send + Sync {
    async fn validate_signature(
        &self,
        params: &SignatureValidationParams<'_>,
    ) -> Result<(), SignatureError>;
}

/// Verifies signatures against the provider's JWK set.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwksValidationHandler;

impl JwksValidationHandler {
    fn find_jwk<'a>(jwk_set: &'a JwkSet, header: &IdTokenHeader) -> Result<&'a Jwk, SignatureError> {
        let jwk = match &header.kid {
            Some(kid) => jwk_set.find(kid),
            // Without a 'kid', only an unambiguous key set can be used.
            None => match jwk_set.keys.as_slice() {
                [single] => Some(single),
                _ => None,
            },
        };
        jwk.context(NoMatchingJwkSnafu {
            token_kid: header.kid.clone(),
        })
    }
}

#[async_trait]
impl ValidationHandler for JwksValidationHandler {
    async fn validate_signature(
        &self,
        params: &SignatureValidationParams<'_>,
    ) -> Result<(), SignatureError> {
        let jwk_set = params.jwks.context(NoJwkSetSnafu {})?;
        let jwk = Self::find_jwk(jwk_set, params.header)?;
        let decoding_key =
            jsonwebtoken::DecodingKey::from_jwk(jwk).context(JwkToDecodingKeySnafu {})?;

        // Claims were checked before. Only the signature is of interest here.
        let mut validation = jsonwebtoken::Validation::new(params.header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        tracing::trace!(kid = ?params.header.kid, alg = ?params.header.alg, "Verifying ID token signature");
        jsonwebtoken::decode::<serde_json::Value>(params.id_token, &decoding_key, &validation)
            .context(VerifySnafu {})?;
        Ok(())
    }
}

/// Accepts every signature.
///
/// Only use this when tokens reach the client through a channel which already authenticates
/// the provider, or in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullValidationHandler;

#[async_trait]
impl ValidationHandler for NullValidationHandler {
    async fn validate_signature(
        &self,
        _params: &SignatureValidationParams<'_>,
    ) -> Result<(), SignatureError> {
        tracing::trace!("Skipping ID token signature verification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_validation::decode_id_token;
    use assertr::prelude::*;
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use jsonwebtoken::{Algorithm, EncodingKey, Header};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn jwk_set(kid: &str, secret: &[u8]) -> JwkSet {
        serde_json::from_value(serde_json::json!({
            "keys": [{"kty": "oct", "kid": kid, "alg": "HS256", "k": URL_SAFE_NO_PAD.encode(secret)}]
        }))
        .unwrap()
    }

    fn signed_token(kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_owned);
        let claims = serde_json::json!({
            "iss": "https://idp.example",
            "sub": "user-1",
            "aud": "app",
            "exp": 0,
        });
        jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    async fn check(token: &str, jwks: Option<&JwkSet>) -> Result<(), SignatureError> {
        let parsed = decode_id_token(token).unwrap();
        JwksValidationHandler
            .validate_signature(&SignatureValidationParams {
                id_token: token,
                header: &parsed.header,
                claims: &parsed.claims,
                jwks,
            })
            .await
    }

    #[tokio::test]
    async fn accepts_signature_of_matching_key() {
        let token = signed_token(Some("k1"));
        let result = check(&token, Some(&jwk_set("k1", SECRET))).await;
        assert_that(result.is_ok()).is_true();
    }

    #[tokio::test]
    async fn accepts_token_without_kid_if_set_is_unambiguous() {
        let token = signed_token(None);
        let result = check(&token, Some(&jwk_set("k1", SECRET))).await;
        assert_that(result.is_ok()).is_true();
    }

    #[tokio::test]
    async fn rejects_signature_of_other_key() {
        let token = signed_token(Some("k1"));
        let result = check(&token, Some(&jwk_set("k1", b"another secret, another secret!!"))).await;
        assert_that(matches!(result, Err(SignatureError::Verify { .. }))).is_true();
    }

    #[tokio::test]
    async fn rejects_unknown_kid_and_missing_set() {
        let token = signed_token(Some("k2"));
        let result = check(&token, Some(&jwk_set("k1", SECRET))).await;
        assert_that(matches!(result, Err(SignatureError::NoMatchingJwk { .. }))).is_true();

        let result = check(&token, None).await;
        assert_that(matches!(result, Err(SignatureError::NoJwkSet))).is_true();
    }
}
