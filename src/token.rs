use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// The token kinds for which expiration is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    AccessToken,
    IdToken,
}

impl TokenKind {
    pub(crate) const ALL: [TokenKind; 2] = [TokenKind::AccessToken, TokenKind::IdToken];

    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::AccessToken => "access_token",
            TokenKind::IdToken => "id_token",
        }
    }
}

/// Declared lifetimes are clamped to `[0, MAX_TOKEN_LIFETIME]`.
pub(crate) const MAX_TOKEN_LIFETIME: Duration = Duration::days(3650);

/// A stored token together with the information needed to compute its expiration.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub value: String,

    /// Point in time this token was committed. A record without one counts as expired.
    pub stored_at: Option<OffsetDateTime>,

    /// Lifetime declared by the provider. A record without one never expires locally.
    pub expires_in: Option<Duration>,
}

impl TokenRecord {
    /// The declared lifetime, clamped to a sane range.
    pub fn lifetime(&self) -> Option<Duration> {
        self.expires_in
            .map(|expires_in| expires_in.clamp(Duration::ZERO, MAX_TOKEN_LIFETIME))
    }

    /// `None` if the token never expires.
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        match (self.stored_at, self.lifetime()) {
            (None, _) => Some(OffsetDateTime::UNIX_EPOCH),
            (Some(_), None) => None,
            // Past the representable range counts as never.
            (Some(stored_at), Some(lifetime)) => stored_at.checked_add(lifetime),
        }
    }

    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at().is_none_or(|expires_at| expires_at > now)
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.is_valid_at(OffsetDateTime::now_utc())
    }
}
