use crate::storage::{OAuthStorage, TypedStorage};
use crate::token::{MAX_TOKEN_LIFETIME, TokenKind, TokenRecord};
use crate::{AccessToken, RefreshToken, SessionState};
use codee::string::{FromToStringCodec, JsonSerdeCodec};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use time::{Duration, OffsetDateTime};

const REFRESH_TOKEN: &str = "refresh_token";
const SESSION_STATE: &str = "session_state";
const NONCES: &str = "nonces";

/// Logins started but never completed leave their nonce behind. Only the most recent ones
/// are kept.
const MAX_PENDING_NONCES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct StoredAt(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

/// Nonces keyed by the `state` they were sent with, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PendingNonces(Vec<(String, String)>);

fn value_key(kind: TokenKind) -> &'static str {
    kind.as_str()
}

fn stored_at_key(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::AccessToken => "access_token_stored_at",
        TokenKind::IdToken => "id_token_stored_at",
    }
}

fn expires_in_key(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::AccessToken => "access_token_expires_in",
        TokenKind::IdToken => "id_token_expires_in",
    }
}

/// A token to commit together with its lifetime.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewToken {
    pub value: String,
    pub expires_in: Option<Duration>,
}

/// Everything a successful flow produced. Absent parts leave stored values untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TokenCommit {
    pub access_token: Option<NewToken>,
    pub id_token: Option<NewToken>,
    pub refresh_token: Option<RefreshToken>,
    pub session_state: Option<SessionState>,
}

/// Owns everything the runtime persists.
#[derive(Clone)]
pub(crate) struct TokenStore {
    storage: TypedStorage,
    nonce_lock: Arc<Mutex<()>>,
}

impl TokenStore {
    pub(crate) fn new(storage: Arc<dyn OAuthStorage>, prefix: &str) -> Self {
        Self {
            storage: TypedStorage::new(storage, prefix),
            nonce_lock: Arc::default(),
        }
    }

    pub(crate) fn token(&self, kind: TokenKind) -> Option<TokenRecord> {
        let value = self
            .storage
            .read::<String, FromToStringCodec>(value_key(kind))?;
        let stored_at = self
            .storage
            .read::<StoredAt, JsonSerdeCodec>(stored_at_key(kind))
            .map(|it| it.0);
        let expires_in = self
            .storage
            .read::<i64, FromToStringCodec>(expires_in_key(kind))
            .map(Duration::seconds);
        Some(TokenRecord {
            value,
            stored_at,
            expires_in,
        })
    }

    pub(crate) fn valid_token(&self, kind: TokenKind) -> Option<TokenRecord> {
        self.token(kind).filter(TokenRecord::is_valid)
    }

    pub(crate) fn access_token(&self) -> Option<AccessToken> {
        self.token(TokenKind::AccessToken).map(|it| it.value)
    }

    pub(crate) fn id_token(&self) -> Option<String> {
        self.token(TokenKind::IdToken).map(|it| it.value)
    }

    pub(crate) fn refresh_token(&self) -> Option<RefreshToken> {
        self.storage.read::<String, FromToStringCodec>(REFRESH_TOKEN)
    }

    pub(crate) fn remove_refresh_token(&self) {
        self.storage.remove(REFRESH_TOKEN);
    }

    pub(crate) fn session_state(&self) -> Option<SessionState> {
        self.storage.read::<String, FromToStringCodec>(SESSION_STATE)
    }

    fn store_token(&self, kind: TokenKind, token: &NewToken, now: OffsetDateTime) {
        self.storage
            .write::<String, FromToStringCodec>(value_key(kind), &token.value);
        self.storage
            .write::<StoredAt, JsonSerdeCodec>(stored_at_key(kind), &StoredAt(now));
        match token.expires_in {
            Some(expires_in) => {
                let lifetime = expires_in.clamp(Duration::ZERO, MAX_TOKEN_LIFETIME);
                if lifetime != expires_in {
                    tracing::warn!(kind = ?kind, %expires_in, %lifetime, "Clamped token lifetime");
                }
                self.storage.write::<i64, FromToStringCodec>(
                    expires_in_key(kind),
                    &lifetime.whole_seconds(),
                )
            }
            None => self.storage.remove(expires_in_key(kind)),
        }
    }

    fn remove_token(&self, kind: TokenKind) {
        self.storage.remove(value_key(kind));
        self.storage.remove(stored_at_key(kind));
        self.storage.remove(expires_in_key(kind));
    }

    pub(crate) fn commit(&self, commit: &TokenCommit, now: OffsetDateTime) {
        if let Some(access_token) = &commit.access_token {
            self.store_token(TokenKind::AccessToken, access_token, now);
        }
        if let Some(id_token) = &commit.id_token {
            self.store_token(TokenKind::IdToken, id_token, now);
        }
        if let Some(refresh_token) = &commit.refresh_token {
            self.storage
                .write::<String, FromToStringCodec>(REFRESH_TOKEN, refresh_token);
        }
        if let Some(session_state) = &commit.session_state {
            self.storage
                .write::<String, FromToStringCodec>(SESSION_STATE, session_state);
        }
        tracing::trace!(
            access_token = commit.access_token.is_some(),
            id_token = commit.id_token.is_some(),
            refresh_token = commit.refresh_token.is_some(),
            "Committed tokens"
        );
    }

    /// Binds `nonce` to `state` until the response carrying `state` arrives.
    pub(crate) fn store_nonce(&self, state: &str, nonce: &str) {
        let _guard = self.nonce_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut nonces = self
            .storage
            .read::<PendingNonces, JsonSerdeCodec>(NONCES)
            .unwrap_or_default();
        nonces.0.retain(|(it, _)| it != state);
        nonces.0.push((state.to_owned(), nonce.to_owned()));
        let overflow = nonces.0.len().saturating_sub(MAX_PENDING_NONCES);
        nonces.0.drain(..overflow);
        self.storage.write::<PendingNonces, JsonSerdeCodec>(NONCES, &nonces);
    }

    /// Removes and returns the nonce bound to `state`. Each nonce can only be taken once.
    pub(crate) fn take_nonce(&self, state: &str) -> Option<String> {
        let _guard = self.nonce_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut nonces = self.storage.read::<PendingNonces, JsonSerdeCodec>(NONCES)?;
        let position = nonces.0.iter().position(|(it, _)| it == state)?;
        let (_, nonce) = nonces.0.remove(position);
        match nonces.0.is_empty() {
            true => self.storage.remove(NONCES),
            false => self.storage.write::<PendingNonces, JsonSerdeCodec>(NONCES, &nonces),
        }
        Some(nonce)
    }

    /// Removes tokens and the session state. Pending nonces survive, so that a login started
    /// before can still complete.
    pub(crate) fn clear(&self) {
        for kind in TokenKind::ALL {
            self.remove_token(kind);
        }
        self.storage.remove(REFRESH_TOKEN);
        self.storage.remove(SESSION_STATE);
        tracing::trace!("Cleared stored tokens");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use assertr::prelude::*;

    fn store() -> (Arc<MemoryStorage>, TokenStore) {
        let memory = Arc::new(MemoryStorage::new());
        (memory.clone(), TokenStore::new(memory, "test__"))
    }

    fn new_token(value: &str, expires_in: Option<i64>) -> NewToken {
        NewToken {
            value: value.to_owned(),
            expires_in: expires_in.map(Duration::seconds),
        }
    }

    #[test]
    fn committed_tokens_are_read_back() {
        let (_, store) = store();
        let now = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap();
        store.commit(
            &TokenCommit {
                access_token: Some(new_token("AT1", Some(3600))),
                id_token: Some(new_token("ID1", None)),
                refresh_token: Some("RT1".to_owned()),
                session_state: Some("S".to_owned()),
            },
            now,
        );

        assert_that(store.token(TokenKind::AccessToken)).is_equal_to(Some(TokenRecord {
            value: "AT1".to_owned(),
            stored_at: Some(now),
            expires_in: Some(Duration::seconds(3600)),
        }));
        assert_that(store.id_token()).is_equal_to(Some("ID1".to_owned()));
        assert_that(store.token(TokenKind::IdToken).unwrap().expires_in).is_none();
        assert_that(store.refresh_token()).is_equal_to(Some("RT1".to_owned()));
        assert_that(store.session_state()).is_equal_to(Some("S".to_owned()));
    }

    #[test]
    fn partial_commit_keeps_refresh_token() {
        let (_, store) = store();
        let now = OffsetDateTime::now_utc();
        store.commit(
            &TokenCommit {
                access_token: Some(new_token("AT1", Some(60))),
                refresh_token: Some("RT1".to_owned()),
                ..TokenCommit::default()
            },
            now,
        );
        store.commit(
            &TokenCommit {
                access_token: Some(new_token("AT2", Some(60))),
                ..TokenCommit::default()
            },
            now,
        );

        assert_that(store.access_token()).is_equal_to(Some("AT2".to_owned()));
        assert_that(store.refresh_token()).is_equal_to(Some("RT1".to_owned()));
    }

    #[test]
    fn token_without_stored_at_is_not_valid() {
        let (memory, store) = store();
        memory.set_item("test__access_token", "AT1".to_owned());
        memory.set_item("test__access_token_expires_in", "3600".to_owned());

        assert_that(store.token(TokenKind::AccessToken).unwrap().stored_at).is_none();
        assert_that(store.valid_token(TokenKind::AccessToken)).is_none();
    }

    #[test]
    fn nonces_are_single_use() {
        let (_, store) = store();
        store.store_nonce("S1", "N1");
        store.store_nonce("S2", "N2");

        assert_that(store.take_nonce("S1")).is_equal_to(Some("N1".to_owned()));
        assert_that(store.take_nonce("S1")).is_none();
        assert_that(store.take_nonce("unknown")).is_none();
        assert_that(store.take_nonce("S2")).is_equal_to(Some("N2".to_owned()));
    }

    #[test]
    fn only_recent_nonces_are_kept() {
        let (_, store) = store();
        for i in 0..=MAX_PENDING_NONCES {
            store.store_nonce(&format!("S{i}"), &format!("N{i}"));
        }
        assert_that(store.take_nonce("S0")).is_none();
        assert_that(store.take_nonce(&format!("S{MAX_PENDING_NONCES}")))
            .is_equal_to(Some(format!("N{MAX_PENDING_NONCES}")));
    }

    #[test]
    fn clear_removes_tokens_but_keeps_pending_nonces() {
        let (memory, store) = store();
        store.store_nonce("S1", "N1");
        store.commit(
            &TokenCommit {
                access_token: Some(new_token("AT1", Some(60))),
                id_token: Some(new_token("ID1", Some(60))),
                refresh_token: Some("RT1".to_owned()),
                session_state: Some("S".to_owned()),
            },
            OffsetDateTime::now_utc(),
        );

        store.clear();

        assert_that(memory.len()).is_equal_to(1);
        assert_that(store.take_nonce("S1")).is_equal_to(Some("N1".to_owned()));
    }
}
