use crate::token::TokenKind;
use crate::token_validation::IdTokenValidationReason;
use tokio::sync::broadcast;

/// Lifecycle notifications published by the runtime.
///
/// Failures of background work (timers, automatic refresh, session checks) are only ever
/// reported through these events.
#[derive(Debug, Clone, PartialEq)]
pub enum OAuthEvent {
    DiscoveryDocumentLoaded,
    DiscoveryDocumentLoadError { reason: String },
    DiscoveryDocumentValidationError { reason: String },
    JwksLoadError { reason: String },
    InvalidNonceInState,
    TokenReceived,
    TokenRefreshed,
    TokenRefreshError { reason: String },
    TokenError { reason: String },
    TokenValidationError { reason: IdTokenValidationReason },
    TokenExpires { kind: TokenKind },
    TokenExpired { kind: TokenKind },
    SilentlyRefreshed,
    SilentRefreshError { reason: String },
    SilentRefreshTimeout,
    SessionChanged,
    SessionUnchanged,
    SessionError,
    SessionTerminated,
    UserProfileLoaded,
    UserProfileLoadError { reason: String },
    Logout,
}

impl OAuthEvent {
    /// Stable, snake_case name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            OAuthEvent::DiscoveryDocumentLoaded => "discovery_document_loaded",
            OAuthEvent::DiscoveryDocumentLoadError { .. } => "discovery_document_load_error",
            OAuthEvent::DiscoveryDocumentValidationError { .. } => {
                "discovery_document_validation_error"
            }
            OAuthEvent::JwksLoadError { .. } => "jwks_load_error",
            OAuthEvent::InvalidNonceInState => "invalid_nonce_in_state",
            OAuthEvent::TokenReceived => "token_received",
            OAuthEvent::TokenRefreshed => "token_refreshed",
            OAuthEvent::TokenRefreshError { .. } => "token_refresh_error",
            OAuthEvent::TokenError { .. } => "token_error",
            OAuthEvent::TokenValidationError { .. } => "token_validation_error",
            OAuthEvent::TokenExpires { .. } => "token_expires",
            OAuthEvent::TokenExpired { .. } => "token_expired",
            OAuthEvent::SilentlyRefreshed => "silently_refreshed",
            OAuthEvent::SilentRefreshError { .. } => "silent_refresh_error",
            OAuthEvent::SilentRefreshTimeout => "silent_refresh_timeout",
            OAuthEvent::SessionChanged => "session_changed",
            OAuthEvent::SessionUnchanged => "session_unchanged",
            OAuthEvent::SessionError => "session_error",
            OAuthEvent::SessionTerminated => "session_terminated",
            OAuthEvent::UserProfileLoaded => "user_profile_loaded",
            OAuthEvent::UserProfileLoadError { .. } => "user_profile_load_error",
            OAuthEvent::Logout => "logout",
        }
    }

    pub(crate) fn is_error(&self) -> bool {
        matches!(
            self,
            OAuthEvent::DiscoveryDocumentLoadError { .. }
                | OAuthEvent::DiscoveryDocumentValidationError { .. }
                | OAuthEvent::JwksLoadError { .. }
                | OAuthEvent::InvalidNonceInState
                | OAuthEvent::TokenRefreshError { .. }
                | OAuthEvent::TokenError { .. }
                | OAuthEvent::TokenValidationError { .. }
                | OAuthEvent::SilentRefreshError { .. }
                | OAuthEvent::SilentRefreshTimeout
                | OAuthEvent::SessionError
                | OAuthEvent::UserProfileLoadError { .. }
        )
    }
}

/// Multicast event stream. Subscribers only observe events published after they subscribed.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OAuthEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub(crate) fn publish(&self, event: OAuthEvent) {
        match event.is_error() {
            true => tracing::debug!(event = event.event_type(), ?event, "Publishing event"),
            false => tracing::trace!(event = event.event_type(), "Publishing event"),
        }
        if self.sender.send(event).is_err() {
            tracing::trace!("No subscribers for published event");
        }
    }
}

/// Receiving half of the event stream.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<OAuthEvent>,
}

impl EventSubscription {
    /// Waits for the next event. Returns `None` once the runtime was dropped.
    ///
    /// A subscriber which fell behind skips the events it missed.
    pub async fn next(&mut self) -> Option<OAuthEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already published event without waiting.
    pub fn try_next(&mut self) -> Option<OAuthEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged behind");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Drains all events published so far.
    pub fn drain(&mut self) -> Vec<OAuthEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
