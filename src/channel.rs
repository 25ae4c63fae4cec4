//! Cross-context messaging used by silent refresh and session checks.
//!
//! The runtime sends [`ChannelRequest`]s through a host supplied [`MessageChannel`], e.g. by
//! opening a hidden frame. Answers are handed back through
//! [`OAuthService::deliver_message`](crate::OAuthService::deliver_message) carrying the
//! correlation id of the request they answer. Answers nobody waits for are ignored.

use async_trait::async_trait;
use snafu::Snafu;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use url::Url;

/// Identifies one silent refresh or session check attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl AttemptId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for AttemptId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    /// Load `url` without user interaction and answer with the fragment of the url the
    /// provider finally redirects to.
    SilentRefresh { correlation_id: AttemptId, url: Url },

    /// Post `message` to the provider's check-session frame at `check_session_iframe` and
    /// answer with its reply ("changed", "unchanged" or "error").
    SessionCheck {
        correlation_id: AttemptId,
        check_session_iframe: Url,
        message: String,
    },
}

impl ChannelRequest {
    pub fn correlation_id(&self) -> AttemptId {
        match self {
            ChannelRequest::SilentRefresh { correlation_id, .. }
            | ChannelRequest::SessionCheck { correlation_id, .. } => *correlation_id,
        }
    }
}

/// An answer to a [`ChannelRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub correlation_id: AttemptId,
    pub payload: String,
}

impl ChannelMessage {
    pub fn new(correlation_id: AttemptId, payload: impl Into<String>) -> Self {
        Self {
            correlation_id,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ChannelError {
    #[snafu(display("ChannelError: Could not deliver request: {message}"))]
    Send { message: String },
}

/// Delivers requests to the hidden authentication context.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(&self, request: ChannelRequest) -> Result<(), ChannelError>;
}

type Listeners = HashMap<AttemptId, oneshot::Sender<ChannelMessage>>;

/// Routes inbound messages to the one listener waiting for their correlation id.
#[derive(Debug, Clone, Default)]
pub(crate) struct MessageHub {
    next_id: Arc<AtomicU64>,
    listeners: Arc<Mutex<Listeners>>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ListenOutcome {
    Message(ChannelMessage),
    TimedOut,
    /// The registration was dropped by a newer attempt or a cancellation.
    Cancelled,
}

impl MessageHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener for a fresh attempt id. Dropping the listener unregisters it.
    pub(crate) fn listen(&self) -> Listener {
        let id = AttemptId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (sender, receiver) = oneshot::channel();
        self.lock().insert(id, sender);
        tracing::trace!(%id, "Registered message listener");
        Listener {
            id,
            receiver,
            hub: self.clone(),
        }
    }

    /// Returns whether a listener took the message.
    pub(crate) fn deliver(&self, message: ChannelMessage) -> bool {
        let id = message.correlation_id;
        let Some(sender) = self.lock().remove(&id) else {
            tracing::trace!(%id, "Ignoring message without listener");
            return false;
        };
        match sender.send(message) {
            Ok(()) => true,
            Err(_) => {
                tracing::trace!(%id, "Listener went away before the message arrived");
                false
            }
        }
    }

    /// Drops the registration of `id`, settling its listener as cancelled.
    pub(crate) fn cancel(&self, id: AttemptId) {
        if self.lock().remove(&id).is_some() {
            tracing::trace!(%id, "Cancelled message listener");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// A registration for exactly one inbound message.
#[derive(Debug)]
pub(crate) struct Listener {
    id: AttemptId,
    receiver: oneshot::Receiver<ChannelMessage>,
    hub: MessageHub,
}

impl Listener {
    pub(crate) fn id(&self) -> AttemptId {
        self.id
    }

    pub(crate) async fn recv(&mut self, timeout: Duration) -> ListenOutcome {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(message)) => ListenOutcome::Message(message),
            Ok(Err(_)) => ListenOutcome::Cancelled,
            Err(_) => ListenOutcome::TimedOut,
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.hub.cancel(self.id);
    }
}
