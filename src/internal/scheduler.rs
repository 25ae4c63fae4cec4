use crate::events::OAuthEvent;
use crate::internal::{Shared, TaskHandle};
use crate::time_ext::TimeDurationExt;
use crate::token::{TokenKind, TokenRecord};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use time::OffsetDateTime;

#[derive(Debug, Default)]
struct TimerSlot {
    /// Incremented whenever the slot is re-armed or cleared. A timer only publishes while its
    /// generation is still the current one.
    generation: u64,
    task: Option<TaskHandle>,
}

#[derive(Debug, Default)]
struct TimerSlots {
    access: TimerSlot,
    id: TimerSlot,
}

impl TimerSlots {
    fn slot(&mut self, kind: TokenKind) -> &mut TimerSlot {
        match kind {
            TokenKind::AccessToken => &mut self.access,
            TokenKind::IdToken => &mut self.id,
        }
    }
}

/// Publishes `TokenExpires` and `TokenExpired` for the stored access and ID token.
#[derive(Clone)]
pub(crate) struct ExpirationScheduler {
    shared: Arc<Shared>,
    slots: Arc<Mutex<TimerSlots>>,
}

impl ExpirationScheduler {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            slots: Arc::default(),
        }
    }

    /// Arms one timer per token kind currently holding a valid, expiring token. Timers of all
    /// other kinds are cancelled.
    pub(crate) fn arm_all(&self) {
        for kind in TokenKind::ALL {
            match self.shared.store.valid_token(kind) {
                Some(record) if record.expires_in.is_some() => self.arm(kind, &record),
                _ => self.clear_kind(kind),
            }
        }
    }

    fn arm(&self, kind: TokenKind, record: &TokenRecord) {
        let (Some(stored_at), Some(lifetime), Some(expires_at)) =
            (record.stored_at, record.lifetime(), record.expires_at())
        else {
            self.clear_kind(kind);
            return;
        };
        let advanced = self.shared.config().advanced.clone();
        let now = OffsetDateTime::now_utc();

        let factor = match advanced.timeout_factor {
            factor if factor.is_finite() => factor.clamp(0.0, 1.0),
            _ => 1.0,
        };
        let fires_at = stored_at
            .checked_add(lifetime * factor)
            .unwrap_or(expires_at);
        let timeout = (fires_at - now).to_std_duration();
        let expired_delay = (expires_at - fires_at.max(now))
            .to_std_duration()
            .saturating_add(advanced.expired_grace);

        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.slot(kind);
        slot.generation += 1;
        let generation = slot.generation;

        let shared = self.shared.clone();
        let weak_slots = Arc::downgrade(&self.slots);
        slot.task = Some(TaskHandle::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expires = OAuthEvent::TokenExpires { kind };
            if !publish_if_current(&shared, &weak_slots, kind, generation, expires) {
                return;
            }
            tokio::time::sleep(expired_delay).await;
            let expired = OAuthEvent::TokenExpired { kind };
            publish_if_current(&shared, &weak_slots, kind, generation, expired);
        }));
        tracing::trace!(kind = ?kind, ?timeout, generation, "Armed expiration timer");
    }

    pub(crate) fn clear_kind(&self, kind: TokenKind) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.slot(kind);
        slot.generation += 1;
        if slot.task.take().is_some() {
            tracing::trace!(kind = ?kind, "Cancelled expiration timer");
        }
    }

    pub(crate) fn clear(&self) {
        for kind in TokenKind::ALL {
            self.clear_kind(kind);
        }
    }

    pub(crate) fn is_armed(&self, kind: TokenKind) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .slot(kind)
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

/// Returns whether `generation` still was the current one. The lock is held while publishing,
/// so a concurrent re-arm either happens before (and suppresses the event) or after.
fn publish_if_current(
    shared: &Shared,
    slots: &Weak<Mutex<TimerSlots>>,
    kind: TokenKind,
    generation: u64,
    event: OAuthEvent,
) -> bool {
    let Some(slots) = slots.upgrade() else {
        return false;
    };
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    if slots.slot(kind).generation != generation {
        tracing::trace!(kind = ?kind, generation, "Dropping event of superseded timer");
        return false;
    }
    shared.events.publish(event);
    true
}
