use crate::channel::{ChannelRequest, ListenOutcome, MessageChannel, MessageHub};
use crate::config::AuthConfig;
use crate::events::{EventSubscription, OAuthEvent};
use crate::internal::discovery::DiscoveryClient;
use crate::internal::scheduler::ExpirationScheduler;
use crate::internal::silent_refresh::SilentRefreshCoordinator;
use crate::internal::{Shared, TaskHandle, TaskSlot, clear_local_session};
use crate::token::TokenKind;
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Unchanged,
    Changed,
    Error,
}

/// Everything the polling task needs. Holds no reference to the slot owning that task.
#[derive(Clone)]
struct SessionWorker {
    shared: Arc<Shared>,
    scheduler: ExpirationScheduler,
    silent_refresh: SilentRefreshCoordinator,
    channel: Arc<dyn MessageChannel>,
    hub: MessageHub,
}

/// Polls the provider's check-session frame and reacts to session changes.
#[derive(Clone)]
pub(crate) struct SessionCheckCoordinator {
    discovery: DiscoveryClient,
    worker: SessionWorker,
    polling: TaskSlot,
}

impl SessionCheckCoordinator {
    pub(crate) fn new(
        shared: Arc<Shared>,
        discovery: DiscoveryClient,
        scheduler: ExpirationScheduler,
        silent_refresh: SilentRefreshCoordinator,
        channel: Arc<dyn MessageChannel>,
        hub: MessageHub,
    ) -> Self {
        Self {
            discovery,
            worker: SessionWorker {
                shared,
                scheduler,
                silent_refresh,
                channel,
                hub,
            },
            polling: TaskSlot::default(),
        }
    }

    /// (Re)starts polling. Returns whether polling is running afterwards.
    pub(crate) fn start(&self) -> bool {
        let config = self.worker.shared.config();
        if !config.session_checks_enabled {
            tracing::debug!("Session checks are disabled");
            self.stop();
            return false;
        }
        let Some(check_session_iframe) = self.discovery.check_session_iframe() else {
            tracing::debug!("Provider offers no check_session_iframe. Not checking the session.");
            self.stop();
            return false;
        };

        let worker = self.worker.clone();
        self.polling.replace(TaskHandle::spawn(async move {
            worker.poll(config, check_session_iframe).await;
        }));
        tracing::debug!("Started session checks");
        true
    }

    /// Stops polling, any running change reaction and the pending check.
    pub(crate) fn stop(&self) {
        self.polling.clear();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.polling.is_running()
    }
}

impl SessionWorker {
    async fn poll(self, config: Arc<AuthConfig>, check_session_iframe: Url) {
        let period = config.advanced.session_check_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match self.check(&config, &check_session_iframe).await {
                None | Some(SessionStatus::Unchanged) => {}
                Some(SessionStatus::Changed | SessionStatus::Error) => {
                    if !self.react(&config).await {
                        return;
                    }
                    interval.reset();
                }
            }
        }
    }

    /// `None` if there is no session to check.
    async fn check(&self, config: &AuthConfig, check_session_iframe: &Url) -> Option<SessionStatus> {
        if self.shared.store.valid_token(TokenKind::IdToken).is_none() {
            tracing::trace!("No valid ID token. Skipping session check.");
            return None;
        }
        let session_state = self.shared.store.session_state()?;

        let mut listener = self.hub.listen();
        let request = ChannelRequest::SessionCheck {
            correlation_id: listener.id(),
            check_session_iframe: check_session_iframe.clone(),
            message: format!("{} {session_state}", config.client_id),
        };
        let status = match self.channel.send(request).await {
            Err(err) => {
                tracing::warn!(?err, "Could not send session check");
                SessionStatus::Error
            }
            Ok(()) => match listener.recv(config.advanced.session_check_timeout).await {
                ListenOutcome::Message(message) => match message.payload.trim() {
                    "unchanged" => SessionStatus::Unchanged,
                    "changed" => SessionStatus::Changed,
                    other => {
                        if other != "error" {
                            tracing::warn!(payload = other, "Unexpected session check answer");
                        }
                        SessionStatus::Error
                    }
                },
                ListenOutcome::TimedOut | ListenOutcome::Cancelled => {
                    tracing::warn!("Session check went unanswered");
                    SessionStatus::Error
                }
            },
        };

        self.shared.events.publish(match status {
            SessionStatus::Unchanged => OAuthEvent::SessionUnchanged,
            SessionStatus::Changed => OAuthEvent::SessionChanged,
            SessionStatus::Error => OAuthEvent::SessionError,
        });
        Some(status)
    }

    /// Returns whether the session survived.
    async fn react(&self, config: &AuthConfig) -> bool {
        if config.silent_refresh_redirect_uri.is_some() {
            let mut events = self.shared.events.subscribe();
            let refreshed = tokio::time::timeout(config.advanced.session_change_grace, async {
                tokio::select! {
                    result = self.silent_refresh.run(Vec::new()) => result.is_ok(),
                    () = wait_for_refresh(&mut events) => true,
                }
            })
            .await
            .unwrap_or(false);
            if refreshed {
                tracing::debug!("Session changed, but tokens were refreshed");
                return true;
            }
        }

        tracing::warn!("Session terminated at the provider. Clearing local session.");
        self.shared.events.publish(OAuthEvent::SessionTerminated);
        clear_local_session(&self.shared, &self.scheduler, &self.silent_refresh);
        false
    }
}

async fn wait_for_refresh(events: &mut EventSubscription) {
    loop {
        match events.next().await {
            Some(OAuthEvent::SilentlyRefreshed | OAuthEvent::TokenRefreshed) => return,
            Some(_) => {}
            None => std::future::pending::<()>().await,
        }
    }
}
