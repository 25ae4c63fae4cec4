use crate::channel::{AttemptId, ChannelRequest, ListenOutcome, MessageChannel, MessageHub};
use crate::error::{ChannelSnafu, OAuthError, SilentRefreshSnafu, SilentRefreshTimeoutSnafu};
use crate::events::OAuthEvent;
use crate::internal::Shared;
use crate::internal::flow::{FlowExecutor, LoginResult, LoginUrlOptions};
use crate::response::ErrorResponse;
use snafu::{OptionExt, ResultExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Renews tokens through a hidden `prompt=none` authorization request.
#[derive(Clone)]
pub(crate) struct SilentRefreshCoordinator {
    shared: Arc<Shared>,
    flow: FlowExecutor,
    channel: Arc<dyn MessageChannel>,
    hub: MessageHub,
    in_flight: Arc<Mutex<Option<AttemptId>>>,
}

impl SilentRefreshCoordinator {
    pub(crate) fn new(
        shared: Arc<Shared>,
        flow: FlowExecutor,
        channel: Arc<dyn MessageChannel>,
        hub: MessageHub,
    ) -> Self {
        Self {
            shared,
            flow,
            channel,
            hub,
            in_flight: Arc::default(),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<AttemptId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one silent refresh. Starting a new one makes a still pending one fail.
    pub(crate) async fn run(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<LoginResult, OAuthError> {
        let result = self.attempt(params).await;
        match &result {
            Ok(_) => {
                tracing::debug!("Silently refreshed tokens");
                self.shared.events.publish(OAuthEvent::SilentlyRefreshed);
            }
            Err(OAuthError::SilentRefreshTimeout) => {
                tracing::warn!("Silent refresh timed out");
                self.shared.events.publish(OAuthEvent::SilentRefreshTimeout);
            }
            Err(err)
                if err
                    .error_response()
                    .is_some_and(ErrorResponse::is_interaction_required) =>
            {
                tracing::info!(%err, "Provider session requires user interaction");
                self.shared.events.publish(OAuthEvent::SilentRefreshError {
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                tracing::warn!(?err, "Silent refresh failed");
                self.shared.events.publish(OAuthEvent::SilentRefreshError {
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    async fn attempt(&self, params: Vec<(String, String)>) -> Result<LoginResult, OAuthError> {
        let config = self.shared.config();
        let redirect_uri = config
            .silent_refresh_redirect_uri
            .clone()
            .context(SilentRefreshSnafu {
                reason: "no silent_refresh_redirect_uri configured",
            })?;
        let id_token_hint = match config.use_id_token_hint_for_silent_refresh {
            true => self.shared.store.id_token(),
            false => None,
        };
        let url = self.flow.build_login_url(&LoginUrlOptions {
            redirect_uri: Some(redirect_uri),
            no_prompt: true,
            params,
            id_token_hint,
            ..LoginUrlOptions::default()
        })?;

        let mut listener = self.hub.listen();
        let id = listener.id();
        let previous = self.in_flight().replace(id);
        if let Some(previous) = previous {
            tracing::debug!(%previous, "Superseding pending silent refresh");
            self.hub.cancel(previous);
        }

        let result = async {
            self.channel
                .send(ChannelRequest::SilentRefresh {
                    correlation_id: id,
                    url,
                })
                .await
                .context(ChannelSnafu {})?;
            match listener.recv(config.advanced.silent_refresh_timeout).await {
                ListenOutcome::Message(message) => {
                    self.flow.handle_implicit_response(&message.payload).await
                }
                ListenOutcome::TimedOut => SilentRefreshTimeoutSnafu {}.fail(),
                ListenOutcome::Cancelled => SilentRefreshSnafu {
                    reason: "superseded or cancelled",
                }
                .fail(),
            }
        }
        .await;

        let mut in_flight = self.in_flight();
        if *in_flight == Some(id) {
            *in_flight = None;
        }
        result
    }

    /// Makes a pending silent refresh fail.
    pub(crate) fn cancel(&self) {
        let in_flight = self.in_flight().take();
        if let Some(id) = in_flight {
            self.hub.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelMessage;
    use crate::config::AuthConfig;
    use crate::internal::discovery::DiscoveryClient;
    use crate::internal::scheduler::ExpirationScheduler;
    use crate::internal::test_support::{
        MockTransport, config, implicit_fragment, recording_channel, shared_with,
    };
    use crate::validation_handler::NullValidationHandler;
    use assertr::prelude::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use url::Url;

    fn silent_config() -> AuthConfig {
        let mut config = config();
        config.login_url = Some(Url::parse("https://idp.example/auth").unwrap());
        config.silent_refresh_redirect_uri =
            Some(Url::parse("https://app.example/silent-refresh.html").unwrap());
        config
    }

    fn coordinator(
        config: AuthConfig,
    ) -> (
        SilentRefreshCoordinator,
        mpsc::UnboundedReceiver<ChannelRequest>,
    ) {
        let shared = shared_with(config, Arc::new(MockTransport::default()));
        let discovery = DiscoveryClient::new(shared.clone());
        let scheduler = ExpirationScheduler::new(shared.clone());
        let flow = FlowExecutor::new(
            shared.clone(),
            discovery,
            scheduler,
            Arc::new(NullValidationHandler),
        );
        let (channel, requests) = recording_channel();
        let coordinator = SilentRefreshCoordinator::new(shared, flow, channel, MessageHub::new());
        (coordinator, requests)
    }

    #[tokio::test]
    async fn answered_refresh_commits_tokens() {
        let (coordinator, mut requests) = coordinator(silent_config());
        let mut events = coordinator.shared.events.subscribe();

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.run(Vec::new()).await }
        });
        let Some(ChannelRequest::SilentRefresh { correlation_id, url }) = requests.recv().await
        else {
            panic!("expected a silent refresh request");
        };
        assert_that(url.query_pairs().any(|(k, v)| k == "prompt" && v == "none")).is_true();
        assert_that(url.query_pairs().any(|(k, v)| {
            k == "redirect_uri" && v == "https://app.example/silent-refresh.html"
        }))
        .is_true();

        let fragment = implicit_fragment(&url, "AT2", "S2");
        assert_that(coordinator.hub.deliver(ChannelMessage::new(correlation_id, fragment)))
            .is_true();

        assert_that(pending.await.unwrap().is_ok()).is_true();
        assert_that(coordinator.shared.store.access_token()).is_equal_to(Some("AT2".to_owned()));
        assert_that(events.drain()).is_equal_to(vec![
            OAuthEvent::TokenReceived,
            OAuthEvent::SilentlyRefreshed,
        ]);
        assert_that(coordinator.hub.len()).is_equal_to(0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_refresh_times_out() {
        let (coordinator, _requests) = coordinator(silent_config());
        let mut events = coordinator.shared.events.subscribe();

        let start = tokio::time::Instant::now();
        let result = coordinator.run(Vec::new()).await;

        assert_that(matches!(result, Err(OAuthError::SilentRefreshTimeout))).is_true();
        assert_that(start.elapsed() >= Duration::from_secs(20)).is_true();
        assert_that(events.drain()).is_equal_to(vec![OAuthEvent::SilentRefreshTimeout]);
        assert_that(coordinator.hub.len()).is_equal_to(0);
    }

    #[tokio::test]
    async fn newer_attempt_supersedes_pending_one() {
        let (coordinator, mut requests) = coordinator(silent_config());

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.run(Vec::new()).await }
        });
        let first_request = requests.recv().await.unwrap();

        let second = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.run(Vec::new()).await }
        });
        let Some(ChannelRequest::SilentRefresh { correlation_id, url }) = requests.recv().await
        else {
            panic!("expected a silent refresh request");
        };
        assert_that(correlation_id).is_not_equal_to(first_request.correlation_id());

        let result = first.await.unwrap();
        assert_that(matches!(result, Err(OAuthError::SilentRefresh { .. }))).is_true();

        coordinator
            .hub
            .deliver(ChannelMessage::new(correlation_id, implicit_fragment(&url, "AT2", "S2")));
        assert_that(second.await.unwrap().is_ok()).is_true();
    }

    #[tokio::test]
    async fn provider_demanding_interaction_fails_the_refresh() {
        let (coordinator, mut requests) = coordinator(silent_config());
        let mut events = coordinator.shared.events.subscribe();

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.run(Vec::new()).await }
        });
        let Some(ChannelRequest::SilentRefresh { correlation_id, url }) = requests.recv().await
        else {
            panic!("expected a silent refresh request");
        };
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let fragment = url::form_urlencoded::Serializer::for_suffix(String::from("#"), 1)
            .append_pair("error", "login_required")
            .append_pair("state", &state)
            .finish();
        coordinator
            .hub
            .deliver(ChannelMessage::new(correlation_id, fragment));

        let err = pending.await.unwrap().unwrap_err();
        assert_that(err.error_response().is_some_and(ErrorResponse::is_interaction_required))
            .is_true();
        assert_that(coordinator.shared.store.take_nonce(&state)).is_none();
        let published = events.drain();
        assert_that(published.last().map(OAuthEvent::event_type))
            .is_equal_to(Some("silent_refresh_error"));
    }

    #[tokio::test]
    async fn refresh_requires_a_redirect_uri() {
        let (coordinator, _requests) = coordinator(config());
        let result = coordinator.run(Vec::new()).await;
        assert_that(matches!(result, Err(OAuthError::SilentRefresh { .. }))).is_true();
    }

    #[tokio::test]
    async fn id_token_hint_is_sent_when_enabled() {
        let mut config = silent_config();
        config.use_id_token_hint_for_silent_refresh = true;
        let (coordinator, mut requests) = coordinator(config);
        coordinator.shared.store.commit(
            &crate::internal::token_store::TokenCommit {
                id_token: Some(crate::internal::token_store::NewToken {
                    value: "ID1".to_owned(),
                    expires_in: None,
                }),
                ..Default::default()
            },
            time::OffsetDateTime::now_utc(),
        );

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.run(Vec::new()).await }
        });
        let Some(ChannelRequest::SilentRefresh { url, .. }) = requests.recv().await else {
            panic!("expected a silent refresh request");
        };
        assert_that(url.query_pairs().any(|(k, v)| k == "id_token_hint" && v == "ID1")).is_true();

        coordinator.cancel();
        assert_that(matches!(pending.await.unwrap(), Err(OAuthError::SilentRefresh { .. })))
            .is_true();
    }
}
