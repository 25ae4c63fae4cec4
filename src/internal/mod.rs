use crate::config::AuthConfig;
use crate::events::{EventBus, OAuthEvent};
use crate::internal::scheduler::ExpirationScheduler;
use crate::internal::silent_refresh::SilentRefreshCoordinator;
use crate::internal::token_store::TokenStore;
use crate::request::Transport;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

pub(crate) mod discovery;
pub(crate) mod flow;
pub(crate) mod scheduler;
pub(crate) mod session_check;
pub(crate) mod silent_refresh;
pub(crate) mod token_store;

/// State every component reads and writes.
pub(crate) struct Shared {
    config: RwLock<Arc<AuthConfig>>,
    pub(crate) events: EventBus,
    pub(crate) store: TokenStore,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Shared {
    pub(crate) fn new(
        config: AuthConfig,
        store: TokenStore,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let events = EventBus::new(config.advanced.event_capacity);
        Self {
            config: RwLock::new(Arc::new(config)),
            events,
            store,
            transport,
        }
    }

    /// Snapshot of the current configuration.
    pub(crate) fn config(&self) -> Arc<AuthConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_config(&self, config: AuthConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }
}

/// A spawned task which is aborted when this handle is dropped.
#[derive(Debug)]
pub(crate) struct TaskHandle(tokio::task::JoinHandle<()>);

impl TaskHandle {
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self(tokio::spawn(future))
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Holds at most one running task. Replacing or clearing it aborts the previous one.
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskSlot(Arc<Mutex<Option<TaskHandle>>>);

impl TaskSlot {
    pub(crate) fn replace(&self, task: TaskHandle) {
        let previous = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        drop(previous);
    }

    pub(crate) fn clear(&self) {
        let previous = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(previous);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

/// Forgets every locally known token, stops timers and pending silent refreshes, then
/// publishes `Logout`.
pub(crate) fn clear_local_session(
    shared: &Shared,
    scheduler: &ExpirationScheduler,
    silent_refresh: &SilentRefreshCoordinator,
) {
    scheduler.clear();
    silent_refresh.cancel();
    shared.store.clear();
    shared.events.publish(OAuthEvent::Logout);
}
