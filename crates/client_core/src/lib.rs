use std::{sync::Arc, time::Duration};

use shared::{
    domain::{ActuatorId, DeviceId, InventoryItem, Mode},
    error::ApiError,
};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};
use url::Url;

pub mod arbiter;
pub mod authority;
pub mod dispatcher;
pub mod error;
pub mod inventory;
pub mod pull;
pub mod push;
pub mod state;
pub mod status;
mod task;

pub use arbiter::{ModeArbiter, ModeChange};
pub use authority::{DeviceAuthority, HttpAuthority};
pub use dispatcher::{CommandDispatcher, CommandIntent, CommandOutcome};
pub use error::{SyncError, ValidationError};
pub use inventory::{InventoryTracker, InventoryView};
pub use pull::{PullResource, PullSynchronizer, DEFAULT_POLL_INTERVAL};
pub use push::{PushApplied, PushSynchronizer};
pub use state::{DeviceState, MergeOutcome, Stamp, SyncStore, UpdateSource};
pub use status::{StatusLevel, StatusLine, StatusMessage, DEFAULT_STATUS_TTL};
pub use task::BackgroundTask;

/// Notifications for the view. State snapshots travel over
/// [`DeviceSession::watch_state`] instead.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    PushConnected,
    PushDisconnected { reason: String },
    PullFailed { resource: PullResource, error: ApiError },
    InventoryUpdated(Vec<InventoryItem>),
    Status(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub device_id: DeviceId,
    pub actuators: Vec<ActuatorId>,
    pub poll_interval: Duration,
    /// `None` runs the session on pulls alone.
    pub updates_url: Option<Url>,
    pub status_ttl: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            device_id: DeviceId::from("rack-1"),
            actuators: vec![ActuatorId::from("actuator")],
            poll_interval: DEFAULT_POLL_INTERVAL,
            updates_url: None,
            status_ttl: DEFAULT_STATUS_TTL,
        }
    }
}

#[derive(Default)]
struct SessionTasks {
    pull: Option<BackgroundTask>,
    push: Option<BackgroundTask>,
    closed: bool,
}

/// One open dashboard. Owns the device state, both synchronizers and the
/// command path; the view only gets snapshots and the three operations.
pub struct DeviceSession {
    options: SessionOptions,
    store: Arc<SyncStore>,
    arbiter: Arc<ModeArbiter>,
    pull: Arc<PullSynchronizer>,
    push: Arc<PushSynchronizer>,
    dispatcher: CommandDispatcher,
    inventory: InventoryTracker,
    status: Mutex<StatusLine>,
    tasks: Mutex<SessionTasks>,
    events: broadcast::Sender<ClientEvent>,
}

impl DeviceSession {
    /// Wires the components without touching the network.
    pub fn new(authority: Arc<dyn DeviceAuthority>, options: SessionOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let store = Arc::new(SyncStore::new(options.actuators.iter().cloned()));
        let arbiter = Arc::new(ModeArbiter::new(
            Arc::clone(&store),
            Arc::clone(&authority),
            options.device_id.clone(),
        ));
        let pull = Arc::new(PullSynchronizer::new(
            Arc::clone(&store),
            Arc::clone(&authority),
            events.clone(),
        ));
        let push = Arc::new(PushSynchronizer::new(
            Arc::clone(&store),
            Arc::clone(&arbiter),
            events.clone(),
        ));
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&arbiter),
            Arc::clone(&authority),
            Arc::clone(&pull),
        );
        let inventory = InventoryTracker::new(authority);
        Arc::new(Self {
            status: Mutex::new(StatusLine::new(options.status_ttl)),
            options,
            store,
            arbiter,
            pull,
            push,
            dispatcher,
            inventory,
            tasks: Mutex::new(SessionTasks::default()),
            events,
        })
    }

    /// Creates and starts a session.
    pub async fn open(authority: Arc<dyn DeviceAuthority>, options: SessionOptions) -> Arc<Self> {
        let session = Self::new(authority, options);
        session.start().await;
        session
    }

    /// Bootstraps the mode, loads inventory once, starts the pull interval and
    /// subscribes to pushes. None of these failures end the session: a failed
    /// push connection leaves the session on pulls alone.
    pub async fn start(&self) {
        let mode = self.bootstrap().await;
        info!(%mode, device_id = %self.options.device_id, "dashboard session starting");

        match self.inventory.fetch().await {
            Ok(items) => {
                let _ = self.events.send(ClientEvent::InventoryUpdated(items));
            }
            Err(error) => warn!(%error, "initial inventory load failed"),
        }

        let push_wanted = {
            let mut tasks = self.tasks.lock().await;
            if tasks.closed {
                debug!("session already shut down; not starting tasks");
                return;
            }
            if tasks.pull.is_none() {
                tasks.pull = Some(self.pull.spawn(self.options.poll_interval));
            }
            tasks.push.is_none()
        };
        let Some(url) = self.options.updates_url.as_ref().filter(|_| push_wanted) else {
            return;
        };

        // Connect without the task lock; shutdown may run meanwhile.
        match self.push.connect(url).await {
            Ok(task) => {
                let mut tasks = self.tasks.lock().await;
                if tasks.push.is_none() && !tasks.closed {
                    tasks.push = Some(task);
                    return;
                }
                drop(tasks);
                debug!("push channel no longer needed; closing it");
                task.stop().await;
            }
            Err(error) => {
                warn!(%error, "push channel unavailable; continuing with pulls only");
                let _ = self.events.send(ClientEvent::PushDisconnected {
                    reason: error.to_string(),
                });
            }
        }
    }

    /// Reads the authority's mode once. Enough for one-shot commands that do
    /// not need the pull interval or the push channel.
    pub async fn bootstrap(&self) -> Mode {
        self.arbiter.bootstrap().await
    }

    pub async fn snapshot(&self) -> DeviceState {
        self.store.snapshot().await
    }

    pub fn watch_state(&self) -> watch::Receiver<DeviceState> {
        self.store.subscribe()
    }

    pub async fn mode(&self) -> Mode {
        self.arbiter.current().await
    }

    pub async fn set_mode(&self, change: ModeChange) -> Result<Mode, SyncError> {
        let result = self.arbiter.set_mode(change).await;
        match &result {
            Ok(mode) => self.post_status(StatusLevel::Info, format!("Mode set to {mode}")).await,
            Err(error) => {
                self.post_status(StatusLevel::Error, format!("Mode change failed: {error}"))
                    .await
            }
        }
        result
    }

    pub async fn send_actuator_command(
        &self,
        intent: CommandIntent,
    ) -> Result<CommandOutcome, SyncError> {
        let actuator = intent.actuator.clone();
        let value = intent.value;
        let result = self.dispatcher.send(intent).await;
        match &result {
            Ok(_) => {
                self.post_status(StatusLevel::Info, format!("Sent {actuator} {value}"))
                    .await
            }
            Err(error) => {
                self.post_status(StatusLevel::Error, format!("Command failed: {error}"))
                    .await
            }
        }
        result
    }

    pub async fn inventory(&self) -> InventoryView {
        self.inventory.view().await
    }

    pub async fn refresh_inventory(&self) -> Result<Vec<InventoryItem>, SyncError> {
        let items = self.inventory.fetch().await?;
        let _ = self.events.send(ClientEvent::InventoryUpdated(items.clone()));
        Ok(items)
    }

    pub async fn adjust_stock(&self, name: &str, delta: i64) -> Result<Vec<InventoryItem>, SyncError> {
        let items = self.inventory.adjust_stock(name, delta).await?;
        let _ = self.events.send(ClientEvent::InventoryUpdated(items.clone()));
        Ok(items)
    }

    /// Current status message, if it has not expired yet.
    pub async fn status(&self) -> Option<StatusMessage> {
        self.status.lock().await.current().cloned()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn is_push_connected(&self) -> bool {
        self.tasks
            .lock()
            .await
            .push
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stops the pull interval and closes the push subscription. A session
    /// that was shut down does not start again.
    pub async fn shutdown(&self) {
        let (pull, push) = {
            let mut tasks = self.tasks.lock().await;
            tasks.closed = true;
            (tasks.pull.take(), tasks.push.take())
        };
        if let Some(task) = pull {
            task.stop().await;
        }
        if let Some(task) = push {
            task.stop().await;
        }
        info!(device_id = %self.options.device_id, "dashboard session closed");
    }

    async fn post_status(&self, level: StatusLevel, text: String) {
        let message = self.status.lock().await.post(level, text);
        let _ = self.events.send(ClientEvent::Status(message));
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
