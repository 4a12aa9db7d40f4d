//! Periodic reads of sensor and mode state.
//!
//! Each resource has its own gate. An interval tick that finds the previous
//! read of the same resource still outstanding skips that resource for the
//! tick, so two reads of one resource are never in flight together. Explicit
//! refreshes wait for the gate instead of skipping.

use std::{fmt, sync::Arc, time::Duration};

use futures::StreamExt;
use shared::error::ApiError;
use tokio::{
    sync::{broadcast, Mutex, OwnedMutexGuard},
    task::JoinSet,
    time::MissedTickBehavior,
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, warn};

use crate::{
    authority::DeviceAuthority,
    error::SyncError,
    state::{MergeOutcome, SyncStore, UpdateSource},
    task::BackgroundTask,
    ClientEvent,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullResource {
    Sensors,
    Mode,
}

impl PullResource {
    pub const ALL: [PullResource; 2] = [PullResource::Sensors, PullResource::Mode];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sensors => "sensors",
            Self::Mode => "mode",
        }
    }
}

impl fmt::Display for PullResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct PullSynchronizer {
    store: Arc<SyncStore>,
    authority: Arc<dyn DeviceAuthority>,
    events: broadcast::Sender<ClientEvent>,
    sensors_gate: Arc<Mutex<()>>,
    mode_gate: Arc<Mutex<()>>,
}

impl PullSynchronizer {
    pub fn new(
        store: Arc<SyncStore>,
        authority: Arc<dyn DeviceAuthority>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            store,
            authority,
            events,
            sensors_gate: Arc::new(Mutex::new(())),
            mode_gate: Arc::new(Mutex::new(())),
        }
    }

    fn gate(&self, resource: PullResource) -> &Arc<Mutex<()>> {
        match resource {
            PullResource::Sensors => &self.sensors_gate,
            PullResource::Mode => &self.mode_gate,
        }
    }

    /// Reads one resource, waiting for any outstanding read of it first.
    pub async fn pull(&self, resource: PullResource) -> Result<MergeOutcome, SyncError> {
        let guard = Arc::clone(self.gate(resource)).lock_owned().await;
        self.pull_locked(resource, guard).await
    }

    /// Reads one resource unless a read of it is already in flight.
    pub async fn try_pull(
        &self,
        resource: PullResource,
    ) -> Option<Result<MergeOutcome, SyncError>> {
        let guard = Arc::clone(self.gate(resource)).try_lock_owned().ok()?;
        Some(self.pull_locked(resource, guard).await)
    }

    /// Re-reads every resource once. Used after a command is acknowledged.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let mut first_error = None;
        for resource in PullResource::ALL {
            if let Err(err) = self.pull(resource).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn pull_locked(
        &self,
        resource: PullResource,
        _in_flight: OwnedMutexGuard<()>,
    ) -> Result<MergeOutcome, SyncError> {
        let result = match resource {
            PullResource::Sensors => self.pull_sensors().await,
            PullResource::Mode => self.pull_mode().await,
        };
        if let Err(error) = &result {
            warn!(resource = resource.as_str(), %error, "pull failed; keeping previous state");
            let _ = self.events.send(ClientEvent::PullFailed {
                resource,
                error: ApiError::from(error),
            });
        }
        result
    }

    async fn pull_sensors(&self) -> Result<MergeOutcome, SyncError> {
        let readings = self
            .authority
            .read_sensors()
            .await
            .map_err(|err| SyncError::from_authority("read sensors", err))?;
        let stamp = self.store.stamp();
        Ok(self
            .store
            .merge_sensors(readings, stamp, UpdateSource::Pull)
            .await)
    }

    async fn pull_mode(&self) -> Result<MergeOutcome, SyncError> {
        let response = self
            .authority
            .read_mode()
            .await
            .map_err(|err| SyncError::from_authority("read mode", err))?;
        let stamp = self.store.stamp();
        let mode = response
            .into_mode()
            .map_err(|err| SyncError::Protocol(format!("read mode: {err}")))?;
        Ok(self.store.merge_mode(mode, stamp, UpdateSource::Pull).await)
    }

    /// Starts the interval. The first tick fires immediately. Failed reads are
    /// retried on the next tick, indefinitely.
    pub fn spawn(self: &Arc<Self>, period: Duration) -> BackgroundTask {
        let sync = Arc::clone(self);
        BackgroundTask::spawn("pull", move |mut shutdown| async move {
            // A zero period would panic inside tokio.
            let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks = IntervalStream::new(interval);
            let mut in_flight = JoinSet::new();
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    Some(_) = ticks.next() => {
                        for resource in PullResource::ALL {
                            let sync = Arc::clone(&sync);
                            in_flight.spawn(async move {
                                if sync.try_pull(resource).await.is_none() {
                                    debug!(resource = resource.as_str(), "previous pull still in flight; skipping tick");
                                }
                            });
                        }
                    }
                    Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                }
            }
            in_flight.abort_all();
        })
    }
}

#[cfg(test)]
#[path = "tests/pull_tests.rs"]
mod tests;
