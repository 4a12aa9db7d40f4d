//! Shared device state and the merge functions that are the only way to
//! change it.
//!
//! Every update is stamped when it arrives (response received, frame read)
//! and merged per sub-field: mode and threshold together, sensors as one
//! map, actuators per key. A merge whose stamp is older than the one already
//! held for that sub-field is dropped, so a slow pull response can never
//! revert a value a later push already delivered.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::atomic::{AtomicU64, Ordering},
};

use shared::{
    domain::{ActuatorId, ActuatorValue, Mode},
    protocol::SensorReadings,
};
use tokio::sync::{watch, RwLock};

/// Arrival order of an update. Issued by [`SyncStore::stamp`]; strictly
/// increasing across every channel of one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stamp(u64);

impl Stamp {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateSource {
    Pull,
    Push,
    LocalCommand,
}

/// Read-only view handed to the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub mode: Mode,
    pub actuators: BTreeMap<ActuatorId, ActuatorValue>,
    pub sensors: SensorReadings,
    pub last_updated_at: Stamp,
    pub last_update_source: Option<UpdateSource>,
}

impl DeviceState {
    pub fn threshold(&self) -> Option<f64> {
        self.mode.threshold()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum MergeOutcome {
    Applied,
    /// A newer update for the same sub-field was already merged.
    Stale,
    /// The actuator is not part of this device's fixed set.
    UnknownActuator,
}

#[derive(Default)]
struct FieldStamps {
    mode: Stamp,
    sensors: Stamp,
    actuators: BTreeMap<ActuatorId, Stamp>,
}

struct StoreInner {
    state: DeviceState,
    stamps: FieldStamps,
}

impl StoreInner {
    fn touch(&mut self, stamp: Stamp, source: UpdateSource) {
        if stamp >= self.state.last_updated_at {
            self.state.last_updated_at = stamp;
            self.state.last_update_source = Some(source);
        }
    }
}

pub struct SyncStore {
    arrivals: AtomicU64,
    known_actuators: BTreeSet<ActuatorId>,
    inner: RwLock<StoreInner>,
    changes: watch::Sender<DeviceState>,
}

impl SyncStore {
    /// Starts in manual mode with every known actuator off and no readings.
    pub fn new(actuators: impl IntoIterator<Item = ActuatorId>) -> Self {
        let known_actuators: BTreeSet<ActuatorId> = actuators.into_iter().collect();
        let state = DeviceState {
            mode: Mode::Manual,
            actuators: known_actuators
                .iter()
                .map(|id| (id.clone(), ActuatorValue::Off))
                .collect(),
            sensors: SensorReadings::new(),
            last_updated_at: Stamp::default(),
            last_update_source: None,
        };
        let (changes, _) = watch::channel(state.clone());
        Self {
            arrivals: AtomicU64::new(0),
            known_actuators,
            inner: RwLock::new(StoreInner {
                state,
                stamps: FieldStamps::default(),
            }),
            changes,
        }
    }

    /// Records an arrival. Take the stamp as soon as the payload is in hand,
    /// before any await, so it reflects arrival order rather than lock order.
    pub fn stamp(&self) -> Stamp {
        Stamp(self.arrivals.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn knows_actuator(&self, id: &ActuatorId) -> bool {
        self.known_actuators.contains(id)
    }

    pub fn known_actuators(&self) -> impl Iterator<Item = &ActuatorId> {
        self.known_actuators.iter()
    }

    pub async fn snapshot(&self) -> DeviceState {
        self.inner.read().await.state.clone()
    }

    pub async fn mode(&self) -> Mode {
        self.inner.read().await.state.mode
    }

    pub async fn actuator_values(&self) -> BTreeMap<ActuatorId, ActuatorValue> {
        self.inner.read().await.state.actuators.clone()
    }

    /// Receives a fresh snapshot after every applied merge.
    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.changes.subscribe()
    }

    /// Replaces mode and threshold as one unit.
    pub async fn merge_mode(&self, mode: Mode, stamp: Stamp, source: UpdateSource) -> MergeOutcome {
        let mut inner = self.inner.write().await;
        if stamp < inner.stamps.mode {
            return MergeOutcome::Stale;
        }
        inner.stamps.mode = stamp;
        inner.state.mode = mode;
        inner.touch(stamp, source);
        self.changes.send_replace(inner.state.clone());
        MergeOutcome::Applied
    }

    /// Replaces the whole sensor map.
    pub async fn merge_sensors(
        &self,
        readings: SensorReadings,
        stamp: Stamp,
        source: UpdateSource,
    ) -> MergeOutcome {
        let mut inner = self.inner.write().await;
        if stamp < inner.stamps.sensors {
            return MergeOutcome::Stale;
        }
        inner.stamps.sensors = stamp;
        inner.state.sensors = readings;
        inner.touch(stamp, source);
        self.changes.send_replace(inner.state.clone());
        MergeOutcome::Applied
    }

    /// Updates a single actuator; other actuators keep their own stamps.
    pub async fn merge_actuator(
        &self,
        id: ActuatorId,
        value: ActuatorValue,
        stamp: Stamp,
        source: UpdateSource,
    ) -> MergeOutcome {
        if !self.knows_actuator(&id) {
            return MergeOutcome::UnknownActuator;
        }
        let mut inner = self.inner.write().await;
        let held = inner.stamps.actuators.get(&id).copied().unwrap_or_default();
        if stamp < held {
            return MergeOutcome::Stale;
        }
        inner.stamps.actuators.insert(id.clone(), stamp);
        inner.state.actuators.insert(id, value);
        inner.touch(stamp, source);
        self.changes.send_replace(inner.state.clone());
        MergeOutcome::Applied
    }
}

#[cfg(test)]
#[path = "tests/state_tests.rs"]
mod tests;
