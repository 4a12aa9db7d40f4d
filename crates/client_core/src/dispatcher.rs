//! Operator actuator commands.

use std::sync::Arc;

use shared::{
    domain::{ActuatorId, ActuatorValue},
    protocol::ActuatorCommandRequest,
};
use tracing::{debug, info, warn};

use crate::{
    arbiter::ModeArbiter,
    authority::DeviceAuthority,
    error::{SyncError, ValidationError},
    pull::PullSynchronizer,
    state::{SyncStore, UpdateSource},
};

/// A desired actuator change. Consumed by [`CommandDispatcher::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandIntent {
    pub actuator: ActuatorId,
    pub value: ActuatorValue,
}

impl CommandIntent {
    pub fn new(actuator: impl Into<ActuatorId>, value: ActuatorValue) -> Self {
        Self {
            actuator: actuator.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub intent: CommandIntent,
    /// Whether the follow-up refresh after the acknowledged write succeeded.
    pub refreshed: bool,
}

pub struct CommandDispatcher {
    store: Arc<SyncStore>,
    arbiter: Arc<ModeArbiter>,
    authority: Arc<dyn DeviceAuthority>,
    pull: Arc<PullSynchronizer>,
}

impl CommandDispatcher {
    pub fn new(
        store: Arc<SyncStore>,
        arbiter: Arc<ModeArbiter>,
        authority: Arc<dyn DeviceAuthority>,
        pull: Arc<PullSynchronizer>,
    ) -> Self {
        Self {
            store,
            arbiter,
            authority,
            pull,
        }
    }

    /// Sends one write carrying every known actuator, with the intent applied
    /// on top of the currently held values. Failed writes are never retried
    /// here: the authority does not promise that ON/OFF are idempotent.
    pub async fn send(&self, intent: CommandIntent) -> Result<CommandOutcome, SyncError> {
        if let Err(conflict) = self.arbiter.ensure_manual().await {
            debug!(actuator = %intent.actuator, "command rejected locally: {conflict}");
            return Err(conflict);
        }
        if !self.store.knows_actuator(&intent.actuator) {
            return Err(ValidationError::UnknownActuator(intent.actuator.to_string()).into());
        }

        let mut actuators = self.store.actuator_values().await;
        actuators.insert(intent.actuator.clone(), intent.value);
        let request = ActuatorCommandRequest { actuators };

        if let Err(error) = self.authority.send_command(&request).await {
            warn!(actuator = %intent.actuator, value = %intent.value, %error, "command dispatch failed");
            return Err(SyncError::DispatchFailed(format!("{error:#}")));
        }
        info!(actuator = %intent.actuator, value = %intent.value, "command acknowledged");

        // No endpoint reports actuator values, so the acknowledged write is
        // what the next full-set command builds on. Later pushes still win.
        let stamp = self.store.stamp();
        let _ = self
            .store
            .merge_actuator(
                intent.actuator.clone(),
                intent.value,
                stamp,
                UpdateSource::LocalCommand,
            )
            .await;

        let refreshed = match self.pull.refresh().await {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "refresh after command failed");
                false
            }
        };
        Ok(CommandOutcome { intent, refreshed })
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
