//! Manual/automatic control arbitration.

use std::sync::Arc;

use shared::{
    domain::{DeviceId, Mode, ModeKind},
    protocol::SetModeRequest,
};
use tracing::{info, warn};

use crate::{
    authority::DeviceAuthority,
    error::{SyncError, ValidationError},
    state::{MergeOutcome, Stamp, SyncStore, UpdateSource},
};

/// A mode change requested by the operator. The automatic threshold stays
/// optional here so missing input is rejected by the arbiter, not the caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModeChange {
    Manual,
    Auto { threshold: Option<f64> },
}

impl ModeChange {
    /// Parses threshold text as typed into a dashboard field.
    pub fn auto_from_input(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::MissingThreshold);
        }
        let threshold = trimmed
            .parse::<f64>()
            .map_err(|_| ValidationError::UnparsableThreshold(trimmed.to_string()))?;
        Ok(Self::Auto {
            threshold: Some(threshold),
        })
    }

    fn validate(self) -> Result<Mode, ValidationError> {
        match self {
            Self::Manual => Ok(Mode::Manual),
            Self::Auto { threshold: None } => Err(ValidationError::MissingThreshold),
            Self::Auto {
                threshold: Some(value),
            } if !value.is_finite() => Err(ValidationError::NonFiniteThreshold),
            Self::Auto {
                threshold: Some(threshold),
            } => Ok(Mode::Auto { threshold }),
        }
    }
}

pub struct ModeArbiter {
    store: Arc<SyncStore>,
    authority: Arc<dyn DeviceAuthority>,
    device_id: DeviceId,
}

impl ModeArbiter {
    pub fn new(
        store: Arc<SyncStore>,
        authority: Arc<dyn DeviceAuthority>,
        device_id: DeviceId,
    ) -> Self {
        Self {
            store,
            authority,
            device_id,
        }
    }

    /// One-time startup read. Any failure leaves the store in manual mode:
    /// automatic control is never assumed without a threshold from the
    /// authority.
    pub async fn bootstrap(&self) -> Mode {
        let response = match self.authority.read_mode().await {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "mode bootstrap failed; falling back to manual");
                return self.store.mode().await;
            }
        };
        let stamp = self.store.stamp();
        match response.into_mode() {
            Ok(mode) => {
                let _ = self.store.merge_mode(mode, stamp, UpdateSource::Pull).await;
                info!(%mode, "mode bootstrapped");
            }
            Err(error) => {
                warn!(%error, "mode bootstrap returned an invalid mode; falling back to manual");
            }
        }
        self.store.mode().await
    }

    pub async fn current(&self) -> Mode {
        self.store.mode().await
    }

    pub async fn permits_manual_commands(&self) -> bool {
        self.store.mode().await.is_manual()
    }

    pub(crate) async fn ensure_manual(&self) -> Result<(), SyncError> {
        match self.store.mode().await {
            Mode::Manual => Ok(()),
            auto => Err(SyncError::ModeConflict { mode: auto.kind() }),
        }
    }

    /// Validates locally, then asks the authority. The store only changes
    /// once the authority acknowledged the request.
    pub async fn set_mode(&self, change: ModeChange) -> Result<Mode, SyncError> {
        let mode = change.validate()?;
        let request = SetModeRequest::new(mode, self.device_id.clone());
        self.authority.set_mode(&request).await.map_err(|error| {
            warn!(%error, mode = %mode.kind(), "mode change rejected by transport");
            SyncError::DispatchFailed(format!("{error:#}"))
        })?;

        let stamp = self.store.stamp();
        let _ = self
            .store
            .merge_mode(mode, stamp, UpdateSource::LocalCommand)
            .await;
        info!(%mode, "mode changed");
        Ok(mode)
    }

    /// Applies a `mode_update` broadcast. Pushes overwrite whatever this
    /// client last requested so every dashboard converges on the same mode.
    pub(crate) async fn apply_pushed_mode(
        &self,
        kind: ModeKind,
        threshold: Option<f64>,
        stamp: Stamp,
    ) -> Result<MergeOutcome, SyncError> {
        let mode = Mode::from_parts(kind, threshold)
            .map_err(|error| SyncError::Protocol(format!("mode_update: {error}")))?;
        Ok(self.store.merge_mode(mode, stamp, UpdateSource::Push).await)
    }
}

#[cfg(test)]
#[path = "tests/arbiter_tests.rs"]
mod tests;
