use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{ActuatorId, ActuatorValue, DeviceId, Mode, ModeDecodeError, ModeKind, SensorId};

/// Frames published by the authority on `/ws/updates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    ModeUpdate {
        mode: ModeKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        threshold: Option<f64>,
    },
    ActuatorUpdate {
        actuator: ActuatorId,
        value: ActuatorValue,
    },
    #[serde(other)]
    Unknown,
}

/// Body of `GET /api/sensor-data`.
pub type SensorReadings = BTreeMap<SensorId, f64>;

/// Body of `GET /api/mode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeResponse {
    pub mode: ModeKind,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl ModeResponse {
    pub fn into_mode(self) -> Result<Mode, ModeDecodeError> {
        Mode::from_parts(self.mode, self.threshold)
    }
}

impl From<Mode> for ModeResponse {
    fn from(mode: Mode) -> Self {
        Self {
            mode: mode.kind(),
            threshold: mode.threshold(),
        }
    }
}

pub const SET_MODE_MESSAGE_TYPE: &str = "mode";

/// Body of `POST /api/mode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetModeRequest {
    #[serde(rename = "type")]
    pub message_type: String,
    pub mode: ModeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(rename = "deviceId")]
    pub device_id: DeviceId,
}

impl SetModeRequest {
    pub fn new(mode: Mode, device_id: DeviceId) -> Self {
        Self {
            message_type: SET_MODE_MESSAGE_TYPE.to_string(),
            mode: mode.kind(),
            threshold: mode.threshold(),
            device_id,
        }
    }
}

/// Body of `POST /api/send-command`: the full actuator set, one entry per
/// known actuator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActuatorCommandRequest {
    pub actuators: BTreeMap<ActuatorId, ActuatorValue>,
}

/// Body of `PATCH /items/{name}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
}
