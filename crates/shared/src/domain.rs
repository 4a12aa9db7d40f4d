use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ActuatorId);
id_newtype!(SensorId);
id_newtype!(DeviceId);

/// Weight cells reported by `/api/sensor-data`, in kilograms.
pub const WEIGHT_SENSORS: [&str; 3] = ["weight1", "weight2", "weight3"];
/// Rack temperature reported by `/api/sensor-data`, in degrees Celsius.
pub const TEMPERATURE_SENSOR: &str = "temperature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActuatorValue {
    #[serde(rename = "ON", alias = "on", alias = "On")]
    On,
    #[serde(rename = "OFF", alias = "off", alias = "Off")]
    Off,
}

impl ActuatorValue {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

impl fmt::Display for ActuatorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("actuator value must be ON or OFF, got '{0}'")]
pub struct ParseActuatorValueError(pub String);

impl FromStr for ActuatorValue {
    type Err = ParseActuatorValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            _ => Err(ParseActuatorValueError(s.to_string())),
        }
    }
}

/// Mode discriminator as it travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    #[serde(alias = "MANUAL", alias = "Manual")]
    Manual,
    #[serde(alias = "AUTO", alias = "Auto")]
    Auto,
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Auto => f.write_str("auto"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeDecodeError {
    #[error("auto mode reported without a threshold")]
    MissingThreshold,
    #[error("auto mode reported with a non-finite threshold")]
    NonFiniteThreshold,
}

/// Control mode of the rack. The threshold only exists in automatic mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    Manual,
    Auto { threshold: f64 },
}

impl Mode {
    /// Builds a mode from its wire parts. A threshold sent alongside `manual`
    /// is dropped.
    pub fn from_parts(kind: ModeKind, threshold: Option<f64>) -> Result<Self, ModeDecodeError> {
        match kind {
            ModeKind::Manual => Ok(Self::Manual),
            ModeKind::Auto => match threshold {
                None => Err(ModeDecodeError::MissingThreshold),
                Some(value) if !value.is_finite() => Err(ModeDecodeError::NonFiniteThreshold),
                Some(threshold) => Ok(Self::Auto { threshold }),
            },
        }
    }

    pub fn kind(&self) -> ModeKind {
        match self {
            Self::Manual => ModeKind::Manual,
            Self::Auto { .. } => ModeKind::Auto,
        }
    }

    pub fn threshold(&self) -> Option<f64> {
        match self {
            Self::Manual => None,
            Self::Auto { threshold } => Some(*threshold),
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => f.write_str("manual"),
            Self::Auto { threshold } => write!(f, "auto (threshold {threshold})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub name: String,
    pub stock: u64,
}

impl InventoryItem {
    pub fn status(&self) -> StockStatus {
        StockStatus::from_stock(self.stock)
    }
}

pub const LOW_STOCK_BELOW: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    LowStock,
    InStock,
}

impl StockStatus {
    pub fn from_stock(stock: u64) -> Self {
        if stock == 0 {
            Self::OutOfStock
        } else if stock < LOW_STOCK_BELOW {
            Self::LowStock
        } else {
            Self::InStock
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::OutOfStock => "Out of Stock",
            Self::LowStock => "Low Stock",
            Self::InStock => "In Stock",
        }
    }
}
