//! Controller configuration and start-up capability detection.

use crate::can::CanBus;
use crate::cruise::CruiseTuning;
use crate::dbc;
use crate::messages::CruiseVariant;
use crate::rate_limit::LookupError;
use crate::steering::SteeringParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Both supported cruise variants refuse to engage below 30 km/h.
pub const MIN_ENABLE_SPEED_MS: f32 = 30.0 / 3.6;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid lookup table: {0}")]
    Lookup(#[from] LookupError),
    #[error("invalid value for {0}")]
    InvalidValue(&'static str),
    #[error("{0} must be finite and not negative")]
    OutOfRange(&'static str),
    #[error("cruise control with a separate longitudinal module is not supported")]
    UnsupportedCruise,
}

/// What the car offers, decided once before the control loop starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// Stepper servo answering on the servo bus.
    pub steering: bool,
    pub cruise_variant: CruiseVariant,
    /// Bus the synthesized stalk frames go to.
    pub cruise_bus: u8,
    /// m/s
    pub min_enable_speed: f32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            steering: true,
            cruise_variant: CruiseVariant::Normal,
            cruise_bus: CanBus::PT_CAN,
            min_enable_speed: MIN_ENABLE_SPEED_MS,
        }
    }
}

impl Capabilities {
    /// Detects capabilities from the (bus, id) pairs seen during start-up.
    pub fn detect(fingerprint: &[(u8, u32)]) -> Result<Self, ConfigError> {
        let seen = |bus: u8, id: u32| fingerprint.contains(&(bus, id));

        let steering = seen(CanBus::SERVO_CAN, dbc::STEERING_STATUS_ID);

        let (cruise_variant, cruise_bus) = if seen(CanBus::PT_CAN, dbc::CRUISE_STATUS_ID) {
            // Engine controls speed and reports cruise status
            (CruiseVariant::Normal, CanBus::PT_CAN)
        } else if seen(CanBus::PT_CAN, dbc::DYNAMIC_CRUISE_STATUS_ID)
            && !seen(CanBus::PT_CAN, dbc::LONGITUDINAL_MODULE_ID)
        {
            // Stability control brakes by itself, stalk requests go on the chassis bus
            (CruiseVariant::Dynamic, CanBus::F_CAN)
        } else {
            return Err(ConfigError::UnsupportedCruise);
        };

        let caps = Self {
            steering,
            cruise_variant,
            cruise_bus,
            min_enable_speed: MIN_ENABLE_SPEED_MS,
        };
        info!(?caps, "capabilities detected");
        Ok(caps)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub steering: SteeringParams,
    pub cruise: CruiseTuning,
    pub capabilities: Capabilities,
}

impl ControllerConfig {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.steering.validate()?;

        let s = &self.steering;
        let magnitudes = [
            ("steering.torque_error_max", s.torque_error_max),
            ("steering.soft_off_rate", s.soft_off_rate),
            ("steering.angle_fault_threshold", s.angle_fault_threshold),
            ("steering.fault_cooldown_s", s.fault_cooldown_s),
            ("steering.override_friction", s.override_friction),
            ("steering.override_centering", s.override_centering),
            ("steering.inertia_gain", s.inertia_gain),
            ("cruise.cc_step", self.cruise.cc_step),
            ("cruise.single_tick_s", self.cruise.single_tick_s),
            ("cruise.hold_tick_s", self.cruise.hold_tick_s),
            ("cruise.hold_tick_stock_s", self.cruise.hold_tick_stock_s),
            ("cruise.accel_hyst_gap", self.cruise.accel_hyst_gap),
            ("cruise.reversal_holdoff_s", self.cruise.reversal_holdoff_s),
            ("capabilities.min_enable_speed", self.capabilities.min_enable_speed),
        ];
        for (name, value) in magnitudes {
            if !is_magnitude(value) {
                return Err(ConfigError::OutOfRange(name));
            }
        }

        let tables = [
            ("steering.torque_windup", &s.torque_windup),
            ("steering.torque_unwind", &s.torque_unwind),
            ("steering.max_angle", &s.max_angle),
            ("steering.angle_rate_up", &s.angle_rate_up),
            ("steering.angle_rate_down", &s.angle_rate_down),
        ];
        for (name, table) in tables {
            if !table.values().iter().all(|&v| is_magnitude(v)) {
                return Err(ConfigError::OutOfRange(name));
            }
        }

        if !(self.steering.control_hz > 0.0) {
            return Err(ConfigError::InvalidValue("steering.control_hz"));
        }
        if !(self.cruise.control_hz > 0.0) {
            return Err(ConfigError::InvalidValue("cruise.control_hz"));
        }
        if !(self.steering.steer_max > 0.0) {
            return Err(ConfigError::InvalidValue("steering.steer_max"));
        }
        if !(0.5..=1.0).contains(&self.cruise.speed_hyst_steps) {
            return Err(ConfigError::InvalidValue("cruise.speed_hyst_steps"));
        }
        if self.cruise.idle_tick_stock_s <= self.cruise.hold_tick_stock_s {
            return Err(ConfigError::InvalidValue("cruise.idle_tick_stock_s"));
        }
        Ok(())
    }
}

fn is_magnitude(value: f32) -> bool {
    value.is_finite() && value >= 0.0
}
