//! Vehicle state snapshot assembled from feedback frames.
//!
//! Stands in for the upstream vehicle model: each feedback frame updates the fields it carries
//! and the controller reads one snapshot per tick.

use crate::can::Frame;
use crate::codec::CodecError;
use crate::cruise::SpeedUnit;
use crate::dbc;
use crate::messages::{
    AccPedal, BrakeState, CruiseStalkState, CruiseStatus, CruiseVariant, Gear, SteeringStatus,
    SteeringWheelAngle, VehicleSpeed,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const KPH_PER_MPH: f32 = 1.609_344;
const MS_TO_MPH: f32 = 2.236_936;
const UNIT_RATIO_TOLERANCE: f32 = 0.15;
/// Below this the setpoint/speed ratio is too noisy to trust.
const UNIT_DETECT_MIN_SPEED: f32 = 5.0;

/// Unit implied by a fresh cruise setpoint and the speed it was set at.
///
/// The setpoint is latched from the current speed on engagement, so its ratio to the speed in
/// mph is about 1 for an imperial cluster and about 1.609 for a metric one.
pub fn detect_speed_unit(setpoint_raw: f32, v_ego: f32) -> Option<SpeedUnit> {
    if v_ego < UNIT_DETECT_MIN_SPEED {
        return None;
    }
    let ratio = setpoint_raw / (v_ego * MS_TO_MPH);
    if (ratio - 1.0).abs() < UNIT_RATIO_TOLERANCE {
        Some(SpeedUnit::Imperial)
    } else if (ratio - KPH_PER_MPH).abs() < UNIT_RATIO_TOLERANCE {
        Some(SpeedUnit::Metric)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// m/s
    pub v_ego: f32,
    pub gas_pressed: bool,
    pub brake_pressed: bool,
    pub steering_angle: f32,
    pub steering_rate: f32,
    pub cruise_variant: Option<CruiseVariant>,
    pub cruise_enabled: bool,
    /// Setpoint in display units.
    pub cruise_setpoint_raw: f32,
    pub stalk: CruiseStalkState,
    pub gear: Option<Gear>,
    pub servo: Option<SteeringStatus>,
    pub speed_unit: Option<SpeedUnit>,
    pub unit_fault: bool,
}

impl VehicleState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unit to use for setpoint arithmetic, metric until detected.
    pub fn unit(&self) -> SpeedUnit {
        self.speed_unit.unwrap_or(SpeedUnit::Metric)
    }

    /// Cruise setpoint in m/s.
    pub fn cruise_setpoint(&self) -> f32 {
        self.cruise_setpoint_raw / self.unit().per_ms()
    }

    /// Applies one feedback frame. Returns `false` for ids this layer does not track.
    pub fn ingest(&mut self, frame: &Frame) -> Result<bool, CodecError> {
        match frame.id {
            dbc::SPEED_ID => {
                self.v_ego = VehicleSpeed::from_frame(frame)?.ms() as f32;
            }
            dbc::ACC_PEDAL_ID => {
                self.gas_pressed = AccPedal::from_frame(frame)?.pressed;
            }
            dbc::BRAKE_ID => {
                let brake = BrakeState::from_frame(frame)?;
                self.brake_pressed = brake.pressed || brake.active;
            }
            dbc::STEERING_ANGLE_ID => {
                let angle = SteeringWheelAngle::from_frame(frame)?;
                self.steering_angle = angle.angle_deg as f32;
                self.steering_rate = angle.rate_deg_s as f32;
            }
            dbc::CRUISE_STATUS_ID | dbc::DYNAMIC_CRUISE_STATUS_ID => {
                let status = CruiseStatus::from_frame(frame)?;
                self.update_cruise(&status);
            }
            dbc::CRUISE_STALK_ID => {
                self.stalk = CruiseStalkState::from_frame(frame)?;
            }
            dbc::TRANSMISSION_ID => {
                self.gear = Gear::from_frame(frame)?;
            }
            dbc::STEERING_STATUS_ID => {
                self.servo = Some(SteeringStatus::from_frame(frame)?);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn update_cruise(&mut self, status: &CruiseStatus) {
        let rising_edge = status.active && !self.cruise_enabled;
        self.cruise_variant = Some(status.variant);
        self.cruise_enabled = status.active;
        self.cruise_setpoint_raw = status.setpoint_raw as f32;

        if rising_edge && self.speed_unit.is_none() {
            match detect_speed_unit(self.cruise_setpoint_raw, self.v_ego) {
                Some(unit) => {
                    info!(?unit, "cruise speed unit detected");
                    self.speed_unit = Some(unit);
                    self.unit_fault = false;
                }
                None if self.v_ego >= UNIT_DETECT_MIN_SPEED => {
                    warn!(
                        setpoint = self.cruise_setpoint_raw,
                        v_ego = self.v_ego,
                        "cruise setpoint matches neither unit"
                    );
                    self.unit_fault = true;
                }
                None => {}
            }
        }
    }

    pub fn servo_status(&self) -> u8 {
        self.servo.map_or(0, |s| s.control_status)
    }

    pub fn servo_torque(&self) -> f32 {
        self.servo.map_or(0.0, |s| s.motor_torque as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_speed_unit() {
        // 100 km/h set at 27.8 m/s
        assert_eq!(detect_speed_unit(100.0, 27.78), Some(SpeedUnit::Metric));
        // 62 mph set at 27.8 m/s
        assert_eq!(detect_speed_unit(62.0, 27.78), Some(SpeedUnit::Imperial));
        assert_eq!(detect_speed_unit(80.0, 27.78), None);
        assert_eq!(detect_speed_unit(10.0, 2.0), None);
    }
}
