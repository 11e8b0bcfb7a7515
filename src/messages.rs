//! Typed views of the database messages.
//!
//! Outgoing messages are built from these structs (values are clamped or validated on
//! construction) and incoming frames are decoded into them, so no code outside the codec
//! handles signal names.

use crate::can::Frame;
use crate::codec::{value_of, CodecError, SignalValues};
use crate::dbc;
use serde::{Deserialize, Serialize};

const KPH_TO_MS: f64 = 1.0 / 3.6;

fn get(values: &SignalValues, name: &'static str) -> Result<f64, CodecError> {
    value_of(values, name).ok_or(CodecError::SignalOutOfBounds(name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CruiseStalkAction {
    Plus1,
    Plus5,
    Minus1,
    Minus5,
    Cancel,
    Resume,
    CancelLeverUp,
}

impl CruiseStalkAction {
    pub fn signal_name(self) -> &'static str {
        match self {
            CruiseStalkAction::Plus1 => "plus1",
            CruiseStalkAction::Plus5 => "plus5",
            CruiseStalkAction::Minus1 => "minus1",
            CruiseStalkAction::Minus5 => "minus5",
            CruiseStalkAction::Cancel => "cancel",
            CruiseStalkAction::Resume => "resume",
            CruiseStalkAction::CancelLeverUp => "cancel_lever_up",
        }
    }

    /// Sign of the setpoint change this press produces, 0 for non-speed actions.
    pub fn direction(self) -> i8 {
        match self {
            CruiseStalkAction::Plus1 | CruiseStalkAction::Plus5 => 1,
            CruiseStalkAction::Minus1 | CruiseStalkAction::Minus5 => -1,
            _ => 0,
        }
    }
}

/// One synthesized stalk frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CruiseStalkCommand {
    pub action: CruiseStalkAction,
    counter: u8,
}

impl CruiseStalkCommand {
    /// The counter is reduced modulo the stalk family's modulus.
    pub fn new(action: CruiseStalkAction, counter: u8) -> Self {
        Self {
            action,
            counter: counter % dbc::CRUISE_STALK_COUNTER_MODULUS,
        }
    }

    pub fn counter(&self) -> u8 {
        self.counter
    }

    pub fn to_frame(&self, bus: u8) -> Result<Frame, CodecError> {
        dbc::CRUISE_STALK.encode(
            bus,
            &[
                ("setMe_0xFC", 252.0),
                ("requests_0xF", 15.0),
                ("Counter_0x194", f64::from(self.counter)),
                (self.action.signal_name(), 1.0),
            ],
        )
    }
}

/// Stalk state as observed on the bus, whoever sent it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CruiseStalkState {
    pub counter: u8,
    /// +1/+5/-1/-5 or 0 when no speed request is held.
    pub speed_request: i8,
    pub resume: bool,
    pub cancel: bool,
    pub cancel_lever_up: bool,
}

impl CruiseStalkState {
    pub fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
        let spec = &dbc::CRUISE_STALK;
        let values = spec.decode(frame)?;
        let flag = |name: &'static str| get(&values, name).map(|v| v != 0.0);
        let speed_request = if flag("plus5")? {
            5
        } else if flag("minus5")? {
            -5
        } else if flag("plus1")? {
            1
        } else if flag("minus1")? {
            -1
        } else {
            0
        };
        Ok(Self {
            counter: get(&values, "Counter_0x194")? as u8,
            speed_request,
            resume: flag("resume")?,
            cancel: flag("cancel")?,
            cancel_lever_up: flag("cancel_lever_up")?,
        })
    }

    pub fn human_pressing(&self) -> bool {
        self.resume || self.cancel || self.speed_request != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CruiseVariant {
    /// Engine reports cruise status on 0x200.
    Normal,
    /// Stability control reports cruise status on 0x193.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CruiseStatus {
    pub variant: CruiseVariant,
    pub active: bool,
    /// Setpoint in the cluster's unit (km/h or mph).
    pub setpoint_raw: f64,
}

impl CruiseStatus {
    pub fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
        let (spec, variant, flag) = match frame.id {
            dbc::DYNAMIC_CRUISE_STATUS_ID => (&dbc::DYNAMIC_CRUISE_STATUS, CruiseVariant::Dynamic, "CruiseActive"),
            _ => (&dbc::CRUISE_STATUS, CruiseVariant::Normal, "CruiseControlActiveFlag"),
        };
        let values = spec.decode(frame)?;
        Ok(Self {
            variant,
            active: get(&values, flag)? != 0.0,
            setpoint_raw: get(&values, "CruiseControlSetpointSpeed")?,
        })
    }

    pub fn to_frame(&self, bus: u8) -> Result<Frame, CodecError> {
        match self.variant {
            CruiseVariant::Normal => dbc::CRUISE_STATUS.encode(
                bus,
                &[
                    ("CruiseControlSetpointSpeed", self.setpoint_raw),
                    ("CruiseControlActiveFlag", f64::from(u8::from(self.active))),
                ],
            ),
            CruiseVariant::Dynamic => dbc::DYNAMIC_CRUISE_STATUS.encode(
                bus,
                &[
                    ("CruiseControlSetpointSpeed", self.setpoint_raw),
                    ("CruiseActive", f64::from(u8::from(self.active))),
                ],
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleSpeed {
    pub kph: f64,
}

impl VehicleSpeed {
    pub fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
        Ok(Self {
            kph: dbc::SPEED.decode_signal(frame, "VehicleSpeed")?,
        })
    }

    pub fn from_ms(speed: f64) -> Self {
        Self { kph: speed * 3.6 }
    }

    pub fn ms(&self) -> f64 {
        self.kph * KPH_TO_MS
    }

    pub fn to_frame(&self, bus: u8) -> Result<Frame, CodecError> {
        let max = 4095.0 * dbc::SPEED_FACTOR_KPH;
        dbc::SPEED.encode(bus, &[("VehicleSpeed", self.kph.clamp(0.0, max))])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrakeState {
    pub pressed: bool,
    pub active: bool,
}

impl BrakeState {
    pub fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
        let values = dbc::BRAKE.decode(frame)?;
        Ok(Self {
            pressed: get(&values, "BrakePressed")? != 0.0,
            active: get(&values, "BrakeActive")? != 0.0,
        })
    }

    pub fn to_frame(&self, bus: u8) -> Result<Frame, CodecError> {
        dbc::BRAKE.encode(
            bus,
            &[
                ("BrakePressed", f64::from(u8::from(self.pressed))),
                ("BrakeActive", f64::from(u8::from(self.active))),
            ],
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccPedal {
    pub pressed: bool,
    pub percent: f64,
}

impl AccPedal {
    pub fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
        let values = dbc::ACC_PEDAL.decode(frame)?;
        Ok(Self {
            pressed: get(&values, "AcceleratorPedalPressed")? != 0.0,
            percent: get(&values, "AcceleratorPedalPercentage")?,
        })
    }

    pub fn to_frame(&self, bus: u8, counter: u8) -> Result<Frame, CodecError> {
        dbc::ACC_PEDAL.encode(
            bus,
            &[
                ("Counter_0xAA", f64::from(counter % 15)),
                ("AcceleratorPedalPercentage", self.percent.clamp(0.0, 100.0)),
                ("AcceleratorPedalPressed", f64::from(u8::from(self.pressed))),
            ],
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SteeringWheelAngle {
    pub angle_deg: f64,
    pub rate_deg_s: f64,
}

impl SteeringWheelAngle {
    pub fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
        let values = dbc::STEERING_ANGLE.decode(frame)?;
        Ok(Self {
            angle_deg: get(&values, "SteeringPosition")?,
            rate_deg_s: get(&values, "SteeringSpeed")?,
        })
    }

    pub fn to_frame(&self, bus: u8) -> Result<Frame, CodecError> {
        dbc::STEERING_ANGLE.encode(
            bus,
            &[
                ("SteeringPosition", self.angle_deg),
                ("SteeringSpeed", self.rate_deg_s),
            ],
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gear {
    Off,
    Park,
    Reverse,
    Neutral,
    Drive,
    Unknown(u8),
}

impl Gear {
    pub fn from_lever(code: u8) -> Self {
        match code {
            0 => Gear::Off,
            1 => Gear::Park,
            2 => Gear::Reverse,
            4 => Gear::Neutral,
            8 => Gear::Drive,
            other => Gear::Unknown(other),
        }
    }

    pub fn lever_code(self) -> u8 {
        match self {
            Gear::Off => 0,
            Gear::Park => 1,
            Gear::Reverse => 2,
            Gear::Neutral => 4,
            Gear::Drive => 8,
            Gear::Unknown(code) => code & 0xF,
        }
    }

    /// `None` when the complement nibble does not match.
    pub fn from_frame(frame: &Frame) -> Result<Option<Self>, CodecError> {
        let values = dbc::TRANSMISSION.decode(frame)?;
        let lever = get(&values, "ShiftLeverPosition")? as u8;
        let complement = get(&values, "ShiftLeverPositionXor")? as u8;
        if complement == lever ^ 0xF {
            Ok(Some(Self::from_lever(lever)))
        } else {
            Ok(None)
        }
    }

    pub fn to_frame(self, bus: u8) -> Result<Frame, CodecError> {
        let code = self.lever_code();
        dbc::TRANSMISSION.encode(
            bus,
            &[
                ("ShiftLeverPosition", f64::from(code)),
                ("ShiftLeverPositionXor", f64::from(code ^ 0xF)),
            ],
        )
    }
}

/// Servo operating mode as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SteerMode {
    Off = 0,
    TorqueControl = 1,
    AngleControl = 2,
    SoftOff = 3,
}

impl SteerMode {
    pub fn from_raw(raw: u8) -> Self {
        match raw & 0x3 {
            1 => SteerMode::TorqueControl,
            2 => SteerMode::AngleControl,
            3 => SteerMode::SoftOff,
            _ => SteerMode::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SteeringCommandFrame {
    pub counter: u8,
    pub mode: SteerMode,
    /// Relative move requested from the current position.
    pub angle_delta: f64,
    pub torque: f64,
}

impl SteeringCommandFrame {
    const MAX_ANGLE: f64 = 32767.0 * dbc::SERVO_ANGLE_FACTOR;
    const MAX_TORQUE: f64 = 32767.0 * dbc::SERVO_TORQUE_FACTOR;

    pub fn new(counter: u8, mode: SteerMode, angle_delta: f64, torque: f64) -> Self {
        Self {
            counter: counter % dbc::STEERING_COUNTER_MODULUS,
            mode,
            angle_delta: angle_delta.clamp(-Self::MAX_ANGLE, Self::MAX_ANGLE),
            torque: torque.clamp(-Self::MAX_TORQUE, Self::MAX_TORQUE),
        }
    }

    pub fn to_frame(&self, bus: u8) -> Result<Frame, CodecError> {
        dbc::STEERING_COMMAND.encode(
            bus,
            &[
                ("COUNTER", f64::from(self.counter)),
                ("STEER_MODE", f64::from(self.mode as u8)),
                ("STEER_ANGLE", self.angle_delta),
                ("STEER_TORQUE", self.torque),
            ],
        )
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
        let spec = &dbc::STEERING_COMMAND;
        let values = spec.decode(frame)?;
        Ok(Self {
            counter: get(&values, "COUNTER")? as u8,
            mode: SteerMode::from_raw(get(&values, "STEER_MODE")? as u8),
            angle_delta: get(&values, "STEER_ANGLE")?,
            torque: get(&values, "STEER_TORQUE")?,
        })
    }
}

/// Feedback from the steering servo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SteeringStatus {
    pub counter: u8,
    /// Non-zero means the servo reports a fault.
    pub control_status: u8,
    pub angle_deg: f64,
    pub motor_torque: f64,
}

impl SteeringStatus {
    pub fn from_frame(frame: &Frame) -> Result<Self, CodecError> {
        let spec = &dbc::STEERING_STATUS;
        let values = spec.decode(frame)?;
        Ok(Self {
            counter: get(&values, "COUNTER")? as u8,
            control_status: get(&values, "CONTROL_STATUS")? as u8,
            angle_deg: get(&values, "STEERING_ANGLE")?,
            motor_torque: get(&values, "STEERING_TORQUE")?,
        })
    }

    pub fn has_fault(&self) -> bool {
        self.control_status != 0
    }

    pub fn to_frame(&self, bus: u8) -> Result<Frame, CodecError> {
        dbc::STEERING_STATUS.encode(
            bus,
            &[
                ("COUNTER", f64::from(self.counter % dbc::STEERING_COUNTER_MODULUS)),
                ("CONTROL_STATUS", f64::from(self.control_status & 0xF)),
                ("STEERING_ANGLE", self.angle_deg),
                ("STEERING_TORQUE", self.motor_torque),
            ],
        )
    }
}
