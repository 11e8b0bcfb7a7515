//! Signal database: the per-message layouts this layer reads and writes.
//!
//! These tables are lookup data only. Every layout decision lives here so the synthesizers
//! never touch bit offsets directly.

use crate::can::MAX_PAYLOAD_LEN;
use crate::codec::{ChecksumKind, ChecksumSeed, ChecksumSpec, CounterSpec, MessageSpec, SignalSpec};
use static_assertions::const_assert;

pub const CRUISE_STALK_ID: u32 = 0x194;
pub const CRUISE_STATUS_ID: u32 = 0x200;
pub const DYNAMIC_CRUISE_STATUS_ID: u32 = 0x193;
pub const SPEED_ID: u32 = 0x1A0;
pub const BRAKE_ID: u32 = 0xA8;
pub const ACC_PEDAL_ID: u32 = 0xAA;
pub const STEERING_ANGLE_ID: u32 = 0xC4;
pub const TRANSMISSION_ID: u32 = 0x1D2;
pub const STEERING_COMMAND_ID: u32 = 0x22E;
pub const STEERING_STATUS_ID: u32 = 0x22F;
/// Brake module present only on cars with a separate longitudinal controller.
pub const LONGITUDINAL_MODULE_ID: u32 = 0x0D5;

/// Stock stalk counter runs 0..=14.
pub const CRUISE_STALK_COUNTER_MODULUS: u8 = 15;
pub const STEERING_COUNTER_MODULUS: u8 = 16;

pub const SPEED_FACTOR_KPH: f64 = 0.103;
pub const STEERING_ANGLE_FACTOR: f64 = 180.0 / 4096.0;
pub const SERVO_ANGLE_FACTOR: f64 = 1.0 / 128.0;
pub const SERVO_TORQUE_FACTOR: f64 = 1.0 / 256.0;

pub const CRUISE_STALK: MessageSpec = MessageSpec {
    name: "CruiseControlStalk",
    id: CRUISE_STALK_ID,
    len: 4,
    signals: &[
        SignalSpec::raw("Checksum_0x194", 0, 8),
        SignalSpec::raw("Counter_0x194", 8, 4),
        SignalSpec::raw("requests_0xF", 12, 4),
        SignalSpec::raw("plus1", 16, 1),
        SignalSpec::raw("minus1", 17, 1),
        SignalSpec::raw("plus5", 18, 1),
        SignalSpec::raw("minus5", 19, 1),
        SignalSpec::raw("cancel", 20, 1),
        SignalSpec::raw("resume", 21, 1),
        SignalSpec::raw("cancel_lever_up", 22, 1),
        SignalSpec::raw("setMe_0xFC", 24, 8),
    ],
    checksum: Some(ChecksumSpec {
        signal: "Checksum_0x194",
        kind: ChecksumKind::Sum8(ChecksumSeed::Zero),
    }),
    counter: Some(CounterSpec {
        signal: "Counter_0x194",
        modulus: CRUISE_STALK_COUNTER_MODULUS,
    }),
};

pub const CRUISE_STATUS: MessageSpec = MessageSpec {
    name: "CruiseControlStatus",
    id: CRUISE_STATUS_ID,
    len: 8,
    signals: &[
        SignalSpec::raw("CruiseControlSetpointSpeed", 0, 8),
        SignalSpec::raw("CruiseControlActiveFlag", 13, 1),
    ],
    checksum: None,
    counter: None,
};

pub const DYNAMIC_CRUISE_STATUS: MessageSpec = MessageSpec {
    name: "DynamicCruiseControlStatus",
    id: DYNAMIC_CRUISE_STATUS_ID,
    len: 8,
    signals: &[
        SignalSpec::raw("CruiseControlSetpointSpeed", 32, 8),
        SignalSpec::raw("CruiseActive", 43, 1),
    ],
    checksum: None,
    counter: None,
};

pub const SPEED: MessageSpec = MessageSpec {
    name: "Speed",
    id: SPEED_ID,
    len: 8,
    signals: &[
        SignalSpec::scaled("VehicleSpeed", 0, 12, false, SPEED_FACTOR_KPH),
        SignalSpec::raw("Checksum_0x1A0", 56, 8),
    ],
    checksum: Some(ChecksumSpec {
        signal: "Checksum_0x1A0",
        kind: ChecksumKind::Sum8(ChecksumSeed::Id),
    }),
    counter: None,
};

pub const BRAKE: MessageSpec = MessageSpec {
    name: "EngineAndBrake",
    id: BRAKE_ID,
    len: 8,
    signals: &[
        SignalSpec::raw("BrakePressed", 61, 1),
        SignalSpec::raw("BrakeActive", 62, 1),
    ],
    checksum: None,
    counter: None,
};

pub const ACC_PEDAL: MessageSpec = MessageSpec {
    name: "AccPedal",
    id: ACC_PEDAL_ID,
    len: 8,
    signals: &[
        SignalSpec::raw("Checksum_0xAA", 0, 8),
        SignalSpec::raw("Counter_0xAA", 8, 4),
        SignalSpec::scaled("AcceleratorPedalPercentage", 16, 16, false, 0.04),
        SignalSpec::raw("AcceleratorPedalPressed", 50, 1),
    ],
    checksum: Some(ChecksumSpec {
        signal: "Checksum_0xAA",
        kind: ChecksumKind::Sum8(ChecksumSeed::Id),
    }),
    counter: Some(CounterSpec {
        signal: "Counter_0xAA",
        modulus: 15,
    }),
};

pub const STEERING_ANGLE: MessageSpec = MessageSpec {
    name: "SteeringWheelAngle",
    id: STEERING_ANGLE_ID,
    len: 8,
    signals: &[
        SignalSpec::scaled("SteeringPosition", 7, 16, true, STEERING_ANGLE_FACTOR).big_endian(),
        SignalSpec::scaled("SteeringSpeed", 31, 16, true, STEERING_ANGLE_FACTOR).big_endian(),
    ],
    checksum: None,
    counter: None,
};

pub const TRANSMISSION: MessageSpec = MessageSpec {
    name: "TransmissionDataDisplay",
    id: TRANSMISSION_ID,
    len: 6,
    signals: &[
        SignalSpec::raw("ShiftLeverPosition", 0, 4),
        SignalSpec::raw("ShiftLeverPositionXor", 4, 4),
    ],
    checksum: None,
    counter: None,
};

pub const STEERING_COMMAND: MessageSpec = MessageSpec {
    name: "STEERING_COMMAND",
    id: STEERING_COMMAND_ID,
    len: 8,
    signals: &[
        SignalSpec::raw("CHECKSUM", 0, 8),
        SignalSpec::raw("COUNTER", 8, 4),
        SignalSpec::raw("STEER_MODE", 12, 2),
        SignalSpec::scaled("STEER_ANGLE", 16, 16, true, SERVO_ANGLE_FACTOR),
        SignalSpec::scaled("STEER_TORQUE", 32, 16, true, SERVO_TORQUE_FACTOR),
    ],
    checksum: Some(ChecksumSpec {
        signal: "CHECKSUM",
        kind: ChecksumKind::Sum8(ChecksumSeed::Id),
    }),
    counter: Some(CounterSpec {
        signal: "COUNTER",
        modulus: STEERING_COUNTER_MODULUS,
    }),
};

pub const STEERING_STATUS: MessageSpec = MessageSpec {
    name: "STEERING_STATUS",
    id: STEERING_STATUS_ID,
    len: 8,
    signals: &[
        SignalSpec::raw("CHECKSUM", 0, 8),
        SignalSpec::raw("COUNTER", 8, 4),
        SignalSpec::raw("CONTROL_STATUS", 12, 4),
        SignalSpec::scaled("STEERING_ANGLE", 16, 16, true, SERVO_ANGLE_FACTOR),
        SignalSpec::scaled("STEERING_TORQUE", 32, 16, true, SERVO_TORQUE_FACTOR),
    ],
    checksum: Some(ChecksumSpec {
        signal: "CHECKSUM",
        kind: ChecksumKind::Sum8(ChecksumSeed::Id),
    }),
    counter: Some(CounterSpec {
        signal: "COUNTER",
        modulus: STEERING_COUNTER_MODULUS,
    }),
};

pub const ALL_MESSAGES: &[MessageSpec] = &[
    CRUISE_STALK,
    CRUISE_STATUS,
    DYNAMIC_CRUISE_STATUS,
    SPEED,
    BRAKE,
    ACC_PEDAL,
    STEERING_ANGLE,
    TRANSMISSION,
    STEERING_COMMAND,
    STEERING_STATUS,
];

const_assert!(CRUISE_STALK.len <= MAX_PAYLOAD_LEN);
const_assert!(CRUISE_STATUS.len <= MAX_PAYLOAD_LEN);
const_assert!(DYNAMIC_CRUISE_STATUS.len <= MAX_PAYLOAD_LEN);
const_assert!(SPEED.len <= MAX_PAYLOAD_LEN);
const_assert!(BRAKE.len <= MAX_PAYLOAD_LEN);
const_assert!(ACC_PEDAL.len <= MAX_PAYLOAD_LEN);
const_assert!(STEERING_ANGLE.len <= MAX_PAYLOAD_LEN);
const_assert!(TRANSMISSION.len <= MAX_PAYLOAD_LEN);
const_assert!(STEERING_COMMAND.len <= MAX_PAYLOAD_LEN);
const_assert!(STEERING_STATUS.len <= MAX_PAYLOAD_LEN);
// Both rolling counters are 4-bit fields
const_assert!(CRUISE_STALK_COUNTER_MODULUS <= 16);
const_assert!(STEERING_COUNTER_MODULUS <= 16);

pub fn by_id(id: u32) -> Option<&'static MessageSpec> {
    ALL_MESSAGES.iter().find(|m| m.id == id)
}

pub fn by_name(name: &str) -> Option<&'static MessageSpec> {
    ALL_MESSAGES.iter().find(|m| m.name.eq_ignore_ascii_case(name))
}
