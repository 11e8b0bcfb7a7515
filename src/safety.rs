//! Independent safety monitor for the stalk/servo harness.
//!
//! Everything here is deliberately separate from the synthesizers: limits are compiled-in,
//! frames are parsed straight from their bytes, and checksums are recomputed locally. The
//! synthesizers only ever read `controls_allowed`; this module is the only writer.

use crate::can::Frame;
use crate::heartbeat::HeartbeatWatch;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const MAX_SAFETY_EVENTS: usize = 32;

pub const CONTROL_HZ: f32 = 100.0;

const STALK_ID: u32 = 0x194;
const DYNAMIC_CRUISE_ID: u32 = 0x193;
const CRUISE_ID: u32 = 0x200;
const TRANSMISSION_ID: u32 = 0x1D2;
const BRAKE_ID: u32 = 0xA8;
const SPEED_ID: u32 = 0x1A0;
const ANGLE_ID: u32 = 0xC4;
const SERVO_CMD_ID: u32 = 0x22E;

const TX_WHITELIST: [(u32, u8); 3] = [(STALK_ID, 0), (STALK_ID, 1), (SERVO_CMD_ID, 1)];
const FWD_BLOCKED: [(u8, u32); 4] = [(2, 0x169), (2, 0x2B1), (2, 0x4CC), (0, 0x280)];

const LEVER_DRIVE: u8 = 8;
const SPEED_RAW_TO_MS: f32 = 0.103 / 3.6;
const ANGLE_RAW_TO_DEG: f32 = 0.043_945_312_5;
const SERVO_ANGLE_LSB: f32 = 1.0 / 128.0;
const SERVO_TORQUE_LSB: f32 = 1.0 / 256.0;

const MAX_TORQUE: f32 = 12.0;
/// Nm per tick while torque grows.
const MAX_TORQUE_DELTA_UP: f32 = 0.1;
const TORQUE_TOLERANCE: f32 = SERVO_TORQUE_LSB + 1e-4;
/// Lookups below are widened by this much to tolerate rounding on both sides.
const LIMIT_MARGIN: f32 = 1.0;
const MIN_ENABLE_SPEED: f32 = 30.0 / 3.6;
const ACTUATOR_SWITCH_TIMEOUT_NS: u64 = 1_000_000_000;

struct Lookup3 {
    bp: [f32; 3],
    v: [f32; 3],
}

impl Lookup3 {
    fn interp(&self, x: f32) -> f32 {
        if x <= self.bp[0] {
            return self.v[0];
        }
        for i in 1..3 {
            if x <= self.bp[i] {
                let t = (x - self.bp[i - 1]) / (self.bp[i] - self.bp[i - 1]);
                return self.v[i - 1] + t * (self.v[i] - self.v[i - 1]);
            }
        }
        self.v[2]
    }
}

const LOOKUP_MAX_ANGLE: Lookup3 = Lookup3 {
    bp: [5.0, 15.0, 30.0],
    v: [200.0, 20.0, 10.0],
};
const LOOKUP_ANGLE_RATE_UP: Lookup3 = Lookup3 {
    bp: [0.0, 5.0, 15.0],
    v: [500.0, 80.0, 15.0],
};
const LOOKUP_ANGLE_RATE_DOWN: Lookup3 = Lookup3 {
    bp: [0.0, 5.0, 15.0],
    v: [500.0, 350.0, 40.0],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxRejection {
    NotWhitelisted,
    Malformed,
    BadChecksum,
    ControlsNotAllowed,
    AngleAboveMax,
    AngleRateExceeded,
    TorqueAboveMax,
    TorqueRateExceeded,
    SoftOffIncreasing,
    BelowMinEnableSpeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisengageReason {
    CruiseDisengaged,
    StalkCancel,
    GearNotDrive,
    BrakePressed,
    AngleAboveMax,
    AngleRateExceeded,
    HeartbeatLost,
    TxRejected(TxRejection),
    Requested,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyEventRecord {
    pub reason: DisengageReason,
    pub timestamp_ns: u64,
    pub v_ego: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyState {
    pub controls_allowed: bool,
    pub actuator_enabled: bool,
    pub cruise_engaged_last: bool,
    pub lever_position: Option<u8>,
    pub v_ego: f32,
    pub max_angle: f32,
    pub angle_rate_up: f32,
    pub angle_rate_down: f32,
    /// Last measured steering angle.
    pub rt_angle_last: f32,
    /// Absolute angle implied by the last accepted servo command.
    pub desired_angle_last: f32,
    pub torque_last: f32,
    pub disengage_count: u32,
}

#[derive(Debug)]
pub struct SafetyMonitor {
    state: SafetyState,
    event_history: Vec<SafetyEventRecord, MAX_SAFETY_EVENTS>,
    heartbeat: Option<HeartbeatWatch>,
    now_ns: u64,
    last_servo_accept_ns: Option<u64>,
}

impl Default for SafetyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyMonitor {
    pub fn new() -> Self {
        let mut monitor = Self {
            state: SafetyState {
                controls_allowed: false,
                actuator_enabled: false,
                cruise_engaged_last: false,
                lever_position: None,
                v_ego: 0.0,
                max_angle: 0.0,
                angle_rate_up: 0.0,
                angle_rate_down: 0.0,
                rt_angle_last: 0.0,
                desired_angle_last: 0.0,
                torque_last: 0.0,
                disengage_count: 0,
            },
            event_history: Vec::new(),
            heartbeat: None,
            now_ns: 0,
            last_servo_accept_ns: None,
        };
        monitor.update_limits(0.0);
        monitor
    }

    /// Back to power-on state. Controls start disallowed.
    pub fn init(&mut self) {
        let heartbeat = self.heartbeat.take();
        let now_ns = self.now_ns;
        *self = Self::new();
        self.heartbeat = heartbeat;
        self.now_ns = now_ns;
        info!("safety monitor initialised");
    }

    pub fn attach_heartbeat(&mut self, watch: HeartbeatWatch) {
        self.heartbeat = Some(watch);
    }

    /// Advances the monitor clock and evaluates the time-based checks.
    pub fn tick(&mut self, now_ns: u64) {
        self.now_ns = now_ns;
        if let Some(watch) = self.heartbeat.as_mut() {
            if !watch.check(now_ns) {
                self.disallow(DisengageReason::HeartbeatLost);
            }
        }
        self.update_actuator_output();
    }

    pub fn get_state(&self) -> &SafetyState {
        &self.state
    }

    pub fn controls_allowed(&self) -> bool {
        self.state.controls_allowed
    }

    /// Explicit re-arm (or disarm) from the host.
    pub fn set_controls_allowed(&mut self, allowed: bool) {
        if allowed {
            self.allow();
        } else {
            self.disallow(DisengageReason::Requested);
        }
        self.update_actuator_output();
    }

    pub fn actuator_enabled(&self) -> bool {
        self.state.actuator_enabled
    }

    pub fn get_event_history(&self) -> &[SafetyEventRecord] {
        &self.event_history
    }

    pub fn last_disengage_reason(&self) -> Option<DisengageReason> {
        self.event_history.last().map(|e| e.reason)
    }

    pub fn rx_hook(&mut self, frame: &Frame) {
        let b = |i: usize| frame.byte(i);

        match frame.id {
            // Check cruise engagement
            CRUISE_ID | DYNAMIC_CRUISE_ID => {
                let engaged = if frame.id == DYNAMIC_CRUISE_ID {
                    (b(5) >> 3) & 1 == 1
                } else {
                    (b(1) >> 5) & 1 == 1
                };
                if !engaged {
                    self.disallow(DisengageReason::CruiseDisengaged);
                } else if !self.state.cruise_engaged_last {
                    self.allow();
                }
                self.state.cruise_engaged_last = engaged;
            }

            // Check stalk cancel
            STALK_ID => {
                if (b(2) >> 4) & 1 == 1 {
                    self.disallow(DisengageReason::StalkCancel);
                }
            }

            // Check gear
            TRANSMISSION_ID => {
                let lever = b(0) & 0xF;
                let complement = b(0) >> 4;
                self.state.lever_position = (lever == complement ^ 0xF).then_some(lever);
                if self.state.lever_position != Some(LEVER_DRIVE) {
                    self.disallow(DisengageReason::GearNotDrive);
                }
            }

            // Check brake
            BRAKE_ID => {
                if b(7) & 0x60 != 0 {
                    self.disallow(DisengageReason::BrakePressed);
                }
            }

            SPEED_ID => {
                let raw = (u16::from(b(1) & 0xF) << 8) | u16::from(b(0));
                self.update_limits(f32::from(raw) * SPEED_RAW_TO_MS);
            }

            // Check measured angle and rate
            ANGLE_ID => {
                let angle = f32::from(i16::from_be_bytes([b(0), b(1)])) * ANGLE_RAW_TO_DEG;
                let rate = f32::from(i16::from_be_bytes([b(3), b(4)])) * ANGLE_RAW_TO_DEG;

                if angle.abs() > self.state.max_angle {
                    self.disallow(DisengageReason::AngleAboveMax);
                }
                let outward_rate = if self.state.rt_angle_last > 0.0 { rate } else { -rate };
                if outward_rate > self.state.angle_rate_up || outward_rate < -self.state.angle_rate_down {
                    self.disallow(DisengageReason::AngleRateExceeded);
                }
                self.state.rt_angle_last = angle;
            }

            _ => {}
        }

        self.update_actuator_output();
    }

    /// Whether `frame` may be transmitted. A rejection also disallows controls.
    pub fn tx_hook(&mut self, frame: &Frame) -> bool {
        match self.check_tx(frame) {
            Ok(()) => {
                if frame.id == SERVO_CMD_ID && self.state.controls_allowed {
                    self.last_servo_accept_ns = Some(self.now_ns);
                }
                self.update_actuator_output();
                true
            }
            Err(rejection) => {
                warn!(id = frame.id, bus = frame.bus, ?rejection, "tx rejected");
                self.disallow(DisengageReason::TxRejected(rejection));
                self.update_actuator_output();
                false
            }
        }
    }

    /// Destination bus for a relayed frame, `None` to drop it.
    pub fn fwd_hook(&self, bus: u8, frame: &Frame) -> Option<u8> {
        if FWD_BLOCKED.contains(&(bus, frame.id)) {
            return None;
        }
        match bus {
            0 => Some(2),
            2 => Some(0),
            _ => None,
        }
    }

    fn check_tx(&mut self, frame: &Frame) -> Result<(), TxRejection> {
        if !TX_WHITELIST.contains(&(frame.id, frame.bus)) {
            return Err(TxRejection::NotWhitelisted);
        }
        match frame.id {
            STALK_ID => self.check_stalk(frame),
            _ => self.check_servo(frame),
        }
    }

    fn check_stalk(&self, frame: &Frame) -> Result<(), TxRejection> {
        if frame.len() < 4 {
            return Err(TxRejection::Malformed);
        }
        if sum_checksum(&frame.data, 0) != frame.byte(0) {
            return Err(TxRejection::BadChecksum);
        }

        let requests = frame.byte(2);
        let accelerate = requests & 0x05 != 0 || requests & 0x20 != 0; // plus1, plus5, resume
        let decelerate = requests & 0x0A != 0; // minus1, minus5

        if (accelerate || decelerate) && !self.state.controls_allowed {
            return Err(TxRejection::ControlsNotAllowed);
        }
        if accelerate && self.state.v_ego < MIN_ENABLE_SPEED {
            return Err(TxRejection::BelowMinEnableSpeed);
        }
        Ok(())
    }

    fn check_servo(&mut self, frame: &Frame) -> Result<(), TxRejection> {
        if frame.len() < 6 {
            return Err(TxRejection::Malformed);
        }
        if sum_checksum(&frame.data, SERVO_CMD_ID) != frame.byte(0) {
            return Err(TxRejection::BadChecksum);
        }

        let mode = (frame.byte(1) >> 4) & 0x3;
        let angle_delta = f32::from(i16::from_le_bytes([frame.byte(2), frame.byte(3)])) * SERVO_ANGLE_LSB;
        let torque = f32::from(i16::from_le_bytes([frame.byte(4), frame.byte(5)])) * SERVO_TORQUE_LSB;

        match mode {
            // Off
            0 => {
                self.state.desired_angle_last = self.state.rt_angle_last;
                self.state.torque_last = 0.0;
                Ok(())
            }
            // Soft-off: magnitude may only shrink, toward zero
            3 => {
                let last = self.state.torque_last;
                let shrinking = torque.abs() <= last.abs() + TORQUE_TOLERANCE
                    && (torque * last >= 0.0 || torque.abs() <= TORQUE_TOLERANCE);
                if !shrinking {
                    return Err(TxRejection::SoftOffIncreasing);
                }
                self.state.desired_angle_last = self.state.rt_angle_last;
                self.state.torque_last = torque;
                Ok(())
            }
            // Torque or angle control
            _ => {
                if !self.state.controls_allowed {
                    return Err(TxRejection::ControlsNotAllowed);
                }
                self.check_torque(torque)?;
                if mode == 2 {
                    self.check_angle(angle_delta)?;
                }
                self.state.torque_last = torque;
                Ok(())
            }
        }
    }

    fn check_torque(&self, torque: f32) -> Result<(), TxRejection> {
        if torque.abs() > MAX_TORQUE + TORQUE_TOLERANCE {
            return Err(TxRejection::TorqueAboveMax);
        }
        let last = self.state.torque_last;
        let highest = last.max(0.0) + MAX_TORQUE_DELTA_UP + TORQUE_TOLERANCE;
        let lowest = last.min(0.0) - MAX_TORQUE_DELTA_UP - TORQUE_TOLERANCE;
        if torque > highest || torque < lowest {
            return Err(TxRejection::TorqueRateExceeded);
        }
        Ok(())
    }

    fn check_angle(&mut self, angle_delta: f32) -> Result<(), TxRejection> {
        let desired = self.state.rt_angle_last + angle_delta;
        if desired.abs() > self.state.max_angle {
            return Err(TxRejection::AngleAboveMax);
        }
        let rate = angle_delta * CONTROL_HZ;
        let outward_rate = if self.state.desired_angle_last > 0.0 { rate } else { -rate };
        if outward_rate > self.state.angle_rate_up || outward_rate < -self.state.angle_rate_down {
            return Err(TxRejection::AngleRateExceeded);
        }
        self.state.desired_angle_last = desired;
        Ok(())
    }

    fn update_limits(&mut self, v_ego: f32) {
        self.state.v_ego = v_ego;
        self.state.max_angle = LOOKUP_MAX_ANGLE.interp(v_ego) + LIMIT_MARGIN;
        self.state.angle_rate_up = LOOKUP_ANGLE_RATE_UP.interp(v_ego) + LIMIT_MARGIN;
        self.state.angle_rate_down = LOOKUP_ANGLE_RATE_DOWN.interp(v_ego) + LIMIT_MARGIN;
    }

    fn allow(&mut self) {
        if !self.state.controls_allowed {
            info!(v_ego = self.state.v_ego, "controls allowed");
        }
        self.state.controls_allowed = true;
        self.state.desired_angle_last = self.state.rt_angle_last;
    }

    fn disallow(&mut self, reason: DisengageReason) {
        if !self.state.controls_allowed {
            return;
        }
        self.state.controls_allowed = false;
        self.state.disengage_count = self.state.disengage_count.saturating_add(1);
        warn!(?reason, v_ego = self.state.v_ego, "controls disallowed");
        self.record_event(reason);
    }

    fn record_event(&mut self, reason: DisengageReason) {
        if self.event_history.is_full() {
            self.event_history.remove(0);
        }
        let _ = self.event_history.push(SafetyEventRecord {
            reason,
            timestamp_ns: self.now_ns,
            v_ego: self.state.v_ego,
        });
    }

    fn update_actuator_output(&mut self) {
        let recent = self
            .last_servo_accept_ns
            .is_some_and(|t| self.now_ns.saturating_sub(t) < ACTUATOR_SWITCH_TIMEOUT_NS);
        let enabled = self.state.controls_allowed && recent;
        if enabled != self.state.actuator_enabled {
            debug!(enabled, "actuator enable output switched");
        }
        self.state.actuator_enabled = enabled;
    }
}

/// Byte sum plus seed with the checksum byte excluded, carry folded into eight bits.
fn sum_checksum(data: &[u8], seed: u32) -> u8 {
    let mut sum = seed;
    for &byte in data.iter().skip(1) {
        sum += u32::from(byte);
    }
    ((sum & 0xFF) + (sum >> 8)) as u8
}
