//! Steering command synthesis for the stepper servo.
//!
//! One command per control tick, either torque control or angle control depending on what the
//! car was configured with. Disengagement and driver override ramp torque down through
//! `SoftOff` frames, faults drop straight to `Off` and hold it for the cool-down window.

use crate::fault::{FaultManager, SteeringFaultKind};
use crate::messages::{SteerMode, SteeringCommandFrame};
use crate::rate_limit::{Lookup, LookupError, RateLimiter, StepLimits};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Below this reference angle the outward/inward split is ambiguous, so the tighter bound is used.
const NEAR_CENTER_DEG: f32 = 0.5;
const OVERRIDE_MARGIN_DEG: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SteeringControlMode {
    Torque,
    Angle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringParams {
    pub control_hz: f32,
    pub mode: SteeringControlMode,
    /// Nm
    pub steer_max: f32,
    /// Max distance between commanded and measured motor torque, Nm.
    pub torque_error_max: f32,
    /// Torque windup and unwind over speed (m/s), Nm/s.
    pub torque_windup: Lookup,
    pub torque_unwind: Lookup,
    /// Max steering angle over speed, deg.
    pub max_angle: Lookup,
    /// Angle rate limits over speed, deg/s.
    pub angle_rate_up: Lookup,
    pub angle_rate_down: Lookup,
    /// Feed-forward holding torque over target angle, Nm.
    pub holding_torque: Lookup,
    /// Nm per deg/s².
    pub inertia_gain: f32,
    /// Nm/s
    pub soft_off_rate: f32,
    pub angle_fault_threshold: f32,
    pub fault_cooldown_s: f32,
    pub override_friction: f32,
    pub override_centering: f32,
}

impl Default for SteeringParams {
    fn default() -> Self {
        Self {
            control_hz: 100.0,
            mode: SteeringControlMode::Torque,
            steer_max: 12.0,
            torque_error_max: 999.0,
            torque_windup: Lookup::constant(10.0),
            torque_unwind: Lookup::constant(1000.0),
            max_angle: table(&[5.0, 15.0, 30.0], &[200.0, 20.0, 10.0]),
            angle_rate_up: table(&[0.0, 5.0, 15.0], &[500.0, 80.0, 15.0]),
            angle_rate_down: table(&[0.0, 5.0, 15.0], &[500.0, 350.0, 40.0]),
            holding_torque: table(
                &[-40.0, -6.0, -4.0, -3.0, -2.0, -1.0, -0.5, 0.5, 1.0, 2.0, 3.0, 4.0, 6.0, 40.0],
                &[-6.0, -2.85, -2.5, -2.25, -2.0, -1.65, -1.0, 1.0, 1.65, 2.0, 2.25, 2.5, 2.85, 6.0],
            ),
            inertia_gain: 0.0005,
            soft_off_rate: 20.0,
            angle_fault_threshold: 10.0,
            fault_cooldown_s: 1.0,
            override_friction: 0.23,
            override_centering: 0.004,
        }
    }
}

// Built-in tables are known-good; fall back to a zero table rather than panic.
fn table(bp: &[f32], v: &[f32]) -> Lookup {
    Lookup::new(bp, v).unwrap_or_else(|_| Lookup::constant(0.0))
}

impl SteeringParams {
    pub fn validate(&self) -> Result<(), LookupError> {
        for lookup in [
            &self.torque_windup,
            &self.torque_unwind,
            &self.max_angle,
            &self.angle_rate_up,
            &self.angle_rate_down,
            &self.holding_torque,
        ] {
            lookup.validate()?;
        }
        Ok(())
    }

    pub fn dt(&self) -> f32 {
        1.0 / self.control_hz
    }
}

/// One tick's command to the servo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActuatorCommand {
    Off,
    /// Ramping torque back to zero after disengagement.
    SoftOff { torque: f32 },
    TorqueControl { torque: f32 },
    /// `angle_delta` is relative to the measured angle.
    AngleControl { angle_delta: f32, holding_torque: f32 },
}

impl ActuatorCommand {
    pub fn mode(&self) -> SteerMode {
        match self {
            ActuatorCommand::Off => SteerMode::Off,
            ActuatorCommand::SoftOff { .. } => SteerMode::SoftOff,
            ActuatorCommand::TorqueControl { .. } => SteerMode::TorqueControl,
            ActuatorCommand::AngleControl { .. } => SteerMode::AngleControl,
        }
    }

    pub fn torque(&self) -> f32 {
        match *self {
            ActuatorCommand::Off => 0.0,
            ActuatorCommand::SoftOff { torque } | ActuatorCommand::TorqueControl { torque } => torque,
            ActuatorCommand::AngleControl { holding_torque, .. } => holding_torque,
        }
    }

    pub fn angle_delta(&self) -> f32 {
        match *self {
            ActuatorCommand::AngleControl { angle_delta, .. } => angle_delta,
            _ => 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ActuatorCommand::TorqueControl { .. } | ActuatorCommand::AngleControl { .. }
        )
    }

    pub fn to_frame(&self, counter: u8) -> SteeringCommandFrame {
        SteeringCommandFrame::new(
            counter,
            self.mode(),
            f64::from(self.angle_delta()),
            f64::from(self.torque()),
        )
    }
}

/// Per-tick inputs. Angles in degrees, torque in Nm, speed in m/s.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SteeringInputs {
    pub enabled: bool,
    pub lat_active: bool,
    pub controls_allowed: bool,
    pub desired_torque: f32,
    pub desired_angle: f32,
    pub measured_angle: f32,
    pub measured_torque: f32,
    pub v_ego: f32,
    /// Control status reported by the servo, 0 when healthy.
    pub servo_status: u8,
}

impl SteeringInputs {
    pub fn is_finite(&self) -> bool {
        [
            self.desired_torque,
            self.desired_angle,
            self.measured_angle,
            self.measured_torque,
            self.v_ego,
        ]
        .iter()
        .all(|x| x.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringTick {
    pub command: ActuatorCommand,
    pub frame: SteeringCommandFrame,
    pub override_detected: bool,
}

/// Whether the driver moved a stepper-held wheel away from the command.
///
/// Below the release angle the wheel returns toward center on its own, so nothing can be told.
pub fn detect_stepper_override(
    steer_cmd: f32,
    steer_act: f32,
    v_ego: f32,
    centering_coeff: f32,
    friction_torque: f32,
) -> bool {
    let release_angle = friction_torque / (v_ego.max(1.0).powi(2) * centering_coeff);
    if steer_cmd.abs() <= release_angle {
        return false;
    }
    if steer_cmd > 0.0 {
        steer_act - steer_cmd > OVERRIDE_MARGIN_DEG || steer_act < 0.0
    } else {
        steer_act - steer_cmd < -OVERRIDE_MARGIN_DEG || steer_act > 0.0
    }
}

#[derive(Debug)]
pub struct SteeringSynthesizer {
    params: SteeringParams,
    torque_limiter: RateLimiter,
    angle_limiter: RateLimiter,
    last_target_angle: f32,
    prev_target_angle: f32,
    last_commanded_angle: f32,
    last_command: ActuatorCommand,
    faults: FaultManager,
    frame_counter: u8,
}

impl SteeringSynthesizer {
    pub fn new(params: SteeringParams) -> Self {
        let dt = params.dt();
        let torque_limiter =
            RateLimiter::new(params.torque_windup.scaled(dt), params.torque_unwind.scaled(dt));
        let angle_limiter =
            RateLimiter::new(params.angle_rate_up.scaled(dt), params.angle_rate_down.scaled(dt));
        let faults = FaultManager::new(params.fault_cooldown_s);
        Self {
            params,
            torque_limiter,
            angle_limiter,
            last_target_angle: 0.0,
            prev_target_angle: 0.0,
            last_commanded_angle: 0.0,
            last_command: ActuatorCommand::Off,
            faults,
            frame_counter: 0,
        }
    }

    pub fn params(&self) -> &SteeringParams {
        &self.params
    }

    pub fn last_command(&self) -> ActuatorCommand {
        self.last_command
    }

    pub fn applied_torque(&self) -> f32 {
        self.last_command.torque()
    }

    pub fn faults(&self) -> &FaultManager {
        &self.faults
    }

    pub fn in_fault_cooldown(&self, now_ns: u64) -> bool {
        self.faults.in_cooldown(now_ns)
    }

    /// Rate-limited angle target of the last tick. Tracks the wheel outside angle control.
    pub fn target_angle(&self) -> f32 {
        self.last_target_angle
    }

    /// Per-tick angle step bounds at `v_ego`.
    pub fn angle_step_limits(&self, v_ego: f32) -> StepLimits {
        self.angle_limiter.limits(v_ego)
    }

    pub fn update(&mut self, now_ns: u64, inputs: &SteeringInputs) -> SteeringTick {
        self.check_faults(now_ns, inputs);

        let override_detected = self.last_command.is_active() && self.override_detected(inputs);
        if override_detected {
            info!(
                measured = inputs.measured_angle,
                target = self.last_target_angle,
                "driver steering override"
            );
        }

        let fault_active = self.faults.in_cooldown(now_ns);
        let engaged = inputs.enabled && inputs.controls_allowed && !fault_active && !override_detected;

        let command = if fault_active {
            ActuatorCommand::Off
        } else if engaged {
            match self.params.mode {
                SteeringControlMode::Torque => self.torque_control(inputs),
                SteeringControlMode::Angle => self.angle_control(inputs),
            }
        } else {
            self.soft_off()
        };

        if !matches!(command, ActuatorCommand::AngleControl { .. }) && inputs.measured_angle.is_finite() {
            self.last_target_angle = inputs.measured_angle;
            self.prev_target_angle = inputs.measured_angle;
            self.last_commanded_angle = inputs.measured_angle;
        }
        self.torque_limiter.reset(command.torque());

        if self.last_command.is_active() && !command.is_active() {
            debug!(?command, "steering disengaged");
        }
        self.last_command = command;

        let frame = command.to_frame(self.frame_counter);
        self.frame_counter = (self.frame_counter + 1) % crate::dbc::STEERING_COUNTER_MODULUS;

        SteeringTick {
            command,
            frame,
            override_detected,
        }
    }

    fn check_faults(&mut self, now_ns: u64, inputs: &SteeringInputs) {
        let mut faulted = false;

        // Nothing non-finite may reach the limiters
        if !inputs.is_finite() {
            self.faults.record_fault(SteeringFaultKind::NonFiniteInput, now_ns);
            faulted = true;
        }

        // Check servo-reported fault
        if inputs.servo_status != 0 {
            self.faults
                .record_fault(SteeringFaultKind::ServoStatus(inputs.servo_status), now_ns);
            faulted = true;
        }

        // Check lateral control availability
        if inputs.enabled && !inputs.lat_active {
            self.faults.record_fault(SteeringFaultKind::LateralInactive, now_ns);
            faulted = true;
        }

        // Check angle tracking
        if matches!(self.last_command, ActuatorCommand::AngleControl { .. })
            && (inputs.measured_angle - self.last_target_angle).abs() > self.params.angle_fault_threshold
        {
            self.faults.record_fault(SteeringFaultKind::AngleTracking, now_ns);
            faulted = true;
        }

        if faulted && self.last_command != ActuatorCommand::Off {
            warn!(status = inputs.servo_status, "steering fault, entering cool-down");
        }

        if !faulted && !self.faults.in_cooldown(now_ns) && self.faults.resolve_all(now_ns) > 0 {
            info!("steering fault cool-down elapsed");
        }
    }

    fn override_detected(&self, inputs: &SteeringInputs) -> bool {
        let steer_cmd = match self.params.mode {
            SteeringControlMode::Angle => self.last_target_angle,
            SteeringControlMode::Torque => inputs.desired_angle,
        };
        detect_stepper_override(
            steer_cmd,
            inputs.measured_angle,
            inputs.v_ego,
            self.params.override_centering,
            self.params.override_friction,
        )
    }

    fn soft_off(&self) -> ActuatorCommand {
        let last = self.last_command.torque();
        if last == 0.0 {
            return ActuatorCommand::Off;
        }
        if self.last_command.is_active() {
            debug!(torque = last, "soft-off started");
        }
        let step = self.params.soft_off_rate.abs() * self.params.dt();
        let torque = if last > 0.0 {
            (last - step).max(0.0)
        } else {
            (last + step).min(0.0)
        };
        if torque == 0.0 {
            ActuatorCommand::Off
        } else {
            ActuatorCommand::SoftOff { torque }
        }
    }

    fn torque_control(&mut self, inputs: &SteeringInputs) -> ActuatorCommand {
        let torque = self.torque_limiter.apply_toward_measured(
            inputs.desired_torque,
            inputs.measured_torque,
            inputs.v_ego,
            self.params.torque_error_max,
            self.params.steer_max,
        );
        ActuatorCommand::TorqueControl { torque }
    }

    fn angle_control(&mut self, inputs: &SteeringInputs) -> ActuatorCommand {
        let v_ego = inputs.v_ego;

        // Entering angle control: start the trajectory where the wheel is
        if !matches!(self.last_command, ActuatorCommand::AngleControl { .. }) {
            self.angle_limiter.reset(inputs.measured_angle);
            self.last_target_angle = inputs.measured_angle;
            self.prev_target_angle = inputs.measured_angle;
            self.last_commanded_angle = inputs.measured_angle;
        }

        let max_angle = self.params.max_angle.interp(v_ego);
        let bounded = inputs.desired_angle.clamp(-max_angle, max_angle);

        let target = self.angle_limiter.apply(bounded, v_ego);

        // Outward means away from center relative to the last commanded absolute angle
        let limits = self.angle_limiter.limits(v_ego);
        let reference = self.last_commanded_angle;
        let wanted = target - inputs.measured_angle;
        let outward = if reference > 0.0 { wanted > 0.0 } else { wanted < 0.0 };
        let step = if reference.abs() < NEAR_CENTER_DEG {
            limits.windup.min(limits.unwind)
        } else if outward {
            limits.windup
        } else {
            limits.unwind
        };
        let angle_delta = wanted.clamp(-step, step);
        self.last_commanded_angle = inputs.measured_angle + angle_delta;

        let hz = self.params.control_hz;
        let accel = (target - 2.0 * self.last_target_angle + self.prev_target_angle) * hz * hz;
        let feed_forward = self.params.holding_torque.interp(target) + self.params.inertia_gain * accel;
        let feed_forward = feed_forward.clamp(-self.params.steer_max, self.params.steer_max);
        let holding_torque = self.torque_limiter.apply_toward_measured(
            feed_forward,
            inputs.measured_torque,
            v_ego,
            self.params.torque_error_max,
            self.params.steer_max,
        );

        self.prev_target_angle = self.last_target_angle;
        self.last_target_angle = target;

        ActuatorCommand::AngleControl {
            angle_delta,
            holding_torque,
        }
    }
}
