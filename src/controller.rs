//! Per-tick orchestration of the cruise emulator and the steering synthesizer.

use crate::can::{CanBus, Frame};
use crate::codec::CodecError;
use crate::config::{ConfigError, ControllerConfig};
use crate::cruise::{CruiseAction, CruiseInputs, CruiseStalkEmulator};
use crate::state::VehicleState;
use crate::steering::{ActuatorCommand, SteeringInputs, SteeringSynthesizer};
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

/// One stalk frame and one servo frame at most.
pub const MAX_FRAMES_PER_TICK: usize = 2;

/// Upstream requests for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlInputs {
    pub enabled: bool,
    pub lat_active: bool,
    /// m/s²
    pub accel: f32,
    /// Nm
    pub steer_torque: f32,
    /// deg
    pub steer_angle: f32,
}

/// What was actually applied, for upstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorFeedback {
    pub applied_torque: f32,
    pub angle_delta: f32,
    pub desired_speed: f32,
    pub speed_error_request: f32,
    pub cruise_action: Option<CruiseAction>,
    pub steer_command: Option<ActuatorCommand>,
}

#[derive(Debug, Clone)]
pub struct TickOutput {
    pub frames: ArrayVec<Frame, MAX_FRAMES_PER_TICK>,
    pub feedback: ActuatorFeedback,
}

#[derive(Debug)]
pub struct ActuationController {
    config: ControllerConfig,
    cruise: CruiseStalkEmulator,
    steering: Option<SteeringSynthesizer>,
}

impl ActuationController {
    pub fn new(config: ControllerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let caps = config.capabilities;
        let cruise = CruiseStalkEmulator::new(config.cruise.clone(), caps.cruise_bus, caps.min_enable_speed);
        let steering = caps
            .steering
            .then(|| SteeringSynthesizer::new(config.steering.clone()));
        Ok(Self {
            config,
            cruise,
            steering,
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn cruise(&self) -> &CruiseStalkEmulator {
        &self.cruise
    }

    pub fn steering(&self) -> Option<&SteeringSynthesizer> {
        self.steering.as_ref()
    }

    /// Runs cruise then steering against one state snapshot.
    ///
    /// `controls_allowed` is read from the safety monitor and never written here.
    pub fn update(
        &mut self,
        now_ns: u64,
        inputs: &ControlInputs,
        state: &VehicleState,
        controls_allowed: bool,
    ) -> Result<TickOutput, CodecError> {
        let mut frames = ArrayVec::new();

        let cruise = self.cruise.update(
            now_ns,
            &CruiseInputs {
                enabled: inputs.enabled,
                controls_allowed,
                accel: inputs.accel,
                v_ego: state.v_ego,
                cruise_enabled: state.cruise_enabled,
                cruise_setpoint: state.cruise_setpoint(),
                gas_pressed: state.gas_pressed,
                stalk: state.stalk,
                unit: state.unit(),
                unit_fault: state.unit_fault,
            },
        );
        if let Some(command) = cruise.command {
            frames.push(command.to_frame(self.cruise.bus())?);
        }

        let steer_command = match self.steering.as_mut() {
            Some(steering) => {
                let tick = steering.update(
                    now_ns,
                    &SteeringInputs {
                        enabled: inputs.enabled,
                        lat_active: inputs.lat_active,
                        controls_allowed,
                        desired_torque: inputs.steer_torque,
                        desired_angle: inputs.steer_angle,
                        measured_angle: state.steering_angle,
                        measured_torque: state.servo_torque(),
                        v_ego: state.v_ego,
                        servo_status: state.servo_status(),
                    },
                );
                frames.push(tick.frame.to_frame(CanBus::SERVO_CAN)?);
                Some(tick.command)
            }
            None => None,
        };

        Ok(TickOutput {
            frames,
            feedback: ActuatorFeedback {
                applied_torque: steer_command.map_or(0.0, |c| c.torque()),
                angle_delta: steer_command.map_or(0.0, |c| c.angle_delta()),
                desired_speed: cruise.desired_speed,
                speed_error_request: cruise.speed_error_request,
                cruise_action: cruise.intent.map(|i| i.action),
                steer_command,
            },
        })
    }
}
