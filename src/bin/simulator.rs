use stalkdrive::can::{CanBus, Frame};
use stalkdrive::config::{Capabilities, ControllerConfig};
use stalkdrive::dbc;
use stalkdrive::heartbeat::{spawn_heartbeat, Heartbeat, HEARTBEAT_PERIOD};
use stalkdrive::hooks::{SafetyHost, SafetyModel};
use stalkdrive::messages::{
    AccPedal, BrakeState, CruiseStalkState, CruiseStatus, CruiseVariant, Gear, SteerMode,
    SteeringCommandFrame, SteeringStatus, SteeringWheelAngle, VehicleSpeed,
};
use stalkdrive::steering::SteeringControlMode;
use stalkdrive::{ActuationController, ControlInputs, VehicleState};
use std::time::Duration;
use tokio::time;
use tracing::{error, info, warn};

const CONTROL_PERIOD: Duration = Duration::from_millis(10);
const SIM_DURATION_S: f32 = 60.0;
const STOCK_STALK_PERIOD_S: f32 = 0.2;
/// Cruise setpoint cannot move faster than this between presses.
const PRESS_SPACING_S: f32 = 0.1;

/// Toy car: cruise module, stock stalk traffic and a stepper servo.
struct ToyVehicle {
    t: f32,
    v_ego: f32,
    cruise_active: bool,
    setpoint_kph: f32,
    last_press_t: f32,
    stalk_counter: u8,
    next_stalk_t: f32,
    steering_angle: f32,
    steering_rate: f32,
    servo_counter: u8,
    servo_torque: f32,
}

impl ToyVehicle {
    fn new() -> Self {
        Self {
            t: 0.0,
            v_ego: 25.0,
            cruise_active: false,
            setpoint_kph: 0.0,
            last_press_t: 0.0,
            stalk_counter: 0,
            next_stalk_t: 0.0,
            steering_angle: 0.0,
            steering_rate: 0.0,
            servo_counter: 0,
            servo_torque: 0.0,
        }
    }

    fn fingerprint() -> Vec<(u8, u32)> {
        vec![
            (CanBus::PT_CAN, dbc::CRUISE_STATUS_ID),
            (CanBus::PT_CAN, dbc::SPEED_ID),
            (CanBus::PT_CAN, dbc::CRUISE_STALK_ID),
            (CanBus::SERVO_CAN, dbc::STEERING_STATUS_ID),
        ]
    }

    fn engage_cruise(&mut self) {
        self.cruise_active = true;
        self.setpoint_kph = (self.v_ego * 3.6).round();
        info!(setpoint_kph = self.setpoint_kph, "driver engaged cruise");
    }

    fn apply(&mut self, frame: &Frame) {
        if frame.id == dbc::CRUISE_STALK_ID {
            self.apply_stalk(frame);
        } else if frame.id == dbc::STEERING_COMMAND_ID {
            match SteeringCommandFrame::from_frame(frame) {
                Ok(cmd) => self.apply_servo(&cmd),
                Err(e) => warn!("servo ignored frame: {}", e),
            }
        }
    }

    fn apply_stalk(&mut self, frame: &Frame) {
        let Ok(state) = CruiseStalkState::from_frame(frame) else {
            return;
        };
        if state.cancel {
            if self.cruise_active {
                info!("cruise cancelled by stalk");
            }
            self.cruise_active = false;
            return;
        }
        let press_allowed = self.t - self.last_press_t >= PRESS_SPACING_S;
        if self.cruise_active && state.speed_request != 0 && press_allowed {
            self.setpoint_kph = (self.setpoint_kph + f32::from(state.speed_request)).max(30.0);
            self.last_press_t = self.t;
        }
    }

    fn apply_servo(&mut self, cmd: &SteeringCommandFrame) {
        self.servo_torque = cmd.torque as f32;
        if cmd.mode == SteerMode::AngleControl {
            let delta = cmd.angle_delta as f32;
            self.steering_angle += delta;
            self.steering_rate = delta / CONTROL_PERIOD.as_secs_f32();
        } else {
            self.steering_rate = 0.0;
        }
    }

    fn step(&mut self, dt: f32) {
        self.t += dt;
        if self.cruise_active {
            let err = self.setpoint_kph / 3.6 - self.v_ego;
            self.v_ego += (err * 0.5).clamp(-1.4, 1.2) * dt;
        } else {
            self.v_ego -= 0.2 * dt;
        }
        self.v_ego = self.v_ego.max(0.0);
    }

    /// Frames the car puts on the buses this tick.
    fn emit(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut push = |frame: Result<Frame, stalkdrive::codec::CodecError>| match frame {
            Ok(frame) => frames.push(frame),
            Err(e) => error!("vehicle frame encode failed: {}", e),
        };

        push(VehicleSpeed::from_ms(f64::from(self.v_ego)).to_frame(CanBus::PT_CAN));
        push(
            SteeringWheelAngle {
                angle_deg: f64::from(self.steering_angle),
                rate_deg_s: f64::from(self.steering_rate),
            }
            .to_frame(CanBus::PT_CAN),
        );
        push(
            CruiseStatus {
                variant: CruiseVariant::Normal,
                active: self.cruise_active,
                setpoint_raw: f64::from(self.setpoint_kph.max(0.0)),
            }
            .to_frame(CanBus::PT_CAN),
        );
        push(BrakeState::default().to_frame(CanBus::PT_CAN));
        push(AccPedal::default().to_frame(CanBus::PT_CAN, 0));
        push(Gear::Drive.to_frame(CanBus::PT_CAN));
        push(
            SteeringStatus {
                counter: self.servo_counter,
                control_status: 0,
                angle_deg: f64::from(self.steering_angle),
                motor_torque: f64::from(self.servo_torque),
            }
            .to_frame(CanBus::SERVO_CAN),
        );
        self.servo_counter = (self.servo_counter + 1) % dbc::STEERING_COUNTER_MODULUS;

        // Stock stalk traffic at its idle rate
        if self.t >= self.next_stalk_t {
            self.next_stalk_t = self.t + STOCK_STALK_PERIOD_S;
            self.stalk_counter = (self.stalk_counter + 1) % dbc::CRUISE_STALK_COUNTER_MODULUS;
            push(dbc::CRUISE_STALK.encode(
                CanBus::PT_CAN,
                &[
                    ("setMe_0xFC", 252.0),
                    ("requests_0xF", 15.0),
                    ("Counter_0x194", f64::from(self.stalk_counter)),
                ],
            ));
        }

        frames
    }
}

/// Planner stand-in: speed target alternates every 20 s, gentle weave on the wheel.
fn plan(t: f32, v_ego: f32) -> (f32, f32) {
    let target = if (t / 20.0) as u32 % 2 == 0 { 30.0 } else { 24.0 };
    let accel = (0.3 * (target - v_ego)).clamp(-1.5, 1.5);
    let angle = 5.0 * (t / 4.0).sin();
    (accel, angle)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Stalk/servo actuation simulator");
    println!("===============================");

    let heartbeat = Heartbeat::new();
    let heartbeat_task = spawn_heartbeat(heartbeat.clone(), HEARTBEAT_PERIOD);

    let mut host = SafetyHost::with_heartbeat(heartbeat);
    host.set_safety_hooks(SafetyModel::StalkServo as u16, 0)?;

    let capabilities = Capabilities::detect(&ToyVehicle::fingerprint())?;
    let mut config = ControllerConfig::new(capabilities);
    config.steering.mode = SteeringControlMode::Angle;
    let mut controller = ActuationController::new(config)?;

    let mut vehicle = ToyVehicle::new();
    let mut state = VehicleState::new();
    let dt = CONTROL_PERIOD.as_secs_f32();
    let mut interval = time::interval(CONTROL_PERIOD);
    let mut tick: u64 = 0;
    let mut rejected: u32 = 0;

    while vehicle.t < SIM_DURATION_S {
        interval.tick().await;
        tick += 1;
        let now_ns = tick * CONTROL_PERIOD.as_nanos() as u64;

        if !vehicle.cruise_active && vehicle.t >= 1.0 && vehicle.t < 1.0 + dt {
            vehicle.engage_cruise();
        }

        // Feedback path
        for frame in vehicle.emit() {
            host.safety_rx_hook(&frame);
            if let Err(e) = state.ingest(&frame) {
                warn!("feedback frame {:#X} dropped: {}", frame.id, e);
            }
            if let Some(to) = host.safety_fwd_hook(frame.bus, &frame) {
                tracing::trace!(id = frame.id, to, "relayed");
            }
        }
        host.safety_tick(now_ns);

        // Control path
        let controls_allowed = host.get_controls_allowed();
        let (accel, steer_angle) = plan(vehicle.t, state.v_ego);
        let inputs = ControlInputs {
            enabled: controls_allowed,
            lat_active: true,
            accel,
            steer_torque: 0.0,
            steer_angle,
        };
        let out = controller.update(now_ns, &inputs, &state, controls_allowed)?;

        for frame in &out.frames {
            if host.safety_tx_hook(frame) {
                vehicle.apply(frame);
            } else {
                rejected += 1;
            }
        }

        vehicle.step(dt);

        if tick % 100 == 0 {
            info!(
                t = vehicle.t,
                v_kph = state.v_ego * 3.6,
                setpoint = state.cruise_setpoint_raw,
                desired_kph = out.feedback.desired_speed * 3.6,
                angle = state.steering_angle,
                allowed = host.get_controls_allowed(),
                action = ?out.feedback.cruise_action,
                "status"
            );
        }
    }

    heartbeat_task.abort();

    if let Some(monitor) = host.monitor() {
        println!("disengagements: {}", monitor.get_state().disengage_count);
        for event in monitor.get_event_history() {
            println!("  {:>8.2}s {:?}", event.timestamp_ns as f64 / 1e9, event.reason);
        }
    }
    println!("rejected frames: {}", rejected);
    println!("Simulator stopped");

    Ok(())
}
