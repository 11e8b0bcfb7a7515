use stalkdrive::can::{CanBus, Frame};
use stalkdrive::heartbeat::{Heartbeat, HeartbeatWatch};
use stalkdrive::hooks::{SafetyError, SafetyHost, SafetyModel};
use stalkdrive::messages::*;
use stalkdrive::safety::*;
use std::time::Duration;

fn cruise(active: bool) -> Frame {
    CruiseStatus {
        variant: CruiseVariant::Normal,
        active,
        setpoint_raw: 100.0,
    }
    .to_frame(CanBus::PT_CAN)
    .unwrap()
}

fn speed(ms: f64) -> Frame {
    VehicleSpeed::from_ms(ms).to_frame(CanBus::PT_CAN).unwrap()
}

fn wheel(angle_deg: f64, rate_deg_s: f64) -> Frame {
    SteeringWheelAngle { angle_deg, rate_deg_s }
        .to_frame(CanBus::PT_CAN)
        .unwrap()
}

fn stalk(action: CruiseStalkAction, bus: u8) -> Frame {
    CruiseStalkCommand::new(action, 4).to_frame(bus).unwrap()
}

fn servo(mode: SteerMode, angle_delta: f64, torque: f64) -> Frame {
    SteeringCommandFrame::new(0, mode, angle_delta, torque)
        .to_frame(CanBus::SERVO_CAN)
        .unwrap()
}

/// Monitor with cruise engaged at `v_ego` and the wheel centered.
fn engaged_at(v_ego: f64) -> SafetyMonitor {
    let mut monitor = SafetyMonitor::new();
    monitor.rx_hook(&speed(v_ego));
    monitor.rx_hook(&wheel(0.0, 0.0));
    monitor.rx_hook(&cruise(true));
    assert!(monitor.controls_allowed());
    monitor
}

#[test]
fn test_monitor_starts_disallowed() {
    let monitor = SafetyMonitor::new();
    assert!(!monitor.controls_allowed());
    assert!(!monitor.actuator_enabled());
    assert_eq!(monitor.get_state().disengage_count, 0);
    assert!(monitor.get_event_history().is_empty());
}

#[test]
fn test_cruise_rising_edge_allows() {
    let mut monitor = SafetyMonitor::new();
    monitor.rx_hook(&cruise(false));
    assert!(!monitor.controls_allowed());
    monitor.rx_hook(&cruise(true));
    assert!(monitor.controls_allowed());

    monitor.rx_hook(&cruise(false));
    assert!(!monitor.controls_allowed());
    assert_eq!(monitor.last_disengage_reason(), Some(DisengageReason::CruiseDisengaged));
    assert_eq!(monitor.get_state().disengage_count, 1);
}

#[test]
fn test_disengagement_latched_until_new_rising_edge() {
    let mut monitor = engaged_at(20.0);

    let brake = BrakeState {
        pressed: true,
        active: false,
    }
    .to_frame(CanBus::PT_CAN)
    .unwrap();
    monitor.rx_hook(&brake);
    assert!(!monitor.controls_allowed());
    assert_eq!(monitor.last_disengage_reason(), Some(DisengageReason::BrakePressed));

    // Cruise still reported engaged, no edge
    monitor.rx_hook(&cruise(true));
    assert!(!monitor.controls_allowed());

    monitor.rx_hook(&cruise(false));
    monitor.rx_hook(&cruise(true));
    assert!(monitor.controls_allowed());
    // The second disengage happened while already disallowed
    assert_eq!(monitor.get_state().disengage_count, 1);
}

#[test]
fn test_gear_must_be_drive() {
    let mut monitor = engaged_at(20.0);
    monitor.rx_hook(&Gear::Drive.to_frame(CanBus::PT_CAN).unwrap());
    assert!(monitor.controls_allowed());
    assert_eq!(monitor.get_state().lever_position, Some(8));

    monitor.rx_hook(&Gear::Reverse.to_frame(CanBus::PT_CAN).unwrap());
    assert!(!monitor.controls_allowed());
    assert_eq!(monitor.last_disengage_reason(), Some(DisengageReason::GearNotDrive));
}

#[test]
fn test_corrupt_gear_frame_disengages() {
    let mut monitor = engaged_at(20.0);
    let corrupt = Frame::new(CanBus::PT_CAN, 0x1D2, &[0x88, 0, 0, 0, 0, 0]).unwrap();
    monitor.rx_hook(&corrupt);
    assert!(!monitor.controls_allowed());
    assert_eq!(monitor.get_state().lever_position, None);
}

#[test]
fn test_stalk_cancel_seen_on_bus() {
    let mut monitor = engaged_at(20.0);
    monitor.rx_hook(&stalk(CruiseStalkAction::Plus1, CanBus::PT_CAN));
    assert!(monitor.controls_allowed());
    monitor.rx_hook(&stalk(CruiseStalkAction::Cancel, CanBus::PT_CAN));
    assert!(!monitor.controls_allowed());
    assert_eq!(monitor.last_disengage_reason(), Some(DisengageReason::StalkCancel));
}

#[test]
fn test_limits_follow_speed() {
    let mut monitor = SafetyMonitor::new();
    monitor.rx_hook(&speed(20.0));
    let state = monitor.get_state();
    // Table values plus one unit of margin
    assert!((state.max_angle - (50.0 / 3.0 + 1.0)).abs() < 0.05);
    assert!((state.angle_rate_up - 16.0).abs() < 1e-3);
    assert!((state.angle_rate_down - 41.0).abs() < 1e-3);
}

#[test]
fn test_measured_angle_above_max() {
    let mut monitor = engaged_at(20.0);
    monitor.rx_hook(&wheel(15.0, 0.0));
    assert!(monitor.controls_allowed());
    monitor.rx_hook(&wheel(30.0, 0.0));
    assert!(!monitor.controls_allowed());
    assert_eq!(monitor.last_disengage_reason(), Some(DisengageReason::AngleAboveMax));
}

#[test]
fn test_measured_rate_exceeded() {
    let mut monitor = engaged_at(20.0);
    monitor.rx_hook(&wheel(5.0, 10.0));
    assert!(monitor.controls_allowed());
    monitor.rx_hook(&wheel(5.0, 30.0));
    assert!(!monitor.controls_allowed());
    assert_eq!(monitor.last_disengage_reason(), Some(DisengageReason::AngleRateExceeded));
}

#[test]
fn test_fwd_block_list() {
    let monitor = SafetyMonitor::new();
    let frame = |id| Frame::zeroed(0, id, 8).unwrap();

    assert_eq!(monitor.fwd_hook(0, &frame(0x280)), None);
    assert_eq!(monitor.fwd_hook(0, &frame(0x1A0)), Some(2));
    assert_eq!(monitor.fwd_hook(2, &frame(0x169)), None);
    assert_eq!(monitor.fwd_hook(2, &frame(0x2B1)), None);
    assert_eq!(monitor.fwd_hook(2, &frame(0x4CC)), None);
    assert_eq!(monitor.fwd_hook(2, &frame(0x280)), Some(0));
    assert_eq!(monitor.fwd_hook(1, &frame(0x100)), None);
}

#[test]
fn test_tx_whitelist() {
    let mut monitor = engaged_at(20.0);
    assert!(!monitor.tx_hook(&stalk(CruiseStalkAction::Plus1, 2)));
    assert!(!monitor.controls_allowed());
    assert_eq!(
        monitor.last_disengage_reason(),
        Some(DisengageReason::TxRejected(TxRejection::NotWhitelisted))
    );

    let mut monitor = SafetyMonitor::new();
    let unknown = Frame::zeroed(0, 0x300, 8).unwrap();
    assert!(!monitor.tx_hook(&unknown));
}

#[test]
fn test_stalk_tx_rules() {
    let mut monitor = SafetyMonitor::new();
    monitor.rx_hook(&speed(20.0));

    // Cancel is always allowed, speed requests need controls
    assert!(monitor.tx_hook(&stalk(CruiseStalkAction::Cancel, 0)));
    assert!(monitor.tx_hook(&stalk(CruiseStalkAction::Cancel, 1)));
    assert!(!monitor.tx_hook(&stalk(CruiseStalkAction::Plus1, 0)));
    assert!(!monitor.tx_hook(&stalk(CruiseStalkAction::Minus5, 0)));
    assert!(!monitor.tx_hook(&stalk(CruiseStalkAction::Resume, 0)));

    let mut monitor = engaged_at(20.0);
    assert!(monitor.tx_hook(&stalk(CruiseStalkAction::Plus1, 0)));
    assert!(monitor.tx_hook(&stalk(CruiseStalkAction::Minus5, 1)));
}

#[test]
fn test_stalk_bad_checksum_rejected() {
    let mut monitor = engaged_at(20.0);
    let mut frame = stalk(CruiseStalkAction::Minus1, 0);
    frame.data[0] = frame.data[0].wrapping_add(1);
    assert!(!monitor.tx_hook(&frame));
    assert_eq!(
        monitor.last_disengage_reason(),
        Some(DisengageReason::TxRejected(TxRejection::BadChecksum))
    );
}

#[test]
fn test_no_acceleration_below_min_speed() {
    let mut monitor = engaged_at(5.0);
    assert!(monitor.tx_hook(&stalk(CruiseStalkAction::Minus1, 0)));
    assert!(!monitor.tx_hook(&stalk(CruiseStalkAction::Plus1, 0)));
    assert_eq!(
        monitor.last_disengage_reason(),
        Some(DisengageReason::TxRejected(TxRejection::BelowMinEnableSpeed))
    );
}

#[test]
fn test_servo_torque_growth_limited() {
    let mut monitor = engaged_at(20.0);
    assert!(monitor.tx_hook(&servo(SteerMode::TorqueControl, 0.0, 0.1)));
    assert!(monitor.tx_hook(&servo(SteerMode::TorqueControl, 0.0, 0.2)));
    // Crossing zero is allowed within one step
    assert!(monitor.tx_hook(&servo(SteerMode::TorqueControl, 0.0, -0.1)));
    assert!(!monitor.tx_hook(&servo(SteerMode::TorqueControl, 0.0, 0.5)));
    assert_eq!(
        monitor.last_disengage_reason(),
        Some(DisengageReason::TxRejected(TxRejection::TorqueRateExceeded))
    );
}

#[test]
fn test_servo_torque_above_max() {
    let mut monitor = engaged_at(20.0);
    assert!(!monitor.tx_hook(&servo(SteerMode::TorqueControl, 0.0, 13.0)));
    assert_eq!(
        monitor.last_disengage_reason(),
        Some(DisengageReason::TxRejected(TxRejection::TorqueAboveMax))
    );
}

#[test]
fn test_servo_requires_controls() {
    let mut monitor = SafetyMonitor::new();
    assert!(!monitor.tx_hook(&servo(SteerMode::TorqueControl, 0.0, 0.0)));
    assert!(!monitor.tx_hook(&servo(SteerMode::AngleControl, 0.0, 0.0)));
    // Off always passes
    assert!(monitor.tx_hook(&servo(SteerMode::Off, 0.0, 0.0)));
}

#[test]
fn test_soft_off_must_shrink() {
    let mut monitor = engaged_at(20.0);
    assert!(monitor.tx_hook(&servo(SteerMode::TorqueControl, 0.0, 0.1)));
    assert!(monitor.tx_hook(&servo(SteerMode::TorqueControl, 0.0, 0.2)));

    monitor.rx_hook(&cruise(false));
    assert!(monitor.tx_hook(&servo(SteerMode::SoftOff, 0.0, 0.1)));
    assert!(!monitor.tx_hook(&servo(SteerMode::SoftOff, 0.0, 0.15)));
    assert!(!monitor.tx_hook(&servo(SteerMode::SoftOff, 0.0, -0.1)));
    assert!(monitor.tx_hook(&servo(SteerMode::SoftOff, 0.0, 0.0)));
    assert!(monitor.tx_hook(&servo(SteerMode::Off, 0.0, 0.0)));
    assert_eq!(monitor.get_state().torque_last, 0.0);
}

#[test]
fn test_servo_angle_rate_and_max() {
    let mut monitor = engaged_at(20.0);
    // 15 deg/s against a 16 deg/s limit
    assert!(monitor.tx_hook(&servo(SteerMode::AngleControl, 0.15, 0.0)));
    assert!(monitor.get_state().desired_angle_last > 0.1);
    assert!(!monitor.tx_hook(&servo(SteerMode::AngleControl, 0.5, 0.0)));
    assert_eq!(
        monitor.last_disengage_reason(),
        Some(DisengageReason::TxRejected(TxRejection::AngleRateExceeded))
    );

    let mut monitor = engaged_at(20.0);
    assert!(!monitor.tx_hook(&servo(SteerMode::AngleControl, 20.0, 0.0)));
    assert_eq!(
        monitor.last_disengage_reason(),
        Some(DisengageReason::TxRejected(TxRejection::AngleAboveMax))
    );
}

#[test]
fn test_heartbeat_loss_disengages() {
    let heartbeat = Heartbeat::new();
    let mut monitor = engaged_at(20.0);
    monitor.attach_heartbeat(HeartbeatWatch::new(heartbeat.clone(), Duration::from_secs(3)));

    monitor.tick(0);
    heartbeat.beat();
    monitor.tick(2_000_000_000);
    heartbeat.beat();
    monitor.tick(4_500_000_000);
    assert!(monitor.controls_allowed());

    monitor.tick(8_000_000_000);
    assert!(!monitor.controls_allowed());
    assert_eq!(monitor.last_disengage_reason(), Some(DisengageReason::HeartbeatLost));
}

#[test]
fn test_actuator_enable_follows_servo_traffic() {
    let mut monitor = engaged_at(20.0);
    monitor.tick(1_000_000_000);
    assert!(!monitor.actuator_enabled());

    assert!(monitor.tx_hook(&servo(SteerMode::TorqueControl, 0.0, 0.1)));
    assert!(monitor.actuator_enabled());

    monitor.tick(1_500_000_000);
    assert!(monitor.actuator_enabled());
    monitor.tick(2_500_000_000);
    assert!(!monitor.actuator_enabled());
}

#[test]
fn test_event_history_bounded() {
    let mut monitor = SafetyMonitor::new();
    for _ in 0..40 {
        monitor.rx_hook(&cruise(true));
        monitor.rx_hook(&cruise(false));
    }
    assert_eq!(monitor.get_state().disengage_count, 40);
    assert_eq!(monitor.get_event_history().len(), 32);
}

#[test]
fn test_init_resets_state() {
    let mut monitor = engaged_at(20.0);
    monitor.set_controls_allowed(false);
    assert_eq!(monitor.last_disengage_reason(), Some(DisengageReason::Requested));
    monitor.set_controls_allowed(true);
    assert!(monitor.controls_allowed());

    monitor.init();
    assert!(!monitor.controls_allowed());
    assert_eq!(monitor.get_state().disengage_count, 0);
}

#[test]
fn test_host_model_selection() {
    let mut host = SafetyHost::new();
    assert_eq!(host.model(), SafetyModel::Silent);
    let frame = stalk(CruiseStalkAction::Cancel, 0);
    assert!(!host.safety_tx_hook(&frame));
    assert_eq!(host.safety_fwd_hook(0, &frame), None);

    host.set_safety_hooks(SafetyModel::AllOutput as u16, 0).unwrap();
    assert!(host.safety_tx_hook(&Frame::zeroed(3, 0x123, 8).unwrap()));
    assert!(host.get_controls_allowed());

    assert_eq!(host.set_safety_hooks(99, 0), Err(SafetyError::UnknownModel(99)));
    assert_eq!(host.model(), SafetyModel::AllOutput);

    host.set_safety_hooks(SafetyModel::StalkServo as u16, 0).unwrap();
    assert!(host.monitor().is_some());
    assert!(!host.get_controls_allowed());
    host.safety_rx_hook(&cruise(true));
    assert!(host.get_controls_allowed());
    assert_eq!(host.safety_fwd_hook(0, &Frame::zeroed(0, 0x280, 8).unwrap()), None);
}
