use proptest::prelude::*;
use stalkdrive::cruise::*;
use stalkdrive::messages::{CruiseStalkAction, CruiseStalkState};

const T0: u64 = 1_000_000_000;
const TICK_NS: u64 = 10_000_000;
const MIN_ENABLE: f32 = 30.0 / 3.6;

fn emulator() -> CruiseStalkEmulator {
    CruiseStalkEmulator::new(CruiseTuning::default(), 0, MIN_ENABLE)
}

fn inputs(accel: f32, v_ego: f32, setpoint: f32) -> CruiseInputs {
    CruiseInputs {
        enabled: true,
        controls_allowed: true,
        accel,
        v_ego,
        cruise_enabled: true,
        cruise_setpoint: setpoint,
        gas_pressed: false,
        stalk: CruiseStalkState::default(),
        unit: SpeedUnit::Metric,
        unit_fault: false,
    }
}

/// Genuine stalk counter advancing every 0.2 s, as the stock module does at idle.
fn genuine(tick: u64) -> CruiseStalkState {
    CruiseStalkState {
        counter: ((tick / 20) % 15) as u8,
        ..CruiseStalkState::default()
    }
}

fn at(tick: u64) -> u64 {
    T0 + tick * TICK_NS
}

#[test]
fn test_silent_while_cruise_disabled() {
    let mut emu = emulator();
    for tick in 0..100 {
        let out = emu.update(
            at(tick),
            &CruiseInputs {
                cruise_enabled: false,
                stalk: genuine(tick),
                ..inputs(2.0, 25.0, 0.0)
            },
        );
        assert!(out.command.is_none());
        assert!(out.intent.is_none());
    }
    assert_eq!(emu.phase(), CruisePhase::Idle);
}

#[test]
fn test_human_press_vetoes_synthesis() {
    let mut emu = emulator();
    let pressing = CruiseStalkState {
        speed_request: 1,
        ..CruiseStalkState::default()
    };
    for tick in 0..50 {
        let out = emu.update(
            at(tick),
            &CruiseInputs {
                stalk: pressing,
                ..inputs(1.5, 25.0, 25.0)
            },
        );
        assert!(out.command.is_none());
    }
}

#[test]
fn test_strong_accel_holds_plus5() {
    let mut emu = emulator();
    let first = emu.update(at(0), &inputs(1.5, 25.0, 25.0));
    assert_eq!(first.intent.map(|i| i.action), Some(CruiseAction::Hold(CruiseStalkAction::Plus5)));
    assert_eq!(emu.phase(), CruisePhase::Holding(1));

    // Holds go out every tick, numbered around the genuine counter
    let command = first.command.unwrap();
    assert_eq!(command.action, CruiseStalkAction::Plus5);
    assert_eq!(command.counter(), 3);

    let second = emu.update(at(1), &inputs(1.5, 25.0, 25.0));
    assert_eq!(second.command.map(|c| c.counter()), Some(4));
}

#[test]
fn test_tap_lands_between_genuine_frames() {
    let mut emu = emulator();
    let mut sent = Vec::new();
    for tick in 0..40 {
        let out = emu.update(
            at(tick),
            &CruiseInputs {
                stalk: genuine(tick),
                ..inputs(0.1, 25.0, 24.5)
            },
        );
        assert_eq!(out.intent.map(|i| i.action), Some(CruiseAction::Tap(CruiseStalkAction::Plus1)));
        if let Some(command) = out.command {
            sent.push((tick, command.counter()));
        }
    }
    assert_eq!(sent, vec![(2, 3), (22, 4)]);
}

#[test]
fn test_reversal_tap_held_off() {
    let mut emu = emulator();
    let mut sent = Vec::new();
    for tick in 0..60 {
        let request = if tick < 3 {
            inputs(0.1, 25.0, 24.5)
        } else {
            inputs(-0.1, 25.0, 25.5)
        };
        let out = emu.update(
            at(tick),
            &CruiseInputs {
                stalk: genuine(tick),
                ..request
            },
        );
        if let Some(command) = out.command {
            sent.push((tick, command.action));
        }
    }
    assert_eq!(
        sent,
        vec![(2, CruiseStalkAction::Plus1), (42, CruiseStalkAction::Minus1)]
    );
}

#[test]
fn test_cancel_latched_until_cruise_off() {
    let mut emu = emulator();
    let mut cancels = Vec::new();
    for tick in 0..40 {
        let out = emu.update(
            at(tick),
            &CruiseInputs {
                enabled: tick < 5,
                cruise_enabled: tick < 30,
                stalk: genuine(tick),
                ..inputs(0.0, 25.0, 25.0)
            },
        );
        if tick < 5 {
            assert!(out.command.is_none());
        }
        if let Some(command) = out.command {
            assert_eq!(command.action, CruiseStalkAction::Cancel);
            cancels.push(tick);
        }
        if (5..30).contains(&tick) {
            assert_eq!(out.intent.map(|i| i.action), Some(CruiseAction::Cancel));
        }
    }
    // Re-sent at the tap rate while the cruise module stays engaged
    assert_eq!(cancels, vec![5, 25]);
    assert!(!emu.cancel_latched());
    assert_eq!(emu.phase(), CruisePhase::Idle);
}

#[test]
fn test_unit_fault_withholds_speed_requests() {
    let mut emu = emulator();
    for tick in 0..50 {
        let out = emu.update(
            at(tick),
            &CruiseInputs {
                unit_fault: true,
                stalk: genuine(tick),
                ..inputs(1.5, 25.0, 25.0)
            },
        );
        assert!(out.command.is_none());
        assert!(out.intent.is_none());
    }
    assert_eq!(emu.phase(), CruisePhase::Idle);

    // Disengaging still cancels
    let out = emu.update(
        at(50),
        &CruiseInputs {
            enabled: false,
            unit_fault: true,
            stalk: genuine(50),
            ..inputs(0.0, 25.0, 25.0)
        },
    );
    assert_eq!(out.intent.map(|i| i.action), Some(CruiseAction::Cancel));
    assert_eq!(out.command.map(|c| c.action), Some(CruiseStalkAction::Cancel));
}

#[test]
fn test_gas_pressed_blocks_decel() {
    let mut emu = emulator();
    for tick in 0..60 {
        let out = emu.update(
            at(tick),
            &CruiseInputs {
                gas_pressed: true,
                stalk: genuine(tick),
                ..inputs(-1.5, 25.0, 30.0)
            },
        );
        assert!(out.command.is_none());
        // Desired speed follows the car while the driver overrides
        assert!((out.desired_speed - 25.0).abs() < 0.1);
    }
}

#[test]
fn test_cancel_below_minimum_cruise_speed() {
    let mut emu = emulator();
    let mut latched_at = None;
    for tick in 0..400 {
        emu.update(
            at(tick),
            &CruiseInputs {
                stalk: genuine(tick),
                ..inputs(-0.5, 8.5, MIN_ENABLE)
            },
        );
        if emu.cancel_latched() && latched_at.is_none() {
            latched_at = Some(tick);
        }
    }
    // The desired speed needs about 200 ticks at -0.5 m/s² to fall 1 m/s behind
    let tick = latched_at.unwrap();
    assert!((190..=215).contains(&tick), "latched at {tick}");
    assert_eq!(emu.phase(), CruisePhase::Canceling);
}

#[test]
fn test_speed_errors_in_display_units() {
    let mut emu = emulator();
    let out = emu.update(
        at(0),
        &CruiseInputs {
            unit: SpeedUnit::Imperial,
            ..inputs(0.0, 25.0, 20.0)
        },
    );
    // Setpoint starts at the near edge of the hysteresis band
    let gap = 0.6 / SpeedUnit::Imperial.per_ms();
    let expected = (25.0 - (20.0 - gap)) * SpeedUnit::Imperial.per_ms();
    assert!((out.speed_error_request - expected).abs() < 1e-3);
    assert!(out.speed_error_actual.abs() < 1e-6);
}

proptest! {
    #[test]
    fn test_counter_never_collides(tx_last in 0u8..15, observed in 0u8..15) {
        let next = next_counter(tx_last, observed);
        prop_assert!(next < 15);
        prop_assert_ne!(next, (observed + 1) % 15);
    }

    #[test]
    fn test_at_most_one_frame_per_tick(accel in -3.0f32..3.0, setpoint in 5.0f32..40.0, ticks in 1u64..120) {
        let mut emu = emulator();
        for tick in 0..ticks {
            let out = emu.update(at(tick), &CruiseInputs { stalk: genuine(tick), ..inputs(accel, 20.0, setpoint) });
            if let Some(command) = out.command {
                prop_assert_eq!(Some(command.action), out.intent.map(|i| i.action.stalk_action()));
                prop_assert_ne!(command.counter(), (genuine(tick).counter + 1) % 15);
            }
        }
    }
}
