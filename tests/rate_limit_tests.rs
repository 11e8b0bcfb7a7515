use proptest::prelude::*;
use stalkdrive::rate_limit::*;

fn limits(windup: f32, unwind: f32) -> StepLimits {
    StepLimits { windup, unwind }
}

#[test]
fn test_torque_windup_from_zero() {
    let out = apply_dist_to_meas_limits(5.0, 0.0, 0.0, limits(0.8, 1.6), 999.0, 12.0);
    assert_eq!(out, 0.8);
}

#[test]
fn test_unwind_is_faster_than_windup() {
    let out = apply_dist_to_meas_limits(0.0, 3.0, 3.0, limits(0.8, 1.6), 999.0, 12.0);
    assert!((out - 1.4).abs() < 1e-6);
}

#[test]
fn test_sign_change_limited_to_windup() {
    let out = apply_dist_to_meas_limits(-5.0, 0.5, 0.0, limits(0.8, 1.6), 999.0, 12.0);
    assert_eq!(out, -0.8);

    let out = apply_dist_to_meas_limits(5.0, -0.5, 0.0, limits(0.8, 1.6), 999.0, 12.0);
    assert_eq!(out, 0.8);
}

#[test]
fn test_error_max_keeps_command_near_measured() {
    let out = apply_dist_to_meas_limits(10.0, 2.5, 2.0, limits(10.0, 10.0), 1.0, 12.0);
    assert_eq!(out, 3.0);

    // The band always includes ±error_max around zero
    let out = apply_dist_to_meas_limits(-0.5, 0.0, 4.0, limits(10.0, 10.0), 1.0, 12.0);
    assert_eq!(out, -0.5);
}

#[test]
fn test_limiter_converges_without_overshoot() {
    let mut limiter = RateLimiter::new(Lookup::constant(0.8), Lookup::constant(1.6));
    let mut outputs = Vec::new();
    for _ in 0..8 {
        outputs.push(limiter.apply(5.0, 0.0));
    }
    assert_eq!(outputs[0], 0.8);
    assert!((outputs[5] - 4.8).abs() < 1e-5);
    assert_eq!(outputs[6], 5.0);
    assert_eq!(outputs[7], 5.0);

    // Back to zero at the unwind rate
    assert!((limiter.apply(0.0, 0.0) - 3.4).abs() < 1e-5);
}

#[test]
fn test_limits_follow_covariate() {
    let up = Lookup::new(&[0.0, 5.0, 15.0], &[500.0, 80.0, 15.0]).unwrap();
    let down = Lookup::new(&[0.0, 5.0, 15.0], &[500.0, 350.0, 40.0]).unwrap();
    let limiter = RateLimiter::new(up.scaled(0.01), down.scaled(0.01));

    let at_rest = limiter.limits(0.0);
    assert!((at_rest.windup - 5.0).abs() < 1e-5);
    assert!((at_rest.unwind - 5.0).abs() < 1e-5);

    let highway = limiter.limits(30.0);
    assert!((highway.windup - 0.15).abs() < 1e-5);
    assert!((highway.unwind - 0.4).abs() < 1e-5);

    assert!((up.interp(10.0) - 47.5).abs() < 1e-4);
}

#[test]
fn test_lookup_validation() {
    assert_eq!(Lookup::new(&[], &[]), Err(LookupError::Empty));
    assert_eq!(Lookup::new(&[0.0, 1.0], &[1.0]), Err(LookupError::LengthMismatch(2, 1)));
    assert_eq!(Lookup::new(&[1.0, 1.0], &[1.0, 2.0]), Err(LookupError::NotIncreasing));

    let bp: Vec<f32> = (0..17u8).map(f32::from).collect();
    assert_eq!(Lookup::new(&bp, &bp), Err(LookupError::TooLarge));
    assert!(Lookup::constant(3.0).validate().is_ok());
}

#[test]
fn test_hysteresis_moves_to_band_edge() {
    assert_eq!(apply_hysteresis(10.0, 10.4, 0.5), 10.4);
    assert_eq!(apply_hysteresis(11.0, 10.0, 0.5), 10.5);
    assert_eq!(apply_hysteresis(9.0, 10.0, 0.5), 9.5);
}

fn angle_rate_limiter() -> RateLimiter {
    let up = Lookup::new(&[0.0, 5.0, 15.0], &[500.0, 80.0, 15.0]).unwrap();
    let down = Lookup::new(&[0.0, 5.0, 15.0], &[500.0, 350.0, 40.0]).unwrap();
    RateLimiter::new(up.scaled(0.01), down.scaled(0.01))
}

proptest! {
    #[test]
    fn test_rate_limiter_steps_toward_request(
        requests in prop::collection::vec((-90.0f32..90.0, 0.0f32..40.0), 1..200),
    ) {
        let mut limiter = angle_rate_limiter();
        for (desired, v_ego) in requests {
            let last = limiter.last();
            let bound = limiter.limits(v_ego).for_move(last, desired);
            let out = limiter.apply(desired, v_ego);

            prop_assert!((out - last).abs() <= bound + 1e-4, "{} -> {} over {}", last, out, bound);
            // Never past the request, never away from it
            prop_assert!(out >= last.min(desired) - 1e-4 && out <= last.max(desired) + 1e-4);
            prop_assert!((desired - out).abs() <= (desired - last).abs() + 1e-4);
            prop_assert_eq!(limiter.last(), out);
        }
    }

    #[test]
    fn test_dist_to_meas_bounds(
        val in -50.0f32..50.0,
        last in -12.0f32..12.0,
        meas in -20.0f32..20.0,
        windup in 0.0f32..2.0,
        unwind in 0.0f32..4.0,
        error_max in 0.0f32..20.0,
    ) {
        let out = apply_dist_to_meas_limits(val, last, meas, limits(windup, unwind), error_max, 12.0);
        prop_assert!(out.abs() <= 12.0 + 1e-4);
        prop_assert!((out - last).abs() <= windup.max(unwind) + 1e-4);
        if last > 0.0 {
            prop_assert!(out >= -windup - 1e-4);
        } else {
            prop_assert!(out <= windup + 1e-4);
        }
    }

    #[test]
    fn test_hysteresis_tracks_within_gap(val in -100.0f32..100.0, steady in -100.0f32..100.0, gap in 0.0f32..5.0) {
        let out = apply_hysteresis(val, steady, gap);
        prop_assert!((out - val).abs() <= gap + 1e-3);
    }

    #[test]
    fn test_interp_stays_within_table_range(x in -100.0f32..100.0) {
        let table = Lookup::new(&[5.0, 15.0, 30.0], &[200.0, 20.0, 10.0]).unwrap();
        let y = table.interp(x);
        prop_assert!((10.0..=200.0).contains(&y));
    }
}
