//! Cruise-control stalk emulation.
//!
//! The car's cruise module only reacts to stalk frames, so speed changes are requested by
//! synthesizing +1/+5/-1/-5/cancel presses. Each tick the emulator
//!
//! 1. tracks the genuine stalk counter and when it last changed,
//! 2. integrates the requested acceleration into a desired speed and compares it to the cruise
//!    setpoint (smoothed with hysteresis, since the setpoint moves in whole steps),
//! 3. walks the hold/tap ladder, and
//! 4. sends at most one frame, timed against the stock stalk period and numbered so it cannot
//!    collide with the next genuine frame.

use crate::dbc::CRUISE_STALK_COUNTER_MODULUS;
use crate::messages::{CruiseStalkAction, CruiseStalkCommand, CruiseStalkState};
use crate::rate_limit::apply_hysteresis;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const KPH_TO_MS: f32 = 1.0 / 3.6;
const NS_PER_S: f64 = 1e9;

/// Unit the cluster and cruise setpoint are displayed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedUnit {
    Metric,
    Imperial,
}

impl SpeedUnit {
    /// Display units per m/s.
    pub fn per_ms(self) -> f32 {
        match self {
            SpeedUnit::Metric => 3.6,
            SpeedUnit::Imperial => 2.236_936,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CruiseTuning {
    pub control_hz: f32,
    /// Setpoint change of a single press, in display units.
    pub cc_step: f32,
    /// Stock stalk period while nothing is pressed.
    pub idle_tick_stock_s: f32,
    /// Stock stalk period while the lever is held.
    pub hold_tick_stock_s: f32,
    pub single_tick_s: f32,
    /// Faster than stock so held presses dominate the channel.
    pub hold_tick_s: f32,
    /// Fraction of `cc_step`, between 0.5 and 1 so the setpoint cannot toggle.
    pub speed_hyst_steps: f32,
    pub accel_hyst_gap: f32,
    pub accel_hold_medium: f32,
    pub decel_hold_medium: f32,
    pub accel_hold_strong: f32,
    pub decel_hold_strong: f32,
    /// Minimum time before a tap in the opposite direction of the last one.
    pub reversal_holdoff_s: f32,
}

impl Default for CruiseTuning {
    fn default() -> Self {
        Self {
            control_hz: 100.0,
            cc_step: 1.0,
            idle_tick_stock_s: 0.2,
            hold_tick_stock_s: 0.05,
            single_tick_s: 0.2,
            hold_tick_s: 0.01,
            speed_hyst_steps: 0.6,
            accel_hyst_gap: 0.05,
            accel_hold_medium: 0.4,
            decel_hold_medium: -0.6,
            accel_hold_strong: 1.2,
            decel_hold_strong: -1.2,
            reversal_holdoff_s: 0.4,
        }
    }
}

impl CruiseTuning {
    pub fn dt(&self) -> f32 {
        1.0 / self.control_hz
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CruisePhase {
    Idle,
    Canceling,
    Holding(i8),
    SingleStepping(i8),
}

/// What the ladder decided this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CruiseAction {
    Cancel,
    Hold(CruiseStalkAction),
    Tap(CruiseStalkAction),
}

impl CruiseAction {
    pub fn stalk_action(self) -> CruiseStalkAction {
        match self {
            CruiseAction::Cancel => CruiseStalkAction::Cancel,
            CruiseAction::Hold(action) | CruiseAction::Tap(action) => action,
        }
    }

    pub fn is_hold(self) -> bool {
        matches!(self, CruiseAction::Hold(_))
    }

    fn phase(self) -> CruisePhase {
        match self {
            CruiseAction::Cancel => CruisePhase::Canceling,
            CruiseAction::Hold(action) => CruisePhase::Holding(action.direction()),
            CruiseAction::Tap(action) => CruisePhase::SingleStepping(action.direction()),
        }
    }
}

/// Decision for one tick and the bus it targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CruiseIntent {
    pub action: CruiseAction,
    /// Requested change in display units.
    pub desired_speed_delta: f32,
    pub bus: u8,
}

/// Per-tick inputs. Speeds in m/s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CruiseInputs {
    pub enabled: bool,
    pub controls_allowed: bool,
    pub accel: f32,
    pub v_ego: f32,
    pub cruise_enabled: bool,
    pub cruise_setpoint: f32,
    pub gas_pressed: bool,
    pub stalk: CruiseStalkState,
    pub unit: SpeedUnit,
    /// Setpoint matched neither unit on engagement. Speed requests are withheld, cancel is not.
    pub unit_fault: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CruiseOutput {
    pub intent: Option<CruiseIntent>,
    /// Set only when a frame is due this tick.
    pub command: Option<CruiseStalkCommand>,
    pub desired_speed: f32,
    pub speed_error_request: f32,
    pub speed_error_actual: f32,
}

#[derive(Debug)]
pub struct CruiseStalkEmulator {
    tuning: CruiseTuning,
    bus: u8,
    min_enable_speed: f32,

    phase: CruisePhase,
    cancel_latched: bool,
    enabled_prev: bool,

    rx_counter_last: Option<u8>,
    tx_counter_last: u8,
    last_rx_ns: u64,
    last_tx_ns: u64,
    last_sent_direction: i8,

    speed_with_hyst: f32,
    accel_with_hyst: f32,
    accel_with_hyst_last: f32,
    desired_speed: f32,
}

impl CruiseStalkEmulator {
    pub fn new(tuning: CruiseTuning, bus: u8, min_enable_speed: f32) -> Self {
        Self {
            tuning,
            bus,
            min_enable_speed,
            phase: CruisePhase::Idle,
            cancel_latched: false,
            enabled_prev: false,
            rx_counter_last: None,
            tx_counter_last: 0,
            last_rx_ns: 0,
            last_tx_ns: 0,
            last_sent_direction: 0,
            speed_with_hyst: 0.0,
            accel_with_hyst: 0.0,
            accel_with_hyst_last: 0.0,
            desired_speed: 0.0,
        }
    }

    pub fn phase(&self) -> CruisePhase {
        self.phase
    }

    pub fn cancel_latched(&self) -> bool {
        self.cancel_latched
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn tuning(&self) -> &CruiseTuning {
        &self.tuning
    }

    pub fn update(&mut self, now_ns: u64, inputs: &CruiseInputs) -> CruiseOutput {
        let units = inputs.unit.per_ms();
        let dt = self.tuning.dt();
        let enabled = inputs.enabled && inputs.controls_allowed;

        // Setpoint hysteresis
        let gap = self.tuning.cc_step * self.tuning.speed_hyst_steps / units;
        self.speed_with_hyst = apply_hysteresis(inputs.cruise_setpoint, self.speed_with_hyst, gap);
        if !inputs.cruise_enabled {
            self.speed_with_hyst = inputs.v_ego;
        }
        self.accel_with_hyst =
            apply_hysteresis(inputs.accel, self.accel_with_hyst, self.tuning.accel_hyst_gap);

        // Desired speed model
        let accel_zero_cross = self.accel_with_hyst * self.accel_with_hyst_last < 0.0;
        self.accel_with_hyst_last = self.accel_with_hyst;
        if accel_zero_cross || !enabled || !self.enabled_prev || inputs.gas_pressed {
            self.desired_speed = inputs.v_ego;
        }
        self.desired_speed += inputs.accel * dt;
        let speed_err_req = (self.desired_speed - self.speed_with_hyst) * units;
        let speed_err_act = self.desired_speed - inputs.v_ego;

        self.track_genuine_counter(now_ns, inputs.stalk.counter);
        self.update_cancel_latch(enabled, inputs, speed_err_act);

        let action = if inputs.stalk.human_pressing() || !inputs.cruise_enabled {
            None
        } else if self.cancel_latched {
            Some(CruiseAction::Cancel)
        } else if enabled && !inputs.unit_fault {
            self.ladder(inputs, speed_err_req, speed_err_act)
        } else {
            None
        };

        self.phase = action.map_or(CruisePhase::Idle, CruiseAction::phase);

        let command = action.and_then(|action| self.try_send(now_ns, action, inputs.stalk.counter));
        let intent = action.map(|action| CruiseIntent {
            action,
            desired_speed_delta: speed_err_req,
            bus: self.bus,
        });

        CruiseOutput {
            intent,
            command,
            desired_speed: self.desired_speed,
            speed_error_request: speed_err_req,
            speed_error_actual: speed_err_act,
        }
    }

    fn track_genuine_counter(&mut self, now_ns: u64, counter: u8) {
        if self.rx_counter_last != Some(counter) {
            self.tx_counter_last = counter;
            self.last_rx_ns = now_ns;
        }
        self.rx_counter_last = Some(counter);
    }

    fn update_cancel_latch(&mut self, enabled: bool, inputs: &CruiseInputs, speed_err_act: f32) {
        if !enabled && self.enabled_prev && !self.cancel_latched {
            info!("controls disengaged, cancel latched");
            self.cancel_latched = true;
        }
        self.enabled_prev = enabled;

        // Cannot go below the cruise minimum, so cancel and coast
        let at_min_setpoint = inputs.cruise_setpoint - self.min_enable_speed < 0.1;
        if at_min_setpoint
            && inputs.accel < -0.1
            && speed_err_act < -1.0
            && inputs.v_ego - self.min_enable_speed < 0.4
            && !self.cancel_latched
        {
            info!(v_ego = inputs.v_ego, "below minimum cruise speed, cancel latched");
            self.cancel_latched = true;
        }

        if !inputs.cruise_enabled && self.cancel_latched {
            debug!("cruise disabled, cancel cleared");
            self.cancel_latched = false;
        }
    }

    fn ladder(&self, inputs: &CruiseInputs, speed_err_req: f32, speed_err_act: f32) -> Option<CruiseAction> {
        let t = &self.tuning;
        let accel = self.accel_with_hyst;
        let kph = |x: f32| x * KPH_TO_MS * inputs.unit.per_ms();
        let gas = inputs.gas_pressed;

        if (accel > t.accel_hold_strong || (accel > t.accel_hold_medium && speed_err_act > 3.0))
            && speed_err_req >= -kph(15.0)
        {
            return Some(CruiseAction::Hold(CruiseStalkAction::Plus5));
        }
        if (accel < t.decel_hold_strong || (accel < t.decel_hold_medium && speed_err_act < -3.0))
            && speed_err_req <= kph(15.0)
            && !gas
        {
            return Some(CruiseAction::Hold(CruiseStalkAction::Minus5));
        }
        if (accel > t.accel_hold_medium || speed_err_act > 2.0) && speed_err_req >= -kph(10.0) {
            return Some(CruiseAction::Hold(CruiseStalkAction::Plus1));
        }
        if (accel < t.decel_hold_medium || speed_err_act < -2.0) && speed_err_req <= kph(10.0) && !gas {
            return Some(CruiseAction::Hold(CruiseStalkAction::Minus1));
        }

        let tap_threshold = (t.cc_step / 2.0).max(kph(0.9));
        if speed_err_req > tap_threshold && (accel > 0.0 || gas) {
            return Some(CruiseAction::Tap(CruiseStalkAction::Plus1));
        }
        if speed_err_req < -tap_threshold && accel < 0.0 && !gas {
            return Some(CruiseAction::Tap(CruiseStalkAction::Minus1));
        }
        None
    }

    fn seconds_since(&self, now_ns: u64, then_ns: u64) -> f32 {
        let dt = f64::from(self.tuning.dt());
        (now_ns.saturating_sub(then_ns) as f64 / NS_PER_S + dt / 10.0) as f32
    }

    fn try_send(&mut self, now_ns: u64, action: CruiseAction, observed: u8) -> Option<CruiseStalkCommand> {
        let t = &self.tuning;
        let dt = t.dt();
        let since_sent = self.seconds_since(now_ns, self.last_tx_ns);
        let since_received = self.seconds_since(now_ns, self.last_rx_ns);

        let due = if action.is_hold() {
            since_sent > t.hold_tick_s
        } else {
            // Land between genuine frames, no faster than the stock idle rate
            since_sent > t.single_tick_s
                && since_received > t.hold_tick_stock_s / 2.0 - dt
                && since_received < t.idle_tick_stock_s / 2.0 + dt
        };
        if !due {
            return None;
        }

        let direction = action.stalk_action().direction();
        if let CruiseAction::Tap(_) = action {
            let reversal = direction != 0 && direction == -self.last_sent_direction;
            if reversal && since_sent < t.reversal_holdoff_s {
                debug!(direction, "tap held off after direction reversal");
                return None;
            }
        }

        let counter = next_counter(self.tx_counter_last, observed);
        self.tx_counter_last = counter;
        self.last_tx_ns = now_ns;
        if direction != 0 {
            self.last_sent_direction = direction;
        }
        debug!(?action, counter, "stalk frame synthesized");
        Some(CruiseStalkCommand::new(action.stalk_action(), counter))
    }
}

/// Counter for the next synthesized frame.
///
/// One past the last counter on the bus, skipped by two more when that is the value the genuine
/// stalk will use next. The stock frame following a collision is sometimes overshadowed too,
/// hence two rather than one.
pub fn next_counter(tx_last: u8, observed: u8) -> u8 {
    let m = CRUISE_STALK_COUNTER_MODULUS;
    let next = (tx_last % m + 1) % m;
    let expected = (observed % m + 1) % m;
    if next == expected {
        (next + 2) % m
    } else {
        next
    }
}
