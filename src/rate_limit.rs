//! Rate limiting shared by steering and speed synthesis.
//!
//! Limits are looked up from a covariate (vehicle speed) by piecewise-linear interpolation
//! over breakpoints. Windup applies while the magnitude of the output grows away from zero in
//! the direction it already had (or starts from zero), unwind applies otherwise.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_BREAKPOINTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("breakpoint table is empty")]
    Empty,
    #[error("breakpoints ({0}) and values ({1}) differ in length")]
    LengthMismatch(usize, usize),
    #[error("more than {MAX_BREAKPOINTS} breakpoints")]
    TooLarge,
    #[error("breakpoints must be strictly increasing")]
    NotIncreasing,
    #[error("table contains NaN or infinity")]
    NonFinite,
}

/// Piecewise-linear table, clamped at both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lookup {
    bp: Vec<f32, MAX_BREAKPOINTS>,
    v: Vec<f32, MAX_BREAKPOINTS>,
}

impl Lookup {
    pub fn new(bp: &[f32], v: &[f32]) -> Result<Self, LookupError> {
        if bp.is_empty() {
            return Err(LookupError::Empty);
        }
        if bp.len() != v.len() {
            return Err(LookupError::LengthMismatch(bp.len(), v.len()));
        }
        if bp.iter().chain(v).any(|x| !x.is_finite()) {
            return Err(LookupError::NonFinite);
        }
        if bp.windows(2).any(|w| w[1] <= w[0]) {
            return Err(LookupError::NotIncreasing);
        }
        Ok(Self {
            bp: Vec::from_slice(bp).map_err(|()| LookupError::TooLarge)?,
            v: Vec::from_slice(v).map_err(|()| LookupError::TooLarge)?,
        })
    }

    /// Same value at every covariate.
    pub fn constant(value: f32) -> Self {
        let mut bp = Vec::new();
        let mut v = Vec::new();
        let _ = bp.push(0.0);
        let _ = v.push(value);
        Self { bp, v }
    }

    /// Re-checks invariants after deserialization.
    pub fn validate(&self) -> Result<(), LookupError> {
        Self::new(&self.bp, &self.v).map(|_| ())
    }

    pub fn values(&self) -> &[f32] {
        &self.v
    }

    pub fn interp(&self, x: f32) -> f32 {
        let n = self.bp.len();
        if n == 0 {
            return 0.0;
        }
        if x <= self.bp[0] {
            return self.v[0];
        }
        if x >= self.bp[n - 1] {
            return self.v[n - 1];
        }
        let hi = self.bp.iter().position(|&b| b > x).unwrap_or(n - 1);
        let lo = hi - 1;
        let t = (x - self.bp[lo]) / (self.bp[hi] - self.bp[lo]);
        self.v[lo] + t * (self.v[hi] - self.v[lo])
    }

    /// Every value multiplied by `k`, e.g. converting a per-second table to per-tick.
    pub fn scaled(&self, k: f32) -> Self {
        Self {
            bp: self.bp.clone(),
            v: self.v.iter().map(|v| v * k).collect(),
        }
    }
}

/// Windup and unwind bound for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepLimits {
    pub windup: f32,
    pub unwind: f32,
}

impl StepLimits {
    /// Bound for moving from `last` to `desired`.
    pub fn for_move(&self, last: f32, desired: f32) -> f32 {
        if is_windup(last, desired) {
            self.windup
        } else {
            self.unwind
        }
    }
}

/// Growing in magnitude, starting at zero or keeping the previous sign.
pub fn is_windup(last: f32, desired: f32) -> bool {
    last * desired >= 0.0 && desired.abs() > last.abs()
}

/// Asymmetric per-tick rate limiter carrying its last output.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiter {
    windup: Lookup,
    unwind: Lookup,
    last: f32,
}

impl RateLimiter {
    /// Tables give the allowed change per tick as a function of the covariate.
    pub fn new(windup: Lookup, unwind: Lookup) -> Self {
        Self {
            windup,
            unwind,
            last: 0.0,
        }
    }

    pub fn limits(&self, covariate: f32) -> StepLimits {
        StepLimits {
            windup: self.windup.interp(covariate).abs(),
            unwind: self.unwind.interp(covariate).abs(),
        }
    }

    pub fn last(&self) -> f32 {
        self.last
    }

    pub fn reset(&mut self, value: f32) {
        self.last = value;
    }

    /// Clamps `desired` to the bound for this move and remembers the result.
    ///
    /// A non-finite request holds the last output.
    pub fn apply(&mut self, desired: f32, covariate: f32) -> f32 {
        if !desired.is_finite() {
            return self.last;
        }
        let limit = self.limits(covariate).for_move(self.last, desired);
        let out = desired.clamp(self.last - limit, self.last + limit);
        self.last = out;
        out
    }

    /// Torque-style limiting: the command is first kept within `error_max` of the measured
    /// actuator value and `max`, then rate limited with windup/unwind.
    pub fn apply_toward_measured(
        &mut self,
        desired: f32,
        measured: f32,
        covariate: f32,
        error_max: f32,
        max: f32,
    ) -> f32 {
        if !(desired.is_finite() && measured.is_finite()) {
            return self.last;
        }
        let limits = self.limits(covariate);
        let out = apply_dist_to_meas_limits(desired, self.last, measured, limits, error_max, max);
        self.last = out;
        out
    }
}

/// Limits a command by its distance to the measured value, its magnitude, and its rate.
pub fn apply_dist_to_meas_limits(
    val: f32,
    val_last: f32,
    val_meas: f32,
    limits: StepLimits,
    error_max: f32,
    max: f32,
) -> f32 {
    let max_lim = (val_meas + error_max).max(error_max).min(max);
    let min_lim = (val_meas - error_max).min(-error_max).max(-max);
    let val = val.clamp(min_lim, max_lim);

    if val_last > 0.0 {
        val.clamp(
            (val_last - limits.unwind).max(-limits.windup),
            val_last + limits.windup,
        )
    } else {
        val.clamp(
            val_last - limits.windup,
            (val_last + limits.unwind).min(limits.windup),
        )
    }
}

/// Moves `steady` only when `val` leaves the band `steady ± gap`, to the near edge of the band.
pub fn apply_hysteresis(val: f32, steady: f32, gap: f32) -> f32 {
    if val > steady + gap {
        val - gap
    } else if val < steady - gap {
        val + gap
    } else {
        steady
    }
}
