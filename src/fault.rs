//! Steering fault bookkeeping: a bounded log of what went wrong and the cool-down it started.

use heapless::Vec;
use serde::{Deserialize, Serialize};

const FAULT_LOG_LEN: usize = 64;
const NS_PER_MS: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SteeringFaultKind {
    /// Non-zero control status reported by the servo.
    ServoStatus(u8),
    /// Measured angle drifted too far from the commanded target.
    AngleTracking,
    /// Lateral control reported inactive while the controller was engaged.
    LateralInactive,
    /// A desired or measured value arrived as NaN or infinity.
    NonFiniteInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteeringFault {
    pub seq: u32,
    pub kind: SteeringFaultKind,
    pub raised_ns: u64,
    /// Set once the cool-down has elapsed with the fault gone.
    pub cleared_after_ms: Option<u32>,
}

impl SteeringFault {
    pub fn is_open(&self) -> bool {
        self.cleared_after_ms.is_none()
    }
}

/// Fault log plus the timed cool-down that keeps steering disabled after any fault.
#[derive(Debug)]
pub struct FaultManager {
    log: Vec<SteeringFault, FAULT_LOG_LEN>,
    seq: u32,
    cooldown_ns: u64,
    last_raised_ns: Option<u64>,
}

impl FaultManager {
    pub fn new(cooldown_s: f32) -> Self {
        Self {
            log: Vec::new(),
            seq: 0,
            cooldown_ns: (f64::from(cooldown_s.max(0.0)) * 1e9) as u64,
            last_raised_ns: None,
        }
    }

    /// Records a fault and restarts the cool-down. A kind already open only refreshes the timer.
    pub fn record_fault(&mut self, kind: SteeringFaultKind, now_ns: u64) -> u32 {
        self.last_raised_ns = Some(now_ns);

        if let Some(open) = self.log.iter().find(|f| f.is_open() && f.kind == kind) {
            return open.seq;
        }

        self.seq = self.seq.wrapping_add(1);
        if self.log.is_full() {
            self.log.remove(0);
        }
        let _ = self.log.push(SteeringFault {
            seq: self.seq,
            kind,
            raised_ns: now_ns,
            cleared_after_ms: None,
        });
        self.seq
    }

    /// Closes every open fault, returning how many there were.
    pub fn resolve_all(&mut self, now_ns: u64) -> usize {
        let mut closed = 0;
        for fault in self.log.iter_mut().filter(|f| f.is_open()) {
            let open_ms = now_ns.saturating_sub(fault.raised_ns) / NS_PER_MS;
            fault.cleared_after_ms = Some(u32::try_from(open_ms).unwrap_or(u32::MAX));
            closed += 1;
        }
        closed
    }

    /// True while the last fault is younger than the cool-down window.
    pub fn in_cooldown(&self, now_ns: u64) -> bool {
        self.last_raised_ns
            .is_some_and(|t| now_ns.saturating_sub(t) < self.cooldown_ns)
    }

    pub fn active_faults(&self) -> impl Iterator<Item = &SteeringFault> {
        self.log.iter().filter(|f| f.is_open())
    }

    pub fn history(&self) -> &[SteeringFault] {
        &self.log
    }
}
