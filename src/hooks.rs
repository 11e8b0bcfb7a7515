//! Host-facing safety hook interface.
//!
//! The host loop selects a safety model by id and then routes every received, transmitted and
//! relayed frame through it. Test harnesses drive the same calls without a vehicle.

use crate::can::Frame;
use crate::heartbeat::{Heartbeat, HeartbeatWatch, HEARTBEAT_TIMEOUT};
use crate::safety::SafetyMonitor;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SafetyError {
    #[error("unknown safety model {0}")]
    UnknownModel(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum SafetyModel {
    /// Transmits nothing and relays nothing.
    Silent = 0,
    StalkServo = 12,
    /// Accepts and relays everything. Bench use only.
    AllOutput = 17,
}

impl TryFrom<u16> for SafetyModel {
    type Error = SafetyError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(SafetyModel::Silent),
            12 => Ok(SafetyModel::StalkServo),
            17 => Ok(SafetyModel::AllOutput),
            other => Err(SafetyError::UnknownModel(other)),
        }
    }
}

pub trait SafetyHooks {
    fn init(&mut self, param: i16);
    fn rx(&mut self, frame: &Frame);
    fn tx(&mut self, frame: &Frame) -> bool;
    fn fwd(&mut self, bus: u8, frame: &Frame) -> Option<u8>;
    fn controls_allowed(&self) -> bool;
    fn set_controls_allowed(&mut self, allowed: bool);

    /// Time-based checks, called once per host loop iteration.
    fn tick(&mut self, _now_ns: u64) {}
}

#[derive(Debug, Default)]
pub struct SilentHooks;

impl SafetyHooks for SilentHooks {
    fn init(&mut self, _param: i16) {}

    fn rx(&mut self, _frame: &Frame) {}

    fn tx(&mut self, _frame: &Frame) -> bool {
        false
    }

    fn fwd(&mut self, _bus: u8, _frame: &Frame) -> Option<u8> {
        None
    }

    fn controls_allowed(&self) -> bool {
        false
    }

    fn set_controls_allowed(&mut self, _allowed: bool) {}
}

#[derive(Debug, Default)]
pub struct AllOutputHooks {
    controls_allowed: bool,
}

impl SafetyHooks for AllOutputHooks {
    fn init(&mut self, _param: i16) {
        self.controls_allowed = true;
    }

    fn rx(&mut self, _frame: &Frame) {}

    fn tx(&mut self, _frame: &Frame) -> bool {
        true
    }

    fn fwd(&mut self, bus: u8, _frame: &Frame) -> Option<u8> {
        match bus {
            0 => Some(2),
            2 => Some(0),
            _ => None,
        }
    }

    fn controls_allowed(&self) -> bool {
        self.controls_allowed
    }

    fn set_controls_allowed(&mut self, allowed: bool) {
        self.controls_allowed = allowed;
    }
}

impl SafetyHooks for SafetyMonitor {
    fn init(&mut self, _param: i16) {
        SafetyMonitor::init(self);
    }

    fn rx(&mut self, frame: &Frame) {
        self.rx_hook(frame);
    }

    fn tx(&mut self, frame: &Frame) -> bool {
        self.tx_hook(frame)
    }

    fn fwd(&mut self, bus: u8, frame: &Frame) -> Option<u8> {
        self.fwd_hook(bus, frame)
    }

    fn controls_allowed(&self) -> bool {
        SafetyMonitor::controls_allowed(self)
    }

    fn set_controls_allowed(&mut self, allowed: bool) {
        SafetyMonitor::set_controls_allowed(self, allowed);
    }

    fn tick(&mut self, now_ns: u64) {
        SafetyMonitor::tick(self, now_ns);
    }
}

#[derive(Debug)]
enum ActiveHooks {
    Silent(SilentHooks),
    StalkServo(SafetyMonitor),
    AllOutput(AllOutputHooks),
}

/// Dispatches the hook calls to the selected model. Starts out silent.
#[derive(Debug)]
pub struct SafetyHost {
    model: SafetyModel,
    hooks: ActiveHooks,
    heartbeat: Option<Heartbeat>,
}

impl Default for SafetyHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyHost {
    pub fn new() -> Self {
        Self {
            model: SafetyModel::Silent,
            hooks: ActiveHooks::Silent(SilentHooks),
            heartbeat: None,
        }
    }

    /// Host whose stalk/servo model watches `heartbeat`.
    pub fn with_heartbeat(heartbeat: Heartbeat) -> Self {
        Self {
            heartbeat: Some(heartbeat),
            ..Self::new()
        }
    }

    pub fn set_safety_hooks(&mut self, model_id: u16, param: i16) -> Result<(), SafetyError> {
        let model = SafetyModel::try_from(model_id)?;
        self.hooks = match model {
            SafetyModel::Silent => ActiveHooks::Silent(SilentHooks),
            SafetyModel::AllOutput => ActiveHooks::AllOutput(AllOutputHooks::default()),
            SafetyModel::StalkServo => {
                let mut monitor = SafetyMonitor::new();
                if let Some(heartbeat) = &self.heartbeat {
                    monitor.attach_heartbeat(HeartbeatWatch::new(heartbeat.clone(), HEARTBEAT_TIMEOUT));
                }
                ActiveHooks::StalkServo(monitor)
            }
        };
        self.model = model;
        self.hooks_mut().init(param);
        info!(?model, param, "safety hooks set");
        Ok(())
    }

    pub fn model(&self) -> SafetyModel {
        self.model
    }

    fn hooks(&self) -> &dyn SafetyHooks {
        match &self.hooks {
            ActiveHooks::Silent(h) => h,
            ActiveHooks::StalkServo(h) => h,
            ActiveHooks::AllOutput(h) => h,
        }
    }

    fn hooks_mut(&mut self) -> &mut dyn SafetyHooks {
        match &mut self.hooks {
            ActiveHooks::Silent(h) => h,
            ActiveHooks::StalkServo(h) => h,
            ActiveHooks::AllOutput(h) => h,
        }
    }

    /// The stalk/servo monitor, when that model is active.
    pub fn monitor(&self) -> Option<&SafetyMonitor> {
        match &self.hooks {
            ActiveHooks::StalkServo(monitor) => Some(monitor),
            _ => None,
        }
    }

    pub fn safety_rx_hook(&mut self, frame: &Frame) {
        self.hooks_mut().rx(frame);
    }

    pub fn safety_tx_hook(&mut self, frame: &Frame) -> bool {
        self.hooks_mut().tx(frame)
    }

    pub fn safety_fwd_hook(&mut self, bus: u8, frame: &Frame) -> Option<u8> {
        self.hooks_mut().fwd(bus, frame)
    }

    pub fn safety_tick(&mut self, now_ns: u64) {
        self.hooks_mut().tick(now_ns);
    }

    pub fn get_controls_allowed(&self) -> bool {
        self.hooks().controls_allowed()
    }

    pub fn set_controls_allowed(&mut self, allowed: bool) {
        self.hooks_mut().set_controls_allowed(allowed);
    }
}
