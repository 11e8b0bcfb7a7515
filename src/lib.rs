//! # Stalkdrive
//!
//! Actuation layer for a driver-assistance stack on cars that only understand their own stalk
//! and servo traffic. Desired steering and acceleration are turned into field-bus frames that
//! the stock electronics accept as if a human had moved the lever or the wheel.
//!
//! ## Features
//!
//! - **Bit-exact framing**: Intel/Motorola signal layouts, rolling counters and checksums
//! - **Steering synthesis**: torque and angle control with speed-dependent rate limits,
//!   feed-forward holding torque, soft-off and fault cool-down
//! - **Cruise stalk emulation**: hold/tap ladder with hysteresis, counter collision avoidance
//!   and a latched cancel
//! - **Independent safety monitor**: its own limits and parsing, rx/tx/fwd hooks, heartbeat
//!   watch and actuator-enable output
//! - **Bounded memory**: heapless payloads and histories on the control path
//!
//! ## Quick Start
//!
//! ```rust
//! use stalkdrive::{ActuationController, ControlInputs, ControllerConfig, VehicleState};
//!
//! let mut controller = ActuationController::new(ControllerConfig::default()).unwrap();
//! let state = VehicleState::new();
//! let inputs = ControlInputs::default();
//!
//! let out = controller.update(0, &inputs, &state, false).unwrap();
//! assert!(out.frames.len() <= 2);
//! ```
//!
//! ## Architecture
//!
//! - [`can`], [`codec`], [`dbc`], [`messages`] - frames, signal layouts and typed messages
//! - [`rate_limit`] - lookups, rate limiting and hysteresis
//! - [`steering`] - steering command synthesizer
//! - [`cruise`] - cruise stalk emulator
//! - [`safety`], [`hooks`], [`heartbeat`] - independent enforcement and its host interface
//! - [`state`], [`config`], [`controller`] - vehicle snapshot, configuration and tick loop

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::float_cmp)]

pub mod can;
pub mod codec;
pub mod config;
pub mod controller;
pub mod cruise;
pub mod dbc;
pub mod fault;
pub mod heartbeat;
pub mod hooks;
pub mod messages;
pub mod rate_limit;
pub mod safety;
pub mod state;
pub mod steering;

// Re-export main public types for convenience
pub use can::{CanBus, Frame};
pub use config::{Capabilities, ConfigError, ControllerConfig};
pub use controller::{ActuationController, ActuatorFeedback, ControlInputs, TickOutput};
pub use cruise::{CruiseAction, CruiseStalkEmulator, CruiseTuning, SpeedUnit};
pub use hooks::{SafetyHost, SafetyModel};
pub use safety::SafetyMonitor;
pub use state::VehicleState;
pub use steering::{ActuatorCommand, SteeringParams, SteeringSynthesizer};
