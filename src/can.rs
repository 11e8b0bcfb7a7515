//! Field-bus frames and the checksum primitives shared by every message family.

use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classic framing carries at most eight payload bytes.
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Largest identifier a 29-bit extended frame can carry.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
pub const MAX_STANDARD_ID: u32 = 0x7FF;

pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

/// Bus numbering as seen by the host interface.
pub struct CanBus;

impl CanBus {
    pub const PT_CAN: u8 = 0;
    /// Steering servo bus. Shared with the chassis bus on the harness.
    pub const SERVO_CAN: u8 = 1;
    pub const F_CAN: u8 = 1;
    /// Body bus, logging only.
    pub const K_CAN: u8 = 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CanError {
    #[error("payload of {0} bytes exceeds {MAX_PAYLOAD_LEN}")]
    PayloadTooLong(usize),
    #[error("identifier {0:#x} does not fit in 29 bits")]
    InvalidId(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub bus: u8,
    pub id: u32,
    pub data: Payload,
}

impl Frame {
    pub fn new(bus: u8, id: u32, data: &[u8]) -> Result<Self, CanError> {
        if id > MAX_EXTENDED_ID {
            return Err(CanError::InvalidId(id));
        }
        let data = Vec::from_slice(data).map_err(|()| CanError::PayloadTooLong(data.len()))?;
        Ok(Self { bus, id, data })
    }

    /// A zero-filled frame of `len` bytes.
    pub fn zeroed(bus: u8, id: u32, len: usize) -> Result<Self, CanError> {
        if len > MAX_PAYLOAD_LEN {
            return Err(CanError::PayloadTooLong(len));
        }
        Self::new(bus, id, &[0u8; MAX_PAYLOAD_LEN][..len])
    }

    pub fn is_extended(&self) -> bool {
        self.id > MAX_STANDARD_ID
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload byte `index`, or 0 past the end of a short frame.
    pub fn byte(&self, index: usize) -> u8 {
        self.data.get(index).copied().unwrap_or(0)
    }
}

/// Sum of all bytes plus `seed`, folded to eight bits by adding the high and low bytes.
///
/// `data` must already have the checksum field zeroed (or stripped).
pub fn checksum_8bit(data: &[u8], seed: u32) -> u8 {
    let sum = data.iter().fold(seed, |acc, &b| acc.wrapping_add(u32::from(b)));
    (((sum & 0xFF) + (sum >> 8)) & 0xFF) as u8
}

/// The 8-bit fold further folded into a nibble, for 4-bit checksum fields.
pub fn checksum_4bit(data: &[u8], seed: u32) -> u8 {
    let byte = u32::from(checksum_8bit(data, seed));
    (((byte & 0xF) + (byte >> 4)) & 0xF) as u8
}
