//! Bit-exact signal packing for fixed-layout frames.
//!
//! A [`MessageSpec`] is pure data: where each named signal lives in the payload, how its raw
//! integer maps to a physical value, and which fields carry the rolling counter and the
//! checksum. Encoding always recomputes the checksum after every other signal is placed, so a
//! frame produced here is accepted by a receiver that validates the same sum.

use crate::can::{checksum_4bit, checksum_8bit, CanError, Frame, MAX_PAYLOAD_LEN};
use arrayvec::ArrayString;
use heapless::Vec;
use static_assertions::const_assert;
use thiserror::Error;

pub const MAX_SIGNALS: usize = 16;
/// Raw values are carried in an `i64`.
pub const MAX_SIGNAL_BITS: u8 = 63;
const MAX_BIT_POSITIONS: usize = 64;

// A signal spanning the whole payload must fit the position buffer
const_assert!(MAX_PAYLOAD_LEN * 8 <= MAX_BIT_POSITIONS);

pub type SignalValues = Vec<(&'static str, f64), MAX_SIGNALS>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Intel layout, start bit is the least significant bit.
    LittleEndian,
    /// Motorola layout, start bit is the most significant bit in DBC sawtooth numbering.
    BigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSpec {
    pub name: &'static str,
    pub start_bit: u16,
    pub size: u8,
    pub order: ByteOrder,
    pub signed: bool,
    pub factor: f64,
    pub offset: f64,
}

impl SignalSpec {
    /// Unsigned little-endian signal with unit scale.
    pub const fn raw(name: &'static str, start_bit: u16, size: u8) -> Self {
        Self {
            name,
            start_bit,
            size,
            order: ByteOrder::LittleEndian,
            signed: false,
            factor: 1.0,
            offset: 0.0,
        }
    }

    pub const fn scaled(name: &'static str, start_bit: u16, size: u8, signed: bool, factor: f64) -> Self {
        Self {
            name,
            start_bit,
            size,
            order: ByteOrder::LittleEndian,
            signed,
            factor,
            offset: 0.0,
        }
    }

    pub const fn big_endian(mut self) -> Self {
        self.order = ByteOrder::BigEndian;
        self
    }

    pub const fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    fn raw_range(&self) -> (i64, i64) {
        if self.signed {
            let half = 1i64 << (self.size - 1);
            (-half, half - 1)
        } else {
            (0, (1i64 << self.size) - 1)
        }
    }

    fn check_width(&self) -> Result<(), CodecError> {
        if self.size == 0 || self.size > MAX_SIGNAL_BITS {
            return Err(CodecError::SignalOutOfBounds(self.name));
        }
        Ok(())
    }

    /// Payload bit indices from most to least significant bit.
    fn bit_positions(&self, payload_len: usize) -> Result<Vec<u16, MAX_BIT_POSITIONS>, CodecError> {
        self.check_width()?;
        let overflow = || CodecError::SignalOutOfBounds(self.name);
        let mut positions = Vec::new();
        let limit = (payload_len * 8) as u16;
        match self.order {
            ByteOrder::LittleEndian => {
                for i in (0..u16::from(self.size)).rev() {
                    let pos = self.start_bit + i;
                    if pos >= limit {
                        return Err(overflow());
                    }
                    positions.push(pos).map_err(|_| overflow())?;
                }
            }
            ByteOrder::BigEndian => {
                let mut pos = self.start_bit;
                for i in 0..self.size {
                    if pos >= limit {
                        return Err(overflow());
                    }
                    positions.push(pos).map_err(|_| overflow())?;
                    if i + 1 < self.size {
                        pos = if pos % 8 == 0 { pos + 15 } else { pos - 1 };
                    }
                }
            }
        }
        Ok(positions)
    }

    pub fn extract_raw(&self, data: &[u8]) -> Result<i64, CodecError> {
        let mut raw: u64 = 0;
        for pos in self.bit_positions(data.len())? {
            let bit = (data[usize::from(pos / 8)] >> (pos % 8)) & 1;
            raw = (raw << 1) | u64::from(bit);
        }
        let raw = raw as i64;
        if self.signed && raw & (1 << (self.size - 1)) != 0 {
            Ok(raw - (1i64 << self.size))
        } else {
            Ok(raw)
        }
    }

    pub fn insert_raw(&self, data: &mut [u8], raw: i64) -> Result<(), CodecError> {
        let positions = self.bit_positions(data.len())?;
        let (min, max) = self.raw_range();
        if raw < min || raw > max {
            return Err(CodecError::ValueOutOfRange(self.name));
        }
        let bits = (raw as u64) & ((1u64 << self.size) - 1);
        let count = positions.len();
        for (i, pos) in positions.into_iter().enumerate() {
            let bit = ((bits >> (count - 1 - i)) & 1) as u8;
            let byte = &mut data[usize::from(pos / 8)];
            *byte = (*byte & !(1 << (pos % 8))) | (bit << (pos % 8));
        }
        Ok(())
    }

    pub fn decode(&self, data: &[u8]) -> Result<f64, CodecError> {
        Ok(self.extract_raw(data)? as f64 * self.factor + self.offset)
    }

    pub fn to_raw(&self, value: f64) -> Result<i64, CodecError> {
        self.check_width()?;
        if !value.is_finite() {
            return Err(CodecError::ValueOutOfRange(self.name));
        }
        let raw = ((value - self.offset) / self.factor).round();
        let (min, max) = self.raw_range();
        if raw < min as f64 || raw > max as f64 {
            return Err(CodecError::ValueOutOfRange(self.name));
        }
        Ok(raw as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumSeed {
    /// Seeded with the frame identifier.
    Id,
    Zero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Sum8(ChecksumSeed),
    Sum4(ChecksumSeed),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumSpec {
    pub signal: &'static str,
    pub kind: ChecksumKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSpec {
    pub signal: &'static str,
    pub modulus: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MessageSpec {
    pub name: &'static str,
    pub id: u32,
    pub len: usize,
    pub signals: &'static [SignalSpec],
    pub checksum: Option<ChecksumSpec>,
    pub counter: Option<CounterSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown signal {1} in {0}")]
    UnknownSignal(&'static str, SignalName),
    #[error("value out of range for signal {0}")]
    ValueOutOfRange(&'static str),
    #[error("signal {0} does not fit in the payload")]
    SignalOutOfBounds(&'static str),
    #[error("{0} has more signals than a decode can hold")]
    TooManySignals(&'static str),
    #[error("frame id {found:#x} is not {expected:#x}")]
    IdMismatch { expected: u32, found: u32 },
    #[error("frame length {found} is not {expected}")]
    LengthMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Frame(#[from] CanError),
}

/// Caller-supplied signal names are not `'static`; errors keep a bounded copy.
pub type SignalName = ArrayString<32>;

fn bounded_name(s: &str) -> SignalName {
    let mut out = SignalName::new();
    for c in s.chars() {
        if out.try_push(c).is_err() {
            break;
        }
    }
    out
}

impl MessageSpec {
    pub fn signal(&self, name: &str) -> Option<&SignalSpec> {
        self.signals.iter().find(|s| s.name == name)
    }

    fn checksum_signal(&self) -> Option<(&SignalSpec, ChecksumKind)> {
        let spec = self.checksum?;
        self.signal(spec.signal).map(|s| (s, spec.kind))
    }

    /// Checksum of `data` with the checksum field cleared.
    pub fn compute_checksum(&self, data: &[u8]) -> Result<Option<u8>, CodecError> {
        let Some((signal, kind)) = self.checksum_signal() else {
            return Ok(None);
        };
        let mut work = [0u8; MAX_PAYLOAD_LEN];
        let len = data.len().min(MAX_PAYLOAD_LEN);
        work[..len].copy_from_slice(&data[..len]);
        signal.insert_raw(&mut work[..len], 0)?;
        let seed = |s: ChecksumSeed| match s {
            ChecksumSeed::Id => self.id,
            ChecksumSeed::Zero => 0,
        };
        let value = match kind {
            ChecksumKind::Sum8(s) => checksum_8bit(&work[..len], seed(s)),
            ChecksumKind::Sum4(s) => checksum_4bit(&work[..len], seed(s)),
        };
        Ok(Some(value))
    }

    pub fn encode(&self, bus: u8, values: &[(&str, f64)]) -> Result<Frame, CodecError> {
        let mut frame = Frame::zeroed(bus, self.id, self.len)?;
        let checksum_name = self.checksum.map(|c| c.signal);
        for (name, value) in values {
            let signal = self
                .signal(name)
                .ok_or_else(|| CodecError::UnknownSignal(self.name, bounded_name(name)))?;
            if Some(signal.name) == checksum_name {
                continue;
            }
            let raw = signal.to_raw(*value)?;
            signal.insert_raw(&mut frame.data, raw)?;
        }
        if let Some((signal, _)) = self.checksum_signal() {
            if let Some(sum) = self.compute_checksum(&frame.data)? {
                signal.insert_raw(&mut frame.data, i64::from(sum))?;
            }
        }
        Ok(frame)
    }

    fn check_frame(&self, frame: &Frame) -> Result<(), CodecError> {
        if frame.id != self.id {
            return Err(CodecError::IdMismatch { expected: self.id, found: frame.id });
        }
        if frame.len() != self.len {
            return Err(CodecError::LengthMismatch { expected: self.len, found: frame.len() });
        }
        Ok(())
    }

    pub fn decode(&self, frame: &Frame) -> Result<SignalValues, CodecError> {
        self.check_frame(frame)?;
        let mut values = SignalValues::new();
        for signal in self.signals {
            values
                .push((signal.name, signal.decode(&frame.data)?))
                .map_err(|_| CodecError::TooManySignals(self.name))?;
        }
        Ok(values)
    }

    pub fn decode_signal(&self, frame: &Frame, name: &str) -> Result<f64, CodecError> {
        self.check_frame(frame)?;
        let signal = self
            .signal(name)
            .ok_or_else(|| CodecError::UnknownSignal(self.name, bounded_name(name)))?;
        signal.decode(&frame.data)
    }

    /// True when the frame has no checksum field or the transmitted one matches.
    pub fn verify_checksum(&self, frame: &Frame) -> bool {
        if self.check_frame(frame).is_err() {
            return false;
        }
        let Some((signal, _)) = self.checksum_signal() else {
            return true;
        };
        match (signal.extract_raw(&frame.data), self.compute_checksum(&frame.data)) {
            (Ok(sent), Ok(Some(expected))) => sent == i64::from(expected),
            _ => false,
        }
    }

    pub fn counter(&self, frame: &Frame) -> Option<u8> {
        let spec = self.counter?;
        let raw = self.signal(spec.signal)?.extract_raw(&frame.data).ok()?;
        u8::try_from(raw).ok()
    }
}

/// Looks a value up by signal name in decoded output.
pub fn value_of(values: &SignalValues, name: &str) -> Option<f64> {
    values.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_big_endian_positions_follow_sawtooth() {
        let spec = SignalSpec::raw("angle", 7, 16).big_endian();
        let positions = spec.bit_positions(8).unwrap();
        assert_eq!(positions[0], 7);
        assert_eq!(positions[7], 0);
        assert_eq!(positions[8], 15);
        assert_eq!(positions[15], 8);
    }

    #[test]
    fn test_big_endian_signed_matches_byte_layout() {
        let spec = SignalSpec::scaled("angle", 7, 16, true, 1.0).big_endian();
        let mut data = [0u8; 8];
        spec.insert_raw(&mut data, -2).unwrap();
        assert_eq!(&data[..2], &[0xFF, 0xFE]);
        assert_eq!(spec.extract_raw(&data).unwrap(), -2);
    }

    #[test]
    fn test_little_endian_crosses_bytes() {
        let spec = SignalSpec::raw("speed", 0, 12);
        let mut data = [0u8; 8];
        spec.insert_raw(&mut data, 0xABC).unwrap();
        assert_eq!(data[0], 0xBC);
        assert_eq!(data[1], 0x0A);
        assert_eq!(spec.extract_raw(&data).unwrap(), 0xABC);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let spec = SignalSpec::scaled("torque", 0, 8, true, 1.0);
        assert!(matches!(spec.to_raw(128.0), Err(CodecError::ValueOutOfRange("torque"))));
        assert_eq!(spec.to_raw(-128.0).unwrap(), -128);
        let unsigned = SignalSpec::raw("flag", 0, 1);
        assert!(unsigned.to_raw(-1.0).is_err());
        assert!(unsigned.to_raw(f64::NAN).is_err());
    }

    #[test]
    fn test_unsupported_widths_rejected() {
        let empty = SignalSpec::raw("empty", 0, 0);
        assert!(matches!(empty.extract_raw(&[0u8; 8]), Err(CodecError::SignalOutOfBounds("empty"))));
        assert!(matches!(empty.to_raw(0.0), Err(CodecError::SignalOutOfBounds("empty"))));

        let wide = SignalSpec::raw("wide", 0, 64);
        assert!(matches!(wide.insert_raw(&mut [0u8; 8], 1), Err(CodecError::SignalOutOfBounds("wide"))));

        let widest = SignalSpec::raw("widest", 0, MAX_SIGNAL_BITS);
        let mut data = [0u8; 8];
        widest.insert_raw(&mut data, 0x1234).unwrap();
        assert_eq!(widest.extract_raw(&data).unwrap(), 0x1234);
    }

    #[test]
    fn test_decode_reports_signal_overflow() {
        static CROWDED: [SignalSpec; MAX_SIGNALS + 1] = {
            let mut signals = [SignalSpec::raw("bit", 0, 1); MAX_SIGNALS + 1];
            let mut i = 0;
            while i < signals.len() {
                signals[i].start_bit = i as u16;
                i += 1;
            }
            signals
        };
        let spec = MessageSpec {
            name: "Crowded",
            id: 0x10,
            len: 8,
            signals: &CROWDED,
            checksum: None,
            counter: None,
        };
        let frame = Frame::zeroed(0, 0x10, 8).unwrap();
        assert!(matches!(spec.decode(&frame), Err(CodecError::TooManySignals("Crowded"))));
        assert_eq!(spec.decode_signal(&frame, "bit").unwrap(), 0.0);
    }

    #[test]
    fn test_signal_past_payload_end() {
        let spec = SignalSpec::raw("late", 60, 8);
        assert!(matches!(
            spec.extract_raw(&[0u8; 8]),
            Err(CodecError::SignalOutOfBounds("late"))
        ));
    }
}
