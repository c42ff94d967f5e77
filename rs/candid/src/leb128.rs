//! LEB128 and SLEB128 varints over arbitrary-precision integers.
//!
//! Candid `nat` and `int` have no width limit, so the codec works on
//! [`BigUint`]/[`BigInt`]; `u64`/`i64` shortcuts exist for lengths, counts
//! and type indices.

use num_bigint::{BigInt, BigUint};
use num_traits::{One, ToPrimitive, Zero};

use crate::Error;

/// A byte cursor with explicit positioning, so speculative decodes can
/// checkpoint and restore.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        debug_assert!(pos <= self.bytes.len());
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn read_byte(&mut self) -> Result<u8, Error> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| Error::Malformed("unexpected end of message".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_exact(&mut self, count: usize) -> Result<&'a [u8], Error> {
        if count > self.remaining() {
            return Err(Error::Malformed("unexpected end of message".to_string()));
        }
        let bytes = &self.bytes[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }
}

pub(crate) fn write_leb128(out: &mut Vec<u8>, value: &BigUint) {
    let mask = BigUint::from(0x7fu8);
    let mut value = value.clone();
    loop {
        let byte = (&value & &mask).to_u8().expect("masked to 7 bits");
        value >>= 7;
        if value.is_zero() {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn write_leb128_u64(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn write_sleb128(out: &mut Vec<u8>, value: &BigInt) {
    let mask = BigInt::from(0x7f);
    let minus_one = BigInt::from(-1);
    let mut value = value.clone();
    loop {
        let byte = (&value & &mask).to_u8().expect("masked to 7 bits");
        // Arithmetic shift: rounds towards negative infinity, so negative
        // values converge to -1 rather than 0.
        value >>= 7;
        let done = (value.is_zero() && byte & 0x40 == 0) || (value == minus_one && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn write_sleb128_i64(out: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub(crate) fn read_leb128(reader: &mut Reader<'_>) -> Result<BigUint, Error> {
    let mut result = BigUint::zero();
    let mut shift = 0usize;
    loop {
        let byte = reader.read_byte()?;
        result |= BigUint::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

pub(crate) fn read_sleb128(reader: &mut Reader<'_>) -> Result<BigInt, Error> {
    let mut result = BigUint::zero();
    let mut shift = 0usize;
    loop {
        let byte = reader.read_byte()?;
        result |= BigUint::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            let mut value = BigInt::from(result);
            // The last group carries the sign bit; extend it over the
            // accumulated width.
            if byte & 0x40 != 0 {
                value -= BigInt::one() << shift;
            }
            return Ok(value);
        }
    }
}

pub(crate) fn read_leb128_u64(reader: &mut Reader<'_>) -> Result<u64, Error> {
    read_leb128(reader)?
        .to_u64()
        .ok_or_else(|| Error::Malformed("varint out of u64 range".to_string()))
}

pub(crate) fn read_sleb128_i64(reader: &mut Reader<'_>) -> Result<i64, Error> {
    read_sleb128(reader)?
        .to_i64()
        .ok_or_else(|| Error::Malformed("varint out of i64 range".to_string()))
}
