// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bit-range extraction and assignment.
//!
//! Header fields in RTP and H.264 are numbered most-significant-bit first:
//! bit 0 is the top bit of the first byte. Every function here takes a
//! `flipped` argument; `flipped == true` selects that network/bitstream
//! numbering, which is what the rest of this crate uses. `flipped == false`
//! numbers from the least significant bit of the whole (big-endian) field.
//!
//! Out-of-range arguments are programming errors and panic.

/// Unsigned integer types usable with [`word_bit_range`] and [`word_bit_set`].
pub trait Word: Copy {
    const BITS: u32;
    fn to_u64(self) -> u64;

    /// Truncates `v` to this width.
    fn from_u64(v: u64) -> Self;
}

macro_rules! impl_word {
    ($t:ty) => {
        impl Word for $t {
            const BITS: u32 = <$t>::BITS;

            #[inline]
            fn to_u64(self) -> u64 {
                u64::from(self)
            }

            #[inline]
            fn from_u64(v: u64) -> Self {
                v as $t
            }
        }
    };
}

impl_word!(u8);
impl_word!(u16);
impl_word!(u32);
impl_word!(u64);

#[inline]
fn ones(length: u32) -> u64 {
    match length {
        64 => u64::MAX,
        l => (1u64 << l) - 1,
    }
}

/// Returns the shift of a field within a `total`-bit word.
#[inline]
fn shift_of(total: u32, start: u32, length: u32, flipped: bool) -> u32 {
    assert!(
        length <= 64 && start.checked_add(length).map_or(false, |end| end <= total),
        "bit range {start}+{length} exceeds {total}-bit field"
    );
    if flipped {
        total - start - length
    } else {
        start
    }
}

/// Extracts `length` bits starting at bit `start` of `value`.
pub fn word_bit_range<T: Word>(value: T, start: u32, length: u32, flipped: bool) -> T {
    let shift = shift_of(T::BITS, start, length, flipped);
    if length == 0 {
        return T::from_u64(0);
    }
    T::from_u64((value.to_u64() >> shift) & ones(length))
}

/// Returns `value` with `length` bits starting at bit `start` replaced by the
/// low bits of `new_value`.
pub fn word_bit_set<T: Word>(value: T, start: u32, length: u32, flipped: bool, new_value: T) -> T {
    let shift = shift_of(T::BITS, start, length, flipped);
    if length == 0 {
        return value;
    }
    let mask = ones(length) << shift;
    T::from_u64((value.to_u64() & !mask) | ((new_value.to_u64() << shift) & mask))
}

/// Converts a field position to the MSB-first start bit within `buf`.
#[inline]
fn msb_start(buf_len: usize, start: usize, length: u32, flipped: bool) -> usize {
    let total = buf_len * 8;
    assert!(
        length <= 64 && start + (length as usize) <= total,
        "bit range {start}+{length} exceeds {total}-bit buffer"
    );
    if flipped {
        start
    } else {
        total - start - length as usize
    }
}

/// Extracts `length` (at most 64) bits starting at bit `start` of `buf`.
///
/// Byte-aligned 8/16/32/64-bit fields are read directly. Anything else is
/// assembled from the (at most 9) bytes the range touches, so ranges may cross
/// any byte or word boundary.
pub fn bit_range(buf: &[u8], start: usize, length: u32, flipped: bool) -> u64 {
    let start = msb_start(buf.len(), start, length, flipped);
    if length == 0 {
        return 0;
    }
    if start % 8 == 0 {
        let i = start / 8;
        match length {
            8 => return u64::from(buf[i]),
            16 => return u64::from(u16::from_be_bytes([buf[i], buf[i + 1]])),
            32 => {
                return u64::from(u32::from_be_bytes([
                    buf[i],
                    buf[i + 1],
                    buf[i + 2],
                    buf[i + 3],
                ]))
            }
            64 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(&buf[i..i + 8]);
                return u64::from_be_bytes(word);
            }
            _ => {}
        }
    }
    let first = start / 8;
    let last = (start + length as usize - 1) / 8;
    let touched = &buf[first..=last];
    let acc = touched
        .iter()
        .fold(0u128, |acc, &b| (acc << 8) | u128::from(b));
    let shift = touched.len() * 8 - (start % 8) - length as usize;
    ((acc >> shift) as u64) & ones(length)
}

/// Replaces `length` (at most 64) bits starting at bit `start` of `buf` with
/// the low bits of `new_value`. Bits outside the range are untouched.
pub fn bit_set(buf: &mut [u8], start: usize, length: u32, flipped: bool, new_value: u64) {
    let start = msb_start(buf.len(), start, length, flipped);
    if length == 0 {
        return;
    }
    if start % 8 == 0 && matches!(length, 8 | 16 | 32 | 64) {
        let i = start / 8;
        let n = length as usize / 8;
        buf[i..i + n].copy_from_slice(&new_value.to_be_bytes()[8 - n..]);
        return;
    }
    let first = start / 8;
    let last = (start + length as usize - 1) / 8;
    let touched = &mut buf[first..=last];
    let acc = touched
        .iter()
        .fold(0u128, |acc, &b| (acc << 8) | u128::from(b));
    let shift = touched.len() * 8 - (start % 8) - length as usize;
    let mask = u128::from(ones(length)) << shift;
    let acc = (acc & !mask) | ((u128::from(new_value) << shift) & mask);
    let n = touched.len();
    for (i, b) in touched.iter_mut().enumerate() {
        *b = (acc >> (8 * (n - 1 - i))) as u8;
    }
}
