// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTP depacketizer and H.264 elementary stream reassembler.
//!
//! Consumes raw UDP datagrams carrying H.264 video in the
//! [RFC 6184](https://datatracker.ietf.org/doc/html/rfc6184) payload format
//! and produces either a new decoder [`codec::FormatDescription`] or a
//! ready-to-decode [`codec::AccessUnit`].
//!
//! The layers, from the bottom up:
//!
//! *   [`bitfield`]: MSB-first bit-range access over byte buffers.
//! *   [`rtp::RtpPacket`]: the 12-byte RTP fixed header.
//! *   [`codec::h264`]: NAL units, FU-A defragmentation, STAP-A splitting,
//!     SPS/PPS tracking.
//! *   [`pipeline::Pipeline`]: synchronous per-datagram glue.
//! *   [`channel::RtpChannel`]: a tokio worker fed from a single-consumer
//!     queue, optionally reading its own UDP socket.

#![forbid(clippy::print_stderr, clippy::print_stdout)]

use std::fmt::{Debug, Display};
use std::num::NonZeroU32;

/// Wraps the supplied `ErrorKind` and returns it as an `Err`.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::error::Error(std::sync::Arc::new($e)))
    };
}

macro_rules! wrap {
    ($e:expr) => {
        crate::error::Error(std::sync::Arc::new($e))
    };
}

mod error;
mod hex;

pub mod bitfield;
pub mod channel;
pub mod codec;
pub mod event;
pub mod pipeline;
pub mod rtp;
pub mod timeline;
mod tokio;

#[cfg(test)]
mod testutil;

pub use error::{Error, ErrorKind};

/// The RTP clock rate of H.264 video, in Hz.
pub const H264_CLOCK_RATE: u32 = 90_000;

/// An annotated RTP timestamp.
///
/// This couples together three pieces of information:
///
/// *   The stream's starting time: the RTP timestamp of the first packet
///     received on the stream. According to [RFC 3550 section
///     5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1), "the
///     initial value of the timestamp SHOULD be random".
///
/// *   The codec-specific clock rate; always 90 kHz for H.264.
///
/// *   The timestamp as an `i64`. Its top bits are inferred from wraparounds of
///     32-bit RTP timestamps by a [`timeline::Timeline`].
///
/// A presentation time is the rational `elapsed() / clock_rate()`.
///
/// The [`Display`] and [`Debug`] implementations currently display:
/// *   the bottom 32 bits, as seen in RTP packet headers.
/// *   the full timestamp.
/// *   elapsed seconds since the stream start.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Timestamp {
    /// A timestamp which must be compared to `start`.
    pub(crate) timestamp: i64,

    /// The codec-specified clock rate, in Hz. Must be non-zero.
    pub(crate) clock_rate: NonZeroU32,

    /// The stream's starting time.
    pub(crate) start: u32,
}

impl Timestamp {
    /// Creates a new timestamp unless `timestamp - start` underflows.
    #[inline]
    pub fn new(timestamp: i64, clock_rate: NonZeroU32, start: u32) -> Option<Self> {
        timestamp.checked_sub(i64::from(start)).map(|_| Timestamp {
            timestamp,
            clock_rate,
            start,
        })
    }

    /// Returns time since some arbitrary point before the stream started.
    #[inline]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns timestamp of the start of the stream.
    #[inline]
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Returns codec-specified clock rate, in Hz.
    #[inline]
    pub fn clock_rate(&self) -> NonZeroU32 {
        self.clock_rate
    }

    /// Returns elapsed time since the stream start in clock rate units.
    ///
    /// This is the numerator of the presentation time; [`Self::clock_rate`] is
    /// the denominator.
    #[inline]
    pub fn elapsed(&self) -> i64 {
        self.timestamp - i64::from(self.start)
    }

    /// Returns elapsed time since the stream start in seconds.
    #[inline]
    pub fn elapsed_secs(&self) -> f64 {
        (self.elapsed() as f64) / (self.clock_rate.get() as f64)
    }

    /// Returns `self + delta` unless it would overflow.
    pub fn try_add(&self, delta: u32) -> Option<Self> {
        self.timestamp
            .checked_add(i64::from(delta))
            .map(|timestamp| Timestamp {
                timestamp,
                clock_rate: self.clock_rate,
                start: self.start,
            })
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (mod-2^32: {}), npt {:.03}",
            self.timestamp,
            self.timestamp as u32,
            self.elapsed_secs()
        )
    }
}

impl Debug for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
