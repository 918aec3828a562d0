// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::event::{Event, EventSink};
use crate::rtp::RtpPacketBuilder;
use crate::Timestamp;

pub(crate) fn init_logging() {
    let h = mylog::Builder::new()
        .set_format(
            ::std::env::var("MOONFIRE_FORMAT")
                .map_err(|_| ())
                .and_then(|s| mylog::Format::from_str(&s))
                .unwrap_or(mylog::Format::Google),
        )
        .set_spec(::std::env::var("MOONFIRE_LOG").as_deref().unwrap_or("info"))
        .build();
    let _ = h.install();
}

/// A 90 kHz timestamp `elapsed` ticks after a stream start of 0.
pub(crate) fn ts(elapsed: i64) -> Timestamp {
    Timestamp::new(elapsed, NonZeroU32::new(crate::H264_CLOCK_RATE).unwrap(), 0).unwrap()
}

/// A 640x480 Main profile SPS, level 3.0.
pub(crate) const SPS: &[u8] =
    b"\x67\x4d\x40\x1e\x9a\x64\x05\x01\xef\xf3\x50\x10\x10\x14\x00\x00\x0f\xa0\x00\x01\x38\x80\x10";

pub(crate) const PPS: &[u8] = b"\x68\xee\x3c\x80";

/// Builds a payload type 96 datagram.
pub(crate) fn datagram(sequence_number: u16, timestamp: u32, mark: bool, payload: &[u8]) -> Bytes {
    RtpPacketBuilder {
        sequence_number,
        timestamp,
        payload_type: 96,
        ssrc: 0x4cac_c3d1,
        mark,
    }
    .build(payload.iter().copied())
    .unwrap()
}

/// Splits `nal` into FU-A payloads of at most `max_body` fragment bytes each.
pub(crate) fn fu_a_payloads(nal: &[u8], max_body: usize) -> Vec<Vec<u8>> {
    let indicator = (nal[0] & 0b1110_0000) | 28;
    let subtype = nal[0] & 0b0001_1111;
    let chunks: Vec<&[u8]> = nal[1..].chunks(max_body).collect();
    let n = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut fu_header = subtype;
            if i == 0 {
                fu_header |= 0b1000_0000;
            }
            if i == n - 1 {
                fu_header |= 0b0100_0000;
            }
            let mut p = vec![indicator, fu_header];
            p.extend_from_slice(chunk);
            p
        })
        .collect()
}

/// Records every posted event.
#[derive(Default)]
pub(crate) struct RecordingSink(Mutex<Vec<Event>>);

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, e: Event) -> usize {
        self.0.lock().unwrap().iter().filter(|&&x| x == e).count()
    }
}

impl EventSink for RecordingSink {
    fn post(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }
}
