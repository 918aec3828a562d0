// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! FU-A fragmentation units
//! ([RFC 6184 section 5.8](https://datatracker.ietf.org/doc/html/rfc6184#section-5.8)).

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use log::debug;

use super::{Nalu, NaluType};
use crate::bitfield::word_bit_range;
use crate::event::{Event, EventSink};
use crate::rtp::RtpPacket;
use crate::{Error, ErrorKind, Timestamp};

/// Where a fragment sits within its NAL unit, from the S and E bits of the FU
/// header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FuPosition {
    Start = 0b10,
    Middle = 0b00,
    End = 0b01,
}

/// One FU-A packet's worth of a NAL unit.
///
/// ```text
/// FU indicator     FU header
/// +---------------+---------------+
/// |0|1|2|3|4|5|6|7|0|1|2|3|4|5|6|7|
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |F|NRI|  Type   |S|E|R|  Type   |
/// +---------------+---------------+
/// ```
#[derive(Clone)]
pub struct FragmentationUnit {
    position: FuPosition,
    subtype: u8,
    nal_ref_idc: u8,
    sequence_number: u16,
    timestamp: Timestamp,
    body: Bytes,
}

impl FragmentationUnit {
    /// Interprets `nalu`, whose header is the FU indicator, as a fragment
    /// carried in `pkt`.
    pub fn new(pkt: &RtpPacket, nalu: &Nalu) -> Result<Self, Error> {
        let data = nalu.data();
        if data.len() < 2 {
            bail!(ErrorKind::MalformedPacket {
                description: format!(
                    "FU-A seq {:04x} has no FU header",
                    pkt.sequence_number()
                ),
            });
        }
        let fu_header = data[1];
        let position = match word_bit_range(fu_header, 0, 2, true) {
            0b10 => FuPosition::Start,
            0b00 => FuPosition::Middle,
            0b01 => FuPosition::End,
            _ => bail!(ErrorKind::MalformedPacket {
                description: format!(
                    "FU-A seq {:04x} has both start and end bits set",
                    pkt.sequence_number()
                ),
            }),
        };
        if word_bit_range(fu_header, 2, 1, true) != 0 {
            bail!(ErrorKind::MalformedPacket {
                description: format!(
                    "FU-A seq {:04x} has reserved bit set in header {:02x}",
                    pkt.sequence_number(),
                    fu_header
                ),
            });
        }
        Ok(FragmentationUnit {
            position,
            subtype: word_bit_range(fu_header, 3, 5, true),
            nal_ref_idc: nalu.nal_ref_idc(),
            sequence_number: pkt.sequence_number(),
            timestamp: nalu.timestamp(),
            body: data.slice(2..),
        })
    }

    #[inline]
    pub fn position(&self) -> FuPosition {
        self.position
    }

    /// The type of the NAL unit being fragmented.
    #[inline]
    pub fn subtype(&self) -> u8 {
        self.subtype
    }

    #[inline]
    pub fn nal_ref_idc(&self) -> u8 {
        self.nal_ref_idc
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// The fragment payload following the FU header.
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl std::fmt::Debug for FragmentationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentationUnit")
            .field("position", &self.position)
            .field("subtype", &self.subtype)
            .field("sequence_number", &self.sequence_number)
            .field("timestamp", &self.timestamp)
            .field("body", &crate::hex::LimitedHex::new(&self.body[..]))
            .finish()
    }
}

/// Reassembles NAL units from FU-A fragments, which may arrive out of order.
///
/// A start fragment discards anything buffered before it. Middle fragments
/// accumulate even without a preceding start; the checks run when the end
/// fragment arrives, and the buffer is emptied whatever their outcome.
pub struct Defragmenter {
    buf: Vec<FragmentationUnit>,
    events: Arc<dyn EventSink>,
}

impl Defragmenter {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Defragmenter {
            buf: Vec::new(),
            events,
        }
    }

    /// Returns the number of buffered fragments.
    #[inline]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Discards any buffered fragments.
    pub fn reset(&mut self) {
        if !self.buf.is_empty() {
            debug!("discarding {} buffered FU-A fragments", self.buf.len());
            self.buf.clear();
        }
    }

    /// Adds a fragment, returning the reassembled NAL unit after an end
    /// fragment.
    pub fn process(&mut self, fu: FragmentationUnit) -> Result<Option<Nalu>, Error> {
        match fu.position {
            FuPosition::Start => {
                if !self.buf.is_empty() {
                    debug!(
                        "FU-A start seq {:04x} abandons {} fragments starting at seq {:04x}",
                        fu.sequence_number,
                        self.buf.len(),
                        self.buf[0].sequence_number
                    );
                    self.buf.clear();
                }
                self.buf.push(fu);
                Ok(None)
            }
            FuPosition::Middle => {
                self.buf.push(fu);
                Ok(None)
            }
            FuPosition::End => {
                self.buf.push(fu);
                let frags = std::mem::take(&mut self.buf);
                match reassemble(frags) {
                    Ok(nalu) => Ok(Some(nalu)),
                    Err(e) => {
                        debug!("dropping FU-A: {}", e);
                        self.events.post(Event::BadFragmentationUnit);
                        Err(e)
                    }
                }
            }
        }
    }
}

fn sequence_numbers(frags: &[FragmentationUnit]) -> Vec<u16> {
    frags.iter().map(|f| f.sequence_number).collect()
}

/// Puts `frags` in sequence number order and joins them into one NAL unit.
fn reassemble(mut frags: Vec<FragmentationUnit>) -> Result<Nalu, Error> {
    if frags.len() > 1 {
        frags.sort_by_key(|f| f.sequence_number);

        // Containing both extremes is taken to mean the run crosses 65535 -> 0.
        // Then exactly one discontinuity is expected, at the wrap point.
        let wraps_around =
            frags[0].sequence_number == 0 && frags[frags.len() - 1].sequence_number == u16::MAX;
        let mut gap = None;
        for i in 1..frags.len() {
            let delta = frags[i]
                .sequence_number
                .wrapping_sub(frags[i - 1].sequence_number);
            if delta == 1 {
                continue;
            }
            if !wraps_around || gap.is_some() {
                bail!(ErrorKind::Fragmentation {
                    description: format!(
                        "sequence number gap between {:04x} and {:04x}",
                        frags[i - 1].sequence_number,
                        frags[i].sequence_number
                    ),
                    sequence_numbers: sequence_numbers(&frags),
                });
            }
            gap = Some(i);
        }
        if let Some(i) = gap {
            frags.rotate_left(i);
        }
    }

    let first = &frags[0];
    let last = &frags[frags.len() - 1];
    if first.position != FuPosition::Start || last.position != FuPosition::End {
        bail!(ErrorKind::Fragmentation {
            description: format!(
                "expected start..end fragments, got {:?}..{:?}",
                first.position, last.position
            ),
            sequence_numbers: sequence_numbers(&frags),
        });
    }
    let subtype = first.subtype;
    if NaluType::from_raw(subtype).is_none() {
        bail!(ErrorKind::UnknownH264Type(subtype));
    }

    let len = 1 + frags.iter().map(|f| f.body.len()).sum::<usize>();
    let mut data = BytesMut::with_capacity(len);
    data.put_u8(Nalu::header_for_type(first.nal_ref_idc, subtype));
    for f in &frags {
        data.extend_from_slice(&f.body[..]);
    }
    let nalu = Nalu::new(data.freeze(), first.timestamp)?;
    assert_eq!(nalu.raw_type(), subtype);
    Ok(nalu)
}
