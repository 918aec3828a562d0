// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns RTP datagrams into complete NAL units.

use std::num::NonZeroU32;
use std::sync::Arc;

use bytes::{Buf, Bytes};
use log::{debug, trace};

use super::fu::{Defragmenter, FragmentationUnit};
use super::{Nalu, RtpNaluType};
use crate::event::{Event, EventSink};
use crate::rtp::RtpPacket;
use crate::timeline::Timeline;
use crate::{Error, ErrorKind};

/// The dynamic RTP payload type conventionally used for H.264.
pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

/// Per-datagram RTP parsing and NAL unit dispatch.
///
/// Each call to [`RtpProcessor::process`] yields zero or more complete NAL
/// units: none for a non-final FU-A fragment, one for a single NAL unit packet
/// or the last FU-A fragment, and several for a STAP-A.
pub struct RtpProcessor {
    payload_type: u8,
    ssrc: Option<u32>,
    timeline: Timeline,
    defragmenter: Defragmenter,
    events: Arc<dyn EventSink>,
}

impl RtpProcessor {
    pub fn new(payload_type: u8, events: Arc<dyn EventSink>) -> Self {
        let clock_rate = NonZeroU32::new(crate::H264_CLOCK_RATE).expect("90 kHz is non-zero");
        RtpProcessor {
            payload_type,
            ssrc: None,
            timeline: Timeline::new(None, clock_rate),
            defragmenter: Defragmenter::new(events.clone()),
            events,
        }
    }

    /// Returns the SSRC of the last accepted packet.
    #[inline]
    pub fn ssrc(&self) -> Option<u32> {
        self.ssrc
    }

    pub fn process(&mut self, datagram: Bytes) -> Result<Vec<Nalu>, Error> {
        let pkt = RtpPacket::parse(datagram)?;
        trace!("{}", &pkt);
        if pkt.payload_type() != self.payload_type {
            bail!(ErrorKind::UnknownH264Type(pkt.payload_type()));
        }
        self.check_ssrc(pkt.ssrc());
        let timestamp = self
            .timeline
            .place(pkt.timestamp())
            .map_err(|description| wrap!(ErrorKind::MalformedPacket { description }))?;
        let nalu = Nalu::new(pkt.body(), timestamp)?;
        let nalus = match nalu.rtp_type() {
            None => vec![nalu],
            Some(RtpNaluType::FuA) => {
                let fu = FragmentationUnit::new(&pkt, &nalu)?;
                self.defragmenter.process(fu)?.into_iter().collect()
            }
            Some(RtpNaluType::StapA) => split_stap_a(&nalu)?,
            Some(t) => bail!(ErrorKind::UnsupportedFeature(format!(
                "{:?} packets (NAL type {}) not supported",
                t,
                t.raw()
            ))),
        };
        for _ in &nalus {
            self.events.post(Event::NaluProduced);
        }
        Ok(nalus)
    }

    /// Notices a change of synchronization source, which restarts the stream.
    fn check_ssrc(&mut self, ssrc: u32) {
        match self.ssrc {
            Some(old) if old != ssrc => {
                debug!("SSRC changed from {:08x} to {:08x}; resetting stream", old, ssrc);
                self.events.post(Event::StreamReset);
                self.defragmenter.reset();
                self.timeline.reset();
            }
            _ => {}
        }
        self.ssrc = Some(ssrc);
    }
}

/// Splits a STAP-A into its NAL units, which share its timestamp.
///
/// ```text
/// [STAP-A NAL HDR][NALU 1 size (16 bits)][NALU 1]...[NALU n size][NALU n]
/// ```
///
/// See [RFC 6184 section 5.7.1](https://tools.ietf.org/html/rfc6184#section-5.7.1).
fn split_stap_a(stap: &Nalu) -> Result<Vec<Nalu>, Error> {
    let mut data = stap.body();
    let mut out = Vec::new();

    // A dangling byte too short to hold a length is ignored.
    while data.remaining() >= 2 {
        let len = usize::from(data.get_u16());
        if len > data.remaining() {
            bail!(ErrorKind::MalformedAggregation {
                description: format!(
                    "too short: {} bytes remaining, expecting {}-byte NAL unit",
                    data.remaining(),
                    len
                ),
            });
        }
        out.push(Nalu::new(data.split_to(len), stap.timestamp())?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::codec::h264::NaluType;
    use crate::rtp::RtpPacketBuilder;
    use crate::testutil::{self, datagram, fu_a_payloads, RecordingSink};

    fn processor() -> RtpProcessor {
        RtpProcessor::new(DEFAULT_PAYLOAD_TYPE, crate::event::discard())
    }

    #[test]
    fn single_nal() {
        testutil::init_logging();
        let mut p = processor();
        let nalus = p.process(datagram(1, 1000, true, b"\x65slice")).unwrap();
        assert_eq!(nalus.len(), 1);
        assert_eq!(&nalus[0].data()[..], b"\x65slice");
        assert_eq!(nalus[0].nalu_type(), Some(NaluType::SliceIdr));
        assert_eq!(nalus[0].timestamp().elapsed(), 0);

        let nalus = p.process(datagram(2, 4000, true, b"\x41slice")).unwrap();
        assert_eq!(nalus[0].timestamp().elapsed(), 3000);
        assert_eq!(p.ssrc(), Some(0x4cac_c3d1));
    }

    #[test]
    fn stap_a() {
        let mut payload = vec![0x78]; // STAP-A, nal_ref_idc 3
        for nal in [testutil::SPS, testutil::PPS, &b"\x65idr"[..]] {
            payload.extend_from_slice(&(nal.len() as u16).to_be_bytes());
            payload.extend_from_slice(nal);
        }
        let mut p = processor();
        let nalus = p.process(datagram(1, 90_000, true, &payload)).unwrap();
        assert_eq!(nalus.len(), 3);
        assert_eq!(&nalus[0].data()[..], testutil::SPS);
        assert_eq!(&nalus[1].data()[..], testutil::PPS);
        assert_eq!(&nalus[2].data()[..], b"\x65idr");
        assert_eq!(nalus[0].nalu_type(), Some(NaluType::Sps));
        assert_eq!(nalus[1].nalu_type(), Some(NaluType::Pps));
        assert_eq!(nalus[2].nalu_type(), Some(NaluType::SliceIdr));
        assert!(nalus.iter().all(|n| n.timestamp() == nalus[0].timestamp()));
    }

    #[test]
    fn stap_a_malformed() {
        let mut p = processor();
        let e = p
            .process(datagram(1, 0, true, b"\x78\x00\x05\x65\x00"))
            .unwrap_err();
        assert!(
            matches!(e.kind(), ErrorKind::MalformedAggregation { .. }),
            "{e}"
        );
        let e = p
            .process(datagram(2, 0, true, b"\x78\x00\x01\x65\x00\x00"))
            .unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::EmptyBuffer), "{e}");
    }

    #[test]
    fn stap_a_lenient_tail() {
        let mut p = processor();

        // The trailing byte can't hold a length, so it's dropped.
        let nalus = p
            .process(datagram(1, 0, true, b"\x78\x00\x02\x65\x01\x00"))
            .unwrap();
        assert_eq!(nalus.len(), 1);
        assert_eq!(&nalus[0].data()[..], b"\x65\x01");

        // A bare header aggregates nothing.
        assert!(p.process(datagram(2, 0, true, b"\x78")).unwrap().is_empty());
    }

    #[test]
    fn fu_a() {
        let nal: Vec<u8> = [0x65].into_iter().chain(0..100).collect();
        let mut p = processor();
        let payloads = fu_a_payloads(&nal, 40);
        assert_eq!(payloads.len(), 3);
        assert!(p.process(datagram(10, 0, false, &payloads[0])).unwrap().is_empty());
        assert!(p.process(datagram(11, 0, false, &payloads[1])).unwrap().is_empty());
        let nalus = p.process(datagram(12, 0, true, &payloads[2])).unwrap();
        assert_eq!(nalus.len(), 1);
        assert_eq!(&nalus[0].data()[..], &nal[..]);
    }

    #[test]
    fn padding_rejected() {
        let mut raw = datagram(1, 0, true, b"\x65slice\x00\x00\x03").to_vec();
        raw[0] |= 0b0010_0000;
        let mut p = processor();
        let e = p.process(Bytes::from(raw)).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::UnsupportedFeature(_)), "{e}");
        assert_eq!(p.ssrc(), None);
    }

    #[test]
    fn wrong_payload_type() {
        let data = RtpPacketBuilder {
            sequence_number: 1,
            timestamp: 0,
            payload_type: 97,
            ssrc: 1,
            mark: true,
        }
        .build(*b"\x65slice")
        .unwrap();
        let e = processor().process(data).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::UnknownH264Type(97)), "{e}");
    }

    #[test]
    fn unsupported_aggregation() {
        let mut p = processor();
        for t in [25u8, 26, 27, 29] {
            let e = p.process(datagram(1, 0, true, &[0x60 | t, 0, 0])).unwrap_err();
            assert!(matches!(e.kind(), ErrorKind::UnsupportedFeature(_)), "{e}");
        }
    }

    #[test]
    fn empty_payload() {
        let e = processor().process(datagram(1, 0, true, b"")).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::EmptyBuffer), "{e}");
    }

    #[test]
    fn stream_reset() {
        let events = RecordingSink::new();
        let mut p = RtpProcessor::new(DEFAULT_PAYLOAD_TYPE, events.clone());
        let nal: Vec<u8> = [0x65].into_iter().chain(0..100).collect();
        let payloads = fu_a_payloads(&nal, 40);
        p.process(datagram(10, 5000, false, &payloads[0])).unwrap();
        p.process(datagram(11, 5000, false, &payloads[1])).unwrap();

        // A new source; its first packet starts the timeline again.
        let other = RtpPacketBuilder {
            sequence_number: 500,
            timestamp: 123_456,
            payload_type: 96,
            ssrc: 0xfeed,
            mark: true,
        }
        .build(*b"\x41slice")
        .unwrap();
        let nalus = p.process(other).unwrap();
        assert_eq!(nalus[0].timestamp().elapsed(), 0);
        assert_eq!(nalus[0].timestamp().start(), 123_456);
        assert_eq!(p.ssrc(), Some(0xfeed));
        assert_eq!(events.count(Event::StreamReset), 1);

        // The old source's end fragment no longer has a start to join.
        let e = p.process(datagram(12, 5000, true, &payloads[2])).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::Fragmentation { .. }), "{e}");
        assert_eq!(events.count(Event::StreamReset), 2);
    }
}
