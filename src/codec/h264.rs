// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [H.264](https://www.itu.int/rec/T-REC-H.264-201906-I/en)-encoded video.
//!
//! NAL units arrive in the [RFC 6184](https://datatracker.ietf.org/doc/html/rfc6184)
//! payload format: single NAL unit packets, STAP-A aggregates and FU-A
//! fragments. [`depacketize::RtpProcessor`] turns datagrams into complete
//! [`Nalu`]s; [`processor::H264Processor`] turns those into
//! [`super::FormatDescription`]s and [`super::AccessUnit`]s.

use bytes::Bytes;

use crate::bitfield::{word_bit_range, word_bit_set};
use crate::{Error, ErrorKind, Timestamp};

pub mod depacketize;
pub mod fu;
pub mod parameters;
pub mod processor;

/// The NAL unit types this crate models. Others are carried as their raw
/// value; see [`Nalu::raw_type`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NaluType {
    SliceNonIdr = 1,
    SliceIdr = 5,
    Sps = 7,
    Pps = 8,
}

impl NaluType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(NaluType::SliceNonIdr),
            5 => Some(NaluType::SliceIdr),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            _ => None,
        }
    }

    #[inline]
    pub fn raw(self) -> u8 {
        self as u8
    }

    /// Returns true for coded slices, which become access units.
    #[inline]
    pub fn is_slice(self) -> bool {
        matches!(self, NaluType::SliceNonIdr | NaluType::SliceIdr)
    }
}

/// NAL unit types defined by the RTP payload format rather than H.264 itself
/// ([RFC 6184 section 5.2](https://datatracker.ietf.org/doc/html/rfc6184#section-5.2)).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RtpNaluType {
    StapA = 24,
    StapB = 25,
    Mtap16 = 26,
    Mtap24 = 27,
    FuA = 28,
    FuB = 29,
}

impl RtpNaluType {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            24 => Some(RtpNaluType::StapA),
            25 => Some(RtpNaluType::StapB),
            26 => Some(RtpNaluType::Mtap16),
            27 => Some(RtpNaluType::Mtap24),
            28 => Some(RtpNaluType::FuA),
            29 => Some(RtpNaluType::FuB),
            _ => None,
        }
    }

    #[inline]
    pub fn raw(self) -> u8 {
        self as u8
    }
}

/// A single NAL unit: its one-byte header, its body and a presentation time.
///
/// ```text
/// +---------------+
/// |0|1|2|3|4|5|6|7|
/// +-+-+-+-+-+-+-+-+
/// |F|NRI|  Type   |
/// +---------------+
/// ```
#[derive(Clone)]
pub struct Nalu {
    data: Bytes,
    timestamp: Timestamp,
}

impl Nalu {
    /// Wraps `data`, which must include the header byte.
    pub fn new(data: Bytes, timestamp: Timestamp) -> Result<Self, Error> {
        if data.is_empty() {
            bail!(ErrorKind::EmptyBuffer);
        }
        Ok(Nalu { data, timestamp })
    }

    /// Returns the NAL header byte for the given `nal_ref_idc` and type, with
    /// the forbidden zero bit clear.
    pub fn header_for_type(nal_ref_idc: u8, raw_type: u8) -> u8 {
        let h = word_bit_set(0u8, 1, 2, true, nal_ref_idc);
        word_bit_set(h, 3, 5, true, raw_type)
    }

    #[inline]
    pub fn header(&self) -> u8 {
        self.data[0]
    }

    #[inline]
    pub fn forbidden_zero_bit(&self) -> bool {
        word_bit_range(self.header(), 0, 1, true) == 1
    }

    #[inline]
    pub fn nal_ref_idc(&self) -> u8 {
        word_bit_range(self.header(), 1, 2, true)
    }

    #[inline]
    pub fn raw_type(&self) -> u8 {
        word_bit_range(self.header(), 3, 5, true)
    }

    /// Returns the type if it's one of the modeled [`NaluType`]s.
    #[inline]
    pub fn nalu_type(&self) -> Option<NaluType> {
        NaluType::from_raw(self.raw_type())
    }

    /// Returns the RTP payload format type, for aggregation and fragmentation
    /// packets.
    #[inline]
    pub fn rtp_type(&self) -> Option<RtpNaluType> {
        RtpNaluType::from_raw(self.raw_type())
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the full NAL unit, including the header byte.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Returns everything after the header byte.
    #[inline]
    pub fn body(&self) -> Bytes {
        self.data.slice(1..)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Nalu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nalu")
            .field("nal_ref_idc", &self.nal_ref_idc())
            .field("raw_type", &self.raw_type())
            .field("timestamp", &self.timestamp)
            .field("data", &crate::hex::LimitedHex::new(&self.data[..]))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use test_case::test_case;

    use super::*;
    use crate::testutil::ts;
    use crate::ErrorKind;

    #[test_case(0x67, false, 3, 7, Some(NaluType::Sps); "sps")]
    #[test_case(0x68, false, 3, 8, Some(NaluType::Pps); "pps")]
    #[test_case(0x65, false, 3, 5, Some(NaluType::SliceIdr); "idr")]
    #[test_case(0x41, false, 2, 1, Some(NaluType::SliceNonIdr); "non-idr")]
    #[test_case(0x01, false, 0, 1, Some(NaluType::SliceNonIdr); "disposable")]
    #[test_case(0x06, false, 0, 6, None; "sei")]
    #[test_case(0x7c, false, 3, 28, None; "fu-a")]
    #[test_case(0x9c, true, 0, 28, None; "forbidden")]
    fn header(byte: u8, forbidden: bool, ref_idc: u8, raw: u8, t: Option<NaluType>) {
        let n = Nalu::new(Bytes::from(vec![byte, 0xaa]), ts(0)).unwrap();
        assert_eq!(n.forbidden_zero_bit(), forbidden);
        assert_eq!(n.nal_ref_idc(), ref_idc);
        assert_eq!(n.raw_type(), raw);
        assert_eq!(n.nalu_type(), t);
        assert_eq!(&n.body()[..], &[0xaa]);
    }

    #[test]
    fn rtp_types() {
        let stap = Nalu::new(Bytes::from_static(b"\x18"), ts(0)).unwrap();
        assert_eq!(stap.rtp_type(), Some(RtpNaluType::StapA));
        assert_eq!(stap.nalu_type(), None);
        let idr = Nalu::new(Bytes::from_static(b"\x65"), ts(0)).unwrap();
        assert_eq!(idr.rtp_type(), None);
    }

    #[test]
    fn empty() {
        let e = Nalu::new(Bytes::new(), ts(0)).unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::EmptyBuffer));
    }

    #[test]
    fn header_for_type() {
        assert_eq!(Nalu::header_for_type(3, 5), 0x65);
        assert_eq!(Nalu::header_for_type(3, 7), 0x67);
        assert_eq!(Nalu::header_for_type(2, 1), 0x41);
        assert_eq!(Nalu::header_for_type(0, 1), 0x01);
        for ref_idc in 0..4 {
            for raw in 0..32 {
                let hdr = Nalu::header_for_type(ref_idc, raw);
                let n = Nalu::new(Bytes::from(vec![hdr]), ts(0)).unwrap();
                assert!(!n.forbidden_zero_bit());
                assert_eq!(n.nal_ref_idc(), ref_idc);
                assert_eq!(n.raw_type(), raw);
            }
        }
    }
}
