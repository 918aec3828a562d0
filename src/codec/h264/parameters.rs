// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SPS/PPS tracking and decoder configuration.

use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use h264_reader::rbsp::{BitRead, BitReaderError};
use log::debug;

use super::{Nalu, NaluType};
use crate::codec::FormatDescription;
use crate::{Error, ErrorKind};

/// A possibly-incomplete SPS/PPS pair.
///
/// Equality compares the NAL unit bytes, so a repeated announcement of the
/// same parameters compares equal to the original.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ParameterSet {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    #[inline]
    pub fn sps(&self) -> Option<&Bytes> {
        self.sps.as_ref()
    }

    #[inline]
    pub fn pps(&self) -> Option<&Bytes> {
        self.pps.as_ref()
    }

    /// Stores `nalu` as the SPS or PPS, replacing any previous one.
    ///
    /// Returns the type stored, or `None` if `nalu` is neither.
    pub fn store(&mut self, nalu: &Nalu) -> Option<NaluType> {
        match nalu.nalu_type() {
            Some(NaluType::Sps) => {
                self.sps = Some(nalu.data().clone());
                Some(NaluType::Sps)
            }
            Some(NaluType::Pps) => {
                self.pps = Some(nalu.data().clone());
                Some(NaluType::Pps)
            }
            _ => None,
        }
    }

    /// Builds the decoder configuration for a complete pair.
    pub fn format_description(&self) -> Result<FormatDescription, Error> {
        match (&self.sps, &self.pps) {
            (Some(sps), Some(pps)) => parse_sps_and_pps(sps.clone(), pps.clone()),
            _ => bail!(ErrorKind::InvalidParameterSet(
                "SPS and PPS are both required".to_owned()
            )),
        }
    }

    /// Parses the value of an SDP `sprop-parameter-sets` format parameter: a
    /// comma-separated list of base64-encoded NAL units.
    pub fn from_sprop_parameter_sets(value: &str) -> Result<Self, Error> {
        let mut set = ParameterSet::default();
        for nal in value.split(',') {
            let nal = base64::engine::general_purpose::STANDARD
                .decode(nal.trim())
                .map_err(|_| {
                    wrap!(ErrorKind::InvalidParameterSet(
                        "NAL has invalid base64 encoding".to_owned()
                    ))
                })?;
            if nal.is_empty() {
                bail!(ErrorKind::InvalidParameterSet("empty NAL".to_owned()));
            }

            // Some cameras leave Annex B start codes at the end of both SPS and
            // PPS. Leaving them in means an immediate parameter change once the
            // in-band parameters arrive.
            let nal = Bytes::copy_from_slice(
                nal.strip_suffix(b"\x00\x00\x00\x01").unwrap_or(&nal[..]),
            );
            let slot = match NaluType::from_raw(nal[0] & 0b0001_1111) {
                Some(NaluType::Sps) => &mut set.sps,
                Some(NaluType::Pps) => &mut set.pps,
                _ => bail!(ErrorKind::InvalidParameterSet(format!(
                    "only SPS and PPS expected in parameter sets, got header {:02x}",
                    nal[0]
                ))),
            };
            if slot.is_some() {
                bail!(ErrorKind::InvalidParameterSet(
                    "multiple SPSs or PPSs".to_owned()
                ));
            }
            *slot = Some(nal);
        }
        if !set.is_complete() {
            bail!(ErrorKind::InvalidParameterSet(
                "sprop-parameter-sets lacks SPS or PPS".to_owned()
            ));
        }
        Ok(set)
    }
}

impl std::fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterSet")
            .field("sps", &self.sps.as_ref().map(|s| crate::hex::LimitedHex::new(s)))
            .field("pps", &self.pps.as_ref().map(|p| crate::hex::LimitedHex::new(p)))
            .finish()
    }
}

/// Reads an SPS, accepting stray bytes after the RBSP trailing bits.
///
/// Some cameras append an extra byte; most other RTSP implementations tolerate it.
struct LenientBitReader<'a, R> {
    inner: R,
    extra_trailing_data: &'a mut bool,
}

impl<R: BitRead> BitRead for LenientBitReader<'_, R> {
    fn read_ue(&mut self, name: &'static str) -> Result<u32, BitReaderError> {
        self.inner.read_ue(name)
    }

    fn read_se(&mut self, name: &'static str) -> Result<i32, BitReaderError> {
        self.inner.read_se(name)
    }

    fn read_bool(&mut self, name: &'static str) -> Result<bool, BitReaderError> {
        self.inner.read_bool(name)
    }

    fn skip(&mut self, bit_count: u32, name: &'static str) -> Result<(), BitReaderError> {
        self.inner.skip(bit_count, name)
    }

    fn read<U: h264_reader::rbsp::Numeric>(
        &mut self,
        bit_count: u32,
        name: &'static str,
    ) -> Result<U, BitReaderError> {
        self.inner.read(bit_count, name)
    }

    fn read_to<V: h264_reader::rbsp::Primitive>(
        &mut self,
        name: &'static str,
    ) -> Result<V, BitReaderError> {
        self.inner.read_to(name)
    }

    fn has_more_rbsp_data(&mut self, name: &'static str) -> Result<bool, BitReaderError> {
        self.inner.has_more_rbsp_data(name)
    }

    fn finish_rbsp(self) -> Result<(), BitReaderError> {
        match self.inner.finish_rbsp() {
            Err(BitReaderError::RemainingData) => {
                *self.extra_trailing_data = true;
                Ok(())
            }
            r => r,
        }
    }

    fn finish_sei_payload(self) -> Result<(), BitReaderError> {
        self.inner.finish_sei_payload()
    }
}

fn invalid(description: String) -> Error {
    wrap!(ErrorKind::InvalidParameterSet(description))
}

fn parse_sps_and_pps(sps_nal: Bytes, pps_nal: Bytes) -> Result<FormatDescription, Error> {
    if sps_nal.len() < 4 {
        return Err(invalid(format!("{}-byte SPS is too short", sps_nal.len())));
    }
    let sps_rbsp = h264_reader::rbsp::decode_nal(&sps_nal[..])
        .map_err(|e| invalid(format!("bad SPS: {e}")))?;
    if sps_rbsp.len() < 3 {
        return Err(invalid("SPS RBSP is too short".to_owned()));
    }
    let rfc6381_codec = format!(
        "avc1.{:02X}{:02X}{:02X}",
        sps_rbsp[0], sps_rbsp[1], sps_rbsp[2]
    );

    // Dimensions are informational; a decoder may still cope with an SPS
    // that h264-reader can't fully parse.
    let mut extra_trailing_data = false;
    let sps = h264_reader::nal::sps::SeqParameterSet::from_bits(LenientBitReader {
        inner: h264_reader::rbsp::BitReader::new(&*sps_rbsp),
        extra_trailing_data: &mut extra_trailing_data,
    });
    if extra_trailing_data {
        debug!("ignoring extra trailing data in SPS");
    }
    let pixel_dimensions = match sps {
        Ok(sps) => match sps.pixel_dimensions() {
            Ok(d) => Some(d),
            Err(e) => {
                debug!("SPS has invalid pixel dimensions: {:?}", e);
                None
            }
        },
        Err(e) => {
            debug!("unable to parse SPS: {:?}", e);
            None
        }
    };

    // Create the AVCDecoderConfiguration, ISO/IEC 14496-15 section 5.2.4.1.
    // The beginning of the AVCDecoderConfiguration takes a few values from
    // the SPS (ISO/IEC 14496-10 section 7.3.2.1.1).
    let sps_len = u16::try_from(sps_nal.len()).map_err(|_| invalid("SPS too long".to_owned()))?;
    let pps_len = u16::try_from(pps_nal.len()).map_err(|_| invalid("PPS too long".to_owned()))?;
    let mut avc_decoder_config = BytesMut::with_capacity(11 + sps_nal.len() + pps_nal.len());
    avc_decoder_config.put_u8(1); // configurationVersion
    avc_decoder_config.extend_from_slice(&sps_rbsp[0..=2]); // profile, compatibility, level

    // lengthSizeMinusOne is 3, matching the 4-byte lengths of access units.
    avc_decoder_config.put_u8(0xff);

    // Reserved 0b111 + a 5-bit # of SPSs (1).
    avc_decoder_config.put_u8(0xe1);
    avc_decoder_config.put_u16(sps_len);
    avc_decoder_config.extend_from_slice(&sps_nal[..]);
    avc_decoder_config.put_u8(1); // # of PPSs.
    avc_decoder_config.put_u16(pps_len);
    avc_decoder_config.extend_from_slice(&pps_nal[..]);
    assert_eq!(avc_decoder_config.len(), 11 + sps_nal.len() + pps_nal.len());

    Ok(FormatDescription {
        sps: sps_nal,
        pps: pps_nal,
        avc_decoder_config: avc_decoder_config.freeze(),
        rfc6381_codec,
        pixel_dimensions,
    })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::testutil::{ts, PPS, SPS};

    fn nalu(data: &'static [u8]) -> Nalu {
        Nalu::new(Bytes::from_static(data), ts(0)).unwrap()
    }

    #[test]
    fn completeness_and_equality() {
        let mut a = ParameterSet::new();
        assert!(!a.is_complete());
        assert_eq!(a.store(&nalu(SPS)), Some(NaluType::Sps));
        assert!(!a.is_complete());
        assert_eq!(a.store(&nalu(PPS)), Some(NaluType::Pps));
        assert!(a.is_complete());
        assert_eq!(a.store(&nalu(b"\x65idr")), None);

        let mut b = ParameterSet::new();
        b.store(&nalu(PPS));
        b.store(&nalu(SPS));
        assert_eq!(a, b);
        b.store(&nalu(b"\x68\xee\x3c\x81"));
        assert_ne!(a, b);
    }

    #[test]
    fn format_description() {
        let mut p = ParameterSet::new();
        p.store(&nalu(SPS));
        p.store(&nalu(PPS));
        let f = p.format_description().unwrap();
        assert_eq!(f.rfc6381_codec(), "avc1.4D401E");
        assert_eq!(f.pixel_dimensions(), Some((640, 480)));
        assert_eq!(f.parameter_sets(), [PPS, SPS]);
        let c = f.avc_decoder_config();
        assert_eq!(c.len(), 11 + SPS.len() + PPS.len());
        assert_eq!(&c[..8], b"\x01\x4d\x40\x1e\xff\xe1\x00\x17");
        assert_eq!(&c[8..8 + SPS.len()], SPS);
        assert_eq!(&c[8 + SPS.len()..11 + SPS.len()], b"\x01\x00\x04");
        assert_eq!(&c[11 + SPS.len()..], PPS);
    }

    #[test]
    fn truncated_sps() {
        let mut p = ParameterSet::new();
        p.store(&nalu(b"\x67\x4d\x40"));
        p.store(&nalu(PPS));
        let e = p.format_description().unwrap_err();
        assert!(matches!(e.kind(), ErrorKind::InvalidParameterSet(_)), "{e}");
    }

    #[test]
    fn unparseable_sps_has_no_dimensions() {
        let mut p = ParameterSet::new();
        p.store(&nalu(b"\x67\x4d\x40\x1e"));
        p.store(&nalu(PPS));
        let f = p.format_description().unwrap();
        assert_eq!(f.rfc6381_codec(), "avc1.4D401E");
        assert_eq!(f.pixel_dimensions(), None);
    }

    #[test]
    fn incomplete() {
        let mut p = ParameterSet::new();
        p.store(&nalu(SPS));
        assert!(p.format_description().is_err());
    }

    #[test]
    fn sprop_parameter_sets() {
        let p = ParameterSet::from_sprop_parameter_sets(
            "Z01AHppkBYHv/lBgYGQAAA+gAAE4gBA=,aO48gA==",
        )
        .unwrap();
        assert!(p.is_complete());
        assert_eq!(&p.pps().unwrap()[..], PPS);
        let f = p.format_description().unwrap();
        assert_eq!(f.pixel_dimensions(), Some((704, 480)));
    }

    #[test]
    fn sprop_strips_start_codes() {
        let p = ParameterSet::from_sprop_parameter_sets(
            "Z00AHpWoLQ9puAgICBAAAAAB,aO48gAAAAAE=",
        )
        .unwrap();
        assert_eq!(
            &p.sps().unwrap()[..],
            b"\x67\x4d\x00\x1e\x95\xa8\x2d\x0f\x69\xb8\x08\x08\x08\x10"
        );
        assert_eq!(&p.pps().unwrap()[..], PPS);
    }

    #[test]
    fn sprop_errors() {
        for bad in ["", "!!!", "aO48gA==", "Z00AHpWoLQ9puAgICBAAAAAB", "aO48gA==,aO48gA==", "ZQ=="] {
            let e = ParameterSet::from_sprop_parameter_sets(bad).unwrap_err();
            assert!(matches!(e.kind(), ErrorKind::InvalidParameterSet(_)), "{bad}: {e}");
        }
    }
}
