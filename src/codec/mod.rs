// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Codec-specific logic and the items handed to decoders.
//!
//! Currently this is H.264 only: [`h264`] depacketizes RTP into NAL units and
//! turns those into [`Output`]s.

use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::Timestamp;

pub mod h264;

/// An item produced for the decoder.
#[derive(Clone, Debug)]
pub enum Output {
    /// A new SPS/PPS pair. Subsequent access units should be decoded with it.
    FormatDescription(Arc<FormatDescription>),
    AccessUnit(AccessUnit),
}

/// Decoder configuration derived from one SPS/PPS pair.
#[derive(Clone, PartialEq, Eq)]
pub struct FormatDescription {
    pub(crate) sps: Bytes,
    pub(crate) pps: Bytes,
    pub(crate) avc_decoder_config: Bytes,
    pub(crate) rfc6381_codec: String,
    pub(crate) pixel_dimensions: Option<(u32, u32)>,
}

impl FormatDescription {
    /// The length in bytes of the big-endian size prefixing each NAL unit in
    /// an [`AccessUnit`].
    #[inline]
    pub fn nal_unit_header_length(&self) -> usize {
        4
    }

    /// Returns the parameter sets in the order platform decoders expect them:
    /// PPS, then SPS.
    pub fn parameter_sets(&self) -> [&[u8]; 2] {
        [&self.pps[..], &self.sps[..]]
    }

    #[inline]
    pub fn sps(&self) -> &[u8] {
        &self.sps[..]
    }

    #[inline]
    pub fn pps(&self) -> &[u8] {
        &self.pps[..]
    }

    /// Returns an `AVCDecoderConfigurationRecord` as defined in ISO/IEC
    /// 14496-15 section 5.2.4.1, suitable for an `avcC` box or as decoder
    /// "extra data".
    #[inline]
    pub fn avc_decoder_config(&self) -> &[u8] {
        &self.avc_decoder_config[..]
    }

    /// Returns a codec description in
    /// [RFC-6381](https://tools.ietf.org/html/rfc6381) form, eg `avc1.4D401E`.
    #[inline]
    pub fn rfc6381_codec(&self) -> &str {
        &self.rfc6381_codec
    }

    /// Returns the overall dimensions of the video frame in pixels, as `(width, height)`,
    /// if the SPS could be fully parsed.
    #[inline]
    pub fn pixel_dimensions(&self) -> Option<(u32, u32)> {
        self.pixel_dimensions
    }
}

impl std::fmt::Debug for FormatDescription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatDescription")
            .field("rfc6381_codec", &self.rfc6381_codec)
            .field("pixel_dimensions", &self.pixel_dimensions)
            .field("sps", &crate::hex::LimitedHex::new(&self.sps[..]))
            .field("pps", &crate::hex::LimitedHex::new(&self.pps[..]))
            .finish()
    }
}

/// A single encoded picture, ready to decode.
///
/// The data is one NAL unit in AVCC form: a 4-byte big-endian length followed
/// by the NAL unit itself. Use [`AccessUnit::data`] or the [bytes::Buf]
/// implementation to retrieve it.
#[derive(Clone)]
pub struct AccessUnit {
    /// This picture's presentation time: `timestamp.elapsed() / 90_000` seconds.
    pub timestamp: Timestamp,

    /// If this is an IDR picture, decodable without any before it.
    pub is_random_access_point: bool,

    /// If no other pictures require this one to be decoded correctly.
    /// In H.264 terms, this is a frame with `nal_ref_idc == 0`.
    pub is_disposable: bool,

    format_description: Arc<FormatDescription>,

    /// Position within `data`, for the `Buf` implementation.
    pos: usize,

    data: Bytes,
}

impl AccessUnit {
    pub(crate) fn new(
        timestamp: Timestamp,
        is_random_access_point: bool,
        is_disposable: bool,
        format_description: Arc<FormatDescription>,
        data: Bytes,
    ) -> Self {
        AccessUnit {
            timestamp,
            is_random_access_point,
            is_disposable,
            format_description,
            pos: 0,
            data,
        }
    }

    /// The format description in effect when this picture was produced.
    #[inline]
    pub fn format_description(&self) -> &Arc<FormatDescription> {
        &self.format_description
    }

    /// Returns the full AVCC data, regardless of how much has been read via
    /// [`Buf`].
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    #[inline]
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl std::fmt::Debug for AccessUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessUnit")
            .field("timestamp", &self.timestamp)
            .field("is_random_access_point", &self.is_random_access_point)
            .field("is_disposable", &self.is_disposable)
            .field("pos", &self.pos)
            .field("data", &crate::hex::LimitedHex::new(&self.data[..]))
            .finish()
    }
}

impl Buf for AccessUnit {
    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn chunk(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    fn advance(&mut self, cnt: usize) {
        assert!(self.pos + cnt <= self.data.len());
        self.pos += cnt;
    }
}
