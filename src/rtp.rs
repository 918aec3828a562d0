// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handles RTP data as described in
//! [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1).

use bytes::Bytes;

use crate::bitfield::bit_range;
use crate::{Error, ErrorKind};

/// The length of an RTP header with no CSRCs or extensions.
pub const HEADER_LEN: usize = 12;

/// A parsed RTP packet.
///
/// Only the fixed header is supported. Padding, header extensions and CSRC
/// lists are rejected with [`ErrorKind::UnsupportedFeature`] at parse time.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// ```
#[derive(Clone)]
pub struct RtpPacket {
    data: Bytes,
    version: u8,
    padding: bool,
    extension: bool,
    csrc_count: u8,
    mark: bool,
    payload_type: u8,
    sequence_number: u16,
    timestamp: u32,
    ssrc: u32,
}

impl RtpPacket {
    /// Parses a datagram.
    ///
    /// Fails with [`ErrorKind::MalformedPacket`] if it's too short to hold a
    /// header or isn't RTP version 2.
    pub fn parse(data: Bytes) -> Result<Self, Error> {
        if data.len() < HEADER_LEN {
            bail!(ErrorKind::MalformedPacket {
                description: format!(
                    "{}-byte datagram is shorter than the {}-byte RTP header",
                    data.len(),
                    HEADER_LEN
                ),
            });
        }
        let hdr = &data[..HEADER_LEN];
        let pkt = RtpPacket {
            version: bit_range(hdr, 0, 2, true) as u8,
            padding: bit_range(hdr, 2, 1, true) == 1,
            extension: bit_range(hdr, 3, 1, true) == 1,
            csrc_count: bit_range(hdr, 4, 4, true) as u8,
            mark: bit_range(hdr, 8, 1, true) == 1,
            payload_type: bit_range(hdr, 9, 7, true) as u8,
            sequence_number: bit_range(hdr, 16, 16, true) as u16,
            timestamp: bit_range(hdr, 32, 32, true) as u32,
            ssrc: bit_range(hdr, 64, 32, true) as u32,
            data,
        };
        if pkt.version != 2 {
            bail!(ErrorKind::MalformedPacket {
                description: format!("RTP version {} (must be 2)", pkt.version),
            });
        }
        if pkt.padding {
            bail!(ErrorKind::UnsupportedFeature(
                "RTP padding flag not supported".to_owned()
            ));
        }
        if pkt.extension {
            bail!(ErrorKind::UnsupportedFeature(
                "RTP extension flag not supported".to_owned()
            ));
        }
        if pkt.csrc_count != 0 {
            bail!(ErrorKind::UnsupportedFeature(format!(
                "non-zero CSRC count {} not supported",
                pkt.csrc_count
            )));
        }
        Ok(pkt)
    }

    #[inline]
    pub fn version(&self) -> u8 {
        self.version
    }

    #[inline]
    pub fn padding(&self) -> bool {
        self.padding
    }

    #[inline]
    pub fn extension(&self) -> bool {
        self.extension
    }

    #[inline]
    pub fn csrc_count(&self) -> u8 {
        self.csrc_count
    }

    #[inline]
    pub fn mark(&self) -> bool {
        self.mark
    }

    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    /// The RTP timestamp in clock rate units, as sent.
    #[inline]
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Returns the raw bytes, including the RTP header.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.data[..]
    }

    /// Returns the payload following the 12-byte header, without copying.
    #[inline]
    pub fn body(&self) -> Bytes {
        self.data.slice(HEADER_LEN..)
    }
}

impl std::fmt::Display for RtpPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RtpPacket(version: {}, flags: {}{}{}, ",
            self.version,
            if self.padding { 'P' } else { 'p' },
            if self.extension { 'E' } else { 'e' },
            if self.mark { 'M' } else { 'm' },
        )?;
        if self.csrc_count > 0 {
            write!(f, "csrc_count: {}, ", self.csrc_count)?;
        }
        write!(
            f,
            "payload_type: {}, seq: {:04x}, timestamp: {}, ssrc: {:08x})",
            self.payload_type, self.sequence_number, self.timestamp, self.ssrc
        )
    }
}

impl std::fmt::Debug for RtpPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpPacket")
            .field("payload_type", &self.payload_type)
            .field("ssrc", &self.ssrc)
            .field("sequence_number", &self.sequence_number)
            .field("timestamp", &self.timestamp)
            .field("mark", &self.mark)
            .field("payload", &crate::hex::LimitedHex::new(&self.data[HEADER_LEN..]))
            .finish()
    }
}

/// Builds RTP datagrams with a fixed header. Used for tests, benchmarks and
/// fuzzing; exposed but not part of the stable interface.
#[doc(hidden)]
#[derive(Copy, Clone, Debug)]
pub struct RtpPacketBuilder {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub ssrc: u32,
    pub mark: bool,
}

impl RtpPacketBuilder {
    pub fn build<P: IntoIterator<Item = u8>>(self, payload: P) -> Result<Bytes, &'static str> {
        if self.payload_type >= 0x80 {
            return Err("payload type too large");
        }
        let data: Bytes = [
            2 << 6, // version=2, no padding, no extensions, no CSRCs.
            if self.mark { 0b1000_0000 } else { 0 } | self.payload_type,
        ]
        .into_iter()
        .chain(self.sequence_number.to_be_bytes())
        .chain(self.timestamp.to_be_bytes())
        .chain(self.ssrc.to_be_bytes())
        .chain(payload)
        .collect();
        u16::try_from(data.len()).map_err(|_| "payload too long")?;
        Ok(data)
    }
}
