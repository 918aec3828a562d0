// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt::Display, sync::Arc};

use thiserror::Error;

/// A cheaply clonable `std::error::Error + Send + Sync + 'static` implementation.
///
/// Every failure on the datagram path is reported as one of these rather than
/// a panic. Most are scoped to a single datagram or NAL unit; the channel keeps
/// going after them. Use [`Error::kind`] to tell them apart.
#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorKind>);

impl Error {
    /// Returns the classification of this error, including any structured
    /// diagnostic payload.
    #[inline]
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Returns true iff this frame was dropped only because no parameter set
    /// has been seen yet. This is expected at stream startup.
    #[inline]
    pub fn is_skipped_frame(&self) -> bool {
        matches!(*self.0, ErrorKind::SkippedFrame(_))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(Arc::new(kind))
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The datagram isn't a well-formed RTP packet or H.264 payload.
    #[error("Malformed packet: {description}")]
    MalformedPacket { description: String },

    /// A NAL unit was expected but the buffer was empty.
    #[error("Empty NAL unit")]
    EmptyBuffer,

    /// A STAP-A aggregation packet doesn't split cleanly into NAL units.
    #[error("Malformed STAP-A: {description}")]
    MalformedAggregation { description: String },

    /// The packet is well-formed but uses a feature this crate doesn't handle.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// An RTP payload type or FU-A subtype outside the supported set.
    #[error("Unknown H.264 type: {0}")]
    UnknownH264Type(u8),

    /// FU-A fragments couldn't be put back together. The fragments are
    /// discarded; the next start fragment begins a fresh NAL unit.
    #[error("Fragmentation unit error: {description}, seq={sequence_numbers:04x?}")]
    Fragmentation {
        description: String,
        sequence_numbers: Vec<u16>,
    },

    /// A slice arrived before any SPS/PPS pair. Drop the frame and continue.
    #[error("Skipping frame: {0}")]
    SkippedFrame(String),

    /// A NAL unit type the H.264 processor doesn't consume.
    #[error("Unhandled NAL unit type {0}")]
    UnhandledNaluType(u8),

    /// An SPS/PPS pair which can't be turned into a decoder configuration.
    #[error("Invalid parameter set: {0}")]
    InvalidParameterSet(String),

    /// The caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The channel has stopped and accepts no more datagrams.
    #[error("Channel closed")]
    ChannelClosed,

    /// The underlying socket failed. This ends the channel.
    #[error("Transport error: {source}")]
    Transport {
        #[source]
        source: std::io::Error,
    },
}

impl ErrorKind {
    /// Returns true for failures of the datagram source rather than of a
    /// single datagram's contents.
    pub fn is_transport(&self) -> bool {
        matches!(self, ErrorKind::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let e = wrap!(ErrorKind::Fragmentation {
            description: "gap".to_owned(),
            sequence_numbers: vec![5, 6, 9],
        });
        assert_eq!(
            e.to_string(),
            "Fragmentation unit error: gap, seq=[0005, 0006, 0009]"
        );
        match e.kind() {
            ErrorKind::Fragmentation {
                sequence_numbers, ..
            } => assert_eq!(sequence_numbers, &[5, 6, 9]),
            o => panic!("unexpected kind {o:?}"),
        }
    }

    #[test]
    fn classification() {
        assert!(wrap!(ErrorKind::SkippedFrame("no parameters".into())).is_skipped_frame());
        assert!(!wrap!(ErrorKind::EmptyBuffer).is_skipped_frame());
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(ErrorKind::Transport { source: io }.is_transport());
    }
}
