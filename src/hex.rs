// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded hex dumps of packet and NAL payloads for `Debug` output.

use pretty_hex::PrettyHex;

/// Bytes shown before a dump is truncated.
pub(crate) const DEFAULT_MAX_BYTES: usize = 64;

pub(crate) struct LimitedHex<'a> {
    inner: &'a [u8],
    max_bytes: usize,
}

impl<'a> LimitedHex<'a> {
    pub(crate) fn new(inner: &'a [u8]) -> Self {
        Self {
            inner,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl std::fmt::Debug for LimitedHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (shown, omitted) = match self.inner.len().checked_sub(self.max_bytes) {
            Some(o) if o > 0 => (&self.inner[..self.max_bytes], Some(o)),
            _ => (self.inner, None),
        };
        writeln!(f, "Length: {0} (0x{0:x}) bytes", self.inner.len())?;
        write!(
            f,
            "{:#?}",
            shown.hex_conf(pretty_hex::HexConfig {
                title: false,
                ..Default::default()
            })
        )?;
        if let Some(o) = omitted {
            write!(f, "\n...{0} (0x{0:x}) bytes not shown...", o)?;
        }
        Ok(())
    }
}
