// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extension of wrapping 32-bit RTP timestamps.

use std::num::NonZeroU32;

use crate::Timestamp;

/// Creates [Timestamp]s (which don't wrap and can be converted to a
/// presentation time) from 32-bit (wrapping) RTP timestamps.
///
/// UDP delivers packets out of order, so this doesn't enforce monotonicity:
/// each RTP timestamp is placed at the signed 32-bit delta from the most
/// recently placed one, which may be backwards.
#[derive(Debug)]
pub struct Timeline {
    timestamp: i64,
    clock_rate: NonZeroU32,
    start: Option<u32>,
}

impl Timeline {
    /// Creates a new timeline. With `start == None`, the first placed RTP
    /// timestamp becomes the stream start.
    pub fn new(start: Option<u32>, clock_rate: NonZeroU32) -> Self {
        Timeline {
            timestamp: i64::from(start.unwrap_or(0)),
            clock_rate,
            start,
        }
    }

    /// Forgets the stream start, as on an SSRC change.
    pub fn reset(&mut self) {
        self.start = None;
        self.timestamp = 0;
    }

    /// Places the given (wrapping) RTP timestamp on the timeline.
    pub fn place(&mut self, rtp_timestamp: u32) -> Result<Timestamp, String> {
        let start = match self.start {
            None => {
                self.start = Some(rtp_timestamp);
                self.timestamp = i64::from(rtp_timestamp);
                rtp_timestamp
            }
            Some(start) => start,
        };
        let delta = (rtp_timestamp as i32).wrapping_sub(self.timestamp as i32);
        let timestamp = self
            .timestamp
            .checked_add(i64::from(delta))
            .ok_or_else(|| {
                format!(
                    "timestamp {} + delta {} won't fit in i64!",
                    self.timestamp, delta
                )
            })?;
        if timestamp.checked_sub(i64::from(start)).is_none() {
            return Err(format!(
                "timestamp {} + delta {} - start {} underflows i64!",
                self.timestamp, delta, start
            ));
        }
        self.timestamp = timestamp;
        Ok(Timestamp {
            timestamp,
            clock_rate: self.clock_rate,
            start,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::Timeline;

    fn rate() -> NonZeroU32 {
        NonZeroU32::new(crate::H264_CLOCK_RATE).unwrap()
    }

    #[test]
    fn timeline() {
        // Normal usage.
        let mut t = Timeline::new(Some(42), rate());
        assert_eq!(t.place(83).unwrap().elapsed(), 83 - 42);
        assert_eq!(t.place(453).unwrap().elapsed(), 453 - 42);

        // Reordered packets step backwards.
        assert_eq!(t.place(83).unwrap().elapsed(), 83 - 42);

        // Wraparound is normal too.
        let mut t = Timeline::new(Some(u32::MAX), rate());
        assert_eq!(t.place(5).unwrap().elapsed(), 5 + 1);

        // No initial rtptime.
        let mut t = Timeline::new(None, rate());
        assert_eq!(t.place(218250000).unwrap().elapsed(), 0);
        assert_eq!(t.place(218250000 + 3000).unwrap().elapsed(), 3000);
    }

    #[test]
    fn reset() {
        let mut t = Timeline::new(None, rate());
        t.place(1000).unwrap();
        t.place(4000).unwrap();
        t.reset();
        let ts = t.place(77).unwrap();
        assert_eq!(ts.start(), 77);
        assert_eq!(ts.elapsed(), 0);
    }
}
