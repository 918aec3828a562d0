// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Observability: processing events and running statistics.
//!
//! Components are handed an `Arc<dyn EventSink>` when constructed and post to
//! it as they work. Nothing depends on events being observed; `()` is a valid
//! sink.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Something that happened on the processing path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    /// A datagram was taken from the queue.
    PacketReceived,

    /// The RTP layer produced a complete NAL unit.
    NaluProduced,

    SpsReceived,
    PpsReceived,

    /// A new SPS/PPS pair replaced the previous one.
    ParameterSetCycled,

    /// FU-A fragments were discarded.
    BadFragmentationUnit,

    FormatDescriptionProduced,
    AccessUnitProduced,

    /// A slice was turned into an access unit.
    FrameProduced,

    /// A slice was dropped because no parameter set is known yet.
    FrameSkipped,

    /// A datagram or NAL unit failed with an error.
    ErrorInPipeline,

    /// The SSRC changed.
    StreamReset,
}

/// Running counters for one channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    pub packets_received: u64,
    pub nalus_produced: u64,
    pub frames_produced: u64,
    pub frames_skipped: u64,
    pub format_descriptions_produced: u64,
    pub access_units_produced: u64,
    pub errors_produced: u64,

    /// Fragmentation unit reassembly failures.
    pub bad_sequence_errors: u64,
    pub stream_resets: u64,
    pub last_frame_produced: Option<Instant>,
}

impl Statistics {
    fn record(&mut self, event: Event) {
        match event {
            Event::PacketReceived => self.packets_received += 1,
            Event::NaluProduced => self.nalus_produced += 1,
            Event::FrameProduced => {
                self.frames_produced += 1;
                self.last_frame_produced = Some(Instant::now());
            }
            Event::FrameSkipped => self.frames_skipped += 1,
            Event::FormatDescriptionProduced => self.format_descriptions_produced += 1,
            Event::AccessUnitProduced => self.access_units_produced += 1,
            Event::ErrorInPipeline => self.errors_produced += 1,
            Event::BadFragmentationUnit => self.bad_sequence_errors += 1,
            Event::StreamReset => self.stream_resets += 1,
            Event::SpsReceived | Event::PpsReceived | Event::ParameterSetCycled => {}
        }
    }
}

/// Receives events and periodic statistics.
///
/// Called synchronously from the processing path, so implementations should
/// be quick.
pub trait EventSink: Send + Sync {
    fn post(&self, event: Event);

    /// Called with a snapshot at most once per configured statistics interval.
    fn statistics(&self, _statistics: &Statistics) {}
}

impl EventSink for () {
    fn post(&self, _event: Event) {}
}

impl<F: Fn(Event) + Send + Sync> EventSink for F {
    fn post(&self, event: Event) {
        self(event)
    }
}

/// A sink that ignores everything.
pub(crate) fn discard() -> Arc<dyn EventSink> {
    Arc::new(())
}

/// Counts events into [`Statistics`] and forwards them.
pub(crate) struct StatisticsRecorder {
    inner: Arc<dyn EventSink>,
    interval: Duration,
    state: Mutex<RecorderState>,
}

struct RecorderState {
    statistics: Statistics,
    last_report: Option<Instant>,
}

impl StatisticsRecorder {
    pub(crate) fn new(inner: Arc<dyn EventSink>, interval: Duration) -> Self {
        StatisticsRecorder {
            inner,
            interval,
            state: Mutex::new(RecorderState {
                statistics: Statistics::default(),
                last_report: None,
            }),
        }
    }

    pub(crate) fn snapshot(&self) -> Statistics {
        self.lock().statistics.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecorderState> {
        // Counters stay usable even if a sink panicked mid-update.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EventSink for StatisticsRecorder {
    fn post(&self, event: Event) {
        let report = {
            let mut l = self.lock();
            l.statistics.record(event);
            let now = Instant::now();
            let due = l
                .last_report
                .map_or(true, |last| now.duration_since(last) >= self.interval);
            if due {
                l.last_report = Some(now);
                Some(l.statistics.clone())
            } else {
                None
            }
        };
        self.inner.post(event);
        if let Some(s) = report {
            self.inner.statistics(&s);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::testutil::RecordingSink;

    #[test]
    fn closure_sink() {
        let n = Arc::new(AtomicUsize::new(0));
        let n2 = n.clone();
        let sink: Arc<dyn EventSink> = Arc::new(move |e: Event| {
            if e == Event::FrameSkipped {
                n2.fetch_add(1, Ordering::Relaxed);
            }
        });
        sink.post(Event::FrameSkipped);
        sink.post(Event::PacketReceived);
        assert_eq!(n.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn counts_and_forwards() {
        let inner = RecordingSink::new();
        let r = StatisticsRecorder::new(inner.clone(), Duration::from_secs(3600));
        r.post(Event::PacketReceived);
        r.post(Event::PacketReceived);
        r.post(Event::FrameProduced);
        r.post(Event::BadFragmentationUnit);
        r.post(Event::SpsReceived);
        let s = r.snapshot();
        assert_eq!(s.packets_received, 2);
        assert_eq!(s.frames_produced, 1);
        assert_eq!(s.bad_sequence_errors, 1);
        assert!(s.last_frame_produced.is_some());
        assert_eq!(inner.events().len(), 5);
    }

    #[test]
    fn statistics_rate_limited() {
        struct Reports(AtomicUsize);
        impl EventSink for Reports {
            fn post(&self, _event: Event) {}
            fn statistics(&self, _statistics: &Statistics) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        let reports = Arc::new(Reports(AtomicUsize::new(0)));
        let r = StatisticsRecorder::new(reports.clone(), Duration::from_secs(3600));
        for _ in 0..10 {
            r.post(Event::PacketReceived);
        }
        assert_eq!(reports.0.load(Ordering::Relaxed), 1);

        let r = StatisticsRecorder::new(reports.clone(), Duration::ZERO);
        for _ in 0..10 {
            r.post(Event::PacketReceived);
        }
        assert_eq!(reports.0.load(Ordering::Relaxed), 11);
    }
}
