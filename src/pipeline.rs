// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous datagram-to-output processing.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use log::debug;

use crate::channel::ChannelOptions;
use crate::codec::h264::depacketize::RtpProcessor;
use crate::codec::h264::processor::H264Processor;
use crate::codec::Output;
use crate::event::{Event, EventSink, Statistics, StatisticsRecorder};
use crate::Error;

/// Runs datagrams through [`RtpProcessor`] then [`H264Processor`].
///
/// Call [`Pipeline::push`] with each datagram in arrival order, then drain
/// [`Pipeline::pull`]. Each datagram is processed to completion before `push`
/// returns. Errors are queued alongside outputs and never stop the pipeline;
/// each NAL unit of an aggregate is processed independently.
pub struct Pipeline {
    rtp: RtpProcessor,
    h264: H264Processor,
    recorder: Arc<StatisticsRecorder>,
    pending: VecDeque<Result<Output, Error>>,
}

impl Pipeline {
    pub fn new(options: &ChannelOptions) -> Result<Self, Error> {
        options.validate()?;
        let recorder = Arc::new(StatisticsRecorder::new(
            options.event_sink.clone(),
            options.statistics_interval,
        ));
        let events: Arc<dyn EventSink> = recorder.clone();
        let h264 = match options.sprop_parameter_sets {
            Some(ref s) => H264Processor::with_sprop_parameter_sets(s, events.clone())?,
            None => H264Processor::new(events.clone()),
        };
        let mut pipeline = Pipeline {
            rtp: RtpProcessor::new(options.payload_type, events),
            h264,
            recorder,
            pending: VecDeque::new(),
        };
        if let Some(f) = pipeline.h264.format_description() {
            let f = f.clone();
            pipeline.emit(Output::FormatDescription(f));
        }
        Ok(pipeline)
    }

    /// Processes one datagram.
    pub fn push(&mut self, datagram: Bytes) {
        self.recorder.post(Event::PacketReceived);
        let nalus = match self.rtp.process(datagram) {
            Ok(n) => n,
            Err(e) => return self.fail(e),
        };
        for nalu in nalus {
            match self.h264.process(nalu) {
                Ok(Some(o)) => self.emit(o),
                Ok(None) => {}
                Err(e) => self.fail(e),
            }
        }
    }

    /// Returns the next queued output or error, if any.
    pub fn pull(&mut self) -> Option<Result<Output, Error>> {
        self.pending.pop_front()
    }

    /// Returns a snapshot of the running counters.
    pub fn statistics(&self) -> Statistics {
        self.recorder.snapshot()
    }

    pub(crate) fn recorder(&self) -> Arc<StatisticsRecorder> {
        self.recorder.clone()
    }

    fn emit(&mut self, o: Output) {
        self.recorder.post(match o {
            Output::FormatDescription(_) => Event::FormatDescriptionProduced,
            Output::AccessUnit(_) => Event::AccessUnitProduced,
        });
        self.pending.push_back(Ok(o));
    }

    fn fail(&mut self, e: Error) {
        debug!("{}", e);
        self.recorder.post(Event::ErrorInPipeline);
        self.pending.push_back(Err(e));
    }
}
