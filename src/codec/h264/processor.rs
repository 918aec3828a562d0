// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns complete NAL units into decoder inputs.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use log::debug;

use super::parameters::ParameterSet;
use super::{Nalu, NaluType};
use crate::codec::{AccessUnit, FormatDescription, Output};
use crate::event::{Event, EventSink};
use crate::{Error, ErrorKind};

/// Tracks SPS/PPS state and wraps slices as [`AccessUnit`]s.
///
/// SPS and PPS NAL units accumulate into a pending [`ParameterSet`]. Once it
/// holds both, it's compared to the last announced pair. A difference yields
/// [`Output::FormatDescription`] and the pending set starts over; a repeat
/// yields nothing and stays pending, so a later lone SPS or PPS completes a
/// new pair with it.
pub struct H264Processor {
    current: ParameterSet,
    last: ParameterSet,
    format_description: Option<Arc<FormatDescription>>,
    events: Arc<dyn EventSink>,
}

impl H264Processor {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        H264Processor {
            current: ParameterSet::default(),
            last: ParameterSet::default(),
            format_description: None,
            events,
        }
    }

    /// Creates a processor already holding the parameters from an SDP
    /// `sprop-parameter-sets` value, so slices decode before any in-band
    /// SPS/PPS.
    pub fn with_sprop_parameter_sets(
        sprop_parameter_sets: &str,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, Error> {
        let last = ParameterSet::from_sprop_parameter_sets(sprop_parameter_sets)?;
        let format_description = Arc::new(last.format_description()?);
        Ok(H264Processor {
            current: ParameterSet::default(),
            last,
            format_description: Some(format_description),
            events,
        })
    }

    /// Returns the format description of the last announced parameter set.
    #[inline]
    pub fn format_description(&self) -> Option<&Arc<FormatDescription>> {
        self.format_description.as_ref()
    }

    /// Processes one NAL unit.
    ///
    /// Returns `Ok(None)` for a parameter set that's incomplete or unchanged.
    pub fn process(&mut self, nalu: Nalu) -> Result<Option<Output>, Error> {
        match nalu.nalu_type() {
            Some(NaluType::SliceIdr | NaluType::SliceNonIdr) => {
                Ok(Some(Output::AccessUnit(self.process_video_frame(nalu)?)))
            }
            Some(t @ (NaluType::Sps | NaluType::Pps)) => self.process_parameter_set(t, &nalu),
            None => bail!(ErrorKind::UnhandledNaluType(nalu.raw_type())),
        }
    }

    fn process_parameter_set(
        &mut self,
        t: NaluType,
        nalu: &Nalu,
    ) -> Result<Option<Output>, Error> {
        self.events.post(match t {
            NaluType::Sps => Event::SpsReceived,
            _ => Event::PpsReceived,
        });
        self.current.store(nalu);
        if !self.current.is_complete() {
            return Ok(None);
        }
        if self.current == self.last {
            debug!("parameter set at {} is unchanged", nalu.timestamp());
            return Ok(None);
        }
        let format_description = Arc::new(self.current.format_description()?);
        debug!(
            "new parameter set at {}: {:?}",
            nalu.timestamp(),
            &format_description
        );
        self.last = std::mem::take(&mut self.current);
        self.format_description = Some(format_description.clone());
        self.events.post(Event::ParameterSetCycled);
        Ok(Some(Output::FormatDescription(format_description)))
    }

    /// Wraps a slice as a 4-byte length-prefixed access unit, using the last
    /// announced format description.
    ///
    /// Fails with [`ErrorKind::SkippedFrame`] if there is none yet. That's
    /// expected at startup; drop the frame and carry on.
    pub fn process_video_frame(&mut self, nalu: Nalu) -> Result<AccessUnit, Error> {
        let format_description = match self.format_description {
            Some(ref f) => f.clone(),
            None => {
                self.events.post(Event::FrameSkipped);
                bail!(ErrorKind::SkippedFrame(format!(
                    "no parameter set before NAL type {} at {}",
                    nalu.raw_type(),
                    nalu.timestamp()
                )));
            }
        };
        let len = u32::try_from(nalu.len()).map_err(|_| {
            wrap!(ErrorKind::MalformedPacket {
                description: format!("{}-byte NAL unit is too large", nalu.len()),
            })
        })?;
        let mut data = BytesMut::with_capacity(4 + nalu.len());
        data.put_u32(len);
        data.extend_from_slice(&nalu.data()[..]);
        self.events.post(Event::FrameProduced);
        Ok(AccessUnit::new(
            nalu.timestamp(),
            nalu.nalu_type() == Some(NaluType::SliceIdr),
            nalu.nal_ref_idc() == 0,
            format_description,
            data.freeze(),
        ))
    }
}
