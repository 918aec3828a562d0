// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]
use libfuzzer_sys::fuzz_target;

use rtp_h264::channel::ChannelOptions;
use rtp_h264::codec::Output;
use rtp_h264::pipeline::Pipeline;

// Splits the input into datagrams, each preceded by a one-byte header: the
// low bit selects a raw datagram (fuzzing the RTP header too) or one built
// with a sequence number and timestamp derived from the input; the rest is
// the length.
fuzz_target!(|data: &[u8]| {
    let mut data = data;
    let mut pipeline = Pipeline::new(
        &ChannelOptions::default().sprop_parameter_sets(
            "Z2QAHqwsaoLA9puCgIKgAAADACAAAAMD0IAA,aO4xshsA",
        ),
    )
    .unwrap();
    let mut sequence_number: u16 = 0;
    let mut timestamp: u32 = 0;
    loop {
        let (hdr, rest) = match data.split_first() {
            Some(r) => r,
            None => return,
        };
        let raw = (hdr & 0b001) != 0;
        let ts_change = (hdr & 0b010) != 0;
        let reorder = (hdr & 0b100) != 0;
        let len = usize::from(hdr >> 3) * 4;
        let len = len.min(rest.len());
        let (payload, rest) = rest.split_at(len);
        data = rest;
        if ts_change {
            timestamp = timestamp.wrapping_add(3000);
        }
        let datagram = if raw {
            bytes::Bytes::copy_from_slice(payload)
        } else {
            let seq = if reorder {
                sequence_number.wrapping_sub(2)
            } else {
                sequence_number
            };
            rtp_h264::rtp::RtpPacketBuilder {
                sequence_number: seq,
                timestamp,
                payload_type: 96,
                ssrc: 0,
                mark: true,
            }
            .build(payload.iter().copied())
            .unwrap()
        };
        sequence_number = sequence_number.wrapping_add(1);
        pipeline.push(datagram);
        while let Some(item) = pipeline.pull() {
            if let Ok(Output::AccessUnit(au)) = item {
                let prefix = u32::from_be_bytes([au.data()[0], au.data()[1], au.data()[2], au.data()[3]]);
                assert_eq!(prefix as usize + 4, au.data().len());
            }
        }
    }
});
