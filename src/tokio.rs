// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! tokio-based UDP datagram source for [`crate::channel::RtpChannel`].

use bytes::Bytes;
use log::{debug, trace};
use tokio::net::UdpSocket;

use crate::channel::DatagramSender;

/// Large enough for any UDP payload.
const MAX_DATAGRAM_LEN: usize = 65_536;

/// Forwards every datagram received on `socket` until the channel closes or
/// the socket fails.
pub(crate) async fn receive(socket: UdpSocket, sender: DatagramSender) {
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        tokio::select! {
            _ = sender.closed() => {
                debug!("channel closed; no longer receiving");
                return;
            }
            r = socket.recv_from(&mut buf) => match r {
                Ok((len, src)) => {
                    trace!("{}-byte datagram from {}", len, src);
                    if sender.send(Bytes::copy_from_slice(&buf[..len])).await.is_err() {
                        debug!("channel closed; no longer receiving");
                        return;
                    }
                }
                Err(e) => {
                    let _ = sender.transport_error(e).await;
                    return;
                }
            },
        }
    }
}
