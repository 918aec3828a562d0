// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An asynchronous channel: datagrams in, [`Output`]s out.
//!
//! A single tokio task owns the [`Pipeline`]. Datagrams reach it through a
//! bounded single-consumer queue, so they're processed one at a time in the
//! order they were sent. A full queue makes [`DatagramSender::send`] wait.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use log::{debug, info, warn};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::h264::depacketize::DEFAULT_PAYLOAD_TYPE;
use crate::codec::Output;
use crate::event::{EventSink, Statistics, StatisticsRecorder};
use crate::pipeline::Pipeline;
use crate::{Error, ErrorKind};

/// Options for [`RtpChannel`] (and [`Pipeline`]).
///
/// ```
/// # use std::time::Duration;
/// let options = rtp_h264::channel::ChannelOptions::default()
///     .payload_type(97)
///     .statistics_interval(Duration::from_secs(1));
/// ```
#[derive(Clone)]
pub struct ChannelOptions {
    pub(crate) payload_type: u8,
    pub(crate) queue_capacity: usize,
    pub(crate) event_sink: Arc<dyn EventSink>,
    pub(crate) statistics_interval: Duration,
    pub(crate) sprop_parameter_sets: Option<String>,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions {
            payload_type: DEFAULT_PAYLOAD_TYPE,
            queue_capacity: 64,
            event_sink: crate::event::discard(),
            statistics_interval: Duration::from_secs(1) / 30,
            sprop_parameter_sets: None,
        }
    }
}

impl ChannelOptions {
    /// Sets the RTP payload type to accept. Packets with any other type fail
    /// with [`ErrorKind::UnknownH264Type`]. Default 96.
    pub fn payload_type(self, payload_type: u8) -> Self {
        Self {
            payload_type,
            ..self
        }
    }

    /// Sets the depth of the inbound datagram queue and the outbound item
    /// queue. Default 64.
    pub fn queue_capacity(self, queue_capacity: usize) -> Self {
        Self {
            queue_capacity,
            ..self
        }
    }

    /// Sets an observer for [`crate::event::Event`]s and periodic
    /// [`Statistics`].
    pub fn event_sink(self, event_sink: Arc<dyn EventSink>) -> Self {
        Self { event_sink, ..self }
    }

    /// Sets the minimum interval between statistics reports to the event sink.
    /// Default 1/30th of a second.
    pub fn statistics_interval(self, statistics_interval: Duration) -> Self {
        Self {
            statistics_interval,
            ..self
        }
    }

    /// Supplies out-of-band parameters: the value of an SDP
    /// `sprop-parameter-sets` format parameter, eg
    /// `Z01AHppkBYHv/lBgYGQAAA+gAAE4gBA=,aO48gA==`.
    pub fn sprop_parameter_sets(self, value: &str) -> Self {
        Self {
            sprop_parameter_sets: Some(value.to_owned()),
            ..self
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.payload_type >= 0x80 {
            bail!(ErrorKind::InvalidArgument(format!(
                "payload type {} exceeds 7 bits",
                self.payload_type
            )));
        }
        if self.queue_capacity == 0 {
            bail!(ErrorKind::InvalidArgument(
                "queue capacity must be non-zero".to_owned()
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChannelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelOptions")
            .field("payload_type", &self.payload_type)
            .field("queue_capacity", &self.queue_capacity)
            .field("statistics_interval", &self.statistics_interval)
            .field("sprop_parameter_sets", &self.sprop_parameter_sets)
            .finish()
    }
}

pub(crate) enum Input {
    Datagram(Bytes),
    TransportError(std::io::Error),
}

/// Hands datagrams to an [`RtpChannel`]. Cheap to clone.
#[derive(Clone)]
pub struct DatagramSender {
    tx: mpsc::Sender<Input>,
}

impl DatagramSender {
    /// Queues one UDP payload, waiting for room if the queue is full.
    ///
    /// Fails with [`ErrorKind::ChannelClosed`] once the channel has stopped.
    pub async fn send(&self, datagram: Bytes) -> Result<(), Error> {
        self.tx
            .send(Input::Datagram(datagram))
            .await
            .map_err(|_| wrap!(ErrorKind::ChannelClosed))
    }

    /// Reports a failure of the datagram source. The channel yields it as a
    /// final [`ErrorKind::Transport`] error and stops.
    pub async fn transport_error(&self, source: std::io::Error) -> Result<(), Error> {
        self.tx
            .send(Input::TransportError(source))
            .await
            .map_err(|_| wrap!(ErrorKind::ChannelClosed))
    }

    /// Returns true once the channel has stopped accepting datagrams.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Completes once the channel has stopped accepting datagrams.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Depacketizes H.264 RTP datagrams on a tokio task.
///
/// Yields [`Output`]s and per-datagram errors as a [`Stream`]. Errors other
/// than [`ErrorKind::Transport`] don't end the stream.
pub struct RtpChannel {
    outputs: mpsc::Receiver<Result<Output, Error>>,
    stop: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    socket_task: Option<JoinHandle<()>>,
    recorder: Arc<StatisticsRecorder>,
    local_addr: Option<SocketAddr>,
}

impl RtpChannel {
    /// Creates a channel fed through the returned [`DatagramSender`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(options: ChannelOptions) -> Result<(DatagramSender, RtpChannel), Error> {
        let pipeline = Pipeline::new(&options)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| wrap!(ErrorKind::InvalidArgument(format!("no tokio runtime: {e}"))))?;
        let (in_tx, in_rx) = mpsc::channel(options.queue_capacity);
        let (out_tx, out_rx) = mpsc::channel(options.queue_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();
        let recorder = pipeline.recorder();
        let worker = runtime.spawn(run(pipeline, in_rx, out_tx, stop_rx));
        info!("channel started: {:?}", &options);
        Ok((
            DatagramSender { tx: in_tx },
            RtpChannel {
                outputs: out_rx,
                stop: Some(stop_tx),
                worker: Some(worker),
                socket_task: None,
                recorder,
                local_addr: None,
            },
        ))
    }

    /// Creates a channel fed from a UDP socket bound to `addr`.
    pub async fn bind<A: ToSocketAddrs>(addr: A, options: ChannelOptions) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| wrap!(ErrorKind::Transport { source }))?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| wrap!(ErrorKind::Transport { source }))?;
        let (sender, mut channel) = Self::new(options)?;
        info!("receiving RTP on {}", local_addr);
        channel.local_addr = Some(local_addr);
        channel.socket_task = Some(tokio::spawn(crate::tokio::receive(socket, sender)));
        Ok(channel)
    }

    /// Returns the bound address, for channels created with [`RtpChannel::bind`].
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Returns a snapshot of the running counters.
    pub fn statistics(&self) -> Statistics {
        self.recorder.snapshot()
    }

    /// Stops processing.
    ///
    /// The datagram being processed, if any, is finished; queued ones are
    /// discarded. Items already produced can still be read from the stream,
    /// which then ends. Later sends fail with [`ErrorKind::ChannelClosed`].
    pub async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(t) = self.socket_task.take() {
            t.abort();
        }

        // Unblocks a worker waiting for room in the output queue.
        self.outputs.close();
        if let Some(w) = self.worker.take() {
            if let Err(e) = w.await {
                warn!("channel worker failed: {}", e);
            }
        }
        info!("channel stopped");
    }
}

impl Stream for RtpChannel {
    type Item = Result<Output, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.outputs.poll_recv(cx)
    }
}

impl Drop for RtpChannel {
    fn drop(&mut self) {
        // Dropping the stop sender and output receiver ends the worker.
        if let Some(t) = self.socket_task.take() {
            t.abort();
        }
    }
}

/// Owns the pipeline until stopped, the input closes, or the transport fails.
async fn run(
    mut pipeline: Pipeline,
    mut inputs: mpsc::Receiver<Input>,
    outputs: mpsc::Sender<Result<Output, Error>>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let input = tokio::select! {
            biased;
            _ = &mut stop => break,
            i = inputs.recv() => match i {
                Some(i) => i,
                None => {
                    debug!("all datagram senders dropped");
                    break;
                }
            },
        };
        match input {
            Input::Datagram(d) => {
                pipeline.push(d);
                while let Some(item) = pipeline.pull() {
                    if outputs.send(item).await.is_err() {
                        debug!("output receiver closed");
                        return;
                    }
                }
            }
            Input::TransportError(source) => {
                info!("transport failed: {}", source);
                let _ = outputs.send(Err(wrap!(ErrorKind::Transport { source }))).await;
                break;
            }
        }
    }
}
