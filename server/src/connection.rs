//! Per-connection frame reader.
//!
//! Reads one frame at a time from an accepted producer socket and publishes
//! the decoded points. The pause gate is only consulted between frames: once
//! a header has been read the whole frame is consumed, and its outcome is
//! held until the gate opens again. Every socket operation is raced against
//! the session's stop signal.

use crate::events::{DisconnectReason, IngestEvent};
use crate::service::SessionContext;
use log::{debug, warn};
use shared::{decode_header, decode_payload, Point, ProtocolError, HEADER_LEN};
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncReadExt;

/// Most a payload buffer holds before any of its bytes have arrived. Larger
/// payloads grow the buffer as data is read.
const INITIAL_PAYLOAD_CAPACITY: usize = 64 * 1024;
use tokio::net::TcpStream;

/// How a connection ended.
#[derive(Debug)]
pub enum ConnectionEnd {
    /// The peer closed the socket, at a frame boundary or mid-frame.
    PeerClosed,
    /// A socket error ended the connection.
    Failed(io::Error),
    /// The session was stopped. Not an error.
    Cancelled,
}

impl ConnectionEnd {
    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ConnectionEnd::PeerClosed,
            _ => ConnectionEnd::Failed(err),
        }
    }

    pub fn into_reason(self) -> DisconnectReason {
        match self {
            ConnectionEnd::PeerClosed => DisconnectReason::PeerClosed,
            ConnectionEnd::Failed(err) => DisconnectReason::Error(err.to_string()),
            ConnectionEnd::Cancelled => DisconnectReason::Stopped,
        }
    }
}

enum FrameOutcome {
    Points(Vec<Point>),
    Malformed(ProtocolError),
}

pub(crate) struct ConnectionReader<'a> {
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &'a mut SessionContext,
    next_sequence: u64,
}

impl<'a> ConnectionReader<'a> {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr, ctx: &'a mut SessionContext) -> Self {
        Self {
            stream,
            peer,
            ctx,
            next_sequence: 0,
        }
    }

    /// Reads frames until the peer goes away or the session stops. The socket
    /// is closed when this returns.
    pub(crate) async fn run(mut self) -> ConnectionEnd {
        loop {
            let outcome = match self.next_frame().await {
                Ok(outcome) => outcome,
                Err(end) => return end,
            };

            // A frame that completed just as pause was requested is held back
            // until resume, whether it decoded or not
            if let Err(end) = self.wait_for_gate().await {
                return end;
            }

            match outcome {
                FrameOutcome::Points(points) => {
                    let sequence = self.next_sequence;
                    self.next_sequence += 1;
                    debug!(
                        "Frame {} from {}: {} points",
                        sequence,
                        self.peer,
                        points.len()
                    );
                    self.ctx.publish(IngestEvent::FrameReceived {
                        sequence,
                        points: points.into(),
                    });
                }
                FrameOutcome::Malformed(err) => {
                    warn!("Dropping malformed frame from {}: {}", self.peer, err);
                    self.ctx.publish(IngestEvent::ProtocolWarning {
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    async fn next_frame(&mut self) -> Result<FrameOutcome, ConnectionEnd> {
        self.wait_for_frame_start().await?;

        let mut header = [0u8; HEADER_LEN];
        self.read_exact(&mut header).await?;
        let length = decode_header(header);

        if length > self.ctx.max_frame_bytes {
            self.discard(length).await?;
            return Ok(FrameOutcome::Malformed(ProtocolError::Oversized {
                length,
                limit: self.ctx.max_frame_bytes,
            }));
        }

        let payload = self.read_payload(length).await?;

        Ok(match decode_payload(&payload, length) {
            Ok(points) => FrameOutcome::Points(points),
            Err(err) => FrameOutcome::Malformed(err),
        })
    }

    /// Waits at a frame boundary until the gate is open and data is available.
    ///
    /// Closing the gate while waiting for data sends the reader back to the
    /// gate, so bytes sent during a pause stay in the OS buffer.
    async fn wait_for_frame_start(&mut self) -> Result<(), ConnectionEnd> {
        loop {
            self.wait_for_gate().await?;

            tokio::select! {
                biased;
                _ = self.ctx.stop.requested() => return Err(ConnectionEnd::Cancelled),
                _ = self.ctx.gate.closed() => continue,
                ready = self.stream.readable() => {
                    return ready.map_err(ConnectionEnd::from_io);
                }
            }
        }
    }

    async fn wait_for_gate(&mut self) -> Result<(), ConnectionEnd> {
        tokio::select! {
            biased;
            _ = self.ctx.stop.requested() => Err(ConnectionEnd::Cancelled),
            _ = self.ctx.gate.opened() => Ok(()),
        }
    }

    /// Fills `buf` completely, across as many reads as needed. A read that
    /// returns no data before `buf` is full means the peer closed.
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ConnectionEnd> {
        tokio::select! {
            biased;
            _ = self.ctx.stop.requested() => Err(ConnectionEnd::Cancelled),
            read = self.stream.read_exact(buf) => read.map(|_| ()).map_err(ConnectionEnd::from_io),
        }
    }

    /// Reads exactly `length` payload bytes into a buffer that grows with the
    /// data actually received.
    async fn read_payload(&mut self, length: u32) -> Result<Vec<u8>, ConnectionEnd> {
        let mut payload = payload_buffer(length);
        let mut limited = (&mut self.stream).take(u64::from(length));
        let read = tokio::select! {
            biased;
            _ = self.ctx.stop.requested() => return Err(ConnectionEnd::Cancelled),
            read = limited.read_to_end(&mut payload) => read.map_err(ConnectionEnd::from_io)?,
        };

        if read < length as usize {
            return Err(ConnectionEnd::PeerClosed);
        }
        Ok(payload)
    }

    /// Skips `length` payload bytes without buffering them.
    async fn discard(&mut self, length: u32) -> Result<(), ConnectionEnd> {
        let mut payload = (&mut self.stream).take(u64::from(length));
        let mut sink = tokio::io::sink();
        let copied = tokio::select! {
            biased;
            _ = self.ctx.stop.requested() => return Err(ConnectionEnd::Cancelled),
            copied = tokio::io::copy(&mut payload, &mut sink) => {
                copied.map_err(ConnectionEnd::from_io)?
            }
        };

        if copied < u64::from(length) {
            return Err(ConnectionEnd::PeerClosed);
        }
        Ok(())
    }
}

fn payload_buffer(length: u32) -> Vec<u8> {
    Vec::with_capacity((length as usize).min(INITIAL_PAYLOAD_CAPACITY))
}
