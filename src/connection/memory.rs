// src/connection/memory.rs

//! An in-memory loopback transport.
//!
//! Two paired ends exchange frames over bounded channels; closing either end
//! unblocks both readers. Used by the test suite and by embedders that want
//! a hub connection without a socket.

use super::transport::{Frame, Transport, TransportReader, TransportWriter};
use crate::core::HubError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Creates a connected pair of transports with the given per-direction frame
/// capacity. A writer blocks once its direction holds `capacity` undelivered
/// frames.
pub fn pair(capacity: usize) -> (MemoryTransport, MemoryTransport) {
    let capacity = capacity.max(1);
    let (near_tx, near_rx) = mpsc::channel(capacity);
    let (far_tx, far_rx) = mpsc::channel(capacity);
    let closed = CancellationToken::new();

    let near = MemoryTransport {
        incoming: far_rx,
        outgoing: near_tx,
        closed: closed.clone(),
    };
    let far = MemoryTransport {
        incoming: near_rx,
        outgoing: far_tx,
        closed,
    };
    (near, far)
}

/// One end of an in-memory transport pair.
pub struct MemoryTransport {
    incoming: mpsc::Receiver<Frame>,
    outgoing: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

impl MemoryTransport {
    /// Sends a raw frame to the peer.
    pub async fn send(&mut self, frame: Frame) -> Result<(), HubError> {
        if self.closed.is_cancelled() {
            return Err(HubError::Transport("transport closed".to_string()));
        }
        self.outgoing
            .send(frame)
            .await
            .map_err(|_| HubError::Transport("peer end dropped".to_string()))
    }

    /// Receives the next raw frame, including pings and the close frame.
    /// Returns `None` once the pair is closed and no frames remain.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            maybe = self.incoming.recv() => maybe,
            _ = self.closed.cancelled() => None,
        }
    }

    /// Closes the pair; both ends' readers unblock.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

impl Transport for MemoryTransport {
    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let reader = MemoryReader {
            incoming: self.incoming,
            closed: self.closed.clone(),
        };
        let writer = MemoryWriter {
            outgoing: self.outgoing,
            closed: self.closed,
        };
        (Box::new(reader), Box::new(writer))
    }
}

struct MemoryReader {
    incoming: mpsc::Receiver<Frame>,
    closed: CancellationToken,
}

#[async_trait]
impl TransportReader for MemoryReader {
    async fn next(&mut self) -> Option<Result<Bytes, HubError>> {
        loop {
            let frame = tokio::select! {
                biased;
                maybe = self.incoming.recv() => match maybe {
                    Some(frame) => frame,
                    None => return None,
                },
                _ = self.closed.cancelled() => return None,
            };
            match frame {
                Frame::Message(message) => return Some(Ok(message)),
                Frame::Ping => continue,
                Frame::Close => return None,
            }
        }
    }
}

struct MemoryWriter {
    outgoing: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

#[async_trait]
impl TransportWriter for MemoryWriter {
    async fn write(&mut self, frame: Frame) -> Result<(), HubError> {
        if self.closed.is_cancelled() {
            return Err(HubError::Transport("transport closed".to_string()));
        }
        self.outgoing
            .send(frame)
            .await
            .map_err(|_| HubError::Transport("peer end dropped".to_string()))
    }

    async fn write_batch(&mut self, batch: Vec<Bytes>) -> Result<(), HubError> {
        for message in batch {
            self.write(Frame::Message(message)).await?;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.cancel();
    }
}
