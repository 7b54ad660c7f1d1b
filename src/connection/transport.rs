// src/connection/transport.rs

//! The transport seam: one bidirectional framed byte-stream, split into the
//! reader and writer halves the two pumps own.

use crate::core::HubError;
use async_trait::async_trait;
use bytes::Bytes;

/// A single outbound wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One serialized command.
    Message(Bytes),
    /// A keepalive ping.
    Ping,
    /// The closing frame sent before the transport shuts down.
    Close,
}

/// The receiving half of a transport.
#[async_trait]
pub trait TransportReader: Send {
    /// Yields the next message frame. Control frames are absorbed; `None`
    /// means the peer closed the stream.
    async fn next(&mut self) -> Option<Result<Bytes, HubError>>;
}

/// The sending half of a transport.
#[async_trait]
pub trait TransportWriter: Send {
    async fn write(&mut self, frame: Frame) -> Result<(), HubError>;

    /// Writes a coalesced batch of message frames in a single flush.
    async fn write_batch(&mut self, batch: Vec<Bytes>) -> Result<(), HubError>;

    /// Closes the transport. Must unblock the paired reader.
    async fn close(&mut self);
}

/// One established bidirectional framed byte-stream.
pub trait Transport: Send + 'static {
    fn split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>);
}

/// The transport-upgrade collaborator consumed by [`Hub::accept`]: turns one
/// inbound request into an established transport, or fails without any
/// registration taking place.
///
/// [`Hub::accept`]: crate::core::Hub::accept
#[async_trait]
pub trait Upgrade: Send {
    async fn upgrade(self) -> Result<Box<dyn Transport>, HubError>;
}

/// An upgrade that hands over an already-established transport, for callers
/// whose protocol layer performed the actual upgrade earlier.
pub struct Ready<T>(pub T);

#[async_trait]
impl<T: Transport> Upgrade for Ready<T> {
    async fn upgrade(self) -> Result<Box<dyn Transport>, HubError> {
        Ok(Box::new(self.0))
    }
}
