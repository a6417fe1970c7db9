//! # Transport Handoff
//!
//! The engine does not own a socket. A [`PacketTransport`] takes completed
//! packets and sends them however the host likes.
//!
//! ## Ownership
//! `send` takes the [`PacketLease`] by value. From that point the transport owns
//! the buffer; it goes back to the pool when the transport drops the lease,
//! whether the send succeeded, failed, or was queued and sent later. The engine
//! never touches a buffer after handing it over.

use crate::error::{EngineError, Result};
use crate::utils::buffer_pool::PacketLease;
use std::sync::mpsc;
use tracing::trace;

/// Sink for completed packets
pub trait PacketTransport: Send + Sync {
    /// Take ownership of `packet` for sending. Dropping it releases the buffer.
    fn send(&self, packet: PacketLease) -> Result<()>;
}

impl<F> PacketTransport for F
where
    F: Fn(PacketLease) -> Result<()> + Send + Sync,
{
    fn send(&self, packet: PacketLease) -> Result<()> {
        self(packet)
    }
}

/// Queues leases on a channel for a sender thread; the receiver owns each lease
/// once it is dequeued.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<PacketLease>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::Receiver<PacketLease>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl PacketTransport for ChannelTransport {
    fn send(&self, packet: PacketLease) -> Result<()> {
        let buffer_id = packet.buffer_id();
        // On failure the lease inside the SendError is dropped and released.
        self.tx
            .send(packet)
            .map_err(|_| EngineError::TransportError("receiver disconnected".to_string()))?;
        trace!(buffer_id, "Packet queued");
        Ok(())
    }
}
