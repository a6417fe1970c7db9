//! Stream framing for the transport collaborator.
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::Framed`. Outbound, it copies a
//! completed [`PacketLease`] into the write buffer and drops the lease, which
//! returns it to its pool. Inbound, it cuts whole packets off the read buffer
//! into fresh leases; parsing them is left to [`PacketCodec`](super::codec::PacketCodec).

use crate::config::HEADER_SIZE;
use crate::core::codec::decode_header;
use crate::error::EngineError;
use crate::utils::buffer_pool::{PacketLease, PacketMemoryPool};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Length-aware framing over the packet header
#[derive(Debug, Clone)]
pub struct FrameCodec {
    pool: PacketMemoryPool,
}

impl FrameCodec {
    /// Inbound frames are leased from `pool`
    pub fn new(pool: PacketMemoryPool) -> Self {
        Self { pool }
    }
}

impl Decoder for FrameCodec {
    type Item = PacketLease;
    type Error = EngineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PacketLease>, EngineError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = decode_header(&src[..])?;
        let frame_len = HEADER_SIZE + header.body_len as usize;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let mut lease = self.pool.lease(frame_len);
        lease.buffer_mut().extend_from_slice(&src[..frame_len]);
        src.advance(frame_len);
        trace!(type_id = header.type_id, frame_len, "Frame decoded");
        Ok(Some(lease))
    }
}

impl Encoder<PacketLease> for FrameCodec {
    type Error = EngineError;

    fn encode(&mut self, item: PacketLease, dst: &mut BytesMut) -> Result<(), EngineError> {
        dst.reserve(item.len());
        dst.put_slice(&item);
        trace!(buffer_id = item.buffer_id(), len = item.len(), "Frame encoded");
        // `item` drops here and goes back to its pool.
        Ok(())
    }
}
