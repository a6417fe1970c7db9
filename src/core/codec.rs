//! # Packet Codec
//!
//! Serializes packets into pooled buffers according to their registered layout,
//! and parses them back.
//!
//! ## Wire Format
//! ```text
//! [TypeId(2)] [BodyLen(2)] [Field 0] [Field 1] ... [Field N]
//! ```
//! Scalars are little-endian at their declared width. Variable fields are
//! `[Len(2)] [Bytes(Len)]`.
//!
//! Encoding writes into a [`PacketLease`], so a payload that fails validation
//! halfway through still returns its buffer to the pool.

use crate::config::HEADER_SIZE;
use crate::core::registry::{FieldKind, PacketTypeDescriptor, PacketTypeRegistry};
use crate::core::wire::{read_scalar, write_scalar, FieldValue};
use crate::error::{constants, EngineError, Result};
use crate::utils::buffer_pool::{PacketLease, PacketMemoryPool};
use crate::utils::metrics::global_metrics;
use bytes::Buf;
use std::sync::Arc;
use tracing::{debug, trace};

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub type_id: u16,
    pub fields: Vec<FieldValue>,
}

impl Packet {
    pub fn new(type_id: u16, fields: Vec<FieldValue>) -> Self {
        Self { type_id, fields }
    }
}

/// Fixed packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub type_id: u16,
    pub body_len: u16,
}

/// Parse the header without touching the body
pub fn decode_header(data: &[u8]) -> Result<PacketHeader> {
    if data.len() < HEADER_SIZE {
        return Err(EngineError::Corrupt(format!(
            "{}: {} bytes",
            constants::ERR_SHORT_HEADER,
            data.len()
        )));
    }
    let mut cursor = data;
    Ok(PacketHeader {
        type_id: read_scalar(&mut cursor)?,
        body_len: read_scalar(&mut cursor)?,
    })
}

/// Encoder/decoder bound to a registry and a buffer pool. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    registry: Arc<PacketTypeRegistry>,
    pool: PacketMemoryPool,
}

impl PacketCodec {
    pub fn new(registry: Arc<PacketTypeRegistry>, pool: PacketMemoryPool) -> Self {
        Self { registry, pool }
    }

    pub fn registry(&self) -> &PacketTypeRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &PacketMemoryPool {
        &self.pool
    }

    /// Encode `fields` as packet `type_id` into a leased buffer.
    ///
    /// # Errors
    /// `NotFound` for an unregistered type; `FieldCount`, `FieldMismatch` or
    /// `OversizedField` when the payload does not fit the layout. The buffer is
    /// back in the pool before the error is returned.
    pub fn encode(&self, type_id: u16, fields: &[FieldValue]) -> Result<PacketLease> {
        match self.encode_inner(type_id, fields) {
            Ok(lease) => {
                global_metrics().packet_encoded();
                trace!(type_id, len = lease.len(), "Packet encoded");
                Ok(lease)
            }
            Err(e) => {
                global_metrics().encode_failure();
                debug!(type_id, error = %e, "Packet encode failed");
                Err(e)
            }
        }
    }

    fn encode_inner(&self, type_id: u16, fields: &[FieldValue]) -> Result<PacketLease> {
        let descriptor = self.registry.get(type_id)?;
        if fields.len() != descriptor.fields().len() {
            return Err(EngineError::FieldCount {
                type_id,
                expected: descriptor.fields().len(),
                found: fields.len(),
            });
        }

        let mut lease = self.pool.lease(descriptor.worst_case_size());
        let buf = lease.buffer_mut();
        write_scalar(buf, type_id);
        write_scalar(buf, 0u16);

        for (index, (spec, value)) in descriptor.fields().iter().zip(fields).enumerate() {
            write_field(buf, type_id, index, spec.kind, value)?;
        }

        let body_len = u16::try_from(buf.len() - HEADER_SIZE).map_err(|_| {
            EngineError::InvalidDescriptor(format!("{type_id:#06x} body exceeds u16 length"))
        })?;
        buf[2..HEADER_SIZE].copy_from_slice(&body_len.to_le_bytes());
        Ok(lease)
    }

    /// Decode a complete packet.
    ///
    /// # Errors
    /// `NotFound` for an unregistered type; `Corrupt` for a short header, a body
    /// length that disagrees with the buffer, a truncated scalar, a length prefix
    /// running past the end, or trailing bytes.
    pub fn decode(&self, data: &[u8]) -> Result<Packet> {
        match self.decode_inner(data) {
            Ok(packet) => {
                global_metrics().packet_decoded();
                Ok(packet)
            }
            Err(e) => {
                global_metrics().decode_failure();
                debug!(error = %e, len = data.len(), "Packet decode failed");
                Err(e)
            }
        }
    }

    fn decode_inner(&self, data: &[u8]) -> Result<Packet> {
        let header = decode_header(data)?;
        let descriptor = self.registry.get(header.type_id)?;

        let body = &data[HEADER_SIZE..];
        if body.len() != header.body_len as usize {
            return Err(EngineError::Corrupt(format!(
                "{}: header says {}, buffer has {}",
                constants::ERR_LENGTH_MISMATCH,
                header.body_len,
                body.len()
            )));
        }

        let fields = read_fields(descriptor, body)?;
        Ok(Packet {
            type_id: header.type_id,
            fields,
        })
    }

    /// Whether packets of `type_id` are subject to integrity checks
    pub fn is_checkable(&self, type_id: u16) -> bool {
        self.registry.is_checkable(type_id)
    }
}

fn write_field(
    buf: &mut Vec<u8>,
    type_id: u16,
    index: usize,
    kind: FieldKind,
    value: &FieldValue,
) -> Result<()> {
    match (kind, value) {
        (FieldKind::U8, FieldValue::U8(v)) => write_scalar(buf, *v),
        (FieldKind::U16, FieldValue::U16(v)) => write_scalar(buf, *v),
        (FieldKind::U32, FieldValue::U32(v)) => write_scalar(buf, *v),
        (FieldKind::U64, FieldValue::U64(v)) => write_scalar(buf, *v),
        (FieldKind::Bytes { max_len }, FieldValue::Bytes(bytes)) => {
            if bytes.len() > max_len as usize {
                return Err(EngineError::OversizedField {
                    type_id,
                    index,
                    len: bytes.len(),
                    max: max_len as usize,
                });
            }
            // Bounded by max_len, so the prefix cannot truncate.
            write_scalar(buf, bytes.len() as u16);
            buf.extend_from_slice(bytes);
        }
        (kind, value) => {
            return Err(EngineError::FieldMismatch {
                type_id,
                index,
                expected: kind.name(),
                found: value.kind_name(),
            })
        }
    }
    Ok(())
}

fn read_fields(descriptor: &PacketTypeDescriptor, body: &[u8]) -> Result<Vec<FieldValue>> {
    let mut cursor = body;
    let mut fields = Vec::with_capacity(descriptor.fields().len());

    for spec in descriptor.fields() {
        let value = match spec.kind {
            FieldKind::U8 => FieldValue::U8(read_scalar(&mut cursor)?),
            FieldKind::U16 => FieldValue::U16(read_scalar(&mut cursor)?),
            FieldKind::U32 => FieldValue::U32(read_scalar(&mut cursor)?),
            FieldKind::U64 => FieldValue::U64(read_scalar(&mut cursor)?),
            FieldKind::Bytes { max_len } => {
                let len = read_scalar::<u16>(&mut cursor)? as usize;
                if len > cursor.remaining() {
                    return Err(EngineError::Corrupt(format!(
                        "{}: field '{}' claims {} bytes, {} left",
                        constants::ERR_PREFIX_OVERRUN,
                        spec.name,
                        len,
                        cursor.remaining()
                    )));
                }
                if len > max_len as usize {
                    return Err(EngineError::Corrupt(format!(
                        "field '{}' length {} exceeds declared maximum {}",
                        spec.name, len, max_len
                    )));
                }
                let bytes = cursor[..len].to_vec();
                cursor.advance(len);
                FieldValue::Bytes(bytes)
            }
        };
        fields.push(value);
    }

    if cursor.has_remaining() {
        return Err(EngineError::Corrupt(format!(
            "{}: {} bytes",
            constants::ERR_TRAILING_BYTES,
            cursor.remaining()
        )));
    }
    Ok(fields)
}
