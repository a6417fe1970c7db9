//! Framing over an in-memory stream and channel handoff

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use packet_engine::core::codec::PacketCodec;
use packet_engine::core::frame::FrameCodec;
use packet_engine::core::registry::{packet_types, PacketTypeRegistry};
use packet_engine::core::wire::FieldValue;
use packet_engine::engine::PacketEngine;
use packet_engine::error::{EngineError, Result};
use packet_engine::identity::IdentityProvider;
use packet_engine::transport::ChannelTransport;
use packet_engine::utils::buffer_pool::{PacketLease, PacketMemoryPool};
use std::sync::Arc;
use tokio_util::codec::{Decoder, Framed};

fn codec(pool: PacketMemoryPool) -> PacketCodec {
    PacketCodec::new(Arc::new(PacketTypeRegistry::standard().unwrap()), pool)
}

#[tokio::test]
async fn framed_duplex_roundtrip() {
    let tx_pool = PacketMemoryPool::default();
    let rx_pool = PacketMemoryPool::default();
    let sender_codec = codec(tx_pool.clone());
    let receiver_codec = codec(rx_pool.clone());

    let (client, server) = tokio::io::duplex(4096);
    let mut client = Framed::new(client, FrameCodec::new(tx_pool.clone()));
    let mut server = Framed::new(server, FrameCodec::new(rx_pool.clone()));

    for tick in 0..100u64 {
        let lease = sender_codec
            .encode(packet_types::KEEP_ALIVE, &[FieldValue::U64(tick)])
            .unwrap();
        client.send(lease).await.unwrap();
    }
    let join = sender_codec
        .encode(
            packet_types::SESSION_JOIN,
            &[FieldValue::U64(9), FieldValue::from("alice")],
        )
        .unwrap();
    client.send(join).await.unwrap();
    assert_eq!(tx_pool.leased(), 0);

    for tick in 0..100u64 {
        let frame = server.next().await.unwrap().unwrap();
        let packet = receiver_codec.decode(&frame).unwrap();
        assert_eq!(packet.type_id, packet_types::KEEP_ALIVE);
        assert_eq!(packet.fields, vec![FieldValue::U64(tick)]);
    }
    let frame = server.next().await.unwrap().unwrap();
    let packet = receiver_codec.decode(&frame).unwrap();
    assert_eq!(packet.fields[1].as_bytes(), Some(&b"alice"[..]));
    drop(frame);

    assert_eq!(rx_pool.leased(), 0);
}

#[test]
fn frame_decoder_splits_back_to_back_packets() {
    let pool = PacketMemoryPool::default();
    let packets = codec(pool.clone());
    let mut buf = BytesMut::new();
    for id in 0..3u64 {
        let lease = packets
            .encode(packet_types::SESSION_LEAVE, &[FieldValue::U64(id)])
            .unwrap();
        buf.extend_from_slice(&lease);
    }

    let mut framer = FrameCodec::new(pool.clone());
    for id in 0..3u64 {
        let frame = framer.decode(&mut buf).unwrap().unwrap();
        let packet = packets.decode(&frame).unwrap();
        assert_eq!(packet.fields, vec![FieldValue::U64(id)]);
    }
    assert!(framer.decode(&mut buf).unwrap().is_none());
    assert!(buf.is_empty());
    assert_eq!(pool.leased(), 0);
}

struct Host;

impl IdentityProvider for Host {
    fn machine_id(&self) -> Result<String> {
        Ok("host-1".to_string())
    }

    fn os_build(&self) -> Result<u32> {
        Ok(6_018_044)
    }
}

#[test]
fn engine_reports_integrity_over_channel() {
    let engine = PacketEngine::new(
        Default::default(),
        PacketTypeRegistry::standard().unwrap(),
        Host,
    )
    .unwrap();
    let (transport, rx) = ChannelTransport::new();

    engine.report_integrity("x64dbg", &transport).unwrap();
    let lease = rx.recv().unwrap();
    let packet = engine.decode(&lease).unwrap();

    assert!(engine.codec().is_checkable(packet.type_id));
    assert_eq!(
        packet.fields,
        vec![
            FieldValue::U32(6_018_044),
            FieldValue::from("host-1"),
            FieldValue::from("x64dbg"),
        ]
    );
}

#[test]
fn failing_transport_still_returns_buffer() {
    let engine = PacketEngine::new(
        Default::default(),
        PacketTypeRegistry::standard().unwrap(),
        Host,
    )
    .unwrap();
    let refuse = |_: PacketLease| -> Result<()> {
        Err(EngineError::TransportError("link down".to_string()))
    };

    let err = engine
        .send(packet_types::KEEP_ALIVE, &[FieldValue::U64(1)], &refuse)
        .unwrap_err();
    assert!(matches!(err, EngineError::TransportError(_)));
    assert_eq!(engine.pool().leased(), 0);
}
