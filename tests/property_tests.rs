//! Property-based tests using proptest
//!
//! Every layout in the standard table must round-trip arbitrary in-range
//! payloads, and the decoder must reject arbitrary bytes without panicking.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use packet_engine::core::codec::PacketCodec;
use packet_engine::core::registry::{FieldKind, PacketTypeRegistry, STANDARD_DECLARATIONS};
use packet_engine::core::wire::FieldValue;
use packet_engine::utils::buffer_pool::PacketMemoryPool;
use proptest::prelude::*;
use std::sync::Arc;

fn standard_codec() -> PacketCodec {
    PacketCodec::new(
        Arc::new(PacketTypeRegistry::standard().unwrap()),
        PacketMemoryPool::default(),
    )
}

fn field_value(kind: FieldKind) -> BoxedStrategy<FieldValue> {
    match kind {
        FieldKind::U8 => any::<u8>().prop_map(FieldValue::U8).boxed(),
        FieldKind::U16 => any::<u16>().prop_map(FieldValue::U16).boxed(),
        FieldKind::U32 => any::<u32>().prop_map(FieldValue::U32).boxed(),
        FieldKind::U64 => any::<u64>().prop_map(FieldValue::U64).boxed(),
        FieldKind::Bytes { max_len } => {
            prop::collection::vec(any::<u8>(), 0..=max_len as usize)
                .prop_map(FieldValue::Bytes)
                .boxed()
        }
    }
}

/// A standard packet type together with a payload that fits its layout
fn standard_packet() -> impl Strategy<Value = (u16, Vec<FieldValue>)> {
    (0..STANDARD_DECLARATIONS.len()).prop_flat_map(|i| {
        let decl = &STANDARD_DECLARATIONS[i];
        let fields: Vec<BoxedStrategy<FieldValue>> =
            decl.fields.iter().map(|spec| field_value(spec.kind)).collect();
        (Just(decl.type_id), fields)
    })
}

// Property: every standard layout round-trips
proptest! {
    #[test]
    fn prop_standard_packets_roundtrip((type_id, fields) in standard_packet()) {
        let codec = standard_codec();
        let lease = codec.encode(type_id, &fields).expect("in-range payload should encode");
        let packet = codec.decode(&lease).expect("encoded packet should decode");

        prop_assert_eq!(packet.type_id, type_id);
        prop_assert_eq!(packet.fields, fields);
    }
}

// Property: encoding is deterministic
proptest! {
    #[test]
    fn prop_encoding_deterministic((type_id, fields) in standard_packet()) {
        let codec = standard_codec();
        let a = codec.encode(type_id, &fields).unwrap().to_vec();
        let b = codec.encode(type_id, &fields).unwrap().to_vec();
        prop_assert_eq!(a, b);
    }
}

// Property: header body length always matches the encoded body
proptest! {
    #[test]
    fn prop_header_length_matches((type_id, fields) in standard_packet()) {
        let codec = standard_codec();
        let lease = codec.encode(type_id, &fields).unwrap();
        let body_len = u16::from_le_bytes([lease[2], lease[3]]) as usize;
        prop_assert_eq!(body_len + 4, lease.len());
    }
}

// Property: arbitrary input never panics the decoder
proptest! {
    #[test]
    fn prop_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let codec = standard_codec();
        let _ = codec.decode(&data);
    }
}

// Property: any truncation of a valid packet is rejected
proptest! {
    #[test]
    fn prop_truncation_rejected((type_id, fields) in standard_packet(), cut in 1usize..64) {
        let codec = standard_codec();
        let bytes = codec.encode(type_id, &fields).unwrap().to_vec();
        let keep = bytes.len().saturating_sub(cut);
        prop_assert!(codec.decode(&bytes[..keep]).is_err());
    }
}

// Property: pool bookkeeping balances after any sequence of leases
proptest! {
    #[test]
    fn prop_pool_balances(sizes in prop::collection::vec(0usize..10_000, 1..64)) {
        let pool = PacketMemoryPool::default();
        let leases: Vec<_> = sizes.iter().map(|&s| pool.lease(s)).collect();
        prop_assert_eq!(pool.leased(), sizes.len());
        for (lease, &size) in leases.iter().zip(&sizes) {
            prop_assert!(lease.capacity() >= size);
        }
        drop(leases);
        prop_assert_eq!(pool.leased(), 0);
    }
}
