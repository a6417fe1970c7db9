use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use packet_engine::core::codec::PacketCodec;
use packet_engine::core::registry::{packet_types, PacketTypeRegistry};
use packet_engine::core::wire::FieldValue;
use packet_engine::utils::buffer_pool::PacketMemoryPool;
use std::sync::Arc;

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let codec = PacketCodec::new(
        Arc::new(PacketTypeRegistry::standard().unwrap()),
        PacketMemoryPool::default(),
    );
    codec.pool().prewarm(8);

    let cases: [(&str, u16, Vec<FieldValue>); 3] = [
        (
            "keep_alive",
            packet_types::KEEP_ALIVE,
            vec![FieldValue::U64(u64::MAX)],
        ),
        (
            "client_action",
            packet_types::CLIENT_ACTION,
            vec![
                FieldValue::U32(7),
                FieldValue::U64(0x1_0000_0001),
                FieldValue::U16(99),
            ],
        ),
        (
            "integrity_report",
            packet_types::INTEGRITY_REPORT,
            vec![
                FieldValue::U32(19045),
                FieldValue::Bytes(vec![b'm'; 64]),
                FieldValue::Bytes(vec![b'i'; 128]),
            ],
        ),
    ];

    for (name, type_id, fields) in &cases {
        let encoded = codec.encode(*type_id, fields).unwrap().to_vec();
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_function(format!("encode_{name}"), |b| {
            b.iter(|| {
                let lease = codec.encode(*type_id, fields).unwrap();
                assert!(!lease.is_empty());
            })
        });
        group.bench_function(format!("decode_{name}"), |b| {
            b.iter(|| {
                let decoded = codec.decode(&encoded);
                assert!(decoded.is_ok());
            })
        });
        group.bench_function(format!("roundtrip_{name}"), |b| {
            b.iter_batched(
                || fields.clone(),
                |fields| {
                    let lease = codec.encode(*type_id, &fields).unwrap();
                    codec.decode(&lease).unwrap()
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_packet_encode_decode);
criterion_main!(benches);
