#![no_main]

use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;
use packet_engine::core::codec::PacketCodec;
use packet_engine::core::registry::PacketTypeRegistry;
use packet_engine::utils::buffer_pool::PacketMemoryPool;
use std::sync::Arc;

static CODEC: Lazy<Option<PacketCodec>> = Lazy::new(|| {
    let registry = PacketTypeRegistry::standard().ok()?;
    Some(PacketCodec::new(Arc::new(registry), PacketMemoryPool::default()))
});

fuzz_target!(|data: &[u8]| {
    let Some(codec) = CODEC.as_ref() else {
        return;
    };
    // Anything that decodes must re-encode to the same bytes
    if let Ok(packet) = codec.decode(data) {
        if let Ok(lease) = codec.encode(packet.type_id, &packet.fields) {
            assert_eq!(&lease[..], data);
        }
    }
});
