#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use packet_engine::core::frame::FrameCodec;
use packet_engine::utils::buffer_pool::PacketMemoryPool;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let pool = PacketMemoryPool::default();
    let mut framer = FrameCodec::new(pool.clone());
    let mut buf = BytesMut::from(data);

    // Frames are cut until the buffer runs dry; none may stay leased
    while let Ok(Some(frame)) = framer.decode(&mut buf) {
        assert!(frame.len() >= 4);
    }
    assert_eq!(pool.leased(), 0);
});
