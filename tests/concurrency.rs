//! Multi-threaded pool and session behaviour

#![allow(clippy::expect_used, clippy::unwrap_used)]

use packet_engine::core::codec::PacketCodec;
use packet_engine::core::registry::{packet_types, PacketTypeRegistry};
use packet_engine::core::wire::FieldValue;
use packet_engine::session::{BuffIcon, PlayerRef, SessionStateStore};
use packet_engine::utils::buffer_pool::PacketMemoryPool;
use rand::Rng;
use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn concurrent_leases_never_share_a_buffer() {
    let threads = 8;
    let iterations = 5_000;
    let pool = PacketMemoryPool::default();
    let in_use = Arc::new(Mutex::new(HashSet::new()));
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let pool = pool.clone();
            let in_use = in_use.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut rng = rand::rng();
                barrier.wait();
                for _ in 0..iterations {
                    let size = rng.random_range(1..=6_000);
                    let mut lease = pool.lease(size);
                    assert!(
                        in_use.lock().unwrap().insert(lease.buffer_id()),
                        "buffer {} leased twice",
                        lease.buffer_id()
                    );
                    lease.buffer_mut().extend_from_slice(&[t as u8; 16]);
                    assert!(lease.iter().all(|&b| b == t as u8));
                    assert!(in_use.lock().unwrap().remove(&lease.buffer_id()));
                    drop(lease);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.leased, 0);
    assert_eq!(stats.hits + stats.fallbacks, (threads * iterations) as u64);
    assert!(stats.hits > 0);
}

#[test]
fn concurrent_encode_decode_balances_pool() {
    let codec = PacketCodec::new(
        Arc::new(PacketTypeRegistry::standard().unwrap()),
        PacketMemoryPool::default(),
    );

    let handles: Vec<_> = (0..8u64)
        .map(|t| {
            let codec = codec.clone();
            thread::spawn(move || {
                for i in 0..2_000u64 {
                    let fields = [FieldValue::U64((t << 32) | i), FieldValue::from("player")];
                    let lease = codec.encode(packet_types::SESSION_JOIN, &fields).unwrap();
                    let packet = codec.decode(&lease).unwrap();
                    assert_eq!(packet.fields, fields);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(codec.pool().leased(), 0);
}

#[test]
fn removal_before_tick_is_not_resurrected() {
    let store = Arc::new(SessionStateStore::new());
    let expires = Instant::now() + Duration::from_secs(60);

    for round in 0..500u64 {
        for source in 0..16 {
            store.add_buff(BuffIcon::new(source, format!("fx-{round}"), expires));
        }

        let remover = {
            let store = store.clone();
            thread::spawn(move || {
                for source in 0..16 {
                    assert!(store.remove_buff(source, &format!("fx-{round}")));
                }
            })
        };
        remover.join().unwrap();

        // The removals completed before this tick started.
        let ticker = {
            let store = store.clone();
            thread::spawn(move || store.tick_buffs(Instant::now()))
        };
        assert_eq!(ticker.join().unwrap(), 0);
        for source in 0..16 {
            assert!(!store.has_buff(source, &format!("fx-{round}")));
        }
    }
    assert_eq!(store.buff_count(), 0);
}

#[test]
fn concurrent_tick_and_remove_leave_no_expired_entries() {
    let store = Arc::new(SessionStateStore::new());
    let now = Instant::now();
    for source in 0..2_000u64 {
        let expires = if source % 2 == 0 {
            now
        } else {
            now + Duration::from_secs(60)
        };
        store.add_buff(BuffIcon::new(source, "fx", expires));
    }

    let barrier = Arc::new(Barrier::new(3));
    let ticker = {
        let (store, barrier) = (store.clone(), barrier.clone());
        thread::spawn(move || {
            barrier.wait();
            (0..50).map(|_| store.tick_buffs(now)).sum::<usize>()
        })
    };
    let remover = {
        let (store, barrier) = (store.clone(), barrier.clone());
        thread::spawn(move || {
            barrier.wait();
            (0..2_000u64)
                .filter(|s| s % 4 == 1)
                .filter(|&s| store.remove_buff(s, "fx"))
                .count()
        })
    };
    barrier.wait();

    let expired = ticker.join().unwrap();
    let removed = remover.join().unwrap();

    assert_eq!(expired, 1_000);
    assert_eq!(removed, 500);
    assert_eq!(store.buff_count(), 500);
    assert!(store.buff_snapshot().iter().all(|b| !b.is_expired(now)));
}

#[test]
fn clean_all_players_races_with_adds() {
    let store = Arc::new(SessionStateStore::new());
    let barrier = Arc::new(Barrier::new(5));

    let adders: Vec<_> = (0..4u64)
        .map(|t| {
            let (store, barrier) = (store.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                for i in 0..1_000 {
                    store.add_player(PlayerRef(t * 10_000 + i));
                }
            })
        })
        .collect();

    barrier.wait();
    let mut cleared = 0;
    for _ in 0..100 {
        cleared += store.clean_all_players();
        let snapshot = store.player_snapshot();
        assert!(snapshot.windows(2).all(|w| w[0] < w[1]));
    }

    for handle in adders {
        handle.join().unwrap();
    }
    cleared += store.clean_all_players();
    assert_eq!(cleared, 4_000);
    assert_eq!(store.player_count(), 0);
}
