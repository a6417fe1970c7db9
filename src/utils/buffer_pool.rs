//! # Packet Memory Pool
//!
//! Leasable byte buffers for packet construction, recycled through free lists
//! bucketed by size class.
//!
//! ## Leasing
//! - [`PacketMemoryPool::acquire`] hands out a [`PacketBuffer`] whose capacity is at
//!   least the size hint. A miss allocates a buffer sized to the next class up so a
//!   near-miss request does not allocate again next time.
//! - [`PacketMemoryPool::release`] clears the buffer and files it under the largest
//!   class its capacity still satisfies.
//! - [`PacketMemoryPool::lease`] wraps the buffer in a [`PacketLease`] that releases
//!   itself on drop, so every exit path (including `?`) returns it exactly once.
//!
//! Requests larger than the largest class are served unpooled and deallocated on
//! release.
//!
//! ## Usage
//! ```rust
//! use packet_engine::utils::buffer_pool::PacketMemoryPool;
//!
//! let pool = PacketMemoryPool::default();
//! {
//!     let mut lease = pool.lease(100);
//!     lease.buffer_mut().extend_from_slice(b"hello");
//!     assert!(lease.capacity() >= 128);
//! } // returned to the pool here
//! assert_eq!(pool.available(), 1);
//! ```

use crate::config::PoolConfig;
use crate::error::{constants, EngineError, Result};
use crate::utils::metrics::global_metrics;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// Source of pool ids, so a buffer can tell which pool leased it
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// An owned byte region leased from a [`PacketMemoryPool`].
///
/// Not `Clone`: a buffer has exactly one holder, which is what makes a second
/// release of the same lease impossible to express.
#[derive(Debug)]
pub struct PacketBuffer {
    id: u64,
    pool_id: u64,
    data: Vec<u8>,
}

impl PacketBuffer {
    /// Placeholder left behind when a lease hands its buffer off. Never pooled.
    fn detached() -> Self {
        Self {
            id: 0,
            pool_id: 0,
            data: Vec::new(),
        }
    }

    /// Pool-unique buffer id, stable across recycles
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for writers; growing past capacity may move the buffer
    /// into a larger class (or out of the pool) on release.
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }
}

impl Deref for PacketBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

struct PoolState {
    /// One free list per size class
    free: Vec<Vec<PacketBuffer>>,
    /// Ids of buffers currently out on lease
    leased: HashSet<u64>,
}

struct PoolInner {
    id: u64,
    classes: Box<[usize]>,
    max_free_per_class: usize,
    state: Mutex<PoolState>,
    next_buffer_id: AtomicU64,
    hits: AtomicU64,
    fallbacks: AtomicU64,
}

/// Thread-safe pool of packet buffers. Cloning shares the same pool.
#[derive(Clone)]
pub struct PacketMemoryPool {
    inner: Arc<PoolInner>,
}

impl PacketMemoryPool {
    /// Create a pool from validated configuration
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(EngineError::ConfigError(errors.join("; ")));
        }
        let pool = Self::from_classes(&config.size_classes, config.max_free_per_class);
        if config.prewarm_per_class > 0 {
            pool.prewarm(config.prewarm_per_class);
        }
        Ok(pool)
    }

    fn from_classes(classes: &[usize], max_free_per_class: usize) -> Self {
        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        debug!(pool_id = id, ?classes, max_free_per_class, "Packet pool created");
        Self {
            inner: Arc::new(PoolInner {
                id,
                classes: classes.into(),
                max_free_per_class,
                state: Mutex::new(PoolState {
                    free: classes.iter().map(|_| Vec::new()).collect(),
                    leased: HashSet::new(),
                }),
                next_buffer_id: AtomicU64::new(1),
                hits: AtomicU64::new(0),
                fallbacks: AtomicU64::new(0),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Index of the smallest class that fits `size`, if any
    fn class_for_request(&self, size: usize) -> Option<usize> {
        self.inner.classes.iter().position(|&class| class >= size)
    }

    /// Index of the largest class a buffer of `capacity` still satisfies.
    /// Buffers above the largest class are not pooled.
    fn class_for_release(&self, capacity: usize) -> Option<usize> {
        let largest = *self.inner.classes.last()?;
        if capacity > largest {
            return None;
        }
        self.inner.classes.iter().rposition(|&class| class <= capacity)
    }

    fn allocate(&self, capacity: usize) -> PacketBuffer {
        PacketBuffer {
            id: self.inner.next_buffer_id.fetch_add(1, Ordering::Relaxed),
            pool_id: self.inner.id,
            data: Vec::with_capacity(capacity),
        }
    }

    /// Lease a buffer with capacity >= `size_hint`.
    ///
    /// Falls back to a fresh allocation when no free buffer fits; that costs
    /// performance, never correctness.
    pub fn acquire(&self, size_hint: usize) -> PacketBuffer {
        global_metrics().pool_acquired();
        let class = self.class_for_request(size_hint);

        if let Some(index) = class {
            let mut state = self.lock();
            let hit = state.free[index..].iter_mut().find_map(Vec::pop);
            if let Some(buffer) = hit {
                state.leased.insert(buffer.id);
                drop(state);
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                global_metrics().pool_hit();
                trace!(buffer_id = buffer.id, size_hint, "Pool hit");
                return buffer;
            }
        }

        // Allocate outside the lock, then record the lease.
        let capacity = class.map_or(size_hint, |index| self.inner.classes[index]);
        let buffer = self.allocate(capacity);
        self.lock().leased.insert(buffer.id);
        self.inner.fallbacks.fetch_add(1, Ordering::Relaxed);
        global_metrics().pool_fallback();
        trace!(buffer_id = buffer.id, size_hint, capacity, "Pool miss, allocated");
        buffer
    }

    /// Lease a buffer that returns itself to this pool when dropped
    pub fn lease(&self, size_hint: usize) -> PacketLease {
        PacketLease {
            buffer: self.acquire(size_hint),
            pool: self.clone(),
            released: false,
        }
    }

    /// Return a leased buffer.
    ///
    /// # Errors
    /// `InvalidRelease` if the buffer came from another pool, or if this pool has
    /// no lease on record for it. The latter means the pool's own bookkeeping is
    /// broken and also trips a debug assertion.
    pub fn release(&self, buffer: PacketBuffer) -> Result<()> {
        if buffer.pool_id != self.inner.id {
            global_metrics().invalid_release();
            warn!(
                buffer_id = buffer.id,
                owner_pool = buffer.pool_id,
                pool_id = self.inner.id,
                "Release of foreign buffer"
            );
            return Err(EngineError::InvalidRelease {
                buffer_id: buffer.id,
                reason: constants::ERR_FOREIGN_BUFFER,
            });
        }

        let mut buffer = buffer;
        buffer.data.clear();
        let slot = self.class_for_release(buffer.data.capacity());

        let mut state = self.lock();
        let was_leased = state.leased.remove(&buffer.id);
        if was_leased {
            if let Some(index) = slot {
                if state.free[index].len() < self.inner.max_free_per_class {
                    trace!(buffer_id = buffer.id, class = self.inner.classes[index], "Buffer released");
                    state.free[index].push(buffer);
                    global_metrics().pool_released();
                    return Ok(());
                }
            }
        }
        drop(state);

        if !was_leased {
            global_metrics().invalid_release();
            debug_assert!(
                was_leased,
                "pool {} bookkeeping corrupted: buffer {} released without a lease",
                self.inner.id, buffer.id
            );
            warn!(buffer_id = buffer.id, "Release of buffer with no lease on record");
            return Err(EngineError::InvalidRelease {
                buffer_id: buffer.id,
                reason: constants::ERR_NOT_LEASED,
            });
        }

        // Oversized or surplus: deallocated here, outside the lock.
        global_metrics().pool_released();
        trace!(buffer_id = buffer.id, capacity = buffer.data.capacity(), "Buffer dropped");
        Ok(())
    }

    /// Allocate `per_class` free buffers for every size class, up to the free-list bound
    pub fn prewarm(&self, per_class: usize) {
        let target = per_class.min(self.inner.max_free_per_class);
        for (index, &class) in self.inner.classes.iter().enumerate() {
            let missing = target.saturating_sub(self.lock().free[index].len());
            let fresh: Vec<PacketBuffer> = (0..missing).map(|_| self.allocate(class)).collect();
            let mut state = self.lock();
            for buffer in fresh {
                if state.free[index].len() >= target {
                    break;
                }
                state.free[index].push(buffer);
            }
        }
        debug!(pool_id = self.inner.id, per_class = target, "Pool prewarmed");
    }

    /// Number of free buffers across all classes
    pub fn available(&self) -> usize {
        self.lock().free.iter().map(Vec::len).sum()
    }

    /// Number of buffers currently leased
    pub fn leased(&self) -> usize {
        self.lock().leased.len()
    }

    /// Configured size classes
    pub fn size_classes(&self) -> &[usize] {
        &self.inner.classes
    }

    /// Point-in-time statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            leased: state.leased.len(),
            available: state.free.iter().map(Vec::len).sum(),
            per_class: self
                .inner
                .classes
                .iter()
                .zip(state.free.iter())
                .map(|(&class, list)| (class, list.len()))
                .collect(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            fallbacks: self.inner.fallbacks.load(Ordering::Relaxed),
        }
    }
}

impl Default for PacketMemoryPool {
    fn default() -> Self {
        let config = PoolConfig::default();
        Self::from_classes(&config.size_classes, config.max_free_per_class)
    }
}

impl std::fmt::Debug for PacketMemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketMemoryPool")
            .field("id", &self.inner.id)
            .field("classes", &self.inner.classes)
            .finish()
    }
}

/// Statistics about the pool
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Buffers currently leased
    pub leased: usize,
    /// Free buffers across all classes
    pub available: usize,
    /// (class capacity, free buffers) per size class
    pub per_class: Vec<(usize, usize)>,
    /// Acquisitions served from a free list
    pub hits: u64,
    /// Acquisitions that allocated
    pub fallbacks: u64,
}

/// Scoped lease over a [`PacketBuffer`]; releases back to its pool on drop.
pub struct PacketLease {
    buffer: PacketBuffer,
    pool: PacketMemoryPool,
    released: bool,
}

impl PacketLease {
    /// Mutable access to the leased bytes
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        self.buffer.as_mut_vec()
    }

    pub fn buffer_id(&self) -> u64 {
        self.buffer.id
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Detach the buffer from the scope guard. The caller now owns the release
    /// and must pass the buffer to [`PacketMemoryPool::release`].
    pub fn into_buffer(mut self) -> PacketBuffer {
        self.released = true;
        std::mem::replace(&mut self.buffer, PacketBuffer::detached())
    }

    /// Release now and surface any error instead of logging it on drop
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        let buffer = std::mem::replace(&mut self.buffer, PacketBuffer::detached());
        self.pool.release(buffer)
    }
}

impl Deref for PacketLease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}

impl AsRef<[u8]> for PacketLease {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_slice()
    }
}

impl std::fmt::Debug for PacketLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketLease")
            .field("buffer_id", &self.buffer.id)
            .field("len", &self.buffer.len())
            .finish()
    }
}

impl Drop for PacketLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let buffer = std::mem::replace(&mut self.buffer, PacketBuffer::detached());
        if let Err(e) = self.pool.release(buffer) {
            warn!(error = %e, "Lease release failed");
        }
    }
}
