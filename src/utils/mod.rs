//! # Utility Modules
//!
//! Supporting utilities shared by the engine components.
//!
//! ## Components
//! - **Buffer Pool**: size-classed packet buffers with scoped leases
//! - **Metrics**: thread-safe observability counters
//! - **Logging**: subscriber setup for hosts that want one

pub mod buffer_pool;
pub mod logging;
pub mod metrics;

pub use buffer_pool::{PacketBuffer, PacketLease, PacketMemoryPool, PoolStats};
