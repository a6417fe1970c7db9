//! # Core Packet Components
//!
//! Packet layouts, binary encoding, and stream framing.
//!
//! ## Components
//! - **Registry**: immutable packet type id -> layout table with checkable flags
//! - **Wire**: fixed-width scalar I/O, width carried by the Rust type
//! - **Codec**: encode into pooled leases, decode from byte slices
//! - **Frame**: `tokio_util` framing for handing packets to a transport
//!
//! ## Wire Format
//! ```text
//! [TypeId(2)] [BodyLen(2)] [Fields...]
//! ```
//!
//! ## Safety Limits
//! - Body length is a u16; layouts whose worst case exceeds it are rejected at registration
//! - Length prefixes are checked against the remaining bytes before any copy

pub mod codec;
pub mod frame;
pub mod registry;
pub mod wire;
