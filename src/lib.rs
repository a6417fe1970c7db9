//! # Packet Engine
//!
//! In-process packet handling for a networked client:
//!
//! - [`utils::buffer_pool`]: size-classed pool of reusable packet buffers
//! - [`core::registry`] and [`core::codec`]: typed packet layouts and the
//!   encoder/decoder that applies them
//! - [`session`]: lock-guarded buffs and tracked players
//! - [`identity`]: compute-once host identity
//! - [`watchdog`]: background integrity scanner with cooperative shutdown
//!
//! [`engine::PacketEngine`] bundles one of each. Packets leave the engine through a
//! [`transport::PacketTransport`]; sockets are the host's concern.

#![warn(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod identity;
pub mod session;
pub mod transport;
pub mod utils;
pub mod watchdog;

pub use crate::core::codec::{Packet, PacketCodec};
pub use crate::core::registry::{PacketTypeDescriptor, PacketTypeRegistry};
pub use crate::core::wire::FieldValue;
pub use crate::engine::PacketEngine;
pub use crate::error::{EngineError, Result};
pub use crate::utils::buffer_pool::{PacketLease, PacketMemoryPool};

/// Common imports for hosts embedding the engine
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::core::codec::{Packet, PacketCodec};
    pub use crate::core::registry::{packet_types, PacketTypeRegistry};
    pub use crate::core::wire::FieldValue;
    pub use crate::engine::PacketEngine;
    pub use crate::error::{EngineError, Result};
    pub use crate::identity::{IdentityCache, IdentityProvider, SystemIdentityProvider};
    pub use crate::session::{BuffIcon, PlayerRef, SessionStateStore};
    pub use crate::transport::{ChannelTransport, PacketTransport};
    pub use crate::utils::buffer_pool::{PacketLease, PacketMemoryPool};
    pub use crate::watchdog::{Detection, DetectionAction, IntegrityWatchdog, ProcessListSource};
}
