//! # Packet Engine
//!
//! Owns one of each component and wires them together: a pool-backed codec, the
//! session store, the identity cache and the integrity watchdog.
//!
//! ```no_run
//! use packet_engine::config::EngineConfig;
//! use packet_engine::core::registry::{packet_types, PacketTypeRegistry};
//! use packet_engine::engine::PacketEngine;
//! use packet_engine::identity::SystemIdentityProvider;
//! use packet_engine::transport::ChannelTransport;
//!
//! # fn main() -> packet_engine::error::Result<()> {
//! let engine = PacketEngine::new(
//!     EngineConfig::default(),
//!     PacketTypeRegistry::standard()?,
//!     SystemIdentityProvider,
//! )?;
//! let (transport, _rx) = ChannelTransport::new();
//! engine.send(packet_types::KEEP_ALIVE, &[42u64.into()], &transport)?;
//! # Ok(())
//! # }
//! ```

use crate::config::EngineConfig;
use crate::core::codec::{Packet, PacketCodec};
use crate::core::registry::{packet_types, PacketTypeRegistry};
use crate::core::wire::FieldValue;
use crate::error::Result;
use crate::identity::{IdentityCache, IdentityProvider};
use crate::session::SessionStateStore;
use crate::transport::PacketTransport;
use crate::utils::buffer_pool::{PacketLease, PacketMemoryPool};
use crate::utils::metrics::global_metrics;
use crate::watchdog::{DetectionPolicy, IndicatorSource, IntegrityWatchdog};
use std::sync::Arc;
use tracing::{info, instrument};

/// Longest machine id carried in an integrity report
const REPORT_MACHINE_ID_MAX: usize = 64;

/// Longest indicator carried in an integrity report
const REPORT_INDICATOR_MAX: usize = 128;

pub struct PacketEngine {
    config: EngineConfig,
    codec: PacketCodec,
    session: Arc<SessionStateStore>,
    identity: Arc<IdentityCache>,
    watchdog: IntegrityWatchdog,
}

impl PacketEngine {
    /// Build an engine from a validated configuration.
    ///
    /// # Errors
    /// `ConfigError` if the configuration does not validate.
    pub fn new(
        config: EngineConfig,
        registry: PacketTypeRegistry,
        provider: impl IdentityProvider + 'static,
    ) -> Result<Self> {
        config.validate_strict()?;

        let pool = PacketMemoryPool::new(&config.pool)?;
        let identity = Arc::new(IdentityCache::new(provider));
        let watchdog = IntegrityWatchdog::new(config.watchdog.clone(), identity.clone());

        info!(
            packet_types = registry.len(),
            size_classes = pool.size_classes().len(),
            "Packet engine initialized"
        );

        Ok(Self {
            codec: PacketCodec::new(Arc::new(registry), pool),
            session: Arc::new(SessionStateStore::new()),
            identity,
            watchdog,
            config,
        })
    }

    /// Default configuration, standard packet table and system identity
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            EngineConfig::default(),
            PacketTypeRegistry::standard()?,
            crate::identity::SystemIdentityProvider,
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> &PacketCodec {
        &self.codec
    }

    pub fn pool(&self) -> &PacketMemoryPool {
        self.codec.pool()
    }

    pub fn registry(&self) -> &PacketTypeRegistry {
        self.codec.registry()
    }

    pub fn session(&self) -> &Arc<SessionStateStore> {
        &self.session
    }

    pub fn identity(&self) -> &Arc<IdentityCache> {
        &self.identity
    }

    pub fn watchdog(&self) -> &IntegrityWatchdog {
        &self.watchdog
    }

    pub fn encode(&self, type_id: u16, fields: &[FieldValue]) -> Result<PacketLease> {
        self.codec.encode(type_id, fields)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Packet> {
        self.codec.decode(data)
    }

    /// Encode and hand the packet to `transport`, which takes over the buffer
    #[instrument(skip(self, fields, transport), level = "debug")]
    pub fn send(
        &self,
        type_id: u16,
        fields: &[FieldValue],
        transport: &dyn PacketTransport,
    ) -> Result<()> {
        let lease = self.codec.encode(type_id, fields)?;
        transport.send(lease)
    }

    /// Encode an INTEGRITY_REPORT for `indicator` using the cached host identity.
    /// Overlong values are truncated to the field limits; a missing identity is
    /// reported as an empty id and build 0.
    pub fn integrity_report(&self, indicator: &str) -> Result<PacketLease> {
        let os_build = self.identity.os_build().unwrap_or(0);
        let machine_id = self
            .identity
            .machine_id()
            .map(|id| truncated(id.as_bytes(), REPORT_MACHINE_ID_MAX))
            .unwrap_or_default();

        self.codec.encode(
            packet_types::INTEGRITY_REPORT,
            &[
                FieldValue::U32(os_build),
                FieldValue::Bytes(machine_id),
                FieldValue::Bytes(truncated(indicator.as_bytes(), REPORT_INDICATOR_MAX)),
            ],
        )
    }

    /// Encode an integrity report and send it
    pub fn report_integrity(&self, indicator: &str, transport: &dyn PacketTransport) -> Result<()> {
        transport.send(self.integrity_report(indicator)?)
    }

    /// Start the integrity watchdog
    pub fn start_watchdog<S, P>(&self, source: S, policy: P) -> Result<()>
    where
        S: IndicatorSource + 'static,
        P: DetectionPolicy + 'static,
    {
        self.watchdog.start(source, policy)
    }

    /// Stop the watchdog and clear session state
    #[instrument(skip(self))]
    pub fn shutdown(&self) -> Result<()> {
        let stopped = self.watchdog.request_stop();
        let players = self.session.clean_all_players();
        let buffs = self.session.clear_buffs();
        info!(players, buffs, "Packet engine shut down");
        global_metrics().log_metrics();
        stopped
    }
}

impl std::fmt::Debug for PacketEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketEngine")
            .field("pool", self.codec.pool())
            .field("packet_types", &self.codec.registry().len())
            .field("watchdog", &self.watchdog)
            .finish()
    }
}

fn truncated(bytes: &[u8], max: usize) -> Vec<u8> {
    bytes[..bytes.len().min(max)].to_vec()
}
