//! # Packet Type Registry
//!
//! Immutable table of packet layouts, built once and shared.
//!
//! Each packet type id maps to a [`PacketTypeDescriptor`]: an ordered list of
//! fields, each tagged with its exact encoded width, plus a checkable flag.
//! Checkability is answered from a precomputed bitset indexed by type id.
//!
//! ## Declaring packets
//! ```rust
//! use packet_engine::core::registry::{FieldSpec, PacketDeclaration, PacketTypeRegistry};
//!
//! static DECLS: &[PacketDeclaration] = &[PacketDeclaration {
//!     type_id: 0x10,
//!     name: "PAIR",
//!     fields: &[FieldSpec::u32("count"), FieldSpec::u64("value")],
//!     checkable: true,
//! }];
//!
//! let registry = PacketTypeRegistry::from_declarations(DECLS).unwrap();
//! assert!(registry.is_checkable(0x10));
//! assert!(!registry.is_checkable(0x11));
//! ```

use crate::config::{HEADER_SIZE, MAX_BODY_SIZE};
use crate::error::{EngineError, Result};
use std::collections::HashMap;
use tracing::debug;

/// Width tag of one field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    U8,
    U16,
    U32,
    U64,
    /// `[len: u16][bytes]`, at most `max_len` bytes
    Bytes { max_len: u16 },
}

impl FieldKind {
    /// Encoded width for fixed-width kinds
    pub const fn fixed_width(&self) -> Option<usize> {
        match self {
            FieldKind::U8 => Some(1),
            FieldKind::U16 => Some(2),
            FieldKind::U32 => Some(4),
            FieldKind::U64 => Some(8),
            FieldKind::Bytes { .. } => None,
        }
    }

    /// Largest encoded size of this field, including any length prefix
    pub const fn worst_case(&self) -> usize {
        match (self, self.fixed_width()) {
            (_, Some(width)) => width,
            (FieldKind::Bytes { max_len }, None) => 2 + *max_len as usize,
            (_, None) => 0,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            FieldKind::U8 => "u8",
            FieldKind::U16 => "u16",
            FieldKind::U32 => "u32",
            FieldKind::U64 => "u64",
            FieldKind::Bytes { .. } => "bytes",
        }
    }
}

/// One named field in a packet layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn u8(name: &'static str) -> Self {
        Self { name, kind: FieldKind::U8 }
    }

    pub const fn u16(name: &'static str) -> Self {
        Self { name, kind: FieldKind::U16 }
    }

    pub const fn u32(name: &'static str) -> Self {
        Self { name, kind: FieldKind::U32 }
    }

    pub const fn u64(name: &'static str) -> Self {
        Self { name, kind: FieldKind::U64 }
    }

    pub const fn bytes(name: &'static str, max_len: u16) -> Self {
        Self {
            name,
            kind: FieldKind::Bytes { max_len },
        }
    }
}

/// Static declaration of a packet type, usable in `static` tables
#[derive(Debug, Clone, Copy)]
pub struct PacketDeclaration {
    pub type_id: u16,
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
    pub checkable: bool,
}

/// Immutable field layout of one packet type
#[derive(Debug, Clone)]
pub struct PacketTypeDescriptor {
    type_id: u16,
    name: &'static str,
    fields: Box<[FieldSpec]>,
    checkable: bool,
    max_body: usize,
}

impl PacketTypeDescriptor {
    /// Build a descriptor, rejecting layouts whose worst case overflows the header length
    pub fn new(
        type_id: u16,
        name: &'static str,
        fields: impl Into<Box<[FieldSpec]>>,
        checkable: bool,
    ) -> Result<Self> {
        let fields = fields.into();
        let max_body: usize = fields.iter().map(|f| f.kind.worst_case()).sum();
        if max_body > MAX_BODY_SIZE {
            return Err(EngineError::InvalidDescriptor(format!(
                "{name} ({type_id:#06x}) worst-case body {max_body} exceeds {MAX_BODY_SIZE}"
            )));
        }
        Ok(Self {
            type_id,
            name,
            fields,
            checkable,
            max_body,
        })
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn is_checkable(&self) -> bool {
        self.checkable
    }

    /// Header plus the largest body this layout can produce
    pub fn worst_case_size(&self) -> usize {
        HEADER_SIZE + self.max_body
    }
}

impl TryFrom<&PacketDeclaration> for PacketTypeDescriptor {
    type Error = EngineError;

    fn try_from(decl: &PacketDeclaration) -> Result<Self> {
        Self::new(decl.type_id, decl.name, decl.fields, decl.checkable)
    }
}

const CHECKABLE_WORDS: usize = (u16::MAX as usize + 1) / 64;

/// Lookup table from packet type id to descriptor. Read-only once built.
#[derive(Debug, Clone)]
pub struct PacketTypeRegistry {
    descriptors: HashMap<u16, PacketTypeDescriptor>,
    checkable: Box<[u64]>,
}

impl PacketTypeRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build from a static declaration set
    pub fn from_declarations(declarations: &[PacketDeclaration]) -> Result<Self> {
        let mut builder = Self::builder();
        for decl in declarations {
            builder.declare(decl)?;
        }
        Ok(builder.build())
    }

    /// Registry of [`STANDARD_DECLARATIONS`]
    pub fn standard() -> Result<Self> {
        Self::from_declarations(STANDARD_DECLARATIONS)
    }

    /// Descriptor for `type_id`, or `NotFound`
    pub fn get(&self, type_id: u16) -> Result<&PacketTypeDescriptor> {
        self.descriptors
            .get(&type_id)
            .ok_or(EngineError::NotFound(type_id))
    }

    pub fn contains(&self, type_id: u16) -> bool {
        self.descriptors.contains_key(&type_id)
    }

    /// O(1) bitset lookup; false for unregistered ids
    #[inline]
    pub fn is_checkable(&self, type_id: u16) -> bool {
        let id = type_id as usize;
        (self.checkable[id / 64] >> (id % 64)) & 1 == 1
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors in ascending type id order
    pub fn descriptors(&self) -> Vec<&PacketTypeDescriptor> {
        let mut all: Vec<_> = self.descriptors.values().collect();
        all.sort_by_key(|d| d.type_id);
        all
    }
}

/// Collects descriptors, then freezes them into a [`PacketTypeRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    descriptors: HashMap<u16, PacketTypeDescriptor>,
}

impl RegistryBuilder {
    /// Add a descriptor; each type id may be registered once
    pub fn register(&mut self, descriptor: PacketTypeDescriptor) -> Result<&mut Self> {
        let type_id = descriptor.type_id;
        if self.descriptors.contains_key(&type_id) {
            return Err(EngineError::DuplicateType(type_id));
        }
        self.descriptors.insert(type_id, descriptor);
        Ok(self)
    }

    pub fn declare(&mut self, decl: &PacketDeclaration) -> Result<&mut Self> {
        self.register(PacketTypeDescriptor::try_from(decl)?)
    }

    pub fn build(self) -> PacketTypeRegistry {
        let mut checkable = vec![0u64; CHECKABLE_WORDS].into_boxed_slice();
        for descriptor in self.descriptors.values().filter(|d| d.checkable) {
            let id = descriptor.type_id as usize;
            checkable[id / 64] |= 1 << (id % 64);
        }
        debug!(types = self.descriptors.len(), "Packet registry built");
        PacketTypeRegistry {
            descriptors: self.descriptors,
            checkable,
        }
    }
}

/// Type ids of the engine-level packets
pub mod packet_types {
    pub const KEEP_ALIVE: u16 = 0x0001;
    pub const SESSION_JOIN: u16 = 0x0002;
    pub const SESSION_LEAVE: u16 = 0x0003;
    pub const BUFF_SYNC: u16 = 0x0020;
    pub const PLAYER_SYNC: u16 = 0x0021;
    pub const INTEGRITY_REPORT: u16 = 0x0030;
    pub const CLIENT_ACTION: u16 = 0x0040;
}

/// Engine-level packet layouts
pub static STANDARD_DECLARATIONS: &[PacketDeclaration] = &[
    PacketDeclaration {
        type_id: packet_types::KEEP_ALIVE,
        name: "KEEP_ALIVE",
        fields: &[FieldSpec::u64("client_tick")],
        checkable: false,
    },
    PacketDeclaration {
        type_id: packet_types::SESSION_JOIN,
        name: "SESSION_JOIN",
        fields: &[FieldSpec::u64("session_id"), FieldSpec::bytes("name", 32)],
        checkable: false,
    },
    PacketDeclaration {
        type_id: packet_types::SESSION_LEAVE,
        name: "SESSION_LEAVE",
        fields: &[FieldSpec::u64("session_id")],
        checkable: false,
    },
    PacketDeclaration {
        type_id: packet_types::BUFF_SYNC,
        name: "BUFF_SYNC",
        fields: &[
            FieldSpec::u64("source_key"),
            FieldSpec::bytes("effect_name", 64),
            FieldSpec::u32("remaining_ms"),
        ],
        checkable: true,
    },
    PacketDeclaration {
        type_id: packet_types::PLAYER_SYNC,
        name: "PLAYER_SYNC",
        fields: &[FieldSpec::u64("entity_id"), FieldSpec::u8("flags")],
        checkable: false,
    },
    PacketDeclaration {
        type_id: packet_types::INTEGRITY_REPORT,
        name: "INTEGRITY_REPORT",
        fields: &[
            FieldSpec::u32("os_build"),
            FieldSpec::bytes("machine_id", 64),
            FieldSpec::bytes("indicator", 128),
        ],
        checkable: true,
    },
    PacketDeclaration {
        type_id: packet_types::CLIENT_ACTION,
        name: "CLIENT_ACTION",
        fields: &[
            FieldSpec::u32("action_id"),
            FieldSpec::u64("target"),
            FieldSpec::u16("sequence"),
        ],
        checkable: true,
    },
];
