//! # Session State Store
//!
//! Lock-guarded storage for the current session: active timed status effects
//! ([`BuffIcon`]) and tracked entities ([`PlayerRef`]).
//!
//! ## Lock discipline
//! - Both collections sit behind one `Mutex`.
//! - Every mutation (add, remove, expiry sweep, clear) runs to completion on the
//!   live collections inside a single critical section. Nothing is decided from
//!   a copy and applied later.
//! - Readers that need to iterate outside the lock call one of the `*_snapshot`
//!   methods, which copy under the lock. No method hands out a reference into
//!   the guarded collections.
//!
//! Because every operation is one critical section, a `remove_buff` that returns
//! before a `tick_buffs` starts cannot be undone by that tick.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, trace};

/// Identity of a buff: who applied it and what it is
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuffKey {
    pub source_key: u64,
    pub effect_name: String,
}

impl BuffKey {
    pub fn new(source_key: u64, effect_name: impl Into<String>) -> Self {
        Self {
            source_key,
            effect_name: effect_name.into(),
        }
    }
}

/// A timed status effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuffIcon {
    pub key: BuffKey,
    pub expires_at: Instant,
}

impl BuffIcon {
    pub fn new(source_key: u64, effect_name: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            key: BuffKey::new(source_key, effect_name),
            expires_at,
        }
    }

    /// Expired once `now` reaches the expiry instant
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Reference to a tracked entity in the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerRef(pub u64);

/// Point-in-time copy of the whole session, taken under one lock acquisition
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub buffs: Vec<BuffIcon>,
    pub players: Vec<PlayerRef>,
}

#[derive(Debug, Default)]
struct SessionState {
    buffs: HashMap<BuffKey, Instant>,
    players: HashSet<PlayerRef>,
}

/// Shared session state; wrap in an `Arc` to share between threads
#[derive(Debug, Default)]
pub struct SessionStateStore {
    state: Mutex<SessionState>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a buff, replacing the expiry of any existing entry with the same key.
    /// Returns true if the key was new.
    pub fn add_buff(&self, buff: BuffIcon) -> bool {
        let mut state = self.lock();
        let inserted = state.buffs.insert(buff.key, buff.expires_at).is_none();
        trace!(inserted, buffs = state.buffs.len(), "Buff added");
        inserted
    }

    /// Remove the buff for (`source_key`, `effect_name`). A missing key is a no-op.
    /// Returns true if an entry was removed.
    pub fn remove_buff(&self, source_key: u64, effect_name: &str) -> bool {
        let key = BuffKey::new(source_key, effect_name);
        let removed = self.lock().buffs.remove(&key).is_some();
        trace!(source_key, effect_name, removed, "Buff removal");
        removed
    }

    /// Drop every buff whose expiry is at or before `now`, in place.
    /// Returns the number removed.
    pub fn tick_buffs(&self, now: Instant) -> usize {
        let mut state = self.lock();
        let before = state.buffs.len();
        state.buffs.retain(|_, expires_at| now < *expires_at);
        let removed = before - state.buffs.len();
        drop(state);

        if removed > 0 {
            debug!(removed, "Expired buffs swept");
        }
        removed
    }

    pub fn has_buff(&self, source_key: u64, effect_name: &str) -> bool {
        let key = BuffKey::new(source_key, effect_name);
        self.lock().buffs.contains_key(&key)
    }

    pub fn buff_count(&self) -> usize {
        self.lock().buffs.len()
    }

    /// Earliest pending expiry, for scheduling the next sweep
    pub fn next_expiry(&self) -> Option<Instant> {
        self.lock().buffs.values().min().copied()
    }

    pub fn clear_buffs(&self) -> usize {
        let mut state = self.lock();
        let count = state.buffs.len();
        state.buffs.clear();
        count
    }

    /// Copy of the buffs, sorted by key
    pub fn buff_snapshot(&self) -> Vec<BuffIcon> {
        let state = self.lock();
        let mut buffs = collect_buffs(&state);
        drop(state);
        buffs.sort_by(|a, b| a.key.cmp(&b.key));
        buffs
    }

    /// Track a player. Returns false if already tracked.
    pub fn add_player(&self, player: PlayerRef) -> bool {
        self.lock().players.insert(player)
    }

    /// Stop tracking a player. Returns false if not tracked.
    pub fn remove_player(&self, player: PlayerRef) -> bool {
        self.lock().players.remove(&player)
    }

    pub fn contains_player(&self, player: PlayerRef) -> bool {
        self.lock().players.contains(&player)
    }

    pub fn player_count(&self) -> usize {
        self.lock().players.len()
    }

    /// Clear the live player set. Returns how many were removed.
    pub fn clean_all_players(&self) -> usize {
        let mut state = self.lock();
        let count = state.players.len();
        state.players.clear();
        drop(state);

        debug!(count, "All players cleared");
        count
    }

    /// Copy of the player set, sorted
    pub fn player_snapshot(&self) -> Vec<PlayerRef> {
        let state = self.lock();
        let mut players: Vec<PlayerRef> = state.players.iter().copied().collect();
        drop(state);
        players.sort();
        players
    }

    /// Copy of both collections from a single critical section
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        let mut buffs = collect_buffs(&state);
        let mut players: Vec<PlayerRef> = state.players.iter().copied().collect();
        drop(state);

        buffs.sort_by(|a, b| a.key.cmp(&b.key));
        players.sort();
        SessionSnapshot { buffs, players }
    }
}

fn collect_buffs(state: &SessionState) -> Vec<BuffIcon> {
    state
        .buffs
        .iter()
        .map(|(key, &expires_at)| BuffIcon {
            key: key.clone(),
            expires_at,
        })
        .collect()
}
