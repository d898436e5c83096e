//! Per-owner pass listing cache.
//!
//! Entries never expire on their own. The service drops an owner's entry
//! whenever one of that owner's records changes (token attached, redeemed,
//! reset, status changed, registered).
//!
//! A listing is cached in two steps: [`PassCache::reserve`] before reading
//! the repository, [`PassCache::fill`] after. An invalidation in between
//! removes the reservation, so a snapshot read before a mutation is never
//! stored after it.
//!
//! The cache holds at most `capacity` owners; the least recently used entry
//! is evicted first.

use crate::types::{PassRecord, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default number of owners kept in the cache
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Proof that a listing read started after the owner's last invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation(u64);

#[derive(Debug)]
enum Slot {
    Loading(Reservation),
    Ready(Vec<PassRecord>),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Entries {
    by_owner: HashMap<UserId, Entry>,
    clock: u64,
}

impl Entries {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_to(&mut self, capacity: usize) {
        while self.by_owner.len() > capacity {
            let oldest = self
                .by_owner
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(owner, _)| *owner);
            let Some(owner) = oldest else { break };
            self.by_owner.remove(&owner);
            tracing::trace!(%owner, "Pass listing evicted");
        }
    }
}

/// Cached `list_passes` results keyed by owner
#[derive(Clone, Debug)]
pub struct PassCache {
    entries: Arc<RwLock<Entries>>,
    capacity: usize,
}

impl Default for PassCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl PassCache {
    /// Creates an empty cache holding up to [`DEFAULT_CACHE_CAPACITY`] owners
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cache holding up to `capacity` owners (at least one)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::default())),
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of owners kept
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cached listing for `owner`
    pub async fn get(&self, owner: UserId) -> Option<Vec<PassRecord>> {
        let mut entries = self.entries.write().await;
        let now = entries.tick();
        let entry = entries.by_owner.get_mut(&owner)?;
        match &entry.slot {
            Slot::Ready(records) => {
                entry.last_used = now;
                Some(records.clone())
            },
            Slot::Loading(_) => None,
        }
    }

    /// Mark a listing read for `owner` as started
    pub async fn reserve(&self, owner: UserId) -> Reservation {
        let mut entries = self.entries.write().await;
        let now = entries.tick();
        let reservation = Reservation(now);
        entries.by_owner.insert(
            owner,
            Entry {
                slot: Slot::Loading(reservation),
                last_used: now,
            },
        );
        entries.evict_to(self.capacity);
        reservation
    }

    /// Store the listing read under `reservation`
    ///
    /// Returns `false` and stores nothing if the owner was invalidated (or
    /// evicted, or reserved again) since the reservation was taken.
    pub async fn fill(
        &self,
        owner: UserId,
        reservation: Reservation,
        records: Vec<PassRecord>,
    ) -> bool {
        let mut entries = self.entries.write().await;
        let now = entries.tick();
        match entries.by_owner.get_mut(&owner) {
            Some(entry) if matches!(entry.slot, Slot::Loading(r) if r == reservation) => {
                entry.slot = Slot::Ready(records);
                entry.last_used = now;
                true
            },
            _ => {
                tracing::debug!(%owner, "Stale pass listing discarded");
                false
            },
        }
    }

    /// Drop the listing (or pending read) for `owner`
    pub async fn invalidate(&self, owner: UserId) {
        if self.entries.write().await.by_owner.remove(&owner).is_some() {
            tracing::debug!(%owner, "Pass listing invalidated");
        }
    }

    /// Number of cached or loading owners
    pub async fn len(&self) -> usize {
        self.entries.read().await.by_owner.len()
    }

    /// Whether nothing is cached
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.by_owner.is_empty()
    }
}
