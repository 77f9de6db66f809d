use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::debug;
use crate::core::error::Result;
use crate::core::types::Value;

/// Session identifier, unique per coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// A claimed position.
#[derive(Debug, Clone, PartialEq)]
pub struct LockEntry {
    pub owner: SessionId,
    pub pending: Value,
    pub original: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// `fresh` is false when the caller already owned the position.
    Claimed { fresh: bool },
    AlreadyLocked { owner: SessionId },
}

impl Claim {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Claim::Claimed { .. })
    }
}

type DatasetLocks = Arc<Mutex<HashMap<u32, LockEntry>>>;

/// In-flight record locks, keyed by dataset and position.
///
/// Shared between the write sessions of a process as
/// `Arc<LockCoordinator>`. Each dataset has its own mutex, so contention on
/// one dataset never blocks another. The outer table lock is always taken
/// before a dataset lock.
pub struct LockCoordinator {
    table: RwLock<HashMap<String, DatasetLocks>>,
    commits: Mutex<()>,
    next_session: AtomicU64,
}

impl LockCoordinator {
    pub fn new() -> Self {
        LockCoordinator {
            table: RwLock::new(HashMap::new()),
            commits: Mutex::new(()),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::SeqCst))
    }

    /// Held across a header restamp so two sessions committing the same
    /// file cannot interleave header and mtime writes.
    pub fn commit_guard(&self) -> MutexGuard<'_, ()> {
        self.commits.lock()
    }

    /// Atomically claim `position` for `owner`.
    ///
    /// An unlocked position is recorded as `(pending, read_original(position))`.
    /// A position held by another session is left untouched. Re-claiming an
    /// owned position changes nothing: the caller publishes its new pending
    /// value with `update_pending` once the whole call has staged.
    pub fn try_claim<F>(
        &self,
        key: &str,
        owner: SessionId,
        position: u32,
        pending: Value,
        read_original: F,
    ) -> Result<Claim>
    where
        F: FnOnce(u32) -> Result<Value>,
    {
        {
            let table = self.table.read();
            if let Some(locks) = table.get(key) {
                let mut locks = locks.lock();
                return Self::claim_in(&mut locks, key, owner, position, pending, read_original);
            }
        }

        let mut table = self.table.write();
        let locks = table.entry(key.to_string()).or_default().clone();
        let mut guard = locks.lock();
        let claim = Self::claim_in(&mut guard, key, owner, position, pending, read_original);
        if guard.is_empty() {
            drop(guard);
            table.remove(key);
        }
        claim
    }

    fn claim_in<F>(
        locks: &mut HashMap<u32, LockEntry>,
        key: &str,
        owner: SessionId,
        position: u32,
        pending: Value,
        read_original: F,
    ) -> Result<Claim>
    where
        F: FnOnce(u32) -> Result<Value>,
    {
        if let Some(entry) = locks.get(&position) {
            if entry.owner != owner {
                return Ok(Claim::AlreadyLocked { owner: entry.owner });
            }
            return Ok(Claim::Claimed { fresh: false });
        }

        let original = read_original(position)?;
        debug!(key, position, session = owner.0, "claimed position");
        locks.insert(position, LockEntry { owner, pending, original });
        Ok(Claim::Claimed { fresh: true })
    }

    /// Replace the pending value of positions `owner` already holds.
    /// Positions owned by another session, or not claimed, are skipped.
    pub fn update_pending(&self, key: &str, owner: SessionId, updates: &[(u32, Value)]) {
        if updates.is_empty() {
            return;
        }
        let table = self.table.read();
        let Some(locks) = table.get(key) else {
            return;
        };
        let mut locks = locks.lock();
        for (position, pending) in updates {
            if let Some(entry) = locks.get_mut(position).filter(|entry| entry.owner == owner) {
                entry.pending = pending.clone();
            }
        }
    }

    /// Drop `owner`'s claims on `positions`. The dataset entry goes away
    /// once no claims remain.
    pub fn release(&self, key: &str, owner: SessionId, positions: &[u32]) {
        if positions.is_empty() {
            return;
        }
        let mut table = self.table.write();
        let Some(locks) = table.get(key).cloned() else {
            return;
        };
        let now_empty = {
            let mut locks = locks.lock();
            for position in positions {
                if locks.get(position).is_some_and(|entry| entry.owner == owner) {
                    locks.remove(position);
                }
            }
            locks.is_empty()
        };
        if now_empty {
            table.remove(key);
        }
        debug!(key, released = positions.len(), session = owner.0, "released positions");
    }

    /// Position -> original value, for every claim on the dataset.
    pub fn snapshot_originals(&self, key: &str) -> BTreeMap<u32, Value> {
        self.snapshot_with(key, |_| true)
    }

    /// Position -> original value, for `owner`'s claims only.
    pub fn originals_owned_by(&self, key: &str, owner: SessionId) -> BTreeMap<u32, Value> {
        self.snapshot_with(key, |entry| entry.owner == owner)
    }

    fn snapshot_with<F>(&self, key: &str, keep: F) -> BTreeMap<u32, Value>
    where
        F: Fn(&LockEntry) -> bool,
    {
        let table = self.table.read();
        let Some(locks) = table.get(key) else {
            return BTreeMap::new();
        };
        let locks = locks.lock();
        locks
            .iter()
            .filter(|(_, entry)| keep(entry))
            .map(|(position, entry)| (*position, entry.original.clone()))
            .collect()
    }

    pub fn entry(&self, key: &str, position: u32) -> Option<LockEntry> {
        let table = self.table.read();
        let locks = table.get(key)?;
        let entry = locks.lock().get(&position).cloned();
        entry
    }

    pub fn is_locked(&self, key: &str, position: u32) -> bool {
        self.entry(key, position).is_some()
    }

    /// Datasets with at least one claim.
    pub fn dataset_count(&self) -> usize {
        self.table.read().len()
    }
}

impl Default for LockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
