//! In-process exclusive locks keyed by project or specification.
//!
//! # Responsibility
//! - Serialize mutations of the same specification (and project cascades)
//!   across worker threads sharing one `SpecLocks`.
//!
//! # Invariants
//! - Acquisition waits at most the given duration; it never blocks forever.
//! - Multi-key acquisition takes keys in `LockKey` order (projects before
//!   specifications, ascending ids), so two callers cannot deadlock.
//! - A slot with no holder and no waiter is removed on release; the
//!   registry does not grow with the number of specifications ever touched.

use crate::model::entities::{ProjectId, SpecId};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lockable scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Project(ProjectId),
    Specification(SpecId),
}

impl Display for LockKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project(id) => write!(f, "project:{id}"),
            Self::Specification(id) => write!(f, "specification:{id}"),
        }
    }
}

/// Lock could not be taken within the allowed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeout {
    pub key: LockKey,
    pub waited: Duration,
}

impl Display for LockTimeout {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "timed out after {}ms waiting for lock {}",
            self.waited.as_millis(),
            self.key
        )
    }
}

impl Error for LockTimeout {}

#[derive(Default)]
struct LockSlot {
    held: Mutex<bool>,
    released: Condvar,
}

impl LockSlot {
    fn acquire_until(&self, deadline: Instant) -> bool {
        let mut held = self.held.lock();
        while *held {
            if self.released.wait_until(&mut held, deadline).timed_out() && *held {
                return false;
            }
        }
        *held = true;
        true
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }
}

/// Registry of lock slots shared by all coordinators of one runtime.
#[derive(Default)]
pub struct SpecLocks {
    slots: Mutex<HashMap<LockKey, Arc<LockSlot>>>,
}

impl SpecLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every key in `keys`, waiting at most `wait` in total.
    ///
    /// On timeout, keys taken so far are released before returning.
    pub fn acquire(&self, keys: &[LockKey], wait: Duration) -> Result<LockSet<'_>, LockTimeout> {
        LockSet {
            registry: self,
            held: Vec::with_capacity(keys.len()),
        }
        .extend(keys, wait)
    }

    /// Number of slots currently tracked.
    pub fn tracked_len(&self) -> usize {
        self.slots.lock().len()
    }

    fn slot(&self, key: LockKey) -> Arc<LockSlot> {
        Arc::clone(self.slots.lock().entry(key).or_default())
    }

    fn prune(&self, keys: &[LockKey]) {
        let mut slots = self.slots.lock();
        for key in keys {
            if slots
                .get(key)
                .is_some_and(|slot| Arc::strong_count(slot) == 1)
            {
                slots.remove(key);
            }
        }
    }
}

/// Held locks; released in reverse acquisition order on drop.
pub struct LockSet<'a> {
    registry: &'a SpecLocks,
    held: Vec<(LockKey, Arc<LockSlot>)>,
}

impl LockSet<'_> {
    pub fn keys(&self) -> Vec<LockKey> {
        self.held.iter().map(|(key, _)| *key).collect()
    }

    /// Adds `keys` to the held set, waiting at most `wait` in total.
    ///
    /// New keys must sort after every held key. On timeout the whole set,
    /// including keys held before the call, is released.
    pub fn extend(mut self, keys: &[LockKey], wait: Duration) -> Result<Self, LockTimeout> {
        let mut ordered = keys
            .iter()
            .copied()
            .filter(|key| self.held.iter().all(|(held, _)| held != key))
            .collect::<Vec<_>>();
        ordered.sort_unstable();
        ordered.dedup();
        debug_assert!(
            match (self.held.last(), ordered.first()) {
                (Some((last, _)), Some(first)) => first > last,
                _ => true,
            },
            "lock keys must be taken in ascending order"
        );

        let started = Instant::now();
        let deadline = started + wait;
        for key in ordered {
            let slot = self.registry.slot(key);
            if !slot.acquire_until(deadline) {
                drop(slot);
                self.registry.prune(&[key]);
                return Err(LockTimeout {
                    key,
                    waited: started.elapsed(),
                });
            }
            self.held.push((key, slot));
        }
        Ok(self)
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        let mut released = Vec::with_capacity(self.held.len());
        while let Some((key, slot)) = self.held.pop() {
            slot.release();
            released.push(key);
        }
        self.registry.prune(&released);
    }
}
