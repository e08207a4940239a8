//! Per-entity advisory locks
//!
//! At most one hypothesis-mutating operation may be in flight per event or
//! signal detection id, including across the awaited external service calls.
//! Locks for several ids are always taken in sorted order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Lock key for an event id
pub fn event_key(event_id: &str) -> String {
    format!("event:{}", event_id)
}

/// Lock key for a signal detection id
pub fn detection_key(detection_id: &str) -> String {
    format!("sd:{}", detection_id)
}

#[derive(Debug, Default)]
pub struct EntityLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held locks; released on drop
#[derive(Debug)]
pub struct EntityGuard {
    keys: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl EntityGuard {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn covers(&self, keys: &[String]) -> bool {
        keys.iter().all(|k| self.keys.binary_search(k).is_ok())
    }
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the locks for every key
    pub async fn acquire<I>(&self, keys: I) -> EntityGuard
    where
        I: IntoIterator<Item = String>,
    {
        let mut keys: Vec<String> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // slots nobody holds or waits on
            slots.retain(|_, m| Arc::strong_count(m) > 1);
            keys.iter()
                .map(|k| slots.entry(k.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        EntityGuard {
            keys,
            _guards: guards,
        }
    }

    /// Number of keys currently tracked (held or awaited)
    pub fn tracked(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|m| Arc::strong_count(m) > 1).count()
    }
}
