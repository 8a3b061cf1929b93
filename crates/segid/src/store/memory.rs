use crate::{CounterStore, Error, Result, SettingsStore};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Per-operation call counts recorded by a [`MemoryStore`].
///
/// Only calls that completed successfully are counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub creates: u64,
    pub reads: u64,
    pub increments: u64,
    pub sets: u64,
    pub drops: u64,
}

#[derive(Default)]
struct MemoryState {
    counters: HashMap<String, i64>,
    keys: BTreeSet<String>,
    settings: BTreeMap<String, String>,
    stats: StoreStats,
    failing_increments: usize,
    failing_drops: usize,
}

/// An in-process [`CounterStore`] with the same semantics as
/// [`FjallStore`](crate::FjallStore).
///
/// Nothing is persisted. The store counts successful calls (see
/// [`MemoryStore::stats`]) and can be told to fail upcoming increments, which
/// makes it the store of choice for tests and benchmarks.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the call counters.
    pub fn stats(&self) -> StoreStats {
        self.state.lock().stats
    }

    /// Makes the next `count` calls to [`CounterStore::increment`] fail with
    /// [`Error::Unavailable`] without touching any counter.
    pub fn fail_next_increments(&self, count: usize) {
        self.state.lock().failing_increments = count;
    }

    /// Makes the next `count` calls to [`CounterStore::drop_counter`] fail
    /// with [`Error::Unavailable`] without removing anything.
    pub fn fail_next_drops(&self, count: usize) {
        self.state.lock().failing_drops = count;
    }
}

impl CounterStore for MemoryStore {
    fn create_counter(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.counters.entry(key.to_string()).or_insert(0);
        state.stats.creates += 1;
        Ok(())
    }

    fn counter(&self, key: &str) -> Result<i64> {
        let mut state = self.state.lock();
        let value = *state
            .counters
            .get(key)
            .ok_or_else(|| Error::MissingCounter {
                key: key.to_string(),
            })?;
        state.stats.reads += 1;
        Ok(value)
    }

    fn increment(&self, key: &str, delta: i64) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_increments > 0 {
            state.failing_increments -= 1;
            return Err(Error::Unavailable {
                reason: format!("injected increment failure for `{key}`"),
            });
        }

        let counter = state
            .counters
            .get_mut(key)
            .ok_or_else(|| Error::MissingCounter {
                key: key.to_string(),
            })?;
        *counter = counter.checked_add(delta).ok_or_else(|| Error::Overflow {
            key: key.to_string(),
        })?;
        state.stats.increments += 1;
        Ok(())
    }

    fn set_counter(&self, key: &str, value: i64) -> Result<()> {
        let mut state = self.state.lock();
        let counter = state
            .counters
            .get_mut(key)
            .ok_or_else(|| Error::MissingCounter {
                key: key.to_string(),
            })?;
        *counter = value;
        state.stats.sets += 1;
        Ok(())
    }

    fn drop_counter(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_drops > 0 {
            state.failing_drops -= 1;
            return Err(Error::Unavailable {
                reason: format!("injected drop failure for `{key}`"),
            });
        }
        state.counters.remove(key);
        state.stats.drops += 1;
        Ok(())
    }

    fn insert_known_key(&self, key: &str) -> Result<()> {
        self.state.lock().keys.insert(key.to_string());
        Ok(())
    }

    fn known_keys(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().keys.iter().cloned().collect())
    }

    fn remove_known_key(&self, key: &str) -> Result<()> {
        self.state.lock().keys.remove(key);
        Ok(())
    }
}

impl SettingsStore for MemoryStore {
    fn settings(&self) -> Result<Vec<(String, String)>> {
        Ok(self
            .state
            .lock()
            .settings
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }

    fn save_setting(&self, name: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .settings
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}
