//! Durable counter storage.
//!
//! A [`CounterStore`] holds one counter entry per key plus an independent set
//! of *known keys* that the [`Registry`](crate::Registry) enumerates at
//! start-up. A [`SettingsStore`] keeps named configuration overrides next to
//! the counters so they survive restarts.
//!
//! Stores do not serialize concurrent increments for the same key on their
//! own. Each key's [`SegmentAllocator`](crate::SegmentAllocator) holds its lock
//! across every store call it makes, which makes a single process the only
//! writer for that key.

mod durable;
mod memory;

pub use durable::*;
pub use memory::*;

use crate::Result;

/// Key -> counter storage with a separate set of known keys.
pub trait CounterStore: Send + Sync + 'static {
    /// Creates the counter entry for `key` with value `0` unless it already
    /// exists. Existing values are left untouched.
    fn create_counter(&self, key: &str) -> Result<()>;

    /// Reads the current value of the counter for `key`.
    ///
    /// # Errors
    /// - [`Error::MissingCounter`](crate::Error::MissingCounter) if the entry
    ///   does not exist.
    fn counter(&self, key: &str) -> Result<i64>;

    /// Atomically adds `delta` to the counter for `key`.
    ///
    /// Either the whole increment is durable when this returns `Ok`, or
    /// nothing changed.
    fn increment(&self, key: &str, delta: i64) -> Result<()>;

    /// Overwrites the counter for `key` with `value`.
    fn set_counter(&self, key: &str, value: i64) -> Result<()>;

    /// Removes the counter entry for `key`. Dropping a missing entry is not
    /// an error.
    fn drop_counter(&self, key: &str) -> Result<()>;

    /// Adds `key` to the set of known keys. Idempotent.
    fn insert_known_key(&self, key: &str) -> Result<()>;

    /// Lists every known key.
    fn known_keys(&self) -> Result<Vec<String>>;

    /// Removes `key` from the set of known keys. Idempotent.
    fn remove_known_key(&self, key: &str) -> Result<()>;
}

/// Persisted name -> value configuration overrides.
pub trait SettingsStore: Send + Sync + 'static {
    /// Returns every persisted override.
    fn settings(&self) -> Result<Vec<(String, String)>>;

    /// Persists `value` for `name`, replacing any previous override.
    fn save_setting(&self, name: &str, value: &str) -> Result<()>;
}

/// Encodes a counter value for storage.
pub(crate) const fn encode_counter(value: i64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decodes a stored counter value.
pub(crate) fn decode_counter(key: &str, raw: &[u8]) -> Result<i64> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| crate::Error::CorruptCounter {
        key: key.to_string(),
    })?;
    Ok(i64::from_be_bytes(bytes))
}
