use crate::{
    CounterStore, Error, Result, SettingsStore,
    store::{decode_counter, encode_counter},
};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use parking_lot::Mutex;
use std::path::Path;

const COUNTERS_PARTITION: &str = "counters";
const KEYS_PARTITION: &str = "keys";
const SETTINGS_PARTITION: &str = "settings";

/// A durable [`CounterStore`] backed by a `fjall` keyspace.
///
/// The keyspace holds three partitions:
///
/// - `counters`: key name -> big-endian `i64`, one entry per key.
/// - `keys`: the set of known key names (values are empty).
/// - `settings`: persisted configuration overrides.
///
/// Every write is committed as a single atomic batch and the journal is
/// synced before the call returns, so a reserved segment is on disk before
/// any identifier from it is handed out.
///
/// Counter updates that read before they write (create, increment, set) run
/// under one store-wide lock, so concurrent increments of the same key never
/// lose an update even without a caller holding the key's allocator lock.
pub struct FjallStore {
    keyspace: Keyspace,
    counters: PartitionHandle,
    keys: PartitionHandle,
    settings: PartitionHandle,
    counter_writes: Mutex<()>,
}

impl FjallStore {
    /// Opens (or creates) the keyspace rooted at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let keyspace = Config::new(path).open()?;
        let counters =
            keyspace.open_partition(COUNTERS_PARTITION, PartitionCreateOptions::default())?;
        let keys =
            keyspace.open_partition(KEYS_PARTITION, PartitionCreateOptions::default())?;
        let settings =
            keyspace.open_partition(SETTINGS_PARTITION, PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            counters,
            keys,
            settings,
            counter_writes: Mutex::new(()),
        })
    }

    fn read_counter(&self, key: &str) -> Result<Option<i64>> {
        self.counters
            .get(key)?
            .map(|raw| decode_counter(key, &raw))
            .transpose()
    }

    fn write_counter(&self, key: &str, value: i64) -> Result<()> {
        let mut batch = self.keyspace.batch();
        batch.insert(&self.counters, key, encode_counter(value).to_vec());
        batch.commit()?;
        self.sync()
    }

    fn sync(&self) -> Result<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

impl CounterStore for FjallStore {
    fn create_counter(&self, key: &str) -> Result<()> {
        let _guard = self.counter_writes.lock();
        if self.counters.contains_key(key)? {
            return Ok(());
        }
        self.write_counter(key, 0)
    }

    fn counter(&self, key: &str) -> Result<i64> {
        self.read_counter(key)?.ok_or_else(|| Error::MissingCounter {
            key: key.to_string(),
        })
    }

    fn increment(&self, key: &str, delta: i64) -> Result<()> {
        let _guard = self.counter_writes.lock();
        let current = self.counter(key)?;
        let next = current.checked_add(delta).ok_or_else(|| Error::Overflow {
            key: key.to_string(),
        })?;
        self.write_counter(key, next)
    }

    fn set_counter(&self, key: &str, value: i64) -> Result<()> {
        let _guard = self.counter_writes.lock();
        if !self.counters.contains_key(key)? {
            return Err(Error::MissingCounter {
                key: key.to_string(),
            });
        }
        self.write_counter(key, value)
    }

    fn drop_counter(&self, key: &str) -> Result<()> {
        let _guard = self.counter_writes.lock();
        self.counters.remove(key)?;
        self.sync()
    }

    fn insert_known_key(&self, key: &str) -> Result<()> {
        self.keys.insert(key, Vec::<u8>::new())?;
        self.sync()
    }

    fn known_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for item in self.keys.iter() {
            let (key, _) = item?;
            if !key.is_empty() {
                keys.push(String::from_utf8_lossy(&key).into_owned());
            }
        }
        Ok(keys)
    }

    fn remove_known_key(&self, key: &str) -> Result<()> {
        self.keys.remove(key)?;
        self.sync()
    }
}

impl SettingsStore for FjallStore {
    fn settings(&self) -> Result<Vec<(String, String)>> {
        let mut settings = Vec::new();
        for item in self.settings.iter() {
            let (name, value) = item?;
            settings.push((
                String::from_utf8_lossy(&name).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            ));
        }
        Ok(settings)
    }

    fn save_setting(&self, name: &str, value: &str) -> Result<()> {
        self.settings.insert(name, value)?;
        self.sync()
    }
}
