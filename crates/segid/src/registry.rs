use crate::{CounterStore, Error, Result, SegmentAllocator};
use parking_lot::RwLock;
use portable_atomic::{AtomicI64, Ordering};
use std::collections::HashMap;
use std::sync::Arc;

/// A concurrent map from key name to its [`SegmentAllocator`].
///
/// Lookups share a read lock; inserting or removing a key takes the write
/// lock. The map lock is never held while an allocator talks to the store, so
/// a slow refill for one key does not block lookups of any other.
///
/// New allocators are created with the registry's current batch size, which
/// can be changed at runtime with [`set_batch_size`](Self::set_batch_size).
/// Allocators that already exist keep the size they were created with.
pub struct Registry<S> {
    store: Arc<S>,
    batch_size: AtomicI64,
    allocators: RwLock<HashMap<String, Arc<SegmentAllocator<S>>>>,
}

impl<S> Registry<S>
where
    S: CounterStore,
{
    /// Creates an empty registry over `store`.
    ///
    /// # Errors
    /// - [`Error::InvalidBatchSize`] if `batch_size` is not positive.
    pub fn new(store: Arc<S>, batch_size: i64) -> Result<Self> {
        if batch_size <= 0 {
            return Err(Error::InvalidBatchSize(batch_size));
        }

        Ok(Self {
            store,
            batch_size: AtomicI64::new(batch_size),
            allocators: RwLock::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Batch size used for allocators created from now on.
    pub fn batch_size(&self) -> i64 {
        self.batch_size.load(Ordering::Relaxed)
    }

    pub fn set_batch_size(&self, batch_size: i64) -> Result<()> {
        if batch_size <= 0 {
            return Err(Error::InvalidBatchSize(batch_size));
        }
        self.batch_size.store(batch_size, Ordering::Relaxed);
        Ok(())
    }

    /// Looks up the allocator registered for `key`.
    pub fn get(&self, key: &str) -> Option<Arc<SegmentAllocator<S>>> {
        self.allocators.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.allocators.read().contains_key(key)
    }

    /// Returns the allocator for `key`, registering a new one if needed.
    ///
    /// The new allocator starts with an empty segment. Concurrent callers for
    /// the same missing key all receive the same instance.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    pub fn get_or_create(&self, key: &str) -> Result<Arc<SegmentAllocator<S>>> {
        if let Some(allocator) = self.get(key) {
            return Ok(allocator);
        }

        let mut allocators = self.allocators.write();
        // Another caller may have registered the key between the two locks.
        if let Some(allocator) = allocators.get(key) {
            return Ok(Arc::clone(allocator));
        }

        let allocator = Arc::new(SegmentAllocator::new(
            key,
            self.batch_size(),
            Arc::clone(&self.store),
        )?);
        allocators.insert(key.to_string(), Arc::clone(&allocator));

        #[cfg(feature = "tracing")]
        tracing::debug!(key, batch_size = allocator.batch_size(), "registered key");

        Ok(allocator)
    }

    /// Unregisters `key`, returning its allocator if it was registered.
    pub fn remove(&self, key: &str) -> Option<Arc<SegmentAllocator<S>>> {
        self.allocators.write().remove(key)
    }

    /// Registers an allocator for every key in the store's known key set.
    ///
    /// Each key's counter entry is created if it went missing (never reset),
    /// and each allocator starts with an empty segment, so the first
    /// identifier issued after a restart comes from a fresh refill. Keys that
    /// are already registered are left alone.
    ///
    /// Returns the number of allocators registered.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip(self)))]
    pub fn bootstrap(&self) -> Result<usize> {
        let keys = self.store.known_keys()?;
        let batch_size = self.batch_size();
        let mut allocators = self.allocators.write();
        let mut restored = 0;

        for key in keys {
            if key.is_empty() || allocators.contains_key(&key) {
                continue;
            }
            self.store.create_counter(&key)?;
            let allocator =
                SegmentAllocator::new(key.as_str(), batch_size, Arc::clone(&self.store))?;
            allocators.insert(key, Arc::new(allocator));
            restored += 1;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(restored, "bootstrapped registry");

        Ok(restored)
    }

    pub fn len(&self) -> usize {
        self.allocators.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocators.read().is_empty()
    }

    /// Returns the registered key names in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.allocators.read().keys().cloned().collect()
    }
}
