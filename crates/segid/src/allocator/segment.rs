use crate::{CounterStore, Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// The in-memory window of identifiers a [`SegmentAllocator`] serves from.
///
/// `cur` is the last identifier handed out and `max` the highest identifier
/// already reserved in the store. `cur <= max` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Segment {
    cur: i64,
    max: i64,
}

impl Segment {
    const fn is_exhausted(&self) -> bool {
        self.cur >= self.max
    }
}

/// A per-key allocator of strictly increasing 64-bit identifiers.
///
/// Identifiers are reserved from a [`CounterStore`] in segments of
/// `batch_size`. A refill reads the durable counter `v`, advances it by
/// `batch_size`, and adopts `(v, v + batch_size]` as the new segment. Every
/// other call to [`next_id`](Self::next_id) is served from memory.
///
/// All operations take the allocator's lock for their whole duration,
/// including any store I/O, so operations on one key are totally ordered
/// while different keys never contend.
///
/// ## Restart behavior
///
/// A fresh allocator starts with an empty segment (`cur == max == 0`), so its
/// first [`next_id`](Self::next_id) always refills. Identifiers reserved but
/// not handed out by a previous process are skipped, never reissued.
pub struct SegmentAllocator<S> {
    key: String,
    batch_size: i64,
    store: Arc<S>,
    segment: Mutex<Segment>,
}

impl<S> SegmentAllocator<S>
where
    S: CounterStore,
{
    /// Creates an allocator for `key` with an empty segment.
    ///
    /// No store I/O happens here; the counter entry is expected to exist (see
    /// [`reset`](Self::reset) and [`Registry::bootstrap`]).
    ///
    /// # Errors
    /// - [`Error::EmptyKey`] if `key` is empty.
    /// - [`Error::InvalidBatchSize`] if `batch_size` is not positive.
    ///
    /// [`Registry::bootstrap`]: crate::Registry::bootstrap
    pub fn new(key: impl Into<String>, batch_size: i64, store: Arc<S>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if batch_size <= 0 {
            return Err(Error::InvalidBatchSize(batch_size));
        }

        Ok(Self {
            key,
            batch_size,
            store,
            segment: Mutex::new(Segment::default()),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub const fn batch_size(&self) -> i64 {
        self.batch_size
    }

    /// Returns the next identifier for this key.
    ///
    /// The fast path increments the in-memory cursor. When the segment is
    /// exhausted the allocator refills from the store first; if any store call
    /// fails the segment is left exactly as it was and the error is returned,
    /// so the call can be retried.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "trace", skip(self), fields(key = %self.key))
    )]
    pub fn next_id(&self) -> Result<i64> {
        let mut segment = self.segment.lock();
        if segment.is_exhausted() {
            *segment = self.refill()?;
        }
        segment.cur += 1;
        Ok(segment.cur)
    }

    /// Returns the last identifier handed out, without touching the store.
    pub fn current(&self) -> i64 {
        self.segment.lock().cur
    }

    /// Returns the highest identifier reserved in the store for the current
    /// segment.
    pub fn reserved(&self) -> i64 {
        self.segment.lock().max
    }

    /// Moves the counter to `value`.
    ///
    /// With `force`, the counter entry is dropped and recreated first so no
    /// previous state survives. Either way the durable counter ends at
    /// `value` and the in-memory segment collapses to `cur == max == value`;
    /// the next [`next_id`](Self::next_id) refills and returns `value + 1`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self), fields(key = %self.key))
    )]
    pub fn reset(&self, value: i64, force: bool) -> Result<()> {
        let mut segment = self.segment.lock();
        if force {
            self.store.drop_counter(&self.key)?;
        }
        self.store.create_counter(&self.key)?;
        self.store.set_counter(&self.key, value)?;
        *segment = Segment {
            cur: value,
            max: value,
        };
        Ok(())
    }

    /// Drops the durable counter for this key.
    ///
    /// Removing the allocator from its registry and the key from the known
    /// key set is up to the caller.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip(self), fields(key = %self.key))
    )]
    pub fn delete(&self) -> Result<()> {
        let _segment = self.segment.lock();
        self.store.drop_counter(&self.key)
    }

    fn refill(&self) -> Result<Segment> {
        let base = self.store.counter(&self.key)?;
        let max = base
            .checked_add(self.batch_size)
            .ok_or_else(|| Error::Overflow {
                key: self.key.clone(),
            })?;
        self.store.increment(&self.key, self.batch_size)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, base, max, "refilled segment");

        Ok(Segment { cur: base, max })
    }
}
