//! Cache Rows
//!
//! A row holds every validity window cached for one row identity, ordered
//! most recent first. Rows register each of their entries with the shared
//! [`UsageRegistry`] and subscribe to evictions of their own entries.
//!
//! # Lock Tiers
//!
//! ```text
//!  tier: RwLock<()>   shared   : get, put
//!                     exclusive: write_through (narrow + replace), rollback, detach
//!  entries: SkipMap   lock-free; readers never wait for each other
//! ```
//!
//! Every change to `entries` that also changes registrations runs inside
//! [`UsageRegistry::update`], so an eviction never observes an entry without
//! its registration or the other way round. The eviction listener only removes
//! from `entries` and takes no lock at all.

use crate::entry::{CacheGetResult, RangedResult};
use crate::metrics::CacheStatistics;
use crate::period::Period;
use crate::registry::{ListenerId, Usage, UsageRegistry};
use crossbeam_skiplist::SkipMap;
use log::{debug, trace};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Registry element identifying one cached entry: its row plus its period.
///
/// Rows are compared by allocation, not by value, so a row detached by
/// `clear` never shares registry nodes with its successor.
#[derive(Clone, Debug)]
pub(crate) struct CachedRange<R> {
    row: Arc<R>,
    period: Period,
}

impl<R> PartialEq for CachedRange<R> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.row, &other.row) && self.period == other.period
    }
}

impl<R> Eq for CachedRange<R> {}

impl<R> Hash for CachedRange<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.row).hash(state);
        self.period.hash(state);
    }
}

impl<R> CachedRange<R> {
    pub(crate) fn row(&self) -> &Arc<R> {
        &self.row
    }
}

/// The registry shared by every row of one cache; topics are row identities.
pub(crate) type SharedRegistry<R> = Arc<UsageRegistry<CachedRange<R>, Arc<R>>>;

/// Registration sink for one row operation. A detached row records nothing.
enum Tracker<'u, 's, R> {
    Attached(&'u mut Usage<'s, CachedRange<R>>),
    Detached,
}

impl<R: Clone> Tracker<'_, '_, R> {
    fn register(&mut self, element: CachedRange<R>) {
        if let Tracker::Attached(usage) = self {
            usage.register(element);
        }
    }

    fn forget(&mut self, element: &CachedRange<R>) {
        if let Tracker::Attached(usage) = self {
            usage.remove(element);
        }
    }
}

/// Validity windows cached for one row identity.
///
/// Entries are keyed strictly on their period bounds. `Reverse` makes the map
/// iterate by descending lower bound, ties broken by descending upper bound.
pub(crate) struct CacheRow<R, V>
where
    R: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    id: Arc<R>,
    tier: RwLock<()>,
    entries: SkipMap<Reverse<Period>, V>,
    detached: AtomicBool,
    registry: SharedRegistry<R>,
    statistics: Arc<CacheStatistics>,
    listener: ListenerId,
}

impl<R, V> CacheRow<R, V>
where
    R: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty row and subscribes it to evictions of its own entries.
    ///
    /// The listener lives exactly as long as the row.
    pub(crate) fn create(
        id: Arc<R>,
        registry: SharedRegistry<R>,
        statistics: Arc<CacheStatistics>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|row: &Weak<Self>| {
            let owner = row.clone();
            let listener =
                registry.add_listener(Some(Arc::clone(&id)), move |evicted: &CachedRange<R>| {
                    match owner.upgrade() {
                        Some(row) if Arc::ptr_eq(&row.id, evicted.row()) => {
                            row.evict(evicted.period)
                        }
                        _ => {}
                    }
                });
            CacheRow {
                id,
                tier: RwLock::new(()),
                entries: SkipMap::new(),
                detached: AtomicBool::new(false),
                registry,
                statistics,
                listener,
            }
        })
    }

    pub(crate) fn id(&self) -> &R {
        &self.id
    }

    /// Looks up the entry valid at `timestamp`.
    ///
    /// A hit promotes the entry in the registry and counts as a hit; anything
    /// else yields the shared miss and counts as a miss.
    pub(crate) fn get(&self, timestamp: i64) -> CacheGetResult<V> {
        let _shared = self.tier.read();
        // starts at the most recent entry with lower <= timestamp
        let found = self
            .entries
            .range(Reverse(Period::open_ended_from(timestamp))..)
            .find(|entry| entry.key().0.contains(timestamp))
            .map(|entry| (entry.key().0, entry.value().clone()));

        match found {
            Some((period, value)) => {
                self.registry.touch(&self.element(period));
                self.statistics.record_hit();
                trace!("cache hit at {} in {}", timestamp, period);
                CacheGetResult::hit(value, period.lower())
            }
            None => {
                self.statistics.record_miss();
                trace!("cache miss at {}", timestamp);
                CacheGetResult::miss()
            }
        }
    }

    /// Caches `result`, skipping empty periods.
    ///
    /// An entry with exactly the same period bounds is overwritten.
    pub(crate) fn put(&self, result: RangedResult<V>) {
        let (_, value, period) = result.into_parts();
        if period.is_empty() {
            return;
        }

        let _shared = self.tier.read();
        let replaced = self.tracked(|tracker| {
            let replaced = self.entries.contains_key(&Reverse(period));
            self.entries.insert(Reverse(period), value);
            tracker.register(self.element(period));
            replaced
        });
        if replaced {
            trace!("overwrote cached entry {}", period);
        }
    }

    /// Records that `value` became valid at `timestamp`.
    ///
    /// The most recent entry, if still open past `timestamp`, is narrowed to
    /// end at `timestamp` (or dropped when nothing of it would remain), then
    /// `[timestamp, +∞) → value` is inserted. `timestamp` must lie below
    /// [`Period::INFINITY`].
    pub(crate) fn write_through(&self, timestamp: i64, value: V) {
        let _exclusive = self.tier.write();

        let opened = Period::open_ended_from(timestamp);
        let (replaced, narrowed) = self.tracked(|tracker| {
            let head = self
                .entries
                .front()
                .map(|entry| entry.key().0)
                .filter(|head| head.upper() > timestamp);
            let mut narrowed = None;
            if let Some(head) = head {
                if let Some(previous) = self.entries.remove(&Reverse(head)) {
                    tracker.forget(&self.element(head));
                    match head.with_upper_bound(timestamp) {
                        Ok(period) if !period.is_empty() => {
                            self.entries.insert(Reverse(period), previous.value().clone());
                            tracker.register(self.element(period));
                            narrowed = Some(period);
                        }
                        _ => {}
                    }
                }
            }
            self.entries.insert(Reverse(opened), value);
            tracker.register(self.element(opened));
            (head, narrowed)
        });

        if let Some(head) = replaced {
            debug!("narrowed {} to {:?} at {}", head, narrowed, timestamp);
        }
        self.statistics.record_write_through();
    }

    /// Drops every entry that contains `timestamp` or lies entirely after it.
    ///
    /// Returns the number of discarded entries.
    pub(crate) fn rollback_to_timestamp(&self, timestamp: i64) -> usize {
        let _exclusive = self.tier.write();

        let discarded = self.tracked(|tracker| {
            let doomed: Vec<Period> = self
                .entries
                .iter()
                .map(|entry| entry.key().0)
                .filter(|period| period.is_after(timestamp) || period.contains(timestamp))
                .collect();
            for period in &doomed {
                self.entries.remove(&Reverse(*period));
                tracker.forget(&self.element(*period));
            }
            doomed.len()
        });

        if discarded > 0 {
            self.statistics.record_rollback(discarded as u64);
            debug!("rollback to {} discarded {} entries", timestamp, discarded);
        }
        discarded
    }

    /// Stops this row from touching the registry.
    ///
    /// Waits for operations in flight, so once this returns nothing this row
    /// does can reach the registry again.
    pub(crate) fn detach(&self) {
        let _exclusive = self.tier.write();
        self.detached.store(true, Ordering::Release);
    }

    pub(crate) fn size(&self) -> usize {
        self.entries.len()
    }

    /// Runs `apply` atomically with respect to evictions, or without any
    /// registry involvement once the row is detached.
    ///
    /// Callers hold the tier, so the detached flag cannot change underneath.
    fn tracked<O>(&self, apply: impl FnOnce(&mut Tracker<'_, '_, R>) -> O) -> O {
        if self.detached.load(Ordering::Acquire) {
            return apply(&mut Tracker::Detached);
        }
        self.registry
            .update(|usage| apply(&mut Tracker::Attached(usage)))
    }

    /// Eviction callback. Runs under the registry lock and takes no lock.
    fn evict(&self, period: Period) {
        if self.entries.remove(&Reverse(period)).is_some() {
            self.statistics.record_eviction();
            trace!("evicted cached entry {}", period);
        }
    }

    fn element(&self, period: Period) -> CachedRange<R> {
        CachedRange {
            row: Arc::clone(&self.id),
            period,
        }
    }
}

impl<R, V> Drop for CacheRow<R, V>
where
    R: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.registry.remove_listener(Some(&self.id), self.listener);
    }
}

impl<R, V> fmt::Debug for CacheRow<R, V>
where
    R: Hash + Eq + Clone + Send + Sync + fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRow")
            .field("id", &self.id)
            .field("len", &self.size())
            .field("detached", &self.detached.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::QualifiedKey;

    type TestRow = CacheRow<&'static str, &'static str>;

    fn setup() -> (
        Arc<TestRow>,
        SharedRegistry<&'static str>,
        Arc<CacheStatistics>,
    ) {
        let registry: SharedRegistry<&'static str> =
            Arc::new(UsageRegistry::new(|element: &CachedRange<&'static str>| {
                Arc::clone(element.row())
            }));
        let statistics = Arc::new(CacheStatistics::new());
        let row = CacheRow::create(
            Arc::new("row"),
            Arc::clone(&registry),
            Arc::clone(&statistics),
        );
        (row, registry, statistics)
    }

    fn ranged(value: &'static str, lower: i64, upper: i64) -> RangedResult<&'static str> {
        RangedResult::new(
            QualifiedKey::new("default", "Hello"),
            value,
            Period::create_range(lower, upper).unwrap(),
        )
    }

    fn value_at(row: &TestRow, timestamp: i64) -> Option<&'static str> {
        row.get(timestamp).into_option()
    }

    #[test]
    fn test_get_respects_half_open_bounds() {
        let (row, _, statistics) = setup();
        row.put(ranged("World", 100, 200));

        assert_eq!(value_at(&row, 99), None);
        assert_eq!(value_at(&row, 100), Some("World"));
        assert_eq!(value_at(&row, 199), Some("World"));
        assert_eq!(value_at(&row, 200), None);
        assert_eq!(statistics.hits(), 2);
        assert_eq!(statistics.misses(), 2);
    }

    #[test]
    fn test_hit_reports_valid_from() {
        let (row, _, _) = setup();
        row.put(ranged("World", 100, 200));
        assert_eq!(row.get(150).valid_from(), Ok(100));
    }

    #[test]
    fn test_multiple_entries() {
        let (row, registry, _) = setup();
        row.put(ranged("World", 100, 200));
        row.put(ranged("Foo", 200, 500));

        assert_eq!(row.size(), 2);
        assert_eq!(registry.size(), 2);
        assert_eq!(value_at(&row, 150), Some("World"));
        assert_eq!(value_at(&row, 200), Some("Foo"));
        assert_eq!(value_at(&row, 499), Some("Foo"));
        assert_eq!(value_at(&row, 550), None);
    }

    #[test]
    fn test_empty_period_is_skipped() {
        let (row, registry, _) = setup();
        row.put(ranged("World", 100, 100));
        assert_eq!(row.size(), 0);
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_duplicate_period_overwrites() {
        let (row, registry, _) = setup();
        row.put(ranged("World", 100, 200));
        row.put(ranged("Foo", 100, 200));

        assert_eq!(row.size(), 1);
        assert_eq!(registry.size(), 1);
        assert_eq!(value_at(&row, 150), Some("Foo"));
    }

    #[test]
    fn test_write_through_narrows_open_entry() {
        let (row, registry, statistics) = setup();
        row.put(RangedResult::new(
            QualifiedKey::new("default", "Hello"),
            "World",
            Period::create_open_ended(100).unwrap(),
        ));

        row.write_through(200, "Foo");

        assert_eq!(row.size(), 2);
        assert_eq!(registry.size(), 2);
        assert_eq!(value_at(&row, 150), Some("World"));
        assert_eq!(value_at(&row, 199), Some("World"));
        assert_eq!(value_at(&row, 200), Some("Foo"));
        assert_eq!(value_at(&row, 10_000), Some("Foo"));
        assert_eq!(statistics.write_throughs(), 1);
    }

    #[test]
    fn test_write_through_on_empty_row() {
        let (row, _, _) = setup();
        row.write_through(100, "World");
        assert_eq!(row.size(), 1);
        assert_eq!(value_at(&row, 99), None);
        assert_eq!(value_at(&row, 100), Some("World"));
    }

    #[test]
    fn test_write_through_leaves_closed_head_alone() {
        let (row, _, _) = setup();
        row.put(ranged("World", 100, 200));
        row.write_through(300, "Foo");

        assert_eq!(row.size(), 2);
        assert_eq!(value_at(&row, 150), Some("World"));
        assert_eq!(value_at(&row, 250), None);
        assert_eq!(value_at(&row, 300), Some("Foo"));
    }

    #[test]
    fn test_write_through_at_head_start_replaces_head() {
        let (row, registry, _) = setup();
        row.write_through(100, "World");
        row.write_through(100, "Foo");

        assert_eq!(row.size(), 1);
        assert_eq!(registry.size(), 1);
        assert_eq!(value_at(&row, 100), Some("Foo"));
    }

    #[test]
    fn test_successive_write_throughs_chain() {
        let (row, registry, _) = setup();
        row.write_through(100, "a");
        row.write_through(200, "b");
        row.write_through(300, "c");

        assert_eq!(row.size(), 3);
        assert_eq!(registry.size(), 3);
        assert_eq!(value_at(&row, 150), Some("a"));
        assert_eq!(value_at(&row, 250), Some("b"));
        assert_eq!(value_at(&row, 350), Some("c"));
    }

    #[test]
    fn test_rollback_discards_straddling_and_later_entries() {
        let (row, registry, statistics) = setup();
        row.put(ranged("old", 0, 100));
        row.write_through(100, "World");
        row.write_through(200, "Foo");

        assert_eq!(row.rollback_to_timestamp(150), 2);

        assert_eq!(row.size(), 1);
        assert_eq!(registry.size(), 1);
        assert_eq!(value_at(&row, 50), Some("old"));
        assert_eq!(value_at(&row, 120), None);
        assert_eq!(value_at(&row, 250), None);
        assert_eq!(statistics.rollbacks(), 2);
    }

    #[test]
    fn test_rollback_keeps_entry_ending_at_timestamp() {
        let (row, _, _) = setup();
        row.put(ranged("World", 100, 150));
        assert_eq!(row.rollback_to_timestamp(150), 0);
        assert_eq!(value_at(&row, 120), Some("World"));
    }

    #[test]
    fn test_eviction_removes_entry_from_row() {
        let (row, registry, statistics) = setup();
        row.put(ranged("World", 100, 200));
        row.put(ranged("Foo", 200, 300));

        // "World" is least recently used
        registry.remove_least_recently_used_element();

        assert_eq!(row.size(), 1);
        assert_eq!(value_at(&row, 150), None);
        assert_eq!(value_at(&row, 250), Some("Foo"));
        assert_eq!(statistics.evictions(), 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let (row, registry, _) = setup();
        row.put(ranged("World", 100, 200));
        row.put(ranged("Foo", 200, 300));
        assert_eq!(value_at(&row, 150), Some("World"));

        registry.remove_least_recently_used_element();

        assert_eq!(value_at(&row, 150), Some("World"));
        assert_eq!(value_at(&row, 250), None);
    }

    #[test]
    fn test_detached_row_keeps_serving_without_registry() {
        let (row, registry, _) = setup();
        row.put(ranged("World", 100, 200));
        row.detach();
        registry.clear();

        row.put(ranged("Foo", 200, 300));
        row.write_through(400, "Bar");

        assert_eq!(row.size(), 3);
        assert_eq!(registry.size(), 0);
        assert_eq!(value_at(&row, 250), Some("Foo"));
        assert_eq!(value_at(&row, 500), Some("Bar"));
    }

    #[test]
    fn test_eviction_and_put_agree_on_registry_size() {
        let (row, registry, _) = setup();
        let writer = {
            let row = Arc::clone(&row);
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    let lower = (i % 50) * 10;
                    row.put(ranged("v", lower, lower + 10));
                }
            })
        };
        for _ in 0..2_000 {
            registry.remove_least_recently_used_until_size_is(5);
        }
        writer.join().expect("Thread panicked");

        assert_eq!(row.size(), registry.size());
    }

    #[test]
    fn test_listener_lives_as_long_as_row() {
        let (row, registry, _) = setup();
        assert_eq!(registry.listener_count(), 1);
        assert_eq!(*row.id(), "row");
        drop(row);
        assert_eq!(registry.listener_count(), 0);
    }
}
