//! Least Recently Used (LRU) Usage Registry
//!
//! A thread-safe recency tracker over arbitrary elements. The registry itself
//! stores nothing but the elements' identities; owners of the real data
//! subscribe as listeners and are told when one of their elements falls off
//! the least recently used end.
//!
//! # Structure
//!
//! ```text
//!  index: HashMap<E, *mut Node<E>>
//!          │
//!          ▼
//!  head ⇄ [MRU] ⇄ [ ] ⇄ [ ] ⇄ [LRU] ⇄ tail
//!                                  │ remove_least_recently_used_element()
//!                                  ▼
//!                        topic_of(element) ──▶ global listeners, then
//!                                              listeners of that topic
//! ```
//!
//! Registering and promoting an element are O(1): the index reaches the node
//! directly and the list relinks it behind the head sentinel.
//!
//! # Listener Contract
//!
//! Listeners run synchronously on the evicting thread *while the registry lock
//! is held*. They must be short, must not block, and must never call back into
//! the registry that notifies them, except for
//! [`remove_listener`](UsageRegistry::remove_listener): a removal requested
//! while a notification is in progress is buffered and applied as soon as the
//! notification completes.

use crate::list::{List, Node};
use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::hash::Hash;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// Callback invoked with every element evicted from a [`UsageRegistry`].
pub type EvictionListener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`UsageRegistry::add_listener`], used to remove it again.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ListenerId(u64);

/// Recency list plus its element index.
///
/// # Safety
///
/// Every pointer in `index` was returned by `list.push_front` and its node is
/// still linked into `list`. Both are only touched behind the registry mutex.
struct RegistryState<E> {
    list: List<E>,
    index: HashMap<E, *mut Node<E>>,
}

// SAFETY: RegistryState owns all nodes its raw pointers point to.
unsafe impl<E: Send> Send for RegistryState<E> {}

// SAFETY: All mutation requires &mut self; shared references cannot cause data races.
unsafe impl<E: Sync> Sync for RegistryState<E> {}

impl<E: Hash + Eq + Clone> RegistryState<E> {
    fn new() -> Self {
        RegistryState {
            list: List::new(),
            index: HashMap::new(),
        }
    }

    /// Inserts or promotes `element`; returns `true` if it was unseen.
    fn register(&mut self, element: E) -> bool {
        if let Some(&node) = self.index.get(&element) {
            // SAFETY: node comes from our index
            unsafe { self.list.move_to_front(node) };
            false
        } else {
            let node = self.list.push_front(element.clone());
            self.index.insert(element, node);
            true
        }
    }

    fn touch(&mut self, element: &E) -> bool {
        match self.index.get(element) {
            Some(&node) => {
                // SAFETY: node comes from our index
                unsafe { self.list.move_to_front(node) };
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, element: &E) -> bool {
        let Some(node) = self.index.remove(element) else {
            return false;
        };
        // SAFETY: node comes from our index and is still linked
        if let Some(node) = unsafe { self.list.remove(node) } {
            // SAFETY: list nodes handed out by push_front are never sigils
            drop(unsafe { node.into_value() });
        }
        true
    }

    fn pop_least_recently_used(&mut self) -> Option<E> {
        let node = self.list.remove_last()?;
        // SAFETY: remove_last never yields a sigil
        let element = unsafe { node.into_value() };
        self.index.remove(&element);
        Some(element)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn clear(&mut self) {
        self.index.clear();
        self.list.clear();
    }
}

type Subscribers<E> = Vec<(ListenerId, EvictionListener<E>)>;

struct ListenerTable<E, T> {
    global: Subscribers<E>,
    by_topic: HashMap<T, Subscribers<E>>,
}

impl<E, T: Hash + Eq> ListenerTable<E, T> {
    fn new() -> Self {
        ListenerTable {
            global: Vec::new(),
            by_topic: HashMap::new(),
        }
    }

    fn insert(&mut self, topic: Option<T>, id: ListenerId, listener: EvictionListener<E>) {
        match topic {
            Some(topic) => self.by_topic.entry(topic).or_default().push((id, listener)),
            None => self.global.push((id, listener)),
        }
    }

    fn remove(&mut self, topic: Option<&T>, id: ListenerId) -> bool {
        match topic {
            None => {
                let before = self.global.len();
                self.global.retain(|(existing, _)| *existing != id);
                before != self.global.len()
            }
            Some(topic) => {
                let Some(subscribers) = self.by_topic.get_mut(topic) else {
                    return false;
                };
                let before = subscribers.len();
                subscribers.retain(|(existing, _)| *existing != id);
                let removed = before != subscribers.len();
                if subscribers.is_empty() {
                    self.by_topic.remove(topic);
                }
                removed
            }
        }
    }

    fn len(&self) -> usize {
        self.global.len() + self.by_topic.values().map(Vec::len).sum::<usize>()
    }

    fn clear(&mut self) {
        self.global.clear();
        self.by_topic.clear();
    }
}

struct NotificationState<T> {
    in_progress: bool,
    deferred_removals: Vec<(Option<T>, ListenerId)>,
}

/// A thread-safe LRU tracker with topic-scoped eviction listeners.
///
/// `E` is the tracked element; two equal elements share one node. `T` is the
/// topic an element belongs to, resolved by the function given to
/// [`UsageRegistry::new`] whenever an element is evicted.
///
/// # Examples
///
/// ```
/// use temporal_range_cache::UsageRegistry;
/// use std::sync::{Arc, Mutex};
///
/// // Elements are (owner, item) pairs; the owner is the topic.
/// let registry = UsageRegistry::new(|element: &(&'static str, u32)| element.0);
///
/// let evicted = Arc::new(Mutex::new(Vec::new()));
/// let sink = Arc::clone(&evicted);
/// registry.add_listener(Some("a"), move |element: &(&'static str, u32)| {
///     sink.lock().unwrap().push(element.1);
/// });
///
/// registry.register_usage(("a", 1));
/// registry.register_usage(("b", 2));
/// registry.register_usage(("a", 3));
/// registry.register_usage(("a", 1)); // promote, no duplicate
/// assert_eq!(registry.size(), 3);
///
/// registry.remove_least_recently_used_until_size_is(1);
/// assert_eq!(registry.size(), 1);
/// // ("b", 2) was evicted too, but nobody listens to topic "b"
/// assert_eq!(*evicted.lock().unwrap(), vec![3]);
/// ```
pub struct UsageRegistry<E, T> {
    state: Mutex<RegistryState<E>>,
    listeners: RwLock<ListenerTable<E, T>>,
    notification: Mutex<NotificationState<T>>,
    topic_of: Box<dyn Fn(&E) -> T + Send + Sync>,
    next_listener_id: AtomicU64,
}

impl<E, T> UsageRegistry<E, T>
where
    E: Hash + Eq + Clone,
    T: Hash + Eq + Clone,
{
    /// Creates an empty registry resolving eviction topics with `topic_of`.
    pub fn new<F>(topic_of: F) -> Self
    where
        F: Fn(&E) -> T + Send + Sync + 'static,
    {
        UsageRegistry {
            state: Mutex::new(RegistryState::new()),
            listeners: RwLock::new(ListenerTable::new()),
            notification: Mutex::new(NotificationState {
                in_progress: false,
                deferred_removals: Vec::new(),
            }),
            topic_of: Box::new(topic_of),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Marks `element` as most recently used, inserting it if unseen.
    pub fn register_usage(&self, element: E) {
        let inserted = self.state.lock().register(element);
        trace!("usage registered (new element: {})", inserted);
    }

    /// Promotes `element` to most recently used only if it is already tracked.
    ///
    /// Returns whether the element was found.
    pub fn touch(&self, element: &E) -> bool {
        self.state.lock().touch(element)
    }

    /// Forgets `element` without notifying any listener.
    ///
    /// Used by owners that discard an element themselves. Returns whether the
    /// element was tracked.
    pub fn remove_element(&self, element: &E) -> bool {
        self.state.lock().remove(element)
    }

    /// Whether `element` is currently tracked.
    pub fn contains(&self, element: &E) -> bool {
        self.state.lock().index.contains_key(element)
    }

    /// Runs `apply` with exclusive access to the recency list.
    ///
    /// No eviction can interleave with `apply`, so owners can change their own
    /// data and its registrations as one step. `apply` runs under the registry
    /// lock: the same rules as for listeners apply.
    ///
    /// # Examples
    ///
    /// ```
    /// use temporal_range_cache::UsageRegistry;
    ///
    /// let registry = UsageRegistry::new(|element: &u32| *element % 2);
    /// registry.register_usage(1);
    ///
    /// let replaced = registry.update(|usage| {
    ///     usage.remove(&1);
    ///     usage.register(3);
    ///     usage.register(5);
    ///     usage.len()
    /// });
    /// assert_eq!(replaced, 2);
    /// assert!(!registry.contains(&1));
    /// ```
    pub fn update<F, O>(&self, apply: F) -> O
    where
        F: FnOnce(&mut Usage<'_, E>) -> O,
    {
        let mut state = self.state.lock();
        apply(&mut Usage { state: &mut state })
    }

    /// Evicts the least recently used element and notifies its listeners.
    ///
    /// Returns the evicted element, or `None` if the registry was empty.
    pub fn remove_least_recently_used_element(&self) -> Option<E> {
        let mut state = self.state.lock();
        self.evict_one(&mut state)
    }

    /// Evicts up to `count` elements, least recently used first.
    ///
    /// Returns the number of elements actually evicted.
    pub fn remove_least_recently_used_elements(&self, count: usize) -> usize {
        let mut state = self.state.lock();
        let mut evicted = 0;
        while evicted < count && self.evict_one(&mut state).is_some() {
            evicted += 1;
        }
        if evicted > 0 {
            debug!("evicted {} least recently used elements", evicted);
        }
        evicted
    }

    /// Evicts least recently used elements until at most `target` remain.
    ///
    /// Returns the number of elements evicted.
    pub fn remove_least_recently_used_until_size_is(&self, target: usize) -> usize {
        let mut state = self.state.lock();
        let mut evicted = 0;
        while state.len() > target && self.evict_one(&mut state).is_some() {
            evicted += 1;
        }
        if evicted > 0 {
            debug!(
                "evicted {} least recently used elements down to {}",
                evicted, target
            );
        }
        evicted
    }

    /// Subscribes `listener` to evictions of elements of `topic`.
    ///
    /// A `None` topic subscribes to every eviction. Must not be called from
    /// inside a listener.
    pub fn add_listener<F>(&self, topic: Option<T>, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(topic, id, Arc::new(listener));
        id
    }

    /// Unsubscribes the listener `id` from `topic` (`None` for global).
    ///
    /// While a notification is in progress the removal is buffered and applied
    /// once that notification completes, so this is safe to call from inside
    /// a listener.
    pub fn remove_listener(&self, topic: Option<&T>, id: ListenerId) {
        {
            let mut notification = self.notification.lock();
            if notification.in_progress {
                trace!("deferring removal of listener {:?}", id);
                notification.deferred_removals.push((topic.cloned(), id));
                return;
            }
        }
        self.listeners.write().remove(topic, id);
    }

    /// Number of tracked elements.
    pub fn size(&self) -> usize {
        self.state.lock().len()
    }

    /// Whether no element is tracked.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of registered listeners, global and topic-scoped.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Forgets every element and every listener. Nobody is notified.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.clear();
        self.listeners.write().clear();
        self.notification.lock().deferred_removals.clear();
    }

    /// Pops the tail and notifies global, then topic, listeners.
    ///
    /// Runs with the state lock held by the caller.
    fn evict_one(&self, state: &mut RegistryState<E>) -> Option<E> {
        let element = state.pop_least_recently_used()?;
        let topic = (self.topic_of)(&element);

        let _notifying = Notifying::begin(self);
        let listeners = self.listeners.read();
        for (_, listener) in &listeners.global {
            listener(&element);
        }
        if let Some(subscribers) = listeners.by_topic.get(&topic) {
            for (_, listener) in subscribers {
                listener(&element);
            }
        }
        drop(listeners);

        Some(element)
    }

    fn finish_notification(&self) {
        let deferred = {
            let mut notification = self.notification.lock();
            notification.in_progress = false;
            mem::take(&mut notification.deferred_removals)
        };
        if deferred.is_empty() {
            return;
        }
        let mut listeners = self.listeners.write();
        for (topic, id) in deferred {
            listeners.remove(topic.as_ref(), id);
        }
    }
}

/// Exclusive view of a registry's recency list, handed out by
/// [`UsageRegistry::update`].
pub struct Usage<'a, E> {
    state: &'a mut RegistryState<E>,
}

impl<E: Hash + Eq + Clone> Usage<'_, E> {
    /// Marks `element` as most recently used, inserting it if unseen.
    pub fn register(&mut self, element: E) {
        self.state.register(element);
    }

    /// Forgets `element` without notifying anyone.
    pub fn remove(&mut self, element: &E) -> bool {
        self.state.remove(element)
    }

    /// Number of tracked elements.
    pub fn len(&self) -> usize {
        self.state.len()
    }

    /// Whether no element is tracked.
    pub fn is_empty(&self) -> bool {
        self.state.len() == 0
    }
}

impl<E> fmt::Debug for Usage<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Usage")
            .field("len", &self.state.index.len())
            .finish()
    }
}

/// Marks a notification as in progress for as long as it lives.
///
/// Dropping it applies buffered listener removals, also when a listener panics.
struct Notifying<'a, E, T>
where
    E: Hash + Eq + Clone,
    T: Hash + Eq + Clone,
{
    registry: &'a UsageRegistry<E, T>,
}

impl<'a, E, T> Notifying<'a, E, T>
where
    E: Hash + Eq + Clone,
    T: Hash + Eq + Clone,
{
    fn begin(registry: &'a UsageRegistry<E, T>) -> Self {
        registry.notification.lock().in_progress = true;
        Notifying { registry }
    }
}

impl<E, T> Drop for Notifying<'_, E, T>
where
    E: Hash + Eq + Clone,
    T: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        self.registry.finish_notification();
    }
}

impl<E, T> fmt::Debug for UsageRegistry<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageRegistry")
            .field("len", &self.state.lock().index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;
    use std::thread;

    type Element = (&'static str, u32);

    fn registry() -> UsageRegistry<Element, &'static str> {
        UsageRegistry::new(|element: &Element| element.0)
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> EvictionListener<Element>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |name: &'static str| -> EvictionListener<Element> {
            let sink = Arc::clone(&sink);
            Arc::new(move |element: &Element| {
                sink.lock().push(format!("{}:{}{}", name, element.0, element.1));
            })
        };
        (log, make)
    }

    #[test]
    fn test_evicts_in_least_recently_used_order() {
        let registry = registry();
        registry.register_usage(("a", 1));
        registry.register_usage(("a", 2));
        registry.register_usage(("a", 3));

        assert_eq!(registry.remove_least_recently_used_element(), Some(("a", 1)));
        assert_eq!(registry.remove_least_recently_used_element(), Some(("a", 2)));
        assert_eq!(registry.remove_least_recently_used_element(), Some(("a", 3)));
        assert_eq!(registry.remove_least_recently_used_element(), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_promotes_without_duplicating() {
        let registry = registry();
        registry.register_usage(("a", 1));
        registry.register_usage(("a", 2));
        registry.register_usage(("a", 1));
        assert_eq!(registry.size(), 2);

        assert_eq!(registry.remove_least_recently_used_element(), Some(("a", 2)));
        assert_eq!(registry.remove_least_recently_used_element(), Some(("a", 1)));
    }

    #[test]
    fn test_update_applies_changes_as_one_step() {
        let registry = registry();
        let (log, make) = recorder();
        let listener = make("a");
        registry.add_listener(Some("a"), move |element: &Element| listener(element));
        registry.register_usage(("a", 1));
        registry.register_usage(("a", 2));

        let removed = registry.update(|usage| {
            let removed = usage.remove(&("a", 1));
            usage.register(("a", 3));
            usage.register(("a", 2));
            removed
        });

        assert!(removed);
        assert!(log.lock().is_empty());
        assert_eq!(registry.size(), 2);
        assert_eq!(registry.remove_least_recently_used_element(), Some(("a", 3)));
        assert_eq!(*log.lock(), vec!["a:a3".to_string()]);
    }

    #[test]
    fn test_touch_only_promotes_known_elements() {
        let registry = registry();
        registry.register_usage(("a", 1));
        registry.register_usage(("a", 2));

        assert!(registry.touch(&("a", 1)));
        assert!(!registry.touch(&("a", 9)));
        assert_eq!(registry.size(), 2);
        assert_eq!(registry.remove_least_recently_used_element(), Some(("a", 2)));
    }

    #[test]
    fn test_remove_element_is_silent() {
        let registry = registry();
        let (log, make) = recorder();
        let listener = make("g");
        registry.add_listener(None, move |e: &Element| listener(e));

        registry.register_usage(("a", 1));
        assert!(registry.contains(&("a", 1)));
        assert!(registry.remove_element(&("a", 1)));
        assert!(!registry.remove_element(&("a", 1)));
        assert!(!registry.contains(&("a", 1)));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_empty_eviction_is_noop() {
        let registry = registry();
        let (log, make) = recorder();
        let listener = make("g");
        registry.add_listener(None, move |e: &Element| listener(e));

        assert_eq!(registry.remove_least_recently_used_element(), None);
        assert_eq!(registry.remove_least_recently_used_elements(5), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_global_listeners_run_before_topic_listeners() {
        let registry = registry();
        let (log, make) = recorder();
        let topic_listener = make("topic");
        let global_listener = make("global");
        let other_listener = make("other");
        // registered topic-first on purpose
        registry.add_listener(Some("a"), move |e: &Element| topic_listener(e));
        registry.add_listener(None, move |e: &Element| global_listener(e));
        registry.add_listener(Some("b"), move |e: &Element| other_listener(e));

        registry.register_usage(("a", 1));
        registry.remove_least_recently_used_element();

        assert_eq!(*log.lock(), vec!["global:a1", "topic:a1"]);
    }

    #[test]
    fn test_trim_to_target_size() {
        let registry = registry();
        for i in 0..10 {
            registry.register_usage(("a", i));
        }
        assert_eq!(registry.remove_least_recently_used_until_size_is(4), 6);
        assert_eq!(registry.size(), 4);
        assert_eq!(registry.remove_least_recently_used_until_size_is(8), 0);
        assert_eq!(registry.remove_least_recently_used_elements(3), 3);
        assert_eq!(registry.size(), 1);
        assert_eq!(registry.remove_least_recently_used_element(), Some(("a", 9)));
    }

    #[test]
    fn test_listener_removal_and_count() {
        let registry = registry();
        let global = registry.add_listener(None, |_: &Element| {});
        let scoped = registry.add_listener(Some("a"), |_: &Element| {});
        assert_eq!(registry.listener_count(), 2);

        // wrong topic leaves it in place
        registry.remove_listener(Some(&"b"), scoped);
        assert_eq!(registry.listener_count(), 2);

        registry.remove_listener(Some(&"a"), scoped);
        registry.remove_listener(None, global);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_listener_can_remove_itself_during_notification() {
        let registry = Arc::new(registry());
        let weak: Weak<UsageRegistry<Element, &'static str>> = Arc::downgrade(&registry);
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicU64::new(0));

        let own_id = Arc::clone(&slot);
        let counter = Arc::clone(&calls);
        let id = registry.add_listener(Some("a"), move |_: &Element| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let (Some(registry), Some(id)) = (weak.upgrade(), own_id.lock().take()) {
                registry.remove_listener(Some(&"a"), id);
            }
        });
        *slot.lock() = Some(id);

        registry.register_usage(("a", 1));
        registry.register_usage(("a", 2));
        registry.remove_least_recently_used_element();
        assert_eq!(registry.listener_count(), 0);

        registry.remove_least_recently_used_element();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_drops_elements_and_listeners() {
        let registry = registry();
        registry.add_listener(None, |_: &Element| {});
        registry.add_listener(Some("a"), |_: &Element| {});
        registry.register_usage(("a", 1));
        registry.register_usage(("b", 2));

        registry.clear();
        assert_eq!(registry.size(), 0);
        assert_eq!(registry.listener_count(), 0);
        assert_eq!(registry.remove_least_recently_used_element(), None);
    }

    #[test]
    fn test_concurrent_registration_and_eviction() {
        let registry: Arc<UsageRegistry<(usize, usize), usize>> =
            Arc::new(UsageRegistry::new(|element: &(usize, usize)| element.0));
        let evictions = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&evictions);
        registry.add_listener(None, move |_: &(usize, usize)| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..2_000 {
                        registry.register_usage((t, i % 50));
                        if i % 7 == 0 {
                            registry.remove_least_recently_used_until_size_is(100);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        let remaining = registry.size() as u64;
        assert!(remaining <= 8 * 50);
        registry.remove_least_recently_used_until_size_is(100);
        assert!(registry.size() <= 100);
        // every distinct element was either evicted or is still tracked
        assert!(evictions.load(Ordering::Relaxed) + registry.size() as u64 >= 8 * 50);
    }
}
