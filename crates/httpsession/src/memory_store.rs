//! In-process session store with sliding expiry and bounded GC.
//!
//! Locking is two-tier. The top-level map lock is only held to find, insert
//! or remove an entry handle; each entry guards its own values with its own
//! lock. The two are never held together, and last-access stamps are atomic
//! so the sweep never touches an entry lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::GcPolicy;
use crate::expiry::{AccessStamp, Clock, MaxAge};
use crate::id::SessionId;
use crate::store::Store;

/// One session's values plus its last-access stamp.
#[derive(Debug)]
struct Entry {
    values: RwLock<HashMap<String, Value>>,
    last_access: AccessStamp,
}

impl Entry {
    fn new(now: u64) -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            last_access: AccessStamp::new(now),
        }
    }
}

#[derive(Debug)]
struct Slot {
    entry: Arc<Entry>,
    /// Position of this id in `Nodes::ring`.
    index: usize,
}

/// Entry handles plus a dense ring of their ids, so a sweep can start at
/// any position without walking the map.
#[derive(Debug, Default)]
struct Nodes {
    slots: HashMap<SessionId, Slot>,
    ring: Vec<SessionId>,
}

impl Nodes {
    fn len(&self) -> usize {
        self.ring.len()
    }

    fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    fn get(&self, id: &SessionId) -> Option<&Arc<Entry>> {
        self.slots.get(id).map(|slot| &slot.entry)
    }

    fn insert(&mut self, id: SessionId, entry: Arc<Entry>) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.entry = entry;
            return;
        }
        let index = self.ring.len();
        self.ring.push(id.clone());
        self.slots.insert(id, Slot { entry, index });
    }

    fn remove(&mut self, id: &SessionId) -> Option<Arc<Entry>> {
        let slot = self.slots.remove(id)?;
        self.ring.swap_remove(slot.index);
        // The former last id now sits in the vacated position
        if let Some(moved) = self.ring.get(slot.index)
            && let Some(moved_slot) = self.slots.get_mut(moved)
        {
            moved_slot.index = slot.index;
        }
        Some(slot.entry)
    }

    /// Up to `count` entries starting at ring position `start`, wrapping
    /// around once.
    fn window(
        &self,
        start: usize,
        count: usize,
    ) -> impl Iterator<Item = (&SessionId, &Arc<Entry>)> {
        let len = self.ring.len();
        (0..count.min(len)).filter_map(move |offset| {
            let id = &self.ring[(start + offset) % len];
            self.get(id).map(|entry| (id, entry))
        })
    }
}

/// Thread-safe in-memory [`Store`].
#[derive(Debug)]
pub struct MemoryStore {
    nodes: RwLock<Nodes>,
    max_age: MaxAge,
    clock: Clock,
    gc_policy: GcPolicy,
    gc_cursor: AtomicUsize,
}

impl MemoryStore {
    /// Create a store whose entries expire after `max_age` of inactivity.
    /// A zero `max_age` keeps entries until they are cleared.
    pub fn new(max_age: Duration) -> Self {
        Self {
            nodes: RwLock::new(Nodes::default()),
            max_age: MaxAge::new(max_age),
            clock: Clock::new(),
            gc_policy: GcPolicy::default(),
            gc_cursor: AtomicUsize::new(0),
        }
    }

    /// Override the garbage-collector bounds.
    pub fn with_gc_policy(mut self, policy: GcPolicy) -> Self {
        self.gc_policy = policy;
        self
    }

    /// Current idle lifetime.
    pub fn max_age(&self) -> Duration {
        self.max_age.get()
    }

    /// Garbage-collector bounds.
    pub fn gc_policy(&self) -> GcPolicy {
        self.gc_policy
    }

    /// Number of entries currently held, including expired ones not yet
    /// collected.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Find the entry for `id`, deleting it on the spot if it has expired.
    fn live_entry(&self, id: &SessionId) -> Option<Arc<Entry>> {
        let entry = self.nodes.read().get(id).cloned()?;

        if entry
            .last_access
            .is_expired(self.clock.now(), self.max_age.get())
        {
            if self.remove_if_expired(id, &entry) {
                debug!(session_id = %id, "Session expired, removed on access");
            }
            return None;
        }

        Some(entry)
    }

    /// Remove `id` only if it still maps to `entry` and that entry is still
    /// expired. A concurrent re-add or refresh wins over the removal.
    fn remove_if_expired(&self, id: &SessionId, entry: &Arc<Entry>) -> bool {
        let max_age = self.max_age.get();
        let mut nodes = self.nodes.write();
        let still_expired = nodes.get(id).is_some_and(|current| {
            Arc::ptr_eq(current, entry)
                && current.last_access.is_expired(self.clock.now(), max_age)
        });
        if still_expired {
            nodes.remove(id);
        }
        still_expired
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_AGE)
    }
}

impl Store for MemoryStore {
    fn get(&self, id: &SessionId, key: &str) -> Option<Value> {
        let entry = self.live_entry(id)?;
        let value = entry.values.read().get(key).cloned();
        entry.last_access.touch(self.clock.now());
        value
    }

    fn set(&self, id: &SessionId, key: &str, value: Value) {
        let Some(entry) = self.live_entry(id) else {
            trace!(session_id = %id, key = %key, "Ignoring set on unknown session");
            return;
        };
        entry.values.write().insert(key.to_string(), value);
        entry.last_access.touch(self.clock.now());
    }

    fn del(&self, id: &SessionId, key: &str) -> bool {
        if let Some(entry) = self.live_entry(id) {
            entry.values.write().remove(key);
            entry.last_access.touch(self.clock.now());
        }
        true
    }

    fn add(&self, id: &SessionId) {
        let now = self.clock.now();
        let max_age = self.max_age.get();
        let mut nodes = self.nodes.write();

        if let Some(existing) = nodes.get(id)
            && !existing.last_access.is_expired(now, max_age)
        {
            existing.last_access.touch(now);
            return;
        }

        nodes.insert(id.clone(), Arc::new(Entry::new(now)));
        trace!(session_id = %id, sessions = nodes.len(), "Session added");
    }

    fn exist(&self, id: &SessionId) -> bool {
        self.live_entry(id).is_some()
    }

    fn clear(&self, id: &SessionId) -> bool {
        if self.nodes.write().remove(id).is_some() {
            debug!(session_id = %id, "Session cleared");
        }
        true
    }

    fn set_max_age(&self, max_age: Duration) {
        self.max_age.set(max_age);
    }

    fn gc(&self) -> usize {
        let max_age = self.max_age.get();
        if max_age.is_zero() {
            return 0;
        }
        let now = self.clock.now();

        // Gather candidates under the read lock so request traffic keeps
        // flowing; the cursor rotates the starting point between ticks.
        let (candidates, examined) = {
            let nodes = self.nodes.read();
            let len = nodes.len();
            if len == 0 {
                return 0;
            }
            let start = self.gc_cursor.load(Ordering::Relaxed) % len;
            let examined = self.gc_policy.max_examined.min(len);
            self.gc_cursor
                .store((start + examined) % len, Ordering::Relaxed);

            let candidates: Vec<(SessionId, Arc<Entry>)> = nodes
                .window(start, examined)
                .filter(|(_, entry)| entry.last_access.is_expired(now, max_age))
                .take(self.gc_policy.max_removed)
                .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
                .collect();
            (candidates, examined)
        };

        let mut removed = 0;
        for (id, entry) in &candidates {
            if self.remove_if_expired(id, entry) {
                trace!(session_id = %id, "Session expired, removed by GC");
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, examined, remaining = self.len(), "Session GC sweep");
        }
        removed
    }

    fn gc_interval(&self) -> Option<Duration> {
        Some(self.gc_policy.interval)
    }

    fn len(&self) -> Option<usize> {
        Some(MemoryStore::len(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;
    use crate::config::DEFAULT_GC_MAX_EXAMINED;

    fn id(raw: &str) -> SessionId {
        SessionId::from(raw)
    }

    #[test]
    fn test_add_set_get() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.add(&id("s1"));
        store.set(&id("s1"), "user", json!("alice"));

        assert!(store.exist(&id("s1")));
        assert_eq!(store.get(&id("s1"), "user"), Some(json!("alice")));
        assert_eq!(store.get(&id("s1"), "missing"), None);
    }

    #[test]
    fn test_absent_session_reads_as_none() {
        let store = MemoryStore::new(Duration::from_secs(60));

        assert_eq!(store.get(&id("nope"), "user"), None);
        assert!(!store.exist(&id("nope")));
    }

    #[test]
    fn test_set_on_unknown_session_is_ignored() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.set(&id("ghost"), "k", json!(1));

        assert!(!store.exist(&id("ghost")));
        assert!(store.is_empty());
    }

    #[test]
    fn test_del_is_idempotent() {
        let store = MemoryStore::new(Duration::from_secs(60));

        assert!(store.del(&id("nope"), "k"));

        store.add(&id("s1"));
        store.set(&id("s1"), "k", json!(1));
        assert!(store.del(&id("s1"), "k"));
        assert!(store.del(&id("s1"), "k"));
        assert_eq!(store.get(&id("s1"), "k"), None);
        assert!(store.exist(&id("s1")));
    }

    #[test]
    fn test_clear() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.add(&id("s1"));

        assert!(store.clear(&id("s1")));
        assert!(!store.exist(&id("s1")));
        assert!(store.clear(&id("s1")));
    }

    #[test]
    fn test_add_keeps_live_entry() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.add(&id("s1"));
        store.set(&id("s1"), "k", json!("v"));

        store.add(&id("s1"));
        assert_eq!(store.get(&id("s1"), "k"), Some(json!("v")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_sliding_expiry() {
        let store = MemoryStore::new(Duration::from_millis(100));
        store.add(&id("s1"));
        store.set(&id("s1"), "n", json!(1));

        thread::sleep(Duration::from_millis(60));
        assert_eq!(store.get(&id("s1"), "n"), Some(json!(1)));

        // 120ms since creation, 60ms since the last read
        thread::sleep(Duration::from_millis(60));
        assert_eq!(store.get(&id("s1"), "n"), Some(json!(1)));

        thread::sleep(Duration::from_millis(150));
        assert_eq!(store.get(&id("s1"), "n"), None);
    }

    #[test]
    fn test_lazy_expiry_deletes_entry() {
        let store = MemoryStore::new(Duration::from_millis(20));
        store.add(&id("s1"));
        thread::sleep(Duration::from_millis(40));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&id("s1"), "anything"), None);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_expired_entry_rejects_writes() {
        let store = MemoryStore::new(Duration::from_millis(20));
        store.add(&id("s1"));
        thread::sleep(Duration::from_millis(40));

        store.set(&id("s1"), "k", json!(1));
        assert!(!store.exist(&id("s1")));

        // A fresh add replaces the expired entry with an empty one
        store.add(&id("s1"));
        assert!(store.exist(&id("s1")));
        assert_eq!(store.get(&id("s1"), "k"), None);
    }

    #[test]
    fn test_zero_max_age_never_expires() {
        let store = MemoryStore::new(Duration::ZERO);
        store.add(&id("s1"));
        thread::sleep(Duration::from_millis(20));

        assert!(store.exist(&id("s1")));
        assert_eq!(store.gc(), 0);
    }

    #[test]
    fn test_set_max_age() {
        let store = MemoryStore::new(Duration::ZERO);
        store.add(&id("s1"));
        thread::sleep(Duration::from_millis(30));

        store.set_max_age(Duration::from_millis(10));
        assert_eq!(store.max_age(), Duration::from_millis(10));
        assert!(!store.exist(&id("s1")));
    }

    #[test]
    fn test_gc_is_bounded_per_tick() {
        let store = MemoryStore::new(Duration::from_millis(10));
        for i in 0..100 {
            store.add(&SessionId::new(format!("s{i}")));
        }
        thread::sleep(Duration::from_millis(30));

        assert_eq!(store.gc(), DEFAULT_REMOVED);
        assert_eq!(store.len(), 100 - DEFAULT_REMOVED);

        // Later ticks keep draining
        let mut ticks = 1;
        while !store.is_empty() {
            assert!(store.gc() <= DEFAULT_REMOVED);
            ticks += 1;
            assert!(ticks <= 100, "GC made no progress");
        }
    }

    const DEFAULT_REMOVED: usize = crate::config::DEFAULT_GC_MAX_REMOVED;

    #[test]
    fn test_gc_leftovers_expire_lazily() {
        let store = MemoryStore::new(Duration::from_millis(10));
        for i in 0..50 {
            store.add(&SessionId::new(format!("s{i}")));
        }
        thread::sleep(Duration::from_millis(30));
        store.gc();

        for i in 0..50 {
            assert_eq!(store.get(&SessionId::new(format!("s{i}")), "k"), None);
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_gc_examines_limited_entries() {
        let policy = GcPolicy {
            interval: Duration::from_secs(1),
            max_examined: 3,
            max_removed: 100,
        };
        let store = MemoryStore::new(Duration::from_millis(10)).with_gc_policy(policy);
        for i in 0..10 {
            store.add(&SessionId::new(format!("s{i}")));
        }
        thread::sleep(Duration::from_millis(30));

        assert_eq!(store.gc(), 3);
        assert_eq!(store.len(), 7);
    }

    #[test]
    fn test_gc_spares_live_entries() {
        let store = MemoryStore::new(Duration::from_millis(200));
        store.add(&id("old"));
        thread::sleep(Duration::from_millis(300));
        for i in 0..50 {
            store.add(&SessionId::new(format!("fresh{i}")));
        }

        // The rotating cursor reaches the expired entry within a few ticks
        let mut removed = 0;
        for _ in 0..10 {
            removed += store.gc();
        }

        assert_eq!(removed, 1);
        assert_eq!(store.len(), 50);
    }

    #[test]
    fn test_sessions_are_isolated_under_concurrency() {
        let store = Arc::new(MemoryStore::new(Duration::from_secs(60)));
        for i in 0..16 {
            store.add(&SessionId::new(format!("s{i}")));
        }

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let sid = SessionId::new(format!("s{i}"));
                    for round in 0..100 {
                        store.set(&sid, "k", json!(i * 1000 + round));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..16 {
            let sid = SessionId::new(format!("s{i}"));
            assert_eq!(store.get(&sid, "k"), Some(json!(i * 1000 + 99)));
        }
    }

    #[test]
    fn test_last_write_wins() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.add(&id("s1"));

        store.set(&id("s1"), "k", json!("a"));
        store.set(&id("s1"), "k", json!("b"));
        assert_eq!(store.get(&id("s1"), "k"), Some(json!("b")));
    }

    #[test]
    fn test_gc_runs_alongside_traffic() {
        let store = Arc::new(MemoryStore::new(Duration::from_millis(5)));

        let sweeper = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..200 {
                    store.gc();
                    thread::sleep(Duration::from_micros(200));
                }
            })
        };

        let workers: Vec<_> = (0..4)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..500 {
                        let sid = SessionId::new(format!("w{w}-{}", i % 20));
                        store.add(&sid);
                        store.set(&sid, "i", json!(i));
                        let _ = store.get(&sid, "i");
                        store.del(&sid, "i");
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        sweeper.join().unwrap();
    }

    fn filled_nodes(n: usize) -> Nodes {
        let mut nodes = Nodes::default();
        for i in 0..n {
            nodes.insert(SessionId::new(format!("s{i}")), Arc::new(Entry::new(0)));
        }
        nodes
    }

    fn assert_ring_consistent(nodes: &Nodes) {
        assert_eq!(nodes.ring.len(), nodes.slots.len());
        for (index, id) in nodes.ring.iter().enumerate() {
            assert_eq!(nodes.slots[id].index, index, "slot index out of sync for {id}");
        }
    }

    #[test]
    fn test_sweep_window_visits_budget_from_any_start() {
        let nodes = filled_nodes(10_000);

        for start in [0, 5_000, 9_999] {
            let visited: Vec<&SessionId> = nodes.window(start, 20).map(|(id, _)| id).collect();
            assert_eq!(visited.len(), 20);
            assert_eq!(visited[0], &nodes.ring[start]);
        }

        // Wraps to the front of the ring
        let tail: Vec<&SessionId> = nodes.window(9_995, 20).map(|(id, _)| id).collect();
        assert_eq!(tail.len(), 20);
        assert_eq!(tail[5], &nodes.ring[0]);

        // Never more than the map holds
        assert_eq!(filled_nodes(3).window(2, 20).count(), 3);
        assert_eq!(Nodes::default().window(0, 20).count(), 0);
    }

    #[test]
    fn test_ring_tracks_removals() {
        let mut nodes = filled_nodes(50);

        for i in (0..50).step_by(3) {
            assert!(nodes.remove(&SessionId::new(format!("s{i}"))).is_some());
            assert_ring_consistent(&nodes);
        }
        assert!(nodes.remove(&id("s0")).is_none());

        // Re-inserting a live id replaces the handle without a second ring slot
        nodes.insert(id("s1"), Arc::new(Entry::new(7)));
        assert_ring_consistent(&nodes);
        assert_eq!(nodes.len(), 50 - 17);
        assert_eq!(nodes.get(&id("s1")).map(|e| e.last_access.last()), Some(7));
    }

    #[test]
    fn test_gc_from_tail_wraps_to_front() {
        let store = MemoryStore::new(Duration::from_millis(30));
        store.add(&id("stale"));
        thread::sleep(Duration::from_millis(50));
        for i in 0..200 {
            store.add(&SessionId::new(format!("live{i}")));
        }

        // "stale" holds ring position 0; start the sweep at the last slot
        let len = store.len();
        store.gc_cursor.store(len - 1, Ordering::Relaxed);

        assert_eq!(store.gc(), 1);
        assert_eq!(store.len(), len - 1);
        assert_eq!(
            store.gc_cursor.load(Ordering::Relaxed),
            (len - 1 + DEFAULT_GC_MAX_EXAMINED) % len
        );
        assert_ring_consistent(&store.nodes.read());
    }
}
