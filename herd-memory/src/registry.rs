// Copyright 2026 foyer Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt::Debug, sync::Arc};

use dashmap::{mapref::entry::Entry as MapEntry, DashMap};
use herd_common::{
    code::{Key, Marker, Value},
    entry::{display_tags, Entry, Tags},
};

use crate::record::LoadRecord;

/// In-flight loads of one connection, keyed by remote key.
pub type Loads<K, V, M> = DashMap<K, Arc<LoadRecord<V, M>>>;

/// Callback that arms the foreign-completion listener of a connection.
pub trait ArmListener<C>: Fn(&C) + Send + Sync + 'static {}
impl<C, T> ArmListener<C> for T where T: Fn(&C) + Send + Sync + 'static {}

/// [`LoadRegistry`] indexes the in-flight loads of a process: per connection, at most one live [`LoadRecord`] per
/// key.
///
/// The per-connection map is created lazily. Creating it arms the foreign-completion listener of the connection,
/// exactly once per connection. The arm callback runs while the connection slot is locked and must not call back
/// into the registry.
///
/// Claim and release are atomic per key: claim inserts only if the key is vacant, release removes only the very
/// record that has been claimed.
pub struct LoadRegistry<C, K, V, M> {
    connections: DashMap<C, Arc<Loads<K, V, M>>>,
    arm: Box<dyn ArmListener<C>>,
}

impl<C, K, V, M> Debug for LoadRegistry<C, K, V, M>
where
    C: Key,
    K: Key,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadRegistry")
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl<C, K, V, M> Default for LoadRegistry<C, K, V, M>
where
    C: Key,
    K: Key,
    V: Value,
    M: Marker,
{
    fn default() -> Self {
        Self::new(|_: &C| {})
    }
}

impl<C, K, V, M> LoadRegistry<C, K, V, M>
where
    C: Key,
    K: Key,
    V: Value,
    M: Marker,
{
    /// Create a registry with the listener arm callback.
    pub fn new(arm: impl ArmListener<C>) -> Self {
        Self {
            connections: DashMap::new(),
            arm: Box::new(arm),
        }
    }

    /// Get the in-flight loads of the connection, creating them and arming the listener on first use.
    pub fn loads(&self, conn: &C) -> Arc<Loads<K, V, M>> {
        if let Some(loads) = self.connections.get(conn) {
            return loads.value().clone();
        }
        self.connections
            .entry(conn.clone())
            .or_insert_with(|| {
                tracing::debug!(?conn, "[registry]: arm listener for connection");
                (self.arm)(conn);
                Arc::new(Loads::default())
            })
            .value()
            .clone()
    }

    fn existing(&self, conn: &C) -> Option<Arc<Loads<K, V, M>>> {
        self.connections.get(conn).map(|loads| loads.value().clone())
    }

    /// Try to claim the key with `record`.
    ///
    /// Returns [`None`] if the caller is now the sole claimant, or the live record to join otherwise.
    pub fn claim(&self, conn: &C, key: K, record: Arc<LoadRecord<V, M>>) -> Option<Arc<LoadRecord<V, M>>> {
        match self.loads(conn).entry(key) {
            MapEntry::Occupied(o) => Some(o.get().clone()),
            MapEntry::Vacant(v) => {
                tracing::trace!(key = ?v.key(), "[registry]: claimed");
                v.insert(record);
                None
            }
        }
    }

    /// Remove the record of the key, only if it is still `record`.
    ///
    /// Returns whether the record has been removed.
    pub fn release(&self, conn: &C, key: &K, record: &Arc<LoadRecord<V, M>>) -> bool {
        self.loads(conn)
            .remove_if(key, |_, current| Arc::ptr_eq(current, record))
            .is_some()
    }

    /// Remove the record of the key, invalidate its promise and open its release gate.
    ///
    /// Returns whether there was an in-flight load.
    pub fn invalidate(&self, conn: &C, key: &K) -> bool {
        match self.loads(conn).remove(key) {
            Some((_, record)) => {
                tracing::debug!(?key, "[registry]: invalidate in-flight load");
                record.promise().invalidate();
                record.promise().release();
                true
            }
            None => false,
        }
    }

    /// Remove and invalidate the records of every key matching `predicate`.
    ///
    /// `predicate` runs on a snapshot of the keys with no lock held, so it may call back into the registry. A
    /// record claimed after the snapshot is left alone. Release gates are opened after the scan completes.
    /// Returns the count of invalidated loads.
    pub fn invalidate_by<P>(&self, conn: &C, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let loads = self.loads(conn);
        let snapshot = loads
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect::<Vec<_>>();
        let invalidated = snapshot
            .into_iter()
            .filter(|(key, _)| predicate(key))
            .filter_map(|(key, record)| loads.remove_if(&key, |_, current| Arc::ptr_eq(current, &record)))
            .map(|(_, record)| {
                record.promise().invalidate();
                record
            })
            .collect::<Vec<_>>();
        for record in invalidated.iter() {
            record.promise().release();
        }
        tracing::debug!(count = invalidated.len(), "[registry]: invalidate in-flight loads by predicate");
        invalidated.len()
    }

    /// Add the tags to the invalid set of every live record of every connection.
    pub fn broadcast_invalid_ids(&self, tags: &Tags) {
        if tags.is_empty() {
            return;
        }
        let connections = self
            .connections
            .iter()
            .map(|loads| loads.value().clone())
            .collect::<Vec<_>>();
        let mut count = 0;
        for loads in connections {
            for record in loads.iter() {
                record.promise().add_invalid_ids(tags);
                count += 1;
            }
        }
        tracing::trace!(tags = %display_tags(tags), count, "[registry]: broadcast invalid ids");
    }

    /// Deliver the value produced by a foreign load of the key.
    ///
    /// Only a record that waits on a foreign load is completed. Returns whether the value has been delivered.
    pub fn complete_foreign(&self, conn: &C, key: &K, entry: Entry<V>) -> bool {
        let Some(loads) = self.existing(conn) else {
            return false;
        };
        let Some((_, record)) = loads.remove_if(key, |_, record| record.is_foreign()) else {
            return false;
        };
        let delivered = record.promise().deliver(entry);
        record.promise().release();
        tracing::trace!(?key, delivered, "[registry]: complete foreign load");
        delivered
    }

    /// Drop a foreign load of the key that will never complete, e.g. its marker has been abandoned or has faded.
    ///
    /// Waiters observe an absent result and retry. Returns whether there was such a load.
    pub fn abandon_foreign(&self, conn: &C, key: &K) -> bool {
        let Some(loads) = self.existing(conn) else {
            return false;
        };
        let Some((_, record)) = loads.remove_if(key, |_, record| record.is_foreign()) else {
            return false;
        };
        tracing::debug!(?key, "[registry]: foreign load abandoned");
        record.promise().invalidate();
        record.promise().release();
        true
    }

    /// Keys of the connection that wait on foreign loads.
    pub fn foreign_keys(&self, conn: &C) -> Vec<K> {
        self.existing(conn)
            .map(|loads| {
                loads
                    .iter()
                    .filter(|record| record.value().is_foreign())
                    .map(|record| record.key().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Keys and markers of the loads of the connection that this process is computing.
    pub fn owned_markers(&self, conn: &C) -> Vec<(K, Arc<M>)> {
        self.existing(conn)
            .map(|loads| {
                loads
                    .iter()
                    .filter(|record| record.value().is_ours())
                    .filter_map(|record| record.value().marker().map(|marker| (record.key().clone(), marker)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Count of the in-flight loads of the connection.
    pub fn len(&self, conn: &C) -> usize {
        self.existing(conn).map(|loads| loads.len()).unwrap_or_default()
    }

    /// Whether the connection has no in-flight load.
    pub fn is_empty(&self, conn: &C) -> bool {
        self.len(conn) == 0
    }

    /// Connections seen by the registry.
    pub fn connections(&self) -> Vec<C> {
        self.connections.iter().map(|loads| loads.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Barrier,
        },
        thread,
    };

    use herd_common::entry::TagId;

    use super::*;

    type TestRegistry = LoadRegistry<&'static str, u64, String, u64>;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<TestRegistry>();
    }

    fn record(marker: u64) -> Arc<LoadRecord<String, u64>> {
        Arc::new(LoadRecord::new(marker))
    }

    #[test]
    fn test_arm_once_per_connection() {
        let armed = Arc::new(AtomicUsize::new(0));
        let registry: TestRegistry = LoadRegistry::new({
            let armed = armed.clone();
            move |_: &&'static str| {
                armed.fetch_add(1, Ordering::Relaxed);
            }
        });
        registry.loads(&"c1");
        registry.loads(&"c1");
        registry.claim(&"c1", 1, record(1));
        assert_eq!(armed.load(Ordering::Relaxed), 1);
        registry.invalidate(&"c2", &1);
        assert_eq!(armed.load(Ordering::Relaxed), 2);
        let mut connections = registry.connections();
        connections.sort();
        assert_eq!(connections, vec!["c1", "c2"]);
    }

    #[test]
    fn test_claim_and_join() {
        let registry = TestRegistry::default();
        let first = record(1);
        assert!(registry.claim(&"c", 1, first.clone()).is_none());
        let joined = registry.claim(&"c", 1, record(2)).unwrap();
        assert!(Arc::ptr_eq(&joined, &first));
        // Other keys and other connections stay independent.
        assert!(registry.claim(&"c", 2, record(3)).is_none());
        assert!(registry.claim(&"d", 1, record(4)).is_none());
        assert_eq!(registry.len(&"c"), 2);
    }

    #[test]
    fn test_release_guards_identity() {
        let registry = TestRegistry::default();
        let old = record(1);
        assert!(registry.claim(&"c", 1, old.clone()).is_none());
        assert!(registry.invalidate(&"c", &1));
        let new = record(2);
        assert!(registry.claim(&"c", 1, new.clone()).is_none());

        // The stale owner must not remove the newer claim.
        assert!(!registry.release(&"c", &1, &old));
        assert_eq!(registry.len(&"c"), 1);
        assert!(registry.release(&"c", &1, &new));
        assert!(registry.is_empty(&"c"));
    }

    #[test]
    fn test_invalidate() {
        let registry = TestRegistry::default();
        let r = record(1);
        registry.claim(&"c", 1, r.clone());
        assert!(registry.invalidate(&"c", &1));
        assert!(!registry.invalidate(&"c", &1));
        assert!(r.promise().is_invalid());
        assert!(r.promise().is_released());
        assert!(r.promise().wait(&1).unwrap().is_none());
    }

    #[test_log::test]
    fn test_invalidate_by() {
        let registry = TestRegistry::default();
        let records = (0..10).map(|i| (i, record(i))).collect::<Vec<_>>();
        for (key, r) in records.iter() {
            registry.claim(&"c", *key, r.clone());
        }
        assert_eq!(registry.invalidate_by(&"c", |key| key % 2 == 0), 5);
        for (key, r) in records.iter() {
            assert_eq!(r.promise().is_invalid(), key % 2 == 0);
            assert_eq!(r.promise().is_released(), key % 2 == 0);
        }
        assert_eq!(registry.len(&"c"), 5);
    }

    #[test_log::test]
    fn test_invalidate_by_reentrant_predicate() {
        let registry = TestRegistry::default();
        for key in 0..4 {
            registry.claim(&"c", key, record(key));
        }
        let invalidated = registry.invalidate_by(&"c", |key| {
            // Callbacks into the registry from the predicate see it unlocked.
            registry.claim(&"d", *key, record(*key));
            registry.len(&"c") > 0 && *key < 2
        });
        assert_eq!(invalidated, 2);
        assert_eq!(registry.len(&"c"), 2);
        assert_eq!(registry.len(&"d"), 4);
    }

    #[test]
    fn test_broadcast_invalid_ids() {
        let registry = TestRegistry::default();
        let a = record(1);
        let b = record(2);
        registry.claim(&"c1", 1, a.clone());
        registry.claim(&"c2", 1, b.clone());
        a.promise().deliver(Entry::new("a".to_string()).with_tags(["t"]));
        b.promise().deliver(Entry::new("b".to_string()).with_tags(["u"]));

        let tags = [TagId::from("t")].into_iter().collect::<Tags>();
        registry.broadcast_invalid_ids(&tags);
        assert!(a.promise().wait(&1).unwrap().is_none());
        assert!(b.promise().wait(&1).unwrap().is_some());
    }

    #[test]
    fn test_complete_foreign() {
        let registry = TestRegistry::default();
        let ours = record(1);
        ours.our_load();
        registry.claim(&"c", 1, ours.clone());
        assert!(!registry.complete_foreign(&"c", &1, Entry::new("x".to_string())));
        assert_eq!(registry.len(&"c"), 1);
        assert_eq!(registry.owned_markers(&"c").len(), 1);

        let foreign = record(2);
        foreign.foreign_load();
        registry.claim(&"c", 2, foreign.clone());
        assert_eq!(registry.foreign_keys(&"c"), vec![2]);
        assert!(registry.complete_foreign(&"c", &2, Entry::new("y".to_string())));
        assert_eq!(
            foreign.promise().wait(&2).unwrap().map(Entry::into_value),
            Some("y".to_string())
        );
        assert!(registry.foreign_keys(&"c").is_empty());
        assert!(!registry.complete_foreign(&"unknown", &2, Entry::new("z".to_string())));

        // A record still claiming the key is left to its owner.
        let claiming = record(3);
        registry.claim(&"c", 3, claiming.clone());
        assert!(!registry.complete_foreign(&"c", &3, Entry::new("w".to_string())));
        assert!(!registry.abandon_foreign(&"c", &3));
        assert!(!claiming.promise().is_resolved());
    }

    #[test]
    fn test_abandon_foreign() {
        let registry = TestRegistry::default();
        let foreign = record(1);
        foreign.foreign_load();
        registry.claim(&"c", 1, foreign.clone());
        assert!(registry.abandon_foreign(&"c", &1));
        assert!(foreign.promise().wait(&1).unwrap().is_none());
        assert!(!registry.abandon_foreign(&"c", &1));
    }

    #[test]
    fn test_concurrent_claim() {
        const THREADS: usize = 32;

        let registry = Arc::new(TestRegistry::default());
        let barrier = Arc::new(Barrier::new(THREADS));
        let winners = (0..THREADS)
            .map(|i| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.claim(&"c", 42, record(i as u64)).is_none()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
