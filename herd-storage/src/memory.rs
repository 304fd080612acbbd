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

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Weak,
    },
    time::{Duration, Instant},
};

use hashbrown::HashMap;
use herd_common::{
    code::{Key, Value},
    entry::{Entry, Tags},
    error::Result,
};
use herd_memory::LoadRegistry;
use parking_lot::Mutex;

use crate::store::{RemoteStore, Stored};

/// Load marker minted by [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadMarker {
    seq: u64,
    nonce: u64,
}

enum Slot<V> {
    Marker(LoadMarker),
    Value(Entry<V>),
}

struct Item<V> {
    slot: Slot<V>,
    expire_at: Option<Instant>,
}

impl<V> Item<V>
where
    V: Clone,
{
    fn is_expired(&self, now: Instant) -> bool {
        self.expire_at.is_some_and(|at| at <= now)
    }

    fn is_marked_by(&self, marker: &LoadMarker) -> bool {
        matches!(&self.slot, Slot::Marker(m) if m == marker)
    }

    fn stored(&self) -> Stored<V, LoadMarker> {
        match &self.slot {
            Slot::Marker(marker) => Stored::Marker(*marker),
            Slot::Value(entry) => Stored::Value(entry.clone()),
        }
    }
}

enum Notification<K, V> {
    Complete(K, Entry<V>),
    Abandon(K),
}

struct Subscription<C, K, V> {
    conn: C,
    registry: Weak<LoadRegistry<C, K, V, LoadMarker>>,
}

type KeyGenerator<K> = Box<dyn Fn(&str, &K, &Tags) -> Vec<K> + Send + Sync + 'static>;

fn expire_at(now: Instant, ms: Option<u64>) -> Option<Instant> {
    ms.map(|ms| now + Duration::from_millis(ms))
}

/// [`MemoryStore`] is an in-process [`RemoteStore`].
///
/// Several loaders sharing one store behave like several processes sharing a remote store: claims are exclusive
/// across all of them, and an install or abandon is delivered to every registry armed for the connection.
///
/// Expired entries read as vacant. Markers that fade without being replaced are only reported to waiting registries
/// by [`MemoryStore::sweep`] or by the next claim of the key.
pub struct MemoryStore<C, K, V> {
    items: Mutex<HashMap<(C, K), Item<V>>>,
    subscriptions: Mutex<Vec<Subscription<C, K, V>>>,
    seq: AtomicU64,
    nonce: u64,
    key_generator: KeyGenerator<K>,
}

impl<C, K, V> Debug for MemoryStore<C, K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("items", &self.items.lock().len())
            .field("subscriptions", &self.subscriptions.lock().len())
            .field("nonce", &self.nonce)
            .finish()
    }
}

impl<C, K, V> Default for MemoryStore<C, K, V>
where
    C: Key,
    K: Key,
    V: Value,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C, K, V> MemoryStore<C, K, V>
where
    C: Key,
    K: Key,
    V: Value,
{
    /// Create an empty store. Values are installed under their own key only.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(vec![]),
            seq: AtomicU64::new(0),
            nonce: rand::random(),
            key_generator: Box::new(|_, key, _| vec![key.clone()]),
        }
    }

    /// Set the generator that expands a key and the tags of its value into the keys to install under.
    ///
    /// The generated keys must start with the key itself.
    pub fn with_key_generator<F>(mut self, key_generator: F) -> Self
    where
        F: Fn(&str, &K, &Tags) -> Vec<K> + Send + Sync + 'static,
    {
        self.key_generator = Box::new(key_generator);
        self
    }

    /// Read the key without side effects.
    pub fn peek(&self, conn: &C, key: &K) -> Option<Stored<V, LoadMarker>> {
        let now = Instant::now();
        self.items
            .lock()
            .get(&(conn.clone(), key.clone()))
            .filter(|item| !item.is_expired(now))
            .map(Item::stored)
    }

    /// Count of the entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the store has no entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the expired entries and report faded markers to the armed registries.
    ///
    /// Returns the count of removed entries.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut faded = vec![];
        let mut removed = 0;
        self.items.lock().retain(|(conn, key), item| {
            if !item.is_expired(now) {
                return true;
            }
            if let Slot::Marker(_) = item.slot {
                faded.push((conn.clone(), key.clone()));
            }
            removed += 1;
            false
        });
        tracing::trace!(removed, faded = faded.len(), "[memory store]: sweep");
        for (conn, key) in faded {
            self.notify(&conn, vec![Notification::Abandon(key)]);
        }
        removed
    }

    fn notify(&self, conn: &C, notifications: Vec<Notification<K, V>>) {
        if notifications.is_empty() {
            return;
        }
        let registries = {
            let mut subscriptions = self.subscriptions.lock();
            subscriptions.retain(|subscription| subscription.registry.strong_count() > 0);
            subscriptions
                .iter()
                .filter(|subscription| &subscription.conn == conn)
                .filter_map(|subscription| subscription.registry.upgrade())
                .collect::<Vec<_>>()
        };
        for registry in registries {
            for notification in notifications.iter() {
                match notification {
                    Notification::Complete(key, entry) => {
                        registry.complete_foreign(conn, key, entry.clone());
                    }
                    Notification::Abandon(key) => {
                        registry.abandon_foreign(conn, key);
                    }
                }
            }
        }
    }
}

impl<C, K, V> RemoteStore for MemoryStore<C, K, V>
where
    C: Key,
    K: Key,
    V: Value,
{
    type Conn = C;
    type Key = K;
    type Value = V;
    type Marker = LoadMarker;

    fn new_marker(&self) -> LoadMarker {
        LoadMarker {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            nonce: self.nonce,
        }
    }

    fn claim_or_read(
        &self,
        conn: &C,
        key: &K,
        marker: &LoadMarker,
        marker_ttl_ms: u64,
        fade_ms: Option<u64>,
    ) -> Result<Option<Stored<V, LoadMarker>>> {
        let now = Instant::now();
        let slot = (conn.clone(), key.clone());

        let mut items = self.items.lock();
        if let Some(item) = items.get_mut(&slot) {
            if !item.is_expired(now) {
                if fade_ms.is_some() && matches!(item.slot, Slot::Value(_)) {
                    item.expire_at = expire_at(now, fade_ms);
                }
                return Ok(Some(item.stored()));
            }
        }
        let faded = items.insert(
            slot,
            Item {
                slot: Slot::Marker(*marker),
                expire_at: expire_at(now, Some(marker_ttl_ms)),
            },
        );
        drop(items);

        tracing::trace!(?key, ?marker, "[memory store]: claimed");
        if let Some(Item {
            slot: Slot::Marker(faded),
            ..
        }) = faded
        {
            tracing::debug!(?key, marker = ?faded, "[memory store]: replaced faded marker");
            self.notify(conn, vec![Notification::Abandon(key.clone())]);
        }
        Ok(None)
    }

    fn read(&self, conn: &C, key: &K) -> Result<Option<Stored<V, LoadMarker>>> {
        Ok(self.peek(conn, key))
    }

    fn install(
        &self,
        conn: &C,
        keys: &[K],
        entry: &Entry<V>,
        marker: Option<&LoadMarker>,
        expiry_ms: Option<u64>,
    ) -> Result<bool> {
        let Some(first) = keys.first() else {
            return Ok(false);
        };
        let now = Instant::now();

        let mut items = self.items.lock();
        if let Some(marker) = marker {
            let claimed = items
                .get(&(conn.clone(), first.clone()))
                .is_some_and(|item| !item.is_expired(now) && item.is_marked_by(marker));
            if !claimed {
                tracing::debug!(key = ?first, ?marker, "[memory store]: install lost the claim");
                return Ok(false);
            }
        }
        for key in keys {
            items.insert(
                (conn.clone(), key.clone()),
                Item {
                    slot: Slot::Value(entry.clone()),
                    expire_at: expire_at(now, expiry_ms),
                },
            );
        }
        drop(items);

        tracing::trace!(?keys, expiry_ms, "[memory store]: installed");
        self.notify(
            conn,
            keys.iter()
                .map(|key| Notification::Complete(key.clone(), entry.clone()))
                .collect(),
        );
        Ok(true)
    }

    fn abandon(&self, conn: &C, key: &K, marker: &LoadMarker) -> Result<()> {
        let removed = {
            let mut items = self.items.lock();
            let slot = (conn.clone(), key.clone());
            let marked = items.get(&slot).is_some_and(|item| item.is_marked_by(marker));
            marked && items.remove(&slot).is_some()
        };
        if removed {
            tracing::trace!(?key, ?marker, "[memory store]: abandoned");
            self.notify(conn, vec![Notification::Abandon(key.clone())]);
        }
        Ok(())
    }

    fn refresh(&self, conn: &C, key: &K, marker: &LoadMarker, marker_ttl_ms: u64) -> Result<bool> {
        let now = Instant::now();
        let mut items = self.items.lock();
        match items.get_mut(&(conn.clone(), key.clone())) {
            Some(item) if !item.is_expired(now) && item.is_marked_by(marker) => {
                item.expire_at = expire_at(now, Some(marker_ttl_ms));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn derive_keys(&self, cache_name: &str, key: &K, tags: &Tags) -> Vec<K> {
        (self.key_generator)(cache_name, key, tags)
    }

    fn arm_listener(&self, conn: &C, registry: Weak<LoadRegistry<C, K, V, LoadMarker>>) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions
            .iter()
            .any(|subscription| &subscription.conn == conn && subscription.registry.ptr_eq(&registry))
        {
            return;
        }
        tracing::debug!(?conn, "[memory store]: listener armed");
        subscriptions.push(Subscription {
            conn: conn.clone(),
            registry,
        });
    }
}
