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
    sync::{Arc, Weak},
};

use hashbrown::HashMap;
use herd_common::{
    code::{Key, Marker, Value},
    entry::{display_tags, Entry, TagId, Tags},
};
use herd_memory::LoadRegistry;
use parking_lot::{Mutex, RwLock};

/// Receiver of the tags whose lockout window has ended.
pub trait LockoutListener: Send + Sync + 'static {
    /// Called once per [`LockoutMap::end`] with the tags of the closed windows.
    fn on_lockout_end(&self, tags: &Tags);
}

impl<C, K, V, M> LockoutListener for LoadRegistry<C, K, V, M>
where
    C: Key,
    K: Key,
    V: Value,
    M: Marker,
{
    fn on_lockout_end(&self, tags: &Tags) {
        self.broadcast_invalid_ids(tags);
    }
}

/// [`LockoutMap`] tracks the tags under bulk invalidation.
///
/// While a window is open for a tag, values carrying it read as absent. When the window closes, every in-flight
/// load of every registered listener learns the tag as invalid, so a value computed during the window is never
/// served.
///
/// Windows nest: a tag stays locked out until every `start` has been matched by an `end`.
#[derive(Default)]
pub struct LockoutMap {
    windows: RwLock<HashMap<TagId, usize>>,
    listeners: Mutex<Vec<Weak<dyn LockoutListener>>>,
}

impl Debug for LockoutMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockoutMap")
            .field("active", &display_tags(&self.active()))
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl LockoutMap {
    /// Create a lockout map without any window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for the end of windows. Dropped listeners are pruned.
    pub fn register(&self, listener: Weak<dyn LockoutListener>) {
        self.listeners.lock().push(listener);
    }

    /// Open a window for every tag.
    pub fn start(&self, tags: &Tags) {
        let mut windows = self.windows.write();
        for tag in tags {
            *windows.entry(tag.clone()).or_default() += 1;
        }
        tracing::debug!(tags = %display_tags(tags), "[lockout]: start");
    }

    /// Close a window for every tag and broadcast the tags to the listeners.
    pub fn end(&self, tags: &Tags) {
        {
            let mut windows = self.windows.write();
            for tag in tags {
                if let Some(count) = windows.get_mut(tag) {
                    *count -= 1;
                    if *count == 0 {
                        windows.remove(tag);
                    }
                }
            }
        }
        let listeners = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect::<Vec<Arc<_>>>()
        };
        tracing::debug!(tags = %display_tags(tags), listeners = listeners.len(), "[lockout]: end");
        for listener in listeners {
            listener.on_lockout_end(tags);
        }
    }

    /// Whether any tag of the value is under an open window.
    pub fn is_locked_out<V>(&self, entry: &Entry<V>) -> bool {
        if entry.tags().is_empty() {
            return false;
        }
        let windows = self.windows.read();
        !windows.is_empty() && entry.tags().iter().any(|tag| windows.contains_key(tag))
    }

    /// Tags under an open window.
    pub fn active(&self) -> Tags {
        self.windows.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use herd_memory::LoadRecord;

    use super::*;

    fn tags(ids: &[&str]) -> Tags {
        ids.iter().map(|id| TagId::from(*id)).collect()
    }

    #[test]
    fn test_nested_windows() {
        let lockout = LockoutMap::new();
        let entry = Entry::new(1u64).with_tags(["a"]);
        assert!(!lockout.is_locked_out(&entry));

        lockout.start(&tags(&["a", "b"]));
        lockout.start(&tags(&["a"]));
        assert!(lockout.is_locked_out(&entry));
        assert!(!lockout.is_locked_out(&Entry::new(1u64)));

        lockout.end(&tags(&["a", "b"]));
        assert!(lockout.is_locked_out(&entry));
        assert_eq!(lockout.active(), tags(&["a"]));

        lockout.end(&tags(&["a"]));
        assert!(!lockout.is_locked_out(&entry));
        assert!(lockout.active().is_empty());

        // Unmatched end is harmless.
        lockout.end(&tags(&["c"]));
    }

    #[test_log::test]
    fn test_end_broadcasts_to_registries() {
        let lockout = LockoutMap::new();
        let registry = Arc::new(LoadRegistry::<&'static str, u64, u64, u64>::default());
        let listener: Weak<dyn LockoutListener> = Arc::downgrade(&registry) as Weak<dyn LockoutListener>;
        lockout.register(listener);

        let record = Arc::new(LoadRecord::new(1));
        registry.claim(&"c", 1, record.clone());
        record.promise().deliver(Entry::new(42).with_tags(["a"]));

        lockout.start(&tags(&["a"]));
        lockout.end(&tags(&["a"]));
        assert!(record.promise().wait(&1).unwrap().is_none());

        drop(registry);
        lockout.end(&tags(&["a"]));
        assert!(lockout.listeners.lock().is_empty());
    }
}
