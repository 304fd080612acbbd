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

use arc_swap::ArcSwapOption;

use crate::promise::Promise;

/// [`LoadRecord`] tracks one in-flight load of a key.
///
/// It pairs the [`Promise`] that waiters block on with the load marker. The marker is the token that proves the
/// owner of the record is responsible for eventually populating the remote store:
///
/// - With a marker, the load is ours: this process computes the value and installs it under the marker.
/// - Without a marker, a foreign process owns the load and the record only waits for its completion.
pub struct LoadRecord<V, M> {
    promise: Promise<V>,
    marker: ArcSwapOption<M>,
}

impl<V, M> Debug for LoadRecord<V, M>
where
    M: Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadRecord")
            .field("promise", &self.promise)
            .field("marker", &self.marker.load_full())
            .finish()
    }
}

impl<V, M> LoadRecord<V, M> {
    /// Create a record with a freshly minted marker.
    pub fn new(marker: M) -> Self {
        Self {
            promise: Promise::new(),
            marker: ArcSwapOption::from_pointee(marker),
        }
    }

    /// Get the promise of the load.
    pub fn promise(&self) -> &Promise<V> {
        &self.promise
    }

    /// Get the load marker, [`None`] if the load is foreign.
    pub fn marker(&self) -> Option<Arc<M>> {
        self.marker.load_full()
    }

    /// Replace the load marker.
    pub fn set_marker(&self, marker: Option<M>) {
        self.marker.store(marker.map(Arc::new));
    }

    /// Take ownership of the computation.
    pub fn our_load(&self) {
        self.promise.init();
    }

    /// Hand the computation over to a foreign owner; the record only waits from now on.
    pub fn foreign_load(&self) {
        self.marker.store(None);
    }

    /// Whether a foreign owner is computing the value.
    pub fn is_foreign(&self) -> bool {
        self.marker.load().is_none()
    }

    /// Whether this process owns the computation.
    pub fn is_ours(&self) -> bool {
        !self.is_foreign() && self.promise.is_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_transitions() {
        let record = LoadRecord::<u64, u64>::new(7);
        assert_eq!(record.marker().as_deref(), Some(&7));
        assert!(!record.is_foreign());
        assert!(!record.is_ours());

        record.our_load();
        assert!(record.is_ours());
        assert!(record.promise().is_local());

        record.foreign_load();
        assert!(record.is_foreign());
        assert!(!record.is_ours());
        assert_eq!(record.marker(), None);

        record.set_marker(Some(8));
        assert_eq!(record.marker().as_deref(), Some(&8));
        assert!(record.is_ours());
    }
}
