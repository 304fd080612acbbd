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

use std::{fmt::Debug, sync::Weak};

use herd_common::{
    code::{Key, Marker, Value},
    entry::{Entry, Tags},
    error::Result,
};
use herd_memory::LoadRegistry;

/// What the remote store holds under a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stored<V, M> {
    /// A load marker: some process is computing the value.
    Marker(M),
    /// A real value.
    Value(Entry<V>),
}

impl<V, M> Stored<V, M> {
    /// Whether the store holds a load marker.
    pub fn is_marker(&self) -> bool {
        matches!(self, Self::Marker(_))
    }

    /// Take the real value if there is.
    pub fn into_entry(self) -> Option<Entry<V>> {
        match self {
            Self::Marker(_) => None,
            Self::Value(entry) => Some(entry),
        }
    }
}

/// Load registry that a store delivers foreign completions into.
pub type StoreRegistry<S> = LoadRegistry<
    <S as RemoteStore>::Conn,
    <S as RemoteStore>::Key,
    <S as RemoteStore>::Value,
    <S as RemoteStore>::Marker,
>;

/// The remote store shared by every process that coordinates loads.
///
/// Claim, install and abandon must be atomic with respect to every concurrent caller, in this process or in any
/// other.
pub trait RemoteStore: Send + Sync + Sized + 'static + Debug {
    /// Connection to the store. Loads are coordinated per connection.
    type Conn: Key;
    /// Key of the store.
    type Key: Key;
    /// Value of the store.
    type Value: Value;
    /// Load marker.
    type Marker: Marker;

    /// Mint a new load marker, unique among every marker ever minted by any process.
    fn new_marker(&self) -> Self::Marker;

    /// Read the key, or claim it with `marker` if nothing is there.
    ///
    /// Returns [`None`] if the key was vacant and `marker` has been installed with a lifetime of `marker_ttl_ms`.
    /// Otherwise returns what the store holds. A real value read with `fade_ms` has its lifetime renewed for
    /// `fade_ms`.
    fn claim_or_read(
        &self,
        conn: &Self::Conn,
        key: &Self::Key,
        marker: &Self::Marker,
        marker_ttl_ms: u64,
        fade_ms: Option<u64>,
    ) -> Result<Option<Stored<Self::Value, Self::Marker>>>;

    /// Read the key without claiming it.
    fn read(&self, conn: &Self::Conn, key: &Self::Key) -> Result<Option<Stored<Self::Value, Self::Marker>>>;

    /// Replace the entry of every key with the value, if the first key is still claimed by `marker`.
    ///
    /// Without a marker the value is written unconditionally. Returns whether the value has been written.
    fn install(
        &self,
        conn: &Self::Conn,
        keys: &[Self::Key],
        entry: &Entry<Self::Value>,
        marker: Option<&Self::Marker>,
        expiry_ms: Option<u64>,
    ) -> Result<bool>;

    /// Remove the marker of the key if it is still `marker`.
    fn abandon(&self, conn: &Self::Conn, key: &Self::Key, marker: &Self::Marker) -> Result<()>;

    /// Renew the lifetime of the marker of the key if it is still `marker`. Returns whether it has been renewed.
    fn refresh(&self, conn: &Self::Conn, key: &Self::Key, marker: &Self::Marker, marker_ttl_ms: u64) -> Result<bool>;

    /// Expand one key and the tags of its value into the store keys to install under. The key itself comes first.
    fn derive_keys(&self, cache_name: &str, key: &Self::Key, tags: &Tags) -> Vec<Self::Key>;

    /// Deliver the foreign completions of the connection into `registry` from now on. Idempotent per connection
    /// and registry.
    ///
    /// The store must not hold any lock of its own while calling into the registry.
    fn arm_listener(&self, conn: &Self::Conn, registry: Weak<StoreRegistry<Self>>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored() {
        let marker = Stored::<u64, u64>::Marker(1);
        assert!(marker.is_marker());
        assert_eq!(marker.into_entry(), None);

        let value = Stored::<u64, u64>::Value(Entry::new(2));
        assert!(!value.is_marker());
        assert_eq!(value.into_entry().map(Entry::into_value), Some(2));
    }
}
