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
    fmt::{Debug, Display},
    sync::Arc,
};

use hashbrown::HashSet;
use itertools::Itertools;

/// Opaque identifier attached to cached values for bulk invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TagId(Arc<str>);

impl TagId {
    /// Create a tag identifier.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Get the tag identifier as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TagId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TagId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Set of tag identifiers.
pub type Tags = HashSet<TagId>;

/// Format tags in a stable order, e.g. `{a, b, c}`.
pub fn display_tags(tags: &Tags) -> String {
    format!("{{{}}}", tags.iter().sorted().join(", "))
}

/// Envelope of a cached value.
///
/// Besides the value itself, the envelope carries:
///
/// - `no_cache`: the value is returned to the caller that computed it but never persisted.
/// - `tags`: tag identifiers used by bulk invalidation.
/// - `cached`: hit marker, stamped on values served from the remote store when hit detection is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Entry<V> {
    value: V,
    #[cfg_attr(feature = "serde", serde(default))]
    no_cache: bool,
    #[cfg_attr(feature = "serde", serde(default))]
    tags: Tags,
    #[cfg_attr(feature = "serde", serde(skip))]
    cached: bool,
}

impl<V> From<V> for Entry<V> {
    fn from(value: V) -> Self {
        Self::new(value)
    }
}

impl<V> Entry<V> {
    /// Wrap a plain value.
    pub fn new(value: V) -> Self {
        Self {
            value,
            no_cache: false,
            tags: Tags::new(),
            cached: false,
        }
    }

    /// Set the no-cache flag.
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Attach tag identifiers to the value.
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TagId>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Stamp the hit marker.
    pub fn mark_cached(mut self) -> Self {
        self.cached = true;
        self
    }

    /// Get the wrapped value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Unwrap the value, dropping the envelope.
    pub fn into_value(self) -> V {
        self.value
    }

    /// Map the wrapped value, keeping the envelope.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Entry<U> {
        Entry {
            value: f(self.value),
            no_cache: self.no_cache,
            tags: self.tags,
            cached: self.cached,
        }
    }

    /// Whether the value must not be persisted.
    pub fn is_no_cache(&self) -> bool {
        self.no_cache
    }

    /// Tag identifiers of the value.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Whether the value has been served from the remote store with hit detection enabled.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Whether any tag of the value is in `tags`.
    pub fn is_tagged_any(&self, tags: &Tags) -> bool {
        // Probe the smaller set.
        if self.tags.len() <= tags.len() {
            self.tags.iter().any(|tag| tags.contains(tag))
        } else {
            tags.iter().any(|tag| self.tags.contains(tag))
        }
    }
}

/// Outcome of a load attempt.
///
/// [`Outcome::Absent`] means that nothing usable is available and the caller must retry the whole operation. It is
/// distinct from every real value, including `None` for `Option` values.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<V> {
    /// The value has been loaded, by this caller or by a load it joined.
    Ready(V),
    /// The value has been served from the remote store and hit detection is enabled.
    Hit(V),
    /// No usable result, retry.
    Absent,
}

impl<V> Outcome<V> {
    /// Build the outcome from an entry, honoring its hit marker.
    pub fn from_entry(entry: Entry<V>) -> Self {
        if entry.is_cached() {
            Self::Hit(entry.into_value())
        } else {
            Self::Ready(entry.into_value())
        }
    }

    /// Whether the caller must retry.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Whether the value has been served from the remote store.
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Get the value reference if there is.
    pub fn value(&self) -> Option<&V> {
        match self {
            Self::Ready(v) | Self::Hit(v) => Some(v),
            Self::Absent => None,
        }
    }

    /// Consume the outcome and return the value if there is.
    pub fn into_value(self) -> Option<V> {
        match self {
            Self::Ready(v) | Self::Hit(v) => Some(v),
            Self::Absent => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(ids: &[&str]) -> Tags {
        ids.iter().map(|id| TagId::from(*id)).collect()
    }

    #[test]
    fn test_entry_tag_intersection() {
        let entry = Entry::new(1u64).with_tags(["a", "b"]);
        assert!(entry.is_tagged_any(&tags(&["b"])));
        assert!(entry.is_tagged_any(&tags(&["x", "y", "z", "a"])));
        assert!(!entry.is_tagged_any(&tags(&["c"])));
        assert!(!entry.is_tagged_any(&Tags::new()));
        assert!(!Entry::new(1u64).is_tagged_any(&tags(&["a"])));
    }

    #[test]
    fn test_outcome_hit_marker() {
        let entry = Entry::new("v").with_no_cache(true);
        assert_eq!(Outcome::from_entry(entry.clone()), Outcome::Ready("v"));
        assert_eq!(Outcome::from_entry(entry.mark_cached()), Outcome::Hit("v"));
    }

    #[test]
    fn test_absent_is_not_none() {
        let outcome: Outcome<Option<u64>> = Outcome::Ready(None);
        assert!(!outcome.is_absent());
        assert_eq!(outcome.into_value(), Some(None));
        assert_eq!(Outcome::<Option<u64>>::Absent.into_value(), None);
    }

    #[test]
    fn test_display_tags() {
        assert_eq!(display_tags(&tags(&["b", "c", "a"])), "{a, b, c}");
        assert_eq!(display_tags(&Tags::new()), "{}");
    }
}
