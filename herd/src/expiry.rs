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

use herd_common::{duration::millis, entry::Entry};

use crate::config::LoadConfig;

/// Resolves fade and expiry of a load from the per call config and the loader defaults.
#[derive(Debug)]
pub struct Expiry<K, V> {
    defaults: LoadConfig<K, V>,
}

impl<K, V> Expiry<K, V> {
    /// Create the policy with the loader defaults.
    pub fn new(defaults: LoadConfig<K, V>) -> Self {
        Self { defaults }
    }

    /// Loader defaults.
    pub fn defaults(&self) -> &LoadConfig<K, V> {
        &self.defaults
    }

    fn effective<'a>(&'a self, config: &'a LoadConfig<K, V>) -> &'a LoadConfig<K, V> {
        if config.is_unset() {
            &self.defaults
        } else {
            config
        }
    }

    /// Fade in milliseconds renewed on every read of a value.
    pub fn fade_ms(&self, config: &LoadConfig<K, V>) -> Option<u64> {
        millis(self.effective(config).fade())
    }

    /// Expiry in milliseconds of a value about to be installed. [`None`] means no expiry.
    ///
    /// The ttl fn wins, then the static ttl, then the fade.
    pub fn expiry_ms(&self, config: &LoadConfig<K, V>, key: &K, entry: &Entry<V>) -> Option<u64> {
        let config = self.effective(config);
        let expiry = config
            .ttl_fn()
            .and_then(|ttl_fn| ttl_fn(key, entry))
            .or(config.ttl())
            .or(config.fade());
        millis(expiry)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_fade_defers_to_defaults_only_when_unset() {
        let expiry = Expiry::new(LoadConfig::<u64, u64>::new().with_fade(secs(1)));
        assert_eq!(expiry.fade_ms(&LoadConfig::new()), Some(1_000));
        // A call config with a ttl but no fade has no fade.
        assert_eq!(expiry.fade_ms(&LoadConfig::new().with_ttl(secs(9))), None);
        assert_eq!(expiry.fade_ms(&LoadConfig::new().with_fade(secs(2))), Some(2_000));
    }

    #[test]
    fn test_expiry_precedence() {
        let entry = Entry::new(7u64);
        let expiry = Expiry::new(
            LoadConfig::<u64, u64>::new()
                .with_ttl(secs(10))
                .with_fade(secs(20))
                .with_ttl_fn(|key, _| (*key == 1).then(|| Duration::from_millis(1_500))),
        );

        // Loader defaults: ttl fn, then ttl.
        assert_eq!(expiry.expiry_ms(&LoadConfig::new(), &1, &entry), Some(1_500));
        assert_eq!(expiry.expiry_ms(&LoadConfig::new(), &2, &entry), Some(10_000));

        // A call config replaces all three defaults.
        assert_eq!(expiry.expiry_ms(&LoadConfig::new().with_fade(secs(3)), &1, &entry), Some(3_000));
        assert_eq!(
            expiry.expiry_ms(&LoadConfig::new().with_ttl(secs(4)).with_fade(secs(3)), &1, &entry),
            Some(4_000)
        );
        assert_eq!(
            expiry.expiry_ms(
                &LoadConfig::new().with_ttl(secs(4)).with_ttl_fn(|_, entry| Some(secs(*entry.value()))),
                &1,
                &entry
            ),
            Some(7_000)
        );
    }

    #[test]
    fn test_no_expiry() {
        let expiry = Expiry::new(LoadConfig::<u64, u64>::new());
        assert_eq!(expiry.fade_ms(&LoadConfig::new()), None);
        assert_eq!(expiry.expiry_ms(&LoadConfig::new(), &1, &Entry::new(1)), None);
        assert_eq!(
            expiry.expiry_ms(&LoadConfig::new().with_ttl_fn(|_, _| None), &1, &Entry::new(1)),
            None
        );
    }
}
