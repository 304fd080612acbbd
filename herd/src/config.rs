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
    sync::{Arc, LazyLock},
    time::Duration,
};

use herd_common::{entry::Entry, error::Error};

/// Environment variable that overrides how long a load marker lives before it fades, in seconds.
///
/// A load marker is refreshed while its load runs. If the owner dies, the marker fades after this long and other
/// callers can claim the key again.
pub const LOAD_MARKER_FADE_ENV: &str = "HERD_LOAD_MARKER_FADE";

/// Default load marker lifetime.
pub const DEFAULT_LOAD_MARKER_FADE: Duration = Duration::from_secs(5);

static LOAD_MARKER_FADE: LazyLock<Duration> =
    LazyLock::new(|| parse_load_marker_fade(std::env::var(LOAD_MARKER_FADE_ENV).ok().as_deref()));

/// Load marker lifetime of the process, read from [`LOAD_MARKER_FADE_ENV`] once.
pub fn load_marker_fade() -> Duration {
    *LOAD_MARKER_FADE
}

fn parse_load_marker_fade(raw: Option<&str>) -> Duration {
    let Some(raw) = raw else {
        return DEFAULT_LOAD_MARKER_FADE;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Duration::from_secs(secs),
        _ => {
            let e = Error::config(LOAD_MARKER_FADE_ENV, raw);
            tracing::warn!(
                ?e,
                default = ?DEFAULT_LOAD_MARKER_FADE,
                "[config]: invalid load marker fade, fall back to default"
            );
            DEFAULT_LOAD_MARKER_FADE
        }
    }
}

/// Dynamic ttl of a value. Returning [`None`] falls back to the static ttl, then to the fade.
pub type TtlFn<K, V> = Arc<dyn Fn(&K, &Entry<V>) -> Option<Duration> + Send + Sync + 'static>;

/// Expiry configuration of a load.
///
/// Used both per call and as the loader defaults. A per call config that sets none of ttl, fade and ttl fn defers
/// to the loader defaults entirely.
pub struct LoadConfig<K, V> {
    ttl: Option<Duration>,
    fade: Option<Duration>,
    ttl_fn: Option<TtlFn<K, V>>,
}

impl<K, V> Debug for LoadConfig<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadConfig")
            .field("ttl", &self.ttl)
            .field("fade", &self.fade)
            .field("ttl_fn", &self.ttl_fn.is_some())
            .finish()
    }
}

impl<K, V> Clone for LoadConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            fade: self.fade,
            ttl_fn: self.ttl_fn.clone(),
        }
    }
}

impl<K, V> Default for LoadConfig<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> LoadConfig<K, V> {
    /// Create an empty config.
    pub fn new() -> Self {
        Self {
            ttl: None,
            fade: None,
            ttl_fn: None,
        }
    }

    /// Set how long an installed value lives.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set how long a value lives without being read. Every read renews it.
    pub fn with_fade(mut self, fade: Duration) -> Self {
        self.fade = Some(fade);
        self
    }

    /// Set the dynamic ttl, which takes precedence over the static ttl and the fade.
    pub fn with_ttl_fn<F>(mut self, ttl_fn: F) -> Self
    where
        F: Fn(&K, &Entry<V>) -> Option<Duration> + Send + Sync + 'static,
    {
        self.ttl_fn = Some(Arc::new(ttl_fn));
        self
    }

    /// Static ttl.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Fade.
    pub fn fade(&self) -> Option<Duration> {
        self.fade
    }

    /// Dynamic ttl.
    pub fn ttl_fn(&self) -> Option<&TtlFn<K, V>> {
        self.ttl_fn.as_ref()
    }

    /// Whether none of ttl, fade and ttl fn is set.
    pub fn is_unset(&self) -> bool {
        self.ttl.is_none() && self.fade.is_none() && self.ttl_fn.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_parse_load_marker_fade() {
        assert_eq!(parse_load_marker_fade(None), DEFAULT_LOAD_MARKER_FADE);
        assert_eq!(parse_load_marker_fade(Some("12")), Duration::from_secs(12));
        assert_eq!(parse_load_marker_fade(Some(" 3 ")), Duration::from_secs(3));
        assert_eq!(parse_load_marker_fade(Some("0")), DEFAULT_LOAD_MARKER_FADE);
        assert_eq!(parse_load_marker_fade(Some("5s")), DEFAULT_LOAD_MARKER_FADE);
    }

    #[test]
    fn test_load_config() {
        let config = LoadConfig::<u64, u64>::new();
        assert!(config.is_unset());
        let config = config.with_fade(Duration::from_secs(1));
        assert!(!config.is_unset());
        assert_eq!(config.fade(), Some(Duration::from_secs(1)));
        assert_eq!(config.ttl(), None);

        let config = LoadConfig::<u64, u64>::new().with_ttl_fn(|_, _| None);
        assert!(!config.is_unset());
        assert!(config.clone().ttl_fn().is_some());
    }
}
