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
    time::Duration,
};

use herd_common::{entry::Entry, error::Error};
use herd_memory::LoadRegistry;
use herd_storage::{RemoteStore, StoreRegistry};

use crate::{
    config::{load_marker_fade, LoadConfig},
    expiry::Expiry,
    loader::{ErrorTransform, Loader, ResultTransform},
    lockout::{LockoutListener, LockoutMap},
};

/// [`Loader`] builder.
pub struct LoaderBuilder<S, A = ()>
where
    S: RemoteStore,
{
    store: Arc<S>,
    name: String,
    defaults: LoadConfig<S::Key, S::Value>,
    result_transform: Option<ResultTransform<A, S::Value>>,
    error_transform: Option<ErrorTransform<A>>,
    hit_detection: bool,
    load_marker_fade: Option<Duration>,
    lockout: Option<Arc<LockoutMap>>,
}

impl<S, A> Debug for LoaderBuilder<S, A>
where
    S: RemoteStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderBuilder")
            .field("name", &self.name)
            .field("store", &self.store)
            .field("defaults", &self.defaults)
            .field("hit_detection", &self.hit_detection)
            .field("load_marker_fade", &self.load_marker_fade)
            .finish()
    }
}

impl<S, A> LoaderBuilder<S, A>
where
    S: RemoteStore,
{
    /// Create a loader builder over the remote store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            name: "herd".to_string(),
            defaults: LoadConfig::new(),
            result_transform: None,
            error_transform: None,
            hit_detection: false,
            load_marker_fade: None,
            lockout: None,
        }
    }

    /// Set the name of the cache. The store derives the keys of the values from it.
    ///
    /// Default: `herd`.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Set the default ttl of the values.
    ///
    /// Default: no ttl.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.defaults = self.defaults.with_ttl(ttl);
        self
    }

    /// Set the default fade of the values.
    ///
    /// Default: no fade.
    pub fn with_fade(mut self, fade: Duration) -> Self {
        self.defaults = self.defaults.with_fade(fade);
        self
    }

    /// Set the default dynamic ttl of the values.
    ///
    /// Default: no dynamic ttl.
    pub fn with_ttl_fn<F>(mut self, ttl_fn: F) -> Self
    where
        F: Fn(&S::Key, &Entry<S::Value>) -> Option<Duration> + Send + Sync + 'static,
    {
        self.defaults = self.defaults.with_ttl_fn(ttl_fn);
        self
    }

    /// Set the transform applied to every computed value before it is delivered and installed.
    pub fn with_result_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&A, Entry<S::Value>) -> Entry<S::Value> + Send + Sync + 'static,
    {
        self.result_transform = Some(Arc::new(transform));
        self
    }

    /// Set the transform applied to every computation error before it is fanned out.
    ///
    /// The caller that ran the computation gets the untransformed error.
    pub fn with_error_transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(&A, Error) -> Error + Send + Sync + 'static,
    {
        self.error_transform = Some(Arc::new(transform));
        self
    }

    /// Report values served from the remote store as [`herd_common::entry::Outcome::Hit`].
    ///
    /// Default: `false`.
    pub fn with_hit_detection(mut self, hit_detection: bool) -> Self {
        self.hit_detection = hit_detection;
        self
    }

    /// Override the lifetime of load markers.
    ///
    /// Default: read from [`crate::config::LOAD_MARKER_FADE_ENV`], 5s if unset.
    pub fn with_load_marker_fade(mut self, fade: Duration) -> Self {
        self.load_marker_fade = Some(fade);
        self
    }

    /// Consult the lockout map on every read, and learn the tags of every ended lockout window.
    ///
    /// Default: no lockout.
    pub fn with_lockout_map(mut self, lockout: Arc<LockoutMap>) -> Self {
        self.lockout = Some(lockout);
        self
    }

    /// Build the loader.
    pub fn build(self) -> Loader<S, A> {
        let store = self.store;
        let registry = Arc::new_cyclic(|registry: &Weak<StoreRegistry<S>>| {
            let store = store.clone();
            let registry = registry.clone();
            LoadRegistry::new(move |conn: &S::Conn| store.arm_listener(conn, registry.clone()))
        });
        if let Some(lockout) = self.lockout.as_ref() {
            lockout.register(Arc::downgrade(&registry) as Weak<dyn LockoutListener>);
        }
        let load_marker_fade = self.load_marker_fade.unwrap_or_else(load_marker_fade);
        tracing::debug!(name = %self.name, ?load_marker_fade, "[loader]: build");

        Loader {
            store,
            registry,
            name: self.name,
            expiry: Expiry::new(self.defaults),
            result_transform: self.result_transform,
            error_transform: self.error_transform,
            hit_detection: self.hit_detection,
            load_marker_fade,
            lockout: self.lockout,
        }
    }
}
