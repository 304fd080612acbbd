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

use std::{fmt::Debug, sync::Arc, thread, time::Duration};

use herd_common::{
    duration::DurationExt,
    entry::{Entry, Outcome},
    error::{Error, Result},
};
use herd_memory::LoadRecord;
use herd_storage::{RemoteStore, StoreRegistry, Stored};

use crate::{config::LoadConfig, expiry::Expiry, lockout::LockoutMap};

/// Transform applied to every computed value before delivery, with the arguments of the load.
pub type ResultTransform<A, V> = Arc<dyn Fn(&A, Entry<V>) -> Entry<V> + Send + Sync>;

/// Transform applied to every computation error before it is fanned out to waiters, with the arguments of the load.
pub type ErrorTransform<A> = Arc<dyn Fn(&A, Error) -> Error + Send + Sync>;

type Record<S> = LoadRecord<<S as RemoteStore>::Value, <S as RemoteStore>::Marker>;
type Value<S> = <S as RemoteStore>::Value;
type Config<S> = LoadConfig<<S as RemoteStore>::Key, <S as RemoteStore>::Value>;

/// A key claimed by the current caller, in this process and in the remote store.
///
/// The release gate of the load is opened when the claim is dropped, whatever the path. If the caller unwinds,
/// the record is also removed and the remote claim abandoned, so that waiters retry instead of blocking.
struct Claim<'a, S>
where
    S: RemoteStore,
{
    store: &'a S,
    registry: &'a StoreRegistry<S>,
    conn: &'a S::Conn,
    key: &'a S::Key,
    marker: &'a S::Marker,
    record: &'a Arc<Record<S>>,
}

impl<S> Claim<'_, S>
where
    S: RemoteStore,
{
    fn release(&self) -> bool {
        self.registry.release(self.conn, self.key, self.record)
    }

    fn abandon(&self) {
        if let Err(e) = self.store.abandon(self.conn, self.key, self.marker) {
            tracing::warn!(key = ?self.key, ?e, "[loader]: failed to abandon load marker");
        }
    }
}

impl<S> Drop for Claim<'_, S>
where
    S: RemoteStore,
{
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::warn!(key = ?self.key, "[loader]: load panicked, abandon claim");
            self.release();
            self.record.promise().invalidate();
            if !self.record.is_foreign() {
                self.abandon();
            }
        }
        self.record.promise().release();
    }
}

/// [`Loader`] coordinates the loads of one cache over a [`RemoteStore`].
///
/// For every key, at most one caller among every thread and every process sharing the store runs the computation.
/// Other callers wait on it and get the same outcome: the value, the error, or [`Outcome::Absent`] when the load
/// has been invalidated and the caller must retry.
///
/// `A` is the type of the arguments of a load, handed to the computation and to the transforms.
pub struct Loader<S, A = ()>
where
    S: RemoteStore,
{
    pub(crate) store: Arc<S>,
    pub(crate) registry: Arc<StoreRegistry<S>>,
    pub(crate) name: String,
    pub(crate) expiry: Expiry<S::Key, S::Value>,
    pub(crate) result_transform: Option<ResultTransform<A, S::Value>>,
    pub(crate) error_transform: Option<ErrorTransform<A>>,
    pub(crate) hit_detection: bool,
    pub(crate) load_marker_fade: Duration,
    pub(crate) lockout: Option<Arc<LockoutMap>>,
}

impl<S, A> Debug for Loader<S, A>
where
    S: RemoteStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("name", &self.name)
            .field("store", &self.store)
            .field("registry", &self.registry)
            .field("defaults", self.expiry.defaults())
            .field("hit_detection", &self.hit_detection)
            .field("load_marker_fade", &self.load_marker_fade)
            .field("lockout", &self.lockout)
            .finish()
    }
}

impl<S, A> Loader<S, A>
where
    S: RemoteStore,
{
    /// Name of the cache, used to derive the store keys of its values.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The remote store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The registry of the in-flight loads of this loader.
    pub fn registry(&self) -> &Arc<StoreRegistry<S>> {
        &self.registry
    }

    /// Lifetime of the load markers of this loader.
    pub fn load_marker_fade(&self) -> Duration {
        self.load_marker_fade
    }

    /// Get the value of the key, computing it with `compute` if nobody else is.
    ///
    /// Returns [`Outcome::Absent`] if the load has been invalidated, or if the value is under a lockout window. The
    /// caller must then retry, see [`Loader::load`].
    ///
    /// Returns the error of the computation as is to the caller that ran it, and transformed by the error transform
    /// to every caller that waited on it.
    pub fn get<R, F>(
        &self,
        conn: &S::Conn,
        config: &Config<S>,
        args: &A,
        key: &S::Key,
        compute: F,
    ) -> Result<Outcome<Value<S>>>
    where
        F: FnOnce(&A) -> Result<R>,
        R: Into<Entry<Value<S>>>,
    {
        let marker = self.store.new_marker();
        let record = Arc::new(LoadRecord::new(marker.clone()));
        if let Some(existing) = self.registry.claim(conn, key.clone(), record.clone()) {
            tracing::trace!(?key, "[loader]: join in-flight load");
            return self.wait(key, &existing);
        }

        let claim = Claim {
            store: &*self.store,
            registry: &*self.registry,
            conn,
            key,
            marker: &marker,
            record: &record,
        };

        let stored = match self.store.claim_or_read(
            conn,
            key,
            &marker,
            self.load_marker_fade.as_millis_u64(),
            self.expiry.fade_ms(config),
        ) {
            Ok(stored) => stored,
            Err(e) => return self.fail(&claim, args, e),
        };

        match stored {
            Some(Stored::Value(entry)) => {
                claim.release();
                let entry = if self.hit_detection { entry.mark_cached() } else { entry };
                if record.promise().deliver(entry.clone()) {
                    Ok(self.settle(key, Some(entry)))
                } else {
                    tracing::debug!(?key, "[loader]: load invalidated before delivery of the stored value");
                    Ok(Outcome::Absent)
                }
            }
            Some(Stored::Marker(foreign)) => {
                tracing::trace!(?key, ?foreign, "[loader]: wait for foreign load");
                record.foreign_load();
                // The foreign load may have settled before the record turned foreign.
                self.reconcile(conn, key);
                self.wait(key, &record)
            }
            None => {
                record.our_load();
                self.compute(&claim, config, args, compute)
            }
        }
    }

    /// Get the value of the key like [`Loader::get`], retrying until a value or an error is produced.
    pub fn load<R, F>(&self, conn: &S::Conn, config: &Config<S>, args: &A, key: &S::Key, compute: F) -> Result<Value<S>>
    where
        F: Fn(&A) -> Result<R>,
        R: Into<Entry<Value<S>>>,
    {
        let mut attempts = 0usize;
        loop {
            if let Some(value) = self.get(conn, config, args, key, &compute)?.into_value() {
                return Ok(value);
            }
            attempts += 1;
            tracing::trace!(?key, attempts, "[loader]: retry absent load");
            if attempts < 16 {
                thread::yield_now();
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Read the value of the key if the remote store holds one. Never waits, never computes.
    pub fn if_cached(&self, conn: &S::Conn, config: &Config<S>, key: &S::Key) -> Outcome<Value<S>> {
        let marker = self.store.new_marker();
        match self.store.claim_or_read(
            conn,
            key,
            &marker,
            self.load_marker_fade.as_millis_u64(),
            self.expiry.fade_ms(config),
        ) {
            Ok(Some(Stored::Value(entry))) if !self.is_locked_out(&entry) => Outcome::Ready(entry.into_value()),
            Ok(Some(_)) => Outcome::Absent,
            Ok(None) => {
                // Nothing there, give the probe claim back at once.
                if let Err(e) = self.store.abandon(conn, key, &marker) {
                    tracing::warn!(?key, ?e, "[loader]: failed to abandon probe marker");
                }
                Outcome::Absent
            }
            Err(e) => {
                tracing::debug!(?key, ?e, "[loader]: failed to read the store");
                Outcome::Absent
            }
        }
    }

    /// Invalidate the in-flight load of the key, if there is. Returns whether there was.
    ///
    /// Waiters of the load get [`Outcome::Absent`], and a value computed by it is never installed.
    pub fn invalidate(&self, conn: &S::Conn, key: &S::Key) -> bool {
        self.registry.invalidate(conn, key)
    }

    /// Invalidate every in-flight load whose key matches `predicate`. Returns the count of invalidated loads.
    ///
    /// `predicate` runs with no registry lock held and may call back into this loader.
    pub fn invalidate_by<P>(&self, conn: &S::Conn, predicate: P) -> usize
    where
        P: Fn(&S::Key) -> bool,
    {
        self.registry.invalidate_by(conn, predicate)
    }

    /// Install a value without loading it. The value replaces whatever the store holds, load markers included.
    pub fn put_value(
        &self,
        conn: &S::Conn,
        config: &Config<S>,
        key: &S::Key,
        entry: impl Into<Entry<Value<S>>>,
    ) -> Result<bool> {
        let entry = entry.into();
        let keys = self.store.derive_keys(&self.name, key, entry.tags());
        let expiry_ms = self.expiry.expiry_ms(config, key, &entry);
        self.store.install(conn, &keys, &entry, None, expiry_ms)
    }

    /// Settle the loads of the connection that wait on a foreign load which has already completed or vanished.
    ///
    /// Returns the count of settled loads.
    pub fn poll(&self, conn: &S::Conn) -> usize {
        self.registry
            .foreign_keys(conn)
            .iter()
            .filter(|key| self.reconcile(conn, key))
            .count()
    }

    /// Renew the markers of the loads of the connection computed by this process.
    ///
    /// Returns the count of renewed markers.
    pub fn refresh_markers(&self, conn: &S::Conn) -> usize {
        let ttl_ms = self.load_marker_fade.as_millis_u64();
        let mut refreshed = 0;
        for (key, marker) in self.registry.owned_markers(conn) {
            match self.store.refresh(conn, &key, &marker, ttl_ms) {
                Ok(true) => refreshed += 1,
                Ok(false) => tracing::debug!(?key, "[loader]: load marker lost before refresh"),
                Err(e) => tracing::warn!(?key, ?e, "[loader]: failed to refresh load marker"),
            }
        }
        refreshed
    }

    fn compute<R, F>(&self, claim: &Claim<'_, S>, config: &Config<S>, args: &A, compute: F) -> Result<Outcome<Value<S>>>
    where
        F: FnOnce(&A) -> Result<R>,
        R: Into<Entry<Value<S>>>,
    {
        let entry = match compute(args) {
            Ok(result) => {
                let entry = result.into();
                match &self.result_transform {
                    Some(transform) => transform(args, entry),
                    None => entry,
                }
            }
            Err(e) => return self.fail(claim, args, e),
        };

        claim.release();
        if !claim.record.promise().deliver(entry.clone()) {
            tracing::debug!(key = ?claim.key, "[loader]: load invalidated during computation, discard value");
            claim.abandon();
            return Ok(Outcome::Absent);
        }

        if entry.is_no_cache() {
            tracing::trace!(key = ?claim.key, "[loader]: value is not cached");
            claim.abandon();
        } else {
            let keys = self.store.derive_keys(&self.name, claim.key, entry.tags());
            let expiry_ms = self.expiry.expiry_ms(config, claim.key, &entry);
            match self
                .store
                .install(claim.conn, &keys, &entry, Some(claim.marker), expiry_ms)
            {
                Ok(true) => tracing::trace!(key = ?claim.key, expiry_ms, "[loader]: value installed"),
                Ok(false) => tracing::debug!(key = ?claim.key, "[loader]: load marker lost before install"),
                Err(e) => return self.fail(claim, args, e),
            }
        }
        Ok(Outcome::Ready(entry.into_value()))
    }

    fn fail(&self, claim: &Claim<'_, S>, args: &A, error: Error) -> Result<Outcome<Value<S>>> {
        claim.release();
        claim.abandon();
        if claim.record.promise().is_invalid() {
            tracing::debug!(key = ?claim.key, ?error, "[loader]: failed load was invalidated, swallow error");
            return Ok(Outcome::Absent);
        }
        let shared = match &self.error_transform {
            Some(transform) => transform(args, error.clone()),
            None => error.clone(),
        };
        claim.record.promise().deliver_error(shared);
        Err(error)
    }

    fn wait(&self, key: &S::Key, record: &Record<S>) -> Result<Outcome<Value<S>>> {
        let entry = record.promise().wait(key)?;
        Ok(self.settle(key, entry))
    }

    fn settle(&self, key: &S::Key, entry: Option<Entry<Value<S>>>) -> Outcome<Value<S>> {
        match entry {
            None => Outcome::Absent,
            Some(entry) if self.is_locked_out(&entry) => {
                tracing::trace!(?key, "[loader]: value is locked out");
                Outcome::Absent
            }
            Some(entry) => Outcome::from_entry(entry),
        }
    }

    fn is_locked_out(&self, entry: &Entry<Value<S>>) -> bool {
        self.lockout
            .as_ref()
            .is_some_and(|lockout| lockout.is_locked_out(entry))
    }

    /// Settle the foreign load of the key from what the store holds now. Returns whether it has been settled.
    fn reconcile(&self, conn: &S::Conn, key: &S::Key) -> bool {
        match self.store.read(conn, key) {
            Ok(Some(Stored::Marker(_))) => false,
            Ok(Some(Stored::Value(entry))) => self.registry.complete_foreign(conn, key, entry),
            Ok(None) => self.registry.abandon_foreign(conn, key),
            Err(e) => {
                tracing::warn!(?key, ?e, "[loader]: failed to read foreign load");
                false
            }
        }
    }
}
