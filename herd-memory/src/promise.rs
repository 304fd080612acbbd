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

use std::{fmt::Debug, time::Duration};

use herd_common::{
    countdown::Countdown,
    entry::{display_tags, Entry, Tags},
    error::{Error, Result},
};
use parking_lot::{Condvar, Mutex};

enum State<V> {
    Pending,
    Delivered(Entry<V>),
    Excepted(Error),
    Invalidated,
}

impl<V> State<V> {
    fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }
}

struct Inner<V> {
    state: State<V>,
    /// Sticky: set by the first `invalidate()` whatever the state is.
    invalid: bool,
    /// Append-only.
    invalid_ids: Tags,
    local: bool,
}

/// A one-shot, multi-waiter result cell for a single load.
///
/// The promise resolves at most once, to a value, an error, or an invalidation. Any number of threads can block on
/// it with [`Promise::wait`] and all of them observe the same outcome.
///
/// Resolution and release are two independent gates:
///
/// - Resolution publishes the outcome and wakes the waiters.
/// - Release is run by the owner of the load on every path, including unwinding. A waiter that finds the promise
///   still pending after release gives up with an absent result instead of blocking forever.
///
/// A delivered value can still be judged stale afterwards, either by [`Promise::invalidate`] or by
/// [`Promise::add_invalid_ids`] with a tag that the value carries. The check happens every time a waiter reads.
pub struct Promise<V> {
    inner: Mutex<Inner<V>>,
    resolved: Condvar,
    released: Countdown,
}

impl<V> Debug for Promise<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        let state = match inner.state {
            State::Pending => "pending",
            State::Delivered(_) => "delivered",
            State::Excepted(_) => "excepted",
            State::Invalidated => "invalidated",
        };
        f.debug_struct("Promise")
            .field("state", &state)
            .field("invalid", &inner.invalid)
            .field("invalid_ids", &display_tags(&inner.invalid_ids))
            .field("local", &inner.local)
            .field("released", &self.released.is_open())
            .finish()
    }
}

impl<V> Default for Promise<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Promise<V> {
    /// Create a pending promise.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Pending,
                invalid: false,
                invalid_ids: Tags::new(),
                local: false,
            }),
            resolved: Condvar::new(),
            released: Countdown::new(1),
        }
    }

    /// Mark the promise as one that the holder resolves itself, as opposed to one resolved by a foreign delivery.
    pub fn init(&self) {
        self.inner.lock().local = true;
    }

    /// Whether [`Promise::init`] has been called.
    pub fn is_local(&self) -> bool {
        self.inner.lock().local
    }

    /// Resolve the promise with a value.
    ///
    /// Returns `false` if the promise has been invalidated or already resolved. The caller must then discard the
    /// value and never persist it.
    pub fn deliver(&self, entry: Entry<V>) -> bool {
        let mut inner = self.inner.lock();
        if inner.invalid || !inner.state.is_pending() {
            return false;
        }
        inner.state = State::Delivered(entry);
        self.resolved.notify_all();
        true
    }

    /// Resolve the promise with an error. Every waiter, current or future, gets a clone of it.
    ///
    /// No-op if the promise has been invalidated or already resolved.
    pub fn deliver_error(&self, error: Error) {
        let mut inner = self.inner.lock();
        if inner.invalid || !inner.state.is_pending() {
            return;
        }
        inner.state = State::Excepted(error);
        self.resolved.notify_all();
    }

    /// Invalidate the promise. Idempotent.
    ///
    /// A pending promise resolves as invalidated. A delivered value is kept but reads as absent from now on.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        inner.invalid = true;
        if inner.state.is_pending() {
            inner.state = State::Invalidated;
            self.resolved.notify_all();
        }
    }

    /// Whether the promise has been invalidated.
    pub fn is_invalid(&self) -> bool {
        self.inner.lock().invalid
    }

    /// Whether the promise has been resolved.
    pub fn is_resolved(&self) -> bool {
        !self.inner.lock().state.is_pending()
    }

    /// Merge tag identifiers into the invalid set.
    ///
    /// A delivered value tagged with any of them reads as absent from now on.
    pub fn add_invalid_ids<'a>(&self, tags: impl IntoIterator<Item = &'a herd_common::entry::TagId>) {
        let mut inner = self.inner.lock();
        inner.invalid_ids.extend(tags.into_iter().cloned());
    }

    /// Open the release gate. Idempotent.
    pub fn release(&self) {
        if self.released.countdown() {
            // Waiters check the gate under the state lock.
            let _inner = self.inner.lock();
            self.resolved.notify_all();
        }
    }

    /// Whether the release gate is open.
    pub fn is_released(&self) -> bool {
        self.released.is_open()
    }

    /// Block until the release gate opens or `timeout` elapses. Returns whether the gate is open.
    pub fn wait_released(&self, timeout: Duration) -> bool {
        self.released.wait_timeout(timeout)
    }
}

impl<V> Promise<V>
where
    V: Clone,
{
    /// Block until the promise resolves or is released.
    ///
    /// Returns:
    ///
    /// - `Err(e)` if the load failed.
    /// - `Ok(None)` (absent) if the promise has been invalidated, if the delivered value carries an invalid tag, or if
    ///   the promise has been released without resolution.
    /// - `Ok(Some(entry))` otherwise.
    pub fn wait<K: Debug>(&self, key: &K) -> Result<Option<Entry<V>>> {
        let mut inner = self.inner.lock();
        while inner.state.is_pending() {
            if self.released.is_open() {
                tracing::debug!(?key, "[promise]: released without resolution");
                return Ok(None);
            }
            self.resolved.wait(&mut inner);
        }
        match &inner.state {
            State::Pending => unreachable!(),
            State::Excepted(e) => Err(e.clone()),
            State::Invalidated => Ok(None),
            State::Delivered(_) if inner.invalid => Ok(None),
            State::Delivered(entry) if entry.is_tagged_any(&inner.invalid_ids) => {
                tracing::trace!(?key, tags = %display_tags(entry.tags()), "[promise]: delivered value is tag invalidated");
                Ok(None)
            }
            State::Delivered(entry) => Ok(Some(entry.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    use herd_common::{entry::TagId, error::ErrorKind};

    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Promise<u64>>();
    }

    fn tags(ids: &[&str]) -> Tags {
        ids.iter().map(|id| TagId::from(*id)).collect()
    }

    #[test]
    fn test_deliver_once() {
        let p = Promise::new();
        assert!(p.deliver(Entry::new(1u64)));
        assert!(!p.deliver(Entry::new(2u64)));
        p.deliver_error(Error::store("late"));
        assert_eq!(p.wait(&"k").unwrap().map(Entry::into_value), Some(1));
    }

    #[test]
    fn test_deliver_after_invalidate() {
        let p = Promise::<u64>::new();
        p.invalidate();
        p.invalidate();
        assert!(p.is_invalid());
        assert!(!p.deliver(Entry::new(1)));
        assert!(p.wait(&"k").unwrap().is_none());
    }

    #[test]
    fn test_invalidate_after_deliver() {
        let p = Promise::new();
        assert!(p.deliver(Entry::new(1u64)));
        assert!(p.wait(&"k").unwrap().is_some());
        p.invalidate();
        assert!(p.wait(&"k").unwrap().is_none());
    }

    #[test]
    fn test_error_fan_out() {
        let p = Arc::new(Promise::<u64>::new());
        let barrier = Arc::new(Barrier::new(9));
        let waiters = (0..8)
            .map(|_| {
                let p = p.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    p.wait(&"k")
                })
            })
            .collect::<Vec<_>>();
        barrier.wait();
        p.deliver_error(Error::store("boom"));
        for waiter in waiters {
            let err = waiter.join().unwrap().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Store);
        }
        // Late waiters see the same error.
        assert_eq!(p.wait(&"k").unwrap_err().message(), "boom");
    }

    #[test]
    fn test_tag_soft_invalidation_after_delivery() {
        let p = Promise::new();
        assert!(p.deliver(Entry::new("v").with_tags(["t1", "t2"])));
        p.add_invalid_ids(&tags(&["other"]));
        assert!(p.wait(&"k").unwrap().is_some());
        p.add_invalid_ids(&tags(&["t2"]));
        assert!(p.wait(&"k").unwrap().is_none());
        assert!(!p.is_invalid());
    }

    #[test]
    fn test_tag_soft_invalidation_before_delivery() {
        let p = Promise::new();
        p.add_invalid_ids(&tags(&["t1"]));
        assert!(p.deliver(Entry::new("v").with_tags(["t1"])));
        assert!(p.wait(&"k").unwrap().is_none());
    }

    #[test_log::test]
    fn test_release_unblocks_pending_waiters() {
        let p = Arc::new(Promise::<u64>::new());
        let waiters = (0..4)
            .map(|_| {
                let p = p.clone();
                thread::spawn(move || p.wait(&"k"))
            })
            .collect::<Vec<_>>();
        thread::sleep(Duration::from_millis(20));
        p.release();
        p.release();
        for waiter in waiters {
            assert!(waiter.join().unwrap().unwrap().is_none());
        }
        assert!(p.is_released());
        assert!(p.wait_released(Duration::ZERO));
    }

    #[test]
    fn test_release_keeps_resolution() {
        let p = Promise::new();
        assert!(p.deliver(Entry::new(7u64)));
        p.release();
        assert_eq!(p.wait(&"k").unwrap().map(Entry::into_value), Some(7));
    }

    #[test]
    fn test_waiters_before_and_after_delivery_agree() {
        let p = Arc::new(Promise::new());
        let early = {
            let p = p.clone();
            thread::spawn(move || p.wait(&"k"))
        };
        thread::sleep(Duration::from_millis(10));
        assert!(p.deliver(Entry::new(42u64)));
        let late = p.wait(&"k").unwrap();
        assert_eq!(early.join().unwrap().unwrap(), late);
    }

    #[test]
    fn test_init() {
        let p = Promise::<u64>::new();
        assert!(!p.is_local());
        p.init();
        p.init();
        assert!(p.is_local());
        assert!(!p.is_resolved());
    }
}
