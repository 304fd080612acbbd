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

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A countdown latch.
///
/// The latch opens once it has been counted down `counter` times and never closes again. Threads can block on it
/// with [`Countdown::wait`] until it opens.
#[derive(Debug)]
pub struct Countdown {
    counter: Mutex<usize>,
    condvar: Condvar,
}

impl Countdown {
    /// Countdown `counter` times.
    ///
    /// A latch created with `0` is open from the start.
    pub fn new(counter: usize) -> Self {
        Self {
            counter: Mutex::new(counter),
            condvar: Condvar::new(),
        }
    }

    /// Count down once.
    ///
    /// Returns `true` only for the call that opens the latch. Counting down an open latch is a no-op.
    pub fn countdown(&self) -> bool {
        let mut counter = self.counter.lock();
        match *counter {
            0 => false,
            1 => {
                *counter = 0;
                self.condvar.notify_all();
                true
            }
            _ => {
                *counter -= 1;
                false
            }
        }
    }

    /// Whether the latch is open.
    pub fn is_open(&self) -> bool {
        *self.counter.lock() == 0
    }

    /// Block until the latch opens.
    pub fn wait(&self) {
        let mut counter = self.counter.lock();
        while *counter > 0 {
            self.condvar.wait(&mut counter);
        }
    }

    /// Block until the latch opens or `timeout` elapses.
    ///
    /// Returns whether the latch is open.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut counter = self.counter.lock();
        while *counter > 0 {
            if self.condvar.wait_until(&mut counter, deadline).timed_out() {
                return *counter == 0;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    fn case(counter: usize, concurrency: usize) {
        let cd = Arc::new(Countdown::new(counter));
        let handles = (0..concurrency)
            .map(|_| {
                let cd = cd.clone();
                thread::spawn(move || cd.countdown())
            })
            .collect::<Vec<_>>();
        let opened = handles.into_iter().map(|h| h.join().unwrap()).filter(|b| *b).count();
        assert_eq!(opened, 1);
        assert!(cd.is_open());
    }

    #[test]
    fn test_countdown() {
        for counter in [1, 4, 8, 16] {
            for concurrency in [16, 32, 64] {
                case(counter, concurrency);
            }
        }
    }

    #[test]
    fn test_wait_wakes_all() {
        let cd = Arc::new(Countdown::new(1));
        let waiters = (0..8)
            .map(|_| {
                let cd = cd.clone();
                thread::spawn(move || cd.wait())
            })
            .collect::<Vec<_>>();
        thread::sleep(Duration::from_millis(20));
        assert!(cd.countdown());
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn test_wait_timeout() {
        let cd = Countdown::new(2);
        assert!(!cd.wait_timeout(Duration::from_millis(10)));
        assert!(!cd.countdown());
        assert!(cd.countdown());
        assert!(!cd.countdown());
        assert!(cd.wait_timeout(Duration::from_millis(10)));
        assert!(Countdown::new(0).is_open());
    }
}
