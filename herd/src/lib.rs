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

//! herd - stampede-proof load coordination for caches shared through a remote store.
//!
//! When many callers, in one process or in many, miss the same key at the same time, exactly one of them computes
//! the value and every other caller gets the same outcome.
//!
//! ```
//! use std::sync::Arc;
//!
//! use herd::prelude::*;
//!
//! let store = Arc::new(MemoryStore::<&str, String, u64>::new());
//! let loader = LoaderBuilder::new(store).with_name("answers").build();
//!
//! let value = loader
//!     .load(&"conn", &LoadConfig::new(), &(), &"answer".to_string(), |_| Ok(42u64))
//!     .unwrap();
//! assert_eq!(value, 42);
//! assert_eq!(loader.if_cached(&"conn", &LoadConfig::new(), &"answer".to_string()), Outcome::Ready(42));
//! ```

mod builder;
mod config;
mod expiry;
mod loader;
mod lockout;

/// Re-exported types.
pub mod prelude;

pub use prelude::*;
