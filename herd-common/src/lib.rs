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

//! Shared components for herd.
//!
//! The vocabulary used by the in-process registry, the remote store contract and the loader: key/value/marker
//! bounds, the cached value envelope, the load outcome, the error type and the countdown latch.

/// Key, value and marker bounds.
pub mod code;
/// Countdown latch.
pub mod countdown;
/// Duration normalization.
pub mod duration;
/// Cached value envelope and load outcome.
pub mod entry;
/// Error type for herd.
pub mod error;
