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

use std::{fmt::Debug, hash::Hash};

/// Key trait for both the load registry and the remote store.
///
/// Connections use the same bound: they are compared and hashed to locate the per-connection registry.
pub trait Key: Send + Sync + 'static + Hash + Eq + Clone + Debug {}
impl<T: Send + Sync + 'static + Hash + Eq + Clone + Debug> Key for T {}

/// Value trait for the cached values.
///
/// Values are cloned once per waiter when a load fans out.
pub trait Value: Send + Sync + 'static + Clone + Debug {}
impl<T: Send + Sync + 'static + Clone + Debug> Value for T {}

/// Marker trait for the load ownership tokens installed into the remote store.
///
/// Two markers are equal only if they were minted by the same load attempt.
pub trait Marker: Send + Sync + 'static + Eq + Clone + Debug {}
impl<T: Send + Sync + 'static + Eq + Clone + Debug> Marker for T {}
