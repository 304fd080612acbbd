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

pub use herd_common::{
    code::{Key, Marker, Value},
    entry::{Entry, Outcome, TagId, Tags},
    error::{Error, ErrorKind, Result},
};
pub use herd_memory::{LoadRecord, LoadRegistry, Promise};
pub use herd_storage::{LoadMarker, MemoryStore, RemoteStore, StoreRegistry, Stored};

pub use crate::{
    builder::LoaderBuilder,
    config::{load_marker_fade, LoadConfig, TtlFn, DEFAULT_LOAD_MARKER_FADE, LOAD_MARKER_FADE_ENV},
    expiry::Expiry,
    loader::{ErrorTransform, Loader, ResultTransform},
    lockout::{LockoutListener, LockoutMap},
};
