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

//! In-process load coordination for herd.
//!
//! [`Promise`] is the result cell that every caller of a load blocks on, [`LoadRecord`] pairs it with the load
//! marker, and [`LoadRegistry`] indexes the in-flight loads per connection.

mod promise;
mod record;
mod registry;

/// Re-exported types.
pub mod prelude;

pub use herd_common::error::{Error, ErrorKind, Result};
pub use prelude::*;
