// Copyright 2026 filecache Project Authors
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

//! Shared components for filecache: the error type, invariant assertions, the key hasher, the slab arena backing
//! cache entries, the event listener and the metrics model.

/// Invariant assertion macros.
pub mod assert;
/// Error type of filecache.
pub mod error;
/// Notifications for entries leaving the cache.
pub mod event;
/// The polynomial rolling hasher used to pick a bucket for a file name.
pub mod hasher;
/// Metrics model and registries.
pub mod metrics;
/// Scoped functional programming extensions.
pub mod scope;
pub mod slab;
