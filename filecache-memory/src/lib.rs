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

//! The in-memory file table of filecache.
//!
//! [`FileCache`] maps file names to immutable file bytes under one cache-wide lock. Every cached file carries a
//! reference count of in-flight readers. Files are evicted from the tail of a recency list, and only once nobody
//! reads them.

mod cache;
mod record;
mod table;

pub use cache::{CacheEntry, Eviction, FileCache, FileCacheBuilder, InsertResult, DEFAULT_BUCKETS};
pub use record::Record;
pub use table::{CacheTable, Placement};

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
