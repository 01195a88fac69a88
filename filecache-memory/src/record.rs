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

use std::sync::Arc;

use bytes::Bytes;
use filecache_common::slab::Token;
use parking_lot::Condvar;

/// [`Record`] holds one cached file and its bookkeeping inside the [`crate::table::CacheTable`].
///
/// `key`, `bytes` and `id` never change after creation. The reference count and both link pairs are only touched
/// under the cache lock.
#[derive(Debug)]
pub struct Record {
    pub(crate) key: Arc<str>,
    pub(crate) bytes: Bytes,
    pub(crate) id: u64,
    pub(crate) bucket: usize,

    pub(crate) refs: usize,
    pub(crate) not_in_use: Arc<Condvar>,

    /// Collision chain links.
    pub(crate) chain_prev: Option<Token>,
    pub(crate) chain_next: Option<Token>,

    /// Recency links. `lru_prev` points towards the most recently used end.
    pub(crate) lru_prev: Option<Token>,
    pub(crate) lru_next: Option<Token>,
}

impl Record {
    pub(crate) fn new(key: Arc<str>, bytes: Bytes, id: u64, bucket: usize) -> Self {
        Self {
            key,
            bytes,
            id,
            bucket,
            refs: 0,
            not_in_use: Arc::new(Condvar::new()),
            chain_prev: None,
            chain_next: None,
            lru_prev: None,
            lru_next: None,
        }
    }

    /// File name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// File contents.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Unique id of the record, never reused by another record of the same table.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Index of the bucket holding the record.
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// Number of in-flight readers.
    pub fn refs(&self) -> usize {
        self.refs
    }

    /// Condition signaled when the reference count drops to zero.
    pub fn not_in_use(&self) -> &Arc<Condvar> {
        &self.not_in_use
    }
}
