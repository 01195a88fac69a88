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

use std::hash::Hasher;

/// Polynomial rolling hasher, `hash = hash * 33 + byte`, seeded with 5381 (djb2).
///
/// Only [`Hasher::write`] is meaningful. Prefer [`Djb2Hasher::hash_key`] for file names: going through
/// [`std::hash::Hash`] for `str` appends a `0xff` terminator byte and changes the result.
#[derive(Debug, Clone, Copy)]
pub struct Djb2Hasher {
    state: u64,
}

impl Djb2Hasher {
    const SEED: u64 = 5381;

    /// Hash the raw bytes of a key.
    pub fn hash_key(key: &str) -> u64 {
        let mut hasher = Self::default();
        hasher.write(key.as_bytes());
        hasher.finish()
    }

    /// Hash a key and reduce it to a bucket index in `0..buckets`.
    ///
    /// # Panics
    ///
    /// Panics if `buckets` is zero.
    pub fn bucket(key: &str, buckets: usize) -> usize {
        (Self::hash_key(key) % buckets as u64) as usize
    }
}

impl Default for Djb2Hasher {
    fn default() -> Self {
        Self { state: Self::SEED }
    }
}

impl Hasher for Djb2Hasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state = (self.state << 5).wrapping_add(self.state).wrapping_add(*byte as u64);
        }
    }
}
