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

//! The bucket array, the collision chains and the recency list of the file cache.
//!
//! [`CacheTable`] is a plain data structure: every method expects the caller to hold the cache lock.

use std::sync::Arc;

use bytes::Bytes;
use filecache_common::{
    hasher::Djb2Hasher,
    slab::{Slab, Token},
    strict_assert, strict_assert_eq,
};

use crate::record::Record;

/// Where [`CacheTable::place`] put a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The bucket was empty.
    Inserted,
    /// The record was appended to a non-empty collision chain.
    Collided,
}

/// Hash table with chaining plus an index-based doubly-linked recency list.
///
/// Records live in a [`Slab`] and refer to each other by [`Token`]. The recency list runs from the most recently
/// touched record (head) to the eviction candidate (tail).
#[derive(Debug)]
pub struct CacheTable {
    buckets: Vec<Option<Token>>,
    records: Slab<Record>,

    head: Option<Token>,
    tail: Option<Token>,

    usage: usize,
    capacity: usize,

    next_id: u64,
    clears: u64,
}

impl CacheTable {
    /// Create an empty table with `buckets` collision chains and a budget of `capacity` bytes.
    pub fn new(buckets: usize, capacity: usize) -> Self {
        strict_assert!(buckets > 0);
        Self {
            buckets: vec![None; buckets],
            records: Slab::new(),
            head: None,
            tail: None,
            usage: 0,
            capacity,
            next_id: 0,
            clears: 0,
        }
    }

    /// Byte budget.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live bytes.
    pub fn usage(&self) -> usize {
        self.usage
    }

    /// Count of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the table holds no record.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count of buckets.
    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if `size` more bytes fit into the budget without eviction.
    pub fn fits(&self, size: usize) -> bool {
        size <= self.capacity.saturating_sub(self.usage)
    }

    /// Get a record by token.
    ///
    /// # Panics
    ///
    /// Panics if the token does not refer to a live record.
    pub fn record(&self, token: Token) -> &Record {
        &self.records[token]
    }

    /// Get a record by token, `None` if the slot is vacant.
    pub fn get(&self, token: Token) -> Option<&Record> {
        self.records.get(token)
    }

    /// The most recently touched record.
    pub fn head(&self) -> Option<Token> {
        self.head
    }

    /// The least recently touched record, i.e. the next eviction candidate.
    pub fn tail(&self) -> Option<Token> {
        self.tail
    }

    /// Walk the collision chain of `key` without touching the recency list.
    pub fn find(&self, key: &str) -> Option<Token> {
        let mut cursor = self.buckets[Djb2Hasher::bucket(key, self.buckets.len())];
        while let Some(token) = cursor {
            let record = &self.records[token];
            if &*record.key == key {
                return Some(token);
            }
            cursor = record.chain_next;
        }
        None
    }

    /// Find `key` and move it to the head of the recency list.
    ///
    /// The reference count is left untouched.
    pub fn lookup(&mut self, key: &str) -> Option<Token> {
        let token = self.find(key)?;
        self.promote(token);
        Some(token)
    }

    /// Place a new record at the end of its collision chain and at the head of the recency list.
    ///
    /// The key must be absent and the bytes must fit into the free budget. The record starts with no reference.
    pub fn place(&mut self, key: Arc<str>, bytes: Bytes) -> (Token, Placement) {
        strict_assert!(self.find(&key).is_none());
        strict_assert!(self.fits(bytes.len()));

        let bucket = Djb2Hasher::bucket(&key, self.buckets.len());
        let id = self.next_id;
        self.next_id += 1;
        let size = bytes.len();

        let token = self.records.insert(Record::new(key, bytes, id, bucket));

        let placement = match self.buckets[bucket] {
            None => {
                self.buckets[bucket] = Some(token);
                Placement::Inserted
            }
            Some(first) => {
                let mut last = first;
                while let Some(next) = self.records[last].chain_next {
                    last = next;
                }
                self.records[last].chain_next = Some(token);
                self.records[token].chain_prev = Some(last);
                Placement::Collided
            }
        };

        self.push_front(token);
        self.usage += size;

        (token, placement)
    }

    /// Unlink a record from its chain and from the recency list and hand it back.
    ///
    /// Only unreferenced records may be removed.
    pub fn remove(&mut self, token: Token) -> Option<Record> {
        strict_assert_eq!(self.records.get(token).map(|record| record.refs).unwrap_or_default(), 0);

        self.records.get(token)?;
        self.unlink_chain(token);
        self.unlink_lru(token);

        let record = self.records.remove(token)?;
        self.usage -= record.size();
        Some(record)
    }

    /// Add a reference to the record named by `token` and `id`.
    ///
    /// Returns `false` if the record has left the table in the meantime.
    pub fn acquire(&mut self, token: Token, id: u64) -> bool {
        match self.records.get_mut(token) {
            Some(record) if record.id == id => {
                record.refs += 1;
                true
            }
            _ => false,
        }
    }

    /// Drop a reference to the record named by `token` and `id`, signaling `notInUse` waiters on the last one.
    ///
    /// Releasing a record that has left the table is a no-op and returns `false`.
    pub fn release(&mut self, token: Token, id: u64) -> bool {
        match self.records.get_mut(token) {
            Some(record) if record.id == id => {
                strict_assert!(record.refs > 0);
                record.refs -= 1;
                if record.refs == 0 {
                    record.not_in_use.notify_all();
                }
                true
            }
            _ => false,
        }
    }

    /// Remove every record regardless of its reference count.
    ///
    /// Waiters on in-use records are woken up so that no evictor is left blocked on a record that is gone.
    pub fn drain(&mut self) -> Vec<Record> {
        self.clears += 1;
        self.buckets.iter_mut().for_each(|bucket| *bucket = None);
        self.head = None;
        self.tail = None;
        self.usage = 0;

        let records = self.records.drain();
        for record in records.iter().filter(|record| record.refs > 0) {
            record.not_in_use.notify_all();
        }
        records
    }

    /// Count of [`CacheTable::drain`] calls so far.
    pub fn clears(&self) -> u64 {
        self.clears
    }

    /// Iterate over records from the most to the least recently touched.
    pub fn iter(&self) -> impl Iterator<Item = &Record> + '_ {
        std::iter::successors(self.head.map(|token| &self.records[token]), move |record| {
            record.lru_next.map(|token| &self.records[token])
        })
    }

    fn promote(&mut self, token: Token) {
        if self.head == Some(token) {
            return;
        }
        self.unlink_lru(token);
        self.push_front(token);
    }

    fn push_front(&mut self, token: Token) {
        let old = self.head;
        {
            let record = &mut self.records[token];
            record.lru_prev = None;
            record.lru_next = old;
        }
        match old {
            Some(head) => self.records[head].lru_prev = Some(token),
            None => self.tail = Some(token),
        }
        self.head = Some(token);
    }

    fn unlink_lru(&mut self, token: Token) {
        let (prev, next) = {
            let record = &mut self.records[token];
            (record.lru_prev.take(), record.lru_next.take())
        };
        match prev {
            Some(prev) => self.records[prev].lru_next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.records[next].lru_prev = prev,
            None => self.tail = prev,
        }
    }

    fn unlink_chain(&mut self, token: Token) {
        let (bucket, prev, next) = {
            let record = &mut self.records[token];
            (record.bucket, record.chain_prev.take(), record.chain_next.take())
        };
        match prev {
            Some(prev) => self.records[prev].chain_next = next,
            None => self.buckets[bucket] = next,
        }
        if let Some(next) = next {
            self.records[next].chain_prev = prev;
        }
    }
}

#[cfg(any(test, feature = "test_utils"))]
impl CacheTable {
    /// Verify every structural invariant of the table. Panics on violation.
    pub fn sanity_check(&self) {
        use itertools::Itertools;

        let len = self.records.len();

        // Recency list.
        let mut visited = 0;
        let mut sum = 0;
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(token) = cursor {
            let record = &self.records[token];
            assert_eq!(record.lru_prev, prev, "broken recency back link at {token:?}");
            visited += 1;
            sum += record.size();
            assert!(visited <= len, "recency list has a cycle");
            prev = Some(token);
            cursor = record.lru_next;
        }
        assert_eq!(self.tail, prev);
        assert_eq!(visited, len, "recency list and table hold different sets");
        assert_eq!(sum, self.usage, "usage differs from the sum of record sizes");
        assert!(self.usage <= self.capacity, "usage {} over budget {}", self.usage, self.capacity);

        // Collision chains.
        let mut chained = 0;
        for (index, head) in self.buckets.iter().enumerate() {
            let mut prev = None;
            let mut cursor = *head;
            while let Some(token) = cursor {
                let record = &self.records[token];
                assert_eq!(record.bucket(), index);
                assert_eq!(Djb2Hasher::bucket(record.key(), self.buckets()), index);
                assert_eq!(record.chain_prev, prev, "broken chain back link at {token:?}");
                chained += 1;
                assert!(chained <= len, "collision chain has a cycle");
                prev = Some(token);
                cursor = record.chain_next;
            }
        }
        assert_eq!(chained, len, "buckets and table hold different sets");

        assert!(self.records.iter().map(|(_, record)| &record.key).all_unique());
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    fn keys(table: &CacheTable) -> Vec<String> {
        table.iter().map(|record| record.key().to_string()).collect_vec()
    }

    fn bytes(size: usize) -> Bytes {
        Bytes::from(vec![b'x'; size])
    }

    #[test]
    fn test_place_and_find() {
        let mut table = CacheTable::new(16, 100);

        let (a, placement) = table.place("a".into(), bytes(10));
        assert_eq!(placement, Placement::Inserted);
        let (b, _) = table.place("b".into(), bytes(20));

        assert_eq!(table.find("a"), Some(a));
        assert_eq!(table.find("b"), Some(b));
        assert_eq!(table.find("c"), None);
        assert_eq!(table.usage(), 30);
        assert_eq!(table.len(), 2);
        assert_eq!(table.record(a).refs(), 0);
        assert_ne!(table.record(a).id(), table.record(b).id());

        table.sanity_check();
    }

    #[test]
    fn test_collision_chain() {
        let mut table = CacheTable::new(1, 100);

        assert_eq!(table.place("a".into(), bytes(1)).1, Placement::Inserted);
        assert_eq!(table.place("b".into(), bytes(1)).1, Placement::Collided);
        let (c, placement) = table.place("c".into(), bytes(1));
        assert_eq!(placement, Placement::Collided);
        table.sanity_check();

        // Remove from the middle and from the head of the chain.
        let b = table.find("b").unwrap();
        assert_eq!(table.remove(b).unwrap().key(), "b");
        table.sanity_check();
        let a = table.find("a").unwrap();
        table.remove(a).unwrap();
        table.sanity_check();

        assert_eq!(table.find("c"), Some(c));
        assert_eq!(table.find("a"), None);
        assert_eq!(table.find("b"), None);
        assert_eq!(table.usage(), 1);
    }

    #[test]
    fn test_records_remember_their_bucket() {
        let mut table = CacheTable::new(7, 100);
        for key in ["index.html", "style.css", "a", "b", "c"] {
            table.place(key.into(), bytes(1));
        }
        assert_eq!(table.buckets(), 7);
        for record in table.iter() {
            assert_eq!(record.bucket(), Djb2Hasher::bucket(record.key(), table.buckets()));
        }
    }

    #[test]
    fn test_lookup_promotes() {
        let mut table = CacheTable::new(16, 100);
        for key in ["k1", "k2", "k3"] {
            table.place(key.into(), bytes(1));
        }
        assert_eq!(keys(&table), vec!["k3", "k2", "k1"]);

        table.lookup("k1").unwrap();
        assert_eq!(keys(&table), vec!["k1", "k3", "k2"]);
        assert_eq!(table.record(table.tail().unwrap()).key(), "k2");

        table.lookup("k1").unwrap();
        assert_eq!(keys(&table), vec!["k1", "k3", "k2"]);
        assert!(table.lookup("k4").is_none());

        table.sanity_check();
    }

    #[test]
    fn test_lookup_identity() {
        let mut table = CacheTable::new(16, 100);
        table.place("a".into(), bytes(3));
        table.place("b".into(), bytes(3));

        let token = table.lookup("a").unwrap();
        let id = table.record(token).id();
        for _ in 0..10 {
            let again = table.lookup("a").unwrap();
            assert_eq!(again, token);
            assert_eq!(table.record(again).id(), id);
        }
    }

    #[test]
    fn test_remove_updates_ends() {
        let mut table = CacheTable::new(4, 100);
        for key in ["a", "b", "c"] {
            table.place(key.into(), bytes(5));
        }

        let tail = table.tail().unwrap();
        assert_eq!(table.remove(tail).unwrap().key(), "a");
        assert_eq!(keys(&table), vec!["c", "b"]);

        let head = table.head().unwrap();
        assert_eq!(table.remove(head).unwrap().key(), "c");
        assert_eq!(keys(&table), vec!["b"]);
        assert_eq!(table.head(), table.tail());
        assert_eq!(table.usage(), 5);

        assert!(table.remove(head).is_none());
        table.sanity_check();
    }

    #[test]
    fn test_fits() {
        let mut table = CacheTable::new(4, 100);
        assert!(table.fits(100));
        assert!(!table.fits(101));
        table.place("a".into(), bytes(60));
        assert!(table.fits(40));
        assert!(!table.fits(41));
        assert!(!table.fits(usize::MAX));
    }

    #[test]
    fn test_acquire_release() {
        let mut table = CacheTable::new(4, 100);
        let (token, _) = table.place("a".into(), bytes(1));
        let id = table.record(token).id();

        assert!(table.acquire(token, id));
        assert!(table.acquire(token, id));
        assert_eq!(table.record(token).refs(), 2);
        assert!(table.release(token, id));
        assert!(table.release(token, id));
        assert_eq!(table.record(token).refs(), 0);

        // A stale id never touches the record reusing the slot.
        table.remove(token).unwrap();
        let (reused, _) = table.place("b".into(), bytes(1));
        assert_eq!(reused, token);
        assert!(!table.acquire(token, id));
        assert!(!table.release(token, id));
        assert_eq!(table.record(reused).refs(), 0);
    }

    #[test]
    fn test_drain() {
        let mut table = CacheTable::new(2, 100);
        for i in 0..10 {
            table.place(format!("f{i}").into(), bytes(i));
        }
        let token = table.find("f3").unwrap();
        let id = table.record(token).id();
        table.acquire(token, id);
        assert_eq!(table.clears(), 0);

        let records = table.drain();
        assert_eq!(records.len(), 10);
        assert_eq!(table.clears(), 1);
        assert!(table.is_empty());
        assert_eq!(table.usage(), 0);
        assert_eq!(table.head(), None);
        assert_eq!(table.tail(), None);
        assert!(!table.release(token, id));
        table.sanity_check();
    }
}
