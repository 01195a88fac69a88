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

use std::{borrow::Cow, fmt::Debug, ops::Deref, sync::Arc};

use bytes::Bytes;
use filecache_common::{
    error::{Error, Result},
    event::{Event, EventListener},
    metrics::{model::Metrics, registry::noop::NoopMetricsRegistry, BoxedRegistry},
    scope::Scope,
    slab::Token,
    strict_assert,
};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    record::Record,
    table::{CacheTable, Placement},
};

/// Default count of hash buckets.
pub const DEFAULT_BUCKETS: usize = 1024;

/// Outcome of [`FileCache::insert`].
#[derive(Debug)]
pub enum InsertResult {
    /// The file went into an empty bucket.
    Inserted(CacheEntry),
    /// The file was appended to a non-empty collision chain. Callers treat it like [`InsertResult::Inserted`].
    Collided(CacheEntry),
    /// A concurrent inserter won the race. The caller's copy was discarded and the entry attached to the winner.
    AlreadyPresent(CacheEntry),
    /// The file alone exceeds the whole budget and is never cached. The bytes are handed back to be served directly.
    Rejected(Bytes),
}

impl InsertResult {
    /// The attached entry, `None` if rejected.
    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            InsertResult::Inserted(entry) | InsertResult::Collided(entry) | InsertResult::AlreadyPresent(entry) => {
                Some(entry)
            }
            InsertResult::Rejected(_) => None,
        }
    }

    /// Convert into the attached entry, `None` if rejected.
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            InsertResult::Inserted(entry) | InsertResult::Collided(entry) | InsertResult::AlreadyPresent(entry) => {
                Some(entry)
            }
            InsertResult::Rejected(_) => None,
        }
    }
}

/// Outcome of [`FileCache::evict_one`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Enough budget is free for the requested size, possibly without evicting anything.
    Evicted,
    /// The cache was cleared while the evictor waited for an entry to be released. The caller must inspect the
    /// cache again.
    Retry,
    /// The requested key is cached, possibly inserted by another thread while the evictor was waiting.
    AlreadyPresent,
    /// The requested size exceeds the whole budget. Nothing was touched.
    TooLarge,
}

/// Builder for [`FileCache`].
pub struct FileCacheBuilder {
    name: Cow<'static, str>,
    capacity: usize,
    buckets: usize,
    event_listener: Option<Arc<dyn EventListener>>,
    registry: BoxedRegistry,
    metrics: Option<Arc<Metrics>>,
}

impl FileCacheBuilder {
    /// Create a builder for a cache holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            name: "filecache".into(),
            capacity,
            buckets: DEFAULT_BUCKETS,
            event_listener: None,
            registry: Box::new(NoopMetricsRegistry),
            metrics: None,
        }
    }

    /// Set the name of the cache instance, used as the `name` label of its metrics.
    ///
    /// Default: `filecache`.
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the count of hash buckets. Independent of the byte budget.
    ///
    /// Default: 1024.
    pub fn with_buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets;
        self
    }

    /// Set event listener.
    ///
    /// Default: No event listener installed.
    pub fn with_event_listener(mut self, event_listener: Arc<dyn EventListener>) -> Self {
        self.event_listener = Some(event_listener);
        self
    }

    /// Set metrics registry.
    ///
    /// Default: [`NoopMetricsRegistry`].
    pub fn with_metrics_registry(mut self, registry: BoxedRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share already registered metrics, e.g. with the server owning the cache. Overrides the metrics registry.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the file cache.
    pub fn build(self) -> Result<FileCache> {
        if self.buckets == 0 {
            return Err(Error::config("bucket count must be greater than zero").with_context("name", &self.name));
        }

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(Metrics::new(self.name.clone(), &*self.registry)),
        };

        tracing::debug!(
            "[file cache]: build {} with capacity {} bytes and {} buckets",
            self.name,
            self.capacity,
            self.buckets
        );

        Ok(FileCache {
            inner: Arc::new(FileCacheInner {
                table: Mutex::new(CacheTable::new(self.buckets, self.capacity)),
                name: self.name,
                metrics,
                event_listener: self.event_listener,
            }),
        })
    }
}

struct FileCacheInner {
    table: Mutex<CacheTable>,
    name: Cow<'static, str>,
    metrics: Arc<Metrics>,
    event_listener: Option<Arc<dyn EventListener>>,
}

impl FileCacheInner {
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "filecache::memory::cache::clear"))]
    fn clear(&self) {
        let garbages = self.table.lock().with(|mut table| {
            let garbages = table.drain();
            self.metrics.cache_usage.absolute(0);
            garbages
        });

        if !garbages.is_empty() {
            tracing::debug!("[file cache]: {} cleared, {} entries dropped", self.name, garbages.len());
        }

        // Deallocate data out of the lock critical section.
        self.notify(Event::Clear, garbages);
    }

    fn notify(&self, event: Event, garbages: Vec<Record>) {
        if let Some(listener) = self.event_listener.as_ref() {
            for record in garbages.iter() {
                listener.on_leave(event, record.key(), record.bytes());
            }
        }
    }
}

impl Drop for FileCacheInner {
    fn drop(&mut self) {
        self.clear();
    }
}

/// A bounded in-memory file cache with reference-counted LRU eviction.
///
/// All operations serialize on one cache-wide lock. Entries handed out as [`CacheEntry`] pin the file: an evictor
/// that reaches a pinned entry at the tail of the recency list waits until every reference is dropped.
///
/// # Deadlock
///
/// A thread must not hold a [`CacheEntry`] while inserting a file that could force that very entry out, or the
/// insertion waits for itself.
#[derive(Clone)]
pub struct FileCache {
    inner: Arc<FileCacheInner>,
}

impl Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("name", &self.inner.name)
            .field("capacity", &self.capacity())
            .field("usage", &self.usage())
            .finish()
    }
}

impl FileCache {
    /// Look up a file, promote it to the head of the recency list and attach to it.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "filecache::memory::cache::get"))]
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.table.lock().with(|mut table| match table.lookup(key) {
            Some(token) => {
                self.inner.metrics.cache_hit.increase(1);
                Some(self.attach(&mut table, token))
            }
            None => {
                self.inner.metrics.cache_miss.increase(1);
                None
            }
        })
    }

    /// Insert a freshly read file, evicting unreferenced least recently used files until it fits.
    ///
    /// On success the returned entry holds one reference for the caller.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "filecache::memory::cache::insert"))]
    pub fn insert(&self, key: impl Into<Arc<str>>, bytes: Bytes) -> InsertResult {
        let mut garbages = vec![];

        let res = self.inner.table.lock().with(|mut table| {
            let res = self.insert_locked(&mut table, key.into(), bytes, &mut garbages);
            self.inner.metrics.cache_usage.absolute(table.usage() as _);
            res
        });

        // Deallocate data out of the lock critical section.
        self.inner.notify(Event::Evict, garbages);

        res
    }

    /// Evict unreferenced least recently used files until a file of `size` bytes named `key` fits.
    ///
    /// Blocks while the least recently used file is referenced.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "filecache::memory::cache::evict_one"))]
    pub fn evict_one(&self, key: &str, size: usize) -> Eviction {
        let mut garbages = vec![];

        let eviction = self.inner.table.lock().with(|mut table| {
            let eviction = self.evict_one_locked(&mut table, key, size, &mut garbages);
            self.inner.metrics.cache_usage.absolute(table.usage() as _);
            eviction
        });

        self.inner.notify(Event::Evict, garbages);

        eviction
    }

    /// Returns `true` if the file is cached. The recency list is left untouched.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.table.lock().find(key).is_some()
    }

    /// Reference count of a cached file, `None` if absent.
    pub fn refs(&self, key: &str) -> Option<usize> {
        self.inner
            .table
            .lock()
            .with(|table| table.find(key).map(|token| table.record(token).refs()))
    }

    /// Drop every cached file, including files still referenced by readers.
    ///
    /// Readers keep their bytes. Their references are ignored from then on.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Live bytes.
    pub fn usage(&self) -> usize {
        self.inner.table.lock().usage()
    }

    /// Count of cached files.
    pub fn len(&self) -> usize {
        self.inner.table.lock().len()
    }

    /// Returns `true` if no file is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.table.lock().is_empty()
    }

    /// Byte budget.
    pub fn capacity(&self) -> usize {
        self.inner.table.lock().capacity()
    }

    /// Name of the cache instance.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Metrics of the cache.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Run a closure with the locked table. Used by tests to inspect the internal state.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn with_table<R>(&self, f: impl FnOnce(&CacheTable) -> R) -> R {
        f(&self.inner.table.lock())
    }

    fn insert_locked(
        &self,
        table: &mut MutexGuard<'_, CacheTable>,
        key: Arc<str>,
        bytes: Bytes,
        garbages: &mut Vec<Record>,
    ) -> InsertResult {
        let size = bytes.len();

        if size > table.capacity() {
            self.inner.metrics.cache_reject.increase(1);
            tracing::debug!(
                "[file cache]: reject {key}, {size} bytes exceed the budget of {} bytes",
                table.capacity()
            );
            return InsertResult::Rejected(bytes);
        }

        loop {
            if let Some(token) = table.lookup(&key) {
                self.inner.metrics.cache_duplicate.increase(1);
                return InsertResult::AlreadyPresent(self.attach(table, token));
            }

            match self.evict_one_locked(table, &key, size, garbages) {
                Eviction::Evicted => {
                    let (token, placement) = table.place(key, bytes);
                    self.inner.metrics.cache_insert.increase(1);
                    let entry = self.attach(table, token);
                    return match placement {
                        Placement::Inserted => InsertResult::Inserted(entry),
                        Placement::Collided => InsertResult::Collided(entry),
                    };
                }
                // Picked up by the lookup at the top of the loop.
                Eviction::AlreadyPresent | Eviction::Retry => {}
                Eviction::TooLarge => unreachable!("oversized files are rejected before eviction"),
            }
        }
    }

    fn evict_one_locked(
        &self,
        table: &mut MutexGuard<'_, CacheTable>,
        key: &str,
        size: usize,
        garbages: &mut Vec<Record>,
    ) -> Eviction {
        if size > table.capacity() {
            return Eviction::TooLarge;
        }
        if table.find(key).is_some() {
            return Eviction::AlreadyPresent;
        }

        while !table.fits(size) {
            let Some(tail) = table.tail() else {
                unreachable!("an empty table fits any file within the budget")
            };

            let record = table.record(tail);
            if record.refs() > 0 {
                self.inner.metrics.cache_evict_wait.increase(1);
                tracing::debug!(
                    "[file cache]: wait for {} ({} refs) to be released before eviction",
                    record.key(),
                    record.refs()
                );

                let not_in_use = record.not_in_use().clone();
                let clears = table.clears();
                not_in_use.wait(table);

                if table.find(key).is_some() {
                    return Eviction::AlreadyPresent;
                }
                if table.clears() != clears {
                    return Eviction::Retry;
                }
                continue;
            }

            let Some(record) = table.remove(tail) else {
                unreachable!("recency tail {tail:?} is not in the table")
            };
            strict_assert!(record.refs() == 0);
            self.inner.metrics.cache_evict.increase(1);
            tracing::debug!("[file cache]: evict {} ({} bytes)", record.key(), record.size());
            garbages.push(record);
        }

        Eviction::Evicted
    }

    fn attach(&self, table: &mut CacheTable, token: Token) -> CacheEntry {
        let record = table.record(token);
        let (id, key, bytes) = (record.id(), record.key.clone(), record.bytes.clone());
        let acquired = table.acquire(token, id);
        strict_assert!(acquired);

        CacheEntry {
            inner: self.inner.clone(),
            token,
            id,
            key,
            bytes,
        }
    }
}

/// A reference to a cached file.
///
/// The file cannot be evicted while any [`CacheEntry`] of it is alive. Dropping the entry releases the reference
/// and wakes evictors waiting for it.
pub struct CacheEntry {
    inner: Arc<FileCacheInner>,
    token: Token,
    id: u64,
    key: Arc<str>,
    bytes: Bytes,
}

impl Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        self.inner.table.lock().release(self.token, self.id);
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        self.inner.table.lock().acquire(self.token, self.id);
        Self {
            inner: self.inner.clone(),
            token: self.token,
            id: self.id,
            key: self.key.clone(),
            bytes: self.bytes.clone(),
        }
    }
}

impl Deref for CacheEntry {
    type Target = Bytes;

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl CacheEntry {
    /// File name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// File contents, shared with the cache without copying.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Unique id of the cached record.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns `true` if the file has left the cache, e.g. after [`FileCache::clear`].
    pub fn is_outdated(&self) -> bool {
        self.inner
            .table
            .lock()
            .get(self.token)
            .map(|record| record.id() != self.id)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Barrier,
        },
        thread,
        time::Duration,
    };

    use itertools::Itertools;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;
    use crate::test_utils::RecordingEventListener;

    fn file(size: usize) -> Bytes {
        Bytes::from(vec![b'f'; size])
    }

    fn cache(capacity: usize) -> FileCache {
        FileCacheBuilder::new(capacity).with_buckets(16).build().unwrap()
    }

    #[test]
    fn test_zero_buckets_is_config_error() {
        let err = FileCacheBuilder::new(100).with_buckets(0).build().unwrap_err();
        assert_eq!(err.kind(), filecache_common::error::ErrorKind::Config);
    }

    #[test]
    fn test_get_attaches() {
        let cache = cache(100);
        assert!(cache.get("a").is_none());

        let e1 = cache.insert("a", file(10)).into_entry().unwrap();
        assert_eq!(cache.refs("a"), Some(1));
        let e2 = cache.get("a").unwrap();
        assert_eq!(cache.refs("a"), Some(2));
        assert_eq!(e1.id(), e2.id());
        assert_eq!(e2.key(), "a");
        assert_eq!(e2.size(), 10);
        assert_eq!(&e2[..], &[b'f'; 10][..]);

        let e3 = e2.clone();
        assert_eq!(cache.refs("a"), Some(3));
        drop(e1);
        drop(e2);
        drop(e3);
        assert_eq!(cache.refs("a"), Some(0));
        cache.with_table(|table| table.sanity_check());
    }

    #[test_log::test]
    fn test_evict_to_fit() {
        let listener = Arc::new(RecordingEventListener::default());
        let cache = FileCacheBuilder::new(100)
            .with_event_listener(listener.clone())
            .build()
            .unwrap();

        let a = cache.insert("a", file(60));
        assert!(matches!(a, InsertResult::Inserted(_)));
        drop(a);
        assert!(cache.get("a").is_some());

        let b = cache.insert("b", file(60));
        assert!(matches!(b, InsertResult::Inserted(_) | InsertResult::Collided(_)));

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.usage(), 60);
        assert_eq!(listener.events(), vec![(Event::Evict, "a".to_string(), 60)]);
        cache.with_table(|table| table.sanity_check());
    }

    #[test]
    fn test_reject_too_large() {
        let cache = cache(50);

        match cache.insert("big", file(80)) {
            InsertResult::Rejected(bytes) => assert_eq!(bytes.len(), 80),
            res => panic!("unexpected insert result: {res:?}"),
        }
        assert!(cache.is_empty());
        assert_eq!(cache.usage(), 0);
        assert_eq!(cache.evict_one("big", 80), Eviction::TooLarge);
    }

    #[test]
    fn test_reject_keeps_existing_entries() {
        let cache = cache(50);
        drop(cache.insert("small", file(40)));

        assert!(matches!(cache.insert("big", file(51)), InsertResult::Rejected(_)));
        assert!(cache.contains("small"));
        assert_eq!(cache.usage(), 40);
    }

    #[test]
    fn test_evict_true_lru_tail() {
        let cache = cache(30);
        for key in ["k1", "k2", "k3"] {
            drop(cache.insert(key, file(10)));
        }
        drop(cache.get("k1"));

        drop(cache.insert("k4", file(10)));

        assert!(cache.contains("k1"));
        assert!(!cache.contains("k2"));
        assert!(cache.contains("k3"));
        assert!(cache.contains("k4"));
    }

    #[test]
    fn test_evict_several_for_one() {
        let cache = cache(100);
        for i in 0..10 {
            drop(cache.insert(format!("f{i}"), file(10)));
        }
        drop(cache.insert("large", file(35)));

        assert_eq!(cache.len(), 7);
        assert_eq!(cache.usage(), 95);
        for i in 0..4 {
            assert!(!cache.contains(&format!("f{i}")));
        }
        cache.with_table(|table| table.sanity_check());
    }

    #[test]
    fn test_evict_one_until_fits() {
        let cache = cache(100);
        for i in 0..5 {
            drop(cache.insert(format!("f{i}"), file(20)));
        }

        assert_eq!(cache.evict_one("new", 50), Eviction::Evicted);
        assert_eq!(cache.usage(), 40);
        assert_eq!(cache.len(), 2);
        for i in 0..3 {
            assert!(!cache.contains(&format!("f{i}")));
        }
        assert!(cache.contains("f3"));
        assert!(cache.contains("f4"));
        assert!(!cache.contains("new"));
        cache.with_table(|table| table.sanity_check());
    }

    #[test]
    fn test_evict_one_keeps_entries_when_fitting() {
        let cache = cache(100);
        assert_eq!(cache.evict_one("y", 10), Eviction::Evicted);

        drop(cache.insert("x", file(10)));
        assert_eq!(cache.evict_one("y", 10), Eviction::Evicted);
        assert_eq!(cache.evict_one("y", 90), Eviction::Evicted);
        assert!(cache.contains("x"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.usage(), 10);
    }

    #[test]
    fn test_evict_one_already_present() {
        let cache = cache(100);
        drop(cache.insert("a", file(90)));

        assert_eq!(cache.evict_one("a", 90), Eviction::AlreadyPresent);
        assert!(cache.contains("a"));
        assert_eq!(cache.usage(), 90);
    }

    #[test_log::test]
    fn test_evict_one_already_present_after_wait() {
        let cache = cache(100);
        let pinned = cache.insert("a", file(60)).into_entry().unwrap();

        let handle = {
            let cache = cache.clone();
            thread::spawn(move || cache.evict_one("b", 60))
        };

        thread::sleep(Duration::from_millis(100));
        drop(cache.insert("b", file(30)));
        drop(pinned);

        assert_eq!(handle.join().unwrap(), Eviction::AlreadyPresent);
        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
        assert_eq!(cache.usage(), 90);
    }

    #[test_log::test]
    fn test_evict_one_retry_after_clear() {
        let cache = cache(100);
        let pinned = cache.insert("a", file(60)).into_entry().unwrap();

        let handle = {
            let cache = cache.clone();
            thread::spawn(move || cache.evict_one("b", 60))
        };

        thread::sleep(Duration::from_millis(100));
        cache.clear();

        assert_eq!(handle.join().unwrap(), Eviction::Retry);
        assert!(cache.is_empty());
        drop(pinned);
        assert_eq!(cache.evict_one("b", 60), Eviction::Evicted);
    }

    #[test]
    fn test_duplicate_insert_attaches_to_winner() {
        let cache = cache(100);
        let first = cache.insert("x", file(10)).into_entry().unwrap();

        let second = cache.insert("x", file(10));
        let second = match second {
            InsertResult::AlreadyPresent(entry) => entry,
            res => panic!("unexpected insert result: {res:?}"),
        };
        assert_eq!(first.id(), second.id());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.usage(), 10);
        assert_eq!(cache.refs("x"), Some(2));

        drop(first);
        drop(second);
        assert_eq!(cache.refs("x"), Some(0));
    }

    #[test]
    fn test_concurrent_miss_on_same_key() {
        let cache = cache(100);
        let barrier = Arc::new(Barrier::new(2));

        let handles = (0..2)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.insert("x", file(10))
                })
            })
            .collect_vec();
        let results = handles.into_iter().map(|handle| handle.join().unwrap()).collect_vec();

        let inserted = results
            .iter()
            .filter(|res| matches!(res, InsertResult::Inserted(_) | InsertResult::Collided(_)))
            .count();
        let present = results
            .iter()
            .filter(|res| matches!(res, InsertResult::AlreadyPresent(_)))
            .count();
        assert_eq!((inserted, present), (1, 1));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.refs("x"), Some(2));
        let ids = results.iter().map(|res| res.entry().unwrap().id()).collect_vec();
        assert_eq!(ids[0], ids[1]);

        drop(results);
        assert_eq!(cache.refs("x"), Some(0));
    }

    #[test_log::test]
    fn test_evict_waits_for_release() {
        let cache = cache(100);
        let pinned = cache.insert("a", file(60)).into_entry().unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let handle = {
            let cache = cache.clone();
            let done = done.clone();
            thread::spawn(move || {
                let res = cache.insert("b", file(60));
                done.store(true, Ordering::SeqCst);
                res.into_entry().map(|entry| entry.key().to_string())
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst));
        assert!(cache.contains("a"));
        assert_eq!(cache.refs("a"), Some(1));

        drop(pinned);
        assert_eq!(handle.join().unwrap(), Some("b".to_string()));
        assert!(!cache.contains("a"));
        assert_eq!(cache.usage(), 60);
        cache.with_table(|table| table.sanity_check());
    }

    #[test]
    fn test_evict_wait_sees_concurrent_insert() {
        let cache = cache(100);
        let pinned = cache.insert("a", file(60)).into_entry().unwrap();

        let handle = {
            let cache = cache.clone();
            thread::spawn(move || match cache.insert("b", file(60)) {
                InsertResult::AlreadyPresent(entry) => Some(entry.id()),
                _ => None,
            })
        };

        // The evictor blocks on "a" while "b" lands without any eviction.
        thread::sleep(Duration::from_millis(100));
        let winner = match cache.insert("b", file(30)) {
            InsertResult::Inserted(entry) | InsertResult::Collided(entry) => entry,
            res => panic!("unexpected insert result: {res:?}"),
        };
        drop(pinned);

        assert_eq!(handle.join().unwrap(), Some(winner.id()));
        assert!(cache.contains("a"));
        assert_eq!(cache.usage(), 90);
        assert_eq!(cache.refs("b"), Some(1));
        drop(winner);
        assert_eq!(cache.refs("b"), Some(0));
        cache.with_table(|table| table.sanity_check());
    }

    #[test]
    fn test_clear() {
        let listener = Arc::new(RecordingEventListener::default());
        let cache = FileCacheBuilder::new(100)
            .with_event_listener(listener.clone())
            .build()
            .unwrap();

        let held = cache.insert("a", file(10)).into_entry().unwrap();
        drop(cache.insert("b", file(20)));
        assert!(!held.is_outdated());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.usage(), 0);
        assert!(held.is_outdated());
        assert_eq!(held.size(), 10);

        // The released slot is reused and the stale reference must not touch it.
        let fresh = cache.insert("c", file(5)).into_entry().unwrap();
        drop(held);
        assert_eq!(cache.refs("c"), Some(1));
        drop(fresh);

        let mut events = listener.events();
        events.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            events,
            vec![(Event::Clear, "a".to_string(), 10), (Event::Clear, "b".to_string(), 20)]
        );
    }

    #[test_log::test]
    fn test_concurrent_fuzzy() {
        const THREADS: usize = 8;
        const LOOPS: usize = 2000;

        let cache = cache(1000);

        let handles = (0..THREADS)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(i as u64);
                    for _ in 0..LOOPS {
                        let key = format!("f{}", rng.random_range(0..64));
                        let size = rng.random_range(1..200);
                        let entry = match cache.get(&key) {
                            Some(entry) => Some(entry),
                            None => cache.insert(key, file(size)).into_entry(),
                        };
                        if let Some(entry) = entry {
                            assert!(entry.size() > 0);
                        }
                    }
                })
            })
            .collect_vec();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.usage() <= cache.capacity());
        cache.with_table(|table| {
            table.sanity_check();
            assert!(table.iter().all(|record| record.refs() == 0));
        });
    }
}
