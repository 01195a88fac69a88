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

use std::{
    borrow::Cow,
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use filecache_common::{
    error::{Error, Result},
    event::EventListener,
    metrics::{model::Metrics, registry::noop::NoopMetricsRegistry, BoxedRegistry},
};
use filecache_memory::{FileCache, FileCacheBuilder, InsertResult, DEFAULT_BUCKETS};
use serde::{Deserialize, Serialize};

use crate::{
    handler::RequestHandler,
    pool::{WorkerPool, WorkerState},
    queue::RequestQueue,
};

/// What happens to requests still queued when the server shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Workers serve every queued request before they exit.
    #[default]
    Drain,
    /// Queued requests are destroyed unserved.
    Abandon,
}

/// Immutable numeric configuration of a [`Server`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name of the server, used as the `name` label of its metrics and as the worker thread name prefix.
    pub name: String,
    /// Count of worker threads. 0 handles every request synchronously on the caller.
    pub workers: usize,
    /// Capacity of the request queue. 0 handles every request synchronously on the caller.
    pub queue_capacity: usize,
    /// Byte budget of the file cache. 0 disables caching.
    pub cache_capacity: usize,
    /// Count of hash buckets of the file cache.
    pub buckets: usize,
    /// What happens to queued requests on shutdown.
    pub shutdown_mode: ShutdownMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "filecache".to_string(),
            workers: 0,
            queue_capacity: 0,
            cache_capacity: 0,
            buckets: DEFAULT_BUCKETS,
            shutdown_mode: ShutdownMode::Drain,
        }
    }
}

impl ServerConfig {
    /// Returns `true` if requests are handled on the calling thread instead of a worker pool.
    pub fn is_synchronous(&self) -> bool {
        self.workers == 0 || self.queue_capacity == 0
    }
}

/// How a request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served from an entry that was already cached.
    Hit,
    /// Read from the file system and inserted into the cache.
    Inserted,
    /// Read from the file system, but a concurrent request had cached the file first.
    Attached,
    /// Read from the file system and served without caching.
    Uncached,
}

/// A connection handed back by a server that has been shut down.
pub struct Closed<C>(pub C);

impl<C> Debug for Closed<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Closed(..)")
    }
}

impl<C> std::fmt::Display for Closed<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("server is shut down")
    }
}

impl<C> std::error::Error for Closed<C> {}

impl<C> From<Closed<C>> for Error {
    fn from(_: Closed<C>) -> Self {
        Error::closed()
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder<H> {
    handler: H,
    config: ServerConfig,
    event_listener: Option<Arc<dyn EventListener>>,
    registry: BoxedRegistry,
}

impl<H> ServerBuilder<H>
where
    H: RequestHandler,
{
    /// Create a builder with the request collaborator. Every request is handled synchronously and nothing is cached
    /// until configured otherwise.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            config: ServerConfig::default(),
            event_listener: None,
            registry: Box::new(NoopMetricsRegistry),
        }
    }

    /// Set the name of the server.
    ///
    /// Default: `filecache`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the count of worker threads.
    ///
    /// Default: 0, requests are handled synchronously.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the capacity of the request queue.
    ///
    /// Default: 0, requests are handled synchronously.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.config.queue_capacity = queue_capacity;
        self
    }

    /// Set the byte budget of the file cache.
    ///
    /// Default: 0, caching is disabled.
    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.config.cache_capacity = cache_capacity;
        self
    }

    /// Set the count of hash buckets of the file cache.
    ///
    /// Default: 1024.
    pub fn with_buckets(mut self, buckets: usize) -> Self {
        self.config.buckets = buckets;
        self
    }

    /// Set what happens to queued requests on shutdown.
    ///
    /// Default: [`ShutdownMode::Drain`].
    pub fn with_shutdown_mode(mut self, shutdown_mode: ShutdownMode) -> Self {
        self.config.shutdown_mode = shutdown_mode;
        self
    }

    /// Replace the whole numeric configuration.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the listener notified when files leave the cache.
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

    /// Build the server, creating the file cache and spawning the worker pool.
    pub fn build(self) -> Result<Server<H>> {
        let config = self.config;

        if config.buckets == 0 {
            return Err(Error::config("bucket count must be greater than zero").with_context("name", &config.name));
        }

        let name: Cow<'static, str> = config.name.clone().into();
        let metrics = Arc::new(Metrics::new(name.clone(), &*self.registry));

        let cache = match config.cache_capacity {
            0 => None,
            capacity => {
                let mut builder = FileCacheBuilder::new(capacity)
                    .with_name(name)
                    .with_buckets(config.buckets)
                    .with_metrics(metrics.clone());
                if let Some(event_listener) = self.event_listener {
                    builder = builder.with_event_listener(event_listener);
                }
                Some(builder.build()?)
            }
        };

        let inner = Arc::new(ServerInner {
            handler: self.handler,
            cache,
            metrics,
        });

        let (queue, pool) = if config.is_synchronous() {
            (None, None)
        } else {
            let queue = Arc::new(RequestQueue::new(config.queue_capacity));
            let pool = {
                let inner = inner.clone();
                WorkerPool::spawn(&config.name, config.workers, queue.clone(), move |connection| {
                    // Failures are logged and counted by the handler path.
                    let _ = inner.handle_request(connection);
                })?
            };
            (Some(queue), Some(pool))
        };

        tracing::info!("[server]: start with config: {config:?}");

        Ok(Server {
            inner,
            queue,
            pool,
            config,
            closed: AtomicBool::new(false),
        })
    }
}

struct ServerInner<H> {
    handler: H,
    cache: Option<FileCache>,
    metrics: Arc<Metrics>,
}

impl<H> ServerInner<H>
where
    H: RequestHandler,
{
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "filecache::server::handle_request"))]
    fn handle_request(&self, mut connection: H::Connection) -> Result<Outcome> {
        let start = Instant::now();
        self.metrics.server_request.increase(1);

        let res = self.serve(&mut connection);
        match &res {
            Ok(outcome) => {
                self.metrics.server_served.increase(1);
                if *outcome == Outcome::Uncached {
                    self.metrics.server_uncached.increase(1);
                }
            }
            Err(e) => {
                self.metrics.server_failed.increase(1);
                tracing::warn!("[server]: request failed: {e}");
            }
        }
        self.handler.destroy(connection);

        self.metrics
            .server_handle_duration
            .record(start.elapsed().as_secs_f64());

        res
    }

    fn serve(&self, connection: &mut H::Connection) -> Result<Outcome> {
        let name = match self.handler.parse(connection) {
            Ok(name) => name,
            Err(e) => {
                self.handler.send_error(connection, &e);
                return Err(e);
            }
        };

        let cache = match self.cache.as_ref() {
            Some(cache) => cache,
            None => {
                let bytes = self.read_file(connection, &name)?;
                self.send_file(connection, &name, &bytes)?;
                return Ok(Outcome::Uncached);
            }
        };

        if let Some(entry) = cache.get(&name) {
            self.send_file(connection, &name, &entry)?;
            return Ok(Outcome::Hit);
        }

        // Read outside of the cache lock, a miss never blocks other cache operations on disk I/O.
        let bytes = self.read_file(connection, &name)?;

        let (entry, outcome) = match cache.insert(name.as_str(), bytes) {
            InsertResult::Inserted(entry) | InsertResult::Collided(entry) => (entry, Outcome::Inserted),
            InsertResult::AlreadyPresent(entry) => (entry, Outcome::Attached),
            InsertResult::Rejected(bytes) => {
                self.send_file(connection, &name, &bytes)?;
                return Ok(Outcome::Uncached);
            }
        };

        // The entry is released when dropped, on success and on failure alike.
        self.send_file(connection, &name, &entry)?;
        Ok(outcome)
    }

    fn read_file(&self, connection: &mut H::Connection, name: &str) -> Result<bytes::Bytes> {
        self.handler.read_file(name).map_err(|e| {
            self.handler.send_error(connection, &e);
            e.with_context("file", name)
        })
    }

    fn send_file(&self, connection: &mut H::Connection, name: &str, bytes: &bytes::Bytes) -> Result<()> {
        self.handler
            .send_file(connection, bytes)
            .map_err(|e| e.with_context("file", name))
    }
}

/// A file server: a worker pool pulling connections from a bounded request queue and serving files through a shared
/// file cache.
///
/// Dropping the server shuts it down.
pub struct Server<H>
where
    H: RequestHandler,
{
    inner: Arc<ServerInner<H>>,
    queue: Option<Arc<RequestQueue<H::Connection>>>,
    pool: Option<WorkerPool>,
    config: ServerConfig,
    closed: AtomicBool,
}

impl<H> Debug for Server<H>
where
    H: RequestHandler,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("cache", &self.inner.cache)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<H> Server<H>
where
    H: RequestHandler,
{
    /// Hand a connection to the server.
    ///
    /// With a worker pool the connection is queued, blocking while the queue is full. Otherwise it is handled on
    /// the calling thread. Fails only if the server has been shut down, handing the connection back.
    pub fn request(&self, connection: H::Connection) -> std::result::Result<(), Closed<H::Connection>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Closed(connection));
        }

        match self.queue.as_ref() {
            Some(queue) => queue.enqueue(connection).map_err(Closed),
            None => {
                // Failures are logged and counted by the handler path.
                let _ = self.inner.handle_request(connection);
                Ok(())
            }
        }
    }

    /// Handle one connection on the calling thread, bypassing the queue.
    pub fn handle_request(&self, connection: H::Connection) -> Result<Outcome> {
        if self.closed.load(Ordering::Acquire) {
            self.inner.handler.destroy(connection);
            return Err(Error::closed());
        }
        self.inner.handle_request(connection)
    }

    /// Stop the server.
    ///
    /// Wakes every worker and waits for all of them to exit, then drops every cached file. Queued connections are
    /// served or destroyed unserved depending on the [`ShutdownMode`]. Calling it again is a no-op.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("[server]: {} is shutting down", self.config.name);

        if let Some(queue) = self.queue.as_ref() {
            match self.config.shutdown_mode {
                ShutdownMode::Drain => queue.close(),
                ShutdownMode::Abandon => {
                    let abandoned = queue.abandon();
                    if !abandoned.is_empty() {
                        tracing::warn!("[server]: abandon {} queued requests", abandoned.len());
                    }
                    for connection in abandoned {
                        self.inner.handler.destroy(connection);
                    }
                }
            }
        }

        if let Some(pool) = self.pool.as_ref() {
            pool.join();
        }

        if let Some(cache) = self.inner.cache.as_ref() {
            cache.clear();
        }

        tracing::info!("[server]: {} is shut down", self.config.name);
    }

    /// Returns `true` once the server has been shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The configuration of the server.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The file cache, `None` if caching is disabled.
    pub fn cache(&self) -> Option<&FileCache> {
        self.inner.cache.as_ref()
    }

    /// The request collaborator.
    pub fn handler(&self) -> &H {
        &self.inner.handler
    }

    /// Metrics of the server and its cache.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Current state of every worker, empty for a synchronous server.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool.as_ref().map(|pool| pool.states()).unwrap_or_default()
    }

    /// Count of queued connections.
    pub fn queued(&self) -> usize {
        self.queue.as_ref().map(|queue| queue.len()).unwrap_or_default()
    }
}

impl<H> Drop for Server<H>
where
    H: RequestHandler,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
