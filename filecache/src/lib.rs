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

//! filecache: a bounded, reference-counted LRU file cache fronted by a fixed worker pool.
//!
//! A dispatcher hands client connections to a [`Server`]. Connections wait in a bounded [`RequestQueue`] until one
//! of the worker threads picks them up. The worker asks the shared [`FileCache`] for the requested file. On a miss
//! it reads the file through the [`RequestHandler`] collaborator and inserts it, evicting idle least recently used
//! files if needed. Then it sends the bytes and releases its reference.
//!
//! ```rust
//! use filecache::prelude::*;
//!
//! # fn main() -> filecache::prelude::Result<()> {
//! let dir = std::env::temp_dir();
//! let server = ServerBuilder::new(StreamRequestHandler::<std::net::TcpStream>::new(dir))
//!     .with_workers(4)
//!     .with_queue_capacity(16)
//!     .with_cache_capacity(64 * 1024 * 1024)
//!     .build()?;
//! // server.request(stream) for every accepted connection.
//! server.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! [`FileCache`]: filecache_memory::FileCache
//! [`RequestQueue`]: crate::queue::RequestQueue
//! [`RequestHandler`]: crate::handler::RequestHandler
//! [`Server`]: crate::server::Server

pub mod handler;
/// The fixed worker-thread pool.
pub mod pool;
/// Re-exports of the commonly used types.
pub mod prelude;
/// The bounded request queue.
pub mod queue;
/// The server composition root and the request handling path.
pub mod server;

pub use filecache_common as common;
pub use filecache_memory as memory;
