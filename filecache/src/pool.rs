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
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use filecache_common::error::{Error, Result};
use itertools::Itertools;
use parking_lot::Mutex;

use crate::queue::{Dequeue, RequestQueue};

/// Lifecycle state of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the next request.
    Idle,
    /// Handling a request.
    Serving,
    /// Left its loop after the queue was shut down.
    Terminated,
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Serving,
            _ => WorkerState::Terminated,
        }
    }
}

impl From<WorkerState> for u8 {
    fn from(state: WorkerState) -> Self {
        match state {
            WorkerState::Idle => 0,
            WorkerState::Serving => 1,
            WorkerState::Terminated => 2,
        }
    }
}

struct Worker<T, F> {
    id: usize,
    queue: Arc<RequestQueue<T>>,
    serve: Arc<F>,
    state: Arc<[AtomicU8]>,
}

impl<T, F> Worker<T, F>
where
    F: Fn(T),
{
    fn set(&self, state: WorkerState) {
        self.state[self.id].store(state.into(), Ordering::Release);
    }

    fn run(self) {
        tracing::debug!("[worker]: worker {} starts", self.id);
        loop {
            self.set(WorkerState::Idle);
            match self.queue.dequeue() {
                Dequeue::Item(item) => {
                    self.set(WorkerState::Serving);
                    (self.serve)(item);
                }
                Dequeue::Shutdown => break,
            }
        }
        self.set(WorkerState::Terminated);
        tracing::debug!("[worker]: worker {} exits", self.id);
    }
}

/// A fixed set of long-lived worker threads pulling items from a [`RequestQueue`].
#[derive(Debug)]
pub struct WorkerPool {
    states: Arc<[AtomicU8]>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` threads, each calling `serve` on every item it dequeues until the queue shuts down.
    ///
    /// If a thread cannot be spawned, the queue is closed, the threads spawned so far are joined and a config error
    /// is returned.
    pub fn spawn<T, F>(name: &str, workers: usize, queue: Arc<RequestQueue<T>>, serve: F) -> Result<Self>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let states: Arc<[AtomicU8]> = (0..workers)
            .map(|_| AtomicU8::new(WorkerState::Idle.into()))
            .collect();
        let serve = Arc::new(serve);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = Worker {
                id,
                queue: queue.clone(),
                serve: serve.clone(),
                state: states.clone(),
            };
            let spawned = std::thread::Builder::new()
                .name(format!("{name}-worker-{id}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    queue.close();
                    let pool = Self {
                        states,
                        handles: Mutex::new(handles),
                    };
                    pool.join();
                    return Err(Error::config("spawn worker thread failed")
                        .with_context("worker", id)
                        .with_context("workers", workers)
                        .with_source(e));
                }
            }
        }

        Ok(Self {
            states,
            handles: Mutex::new(handles),
        })
    }

    /// Count of worker threads.
    pub fn workers(&self) -> usize {
        self.states.len()
    }

    /// Current state of every worker.
    pub fn states(&self) -> Vec<WorkerState> {
        self.states
            .iter()
            .map(|state| WorkerState::from(state.load(Ordering::Acquire)))
            .collect_vec()
    }

    /// Wait for every worker to terminate. The queue must be closed first.
    ///
    /// Joining twice is a no-op.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.join() {
                tracing::error!("[worker]: worker thread panicked: {e:?}");
            }
        }
    }
}
