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
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use bytes::Bytes;
use filecache::prelude::*;
use hdrhistogram::Histogram;
use parking_lot::Mutex;

/// A request issued by a dispatcher thread.
#[derive(Debug)]
pub struct BenchRequest {
    pub name: String,
    pub submitted: Instant,
}

/// Serves requests for the generated file set and records end-to-end latency (us).
#[derive(Debug)]
pub struct BenchHandler {
    root: PathBuf,
    latency: Mutex<Histogram<u64>>,
    reads: AtomicU64,
    sent: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

impl BenchHandler {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self {
            root: root.into(),
            latency: Mutex::new(Histogram::new(3)?),
            reads: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    /// Number of requests that missed the cache and went to the file system.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn latency(&self) -> Histogram<u64> {
        self.latency.lock().clone()
    }

    fn record(&self, request: &BenchRequest) {
        let us = request.submitted.elapsed().as_micros() as u64;
        self.latency.lock().saturating_record(us);
    }
}

impl RequestHandler for BenchHandler {
    type Connection = BenchRequest;

    fn parse(&self, connection: &mut BenchRequest) -> Result<String> {
        Ok(std::mem::take(&mut connection.name))
    }

    fn read_file(&self, name: &str) -> Result<Bytes> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let bytes = std::fs::read(self.root.join(name))?;
        Ok(Bytes::from(bytes))
    }

    fn send_file(&self, connection: &mut BenchRequest, bytes: &Bytes) -> Result<()> {
        self.record(connection);
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn send_error(&self, connection: &mut BenchRequest, error: &Error) {
        tracing::debug!("[bench]: request failed: {error}");
        self.record(connection);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}
