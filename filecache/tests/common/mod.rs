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

//! A scripted request collaborator shared by the integration tests.

#![expect(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use filecache::prelude::*;
use parking_lot::{Condvar, Mutex};

/// A fake client connection.
#[derive(Debug)]
pub struct MockConnection {
    pub id: usize,
    pub request: Option<String>,
    pub fail_send: bool,
}

impl MockConnection {
    pub fn get(id: usize, file: &str) -> Self {
        Self {
            id,
            request: Some(file.to_string()),
            fail_send: false,
        }
    }

    pub fn unparsable(id: usize) -> Self {
        Self {
            id,
            request: None,
            fail_send: false,
        }
    }

    pub fn failing_send(id: usize, file: &str) -> Self {
        Self {
            id,
            request: Some(file.to_string()),
            fail_send: true,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    files: Mutex<HashMap<String, Bytes>>,
    reads: AtomicUsize,
    sent: Mutex<Vec<(usize, usize)>>,
    errors: Mutex<Vec<(usize, ErrorKind)>>,
    destroyed: Mutex<Vec<usize>>,
    gated: Mutex<bool>,
    gate: Condvar,
}

/// Serves files from an in-memory map and records everything it is asked to do.
///
/// While the gate is closed, `send_file` blocks, pinning the cache entry of the request.
#[derive(Debug, Clone, Default)]
pub struct MockRequestHandler {
    state: Arc<MockState>,
}

impl MockRequestHandler {
    pub fn with_file(self, name: &str, size: usize) -> Self {
        self.state
            .files
            .lock()
            .insert(name.to_string(), Bytes::from(vec![b'm'; size]));
        self
    }

    pub fn close_gate(&self) {
        *self.state.gated.lock() = true;
    }

    pub fn open_gate(&self) {
        *self.state.gated.lock() = false;
        self.state.gate.notify_all();
    }

    pub fn reads(&self) -> usize {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// `(connection id, sent bytes)` in send order.
    pub fn sent(&self) -> Vec<(usize, usize)> {
        self.state.sent.lock().clone()
    }

    pub fn errors(&self) -> Vec<(usize, ErrorKind)> {
        self.state.errors.lock().clone()
    }

    pub fn destroyed(&self) -> Vec<usize> {
        self.state.destroyed.lock().clone()
    }
}

impl RequestHandler for MockRequestHandler {
    type Connection = MockConnection;

    fn parse(&self, connection: &mut MockConnection) -> Result<String> {
        connection
            .request
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::Parse, "malformed request"))
    }

    fn read_file(&self, name: &str) -> Result<Bytes> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        self.state
            .files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "no such file"))
    }

    fn send_file(&self, connection: &mut MockConnection, bytes: &Bytes) -> Result<()> {
        {
            let mut gated = self.state.gated.lock();
            self.state.gate.wait_while(&mut gated, |gated| *gated);
        }
        if connection.fail_send {
            return Err(Error::new(ErrorKind::Send, "connection reset by peer"));
        }
        self.state.sent.lock().push((connection.id, bytes.len()));
        Ok(())
    }

    fn send_error(&self, connection: &mut MockConnection, error: &Error) {
        self.state.errors.lock().push((connection.id, error.kind()));
    }

    fn destroy(&self, connection: MockConnection) {
        self.state.destroyed.lock().push(connection.id);
    }
}

/// Poll `condition` until it holds, panicking after a few seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
