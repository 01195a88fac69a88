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

//! Utilities for testing.

use std::sync::Arc;

use bytes::Bytes;
use filecache_common::event::{Event, EventListener};
use parking_lot::Mutex;

/// An event listener that records every entry leaving the cache as `(reason, key, size)`.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventListener {
    events: Arc<Mutex<Vec<(Event, String, usize)>>>,
}

impl EventListener for RecordingEventListener {
    fn on_leave(&self, reason: Event, key: &str, bytes: &Bytes) {
        self.events.lock().push((reason, key.to_string(), bytes.len()));
    }
}

impl RecordingEventListener {
    /// Recorded events in arrival order.
    pub fn events(&self) -> Vec<(Event, String, usize)> {
        self.events.lock().clone()
    }

    /// Count of recorded events with the given reason.
    pub fn count(&self, reason: Event) -> usize {
        self.events.lock().iter().filter(|(r, _, _)| *r == reason).count()
    }
}
