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

use filecache_common::strict_assert;
use parking_lot::{Condvar, Mutex};

/// Result of [`RequestQueue::dequeue`].
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeue<T> {
    /// The next pending item.
    Item(T),
    /// The queue is closed and holds nothing more.
    Shutdown,
}

#[derive(Debug)]
struct QueueState<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    closed: bool,
}

impl<T> QueueState<T> {
    fn len(&self) -> usize {
        (self.tail + self.slots.len() - self.head) % self.slots.len()
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn is_full(&self) -> bool {
        self.len() == self.slots.len() - 1
    }
}

/// A fixed-capacity circular buffer with blocking producers and consumers.
///
/// A queue of capacity `N` keeps `N + 1` slots, one of them always empty to tell a full buffer from an empty one.
#[derive(Debug)]
pub struct RequestQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> RequestQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        strict_assert!(capacity > 0);
        Self {
            state: Mutex::new(QueueState {
                slots: (0..=capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Maximum count of pending items.
    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len() - 1
    }

    /// Count of pending items.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    /// Returns `true` once [`RequestQueue::close`] or [`RequestQueue::abandon`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Append an item at the tail, blocking while the buffer is full.
    ///
    /// The item is handed back if the queue is closed before it could be placed.
    pub fn enqueue(&self, item: T) -> std::result::Result<(), T> {
        let mut state = self.state.lock();
        self.not_full.wait_while(&mut state, |state| state.is_full() && !state.closed);
        if state.closed {
            return Err(item);
        }

        let was_empty = state.is_empty();
        let tail = state.tail;
        strict_assert!(state.slots[tail].is_none());
        state.slots[tail] = Some(item);
        state.tail = (tail + 1) % state.slots.len();

        if was_empty {
            self.not_empty.notify_all();
        }
        Ok(())
    }

    /// Pop the item at the head, blocking while the buffer is empty.
    ///
    /// Items still pending after [`RequestQueue::close`] are handed out until the buffer runs dry, then every call
    /// returns [`Dequeue::Shutdown`].
    pub fn dequeue(&self) -> Dequeue<T> {
        let mut state = self.state.lock();
        self.not_empty.wait_while(&mut state, |state| state.is_empty() && !state.closed);
        if state.is_empty() {
            return Dequeue::Shutdown;
        }

        let was_full = state.is_full();
        let head = state.head;
        let item = state.slots[head].take();
        state.head = (head + 1) % state.slots.len();

        if was_full {
            self.not_full.notify_all();
        }

        match item {
            Some(item) => Dequeue::Item(item),
            None => unreachable!("occupied slot {head} is empty"),
        }
    }

    /// Close the queue. Pending items stay available to consumers, new items are refused.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Close the queue and take every pending item out of it.
    pub fn abandon(&self) -> Vec<T> {
        let items = {
            let mut state = self.state.lock();
            state.closed = true;
            let mut items = Vec::with_capacity(state.len());
            while !state.is_empty() {
                let head = state.head;
                items.extend(state.slots[head].take());
                state.head = (head + 1) % state.slots.len();
            }
            items
        };
        self.not_empty.notify_all();
        self.not_full.notify_all();
        items
    }
}
