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

//! A slab arena handing out stable [`Token`]s.
//!
//! Vacant slots form a free list, so a removed token's slot is reused by the next insertion.

use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// Stable handle of a value inside a [`Slab`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(usize);

impl Token {
    /// Index of the slot in the slab.
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
enum Entry<T> {
    Vacant(usize),
    Occupied(T),
}

/// Arena of `T` addressed by [`Token`].
#[derive(Debug, Clone)]
pub struct Slab<T> {
    entries: Vec<Entry<T>>,
    len: usize,
    next: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slab<T> {
    /// Create an empty slab.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next: 0,
            len: 0,
        }
    }

    /// Create an empty slab with preallocated slots.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            next: 0,
            len: 0,
        }
    }

    /// Store a value and return its token.
    pub fn insert(&mut self, val: T) -> Token {
        let index = self.next;
        self.len += 1;

        if index == self.entries.len() {
            self.entries.push(Entry::Occupied(val));
            self.next = index + 1;
        } else {
            self.next = match self.entries[index] {
                Entry::Vacant(next) => next,
                Entry::Occupied(_) => unreachable!("free list points to an occupied slot"),
            };
            self.entries[index] = Entry::Occupied(val);
        }

        Token(index)
    }

    /// Remove the value of `token`, returns `None` if the slot is vacant.
    pub fn remove(&mut self, token: Token) -> Option<T> {
        let index = token.index();
        let entry = self.entries.get_mut(index)?;

        if matches!(entry, Entry::Vacant(_)) {
            return None;
        }

        match std::mem::replace(entry, Entry::Vacant(self.next)) {
            Entry::Vacant(_) => unreachable!(),
            Entry::Occupied(val) => {
                self.len -= 1;
                self.next = index;
                Some(val)
            }
        }
    }

    /// Get the value of `token`.
    pub fn get(&self, token: Token) -> Option<&T> {
        match self.entries.get(token.index()) {
            Some(Entry::Occupied(val)) => Some(val),
            _ => None,
        }
    }

    /// Get the mutable value of `token`.
    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        match self.entries.get_mut(token.index()) {
            Some(Entry::Occupied(val)) => Some(val),
            _ => None,
        }
    }

    /// Iterate over all occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = (Token, &T)> {
        self.entries.iter().enumerate().filter_map(|(index, entry)| match entry {
            Entry::Occupied(val) => Some((Token(index), val)),
            Entry::Vacant(_) => None,
        })
    }

    /// Remove all values, returning them in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let entries = std::mem::take(&mut self.entries);
        self.len = 0;
        self.next = 0;
        entries
            .into_iter()
            .filter_map(|entry| match entry {
                Entry::Occupied(val) => Some(val),
                Entry::Vacant(_) => None,
            })
            .collect()
    }

    /// Count of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Index<Token> for Slab<T> {
    type Output = T;

    fn index(&self, token: Token) -> &T {
        match self.get(token) {
            Some(val) => val,
            None => panic!("invalid slab token: {token:?}"),
        }
    }
}

impl<T> IndexMut<Token> for Slab<T> {
    fn index_mut(&mut self, token: Token) -> &mut T {
        match self.get_mut(token) {
            Some(val) => val,
            None => panic!("invalid slab token: {token:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_reuses_vacant_slots() {
        let mut slab = Slab::new();
        let a = slab.insert("a");
        let b = slab.insert("b");
        let c = slab.insert("c");
        assert_eq!(slab.len(), 3);

        assert_eq!(slab.remove(b), Some("b"));
        assert_eq!(slab.remove(b), None);
        assert_eq!(slab.get(b), None);

        let d = slab.insert("d");
        assert_eq!(d, b);
        assert_eq!(slab.get(a), Some(&"a"));
        assert_eq!(slab.get(c), Some(&"c"));
        assert_eq!(slab.get(d), Some(&"d"));
        assert_eq!(slab[d], "d");
    }

    #[test]
    #[should_panic]
    fn test_slab_index_vacant() {
        let mut slab = Slab::new();
        let token = slab.insert(1);
        slab.remove(token);
        let _ = slab[token];
    }

    #[test]
    fn test_slab_iter_and_drain() {
        let mut slab = Slab::with_capacity(4);
        let tokens: Vec<_> = (0..4).map(|i| slab.insert(i)).collect();
        slab.remove(tokens[1]);
        slab.remove(tokens[2]);

        let values: Vec<_> = slab.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 3]);

        assert_eq!(slab.drain(), vec![0, 3]);
        assert!(slab.is_empty());
        assert_eq!(slab.insert(10), Token(0));
    }
}
