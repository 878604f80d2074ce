//! Id allocation plus the id-keyed entry map.
//!
//! `IdBitmap` hands out the lowest free id of a fixed-capacity space;
//! `IpcpIndex` pairs it with the entry map so that "id is free" and "id maps
//! to an entry" can only change together.

use std::collections::BTreeMap;

const WORD_BITS: usize = 64;

/// Fixed-capacity id allocator backed by a bitset.
#[derive(Debug, Clone)]
pub struct IdBitmap {
    words: Vec<u64>,
    capacity: usize,
    in_use: usize,
}

impl IdBitmap {
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(WORD_BITS)],
            capacity,
            in_use: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn is_set(&self, id: usize) -> bool {
        id < self.capacity && self.words[id / WORD_BITS] & (1u64 << (id % WORD_BITS)) != 0
    }

    /// Claim the lowest free id.
    pub fn allocate(&mut self) -> Option<usize> {
        for (word_idx, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = (!*word).trailing_zeros() as usize;
            let id = word_idx * WORD_BITS + bit;
            if id >= self.capacity {
                return None;
            }
            *word |= 1u64 << bit;
            self.in_use += 1;
            return Some(id);
        }
        None
    }

    /// Return an id to the pool. Releasing a free id is a no-op.
    pub fn release(&mut self, id: usize) {
        if self.is_set(id) {
            self.words[id / WORD_BITS] &= !(1u64 << (id % WORD_BITS));
            self.in_use -= 1;
        }
    }
}

/// Ids plus the entries they map to, kept in lock-step.
#[derive(Debug)]
pub struct IpcpIndex<E> {
    ids: IdBitmap,
    entries: BTreeMap<u16, E>,
}

impl<E> IpcpIndex<E> {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: IdBitmap::new(capacity),
            entries: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ids.capacity()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocate the lowest free id and install the entry built for it.
    ///
    /// On exhaustion the builder is not called and `None` is returned.
    pub fn insert_with(&mut self, build: impl FnOnce(u16) -> E) -> Option<u16> {
        let id = self.ids.allocate()?;
        let Ok(id) = u16::try_from(id) else {
            self.ids.release(id);
            return None;
        };
        self.entries.insert(id, build(id));
        Some(id)
    }

    pub fn remove(&mut self, id: u16) -> Option<E> {
        let entry = self.entries.remove(&id)?;
        self.ids.release(id as usize);
        Some(entry)
    }

    pub fn get(&self, id: u16) -> Option<&E> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut E> {
        self.entries.get_mut(&id)
    }

    /// First entry strictly after `cursor` in ascending id order, or the
    /// first entry overall when there is no cursor.
    pub fn next_after(&self, cursor: Option<u16>) -> Option<(u16, &E)> {
        match cursor {
            Some(last) => self
                .entries
                .range(last.saturating_add(1)..)
                .find(|(id, _)| **id > last),
            None => self.entries.iter().next(),
        }
        .map(|(id, entry)| (*id, entry))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &E)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    /// Check the "free xor mapped" invariant.
    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.ids.in_use() == self.entries.len()
            && self.entries.keys().all(|id| self.ids.is_set(*id as usize))
    }
}
