//! Generational object tables.
//!
//! Nucleus objects (threads, synchronization objects, timers, interrupt
//! objects) live in an [`Arena`] and are named by small copyable handles made
//! of a slot index and a generation. Freeing a slot bumps its generation so a
//! stale handle never aliases the slot's next occupant.

use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

/// Raw slot index + generation pair.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawHandle {
    index: u32,
    generation: u32,
}

impl RawHandle {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Typed handle over a [`RawHandle`].
pub trait Handle: Copy + Eq {
    fn from_raw(raw: RawHandle) -> Self;
    fn raw(self) -> RawHandle;
}

/// Declare a typed handle.
macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::arena::RawHandle);

        impl $crate::arena::Handle for $name {
            fn from_raw(raw: $crate::arena::RawHandle) -> Self {
                Self(raw)
            }

            fn raw(self) -> $crate::arena::RawHandle {
                self.0
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0.index())
            }
        }
    };
}

pub(crate) use handle_type;

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot table with a fixed upper bound on live objects.
pub struct Arena<K: Handle, T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
    limit: usize,
    _key: PhantomData<K>,
}

impl<K: Handle, T> Arena<K, T> {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
            limit,
            _key: PhantomData,
        }
    }

    /// Store `value`, or hand it back when the table is full.
    pub fn insert(&mut self, value: T) -> Result<K, T> {
        if self.len >= self.limit {
            return Err(value);
        }

        let index = match self.free.pop() {
            Some(index) => {
                self.entries[index as usize].value = Some(value);
                index
            }
            None => {
                self.entries.push(Entry {
                    generation: 1,
                    value: Some(value),
                });
                (self.entries.len() - 1) as u32
            }
        };

        self.len += 1;
        let generation = self.entries[index as usize].generation;
        Ok(K::from_raw(RawHandle { index, generation }))
    }

    /// Handle the next successful `insert` will return, if there is room.
    ///
    /// Lets an object be wired to its own handle before it is stored.
    pub fn next_key(&self) -> Option<K> {
        if self.len >= self.limit {
            return None;
        }
        let index = match self.free.last() {
            Some(&index) => index,
            None => self.entries.len() as u32,
        };
        let generation = self
            .entries
            .get(index as usize)
            .map_or(1, |entry| entry.generation);
        Some(K::from_raw(RawHandle { index, generation }))
    }

    pub fn remove(&mut self, key: K) -> Option<T> {
        let raw = key.raw();
        let entry = self.entries.get_mut(raw.index())?;
        if entry.generation != raw.generation || entry.value.is_none() {
            return None;
        }

        let value = entry.value.take();
        entry.generation = entry.generation.wrapping_add(1).max(1);
        self.free.push(raw.index);
        self.len -= 1;
        value
    }

    pub fn get(&self, key: K) -> Option<&T> {
        let raw = key.raw();
        self.entries
            .get(raw.index())
            .filter(|entry| entry.generation == raw.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let raw = key.raw();
        self.entries
            .get_mut(raw.index())
            .filter(|entry| entry.generation == raw.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live handles, in slot order.
    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry.value.as_ref().map(|_| {
                K::from_raw(RawHandle {
                    index: index as u32,
                    generation: entry.generation,
                })
            })
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.entries.iter().enumerate().filter_map(|(index, entry)| {
            entry.value.as_ref().map(|value| {
                let key = K::from_raw(RawHandle {
                    index: index as u32,
                    generation: entry.generation,
                });
                (key, value)
            })
        })
    }
}
