//! Generation-checked object pool
use slab::Slab;
use std::{fmt, ops};

/// Identifies an object in an [`Arena`].
///
/// A slot can be reused after its object is removed. The generation number
/// distinguishes the new occupant from the old one, so a stale `Id` never
/// resolves to an unrelated object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Id {
    index: usize,
    generation: u64,
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

impl Id {
    /// Convert into plain integers, e.g., to be stored in a queue item.
    pub(crate) fn to_raw(self) -> [u64; 2] {
        [self.index as u64, self.generation]
    }

    pub(crate) fn from_raw([index, generation]: [u64; 2]) -> Self {
        Self {
            index: index as usize,
            generation,
        }
    }
}

struct Entry<T> {
    generation: u64,
    value: T,
}

pub(crate) struct Arena<T> {
    slab: Slab<Entry<T>>,
    next_generation: u64,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slab: Slab::new(),
            next_generation: 0,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<T> Arena<T> {
    pub(crate) fn insert(&mut self, value: T) -> Id {
        let generation = self.next_generation;
        self.next_generation += 1;
        let index = self.slab.insert(Entry { generation, value });
        Id { index, generation }
    }

    pub(crate) fn get(&self, id: Id) -> Option<&T> {
        self.slab
            .get(id.index)
            .filter(|e| e.generation == id.generation)
            .map(|e| &e.value)
    }

    pub(crate) fn get_mut(&mut self, id: Id) -> Option<&mut T> {
        self.slab
            .get_mut(id.index)
            .filter(|e| e.generation == id.generation)
            .map(|e| &mut e.value)
    }

    pub(crate) fn contains(&self, id: Id) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn remove(&mut self, id: Id) -> Option<T> {
        if self.contains(id) {
            Some(self.slab.remove(id.index).value)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Id, &T)> + '_ {
        self.slab.iter().map(|(index, e)| {
            (
                Id {
                    index,
                    generation: e.generation,
                },
                &e.value,
            )
        })
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (Id, &mut T)> + '_ {
        self.slab.iter_mut().map(|(index, e)| {
            (
                Id {
                    index,
                    generation: e.generation,
                },
                &mut e.value,
            )
        })
    }
}

/// Panics if `id` is stale. Only used for `Id`s the kernel knows to be live,
/// such as the ones stored in its own lists.
impl<T> ops::Index<Id> for Arena<T> {
    type Output = T;

    #[track_caller]
    fn index(&self, id: Id) -> &T {
        self.get(id).expect("stale object id")
    }
}

impl<T> ops::IndexMut<Id> for Arena<T> {
    #[track_caller]
    fn index_mut(&mut self, id: Id) -> &mut T {
        self.get_mut(id).expect("stale object id")
    }
}
