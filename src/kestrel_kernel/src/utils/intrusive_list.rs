//! Intrusive doubly linked list over an [`Arena`].
//!
//! The links are stored in the elements themselves, so insertion and removal
//! never allocate. The list is circular: the first element's `prev` points at
//! the last element.
use super::{Arena, Id};

/// Implemented by the element types that can be linked into a [`ListHead`].
pub(crate) trait Linked {
    fn link(&self) -> &Option<Link>;
    fn link_mut(&mut self) -> &mut Option<Link>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Link {
    prev: Id,
    next: Id,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ListHead {
    first: Option<Id>,
}

fn link_of<T: Linked>(pool: &Arena<T>, id: Id) -> Link {
    pool[id].link().expect("element is not linked")
}

impl ListHead {
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    #[inline]
    pub(crate) fn first(&self) -> Option<Id> {
        self.first
    }

    #[cfg(test)]
    pub(crate) fn last<T: Linked>(&self, pool: &Arena<T>) -> Option<Id> {
        self.first.map(|first| link_of(pool, first).prev)
    }

    /// Get the element following `id`, or `None` if `id` is the last one.
    pub(crate) fn next<T: Linked>(&self, pool: &Arena<T>, id: Id) -> Option<Id> {
        let next = link_of(pool, id).next;
        if Some(next) == self.first {
            None
        } else {
            Some(next)
        }
    }

    pub(crate) fn push_back<T: Linked>(&mut self, pool: &mut Arena<T>, id: Id) {
        debug_assert!(pool[id].link().is_none(), "element is already linked");
        match self.first {
            None => {
                *pool[id].link_mut() = Some(Link { prev: id, next: id });
                self.first = Some(id);
            }
            Some(first) => self.insert_before_inner(pool, id, first),
        }
    }

    pub(crate) fn push_front<T: Linked>(&mut self, pool: &mut Arena<T>, id: Id) {
        self.push_back(pool, id);
        self.first = Some(id);
    }

    /// Insert `id` immediately before `at`, which must be in this list.
    pub(crate) fn insert_before<T: Linked>(&mut self, pool: &mut Arena<T>, id: Id, at: Id) {
        debug_assert!(pool[id].link().is_none(), "element is already linked");
        self.insert_before_inner(pool, id, at);
        if self.first == Some(at) {
            self.first = Some(id);
        }
    }

    fn insert_before_inner<T: Linked>(&mut self, pool: &mut Arena<T>, id: Id, at: Id) {
        let prev = link_of(pool, at).prev;
        *pool[id].link_mut() = Some(Link { prev, next: at });
        if let Some(link) = pool[prev].link_mut() {
            link.next = id;
        }
        if let Some(link) = pool[at].link_mut() {
            link.prev = id;
        }
    }

    /// Remove `id`, which must be in this list.
    pub(crate) fn remove<T: Linked>(&mut self, pool: &mut Arena<T>, id: Id) {
        let link = pool[id].link_mut().take().expect("element is not linked");
        if link.next == id {
            debug_assert_eq!(self.first, Some(id));
            self.first = None;
            return;
        }
        if let Some(prev_link) = pool[link.prev].link_mut() {
            prev_link.next = link.next;
        }
        if let Some(next_link) = pool[link.next].link_mut() {
            next_link.prev = link.prev;
        }
        if self.first == Some(id) {
            self.first = Some(link.next);
        }
    }

    pub(crate) fn pop_front<T: Linked>(&mut self, pool: &mut Arena<T>) -> Option<Id> {
        let first = self.first?;
        self.remove(pool, first);
        Some(first)
    }

    pub(crate) fn iter<'a, T: Linked>(&self, pool: &'a Arena<T>) -> Iter<'a, T> {
        Iter {
            head: *self,
            pool,
            next: self.first,
        }
    }
}

pub(crate) struct Iter<'a, T> {
    head: ListHead,
    pool: &'a Arena<T>,
    next: Option<Id>,
}

impl<T: Linked> Iterator for Iter<'_, T> {
    type Item = Id;

    fn next(&mut self) -> Option<Id> {
        let id = self.next?;
        self.next = self.head.next(self.pool, id);
        Some(id)
    }
}
