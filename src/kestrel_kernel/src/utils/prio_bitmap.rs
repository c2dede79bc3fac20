//! Provides `PrioBitmap`, a bit array supporting constant-time search for the
//! highest set bit.
use std::fmt;

/// The maximum number of bits [`PrioBitmap`] can hold.
pub(crate) const PRIO_BITMAP_MAX_LEN: usize = u64::BITS as usize;

/// A bit array indexed by priority. A larger index means a higher priority.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PrioBitmap(u64);

impl fmt::Debug for PrioBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set()
            .entries((0..PRIO_BITMAP_MAX_LEN).filter(|&i| self.get(i)))
            .finish()
    }
}

impl PrioBitmap {
    /// Get the bit at the specified position.
    #[inline]
    pub(crate) fn get(&self, i: usize) -> bool {
        assert!(i < PRIO_BITMAP_MAX_LEN);
        self.0 & (1 << i) != 0
    }

    /// Clear the bit at the specified position.
    #[inline]
    pub(crate) fn clear(&mut self, i: usize) {
        assert!(i < PRIO_BITMAP_MAX_LEN);
        self.0 &= !(1 << i);
    }

    /// Set the bit at the specified position.
    #[inline]
    pub(crate) fn set(&mut self, i: usize) {
        assert!(i < PRIO_BITMAP_MAX_LEN);
        self.0 |= 1 << i;
    }

    /// Get the position of the highest set bit.
    #[inline]
    pub(crate) fn find_highest(&self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some((u64::BITS - 1 - self.0.leading_zeros()) as usize)
        }
    }
}
