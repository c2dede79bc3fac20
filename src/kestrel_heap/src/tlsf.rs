//! The TLSF allocator core
use slab::Slab;
use std::fmt;

use crate::AddRegionError;

/// The allocation granularity.
///
/// It is `size_of::<usize>() * 4` bytes, which is also the size of the
/// smallest block the allocator manages.
pub const GRANULARITY: usize = core::mem::size_of::<usize>() * 4;

const GRANULARITY_LOG2: u32 = GRANULARITY.trailing_zeros();

/// The number of first-level size classes. Each class covers one power of two.
pub const FLLEN: usize = 24;

/// The number of second-level subdivisions in each first-level class.
pub const SLLEN: usize = 16;

/// `SLLEN.log2()`
const SLI: u32 = SLLEN.trailing_zeros();

/// The largest region (and therefore the largest block) the allocator can
/// manage.
pub const MAX_REGION_SIZE: usize = (GRANULARITY << FLLEN) - GRANULARITY;

/// Identifies a memory region added by [`Tlsf::add_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(usize);

/// An owning handle to an allocated block, returned by [`Tlsf::allocate`].
///
/// The handle must be given back to [`Tlsf::free`] of the same allocator.
/// Dropping it without doing so leaks the block.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping an `Allocation` leaks the block"]
pub struct Allocation {
    block: usize,
    region: RegionId,
    offset: usize,
    size: usize,
}

impl Allocation {
    /// The usable size of the block. This is the requested size rounded up to
    /// [`GRANULARITY`] or more.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The region the block was carved out of.
    #[inline]
    pub fn region(&self) -> RegionId {
        self.region
    }
}

/// A snapshot of the allocator's bookkeeping, returned by [`Tlsf::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub total_bytes: usize,
    pub free_bytes: usize,
    pub minimum_ever_free_bytes: usize,
    pub largest_free_block: usize,
    pub free_blocks: usize,
    pub successful_allocations: usize,
    pub successful_frees: usize,
}

/// The metadata of a memory block.
#[derive(Debug)]
struct Block {
    region: RegionId,
    offset: usize,
    size: usize,
    used: bool,
    prev_phys: Option<usize>,
    next_phys: Option<usize>,
    /// Links of the segregated free list. Meaningful only while `!used`.
    prev_free: Option<usize>,
    next_free: Option<usize>,
}

struct Region {
    storage: Box<[u8]>,
    /// The block starting at offset zero. Its key never changes because it can
    /// only absorb its successor, never be absorbed.
    first_block: usize,
}

/// The TLSF allocator.
///
/// Free blocks are segregated into `FLLEN × SLLEN` lists. `fl_bitmap` and
/// `sl_bitmap` track which lists are non-empty so that a suitable list is
/// found with a couple of bit scans.
pub struct Tlsf {
    fl_bitmap: u32,
    /// `sl_bitmap[fl] & (1 << sl) != 0` iff `first_free[fl][sl].is_some()`
    sl_bitmap: [u16; FLLEN],
    first_free: [[Option<usize>; SLLEN]; FLLEN],
    blocks: Slab<Block>,
    regions: Vec<Region>,
    total_bytes: usize,
    free_bytes: usize,
    minimum_ever_free_bytes: usize,
    successful_allocations: usize,
    successful_frees: usize,
}

impl fmt::Debug for Tlsf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tlsf")
            .field("fl_bitmap", &format_args!("{:#b}", self.fl_bitmap))
            .field("regions", &self.regions.len())
            .field("blocks", &self.blocks.len())
            .field("total_bytes", &self.total_bytes)
            .field("free_bytes", &self.free_bytes)
            .finish()
    }
}

impl Default for Tlsf {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlsf {
    /// Construct an allocator with no memory. Call [`Self::add_region`] to
    /// give it some.
    pub fn new() -> Self {
        Self {
            fl_bitmap: 0,
            sl_bitmap: [0; FLLEN],
            first_free: [[None; SLLEN]; FLLEN],
            blocks: Slab::new(),
            regions: Vec::new(),
            total_bytes: 0,
            free_bytes: 0,
            minimum_ever_free_bytes: 0,
            successful_allocations: 0,
            successful_frees: 0,
        }
    }

    /// Construct an allocator seeded with regions of the specified sizes.
    pub fn with_regions(sizes: impl IntoIterator<Item = usize>) -> Result<Self, AddRegionError> {
        let mut this = Self::new();
        for size in sizes {
            this.add_region(size)?;
        }
        Ok(this)
    }

    /// Find the free block list to store a free block of the specified size.
    #[inline]
    fn map_floor(size: usize) -> Option<(usize, usize)> {
        debug_assert!(size >= GRANULARITY);
        debug_assert!(size % GRANULARITY == 0);
        let fl = usize::BITS - GRANULARITY_LOG2 - 1 - size.leading_zeros();

        // The shift amount can be negative, and rotation lets us handle both
        // cases without branching. Wrapped-around digits are masked out.
        let sl = size.rotate_right((fl + GRANULARITY_LOG2).wrapping_sub(SLI));

        if fl as usize >= FLLEN {
            return None;
        }

        Some((fl as usize, sl & (SLLEN - 1)))
    }

    /// Find the first free block list whose every item is at least as large
    /// as the specified size.
    #[inline]
    fn map_ceil(size: usize) -> Option<(usize, usize)> {
        debug_assert!(size >= GRANULARITY);
        let fl = usize::BITS - GRANULARITY_LOG2 - 1 - size.leading_zeros();

        // Round up to the lower bound of the next list in this class
        let shift = (fl + GRANULARITY_LOG2).saturating_sub(SLI);
        let mask = (1usize << shift) - 1;
        let rounded = size.checked_add(mask)? & !mask;

        Self::map_floor(rounded)
    }

    fn search_suitable_free_block_list(&self, min_size: usize) -> Option<(usize, usize)> {
        let (fl, sl) = Self::map_ceil(min_size)?;

        let sl_map = self.sl_bitmap[fl] & (!0u16 << sl);
        if sl_map != 0 {
            return Some((fl, sl_map.trailing_zeros() as usize));
        }

        // Fall back to the next non-empty first-level class
        let fl_map = self.fl_bitmap & (!0u32).checked_shl(fl as u32 + 1).unwrap_or(0);
        if fl_map == 0 {
            return None;
        }
        let fl = fl_map.trailing_zeros() as usize;
        let sl = self.sl_bitmap[fl].trailing_zeros() as usize;
        debug_assert!(sl < SLLEN, "`fl_bitmap` and `sl_bitmap` disagree");
        Some((fl, sl))
    }

    /// Insert the specified free block to the corresponding free block list.
    fn link_free_block(&mut self, key: usize) {
        let size = self.blocks[key].size;
        let (fl, sl) = Self::map_floor(size).expect("could not map the size");
        let next_free = self.first_free[fl][sl].replace(key);

        let block = &mut self.blocks[key];
        debug_assert!(!block.used);
        block.next_free = next_free;
        block.prev_free = None;
        if let Some(next_free) = next_free {
            self.blocks[next_free].prev_free = Some(key);
        }

        self.fl_bitmap |= 1 << fl;
        self.sl_bitmap[fl] |= 1 << sl;
    }

    /// Remove the specified free block from its free block list.
    fn unlink_free_block(&mut self, key: usize) {
        let Block {
            size,
            prev_free,
            next_free,
            ..
        } = self.blocks[key];

        if let Some(next_free) = next_free {
            self.blocks[next_free].prev_free = prev_free;
        }

        if let Some(prev_free) = prev_free {
            self.blocks[prev_free].next_free = next_free;
        } else {
            let (fl, sl) = Self::map_floor(size).expect("could not map the size");
            debug_assert_eq!(self.first_free[fl][sl], Some(key));
            self.first_free[fl][sl] = next_free;

            if next_free.is_none() {
                // The free list is now empty - update the bitmap
                self.sl_bitmap[fl] &= !(1 << sl);
                if self.sl_bitmap[fl] == 0 {
                    self.fl_bitmap &= !(1 << fl);
                }
            }
        }
    }

    /// Hand a new region of `size` bytes over to the allocator. `size` is
    /// rounded down to a multiple of [`GRANULARITY`].
    ///
    /// Blocks never span two regions, even if the regions happen to be
    /// adjacent in the address space.
    pub fn add_region(&mut self, size: usize) -> Result<RegionId, AddRegionError> {
        let usable = size & !(GRANULARITY - 1);
        if usable < GRANULARITY {
            return Err(AddRegionError::TooSmall);
        }
        if usable > MAX_REGION_SIZE {
            return Err(AddRegionError::TooLarge);
        }

        let id = RegionId(self.regions.len());
        let first_block = self.blocks.insert(Block {
            region: id,
            offset: 0,
            size: usable,
            used: false,
            prev_phys: None,
            next_phys: None,
            prev_free: None,
            next_free: None,
        });
        self.regions.push(Region {
            storage: vec![0u8; usable].into_boxed_slice(),
            first_block,
        });
        self.link_free_block(first_block);

        self.total_bytes += usable;
        self.free_bytes += usable;
        self.minimum_ever_free_bytes += usable;

        log::debug!("heap region {:?} added ({} bytes)", id, usable);
        Ok(id)
    }

    /// Attempt to allocate a block of at least `size` bytes.
    ///
    /// Returns `None` if no free block is large enough. This never blocks.
    pub fn allocate(&mut self, size: usize) -> Option<Allocation> {
        let size = size.max(1).checked_add(GRANULARITY - 1)? & !(GRANULARITY - 1);

        let Some((fl, sl)) = self.search_suitable_free_block_list(size) else {
            log::trace!("allocate({}) failed: {} bytes free", size, self.free_bytes);
            return None;
        };
        let key = self.first_free[fl][sl]?;
        self.unlink_free_block(key);

        let block_size = self.blocks[key].size;
        debug_assert!(block_size >= size);

        // Split the block if the remainder is large enough to be a block
        // of its own
        if block_size - size >= GRANULARITY {
            let (region, offset, next_phys) = {
                let block = &mut self.blocks[key];
                block.size = size;
                (block.region, block.offset, block.next_phys)
            };
            let rest = self.blocks.insert(Block {
                region,
                offset: offset + size,
                size: block_size - size,
                used: false,
                prev_phys: Some(key),
                next_phys,
                prev_free: None,
                next_free: None,
            });
            if let Some(next_phys) = next_phys {
                self.blocks[next_phys].prev_phys = Some(rest);
            }
            self.blocks[key].next_phys = Some(rest);
            self.link_free_block(rest);
        }

        let block = &mut self.blocks[key];
        block.used = true;

        self.free_bytes -= block.size;
        self.minimum_ever_free_bytes = self.minimum_ever_free_bytes.min(self.free_bytes);
        self.successful_allocations += 1;

        Some(Allocation {
            block: key,
            region: block.region,
            offset: block.offset,
            size: block.size,
        })
    }

    /// Deallocate a block, merging it with its free physical neighbours.
    ///
    /// # Panics
    ///
    /// Panics if `allocation` was not made by `self`.
    pub fn free(&mut self, allocation: Allocation) {
        let mut key = allocation.block;
        let block = self
            .blocks
            .get_mut(key)
            .filter(|b| b.used && b.region == allocation.region && b.offset == allocation.offset)
            .expect("allocation does not belong to this heap");
        block.used = false;
        self.free_bytes += block.size;
        self.successful_frees += 1;

        // Merge with the next block
        if let Some(next) = self.blocks[key].next_phys.filter(|&n| !self.blocks[n].used) {
            self.unlink_free_block(next);
            let next_block = self.blocks.remove(next);
            let block = &mut self.blocks[key];
            block.size += next_block.size;
            block.next_phys = next_block.next_phys;
            if let Some(after) = next_block.next_phys {
                self.blocks[after].prev_phys = Some(key);
            }
        }

        // Merge with the previous block
        if let Some(prev) = self.blocks[key].prev_phys.filter(|&p| !self.blocks[p].used) {
            self.unlink_free_block(prev);
            let this_block = self.blocks.remove(key);
            let block = &mut self.blocks[prev];
            block.size += this_block.size;
            block.next_phys = this_block.next_phys;
            if let Some(after) = this_block.next_phys {
                self.blocks[after].prev_phys = Some(prev);
            }
            key = prev;
        }

        self.link_free_block(key);
    }

    /// Get the contents of an allocated block.
    pub fn bytes(&self, allocation: &Allocation) -> &[u8] {
        let storage = &self.regions[allocation.region.0].storage;
        &storage[allocation.offset..allocation.offset + allocation.size]
    }

    /// Get the contents of an allocated block mutably.
    pub fn bytes_mut(&mut self, allocation: &Allocation) -> &mut [u8] {
        let storage = &mut self.regions[allocation.region.0].storage;
        &mut storage[allocation.offset..allocation.offset + allocation.size]
    }

    /// The sum of the sizes of all regions.
    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// The number of bytes not currently allocated.
    #[inline]
    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// The lowest value [`Self::free_bytes`] has ever had.
    #[inline]
    pub fn minimum_ever_free_bytes(&self) -> usize {
        self.minimum_ever_free_bytes
    }

    /// The number of regions added so far.
    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// The size of the largest block [`Self::allocate`] could currently return.
    pub fn largest_free_block(&self) -> usize {
        if self.fl_bitmap == 0 {
            return 0;
        }
        let fl = (u32::BITS - 1 - self.fl_bitmap.leading_zeros()) as usize;
        let sl = (u16::BITS - 1 - self.sl_bitmap[fl].leading_zeros()) as usize;

        // Sizes within a list vary, so scan the (short) topmost list
        let mut largest = 0;
        let mut cursor = self.first_free[fl][sl];
        while let Some(key) = cursor {
            largest = largest.max(self.blocks[key].size);
            cursor = self.blocks[key].next_free;
        }
        largest
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            total_bytes: self.total_bytes,
            free_bytes: self.free_bytes,
            minimum_ever_free_bytes: self.minimum_ever_free_bytes,
            largest_free_block: self.largest_free_block(),
            free_blocks: self.blocks.iter().filter(|(_, b)| !b.used).count(),
            successful_allocations: self.successful_allocations,
            successful_frees: self.successful_frees,
        }
    }
}

#[cfg(test)]
impl Tlsf {
    /// Walk every region and free list and check the structural invariants.
    pub(crate) fn check_invariants(&self) {
        let mut free_sum = 0;
        for (i, region) in self.regions.iter().enumerate() {
            let mut cursor = Some(region.first_block);
            let mut expected_offset = 0;
            let mut prev: Option<usize> = None;
            let mut prev_free = false;
            while let Some(key) = cursor {
                let block = &self.blocks[key];
                assert_eq!(block.region, RegionId(i));
                assert_eq!(block.offset, expected_offset, "blocks are not contiguous");
                assert_eq!(block.prev_phys, prev);
                assert!(block.size >= GRANULARITY);
                assert_eq!(block.size % GRANULARITY, 0);
                if !block.used {
                    assert!(!prev_free, "two adjacent free blocks");
                    free_sum += block.size;
                }
                prev_free = !block.used;
                expected_offset += block.size;
                prev = Some(key);
                cursor = block.next_phys;
            }
            assert_eq!(expected_offset, region.storage.len(), "region is not covered");
        }
        assert_eq!(free_sum, self.free_bytes);

        let mut listed = 0;
        for fl in 0..FLLEN {
            assert_eq!(self.fl_bitmap & (1 << fl) != 0, self.sl_bitmap[fl] != 0);
            for sl in 0..SLLEN {
                let head = self.first_free[fl][sl];
                assert_eq!(self.sl_bitmap[fl] & (1 << sl) != 0, head.is_some());
                let mut cursor = head;
                let mut prev = None;
                while let Some(key) = cursor {
                    let block = &self.blocks[key];
                    assert!(!block.used);
                    assert_eq!(block.prev_free, prev);
                    assert_eq!(Self::map_floor(block.size), Some((fl, sl)));
                    listed += block.size;
                    prev = Some(key);
                    cursor = block.next_free;
                }
            }
        }
        assert_eq!(listed, self.free_bytes);
    }
}
