//! A two-level segregated fit (TLSF) memory allocator that can be seeded from
//! any number of disjoint memory regions.
//!
//! Block metadata is kept in a side table instead of in-band headers, so the
//! memory handed out by [`Tlsf::allocate`] is ordinary safe storage owned by
//! the allocator. Allocation and deallocation both complete in constant time.
//!
//! ```
//! use kestrel_heap::Tlsf;
//!
//! let mut heap = Tlsf::new();
//! heap.add_region(4096).unwrap();
//! heap.add_region(1024).unwrap();
//!
//! let a = heap.allocate(100).unwrap();
//! heap.bytes_mut(&a).fill(0x5a);
//! assert!(a.size() >= 100);
//!
//! heap.free(a);
//! assert_eq!(heap.free_bytes(), heap.total_bytes());
//! ```
#![forbid(unsafe_code)]
mod error;
mod tlsf;

pub use self::{
    error::AddRegionError,
    tlsf::{Allocation, HeapStats, RegionId, Tlsf, FLLEN, GRANULARITY, MAX_REGION_SIZE, SLLEN},
};
