//! Utility
mod arena;
pub(crate) mod intrusive_list;
mod prio_bitmap;

pub(crate) use self::{
    arena::{Arena, Id},
    prio_bitmap::{PrioBitmap, PRIO_BITMAP_MAX_LEN},
};
