use std::fmt;

/// Error type for [`Tlsf::add_region`].
///
/// [`Tlsf::add_region`]: crate::Tlsf::add_region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddRegionError {
    /// The region cannot hold a single block of [`GRANULARITY`] bytes.
    ///
    /// [`GRANULARITY`]: crate::GRANULARITY
    TooSmall,
    /// The region is larger than [`MAX_REGION_SIZE`].
    ///
    /// [`MAX_REGION_SIZE`]: crate::MAX_REGION_SIZE
    TooLarge,
}

impl fmt::Display for AddRegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooSmall => f.write_str("heap region is smaller than the allocation granularity"),
            Self::TooLarge => f.write_str("heap region exceeds the largest mappable block size"),
        }
    }
}

impl std::error::Error for AddRegionError {}
