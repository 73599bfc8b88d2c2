//! Error types for filter construction and execution.

use std::fmt;

/// Errors that can occur when configuring or running the transient filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterError {
    /// The cloud's per-ray attribute arrays disagree on length.
    MismatchedArrays {
        starts: usize,
        ends: usize,
        times: usize,
        colours: usize,
    },

    /// A ray carries a non-finite start, time, or bounded end point.
    /// Holds the offending ray id.
    NonFiniteRay(usize),

    /// The voxel edge length must be positive and finite.
    InvalidVoxelSize(f64),

    /// The pass-through ray threshold must be non-negative and finite.
    InvalidThreshold(f64),

    /// The voxel grid over the cloud bounds would exceed the cell budget.
    /// Either the cloud is enormous or `voxel_size` is far too small.
    GridTooLarge { cells: u128, budget: u128 },
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::MismatchedArrays {
                starts,
                ends,
                times,
                colours,
            } => {
                write!(
                    f,
                    "mismatched ray attribute arrays: {} starts, {} ends, {} times, {} colours",
                    starts, ends, times, colours
                )
            }
            FilterError::NonFiniteRay(ray_id) => {
                write!(f, "ray {} has a non-finite start, time or end", ray_id)
            }
            FilterError::InvalidVoxelSize(size) => {
                write!(f, "voxel size must be positive and finite, got {}", size)
            }
            FilterError::InvalidThreshold(threshold) => {
                write!(
                    f,
                    "ray filter threshold must be non-negative, got {}",
                    threshold
                )
            }
            FilterError::GridTooLarge { cells, budget } => {
                write!(
                    f,
                    "voxel grid needs {} cells, exceeding the budget of {}",
                    cells, budget
                )
            }
        }
    }
}

impl std::error::Error for FilterError {}
