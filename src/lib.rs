//! Transient filtering for ray clouds.
//!
//! A *ray cloud* couples every observed point with the sensor position it
//! was seen from and a timestamp. Scanning the same scene repeatedly then
//! exposes which geometry moved: a ray passing through a previously
//! observed surface is evidence that the surface was ephemeral, and a
//! surface appearing where rays used to travel freely is evidence of
//! uncovered space. [`TransientFilter`] turns that evidence into a
//! partition of the cloud into its *transient* and *fixed* parts, using
//! per-point fitted ellipsoids, voxel-indexed candidate gathering and a
//! probabilistic opacity estimate.
//!
//! # Example
//!
//! ```
//! use glam::DVec3;
//! use raycloud_transients::{RayCloud, Rgba, TransientFilter, TransientFilterConfig};
//!
//! let mut cloud = RayCloud::default();
//! cloud.push_ray(
//!     DVec3::new(0.0, 0.0, 2.0),
//!     DVec3::ZERO,
//!     0.0,
//!     Rgba::new(255, 255, 255, 255),
//! );
//!
//! let mut filter = TransientFilter::new(TransientFilterConfig::default())?;
//! filter.filter(&cloud, None)?;
//! assert_eq!(
//!     filter.transient_cloud().ray_count() + filter.fixed_cloud().ray_count(),
//!     cloud.ray_count(),
//! );
//! # Ok::<(), raycloud_transients::FilterError>(())
//! ```

pub mod cloud;
pub mod ellipsoid;
mod error;
mod generator;
pub mod grid;
pub mod io;
pub mod progress;
pub mod transient;

pub use cloud::{RayCloud, Rgba};
pub use ellipsoid::{Ellipsoid, IntersectResult};
pub use error::FilterError;
pub use grid::VoxelGrid;
pub use progress::{Progress, ProgressSnapshot};
pub use transient::{
    FilterStrategy, MergeType, TransientFilter, TransientFilterConfig,
};
