//! The transient filter: configuration, orchestration and finalisation.
//!
//! Given a single cloud, the filter fits one ellipsoid per ray end point,
//! accumulates hit/pass-through evidence for every ellipsoid against the
//! whole cloud via one of two voxel-indexed strategies, and partitions the
//! rays into a transient cloud and a fixed cloud.

mod classify;
mod ellipse_grid;
mod ray_grid;

use std::sync::atomic::{AtomicBool, Ordering};

use crate::cloud::RayCloud;
use crate::ellipsoid::Ellipsoid;
use crate::error::FilterError;
use crate::generator::generate_ellipsoids;
use crate::progress::Progress;

/// Which acceleration structure drives the marking pass.
///
/// Both strategies produce the same partition; they differ in what gets
/// rasterised and what gets iterated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrategy {
    /// Rasterise ellipsoid bounds into the grid and walk each ray through
    /// it. Preferred when small ellipsoids outnumber rays.
    EllipseGrid,
    /// Rasterise rays into the grid and gather candidates per ellipsoid.
    /// Parallelises over ellipsoids and wins at high ray-to-ellipsoid
    /// ratios.
    RayGrid,
}

/// Which observations survive when old and new geometry disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeType {
    /// Keep the oldest geometry; discard newer contradicting evidence.
    Oldest,
    /// Keep the newest geometry; discard older contradicting evidence.
    Newest,
    /// Favour removal: a contradicted surface is transient.
    Minimum,
    /// Favour retention: keep the surface, mark the exposing rays.
    Maximum,
}

/// Configuration for a [`TransientFilter`].
#[derive(Debug, Clone)]
pub struct TransientFilterConfig {
    /// Grid cell edge length in metres. Smaller voxels trade memory for
    /// better multi-threaded marking throughput.
    pub voxel_size: f64,
    /// Pass-through rays required before the filter acts. Zero disables
    /// filtering entirely.
    pub num_rays_filter_threshold: f64,
    pub strategy: FilterStrategy,
    pub merge_type: MergeType,
    /// Rewrite output colours with per-ellipsoid diagnostics:
    /// red = 1 - planarity, green = pass-through saturation, blue =
    /// opacity.
    pub colour_cloud: bool,
}

impl Default for TransientFilterConfig {
    fn default() -> Self {
        Self {
            voxel_size: 0.1,
            num_rays_filter_threshold: 20.0,
            strategy: FilterStrategy::RayGrid,
            merge_type: MergeType::Minimum,
            colour_cloud: false,
        }
    }
}

/// Splits a ray cloud into its transient and fixed parts.
///
/// The filter owns the fitted ellipsoids and both output clouds; the
/// input cloud is borrowed read-only for the duration of
/// [`TransientFilter::filter`].
#[derive(Debug)]
pub struct TransientFilter {
    config: TransientFilterConfig,
    ellipsoids: Vec<Ellipsoid>,
    transient: RayCloud,
    fixed: RayCloud,
}

impl TransientFilter {
    /// Validate `config` and build an idle filter.
    pub fn new(config: TransientFilterConfig) -> Result<Self, FilterError> {
        if !(config.voxel_size.is_finite() && config.voxel_size > 0.0) {
            return Err(FilterError::InvalidVoxelSize(config.voxel_size));
        }
        if !(config.num_rays_filter_threshold.is_finite()
            && config.num_rays_filter_threshold >= 0.0)
        {
            return Err(FilterError::InvalidThreshold(
                config.num_rays_filter_threshold,
            ));
        }
        Ok(Self {
            config,
            ellipsoids: Vec::new(),
            transient: RayCloud::default(),
            fixed: RayCloud::default(),
        })
    }

    pub fn config(&self) -> &TransientFilterConfig {
        &self.config
    }

    /// Rays belonging to moved objects or to space they uncovered.
    pub fn transient_cloud(&self) -> &RayCloud {
        &self.transient
    }

    /// Rays belonging to durable structure.
    pub fn fixed_cloud(&self) -> &RayCloud {
        &self.fixed
    }

    /// The fitted ellipsoids from the last [`TransientFilter::filter`]
    /// call, index-aligned with the input rays. Useful for diagnostics.
    pub fn ellipsoids(&self) -> &[Ellipsoid] {
        &self.ellipsoids
    }

    /// Partition `cloud` into the transient and fixed output clouds.
    ///
    /// Prior state is cleared first. `progress` is optional; when given it
    /// is driven through the phases `generate-ellipsoids`, the strategy's
    /// grid-fill phase, `transient-mark-ellipsoids` and (ellipse-grid
    /// only) `initialise-marks` / `transient-update-ellipsoids`.
    pub fn filter(
        &mut self,
        cloud: &RayCloud,
        progress: Option<&Progress>,
    ) -> Result<(), FilterError> {
        let tracker = Progress::new();
        let progress = progress.unwrap_or(&tracker);

        self.clear();
        cloud.validate()?;
        if cloud.is_empty() {
            return Ok(());
        }

        let generated = generate_ellipsoids(cloud, self.config.voxel_size, progress)?;
        self.ellipsoids = generated.ellipsoids;

        let transient_marks: Vec<AtomicBool> = (0..cloud.ray_count())
            .map(|_| AtomicBool::new(false))
            .collect();

        // No finite ellipsoid means no surface to contradict; everything
        // is fixed.
        if let Some((bounds_min, bounds_max)) = generated.bounds {
            match self.config.strategy {
                FilterStrategy::EllipseGrid => ellipse_grid::mark(
                    &mut self.ellipsoids,
                    cloud,
                    bounds_min,
                    bounds_max,
                    &self.config,
                    &transient_marks,
                    progress,
                )?,
                FilterStrategy::RayGrid => ray_grid::mark(
                    &mut self.ellipsoids,
                    cloud,
                    bounds_min,
                    bounds_max,
                    &self.config,
                    &transient_marks,
                    progress,
                )?,
            }
        }

        self.finalise(cloud, &transient_marks);
        log::debug!(
            "filtered {} rays: {} transient, {} fixed",
            cloud.ray_count(),
            self.transient.ray_count(),
            self.fixed.ray_count()
        );
        Ok(())
    }

    fn clear(&mut self) {
        self.ellipsoids.clear();
        self.transient.clear();
        self.fixed.clear();
    }

    /// Route every ray into one of the two output clouds.
    fn finalise(&mut self, cloud: &RayCloud, transient_marks: &[AtomicBool]) {
        for ray_id in 0..cloud.ray_count() {
            let ellipsoid = &self.ellipsoids[ray_id];

            let mut colour = cloud.colours[ray_id];
            if self.config.colour_cloud {
                colour.red = ((1.0 - ellipsoid.planarity) * 255.0) as u8;
                colour.blue = (ellipsoid.opacity * 255.0) as u8;
                colour.green = (ellipsoid.num_gone as f64 / (ellipsoid.num_gone as f64 + 10.0)
                    * 255.0) as u8;
            }

            let out = if ellipsoid.transient || transient_marks[ray_id].load(Ordering::Relaxed) {
                &mut self.transient
            } else {
                &mut self.fixed
            };
            out.push_ray(
                cloud.starts[ray_id],
                cloud.ends[ray_id],
                cloud.times[ray_id],
                colour,
            );
        }
    }
}
