//! Ellipse-grid marking: rasterise ellipsoid bounds, walk each ray.

use std::sync::atomic::AtomicBool;
use std::sync::{Mutex, PoisonError};

use glam::DVec3;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cloud::RayCloud;
use crate::ellipsoid::{Ellipsoid, IntersectResult};
use crate::error::FilterError;
use crate::grid::VoxelGrid;
use crate::progress::Progress;

use super::classify::{classify_ellipsoid, IntersectionStats};
use super::TransientFilterConfig;

/// Evidence accumulated for one ellipsoid while rays walk the grid.
#[derive(Debug)]
struct EllipsoidMark {
    hits: u32,
    first_intersection_time: f64,
    last_intersection_time: f64,
    pass_through_ids: Vec<u32>,
}

impl Default for EllipsoidMark {
    fn default() -> Self {
        Self {
            hits: 0,
            first_intersection_time: f64::MAX,
            last_intersection_time: f64::MIN,
            pass_through_ids: Vec::new(),
        }
    }
}

impl EllipsoidMark {
    fn hit(&mut self, time: f64) {
        self.hits += 1;
        self.first_intersection_time = self.first_intersection_time.min(time);
        self.last_intersection_time = self.last_intersection_time.max(time);
    }

    fn pass_through(&mut self, ray_id: u32) {
        self.pass_through_ids.push(ray_id);
    }
}

/// Per-worker stamp set suppressing ellipsoid retests within one ray's
/// walk; an ellipsoid spanning several cells must be tested once per ray.
struct WalkScratch {
    tested: Vec<bool>,
    touched: Vec<u32>,
}

impl WalkScratch {
    fn new(ellipsoid_count: usize) -> Self {
        Self {
            tested: vec![false; ellipsoid_count],
            touched: Vec::new(),
        }
    }

    /// True the first time `ellipsoid_id` is seen for the current ray.
    #[inline]
    fn first_visit(&mut self, ellipsoid_id: u32) -> bool {
        let slot = &mut self.tested[ellipsoid_id as usize];
        if *slot {
            return false;
        }
        *slot = true;
        self.touched.push(ellipsoid_id);
        true
    }

    /// Clear only the stamps the last ray set.
    fn reset(&mut self) {
        for &ellipsoid_id in &self.touched {
            self.tested[ellipsoid_id as usize] = false;
        }
        self.touched.clear();
    }
}

/// Accumulate intersection evidence for every ellipsoid by walking each
/// ray through a grid of rasterised ellipsoid bounds, then classify.
pub(super) fn mark(
    ellipsoids: &mut [Ellipsoid],
    cloud: &RayCloud,
    bounds_min: DVec3,
    bounds_max: DVec3,
    config: &TransientFilterConfig,
    transient_marks: &[AtomicBool],
    progress: &Progress,
) -> Result<(), FilterError> {
    progress.reset("initialise-marks", ellipsoids.len());
    let marks: Vec<Mutex<EllipsoidMark>> = ellipsoids
        .iter()
        .map(|_| {
            progress.increment();
            Mutex::new(EllipsoidMark::default())
        })
        .collect();

    let mut grid = VoxelGrid::<u32>::new(bounds_min, bounds_max, config.voxel_size)?;
    fill_ellipse_grid(&mut grid, ellipsoids, progress);

    progress.reset("transient-mark-ellipsoids", cloud.ray_count());
    {
        let ellipsoids: &[Ellipsoid] = ellipsoids;
        let grid = &grid;
        let marks = &marks;
        let walk_ray = move |scratch: &mut WalkScratch, ray_id: usize| {
            if cloud.ray_bounded(ray_id) {
                let start = cloud.starts[ray_id];
                let end = cloud.ends[ray_id];
                grid.walk_cells(start, end, |cell| {
                    for &ellipsoid_id in grid.cell(cell) {
                        if !scratch.first_visit(ellipsoid_id) {
                            continue;
                        }
                        match ellipsoids[ellipsoid_id as usize].intersect(start, end) {
                            IntersectResult::Miss => {}
                            IntersectResult::Passthrough => marks[ellipsoid_id as usize]
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .pass_through(ray_id as u32),
                            IntersectResult::Hit => marks[ellipsoid_id as usize]
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .hit(cloud.times[ray_id]),
                        }
                    }
                });
                scratch.reset();
            }
            progress.increment();
        };

        #[cfg(feature = "parallel")]
        (0..cloud.ray_count())
            .into_par_iter()
            .for_each_init(|| WalkScratch::new(ellipsoids.len()), walk_ray);
        #[cfg(not(feature = "parallel"))]
        {
            let mut scratch = WalkScratch::new(ellipsoids.len());
            for ray_id in 0..cloud.ray_count() {
                walk_ray(&mut scratch, ray_id);
            }
        }
    }

    progress.reset("transient-update-ellipsoids", ellipsoids.len());
    for (ellipsoid, mark) in ellipsoids.iter_mut().zip(marks) {
        progress.increment();
        if ellipsoid.is_degenerate() {
            continue;
        }
        let mut mark = mark.into_inner().unwrap_or_else(PoisonError::into_inner);
        // The walk may have run multi-threaded; normalise the order.
        mark.pass_through_ids.sort_unstable();
        classify_ellipsoid(
            ellipsoid,
            &IntersectionStats {
                hits: mark.hits,
                pass_through_ids: &mark.pass_through_ids,
                first_intersection_time: mark.first_intersection_time,
                last_intersection_time: mark.last_intersection_time,
            },
            &cloud.times,
            config.num_rays_filter_threshold,
            config.merge_type,
            true,
            transient_marks,
        );
    }

    Ok(())
}

/// Insert every finite ellipsoid into all grid cells its bounding box
/// overlaps. Overestimates the true overlap; the exact ellipsoid-vs-voxel
/// test costs more than the spurious intersection tests it would save.
fn fill_ellipse_grid(grid: &mut VoxelGrid<u32>, ellipsoids: &[Ellipsoid], progress: &Progress) {
    progress.reset("fillEllipseGrid", ellipsoids.len());
    for (ellipsoid_id, ellipsoid) in ellipsoids.iter().enumerate() {
        progress.increment();
        if ellipsoid.is_degenerate() {
            continue;
        }
        let index_min = grid.index(ellipsoid.pos - ellipsoid.extents, true);
        let index_max = grid.index(ellipsoid.pos + ellipsoid.extents, true);
        for z in index_min.z..=index_max.z {
            for y in index_min.y..=index_max.y {
                for x in index_min.x..=index_max.x {
                    grid.insert(glam::IVec3::new(x, y, z), ellipsoid_id as u32);
                }
            }
        }
    }
}
