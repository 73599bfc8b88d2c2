//! Ray-grid marking: rasterise rays, gather candidates per ellipsoid.

use std::sync::atomic::AtomicBool;

use glam::{DVec3, IVec3};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cloud::RayCloud;
use crate::ellipsoid::{Ellipsoid, IntersectResult};
use crate::error::FilterError;
use crate::grid::VoxelGrid;
use crate::progress::Progress;

use super::classify::{classify_ellipsoid, IntersectionStats};
use super::TransientFilterConfig;

/// Per-worker working state for testing ellipsoids against the ray grid.
///
/// The bitset and vectors persist across ellipsoids; the bitset is
/// cleared by replaying `test_ray_ids` rather than zeroing the whole
/// allocation.
struct TransientMarker {
    ray_tested: Vec<bool>,
    test_ray_ids: Vec<u32>,
    pass_through_ids: Vec<u32>,
}

impl TransientMarker {
    fn new(ray_count: usize) -> Self {
        Self {
            ray_tested: vec![false; ray_count],
            test_ray_ids: Vec::new(),
            pass_through_ids: Vec::new(),
        }
    }

    /// Accumulate hit/pass-through evidence for one ellipsoid from the
    /// rays overlapping its cell bounds, then classify it. Each ellipsoid
    /// is owned by exactly one task, so its fields are written without
    /// synchronisation; only the shared per-ray marks are atomic.
    fn mark(
        &mut self,
        ellipsoid: &mut Ellipsoid,
        cloud: &RayCloud,
        ray_grid: &VoxelGrid<u32>,
        config: &TransientFilterConfig,
        transient_marks: &[AtomicBool],
    ) {
        if ellipsoid.transient || ellipsoid.is_degenerate() {
            return;
        }

        self.test_ray_ids.clear();
        self.pass_through_ids.clear();

        // Cell bounds of the ellipsoid, rejecting it when fully outside
        // the grid.
        let cell_min = (ellipsoid.pos - ellipsoid.extents - ray_grid.box_min) / ray_grid.voxel_width;
        let cell_max = (ellipsoid.pos + ellipsoid.extents - ray_grid.box_min) / ray_grid.voxel_width;
        if cell_max.cmplt(DVec3::ZERO).any() {
            return;
        }
        let dims = ray_grid.dims.as_dvec3();
        if cell_min.x >= dims.x || cell_min.y >= dims.y || cell_min.z >= dims.z {
            return;
        }
        let index_min = cell_min.floor().as_ivec3().max(IVec3::ZERO);
        let index_max = cell_max
            .floor()
            .as_ivec3()
            .min(ray_grid.dims - IVec3::ONE);

        // Union of candidate rays over the covered cells.
        for z in index_min.z..=index_max.z {
            for y in index_min.y..=index_max.y {
                for x in index_min.x..=index_max.x {
                    for &ray_id in ray_grid.cell(IVec3::new(x, y, z)) {
                        if self.ray_tested[ray_id as usize] {
                            continue;
                        }
                        self.ray_tested[ray_id as usize] = true;
                        self.test_ray_ids.push(ray_id);
                    }
                }
            }
        }

        let mut first_intersection_time = f64::MAX;
        let mut last_intersection_time = f64::MIN;
        let mut hits = 0u32;
        for slot in 0..self.test_ray_ids.len() {
            let ray_id = self.test_ray_ids[slot];
            self.ray_tested[ray_id as usize] = false;

            match ellipsoid.intersect(
                cloud.starts[ray_id as usize],
                cloud.ends[ray_id as usize],
            ) {
                IntersectResult::Miss => {}
                IntersectResult::Passthrough => self.pass_through_ids.push(ray_id),
                IntersectResult::Hit => {
                    hits += 1;
                    let time = cloud.times[ray_id as usize];
                    first_intersection_time = first_intersection_time.min(time);
                    last_intersection_time = last_intersection_time.max(time);
                }
            }
        }

        // Candidates were gathered in cell order; classification expects
        // ray-id order.
        self.pass_through_ids.sort_unstable();
        classify_ellipsoid(
            ellipsoid,
            &IntersectionStats {
                hits,
                pass_through_ids: &self.pass_through_ids,
                first_intersection_time,
                last_intersection_time,
            },
            &cloud.times,
            config.num_rays_filter_threshold,
            config.merge_type,
            true,
            transient_marks,
        );
    }
}

/// Rasterise every ray into a grid, then test each ellipsoid in
/// parallel against the rays overlapping its bounds.
pub(super) fn mark(
    ellipsoids: &mut [Ellipsoid],
    cloud: &RayCloud,
    bounds_min: DVec3,
    bounds_max: DVec3,
    config: &TransientFilterConfig,
    transient_marks: &[AtomicBool],
    progress: &Progress,
) -> Result<(), FilterError> {
    let mut ray_grid = VoxelGrid::<u32>::new(bounds_min, bounds_max, config.voxel_size)?;
    fill_ray_grid(&mut ray_grid, cloud, progress);

    progress.reset("transient-mark-ellipsoids", ellipsoids.len());
    let ray_grid = &ray_grid;

    #[cfg(feature = "parallel")]
    ellipsoids.par_iter_mut().for_each_init(
        || TransientMarker::new(cloud.ray_count()),
        |marker, ellipsoid| {
            marker.mark(ellipsoid, cloud, ray_grid, config, transient_marks);
            progress.increment();
        },
    );
    #[cfg(not(feature = "parallel"))]
    {
        let mut marker = TransientMarker::new(cloud.ray_count());
        for ellipsoid in ellipsoids.iter_mut() {
            marker.mark(ellipsoid, cloud, ray_grid, config, transient_marks);
            progress.increment();
        }
    }

    Ok(())
}

/// DDA-rasterise every ray into the grid. Unbounded rays are rasterised
/// too: they terminate on nothing, but their traversal is still
/// pass-through evidence against any surface they cross. The walker
/// drops rays whose endpoints are not finite.
fn fill_ray_grid(grid: &mut VoxelGrid<u32>, cloud: &RayCloud, progress: &Progress) {
    progress.reset("fillRayGrid", cloud.ray_count());
    let mut cells = Vec::new();
    for ray_id in 0..cloud.ray_count() {
        progress.increment();
        cells.clear();
        grid.walk_cells(cloud.starts[ray_id], cloud.ends[ray_id], |cell| {
            cells.push(cell);
        });
        for &cell in &cells {
            grid.insert(cell, ray_id as u32);
        }
    }
}
