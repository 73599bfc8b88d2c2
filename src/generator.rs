//! Ellipsoid generation: neighbourhood PCA around every bounded ray end.
//!
//! End points are binned into a uniform search grid; for each ray, rings
//! of cells are expanded outwards until enough candidates are found, so
//! the effective search radius adapts to the local point density.

use glam::{DMat3, DVec3, IVec3};
use nalgebra::{Matrix3, SymmetricEigen};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cloud::RayCloud;
use crate::ellipsoid::Ellipsoid;
use crate::error::FilterError;
use crate::grid::VoxelGrid;
use crate::progress::Progress;

/// Neighbours gathered around each end point for the covariance fit.
const SURFEL_NEIGHBOURS: usize = 16;
/// Below this many neighbours the covariance is too unstable to use.
const SURFEL_MIN_NEIGHBOURS: usize = 5;
/// Semi-axis length in standard deviations of the neighbourhood spread.
const ELLIPSOID_SIZE: f64 = 2.0;
/// Relative eigenvalue floor keeping near-planar patches at a usable
/// thickness along their normal.
const EIGENVALUE_FLOOR: f64 = 1e-4;
/// Below this the whole neighbourhood is effectively coincident and the
/// ellipsoid stays degenerate.
const DEGENERATE_EIGENVALUE: f64 = 1e-12;
/// Ring-expansion cut-off for the neighbour search.
const MAX_SEARCH_RING: i32 = 8;

/// Ellipsoid list plus the bounds of all finite support boxes.
pub(crate) struct GeneratedEllipsoids {
    /// Index-aligned with the ray ids.
    pub ellipsoids: Vec<Ellipsoid>,
    /// AABB over `pos ± extents` of the finite ellipsoids, or `None`
    /// when every ellipsoid is degenerate.
    pub bounds: Option<(DVec3, DVec3)>,
}

/// Fit one ellipsoid per ray of `cloud`. Unbounded rays and rays whose
/// neighbourhood is too sparse get degenerate placeholders.
pub(crate) fn generate_ellipsoids(
    cloud: &RayCloud,
    voxel_size: f64,
    progress: &Progress,
) -> Result<GeneratedEllipsoids, FilterError> {
    let ray_count = cloud.ray_count();
    progress.reset("generate-ellipsoids", ray_count);

    let Some((bounds_min, bounds_max)) = cloud.bounds() else {
        let ellipsoids = (0..ray_count)
            .map(|ray_id| {
                progress.increment();
                Ellipsoid::degenerate(cloud.starts[ray_id], cloud.times[ray_id])
            })
            .collect();
        return Ok(GeneratedEllipsoids {
            ellipsoids,
            bounds: None,
        });
    };

    let mut end_grid = VoxelGrid::<u32>::new(bounds_min, bounds_max, voxel_size)?;
    for ray_id in 0..ray_count {
        if cloud.ray_bounded(ray_id) {
            let cell = end_grid.index(cloud.ends[ray_id], true);
            end_grid.insert(cell, ray_id as u32);
        }
    }

    let fit = |candidates: &mut Vec<(f64, u32)>, ray_id: usize| -> Ellipsoid {
        progress.increment();
        let time = cloud.times[ray_id];
        if !cloud.ray_bounded(ray_id) {
            return Ellipsoid::degenerate(cloud.starts[ray_id], time);
        }

        let end = cloud.ends[ray_id];
        gather_neighbours(&end_grid, cloud, end, candidates);
        if candidates.len() < SURFEL_MIN_NEIGHBOURS {
            return Ellipsoid::degenerate(end, time);
        }
        if candidates.len() > SURFEL_NEIGHBOURS {
            candidates.select_nth_unstable_by(SURFEL_NEIGHBOURS - 1, |a, b| a.0.total_cmp(&b.0));
            candidates.truncate(SURFEL_NEIGHBOURS);
        }
        fit_patch(cloud, end, time, candidates)
    };

    #[cfg(feature = "parallel")]
    let ellipsoids: Vec<Ellipsoid> = (0..ray_count)
        .into_par_iter()
        .map_init(Vec::new, |candidates, ray_id| fit(candidates, ray_id))
        .collect();
    #[cfg(not(feature = "parallel"))]
    let ellipsoids: Vec<Ellipsoid> = {
        let mut candidates = Vec::new();
        (0..ray_count)
            .map(|ray_id| fit(&mut candidates, ray_id))
            .collect()
    };

    let mut bounds: Option<(DVec3, DVec3)> = None;
    for ellipsoid in &ellipsoids {
        if ellipsoid.is_degenerate() {
            continue;
        }
        let lo = ellipsoid.pos - ellipsoid.extents;
        let hi = ellipsoid.pos + ellipsoid.extents;
        bounds = Some(match bounds {
            Some((bounds_lo, bounds_hi)) => (bounds_lo.min(lo), bounds_hi.max(hi)),
            None => (lo, hi),
        });
    }

    log::debug!(
        "generated {} ellipsoids ({} degenerate)",
        ellipsoids.len(),
        ellipsoids.iter().filter(|e| e.is_degenerate()).count()
    );

    Ok(GeneratedEllipsoids { ellipsoids, bounds })
}

/// Collect candidate `(distance_sq, ray_id)` pairs around `end` by
/// expanding cell rings. One extra ring is always gathered past the ring
/// that satisfied the count, since a diagonal cell of ring r can hold
/// points nearer than an axial cell of ring r - 1.
fn gather_neighbours(
    grid: &VoxelGrid<u32>,
    cloud: &RayCloud,
    end: DVec3,
    candidates: &mut Vec<(f64, u32)>,
) {
    candidates.clear();
    let centre = grid.index(end, true);

    let mut found_ring: Option<i32> = None;
    for ring in 0..=MAX_SEARCH_RING {
        if let Some(found) = found_ring {
            if ring > found + 1 {
                break;
            }
        }
        for_each_ring_cell(centre, ring, grid.dims, |cell| {
            for &id in grid.cell(cell) {
                let distance_sq = (cloud.ends[id as usize] - end).length_squared();
                candidates.push((distance_sq, id));
            }
        });
        if found_ring.is_none() && candidates.len() >= SURFEL_NEIGHBOURS {
            found_ring = Some(ring);
        }
    }
}

/// Visit the in-grid cells at Chebyshev distance `ring` from `centre`.
fn for_each_ring_cell(centre: IVec3, ring: i32, dims: IVec3, mut visit: impl FnMut(IVec3)) {
    for dx in -ring..=ring {
        for dy in -ring..=ring {
            for dz in -ring..=ring {
                if dx.abs().max(dy.abs()).max(dz.abs()) != ring {
                    continue;
                }
                let cell = centre + IVec3::new(dx, dy, dz);
                if cell.cmpge(IVec3::ZERO).all() && cell.cmplt(dims).all() {
                    visit(cell);
                }
            }
        }
    }
}

/// Diagonalise the neighbourhood covariance into an ellipsoid.
fn fit_patch(cloud: &RayCloud, end: DVec3, time: f64, neighbours: &[(f64, u32)]) -> Ellipsoid {
    let inv_count = 1.0 / neighbours.len() as f64;

    let mut mean = DVec3::ZERO;
    for &(_, id) in neighbours {
        mean += cloud.ends[id as usize];
    }
    mean *= inv_count;

    let mut covariance = Matrix3::<f64>::zeros();
    for &(_, id) in neighbours {
        let offset = cloud.ends[id as usize] - mean;
        let offset = [offset.x, offset.y, offset.z];
        for row in 0..3 {
            for col in 0..3 {
                covariance[(row, col)] += offset[row] * offset[col] * inv_count;
            }
        }
    }

    let eigen = SymmetricEigen::new(covariance);
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));
    let values = order.map(|i| eigen.eigenvalues[i].max(0.0));

    if values[2] <= DEGENERATE_EIGENVALUE {
        // The whole neighbourhood sits on one point.
        return Ellipsoid::degenerate(end, time);
    }

    let axis = |slot: usize| {
        let column = eigen.eigenvectors.column(order[slot]);
        DVec3::new(column[0], column[1], column[2])
    };
    let axes = DMat3::from_cols(axis(0), axis(1), axis(2));

    let planarity = if values[1] > 0.0 {
        1.0 - values[0] / values[1]
    } else {
        0.0
    };

    let floor = EIGENVALUE_FLOOR * values[2];
    let extents = DVec3::new(
        values[0].max(floor).sqrt(),
        values[1].max(floor).sqrt(),
        values[2].max(floor).sqrt(),
    ) * ELLIPSOID_SIZE;

    Ellipsoid::new(end, axes, extents, time, planarity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::Rgba;

    const WHITE: Rgba = Rgba::new(255, 255, 255, 255);

    fn plane_cloud(nx: usize, ny: usize, spacing: f64) -> RayCloud {
        let mut cloud = RayCloud::default();
        for iy in 0..ny {
            for ix in 0..nx {
                let x = ix as f64 * spacing;
                let y = iy as f64 * spacing;
                cloud.push_ray(
                    DVec3::new(x, y, 1.0),
                    DVec3::new(x, y, 0.0),
                    cloud.ray_count() as f64,
                    WHITE,
                );
            }
        }
        cloud
    }

    #[test]
    fn planar_patch_is_flat_and_planar() {
        let cloud = plane_cloud(8, 8, 0.05);
        let generated =
            generate_ellipsoids(&cloud, 0.1, &Progress::new()).expect("generation succeeds");
        assert_eq!(generated.ellipsoids.len(), cloud.ray_count());

        // Middle of the patch: well-conditioned planar fit.
        let middle = &generated.ellipsoids[3 * 8 + 3];
        assert!(!middle.is_degenerate());
        assert!(middle.planarity > 0.9, "planarity {}", middle.planarity);
        let thin = middle.extents.min_element();
        let wide = middle.extents.max_element();
        assert!(thin < 0.02, "thin axis {}", thin);
        assert!((0.05..0.3).contains(&wide), "wide axis {}", wide);
        assert_eq!(middle.pos, cloud.ends[3 * 8 + 3]);
    }

    #[test]
    fn support_bounds_cover_the_patch() {
        let cloud = plane_cloud(8, 8, 0.05);
        let generated =
            generate_ellipsoids(&cloud, 0.1, &Progress::new()).expect("generation succeeds");
        let (lo, hi) = generated.bounds.expect("finite ellipsoids");
        assert!(lo.x < 0.0 && lo.y < 0.0);
        assert!(hi.x > 0.35 && hi.y > 0.35);
        assert!(lo.z < 0.0 && hi.z > 0.0);
    }

    #[test]
    fn sparse_neighbourhood_is_degenerate() {
        let mut cloud = RayCloud::default();
        for i in 0..3 {
            let x = i as f64 * 0.05;
            cloud.push_ray(DVec3::new(x, 0.0, 1.0), DVec3::new(x, 0.0, 0.0), i as f64, WHITE);
        }
        let generated =
            generate_ellipsoids(&cloud, 0.1, &Progress::new()).expect("generation succeeds");
        assert!(generated.ellipsoids.iter().all(|e| e.is_degenerate()));
        assert!(generated.bounds.is_none());
    }

    #[test]
    fn coincident_points_stay_degenerate() {
        let mut cloud = RayCloud::default();
        for i in 0..20 {
            cloud.push_ray(DVec3::new(0.0, 0.0, 1.0), DVec3::ZERO, i as f64, WHITE);
        }
        let generated =
            generate_ellipsoids(&cloud, 0.1, &Progress::new()).expect("generation succeeds");
        assert!(generated.ellipsoids.iter().all(|e| e.is_degenerate()));
        assert!(generated.bounds.is_none());
    }

    #[test]
    fn unbounded_rays_get_placeholders() {
        let mut cloud = plane_cloud(8, 8, 0.05);
        cloud.push_ray(
            DVec3::new(0.2, 0.2, 1.0),
            DVec3::new(0.2, 0.2, -100.0),
            1000.0,
            Rgba::new(255, 255, 255, 0),
        );
        let generated =
            generate_ellipsoids(&cloud, 0.1, &Progress::new()).expect("generation succeeds");
        assert!(generated.ellipsoids[cloud.ray_count() - 1].is_degenerate());
    }
}
