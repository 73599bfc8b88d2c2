//! Uniform voxel grid with a DDA cell walker.
//!
//! Cells hold ordered lists of payload ids (ray ids or ellipsoid ids).
//! The grid is built once per filter call and is read-only during the
//! marking passes. O(1) cell lookup, duplicates allowed on insert.

use glam::{DVec3, IVec3};

use crate::error::FilterError;

/// Upper bound on cells allocated for a single grid.
/// Keeps a pathological `voxel_size` from exhausting memory before the
/// first marking pass.
const MAX_GRID_CELLS: u128 = 1 << 27;

/// Stands in for zero direction components so the boundary-distance
/// division stays finite instead of producing NaN.
const WALK_EPSILON: f64 = 1e-30;

/// Uniform grid over an axis-aligned box with cubic cells.
#[derive(Debug)]
pub struct VoxelGrid<T> {
    pub box_min: DVec3,
    pub box_max: DVec3,
    pub voxel_width: f64,
    pub dims: IVec3,
    cells: Vec<Vec<T>>,
}

impl<T> VoxelGrid<T> {
    /// Build an empty grid covering `[box_min, box_max]`, ceiling-dividing
    /// the extent by `voxel_width`. Dims are clamped to at least one cell
    /// per axis so a degenerate box still yields a usable grid.
    pub fn new(box_min: DVec3, box_max: DVec3, voxel_width: f64) -> Result<Self, FilterError> {
        let extent = (box_max - box_min).max(DVec3::ZERO);
        let dims = (extent / voxel_width).ceil().as_ivec3().max(IVec3::ONE);

        let cell_count = dims.x as u128 * dims.y as u128 * dims.z as u128;
        if cell_count > MAX_GRID_CELLS {
            return Err(FilterError::GridTooLarge {
                cells: cell_count,
                budget: MAX_GRID_CELLS,
            });
        }

        Ok(Self {
            box_min,
            box_max,
            voxel_width,
            dims,
            cells: (0..cell_count as usize).map(|_| Vec::new()).collect(),
        })
    }

    /// Map a world-space point to integer cell coordinates. With `clamp`
    /// set, out-of-range coordinates are clipped into the grid.
    #[inline]
    pub fn index(&self, point: DVec3, clamp: bool) -> IVec3 {
        let index = ((point - self.box_min) / self.voxel_width).floor().as_ivec3();
        if clamp {
            index.clamp(IVec3::ZERO, self.dims - IVec3::ONE)
        } else {
            index
        }
    }

    #[inline]
    pub fn contains_cell(&self, index: IVec3) -> bool {
        index.cmpge(IVec3::ZERO).all() && index.cmplt(self.dims).all()
    }

    #[inline]
    fn flat_index(&self, index: IVec3) -> Option<usize> {
        if !self.contains_cell(index) {
            return None;
        }
        Some(
            (index.x + self.dims.x * (index.y + self.dims.y * index.z)) as usize,
        )
    }

    /// Append a value to a cell. Out-of-range cells are silently ignored;
    /// duplicates are the caller's responsibility.
    #[inline]
    pub fn insert(&mut self, index: IVec3, value: T) {
        if let Some(flat) = self.flat_index(index) {
            self.cells[flat].push(value);
        }
    }

    /// The list stored at a cell. Out-of-range cells read as empty.
    #[inline]
    pub fn cell(&self, index: IVec3) -> &[T] {
        match self.flat_index(index) {
            Some(flat) => &self.cells[flat],
            None => &[],
        }
    }

    /// Walk the cells pierced by the segment `start -> end` with a 3-D
    /// DDA, invoking `visit` for every in-grid cell.
    ///
    /// The walk stops at the end cell; a squared-cell-distance bound backs
    /// that up for diagonal rays where boundary-distance ties can step
    /// past exact equality. Cells outside the grid are skipped, not
    /// visited.
    pub fn walk_cells(&self, start: DVec3, end: DVec3, mut visit: impl FnMut(IVec3)) {
        if !start.is_finite() || !end.is_finite() {
            return;
        }

        let dir = end - start;
        let dir = DVec3::new(
            non_zero(dir.x),
            non_zero(dir.y),
            non_zero(dir.z),
        );
        let dir_sign = dir.signum();
        let step = dir_sign.as_ivec3();

        let start_index = self.index(start, false);
        let end_index = self.index(end, false);
        let length_sqr = (end_index - start_index).as_i64vec3().length_squared();

        let mut index = start_index;
        loop {
            if self.contains_cell(index) {
                visit(index);
            }

            if index == end_index
                || (index - start_index).as_i64vec3().length_squared() > length_sqr
            {
                break;
            }

            // Parametric distance to the next cell boundary along each
            // axis; advance the closest one.
            let mid = self.box_min + self.voxel_width * (index.as_dvec3() + DVec3::splat(0.5));
            let next_boundary = mid + 0.5 * self.voxel_width * dir_sign;
            let d = (next_boundary - start) / dir;
            if d.x < d.y && d.x < d.z {
                index.x += step.x;
            } else if d.y < d.x && d.y < d.z {
                index.y += step.y;
            } else {
                index.z += step.z;
            }
        }
    }
}

#[inline]
fn non_zero(value: f64) -> f64 {
    if value == 0.0 {
        WALK_EPSILON
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid() -> VoxelGrid<u32> {
        VoxelGrid::new(DVec3::ZERO, DVec3::splat(1.0), 0.1).expect("small grid")
    }

    #[test]
    fn dims_are_ceiling_divided() {
        let grid = VoxelGrid::<u32>::new(DVec3::ZERO, DVec3::new(1.05, 0.2, 0.0), 0.1)
            .expect("small grid");
        assert_eq!(grid.dims, IVec3::new(11, 2, 1));
    }

    #[test]
    fn degenerate_box_gets_one_cell() {
        let grid = VoxelGrid::<u32>::new(DVec3::ONE, DVec3::ONE, 0.1).expect("point grid");
        assert_eq!(grid.dims, IVec3::ONE);
    }

    #[test]
    fn oversized_grid_is_rejected() {
        let result = VoxelGrid::<u32>::new(DVec3::ZERO, DVec3::splat(1.0e6), 0.01);
        assert!(matches!(result, Err(FilterError::GridTooLarge { .. })));
    }

    #[test]
    fn insert_and_read_back() {
        let mut grid = unit_grid();
        let cell = IVec3::new(3, 4, 5);
        grid.insert(cell, 7);
        grid.insert(cell, 7);
        assert_eq!(grid.cell(cell), &[7, 7]);
        assert!(grid.cell(IVec3::new(0, 0, 0)).is_empty());
    }

    #[test]
    fn out_of_range_insert_is_ignored() {
        let mut grid = unit_grid();
        grid.insert(IVec3::new(-1, 0, 0), 1);
        grid.insert(IVec3::new(0, 0, 99), 2);
        assert!(grid.cell(IVec3::new(-1, 0, 0)).is_empty());
        assert!(grid.cell(IVec3::new(0, 0, 99)).is_empty());
    }

    #[test]
    fn clamped_index_stays_in_grid() {
        let grid = unit_grid();
        assert_eq!(grid.index(DVec3::splat(-5.0), true), IVec3::ZERO);
        assert_eq!(grid.index(DVec3::splat(5.0), true), grid.dims - IVec3::ONE);
    }

    #[test]
    fn axis_aligned_walk_visits_each_cell_once() {
        let grid = unit_grid();
        let mut visited = Vec::new();
        grid.walk_cells(
            DVec3::new(0.05, 0.05, 0.05),
            DVec3::new(0.95, 0.05, 0.05),
            |cell| visited.push(cell),
        );
        let expected: Vec<IVec3> = (0..10).map(|x| IVec3::new(x, 0, 0)).collect();
        assert_eq!(visited, expected);
    }

    #[test]
    fn diagonal_walk_terminates_and_spans_endpoints() {
        let grid = unit_grid();
        let start = DVec3::new(0.01, 0.02, 0.03);
        let end = DVec3::new(0.97, 0.98, 0.99);
        let mut visited = Vec::new();
        grid.walk_cells(start, end, |cell| visited.push(cell));
        assert_eq!(visited.first(), Some(&grid.index(start, false)));
        assert!(visited.contains(&grid.index(end, false)));
        // A 3-D DDA visits at most one new cell per axis step.
        assert!(visited.len() <= 28);
    }

    #[test]
    fn walk_clips_cells_outside_the_grid() {
        let grid = unit_grid();
        let mut visited = Vec::new();
        grid.walk_cells(
            DVec3::new(0.55, 0.55, 2.0),
            DVec3::new(0.55, 0.55, 0.05),
            |cell| visited.push(cell),
        );
        assert_eq!(visited.len(), 10);
        assert!(visited.iter().all(|cell| grid.contains_cell(*cell)));
    }

    #[test]
    fn zero_direction_components_do_not_poison_the_walk() {
        let grid = unit_grid();
        let mut visited = Vec::new();
        // Direction is zero along y and z.
        grid.walk_cells(
            DVec3::new(0.05, 0.5, 0.5),
            DVec3::new(0.65, 0.5, 0.5),
            |cell| visited.push(cell),
        );
        assert_eq!(visited.len(), 7);
    }

    #[test]
    fn walk_of_a_single_cell_visits_it_once() {
        let grid = unit_grid();
        let mut visited = Vec::new();
        grid.walk_cells(
            DVec3::new(0.32, 0.33, 0.34),
            DVec3::new(0.38, 0.37, 0.36),
            |cell| visited.push(cell),
        );
        assert_eq!(visited, vec![IVec3::new(3, 3, 3)]);
    }

    #[test]
    fn non_finite_endpoints_are_skipped() {
        let grid = unit_grid();
        let mut visited = 0;
        grid.walk_cells(DVec3::splat(f64::NAN), DVec3::ZERO, |_| visited += 1);
        assert_eq!(visited, 0);
    }
}
