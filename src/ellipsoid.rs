//! Fitted surface-patch ellipsoids and the ray intersection test.

use glam::{DMat3, DVec3};

/// Outcome of testing a ray segment against an ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntersectResult {
    /// The segment does not touch the ellipsoid.
    Miss,
    /// The segment terminates inside (or exactly on) the ellipsoid.
    Hit,
    /// The segment crosses the ellipsoid but terminates beyond it.
    Passthrough,
}

/// A local surface patch fitted around a ray end point.
///
/// One ellipsoid exists per ray, index-aligned with the ray ids; rays
/// whose neighbourhood was too sparse for a stable fit carry zero
/// `extents` and are skipped by every intersection test.
#[derive(Debug, Clone)]
pub struct Ellipsoid {
    /// Centre, the end point of the source ray.
    pub pos: DVec3,
    /// Orthonormal patch axes, one eigenvector per column.
    pub axes: DMat3,
    /// Semi-axis lengths along `axes`. Zero vector marks a degenerate
    /// patch.
    pub extents: DVec3,
    /// Timestamp copied from the source ray.
    pub time: f64,
    /// Estimated probability that a ray crossing this region is absorbed.
    pub opacity: f64,
    /// 1 for a perfectly flat neighbourhood, 0 for an isotropic one.
    pub planarity: f64,
    /// Rays that intersected this ellipsoid during marking.
    pub num_rays: usize,
    /// Pass-through rays observed outside the hit window.
    pub num_gone: usize,
    /// Set when the classifier decides the whole patch has moved.
    pub transient: bool,
}

impl Ellipsoid {
    pub fn new(pos: DVec3, axes: DMat3, extents: DVec3, time: f64, planarity: f64) -> Self {
        Self {
            pos,
            axes,
            extents,
            time,
            opacity: 0.0,
            planarity,
            num_rays: 0,
            num_gone: 0,
            transient: false,
        }
    }

    /// Placeholder for rays without a usable neighbourhood, keeping the
    /// ellipsoid list index-aligned with the rays.
    pub fn degenerate(pos: DVec3, time: f64) -> Self {
        Self::new(pos, DMat3::IDENTITY, DVec3::ZERO, time, 0.0)
    }

    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.extents == DVec3::ZERO
    }

    /// Map a world-space point into the frame where this ellipsoid is the
    /// unit sphere.
    #[inline]
    fn to_unit_frame(&self, point: DVec3) -> DVec3 {
        let rel = point - self.pos;
        DVec3::new(
            self.axes.col(0).dot(rel) / self.extents.x,
            self.axes.col(1).dot(rel) / self.extents.y,
            self.axes.col(2).dot(rel) / self.extents.z,
        )
    }

    /// Classify the segment `start -> end` against this ellipsoid.
    ///
    /// An end point exactly on the surface counts as a hit.
    pub fn intersect(&self, start: DVec3, end: DVec3) -> IntersectResult {
        if self.is_degenerate() {
            return IntersectResult::Miss;
        }

        let s = self.to_unit_frame(start);
        let e = self.to_unit_frame(end);

        if e.length_squared() <= 1.0 {
            return IntersectResult::Hit;
        }

        // End point is outside: passthrough iff the segment's closest
        // point to the sphere centre is inside the unit sphere.
        let dir = e - s;
        let length_sqr = dir.length_squared();
        if length_sqr == 0.0 {
            return IntersectResult::Miss;
        }
        let t = (-s.dot(dir) / length_sqr).clamp(0.0, 1.0);
        let closest = s + t * dir;
        if closest.length_squared() <= 1.0 {
            IntersectResult::Passthrough
        } else {
            IntersectResult::Miss
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_ball_at(pos: DVec3) -> Ellipsoid {
        Ellipsoid::new(pos, DMat3::IDENTITY, DVec3::ONE, 0.0, 0.0)
    }

    #[test]
    fn endpoint_inside_is_a_hit() {
        let ball = unit_ball_at(DVec3::ZERO);
        let result = ball.intersect(DVec3::new(0.0, 0.0, 5.0), DVec3::new(0.0, 0.0, 0.2));
        assert_eq!(result, IntersectResult::Hit);
    }

    #[test]
    fn endpoint_on_the_surface_is_a_hit() {
        let ball = unit_ball_at(DVec3::ZERO);
        let result = ball.intersect(DVec3::new(0.0, 0.0, 5.0), DVec3::new(0.0, 0.0, 1.0));
        assert_eq!(result, IntersectResult::Hit);
    }

    #[test]
    fn segment_through_the_ball_is_a_passthrough() {
        let ball = unit_ball_at(DVec3::ZERO);
        let result = ball.intersect(DVec3::new(0.0, 0.0, 5.0), DVec3::new(0.0, 0.0, -5.0));
        assert_eq!(result, IntersectResult::Passthrough);
    }

    #[test]
    fn start_inside_end_outside_is_a_passthrough() {
        let ball = unit_ball_at(DVec3::ZERO);
        let result = ball.intersect(DVec3::new(0.0, 0.0, 0.2), DVec3::new(0.0, 0.0, 5.0));
        assert_eq!(result, IntersectResult::Passthrough);
    }

    #[test]
    fn offset_segment_misses() {
        let ball = unit_ball_at(DVec3::ZERO);
        let result = ball.intersect(DVec3::new(2.0, 0.0, 5.0), DVec3::new(2.0, 0.0, -5.0));
        assert_eq!(result, IntersectResult::Miss);
    }

    #[test]
    fn segment_stopping_short_misses() {
        let ball = unit_ball_at(DVec3::ZERO);
        let result = ball.intersect(DVec3::new(0.0, 0.0, 5.0), DVec3::new(0.0, 0.0, 2.0));
        assert_eq!(result, IntersectResult::Miss);
    }

    #[test]
    fn anisotropic_extents_shape_the_test() {
        // Flat patch: thin along z.
        let patch = Ellipsoid::new(
            DVec3::ZERO,
            DMat3::IDENTITY,
            DVec3::new(1.0, 1.0, 0.01),
            0.0,
            1.0,
        );
        // Crosses the thin axis: passthrough.
        assert_eq!(
            patch.intersect(DVec3::new(0.5, 0.0, 1.0), DVec3::new(0.5, 0.0, -1.0)),
            IntersectResult::Passthrough
        );
        // Laterally outside the unit disc: miss.
        assert_eq!(
            patch.intersect(DVec3::new(1.5, 0.0, 1.0), DVec3::new(1.5, 0.0, -1.0)),
            IntersectResult::Miss
        );
    }

    #[test]
    fn degenerate_ellipsoid_never_intersects() {
        let degenerate = Ellipsoid::degenerate(DVec3::ZERO, 0.0);
        let result = degenerate.intersect(DVec3::new(0.0, 0.0, 5.0), DVec3::ZERO);
        assert_eq!(result, IntersectResult::Miss);
    }

    #[test]
    fn rotated_axes_are_respected() {
        // Long axis along the x=y diagonal, short axes across it.
        let diag = std::f64::consts::FRAC_1_SQRT_2;
        let axes = DMat3::from_cols(
            DVec3::new(diag, diag, 0.0),
            DVec3::new(-diag, diag, 0.0),
            DVec3::Z,
        );
        let patch = Ellipsoid::new(DVec3::ZERO, axes, DVec3::new(2.0, 0.1, 0.1), 0.0, 0.0);
        // End point 1.5 along the long axis: inside.
        let along = DVec3::new(diag, diag, 0.0) * 1.5;
        assert_eq!(
            patch.intersect(DVec3::new(5.0, 5.0, 0.0), along),
            IntersectResult::Hit
        );
        // End point 1.5 across the short axis: well outside.
        let across = DVec3::new(-diag, diag, 0.0) * 1.5;
        assert_eq!(
            patch.intersect(DVec3::new(-5.0, 5.0, 0.0), across),
            IntersectResult::Miss
        );
    }
}
