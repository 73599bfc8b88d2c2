//! Ray cloud storage: parallel per-ray attribute arrays.

use glam::DVec3;

use crate::error::FilterError;

/// An RGBA colour, one byte per channel.
///
/// The alpha channel doubles as the bounded-ray tag: the loader writes
/// `alpha == 0` for rays that did not return a surface sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgba {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Rgba {
    #[inline]
    pub const fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }
}

/// An ordered collection of rays: sensor origin, observed end point,
/// timestamp and colour, stored as parallel arrays.
///
/// The array index is the ray id throughout this crate. The four arrays
/// must stay the same length; [`RayCloud::validate`] checks this along
/// with finiteness before any processing.
#[derive(Debug, Clone, Default)]
pub struct RayCloud {
    pub starts: Vec<DVec3>,
    pub ends: Vec<DVec3>,
    pub times: Vec<f64>,
    pub colours: Vec<Rgba>,
}

impl RayCloud {
    #[inline]
    pub fn ray_count(&self) -> usize {
        self.starts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        self.starts.reserve(additional);
        self.ends.reserve(additional);
        self.times.reserve(additional);
        self.colours.reserve(additional);
    }

    pub fn clear(&mut self) {
        self.starts.clear();
        self.ends.clear();
        self.times.clear();
        self.colours.clear();
    }

    pub fn push_ray(&mut self, start: DVec3, end: DVec3, time: f64, colour: Rgba) {
        self.starts.push(start);
        self.ends.push(end);
        self.times.push(time);
        self.colours.push(colour);
    }

    /// A ray is bounded when its end point is a real surface sample.
    #[inline]
    pub fn ray_bounded(&self, ray_id: usize) -> bool {
        self.colours[ray_id].alpha != 0 && self.ends[ray_id].is_finite()
    }

    /// Check the cross-array invariants. Runs before anything is
    /// allocated on behalf of the cloud.
    pub fn validate(&self) -> Result<(), FilterError> {
        let n = self.starts.len();
        if self.ends.len() != n || self.times.len() != n || self.colours.len() != n {
            return Err(FilterError::MismatchedArrays {
                starts: self.starts.len(),
                ends: self.ends.len(),
                times: self.times.len(),
                colours: self.colours.len(),
            });
        }

        for ray_id in 0..n {
            let bounded_end_ok = self.colours[ray_id].alpha == 0 || self.ends[ray_id].is_finite();
            if !self.starts[ray_id].is_finite()
                || !self.times[ray_id].is_finite()
                || !bounded_end_ok
            {
                return Err(FilterError::NonFiniteRay(ray_id));
            }
        }

        Ok(())
    }

    /// Axis-aligned bounds over the bounded end points, or `None` when
    /// no ray is bounded.
    pub fn bounds(&self) -> Option<(DVec3, DVec3)> {
        let mut bounds: Option<(DVec3, DVec3)> = None;
        for ray_id in 0..self.ray_count() {
            if !self.ray_bounded(ray_id) {
                continue;
            }
            let end = self.ends[ray_id];
            bounds = Some(match bounds {
                Some((lo, hi)) => (lo.min(end), hi.max(end)),
                None => (end, end),
            });
        }
        bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white() -> Rgba {
        Rgba::new(255, 255, 255, 255)
    }

    #[test]
    fn push_and_count() {
        let mut cloud = RayCloud::default();
        assert!(cloud.is_empty());
        cloud.push_ray(DVec3::ZERO, DVec3::X, 1.0, white());
        assert_eq!(cloud.ray_count(), 1);
        assert!(cloud.ray_bounded(0));
    }

    #[test]
    fn alpha_zero_is_unbounded() {
        let mut cloud = RayCloud::default();
        cloud.push_ray(DVec3::ZERO, DVec3::X, 0.0, Rgba::new(255, 255, 255, 0));
        assert!(!cloud.ray_bounded(0));
    }

    #[test]
    fn validate_catches_length_mismatch() {
        let mut cloud = RayCloud::default();
        cloud.push_ray(DVec3::ZERO, DVec3::X, 0.0, white());
        cloud.times.push(1.0);
        assert!(matches!(
            cloud.validate(),
            Err(FilterError::MismatchedArrays { .. })
        ));
    }

    #[test]
    fn validate_catches_non_finite_start() {
        let mut cloud = RayCloud::default();
        cloud.push_ray(DVec3::splat(f64::NAN), DVec3::X, 0.0, white());
        assert_eq!(cloud.validate(), Err(FilterError::NonFiniteRay(0)));
    }

    #[test]
    fn validate_allows_non_finite_unbounded_end() {
        let mut cloud = RayCloud::default();
        cloud.push_ray(
            DVec3::ZERO,
            DVec3::splat(f64::INFINITY),
            0.0,
            Rgba::new(0, 0, 0, 0),
        );
        assert!(cloud.validate().is_ok());
    }

    #[test]
    fn bounds_cover_bounded_ends_only() {
        let mut cloud = RayCloud::default();
        cloud.push_ray(DVec3::ZERO, DVec3::new(1.0, 2.0, 3.0), 0.0, white());
        cloud.push_ray(DVec3::ZERO, DVec3::new(-1.0, 0.0, 5.0), 1.0, white());
        cloud.push_ray(
            DVec3::ZERO,
            DVec3::splat(100.0),
            2.0,
            Rgba::new(255, 255, 255, 0),
        );
        let (lo, hi) = cloud.bounds().expect("two bounded rays");
        assert_eq!(lo, DVec3::new(-1.0, 0.0, 3.0));
        assert_eq!(hi, DVec3::new(1.0, 2.0, 5.0));
    }
}
