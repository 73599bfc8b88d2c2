#![allow(dead_code)]

//! Synthetic ray-cloud builders for the filter tests.
//!
//! Scenes are built from rectangular patches of vertical rays: a sensor
//! hovering above each point looking straight down. Every ray gets a
//! unique timestamp, which the tests use to match output rays back to
//! their inputs.

use glam::DVec3;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use raycloud_transients::{RayCloud, Rgba};

pub const WHITE: Rgba = Rgba::new(255, 255, 255, 255);

/// Add an `nx` by `ny` patch of vertical rays ending on the plane
/// `z = height`, observed from `z = sensor_z`, with timestamps starting
/// at `t0` and stepping by `dt` per ray. Returns the timestamps added.
pub fn add_patch(
    cloud: &mut RayCloud,
    nx: usize,
    ny: usize,
    spacing: f64,
    height: f64,
    sensor_z: f64,
    t0: f64,
    dt: f64,
) -> Vec<f64> {
    let mut times = Vec::with_capacity(nx * ny);
    let mut time = t0;
    for iy in 0..ny {
        for ix in 0..nx {
            let x = ix as f64 * spacing;
            let y = iy as f64 * spacing;
            cloud.push_ray(
                DVec3::new(x, y, sensor_z),
                DVec3::new(x, y, height),
                time,
                WHITE,
            );
            times.push(time);
            time += dt;
        }
    }
    times
}

/// Like [`add_patch`] but with seeded vertical noise on the end points,
/// approximating real sensor returns.
pub fn add_noisy_patch(
    cloud: &mut RayCloud,
    nx: usize,
    ny: usize,
    spacing: f64,
    height: f64,
    sensor_z: f64,
    t0: f64,
    dt: f64,
    noise: f64,
    seed: u64,
) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut times = Vec::with_capacity(nx * ny);
    let mut time = t0;
    for iy in 0..ny {
        for ix in 0..nx {
            let x = ix as f64 * spacing;
            let y = iy as f64 * spacing;
            let z = height + rng.gen_range(-noise..noise);
            cloud.push_ray(DVec3::new(x, y, sensor_z), DVec3::new(x, y, z), time, WHITE);
            times.push(time);
            time += dt;
        }
    }
    times
}

/// Sorted timestamps of a cloud, for set comparisons against the
/// builders' return values.
pub fn sorted_times(cloud: &RayCloud) -> Vec<f64> {
    let mut times = cloud.times.clone();
    times.sort_by(f64::total_cmp);
    times
}

/// Sort a list of expected timestamps.
pub fn sorted(mut times: Vec<f64>) -> Vec<f64> {
    times.sort_by(f64::total_cmp);
    times
}
