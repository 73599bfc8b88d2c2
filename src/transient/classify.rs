//! Ellipsoid classification: the merge policy over intersection stats.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::ellipsoid::Ellipsoid;

use super::MergeType;

/// Intersection statistics accumulated for one ellipsoid by a marking
/// pass.
pub(super) struct IntersectionStats<'a> {
    pub hits: u32,
    /// Pass-through ray ids, sorted ascending so the fractional marking
    /// below is deterministic regardless of accumulation order.
    pub pass_through_ids: &'a [u32],
    pub first_intersection_time: f64,
    pub last_intersection_time: f64,
}

/// Decide whether `ellipsoid` (or some of the rays crossing it) is
/// transient, applying the configured merge policy.
///
/// `self_transient` selects the single-cloud flow where the pass-through
/// timestamps are stratified against the ellipsoid's own hit window; the
/// other branch compares against another cloud's acquisition time and is
/// reached only through the cross-cloud hook.
pub(super) fn classify_ellipsoid(
    ellipsoid: &mut Ellipsoid,
    stats: &IntersectionStats,
    times: &[f64],
    num_rays_threshold: f64,
    merge_type: MergeType,
    self_transient: bool,
    transient_marks: &[AtomicBool],
) {
    let pass_throughs = stats.pass_through_ids.len();
    ellipsoid.num_rays = stats.hits as usize + pass_throughs;

    if num_rays_threshold == 0.0 || self_transient {
        ellipsoid.opacity = if ellipsoid.num_rays > 0 {
            f64::from(stats.hits) / ellipsoid.num_rays as f64
        } else {
            0.0
        };
    }
    if ellipsoid.num_rays == 0 || ellipsoid.opacity == 0.0 || num_rays_threshold == 0.0 {
        return;
    }

    let mut num_before = 0usize;
    let mut num_after = 0usize;
    if self_transient {
        let mut misses = 0.0f64;
        for &ray_id in stats.pass_through_ids {
            let time = times[ray_id as usize];
            if time > stats.last_intersection_time {
                num_after += 1;
            } else if time < stats.first_intersection_time {
                num_before += 1;
            } else {
                misses += 1.0;
            }
        }
        // Subtracting one hit gives an unbiased opacity estimate.
        let hits = f64::from(stats.hits) + 1e-8 - 1.0;
        ellipsoid.opacity = hits / (hits + misses);
        ellipsoid.num_gone = num_before + num_after;
    } else if let Some(&first) = stats.pass_through_ids.first() {
        if times[first as usize] > ellipsoid.time {
            num_after = pass_throughs;
        } else {
            num_before = pass_throughs;
        }
    }

    let sequence_length = num_rays_threshold / ellipsoid.opacity;
    let remove_ellipsoid = match merge_type {
        MergeType::Oldest | MergeType::Newest => {
            if (num_before.max(num_after) as f64) < sequence_length {
                return;
            }
            if merge_type == MergeType::Oldest {
                // Otherwise the "after" rays are marked below.
                num_before as f64 >= sequence_length
            } else {
                // Otherwise the "before" rays are marked below.
                num_after as f64 >= sequence_length
            }
        }
        MergeType::Minimum | MergeType::Maximum => {
            // The sum picks out moving objects that leak pass-through rays
            // on both sides of the hit window.
            if ((num_before + num_after) as f64) < sequence_length {
                return;
            }
            merge_type == MergeType::Minimum
        }
    };

    if remove_ellipsoid {
        ellipsoid.transient = true;
        return;
    }

    // The surface stays; remove a fraction `opacity` of the pass-through
    // rays, evenly spread by a running accumulator.
    let mut accumulator = 0.0;
    for &ray_id in stats.pass_through_ids {
        accumulator += ellipsoid.opacity;
        if accumulator < 1.0 {
            continue;
        }
        accumulator -= 1.0;

        let time = times[ray_id as usize];
        if !self_transient
            || time < stats.first_intersection_time
            || time > stats.last_intersection_time
        {
            transient_marks[ray_id as usize].store(true, Ordering::Relaxed);
        }
    }
}
