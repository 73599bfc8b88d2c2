//! Split a ray cloud into its transient rays and its fixed part.
//!
//! Usage:
//!   raytransients min  cloud.ply 20 rays   Remove positive transients
//!                                          (objects that have since
//!                                          moved); 20 is the number of
//!                                          pass-through rays required.
//!   raytransients max  cloud.ply 20 rays   Find negative transients,
//!                                          such as a hallway exposed
//!                                          when a door opens.
//!   raytransients oldest ...               Keep the oldest geometry when
//!                                          observations differ over time.
//!   raytransients newest ...               Keep the newest geometry.
//!
//! `--colour` additionally colours the outputs to help tune the ray
//! count: red = 1 - planarity, green = pass-through saturation, blue =
//! opacity.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use raycloud_transients::{
    io, FilterStrategy, MergeType, Progress, TransientFilter, TransientFilterConfig,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Remove contradicted surfaces (positive transients).
    Min,
    /// Remove the rays exposing contradicted surfaces (negative transients).
    Max,
    /// Keep the oldest geometry when there is a difference over time.
    Oldest,
    /// Keep the newest geometry when there is a difference over time.
    Newest,
}

impl From<Mode> for MergeType {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Min => MergeType::Minimum,
            Mode::Max => MergeType::Maximum,
            Mode::Oldest => MergeType::Oldest,
            Mode::Newest => MergeType::Newest,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    EllipseGrid,
    RayGrid,
}

impl From<Strategy> for FilterStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::EllipseGrid => FilterStrategy::EllipseGrid,
            Strategy::RayGrid => FilterStrategy::RayGrid,
        }
    }
}

#[derive(Parser)]
#[command(name = "raytransients")]
#[command(about = "Splits a ray cloud into the transient rays and the fixed part")]
struct Args {
    /// How to merge differing observations of the same space.
    #[arg(value_enum)]
    mode: Mode,

    /// Input ray cloud (.ply).
    cloud: PathBuf,

    /// Number of pass-through rays to classify a surface as transient.
    num_rays: f64,

    /// Units of the threshold, for command-line readability.
    #[arg(value_parser = ["rays"])]
    units: String,

    /// Also colour the clouds with filter diagnostics.
    #[arg(short, long)]
    colour: bool,

    /// Grid cell edge length in metres. Smaller voxels give better
    /// multi-threaded performance.
    #[arg(long, default_value_t = 0.1)]
    voxel_size: f64,

    /// Marking strategy.
    #[arg(long, value_enum, default_value = "ray-grid")]
    strategy: Strategy,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    log::debug!("threshold: {} {}", args.num_rays, args.units);

    let cloud = io::read_ply(&args.cloud)?;

    let config = TransientFilterConfig {
        voxel_size: args.voxel_size,
        num_rays_filter_threshold: args.num_rays,
        strategy: args.strategy.into(),
        merge_type: args.mode.into(),
        colour_cloud: args.colour,
    };
    let mut filter = TransientFilter::new(config)?;

    let progress = Arc::new(Progress::new());
    let quit = Arc::new(AtomicBool::new(false));
    let display = {
        let progress = Arc::clone(&progress);
        let quit = Arc::clone(&quit);
        thread::spawn(move || run_progress_display(&progress, &quit))
    };

    let outcome = filter.filter(&cloud, Some(progress.as_ref()));
    quit.store(true, Ordering::Relaxed);
    let _ = display.join();
    outcome?;

    let file = args.cloud.to_string_lossy();
    let stub = file.strip_suffix(".ply").unwrap_or(&file);
    let transient_path = PathBuf::from(format!("{}_transient.ply", stub));
    let fixed_path = PathBuf::from(format!("{}_fixed.ply", stub));
    io::write_ply(&transient_path, filter.transient_cloud())
        .with_context(|| "write transient cloud")?;
    io::write_ply(&fixed_path, filter.fixed_cloud()).with_context(|| "write fixed cloud")?;

    println!(
        "{} rays: {} transient -> {}, {} fixed -> {}",
        cloud.ray_count(),
        filter.transient_cloud().ray_count(),
        transient_path.display(),
        filter.fixed_cloud().ray_count(),
        fixed_path.display(),
    );
    Ok(())
}

/// Poll the filter's progress channel and render one bar per phase.
fn run_progress_display(progress: &Progress, quit: &AtomicBool) {
    let style = ProgressStyle::with_template("{msg:28} {bar:40} {pos}/{len}")
        .expect("valid progress template");

    let mut bar: Option<ProgressBar> = None;
    let mut phase = String::new();
    while !quit.load(Ordering::Relaxed) {
        let snapshot = progress.read();
        if snapshot.phase != phase {
            if let Some(done) = bar.take() {
                done.finish();
            }
            phase.clone_from(&snapshot.phase);
            if !phase.is_empty() {
                bar = Some(
                    ProgressBar::new(snapshot.target as u64)
                        .with_style(style.clone())
                        .with_message(phase.clone()),
                );
            }
        }
        if let Some(current) = &bar {
            if current.length() != Some(snapshot.target as u64) {
                current.set_length(snapshot.target as u64);
            }
            current.set_position(snapshot.progress as u64);
        }
        thread::sleep(Duration::from_millis(100));
    }
    if let Some(done) = bar.take() {
        done.finish();
    }
}
