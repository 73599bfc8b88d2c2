//! ASCII PLY ingest and egress for ray clouds.
//!
//! Each vertex stores the ray end point (`x y z`), the timestamp
//! (`time`), the vector back to the sensor (`nx ny nz`, so
//! `start = end + n`) and an RGBA colour. An alpha of zero marks an
//! unbounded ray.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use glam::DVec3;
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Ply, Property};

use crate::cloud::{RayCloud, Rgba};

/// Read a ray cloud from an ASCII or binary PLY file.
pub fn read_ply(path: &Path) -> Result<RayCloud> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let parser = Parser::<DefaultElement>::new();
    let ply: Ply<DefaultElement> = parser
        .read_ply(&mut reader)
        .with_context(|| format!("parse {}", path.display()))?;

    let vertices = ply
        .payload
        .get("vertex")
        .ok_or_else(|| anyhow::anyhow!("{}: PLY missing 'vertex' element", path.display()))?;

    let mut cloud = RayCloud::default();
    cloud.reserve(vertices.len());
    for vertex in vertices {
        let end = DVec3::new(
            get_f64(vertex, "x")?,
            get_f64(vertex, "y")?,
            get_f64(vertex, "z")?,
        );
        let time = get_f64(vertex, "time").unwrap_or(0.0);
        let normal = DVec3::new(
            get_f64(vertex, "nx").unwrap_or(0.0),
            get_f64(vertex, "ny").unwrap_or(0.0),
            get_f64(vertex, "nz").unwrap_or(0.0),
        );
        let colour = Rgba::new(
            get_u8(vertex, "red").unwrap_or(255),
            get_u8(vertex, "green").unwrap_or(255),
            get_u8(vertex, "blue").unwrap_or(255),
            get_u8(vertex, "alpha").unwrap_or(255),
        );
        cloud.push_ray(end + normal, end, time, colour);
    }
    Ok(cloud)
}

/// Write a ray cloud as ASCII PLY.
pub fn write_ply(path: &Path, cloud: &RayCloud) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", cloud.ray_count())?;
    for field in ["x", "y", "z", "time", "nx", "ny", "nz"] {
        writeln!(writer, "property double {}", field)?;
    }
    for field in ["red", "green", "blue", "alpha"] {
        writeln!(writer, "property uchar {}", field)?;
    }
    writeln!(writer, "end_header")?;

    for ray_id in 0..cloud.ray_count() {
        let end = cloud.ends[ray_id];
        let normal = cloud.starts[ray_id] - end;
        let colour = cloud.colours[ray_id];
        writeln!(
            writer,
            "{} {} {} {} {} {} {} {} {} {} {}",
            end.x,
            end.y,
            end.z,
            cloud.times[ray_id],
            normal.x,
            normal.y,
            normal.z,
            colour.red,
            colour.green,
            colour.blue,
            colour.alpha,
        )?;
    }
    writer
        .flush()
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn get_f64(vertex: &DefaultElement, key: &str) -> Result<f64> {
    match vertex.get(key) {
        Some(Property::Double(value)) => Ok(*value),
        Some(Property::Float(value)) => Ok(f64::from(*value)),
        Some(Property::Int(value)) => Ok(f64::from(*value)),
        Some(Property::UInt(value)) => Ok(f64::from(*value)),
        Some(Property::Short(value)) => Ok(f64::from(*value)),
        Some(Property::UShort(value)) => Ok(f64::from(*value)),
        Some(Property::Char(value)) => Ok(f64::from(*value)),
        Some(Property::UChar(value)) => Ok(f64::from(*value)),
        Some(_) => bail!("property '{}' is not scalar", key),
        None => bail!("missing property '{}'", key),
    }
}

fn get_u8(vertex: &DefaultElement, key: &str) -> Result<u8> {
    match vertex.get(key) {
        Some(Property::UChar(value)) => Ok(*value),
        Some(Property::Char(value)) => Ok(*value as u8),
        Some(Property::Int(value)) => Ok(*value as u8),
        Some(Property::UInt(value)) => Ok(*value as u8),
        Some(_) => bail!("property '{}' is not byte-like", key),
        None => bail!("missing property '{}'", key),
    }
}
