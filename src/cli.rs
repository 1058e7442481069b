use std::{io, num::NonZeroUsize, path::PathBuf, time::Instant};

use anyhow::Context as _;
use clap::Parser;
use indicatif::ProgressBar;
use log::info;
use rayquery::{
    Device, DeviceConfig, IntersectContext, Ray, RayHit, RayHit1M, WorkerCount, obj::ObjMesh,
};

/// Casts a ray from the centre of a mesh through every triangle and reports how many hit
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Wavefront OBJ file to load
    mesh: PathBuf,

    /// Number of worker threads, all CPUs by default
    #[arg(long)]
    threads: Option<NonZeroUsize>,

    /// Rays processed by a worker at once
    #[arg(long, default_value_t = DeviceConfig::DEFAULT_CHUNK_SIZE)]
    chunk_size: NonZeroUsize,

    /// Rays submitted in one intersect call
    #[arg(long, default_value_t = 65536)]
    batch_size: usize,

    /// Dump the acceleration structure to stdout
    #[arg(long)]
    print_tree: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = DeviceConfig::builder()
        .worker_count(args.threads.map_or(WorkerCount::Auto, WorkerCount::Manual))
        .chunk_size(args.chunk_size)
        .build();
    let device = Device::with_config(config)?;

    let mesh = ObjMesh::open(&args.mesh)
        .with_context(|| format!("Loading {}", args.mesh.display()))?;
    let geometry = mesh.to_geometry(&device)?;

    let mut scene = device.make_scene()?;
    scene.attach_geometry(&geometry)?;
    geometry.release();

    let start = Instant::now();
    scene.commit()?;
    info!("Scene committed in {:?}", start.elapsed());
    println!("{}", scene.statistics()?);

    if args.print_tree {
        scene.write_tree(&mut io::stdout().lock())?;
    }

    let Some(bounds) = scene.bounds()? else {
        println!("Mesh has no triangles");
        return Ok(());
    };
    let centre = nalgebra::center(&bounds.min, &bounds.max);

    let rays: Vec<_> = mesh
        .indices
        .iter()
        .map(|triangle| {
            let centroid = triangle
                .iter()
                .map(|i| nalgebra::Point3::from(mesh.vertices[*i as usize]).coords)
                .sum::<nalgebra::Vector3<f32>>()
                / 3.0;
            RayHit::from(Ray::new(centre.into(), (centroid - centre.coords).into()))
        })
        .collect();

    let bar = ProgressBar::new(rays.len() as u64);
    let context = IntersectContext::incoherent();
    let mut hit_count = 0usize;
    let mut own_triangle_count = 0usize;

    let start = Instant::now();
    for (batch_start, batch) in (0..)
        .step_by(args.batch_size.max(1))
        .zip(rays.chunks(args.batch_size.max(1)))
    {
        let mut batch: RayHit1M = batch.iter().copied().collect();
        scene.intersect_1m(&context, &mut batch)?;

        hit_count += batch
            .hit
            .geom_id
            .iter()
            .filter(|id| **id != rayquery::INVALID_GEOMETRY_ID)
            .count();
        own_triangle_count += batch
            .hit
            .prim_id
            .iter()
            .zip(&batch.hit.geom_id)
            .enumerate()
            .filter(|(i, (prim_id, geom_id))| {
                **geom_id != rayquery::INVALID_GEOMETRY_ID && **prim_id as usize == batch_start + i
            })
            .count();

        bar.inc(batch.len() as u64);
    }
    bar.finish_and_clear();
    let elapsed = start.elapsed();

    println!(
        "{} rays, {} hits, {} hit their own triangle, {:.2} Mrays/s",
        rays.len(),
        hit_count,
        own_triangle_count,
        rays.len() as f64 / elapsed.as_secs_f64() / 1e6
    );

    device.release();
    Ok(())
}
