use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{error, info, warn};

use occmesh_core::Point3f;
use occmesh_reconstruction::{
    parallel, ConstantField, FieldEvaluator, GenerationConfig, MeshGenerator, PositionColors,
    QualityMetrics, Reconstruction, RefinementPolicy, SphereOccupancy, TorusOccupancy,
};

mod preprocess;

use preprocess::{BackgroundFilter, ColorKeyFilter, KeepAlpha};

/// Mesh generation from occupancy fields
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    cmd: Command,

    /// Number of threads to use
    #[clap(short, long, global = true)]
    threads: Option<NonZeroUsize>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate meshes of built-in shapes
    Generate {
        #[clap(flatten)]
        settings: GenerateSettings,
    },

    /// Prepare input images: remove the background, crop and center on white
    Preprocess {
        /// Images to prepare
        #[clap(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for the prepared `.png` files
        #[clap(short, long, default_value = "preprocessed")]
        out_dir: PathBuf,

        /// Treat pixels close to the corner color as background
        #[clap(long)]
        color_key: bool,

        /// Per-channel tolerance of the color key
        #[clap(long, default_value_t = 16)]
        tolerance: u8,
    },

    /// Print quality metrics of mesh files
    Inspect {
        /// Meshes to inspect (`.ply`, `.obj` or `.glb`)
        #[clap(required = true)]
        inputs: Vec<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Shape {
    Sphere,
    Torus,
    /// Nothing at all; generation fails with a degenerate grid
    Empty,
}

impl Shape {
    fn name(self) -> &'static str {
        match self {
            Shape::Sphere => "sphere",
            Shape::Torus => "torus",
            Shape::Empty => "empty",
        }
    }

    fn field(self) -> Box<dyn FieldEvaluator> {
        match self {
            Shape::Sphere => Box::new(PositionColors::new(
                SphereOccupancy::new(Point3f::origin(), 0.35),
                0.5,
            )),
            Shape::Torus => Box::new(PositionColors::new(
                TorusOccupancy::new(Point3f::origin(), 0.3, 0.12),
                0.5,
            )),
            Shape::Empty => Box::new(ConstantField(0.0)),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Refinement {
    Uniform,
    Adaptive,
}

impl From<Refinement> for RefinementPolicy {
    fn from(r: Refinement) -> Self {
        match r {
            Refinement::Uniform => RefinementPolicy::Uniform,
            Refinement::Adaptive => RefinementPolicy::Adaptive,
        }
    }
}

#[derive(Parser)]
struct GenerateSettings {
    /// Shapes to generate
    #[clap(required = true, value_enum)]
    shapes: Vec<Shape>,

    /// YAML file with a `generation` section
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Directory for generated meshes
    #[clap(short, long, default_value = "meshes")]
    out_dir: PathBuf,

    /// Points per axis of the coarse grid
    #[clap(short, long)]
    resolution: Option<usize>,

    /// Number of refinement rounds
    #[clap(short, long)]
    upsample_steps: Option<usize>,

    /// Occupancy threshold of the surface
    #[clap(long)]
    threshold: Option<f32>,

    /// Refinement policy
    #[clap(long, value_enum)]
    refinement: Option<Refinement>,

    /// Mesh format to write (`glb`, `ply` or `obj`)
    #[clap(short = 'f', long)]
    format: Option<String>,

    /// Laplacian smoothing iterations
    #[clap(long)]
    smoothing: Option<usize>,

    /// Skip vertex colors
    #[clap(long)]
    no_colors: bool,
}

impl GenerateSettings {
    fn generation_config(&self) -> Result<GenerationConfig> {
        let mut config = match &self.config {
            Some(path) => GenerationConfig::from_yaml_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => GenerationConfig::default(),
        };

        if let Some(resolution) = self.resolution {
            config = config.with_resolution(resolution);
        }
        if let Some(steps) = self.upsample_steps {
            config = config.with_upsample_steps(steps);
        }
        if let Some(threshold) = self.threshold {
            config = config.with_threshold(threshold);
        }
        if let Some(refinement) = self.refinement {
            config = config.with_refinement(refinement.into());
        }
        if let Some(format) = &self.format {
            config.mesh_extension = format.to_ascii_lowercase();
        }
        if let Some(iterations) = self.smoothing {
            config = config.with_smoothing_iterations(iterations);
        }
        if self.no_colors {
            config = config.with_colors(false);
        }

        config.validate()?;
        Ok(config)
    }
}

/// Per-input timing row
struct Timing {
    name: &'static str,
    refinement: Duration,
    extraction: Duration,
    coloring: Duration,
    export: Duration,
    evaluations: usize,
}

fn run_generate(settings: &GenerateSettings) -> Result<()> {
    let config = settings.generation_config()?;
    let extension = config.mesh_extension.clone();
    let generator = MeshGenerator::new(config)?;

    std::fs::create_dir_all(&settings.out_dir)
        .with_context(|| format!("failed to create {}", settings.out_dir.display()))?;

    let mut timings = Vec::new();
    let mut failures = 0;
    for &shape in &settings.shapes {
        let name = shape.name();
        let mut field = shape.field();
        let mut reconstruction = Reconstruction::new();

        let start = Instant::now();
        if let Err(e) = generator.run(&mut reconstruction, field.as_mut()) {
            if e.is_reconstruction_failure() {
                warn!("reconstruction failed for {}: {}", name, e);
            } else {
                error!("generation of {} failed: {}", name, e);
            }
            failures += 1;
            continue;
        }
        info!("generated {} in {:?}", name, start.elapsed());

        let path = settings.out_dir.join(format!("{}.{}", name, extension));
        let start = Instant::now();
        if let Err(e) = reconstruction.export(&path) {
            error!("failed to write {}: {}", path.display(), e);
            failures += 1;
            continue;
        }
        let export = start.elapsed();
        info!("wrote {}", path.display());

        let stats = reconstruction.stats();
        timings.push(Timing {
            name,
            refinement: stats.refinement_time,
            extraction: stats.extraction_time,
            coloring: stats.coloring_time,
            export,
            evaluations: stats.total_evaluations(),
        });
    }

    print_timings(&timings);

    if failures == settings.shapes.len() {
        bail!("no mesh was generated");
    }
    Ok(())
}

fn print_timings(timings: &[Timing]) {
    if timings.is_empty() {
        return;
    }
    println!(
        "{:<10} {:>12} {:>12} {:>12} {:>12} {:>12}",
        "shape", "evaluations", "refine", "extract", "color", "export"
    );
    for t in timings {
        println!(
            "{:<10} {:>12} {:>12.3?} {:>12.3?} {:>12.3?} {:>12.3?}",
            t.name, t.evaluations, t.refinement, t.extraction, t.coloring, t.export
        );
    }
}

fn run_preprocess(
    inputs: &[PathBuf],
    out_dir: &Path,
    color_key: bool,
    tolerance: u8,
) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let mut failures = 0;
    for input in inputs {
        if let Err(e) = preprocess_one(input, out_dir, color_key, tolerance) {
            error!("failed to preprocess {}: {:#}", input.display(), e);
            failures += 1;
        }
    }
    if failures == inputs.len() {
        bail!("no image was preprocessed");
    }
    Ok(())
}

fn preprocess_one(input: &Path, out_dir: &Path, color_key: bool, tolerance: u8) -> Result<()> {
    let image = image::open(input).with_context(|| format!("failed to open {}", input.display()))?;

    let key_filter = if color_key {
        ColorKeyFilter::from_corner(&image.to_rgba8(), tolerance)
    } else {
        None
    };
    let filter: &dyn BackgroundFilter = match &key_filter {
        Some(f) => f,
        None => &KeepAlpha,
    };

    let prepared = preprocess::preprocess(&image, filter)?;
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let path = out_dir.join(format!("{}.png", stem));
    prepared.save(&path)?;
    info!("wrote {}", path.display());
    Ok(())
}

fn run_inspect(inputs: &[PathBuf]) -> Result<()> {
    let mut failures = 0;
    for input in inputs {
        let mesh = match occmesh_io::read_mesh(input) {
            Ok(mesh) => mesh,
            Err(e) => {
                error!("failed to read {}: {}", input.display(), e);
                failures += 1;
                continue;
            }
        };
        let q = QualityMetrics::from_mesh(&mesh);
        println!("{}", input.display());
        println!("  vertices:           {}", q.vertex_count);
        println!("  triangles:          {}", q.triangle_count);
        println!("  boundary edges:     {}", q.boundary_edges);
        println!("  non-manifold edges: {}", q.non_manifold_edges);
        println!("  surface area:       {:.6}", q.surface_area);
        println!("  signed volume:      {:.6}", q.signed_volume);
        println!("  watertight:         {}", q.watertight);
        println!("  normals:            {}", mesh.normals.is_some());
        println!("  colors:             {}", mesh.colors.is_some());
    }
    if failures == inputs.len() {
        bail!("no mesh could be read");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Some(n) = args.threads {
        parallel::init_thread_pool(parallel::ThreadPoolConfig::default().with_threads(n.get()))?;
    }

    let start = Instant::now();
    match args.cmd {
        Command::Generate { settings } => run_generate(&settings)?,
        Command::Preprocess {
            inputs,
            out_dir,
            color_key,
            tolerance,
        } => run_preprocess(&inputs, &out_dir, color_key, tolerance)?,
        Command::Inspect { inputs } => run_inspect(&inputs)?,
    }
    info!("done in {:?}", start.elapsed());

    Ok(())
}
