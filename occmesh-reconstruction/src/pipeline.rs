//! Mesh generation pipeline
//!
//! [`MeshGenerator`] drives one reconstruction from an implicit field to a
//! colored mesh:
//!
//! 1. coarse sampling of every level-0 grid point,
//! 2. `upsample_steps` refinement rounds, each evaluating only the points the
//!    MISE engine asks for,
//! 3. marching cubes on the final grid, mapped to world space,
//! 4. optional per-vertex color estimation.
//!
//! Progress is tracked by a [`Reconstruction`], whose [`PipelineState`] only
//! moves along legal transitions.

use crate::config::GenerationConfig;
use crate::field::FieldEvaluator;
use crate::marching_cubes::MarchingCubes;
use crate::mise::Mise;
use log::{debug, info, warn};
use occmesh_core::{
    Error, GridCoord, Point3f, Result, Transform3D, Transformable, TriangleMesh, Vector3f,
};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

/// Where a reconstruction is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Empty,
    CoarseSampled,
    /// Number of completed refinement rounds
    Upsampled(usize),
    Extracted,
    Exported,
    Failed,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Empty, CoarseSampled) => true,
            (CoarseSampled, Upsampled(1)) => true,
            (Upsampled(n), Upsampled(m)) => m == n + 1,
            (CoarseSampled | Upsampled(_), Extracted) => true,
            (Extracted | Exported, Exported) => true,
            (Empty | CoarseSampled | Upsampled(_), Failed) => true,
            _ => false,
        }
    }

    /// No further generation step can follow
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::Extracted | PipelineState::Exported | PipelineState::Failed
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Empty => write!(f, "empty"),
            PipelineState::CoarseSampled => write!(f, "coarse-sampled"),
            PipelineState::Upsampled(n) => write!(f, "upsampled({})", n),
            PipelineState::Extracted => write!(f, "extracted"),
            PipelineState::Exported => write!(f, "exported"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

/// Quality metrics of an extracted mesh
#[derive(Debug, Clone, PartialEq)]
pub struct QualityMetrics {
    pub vertex_count: usize,
    pub triangle_count: usize,
    /// Edges used by a single face
    pub boundary_edges: usize,
    /// Edges used by more than two faces
    pub non_manifold_edges: usize,
    pub surface_area: f32,
    /// Only meaningful for watertight meshes
    pub signed_volume: f32,
    pub watertight: bool,
}

impl QualityMetrics {
    pub fn from_mesh(mesh: &TriangleMesh) -> Self {
        let usage = mesh.edge_usage();
        let boundary_edges = usage.values().filter(|&&n| n == 1).count();
        let non_manifold_edges = usage.values().filter(|&&n| n > 2).count();

        Self {
            vertex_count: mesh.vertex_count(),
            triangle_count: mesh.face_count(),
            boundary_edges,
            non_manifold_edges,
            surface_area: mesh.surface_area(),
            signed_volume: mesh.signed_volume(),
            watertight: !mesh.is_empty() && boundary_edges == 0 && non_manifold_edges == 0,
        }
    }
}

/// Counters and timings of one generation
#[derive(Debug, Clone, Default)]
pub struct GenerationStats {
    /// Field evaluations at each level, coarse level first
    pub evaluations_per_level: Vec<usize>,
    /// Points per axis of the extracted grid
    pub final_points_per_axis: usize,
    pub refinement_time: Duration,
    pub extraction_time: Duration,
    pub coloring_time: Duration,
    pub quality: Option<QualityMetrics>,
}

impl GenerationStats {
    pub fn total_evaluations(&self) -> usize {
        self.evaluations_per_level.iter().sum()
    }

    pub fn total_time(&self) -> Duration {
        self.refinement_time + self.extraction_time + self.coloring_time
    }

    /// Evaluations a dense grid of the same final resolution would need
    pub fn dense_evaluations(&self) -> usize {
        self.final_points_per_axis.pow(3)
    }
}

/// One reconstruction: pipeline state, result mesh and statistics
#[derive(Debug)]
pub struct Reconstruction {
    state: PipelineState,
    mesh: Option<TriangleMesh>,
    stats: GenerationStats,
}

impl Reconstruction {
    pub fn new() -> Self {
        Self {
            state: PipelineState::Empty,
            mesh: None,
            stats: GenerationStats::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn mesh(&self) -> Option<&TriangleMesh> {
        self.mesh.as_ref()
    }

    pub fn stats(&self) -> &GenerationStats {
        &self.stats
    }

    /// Take the mesh and statistics out of a finished reconstruction
    pub fn into_parts(self) -> (Option<TriangleMesh>, GenerationStats) {
        (self.mesh, self.stats)
    }

    fn transition(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Algorithm(format!(
                "illegal pipeline transition {} -> {}",
                self.state, next
            )));
        }
        debug!("pipeline state {} -> {}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Write the extracted mesh; the format follows the file extension
    pub fn export<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        if !self.state.can_transition_to(PipelineState::Exported) {
            return Err(Error::Algorithm(format!(
                "cannot export a reconstruction in state {}",
                self.state
            )));
        }
        let mesh = self
            .mesh
            .as_ref()
            .ok_or_else(|| Error::Algorithm("reconstruction has no mesh".to_string()))?;

        occmesh_io::write_mesh(mesh, path.as_ref())?;
        info!("mesh written to {}", path.as_ref().display());
        self.transition(PipelineState::Exported)
    }
}

impl Default for Reconstruction {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the MISE loop, extraction and coloring against a field
#[derive(Debug, Clone)]
pub struct MeshGenerator {
    config: GenerationConfig,
}

impl MeshGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Map from grid coordinates at `level` to world space.
    ///
    /// The final grid spans `[-box_size / 2, box_size / 2]^3` with its first
    /// and last points on the faces. A coarse point `c` lands where its
    /// finer copy `2c` does.
    pub fn grid_transform(&self, level: usize) -> Transform3D {
        let box_size = self.config.box_size();
        let steps = self.config.upsample_steps;
        let final_intervals = (self.config.resolution << steps).saturating_sub(1).max(1) as f32;
        let spacing = box_size / final_intervals * 2f32.powi(steps as i32 - level as i32);
        Transform3D::scale_then_translate(spacing, Vector3f::repeat(-box_size / 2.0))
    }

    /// World position of a grid coordinate at `level`
    pub fn grid_to_world(&self, coord: GridCoord, level: usize) -> Point3f {
        let p = Point3f::new(coord[0] as f32, coord[1] as f32, coord[2] as f32);
        self.grid_transform(level).transform_point(&p)
    }

    /// Generate a mesh and its statistics in one call
    pub fn generate_mesh<F>(&self, field: &mut F) -> Result<(TriangleMesh, GenerationStats)>
    where
        F: FieldEvaluator + ?Sized,
    {
        let mut reconstruction = Reconstruction::new();
        self.run(&mut reconstruction, field)?;
        let (mesh, stats) = reconstruction.into_parts();
        let mesh = mesh.ok_or_else(|| Error::Algorithm("extraction produced no mesh".to_string()))?;
        Ok((mesh, stats))
    }

    /// Run every generation step on an empty reconstruction.
    ///
    /// On error the reconstruction ends up [`PipelineState::Failed`] and the
    /// error is returned unchanged.
    pub fn run<F>(&self, reconstruction: &mut Reconstruction, field: &mut F) -> Result<()>
    where
        F: FieldEvaluator + ?Sized,
    {
        if reconstruction.state != PipelineState::Empty {
            return Err(Error::Algorithm(format!(
                "generation needs an empty reconstruction, found state {}",
                reconstruction.state
            )));
        }

        let result = self.run_stages(reconstruction, field);
        if let Err(e) = &result {
            warn!("generation failed in state {}: {}", reconstruction.state, e);
            reconstruction.state = PipelineState::Failed;
        }
        result
    }

    fn run_stages<F>(&self, reconstruction: &mut Reconstruction, field: &mut F) -> Result<()>
    where
        F: FieldEvaluator + ?Sized,
    {
        let started = Instant::now();
        let mut mise = Mise::with_config(self.config.mise_config())?;

        loop {
            let evaluated = self.evaluate_pending(&mut mise, field)?;
            reconstruction.stats.evaluations_per_level.push(evaluated);

            let next = match mise.level() {
                0 => PipelineState::CoarseSampled,
                level => PipelineState::Upsampled(level),
            };
            reconstruction.transition(next)?;

            if mise.remaining_upsamples() == 0 {
                break;
            }
            mise.upsample()?;
        }

        reconstruction.stats.final_points_per_axis = mise.points_per_axis();
        reconstruction.stats.refinement_time = started.elapsed();
        info!(
            "refinement finished: {} evaluations for a {}^3 grid ({:.1}% of dense)",
            reconstruction.stats.total_evaluations(),
            mise.points_per_axis(),
            100.0 * reconstruction.stats.total_evaluations() as f64
                / reconstruction.stats.dense_evaluations() as f64
        );

        let started = Instant::now();
        let extractor = MarchingCubes::new(self.config.marching_cubes_config());
        let mut mesh = extractor.extract_dense(&mise.to_dense())?;
        mesh.transform(&self.grid_transform(mise.level()));
        reconstruction.stats.extraction_time = started.elapsed();
        info!(
            "extracted {} vertices, {} faces",
            mesh.vertex_count(),
            mesh.face_count()
        );

        if self.config.estimate_colors {
            let started = Instant::now();
            self.estimate_colors(&mut mesh, field)?;
            reconstruction.stats.coloring_time = started.elapsed();
        }

        reconstruction.stats.quality = Some(QualityMetrics::from_mesh(&mesh));
        reconstruction.mesh = Some(mesh);
        reconstruction.transition(PipelineState::Extracted)
    }

    /// Evaluate every pending point in batches of `batch_size`
    fn evaluate_pending<F>(&self, mise: &mut Mise, field: &mut F) -> Result<usize>
    where
        F: FieldEvaluator + ?Sized,
    {
        let pending = mise.pending_points();
        let transform = self.grid_transform(mise.level());

        for batch in pending.chunks(self.config.batch_size) {
            let points: Vec<Point3f> = batch
                .iter()
                .map(|c| {
                    let p = Point3f::new(c[0] as f32, c[1] as f32, c[2] as f32);
                    transform.transform_point(&p)
                })
                .collect();

            let values = field.evaluate(&points)?;
            if values.len() != points.len() {
                return Err(Error::FieldEvaluation(format!(
                    "field returned {} values for {} points",
                    values.len(),
                    points.len()
                )));
            }

            mise.commit_values(batch.iter().copied().zip(values))?;
            debug!("level {}: evaluated batch of {} points", mise.level(), batch.len());
        }

        Ok(pending.len())
    }

    /// Query the field for vertex colors; leaves the mesh uncolored when the
    /// field has no texture
    fn estimate_colors<F>(&self, mesh: &mut TriangleMesh, field: &mut F) -> Result<()>
    where
        F: FieldEvaluator + ?Sized,
    {
        let mut colors = Vec::with_capacity(mesh.vertex_count());
        for batch in mesh.vertices.chunks(self.config.batch_size) {
            let Some(batch_colors) = field.evaluate_colors(batch)? else {
                debug!("field provides no colors");
                return Ok(());
            };
            if batch_colors.len() != batch.len() {
                return Err(Error::FieldEvaluation(format!(
                    "field returned {} colors for {} points",
                    batch_colors.len(),
                    batch.len()
                )));
            }
            colors.extend(batch_colors);
        }
        mesh.set_colors(colors);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{ConstantField, PositionColors, SphereOccupancy};
    use crate::mise::RefinementPolicy;
    use approx::assert_relative_eq;

    fn small_config() -> GenerationConfig {
        GenerationConfig::default()
            .with_resolution(8)
            .with_upsample_steps(1)
            .with_colors(false)
    }

    #[test]
    fn test_state_transitions() {
        use PipelineState::*;
        assert!(Empty.can_transition_to(CoarseSampled));
        assert!(CoarseSampled.can_transition_to(Upsampled(1)));
        assert!(Upsampled(1).can_transition_to(Upsampled(2)));
        assert!(Upsampled(2).can_transition_to(Extracted));
        assert!(CoarseSampled.can_transition_to(Extracted));
        assert!(Extracted.can_transition_to(Exported));
        assert!(Exported.can_transition_to(Exported));
        assert!(Upsampled(1).can_transition_to(Failed));

        assert!(!Empty.can_transition_to(Extracted));
        assert!(!CoarseSampled.can_transition_to(Upsampled(2)));
        assert!(!Upsampled(2).can_transition_to(Upsampled(2)));
        assert!(!Extracted.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Empty));
        assert!(!Empty.can_transition_to(Exported));

        assert!(Failed.is_terminal());
        assert!(!Upsampled(1).is_terminal());
    }

    #[test]
    fn test_grid_to_world_spans_padded_cube() {
        let generator = MeshGenerator::new(small_config().with_padding(0.1)).unwrap();
        assert_relative_eq!(
            generator.grid_to_world([0, 0, 0], 0),
            Point3f::new(-0.55, -0.55, -0.55),
            epsilon = 1e-6
        );
        // Last point of the final grid sits on the upper faces
        assert_relative_eq!(
            generator.grid_to_world([15, 15, 15], 1),
            Point3f::new(0.55, 0.55, 0.55),
            epsilon = 1e-6
        );
        assert_relative_eq!(
            generator.grid_to_world([15, 0, 0], 1),
            Point3f::new(0.55, -0.55, -0.55),
            epsilon = 1e-6
        );
        // The same world point at the next level has doubled coordinates
        assert_relative_eq!(
            generator.grid_to_world([8, 14, 0], 1),
            generator.grid_to_world([4, 7, 0], 0),
            epsilon = 1e-6
        );
        assert_relative_eq!(
            generator.grid_to_world([4, 7, 0], 0),
            Point3f::new(-0.55 + 8.0 * 1.1 / 15.0, -0.55 + 14.0 * 1.1 / 15.0, -0.55),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_sphere_touching_upper_faces_is_closed() {
        let config = small_config().with_upsample_steps(0).with_padding(0.1);
        let generator = MeshGenerator::new(config).unwrap();
        let mut field = SphereOccupancy::new(Point3f::origin(), 0.45);
        let (mesh, _) = generator.generate_mesh(&mut field).unwrap();

        assert!(mesh.is_closed());
        assert!(mesh.signed_volume() > 0.0);
        for axis in 0..3 {
            let max = mesh.vertices.iter().map(|v| v[axis]).fold(f32::MIN, f32::max);
            let min = mesh.vertices.iter().map(|v| v[axis]).fold(f32::MAX, f32::min);
            assert!(max > 0.4, "axis {} reaches only {}", axis, max);
            assert_relative_eq!(max, -min, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_generate_sphere() {
        let generator = MeshGenerator::new(small_config()).unwrap();
        let mut field = SphereOccupancy::new(Point3f::origin(), 0.3);
        let (mesh, stats) = generator.generate_mesh(&mut field).unwrap();

        assert!(mesh.is_closed());
        assert!(mesh.signed_volume() > 0.0);
        assert!(mesh.normals.is_some());
        assert!(mesh.colors.is_none());

        assert_eq!(stats.evaluations_per_level.len(), 2);
        assert_eq!(stats.evaluations_per_level[0], 512);
        assert_eq!(stats.final_points_per_axis, 16);
        assert!(stats.total_evaluations() < stats.dense_evaluations());
        assert!(stats.quality.as_ref().unwrap().watertight);

        for v in &mesh.vertices {
            assert!(((v - Point3f::origin()).magnitude() - 0.3).abs() < 0.05);
        }
    }

    #[test]
    fn test_batches_respect_batch_size() {
        let generator = MeshGenerator::new(
            small_config()
                .with_batch_size(100)
                .with_refinement(RefinementPolicy::Uniform),
        )
        .unwrap();
        let sphere = SphereOccupancy::new(Point3f::origin(), 0.3);

        let mut batch_sizes = Vec::new();
        let mut field = |points: &[Point3f]| -> Result<Vec<f32>> {
            batch_sizes.push(points.len());
            Ok(points.iter().map(|p| sphere.occupancy(p)).collect())
        };
        generator.generate_mesh(&mut field).unwrap();

        assert!(batch_sizes.iter().all(|&n| n <= 100));
        // 8^3 coarse points, then the 16^3 - 8^3 new ones
        assert_eq!(batch_sizes.iter().sum::<usize>(), 16 * 16 * 16);
    }

    #[test]
    fn test_wrong_batch_length_fails() {
        let generator = MeshGenerator::new(small_config()).unwrap();
        let mut field =
            |points: &[Point3f]| -> Result<Vec<f32>> { Ok(vec![1.0; points.len() - 1]) };

        let mut reconstruction = Reconstruction::new();
        let result = generator.run(&mut reconstruction, &mut field);
        assert!(matches!(result, Err(Error::FieldEvaluation(_))));
        assert_eq!(reconstruction.state(), PipelineState::Failed);
        assert!(reconstruction.mesh().is_none());
    }

    #[test]
    fn test_evaluator_error_propagates() {
        let generator = MeshGenerator::new(small_config()).unwrap();
        let mut field = |_: &[Point3f]| -> Result<Vec<f32>> {
            Err(Error::InvalidData("bad input".to_string()))
        };
        assert!(matches!(
            generator.generate_mesh(&mut field),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_empty_field_is_reconstruction_failure() {
        let generator = MeshGenerator::new(small_config()).unwrap();
        let mut reconstruction = Reconstruction::new();
        let err = generator
            .run(&mut reconstruction, &mut ConstantField(0.0))
            .unwrap_err();

        assert!(err.is_reconstruction_failure());
        assert_eq!(reconstruction.state(), PipelineState::Failed);
        assert_eq!(reconstruction.stats().evaluations_per_level.len(), 2);
    }

    #[test]
    fn test_run_requires_empty_reconstruction() {
        let generator = MeshGenerator::new(small_config()).unwrap();
        let mut field = SphereOccupancy::new(Point3f::origin(), 0.3);
        let mut reconstruction = Reconstruction::new();

        generator.run(&mut reconstruction, &mut field).unwrap();
        assert_eq!(reconstruction.state(), PipelineState::Extracted);

        let again = generator.run(&mut reconstruction, &mut field);
        assert!(matches!(again, Err(Error::Algorithm(_))));
        assert_eq!(reconstruction.state(), PipelineState::Extracted);
    }

    #[test]
    fn test_export_before_extraction_fails() {
        let mut reconstruction = Reconstruction::new();
        let dir = tempfile::tempdir().unwrap();
        let result = reconstruction.export(dir.path().join("mesh.ply"));
        assert!(matches!(result, Err(Error::Algorithm(_))));
        assert_eq!(reconstruction.state(), PipelineState::Empty);
    }

    #[test]
    fn test_colors_are_estimated() {
        let generator = MeshGenerator::new(small_config().with_colors(true)).unwrap();
        let mut field = PositionColors::new(SphereOccupancy::new(Point3f::origin(), 0.3), 0.55);
        let (mesh, stats) = generator.generate_mesh(&mut field).unwrap();

        let colors = mesh.colors.as_ref().unwrap();
        assert_eq!(colors.len(), mesh.vertex_count());
        // Vertices with larger x get more red
        let by_x = |a: &(usize, &Point3f), b: &(usize, &Point3f)| a.1.x.total_cmp(&b.1.x);
        let (left, _) = mesh.vertices.iter().enumerate().min_by(by_x).unwrap();
        let (right, _) = mesh.vertices.iter().enumerate().max_by(by_x).unwrap();
        assert!(colors[left][0] < colors[right][0]);
        assert!(stats.quality.is_some());
    }
}
