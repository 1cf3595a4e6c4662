//! Generation settings
//!
//! Settings live under a top-level `generation` key so they can share a file
//! with other sections:
//!
//! ```yaml
//! generation:
//!   resolution: 32
//!   upsample_steps: 2
//!   threshold: 0.5
//!   refinement: adaptive
//! ```
//!
//! Missing keys take their defaults.

use crate::marching_cubes::MarchingCubesConfig;
use crate::mise::{MiseConfig, RefinementPolicy};
use occmesh_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters of one mesh generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Points per axis of the coarse grid
    pub resolution: usize,
    /// Refinement rounds after coarse sampling
    pub upsample_steps: usize,
    /// Occupancy level of the surface
    pub threshold: f32,
    /// Points per field evaluation call
    pub batch_size: usize,
    /// Extra margin around the unit cube
    pub padding: f32,
    pub refinement: RefinementPolicy,
    pub compute_normals: bool,
    /// Laplacian smoothing iterations, 0 = off
    pub smoothing_iterations: usize,
    /// Query the field for vertex colors after extraction
    pub estimate_colors: bool,
    /// Format of written meshes (`glb`, `ply` or `obj`)
    pub mesh_extension: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            resolution: 32,
            upsample_steps: 2,
            threshold: 0.5,
            batch_size: 100_000,
            padding: 0.1,
            refinement: RefinementPolicy::Adaptive,
            compute_normals: true,
            smoothing_iterations: 0,
            estimate_colors: true,
            mesh_extension: "glb".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    generation: GenerationConfig,
}

impl GenerationConfig {
    /// Parse the `generation` section of a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: ConfigFile = if yaml.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?
        };
        file.generation.validate()?;
        Ok(file.generation)
    }

    /// Read the `generation` section of a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// Serialize under the `generation` key
    pub fn to_yaml_string(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Wrapper<'a> {
            generation: &'a GenerationConfig,
        }
        serde_yaml::to_string(&Wrapper { generation: self })
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".to_string()));
        }
        if !(self.padding.is_finite() && self.padding >= 0.0) {
            return Err(Error::Config(format!(
                "padding must be a non-negative number, got {}",
                self.padding
            )));
        }
        match self.mesh_extension.as_str() {
            "glb" | "ply" | "obj" => {}
            other => {
                return Err(Error::Config(format!(
                    "unsupported mesh_extension '{}'",
                    other
                )))
            }
        }
        self.mise_config().validate()
    }

    pub fn mise_config(&self) -> MiseConfig {
        MiseConfig::new(self.resolution, self.upsample_steps, self.threshold)
            .with_refinement(self.refinement)
    }

    pub fn marching_cubes_config(&self) -> MarchingCubesConfig {
        MarchingCubesConfig {
            iso_level: self.threshold,
            compute_normals: self.compute_normals,
            smoothing_iterations: self.smoothing_iterations,
        }
    }

    /// Side length of the sampled cube
    pub fn box_size(&self) -> f32 {
        1.0 + self.padding
    }

    /// Points per axis after the last refinement round
    pub fn final_resolution(&self) -> usize {
        self.mise_config()
            .final_points_per_axis()
            .unwrap_or(usize::MAX)
    }

    pub fn with_resolution(mut self, resolution: usize) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_upsample_steps(mut self, upsample_steps: usize) -> Self {
        self.upsample_steps = upsample_steps;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_refinement(mut self, refinement: RefinementPolicy) -> Self {
        self.refinement = refinement;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_colors(mut self, estimate_colors: bool) -> Self {
        self.estimate_colors = estimate_colors;
        self
    }

    pub fn with_smoothing_iterations(mut self, iterations: usize) -> Self {
        self.smoothing_iterations = iterations;
        self
    }
}
