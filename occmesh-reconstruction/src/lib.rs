//! # occmesh Reconstruction
//!
//! Mesh generation from implicit occupancy fields.
//!
//! This crate provides the Multiresolution IsoSurface Extraction (MISE)
//! engine, a marching cubes extractor, analytic fields and the generation
//! pipeline that ties them together.

pub mod config;
pub mod field;
pub mod marching_cubes;
pub mod mise;
pub mod parallel;
pub mod pipeline;

// Re-export commonly used items
pub use config::*;
pub use field::*;
pub use marching_cubes::*;
pub use mise::*;
pub use pipeline::*;
