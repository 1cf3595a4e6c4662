//! Core data structures and error types for occmesh
//!
//! This crate provides the types shared by every stage of the reconstruction
//! pipeline: points and vectors, the triangle mesh produced by isosurface
//! extraction, affine transforms, and the common error type.

pub mod error;
pub mod mesh;
pub mod point;
pub mod traits;
pub mod transform;

pub use error::*;
pub use mesh::*;
pub use point::*;
pub use traits::*;
pub use transform::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Point3, Vector3};
