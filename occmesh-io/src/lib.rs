//! Mesh import and export
//!
//! This crate reads and writes the formats generated meshes are delivered in:
//! ASCII PLY, Wavefront OBJ (with the common `v x y z r g b` color extension)
//! and binary glTF (GLB). The format is picked from the file extension.

pub mod error;
pub mod glb;
pub mod obj;
pub mod ply;

pub use error::*;

use log::debug;
use occmesh_core::{Result, TriangleMesh};
use std::path::Path;

/// Trait for reading meshes from files
pub trait MeshReader {
    fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh>;
}

/// Trait for writing meshes to files
pub trait MeshWriter {
    fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()>;
}

/// Mesh file formats known to this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshFormat {
    Ply,
    Obj,
    Glb,
}

impl MeshFormat {
    /// Format for a file extension, ignoring case
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "ply" => Some(MeshFormat::Ply),
            "obj" => Some(MeshFormat::Obj),
            "glb" => Some(MeshFormat::Glb),
            _ => None,
        }
    }

    /// Format of a path, from its extension
    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| {
                IoError::UnsupportedExtension {
                    extension: format!("{:?}", path.extension()),
                }
                .into()
            })
    }

    pub fn extension(self) -> &'static str {
        match self {
            MeshFormat::Ply => "ply",
            MeshFormat::Obj => "obj",
            MeshFormat::Glb => "glb",
        }
    }
}

/// Auto-detect format and read mesh
pub fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh> {
    let path = path.as_ref();
    match MeshFormat::from_path(path)? {
        MeshFormat::Ply => ply::PlyReader::read_mesh(path),
        MeshFormat::Obj => obj::ObjReader::read_mesh(path),
        MeshFormat::Glb => glb::GlbReader::read_mesh(path),
    }
}

/// Auto-detect format and write mesh, replacing any existing file
pub fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()> {
    let path = path.as_ref();
    let format = MeshFormat::from_path(path)?;
    debug!(
        "writing {} vertices, {} faces to {} as {:?}",
        mesh.vertex_count(),
        mesh.face_count(),
        path.display(),
        format
    );
    match format {
        MeshFormat::Ply => ply::PlyWriter::write_mesh(mesh, path),
        MeshFormat::Obj => obj::ObjWriter::write_mesh(mesh, path),
        MeshFormat::Glb => glb::GlbWriter::write_mesh(mesh, path),
    }
}

#[cfg(test)]
mod tests;
