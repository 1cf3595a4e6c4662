//! Mesh data structures and functionality

use crate::point::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A triangle mesh with vertices and faces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3f>,
    pub faces: Vec<[usize; 3]>,
    pub normals: Option<Vec<Vector3f>>,
    pub colors: Option<Vec<Rgb8>>,
}

impl TriangleMesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
            normals: None,
            colors: None,
        }
    }

    /// Create a mesh from vertices and faces
    pub fn from_vertices_and_faces(vertices: Vec<Point3f>, faces: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            faces,
            normals: None,
            colors: None,
        }
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of faces
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Calculate face normals
    pub fn calculate_face_normals(&self) -> Vec<Vector3f> {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let v1 = self.vertices[face[1]];
                let v2 = self.vertices[face[2]];

                let edge1 = v1 - v0;
                let edge2 = v2 - v0;

                edge1.cross(&edge2).normalize()
            })
            .collect()
    }

    /// Set vertex normals
    pub fn set_normals(&mut self, normals: Vec<Vector3f>) {
        if normals.len() == self.vertices.len() {
            self.normals = Some(normals);
        }
    }

    /// Set vertex colors
    pub fn set_colors(&mut self, colors: Vec<Rgb8>) {
        if colors.len() == self.vertices.len() {
            self.colors = Some(colors);
        }
    }

    /// Total area of all faces
    pub fn surface_area(&self) -> f32 {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let edge1 = self.vertices[face[1]] - v0;
                let edge2 = self.vertices[face[2]] - v0;
                0.5 * edge1.cross(&edge2).magnitude()
            })
            .sum()
    }

    /// Signed volume enclosed by the mesh (divergence theorem).
    ///
    /// Positive when faces are wound counter-clockwise seen from outside.
    /// Only meaningful for closed meshes.
    pub fn signed_volume(&self) -> f32 {
        self.faces
            .iter()
            .map(|face| {
                let a = self.vertices[face[0]].coords;
                let b = self.vertices[face[1]].coords;
                let c = self.vertices[face[2]].coords;
                a.dot(&b.cross(&c)) / 6.0
            })
            .sum()
    }

    /// Count how many faces use each undirected edge
    pub fn edge_usage(&self) -> HashMap<(usize, usize), usize> {
        let mut usage = HashMap::with_capacity(self.faces.len() * 3 / 2);
        for face in &self.faces {
            for i in 0..3 {
                let a = face[i];
                let b = face[(i + 1) % 3];
                let key = if a < b { (a, b) } else { (b, a) };
                *usage.entry(key).or_insert(0) += 1;
            }
        }
        usage
    }

    /// Number of edges used by exactly one face
    pub fn boundary_edge_count(&self) -> usize {
        self.edge_usage().values().filter(|&&count| count == 1).count()
    }

    /// Number of edges used by more than two faces
    pub fn non_manifold_edge_count(&self) -> usize {
        self.edge_usage().values().filter(|&&count| count > 2).count()
    }

    /// A non-empty mesh where every edge is shared by exactly two faces
    pub fn is_closed(&self) -> bool {
        !self.is_empty() && self.edge_usage().values().all(|&count| count == 2)
    }

    /// Clear the mesh
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.faces.clear();
        self.normals = None;
        self.colors = None;
    }
}

impl Default for TriangleMesh {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Unit right-angle tetrahedron wound outward
    fn tetrahedron() -> TriangleMesh {
        TriangleMesh::from_vertices_and_faces(
            vec![
                Point3f::new(0.0, 0.0, 0.0),
                Point3f::new(1.0, 0.0, 0.0),
                Point3f::new(0.0, 1.0, 0.0),
                Point3f::new(0.0, 0.0, 1.0),
            ],
            vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]],
        )
    }

    #[test]
    fn test_tetrahedron_volume_and_orientation() {
        let mesh = tetrahedron();
        assert_relative_eq!(mesh.signed_volume(), 1.0 / 6.0, epsilon = 1e-6);

        let mut flipped = mesh.clone();
        for face in &mut flipped.faces {
            face.swap(1, 2);
        }
        assert_relative_eq!(flipped.signed_volume(), -1.0 / 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_tetrahedron_area() {
        let mesh = tetrahedron();
        let expected = 1.5 + 3.0_f32.sqrt() / 2.0;
        assert_relative_eq!(mesh.surface_area(), expected, epsilon = 1e-5);
    }

    #[test]
    fn test_closed_and_open_meshes() {
        let mut mesh = tetrahedron();
        assert!(mesh.is_closed());
        assert_eq!(mesh.boundary_edge_count(), 0);

        mesh.faces.pop();
        assert!(!mesh.is_closed());
        assert_eq!(mesh.boundary_edge_count(), 3);
        assert_eq!(mesh.non_manifold_edge_count(), 0);
    }

    #[test]
    fn test_set_colors_requires_matching_length() {
        let mut mesh = tetrahedron();
        mesh.set_colors(vec![[255, 0, 0]; 3]);
        assert!(mesh.colors.is_none());

        mesh.set_colors(vec![[255, 0, 0]; 4]);
        assert_eq!(mesh.colors.as_ref().map(Vec::len), Some(4));
    }

    #[test]
    fn test_clear() {
        let mut mesh = tetrahedron();
        mesh.set_normals(vec![Vector3f::z(); 4]);
        mesh.clear();
        assert!(mesh.is_empty());
        assert!(mesh.normals.is_none());
    }
}
