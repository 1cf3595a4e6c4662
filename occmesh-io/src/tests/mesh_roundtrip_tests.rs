//! Round-trip tests: attributes written by one of the writers must come back
//! unchanged through the matching reader.

use crate::{read_mesh, write_mesh, MeshFormat};
use occmesh_core::{Error, Point3f, TriangleMesh, Vector3f};

/// Closed tetrahedron with normals and colors
fn create_test_mesh() -> TriangleMesh {
    let vertices = vec![
        Point3f::new(0.0, 0.0, 0.0),
        Point3f::new(1.0, 0.0, 0.0),
        Point3f::new(0.0, 1.0, 0.0),
        Point3f::new(0.0, 0.0, 1.0),
    ];
    let faces = vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]];
    let mut mesh = TriangleMesh::from_vertices_and_faces(vertices, faces);

    let center = Point3f::new(0.25, 0.25, 0.25);
    let normals = mesh
        .vertices
        .iter()
        .map(|v| (v - center).normalize())
        .collect();
    mesh.set_normals(normals);
    mesh.set_colors(vec![[255, 0, 0], [0, 255, 0], [0, 0, 255], [12, 34, 56]]);
    mesh
}

#[test]
fn test_every_format_roundtrips() {
    let dir = tempfile::tempdir().unwrap();
    let mesh = create_test_mesh();

    for format in [MeshFormat::Ply, MeshFormat::Obj, MeshFormat::Glb] {
        let path = dir.path().join(format!("tetra.{}", format.extension()));
        write_mesh(&mesh, &path).unwrap();
        let loaded = read_mesh(&path).unwrap();

        assert_eq!(loaded.vertices, mesh.vertices, "{:?}", format);
        assert_eq!(loaded.faces, mesh.faces, "{:?}", format);
        assert_eq!(loaded.colors, mesh.colors, "{:?}", format);
        assert!(loaded.is_closed());

        let normals = loaded.normals.as_ref().unwrap();
        for (a, b) in normals.iter().zip(mesh.normals.as_ref().unwrap()) {
            approx::assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }
}

#[test]
fn test_mesh_without_attributes() {
    let dir = tempfile::tempdir().unwrap();
    let mut mesh = create_test_mesh();
    mesh.normals = None;
    mesh.colors = None;

    for format in [MeshFormat::Ply, MeshFormat::Obj, MeshFormat::Glb] {
        let path = dir.path().join(format!("plain.{}", format.extension()));
        write_mesh(&mesh, &path).unwrap();
        let loaded = read_mesh(&path).unwrap();
        assert!(loaded.normals.is_none(), "{:?}", format);
        assert!(loaded.colors.is_none(), "{:?}", format);
        assert_eq!(loaded.face_count(), 4);
    }
}

#[test]
fn test_write_replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mesh.obj");
    std::fs::write(&path, "v 9 9 9\n".repeat(1000)).unwrap();

    let mut mesh = create_test_mesh();
    mesh.faces.truncate(1);
    write_mesh(&mesh, &path).unwrap();

    let loaded = read_mesh(&path).unwrap();
    assert_eq!(loaded.vertex_count(), 4);
    assert_eq!(loaded.face_count(), 1);
}

#[test]
fn test_unknown_extension() {
    let dir = tempfile::tempdir().unwrap();
    let mesh = create_test_mesh();
    assert!(matches!(
        write_mesh(&mesh, dir.path().join("mesh.stl")),
        Err(Error::UnsupportedFormat(_))
    ));
    assert!(matches!(
        read_mesh(dir.path().join("mesh")),
        Err(Error::UnsupportedFormat(_))
    ));
    assert_eq!(MeshFormat::from_extension("GLB"), Some(MeshFormat::Glb));
}

#[test]
fn test_normals_survive_scaled_values() {
    let dir = tempfile::tempdir().unwrap();
    let mut mesh = create_test_mesh();
    mesh.set_normals(vec![Vector3f::new(0.1, 0.2, 0.3); 4]);

    let path = dir.path().join("scaled.ply");
    write_mesh(&mesh, &path).unwrap();
    assert_eq!(read_mesh(&path).unwrap().normals, mesh.normals);
}
