//! Integration tests for occmesh-reconstruction
//!
//! These tests drive the MISE engine by hand the way a caller with its own
//! field would, and run the full generation pipeline down to exported files.

use occmesh_core::{Error, GridCoord, Point3f, Vector3f};
use occmesh_reconstruction::*;
use std::f32::consts::PI;

const RADIUS: f32 = 6.0;
const CENTER: f32 = 7.5;

/// Ramp occupancy of a sphere, in level-0 grid units
fn sphere_value(coord: GridCoord, level: usize) -> f32 {
    let scale = (1 << level) as f32;
    let d = ((coord[0] as f32 / scale - CENTER).powi(2)
        + (coord[1] as f32 / scale - CENTER).powi(2)
        + (coord[2] as f32 / scale - CENTER).powi(2))
    .sqrt();
    (0.5 + 0.5 * (RADIUS - d)).clamp(0.0, 1.0)
}

/// Evaluate every pending point, returning how many were evaluated
fn evaluate_round<F: Fn(GridCoord, usize) -> f32>(mise: &mut Mise, field: F) -> usize {
    let pending = mise.pending_points();
    let level = mise.level();
    let count = pending.len();
    mise.commit_values(pending.into_iter().map(|c| (c, field(c, level))))
        .unwrap();
    count
}

/// Run every round and return the total number of evaluations
fn run_all<F: Fn(GridCoord, usize) -> f32 + Copy>(mise: &mut Mise, field: F) -> usize {
    let mut total = evaluate_round(mise, field);
    while mise.remaining_upsamples() > 0 {
        mise.upsample().unwrap();
        total += evaluate_round(mise, field);
    }
    total
}

#[test]
fn test_sphere_scenario_pending_counts() {
    let mut mise = Mise::new(16, 2, 0.5).unwrap();
    assert_eq!(mise.pending_points().len(), 4096);

    evaluate_round(&mut mise, sphere_value);
    assert!(mise.pending_points().is_empty());

    mise.upsample().unwrap();
    assert_eq!(mise.points_per_axis(), 32);
    assert_eq!(mise.pending_points().len(), 32 * 32 * 32 - 16 * 16 * 16);

    evaluate_round(&mut mise, sphere_value);
    mise.upsample().unwrap();
    evaluate_round(&mut mise, sphere_value);
    assert!(matches!(
        mise.upsample(),
        Err(Error::UpsampleLimitExceeded { steps: 2 })
    ));

    let mesh = MarchingCubes::new(MarchingCubesConfig::default())
        .extract_dense(&mise.to_dense())
        .unwrap();
    assert!(mesh.face_count() > 0);
    assert!(mesh.is_closed());
}

#[test]
fn test_binary_sphere_scenario() {
    let binary = |c: GridCoord, l: usize| if sphere_value(c, l) >= 0.5 { 1.0 } else { 0.0 };
    let mut mise = Mise::new(16, 2, 0.5).unwrap();
    let evaluations = run_all(&mut mise, binary);
    assert_eq!(evaluations, 64 * 64 * 64);

    let mesh = marching_cubes(&mise.to_dense().values, 0.5).unwrap();
    assert!(mesh.vertex_count() > 0);
    assert!(mesh.is_closed());
    assert!(mesh.signed_volume() > 0.0);
}

#[test]
fn test_sphere_geometry_after_refinement() {
    let mut mise = Mise::new(16, 2, 0.5).unwrap();
    run_all(&mut mise, sphere_value);

    let mesh = MarchingCubes::new(MarchingCubesConfig::default())
        .extract_dense(&mise.to_dense())
        .unwrap();

    // Level 2 grid units are a quarter of level 0 units
    let radius = RADIUS * 4.0;
    let expected_area = 4.0 * PI * radius * radius;
    let expected_volume = 4.0 / 3.0 * PI * radius.powi(3);

    assert!((mesh.surface_area() - expected_area).abs() / expected_area < 0.05);
    assert!(mesh.signed_volume() > 0.0);
    assert!((mesh.signed_volume() - expected_volume).abs() / expected_volume < 0.05);
    assert_eq!(mesh.non_manifold_edge_count(), 0);
    assert_eq!(mesh.boundary_edge_count(), 0);

    let center = Point3f::new(CENTER * 4.0, CENTER * 4.0, CENTER * 4.0);
    let normals = mesh.normals.as_ref().unwrap();
    for (v, n) in mesh.vertices.iter().zip(normals) {
        assert!(n.dot(&(v - center)) > 0.0);
    }
}

#[test]
fn test_known_values_survive_upsampling() {
    let mut mise = Mise::new(8, 2, 0.5).unwrap();
    evaluate_round(&mut mise, |c, _| (c[0] * 64 + c[1] * 8 + c[2]) as f32);

    mise.upsample().unwrap();
    mise.upsample().unwrap();

    for x in 0..8i64 {
        for y in 0..8i64 {
            for z in 0..8i64 {
                let value = mise.get([4 * x, 4 * y, 4 * z]).unwrap();
                assert_eq!(value, (x * 64 + y * 8 + z) as f32);
            }
        }
    }
}

#[test]
fn test_pending_never_contains_known_points() {
    let config = MiseConfig::new(16, 2, 0.5).with_refinement(RefinementPolicy::Adaptive);
    let mut mise = Mise::with_config(config).unwrap();
    evaluate_round(&mut mise, sphere_value);

    while mise.remaining_upsamples() > 0 {
        mise.upsample().unwrap();
        let pending = mise.pending_points();
        assert!(!pending.is_empty());
        assert!(pending.iter().all(|c| !mise.is_known(*c)));
        evaluate_round(&mut mise, sphere_value);
    }
}

#[test]
fn test_constant_zero_field_is_degenerate() {
    let mut mise = Mise::new(8, 1, 0.5).unwrap();
    run_all(&mut mise, |_, _| 0.0);

    let result = MarchingCubes::new(MarchingCubesConfig::default())
        .extract_dense(&mise.to_dense());
    match result {
        Err(e) => assert!(e.is_reconstruction_failure()),
        Ok(_) => panic!("extraction of an empty field produced a mesh"),
    }
}

#[test]
fn test_adaptive_refinement_saves_evaluations() {
    let mut uniform = Mise::new(16, 2, 0.5).unwrap();
    let uniform_evaluations = run_all(&mut uniform, sphere_value);
    assert_eq!(uniform_evaluations, 64 * 64 * 64);

    let config = MiseConfig::new(16, 2, 0.5).with_refinement(RefinementPolicy::Adaptive);
    let mut adaptive = Mise::with_config(config).unwrap();
    let adaptive_evaluations = run_all(&mut adaptive, sphere_value);
    assert!(adaptive_evaluations < uniform_evaluations / 2);

    let mesh = MarchingCubes::new(MarchingCubesConfig::default())
        .extract_dense(&adaptive.to_dense())
        .unwrap();
    assert!(mesh.is_closed());
    assert!(mesh.signed_volume() > 0.0);

    let radius = RADIUS * 4.0;
    let expected_area = 4.0 * PI * radius * radius;
    assert!((mesh.surface_area() - expected_area).abs() / expected_area < 0.05);
}

#[test]
fn test_pipeline_sphere_in_world_space() {
    let config = GenerationConfig::default()
        .with_resolution(16)
        .with_upsample_steps(2)
        .with_colors(false);
    let generator = MeshGenerator::new(config).unwrap();
    let mut field = SphereOccupancy::new(Point3f::new(0.1, 0.0, -0.1), 0.3);

    let (mesh, stats) = generator.generate_mesh(&mut field).unwrap();
    let quality = stats.quality.clone().unwrap();

    assert!(quality.watertight);
    assert_eq!(quality.vertex_count, mesh.vertex_count());
    assert!((quality.surface_area - 4.0 * PI * 0.09).abs() < 0.05 * 4.0 * PI * 0.09);
    assert!(stats.total_evaluations() < stats.dense_evaluations());
    assert_eq!(stats.evaluations_per_level[0], 16 * 16 * 16);

    for v in &mesh.vertices {
        let r = (v - Point3f::new(0.1, 0.0, -0.1)).magnitude();
        assert!((r - 0.3).abs() < 0.02, "vertex at distance {}", r);
    }
}

#[test]
fn test_pipeline_export_roundtrip() {
    let config = GenerationConfig::default()
        .with_resolution(12)
        .with_upsample_steps(1);
    let generator = MeshGenerator::new(config).unwrap();
    let mut field = PositionColors::new(TorusOccupancy::new(Point3f::origin(), 0.28, 0.12), 0.55);

    let mut reconstruction = Reconstruction::new();
    generator.run(&mut reconstruction, &mut field).unwrap();
    assert_eq!(reconstruction.state(), PipelineState::Extracted);

    let dir = tempfile::tempdir().unwrap();
    for name in ["torus.ply", "torus.obj", "torus.glb"] {
        reconstruction.export(dir.path().join(name)).unwrap();
    }
    assert_eq!(reconstruction.state(), PipelineState::Exported);

    let mesh = reconstruction.mesh().unwrap();
    assert!(mesh.colors.is_some());

    for name in ["torus.ply", "torus.obj"] {
        let loaded = occmesh_io::read_mesh(dir.path().join(name)).unwrap();
        assert_eq!(loaded.vertex_count(), mesh.vertex_count());
        assert_eq!(loaded.faces, mesh.faces);
        assert!(loaded.is_closed());
        assert_eq!(loaded.colors, mesh.colors);
    }

    let glb = std::fs::read(dir.path().join("torus.glb")).unwrap();
    assert_eq!(&glb[0..4], b"glTF");
    assert_eq!(glb.len() % 4, 0);
}

#[test]
fn test_grid_transform_maps_corners() {
    let generator = MeshGenerator::new(GenerationConfig::default().with_padding(0.0)).unwrap();
    let t = generator.grid_transform(2);
    let last = ((32 << 2) - 1) as f32;

    let p = t.transform_point(&Point3f::new(last, 0.0, last / 2.0));
    assert!((p - Point3f::new(0.5, -0.5, 0.0)).magnitude() < 1e-6);

    let v = t.transform_vector(&Vector3f::new(last, 0.0, 0.0));
    assert!((v.x - 1.0).abs() < 1e-6);

    // Coarser levels reach the same faces
    let coarse = generator.grid_transform(0);
    let p = coarse.transform_point(&Point3f::new(last / 4.0, last / 4.0, 0.0));
    assert!((p - Point3f::new(0.5, 0.5, -0.5)).magnitude() < 1e-6);
}
