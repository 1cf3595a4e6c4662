//! Test modules for occmesh-io
//!
//! Round-trip validation across every supported format.

pub mod mesh_roundtrip_tests;
