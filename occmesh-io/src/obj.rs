//! Wavefront OBJ support
//!
//! Vertex colors use the widespread `v x y z r g b` extension with channels in
//! `[0, 1]`. Faces are written as `f v//vn` when normals are present.

use crate::{IoError, MeshReader, MeshWriter};
use occmesh_core::{rgb8_from_unit, rgb8_to_unit, Point3f, Result, Rgb8, TriangleMesh, Vector3f};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub struct ObjReader;
pub struct ObjWriter;

fn parse_floats(line: usize, args: &[&str]) -> std::result::Result<Vec<f32>, IoError> {
    args.iter()
        .map(|s| {
            s.parse::<f32>().map_err(|e| IoError::ParseError {
                line,
                message: format!("invalid number '{}': {}", s, e),
            })
        })
        .collect()
}

/// Resolve a 1-based (or negative, relative) OBJ index
fn resolve_index(line: usize, token: &str, count: usize) -> std::result::Result<usize, IoError> {
    let position = token.split('/').next().unwrap_or("");
    let index: i64 = position.parse().map_err(|_| IoError::ParseError {
        line,
        message: format!("invalid face index '{}'", token),
    })?;

    let resolved = if index > 0 {
        index - 1
    } else {
        count as i64 + index
    };
    if index == 0 || resolved < 0 || resolved >= count as i64 {
        return Err(IoError::ParseError {
            line,
            message: format!("face index {} out of range for {} vertices", index, count),
        });
    }
    Ok(resolved as usize)
}

impl MeshReader for ObjReader {
    fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh> {
        let reader = BufReader::new(File::open(path)?);

        let mut vertices = Vec::new();
        let mut colors: Vec<Rgb8> = Vec::new();
        let mut normals = Vec::new();
        let mut faces = Vec::new();

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line_number = i + 1;
            let mut tokens = line.split_whitespace();
            let Some(keyword) = tokens.next() else {
                continue;
            };
            let args: Vec<&str> = tokens.collect();

            match keyword {
                "v" => {
                    let values = parse_floats(line_number, &args)?;
                    if values.len() < 3 {
                        return Err(IoError::ParseError {
                            line: line_number,
                            message: "vertex needs three coordinates".to_string(),
                        }
                        .into());
                    }
                    vertices.push(Point3f::new(values[0], values[1], values[2]));
                    if values.len() >= 6 {
                        colors.push(rgb8_from_unit(values[3], values[4], values[5]));
                    }
                }
                "vn" => {
                    let values = parse_floats(line_number, &args)?;
                    if values.len() < 3 {
                        return Err(IoError::ParseError {
                            line: line_number,
                            message: "normal needs three components".to_string(),
                        }
                        .into());
                    }
                    normals.push(Vector3f::new(values[0], values[1], values[2]));
                }
                "f" => {
                    let indices = args
                        .iter()
                        .map(|token| resolve_index(line_number, token, vertices.len()))
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    for k in 1..indices.len().saturating_sub(1) {
                        faces.push([indices[0], indices[k], indices[k + 1]]);
                    }
                }
                // Texture coordinates, groups and materials are not used
                _ => {}
            }
        }

        let vertex_count = vertices.len();
        let mut mesh = TriangleMesh::from_vertices_and_faces(vertices, faces);
        // Normals are only meaningful when written one per vertex
        if normals.len() == vertex_count && vertex_count > 0 {
            mesh.set_normals(normals);
        }
        if colors.len() == vertex_count && vertex_count > 0 {
            mesh.set_colors(colors);
        }

        Ok(mesh)
    }
}

impl MeshWriter for ObjWriter {
    fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);

        writeln!(writer, "# occmesh")?;
        writeln!(
            writer,
            "# {} vertices, {} faces",
            mesh.vertex_count(),
            mesh.face_count()
        )?;

        for (i, v) in mesh.vertices.iter().enumerate() {
            match mesh.colors.as_ref().and_then(|c| c.get(i)) {
                Some(&color) => {
                    let [r, g, b] = rgb8_to_unit(color);
                    writeln!(writer, "v {} {} {} {} {} {}", v.x, v.y, v.z, r, g, b)?;
                }
                None => writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?,
            }
        }

        if let Some(normals) = &mesh.normals {
            for n in normals {
                writeln!(writer, "vn {} {} {}", n.x, n.y, n.z)?;
            }
        }

        let with_normals = mesh.normals.is_some();
        for face in &mesh.faces {
            let [a, b, c] = [face[0] + 1, face[1] + 1, face[2] + 1];
            if with_normals {
                writeln!(writer, "f {a}//{a} {b}//{b} {c}//{c}")?;
            } else {
                writeln!(writer, "f {a} {b} {c}")?;
            }
        }

        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use occmesh_core::Error;
    use std::fs;

    #[test]
    fn test_read_polygon_and_relative_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.obj");
        fs::write(
            &path,
            "# quad\nv 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nvt 0 0\ng quad\nf 1/1 2/1 3/1 4/1\nf -4 -2 -1\n",
        )
        .unwrap();

        let mesh = ObjReader::read_mesh(&path).unwrap();
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3], [0, 2, 3]]);
        assert!(mesh.colors.is_none());
        assert!(mesh.normals.is_none());
    }

    #[test]
    fn test_vertex_colors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("colored.obj");
        fs::write(
            &path,
            "v 0 0 0 1 0 0\nv 1 0 0 0 1 0\nv 0 1 0 0 0 1\nf 1 2 3\n",
        )
        .unwrap();

        let mesh = ObjReader::read_mesh(&path).unwrap();
        assert_eq!(
            mesh.colors,
            Some(vec![[255, 0, 0], [0, 255, 0], [0, 0, 255]])
        );
    }

    #[test]
    fn test_bad_index_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.obj");
        fs::write(&path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 0\n").unwrap();

        match ObjReader::read_mesh(&path) {
            Err(Error::InvalidData(message)) => assert!(message.contains("line 4")),
            other => panic!("unexpected result {:?}", other),
        }
    }
}
