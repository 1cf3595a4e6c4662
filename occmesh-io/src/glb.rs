//! Binary glTF 2.0 (GLB) support
//!
//! Meshes are written as a single triangle primitive with `POSITION`,
//! optional `NORMAL` and `COLOR_0` (normalized unsigned bytes, RGBA) and
//! `u32` indices, all in one binary buffer. The reader accepts the same
//! layout plus the other index and color encodings allowed by glTF.

use crate::{IoError, MeshReader, MeshWriter};
use occmesh_core::{Drawable, Point3f, Result, Rgb8, TriangleMesh, Vector3f};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const COMPONENT_U8: u64 = 5121;
const COMPONENT_U16: u64 = 5123;
const COMPONENT_U32: u64 = 5125;
const COMPONENT_F32: u64 = 5126;

const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const MODE_TRIANGLES: u32 = 4;

pub struct GlbReader;
pub struct GlbWriter;

/// Binary buffer under construction, with the matching views and accessors
#[derive(Default)]
struct BufferBuilder {
    data: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BufferBuilder {
    /// Append a tightly packed attribute or index array, returning its accessor
    fn push(&mut self, bytes: Vec<u8>, target: u32, mut accessor: Value) -> usize {
        // Every section is a multiple of 4 bytes, so offsets stay aligned
        let offset = self.data.len();
        self.data.extend_from_slice(&bytes);

        let view = self.views.len();
        self.views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": bytes.len(),
            "target": target,
        }));

        accessor["bufferView"] = json!(view);
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }
}

fn pad_to_four(bytes: &mut Vec<u8>, fill: u8) {
    while bytes.len() % 4 != 0 {
        bytes.push(fill);
    }
}

impl MeshWriter for GlbWriter {
    fn write_mesh<P: AsRef<Path>>(mesh: &TriangleMesh, path: P) -> Result<()> {
        if mesh.is_empty() {
            return Err(IoError::WriteError {
                message: "a GLB primitive needs at least one triangle".to_string(),
            }
            .into());
        }

        let mut buffer = BufferBuilder::default();
        let mut attributes = serde_json::Map::new();

        let (min, max) = mesh.bounding_box();
        let positions: Vec<u8> = mesh
            .vertices
            .iter()
            .flat_map(|p| [p.x, p.y, p.z])
            .flat_map(f32::to_le_bytes)
            .collect();
        let accessor = buffer.push(
            positions,
            TARGET_ARRAY_BUFFER,
            json!({
                "componentType": COMPONENT_F32,
                "count": mesh.vertex_count(),
                "type": "VEC3",
                "min": [min.x, min.y, min.z],
                "max": [max.x, max.y, max.z],
            }),
        );
        attributes.insert("POSITION".to_string(), json!(accessor));

        if let Some(normals) = &mesh.normals {
            let bytes: Vec<u8> = normals
                .iter()
                .flat_map(|n| [n.x, n.y, n.z])
                .flat_map(f32::to_le_bytes)
                .collect();
            let accessor = buffer.push(
                bytes,
                TARGET_ARRAY_BUFFER,
                json!({
                    "componentType": COMPONENT_F32,
                    "count": normals.len(),
                    "type": "VEC3",
                }),
            );
            attributes.insert("NORMAL".to_string(), json!(accessor));
        }

        if let Some(colors) = &mesh.colors {
            let bytes: Vec<u8> = colors.iter().flat_map(|c| [c[0], c[1], c[2], 255]).collect();
            let accessor = buffer.push(
                bytes,
                TARGET_ARRAY_BUFFER,
                json!({
                    "componentType": COMPONENT_U8,
                    "normalized": true,
                    "count": colors.len(),
                    "type": "VEC4",
                }),
            );
            attributes.insert("COLOR_0".to_string(), json!(accessor));
        }

        let indices = mesh
            .faces
            .iter()
            .flatten()
            .map(|&i| {
                u32::try_from(i).map_err(|_| IoError::WriteError {
                    message: format!("vertex index {} does not fit u32", i),
                })
            })
            .collect::<std::result::Result<Vec<u32>, IoError>>()?;
        let index_accessor = buffer.push(
            indices.iter().flat_map(|i| i.to_le_bytes()).collect(),
            TARGET_ELEMENT_ARRAY_BUFFER,
            json!({
                "componentType": COMPONENT_U32,
                "count": indices.len(),
                "type": "SCALAR",
            }),
        );

        let mut bin = buffer.data;
        pad_to_four(&mut bin, 0);

        let document = json!({
            "asset": { "version": "2.0", "generator": "occmesh" },
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [{ "mesh": 0 }],
            "meshes": [{
                "primitives": [{
                    "attributes": attributes,
                    "indices": index_accessor,
                    "mode": MODE_TRIANGLES,
                }],
            }],
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": buffer.views,
            "accessors": buffer.accessors,
        });

        let mut json_chunk = serde_json::to_vec(&document).map_err(|e| IoError::WriteError {
            message: e.to_string(),
        })?;
        pad_to_four(&mut json_chunk, b' ');

        let total_length = 12 + 8 + json_chunk.len() + 8 + bin.len();
        let total_length = u32::try_from(total_length).map_err(|_| IoError::WriteError {
            message: format!("{} bytes exceed the GLB size limit", total_length),
        })?;

        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(GLB_MAGIC)?;
        writer.write_all(&GLB_VERSION.to_le_bytes())?;
        writer.write_all(&total_length.to_le_bytes())?;

        writer.write_all(&(json_chunk.len() as u32).to_le_bytes())?;
        writer.write_all(&CHUNK_JSON.to_le_bytes())?;
        writer.write_all(&json_chunk)?;

        writer.write_all(&(bin.len() as u32).to_le_bytes())?;
        writer.write_all(&CHUNK_BIN.to_le_bytes())?;
        writer.write_all(&bin)?;

        writer.flush()?;
        Ok(())
    }
}

fn malformed(message: impl Into<String>) -> IoError {
    IoError::ParseError {
        line: 0,
        message: message.into(),
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> std::result::Result<u32, IoError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| malformed("truncated GLB"))
}

/// Split a GLB file into its JSON document and binary chunk
fn split_chunks(bytes: &[u8]) -> std::result::Result<(Value, &[u8]), IoError> {
    if bytes.len() < 12 || &bytes[0..4] != GLB_MAGIC {
        return Err(malformed("missing glTF magic"));
    }
    let version = read_u32(bytes, 4)?;
    if version != GLB_VERSION {
        return Err(malformed(format!("unsupported GLB version {}", version)));
    }

    let mut document = None;
    let mut bin: &[u8] = &[];
    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let length = read_u32(bytes, offset)? as usize;
        let kind = read_u32(bytes, offset + 4)?;
        let data = bytes
            .get(offset + 8..offset + 8 + length)
            .ok_or_else(|| malformed("chunk runs past the end of the file"))?;
        match kind {
            CHUNK_JSON => {
                document = Some(
                    serde_json::from_slice(data).map_err(|e| malformed(e.to_string()))?,
                );
            }
            CHUNK_BIN => bin = data,
            _ => {}
        }
        offset += 8 + length;
    }

    let document = document.ok_or_else(|| malformed("missing JSON chunk"))?;
    Ok((document, bin))
}

/// Typed view of one accessor's data
struct AccessorData<'a> {
    bytes: &'a [u8],
    stride: usize,
    component_type: u64,
    components: usize,
    normalized: bool,
    count: usize,
}

impl<'a> AccessorData<'a> {
    fn load(document: &Value, bin: &'a [u8], index: &Value) -> std::result::Result<Self, IoError> {
        let accessor = index
            .as_u64()
            .and_then(|i| document["accessors"].get(i as usize))
            .ok_or_else(|| malformed("accessor index out of range"))?;
        let view = accessor["bufferView"]
            .as_u64()
            .and_then(|i| document["bufferViews"].get(i as usize))
            .ok_or_else(|| malformed("accessor without a buffer view"))?;

        let component_type = accessor["componentType"].as_u64().unwrap_or(0);
        let component_size = match component_type {
            COMPONENT_U8 => 1,
            COMPONENT_U16 => 2,
            COMPONENT_U32 | COMPONENT_F32 => 4,
            other => return Err(malformed(format!("unsupported component type {}", other))),
        };
        let components = match accessor["type"].as_str() {
            Some("SCALAR") => 1,
            Some("VEC3") => 3,
            Some("VEC4") => 4,
            other => return Err(malformed(format!("unsupported accessor type {:?}", other))),
        };

        let element_size = component_size * components;
        let count = usize::try_from(accessor["count"].as_u64().unwrap_or(0))
            .map_err(|_| malformed("accessor count out of range"))?;
        let stride = match view["byteStride"].as_u64() {
            Some(s) => usize::try_from(s).map_err(|_| malformed("byte stride out of range"))?,
            None => element_size,
        };

        let too_large = || malformed("accessor range overflows");
        let start = view["byteOffset"]
            .as_u64()
            .unwrap_or(0)
            .checked_add(accessor["byteOffset"].as_u64().unwrap_or(0))
            .and_then(|s| usize::try_from(s).ok())
            .ok_or_else(too_large)?;
        let end = match count {
            0 => start,
            n => stride
                .checked_mul(n - 1)
                .and_then(|span| span.checked_add(element_size))
                .and_then(|span| span.checked_add(start))
                .ok_or_else(too_large)?,
        };
        let bytes = bin
            .get(start..end)
            .ok_or_else(|| malformed("accessor runs past the binary chunk"))?;

        Ok(Self {
            bytes,
            stride,
            component_type,
            components,
            normalized: accessor["normalized"].as_bool().unwrap_or(false),
            count,
        })
    }

    fn component(&self, element: usize, component: usize) -> f32 {
        let offset = element * self.stride;
        let b = &self.bytes[offset..];
        match self.component_type {
            COMPONENT_U8 => {
                let v = b[component] as f32;
                if self.normalized { v / 255.0 } else { v }
            }
            COMPONENT_U16 => {
                let i = component * 2;
                let v = u16::from_le_bytes([b[i], b[i + 1]]) as f32;
                if self.normalized { v / 65535.0 } else { v }
            }
            COMPONENT_U32 => {
                let i = component * 4;
                u32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]) as f32
            }
            _ => {
                let i = component * 4;
                f32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]])
            }
        }
    }

    /// Integer component, exact for index accessors
    fn index(&self, element: usize) -> usize {
        let b = &self.bytes[element * self.stride..];
        match self.component_type {
            COMPONENT_U8 => b[0] as usize,
            COMPONENT_U16 => u16::from_le_bytes([b[0], b[1]]) as usize,
            _ => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize,
        }
    }

    fn vec3s(&self) -> std::result::Result<Vec<[f32; 3]>, IoError> {
        if self.components < 3 {
            return Err(malformed("expected a vector accessor"));
        }
        Ok((0..self.count)
            .map(|i| [self.component(i, 0), self.component(i, 1), self.component(i, 2)])
            .collect())
    }
}

impl MeshReader for GlbReader {
    fn read_mesh<P: AsRef<Path>>(path: P) -> Result<TriangleMesh> {
        let bytes = std::fs::read(path)?;
        let (document, bin) = split_chunks(&bytes)?;

        let primitive = &document["meshes"][0]["primitives"][0];
        if primitive.is_null() {
            return Err(malformed("no mesh primitive").into());
        }
        let attributes = &primitive["attributes"];

        let positions = AccessorData::load(&document, bin, &attributes["POSITION"])?.vec3s()?;
        let vertices: Vec<Point3f> = positions
            .iter()
            .map(|p| Point3f::new(p[0], p[1], p[2]))
            .collect();

        let faces = if primitive["indices"].is_null() {
            (0..vertices.len() / 3).map(|i| [3 * i, 3 * i + 1, 3 * i + 2]).collect()
        } else {
            let indices = AccessorData::load(&document, bin, &primitive["indices"])?;
            let flat: Vec<usize> = (0..indices.count).map(|i| indices.index(i)).collect();
            if flat.iter().any(|&i| i >= vertices.len()) {
                return Err(malformed("index out of range").into());
            }
            flat.chunks_exact(3).map(|t| [t[0], t[1], t[2]]).collect()
        };

        let mut mesh = TriangleMesh::from_vertices_and_faces(vertices, faces);

        if !attributes["NORMAL"].is_null() {
            let normals = AccessorData::load(&document, bin, &attributes["NORMAL"])?.vec3s()?;
            mesh.set_normals(normals.iter().map(|n| Vector3f::new(n[0], n[1], n[2])).collect());
        }

        if !attributes["COLOR_0"].is_null() {
            let colors = AccessorData::load(&document, bin, &attributes["COLOR_0"])?.vec3s()?;
            let colors: Vec<Rgb8> = colors
                .iter()
                .map(|c| occmesh_core::rgb8_from_unit(c[0], c[1], c[2]))
                .collect();
            mesh.set_colors(colors);
        }

        Ok(mesh)
    }
}
