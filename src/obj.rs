//! Loading triangle meshes from Wavefront OBJ files.

use std::{fs, path::Path};

use indexmap::IndexMap;
use log::{debug, warn};
use thiserror::Error;

use crate::{
    buffer::{BufferType, Format},
    device::Device,
    error::Result,
    mesh::{Geometry, GeometryType},
};

#[derive(Debug, Error)]
pub enum ObjOpenError {
    #[error("Failed to read file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse file: {0}")]
    ParseError(#[from] wavefront_obj::ParseError),
}

/// Triangle mesh as plain vertex and index arrays, ready to be copied into geometry buffers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjMesh {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
}

impl ObjMesh {
    pub fn open(p: impl AsRef<Path>) -> Result<ObjMesh, ObjOpenError> {
        let content = fs::read_to_string(p)?;
        Self::parse(content)
    }

    pub fn parse(content: impl AsRef<str>) -> Result<ObjMesh, ObjOpenError> {
        let parsed = wavefront_obj::obj::parse(content)?;
        Ok(Self::from_obj_set(parsed))
    }

    /// Collects triangles of all objects into a single mesh.
    /// Only vertex positions are used, other primitives than triangles are skipped.
    fn from_obj_set(obj: wavefront_obj::obj::ObjSet) -> ObjMesh {
        let mut mesh = ObjMesh::default();
        let mut skipped = 0usize;

        for o in obj.objects.into_iter() {
            // Maps vertex indices of this object to indices in the mesh, unused vertices are left out
            let mut vertex_map = IndexMap::new();
            let offset = mesh.vertices.len();

            for geometry in o.geometry {
                for shape in geometry.shapes {
                    let wavefront_obj::obj::Primitive::Triangle(a, b, c) = shape.primitive else {
                        skipped += 1;
                        continue;
                    };

                    let mut handle_vertex = |vtindex: (usize, Option<usize>, Option<usize>)| {
                        let entry = vertex_map.entry(vtindex.0);
                        let index = offset + entry.index();
                        *entry.or_insert(index as u32)
                    };

                    let triangle = [handle_vertex(a), handle_vertex(b), handle_vertex(c)];
                    mesh.indices.push(triangle);
                }
            }

            mesh.vertices.extend(vertex_map.keys().map(|i| {
                let vertex = &o.vertices[*i];
                [vertex.x as f32, vertex.y as f32, vertex.z as f32]
            }));
        }

        if skipped > 0 {
            warn!("Skipped {skipped} non-triangle primitives");
        }
        debug!(
            "Loaded OBJ mesh with {} vertices and {} triangles",
            mesh.vertices.len(),
            mesh.indices.len()
        );

        mesh
    }

    /// Creates a committed triangle geometry with the mesh data.
    pub fn to_geometry(&self, device: &Device) -> Result<Geometry> {
        let geometry = device.make_geometry(GeometryType::Triangle)?;
        geometry
            .set_new_buffer(
                BufferType::Vertex,
                0,
                Format::Float3,
                Format::Float3.element_size(),
                self.vertices.len(),
            )?
            .write(0, &self.vertices)?;
        geometry
            .set_new_buffer(
                BufferType::Index,
                0,
                Format::Uint3,
                Format::Uint3.element_size(),
                self.indices.len(),
            )?
            .write(0, &self.indices)?;
        geometry.commit()?;
        Ok(geometry)
    }
}
