#![allow(dead_code)]

use std::collections::HashMap;

use assert2::assert;
use nalgebra::{Point3, Vector3};
use rayquery::{BufferType, Device, Format, Geometry, GeometryType, Scene};

/// Triangulated sphere: icosahedron with every face split into four `subdivisions` times,
/// vertices projected onto the sphere.
#[derive(Clone, Debug)]
pub struct Icosphere {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
}

impl Icosphere {
    pub fn new(radius: f32, subdivisions: u32) -> Icosphere {
        let phi = (1.0 + 5.0f32.sqrt()) / 2.0;
        let mut vertices: Vec<Vector3<f32>> = [
            [-1.0, phi, 0.0],
            [1.0, phi, 0.0],
            [-1.0, -phi, 0.0],
            [1.0, -phi, 0.0],
            [0.0, -1.0, phi],
            [0.0, 1.0, phi],
            [0.0, -1.0, -phi],
            [0.0, 1.0, -phi],
            [phi, 0.0, -1.0],
            [phi, 0.0, 1.0],
            [-phi, 0.0, -1.0],
            [-phi, 0.0, 1.0],
        ]
        .into_iter()
        .map(|v| Vector3::from(v).normalize())
        .collect();

        let mut indices: Vec<[u32; 3]> = vec![
            [0, 11, 5],
            [0, 5, 1],
            [0, 1, 7],
            [0, 7, 10],
            [0, 10, 11],
            [1, 5, 9],
            [5, 11, 4],
            [11, 10, 2],
            [10, 7, 6],
            [7, 1, 8],
            [3, 9, 4],
            [3, 4, 2],
            [3, 2, 6],
            [3, 6, 8],
            [3, 8, 9],
            [4, 9, 5],
            [2, 4, 11],
            [6, 2, 10],
            [8, 6, 7],
            [9, 8, 1],
        ];

        for _ in 0..subdivisions {
            let mut midpoints = HashMap::new();
            let mut midpoint = |a: u32, b: u32| {
                *midpoints.entry((a.min(b), a.max(b))).or_insert_with(|| {
                    let m = (vertices[a as usize] + vertices[b as usize]).normalize();
                    vertices.push(m);
                    (vertices.len() - 1) as u32
                })
            };

            indices = indices
                .iter()
                .flat_map(|&[a, b, c]| {
                    let ab = midpoint(a, b);
                    let bc = midpoint(b, c);
                    let ca = midpoint(c, a);
                    [[a, ab, ca], [b, bc, ab], [c, ca, bc], [ab, bc, ca]]
                })
                .collect();
        }

        Icosphere {
            vertices: vertices.iter().map(|v| (v * radius).into()).collect(),
            indices,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn centroid(&self, prim_id: usize) -> Point3<f32> {
        let sum: Vector3<f32> = self.indices[prim_id]
            .iter()
            .map(|i| Vector3::from(self.vertices[*i as usize]))
            .sum();
        Point3::from(sum / 3.0)
    }

    pub fn centroids(&self) -> Vec<Point3<f32>> {
        (0..self.triangle_count()).map(|i| self.centroid(i)).collect()
    }

    pub fn normal(&self, prim_id: usize) -> Vector3<f32> {
        let [a, b, c] = self.indices[prim_id].map(|i| Point3::from(self.vertices[i as usize]));
        (b - a).cross(&(c - a))
    }

    /// Creates a committed geometry with the sphere.
    pub fn to_geometry(&self, device: &Device) -> Geometry {
        let geometry = device.make_geometry(GeometryType::Triangle).unwrap();
        geometry
            .set_new_buffer(BufferType::Vertex, 0, Format::Float3, 12, self.vertices.len())
            .unwrap()
            .write(0, &self.vertices)
            .unwrap();
        geometry
            .set_new_buffer(BufferType::Index, 0, Format::Uint3, 12, self.indices.len())
            .unwrap()
            .write(0, &self.indices)
            .unwrap();
        geometry.commit().unwrap();
        geometry
    }

    /// Creates a committed scene with just the sphere, as geometry 0.
    pub fn to_scene(&self, device: &Device) -> Scene {
        let mut scene = device.make_scene().unwrap();
        let id = scene.attach_geometry(&self.to_geometry(device)).unwrap();
        assert!(id == 0);
        scene.commit().unwrap();
        scene
    }
}
