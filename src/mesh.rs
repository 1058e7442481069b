use std::sync::{Arc, Mutex, PoisonError, RwLock};

use indexmap::IndexMap;
use log::debug;

use crate::{
    buffer::{Buffer, BufferLayout, BufferStorage, BufferType, Format},
    device::DeviceShared,
    error::{Error, Result},
    geometry::{Triangle, WorldPoint},
};

#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GeometryType {
    /// Triangle mesh with a `Float3` vertex buffer and a `Uint3` index buffer
    Triangle,
}

impl GeometryType {
    /// Format a buffer of the given type must have, None if any format is accepted.
    fn expected_format(self, buffer_type: BufferType) -> Option<Format> {
        match (self, buffer_type) {
            (GeometryType::Triangle, BufferType::Vertex) => Some(Format::Float3),
            (GeometryType::Triangle, BufferType::Index) => Some(Format::Uint3),
            (GeometryType::Triangle, BufferType::VertexAttribute) => None,
        }
    }
}

/// Mesh data of a geometry, frozen at commit time.
#[derive(Clone, Debug)]
pub(crate) struct MeshSnapshot {
    pub vertices: Vec<WorldPoint>,
    pub indices: Vec<[u32; 3]>,
    pub mask: u32,
}

impl MeshSnapshot {
    pub fn triangle(&self, prim_id: usize) -> Triangle<WorldPoint> {
        let [a, b, c] = self.indices[prim_id];
        Triangle::new(
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        )
    }
}

/// Latest committed state of a geometry.
#[derive(Clone, Debug)]
pub(crate) struct CommittedMesh {
    /// Increases with every commit of the geometry
    pub generation: u64,
    pub mesh: Arc<MeshSnapshot>,
}

#[derive(Debug)]
struct GeometryState {
    buffers: IndexMap<(BufferType, u32), (BufferLayout, Arc<BufferStorage>)>,
    mask: u32,
    committed: Option<CommittedMesh>,
}

#[derive(Debug)]
pub(crate) struct GeometryShared {
    device: Arc<DeviceShared>,
    geometry_type: GeometryType,
    state: Mutex<GeometryState>,
}

impl GeometryShared {
    pub fn committed(&self) -> Option<CommittedMesh> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .committed
            .clone()
    }
}

/// A triangle mesh that can be attached to scenes.
///
/// Buffers are created through the geometry and filled through the returned [`Buffer`] handles.
/// Nothing is visible to scenes until [`Geometry::commit`] is called, committing takes
/// a snapshot of the current buffer contents.
#[derive(Debug)]
pub struct Geometry {
    shared: Arc<GeometryShared>,
}

impl Geometry {
    pub(crate) fn new(device: Arc<DeviceShared>, geometry_type: GeometryType) -> Geometry {
        Geometry {
            shared: Arc::new(GeometryShared {
                device,
                geometry_type,
                state: Mutex::new(GeometryState {
                    buffers: IndexMap::new(),
                    mask: u32::MAX,
                    committed: None,
                }),
            }),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<GeometryShared> {
        &self.shared
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, GeometryState>> {
        self.shared.device.ensure_alive("Geometry")?;
        Ok(self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.shared.geometry_type
    }

    /// Creates a zero filled buffer in the given slot, replacing any buffer that was there before.
    /// Handles to the replaced buffer stop working.
    pub fn set_new_buffer(
        &self,
        buffer_type: BufferType,
        slot: u32,
        format: Format,
        byte_stride: usize,
        item_count: usize,
    ) -> Result<Buffer> {
        let layout = BufferLayout::new(buffer_type, slot, format, byte_stride, item_count)?;
        match self.geometry_type().expected_format(buffer_type) {
            Some(expected) if expected != format => {
                return Err(Error::InvalidLayoutError(format!(
                    "{:?} buffer of {:?} geometry must be {expected:?}, got {format:?}",
                    buffer_type,
                    self.geometry_type()
                )));
            }
            _ => {}
        }

        let mut state = self.lock_state()?;
        let storage = Arc::new(RwLock::new(vec![0u32; layout.storage_words()]));
        state
            .buffers
            .insert((buffer_type, slot), (layout, Arc::clone(&storage)));

        Ok(Buffer::new(
            layout,
            &storage,
            Arc::clone(&self.shared.device),
        ))
    }

    /// Returns a handle to an existing buffer.
    pub fn buffer(&self, buffer_type: BufferType, slot: u32) -> Option<Buffer> {
        let state = self.lock_state().ok()?;
        let (layout, storage) = state.buffers.get(&(buffer_type, slot))?;
        Some(Buffer::new(
            *layout,
            storage,
            Arc::clone(&self.shared.device),
        ))
    }

    /// Sets the mask matched against ray masks. Applies from the next commit.
    pub fn set_mask(&self, mask: u32) -> Result<()> {
        self.lock_state()?.mask = mask;
        Ok(())
    }

    pub fn is_committed(&self) -> bool {
        self.shared.committed().is_some()
    }

    /// Validates the buffers and takes a snapshot of the mesh for use by scenes.
    /// Scenes the geometry is attached to pick up the change on their next commit.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.lock_state()?;

        let vertices: Vec<[f32; 3]> = read_buffer(&state, BufferType::Vertex)?;
        let indices: Vec<[u32; 3]> = read_buffer(&state, BufferType::Index)?;

        if let Some(&index) = indices.iter().flatten().find(|i| **i as usize >= vertices.len()) {
            return Err(Error::IndexError {
                index: index as usize,
                len: vertices.len(),
            });
        }

        let mask = state.mask;
        let generation = state
            .committed
            .as_ref()
            .map_or(0, |committed| committed.generation + 1);

        debug!(
            "Committed geometry with {} vertices and {} triangles (generation {})",
            vertices.len(),
            indices.len(),
            generation
        );

        state.committed = Some(CommittedMesh {
            generation,
            mesh: Arc::new(MeshSnapshot {
                vertices: vertices.into_iter().map(WorldPoint::from).collect(),
                indices,
                mask,
            }),
        });

        Ok(())
    }

    /// Drops the handle. Scenes the geometry is attached to keep using it.
    pub fn release(self) {}
}

/// Reads the whole buffer at slot 0 of the given type, fails if it doesn't exist.
fn read_buffer<T: bytemuck::Pod>(state: &GeometryState, buffer_type: BufferType) -> Result<Vec<T>> {
    let (layout, storage) = state
        .buffers
        .get(&(buffer_type, 0))
        .ok_or(Error::IncompleteGeometryError(buffer_type))?;
    let words = storage.read().unwrap_or_else(PoisonError::into_inner);
    Ok(layout.read_items(&words, 0, layout.len))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device::Device;

    use assert2::{assert, let_assert};

    fn make_geometry(device: &Device) -> Geometry {
        device.make_geometry(GeometryType::Triangle).unwrap()
    }

    fn fill(geometry: &Geometry, vertices: &[[f32; 3]], indices: &[[u32; 3]]) {
        geometry
            .set_new_buffer(BufferType::Vertex, 0, Format::Float3, 12, vertices.len())
            .unwrap()
            .write(0, vertices)
            .unwrap();
        geometry
            .set_new_buffer(BufferType::Index, 0, Format::Uint3, 12, indices.len())
            .unwrap()
            .write(0, indices)
            .unwrap();
    }

    const VERTICES: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

    #[test]
    fn commit_takes_snapshot() {
        let device = Device::new().unwrap();
        let geometry = make_geometry(&device);
        fill(&geometry, &VERTICES, &[[0, 1, 2]]);
        assert!(!geometry.is_committed());

        geometry.commit().unwrap();
        let_assert!(Some(committed) = geometry.shared().committed());
        assert!(committed.generation == 0);
        assert!(committed.mesh.triangle(0)[1] == WorldPoint::new(1.0, 0.0, 0.0));
        assert!(committed.mesh.mask == u32::MAX);

        // Later writes only show up after the next commit
        let vertices = geometry.buffer(BufferType::Vertex, 0).unwrap();
        vertices.write(1, &[[2.0f32, 0.0, 0.0]]).unwrap();
        assert!(geometry.shared().committed().unwrap().mesh.vertices[1].x == 1.0);

        geometry.set_mask(0b10).unwrap();
        geometry.commit().unwrap();
        let committed = geometry.shared().committed().unwrap();
        assert!(committed.generation == 1);
        assert!(committed.mesh.vertices[1].x == 2.0);
        assert!(committed.mesh.mask == 0b10);
    }

    #[test]
    fn commit_without_index_buffer() {
        let device = Device::new().unwrap();
        let geometry = make_geometry(&device);
        geometry
            .set_new_buffer(BufferType::Vertex, 0, Format::Float3, 12, 3)
            .unwrap();
        let_assert!(
            Err(Error::IncompleteGeometryError(BufferType::Index)) = geometry.commit()
        );
        assert!(!geometry.is_committed());
    }

    #[test]
    fn commit_with_index_out_of_range() {
        let device = Device::new().unwrap();
        let geometry = make_geometry(&device);
        fill(&geometry, &VERTICES, &[[0, 1, 3]]);
        let_assert!(Err(Error::IndexError { index: 3, len: 3 }) = geometry.commit());
        assert!(!geometry.is_committed());
    }

    #[test]
    fn oversized_buffer() {
        let device = Device::new().unwrap();
        let geometry = make_geometry(&device);
        let_assert!(
            Err(Error::InvalidLayoutError(_)) = geometry.set_new_buffer(
                BufferType::Vertex,
                0,
                Format::Float3,
                12,
                usize::MAX / 3 + 2
            )
        );
        assert!(geometry.buffer(BufferType::Vertex, 0).is_none());
    }

    #[test]
    fn wrong_buffer_format() {
        let device = Device::new().unwrap();
        let geometry = make_geometry(&device);
        let_assert!(
            Err(Error::InvalidLayoutError(_)) =
                geometry.set_new_buffer(BufferType::Vertex, 0, Format::Float4, 16, 3)
        );
        let_assert!(
            Err(Error::InvalidLayoutError(_)) =
                geometry.set_new_buffer(BufferType::Index, 0, Format::Float3, 12, 1)
        );
        let_assert!(
            Ok(_) = geometry.set_new_buffer(BufferType::VertexAttribute, 0, Format::Float2, 8, 3)
        );
    }

    #[test]
    fn replaced_buffer_handle_stops_working() {
        let device = Device::new().unwrap();
        let geometry = make_geometry(&device);
        let old = geometry
            .set_new_buffer(BufferType::Vertex, 0, Format::Float3, 12, 3)
            .unwrap();
        let new = geometry
            .set_new_buffer(BufferType::Vertex, 0, Format::Float3, 16, 4)
            .unwrap();

        let_assert!(Err(Error::UseAfterRelease(_)) = old.write(0, &VERTICES));
        let_assert!(Ok(()) = new.write(0, &VERTICES));
        assert!(geometry.buffer(BufferType::Vertex, 0).unwrap().len() == 4);
        assert!(geometry.buffer(BufferType::Index, 0).is_none());
    }

    #[test]
    fn released_geometry_invalidates_buffers() {
        let device = Device::new().unwrap();
        let geometry = make_geometry(&device);
        let buffer = geometry
            .set_new_buffer(BufferType::Vertex, 0, Format::Float3, 12, 3)
            .unwrap();
        geometry.release();
        let_assert!(Err(Error::UseAfterRelease(_)) = buffer.write(0, &VERTICES));
    }

    #[test]
    fn released_device_invalidates_geometry() {
        let device = Device::new().unwrap();
        let geometry = make_geometry(&device);
        let buffer = geometry
            .set_new_buffer(BufferType::Vertex, 0, Format::Float3, 12, 3)
            .unwrap();
        device.release();
        let_assert!(Err(Error::UseAfterRelease(_)) = geometry.commit());
        let_assert!(Err(Error::UseAfterRelease(_)) = geometry.set_mask(1));
        let_assert!(Err(Error::UseAfterRelease(_)) = buffer.read::<[f32; 3]>(0, 1));
    }
}
