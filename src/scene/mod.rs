mod query;
pub(crate) mod triangle_bvh;

use std::{io, sync::Arc, time::Instant};

use log::{Level, debug, log_enabled};

use crate::{
    device::DeviceShared,
    error::{Error, Result},
    geometry::WorldBox,
    mesh::{Geometry, GeometryShared},
};

pub use triangle_bvh::BvhStatistics;
use triangle_bvh::{BuildTriangle, PrimRef, TriangleBvh};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SceneState {
    /// Never committed
    Uncommitted,
    Committed,
    /// Geometries were attached or detached since the last commit
    Stale,
}

/// Acceleration structure of a committed scene, with the per-geometry data queries need.
#[derive(Debug)]
struct BuiltScene {
    bvh: TriangleBvh,
    /// Geometry masks indexed by geometry id, zero for free slots
    masks: Vec<u32>,
    /// Commit generations of the geometries used, indexed by geometry id
    generations: Vec<Option<u64>>,
}

/// Collection of geometries that rays are traced against.
///
/// Geometries are attached and detached with `&mut self`, then the scene must be committed
/// before querying. Queries take `&self` and may run concurrently.
#[derive(Debug)]
pub struct Scene {
    device: Arc<DeviceShared>,
    /// Indexed by geometry id, detached slots stay empty
    geometries: Vec<Option<Arc<GeometryShared>>>,
    state: SceneState,
    built: Option<BuiltScene>,
}

impl Scene {
    pub(crate) fn new(device: Arc<DeviceShared>) -> Scene {
        Scene {
            device,
            geometries: Vec::new(),
            state: SceneState::Uncommitted,
            built: None,
        }
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    /// Number of currently attached geometries
    pub fn geometry_count(&self) -> usize {
        self.geometries.iter().flatten().count()
    }

    /// Attaches a committed geometry and returns its id.
    /// Ids are assigned in increasing order and never reused within a scene.
    pub fn attach_geometry(&mut self, geometry: &Geometry) -> Result<u32> {
        self.device.ensure_alive("Scene")?;
        if !geometry.is_committed() {
            return Err(Error::NotCommittedError("Geometry"));
        }

        let id = self.geometries.len();
        // The last id is reserved for INVALID_GEOMETRY_ID
        let id = u32::try_from(id)
            .ok()
            .filter(|id| *id != crate::INVALID_GEOMETRY_ID)
            .ok_or(Error::IndexError {
                index: id,
                len: crate::INVALID_GEOMETRY_ID as usize,
            })?;

        self.geometries.push(Some(Arc::clone(geometry.shared())));
        self.mark_stale();
        Ok(id)
    }

    pub fn detach_geometry(&mut self, geom_id: u32) -> Result<()> {
        self.device.ensure_alive("Scene")?;
        let len = self.geometries.len();
        let slot = self
            .geometries
            .get_mut(geom_id as usize)
            .filter(|slot| slot.is_some())
            .ok_or(Error::IndexError {
                index: geom_id as usize,
                len,
            })?;
        *slot = None;
        self.mark_stale();
        Ok(())
    }

    fn mark_stale(&mut self) {
        if self.state == SceneState::Committed {
            self.state = SceneState::Stale;
        }
    }

    /// Builds the acceleration structure from the latest committed state of every attached geometry.
    /// Does nothing if neither the attached geometries nor their commits changed since the last commit.
    pub fn commit(&mut self) -> Result<()> {
        self.device.ensure_alive("Scene")?;

        let committed: Vec<_> = self
            .geometries
            .iter()
            .map(|slot| slot.as_ref().and_then(|geometry| geometry.committed()))
            .collect();
        let generations: Vec<_> = committed
            .iter()
            .map(|c| c.as_ref().map(|c| c.generation))
            .collect();

        if self.state == SceneState::Committed
            && self
                .built
                .as_ref()
                .is_some_and(|built| built.generations == generations)
        {
            debug!("Scene unchanged since the last commit");
            return Ok(());
        }

        let start = Instant::now();

        let triangles: Vec<_> = committed
            .iter()
            .enumerate()
            .filter_map(|(geom_id, c)| c.as_ref().map(|c| (geom_id as u32, &c.mesh)))
            .flat_map(|(geom_id, mesh)| {
                (0..mesh.indices.len()).map(move |prim_id| BuildTriangle {
                    vertices: mesh.triangle(prim_id),
                    prim: PrimRef {
                        geom_id,
                        prim_id: prim_id as u32,
                    },
                })
            })
            .collect();
        let bvh = TriangleBvh::build(triangles);

        debug!(
            "Built scene with {} triangles from {} geometries in {:?}",
            bvh.triangle_count(),
            self.geometry_count(),
            start.elapsed()
        );
        if log_enabled!(Level::Debug) {
            debug!("BVH statistics:\n{}", bvh.statistics());
        }

        self.built = Some(BuiltScene {
            bvh,
            masks: committed
                .iter()
                .map(|c| c.as_ref().map_or(0, |c| c.mesh.mask))
                .collect(),
            generations,
        });
        self.state = SceneState::Committed;
        Ok(())
    }

    /// Returns the acceleration structure if the scene is committed and up to date.
    fn built(&self) -> Result<&BuiltScene> {
        self.device.ensure_alive("Scene")?;
        match (&self.built, self.state) {
            (Some(built), SceneState::Committed) => Ok(built),
            _ => Err(Error::NotCommittedError("Scene")),
        }
    }

    /// Bounding box of all triangles, None for an empty scene.
    pub fn bounds(&self) -> Result<Option<WorldBox>> {
        Ok(self.built()?.bvh.bounding_box().cloned())
    }

    pub fn statistics(&self) -> Result<BvhStatistics> {
        Ok(self.built()?.bvh.statistics())
    }

    /// Writes a dump of the acceleration structure, for debugging.
    pub fn write_tree(&self, out: &mut impl io::Write) -> io::Result<()> {
        match self.built() {
            Ok(built) => built.bvh.write_tree(out),
            Err(e) => writeln!(out, "<{e}>"),
        }
    }
}
