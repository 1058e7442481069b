//! Ray/triangle-mesh intersection queries.
//!
//! Triangle meshes are described by vertex and index [`Buffer`]s of a [`Geometry`],
//! geometries are attached to a [`Scene`], and after committing, the scene answers
//! closest-hit ([`Scene::intersect_1m`]) and any-hit ([`Scene::occluded_1m`]) queries
//! for whole batches of rays, optionally spread over several threads.

mod buffer;
mod context;
mod device;
mod error;
pub mod geometry;
mod mesh;
pub mod obj;
mod parallel;
mod rays;
mod scene;
mod util;

pub use buffer::{Buffer, BufferType, Format};
pub use context::{HitCandidate, IntersectContext, IntersectContextFlags};
pub use device::{Device, DeviceConfig, WorkerCount};
pub use error::{Error, Result};
pub use mesh::{Geometry, GeometryType};
pub use rays::{Hit, Hit1M, Ray, Ray1M, RayHit, RayHit1M};
pub use scene::{BvhStatistics, Scene, SceneState};
pub use util::Stats;

/// Geometry id reported for rays that didn't hit anything. Never assigned to a geometry.
pub const INVALID_GEOMETRY_ID: u32 = u32::MAX;
