use log::trace;

use super::{BuiltScene, Scene};
use crate::{
    INVALID_GEOMETRY_ID,
    context::IntersectContext,
    error::Result,
    geometry::{self, WorldPoint, WorldVector},
    parallel::for_each_work_item,
    rays::{Ray, Ray1M, RayChunk, RayHit, RayHit1M, RayHitChunk},
    scene::triangle_bvh::{LeafHit, StackCache, TraversalMode},
};

impl BuiltScene {
    #[allow(clippy::too_many_arguments)]
    fn trace(
        &self,
        context: &IntersectContext,
        org: [f32; 3],
        dir: [f32; 3],
        tnear: f32,
        tfar: f32,
        mask: u32,
        mode: TraversalMode,
        stack: &mut StackCache,
    ) -> Option<LeafHit> {
        let ray = geometry::Ray::new(WorldPoint::from(org), WorldVector::from(dir), tnear);
        if ray.is_degenerate() {
            return None;
        }

        self.bvh.traverse(&ray, tfar, mode, stack, |hit| {
            self.masks[hit.prim.geom_id as usize] & mask != 0 && context.accepts(hit)
        })
    }

    fn intersect_chunk(
        &self,
        context: &IntersectContext,
        chunk: RayHitChunk<'_>,
        stack: &mut StackCache,
    ) {
        let RayHitChunk {
            ray,
            ng,
            u,
            v,
            prim_id,
            geom_id,
        } = chunk;

        for i in 0..ray.org.len() {
            let hit = self.trace(
                context,
                ray.org[i],
                ray.dir[i],
                ray.tnear[i],
                ray.tfar[i],
                ray.mask[i],
                TraversalMode::Closest,
                stack,
            );

            match hit {
                Some(hit) => {
                    ray.tfar[i] = hit.t;
                    ng[i] = hit.geometric_normal.into();
                    u[i] = hit.uv.u;
                    v[i] = hit.uv.v;
                    prim_id[i] = hit.prim.prim_id;
                    geom_id[i] = hit.prim.geom_id;
                }
                None => geom_id[i] = INVALID_GEOMETRY_ID,
            }
        }
    }

    fn occluded_chunk(
        &self,
        context: &IntersectContext,
        chunk: RayChunk<'_>,
        stack: &mut StackCache,
    ) {
        for i in 0..chunk.org.len() {
            let hit = self.trace(
                context,
                chunk.org[i],
                chunk.dir[i],
                chunk.tnear[i],
                chunk.tfar[i],
                chunk.mask[i],
                TraversalMode::Any,
                stack,
            );

            if hit.is_some() {
                chunk.tfar[i] = f32::NEG_INFINITY;
            }
        }
    }
}

impl Scene {
    fn chunk_size(&self) -> usize {
        self.device.config().chunk_size.get()
    }

    fn worker_count(&self) -> usize {
        self.device.config().worker_count.get()
    }

    /// Finds the closest hit of every ray in the batch.
    ///
    /// Hit rays get their hit record filled and `tfar` set to the hit distance,
    /// missed rays get `geom_id` set to [`INVALID_GEOMETRY_ID`] and keep the rest untouched.
    pub fn intersect_1m(&self, context: &IntersectContext, rays: &mut RayHit1M) -> Result<()> {
        let built = self.built()?;
        let ray_count = rays.validate()?;

        let chunks: Vec<_> = rays.chunks_mut(self.chunk_size()).collect();
        trace!(
            "intersect_1m: {} rays in {} chunks on up to {} workers ({:?})",
            ray_count,
            chunks.len(),
            self.worker_count(),
            context.flags()
        );

        for_each_work_item(chunks, self.worker_count(), |chunk, stack| {
            built.intersect_chunk(context, chunk, stack)
        })
    }

    /// Checks whether rays of the batch hit anything.
    ///
    /// Occluded rays get `tfar` set to negative infinity, the rest stay untouched.
    pub fn occluded_1m(&self, context: &IntersectContext, rays: &mut Ray1M) -> Result<()> {
        let built = self.built()?;
        let ray_count = rays.validate()?;

        let chunks: Vec<_> = rays.chunks_mut(self.chunk_size()).collect();
        trace!(
            "occluded_1m: {} rays in {} chunks on up to {} workers ({:?})",
            ray_count,
            chunks.len(),
            self.worker_count(),
            context.flags()
        );

        for_each_work_item(chunks, self.worker_count(), |chunk, stack| {
            built.occluded_chunk(context, chunk, stack)
        })
    }

    /// Single ray version of [`Scene::intersect_1m`]
    pub fn intersect_1(&self, context: &IntersectContext, ray_hit: &mut RayHit) -> Result<()> {
        let built = self.built()?;
        let ray = &mut ray_hit.ray;
        let hit = built.trace(
            context,
            ray.org,
            ray.dir,
            ray.tnear,
            ray.tfar,
            ray.mask,
            TraversalMode::Closest,
            &mut StackCache::default(),
        );

        match hit {
            Some(hit) => {
                ray.tfar = hit.t;
                ray_hit.hit.ng = hit.geometric_normal.into();
                ray_hit.hit.u = hit.uv.u;
                ray_hit.hit.v = hit.uv.v;
                ray_hit.hit.prim_id = hit.prim.prim_id;
                ray_hit.hit.geom_id = hit.prim.geom_id;
            }
            None => ray_hit.hit.geom_id = INVALID_GEOMETRY_ID,
        }
        Ok(())
    }

    /// Single ray version of [`Scene::occluded_1m`]
    pub fn occluded_1(&self, context: &IntersectContext, ray: &mut Ray) -> Result<()> {
        let built = self.built()?;
        let hit = built.trace(
            context,
            ray.org,
            ray.dir,
            ray.tnear,
            ray.tfar,
            ray.mask,
            TraversalMode::Any,
            &mut StackCache::default(),
        );

        if hit.is_some() {
            ray.tfar = f32::NEG_INFINITY;
        }
        Ok(())
    }
}
