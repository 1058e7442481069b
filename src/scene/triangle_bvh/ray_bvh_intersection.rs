use arrayvec::ArrayVec;
use assert2::debug_assert;
use simba::simd::{SimdPartialOrd as _, SimdValue};

use super::{
    CompressedNodeLink, INNER_NODE_CHILDREN, InnerNode, NodeLink, PrimRef, TriangleBvh,
    TrianglePackIdxRange,
};
use crate::{
    geometry::{
        BarycentricCoordinates, FloatType, Ray, RayIntersectionExt as _, SimdFloatType,
        WorldVector,
    },
    util::{bit_iter, simba::mask_bits},
};

/// Reusable traversal stack, one per thread issuing queries.
#[derive(Clone, Default)]
#[repr(transparent)]
pub struct StackCache {
    stack: Vec<(CompressedNodeLink, FloatType)>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraversalMode {
    /// Find the closest hit
    Closest,
    /// Stop at the first hit found
    Any,
}

/// Intersection of a ray with a single triangle of the BVH.
#[derive(Clone, Debug)]
pub struct LeafHit {
    pub t: FloatType,
    pub uv: BarycentricCoordinates<FloatType>,
    /// Not normalized
    pub geometric_normal: WorldVector,
    pub prim: PrimRef,
}

impl TriangleBvh {
    /// Finds a hit along the ray with distance in `[ray.near, max_t)`.
    /// Every candidate hit is passed to `filter` first, rejected candidates are ignored.
    pub fn traverse(
        &self,
        ray: &Ray,
        max_t: FloatType,
        mode: TraversalMode,
        stack: &mut StackCache,
        mut filter: impl FnMut(&LeafHit) -> bool,
    ) -> Option<LeafHit> {
        debug_assert!(stack.stack.is_empty());

        // Also catches NaNs
        if self.root.is_null() || !(ray.near < max_t) {
            return None;
        }

        stack.stack.push((self.root, ray.near));

        let mut best: Option<LeafHit> = None;
        let mut best_t = max_t;

        while let Some((link, node_t1)) = stack.stack.pop() {
            if node_t1 > best_t {
                // If the node's minimum intersection distance is further away than the best
                // hit found so far, the node can't do any good any more and we can skip it.
                continue;
            }

            match link.decode() {
                NodeLink::Null => continue,
                NodeLink::Inner { index } => {
                    let node = &self.inner_nodes[index];
                    let mut children: ArrayVec<_, INNER_NODE_CHILDREN> =
                        node.intersect(ray, best_t).collect();
                    // Nearest child goes on the top of the stack, it has the best chance
                    // of shrinking best_t
                    children.sort_unstable_by(|a, b| b.0.total_cmp(&a.0));
                    stack
                        .stack
                        .extend(children.into_iter().map(|(t1, link)| (link, t1)));
                }
                NodeLink::Leaf { indices } => {
                    let found = self.intersect_triangles(
                        indices,
                        ray,
                        &mut best_t,
                        &mut best,
                        mode,
                        &mut filter,
                    );

                    if found && mode == TraversalMode::Any {
                        stack.stack.clear();
                        break;
                    }
                }
            }
        }

        best
    }

    /// Tests all triangle packs of a leaf, updating the best hit.
    /// Returns true if any hit was accepted.
    fn intersect_triangles(
        &self,
        triangle_indices: TrianglePackIdxRange,
        ray: &Ray,
        best_t: &mut FloatType,
        best: &mut Option<LeafHit>,
        mode: TraversalMode,
        filter: &mut impl FnMut(&LeafHit) -> bool,
    ) -> bool {
        let near = SimdFloatType::splat(ray.near);
        let mut found = false;

        for (j, triangles) in triangle_indices
            .iter()
            .zip(self.triangle_geometry[triangle_indices.into_range()].iter())
        {
            let (mask, t, uv) = triangles.intersect(ray);

            let mask =
                mask & t.simd_ge(near) & t.simd_lt(SimdFloatType::splat(*best_t));

            for i in bit_iter(mask_bits(mask)) {
                let t = t.extract(i);
                if t >= *best_t {
                    // A closer hit was found in an earlier lane of this pack
                    continue;
                }

                let prim = self.triangle_refs[j.to_triangle_idx(i)];
                debug_assert!(prim.is_valid(), "Padding triangles must never be hit");

                let hit = LeafHit {
                    t,
                    uv: uv.extract(i),
                    geometric_normal: triangles.extract(i).normal(),
                    prim,
                };
                if !filter(&hit) {
                    continue;
                }

                *best_t = t;
                *best = Some(hit);
                found = true;

                if mode == TraversalMode::Any {
                    return true;
                }
            }
        }

        found
    }
}

impl InnerNode {
    /// Intersect this inner node with a ray.
    /// Returns an iterator of intersecting children: (t1, link to the child).
    /// t1 is the distance along the ray where the child box is entered, clamped to the ray's
    /// near distance. Only children with nonempty intersection within [ray.near, max_t] are returned.
    fn intersect(
        &self,
        ray: &Ray,
        max_t: FloatType,
    ) -> impl Iterator<Item = (FloatType, CompressedNodeLink)> {
        let (t1, t2) = self.child_bounds.intersect(ray);
        let t1 = t1.simd_max(SimdFloatType::splat(ray.near));
        let t2 = t2.simd_min(SimdFloatType::splat(max_t));
        let mask = mask_bits(t1.simd_le(t2));

        bit_iter(mask)
            .map(move |i| (t1.extract(i), self.child_links[i]))
            .filter(|(_, link)| !link.is_null())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        geometry::{Triangle, WorldPoint},
        scene::triangle_bvh::BuildTriangle,
    };

    use assert2::{assert, let_assert};
    use test_case::test_case;

    /// Grid of parallel unit squares (two triangles each) stacked along the z axis at z = 0, 1, 2, ...
    /// Triangle 2k and 2k+1 form the square at z = k.
    fn square_stack(count: u32) -> TriangleBvh {
        let triangles = (0..count)
            .flat_map(|k| {
                let z = k as f32;
                let a = WorldPoint::new(0.0, 0.0, z);
                let b = WorldPoint::new(1.0, 0.0, z);
                let c = WorldPoint::new(1.0, 1.0, z);
                let d = WorldPoint::new(0.0, 1.0, z);
                [
                    BuildTriangle {
                        vertices: Triangle::new(a, b, c),
                        prim: PrimRef {
                            geom_id: 0,
                            prim_id: 2 * k,
                        },
                    },
                    BuildTriangle {
                        vertices: Triangle::new(a, c, d),
                        prim: PrimRef {
                            geom_id: 0,
                            prim_id: 2 * k + 1,
                        },
                    },
                ]
            })
            .collect();
        TriangleBvh::build(triangles)
    }

    fn shoot(bvh: &TriangleBvh, ray: &Ray, max_t: f32, mode: TraversalMode) -> Option<LeafHit> {
        let mut stack = StackCache::default();
        let hit = bvh.traverse(ray, max_t, mode, &mut stack, |_| true);
        assert!(stack.stack.is_empty());
        hit
    }

    #[test_case(3 ; "single_leaf")]
    #[test_case(100 ; "inner_nodes")]
    fn closest_hit_is_first_square(count: u32) {
        let bvh = square_stack(count);
        let ray = Ray::new(
            WorldPoint::new(0.75, 0.25, -1.0),
            WorldVector::new(0.0, 0.0, 1.0),
            0.0,
        );
        let_assert!(Some(hit) = shoot(&bvh, &ray, f32::INFINITY, TraversalMode::Closest));
        assert!(hit.prim == PrimRef { geom_id: 0, prim_id: 0 });
        assert!((hit.t - 1.0).abs() < 1e-6);
    }

    #[test_case(3 ; "single_leaf")]
    #[test_case(100 ; "inner_nodes")]
    fn closest_hit_from_the_other_side(count: u32) {
        let bvh = square_stack(count);
        let ray = Ray::new(
            WorldPoint::new(0.25, 0.75, count as f32 + 1.0),
            WorldVector::new(0.0, 0.0, -1.0),
            0.0,
        );
        let_assert!(Some(hit) = shoot(&bvh, &ray, f32::INFINITY, TraversalMode::Closest));
        assert!(hit.prim.prim_id == 2 * (count - 1) + 1);
        assert!((hit.t - 2.0).abs() < 1e-6);
    }

    #[test]
    fn near_distance_skips_hits() {
        let bvh = square_stack(10);
        let ray = Ray::new(
            WorldPoint::new(0.75, 0.25, 0.0),
            WorldVector::new(0.0, 0.0, 1.0),
            2.5,
        );
        let_assert!(Some(hit) = shoot(&bvh, &ray, f32::INFINITY, TraversalMode::Closest));
        assert!(hit.prim.prim_id == 6);
        assert!((hit.t - 3.0).abs() < 1e-6);
    }

    #[test]
    fn far_distance_is_exclusive() {
        let bvh = square_stack(10);
        let ray = Ray::new(
            WorldPoint::new(0.75, 0.25, -1.0),
            WorldVector::new(0.0, 0.0, 1.0),
            0.0,
        );
        assert!(shoot(&bvh, &ray, 1.0, TraversalMode::Closest).is_none());
        assert!(shoot(&bvh, &ray, 1.5, TraversalMode::Closest).is_some());
    }

    #[test]
    fn inverted_range_misses() {
        let bvh = square_stack(10);
        let ray = Ray::new(
            WorldPoint::new(0.75, 0.25, -1.0),
            WorldVector::new(0.0, 0.0, 1.0),
            5.0,
        );
        assert!(shoot(&bvh, &ray, 4.0, TraversalMode::Closest).is_none());
    }

    #[test]
    fn miss_beside_the_stack() {
        let bvh = square_stack(100);
        let ray = Ray::new(
            WorldPoint::new(1.5, 0.5, -1.0),
            WorldVector::new(0.0, 0.0, 1.0),
            0.0,
        );
        assert!(shoot(&bvh, &ray, f32::INFINITY, TraversalMode::Closest).is_none());
        assert!(shoot(&bvh, &ray, f32::INFINITY, TraversalMode::Any).is_none());
    }

    #[test]
    fn any_hit_is_within_range() {
        let bvh = square_stack(100);
        let ray = Ray::new(
            WorldPoint::new(0.75, 0.25, -1.0),
            WorldVector::new(0.0, 0.0, 1.0),
            0.0,
        );
        let_assert!(Some(hit) = shoot(&bvh, &ray, f32::INFINITY, TraversalMode::Any));
        assert!(hit.t >= 1.0);
        assert!(hit.t <= 100.0);
    }

    #[test]
    fn filter_rejects_hits() {
        let bvh = square_stack(10);
        let ray = Ray::new(
            WorldPoint::new(0.75, 0.25, -1.0),
            WorldVector::new(0.0, 0.0, 1.0),
            0.0,
        );
        let mut stack = StackCache::default();
        let mut seen = Vec::new();
        let hit = bvh.traverse(
            &ray,
            f32::INFINITY,
            TraversalMode::Closest,
            &mut stack,
            |hit| {
                seen.push(hit.prim.prim_id);
                hit.prim.prim_id >= 4
            },
        );
        let_assert!(Some(hit) = hit);
        assert!(hit.prim.prim_id == 4);
        assert!(seen.contains(&0));
    }

    #[test]
    fn geometric_normal_is_unnormalized() {
        let bvh = square_stack(1);
        let ray = Ray::new(
            WorldPoint::new(0.75, 0.25, -1.0),
            WorldVector::new(0.0, 0.0, 1.0),
            0.0,
        );
        let_assert!(Some(hit) = shoot(&bvh, &ray, f32::INFINITY, TraversalMode::Closest));
        assert!(hit.geometric_normal == WorldVector::new(0.0, 0.0, 1.0));
    }
}
