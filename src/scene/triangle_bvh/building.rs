use std::{array, iter};

use crate::{
    geometry::{Triangle, WorldBox, WorldBox8, WorldPoint, WorldPoint8, WorldVector},
    util::simba::simd_windows,
};

use index_vec::IndexVec;
use itertools::Itertools as _;
use morton_encoding::morton_encode;
use simba::simd::SimdValue;

use super::{
    CompressedNodeLink, INNER_NODE_CHILDREN, InnerNode, LEAF_NODE_MAX_TRIANGLES,
    LEAF_NODE_PACKET_SIZE, PrimRef, TriangleBvh,
};

/// Triangle as an input of the BVH build.
#[derive(Clone, Debug)]
pub struct BuildTriangle {
    pub vertices: Triangle<WorldPoint>,
    pub prim: PrimRef,
}

impl BuildTriangle {
    /// Triangles with non-finite vertices can't be bounded and are left out of the build.
    pub fn is_finite(&self) -> bool {
        self.vertices
            .iter()
            .all(|p| p.iter().all(|x| x.is_finite()))
    }
}

impl TriangleBvh {
    pub fn build(mut triangles: Vec<BuildTriangle>) -> TriangleBvh {
        triangles.retain(BuildTriangle::is_finite);

        let bounding_box = WorldBox::from_points(vertices_iter(&triangles));

        let mut bvh = TriangleBvh {
            bounding_box: bounding_box.clone(),
            root: CompressedNodeLink::NULL,

            inner_nodes: IndexVec::new(),
            triangle_geometry: IndexVec::new(),
            triangle_refs: IndexVec::new(),
        };

        if let Some(bounding_box) = bounding_box {
            morton_sort(&mut triangles);
            bvh.root = bvh.build_recursive(&mut triangles, &bounding_box);
        }

        bvh
    }

    fn build_recursive(
        &mut self,
        triangles: &mut [BuildTriangle],
        enclosing_box: &WorldBox,
    ) -> CompressedNodeLink {
        if triangles.len() <= LEAF_NODE_MAX_TRIANGLES {
            self.build_leaf(triangles, enclosing_box)
        } else {
            self.build_inner_node(triangles, enclosing_box)
        }
    }

    fn build_inner_node(
        &mut self,
        triangles: &mut [BuildTriangle],
        enclosing_box: &WorldBox,
    ) -> CompressedNodeLink {
        let split_indices = split_triangles(triangles);

        // Unused lanes get a point box with a null link, they are never descended into
        let mut child_boxes = WorldBox8::splat(WorldBox::new(enclosing_box.min, enclosing_box.min));
        let mut exact_child_boxes: [Option<WorldBox>; INNER_NODE_CHILDREN] = Default::default();
        for (i, (index1, index2)) in split_indices.iter().tuple_windows().enumerate() {
            let triangles = &triangles[*index1..*index2];
            if let Some(child_box) = WorldBox::from_points(vertices_iter(triangles)) {
                child_boxes.replace(i, child_box.clone());
                exact_child_boxes[i] = Some(child_box);
            }
        }

        self.inner_nodes.push(InnerNode {
            child_bounds: child_boxes,
            child_links: [CompressedNodeLink::NULL; INNER_NODE_CHILDREN],
        });
        let node_index = self.inner_nodes.last_idx();

        let child_links = array::from_fn(|i| match &exact_child_boxes[i] {
            Some(child_box) => {
                let triangles = &mut triangles[split_indices[i]..split_indices[i + 1]];
                self.build_recursive(triangles, child_box)
            }
            None => CompressedNodeLink::NULL,
        });
        self.inner_nodes[node_index].child_links = child_links;

        CompressedNodeLink::new_inner(node_index)
    }

    fn build_leaf(
        &mut self,
        triangles: &[BuildTriangle],
        enclosing_box: &WorldBox,
    ) -> CompressedNodeLink {
        assert!(!triangles.is_empty());
        let packet_count = triangles.len().div_ceil(LEAF_NODE_PACKET_SIZE);
        let padded_triangle_count = packet_count * LEAF_NODE_PACKET_SIZE;
        let padding = padded_triangle_count - triangles.len();

        let link =
            CompressedNodeLink::new_leaf(self.triangle_geometry.next_idx(), packet_count as u32);

        // Padding lanes are degenerate triangles, these never intersect anything
        let padding_triangle = Triangle::new(
            enclosing_box.min,
            enclosing_box.min,
            enclosing_box.min,
        );
        self.triangle_geometry.extend(
            simd_windows::<Triangle<WorldPoint8>>(
                triangles.iter().map(|t| t.vertices.clone()),
                padding_triangle,
            )
            .map(|(packet, _mask)| packet),
        );

        self.triangle_refs
            .extend(triangles.iter().map(|t| t.prim));
        self.triangle_refs
            .extend(iter::repeat_n(PrimRef::INVALID, padding));

        link
    }
}

/// Sorts triangles along a Z-order curve of their centroids,
/// so that neighboring triangles in the slice are also close in space.
fn morton_sort(triangles: &mut [BuildTriangle]) {
    const GRID_BITS: usize = 10;
    const GRID_MAX: f32 = ((1u32 << GRID_BITS) - 1) as f32;

    let centroids = triangles
        .iter()
        .map(|t| t.vertices.centroid())
        .collect::<Vec<_>>();
    let Some(bounds) = WorldBox::from_points(&centroids) else {
        return;
    };
    let min = bounds.min;
    let scale: WorldVector = bounds
        .size()
        .map(|x| if x > 0.0 { GRID_MAX / x } else { 0.0 });

    triangles.sort_by_cached_key(|triangle| {
        let centroid = triangle.vertices.centroid();
        let grid_coordinates: [u32; 3] = (centroid - min)
            .component_mul(&scale)
            .map(|x| x.round().clamp(0.0, GRID_MAX) as u32)
            .into();

        morton_encode(grid_coordinates)
    });
}

/// Iterates over vertices of triangles
fn vertices_iter(triangles: &[BuildTriangle]) -> impl Iterator<Item = &WorldPoint> {
    triangles.iter().flat_map(|t| t.vertices.iter())
}

/// Return an array of indices in the triangle array, where the
/// output bins should be split. Array is one larger than INNER_NODE_CHILDREN, first item is always 0,
/// last item is always triangles.len().
fn split_triangles(triangles: &[BuildTriangle]) -> [usize; INNER_NODE_CHILDREN + 1] {
    array::from_fn::<_, { INNER_NODE_CHILDREN + 1 }, _>(|i| {
        i * triangles.len() / INNER_NODE_CHILDREN
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scene::triangle_bvh::NodeLink;

    use assert2::assert;
    use test_case::test_case;

    /// Row of unit triangles along the x axis
    pub fn triangle_row(count: u32) -> Vec<BuildTriangle> {
        (0..count)
            .map(|i| {
                let x = i as f32;
                BuildTriangle {
                    vertices: Triangle::new(
                        WorldPoint::new(x, 0.0, 0.0),
                        WorldPoint::new(x + 1.0, 0.0, 0.0),
                        WorldPoint::new(x, 1.0, 0.0),
                    ),
                    prim: PrimRef {
                        geom_id: 0,
                        prim_id: i,
                    },
                }
            })
            .collect()
    }

    #[test]
    fn empty_build() {
        let bvh = TriangleBvh::build(Vec::new());
        assert!(bvh.root.is_null());
        assert!(bvh.bounding_box().is_none());
        assert!(bvh.triangle_count() == 0);
    }

    #[test_case(1 ; "single")]
    #[test_case(8 ; "one_full_packet")]
    #[test_case(56 ; "largest_leaf")]
    #[test_case(57 ; "smallest_inner_node")]
    #[test_case(1000 ; "deep")]
    fn all_triangles_are_stored(count: u32) {
        let bvh = TriangleBvh::build(triangle_row(count));

        assert!(bvh.triangle_count() == count as usize);
        assert!(bvh.triangle_refs.len() % LEAF_NODE_PACKET_SIZE == 0);
        assert!(bvh.triangle_refs.len() == bvh.triangle_geometry.len() * LEAF_NODE_PACKET_SIZE);

        let mut prim_ids: Vec<u32> = bvh
            .triangle_refs
            .iter()
            .filter(|r| r.is_valid())
            .map(|r| r.prim_id)
            .collect();
        prim_ids.sort();
        assert!(prim_ids == (0..count).collect::<Vec<_>>());

        let b = bvh.bounding_box().expect("The BVH is not empty");
        assert!(b.min == WorldPoint::new(0.0, 0.0, 0.0));
        assert!(b.max == WorldPoint::new(count as f32, 1.0, 0.0));
    }

    #[test]
    fn large_input_has_inner_root() {
        let bvh = TriangleBvh::build(triangle_row(100));
        assert!(matches!(bvh.root.decode(), NodeLink::Inner { .. }));
    }

    #[test]
    fn non_finite_triangles_are_skipped() {
        let mut triangles = triangle_row(3);
        triangles[1].vertices[2] = WorldPoint::new(f32::NAN, 0.0, 0.0);
        let bvh = TriangleBvh::build(triangles);
        assert!(bvh.triangle_count() == 2);
    }

    #[test]
    fn split_covers_everything() {
        let triangles = triangle_row(100);
        let split = split_triangles(&triangles);
        assert!(split[0] == 0);
        assert!(split[INNER_NODE_CHILDREN] == 100);
        assert!(split.iter().tuple_windows().all(|(a, b)| a < b));
    }
}
