//! 8-wide bounding volume hierarchy over triangles of all geometries in a scene.
//!
//! Inner nodes store bounding boxes of their 8 children as a single SIMD box pack,
//! leaves store triangles in packs of 8, so both box and triangle tests process
//! a whole pack at once.

mod building;
mod printing;
mod ray_bvh_intersection;

use crate::geometry::{Triangle, WorldBox, WorldBox8, WorldPoint8};

use index_vec::IndexVec;

pub use building::BuildTriangle;
pub use printing::BvhStatistics;
pub use ray_bvh_intersection::{LeafHit, StackCache, TraversalMode};

const INNER_NODE_CHILDREN: usize = 8;
const LEAF_NODE_PACKET_SIZE: usize = 8;
const LEAF_NODE_MAX_TRIANGLES: usize =
    LEAF_NODE_PACKET_SIZE * CompressedNodeLink::MAX_COUNT as usize;

#[derive(Clone, Debug)]
pub struct TriangleBvh {
    /// None for a BVH without any triangles
    bounding_box: Option<WorldBox>,
    root: CompressedNodeLink,

    inner_nodes: IndexVec<InnerNodeIdx, InnerNode>,

    triangle_geometry: IndexVec<TrianglePackIdx, Triangle<WorldPoint8>>,
    triangle_refs: IndexVec<TriangleIdx, PrimRef>,
}

impl TriangleBvh {
    pub fn bounding_box(&self) -> Option<&WorldBox> {
        self.bounding_box.as_ref()
    }

    /// Number of real triangles stored, without padding.
    pub fn triangle_count(&self) -> usize {
        self.triangle_refs.iter().filter(|r| r.is_valid()).count()
    }
}

#[derive(Clone, Debug)]
struct InnerNode {
    child_bounds: WorldBox8,
    child_links: [CompressedNodeLink; INNER_NODE_CHILDREN],
}

/// Identifies the source of a triangle stored in the BVH.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PrimRef {
    pub geom_id: u32,
    pub prim_id: u32,
}

impl PrimRef {
    /// Marks padding lanes of triangle packs
    pub const INVALID: PrimRef = PrimRef {
        geom_id: u32::MAX,
        prim_id: u32::MAX,
    };

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq)]
struct CompressedNodeLink(u32);

#[derive(Clone, Debug, PartialEq, Eq)]
enum NodeLink {
    Null,
    Inner { index: InnerNodeIdx },
    Leaf { indices: TrianglePackIdxRange },
}

impl CompressedNodeLink {
    const COUNT_BITS: u32 = 3;
    const COUNT_MASK: u32 = (1 << Self::COUNT_BITS) - 1;
    const NULL_VALUE: u32 = (u32::MAX >> Self::COUNT_BITS) << Self::COUNT_BITS;

    pub const MAX_INDEX: u32 = (u32::MAX >> Self::COUNT_BITS) - 1;
    pub const MIN_COUNT: u32 = 1;
    pub const MAX_COUNT: u32 = (1 << Self::COUNT_BITS) - 1;

    pub const NULL: Self = Self(Self::NULL_VALUE);

    /// Create a new leaf link, panics if size or count are out of range
    fn new_leaf(index: TrianglePackIdx, count: u32) -> Self {
        assert!(count >= Self::MIN_COUNT);
        assert!(count <= Self::MAX_COUNT);
        Self((index.raw() << Self::COUNT_BITS) | count)
    }

    /// Create a new inner node link, panics if size is out of range
    fn new_inner(index: InnerNodeIdx) -> Self {
        Self(index.raw() << Self::COUNT_BITS)
    }

    fn decode(&self) -> NodeLink {
        if self.is_null() {
            NodeLink::Null
        } else {
            let count = self.0 & Self::COUNT_MASK;
            let index = self.0 >> Self::COUNT_BITS;

            if count == 0 {
                NodeLink::Inner {
                    index: InnerNodeIdx::from_raw_unchecked(index),
                }
            } else {
                NodeLink::Leaf {
                    indices: TrianglePackIdxRange::new(
                        TrianglePackIdx::from_raw_unchecked(index),
                        count,
                    ),
                }
            }
        }
    }

    fn is_null(&self) -> bool {
        self.0 == Self::NULL_VALUE
    }
}

impl Default for CompressedNodeLink {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Debug for CompressedNodeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeLink")
            .field("0", &self.0)
            .field("<decoded>", &self.decode())
            .finish()
    }
}

index_vec::define_index_type! {
    struct InnerNodeIdx = u32;
    MAX_INDEX = CompressedNodeLink::MAX_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    struct TrianglePackIdx = u32;
    MAX_INDEX = CompressedNodeLink::MAX_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

index_vec::define_index_type! {
    struct TriangleIdx = usize;
}

impl TrianglePackIdx {
    fn to_triangle_idx(self, lane: usize) -> TriangleIdx {
        ((self.raw() as usize) * LEAF_NODE_PACKET_SIZE + lane).into()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct TrianglePackIdxRange {
    pub first: TrianglePackIdx,
    pub last: TrianglePackIdx,
}

impl TrianglePackIdxRange {
    pub fn new(first: TrianglePackIdx, count: u32) -> TrianglePackIdxRange {
        TrianglePackIdxRange {
            first,
            last: first + (count as usize),
        }
    }

    pub fn into_range(self) -> std::ops::Range<TrianglePackIdx> {
        self.first..self.last
    }

    pub fn iter(&self) -> impl Iterator<Item = TrianglePackIdx> {
        (u32::from(self.first)..u32::from(self.last)).map(TrianglePackIdx::from)
    }
}
