use std::{fmt::Display, io};

use simba::simd::SimdValue as _;

use crate::{
    geometry::WorldBox,
    util::{Stats, simba::simd_element_iter},
};

use super::{CompressedNodeLink, LEAF_NODE_PACKET_SIZE, NodeLink, TrianglePackIdxRange, TriangleBvh};

/// Shape of a built BVH.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BvhStatistics {
    pub triangle_count: usize,
    pub inner_node_count: usize,
    /// Depth of leaves, root leaf is depth 1
    pub depth: Stats,
    /// Number of non-null children of inner nodes
    pub inner_node_fill: Stats,
    /// Number of real (not padding) triangles in leaves
    pub leaf_node_fill: Stats,
}

impl Display for BvhStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Triangles: {}", self.triangle_count)?;
        writeln!(f, "Inner nodes: {}", self.inner_node_count)?;
        writeln!(f, "Depth: {}", self.depth)?;
        writeln!(f, "Inner node child count: {}", self.inner_node_fill)?;
        write!(f, "Leaf nodes fill: {}", self.leaf_node_fill)
    }
}

impl TriangleBvh {
    pub fn statistics(&self) -> BvhStatistics {
        let mut leaf_node_fill = Stats::default();
        let depth = self.statistics_recursive(self.root, &mut leaf_node_fill);

        let inner_node_fill = self
            .inner_nodes
            .iter()
            .map(|node| node.child_links.iter().filter(|link| !link.is_null()).count())
            .collect();

        BvhStatistics {
            triangle_count: self.triangle_count(),
            inner_node_count: self.inner_nodes.len(),
            depth,
            inner_node_fill,
            leaf_node_fill,
        }
    }

    /// Returns depth statistics of the subtree, collects leaf fill on the way.
    fn statistics_recursive(&self, link: CompressedNodeLink, leaf_node_fill: &mut Stats) -> Stats {
        match link.decode() {
            NodeLink::Null => Stats::default(),
            NodeLink::Leaf { indices } => {
                leaf_node_fill.add_sample(self.used_triangles(indices));
                Stats::new_single(1)
            }
            NodeLink::Inner { index } => self.inner_nodes[index]
                .child_links
                .iter()
                .map(|child| self.statistics_recursive(*child, leaf_node_fill))
                .fold(Stats::default(), |a, b| a.merge(&b))
                .offset(1),
        }
    }

    fn used_triangles(&self, indices: TrianglePackIdxRange) -> usize {
        indices
            .iter()
            .flat_map(|pack| (0..LEAF_NODE_PACKET_SIZE).map(move |lane| pack.to_triangle_idx(lane)))
            .filter(|i| self.triangle_refs[*i].is_valid())
            .count()
    }

    /// Writes an indented dump of the tree, one line per node and per triangle.
    pub fn write_tree(&self, out: &mut impl io::Write) -> io::Result<()> {
        match &self.bounding_box {
            Some(bounding_box) => self.write_recursive(out, 0, self.root, bounding_box),
            None => writeln!(out, "<EMPTY>"),
        }
    }

    fn write_recursive(
        &self,
        out: &mut impl io::Write,
        indent: usize,
        link: CompressedNodeLink,
        enclosing_box: &WorldBox,
    ) -> io::Result<()> {
        let prefix = "  ".repeat(indent);
        match link.decode() {
            NodeLink::Null => Ok(()),
            NodeLink::Leaf { indices } => {
                writeln!(
                    out,
                    "{}- L{}..{}: {:?}-{:?}",
                    prefix,
                    indices.first.raw(),
                    indices.last.raw(),
                    enclosing_box.min,
                    enclosing_box.max,
                )?;
                self.write_leaf(out, indent + 1, indices)
            }
            NodeLink::Inner { index } => {
                writeln!(
                    out,
                    "{}- I{}: {:?}-{:?}",
                    prefix,
                    index.raw(),
                    enclosing_box.min,
                    enclosing_box.max,
                )?;

                let node = &self.inner_nodes[index];
                for (i, child_link) in node.child_links.iter().enumerate() {
                    let child_box = node.child_bounds.extract(i);
                    self.write_recursive(out, indent + 1, *child_link, &child_box)?;
                }
                Ok(())
            }
        }
    }

    fn write_leaf(
        &self,
        out: &mut impl io::Write,
        indent: usize,
        indices: TrianglePackIdxRange,
    ) -> io::Result<()> {
        let prefix = "  ".repeat(indent);

        let mut empty_count = 0;
        for pack in indices.iter() {
            let triangles = simd_element_iter(self.triangle_geometry[pack].clone());
            for (lane, triangle) in triangles.enumerate() {
                let prim = self.triangle_refs[pack.to_triangle_idx(lane)];
                if !prim.is_valid() {
                    empty_count += 1;
                    continue;
                }
                writeln!(
                    out,
                    "{}#{}/{}: {:?}, {:?}, {:?}",
                    prefix, prim.geom_id, prim.prim_id, triangle[0], triangle[1], triangle[2]
                )?;
            }
        }

        if empty_count > 0 {
            writeln!(out, "{}{}x <EMPTY>", prefix, empty_count)?;
        }
        Ok(())
    }
}
