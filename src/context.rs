use std::fmt::Debug;

use crate::scene::triangle_bvh::LeafHit;

/// Hint about the ray distribution of a query.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum IntersectContextFlags {
    #[default]
    Incoherent,
    /// Rays of the batch have similar origins and directions
    Coherent,
}

/// Intersection found during a query, before it is accepted.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HitCandidate {
    pub geom_id: u32,
    pub prim_id: u32,
    /// Distance along the ray, in units of the ray direction
    pub t: f32,
    pub u: f32,
    pub v: f32,
    /// Unnormalized geometric normal
    pub ng: [f32; 3],
}

impl From<&LeafHit> for HitCandidate {
    fn from(hit: &LeafHit) -> Self {
        HitCandidate {
            geom_id: hit.prim.geom_id,
            prim_id: hit.prim.prim_id,
            t: hit.t,
            u: hit.uv.u,
            v: hit.uv.v,
            ng: hit.geometric_normal.into(),
        }
    }
}

type HitFilter = dyn Fn(&HitCandidate) -> bool + Send + Sync;

/// Per-call settings of a query.
#[derive(Default)]
pub struct IntersectContext {
    flags: IntersectContextFlags,
    filter: Option<Box<HitFilter>>,
}

impl IntersectContext {
    pub fn new(flags: IntersectContextFlags) -> IntersectContext {
        IntersectContext {
            flags,
            filter: None,
        }
    }

    pub fn coherent() -> IntersectContext {
        Self::new(IntersectContextFlags::Coherent)
    }

    pub fn incoherent() -> IntersectContext {
        Self::new(IntersectContextFlags::Incoherent)
    }

    /// Sets a callback deciding about every candidate hit.
    /// Candidates for which it returns false are ignored and the query continues past them.
    /// May be called concurrently from several worker threads.
    pub fn with_filter(
        mut self,
        filter: impl Fn(&HitCandidate) -> bool + Send + Sync + 'static,
    ) -> IntersectContext {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn flags(&self) -> IntersectContextFlags {
        self.flags
    }

    pub(crate) fn accepts(&self, hit: &LeafHit) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter(&HitCandidate::from(hit)))
    }
}

impl Debug for IntersectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntersectContext")
            .field("flags", &self.flags)
            .field("filter", &self.filter.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        geometry::{BarycentricCoordinates, WorldVector},
        scene::triangle_bvh::PrimRef,
    };

    use assert2::assert;

    fn leaf_hit(prim_id: u32) -> LeafHit {
        LeafHit {
            t: 2.0,
            uv: BarycentricCoordinates { u: 0.25, v: 0.5 },
            geometric_normal: WorldVector::new(0.0, 0.0, 2.0),
            prim: PrimRef { geom_id: 3, prim_id },
        }
    }

    #[test]
    fn default_accepts_everything() {
        let context = IntersectContext::default();
        assert!(context.flags() == IntersectContextFlags::Incoherent);
        assert!(context.accepts(&leaf_hit(0)));
    }

    #[test]
    fn filter_sees_candidate() {
        let context = IntersectContext::coherent().with_filter(|candidate| {
            candidate.geom_id == 3 && candidate.ng == [0.0, 0.0, 2.0] && candidate.prim_id % 2 == 0
        });
        assert!(context.flags() == IntersectContextFlags::Coherent);
        assert!(context.accepts(&leaf_hit(4)));
        assert!(!context.accepts(&leaf_hit(5)));
    }

    #[test]
    fn candidate_from_leaf_hit() {
        let candidate = HitCandidate::from(&leaf_hit(7));
        assert!(
            candidate
                == HitCandidate {
                    geom_id: 3,
                    prim_id: 7,
                    t: 2.0,
                    u: 0.25,
                    v: 0.5,
                    ng: [0.0, 0.0, 2.0],
                }
        );
    }
}
