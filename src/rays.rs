//! Ray and hit records, single and in struct-of-arrays batches.

use itertools::izip;

use crate::{
    INVALID_GEOMETRY_ID,
    error::{Error, Result},
};

/// Single ray.
/// Covers distances `t` in `[tnear, tfar)` along `org + t * dir`; `dir` doesn't need to be normalized.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ray {
    pub org: [f32; 3],
    pub dir: [f32; 3],
    pub tnear: f32,
    pub tfar: f32,
    /// Ray ignores geometries whose mask has no common bits with this one
    pub mask: u32,
    pub flags: u32,
}

impl Ray {
    /// Ray over the whole `[0, inf)` range, matching all geometries.
    pub fn new(org: [f32; 3], dir: [f32; 3]) -> Ray {
        Ray {
            org,
            dir,
            ..Default::default()
        }
    }

    pub fn with_range(self, tnear: f32, tfar: f32) -> Ray {
        Ray {
            tnear,
            tfar,
            ..self
        }
    }

    pub fn with_mask(self, mask: u32) -> Ray {
        Ray { mask, ..self }
    }
}

impl Default for Ray {
    fn default() -> Self {
        Ray {
            org: [0.0; 3],
            dir: [0.0; 3],
            tnear: 0.0,
            tfar: f32::INFINITY,
            mask: u32::MAX,
            flags: 0,
        }
    }
}

/// Hit record of a single ray.
/// `geom_id` is [`INVALID_GEOMETRY_ID`] when nothing was hit, other fields are only valid on hit.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Hit {
    /// Unnormalized geometric normal, `(v1 - v0) × (v2 - v0)`
    pub ng: [f32; 3],
    /// Barycentric coordinates, the hit point is `(1 - u - v) * v0 + u * v1 + v * v2`
    pub u: f32,
    pub v: f32,
    pub prim_id: u32,
    pub geom_id: u32,
}

impl Hit {
    pub fn is_hit(&self) -> bool {
        self.geom_id != INVALID_GEOMETRY_ID
    }
}

impl Default for Hit {
    fn default() -> Self {
        Hit {
            ng: [0.0; 3],
            u: 0.0,
            v: 0.0,
            prim_id: 0,
            geom_id: INVALID_GEOMETRY_ID,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct RayHit {
    pub ray: Ray,
    pub hit: Hit,
}

impl From<Ray> for RayHit {
    fn from(ray: Ray) -> Self {
        RayHit {
            ray,
            hit: Hit::default(),
        }
    }
}

/// Batch of rays as struct of arrays. All fields must have the same length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ray1M {
    pub org: Vec<[f32; 3]>,
    pub dir: Vec<[f32; 3]>,
    pub tnear: Vec<f32>,
    pub tfar: Vec<f32>,
    pub mask: Vec<u32>,
    pub flags: Vec<u32>,
}

impl Ray1M {
    /// Batch of `count` default rays (zero origin and direction, full range, all mask bits).
    pub fn new(count: usize) -> Ray1M {
        std::iter::repeat_n(Ray::default(), count).collect()
    }

    /// Number of rays, taken from the origin array
    pub fn len(&self) -> usize {
        self.org.len()
    }

    pub fn is_empty(&self) -> bool {
        self.org.is_empty()
    }

    pub fn push(&mut self, ray: Ray) {
        self.org.push(ray.org);
        self.dir.push(ray.dir);
        self.tnear.push(ray.tnear);
        self.tfar.push(ray.tfar);
        self.mask.push(ray.mask);
        self.flags.push(ray.flags);
    }

    pub fn get(&self, index: usize) -> Option<Ray> {
        Some(Ray {
            org: *self.org.get(index)?,
            dir: *self.dir.get(index)?,
            tnear: *self.tnear.get(index)?,
            tfar: *self.tfar.get(index)?,
            mask: *self.mask.get(index)?,
            flags: *self.flags.get(index)?,
        })
    }

    /// Checks that all arrays have the same length and returns it.
    pub(crate) fn validate(&self) -> Result<usize> {
        check_lengths(
            "Ray1M",
            &[
                self.org.len(),
                self.dir.len(),
                self.tnear.len(),
                self.tfar.len(),
                self.mask.len(),
                self.flags.len(),
            ],
        )
    }

    /// Splits a validated batch into chunks of at most `chunk_size` rays.
    pub(crate) fn chunks_mut(&mut self, chunk_size: usize) -> impl Iterator<Item = RayChunk<'_>> {
        izip!(
            self.org.chunks(chunk_size),
            self.dir.chunks(chunk_size),
            self.tnear.chunks(chunk_size),
            self.tfar.chunks_mut(chunk_size),
            self.mask.chunks(chunk_size),
        )
        .map(|(org, dir, tnear, tfar, mask)| RayChunk {
            org,
            dir,
            tnear,
            tfar,
            mask,
        })
    }
}

impl FromIterator<Ray> for Ray1M {
    fn from_iter<I: IntoIterator<Item = Ray>>(iter: I) -> Self {
        let mut rays = Ray1M::default();
        for ray in iter {
            rays.push(ray);
        }
        rays
    }
}

/// Batch of hit records as struct of arrays, see [`Hit`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Hit1M {
    pub ng: Vec<[f32; 3]>,
    pub u: Vec<f32>,
    pub v: Vec<f32>,
    pub prim_id: Vec<u32>,
    pub geom_id: Vec<u32>,
}

impl Hit1M {
    /// Batch of `count` empty hit records
    pub fn new(count: usize) -> Hit1M {
        Hit1M {
            ng: vec![[0.0; 3]; count],
            u: vec![0.0; count],
            v: vec![0.0; count],
            prim_id: vec![0; count],
            geom_id: vec![INVALID_GEOMETRY_ID; count],
        }
    }

    pub fn len(&self) -> usize {
        self.geom_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.geom_id.is_empty()
    }

    /// Marks every record as a miss, to be called before reusing the batch for another query.
    pub fn reset(&mut self) {
        self.geom_id.fill(INVALID_GEOMETRY_ID);
    }

    pub fn get(&self, index: usize) -> Option<Hit> {
        Some(Hit {
            ng: *self.ng.get(index)?,
            u: *self.u.get(index)?,
            v: *self.v.get(index)?,
            prim_id: *self.prim_id.get(index)?,
            geom_id: *self.geom_id.get(index)?,
        })
    }

    fn lengths(&self) -> [usize; 5] {
        [
            self.ng.len(),
            self.u.len(),
            self.v.len(),
            self.prim_id.len(),
            self.geom_id.len(),
        ]
    }
}

/// Rays together with their hit records. Hit distance of each intersected ray is written
/// to its `tfar`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RayHit1M {
    pub ray: Ray1M,
    pub hit: Hit1M,
}

impl RayHit1M {
    /// Batch of `count` default rays with empty hit records
    pub fn new(count: usize) -> RayHit1M {
        Self::from(Ray1M::new(count))
    }

    pub fn len(&self) -> usize {
        self.ray.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ray.is_empty()
    }

    pub fn push(&mut self, ray_hit: RayHit) {
        self.ray.push(ray_hit.ray);
        let hit = ray_hit.hit;
        self.hit.ng.push(hit.ng);
        self.hit.u.push(hit.u);
        self.hit.v.push(hit.v);
        self.hit.prim_id.push(hit.prim_id);
        self.hit.geom_id.push(hit.geom_id);
    }

    pub fn get(&self, index: usize) -> Option<RayHit> {
        Some(RayHit {
            ray: self.ray.get(index)?,
            hit: self.hit.get(index)?,
        })
    }

    /// Checks that all arrays of rays and hits have the same length and returns it.
    pub(crate) fn validate(&self) -> Result<usize> {
        let ray_count = self.ray.validate()?;
        let mut lengths = vec![ray_count];
        lengths.extend(self.hit.lengths());
        check_lengths("RayHit1M", &lengths)
    }

    /// Splits a validated batch into chunks of at most `chunk_size` rays.
    pub(crate) fn chunks_mut(
        &mut self,
        chunk_size: usize,
    ) -> impl Iterator<Item = RayHitChunk<'_>> {
        let hit = &mut self.hit;
        izip!(
            self.ray.chunks_mut(chunk_size),
            hit.ng.chunks_mut(chunk_size),
            hit.u.chunks_mut(chunk_size),
            hit.v.chunks_mut(chunk_size),
            hit.prim_id.chunks_mut(chunk_size),
            hit.geom_id.chunks_mut(chunk_size),
        )
        .map(|(ray, ng, u, v, prim_id, geom_id)| RayHitChunk {
            ray,
            ng,
            u,
            v,
            prim_id,
            geom_id,
        })
    }
}

impl From<Ray1M> for RayHit1M {
    fn from(ray: Ray1M) -> Self {
        let count = ray.len();
        RayHit1M {
            ray,
            hit: Hit1M::new(count),
        }
    }
}

impl FromIterator<RayHit> for RayHit1M {
    fn from_iter<I: IntoIterator<Item = RayHit>>(iter: I) -> Self {
        let mut batch = RayHit1M::default();
        for ray_hit in iter {
            batch.push(ray_hit);
        }
        batch
    }
}

fn check_lengths(what: &str, lengths: &[usize]) -> Result<usize> {
    let first = lengths.first().copied().unwrap_or(0);
    if lengths.iter().all(|len| *len == first) {
        Ok(first)
    } else {
        Err(Error::InvalidLayoutError(format!(
            "Arrays of {what} have different lengths: {lengths:?}"
        )))
    }
}

/// Part of a ray batch processed by one worker at once.
pub(crate) struct RayChunk<'a> {
    pub org: &'a [[f32; 3]],
    pub dir: &'a [[f32; 3]],
    pub tnear: &'a [f32],
    pub tfar: &'a mut [f32],
    pub mask: &'a [u32],
}

pub(crate) struct RayHitChunk<'a> {
    pub ray: RayChunk<'a>,
    pub ng: &'a mut [[f32; 3]],
    pub u: &'a mut [f32],
    pub v: &'a mut [f32],
    pub prim_id: &'a mut [u32],
    pub geom_id: &'a mut [u32],
}
