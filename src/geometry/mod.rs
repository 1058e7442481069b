mod aabb;
mod ray_box_intersection;
mod ray_triangle_intersection;
mod triangle;

pub use aabb::AABB;
pub use ray_box_intersection::RayIntersectionExt;
pub use triangle::{BarycentricCoordinates, Triangle};

use nalgebra::{Point3, Vector3};
use simba::simd::{WideBoolF32x8, WideF32x8};

pub type FloatType = f32;
pub type SimdFloatType = WideF32x8;
pub type SimdMaskType = WideBoolF32x8;

pub type WorldPoint = Point3<FloatType>;
pub type WorldVector = Vector3<FloatType>;
pub type WorldBox = AABB<WorldPoint>;
pub type WorldPoint8 = Point3<SimdFloatType>;
pub type WorldVector8 = Vector3<SimdFloatType>;
pub type WorldBox8 = AABB<WorldPoint8>;

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: WorldPoint,
    /// Direction of the ray, not normalized. Distances along the ray are in multiples of its length.
    pub direction: WorldVector,

    /// Componentwise inverse of the ray direction
    /// Zeros in direction get turned into positive infinity regardless of the sign of the zero
    pub inv_direction: WorldVector,

    /// Hits closer than this are ignored
    pub near: FloatType,
}

impl Ray {
    pub fn new(origin: WorldPoint, direction: WorldVector, near: FloatType) -> Ray {
        let inv_direction = direction.map(|x| if x == 0.0 { f32::INFINITY } else { 1.0 / x });

        Ray {
            origin,
            direction,
            inv_direction,
            near,
        }
    }

    pub fn point_at(&self, distance: FloatType) -> WorldPoint {
        self.origin + self.direction * distance
    }

    /// Rays that can never hit anything: NaN or infinite components, or zero direction.
    pub fn is_degenerate(&self) -> bool {
        !self.origin.iter().all(|x| x.is_finite())
            || !self.direction.iter().all(|x| x.is_finite())
            || self.direction.iter().all(|x| *x == 0.0)
    }
}
