use simba::simd::{SimdPartialOrd as _, SimdValue};

use crate::{
    geometry::{Ray, WorldBox8},
    util::simba::SimbaWorkarounds as _,
};

use super::SimdFloatType;

pub trait RayIntersectionExt {
    type DistanceType;
    /// Calculate first and last ray intersection with the box
    fn intersect(&self, ray: &Ray) -> (Self::DistanceType, Self::DistanceType);
}

impl RayIntersectionExt for WorldBox8 {
    type DistanceType = SimdFloatType;

    /// Calculates ray intersection with the box pack.
    /// Returns minimum and maximum distance along the ray, ray intersects is min <= max.
    fn intersect(&self, ray: &Ray) -> (SimdFloatType, SimdFloatType) {
        let ray_origin = ray.origin.map(SimdFloatType::splat);
        let ray_inv_direction = ray.inv_direction.map(SimdFloatType::splat);

        // Componentwise distances along the ray to the box's min and max corners
        // The multiplication is NAN if the ray is starting inside the slab bounding plane
        // and is parallel to it. In this case we blend to +-infinity, so that the range becomes infinite
        let to_box_min = (self.min - ray_origin)
            .component_mul(&ray_inv_direction)
            .map(|x| SimdFloatType::neg_infinity().select(x.is_nan(), x));
        let to_box_max = (self.max - ray_origin)
            .component_mul(&ray_inv_direction)
            .map(|x| SimdFloatType::infinity().select(x.is_nan(), x));

        // Correctly ordered (min_t <= max_t)
        let componentwise_min_t = to_box_min.zip_map(&to_box_max, |a, b| a.simd_min(b));
        let componentwise_max_t = to_box_min.zip_map(&to_box_max, |a, b| a.simd_max(b));

        let min_t = componentwise_min_t
            .x
            .simd_max(componentwise_min_t.y.simd_max(componentwise_min_t.z));
        let max_t = componentwise_max_t
            .x
            .simd_min(componentwise_max_t.y.simd_min(componentwise_max_t.z));

        (min_t, max_t)
    }
}
