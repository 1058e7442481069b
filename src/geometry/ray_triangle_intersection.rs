use crate::{
    geometry::{Ray, SimdFloatType, SimdMaskType},
    util::simba::fma_dot,
};

use simba::simd::{SimdPartialOrd as _, SimdValue};

use super::{BarycentricCoordinates, Triangle, WorldPoint8};

impl Triangle<WorldPoint8> {
    /// Calculates ray intersection with the (two sided) triangle pack.
    /// Returns mask of valid intersections, distance along ray, and barycentric uv coordinates.
    /// Distance is not checked against the ray's range here.
    /// Degenerate triangles (and lanes padded with them) never report a hit.
    /// Adapted from https://en.wikipedia.org/wiki/M%C3%B6ller%E2%80%93Trumbore_intersection_algorithm#Rust_implementation
    pub fn intersect(
        &self,
        ray: &Ray,
    ) -> (
        SimdMaskType,
        SimdFloatType,
        BarycentricCoordinates<SimdFloatType>,
    ) {
        let origin = ray.origin.map(SimdFloatType::splat);
        let direction = ray.direction.map(SimdFloatType::splat);

        let e1 = self[1] - self[0];
        let e2 = self[2] - self[0];

        let ray_cross_e2 = direction.cross(&e2);
        let det = fma_dot(&e1, &ray_cross_e2);

        let inv_det = SimdFloatType::ONE / det; // May be infinite
        let s = origin - self[0];
        let u = inv_det * fma_dot(&s, &ray_cross_e2);

        let s_cross_e1 = s.cross(&e1);
        let v = inv_det * fma_dot(&direction, &s_cross_e1);
        let t = inv_det * fma_dot(&e2, &s_cross_e1);

        // Zero determinant gives NaN or infinite u, v, the comparisons reject both
        let mask = u.simd_ge(SimdFloatType::ZERO)
            & v.simd_ge(SimdFloatType::ZERO)
            & (u + v).simd_le(SimdFloatType::ONE)
            & det.simd_ne(SimdFloatType::ZERO);
        (mask, t, BarycentricCoordinates { u, v })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use assert2::assert;
    use test_case::test_case;
    use test_strategy::proptest;

    use crate::geometry::{WorldPoint, WorldVector};

    fn xy_triangle() -> Triangle<WorldPoint> {
        Triangle::new(
            WorldPoint::new(0.0, 0.0, 0.0),
            WorldPoint::new(1.0, 0.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
        )
    }

    fn single_lane(
        triangle: &Triangle<WorldPoint>,
        ray: &Ray,
    ) -> Option<(f32, BarycentricCoordinates<f32>)> {
        let (mask, t, uv) = Triangle::<WorldPoint8>::splat(triangle.clone()).intersect(ray);
        if mask.0.move_mask() & 1 != 0 {
            Some((t.extract(0), uv.extract(0)))
        } else {
            None
        }
    }

    #[test_case( 1.0 ; "from_front")]
    #[test_case(-1.0 ; "from_back")]
    fn two_sided(side: f32) {
        let ray = Ray::new(
            WorldPoint::new(0.25, 0.25, 2.0 * side),
            WorldVector::new(0.0, 0.0, -side),
            0.0,
        );
        let (t, uv) = single_lane(&xy_triangle(), &ray).expect("Ray goes through the triangle");
        assert!((t - 2.0).abs() < 1e-6);
        assert!((uv.u - 0.25).abs() < 1e-6);
        assert!((uv.v - 0.25).abs() < 1e-6);
    }

    #[test]
    fn outside_misses() {
        let ray = Ray::new(
            WorldPoint::new(0.75, 0.75, 1.0),
            WorldVector::new(0.0, 0.0, -1.0),
            0.0,
        );
        assert!(single_lane(&xy_triangle(), &ray).is_none());
    }

    #[test]
    fn parallel_misses() {
        let ray = Ray::new(
            WorldPoint::new(-1.0, 0.25, 0.0),
            WorldVector::new(1.0, 0.0, 0.0),
            0.0,
        );
        assert!(single_lane(&xy_triangle(), &ray).is_none());
    }

    #[test]
    fn degenerate_triangle_misses() {
        let p = WorldPoint::new(0.0, 0.0, 0.0);
        let ray = Ray::new(
            WorldPoint::new(0.0, 0.0, 1.0),
            WorldVector::new(0.0, 0.0, -1.0),
            0.0,
        );
        assert!(single_lane(&Triangle::new(p, p, p), &ray).is_none());
    }

    #[test]
    fn zero_direction_misses() {
        let ray = Ray::new(WorldPoint::new(0.25, 0.25, 0.0), WorldVector::zeros(), 0.0);
        assert!(single_lane(&xy_triangle(), &ray).is_none());
    }

    /// The reported distance and barycentric coordinates describe the same point.
    #[proptest]
    fn hit_point_matches_barycentric(
        #[strategy(0.05f32..0.45)] u: f32,
        #[strategy(0.05f32..0.45)] v: f32,
        #[strategy(-3.0f32..3.0)] ox: f32,
        #[strategy(-3.0f32..3.0)] oy: f32,
        #[strategy(3.0f32..6.0)] oz: f32,
    ) {
        let triangle = Triangle::new(
            WorldPoint::new(-1.0, -1.0, 0.5),
            WorldPoint::new(2.0, -1.0, 0.0),
            WorldPoint::new(0.0, 2.0, -0.5),
        );
        let target = BarycentricCoordinates { u, v }.interpolate_triangle(&triangle.map(|p| p.coords));
        let origin = WorldPoint::new(ox, oy, oz);
        let ray = Ray::new(origin, target - origin.coords, 0.0);

        let (t, uv) = single_lane(&triangle, &ray).expect("Ray is aimed inside the triangle");

        assert!((t - 1.0).abs() < 1e-3);
        assert!((uv.u - u).abs() < 1e-3);
        assert!((uv.v - v).abs() < 1e-3);
    }
}
