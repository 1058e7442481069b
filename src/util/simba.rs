use simba::simd::{SimdValue, WideBoolF32x8, WideF32x8};

use crate::geometry::{SimdFloatType, SimdMaskType, WorldVector8};

pub trait SimbaWorkarounds: SimdValue {
    fn is_nan(self) -> Self::SimdBool;

    fn infinity() -> Self;
    fn neg_infinity() -> Self;
}

impl SimbaWorkarounds for WideF32x8 {
    #[inline(always)]
    fn is_nan(self) -> Self::SimdBool {
        WideBoolF32x8(self.0.is_nan())
    }

    #[inline(always)]
    fn infinity() -> Self {
        Self::splat(f32::INFINITY)
    }

    #[inline(always)]
    fn neg_infinity() -> Self {
        Self::splat(f32::NEG_INFINITY)
    }
}

/// Bit set of lanes where the mask is true, lane 0 is the lowest bit.
#[inline(always)]
pub fn mask_bits(mask: SimdMaskType) -> u64 {
    mask.0.move_mask() as u64
}

/// Converts a flat iterator of elements into an iterator of SIMD values and mask.
/// If input iterator length is not divisible by T::LANES, remainder of the last
/// vector will be filled with the content of `padding` and mask will be false.
pub fn simd_windows<T: SimdValue>(
    value: impl IntoIterator<Item = T::Element>,
    padding: T::Element,
) -> impl Iterator<Item = (T, T::SimdBool)>
where
    T::Element: Clone,
    T::SimdBool: SimdValue,
    <T::SimdBool as SimdValue>::Element: From<bool>,
{
    let mut iter = value.into_iter().peekable();
    std::iter::from_fn(move || {
        iter.peek()?;

        let mut t = T::splat(padding.clone());
        let mut mask = <T::SimdBool as SimdValue>::splat(false.into());

        for (j, v) in (0..T::LANES).zip(&mut iter) {
            t.replace(j, v);
            mask.replace(j, true.into());
        }

        Some((t, mask))
    })
}

pub fn simd_element_iter<T: SimdValue>(value: T) -> impl Iterator<Item = T::Element> {
    (0..T::LANES).map(move |i| value.extract(i))
}

pub fn fma_dot(a: &WorldVector8, b: &WorldVector8) -> SimdFloatType {
    WideF32x8(a.z.0.mul_add(b.z.0, a.y.0.mul_add(b.y.0, a.x.0 * b.x.0)))
}
