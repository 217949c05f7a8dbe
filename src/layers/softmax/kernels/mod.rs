//! Row primitives of the softmax kernels, one implementation per SIMD tier
//!
//! Only the reductions and the elementwise passes are vectorized. The
//! exponentials and their sum stay scalar and in order, so the forward
//! output is identical on every tier.

#[cfg(target_arch = "x86_64")]
mod avx2;
#[cfg(target_arch = "x86_64")]
mod avx512;
#[cfg(target_arch = "aarch64")]
mod neon;

#[cfg(target_arch = "x86_64")]
pub(super) use avx2::Avx2Rows;
#[cfg(target_arch = "x86_64")]
pub(super) use avx512::Avx512Rows;
#[cfg(target_arch = "aarch64")]
pub(super) use neon::NeonRows;

use crate::dtype::FloatElement;
use crate::runtime::SimdLevel;

/// Contiguous-row operations of one tier
///
/// # Safety
///
/// Every method requires the host to support [`RowKernels::LEVEL`].
pub(super) trait RowKernels<T: FloatElement> {
    const LEVEL: SimdLevel;

    /// Largest element, `-inf` for an empty row
    unsafe fn max(x: &[T]) -> T;

    /// `y[k] *= s`
    unsafe fn scale(y: &mut [T], s: T);

    /// `Σ a[k]·b[k]`
    unsafe fn dot(a: &[T], b: &[T]) -> T;

    /// `out[k] = y[k]·(g[k] − s)`
    unsafe fn scaled_diff(y: &[T], g: &[T], s: T, out: &mut [T]);
}

/// Baseline implementation for every precision
pub(super) struct ScalarRows;

impl<T: FloatElement> RowKernels<T> for ScalarRows {
    const LEVEL: SimdLevel = SimdLevel::Scalar;

    unsafe fn max(x: &[T]) -> T {
        let mut m = T::neg_infinity();
        for &v in x {
            if v > m {
                m = v;
            }
        }
        m
    }

    unsafe fn scale(y: &mut [T], s: T) {
        for v in y {
            *v = *v * s;
        }
    }

    unsafe fn dot(a: &[T], b: &[T]) -> T {
        a.iter().zip(b).map(|(&x, &y)| x * y).sum()
    }

    unsafe fn scaled_diff(y: &[T], g: &[T], s: T, out: &mut [T]) {
        for ((o, &yv), &gv) in out.iter_mut().zip(y).zip(g) {
            *o = yv * (gv - s);
        }
    }
}

/// Softmax over one `[axis, inner]` block
///
/// # Safety
///
/// The host must support `K::LEVEL`.
pub(super) unsafe fn forward_block<T: FloatElement, K: RowKernels<T>>(
    x: &[T],
    y: &mut [T],
    axis: usize,
    inner: usize,
) {
    if inner == 1 {
        let m = unsafe { K::max(x) };
        let mut sum = T::zero();
        for (yv, &xv) in y.iter_mut().zip(x) {
            let e = (xv - m).exp_val();
            *yv = e;
            sum += e;
        }
        unsafe { K::scale(y, T::one() / sum) };
        return;
    }

    for i in 0..inner {
        let mut m = T::neg_infinity();
        for a in 0..axis {
            let v = x[a * inner + i];
            if v > m {
                m = v;
            }
        }
        let mut sum = T::zero();
        for a in 0..axis {
            let e = (x[a * inner + i] - m).exp_val();
            y[a * inner + i] = e;
            sum += e;
        }
        let inv = T::one() / sum;
        for a in 0..axis {
            y[a * inner + i] = y[a * inner + i] * inv;
        }
    }
}

/// Softmax gradient over one `[axis, inner]` block
///
/// # Safety
///
/// The host must support `K::LEVEL`.
pub(super) unsafe fn backward_block<T: FloatElement, K: RowKernels<T>>(
    y: &[T],
    g: &[T],
    out: &mut [T],
    axis: usize,
    inner: usize,
) {
    if inner == 1 {
        unsafe {
            let s = K::dot(g, y);
            K::scaled_diff(y, g, s, out);
        }
        return;
    }

    for i in 0..inner {
        let mut s = T::zero();
        for a in 0..axis {
            let p = a * inner + i;
            s += g[p] * y[p];
        }
        for a in 0..axis {
            let p = a * inner + i;
            out[p] = y[p] * (g[p] - s);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::host_supports;

    fn row(n: usize) -> Vec<f32> {
        (0..n).map(|i| ((i * 7 % 11) as f32 - 5.0) * 0.37).collect()
    }

    fn check_tier<K: RowKernels<f32>>() {
        if !host_supports(K::LEVEL) {
            return;
        }
        for n in [1, 3, 8, 17, 64] {
            let x = row(n);
            let g: Vec<f32> = x.iter().map(|v| v * 0.5 - 1.0).collect();
            let mut base = vec![0.0; n];
            let mut tier = vec![0.0; n];
            unsafe {
                forward_block::<f32, ScalarRows>(&x, &mut base, n, 1);
                forward_block::<f32, K>(&x, &mut tier, n, 1);
            }
            assert_eq!(base, tier, "forward differs at n={n}");

            let mut gb = vec![0.0; n];
            let mut gt = vec![0.0; n];
            unsafe {
                backward_block::<f32, ScalarRows>(&base, &g, &mut gb, n, 1);
                backward_block::<f32, K>(&base, &g, &mut gt, n, 1);
            }
            for (a, b) in gb.iter().zip(&gt) {
                assert!((a - b).abs() < 1e-5, "backward differs at n={n}");
            }
        }
    }

    #[test]
    fn test_strided_block_sums_to_one() {
        // [axis=3, inner=2]
        let x = [1.0f64, -1.0, 2.0, 0.0, 3.0, 1.0];
        let mut y = [0.0; 6];
        unsafe { forward_block::<f64, ScalarRows>(&x, &mut y, 3, 2) };
        for i in 0..2 {
            let s: f64 = (0..3).map(|a| y[a * 2 + i]).sum();
            assert!((s - 1.0).abs() < 1e-12);
        }
        assert!(y[4] > y[2] && y[2] > y[0]);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_x86_tiers_match_scalar() {
        check_tier::<Avx2Rows>();
        check_tier::<Avx512Rows>();
    }

    #[cfg(target_arch = "aarch64")]
    #[test]
    fn test_neon_matches_scalar() {
        check_tier::<NeonRows>();
    }
}
