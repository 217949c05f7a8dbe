//! AVX2 row primitives

use super::RowKernels;
use crate::runtime::SimdLevel;
use std::arch::x86_64::*;

const F32_LANES: usize = 8;
const F64_LANES: usize = 4;

pub(in crate::layers::softmax) struct Avx2Rows;

#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
fn hmax_f32(v: __m256) -> f32 {
    let high = _mm256_extractf128_ps(v, 1);
    let low = _mm256_castps256_ps128(v);
    let max128 = _mm_max_ps(low, high);
    let max64 = _mm_max_ps(max128, _mm_movehdup_ps(max128));
    _mm_cvtss_f32(_mm_max_ss(max64, _mm_movehl_ps(max64, max64)))
}

#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
fn hmax_f64(v: __m256d) -> f64 {
    let high = _mm256_extractf128_pd(v, 1);
    let low = _mm256_castpd256_pd128(v);
    let max128 = _mm_max_pd(low, high);
    _mm_cvtsd_f64(_mm_max_sd(max128, _mm_unpackhi_pd(max128, max128)))
}

#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
fn hsum_f32(v: __m256) -> f32 {
    let high = _mm256_extractf128_ps(v, 1);
    let low = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(low, high);
    let sum64 = _mm_add_ps(sum128, _mm_movehdup_ps(sum128));
    _mm_cvtss_f32(_mm_add_ss(sum64, _mm_movehl_ps(sum64, sum64)))
}

#[target_feature(enable = "avx2", enable = "fma")]
#[inline]
fn hsum_f64(v: __m256d) -> f64 {
    let high = _mm256_extractf128_pd(v, 1);
    let low = _mm256_castpd256_pd128(v);
    let sum128 = _mm_add_pd(low, high);
    _mm_cvtsd_f64(_mm_add_sd(sum128, _mm_unpackhi_pd(sum128, sum128)))
}

macro_rules! avx2_rows {
    (
        $ty:ty, $lanes:expr, $hmax:ident, $hsum:ident,
        $max_fn:ident, $scale_fn:ident, $dot_fn:ident, $diff_fn:ident,
        $set1:ident, $zero:ident, $load:ident, $store:ident,
        $vmax:ident, $vmul:ident, $vsub:ident, $vfmadd:ident
    ) => {
        #[target_feature(enable = "avx2", enable = "fma")]
        fn $max_fn(x: &[$ty]) -> $ty {
            let chunks = x.len() / $lanes;
            let p = x.as_ptr();
            let mut acc = $set1(<$ty>::NEG_INFINITY);
            for c in 0..chunks {
                acc = $vmax(acc, unsafe { $load(p.add(c * $lanes)) });
            }
            let mut m = $hmax(acc);
            for &v in &x[chunks * $lanes..] {
                if v > m {
                    m = v;
                }
            }
            m
        }

        #[target_feature(enable = "avx2", enable = "fma")]
        fn $scale_fn(y: &mut [$ty], s: $ty) {
            let chunks = y.len() / $lanes;
            let p = y.as_mut_ptr();
            let vs = $set1(s);
            for c in 0..chunks {
                unsafe {
                    let q = p.add(c * $lanes);
                    $store(q, $vmul($load(q), vs));
                }
            }
            for v in &mut y[chunks * $lanes..] {
                *v *= s;
            }
        }

        #[target_feature(enable = "avx2", enable = "fma")]
        fn $dot_fn(a: &[$ty], b: &[$ty]) -> $ty {
            let n = a.len().min(b.len());
            let chunks = n / $lanes;
            let mut acc = $zero();
            for c in 0..chunks {
                unsafe {
                    let va = $load(a.as_ptr().add(c * $lanes));
                    let vb = $load(b.as_ptr().add(c * $lanes));
                    acc = $vfmadd(va, vb, acc);
                }
            }
            let mut s = $hsum(acc);
            for k in chunks * $lanes..n {
                s += a[k] * b[k];
            }
            s
        }

        #[target_feature(enable = "avx2", enable = "fma")]
        fn $diff_fn(y: &[$ty], g: &[$ty], s: $ty, out: &mut [$ty]) {
            let n = out.len().min(y.len()).min(g.len());
            let chunks = n / $lanes;
            let vs = $set1(s);
            for c in 0..chunks {
                unsafe {
                    let off = c * $lanes;
                    let vy = $load(y.as_ptr().add(off));
                    let vg = $load(g.as_ptr().add(off));
                    $store(out.as_mut_ptr().add(off), $vmul(vy, $vsub(vg, vs)));
                }
            }
            for k in chunks * $lanes..n {
                out[k] = y[k] * (g[k] - s);
            }
        }

        impl RowKernels<$ty> for Avx2Rows {
            const LEVEL: SimdLevel = SimdLevel::Avx2Fma;

            unsafe fn max(x: &[$ty]) -> $ty {
                unsafe { $max_fn(x) }
            }

            unsafe fn scale(y: &mut [$ty], s: $ty) {
                unsafe { $scale_fn(y, s) }
            }

            unsafe fn dot(a: &[$ty], b: &[$ty]) -> $ty {
                unsafe { $dot_fn(a, b) }
            }

            unsafe fn scaled_diff(y: &[$ty], g: &[$ty], s: $ty, out: &mut [$ty]) {
                unsafe { $diff_fn(y, g, s, out) }
            }
        }
    };
}

avx2_rows!(
    f32, F32_LANES, hmax_f32, hsum_f32,
    max_f32, scale_f32, dot_f32, diff_f32,
    _mm256_set1_ps, _mm256_setzero_ps, _mm256_loadu_ps, _mm256_storeu_ps,
    _mm256_max_ps, _mm256_mul_ps, _mm256_sub_ps, _mm256_fmadd_ps
);

avx2_rows!(
    f64, F64_LANES, hmax_f64, hsum_f64,
    max_f64, scale_f64, dot_f64, diff_f64,
    _mm256_set1_pd, _mm256_setzero_pd, _mm256_loadu_pd, _mm256_storeu_pd,
    _mm256_max_pd, _mm256_mul_pd, _mm256_sub_pd, _mm256_fmadd_pd
);
