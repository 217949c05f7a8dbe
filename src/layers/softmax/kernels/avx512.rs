//! AVX-512 row primitives

use super::RowKernels;
use crate::runtime::SimdLevel;
use std::arch::x86_64::*;

const F32_LANES: usize = 16;
const F64_LANES: usize = 8;

pub(in crate::layers::softmax) struct Avx512Rows;

macro_rules! avx512_rows {
    (
        $ty:ty, $lanes:expr,
        $max_fn:ident, $scale_fn:ident, $dot_fn:ident, $diff_fn:ident,
        $set1:ident, $zero:ident, $load:ident, $store:ident,
        $vmax:ident, $vmul:ident, $vsub:ident, $vfmadd:ident,
        $reduce_max:ident, $reduce_add:ident
    ) => {
        #[target_feature(enable = "avx512f")]
        fn $max_fn(x: &[$ty]) -> $ty {
            let chunks = x.len() / $lanes;
            let mut acc = $set1(<$ty>::NEG_INFINITY);
            for c in 0..chunks {
                acc = $vmax(acc, unsafe { $load(x.as_ptr().add(c * $lanes)) });
            }
            let mut m = $reduce_max(acc);
            for &v in &x[chunks * $lanes..] {
                if v > m {
                    m = v;
                }
            }
            m
        }

        #[target_feature(enable = "avx512f")]
        fn $scale_fn(y: &mut [$ty], s: $ty) {
            let chunks = y.len() / $lanes;
            let vs = $set1(s);
            for c in 0..chunks {
                unsafe {
                    let q = y.as_mut_ptr().add(c * $lanes);
                    $store(q, $vmul($load(q), vs));
                }
            }
            for v in &mut y[chunks * $lanes..] {
                *v *= s;
            }
        }

        #[target_feature(enable = "avx512f")]
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
            let mut s = $reduce_add(acc);
            for k in chunks * $lanes..n {
                s += a[k] * b[k];
            }
            s
        }

        #[target_feature(enable = "avx512f")]
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

        impl RowKernels<$ty> for Avx512Rows {
            const LEVEL: SimdLevel = SimdLevel::Avx512;

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

avx512_rows!(
    f32, F32_LANES,
    max_f32, scale_f32, dot_f32, diff_f32,
    _mm512_set1_ps, _mm512_setzero_ps, _mm512_loadu_ps, _mm512_storeu_ps,
    _mm512_max_ps, _mm512_mul_ps, _mm512_sub_ps, _mm512_fmadd_ps,
    _mm512_reduce_max_ps, _mm512_reduce_add_ps
);

avx512_rows!(
    f64, F64_LANES,
    max_f64, scale_f64, dot_f64, diff_f64,
    _mm512_set1_pd, _mm512_setzero_pd, _mm512_loadu_pd, _mm512_storeu_pd,
    _mm512_max_pd, _mm512_mul_pd, _mm512_sub_pd, _mm512_fmadd_pd,
    _mm512_reduce_max_pd, _mm512_reduce_add_pd
);
