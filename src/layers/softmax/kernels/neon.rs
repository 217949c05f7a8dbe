//! NEON row primitives

use super::RowKernels;
use crate::runtime::SimdLevel;
use std::arch::aarch64::*;

const F32_LANES: usize = 4;
const F64_LANES: usize = 2;

pub(in crate::layers::softmax) struct NeonRows;

macro_rules! neon_rows {
    (
        $ty:ty, $lanes:expr,
        $max_fn:ident, $scale_fn:ident, $dot_fn:ident, $diff_fn:ident,
        $dup:ident, $load:ident, $store:ident,
        $vmax:ident, $vmul:ident, $vsub:ident, $vfma:ident,
        $maxv:ident, $addv:ident
    ) => {
        #[target_feature(enable = "neon")]
        fn $max_fn(x: &[$ty]) -> $ty {
            let chunks = x.len() / $lanes;
            let mut acc = $dup(<$ty>::NEG_INFINITY);
            for c in 0..chunks {
                acc = $vmax(acc, unsafe { $load(x.as_ptr().add(c * $lanes)) });
            }
            let mut m = $maxv(acc);
            for &v in &x[chunks * $lanes..] {
                if v > m {
                    m = v;
                }
            }
            m
        }

        #[target_feature(enable = "neon")]
        fn $scale_fn(y: &mut [$ty], s: $ty) {
            let chunks = y.len() / $lanes;
            let vs = $dup(s);
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

        #[target_feature(enable = "neon")]
        fn $dot_fn(a: &[$ty], b: &[$ty]) -> $ty {
            let n = a.len().min(b.len());
            let chunks = n / $lanes;
            let mut acc = $dup(0.0);
            for c in 0..chunks {
                unsafe {
                    let va = $load(a.as_ptr().add(c * $lanes));
                    let vb = $load(b.as_ptr().add(c * $lanes));
                    acc = $vfma(acc, va, vb);
                }
            }
            let mut s = $addv(acc);
            for k in chunks * $lanes..n {
                s += a[k] * b[k];
            }
            s
        }

        #[target_feature(enable = "neon")]
        fn $diff_fn(y: &[$ty], g: &[$ty], s: $ty, out: &mut [$ty]) {
            let n = out.len().min(y.len()).min(g.len());
            let chunks = n / $lanes;
            let vs = $dup(s);
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

        impl RowKernels<$ty> for NeonRows {
            const LEVEL: SimdLevel = SimdLevel::Neon;

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

neon_rows!(
    f32, F32_LANES,
    max_f32, scale_f32, dot_f32, diff_f32,
    vdupq_n_f32, vld1q_f32, vst1q_f32,
    vmaxq_f32, vmulq_f32, vsubq_f32, vfmaq_f32,
    vmaxvq_f32, vaddvq_f32
);

neon_rows!(
    f64, F64_LANES,
    max_f64, scale_f64, dot_f64, diff_f64,
    vdupq_n_f64, vld1q_f64, vst1q_f64,
    vmaxq_f64, vmulq_f64, vsubq_f64, vfmaq_f64,
    vmaxvq_f64, vaddvq_f64
);
