//! SIMD capability detection and tier-specialized execution
//!
//! Detection runs once per process. Kernels registered for a tier above
//! `Scalar` call [`run_at`] (or check [`host_supports`] before touching
//! intrinsics), which re-checks the real host: a runtime forced to a tier the
//! CPU lacks resolves the higher-tier kernel but executes its baseline body.
//!
//! Tiers are `scalar < neon < neon-fp16 < avx2 < avx512`; the two SIMD
//! families never run each other's kernels.

use crate::error::{Error, Result};
use std::str::FromStr;
use std::sync::OnceLock;

/// SIMD capability level
///
/// Ordered: a higher level can run every kernel of a lower level on the same
/// architecture. All variants exist on every platform so tiers can be forced
/// for testing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SimdLevel {
    /// Portable code only
    Scalar = 0,
    /// AArch64 baseline, 128-bit lanes
    Neon = 1,
    /// NEON plus half-precision arithmetic
    NeonFp16 = 2,
    /// 256-bit AVX2 with fused multiply-add
    Avx2Fma = 3,
    /// 512-bit AVX-512F/VL with fused multiply-add
    Avx512 = 4,
}

impl SimdLevel {
    /// Every level, lowest first
    pub const ALL: [SimdLevel; 5] = [
        SimdLevel::Scalar,
        SimdLevel::Neon,
        SimdLevel::NeonFp16,
        SimdLevel::Avx2Fma,
        SimdLevel::Avx512,
    ];

    /// AVX tiers
    #[inline]
    const fn x86_family(self) -> bool {
        matches!(self, Self::Avx2Fma | Self::Avx512)
    }

    /// NEON tiers
    #[inline]
    const fn arm_family(self) -> bool {
        matches!(self, Self::Neon | Self::NeonFp16)
    }
}

impl std::fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Scalar => "scalar",
            Self::Neon => "neon",
            Self::NeonFp16 => "neon-fp16",
            Self::Avx2Fma => "avx2",
            Self::Avx512 => "avx512",
        };
        f.write_str(name)
    }
}

impl FromStr for SimdLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scalar" => Ok(Self::Scalar),
            "neon" => Ok(Self::Neon),
            "neon-fp16" | "neonfp16" => Ok(Self::NeonFp16),
            "avx2" | "avx2fma" | "avx2+fma" => Ok(Self::Avx2Fma),
            "avx512" | "avx-512" => Ok(Self::Avx512),
            other => Err(Error::InvalidConfig {
                key: "simd_level",
                reason: format!(
                    "unknown SIMD level '{other}' (expected scalar|neon|neon-fp16|avx2|avx512)"
                ),
            }),
        }
    }
}

static HOST_LEVEL: OnceLock<SimdLevel> = OnceLock::new();

/// Highest tier the host CPU executes, probed on first call
#[inline]
pub fn detect_simd() -> SimdLevel {
    *HOST_LEVEL.get_or_init(|| {
        let level = probe_host();
        tracing::debug!(level = %level, "detected host SIMD level");
        level
    })
}

#[cold]
#[allow(unreachable_code)]
fn probe_host() -> SimdLevel {
    #[cfg(target_arch = "x86_64")]
    {
        let fma = is_x86_feature_detected!("fma");
        let avx512 = is_x86_feature_detected!("avx512f") && is_x86_feature_detected!("avx512vl");
        return match (fma, avx512, is_x86_feature_detected!("avx2")) {
            (true, true, _) => SimdLevel::Avx512,
            (true, false, true) => SimdLevel::Avx2Fma,
            _ => SimdLevel::Scalar,
        };
    }

    #[cfg(target_arch = "aarch64")]
    {
        return if std::arch::is_aarch64_feature_detected!("fp16") {
            SimdLevel::NeonFp16
        } else {
            SimdLevel::Neon
        };
    }

    SimdLevel::Scalar
}

/// True when the real host can execute instructions of `level`
///
/// Levels of another architecture are never supported.
#[inline]
pub fn host_supports(level: SimdLevel) -> bool {
    let host = detect_simd();
    level == SimdLevel::Scalar
        || (level.x86_family() == host.x86_family()
            && level.arm_family() == host.arm_family()
            && level <= host)
}

/// Run `f` compiled with the target features of `level`
///
/// `f` is inlined into a `#[target_feature]` frame, letting the compiler
/// vectorize the baseline body for the wider instruction set. Falls back to
/// a plain call when the host lacks `level`.
#[inline(always)]
pub fn run_at<R>(level: SimdLevel, f: impl FnOnce() -> R) -> R {
    if !host_supports(level) {
        return f();
    }
    match level {
        #[cfg(target_arch = "x86_64")]
        // SAFETY: host_supports verified avx512f/avx512vl/fma at runtime
        SimdLevel::Avx512 => unsafe { x86::with_avx512(f) },
        #[cfg(target_arch = "x86_64")]
        // SAFETY: host_supports verified avx2/fma at runtime
        SimdLevel::Avx2Fma => unsafe { x86::with_avx2(f) },
        #[cfg(target_arch = "aarch64")]
        // SAFETY: NEON is mandatory on aarch64
        SimdLevel::Neon | SimdLevel::NeonFp16 => unsafe { arm::with_neon(f) },
        _ => f(),
    }
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    #[target_feature(enable = "avx512f,avx512vl,fma")]
    #[inline]
    pub(super) unsafe fn with_avx512<R>(f: impl FnOnce() -> R) -> R {
        f()
    }

    #[target_feature(enable = "avx2,fma")]
    #[inline]
    pub(super) unsafe fn with_avx2<R>(f: impl FnOnce() -> R) -> R {
        f()
    }
}

#[cfg(target_arch = "aarch64")]
mod arm {
    #[target_feature(enable = "neon")]
    #[inline]
    pub(super) unsafe fn with_neon<R>(f: impl FnOnce() -> R) -> R {
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_is_cached() {
        assert_eq!(detect_simd(), detect_simd());
    }

    #[test]
    fn test_ordering() {
        assert!(SimdLevel::Scalar < SimdLevel::Neon);
        assert!(SimdLevel::Avx2Fma < SimdLevel::Avx512);
        let mut sorted = SimdLevel::ALL;
        sorted.sort();
        assert_eq!(sorted, SimdLevel::ALL);
    }

    #[test]
    fn test_display_parses_back() {
        for level in SimdLevel::ALL {
            assert_eq!(level.to_string().parse::<SimdLevel>().unwrap(), level);
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("AVX2".parse::<SimdLevel>().unwrap(), SimdLevel::Avx2Fma);
        assert_eq!("neon-fp16".parse::<SimdLevel>().unwrap(), SimdLevel::NeonFp16);
        assert!(matches!(
            "sse9".parse::<SimdLevel>(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_host_supports_own_level() {
        assert!(host_supports(SimdLevel::Scalar));
        assert!(host_supports(detect_simd()));
    }

    #[test]
    fn test_run_at_any_level_runs_body() {
        for level in SimdLevel::ALL {
            assert_eq!(run_at(level, || 2 + 2), 4);
        }
    }
}
