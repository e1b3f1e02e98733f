//! CPU feature detection via CPUID.
//!
//! The vector floating-point emitter specializes on host capabilities at
//! emission time: SSE4.1 buys `ptest` and `roundps`, AVX buys
//! three-operand forms and `vblendv`, FMA3 buys the fused-multiply-add
//! fast path, and AVX-512VL buys the unsigned integer conversions. Feature
//! detection runs once and is cached; queries are thread-safe and
//! allocation-free.

use std::sync::OnceLock;

bitflags::bitflags! {
    /// CPU feature flags the emitter consults.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct HostFeatureFlags: u32 {
        /// SSE3 (haddps/haddpd).
        const SSE3     = 1 << 0;
        /// Supplemental SSE3.
        const SSSE3    = 1 << 1;
        /// SSE4.1 (ptest, roundps, pextrq).
        const SSE41    = 1 << 2;
        /// AVX (VEX three-operand forms, vblendv).
        const AVX      = 1 << 3;
        /// AVX2.
        const AVX2     = 1 << 4;
        /// FMA3 (vfmadd231).
        const FMA      = 1 << 5;
        /// AVX-512 Foundation.
        const AVX512F  = 1 << 6;
        /// AVX-512 Doubleword and Quadword.
        const AVX512DQ = 1 << 7;
        /// AVX-512 Vector Length extensions (128-bit EVEX forms).
        const AVX512VL = 1 << 8;
    }
}

/// Detected host CPU features.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostFeatures {
    flags: HostFeatureFlags,
}

impl HostFeatures {
    /// Detect features for the current CPU, cached after the first call.
    pub fn detect() -> &'static Self {
        static FEATURES: OnceLock<HostFeatures> = OnceLock::new();
        FEATURES.get_or_init(Self::detect_impl)
    }

    /// The x86-64 baseline: SSE2 only. Useful for forcing the fallback
    /// paths in tests.
    pub const fn baseline() -> Self {
        HostFeatures {
            flags: HostFeatureFlags::empty(),
        }
    }

    /// Build from explicit flags (for tests that pin a capability level).
    pub const fn from_flags(flags: HostFeatureFlags) -> Self {
        HostFeatures { flags }
    }

    fn detect_impl() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            Self::detect_x86_64()
        }
        #[cfg(not(target_arch = "x86_64"))]
        {
            Self::baseline()
        }
    }

    #[cfg(target_arch = "x86_64")]
    fn detect_x86_64() -> Self {
        use std::arch::x86_64::{__cpuid, __cpuid_count};

        let mut flags = HostFeatureFlags::empty();

        let cpuid0 = unsafe { __cpuid(0) };
        let max_basic_leaf = cpuid0.eax;

        if max_basic_leaf >= 1 {
            let cpuid1 = unsafe { __cpuid(1) };
            let ecx = cpuid1.ecx;
            if ecx & (1 << 0) != 0 {
                flags |= HostFeatureFlags::SSE3;
            }
            if ecx & (1 << 9) != 0 {
                flags |= HostFeatureFlags::SSSE3;
            }
            if ecx & (1 << 12) != 0 {
                flags |= HostFeatureFlags::FMA;
            }
            if ecx & (1 << 19) != 0 {
                flags |= HostFeatureFlags::SSE41;
            }
            if ecx & (1 << 28) != 0 {
                flags |= HostFeatureFlags::AVX;
            }
        }

        if max_basic_leaf >= 7 {
            let cpuid7 = unsafe { __cpuid_count(7, 0) };
            let ebx = cpuid7.ebx;
            if ebx & (1 << 5) != 0 {
                flags |= HostFeatureFlags::AVX2;
            }
            if ebx & (1 << 16) != 0 {
                flags |= HostFeatureFlags::AVX512F;
            }
            if ebx & (1 << 17) != 0 {
                flags |= HostFeatureFlags::AVX512DQ;
            }
            if ebx & (1 << 31) != 0 {
                flags |= HostFeatureFlags::AVX512VL;
            }
        }

        HostFeatures { flags }
    }

    /// Raw flags.
    #[inline]
    pub const fn flags(self) -> HostFeatureFlags {
        self.flags
    }

    /// SSE3 available.
    #[inline]
    pub const fn has_sse3(self) -> bool {
        self.flags.contains(HostFeatureFlags::SSE3)
    }

    /// SSE4.1 available.
    #[inline]
    pub const fn has_sse41(self) -> bool {
        self.flags.contains(HostFeatureFlags::SSE41)
    }

    /// AVX available.
    #[inline]
    pub const fn has_avx(self) -> bool {
        self.flags.contains(HostFeatureFlags::AVX)
    }

    /// AVX2 available.
    #[inline]
    pub const fn has_avx2(self) -> bool {
        self.flags.contains(HostFeatureFlags::AVX2)
    }

    /// FMA3 available.
    #[inline]
    pub const fn has_fma(self) -> bool {
        self.flags.contains(HostFeatureFlags::FMA)
    }

    /// The 128-bit AVX-512 conversion forms are usable (F+DQ+VL).
    #[inline]
    pub const fn has_avx512vl_dq(self) -> bool {
        self.flags.contains(
            HostFeatureFlags::AVX512F
                .union(HostFeatureFlags::AVX512DQ)
                .union(HostFeatureFlags::AVX512VL),
        )
    }

    /// AVX-512VL available with the foundation set.
    #[inline]
    pub const fn has_avx512vl(self) -> bool {
        self.flags
            .contains(HostFeatureFlags::AVX512F.union(HostFeatureFlags::AVX512VL))
    }
}
