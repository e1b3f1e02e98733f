//! The scalar reference operations.
//!
//! Each function is the ground truth for one guest operation on one lane:
//! given raw operand bit patterns, the FPCR, and a cumulative FPSR, it
//! produces the exact result bit pattern the guest FPU would. The JIT's
//! software fallbacks call these per lane; the test suites compare
//! JIT-emitted code against them.

mod arith;
mod estimate;
mod minmax;
mod mul_add;
mod round_int;
mod to_fixed;

pub use arith::{fp_abs, fp_add, fp_div, fp_mul, fp_neg, fp_sub};
pub use estimate::{fp_recip_estimate, fp_rsqrt_estimate};
pub use minmax::{fp_max, fp_min};
pub use mul_add::{fp_mul_add, fp_recip_step_fused, fp_rsqrt_step_fused};
pub use round_int::fp_round_int;
pub use to_fixed::fp_to_fixed;

use super::fpcr::Fpcr;
use super::fpsr::Fpsr;
use super::info::FloatLane;
use super::unpacked::FpType;

/// Process a single NaN operand: quiet it (raising IOC for a signalling
/// NaN), then substitute the default NaN when DN is set.
pub(crate) fn process_nan<F: FloatLane>(ty: FpType, op: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    debug_assert!(matches!(ty, FpType::SNaN | FpType::QNaN));
    let mut result = op;
    if ty == FpType::SNaN {
        result = op.quieted();
        fpsr.set_ioc();
    }
    if fpcr.dn() {
        result = F::DEFAULT_NAN;
    }
    result
}

/// ARM two-operand NaN processing: the first signalling NaN wins, then the
/// first quiet NaN. Returns `None` when neither operand is a NaN.
pub(crate) fn process_nans<F: FloatLane>(
    ty1: FpType,
    ty2: FpType,
    op1: F,
    op2: F,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
) -> Option<F> {
    if ty1 == FpType::SNaN {
        Some(process_nan(ty1, op1, fpcr, fpsr))
    } else if ty2 == FpType::SNaN {
        Some(process_nan(ty2, op2, fpcr, fpsr))
    } else if ty1 == FpType::QNaN {
        Some(process_nan(ty1, op1, fpcr, fpsr))
    } else if ty2 == FpType::QNaN {
        Some(process_nan(ty2, op2, fpcr, fpsr))
    } else {
        None
    }
}

/// ARM three-operand NaN processing.
pub(crate) fn process_nans3<F: FloatLane>(
    ty1: FpType,
    ty2: FpType,
    ty3: FpType,
    op1: F,
    op2: F,
    op3: F,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
) -> Option<F> {
    if ty1 == FpType::SNaN {
        Some(process_nan(ty1, op1, fpcr, fpsr))
    } else if ty2 == FpType::SNaN {
        Some(process_nan(ty2, op2, fpcr, fpsr))
    } else if ty3 == FpType::SNaN {
        Some(process_nan(ty3, op3, fpcr, fpsr))
    } else if ty1 == FpType::QNaN {
        Some(process_nan(ty1, op1, fpcr, fpsr))
    } else if ty2 == FpType::QNaN {
        Some(process_nan(ty2, op2, fpcr, fpsr))
    } else if ty3 == FpType::QNaN {
        Some(process_nan(ty3, op3, fpcr, fpsr))
    } else {
        None
    }
}

/// Sign of an exact-zero sum: negative only when rounding towards −∞.
#[inline]
pub(crate) fn exact_zero_sign(fpcr: Fpcr) -> bool {
    fpcr.rounding_mode() == super::rounding::RoundingMode::TowardsMinusInfinity
}
