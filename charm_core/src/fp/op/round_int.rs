//! Round to integral-valued float.

use super::super::fpcr::Fpcr;
use super::super::fpsr::Fpsr;
use super::super::info::FloatLane;
use super::super::rounding::RoundingMode;
use super::super::unpacked::{unpack, FpType};
use super::process_nan;

/// ARM `FPRoundInt`: round to an integral value in the same format.
///
/// With `exact` set, IXC is raised iff the result differs from the input.
pub fn fp_round_int<F: FloatLane>(
    op: F,
    fpcr: Fpcr,
    rounding: RoundingMode,
    exact: bool,
    fpsr: &mut Fpsr,
) -> F {
    let (ty, sign, value) = unpack(op, fpcr, fpsr);
    match ty {
        FpType::SNaN | FpType::QNaN => return process_nan(ty, op, fpcr, fpsr),
        FpType::Infinity => return F::infinity(sign),
        FpType::Zero => return F::zero(sign),
        FpType::Nonzero => {}
    }

    let exponent = value.exponent;
    if exponent >= F::MANTISSA_BITS as i32 {
        // The ulp is at least 1; the value is already integral.
        return op;
    }

    // Split into integral magnitude and fraction, tracking the fraction's
    // half bit and whether anything lies below it.
    let mantissa = value.mantissa;
    let (int_mag, half, below) = if exponent < -1 {
        (0u64, false, true)
    } else if exponent == -1 {
        (0u64, true, mantissa << 1 != 0)
    } else {
        let rest = mantissa << (exponent + 1);
        (mantissa >> (63 - exponent), rest >> 63 == 1, rest << 1 != 0)
    };
    let inexact = half || below;

    let increment = match rounding {
        RoundingMode::ToNearestTieEven => half && (below || int_mag & 1 == 1),
        RoundingMode::ToNearestTieAwayFromZero => half,
        RoundingMode::TowardsPlusInfinity => !sign && inexact,
        RoundingMode::TowardsMinusInfinity => sign && inexact,
        RoundingMode::TowardsZero => false,
    };
    let magnitude = int_mag + increment as u64;

    if inexact && exact {
        fpsr.set_ixc();
    }

    if magnitude == 0 {
        return F::zero(sign);
    }

    // Repack exactly: the magnitude is at most 2^(mantissa bits), so the
    // value is always representable.
    let lz = magnitude.leading_zeros();
    let normalized = magnitude << lz;
    let biased = (63 - lz as i32 + F::EXPONENT_BIAS) as u32;
    F::from_parts(
        sign,
        biased,
        (normalized & !(1 << 63)) >> (63 - F::MANTISSA_BITS),
    )
}
