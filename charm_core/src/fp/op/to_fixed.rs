//! Float to fixed-point conversion with saturation.

use super::super::fpcr::Fpcr;
use super::super::fpsr::Fpsr;
use super::super::info::FloatLane;
use super::super::rounding::RoundingMode;
use super::super::unpacked::{unpack, FpType};

/// ARM `FPToFixed`: scale by `2^fbits`, round to an integer with the given
/// mode, and saturate to the lane width.
///
/// The result occupies the full lane: a signed result is returned in two's
/// complement. NaN converts to zero with IOC; saturation raises IOC;
/// anything else inexact raises IXC.
pub fn fp_to_fixed<F: FloatLane>(
    op: F,
    fbits: u32,
    unsigned: bool,
    rounding: RoundingMode,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
) -> F {
    debug_assert!(fbits <= F::BITS);

    let (ty, sign, value) = unpack(op, fpcr, fpsr);
    match ty {
        FpType::SNaN | FpType::QNaN => {
            fpsr.set_ioc();
            return F::from_u64(0);
        }
        FpType::Infinity => {
            fpsr.set_ioc();
            return saturation_limit(sign, unsigned);
        }
        FpType::Zero => return F::from_u64(0),
        FpType::Nonzero => {}
    }

    let exponent = value.exponent + fbits as i32;
    let mantissa = value.mantissa;

    // Integral magnitude plus half/below fraction bits, as in FPRoundInt
    // but wide enough that scaling cannot wrap.
    let (int_mag, half, below): (u128, bool, bool) = if exponent < -1 {
        (0, false, true)
    } else if exponent == -1 {
        (0, true, mantissa << 1 != 0)
    } else if exponent < 63 {
        let rest = mantissa << (exponent + 1);
        (
            (mantissa >> (63 - exponent)) as u128,
            rest >> 63 == 1,
            rest << 1 != 0,
        )
    } else if exponent <= 127 {
        ((mantissa as u128) << (exponent - 63), false, false)
    } else {
        // Magnitude at least 2^127: saturates every lane width.
        fpsr.set_ioc();
        return saturation_limit(sign, unsigned);
    };
    let inexact = half || below;

    let increment = match rounding {
        RoundingMode::ToNearestTieEven => half && (below || int_mag & 1 == 1),
        RoundingMode::ToNearestTieAwayFromZero => half,
        RoundingMode::TowardsPlusInfinity => !sign && inexact,
        RoundingMode::TowardsMinusInfinity => sign && inexact,
        RoundingMode::TowardsZero => false,
    };
    let magnitude = int_mag + increment as u128;

    let (bits, overflow) = saturate::<F>(sign, magnitude, unsigned);
    if overflow {
        fpsr.set_ioc();
    } else if inexact {
        fpsr.set_ixc();
    }
    F::from_u64(bits)
}

fn saturate<F: FloatLane>(sign: bool, magnitude: u128, unsigned: bool) -> (u64, bool) {
    if unsigned {
        let max = (u64::MAX >> (64 - F::BITS)) as u128;
        if sign && magnitude != 0 {
            (0, true)
        } else if magnitude > max {
            (max as u64, true)
        } else {
            (magnitude as u64, false)
        }
    } else {
        let limit = 1u128 << (F::BITS - 1);
        if !sign {
            if magnitude >= limit {
                ((limit - 1) as u64, true)
            } else {
                (magnitude as u64, false)
            }
        } else if magnitude > limit {
            (limit as u64, true)
        } else {
            ((magnitude as u64).wrapping_neg(), false)
        }
    }
}

fn saturation_limit<F: FloatLane>(sign: bool, unsigned: bool) -> F {
    let bits = if unsigned {
        if sign {
            0
        } else {
            u64::MAX >> (64 - F::BITS)
        }
    } else if sign {
        1 << (F::BITS - 1)
    } else {
        (1 << (F::BITS - 1)) - 1
    };
    F::from_u64(bits)
}
