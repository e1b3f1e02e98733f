//! Basic arithmetic: abs, neg, add, sub, mul, div.

use super::super::fpcr::Fpcr;
use super::super::fpsr::Fpsr;
use super::super::info::FloatLane;
use super::super::unpacked::{add128, mul128, round, unpack, FpType, Unpacked128};
use super::{exact_zero_sign, process_nans};

/// Clear the sign bit. Never raises exceptions.
#[inline]
pub fn fp_abs<F: FloatLane>(op: F) -> F {
    F::from_u64(op.to_u64() & !F::SIGN_MASK.to_u64())
}

/// Flip the sign bit. Never raises exceptions.
#[inline]
pub fn fp_neg<F: FloatLane>(op: F) -> F {
    op.negated()
}

/// Addition with a single rounding.
pub fn fp_add<F: FloatLane>(op1: F, op2: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    add_with_sign(op1, op2, false, fpcr, fpsr)
}

/// Subtraction with a single rounding.
pub fn fp_sub<F: FloatLane>(op1: F, op2: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    add_with_sign(op1, op2, true, fpcr, fpsr)
}

fn add_with_sign<F: FloatLane>(op1: F, op2: F, negate2: bool, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    let (ty1, sign1, value1) = unpack(op1, fpcr, fpsr);
    let (ty2, mut sign2, value2) = unpack(op2, fpcr, fpsr);
    if let Some(result) = process_nans(ty1, ty2, op1, op2, fpcr, fpsr) {
        return result;
    }
    sign2 ^= negate2;

    let inf1 = ty1 == FpType::Infinity;
    let inf2 = ty2 == FpType::Infinity;
    let zero1 = ty1 == FpType::Zero;
    let zero2 = ty2 == FpType::Zero;

    if inf1 && inf2 && sign1 != sign2 {
        fpsr.set_ioc();
        return F::DEFAULT_NAN;
    }
    if (inf1 && !sign1) || (inf2 && !sign2) {
        return F::infinity(false);
    }
    if (inf1 && sign1) || (inf2 && sign2) {
        return F::infinity(true);
    }
    if zero1 && zero2 && sign1 == sign2 {
        return F::zero(sign1);
    }

    let a = (!zero1).then(|| value1.widen(sign1));
    let b = (!zero2).then(|| value2.widen(sign2));
    round_sum(a, b, fpcr, fpsr)
}

fn round_sum<F: FloatLane>(
    a: Option<Unpacked128>,
    b: Option<Unpacked128>,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
) -> F {
    let mode = fpcr.rounding_mode();
    match (a, b) {
        (None, None) => F::zero(exact_zero_sign(fpcr)),
        (Some(x), None) | (None, Some(x)) => round(x, false, fpcr, mode, fpsr),
        (Some(x), Some(y)) => match add128(x, y) {
            Some((value, sticky)) => round(value, sticky, fpcr, mode, fpsr),
            None => F::zero(exact_zero_sign(fpcr)),
        },
    }
}

/// Multiplication with a single rounding.
pub fn fp_mul<F: FloatLane>(op1: F, op2: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    let (ty1, sign1, value1) = unpack(op1, fpcr, fpsr);
    let (ty2, sign2, value2) = unpack(op2, fpcr, fpsr);
    if let Some(result) = process_nans(ty1, ty2, op1, op2, fpcr, fpsr) {
        return result;
    }

    let inf1 = ty1 == FpType::Infinity;
    let inf2 = ty2 == FpType::Infinity;
    let zero1 = ty1 == FpType::Zero;
    let zero2 = ty2 == FpType::Zero;
    let sign = sign1 ^ sign2;

    if (inf1 && zero2) || (zero1 && inf2) {
        fpsr.set_ioc();
        return F::DEFAULT_NAN;
    }
    if inf1 || inf2 {
        return F::infinity(sign);
    }
    if zero1 || zero2 {
        return F::zero(sign);
    }

    let mode = fpcr.rounding_mode();
    round(mul128(sign, value1, value2), false, fpcr, mode, fpsr)
}

/// Division with a single rounding.
pub fn fp_div<F: FloatLane>(op1: F, op2: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    let (ty1, sign1, value1) = unpack(op1, fpcr, fpsr);
    let (ty2, sign2, value2) = unpack(op2, fpcr, fpsr);
    if let Some(result) = process_nans(ty1, ty2, op1, op2, fpcr, fpsr) {
        return result;
    }

    let inf1 = ty1 == FpType::Infinity;
    let inf2 = ty2 == FpType::Infinity;
    let zero1 = ty1 == FpType::Zero;
    let zero2 = ty2 == FpType::Zero;
    let sign = sign1 ^ sign2;

    if (inf1 && inf2) || (zero1 && zero2) {
        fpsr.set_ioc();
        return F::DEFAULT_NAN;
    }
    if inf1 || zero2 {
        if !inf1 {
            fpsr.set_dzc();
        }
        return F::infinity(sign);
    }
    if zero1 || inf2 {
        return F::zero(sign);
    }

    // 64 quotient bits leave the residual far below the rounding guard of
    // either destination format, so it folds into the sticky bit.
    let dividend = (value1.mantissa as u128) << 64;
    let divisor = value2.mantissa as u128;
    let quotient = dividend / divisor;
    let remainder = dividend % divisor;
    let lz = quotient.leading_zeros();
    let value = Unpacked128 {
        sign,
        exponent: value1.exponent - value2.exponent + 63 - lz as i32,
        mantissa: quotient << lz,
    };
    round(value, remainder != 0, fpcr, fpcr.rounding_mode(), fpsr)
}
