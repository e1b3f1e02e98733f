//! Fused multiply-add and the Newton-Raphson step operations.
//!
//! All three share the same core: an exact 128-bit product, an exact
//! aligned sum, and a single rounding at the end.

use super::super::fpcr::Fpcr;
use super::super::fpsr::Fpsr;
use super::super::info::FloatLane;
use super::super::rounding::RoundingMode;
use super::super::unpacked::{add128, mul128, round, unpack, FpType, Unpacked128};
use super::{exact_zero_sign, process_nans, process_nans3};

/// ARM `FPMulAdd`: `addend + op1 × op2` with a single rounding.
pub fn fp_mul_add<F: FloatLane>(addend: F, op1: F, op2: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    let (ty_a, sign_a, value_a) = unpack(addend, fpcr, fpsr);
    let (ty1, sign1, value1) = unpack(op1, fpcr, fpsr);
    let (ty2, sign2, value2) = unpack(op2, fpcr, fpsr);

    let inf1 = ty1 == FpType::Infinity;
    let inf2 = ty2 == FpType::Infinity;
    let zero1 = ty1 == FpType::Zero;
    let zero2 = ty2 == FpType::Zero;

    let nan_result = process_nans3(ty_a, ty1, ty2, addend, op1, op2, fpcr, fpsr);

    // A quiet-NaN addend does not hide an invalid ∞ × 0 product.
    if ty_a == FpType::QNaN && ((inf1 && zero2) || (zero1 && inf2)) {
        fpsr.set_ioc();
        return F::DEFAULT_NAN;
    }
    if let Some(result) = nan_result {
        return result;
    }

    let inf_a = ty_a == FpType::Infinity;
    let zero_a = ty_a == FpType::Zero;
    let sign_p = sign1 ^ sign2;
    let inf_p = inf1 || inf2;
    let zero_p = zero1 || zero2;

    if (inf1 && zero2) || (zero1 && inf2) || (inf_a && inf_p && sign_a != sign_p) {
        fpsr.set_ioc();
        return F::DEFAULT_NAN;
    }
    if (inf_a && !sign_a) || (inf_p && !sign_p) {
        return F::infinity(false);
    }
    if (inf_a && sign_a) || (inf_p && sign_p) {
        return F::infinity(true);
    }
    if zero_a && zero_p && sign_a == sign_p {
        return F::zero(sign_a);
    }

    let product = (!zero_p).then(|| mul128(sign_p, value1, value2));
    let addend128 = (!zero_a).then(|| value_a.widen(sign_a));
    fused_round_scaled(addend128, product, 0, fpcr, fpsr)
}

/// ARM `FPRecipStepFused`: `2 − op1 × op2` with a single rounding.
pub fn fp_recip_step_fused<F: FloatLane>(op1: F, op2: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    let op1 = op1.negated();
    let (ty1, sign1, value1) = unpack(op1, fpcr, fpsr);
    let (ty2, sign2, value2) = unpack(op2, fpcr, fpsr);
    if let Some(result) = process_nans(ty1, ty2, op1, op2, fpcr, fpsr) {
        return result;
    }

    let inf1 = ty1 == FpType::Infinity;
    let inf2 = ty2 == FpType::Infinity;
    let zero1 = ty1 == FpType::Zero;
    let zero2 = ty2 == FpType::Zero;

    if (inf1 && zero2) || (zero1 && inf2) {
        return two();
    }
    if inf1 || inf2 {
        return F::infinity(sign1 ^ sign2);
    }
    if zero1 || zero2 {
        return two();
    }

    let two128 = Unpacked128 {
        sign: false,
        exponent: 1,
        mantissa: 1 << 127,
    };
    let product = mul128(sign1 ^ sign2, value1, value2);
    fused_round_scaled(Some(two128), Some(product), 0, fpcr, fpsr)
}

/// ARM `FPRSqrtStepFused`: `(3 − op1 × op2) / 2` with a single rounding.
pub fn fp_rsqrt_step_fused<F: FloatLane>(op1: F, op2: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    let op1 = op1.negated();
    let (ty1, sign1, value1) = unpack(op1, fpcr, fpsr);
    let (ty2, sign2, value2) = unpack(op2, fpcr, fpsr);
    if let Some(result) = process_nans(ty1, ty2, op1, op2, fpcr, fpsr) {
        return result;
    }

    let inf1 = ty1 == FpType::Infinity;
    let inf2 = ty2 == FpType::Infinity;
    let zero1 = ty1 == FpType::Zero;
    let zero2 = ty2 == FpType::Zero;

    if (inf1 && zero2) || (zero1 && inf2) {
        return one_point_five();
    }
    if inf1 || inf2 {
        return F::infinity(sign1 ^ sign2);
    }
    if zero1 || zero2 {
        return one_point_five();
    }

    let three = Unpacked128 {
        sign: false,
        exponent: 1,
        mantissa: 0b11 << 126,
    };
    let product = mul128(sign1 ^ sign2, value1, value2);
    // The halving is a pure exponent decrement, so it stays exact and the
    // whole operation still rounds once.
    fused_round_scaled(Some(three), Some(product), -1, fpcr, fpsr)
}

fn fused_round_scaled<F: FloatLane>(
    addend: Option<Unpacked128>,
    product: Option<Unpacked128>,
    exponent_adjust: i32,
    fpcr: Fpcr,
    fpsr: &mut Fpsr,
) -> F {
    let mode = fpcr.rounding_mode();
    let finish = |mut value: Unpacked128, sticky: bool, fpsr: &mut Fpsr| {
        value.exponent += exponent_adjust;
        round(value, sticky, fpcr, mode, fpsr)
    };
    match (addend, product) {
        (None, None) => F::zero(exact_zero_sign(fpcr)),
        (Some(x), None) | (None, Some(x)) => finish(x, false, fpsr),
        (Some(x), Some(y)) => match add128(x, y) {
            Some((value, sticky)) => finish(value, sticky, fpsr),
            None => F::zero(exact_zero_sign(fpcr)),
        },
    }
}

/// The constant 2.0.
fn two<F: FloatLane>() -> F {
    F::from_parts(false, (F::EXPONENT_BIAS + 1) as u32, 0)
}

/// The constant 1.5.
fn one_point_five<F: FloatLane>() -> F {
    F::from_parts(false, F::EXPONENT_BIAS as u32, 1 << (F::MANTISSA_BITS - 1))
}
