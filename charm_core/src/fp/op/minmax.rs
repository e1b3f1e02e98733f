//! Max and min with ARM's signed-zero and NaN rules.

use std::cmp::Ordering;

use super::super::fpcr::Fpcr;
use super::super::fpsr::Fpsr;
use super::super::info::FloatLane;
use super::super::unpacked::{round, unpack, FpType, Unpacked};
use super::process_nans;

/// Numeric ordering of two non-NaN unpacked values. Zeros compare equal
/// regardless of sign; the sign rules below break that tie.
fn value_cmp(
    ty1: FpType,
    sign1: bool,
    v1: Unpacked,
    ty2: FpType,
    sign2: bool,
    v2: Unpacked,
) -> Ordering {
    let mag = || -> Ordering {
        match (ty1, ty2) {
            (FpType::Zero, FpType::Zero) => Ordering::Equal,
            (FpType::Zero, _) => Ordering::Less,
            (_, FpType::Zero) => Ordering::Greater,
            (FpType::Infinity, FpType::Infinity) => Ordering::Equal,
            (FpType::Infinity, _) => Ordering::Greater,
            (_, FpType::Infinity) => Ordering::Less,
            _ => (v1.exponent, v1.mantissa).cmp(&(v2.exponent, v2.mantissa)),
        }
    };

    if ty1 == FpType::Zero && ty2 == FpType::Zero {
        return Ordering::Equal;
    }
    match (sign1, sign2) {
        (false, false) => mag(),
        (true, true) => mag().reverse(),
        (false, true) => Ordering::Greater,
        (true, false) => Ordering::Less,
    }
}

/// ARM `FPMax`: `Max(+0, -0)` is `+0`.
pub fn fp_max<F: FloatLane>(op1: F, op2: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    let (ty1, sign1, value1) = unpack(op1, fpcr, fpsr);
    let (ty2, sign2, value2) = unpack(op2, fpcr, fpsr);
    if let Some(result) = process_nans(ty1, ty2, op1, op2, fpcr, fpsr) {
        return result;
    }

    let pick1 = value_cmp(ty1, sign1, value1, ty2, sign2, value2) == Ordering::Greater;
    let (ty, sign, value) = if pick1 {
        (ty1, sign1, value1)
    } else {
        (ty2, sign2, value2)
    };
    match ty {
        FpType::Infinity => F::infinity(sign),
        // Equal-valued zeros take the most positive sign.
        FpType::Zero => F::zero(sign1 && sign2),
        _ => round(value.widen(sign), false, fpcr, fpcr.rounding_mode(), fpsr),
    }
}

/// ARM `FPMin`: `Min(+0, -0)` is `-0`.
pub fn fp_min<F: FloatLane>(op1: F, op2: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    let (ty1, sign1, value1) = unpack(op1, fpcr, fpsr);
    let (ty2, sign2, value2) = unpack(op2, fpcr, fpsr);
    if let Some(result) = process_nans(ty1, ty2, op1, op2, fpcr, fpsr) {
        return result;
    }

    let pick1 = value_cmp(ty1, sign1, value1, ty2, sign2, value2) == Ordering::Less;
    let (ty, sign, value) = if pick1 {
        (ty1, sign1, value1)
    } else {
        (ty2, sign2, value2)
    };
    match ty {
        FpType::Infinity => F::infinity(sign),
        // Equal-valued zeros take the most negative sign.
        FpType::Zero => F::zero(sign1 || sign2),
        _ => round(value.widen(sign), false, fpcr, fpcr.rounding_mode(), fpsr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max32(a: u32, b: u32, fpcr: Fpcr) -> u32 {
        let mut fpsr = Fpsr::default();
        fp_max(a, b, fpcr, &mut fpsr)
    }

    fn min32(a: u32, b: u32, fpcr: Fpcr) -> u32 {
        let mut fpsr = Fpsr::default();
        fp_min(a, b, fpcr, &mut fpsr)
    }

    const POS_ZERO: u32 = 0x0000_0000;
    const NEG_ZERO: u32 = 0x8000_0000;

    #[test]
    fn test_signed_zero_rules() {
        let fpcr = Fpcr::default();
        assert_eq!(max32(POS_ZERO, NEG_ZERO, fpcr), POS_ZERO);
        assert_eq!(max32(NEG_ZERO, POS_ZERO, fpcr), POS_ZERO);
        assert_eq!(max32(NEG_ZERO, NEG_ZERO, fpcr), NEG_ZERO);
        assert_eq!(min32(POS_ZERO, NEG_ZERO, fpcr), NEG_ZERO);
        assert_eq!(min32(NEG_ZERO, POS_ZERO, fpcr), NEG_ZERO);
        assert_eq!(min32(POS_ZERO, POS_ZERO, fpcr), POS_ZERO);
    }

    #[test]
    fn test_ordinary_ordering() {
        let fpcr = Fpcr::default();
        let a = 1.5f32.to_bits();
        let b = (-2.0f32).to_bits();
        assert_eq!(max32(a, b, fpcr), a);
        assert_eq!(min32(a, b, fpcr), b);
        assert_eq!(
            max32((-1.0f32).to_bits(), (-2.0f32).to_bits(), fpcr),
            (-1.0f32).to_bits()
        );
    }

    #[test]
    fn test_infinities() {
        let fpcr = Fpcr::default();
        let inf = f32::INFINITY.to_bits();
        let ninf = f32::NEG_INFINITY.to_bits();
        assert_eq!(max32(inf, 1.0f32.to_bits(), fpcr), inf);
        assert_eq!(min32(ninf, 1.0f32.to_bits(), fpcr), ninf);
        assert_eq!(max32(ninf, inf, fpcr), inf);
    }

    #[test]
    fn test_nan_propagation() {
        let qnan = 0x7FC0_1234u32;
        let r = max32(qnan, 1.0f32.to_bits(), Fpcr::default());
        assert_eq!(r, qnan);

        // Default-NaN mode replaces the propagated pattern.
        let r = max32(qnan, 1.0f32.to_bits(), Fpcr::default().with_dn(true));
        assert_eq!(r, u32::DEFAULT_NAN);

        // Signalling NaN in the second operand wins over quiet in the first.
        let snan = 0x7F80_0001u32;
        let mut fpsr = Fpsr::default();
        let r = fp_max(qnan, snan, Fpcr::default(), &mut fpsr);
        assert_eq!(r, snan.quieted());
        assert!(fpsr.ioc());
    }

    #[test]
    fn test_fz_flushed_operand_compares_as_zero() {
        let fz = Fpcr::default().with_fz(true);
        // 1e-40 flushes to +0, so Max(1e-40, -1.0) is +0.
        assert_eq!(max32(1.0e-40f32.to_bits(), (-1.0f32).to_bits(), fz), POS_ZERO);
        // And Min(-1e-40, +0) is -0.
        assert_eq!(min32((-1.0e-40f32).to_bits(), POS_ZERO, fz), NEG_ZERO);
    }

    #[test]
    fn test_double_lanes() {
        let fpcr = Fpcr::default();
        let mut fpsr = Fpsr::default();
        let a = 4.0f64.to_bits();
        let b = 4.5f64.to_bits();
        assert_eq!(fp_max(a, b, fpcr, &mut fpsr), b);
        assert_eq!(fp_min(a, b, fpcr, &mut fpsr), a);
    }
}
