//! Reciprocal and reciprocal-square-root estimates.
//!
//! The estimate kernels are the architected 9-bit-in, 9-bit-out integer
//! recurrences; the wrappers deal with specials, the overflow/underflow
//! windows, and assembling the result exponent and fraction.

use super::super::fpcr::Fpcr;
use super::super::fpsr::Fpsr;
use super::super::info::FloatLane;
use super::super::rounding::RoundingMode;
use super::super::unpacked::{unpack, FpType};
use super::process_nan;

/// The architected reciprocal estimate recurrence.
///
/// Input and output are 9-bit fixed-point significands in [256, 512),
/// representing [1.0, 2.0) in steps of 1/256.
fn recip_estimate(a: u32) -> u32 {
    debug_assert!((256..512).contains(&a));
    let a = a * 2 + 1; // round to odd
    let b = (1 << 19) / a;
    let r = (b + 1) / 2; // round to even
    debug_assert!((256..512).contains(&r));
    r
}

/// The architected reciprocal-square-root estimate recurrence.
///
/// Input is a 9-bit significand in [128, 512) (the low half covers inputs
/// with odd exponents); output is in [256, 512).
fn recip_sqrt_estimate(a: u32) -> u32 {
    debug_assert!((128..512).contains(&a));
    let a = if a < 256 {
        // 0.25 <= x < 0.5: round to odd.
        a * 2 + 1
    } else {
        // 0.5 <= x < 1.0: round down to even, then scale.
        ((a >> 1) << 1) * 2 + 2
    };
    let mut b = 512;
    while a * (b + 1) * (b + 1) < 1 << 28 {
        b += 1;
    }
    let r = (b + 1) / 2;
    debug_assert!((256..512).contains(&r));
    r
}

/// ARM `FPRecipEstimate`.
pub fn fp_recip_estimate<F: FloatLane>(op: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    let (ty, sign, value) = unpack(op, fpcr, fpsr);
    match ty {
        FpType::SNaN | FpType::QNaN => return process_nan(ty, op, fpcr, fpsr),
        FpType::Infinity => return F::zero(sign),
        FpType::Zero => {
            fpsr.set_dzc();
            return F::infinity(sign);
        }
        FpType::Nonzero => {}
    }

    if value.exponent < F::min_exponent() - 2 {
        // The reciprocal overflows the format.
        let to_infinity = match fpcr.rounding_mode() {
            RoundingMode::ToNearestTieEven | RoundingMode::ToNearestTieAwayFromZero => true,
            RoundingMode::TowardsPlusInfinity => !sign,
            RoundingMode::TowardsMinusInfinity => sign,
            RoundingMode::TowardsZero => false,
        };
        fpsr.set_ofc();
        fpsr.set_ixc();
        return if to_infinity {
            F::infinity(sign)
        } else {
            F::max_normal(sign)
        };
    }

    if fpcr.fz() && value.exponent >= F::max_exponent() - 1 {
        // The reciprocal would be denormal; FZ flushes it.
        fpsr.set_ufc();
        return F::zero(sign);
    }

    let scaled = (value.mantissa >> 55) as u32;
    let estimate = recip_estimate(scaled) as u64;

    // Work in a 52-bit fraction view regardless of format, as the
    // architecture does, then narrow at the end.
    let mut biased = -(value.exponent + 1) + F::EXPONENT_BIAS;
    let mut fraction52 = (estimate & 0xFF) << 44;
    if biased == 0 {
        fraction52 = (1 << 51) | (fraction52 >> 1);
    } else if biased == -1 {
        fraction52 = (1 << 50) | (fraction52 >> 2);
        biased = 0;
    }
    F::from_parts(sign, biased as u32, fraction52 >> (52 - F::MANTISSA_BITS))
}

/// ARM `FPRSqrtEstimate`.
pub fn fp_rsqrt_estimate<F: FloatLane>(op: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> F {
    let (ty, sign, value) = unpack(op, fpcr, fpsr);
    match ty {
        FpType::SNaN | FpType::QNaN => return process_nan(ty, op, fpcr, fpsr),
        FpType::Zero => {
            fpsr.set_dzc();
            return F::infinity(sign);
        }
        _ if sign => {
            fpsr.set_ioc();
            return F::DEFAULT_NAN;
        }
        FpType::Infinity => return F::zero(false),
        FpType::Nonzero => {}
    }

    let fraction52 = (value.mantissa << 1) >> 12;
    let biased = value.exponent + F::EXPONENT_BIAS;
    let scaled = if biased & 1 == 0 {
        0x100 | (fraction52 >> 44) as u32
    } else {
        0x80 | (fraction52 >> 45) as u32
    };
    let result_exp = (3 * F::EXPONENT_BIAS - 1 - biased) / 2;
    let estimate = recip_sqrt_estimate(scaled) as u64;
    F::from_parts(false, result_exp as u32, ((estimate & 0xFF) << 44) >> (52 - F::MANTISSA_BITS))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe32(x: f32) -> (f32, Fpsr) {
        let mut fpsr = Fpsr::default();
        let r = fp_recip_estimate(x.to_bits(), Fpcr::default(), &mut fpsr);
        (f32::from_bits(r), fpsr)
    }

    fn rsqrte32(x: f32) -> (f32, Fpsr) {
        let mut fpsr = Fpsr::default();
        let r = fp_rsqrt_estimate(x.to_bits(), Fpcr::default(), &mut fpsr);
        (f32::from_bits(r), fpsr)
    }

    #[test]
    fn test_recip_estimate_kernel_bounds() {
        for a in 256..512 {
            let r = recip_estimate(a);
            assert!((256..512).contains(&r), "recip_estimate({a}) = {r}");
        }
        // Endpoints match the architected table.
        assert_eq!(recip_estimate(256), 511);
        assert_eq!(recip_estimate(511), 256);
    }

    #[test]
    fn test_rsqrt_estimate_kernel_bounds() {
        for a in 128..512 {
            let r = recip_sqrt_estimate(a);
            assert!((256..512).contains(&r), "recip_sqrt_estimate({a}) = {r}");
        }
        assert_eq!(recip_sqrt_estimate(128), 511);
    }

    #[test]
    fn test_recip_estimate_known_values() {
        // VRECPE.F32 of 2.0 is 0.4990234375 (architected value).
        let (r, _) = recipe32(2.0);
        assert_eq!(r, 0.4990234375);

        let (r, _) = recipe32(1.0);
        assert_eq!(r, 0.998046875);

        // The estimate is monotonically non-increasing on [1, 2).
        let mut last = f32::INFINITY;
        for i in 0..32 {
            let x = 1.0 + i as f32 / 32.0;
            let (r, _) = recipe32(x);
            assert!(r <= last);
            last = r;
        }
    }

    #[test]
    fn test_recip_estimate_specials() {
        let (r, fpsr) = recipe32(0.0);
        assert_eq!(r, f32::INFINITY);
        assert!(fpsr.dzc());

        let (r, fpsr) = recipe32(-0.0);
        assert_eq!(r, f32::NEG_INFINITY);
        assert!(fpsr.dzc());

        let (r, _) = recipe32(f32::INFINITY);
        assert_eq!(r.to_bits(), 0);

        let (r, _) = recipe32(f32::NEG_INFINITY);
        assert_eq!(r.to_bits(), 0x8000_0000);
    }

    #[test]
    fn test_recip_estimate_overflow_window() {
        // 2^-129: the reciprocal exceeds the largest single; nearest-even
        // overflows to infinity with OFC+IXC.
        let tiny = f32::from_bits(0x0010_0000); // 2^-129 as a denormal
        let (r, fpsr) = recipe32(tiny);
        assert_eq!(r, f32::INFINITY);
        assert!(fpsr.ofc() && fpsr.ixc());

        // Round-towards-zero pins to the largest finite value instead.
        let mut fpsr = Fpsr::default();
        let fpcr = Fpcr::default().with_rounding_mode(RoundingMode::TowardsZero);
        let r = fp_recip_estimate(tiny.to_bits(), fpcr, &mut fpsr);
        assert_eq!(r, u32::max_normal(false));
    }

    #[test]
    fn test_recip_estimate_denormal_result() {
        // 2^127: reciprocal 2^-128 is denormal; without FZ the estimate is
        // still delivered, shifted into the subnormal fraction.
        let big = 2.0f32.powi(127);
        let (r, _) = recipe32(big);
        assert!(r > 0.0 && r.is_subnormal());

        // With FZ it flushes to zero and raises underflow.
        let mut fpsr = Fpsr::default();
        let r = fp_recip_estimate(
            big.to_bits(),
            Fpcr::default().with_fz(true),
            &mut fpsr,
        );
        assert_eq!(r, 0);
        assert!(fpsr.ufc());
    }

    #[test]
    fn test_rsqrt_estimate_known_values() {
        let (r, _) = rsqrte32(1.0);
        assert_eq!(r, 0.998046875);

        // VRSQRTE.F32 of 4.0: half the estimate for 1.0.
        let (r, _) = rsqrte32(4.0);
        assert_eq!(r, 0.4990234375);

        // An even-exponent input exercises the other kernel half.
        let (r, _) = rsqrte32(2.0);
        assert_eq!(r, 0.705078125);
    }

    #[test]
    fn test_rsqrt_estimate_specials() {
        let (r, fpsr) = rsqrte32(0.0);
        assert_eq!(r, f32::INFINITY);
        assert!(fpsr.dzc());

        let (r, fpsr) = rsqrte32(-0.0);
        assert_eq!(r, f32::NEG_INFINITY);
        assert!(fpsr.dzc());

        let (r, fpsr) = rsqrte32(-1.0);
        assert_eq!(r.to_bits(), u32::DEFAULT_NAN);
        assert!(fpsr.ioc());

        let (r, fpsr) = rsqrte32(f32::NEG_INFINITY);
        assert_eq!(r.to_bits(), u32::DEFAULT_NAN);
        assert!(fpsr.ioc());

        let (r, _) = rsqrte32(f32::INFINITY);
        assert_eq!(r.to_bits(), 0);
    }

    #[test]
    fn test_estimates_on_doubles() {
        let mut fpsr = Fpsr::default();
        let r = fp_recip_estimate(2.0f64.to_bits(), Fpcr::default(), &mut fpsr);
        assert_eq!(f64::from_bits(r), 0.4990234375);

        let r = fp_rsqrt_estimate(1.0f64.to_bits(), Fpcr::default(), &mut fpsr);
        assert_eq!(f64::from_bits(r), 0.998046875);
    }
}
