//! Unpack, normalize and round machinery.
//!
//! Operations that cannot be computed on bit patterns directly go through a
//! normalized representation: a 64-bit mantissa with its most significant
//! bit at position 63 (128-bit / bit 127 for intermediate products and
//! sums), an unbiased exponent, and a separate sign. The value denoted is
//!
//! ```text
//! (-1)^sign × mantissa × 2^(exponent − 63)      (64-bit form)
//! (-1)^sign × mantissa × 2^(exponent − 127)     (128-bit form)
//! ```
//!
//! so a value's unbiased exponent equals the `exponent` field. Working in
//! 128 bits leaves at least 22 zero bits below any product of two 64-bit
//! normalized mantissas, which is what makes the fused-multiply-add
//! alignment below exact wherever exactness matters (see `add128`).

use super::fpcr::Fpcr;
use super::fpsr::Fpsr;
use super::info::FloatLane;
use super::rounding::RoundingMode;

// =============================================================================
// Classification
// =============================================================================

/// Classification of an unpacked operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpType {
    /// ±0.0 (including inputs flushed by FZ).
    Zero,
    /// ±∞.
    Infinity,
    /// Quiet NaN.
    QNaN,
    /// Signalling NaN.
    SNaN,
    /// Any finite nonzero value.
    Nonzero,
}

/// A nonzero finite value in 64-bit normalized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unpacked {
    /// Unbiased exponent.
    pub exponent: i32,
    /// Mantissa, normalized so bit 63 is set.
    pub mantissa: u64,
}

/// A nonzero finite value in 128-bit normalized form, sign included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unpacked128 {
    /// Sign bit.
    pub sign: bool,
    /// Unbiased exponent.
    pub exponent: i32,
    /// Mantissa, normalized so bit 127 is set.
    pub mantissa: u128,
}

impl Unpacked {
    const ZERO: Unpacked = Unpacked {
        exponent: 0,
        mantissa: 0,
    };

    /// Widen to the 128-bit form.
    #[inline]
    pub fn widen(self, sign: bool) -> Unpacked128 {
        Unpacked128 {
            sign,
            exponent: self.exponent,
            mantissa: (self.mantissa as u128) << 64,
        }
    }
}

// =============================================================================
// Unpack
// =============================================================================

/// Classify and normalize an operand.
///
/// Under FZ, a denormal input is flushed to same-signed zero and IDC is
/// set; the returned class is then [`FpType::Zero`]. The `Unpacked` payload
/// is meaningful only for [`FpType::Nonzero`].
pub fn unpack<F: FloatLane>(op: F, fpcr: Fpcr, fpsr: &mut Fpsr) -> (FpType, bool, Unpacked) {
    let sign = op.sign();
    let biased = op.biased_exponent();
    let frac = op.fraction();

    if biased == 0 {
        if frac == 0 {
            return (FpType::Zero, sign, Unpacked::ZERO);
        }
        if fpcr.fz() {
            fpsr.set_idc();
            return (FpType::Zero, sign, Unpacked::ZERO);
        }
        let lz = frac.leading_zeros();
        return (
            FpType::Nonzero,
            sign,
            Unpacked {
                exponent: F::min_exponent() - F::MANTISSA_BITS as i32 + 63 - lz as i32,
                mantissa: frac << lz,
            },
        );
    }

    if biased == (1 << F::EXPONENT_BITS) - 1 {
        if frac == 0 {
            return (FpType::Infinity, sign, Unpacked::ZERO);
        }
        let class = if op.is_signalling_nan() {
            FpType::SNaN
        } else {
            FpType::QNaN
        };
        return (class, sign, Unpacked::ZERO);
    }

    (
        FpType::Nonzero,
        sign,
        Unpacked {
            exponent: biased as i32 - F::EXPONENT_BIAS,
            mantissa: (frac | (1 << F::MANTISSA_BITS)) << (63 - F::MANTISSA_BITS),
        },
    )
}

// =============================================================================
// Round
// =============================================================================

/// Round a nonzero 128-bit normalized value to format `F`.
///
/// `sticky` carries inexactness already shifted out below bit 0 of the
/// mantissa. Raises IXC on any inexact result, OFC+IXC on overflow, UFC on
/// an inexact tiny result, and flushes tiny results to signed zero with UFC
/// alone when FZ is set.
pub fn round<F: FloatLane>(
    value: Unpacked128,
    sticky: bool,
    fpcr: Fpcr,
    mode: RoundingMode,
    fpsr: &mut Fpsr,
) -> F {
    debug_assert!(value.mantissa >> 127 == 1, "mantissa not normalized");

    let Unpacked128 {
        sign,
        mut exponent,
        mantissa,
    } = value;
    let precision = F::MANTISSA_BITS + 1;
    let min_exp = F::min_exponent();

    let tiny = exponent < min_exp;
    if tiny && fpcr.fz() {
        // Flush-to-zero output flush raises underflow but not inexact.
        fpsr.set_ufc();
        return F::zero(sign);
    }

    let denormal_shift = if tiny { (min_exp - exponent) as u32 } else { 0 };
    let shift = (128 - precision).saturating_add(denormal_shift);

    let (frac, guard, low_sticky) = if shift >= 129 {
        (0u64, false, mantissa != 0)
    } else {
        let frac = if shift == 128 {
            0
        } else {
            (mantissa >> shift) as u64
        };
        let guard = (mantissa >> (shift - 1)) & 1 == 1;
        let below = mantissa & ((1u128 << (shift - 1)) - 1) != 0;
        (frac, guard, below)
    };

    let sticky = sticky || low_sticky;
    let inexact = guard || sticky;
    let round_up = match mode {
        RoundingMode::ToNearestTieEven => guard && (sticky || frac & 1 == 1),
        RoundingMode::ToNearestTieAwayFromZero => guard,
        RoundingMode::TowardsPlusInfinity => !sign && inexact,
        RoundingMode::TowardsMinusInfinity => sign && inexact,
        RoundingMode::TowardsZero => false,
    };
    let mut frac = frac + round_up as u64;

    if tiny {
        if inexact {
            fpsr.set_ufc();
            fpsr.set_ixc();
        }
        // A carry out of the fraction field lands in the exponent field and
        // produces the smallest normal, which is exactly right.
        return F::from_u64((sign as u64) << (F::BITS - 1) | frac);
    }

    if frac == 1 << precision {
        frac >>= 1;
        exponent += 1;
    }

    if exponent > F::max_exponent() {
        fpsr.set_ofc();
        fpsr.set_ixc();
        let to_infinity = match mode {
            RoundingMode::ToNearestTieEven | RoundingMode::ToNearestTieAwayFromZero => true,
            RoundingMode::TowardsPlusInfinity => !sign,
            RoundingMode::TowardsMinusInfinity => sign,
            RoundingMode::TowardsZero => false,
        };
        return if to_infinity {
            F::infinity(sign)
        } else {
            F::max_normal(sign)
        };
    }

    if inexact {
        fpsr.set_ixc();
    }

    let biased = (exponent + F::EXPONENT_BIAS) as u64;
    F::from_u64(
        (sign as u64) << (F::BITS - 1)
            | biased << F::MANTISSA_BITS
            | (frac & ((1 << F::MANTISSA_BITS) - 1)),
    )
}

// =============================================================================
// Exact product and sum
// =============================================================================

/// Multiply two 64-bit normalized values exactly into 128-bit form.
#[inline]
pub fn mul128(sign: bool, a: Unpacked, b: Unpacked) -> Unpacked128 {
    let product = (a.mantissa as u128) * (b.mantissa as u128);
    if product >> 127 != 0 {
        Unpacked128 {
            sign,
            exponent: a.exponent + b.exponent + 1,
            mantissa: product,
        }
    } else {
        Unpacked128 {
            sign,
            exponent: a.exponent + b.exponent,
            mantissa: product << 1,
        }
    }
}

/// Add two 128-bit normalized values.
///
/// Returns `None` on exact cancellation to zero (the caller applies the
/// rounding-mode sign rule). The second tuple element is a sticky bit for
/// alignment loss.
///
/// Precision note: inputs produced by [`mul128`] from 64-bit normalized
/// mantissas have at least 22 trailing zero bits, and widened 64-bit values
/// have 64; alignment shifts small enough to permit multi-bit cancellation
/// therefore lose nothing, and lossy shifts leave at most one bit of
/// cancellation, so the sticky approximation below never disturbs bits the
/// final rounding can see.
pub fn add128(a: Unpacked128, b: Unpacked128) -> Option<(Unpacked128, bool)> {
    let (big, small) = if (a.exponent, a.mantissa) >= (b.exponent, b.mantissa) {
        (a, b)
    } else {
        (b, a)
    };
    let distance = big.exponent - small.exponent;

    let (aligned, lost) = if distance == 0 {
        (small.mantissa, false)
    } else if distance >= 128 {
        (0, small.mantissa != 0)
    } else {
        (
            small.mantissa >> distance,
            small.mantissa & ((1u128 << distance) - 1) != 0,
        )
    };

    if big.sign == small.sign {
        let (sum, carry) = big.mantissa.overflowing_add(aligned);
        if carry {
            let shifted_out = sum & 1 != 0;
            return Some((
                Unpacked128 {
                    sign: big.sign,
                    exponent: big.exponent + 1,
                    mantissa: (sum >> 1) | (1 << 127),
                },
                lost || shifted_out,
            ));
        }
        return Some((
            Unpacked128 {
                sign: big.sign,
                exponent: big.exponent,
                mantissa: sum,
            },
            lost,
        ));
    }

    let diff = big.mantissa - aligned - lost as u128;
    if diff == 0 {
        debug_assert!(!lost, "sticky cancellation cannot reach zero here");
        return None;
    }
    let lz = diff.leading_zeros();
    Some((
        Unpacked128 {
            sign: big.sign,
            exponent: big.exponent - lz as i32,
            mantissa: diff << lz,
        },
        lost,
    ))
}

// =============================================================================
// Tests
// =============================================================================
