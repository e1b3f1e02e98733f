//! Guest floating-point control register.

use super::rounding::RoundingMode;

/// The ARM floating-point control register (the control half of FPSCR).
///
/// Only the bits the translator specializes on are modelled: `DN`
/// (default NaN), `FZ` (flush to zero) and `RMode`. The remaining bits are
/// carried verbatim so a value read from the guest round-trips unchanged.
///
/// Bit layout (ARMv7 VFP):
///
/// ```text
/// [25] DN    [24] FZ    [23:22] RMode
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Fpcr(u32);

const DN_BIT: u32 = 1 << 25;
const FZ_BIT: u32 = 1 << 24;
const RMODE_SHIFT: u32 = 22;
const RMODE_MASK: u32 = 0b11 << RMODE_SHIFT;

impl Fpcr {
    /// Wrap a raw FPSCR control value.
    #[inline]
    pub const fn from_bits(bits: u32) -> Fpcr {
        Fpcr(bits)
    }

    /// The raw register value.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Default-NaN mode: every NaN result is replaced by the architected
    /// quiet NaN pattern.
    #[inline]
    pub const fn dn(self) -> bool {
        self.0 & DN_BIT != 0
    }

    /// Flush-to-zero mode: denormal inputs and outputs are flushed to
    /// same-signed zero.
    #[inline]
    pub const fn fz(self) -> bool {
        self.0 & FZ_BIT != 0
    }

    /// The rounding mode selected by the `RMode` field.
    #[inline]
    pub const fn rounding_mode(self) -> RoundingMode {
        RoundingMode::from_fpcr_field(self.0 >> RMODE_SHIFT)
    }

    /// Copy with the DN bit set or cleared.
    #[must_use]
    pub const fn with_dn(self, dn: bool) -> Fpcr {
        Fpcr(if dn { self.0 | DN_BIT } else { self.0 & !DN_BIT })
    }

    /// Copy with the FZ bit set or cleared.
    #[must_use]
    pub const fn with_fz(self, fz: bool) -> Fpcr {
        Fpcr(if fz { self.0 | FZ_BIT } else { self.0 & !FZ_BIT })
    }

    /// Copy with a different rounding mode.
    ///
    /// `ToNearestTieAwayFromZero` has no encoding in the register and is
    /// rejected here; it only ever arrives as an opcode immediate.
    #[must_use]
    pub const fn with_rounding_mode(self, mode: RoundingMode) -> Fpcr {
        let field = match mode {
            RoundingMode::ToNearestTieEven => 0b00,
            RoundingMode::TowardsPlusInfinity => 0b01,
            RoundingMode::TowardsMinusInfinity => 0b10,
            RoundingMode::TowardsZero => 0b11,
            RoundingMode::ToNearestTieAwayFromZero => {
                panic!("tie-away has no FPCR encoding")
            }
        };
        Fpcr((self.0 & !RMODE_MASK) | (field << RMODE_SHIFT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_nearest_even() {
        let fpcr = Fpcr::default();
        assert!(!fpcr.dn());
        assert!(!fpcr.fz());
        assert_eq!(fpcr.rounding_mode(), RoundingMode::ToNearestTieEven);
    }

    #[test]
    fn test_bit_positions() {
        assert!(Fpcr::from_bits(1 << 25).dn());
        assert!(Fpcr::from_bits(1 << 24).fz());
        assert_eq!(
            Fpcr::from_bits(0b10 << 22).rounding_mode(),
            RoundingMode::TowardsMinusInfinity
        );
    }

    #[test]
    fn test_with_accessors_round_trip() {
        let fpcr = Fpcr::default()
            .with_dn(true)
            .with_fz(true)
            .with_rounding_mode(RoundingMode::TowardsZero);
        assert!(fpcr.dn());
        assert!(fpcr.fz());
        assert_eq!(fpcr.rounding_mode(), RoundingMode::TowardsZero);

        let cleared = fpcr.with_dn(false).with_fz(false);
        assert!(!cleared.dn());
        assert!(!cleared.fz());
        assert_eq!(cleared.rounding_mode(), RoundingMode::TowardsZero);
    }

    #[test]
    fn test_unmodelled_bits_preserved() {
        let raw = 0x0000_009F;
        assert_eq!(Fpcr::from_bits(raw).with_dn(true).bits(), raw | (1 << 25));
    }
}
