//! Vector floating-point emission.
//!
//! Each IR opcode lowers through one routine here. The shape is always the
//! same: when default-NaN mode is on or exact NaN propagation is off, the
//! host instruction runs on the straight line with at most a default-NaN
//! sweep afterwards; otherwise the fast path is followed by a NaN detector
//! whose correction lives in the far region. Operations the host cannot
//! express (estimates, fused steps, fixed-point conversion, exact-mode
//! rounding) drop to software fallbacks that loop the `charm_core`
//! reference over lanes.
//!
//! The guest's FPCR is baked into the block: DN/FZ/RMode decisions happen
//! at emission time, never at run time.

use charm_core::fp::info::FloatLane;
use charm_core::fp::op::{
    fp_mul_add, fp_recip_estimate, fp_recip_step_fused, fp_round_int, fp_rsqrt_estimate,
    fp_rsqrt_step_fused, fp_to_fixed,
};
use charm_core::fp::util::{propagate_nan, propagate_nans};
use charm_core::{Fpcr, Fpsr, RoundingMode};

use super::abi;
use super::assembler::{Assembler, FpCompare, XmmRm};
use super::emit::EmitContext;
use super::registers::{Gpr, MemOperand, Xmm};
use crate::ir::{InstId, Opcode};
use crate::regalloc::RegAlloc;

// =============================================================================
// Element size dispatch
// =============================================================================

/// Lane width of a packed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FpSize {
    S32,
    S64,
}

macro_rules! fcode {
    ($(#[$doc:meta])* $name:ident => $ps:ident / $pd:ident) => {
        $(#[$doc])*
        fn $name(code: &mut Assembler, size: FpSize, dst: Xmm, src: impl Into<XmmRm>) {
            let src = src.into();
            match size {
                FpSize::S32 => code.$ps(dst, src),
                FpSize::S64 => code.$pd(dst, src),
            }
        }
    };
}

fcode!(addp => addps / addpd);
fcode!(subp => subps / subpd);
fcode!(mulp => mulps / mulpd);
fcode!(divp => divps / divpd);
fcode!(maxp => maxps / maxpd);
fcode!(minp => minps / minpd);
fcode!(haddp => haddps / haddpd);

fn cmpp(code: &mut Assembler, size: FpSize, dst: Xmm, src: impl Into<XmmRm>, pred: FpCompare) {
    let src = src.into();
    match size {
        FpSize::S32 => code.cmpps(dst, src, pred),
        FpSize::S64 => code.cmppd(dst, src, pred),
    }
}

fn vcmpp(
    code: &mut Assembler,
    size: FpSize,
    dst: Xmm,
    src1: Xmm,
    src2: impl Into<XmmRm>,
    pred: FpCompare,
) {
    let src2 = src2.into();
    match size {
        FpSize::S32 => code.vcmpps(dst, src1, src2, pred),
        FpSize::S64 => code.vcmppd(dst, src1, src2, pred),
    }
}

fn vmaxp(code: &mut Assembler, size: FpSize, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
    let src2 = src2.into();
    match size {
        FpSize::S32 => code.vmaxps(dst, src1, src2),
        FpSize::S64 => code.vmaxpd(dst, src1, src2),
    }
}

fn vminp(code: &mut Assembler, size: FpSize, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
    let src2 = src2.into();
    match size {
        FpSize::S32 => code.vminps(dst, src1, src2),
        FpSize::S64 => code.vminpd(dst, src1, src2),
    }
}

fn vandp(code: &mut Assembler, size: FpSize, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
    let src2 = src2.into();
    match size {
        FpSize::S32 => code.vandps(dst, src1, src2),
        FpSize::S64 => code.vandpd(dst, src1, src2),
    }
}

fn vorp(code: &mut Assembler, size: FpSize, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
    let src2 = src2.into();
    match size {
        FpSize::S32 => code.vorps(dst, src1, src2),
        FpSize::S64 => code.vorpd(dst, src1, src2),
    }
}

fn vblendvp(
    code: &mut Assembler,
    size: FpSize,
    dst: Xmm,
    src1: Xmm,
    src2: impl Into<XmmRm>,
    mask: Xmm,
) {
    let src2 = src2.into();
    match size {
        FpSize::S32 => code.vblendvps(dst, src1, src2, mask),
        FpSize::S64 => code.vblendvpd(dst, src1, src2, mask),
    }
}

fn vfmadd231p(code: &mut Assembler, size: FpSize, dst: Xmm, src1: Xmm, src2: impl Into<XmmRm>) {
    let src2 = src2.into();
    match size {
        FpSize::S32 => code.vfmadd231ps(dst, src1, src2),
        FpSize::S64 => code.vfmadd231pd(dst, src1, src2),
    }
}

fn roundp(code: &mut Assembler, size: FpSize, dst: Xmm, src: impl Into<XmmRm>, imm: u8) {
    let src = src.into();
    match size {
        FpSize::S32 => code.roundps(dst, src, imm),
        FpSize::S64 => code.roundpd(dst, src, imm),
    }
}

// =============================================================================
// Pool constants
// =============================================================================

fn nan_vector(code: &mut Assembler, size: FpSize) -> MemOperand {
    match size {
        FpSize::S32 => code.const16(0x7FC0_0000_7FC0_0000, 0x7FC0_0000_7FC0_0000),
        FpSize::S64 => code.const16(0x7FF8_0000_0000_0000, 0x7FF8_0000_0000_0000),
    }
}

fn negative_zero_vector(code: &mut Assembler, size: FpSize) -> MemOperand {
    match size {
        FpSize::S32 => code.const16(0x8000_0000_8000_0000, 0x8000_0000_8000_0000),
        FpSize::S64 => code.const16(0x8000_0000_0000_0000, 0x8000_0000_0000_0000),
    }
}

fn smallest_normal_vector(code: &mut Assembler, size: FpSize) -> MemOperand {
    match size {
        FpSize::S32 => code.const16(0x0080_0000_0080_0000, 0x0080_0000_0080_0000),
        FpSize::S64 => code.const16(0x0010_0000_0000_0000, 0x0010_0000_0000_0000),
    }
}

fn non_sign_mask(code: &mut Assembler, size: FpSize) -> MemOperand {
    match size {
        FpSize::S32 => code.const16(0x7FFF_FFFF_7FFF_FFFF, 0x7FFF_FFFF_7FFF_FFFF),
        FpSize::S64 => code.const16(0x7FFF_FFFF_FFFF_FFFF, 0x7FFF_FFFF_FFFF_FFFF),
    }
}

// =============================================================================
// NaN/denormal fix-up kernel
// =============================================================================

/// A NaN-correction handler: `values` points at `1 + narg` consecutive
/// 16-byte slots (result first), corrected in place.
pub type NanHandler = unsafe extern "C" fn(values: *mut u8, fpcr: u32);

/// A full software fallback for a one-operand operation.
pub type Fallback2 = unsafe extern "C" fn(*mut u8, *const u8, u32, *mut u32);
/// A full software fallback for a two-operand operation.
pub type Fallback3 = unsafe extern "C" fn(*mut u8, *const u8, *const u8, u32, *mut u32);
/// A full software fallback for a three-operand operation.
pub type Fallback4 = unsafe extern "C" fn(*mut u8, *const u8, *const u8, *const u8, u32, *mut u32);

/// Sweep NaN lanes of `result` to the default NaN. Emitted only under DN.
fn force_to_default_nan(
    code: &mut Assembler,
    reg_alloc: &mut RegAlloc<'_>,
    fpcr: Fpcr,
    size: FpSize,
    result: Xmm,
) {
    if !fpcr.dn() {
        return;
    }
    let nan_mask = reg_alloc.scratch_xmm();
    let ones = reg_alloc.scratch_xmm();
    code.pcmpeqw(ones, ones);
    code.movaps(nan_mask, result);
    cmpp(code, size, nan_mask, nan_mask, FpCompare::Ordered);
    code.andps(result, nan_mask);
    code.xorps(nan_mask, ones);
    let nan = nan_vector(code, size);
    code.andps(nan_mask, nan);
    code.orps(result, nan_mask);
}

/// Flush denormal operands to zero by adding a signed zero. Emitted only
/// under FZ; the zero's sign follows the rounding mode so values are
/// otherwise unchanged.
fn denormals_are_zero(
    code: &mut Assembler,
    fpcr: Fpcr,
    size: FpSize,
    to_daz: &[Xmm],
    tmp: Xmm,
) {
    if !fpcr.fz() {
        return;
    }
    if fpcr.rounding_mode() != RoundingMode::TowardsMinusInfinity {
        let neg_zero = negative_zero_vector(code, size);
        code.movaps(tmp, neg_zero);
    } else {
        code.xorps(tmp, tmp);
    }
    for &xmm in to_daz {
        addp(code, size, xmm, tmp);
    }
}

/// Test `nan_mask` and, when any lane is set, run the far-region
/// correction: spill `xmms` (result first) to a stack array, call
/// `handler`, reload the result, and resume.
fn handle_nans(
    code: &mut Assembler,
    ctx: &mut EmitContext<'_>,
    xmms: &[Xmm],
    nan_mask: Xmm,
    handler: NanHandler,
) {
    if ctx.features.has_sse41() {
        code.ptest(nan_mask, nan_mask);
    } else {
        let bitmask = ctx.reg_alloc.scratch_gpr();
        code.movmskps(bitmask, nan_mask);
        code.cmp_ri32(bitmask, 0);
    }

    let nan = code.create_label();
    let end = code.create_label();
    code.jnz_label(nan);
    code.bind_label(end);

    code.switch_to_far();
    code.bind_label(nan);

    let result = xmms[0];
    abi::push_caller_saved_except(code, result);

    let shadow = abi::ABI_SHADOW_SPACE as i32;
    let stack_space = (xmms.len() * 16) as i32;
    code.sub_ri(Gpr::Rsp, stack_space + shadow);
    for (i, &xmm) in xmms.iter().enumerate() {
        code.movaps_store(MemOperand::BaseDisp(Gpr::Rsp, shadow + (i * 16) as i32), xmm);
    }
    code.lea(abi::param_reg(0), MemOperand::BaseDisp(Gpr::Rsp, shadow));
    code.mov_ri32(abi::param_reg(1), ctx.fpcr().bits());
    abi::call_host_function(code, handler as usize);
    code.movaps(result, MemOperand::BaseDisp(Gpr::Rsp, shadow));
    code.add_ri(Gpr::Rsp, stack_space + shadow);

    abi::pop_caller_saved_except(code, result);
    code.jmp_label(end);
    code.switch_to_near();
}

// =============================================================================
// NaN-correction handlers
// =============================================================================

unsafe fn load_lanes<F: FloatLane>(ptr: *const u8) -> F::Vector {
    unsafe { ptr.cast::<F::Vector>().read_unaligned() }
}

unsafe fn store_lanes<F: FloatLane>(ptr: *mut u8, lanes: F::Vector) {
    unsafe { ptr.cast::<F::Vector>().write_unaligned(lanes) }
}

/// Default correction for one-operand ops: propagate the operand's NaN,
/// else quiet an op-generated NaN to the default pattern.
unsafe extern "C" fn nan_fixup_1op<F: FloatLane>(values: *mut u8, _fpcr: u32) {
    let a = unsafe { load_lanes::<F>(values.add(16)) };
    let mut result = unsafe { load_lanes::<F>(values) };
    for i in 0..F::LANES {
        if let Some(nan) = propagate_nan(a.as_ref()[i]) {
            result.as_mut()[i] = nan;
        } else if result.as_ref()[i].is_nan() {
            result.as_mut()[i] = F::DEFAULT_NAN;
        }
    }
    unsafe { store_lanes::<F>(values, result) }
}

/// Default correction for two-operand ops.
unsafe extern "C" fn nan_fixup_2op<F: FloatLane>(values: *mut u8, _fpcr: u32) {
    let a = unsafe { load_lanes::<F>(values.add(16)) };
    let b = unsafe { load_lanes::<F>(values.add(32)) };
    let mut result = unsafe { load_lanes::<F>(values) };
    for i in 0..F::LANES {
        if let Some(nan) = propagate_nans(a.as_ref()[i], b.as_ref()[i]) {
            result.as_mut()[i] = nan;
        } else if result.as_ref()[i].is_nan() {
            result.as_mut()[i] = F::DEFAULT_NAN;
        }
    }
    unsafe { store_lanes::<F>(values, result) }
}

/// Correction for paired addition: result lane `i` sources the adjacent
/// pair from `a` in the lower half and from `b` in the upper half.
unsafe extern "C" fn nan_fixup_paired<F: FloatLane>(values: *mut u8, _fpcr: u32) {
    let a = unsafe { load_lanes::<F>(values.add(16)) };
    let b = unsafe { load_lanes::<F>(values.add(32)) };
    let mut result = unsafe { load_lanes::<F>(values) };
    let half = F::LANES / 2;
    for i in 0..F::LANES {
        let (x, y) = if i < half {
            (a.as_ref()[2 * i], a.as_ref()[2 * i + 1])
        } else {
            (b.as_ref()[2 * (i - half)], b.as_ref()[2 * (i - half) + 1])
        };
        if let Some(nan) = propagate_nans(x, y) {
            result.as_mut()[i] = nan;
        } else if result.as_ref()[i].is_nan() {
            result.as_mut()[i] = F::DEFAULT_NAN;
        }
    }
    unsafe { store_lanes::<F>(values, result) }
}

/// Correction for the half-width paired addition. Out-of-range lanes
/// source zero pairs, leaving them to the result's own NaN sweep.
unsafe extern "C" fn nan_fixup_paired_lower<F: FloatLane>(values: *mut u8, _fpcr: u32) {
    let a = unsafe { load_lanes::<F>(values.add(16)) };
    let b = unsafe { load_lanes::<F>(values.add(32)) };
    let mut result = unsafe { load_lanes::<F>(values) };
    let zero = F::zero(false);
    for i in 0..F::LANES {
        let (x, y) = if F::LANES == 4 {
            match i {
                0 => (a.as_ref()[0], a.as_ref()[1]),
                1 => (b.as_ref()[0], b.as_ref()[1]),
                _ => (zero, zero),
            }
        } else if i == 0 {
            (a.as_ref()[0], b.as_ref()[0])
        } else {
            (zero, zero)
        };
        if let Some(nan) = propagate_nans(x, y) {
            result.as_mut()[i] = nan;
        } else if result.as_ref()[i].is_nan() {
            result.as_mut()[i] = F::DEFAULT_NAN;
        }
    }
    unsafe { store_lanes::<F>(values, result) }
}

// =============================================================================
// Software fallback bodies
// =============================================================================

unsafe fn with_fpsr(ptr: *mut u32, body: impl FnOnce(&mut Fpsr)) {
    let mut fpsr = Fpsr::from_bits(unsafe { ptr.read() });
    body(&mut fpsr);
    unsafe { ptr.write(fpsr.bits()) }
}

macro_rules! two_op_fallback_body {
    ($(#[$doc:meta])* $name:ident, $op:path) => {
        $(#[$doc])*
        unsafe extern "C" fn $name<F: FloatLane>(
            result: *mut u8,
            a: *const u8,
            fpcr: u32,
            fpsr: *mut u32,
        ) {
            let a = unsafe { load_lanes::<F>(a) };
            let mut out = F::Vector::default();
            unsafe {
                with_fpsr(fpsr, |fpsr| {
                    for i in 0..F::LANES {
                        out.as_mut()[i] = $op(a.as_ref()[i], Fpcr::from_bits(fpcr), fpsr);
                    }
                });
                store_lanes::<F>(result, out)
            }
        }
    };
}

two_op_fallback_body!(recip_estimate_fallback, fp_recip_estimate);
two_op_fallback_body!(rsqrt_estimate_fallback, fp_rsqrt_estimate);

macro_rules! three_op_fallback_body {
    ($(#[$doc:meta])* $name:ident, $op:path) => {
        $(#[$doc])*
        unsafe extern "C" fn $name<F: FloatLane>(
            result: *mut u8,
            a: *const u8,
            b: *const u8,
            fpcr: u32,
            fpsr: *mut u32,
        ) {
            let a = unsafe { load_lanes::<F>(a) };
            let b = unsafe { load_lanes::<F>(b) };
            let mut out = F::Vector::default();
            unsafe {
                with_fpsr(fpsr, |fpsr| {
                    for i in 0..F::LANES {
                        out.as_mut()[i] =
                            $op(a.as_ref()[i], b.as_ref()[i], Fpcr::from_bits(fpcr), fpsr);
                    }
                });
                store_lanes::<F>(result, out)
            }
        }
    };
}

three_op_fallback_body!(recip_step_fallback, fp_recip_step_fused);
three_op_fallback_body!(rsqrt_step_fallback, fp_rsqrt_step_fused);

unsafe extern "C" fn mul_add_fallback<F: FloatLane>(
    result: *mut u8,
    addend: *const u8,
    op1: *const u8,
    op2: *const u8,
    fpcr: u32,
    fpsr: *mut u32,
) {
    let addend = unsafe { load_lanes::<F>(addend) };
    let op1 = unsafe { load_lanes::<F>(op1) };
    let op2 = unsafe { load_lanes::<F>(op2) };
    let mut out = F::Vector::default();
    unsafe {
        with_fpsr(fpsr, |fpsr| {
            for i in 0..F::LANES {
                out.as_mut()[i] = fp_mul_add(
                    addend.as_ref()[i],
                    op1.as_ref()[i],
                    op2.as_ref()[i],
                    Fpcr::from_bits(fpcr),
                    fpsr,
                );
            }
        });
        store_lanes::<F>(result, out)
    }
}

const fn decode_rounding(index: u8) -> RoundingMode {
    match index {
        0 => RoundingMode::ToNearestTieEven,
        1 => RoundingMode::TowardsPlusInfinity,
        2 => RoundingMode::TowardsMinusInfinity,
        3 => RoundingMode::TowardsZero,
        4 => RoundingMode::ToNearestTieAwayFromZero,
        _ => panic!("invalid rounding index"),
    }
}

unsafe extern "C" fn round_int_fallback<F: FloatLane, const RM: u8, const EXACT: bool>(
    result: *mut u8,
    a: *const u8,
    fpcr: u32,
    fpsr: *mut u32,
) {
    let a = unsafe { load_lanes::<F>(a) };
    let mut out = F::Vector::default();
    unsafe {
        with_fpsr(fpsr, |fpsr| {
            for i in 0..F::LANES {
                out.as_mut()[i] = fp_round_int(
                    a.as_ref()[i],
                    Fpcr::from_bits(fpcr),
                    decode_rounding(RM),
                    EXACT,
                    fpsr,
                );
            }
        });
        store_lanes::<F>(result, out)
    }
}

unsafe extern "C" fn to_fixed_fallback<
    F: FloatLane,
    const FBITS: u8,
    const UNSIGNED: bool,
    const RM: u8,
>(
    result: *mut u8,
    a: *const u8,
    fpcr: u32,
    fpsr: *mut u32,
) {
    let a = unsafe { load_lanes::<F>(a) };
    let mut out = F::Vector::default();
    unsafe {
        with_fpsr(fpsr, |fpsr| {
            for i in 0..F::LANES {
                out.as_mut()[i] = fp_to_fixed(
                    a.as_ref()[i],
                    FBITS as u32,
                    UNSIGNED,
                    decode_rounding(RM),
                    Fpcr::from_bits(fpcr),
                    fpsr,
                );
            }
        });
        store_lanes::<F>(result, out)
    }
}

// =============================================================================
// Fallback dispatch tables
// =============================================================================

/// Monomorphic handler for a `(rounding, exact)` pair.
fn round_int_lut<F: FloatLane>(rounding: RoundingMode, exact: bool) -> Fallback2 {
    use RoundingMode::*;
    match (rounding, exact) {
        (ToNearestTieEven, false) => round_int_fallback::<F, 0, false> as Fallback2,
        (ToNearestTieEven, true) => round_int_fallback::<F, 0, true>,
        (TowardsPlusInfinity, false) => round_int_fallback::<F, 1, false>,
        (TowardsPlusInfinity, true) => round_int_fallback::<F, 1, true>,
        (TowardsMinusInfinity, false) => round_int_fallback::<F, 2, false>,
        (TowardsMinusInfinity, true) => round_int_fallback::<F, 2, true>,
        (TowardsZero, false) => round_int_fallback::<F, 3, false>,
        (TowardsZero, true) => round_int_fallback::<F, 3, true>,
        (ToNearestTieAwayFromZero, false) => round_int_fallback::<F, 4, false>,
        (ToNearestTieAwayFromZero, true) => round_int_fallback::<F, 4, true>,
    }
}

macro_rules! to_fixed_lut {
    ($F:ty, $UNSIGNED:literal, $fbits:expr, $rm:expr; $($n:literal)*) => {
        match $fbits {
            $($n => match $rm {
                RoundingMode::ToNearestTieEven =>
                    to_fixed_fallback::<$F, $n, $UNSIGNED, 0> as Fallback2,
                RoundingMode::TowardsPlusInfinity =>
                    to_fixed_fallback::<$F, $n, $UNSIGNED, 1> as Fallback2,
                RoundingMode::TowardsMinusInfinity =>
                    to_fixed_fallback::<$F, $n, $UNSIGNED, 2> as Fallback2,
                RoundingMode::TowardsZero =>
                    to_fixed_fallback::<$F, $n, $UNSIGNED, 3> as Fallback2,
                RoundingMode::ToNearestTieAwayFromZero =>
                    to_fixed_fallback::<$F, $n, $UNSIGNED, 4> as Fallback2,
            },)*
            _ => panic!("fraction-bit count out of range"),
        }
    };
}

/// Monomorphic single-precision handler for a `(fbits, rounding)` pair.
fn to_fixed_lut32(unsigned: bool, fbits: u8, rm: RoundingMode) -> Fallback2 {
    if unsigned {
        to_fixed_lut!(u32, true, fbits, rm;
            0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15
            16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31)
    } else {
        to_fixed_lut!(u32, false, fbits, rm;
            0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15
            16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31)
    }
}

/// Monomorphic double-precision handler for a `(fbits, rounding)` pair.
fn to_fixed_lut64(unsigned: bool, fbits: u8, rm: RoundingMode) -> Fallback2 {
    if unsigned {
        to_fixed_lut!(u64, true, fbits, rm;
            0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15
            16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31
            32 33 34 35 36 37 38 39 40 41 42 43 44 45 46 47
            48 49 50 51 52 53 54 55 56 57 58 59 60 61 62 63)
    } else {
        to_fixed_lut!(u64, false, fbits, rm;
            0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15
            16 17 18 19 20 21 22 23 24 25 26 27 28 29 30 31
            32 33 34 35 36 37 38 39 40 41 42 43 44 45 46 47
            48 49 50 51 52 53 54 55 56 57 58 59 60 61 62 63)
    }
}

// =============================================================================
// Fallback frame emission
// =============================================================================

/// Emit the spill-call-reload frame for a software fallback.
///
/// Layout below RSP at the call, low to high: shadow space, an optional
/// slot carrying stack-passed parameters (Windows five/six-argument
/// shapes), the result slot, one slot per operand, then spill slots for
/// caller-saved registers still holding live values.
fn emit_host_fallback_frame(
    code: &mut Assembler,
    ctx: &EmitContext<'_>,
    live: &[Xmm],
    result: Xmm,
    operands: &[Xmm],
    target: usize,
) {
    let shadow = abi::ABI_SHADOW_SPACE as i32;
    let slots = 1 + operands.len();
    let total_params = slots + 2;
    let stack_params = cfg!(windows) && total_params > abi::param_reg_count();
    let extra = stack_params as usize;
    let slot = |i: usize| MemOperand::BaseDisp(Gpr::Rsp, shadow + ((extra + i) * 16) as i32);
    let total = shadow + 16 * (extra + slots + live.len()) as i32;

    code.sub_ri(Gpr::Rsp, total);
    for (j, &reg) in live.iter().enumerate() {
        code.movaps_store(slot(slots + j), reg);
    }
    for (k, &reg) in operands.iter().enumerate() {
        code.movaps_store(slot(1 + k), reg);
    }
    for i in 0..slots {
        code.lea(abi::param_reg(i), slot(i));
    }

    let fpcr_index = slots;
    let fpsr_index = slots + 1;
    if fpcr_index < abi::param_reg_count() {
        code.mov_ri32(abi::param_reg(fpcr_index), ctx.fpcr().bits());
    } else {
        let offset = shadow + ((fpcr_index - abi::param_reg_count()) * 8) as i32;
        code.mov_store_imm32(
            MemOperand::BaseDisp(Gpr::Rsp, offset),
            ctx.fpcr().bits() as i32,
        );
    }
    if fpsr_index < abi::param_reg_count() {
        code.lea(abi::param_reg(fpsr_index), ctx.layout.fpsr_exc_operand());
    } else {
        let offset = shadow + ((fpsr_index - abi::param_reg_count()) * 8) as i32;
        code.lea(Gpr::Rax, ctx.layout.fpsr_exc_operand());
        code.mov_store(MemOperand::BaseDisp(Gpr::Rsp, offset), Gpr::Rax);
    }

    abi::call_host_function(code, target);
    code.movaps(result, slot(0));
    for (j, &reg) in live.iter().enumerate() {
        if reg != result {
            code.movaps(reg, slot(slots + j));
        }
    }
    code.add_ri(Gpr::Rsp, total);
}

fn emit_two_op_fallback(
    code: &mut Assembler,
    ctx: &mut EmitContext<'_>,
    inst: InstId,
    fallback: Fallback2,
) {
    let args = ctx.reg_alloc.args_of(inst);
    let arg1 = ctx.reg_alloc.use_xmm(args[0]);
    ctx.reg_alloc.end_of_alloc_scope();
    let live: Vec<Xmm> = ctx.reg_alloc.host_call().iter().collect();
    let result = ctx.reg_alloc.scratch_xmm();
    emit_host_fallback_frame(code, ctx, &live, result, &[arg1], fallback as usize);
    ctx.reg_alloc.define(inst, result);
}

fn emit_three_op_fallback(
    code: &mut Assembler,
    ctx: &mut EmitContext<'_>,
    inst: InstId,
    fallback: Fallback3,
) {
    let args = ctx.reg_alloc.args_of(inst);
    let arg1 = ctx.reg_alloc.use_xmm(args[0]);
    let arg2 = ctx.reg_alloc.use_xmm(args[1]);
    ctx.reg_alloc.end_of_alloc_scope();
    let live: Vec<Xmm> = ctx.reg_alloc.host_call().iter().collect();
    let result = ctx.reg_alloc.scratch_xmm();
    emit_host_fallback_frame(code, ctx, &live, result, &[arg1, arg2], fallback as usize);
    ctx.reg_alloc.define(inst, result);
}

fn emit_four_op_fallback(
    code: &mut Assembler,
    ctx: &mut EmitContext<'_>,
    inst: InstId,
    fallback: Fallback4,
) {
    let args = ctx.reg_alloc.args_of(inst);
    let arg1 = ctx.reg_alloc.use_xmm(args[0]);
    let arg2 = ctx.reg_alloc.use_xmm(args[1]);
    let arg3 = ctx.reg_alloc.use_xmm(args[2]);
    ctx.reg_alloc.end_of_alloc_scope();
    let live: Vec<Xmm> = ctx.reg_alloc.host_call().iter().collect();
    let result = ctx.reg_alloc.scratch_xmm();
    emit_host_fallback_frame(
        code,
        ctx,
        &live,
        result,
        &[arg1, arg2, arg3],
        fallback as usize,
    );
    ctx.reg_alloc.define(inst, result);
}

// =============================================================================
// Emission templates
// =============================================================================

/// One-operand template: fast host op, then either the default-NaN sweep
/// (simple policy) or the accurate NaN detector and far-region handler.
fn emit_two_op_vector_operation(
    code: &mut Assembler,
    ctx: &mut EmitContext<'_>,
    inst: InstId,
    size: FpSize,
    nan_handler: NanHandler,
    op: impl FnOnce(&mut Assembler, Xmm, Xmm),
) {
    let fpcr = ctx.fpcr();
    if !ctx.accurate_nan() || ctx.fpscr_dn() {
        let args = ctx.reg_alloc.args_of(inst);
        let xmm_a = ctx.reg_alloc.use_xmm(args[0]);
        let result = ctx.reg_alloc.scratch_xmm();
        op(code, result, xmm_a);
        force_to_default_nan(code, &mut ctx.reg_alloc, fpcr, size, result);
        ctx.reg_alloc.define(inst, result);
        return;
    }

    let args = ctx.reg_alloc.args_of(inst);
    let result = ctx.reg_alloc.scratch_xmm();
    let xmm_a = ctx.reg_alloc.use_xmm(args[0]);
    let nan_mask = ctx.reg_alloc.scratch_xmm();

    op(code, result, xmm_a);

    if ctx.features.has_avx() {
        vcmpp(code, size, nan_mask, result, result, FpCompare::Unordered);
    } else {
        code.movaps(nan_mask, result);
        cmpp(code, size, nan_mask, nan_mask, FpCompare::Unordered);
    }

    handle_nans(code, ctx, &[result, xmm_a], nan_mask, nan_handler);
    ctx.reg_alloc.define(inst, result);
}

/// Two-operand template: `result op= b`, with either the default-NaN sweep
/// or a mask accumulated from both operands and the op result.
fn emit_three_op_vector_operation(
    code: &mut Assembler,
    ctx: &mut EmitContext<'_>,
    inst: InstId,
    size: FpSize,
    nan_handler: NanHandler,
    op: impl FnOnce(&mut Assembler, &mut RegAlloc<'_>, Xmm, Xmm),
) {
    let fpcr = ctx.fpcr();
    if !ctx.accurate_nan() || ctx.fpscr_dn() {
        let args = ctx.reg_alloc.args_of(inst);
        let xmm_a = ctx.reg_alloc.use_scratch_xmm(code, args[0]);
        let xmm_b = ctx.reg_alloc.use_xmm(args[1]);
        op(code, &mut ctx.reg_alloc, xmm_a, xmm_b);
        force_to_default_nan(code, &mut ctx.reg_alloc, fpcr, size, xmm_a);
        ctx.reg_alloc.define(inst, xmm_a);
        return;
    }

    let args = ctx.reg_alloc.args_of(inst);
    let result = ctx.reg_alloc.scratch_xmm();
    let xmm_a = ctx.reg_alloc.use_xmm(args[0]);
    let xmm_b = ctx.reg_alloc.use_xmm(args[1]);
    let nan_mask = ctx.reg_alloc.scratch_xmm();

    code.movaps(nan_mask, xmm_b);
    code.movaps(result, xmm_a);
    cmpp(code, size, nan_mask, xmm_a, FpCompare::Unordered);
    op(code, &mut ctx.reg_alloc, result, xmm_b);
    cmpp(code, size, nan_mask, result, FpCompare::Unordered);

    handle_nans(code, ctx, &[result, xmm_a, xmm_b], nan_mask, nan_handler);
    ctx.reg_alloc.define(inst, result);
}

// =============================================================================
// Per-opcode emitters
// =============================================================================

fn emit_abs(code: &mut Assembler, ctx: &mut EmitContext<'_>, inst: InstId, esize: usize) {
    let args = ctx.reg_alloc.args_of(inst);
    let a = ctx.reg_alloc.use_scratch_xmm(code, args[0]);
    match esize {
        16 => {
            let mask = code.const16(0x7FFF_7FFF_7FFF_7FFF, 0x7FFF_7FFF_7FFF_7FFF);
            code.pand(a, mask);
        }
        32 => {
            let mask = non_sign_mask(code, FpSize::S32);
            code.andps(a, mask);
        }
        64 => {
            let mask = non_sign_mask(code, FpSize::S64);
            code.andpd(a, mask);
        }
        _ => unreachable!(),
    }
    ctx.reg_alloc.define(inst, a);
}

fn emit_neg(code: &mut Assembler, ctx: &mut EmitContext<'_>, inst: InstId, esize: usize) {
    let args = ctx.reg_alloc.args_of(inst);
    let a = ctx.reg_alloc.use_scratch_xmm(code, args[0]);
    let mask = match esize {
        16 => code.const16(0x8000_8000_8000_8000, 0x8000_8000_8000_8000),
        32 => negative_zero_vector(code, FpSize::S32),
        64 => negative_zero_vector(code, FpSize::S64),
        _ => unreachable!(),
    };
    code.pxor(a, mask);
    ctx.reg_alloc.define(inst, a);
}

fn emit_compare(
    code: &mut Assembler,
    ctx: &mut EmitContext<'_>,
    inst: InstId,
    size: FpSize,
    pred: FpCompare,
    swap: bool,
) {
    // ARM defines the comparison mask directly, so no NaN correction: an
    // unordered compare simply produces a zero lane.
    let args = ctx.reg_alloc.args_of(inst);
    if swap {
        let a = ctx.reg_alloc.use_xmm(args[0]);
        let b = ctx.reg_alloc.use_scratch_xmm(code, args[1]);
        cmpp(code, size, b, a, pred);
        ctx.reg_alloc.define(inst, b);
    } else {
        let a = ctx.reg_alloc.use_scratch_xmm(code, args[0]);
        let b = ctx.reg_alloc.use_xmm(args[1]);
        cmpp(code, size, a, b, pred);
        ctx.reg_alloc.define(inst, a);
    }
}

fn emit_max_min(
    code: &mut Assembler,
    ctx: &mut EmitContext<'_>,
    inst: InstId,
    size: FpSize,
    is_max: bool,
) {
    let fpcr = ctx.fpcr();
    let has_avx = ctx.features.has_avx();

    if ctx.fpscr_dn() {
        let args = ctx.reg_alloc.args_of(inst);
        let result = ctx.reg_alloc.use_scratch_xmm(code, args[0]);
        let xmm_b = if ctx.fpscr_ftz() {
            ctx.reg_alloc.use_scratch_xmm(code, args[1])
        } else {
            ctx.reg_alloc.use_xmm(args[1])
        };
        let mask = ctx.reg_alloc.scratch_xmm();
        let combo = ctx.reg_alloc.scratch_xmm();
        let nan_mask = ctx.reg_alloc.scratch_xmm();

        denormals_are_zero(code, fpcr, size, &[result, xmm_b], mask);

        if has_avx {
            vcmpp(code, size, mask, result, xmm_b, FpCompare::Equal);
            vcmpp(code, size, nan_mask, result, xmm_b, FpCompare::Unordered);
            if is_max {
                vandp(code, size, combo, result, xmm_b);
                vmaxp(code, size, result, result, xmm_b);
            } else {
                vorp(code, size, combo, result, xmm_b);
                vminp(code, size, result, result, xmm_b);
            }
            vblendvp(code, size, result, result, combo, mask);
            let nan = nan_vector(code, size);
            vblendvp(code, size, result, result, nan, nan_mask);
        } else {
            code.movaps(mask, result);
            code.movaps(combo, result);
            code.movaps(nan_mask, result);
            cmpp(code, size, mask, xmm_b, FpCompare::NotEqual);
            cmpp(code, size, nan_mask, xmm_b, FpCompare::Ordered);

            if is_max {
                code.andps(combo, xmm_b);
                maxp(code, size, result, xmm_b);
            } else {
                code.orps(combo, xmm_b);
                minp(code, size, result, xmm_b);
            }

            code.andps(result, mask);
            code.andnps(mask, combo);
            code.orps(result, mask);

            code.andps(result, nan_mask);
            let nan = nan_vector(code, size);
            code.andnps(nan_mask, nan);
            code.orps(result, nan_mask);
        }

        ctx.reg_alloc.define(inst, result);
        return;
    }

    let ftz = ctx.fpscr_ftz();
    let handler: NanHandler = match size {
        FpSize::S32 => nan_fixup_2op::<u32>,
        FpSize::S64 => nan_fixup_2op::<u64>,
    };
    emit_three_op_vector_operation(code, ctx, inst, size, handler, |code, ra, result, xmm_b| {
        let mask = ra.scratch_xmm();
        let combo = ra.scratch_xmm();

        let mut xmm_b = xmm_b;
        if ftz {
            let prev = xmm_b;
            xmm_b = ra.scratch_xmm();
            code.movaps(xmm_b, prev);
            denormals_are_zero(code, fpcr, size, &[result, xmm_b], mask);
        }

        // Lanes the host considers equal include differently-signed zeros:
        // AND of the encodings yields +0 (for max), OR yields -0 (for
        // min), which is the ARM result, so those lanes are blended in.
        if has_avx {
            vcmpp(code, size, mask, result, xmm_b, FpCompare::Equal);
            if is_max {
                vandp(code, size, combo, result, xmm_b);
                vmaxp(code, size, result, result, xmm_b);
            } else {
                vorp(code, size, combo, result, xmm_b);
                vminp(code, size, result, result, xmm_b);
            }
            vblendvp(code, size, result, result, combo, mask);
        } else {
            code.movaps(mask, result);
            code.movaps(combo, result);
            cmpp(code, size, mask, xmm_b, FpCompare::NotEqual);

            if is_max {
                code.andps(combo, xmm_b);
                maxp(code, size, result, xmm_b);
            } else {
                code.orps(combo, xmm_b);
                minp(code, size, result, xmm_b);
            }

            code.andps(result, mask);
            code.andnps(mask, combo);
            code.orps(result, mask);
        }
    });
}

fn emit_mul_add(code: &mut Assembler, ctx: &mut EmitContext<'_>, inst: InstId, size: FpSize) {
    let fallback: Fallback4 = match size {
        FpSize::S32 => mul_add_fallback::<u32>,
        FpSize::S64 => mul_add_fallback::<u64>,
    };

    if ctx.features.has_fma() && ctx.features.has_avx() {
        let args = ctx.reg_alloc.args_of(inst);
        let result = ctx.reg_alloc.scratch_xmm();
        let xmm_a = ctx.reg_alloc.use_xmm(args[0]);
        let xmm_b = ctx.reg_alloc.use_xmm(args[1]);
        let xmm_c = ctx.reg_alloc.use_xmm(args[2]);
        let tmp = ctx.reg_alloc.scratch_xmm();

        let end = code.create_label();
        let fallback_label = code.create_label();

        code.movaps(result, xmm_a);
        vfmadd231p(code, size, result, xmm_b, xmm_c);

        // Any lane whose magnitude is subnormal (or a NaN) may have been
        // rounded differently than the fused reference; redo the whole
        // vector in software when one shows up.
        let neg_zero = negative_zero_vector(code, size);
        code.movaps(tmp, neg_zero);
        code.andnps(tmp, result);
        let smallest = smallest_normal_vector(code, size);
        vcmpp(code, size, tmp, tmp, smallest, FpCompare::EqualUnordered);
        code.vptest(tmp, tmp);
        code.jnz_label(fallback_label);
        code.bind_label(end);

        code.switch_to_far();
        code.bind_label(fallback_label);
        abi::push_caller_saved_except(code, result);
        emit_host_fallback_frame(
            code,
            ctx,
            &[],
            result,
            &[xmm_a, xmm_b, xmm_c],
            fallback as usize,
        );
        abi::pop_caller_saved_except(code, result);
        code.jmp_label(end);
        code.switch_to_near();

        ctx.reg_alloc.define(inst, result);
        return;
    }

    emit_four_op_fallback(code, ctx, inst, fallback);
}

fn emit_paired_add_lower(
    code: &mut Assembler,
    ctx: &mut EmitContext<'_>,
    inst: InstId,
    size: FpSize,
) {
    let handler: NanHandler = match size {
        FpSize::S32 => nan_fixup_paired_lower::<u32>,
        FpSize::S64 => nan_fixup_paired_lower::<u64>,
    };
    emit_three_op_vector_operation(code, ctx, inst, size, handler, |code, ra, result, xmm_b| {
        let zero = ra.scratch_xmm();
        code.xorps(zero, zero);
        code.punpcklqdq(result, xmm_b);
        haddp(code, size, result, zero);
    });
}

fn emit_round_int(code: &mut Assembler, ctx: &mut EmitContext<'_>, inst: InstId, size: FpSize) {
    let args = ctx.reg_alloc.args_of(inst);
    let rounding = decode_rounding(args[1].as_imm8());
    let exact = args[2].as_imm1();

    if ctx.features.has_sse41()
        && rounding != RoundingMode::ToNearestTieAwayFromZero
        && !exact
    {
        let round_imm = match rounding {
            RoundingMode::ToNearestTieEven => 0b00,
            RoundingMode::TowardsPlusInfinity => 0b10,
            RoundingMode::TowardsMinusInfinity => 0b01,
            RoundingMode::TowardsZero => 0b11,
            RoundingMode::ToNearestTieAwayFromZero => unreachable!(),
        };
        let handler: NanHandler = match size {
            FpSize::S32 => nan_fixup_1op::<u32>,
            FpSize::S64 => nan_fixup_1op::<u64>,
        };
        emit_two_op_vector_operation(code, ctx, inst, size, handler, |code, result, xmm_a| {
            roundp(code, size, result, xmm_a, round_imm);
        });
        return;
    }

    let fallback = match size {
        FpSize::S32 => round_int_lut::<u32>(rounding, exact),
        FpSize::S64 => round_int_lut::<u64>(rounding, exact),
    };
    emit_two_op_fallback(code, ctx, inst, fallback);
}

fn emit_s32_to_single(code: &mut Assembler, ctx: &mut EmitContext<'_>, inst: InstId) {
    let args = ctx.reg_alloc.args_of(inst);
    let xmm = ctx.reg_alloc.use_scratch_xmm(code, args[0]);
    code.cvtdq2ps(xmm, xmm);
    ctx.reg_alloc.define(inst, xmm);
}

fn emit_s64_to_double(code: &mut Assembler, ctx: &mut EmitContext<'_>, inst: InstId) {
    let args = ctx.reg_alloc.args_of(inst);
    let xmm = ctx.reg_alloc.use_scratch_xmm(code, args[0]);

    if ctx.features.has_avx512vl_dq() {
        code.vcvtqq2pd(xmm, xmm);
    } else if ctx.features.has_sse41() {
        let xmm_tmp = ctx.reg_alloc.scratch_xmm();
        let tmp = ctx.reg_alloc.scratch_gpr();

        code.movq_to_gpr(tmp, xmm);
        code.cvtsi2sd(xmm, tmp);
        code.pextrq(tmp, xmm, 1);
        code.cvtsi2sd(xmm_tmp, tmp);
        code.unpcklpd(xmm, xmm_tmp);
    } else {
        let high_xmm = ctx.reg_alloc.scratch_xmm();
        let xmm_tmp = ctx.reg_alloc.scratch_xmm();
        let tmp = ctx.reg_alloc.scratch_gpr();

        code.movhlps(high_xmm, xmm);
        code.movq_to_gpr(tmp, xmm);
        code.cvtsi2sd(xmm, tmp);
        code.movq_to_gpr(tmp, high_xmm);
        code.cvtsi2sd(xmm_tmp, tmp);
        code.unpcklpd(xmm, xmm_tmp);
    }

    ctx.reg_alloc.define(inst, xmm);
}

fn emit_u32_to_single(code: &mut Assembler, ctx: &mut EmitContext<'_>, inst: InstId) {
    let args = ctx.reg_alloc.args_of(inst);
    let xmm = ctx.reg_alloc.use_scratch_xmm(code, args[0]);

    if ctx.features.has_avx512vl_dq() {
        code.vcvtudq2ps(xmm, xmm);
    } else {
        // Split each unsigned word into halves, bias both into the float
        // domain, and sum: low half carried by 2^23, high half by 2^39,
        // recombined by the final subtract-and-add constants.
        let mem_4b000000 = code.const16(0x4B00_0000_4B00_0000, 0x4B00_0000_4B00_0000);
        let mem_53000000 = code.const16(0x5300_0000_5300_0000, 0x5300_0000_5300_0000);
        let mem_d3000080 = code.const16(0xD300_0080_D300_0080, 0xD300_0080_D300_0080);

        let tmp = ctx.reg_alloc.scratch_xmm();

        if ctx.features.has_avx() {
            code.vpblendw(tmp, xmm, mem_4b000000, 0b1010_1010);
            code.vpsrld(xmm, xmm, 16);
            code.vpblendw(xmm, xmm, mem_53000000, 0b1010_1010);
            code.vaddps(xmm, xmm, mem_d3000080);
            code.vaddps(xmm, tmp, xmm);
        } else {
            let mem_ffff = code.const16(0x0000_FFFF_0000_FFFF, 0x0000_FFFF_0000_FFFF);

            code.movdqa(tmp, mem_ffff);
            code.pand(tmp, xmm);
            code.por(tmp, mem_4b000000);
            code.psrld(xmm, 16);
            code.por(xmm, mem_53000000);
            code.addps(xmm, mem_d3000080);
            code.addps(xmm, tmp);
        }
    }

    if ctx.fpscr_rmode() == RoundingMode::TowardsMinusInfinity {
        let mask = non_sign_mask(code, FpSize::S32);
        code.pand(xmm, mask);
    }

    ctx.reg_alloc.define(inst, xmm);
}

fn emit_u64_to_double(code: &mut Assembler, ctx: &mut EmitContext<'_>, inst: InstId) {
    let args = ctx.reg_alloc.args_of(inst);
    let xmm = ctx.reg_alloc.use_scratch_xmm(code, args[0]);

    if ctx.features.has_avx512vl_dq() {
        code.vcvtuqq2pd(xmm, xmm);
    } else {
        // Interleave each quadword's halves with the 2^52/2^84 exponent
        // words, subtract the same constants to recover the halves as
        // doubles, and sum.
        let unpack = code.const16(0x4530_0000_4330_0000, 0);
        let subtrahend = code.const16(0x4330_0000_0000_0000, 0x4530_0000_0000_0000);

        let unpack_reg = ctx.reg_alloc.scratch_xmm();
        let subtrahend_reg = ctx.reg_alloc.scratch_xmm();
        let tmp1 = ctx.reg_alloc.scratch_xmm();

        if ctx.features.has_avx() {
            code.vmovapd(unpack_reg, unpack);
            code.vmovapd(subtrahend_reg, subtrahend);

            code.vunpcklps(tmp1, xmm, XmmRm::Reg(unpack_reg));
            code.vsubpd(tmp1, tmp1, XmmRm::Reg(subtrahend_reg));

            code.vpermilps(xmm, xmm, 0b0100_1110);

            code.vunpcklps(xmm, xmm, XmmRm::Reg(unpack_reg));
            code.vsubpd(xmm, xmm, XmmRm::Reg(subtrahend_reg));

            code.vhaddpd(xmm, tmp1, XmmRm::Reg(xmm));
        } else {
            let tmp2 = ctx.reg_alloc.scratch_xmm();

            code.movdqa(unpack_reg, unpack);
            code.movdqa(subtrahend_reg, subtrahend);

            code.pshufd(tmp1, xmm, 0b0100_1110);

            code.punpckldq(xmm, unpack_reg);
            code.subpd(xmm, subtrahend_reg);
            code.pshufd(tmp2, xmm, 0b0100_1110);
            code.addpd(xmm, tmp2);

            code.punpckldq(tmp1, unpack_reg);
            code.subpd(tmp1, subtrahend_reg);

            code.pshufd(unpack_reg, tmp1, 0b0100_1110);
            code.addpd(unpack_reg, tmp1);

            code.unpcklpd(xmm, unpack_reg);
        }
    }

    if ctx.fpscr_rmode() == RoundingMode::TowardsMinusInfinity {
        let mask = non_sign_mask(code, FpSize::S64);
        code.pand(xmm, mask);
    }

    ctx.reg_alloc.define(inst, xmm);
}

fn emit_to_fixed(
    code: &mut Assembler,
    ctx: &mut EmitContext<'_>,
    inst: InstId,
    size: FpSize,
    unsigned: bool,
) {
    let args = ctx.reg_alloc.args_of(inst);
    let fbits = args[1].as_imm8();
    let rounding = decode_rounding(args[2].as_imm8());
    let fallback = match size {
        FpSize::S32 => to_fixed_lut32(unsigned, fbits, rounding),
        FpSize::S64 => to_fixed_lut64(unsigned, fbits, rounding),
    };
    emit_two_op_fallback(code, ctx, inst, fallback);
}

// =============================================================================
// Dispatch
// =============================================================================

/// Lower one vector floating-point opcode. Panics on anything else.
pub fn emit(code: &mut Assembler, ctx: &mut EmitContext<'_>, inst: InstId) {
    use FpSize::{S32, S64};
    let opcode = ctx.block.inst(inst).opcode;
    match opcode {
        Opcode::FpVectorAbs16 => emit_abs(code, ctx, inst, 16),
        Opcode::FpVectorAbs32 => emit_abs(code, ctx, inst, 32),
        Opcode::FpVectorAbs64 => emit_abs(code, ctx, inst, 64),
        Opcode::FpVectorNeg16 => emit_neg(code, ctx, inst, 16),
        Opcode::FpVectorNeg32 => emit_neg(code, ctx, inst, 32),
        Opcode::FpVectorNeg64 => emit_neg(code, ctx, inst, 64),

        Opcode::FpVectorAdd32 => emit_three_op_vector_operation(
            code,
            ctx,
            inst,
            S32,
            nan_fixup_2op::<u32>,
            |code, _, r, b| addp(code, S32, r, b),
        ),
        Opcode::FpVectorAdd64 => emit_three_op_vector_operation(
            code,
            ctx,
            inst,
            S64,
            nan_fixup_2op::<u64>,
            |code, _, r, b| addp(code, S64, r, b),
        ),
        Opcode::FpVectorSub32 => emit_three_op_vector_operation(
            code,
            ctx,
            inst,
            S32,
            nan_fixup_2op::<u32>,
            |code, _, r, b| subp(code, S32, r, b),
        ),
        Opcode::FpVectorSub64 => emit_three_op_vector_operation(
            code,
            ctx,
            inst,
            S64,
            nan_fixup_2op::<u64>,
            |code, _, r, b| subp(code, S64, r, b),
        ),
        Opcode::FpVectorMul32 => emit_three_op_vector_operation(
            code,
            ctx,
            inst,
            S32,
            nan_fixup_2op::<u32>,
            |code, _, r, b| mulp(code, S32, r, b),
        ),
        Opcode::FpVectorMul64 => emit_three_op_vector_operation(
            code,
            ctx,
            inst,
            S64,
            nan_fixup_2op::<u64>,
            |code, _, r, b| mulp(code, S64, r, b),
        ),
        Opcode::FpVectorDiv32 => emit_three_op_vector_operation(
            code,
            ctx,
            inst,
            S32,
            nan_fixup_2op::<u32>,
            |code, _, r, b| divp(code, S32, r, b),
        ),
        Opcode::FpVectorDiv64 => emit_three_op_vector_operation(
            code,
            ctx,
            inst,
            S64,
            nan_fixup_2op::<u64>,
            |code, _, r, b| divp(code, S64, r, b),
        ),

        Opcode::FpVectorEqual32 => {
            emit_compare(code, ctx, inst, S32, FpCompare::Equal, false)
        }
        Opcode::FpVectorEqual64 => {
            emit_compare(code, ctx, inst, S64, FpCompare::Equal, false)
        }
        Opcode::FpVectorGreater32 => {
            emit_compare(code, ctx, inst, S32, FpCompare::LessThan, true)
        }
        Opcode::FpVectorGreater64 => {
            emit_compare(code, ctx, inst, S64, FpCompare::LessThan, true)
        }
        Opcode::FpVectorGreaterEqual32 => {
            emit_compare(code, ctx, inst, S32, FpCompare::LessEqual, true)
        }
        Opcode::FpVectorGreaterEqual64 => {
            emit_compare(code, ctx, inst, S64, FpCompare::LessEqual, true)
        }

        Opcode::FpVectorMax32 => emit_max_min(code, ctx, inst, S32, true),
        Opcode::FpVectorMax64 => emit_max_min(code, ctx, inst, S64, true),
        Opcode::FpVectorMin32 => emit_max_min(code, ctx, inst, S32, false),
        Opcode::FpVectorMin64 => emit_max_min(code, ctx, inst, S64, false),

        Opcode::FpVectorMulAdd32 => emit_mul_add(code, ctx, inst, S32),
        Opcode::FpVectorMulAdd64 => emit_mul_add(code, ctx, inst, S64),

        Opcode::FpVectorPairedAdd32 => emit_three_op_vector_operation(
            code,
            ctx,
            inst,
            S32,
            nan_fixup_paired::<u32>,
            |code, _, r, b| haddp(code, S32, r, b),
        ),
        Opcode::FpVectorPairedAdd64 => emit_three_op_vector_operation(
            code,
            ctx,
            inst,
            S64,
            nan_fixup_paired::<u64>,
            |code, _, r, b| haddp(code, S64, r, b),
        ),
        Opcode::FpVectorPairedAddLower32 => emit_paired_add_lower(code, ctx, inst, S32),
        Opcode::FpVectorPairedAddLower64 => emit_paired_add_lower(code, ctx, inst, S64),

        Opcode::FpVectorRecipEstimate32 => {
            emit_two_op_fallback(code, ctx, inst, recip_estimate_fallback::<u32>)
        }
        Opcode::FpVectorRecipEstimate64 => {
            emit_two_op_fallback(code, ctx, inst, recip_estimate_fallback::<u64>)
        }
        Opcode::FpVectorRSqrtEstimate32 => {
            emit_two_op_fallback(code, ctx, inst, rsqrt_estimate_fallback::<u32>)
        }
        Opcode::FpVectorRSqrtEstimate64 => {
            emit_two_op_fallback(code, ctx, inst, rsqrt_estimate_fallback::<u64>)
        }
        Opcode::FpVectorRecipStepFused32 => {
            emit_three_op_fallback(code, ctx, inst, recip_step_fallback::<u32>)
        }
        Opcode::FpVectorRecipStepFused64 => {
            emit_three_op_fallback(code, ctx, inst, recip_step_fallback::<u64>)
        }
        Opcode::FpVectorRSqrtStepFused32 => {
            emit_three_op_fallback(code, ctx, inst, rsqrt_step_fallback::<u32>)
        }
        Opcode::FpVectorRSqrtStepFused64 => {
            emit_three_op_fallback(code, ctx, inst, rsqrt_step_fallback::<u64>)
        }

        Opcode::FpVectorRoundInt32 => emit_round_int(code, ctx, inst, S32),
        Opcode::FpVectorRoundInt64 => emit_round_int(code, ctx, inst, S64),

        Opcode::FpVectorS32ToSingle => emit_s32_to_single(code, ctx, inst),
        Opcode::FpVectorS64ToDouble => emit_s64_to_double(code, ctx, inst),
        Opcode::FpVectorU32ToSingle => emit_u32_to_single(code, ctx, inst),
        Opcode::FpVectorU64ToDouble => emit_u64_to_double(code, ctx, inst),

        Opcode::FpVectorToSignedFixed32 => emit_to_fixed(code, ctx, inst, S32, false),
        Opcode::FpVectorToSignedFixed64 => emit_to_fixed(code, ctx, inst, S64, false),
        Opcode::FpVectorToUnsignedFixed32 => emit_to_fixed(code, ctx, inst, S32, true),
        Opcode::FpVectorToUnsignedFixed64 => emit_to_fixed(code, ctx, inst, S64, true),

        other => panic!("opcode {other:?} is not lowered by the vector FP core"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::x64::cpuid::{HostFeatureFlags, HostFeatures};
    use crate::backend::x64::emit::{emit_block, EmitConfig};
    use crate::ir::{Block, ExtReg, Value};

    fn three_op_block(opcode: Opcode) -> Block {
        let mut block = Block::new();
        let a = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(0))]);
        let b = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(1))]);
        let r = block.push(opcode, &[Value::Inst(a), Value::Inst(b)]);
        block.push(Opcode::A32SetVector, &[Value::ExtReg(ExtReg::Q(2)), Value::Inst(r)]);
        block
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_simple_policy_is_branch_free() {
        // DN=1 takes the simple path: no conditional branch anywhere.
        let block = three_op_block(Opcode::FpVectorAdd32);
        let config = EmitConfig {
            fpcr: charm_core::Fpcr::default().with_dn(true),
            accurate_nan: true,
        };
        let code = emit_block(&block, HostFeatures::baseline(), config);
        assert!(!contains(&code, &[0x0F, 0x85]), "found a jnz on the fast path");
    }

    #[test]
    fn test_accurate_nan_path_arms_detector() {
        // DN=0 with accurate NaNs: a jnz to the far region and a call to
        // the correction handler must both be present.
        let block = three_op_block(Opcode::FpVectorAdd32);
        let code = emit_block(&block, HostFeatures::baseline(), EmitConfig::default());
        assert!(contains(&code, &[0x0F, 0x85]), "missing the NaN detector branch");
        assert!(contains(&code, &[0xFF, 0xD0]), "missing the handler call");
    }

    #[test]
    fn test_accurate_nan_disabled_skips_detector() {
        let block = three_op_block(Opcode::FpVectorAdd32);
        let config = EmitConfig {
            fpcr: charm_core::Fpcr::default(),
            accurate_nan: false,
        };
        let code = emit_block(&block, HostFeatures::baseline(), config);
        assert!(!contains(&code, &[0x0F, 0x85]));
        assert!(!contains(&code, &[0xFF, 0xD0]));
    }

    #[test]
    fn test_estimates_always_call_out() {
        let mut block = Block::new();
        let a = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(0))]);
        let r = block.push(Opcode::FpVectorRecipEstimate32, &[Value::Inst(a)]);
        block.push(Opcode::A32SetVector, &[Value::ExtReg(ExtReg::Q(1)), Value::Inst(r)]);
        // Even on a fully featured host the estimate is a software call.
        let features = HostFeatures::from_flags(HostFeatureFlags::all());
        let code = emit_block(&block, features, EmitConfig::default());
        assert!(contains(&code, &[0xFF, 0xD0]));
    }

    #[test]
    fn test_round_int_fast_path_needs_sse41() {
        let mut block = Block::new();
        let a = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(0))]);
        let r = block.push(
            Opcode::FpVectorRoundInt32,
            &[
                Value::Inst(a),
                Value::Imm8(RoundingMode::TowardsZero as u8),
                Value::Imm1(false),
            ],
        );
        block.push(Opcode::A32SetVector, &[Value::ExtReg(ExtReg::Q(1)), Value::Inst(r)]);

        // Baseline host: must call the software fallback.
        let code = emit_block(&block, HostFeatures::baseline(), EmitConfig::default());
        assert!(contains(&code, &[0xFF, 0xD0]));

        // SSE4.1 host with a representable mode and exact=false: roundps
        // appears (66 0F 3A 08) and under DN no call is emitted.
        let features = HostFeatures::from_flags(HostFeatureFlags::SSE41);
        let config = EmitConfig {
            fpcr: charm_core::Fpcr::default().with_dn(true),
            accurate_nan: true,
        };
        let code = emit_block(&block, features, config);
        assert!(contains(&code, &[0x66, 0x0F, 0x3A, 0x08]));
        assert!(!contains(&code, &[0xFF, 0xD0]));
    }

    #[test]
    fn test_round_int_exact_always_falls_back() {
        let mut block = Block::new();
        let a = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(0))]);
        let r = block.push(
            Opcode::FpVectorRoundInt32,
            &[
                Value::Inst(a),
                Value::Imm8(RoundingMode::TowardsZero as u8),
                Value::Imm1(true),
            ],
        );
        block.push(Opcode::A32SetVector, &[Value::ExtReg(ExtReg::Q(1)), Value::Inst(r)]);
        let features = HostFeatures::from_flags(HostFeatureFlags::SSE41);
        let code = emit_block(&block, features, EmitConfig::default());
        assert!(contains(&code, &[0xFF, 0xD0]));
    }

    #[test]
    fn test_abs_uses_mask_constant() {
        let mut block = Block::new();
        let a = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(0))]);
        let r = block.push(Opcode::FpVectorAbs32, &[Value::Inst(a)]);
        block.push(Opcode::A32SetVector, &[Value::ExtReg(ExtReg::Q(1)), Value::Inst(r)]);
        let code = emit_block(&block, HostFeatures::baseline(), EmitConfig::default());
        // The sign-clear mask lands in the constant pool.
        assert!(contains(&code, &0x7FFF_FFFF_7FFF_FFFFu64.to_le_bytes()));
        // andps = 0F 54.
        assert!(contains(&code, &[0x0F, 0x54]));
    }

    #[test]
    fn test_u32_to_single_bias_constants() {
        let mut block = Block::new();
        let a = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(0))]);
        let r = block.push(Opcode::FpVectorU32ToSingle, &[Value::Inst(a)]);
        block.push(Opcode::A32SetVector, &[Value::ExtReg(ExtReg::Q(1)), Value::Inst(r)]);
        let code = emit_block(&block, HostFeatures::baseline(), EmitConfig::default());
        for constant in [
            0x4B00_0000_4B00_0000u64,
            0x5300_0000_5300_0000,
            0xD300_0080_D300_0080,
            0x0000_FFFF_0000_FFFF,
        ] {
            assert!(
                contains(&code, &constant.to_le_bytes()),
                "missing bias constant {constant:#x}"
            );
        }
    }

    #[test]
    fn test_u32_to_single_masks_sign_under_minus_inf() {
        let mut block = Block::new();
        let a = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(0))]);
        let r = block.push(Opcode::FpVectorU32ToSingle, &[Value::Inst(a)]);
        block.push(Opcode::A32SetVector, &[Value::ExtReg(ExtReg::Q(1)), Value::Inst(r)]);

        let fpcr =
            charm_core::Fpcr::default().with_rounding_mode(RoundingMode::TowardsMinusInfinity);
        let config = EmitConfig {
            fpcr,
            accurate_nan: true,
        };
        let code = emit_block(&block, HostFeatures::baseline(), config);
        assert!(contains(&code, &0x7FFF_FFFF_7FFF_FFFFu64.to_le_bytes()));

        let code = emit_block(&block, HostFeatures::baseline(), EmitConfig::default());
        assert!(!contains(&code, &0x7FFF_FFFF_7FFF_FFFFu64.to_le_bytes()));
    }

    #[test]
    fn test_mul_add_without_fma_calls_out() {
        let mut block = Block::new();
        let a = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(0))]);
        let b = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(1))]);
        let c = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(2))]);
        let r = block.push(
            Opcode::FpVectorMulAdd32,
            &[Value::Inst(a), Value::Inst(b), Value::Inst(c)],
        );
        block.push(Opcode::A32SetVector, &[Value::ExtReg(ExtReg::Q(3)), Value::Inst(r)]);
        let code = emit_block(&block, HostFeatures::baseline(), EmitConfig::default());
        assert!(contains(&code, &[0xFF, 0xD0]));
    }

    #[test]
    fn test_mul_add_with_fma_emits_fused_op_and_detector() {
        let mut block = Block::new();
        let a = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(0))]);
        let b = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(1))]);
        let c = block.push(Opcode::A32GetVector, &[Value::ExtReg(ExtReg::Q(2))]);
        let r = block.push(
            Opcode::FpVectorMulAdd32,
            &[Value::Inst(a), Value::Inst(b), Value::Inst(c)],
        );
        block.push(Opcode::A32SetVector, &[Value::ExtReg(ExtReg::Q(3)), Value::Inst(r)]);
        let features = HostFeatures::from_flags(
            HostFeatureFlags::AVX | HostFeatureFlags::FMA | HostFeatureFlags::SSE41,
        );
        let code = emit_block(&block, features, EmitConfig::default());
        // vfmadd231ps opcode byte sequence C4 E2 .. B8.
        assert!(contains(&code, &[0xB8]));
        // The subnormal detector jumps to the far fallback.
        assert!(contains(&code, &[0x0F, 0x85]));
        assert!(contains(&code, &[0xFF, 0xD0]));
        // The smallest-normal boundary constant is pooled.
        assert!(contains(&code, &0x0080_0000_0080_0000u64.to_le_bytes()));
    }

    #[test]
    fn test_max_dn_uses_nan_vector_constant() {
        let block = three_op_block(Opcode::FpVectorMax32);
        let config = EmitConfig {
            fpcr: charm_core::Fpcr::default().with_dn(true),
            accurate_nan: true,
        };
        let code = emit_block(&block, HostFeatures::baseline(), config);
        assert!(contains(&code, &0x7FC0_0000_7FC0_0000u64.to_le_bytes()));
        // maxps = 0F 5F.
        assert!(contains(&code, &[0x0F, 0x5F]));
    }

    #[test]
    fn test_comparisons_emit_no_far_code() {
        for opcode in [
            Opcode::FpVectorEqual32,
            Opcode::FpVectorGreater32,
            Opcode::FpVectorGreaterEqual64,
        ] {
            let block = three_op_block(opcode);
            let code = emit_block(&block, HostFeatures::baseline(), EmitConfig::default());
            assert!(!contains(&code, &[0xFF, 0xD0]), "{opcode:?} called out");
            assert!(!contains(&code, &[0x0F, 0x85]), "{opcode:?} branched");
        }
    }

    #[test]
    fn test_ftz_adds_daz_zero_constant() {
        // Max under DN+FTZ flushes operand denormals by adding -0.0.
        let block = three_op_block(Opcode::FpVectorMax32);
        let config = EmitConfig {
            fpcr: charm_core::Fpcr::default().with_dn(true).with_fz(true),
            accurate_nan: true,
        };
        let code = emit_block(&block, HostFeatures::baseline(), config);
        assert!(contains(&code, &0x8000_0000_8000_0000u64.to_le_bytes()));
    }
}
