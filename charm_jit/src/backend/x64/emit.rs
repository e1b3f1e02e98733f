//! Block emission: guest state layout, emission context, and the walker
//! that lowers an IR block to host code.
//!
//! R15 carries the guest-state pointer for the lifetime of a block. Blocks
//! are plain C functions taking that pointer; the prologue saves R15 and
//! loads it from the first parameter, so RSP is 16-byte aligned throughout
//! the body.

use charm_core::Fpcr;

use super::abi;
use super::assembler::Assembler;
use super::cpuid::HostFeatures;
use super::registers::{Gpr, MemOperand};
use super::vector_fp;
use crate::ir::{Block, ExtReg, InstId, Opcode, Value};
use crate::regalloc::RegAlloc;

/// The guest register file and status state an emitted block addresses
/// through R15. Tests construct one, point the block at it, and inspect it
/// afterwards.
#[repr(C, align(16))]
#[derive(Debug, Clone)]
pub struct JitState {
    /// The NEON register file viewed as sixteen 128-bit Q registers.
    pub ext_regs: [u32; 64],
    /// Accumulated FPSR exception flags, mutated by software fallbacks.
    pub fpsr_exc: u32,
}

impl Default for JitState {
    fn default() -> Self {
        JitState {
            ext_regs: [0; 64],
            fpsr_exc: 0,
        }
    }
}

impl JitState {
    /// View a Q register as four words.
    pub fn q(&self, n: usize) -> [u32; 4] {
        self.ext_regs[n * 4..n * 4 + 4].try_into().unwrap()
    }

    /// Set a Q register from four words.
    pub fn set_q(&mut self, n: usize, lanes: [u32; 4]) {
        self.ext_regs[n * 4..n * 4 + 4].copy_from_slice(&lanes);
    }

    /// View a Q register as two doublewords.
    pub fn q_as_u64(&self, n: usize) -> [u64; 2] {
        let w = self.q(n);
        [
            w[0] as u64 | (w[1] as u64) << 32,
            w[2] as u64 | (w[3] as u64) << 32,
        ]
    }

    /// Set a Q register from two doublewords.
    pub fn set_q_from_u64(&mut self, n: usize, lanes: [u64; 2]) {
        self.set_q(
            n,
            [
                lanes[0] as u32,
                (lanes[0] >> 32) as u32,
                lanes[1] as u32,
                (lanes[1] >> 32) as u32,
            ],
        );
    }
}

/// Byte offsets into the guest state, read at emission time only.
#[derive(Debug, Clone, Copy)]
pub struct GuestStateLayout {
    /// Offset of the extension register file.
    pub ext_regs_offset: i32,
    /// Offset of the FPSR cumulative-exception word.
    pub fpsr_exc_offset: i32,
}

impl Default for GuestStateLayout {
    fn default() -> Self {
        GuestStateLayout {
            ext_regs_offset: std::mem::offset_of!(JitState, ext_regs) as i32,
            fpsr_exc_offset: std::mem::offset_of!(JitState, fpsr_exc) as i32,
        }
    }
}

impl GuestStateLayout {
    /// Memory operand for a vector register (D or Q).
    pub fn vector_operand(&self, reg: ExtReg) -> MemOperand {
        let offset = match reg {
            ExtReg::Q(n) => {
                assert!(n < 16);
                n as i32 * 16
            }
            ExtReg::D(n) => {
                assert!(n < 32);
                n as i32 * 8
            }
            ExtReg::S(_) => panic!("scalar register in vector context"),
        };
        MemOperand::BaseDisp(Gpr::R15, self.ext_regs_offset + offset)
    }

    /// Memory operand for the FPSR exception word.
    pub fn fpsr_exc_operand(&self) -> MemOperand {
        MemOperand::BaseDisp(Gpr::R15, self.fpsr_exc_offset)
    }
}

/// Per-block emission context: the allocator, the guest control state the
/// block is specialized on, and the host capability set.
pub struct EmitContext<'a> {
    /// The block register allocator.
    pub reg_alloc: RegAlloc<'a>,
    /// The block being lowered.
    pub block: &'a Block,
    /// Guest state offsets.
    pub layout: GuestStateLayout,
    /// The FPCR the block is specialized on.
    pub fpcr: Fpcr,
    /// Whether the guest requires exact ARM NaN propagation.
    pub accurate_nan: bool,
    /// Host capabilities.
    pub features: HostFeatures,
}

impl EmitContext<'_> {
    /// The FPCR value baked into this block.
    #[inline]
    pub fn fpcr(&self) -> Fpcr {
        self.fpcr
    }

    /// Default-NaN mode.
    #[inline]
    pub fn fpscr_dn(&self) -> bool {
        self.fpcr.dn()
    }

    /// Flush-to-zero mode.
    #[inline]
    pub fn fpscr_ftz(&self) -> bool {
        self.fpcr.fz()
    }

    /// The FPCR rounding mode.
    #[inline]
    pub fn fpscr_rmode(&self) -> charm_core::RoundingMode {
        self.fpcr.rounding_mode()
    }

    /// Emitter policy: exact ARM NaN propagation required.
    #[inline]
    pub fn accurate_nan(&self) -> bool {
        self.accurate_nan
    }
}

/// Emission parameters a caller fixes per block.
#[derive(Debug, Clone, Copy)]
pub struct EmitConfig {
    /// Guest FPCR snapshot.
    pub fpcr: Fpcr,
    /// Exact NaN propagation policy.
    pub accurate_nan: bool,
}

impl Default for EmitConfig {
    fn default() -> Self {
        EmitConfig {
            fpcr: Fpcr::default(),
            accurate_nan: true,
        }
    }
}

/// The host MXCSR image matching a guest FPCR: same rounding direction,
/// FTZ+DAZ when the guest flushes, all host exceptions masked.
fn mxcsr_for(fpcr: Fpcr) -> u32 {
    use charm_core::RoundingMode;
    let mut mxcsr = 0x1F80;
    mxcsr |= match fpcr.rounding_mode() {
        RoundingMode::ToNearestTieEven | RoundingMode::ToNearestTieAwayFromZero => 0,
        RoundingMode::TowardsMinusInfinity => 0b01 << 13,
        RoundingMode::TowardsPlusInfinity => 0b10 << 13,
        RoundingMode::TowardsZero => 0b11 << 13,
    };
    if fpcr.fz() {
        mxcsr |= 1 << 15 | 1 << 6;
    }
    mxcsr
}

/// Lower a block to machine code: prologue, every instruction in order,
/// epilogue, then label/constant resolution.
///
/// The prologue points R15 at the guest state and swaps the host MXCSR for
/// the block's FPCR-derived image; the epilogue restores both, so a block
/// is an ordinary C function over a `JitState` pointer.
pub fn emit_block(block: &Block, features: HostFeatures, config: EmitConfig) -> Vec<u8> {
    let mut code = Assembler::new();
    let mut ctx = EmitContext {
        reg_alloc: RegAlloc::new(block),
        block,
        layout: GuestStateLayout::default(),
        fpcr: config.fpcr,
        accurate_nan: config.accurate_nan,
        features,
    };

    code.push(Gpr::R15);
    code.mov_rr(Gpr::R15, abi::param_reg(0));
    code.sub_ri(Gpr::Rsp, 16);
    code.stmxcsr(MemOperand::base(Gpr::Rsp));
    code.mov32_store_imm(
        MemOperand::BaseDisp(Gpr::Rsp, 4),
        mxcsr_for(config.fpcr),
    );
    code.ldmxcsr(MemOperand::BaseDisp(Gpr::Rsp, 4));

    for (id, inst) in block.iter() {
        emit_inst(&mut code, &mut ctx, id, inst.opcode);
        ctx.reg_alloc.end_of_inst();
    }

    code.ldmxcsr(MemOperand::base(Gpr::Rsp));
    code.add_ri(Gpr::Rsp, 16);
    code.pop(Gpr::R15);
    code.ret();
    code.finalize()
}

fn emit_inst(code: &mut Assembler, ctx: &mut EmitContext<'_>, id: InstId, opcode: Opcode) {
    match opcode {
        Opcode::A32GetVector => emit_get_vector(code, ctx, id),
        Opcode::A32SetVector => emit_set_vector(code, ctx, id),
        _ => vector_fp::emit(code, ctx, id),
    }
}

fn emit_get_vector(code: &mut Assembler, ctx: &mut EmitContext<'_>, id: InstId) {
    let args = ctx.reg_alloc.args_of(id);
    let reg = match args[0] {
        Value::ExtReg(reg) => reg,
        _ => unreachable!("vector register name expected"),
    };
    let operand = ctx.layout.vector_operand(reg);
    let xmm = ctx.reg_alloc.scratch_xmm();
    if reg.is_double() {
        code.movq_load(xmm, operand);
    } else {
        code.movaps(xmm, operand);
    }
    ctx.reg_alloc.define(id, xmm);
}

fn emit_set_vector(code: &mut Assembler, ctx: &mut EmitContext<'_>, id: InstId) {
    let args = ctx.reg_alloc.args_of(id);
    let reg = match args[0] {
        Value::ExtReg(reg) => reg,
        _ => unreachable!("vector register name expected"),
    };
    let operand = ctx.layout.vector_operand(reg);
    let xmm = ctx.reg_alloc.use_xmm(args[1]);
    if reg.is_double() {
        code.movq_store(operand, xmm);
    } else {
        code.movaps_store(operand, xmm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        let layout = GuestStateLayout::default();
        assert_eq!(layout.ext_regs_offset, 0);
        assert_eq!(layout.fpsr_exc_offset, 256);
        assert_eq!(
            layout.vector_operand(ExtReg::Q(2)),
            MemOperand::BaseDisp(Gpr::R15, 32)
        );
        assert_eq!(
            layout.vector_operand(ExtReg::D(3)),
            MemOperand::BaseDisp(Gpr::R15, 24)
        );
    }

    #[test]
    fn test_jit_state_lane_views() {
        let mut state = JitState::default();
        state.set_q(1, [1, 2, 3, 4]);
        assert_eq!(state.q(1), [1, 2, 3, 4]);
        assert_eq!(state.q(0), [0, 0, 0, 0]);

        state.set_q_from_u64(2, [0x1111_2222_3333_4444, 0xAAAA_BBBB_CCCC_DDDD]);
        assert_eq!(state.q_as_u64(2), [0x1111_2222_3333_4444, 0xAAAA_BBBB_CCCC_DDDD]);
        assert_eq!(state.q(2)[0], 0x3333_4444);
    }

    #[test]
    fn test_trivial_block_emits_prologue_epilogue() {
        let block = Block::new();
        let code = emit_block(&block, HostFeatures::baseline(), EmitConfig::default());
        // push r15; mov r15, arg0; pop r15; ret
        assert_eq!(code[..2], [0x41, 0x57]);
        assert_eq!(code[code.len() - 3..], [0x41, 0x5F, 0xC3]);
    }
}
