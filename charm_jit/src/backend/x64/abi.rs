//! Host-call ABI plumbing for software fallbacks.
//!
//! Emitted blocks are plain C functions whose prologue leaves RSP 16-byte
//! aligned for the whole straight-line body. Every spill area and fallback
//! frame below is sized to keep that alignment, so RSP is 16-byte aligned
//! immediately before every `call` and `movaps` spill slots stay aligned.

use super::assembler::Assembler;
use super::registers::{CallingConvention, Gpr, MemOperand, Xmm};

/// Shadow space the host convention requires below call arguments.
pub const ABI_SHADOW_SPACE: u32 = CallingConvention::host().shadow_space();

/// The `n`-th integer parameter register of the host convention.
///
/// Panics when the convention passes that parameter on the stack; callers
/// that need stack parameters (the Windows five/six-argument fallbacks)
/// spill explicitly instead.
pub fn param_reg(n: usize) -> Gpr {
    CallingConvention::host().int_arg_regs()[n]
}

/// Number of integer parameters passed in registers.
pub fn param_reg_count() -> usize {
    CallingConvention::host().int_arg_regs().len()
}

/// Push all caller-saved state except `kept` (the XMM that will carry the
/// call's result), returning the byte size of the XMM spill area.
///
/// Expects RSP 16-byte aligned; leaves it 16-byte aligned.
pub fn push_caller_saved_except(code: &mut Assembler, kept: Xmm) -> u32 {
    let cc = CallingConvention::host();
    let gprs = cc.caller_saved_gprs();
    for reg in gprs.iter() {
        code.push(reg);
    }
    let xmms = cc.caller_saved_xmms().remove(kept);
    let mut space = xmms.count() * 16;
    if gprs.count() % 2 == 1 {
        space += 8;
    }
    code.sub_ri(Gpr::Rsp, space as i32);
    for (slot, xmm) in xmms.iter().enumerate() {
        code.movaps_store(MemOperand::BaseDisp(Gpr::Rsp, (slot * 16) as i32), xmm);
    }
    space
}

/// Undo [`push_caller_saved_except`].
pub fn pop_caller_saved_except(code: &mut Assembler, kept: Xmm) {
    let cc = CallingConvention::host();
    let gprs = cc.caller_saved_gprs();
    let xmms = cc.caller_saved_xmms().remove(kept);
    for (slot, xmm) in xmms.iter().enumerate() {
        code.movaps(xmm, MemOperand::BaseDisp(Gpr::Rsp, (slot * 16) as i32));
    }
    let mut space = xmms.count() * 16;
    if gprs.count() % 2 == 1 {
        space += 8;
    }
    code.add_ri(Gpr::Rsp, space as i32);
    for reg in gprs.iter().collect::<Vec<_>>().into_iter().rev() {
        code.pop(reg);
    }
}

/// Emit `mov rax, fn; call rax`.
pub fn call_host_function(code: &mut Assembler, function: usize) {
    code.mov_ri64(Gpr::Rax, function as u64);
    code.call_reg(Gpr::Rax);
}
