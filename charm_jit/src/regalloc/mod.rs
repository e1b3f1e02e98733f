//! Per-block register allocation.
//!
//! The emitter drives allocation through a narrow contract, one
//! instruction at a time:
//!
//! 1. `args_of` fetches the operand values;
//! 2. `use_xmm` / `use_scratch_xmm` bind operands to host registers
//!    (read-only or writable — a writable use may silently rename the
//!    value's register when this is its last use);
//! 3. `scratch_xmm` / `scratch_gpr` acquire fresh temporaries;
//! 4. `end_of_alloc_scope` ends operand validity, after which only
//!    scratches survive (the software-fallback emitters call this before
//!    setting up a host call);
//! 5. `host_call` reports which caller-saved registers still carry live
//!    values, for the emitter to preserve around the call;
//! 6. `define` binds the instruction's result register;
//! 7. `end_of_inst` (called by the block walker) releases scratches and
//!    dead values.
//!
//! Any misuse — an unbound operand, an exhausted register file, a use
//! after `end_of_alloc_scope` — is a backend bug and panics.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::backend::x64::assembler::Assembler;
use crate::backend::x64::registers::{CallingConvention, Gpr, GprSet, Xmm, XmmSet};
use crate::ir::{Block, InstId, Value};

/// Registers never handed out: the stack pointer, the guest-state pointer,
/// and RAX (the host-call target scratch).
const RESERVED_GPRS: GprSet = GprSet::EMPTY
    .insert(Gpr::Rsp)
    .insert(Gpr::R15)
    .insert(Gpr::Rax);

/// The block register allocator.
pub struct RegAlloc<'a> {
    block: &'a Block,
    bindings: FxHashMap<InstId, Xmm>,
    remaining_uses: Vec<u32>,
    xmm_in_use: XmmSet,
    gpr_in_use: GprSet,
    inst_xmm_scratches: XmmSet,
    inst_gpr_scratches: GprSet,
    current_uses: XmmSet,
    scope_ended: bool,
}

impl<'a> RegAlloc<'a> {
    /// Build an allocator for one block, counting uses up front.
    pub fn new(block: &'a Block) -> RegAlloc<'a> {
        let mut remaining_uses = vec![0u32; block.len()];
        for (_, inst) in block.iter() {
            for arg in &inst.args {
                if let Value::Inst(id) = arg {
                    remaining_uses[id.index()] += 1;
                }
            }
        }
        RegAlloc {
            block,
            bindings: FxHashMap::default(),
            remaining_uses,
            xmm_in_use: XmmSet::EMPTY,
            gpr_in_use: RESERVED_GPRS,
            inst_xmm_scratches: XmmSet::EMPTY,
            inst_gpr_scratches: GprSet::EMPTY,
            current_uses: XmmSet::EMPTY,
            scope_ended: false,
        }
    }

    /// The ordered operands of an instruction.
    pub fn args_of(&self, id: InstId) -> SmallVec<[Value; 3]> {
        self.block.inst(id).args.clone()
    }

    /// The XMM currently bound to a value, read-only for this instruction.
    pub fn use_xmm(&mut self, value: Value) -> Xmm {
        assert!(!self.scope_ended, "operand use after end_of_alloc_scope");
        let id = value.inst().expect("operand is not an instruction result");
        let reg = *self
            .bindings
            .get(&id)
            .unwrap_or_else(|| panic!("{id} has no register binding"));
        self.remaining_uses[id.index()] -= 1;
        self.current_uses = self.current_uses.insert(reg);
        reg
    }

    /// A writable XMM initialized from `value`. When this is the value's
    /// last use its register is renamed in place; otherwise the value is
    /// copied into a fresh scratch.
    pub fn use_scratch_xmm(&mut self, code: &mut Assembler, value: Value) -> Xmm {
        assert!(!self.scope_ended, "operand use after end_of_alloc_scope");
        let id = value.inst().expect("operand is not an instruction result");
        let reg = *self
            .bindings
            .get(&id)
            .unwrap_or_else(|| panic!("{id} has no register binding"));
        self.remaining_uses[id.index()] -= 1;
        if self.remaining_uses[id.index()] == 0 {
            self.bindings.remove(&id);
            self.inst_xmm_scratches = self.inst_xmm_scratches.insert(reg);
            reg
        } else {
            let scratch = self.scratch_xmm();
            code.movaps(scratch, reg);
            scratch
        }
    }

    /// A fresh writable XMM.
    pub fn scratch_xmm(&mut self) -> Xmm {
        let free = XmmSet::ALL.difference(self.xmm_in_use);
        let reg = free.first().expect("out of XMM registers");
        self.xmm_in_use = self.xmm_in_use.insert(reg);
        self.inst_xmm_scratches = self.inst_xmm_scratches.insert(reg);
        reg
    }

    /// A fresh writable GPR.
    pub fn scratch_gpr(&mut self) -> Gpr {
        let free = GprSet::ALL.difference(self.gpr_in_use);
        let reg = free.first().expect("out of general-purpose registers");
        self.gpr_in_use = self.gpr_in_use.insert(reg);
        self.inst_gpr_scratches = self.inst_gpr_scratches.insert(reg);
        reg
    }

    /// End operand validity for the current instruction: dead values
    /// release their registers, and further `use_*` calls are rejected.
    pub fn end_of_alloc_scope(&mut self) {
        self.release_dead();
        self.current_uses = XmmSet::EMPTY;
        self.scope_ended = true;
    }

    /// Prepare for a host ABI call: returns the caller-saved XMM registers
    /// that still hold live values, which the emitter must preserve.
    pub fn host_call(&self) -> XmmSet {
        debug_assert!(
            self.scope_ended,
            "host_call before end_of_alloc_scope"
        );
        let caller_saved = CallingConvention::host().caller_saved_xmms();
        let mut live = XmmSet::EMPTY;
        for &reg in self.bindings.values() {
            if caller_saved.contains(reg) {
                live = live.insert(reg);
            }
        }
        live
    }

    /// Bind the instruction's result to a register. Pairs with any
    /// preceding `use_scratch_xmm`/`scratch_xmm` that produced `reg`.
    pub fn define(&mut self, id: InstId, reg: Xmm) {
        let previous = self.bindings.insert(id, reg);
        debug_assert!(previous.is_none(), "{id} defined twice");
        self.inst_xmm_scratches = self.inst_xmm_scratches.remove(reg);
        self.xmm_in_use = self.xmm_in_use.insert(reg);
    }

    /// Finish the current instruction: release its scratches and any
    /// now-dead values, and reset the scope for the next one.
    pub fn end_of_inst(&mut self) {
        self.xmm_in_use = self.xmm_in_use.difference(self.inst_xmm_scratches);
        self.gpr_in_use = self.gpr_in_use.difference(self.inst_gpr_scratches);
        self.inst_xmm_scratches = XmmSet::EMPTY;
        self.inst_gpr_scratches = GprSet::EMPTY;
        self.current_uses = XmmSet::EMPTY;
        self.release_dead();
        self.scope_ended = false;
    }

    /// The register a value is bound to, if any (for the block walker's
    /// store lowering).
    pub fn binding(&self, id: InstId) -> Option<Xmm> {
        self.bindings.get(&id).copied()
    }

    fn release_dead(&mut self) {
        let remaining = &self.remaining_uses;
        let mut freed = XmmSet::EMPTY;
        self.bindings.retain(|id, reg| {
            if remaining[id.index()] == 0 {
                freed = freed.insert(*reg);
                false
            } else {
                true
            }
        });
        self.xmm_in_use = self.xmm_in_use.difference(freed);
    }
}
