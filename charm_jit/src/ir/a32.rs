//! A32 front-end façade over the generic IR emitter.
//!
//! Each method appends exactly one IR node (plus the occasional
//! byte-reverse for big-endian guests) and returns its typed handle. The
//! architectural quirks live here so decoders stay mechanical: the PC
//! reads ahead of the current instruction, branch writes mask the target
//! per instruction set, and big-endian data accesses reverse bytes through
//! a dedicated IR node rather than a runtime branch.

use super::block::Block;
use super::emitter::IrEmitter;
use super::opcode::Opcode;
use super::value::{
    CoprocessorInfo, ExtReg, Nzcv, Reg, Value, U1, U16, U32, U32U64, U64, U8,
};

/// Where in guest code the front end currently is, plus the mode bits that
/// change instruction semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationDescriptor {
    /// Address of the instruction being translated.
    pub pc: u32,
    /// Thumb mode.
    pub t_flag: bool,
    /// Big-endian data accesses.
    pub e_flag: bool,
}

/// Guest exceptions the front end can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Exception {
    /// The instruction is undefined in this configuration.
    UndefinedInstruction = 0,
    /// The instruction has unpredictable behaviour.
    UnpredictableInstruction = 1,
    /// BKPT hit.
    Breakpoint = 2,
    /// WFI.
    WaitForInterrupt = 3,
    /// WFE.
    WaitForEvent = 4,
    /// YIELD.
    Yield = 5,
}

/// The A32 IR emitter.
pub struct A32IrEmitter<'a> {
    /// The underlying generic emitter.
    pub ir: IrEmitter<'a>,
    location: LocationDescriptor,
}

impl<'a> A32IrEmitter<'a> {
    /// Start emitting at the given guest location.
    pub fn new(block: &'a mut Block, location: LocationDescriptor) -> A32IrEmitter<'a> {
        A32IrEmitter {
            ir: IrEmitter::new(block),
            location,
        }
    }

    /// The PC value guest instructions observe: ahead of the current
    /// instruction by 4 in Thumb, 8 in ARM.
    pub fn pc(&self) -> u32 {
        let offset = if self.location.t_flag { 4 } else { 8 };
        self.location.pc.wrapping_add(offset)
    }

    /// The observed PC aligned down to `alignment` bytes.
    pub fn align_pc(&self, alignment: u32) -> u32 {
        let pc = self.pc();
        pc - pc % alignment
    }

    // =========================================================================
    // Core registers
    // =========================================================================

    /// Read a core register; reads of PC materialize the read-ahead value.
    pub fn get_register(&mut self, reg: Reg) -> U32 {
        if reg == Reg::Pc {
            let pc = self.pc();
            return self.ir.imm32(pc);
        }
        U32(Value::Inst(
            self.ir.push(Opcode::A32GetRegister, &[Value::Reg(reg)]),
        ))
    }

    /// Write a core register. PC writes go through the `*_write_pc`
    /// helpers, never here.
    pub fn set_register(&mut self, reg: Reg, value: U32) {
        assert!(reg != Reg::Pc, "use branch_write_pc for PC writes");
        self.ir
            .push(Opcode::A32SetRegister, &[Value::Reg(reg), value.0]);
    }

    /// Read an extension register (S or D).
    pub fn get_extended_register(&mut self, reg: ExtReg) -> U32U64 {
        let opcode = match reg {
            ExtReg::S(_) => Opcode::A32GetExtendedRegister32,
            ExtReg::D(_) => Opcode::A32GetExtendedRegister64,
            ExtReg::Q(_) => panic!("quad registers are read with get_vector"),
        };
        U32U64(Value::Inst(self.ir.push(opcode, &[Value::ExtReg(reg)])))
    }

    /// Write an extension register (S or D).
    pub fn set_extended_register(&mut self, reg: ExtReg, value: U32U64) {
        let opcode = match reg {
            ExtReg::S(_) => Opcode::A32SetExtendedRegister32,
            ExtReg::D(_) => Opcode::A32SetExtendedRegister64,
            ExtReg::Q(_) => panic!("quad registers are written with set_vector"),
        };
        self.ir.push(opcode, &[Value::ExtReg(reg), value.0]);
    }

    /// Read a vector register (D or Q) as 128 bits.
    pub fn get_vector(&mut self, reg: ExtReg) -> super::value::V128 {
        assert!(!reg.is_single(), "vector reads take D or Q registers");
        super::value::V128(Value::Inst(
            self.ir.push(Opcode::A32GetVector, &[Value::ExtReg(reg)]),
        ))
    }

    /// Write a vector register (D or Q).
    pub fn set_vector(&mut self, reg: ExtReg, value: super::value::V128) {
        assert!(!reg.is_single(), "vector writes take D or Q registers");
        self.ir
            .push(Opcode::A32SetVector, &[Value::ExtReg(reg), value.0]);
    }

    // =========================================================================
    // PC writes
    // =========================================================================

    /// Data-processing write to the PC.
    ///
    /// Version-dependent behaviour; this is the ARMv6k rendition.
    pub fn alu_write_pc(&mut self, value: U32) {
        self.branch_write_pc(value);
    }

    /// Branch to `value`, masking the interworking bits the current
    /// instruction set ignores.
    pub fn branch_write_pc(&mut self, value: U32) {
        let mask = if self.location.t_flag {
            0xFFFF_FFFE
        } else {
            0xFFFF_FFFC
        };
        let mask = self.ir.imm32(mask);
        let new_pc = self.ir.and_32(value, mask);
        self.ir
            .push(Opcode::A32SetRegister, &[Value::Reg(Reg::Pc), new_pc.0]);
    }

    /// Interworking branch: bit 0 selects the target instruction set.
    pub fn bx_write_pc(&mut self, value: U32) {
        self.ir.push(Opcode::A32BXWritePC, &[value.0]);
    }

    /// Load into the PC.
    ///
    /// Version-dependent behaviour; interworking as of ARMv6k.
    pub fn load_write_pc(&mut self, value: U32) {
        self.bx_write_pc(value);
    }

    /// SVC.
    pub fn call_supervisor(&mut self, imm: U32) {
        self.ir.push(Opcode::A32CallSupervisor, &[imm.0]);
    }

    /// Raise a guest exception at the current location.
    pub fn exception_raised(&mut self, exception: Exception) {
        let pc = self.location.pc;
        self.ir.push(
            Opcode::A32ExceptionRaised,
            &[Value::Imm32(pc), Value::Imm64(exception as u64)],
        );
    }

    // =========================================================================
    // Status registers and flags
    // =========================================================================

    /// Read the CPSR.
    pub fn get_cpsr(&mut self) -> U32 {
        U32(Value::Inst(self.ir.push(Opcode::A32GetCpsr, &[])))
    }

    /// Write the CPSR.
    pub fn set_cpsr(&mut self, value: U32) {
        self.ir.push(Opcode::A32SetCpsr, &[value.0]);
    }

    /// Write the CPSR's NZCV field.
    pub fn set_cpsr_nzcv(&mut self, value: U32) {
        self.ir.push(Opcode::A32SetCpsrNZCV, &[value.0]);
    }

    /// Write the CPSR's NZCVQ field.
    pub fn set_cpsr_nzcvq(&mut self, value: U32) {
        self.ir.push(Opcode::A32SetCpsrNZCVQ, &[value.0]);
    }

    /// Read the carry flag.
    pub fn get_c_flag(&mut self) -> U1 {
        U1(Value::Inst(self.ir.push(Opcode::A32GetCFlag, &[])))
    }

    /// Write the negative flag.
    pub fn set_n_flag(&mut self, value: U1) {
        self.ir.push(Opcode::A32SetNFlag, &[value.0]);
    }

    /// Write the zero flag.
    pub fn set_z_flag(&mut self, value: U1) {
        self.ir.push(Opcode::A32SetZFlag, &[value.0]);
    }

    /// Write the carry flag.
    pub fn set_c_flag(&mut self, value: U1) {
        self.ir.push(Opcode::A32SetCFlag, &[value.0]);
    }

    /// Write the overflow flag.
    pub fn set_v_flag(&mut self, value: U1) {
        self.ir.push(Opcode::A32SetVFlag, &[value.0]);
    }

    /// Sticky-OR into the saturation flag.
    pub fn or_q_flag(&mut self, value: U1) {
        self.ir.push(Opcode::A32OrQFlag, &[value.0]);
    }

    /// Read the GE flags.
    pub fn get_ge_flags(&mut self) -> U32 {
        U32(Value::Inst(self.ir.push(Opcode::A32GetGEFlags, &[])))
    }

    /// Write the GE flags.
    pub fn set_ge_flags(&mut self, value: U32) {
        self.ir.push(Opcode::A32SetGEFlags, &[value.0]);
    }

    /// Write the GE flags from their packed 4-bit form.
    pub fn set_ge_flags_compressed(&mut self, value: U32) {
        self.ir.push(Opcode::A32SetGEFlagsCompressed, &[value.0]);
    }

    /// Read the FPSCR.
    pub fn get_fpscr(&mut self) -> U32 {
        U32(Value::Inst(self.ir.push(Opcode::A32GetFpscr, &[])))
    }

    /// Write the FPSCR.
    pub fn set_fpscr(&mut self, value: U32) {
        self.ir.push(Opcode::A32SetFpscr, &[value.0]);
    }

    /// Read the FPSCR's NZCV field.
    pub fn get_fpscr_nzcv(&mut self) -> U32 {
        U32(Value::Inst(self.ir.push(Opcode::A32GetFpscrNZCV, &[])))
    }

    /// Write the FPSCR's NZCV field.
    pub fn set_fpscr_nzcv(&mut self, value: Nzcv) {
        self.ir.push(Opcode::A32SetFpscrNZCV, &[value.0]);
    }

    // =========================================================================
    // Memory
    // =========================================================================

    /// Drop any held exclusive monitor.
    pub fn clear_exclusive(&mut self) {
        self.ir.push(Opcode::A32ClearExclusive, &[]);
    }

    /// Arm the exclusive monitor for `byte_size` bytes at `vaddr`.
    pub fn set_exclusive(&mut self, vaddr: U32, byte_size: u8) {
        assert!(matches!(byte_size, 1 | 2 | 4 | 8 | 16));
        self.ir
            .push(Opcode::A32SetExclusive, &[vaddr.0, Value::Imm8(byte_size)]);
    }

    /// Read a byte.
    pub fn read_memory_8(&mut self, vaddr: U32) -> U8 {
        U8(Value::Inst(self.ir.push(Opcode::A32ReadMemory8, &[vaddr.0])))
    }

    /// Read a halfword, byte-reversed when the guest is big-endian.
    pub fn read_memory_16(&mut self, vaddr: U32) -> U16 {
        let value = U16(Value::Inst(
            self.ir.push(Opcode::A32ReadMemory16, &[vaddr.0]),
        ));
        if self.location.e_flag {
            self.ir.byte_reverse_half(value)
        } else {
            value
        }
    }

    /// Read a word, byte-reversed when the guest is big-endian.
    pub fn read_memory_32(&mut self, vaddr: U32) -> U32 {
        let value = U32(Value::Inst(
            self.ir.push(Opcode::A32ReadMemory32, &[vaddr.0]),
        ));
        if self.location.e_flag {
            self.ir.byte_reverse_word(value)
        } else {
            value
        }
    }

    /// Read a doubleword, byte-reversed when the guest is big-endian.
    pub fn read_memory_64(&mut self, vaddr: U32) -> U64 {
        let value = U64(Value::Inst(
            self.ir.push(Opcode::A32ReadMemory64, &[vaddr.0]),
        ));
        if self.location.e_flag {
            self.ir.byte_reverse_dual(value)
        } else {
            value
        }
    }

    /// Write a byte.
    pub fn write_memory_8(&mut self, vaddr: U32, value: U8) {
        self.ir.push(Opcode::A32WriteMemory8, &[vaddr.0, value.0]);
    }

    /// Write a halfword, byte-reversed when the guest is big-endian.
    pub fn write_memory_16(&mut self, vaddr: U32, value: U16) {
        let value = if self.location.e_flag {
            self.ir.byte_reverse_half(value)
        } else {
            value
        };
        self.ir.push(Opcode::A32WriteMemory16, &[vaddr.0, value.0]);
    }

    /// Write a word, byte-reversed when the guest is big-endian.
    pub fn write_memory_32(&mut self, vaddr: U32, value: U32) {
        let value = if self.location.e_flag {
            self.ir.byte_reverse_word(value)
        } else {
            value
        };
        self.ir.push(Opcode::A32WriteMemory32, &[vaddr.0, value.0]);
    }

    /// Write a doubleword, byte-reversed when the guest is big-endian.
    pub fn write_memory_64(&mut self, vaddr: U32, value: U64) {
        let value = if self.location.e_flag {
            self.ir.byte_reverse_dual(value)
        } else {
            value
        };
        self.ir.push(Opcode::A32WriteMemory64, &[vaddr.0, value.0]);
    }

    /// Exclusive byte store; returns 0 on success, 1 on failure.
    pub fn exclusive_write_memory_8(&mut self, vaddr: U32, value: U8) -> U32 {
        U32(Value::Inst(
            self.ir
                .push(Opcode::A32ExclusiveWriteMemory8, &[vaddr.0, value.0]),
        ))
    }

    /// Exclusive halfword store.
    pub fn exclusive_write_memory_16(&mut self, vaddr: U32, value: U16) -> U32 {
        let value = if self.location.e_flag {
            self.ir.byte_reverse_half(value)
        } else {
            value
        };
        U32(Value::Inst(
            self.ir
                .push(Opcode::A32ExclusiveWriteMemory16, &[vaddr.0, value.0]),
        ))
    }

    /// Exclusive word store.
    pub fn exclusive_write_memory_32(&mut self, vaddr: U32, value: U32) -> U32 {
        let value = if self.location.e_flag {
            self.ir.byte_reverse_word(value)
        } else {
            value
        };
        U32(Value::Inst(
            self.ir
                .push(Opcode::A32ExclusiveWriteMemory32, &[vaddr.0, value.0]),
        ))
    }

    /// Exclusive doubleword store from two words.
    pub fn exclusive_write_memory_64(&mut self, vaddr: U32, lo: U32, hi: U32) -> U32 {
        let (lo, hi) = if self.location.e_flag {
            (
                self.ir.byte_reverse_word(lo),
                self.ir.byte_reverse_word(hi),
            )
        } else {
            (lo, hi)
        };
        U32(Value::Inst(self.ir.push(
            Opcode::A32ExclusiveWriteMemory64,
            &[vaddr.0, lo.0, hi.0],
        )))
    }

    // =========================================================================
    // Coprocessor
    // =========================================================================

    /// CDP/CDP2.
    #[allow(clippy::too_many_arguments)]
    pub fn coproc_internal_operation(
        &mut self,
        coproc_no: u8,
        two: bool,
        opc1: u8,
        rd: u8,
        rn: u8,
        rm: u8,
        opc2: u8,
    ) {
        let info = coproc_info(coproc_no, two, &[opc1, rd, rn, rm, opc2]);
        self.ir
            .push(Opcode::A32CoprocInternalOperation, &[Value::Coproc(info)]);
    }

    /// MCR/MCR2.
    #[allow(clippy::too_many_arguments)]
    pub fn coproc_send_one_word(
        &mut self,
        coproc_no: u8,
        two: bool,
        opc1: u8,
        rn: u8,
        rm: u8,
        opc2: u8,
        word: U32,
    ) {
        let info = coproc_info(coproc_no, two, &[opc1, rn, rm, opc2]);
        self.ir
            .push(Opcode::A32CoprocSendOneWord, &[Value::Coproc(info), word.0]);
    }

    /// MCRR/MCRR2.
    pub fn coproc_send_two_words(
        &mut self,
        coproc_no: u8,
        two: bool,
        opc: u8,
        rm: u8,
        word1: U32,
        word2: U32,
    ) {
        let info = coproc_info(coproc_no, two, &[opc, rm]);
        self.ir.push(
            Opcode::A32CoprocSendTwoWords,
            &[Value::Coproc(info), word1.0, word2.0],
        );
    }

    /// MRC/MRC2.
    pub fn coproc_get_one_word(
        &mut self,
        coproc_no: u8,
        two: bool,
        opc1: u8,
        rn: u8,
        rm: u8,
        opc2: u8,
    ) -> U32 {
        let info = coproc_info(coproc_no, two, &[opc1, rn, rm, opc2]);
        U32(Value::Inst(
            self.ir
                .push(Opcode::A32CoprocGetOneWord, &[Value::Coproc(info)]),
        ))
    }

    /// MRRC/MRRC2.
    pub fn coproc_get_two_words(&mut self, coproc_no: u8, two: bool, opc: u8, rm: u8) -> U64 {
        let info = coproc_info(coproc_no, two, &[opc, rm]);
        U64(Value::Inst(
            self.ir
                .push(Opcode::A32CoprocGetTwoWords, &[Value::Coproc(info)]),
        ))
    }

    /// LDC/LDC2.
    #[allow(clippy::too_many_arguments)]
    pub fn coproc_load_words(
        &mut self,
        coproc_no: u8,
        two: bool,
        long_transfer: bool,
        rd: u8,
        address: U32,
        has_option: bool,
        option: u8,
    ) {
        let info = coproc_info(
            coproc_no,
            two,
            &[long_transfer as u8, rd, has_option as u8, option],
        );
        self.ir
            .push(Opcode::A32CoprocLoadWords, &[Value::Coproc(info), address.0]);
    }

    /// STC/STC2.
    #[allow(clippy::too_many_arguments)]
    pub fn coproc_store_words(
        &mut self,
        coproc_no: u8,
        two: bool,
        long_transfer: bool,
        rd: u8,
        address: U32,
        has_option: bool,
        option: u8,
    ) {
        let info = coproc_info(
            coproc_no,
            two,
            &[long_transfer as u8, rd, has_option as u8, option],
        );
        self.ir.push(
            Opcode::A32CoprocStoreWords,
            &[Value::Coproc(info), address.0],
        );
    }
}

/// Pack a coprocessor operation into the six-byte immediate: byte 0 holds
/// the coprocessor number with the `two` bit in bit 7, the remaining bytes
/// hold the operation's fields in order (unused trailing bytes zero).
fn coproc_info(coproc_no: u8, two: bool, fields: &[u8]) -> CoprocessorInfo {
    assert!(coproc_no <= 15);
    debug_assert!(fields.len() <= 5);
    let mut bytes = [0u8; 6];
    bytes[0] = coproc_no | (two as u8) << 7;
    bytes[1..1 + fields.len()].copy_from_slice(fields);
    CoprocessorInfo(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm_at(pc: u32) -> LocationDescriptor {
        LocationDescriptor {
            pc,
            t_flag: false,
            e_flag: false,
        }
    }

    fn thumb_at(pc: u32) -> LocationDescriptor {
        LocationDescriptor {
            pc,
            t_flag: true,
            e_flag: false,
        }
    }

    #[test]
    fn test_pc_read_ahead() {
        let mut block = Block::new();
        let ir = A32IrEmitter::new(&mut block, arm_at(0x1000));
        assert_eq!(ir.pc(), 0x1008);

        let mut block = Block::new();
        let ir = A32IrEmitter::new(&mut block, thumb_at(0x1000));
        assert_eq!(ir.pc(), 0x1004);
    }

    #[test]
    fn test_align_pc() {
        let mut block = Block::new();
        let ir = A32IrEmitter::new(&mut block, thumb_at(0x1002));
        // PC reads 0x1006; aligned to 4 it is 0x1004.
        assert_eq!(ir.align_pc(4), 0x1004);
    }

    #[test]
    fn test_get_pc_materializes_immediate() {
        let mut block = Block::new();
        let mut ir = A32IrEmitter::new(&mut block, arm_at(0x2000));
        let pc = ir.get_register(Reg::Pc);
        assert_eq!(pc.value(), Value::Imm32(0x2008));
        assert!(block.is_empty(), "PC reads emit no instruction");
    }

    #[test]
    #[should_panic(expected = "branch_write_pc")]
    fn test_set_register_rejects_pc() {
        let mut block = Block::new();
        let mut ir = A32IrEmitter::new(&mut block, arm_at(0));
        let value = ir.ir.imm32(0);
        ir.set_register(Reg::Pc, value);
    }

    #[test]
    fn test_branch_write_pc_masks_by_instruction_set() {
        // ARM masks the low two bits.
        let mut block = Block::new();
        let mut ir = A32IrEmitter::new(&mut block, arm_at(0));
        let target = ir.ir.imm32(0x1003);
        ir.branch_write_pc(target);
        let and = block.inst(crate::ir::block::InstId::new(0));
        assert_eq!(and.opcode, Opcode::And32);
        assert_eq!(and.args[1], Value::Imm32(0xFFFF_FFFC));

        // Thumb masks only bit zero.
        let mut block = Block::new();
        let mut ir = A32IrEmitter::new(&mut block, thumb_at(0));
        let target = ir.ir.imm32(0x1003);
        ir.branch_write_pc(target);
        let and = block.inst(crate::ir::block::InstId::new(0));
        assert_eq!(and.args[1], Value::Imm32(0xFFFF_FFFE));
    }

    #[test]
    fn test_big_endian_reads_insert_byte_reverse() {
        let mut block = Block::new();
        let location = LocationDescriptor {
            pc: 0,
            t_flag: false,
            e_flag: true,
        };
        let mut ir = A32IrEmitter::new(&mut block, location);
        let addr = ir.ir.imm32(0x8000);
        ir.read_memory_32(addr);
        assert_eq!(block.len(), 2);
        assert_eq!(block.insts()[0].opcode, Opcode::A32ReadMemory32);
        assert_eq!(block.insts()[1].opcode, Opcode::ByteReverseWord);

        // Little-endian reads do not.
        let mut block = Block::new();
        let mut ir = A32IrEmitter::new(&mut block, arm_at(0));
        let addr = ir.ir.imm32(0x8000);
        ir.read_memory_32(addr);
        assert_eq!(block.len(), 1);
    }

    #[test]
    fn test_big_endian_writes_reverse_before_store() {
        let mut block = Block::new();
        let location = LocationDescriptor {
            pc: 0,
            t_flag: false,
            e_flag: true,
        };
        let mut ir = A32IrEmitter::new(&mut block, location);
        let addr = ir.ir.imm32(0x8000);
        let value = ir.ir.imm32(0x1122_3344);
        ir.write_memory_32(addr, value);
        assert_eq!(block.insts()[0].opcode, Opcode::ByteReverseWord);
        assert_eq!(block.insts()[1].opcode, Opcode::A32WriteMemory32);
    }

    #[test]
    fn test_exclusive_size_validation() {
        let mut block = Block::new();
        let mut ir = A32IrEmitter::new(&mut block, arm_at(0));
        let addr = ir.ir.imm32(0x8000);
        ir.set_exclusive(addr, 8);
        assert_eq!(block.insts()[0].args[1], Value::Imm8(8));
    }

    #[test]
    fn test_coproc_info_packing() {
        let info = coproc_info(15, true, &[1, 2, 3, 4]);
        assert_eq!(info.0, [0x8F, 1, 2, 3, 4, 0]);
        let info = coproc_info(10, false, &[7]);
        assert_eq!(info.0, [10, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn test_exception_raised_captures_location() {
        let mut block = Block::new();
        let mut ir = A32IrEmitter::new(&mut block, arm_at(0x4444));
        ir.exception_raised(Exception::Breakpoint);
        let inst = &block.insts()[0];
        assert_eq!(inst.args[0], Value::Imm32(0x4444));
        assert_eq!(inst.args[1], Value::Imm64(Exception::Breakpoint as u64));
    }
}
