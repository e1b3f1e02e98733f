//! Typed IR constructors.
//!
//! Every method appends exactly one instruction to the block (immediates
//! aside) and returns a typed handle to its result. The vector
//! floating-point constructors take the element size as a plain integer
//! and select the sized opcode, mirroring how the decoders call them.

use super::block::{Block, InstId};
use super::opcode::Opcode;
use super::value::{Value, U1, U16, U32, U64, V128, U8};

/// The generic IR emitter: a cursor appending to one block.
pub struct IrEmitter<'a> {
    /// The block under construction.
    pub block: &'a mut Block,
}

impl<'a> IrEmitter<'a> {
    /// Wrap a block.
    pub fn new(block: &'a mut Block) -> IrEmitter<'a> {
        IrEmitter { block }
    }

    #[inline]
    pub(crate) fn push(&mut self, opcode: Opcode, args: &[Value]) -> InstId {
        self.block.push(opcode, args)
    }

    // =========================================================================
    // Immediates
    // =========================================================================

    /// A 1-bit immediate.
    pub fn imm1(&mut self, value: bool) -> U1 {
        U1(Value::Imm1(value))
    }

    /// An 8-bit immediate.
    pub fn imm8(&mut self, value: u8) -> U8 {
        U8(Value::Imm8(value))
    }

    /// A 32-bit immediate.
    pub fn imm32(&mut self, value: u32) -> U32 {
        U32(Value::Imm32(value))
    }

    /// A 64-bit immediate.
    pub fn imm64(&mut self, value: u64) -> U64 {
        U64(Value::Imm64(value))
    }

    // =========================================================================
    // Scalar operations
    // =========================================================================

    /// Bitwise AND of two words.
    pub fn and_32(&mut self, a: U32, b: U32) -> U32 {
        U32(Value::Inst(self.push(Opcode::And32, &[a.0, b.0])))
    }

    /// Reverse the bytes of a halfword.
    pub fn byte_reverse_half(&mut self, value: U16) -> U16 {
        U16(Value::Inst(self.push(Opcode::ByteReverseHalf, &[value.0])))
    }

    /// Reverse the bytes of a word.
    pub fn byte_reverse_word(&mut self, value: U32) -> U32 {
        U32(Value::Inst(self.push(Opcode::ByteReverseWord, &[value.0])))
    }

    /// Reverse the bytes of a doubleword.
    pub fn byte_reverse_dual(&mut self, value: U64) -> U64 {
        U64(Value::Inst(self.push(Opcode::ByteReverseDual, &[value.0])))
    }

    // =========================================================================
    // Vector floating-point
    // =========================================================================

    fn fp_vector_unary(&mut self, opcode: Opcode, a: V128) -> V128 {
        V128(Value::Inst(self.push(opcode, &[a.0])))
    }

    fn fp_vector_binary(&mut self, opcode: Opcode, a: V128, b: V128) -> V128 {
        V128(Value::Inst(self.push(opcode, &[a.0, b.0])))
    }

    /// Per-lane absolute value (`esize` ∈ {16, 32, 64}).
    pub fn fp_vector_abs(&mut self, esize: usize, a: V128) -> V128 {
        let opcode = match esize {
            16 => Opcode::FpVectorAbs16,
            32 => Opcode::FpVectorAbs32,
            64 => Opcode::FpVectorAbs64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_unary(opcode, a)
    }

    /// Per-lane negation (`esize` ∈ {16, 32, 64}).
    pub fn fp_vector_neg(&mut self, esize: usize, a: V128) -> V128 {
        let opcode = match esize {
            16 => Opcode::FpVectorNeg16,
            32 => Opcode::FpVectorNeg32,
            64 => Opcode::FpVectorNeg64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_unary(opcode, a)
    }

    /// Per-lane addition.
    pub fn fp_vector_add(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorAdd32,
            64 => Opcode::FpVectorAdd64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane subtraction.
    pub fn fp_vector_sub(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorSub32,
            64 => Opcode::FpVectorSub64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane multiplication.
    pub fn fp_vector_mul(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorMul32,
            64 => Opcode::FpVectorMul64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane division.
    pub fn fp_vector_div(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorDiv32,
            64 => Opcode::FpVectorDiv64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane maximum with ARM zero/NaN rules.
    pub fn fp_vector_max(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorMax32,
            64 => Opcode::FpVectorMax64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane minimum with ARM zero/NaN rules.
    pub fn fp_vector_min(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorMin32,
            64 => Opcode::FpVectorMin64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane equality mask.
    pub fn fp_vector_equal(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorEqual32,
            64 => Opcode::FpVectorEqual64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane greater-than mask.
    pub fn fp_vector_greater(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorGreater32,
            64 => Opcode::FpVectorGreater64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane greater-or-equal mask.
    pub fn fp_vector_greater_equal(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorGreaterEqual32,
            64 => Opcode::FpVectorGreaterEqual64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Fused per-lane `addend + a × b`.
    pub fn fp_vector_mul_add(&mut self, esize: usize, addend: V128, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorMulAdd32,
            64 => Opcode::FpVectorMulAdd64,
            _ => unreachable!("invalid esize {esize}"),
        };
        V128(Value::Inst(self.push(opcode, &[addend.0, a.0, b.0])))
    }

    /// Horizontal adjacent-pair addition over both operands.
    pub fn fp_vector_paired_add(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorPairedAdd32,
            64 => Opcode::FpVectorPairedAdd64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Half-width paired addition; upper result lanes are unspecified.
    pub fn fp_vector_paired_add_lower(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorPairedAddLower32,
            64 => Opcode::FpVectorPairedAddLower64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane reciprocal estimate.
    pub fn fp_vector_recip_estimate(&mut self, esize: usize, a: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorRecipEstimate32,
            64 => Opcode::FpVectorRecipEstimate64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_unary(opcode, a)
    }

    /// Per-lane reciprocal-square-root estimate.
    pub fn fp_vector_rsqrt_estimate(&mut self, esize: usize, a: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorRSqrtEstimate32,
            64 => Opcode::FpVectorRSqrtEstimate64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_unary(opcode, a)
    }

    /// Per-lane fused `2 − a × b`.
    pub fn fp_vector_recip_step_fused(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorRecipStepFused32,
            64 => Opcode::FpVectorRecipStepFused64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane fused `(3 − a × b) / 2`.
    pub fn fp_vector_rsqrt_step_fused(&mut self, esize: usize, a: V128, b: V128) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorRSqrtStepFused32,
            64 => Opcode::FpVectorRSqrtStepFused64,
            _ => unreachable!("invalid esize {esize}"),
        };
        self.fp_vector_binary(opcode, a, b)
    }

    /// Per-lane round-to-integral with an explicit mode; `exact` raises
    /// IXC when the value changes.
    pub fn fp_vector_round_int(
        &mut self,
        esize: usize,
        a: V128,
        rounding: charm_core::RoundingMode,
        exact: bool,
    ) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorRoundInt32,
            64 => Opcode::FpVectorRoundInt64,
            _ => unreachable!("invalid esize {esize}"),
        };
        let args = [a.0, Value::Imm8(rounding as u8), Value::Imm1(exact)];
        V128(Value::Inst(self.push(opcode, &args)))
    }

    /// Packed signed 32-bit integers to single precision.
    pub fn fp_vector_s32_to_single(&mut self, a: V128) -> V128 {
        self.fp_vector_unary(Opcode::FpVectorS32ToSingle, a)
    }

    /// Packed signed 64-bit integers to double precision.
    pub fn fp_vector_s64_to_double(&mut self, a: V128) -> V128 {
        self.fp_vector_unary(Opcode::FpVectorS64ToDouble, a)
    }

    /// Packed unsigned 32-bit integers to single precision.
    pub fn fp_vector_u32_to_single(&mut self, a: V128) -> V128 {
        self.fp_vector_unary(Opcode::FpVectorU32ToSingle, a)
    }

    /// Packed unsigned 64-bit integers to double precision.
    pub fn fp_vector_u64_to_double(&mut self, a: V128) -> V128 {
        self.fp_vector_unary(Opcode::FpVectorU64ToDouble, a)
    }

    /// Per-lane conversion to signed fixed point.
    pub fn fp_vector_to_signed_fixed(
        &mut self,
        esize: usize,
        a: V128,
        fbits: u8,
        rounding: charm_core::RoundingMode,
    ) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorToSignedFixed32,
            64 => Opcode::FpVectorToSignedFixed64,
            _ => unreachable!("invalid esize {esize}"),
        };
        let args = [a.0, Value::Imm8(fbits), Value::Imm8(rounding as u8)];
        V128(Value::Inst(self.push(opcode, &args)))
    }

    /// Per-lane conversion to unsigned fixed point.
    pub fn fp_vector_to_unsigned_fixed(
        &mut self,
        esize: usize,
        a: V128,
        fbits: u8,
        rounding: charm_core::RoundingMode,
    ) -> V128 {
        let opcode = match esize {
            32 => Opcode::FpVectorToUnsignedFixed32,
            64 => Opcode::FpVectorToUnsignedFixed64,
            _ => unreachable!("invalid esize {esize}"),
        };
        let args = [a.0, Value::Imm8(fbits), Value::Imm8(rounding as u8)];
        V128(Value::Inst(self.push(opcode, &args)))
    }

    /// Wrap an existing instruction result as a V128 handle. Intended for
    /// tests and decoders that thread vector state through the block.
    pub fn vector_value(&mut self, id: InstId) -> V128 {
        debug_assert_eq!(
            self.block.inst(id).opcode.result_type(),
            super::value::Type::V128
        );
        V128(Value::Inst(id))
    }
}
