//! IR values, types, and guest-register names.

use super::block::InstId;

// =============================================================================
// Types
// =============================================================================

/// The type of an IR value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value (side-effect-only opcodes).
    Void,
    /// One bit.
    U1,
    /// Eight bits.
    U8,
    /// Sixteen bits.
    U16,
    /// Thirty-two bits.
    U32,
    /// Sixty-four bits.
    U64,
    /// Either 32 or 64 bits, resolved by the consumer.
    U32U64,
    /// A 128-bit packed vector.
    V128,
    /// Packed N/Z/C/V host flags.
    Nzcv,
    /// An A32 core register name.
    Reg,
    /// An A32 extension register name.
    ExtReg,
    /// A structured coprocessor immediate.
    CoprocInfo,
}

impl Type {
    /// Whether a value of type `self` is acceptable where `expected` is
    /// required. `U32U64` unifies with either concrete width.
    pub fn matches(self, expected: Type) -> bool {
        if self == expected {
            return true;
        }
        matches!(
            (self, expected),
            (Type::U32 | Type::U64 | Type::U32U64, Type::U32U64)
                | (Type::U32U64, Type::U32 | Type::U64)
        )
    }
}

// =============================================================================
// Guest register names
// =============================================================================

/// An A32 core register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Reg {
    R0 = 0,
    R1 = 1,
    R2 = 2,
    R3 = 3,
    R4 = 4,
    R5 = 5,
    R6 = 6,
    R7 = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    /// Stack pointer.
    Sp = 13,
    /// Link register.
    Lr = 14,
    /// Program counter.
    Pc = 15,
}

/// An A32 extension register: 32 singles overlaying the doubles, which in
/// turn overlay the 16 quadword registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtReg {
    /// A single-precision register S0-S31.
    S(u8),
    /// A double-precision register D0-D31.
    D(u8),
    /// A quadword register Q0-Q15.
    Q(u8),
}

impl ExtReg {
    /// True for S registers.
    #[inline]
    pub fn is_single(self) -> bool {
        matches!(self, ExtReg::S(_))
    }

    /// True for D registers.
    #[inline]
    pub fn is_double(self) -> bool {
        matches!(self, ExtReg::D(_))
    }

    /// True for Q registers.
    #[inline]
    pub fn is_quad(self) -> bool {
        matches!(self, ExtReg::Q(_))
    }
}

/// A structured coprocessor-operation immediate, packed into six bytes.
/// Fields beyond an operation's shape are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CoprocessorInfo(pub [u8; 6]);

// =============================================================================
// Values
// =============================================================================

/// An IR value: an instruction result or an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// The result of an instruction.
    Inst(InstId),
    /// A one-bit immediate.
    Imm1(bool),
    /// An 8-bit immediate.
    Imm8(u8),
    /// A 32-bit immediate.
    Imm32(u32),
    /// A 64-bit immediate.
    Imm64(u64),
    /// A core-register name immediate.
    Reg(Reg),
    /// An extension-register name immediate.
    ExtReg(ExtReg),
    /// A coprocessor-operation immediate.
    Coproc(CoprocessorInfo),
}

impl Value {
    /// The type of an immediate, or `None` for instruction results (whose
    /// type lives on the defining opcode).
    pub fn immediate_type(self) -> Option<Type> {
        match self {
            Value::Inst(_) => None,
            Value::Imm1(_) => Some(Type::U1),
            Value::Imm8(_) => Some(Type::U8),
            Value::Imm32(_) => Some(Type::U32),
            Value::Imm64(_) => Some(Type::U64),
            Value::Reg(_) => Some(Type::Reg),
            Value::ExtReg(_) => Some(Type::ExtReg),
            Value::Coproc(_) => Some(Type::CoprocInfo),
        }
    }

    /// The 8-bit immediate payload; panics for anything else.
    pub fn as_imm8(self) -> u8 {
        match self {
            Value::Imm8(v) => v,
            _ => panic!("value is not an 8-bit immediate"),
        }
    }

    /// The 1-bit immediate payload; panics for anything else.
    pub fn as_imm1(self) -> bool {
        match self {
            Value::Imm1(v) => v,
            _ => panic!("value is not a 1-bit immediate"),
        }
    }

    /// The defining instruction, if this is an instruction result.
    pub fn inst(self) -> Option<InstId> {
        match self {
            Value::Inst(id) => Some(id),
            _ => None,
        }
    }
}

// =============================================================================
// Typed value handles
// =============================================================================

macro_rules! typed_value {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name(pub(crate) Value);

        impl $name {
            /// The underlying value.
            #[inline]
            pub fn value(self) -> Value {
                self.0
            }
        }

        impl From<$name> for Value {
            fn from(v: $name) -> Value {
                v.0
            }
        }
    };
}

typed_value!(
    /// A `U1`-typed value handle.
    U1
);
typed_value!(
    /// A `U8`-typed value handle.
    U8
);
typed_value!(
    /// A `U16`-typed value handle.
    U16
);
typed_value!(
    /// A `U32`-typed value handle.
    U32
);
typed_value!(
    /// A `U64`-typed value handle.
    U64
);
typed_value!(
    /// A handle that is either 32 or 64 bits wide.
    U32U64
);
typed_value!(
    /// A `V128`-typed value handle.
    V128
);
typed_value!(
    /// A packed-flags value handle.
    Nzcv
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_matching() {
        assert!(Type::U32.matches(Type::U32));
        assert!(Type::U32.matches(Type::U32U64));
        assert!(Type::U64.matches(Type::U32U64));
        assert!(Type::U32U64.matches(Type::U64));
        assert!(!Type::U32.matches(Type::U64));
        assert!(!Type::V128.matches(Type::U32U64));
    }

    #[test]
    fn test_immediate_types() {
        assert_eq!(Value::Imm8(3).immediate_type(), Some(Type::U8));
        assert_eq!(Value::Reg(Reg::Pc).immediate_type(), Some(Type::Reg));
        assert_eq!(Value::Inst(InstId::new(0)).immediate_type(), None);
    }

    #[test]
    fn test_ext_reg_classes() {
        assert!(ExtReg::S(31).is_single());
        assert!(ExtReg::D(16).is_double());
        assert!(!ExtReg::D(0).is_single());
    }
}
