//! x64 register definitions and calling conventions.
//!
//! # x64 ABI conventions used by the emitter
//!
//! ## System V AMD64
//! - Integer arguments: RDI, RSI, RDX, RCX, R8, R9
//! - XMM0-XMM15 all caller-saved
//! - No shadow space
//!
//! ## Windows x64
//! - Integer arguments: RCX, RDX, R8, R9 (rest on the stack)
//! - XMM0-XMM5 caller-saved, XMM6-XMM15 callee-saved
//! - 32 bytes of shadow space below the arguments

// =============================================================================
// General-Purpose Registers
// =============================================================================

/// A 64-bit general-purpose register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    /// All 16 registers in encoding order.
    pub const ALL: [Gpr; 16] = [
        Gpr::Rax,
        Gpr::Rcx,
        Gpr::Rdx,
        Gpr::Rbx,
        Gpr::Rsp,
        Gpr::Rbp,
        Gpr::Rsi,
        Gpr::Rdi,
        Gpr::R8,
        Gpr::R9,
        Gpr::R10,
        Gpr::R11,
        Gpr::R12,
        Gpr::R13,
        Gpr::R14,
        Gpr::R15,
    ];

    /// Hardware encoding (0-15).
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    /// Convert from an encoding value if valid.
    #[inline]
    pub const fn from_encoding(enc: u8) -> Option<Gpr> {
        if enc < 16 {
            Some(Self::ALL[enc as usize])
        } else {
            None
        }
    }

    /// Whether encoding this register requires a REX prefix bit.
    #[inline(always)]
    pub const fn is_extended(self) -> bool {
        self.encoding() >= 8
    }
}

impl std::fmt::Display for Gpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Gpr::Rax => "rax",
            Gpr::Rcx => "rcx",
            Gpr::Rdx => "rdx",
            Gpr::Rbx => "rbx",
            Gpr::Rsp => "rsp",
            Gpr::Rbp => "rbp",
            Gpr::Rsi => "rsi",
            Gpr::Rdi => "rdi",
            Gpr::R8 => "r8",
            Gpr::R9 => "r9",
            Gpr::R10 => "r10",
            Gpr::R11 => "r11",
            Gpr::R12 => "r12",
            Gpr::R13 => "r13",
            Gpr::R14 => "r14",
            Gpr::R15 => "r15",
        };
        f.write_str(name)
    }
}

// =============================================================================
// XMM Registers
// =============================================================================

/// A 128-bit SSE/AVX vector register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
    Xmm8 = 8,
    Xmm9 = 9,
    Xmm10 = 10,
    Xmm11 = 11,
    Xmm12 = 12,
    Xmm13 = 13,
    Xmm14 = 14,
    Xmm15 = 15,
}

impl Xmm {
    /// All 16 registers in encoding order.
    pub const ALL: [Xmm; 16] = [
        Xmm::Xmm0,
        Xmm::Xmm1,
        Xmm::Xmm2,
        Xmm::Xmm3,
        Xmm::Xmm4,
        Xmm::Xmm5,
        Xmm::Xmm6,
        Xmm::Xmm7,
        Xmm::Xmm8,
        Xmm::Xmm9,
        Xmm::Xmm10,
        Xmm::Xmm11,
        Xmm::Xmm12,
        Xmm::Xmm13,
        Xmm::Xmm14,
        Xmm::Xmm15,
    ];

    /// Hardware encoding (0-15).
    #[inline(always)]
    pub const fn encoding(self) -> u8 {
        self as u8
    }

    /// Convert from an encoding value if valid.
    #[inline]
    pub const fn from_encoding(enc: u8) -> Option<Xmm> {
        if enc < 16 {
            Some(Self::ALL[enc as usize])
        } else {
            None
        }
    }

    /// Whether encoding this register requires a REX prefix bit.
    #[inline(always)]
    pub const fn is_extended(self) -> bool {
        self.encoding() >= 8
    }
}

impl std::fmt::Display for Xmm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "xmm{}", self.encoding())
    }
}

// =============================================================================
// Register Sets
// =============================================================================

macro_rules! register_set {
    ($(#[$doc:meta])* $name:ident, $reg:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(u16);

        impl $name {
            /// Empty set.
            pub const EMPTY: $name = $name(0);
            /// All 16 registers.
            pub const ALL: $name = $name(0xFFFF);

            /// Create from a raw bitmask.
            #[inline(always)]
            pub const fn from_bits(bits: u16) -> Self {
                $name(bits)
            }

            /// The raw bitmask.
            #[inline(always)]
            pub const fn bits(self) -> u16 {
                self.0
            }

            /// A set containing a single register.
            #[inline(always)]
            pub const fn singleton(reg: $reg) -> Self {
                $name(1 << reg.encoding())
            }

            /// Membership test.
            #[inline(always)]
            pub const fn contains(self, reg: $reg) -> bool {
                self.0 & (1 << reg.encoding()) != 0
            }

            /// True when no register is present.
            #[inline(always)]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Add a register.
            #[inline(always)]
            #[must_use]
            pub const fn insert(self, reg: $reg) -> Self {
                $name(self.0 | (1 << reg.encoding()))
            }

            /// Remove a register.
            #[inline(always)]
            #[must_use]
            pub const fn remove(self, reg: $reg) -> Self {
                $name(self.0 & !(1 << reg.encoding()))
            }

            /// Union.
            #[inline(always)]
            #[must_use]
            pub const fn union(self, other: Self) -> Self {
                $name(self.0 | other.0)
            }

            /// Difference (`self - other`).
            #[inline(always)]
            #[must_use]
            pub const fn difference(self, other: Self) -> Self {
                $name(self.0 & !other.0)
            }

            /// Number of registers present.
            #[inline(always)]
            pub const fn count(self) -> u32 {
                self.0.count_ones()
            }

            /// The lowest-encoded register, if any.
            #[inline]
            pub const fn first(self) -> Option<$reg> {
                if self.0 == 0 {
                    None
                } else {
                    $reg::from_encoding(self.0.trailing_zeros() as u8)
                }
            }

            /// Iterate in ascending encoding order.
            pub fn iter(self) -> impl Iterator<Item = $reg> {
                (0..16).filter_map(move |i| {
                    if self.0 & (1 << i) != 0 {
                        $reg::from_encoding(i)
                    } else {
                        None
                    }
                })
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{{", stringify!($name))?;
                let mut first = true;
                for reg in self.iter() {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", reg)?;
                    first = false;
                }
                write!(f, "}}")
            }
        }
    };
}

register_set!(
    /// A set of general-purpose registers as a 16-bit field.
    GprSet,
    Gpr
);
register_set!(
    /// A set of XMM registers as a 16-bit field.
    XmmSet,
    Xmm
);

// =============================================================================
// Memory Operands
// =============================================================================

/// A memory operand: base register plus displacement, or a RIP-relative
/// reference into the block's constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOperand {
    /// `[base + disp]`.
    BaseDisp(Gpr, i32),
    /// `[rip + disp]` resolving to a constant-pool entry at finalize time.
    Const(crate::backend::x64::assembler::ConstId),
}

impl MemOperand {
    /// `[base]` with no displacement.
    #[inline]
    pub const fn base(base: Gpr) -> MemOperand {
        MemOperand::BaseDisp(base, 0)
    }
}

// =============================================================================
// Calling Conventions
// =============================================================================

/// Host C calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// System V AMD64 (Linux, macOS, BSD).
    SysV,
    /// Windows x64.
    Windows,
}

impl CallingConvention {
    /// The convention of the build target.
    #[inline]
    pub const fn host() -> CallingConvention {
        if cfg!(windows) {
            CallingConvention::Windows
        } else {
            CallingConvention::SysV
        }
    }

    /// Integer parameter registers, in order.
    pub const fn int_arg_regs(self) -> &'static [Gpr] {
        match self {
            CallingConvention::SysV => {
                &[Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx, Gpr::R8, Gpr::R9]
            }
            CallingConvention::Windows => &[Gpr::Rcx, Gpr::Rdx, Gpr::R8, Gpr::R9],
        }
    }

    /// Shadow space the caller must reserve below the arguments, in bytes.
    #[inline]
    pub const fn shadow_space(self) -> u32 {
        match self {
            CallingConvention::SysV => 0,
            CallingConvention::Windows => 32,
        }
    }

    /// Caller-saved general-purpose registers (excluding RSP).
    pub const fn caller_saved_gprs(self) -> GprSet {
        match self {
            // rax, rcx, rdx, rsi, rdi, r8-r11
            CallingConvention::SysV => GprSet::from_bits(0b0000_1111_1100_0111),
            // rax, rcx, rdx, r8-r11
            CallingConvention::Windows => GprSet::from_bits(0b0000_1111_0000_0111),
        }
    }

    /// Caller-saved XMM registers.
    pub const fn caller_saved_xmms(self) -> XmmSet {
        match self {
            CallingConvention::SysV => XmmSet::ALL,
            // xmm0-xmm5
            CallingConvention::Windows => XmmSet::from_bits(0x003F),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
