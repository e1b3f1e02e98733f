//! x64 backend modules.
//!
//! - `registers`: GPR/XMM definitions and calling conventions
//! - `encoder`: REX/VEX/EVEX prefixes and condition codes
//! - `assembler`: two-region code emission with labels and a constant pool
//! - `cpuid`: host feature detection
//! - `memory`: executable code pages
//! - `abi`: host-call plumbing for software fallbacks
//! - `emit`: guest state layout and the block walker
//! - `vector_fp`: the vector floating-point opcode emitter

pub mod abi;
pub mod assembler;
pub mod cpuid;
pub mod emit;
pub mod encoder;
#[cfg(unix)]
pub mod memory;
pub mod registers;
pub mod vector_fp;

// Re-export commonly used types.
pub use assembler::{Assembler, ConstId, ConstantPool, FpCompare, Label, Region, XmmRm};
pub use cpuid::{HostFeatureFlags, HostFeatures};
pub use emit::{emit_block, EmitConfig, EmitContext, GuestStateLayout, JitState};
pub use encoder::{Condition, Evex, OpcodeMap, Rex, SimdPrefix, Vex};
#[cfg(unix)]
pub use memory::{ExecutableBuffer, MemoryError};
pub use registers::{CallingConvention, Gpr, GprSet, MemOperand, Xmm, XmmSet};
