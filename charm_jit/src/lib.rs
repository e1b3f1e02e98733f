//! x86-64 backend for the charm binary translator.
//!
//! Recompiles 32-bit ARM guest code into host x86-64 machine code:
//! - Typed IR with an A32 front-end façade
//! - Two-region (hot/cold) append-only assembler with a constant pool
//! - Per-block register allocation
//! - Vector floating-point emission that reproduces the guest FPU
//!   bit-exactly under DN/FZ/RMode, with software fallbacks into the
//!   `charm_core` reference library
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod ir;
pub mod regalloc;
