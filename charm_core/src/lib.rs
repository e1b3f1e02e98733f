//! # Charm Core
//!
//! Guest-independent primitives for the charm binary translator.
//!
//! This crate provides the foundational building blocks shared across all
//! charm components:
//!
//! - **Soft-float reference**: bit-exact scalar implementations of the ARM
//!   VFP/NEON floating-point operations, parameterized by FPCR and
//!   accumulating into FPSR. The JIT backend's software fallbacks call
//!   these; the test suites use them as the source of truth.
//! - **FP control/status models**: `Fpcr`, `Fpsr`, `RoundingMode`.
//!
//! Everything here is pure integer arithmetic on IEEE 754 bit patterns; the
//! host FPU is never consulted, so results are identical on every build
//! target and under every host rounding configuration.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod fp;

pub use fp::fpcr::Fpcr;
pub use fp::fpsr::Fpsr;
pub use fp::rounding::RoundingMode;

/// Charm runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
