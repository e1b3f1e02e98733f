//! Host code generation backends.
//!
//! Only x86-64 is implemented; the module layout leaves room for others.

pub mod x64;
