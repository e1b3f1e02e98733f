//! NaN propagation helpers that do not consult FPCR or FPSR.
//!
//! These implement the bare ARM propagation rule (first signalling NaN,
//! quieted, else first quiet NaN) for contexts where exception accumulation
//! and default-NaN substitution are handled elsewhere — notably the JIT's
//! NaN-correction handlers, which only run when default-NaN mode is off.

use super::info::FloatLane;

/// Quiet a single operand if it is a NaN.
#[inline]
pub fn propagate_nan<F: FloatLane>(a: F) -> Option<F> {
    if a.is_nan() {
        Some(a.quieted())
    } else {
        None
    }
}

/// ARM NaN propagation over two operands: the first signalling NaN
/// (quieted), else the first quiet NaN.
#[inline]
pub fn propagate_nans<F: FloatLane>(a: F, b: F) -> Option<F> {
    if a.is_signalling_nan() {
        Some(a.quieted())
    } else if b.is_signalling_nan() {
        Some(b.quieted())
    } else if a.is_nan() {
        Some(a)
    } else if b.is_nan() {
        Some(b)
    } else {
        None
    }
}

/// ARM NaN propagation over three operands.
#[inline]
pub fn propagate_nans3<F: FloatLane>(a: F, b: F, c: F) -> Option<F> {
    if a.is_signalling_nan() {
        Some(a.quieted())
    } else if b.is_signalling_nan() {
        Some(b.quieted())
    } else if c.is_signalling_nan() {
        Some(c.quieted())
    } else if a.is_nan() {
        Some(a)
    } else if b.is_nan() {
        Some(b)
    } else if c.is_nan() {
        Some(c)
    } else {
        None
    }
}
