//! Typed intermediate representation.
//!
//! The front end appends typed opcode nodes to a [`Block`] through the
//! emitter façades; the backend walks the block in order and lowers each
//! node. Values are SSA-ish: every value has exactly one defining opcode,
//! and immediates are free-standing.

pub mod a32;
pub mod block;
pub mod emitter;
pub mod opcode;
pub mod value;

pub use a32::{A32IrEmitter, Exception, LocationDescriptor};
pub use block::{Block, Inst, InstId};
pub use emitter::IrEmitter;
pub use opcode::Opcode;
pub use value::{CoprocessorInfo, ExtReg, Reg, Type, Value};
