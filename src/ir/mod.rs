//! Three-address, block-structured intermediate representation.
//!
//! A [`Program`] holds one [`Function`] per source function or method plus
//! the read-only [`ClassTable`]. Functions are mutated in place by SSA
//! construction and the optimizer, then handed read-only to register
//! allocation and code generation.

pub mod builder;
pub mod display;
pub mod inst;
pub mod program;
pub mod types;

pub use builder::{build_program, CONSTRUCTOR};
pub use inst::{Inst, Phi, Terminator};
pub use program::{
    method_symbol, Block, ClassInfo, ClassTable, Function, FunctionHints, Param, Program,
    OBJECT_HEADER_SIZE, WORD_SIZE,
};
pub use types::{BinaryOp, Type, Value, ValueKey};
