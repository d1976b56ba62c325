//! typthon - ahead-of-time compilation of statically typed Python.
//!
//! Source text is parsed into a typed syntax tree, lowered into a
//! three-address block IR, put into full SSA form, optimized by a
//! level-gated pass pipeline, register-allocated with call-aware linear
//! scan and emitted as validated assembly for amd64, arm64 or riscv64.
//!
//! # Primary Usage
//!
//! ```ignore
//! use typthon::core::{Arch, CompileOptions, OptLevel};
//! use typthon::driver::compile_source;
//!
//! let options = CompileOptions::new(Arch::Riscv64).with_opt_level(OptLevel::O2);
//! let outcome = compile_source(source, &options)?;
//! for failure in &outcome.failures {
//!     eprintln!("{}", failure);
//! }
//! std::fs::write("prog.s", &outcome.assembly)?;
//! ```
//!
//! # Architecture
//!
//! - [`frontend`] - Lexer, indentation-aware parser and AST
//! - [`ir`] - IR data model, builder and printer
//! - [`ssa`] - CFG edges, dominators and SSA construction
//! - [`opt`] - Optimization passes and profile loading
//! - [`regalloc`] - Liveness, call splitting and linear scan
//! - [`codegen`] - Frame layout, move resolution, backends and validators
//! - [`driver`] - Per-function pipeline on a worker pool
//! - [`link`] - Assembling and linking through the C toolchain
//! - [`core`] - Errors, options, registers and compilation sessions

pub mod codegen;
pub mod core;
pub mod driver;
pub mod frontend;
pub mod ir;
pub mod link;
pub mod opt;
pub mod regalloc;
pub mod ssa;

pub use crate::core::{
    Arch, CompilationSession, CompileError, CompileOptions, CompileResult, FunctionFailure,
    OptLevel, SessionStats,
};
pub use driver::{compile_source, CompileOutcome, CompiledFunction};
