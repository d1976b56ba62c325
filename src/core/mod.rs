// This module collects the infrastructure shared by every stage of the typthon pipeline and
// every target architecture: the error types (CompileError, FunctionFailure, source spans),
// the arena-backed CompilationSession with its statistics, the physical register identifiers
// and bit sets used by the allocator and the code generators, and the compilation options
// (target architecture, optimization level, profile path, worker count) handed from the
// command line to the driver.

//! Core typthon infrastructure.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based memory allocation using `bumpalo`
//! - Compilation statistics, mergeable across workers
//!
//! ## Registers (`register_file`)
//! - Bank/index register identifiers
//! - Bit sets for register classes
//!
//! ## Errors (`error`)
//! - `CompileError` and per-function `FunctionFailure`
//!
//! ## Options (`config`)
//! - Target architecture, optimization level and driver options

pub mod config;
pub mod error;
pub mod register_file;
pub mod session;
pub mod test_utils;

pub use config::{Arch, CompileOptions, OptLevel};
pub use error::{CompileError, CompileResult, FunctionFailure, Span, Stage};
pub use register_file::{AsmReg, RegBitSet, GP_BANK};
pub use session::{CompilationSession, SessionStats};
