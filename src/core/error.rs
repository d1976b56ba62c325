// This module defines the error types shared by every stage of the typthon pipeline using the
// thiserror crate. CompileError covers front-end failures (parse errors, undefined names, loop
// control outside a loop, unsupported statements and expressions, all carrying a source span),
// CFG failures (branches to unknown blocks), code generation failures (unresolvable attributes,
// dynamic method dispatch), validation failures (a list of rule violations found in emitted
// assembly), profile loading failures, and toolchain failures from the linker wrapper.
// FunctionFailure pairs an error with the function and pipeline stage it came from so the
// driver can report every failing function while continuing with the rest. CompileResult<T>
// is the usual alias.

//! Error types for the typthon compiler.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::codegen::validate::ValidationIssue;

/// Source location carried from the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Main error type for compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("{span}: parse error: {message}")]
    Parse { span: Span, message: String },

    #[error("{span}: undefined variable: {name}")]
    UndefinedVariable { name: String, span: Span },

    #[error("{span}: '{keyword}' outside loop")]
    LoopControlOutsideLoop { keyword: &'static str, span: Span },

    #[error("{span}: unsupported statement: {what}")]
    UnsupportedStatement { what: String, span: Span },

    #[error("{span}: unsupported expression: {what}")]
    UnsupportedExpression { what: String, span: Span },

    #[error("Block layout error: {reason}")]
    BlockLayout { reason: String },

    #[error("Code generation failed: {reason}")]
    CodeGeneration { reason: String },

    #[error("Assembly validation failed with {} issue(s):\n{}", .issues.len(), format_issues(.issues))]
    Validation { issues: Vec<ValidationIssue> },

    #[error("Function not found: {name}")]
    FunctionNotFound { name: String },

    #[error("Invalid profile {}: {reason}", .path.display())]
    Profile { path: PathBuf, reason: String },

    #[error("{command} failed ({status}):\n{stderr}")]
    Link {
        command: String,
        status: String,
        stderr: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("  {}", issue))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

/// Pipeline stage a per-function failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Ssa,
    Allocate,
    Codegen,
    Validate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Build => "IR build",
            Stage::Ssa => "SSA construction",
            Stage::Allocate => "register allocation",
            Stage::Codegen => "code generation",
            Stage::Validate => "validation",
        };
        f.write_str(name)
    }
}

/// A failure scoped to a single function; other functions keep compiling.
#[derive(Error, Debug)]
#[error("in function '{function}' during {stage}: {error}")]
pub struct FunctionFailure {
    pub function: String,
    pub stage: Stage,
    #[source]
    pub error: CompileError,
}

impl FunctionFailure {
    pub fn new(function: impl Into<String>, stage: Stage, error: CompileError) -> Self {
        Self {
            function: function.into(),
            stage,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_display() {
        let err = CompileError::UndefinedVariable {
            name: "x".to_string(),
            span: Span::new(3, 9),
        };
        assert_eq!(err.to_string(), "3:9: undefined variable: x");
    }

    #[test]
    fn test_function_failure_display() {
        let failure = FunctionFailure::new(
            "main",
            Stage::Build,
            CompileError::LoopControlOutsideLoop {
                keyword: "break",
                span: Span::new(2, 5),
            },
        );
        assert_eq!(
            failure.to_string(),
            "in function 'main' during IR build: 2:5: 'break' outside loop"
        );
    }
}
