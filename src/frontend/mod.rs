// Source front end. Tokenizes indentation-structured source and parses it
// into the typed syntax tree consumed by the IR builder. Only the statically
// typed subset the backend can lower is accepted; anything else is reported
// with a line and column.

//! Front end: lexer, parser and syntax tree.

pub mod ast;
pub mod lexer;
pub mod parser;

use crate::core::CompileResult;

/// Parse a whole source file.
pub fn parse(source: &str) -> CompileResult<ast::Module> {
    parser::parse_module(source)
}
