//! Test utilities shared by the unit tests.
//!
//! Tests usually start from source text; these helpers run the front end and
//! the builder and hand back IR, optionally already in SSA form. A
//! [`TestContext`] owns the arena a [`CompilationSession`] borrows.

#[cfg(test)]
pub mod test {
    use super::super::config::{Arch, OptLevel};
    use super::super::session::CompilationSession;
    use crate::codegen::{emit_function, reg_config};
    use crate::frontend::parse;
    use crate::ir::{build_program, Function, Program};
    use crate::opt::Pipeline;
    use crate::regalloc::allocate;
    use crate::ssa::construct_ssa;
    use bumpalo::Bump;

    /// Initialize logging once per test binary.
    pub fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Test context that owns the arena for one compilation session.
    pub struct TestContext {
        arena: Bump,
    }

    impl TestContext {
        pub fn new() -> Self {
            Self { arena: Bump::new() }
        }

        /// Create a compilation session using this context's arena.
        ///
        /// The returned session borrows from the TestContext, so the
        /// TestContext must outlive the session.
        pub fn create_session(&self) -> CompilationSession<'_> {
            CompilationSession::new(&self.arena)
        }
    }

    /// Parse and lower `source`, asserting every function builds.
    pub fn lower(source: &str) -> Program {
        init_logging();
        let module = parse(source).expect("source should parse");
        let (program, failures) = build_program(&module);
        assert!(failures.is_empty(), "build failures: {:?}", failures);
        program
    }

    /// Lower `source` and put every function into SSA form.
    pub fn lower_ssa(source: &str) -> Program {
        let mut program = lower(source);
        for func in &mut program.functions {
            construct_ssa(func).expect("SSA construction");
        }
        program
    }

    /// The named function of [`lower_ssa`].
    pub fn ssa_function(source: &str, name: &str) -> Function {
        lower_ssa(source)
            .functions
            .into_iter()
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("no function named {}", name))
    }

    /// Optimize the named function at `level`, allocate it for `arch` and
    /// return its assembly.
    pub fn assemble(source: &str, name: &str, arch: Arch, level: OptLevel) -> String {
        let program = lower_ssa(source);
        let mut func = program
            .functions
            .iter()
            .find(|f| f.name == name)
            .cloned()
            .unwrap_or_else(|| panic!("no function named {}", name));
        Pipeline::for_level(level, &program.classes, None).run(&mut func);
        let alloc = allocate(&func, &reg_config(arch));
        let ctx = TestContext::new();
        let session = ctx.create_session();
        emit_function(arch, &func, &alloc, &program.classes, &session, "")
            .unwrap_or_else(|e| panic!("emitting {}: {}", name, e))
    }
}
