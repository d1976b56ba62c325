// The driver runs the per-function pipeline over a whole program. Parsing and
// IR building happen once on the calling thread, as does profile loading.
// Every function is then put into SSA form, optimized, allocated, emitted and
// validated independently on a crossbeam scoped worker pool: workers pull
// function indices from a shared channel, each worker owns one arena-backed
// CompilationSession, and the class table and profile are shared read-only.
// Results are gathered by index so the module text keeps source order no
// matter which worker finished first. A failing function is recorded with its
// stage and never stops the others.

//! Whole-program compilation driver.

use bumpalo::Bump;

use crate::codegen::{emit_function, module_prelude, reg_config, validate_assembly};
use crate::core::{
    CompilationSession, CompileError, CompileOptions, CompileResult, FunctionFailure, OptLevel,
    SessionStats, Stage,
};
use crate::frontend::parse;
use crate::ir::{build_program, ClassTable, Function, Program};
use crate::opt::{load_profile, Pipeline, Profile};
use crate::regalloc::allocate;
use crate::ssa::construct_ssa;

/// One successfully compiled function.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    /// Optimized IR as printed by `--emit-ir`.
    pub ir: String,
    pub assembly: String,
}

/// Everything a compilation produced.
#[derive(Debug)]
pub struct CompileOutcome {
    /// Module text: the prelude followed by every compiled function.
    pub assembly: String,
    /// Compiled functions in source order.
    pub functions: Vec<CompiledFunction>,
    pub failures: Vec<FunctionFailure>,
    pub stats: SessionStats,
}

impl CompileOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Optimized IR of every compiled function.
    pub fn ir_text(&self) -> String {
        self.functions
            .iter()
            .map(|f| f.ir.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Parse, lower and compile `source`. Only a parse error fails the whole
/// module; everything after it is reported per function.
pub fn compile_source(source: &str, options: &CompileOptions) -> CompileResult<CompileOutcome> {
    let module = parse(source)?;
    let (program, build_failures) = build_program(&module);
    log::info!(
        "Lowered {} functions and {} classes ({} failed to build)",
        program.functions.len(),
        program.classes.iter().count(),
        build_failures.len()
    );

    let profile = match (&options.profile, options.opt_level) {
        (Some(path), OptLevel::O3) => load_profile(path),
        (Some(path), level) => {
            log::info!("Ignoring profile {} at {}", path.display(), level);
            None
        }
        (None, _) => None,
    };

    let mut outcome = compile_program(&program, options, profile.as_ref())?;
    let mut failures = build_failures;
    failures.append(&mut outcome.failures);
    outcome.failures = failures;
    Ok(outcome)
}

/// Compile every function of an already lowered `program` on the worker pool.
pub fn compile_program(
    program: &Program,
    options: &CompileOptions,
    profile: Option<&Profile>,
) -> CompileResult<CompileOutcome> {
    let functions = &program.functions;
    let classes = &program.classes;
    let workers = options.worker_count(functions.len());
    log::info!(
        "Compiling {} functions for {} at {} on {} worker(s)",
        functions.len(),
        options.arch,
        options.opt_level,
        workers
    );

    let (index_tx, index_rx) = crossbeam::channel::unbounded::<usize>();
    for index in 0..functions.len() {
        if index_tx.send(index).is_err() {
            break;
        }
    }
    drop(index_tx);
    let (result_tx, result_rx) =
        crossbeam::channel::unbounded::<(usize, Result<CompiledFunction, FunctionFailure>)>();

    let worker_stats = crossbeam::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let index_rx = index_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move |_| {
                    let arena = Bump::new();
                    let session = CompilationSession::new(&arena);
                    for index in index_rx.iter() {
                        let func = &functions[index];
                        session.set_current_function(&func.name);
                        log::trace!("Worker {} takes {}", worker, func.name);
                        let result = compile_function(func, classes, options, profile, &session);
                        if result_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                    session.stats()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    })
    .map_err(|_| CompileError::CodeGeneration {
        reason: "worker pool panicked".to_string(),
    })?;
    drop(result_tx);

    let mut stats = SessionStats::default();
    for joined in worker_stats {
        match joined {
            Ok(worker) => stats.merge(&worker),
            Err(_) => {
                return Err(CompileError::CodeGeneration {
                    reason: "compilation worker panicked".to_string(),
                })
            }
        }
    }

    let mut slots: Vec<Option<Result<CompiledFunction, FunctionFailure>>> =
        functions.iter().map(|_| None).collect();
    for (index, result) in result_rx.try_iter() {
        slots[index] = Some(result);
    }

    let mut assembly = module_prelude(options.arch, cfg!(target_os = "macos"));
    let mut compiled = Vec::new();
    let mut failures = Vec::new();
    for (func, slot) in functions.iter().zip(slots) {
        match slot {
            Some(Ok(function)) => {
                assembly.push('\n');
                assembly.push_str(&function.assembly);
                compiled.push(function);
            }
            Some(Err(failure)) => failures.push(failure),
            None => failures.push(FunctionFailure::new(
                func.name.clone(),
                Stage::Codegen,
                CompileError::CodeGeneration {
                    reason: "no result from the worker pool".to_string(),
                },
            )),
        }
    }

    log::info!(
        "Compiled {} of {} functions",
        compiled.len(),
        functions.len()
    );
    Ok(CompileOutcome {
        assembly,
        functions: compiled,
        failures,
        stats,
    })
}

/// SSA, optimization, allocation, emission and validation for one function.
pub fn compile_function(
    func: &Function,
    classes: &ClassTable,
    options: &CompileOptions,
    profile: Option<&Profile>,
    session: &CompilationSession<'_>,
) -> Result<CompiledFunction, FunctionFailure> {
    let fail = |stage: Stage, error: CompileError| FunctionFailure::new(func.name.clone(), stage, error);

    let mut func = func.clone();
    construct_ssa(&mut func).map_err(|e| fail(Stage::Ssa, e))?;

    Pipeline::for_level(options.opt_level, classes, profile).run(&mut func);

    let alloc = allocate(&func, &reg_config(options.arch));
    session.record_allocation(alloc.register_count(), alloc.spilled_count());

    let assembly = emit_function(
        options.arch,
        &func,
        &alloc,
        classes,
        session,
        &options.symbol_prefix,
    )
    .map_err(|e| fail(Stage::Codegen, e))?;

    validate_assembly(options.arch, &assembly).map_err(|e| fail(Stage::Validate, e))?;

    Ok(CompiledFunction {
        name: func.name.clone(),
        ir: func.to_string(),
        assembly,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::init_logging;
    use crate::core::Arch;

    const PROGRAM: &str = "def add(a: int, b: int) -> int:\n    return a + b\n\ndef twice(x: int) -> int:\n    return add(x, x)\n\ndef main() -> int:\n    return twice(21)\n";

    fn options(arch: Arch, jobs: usize) -> CompileOptions {
        CompileOptions::new(arch)
            .with_jobs(jobs)
            .with_symbol_prefix("")
    }

    #[test]
    fn test_functions_keep_source_order() {
        init_logging();
        for jobs in [1, 4] {
            let outcome = compile_source(PROGRAM, &options(Arch::Amd64, jobs)).expect("compiles");
            assert!(outcome.is_success(), "{:?}", outcome.failures);
            let names: Vec<_> = outcome.functions.iter().map(|f| f.name.as_str()).collect();
            assert_eq!(names, ["add", "twice", "main"]);
            let add = outcome.assembly.find(".globl add").expect("add");
            let twice = outcome.assembly.find(".globl twice").expect("twice");
            let main = outcome.assembly.find(".globl main").expect("main");
            assert!(add < twice && twice < main);
            let prelude = module_prelude(Arch::Amd64, cfg!(target_os = "macos"));
            assert!(outcome.assembly.starts_with(&prelude));
        }
    }

    #[test]
    fn test_every_target_compiles_and_validates() {
        init_logging();
        for arch in [Arch::Amd64, Arch::Arm64, Arch::Riscv64] {
            let outcome = compile_source(PROGRAM, &options(arch, 2)).expect("compiles");
            assert!(outcome.is_success(), "{}: {:?}", arch, outcome.failures);
            assert!(validate_assembly(arch, &outcome.assembly).is_ok());
        }
    }

    #[test]
    fn test_stats_are_merged_across_workers() {
        init_logging();
        let outcome = compile_source(PROGRAM, &options(Arch::Arm64, 3)).expect("compiles");
        assert_eq!(outcome.stats.functions_compiled, 3);
        assert!(outcome.stats.total_calls >= 2);
        assert!(outcome.stats.total_asm_lines > 0);
    }

    #[test]
    fn test_failures_do_not_stop_other_functions() {
        init_logging();
        let source = "def good() -> int:\n    return 1\n\ndef bad() -> int:\n    break\n\ndef also_good() -> int:\n    return good()\n";
        let outcome = compile_source(source, &options(Arch::Amd64, 2)).expect("parses");
        assert!(!outcome.is_success());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].function, "bad");
        assert_eq!(outcome.failures[0].stage, Stage::Build);
        let names: Vec<_> = outcome.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["good", "also_good"]);
    }

    #[test]
    fn test_parse_errors_fail_the_module() {
        let err = compile_source("def f(:\n", &options(Arch::Amd64, 1)).unwrap_err();
        assert!(matches!(err, CompileError::Parse { .. }));
    }

    #[test]
    fn test_ir_text_reflects_optimization() {
        init_logging();
        let source = "def k() -> int:\n    return 2 * 3 + 4\n";
        let opts = options(Arch::Amd64, 1).with_opt_level(OptLevel::O2);
        let outcome = compile_source(source, &opts).expect("compiles");
        assert!(outcome.ir_text().contains("ret 10"), "{}", outcome.ir_text());
    }

    #[test]
    fn test_unreadable_profile_is_skipped() {
        init_logging();
        let opts = options(Arch::Amd64, 1)
            .with_opt_level(OptLevel::O3)
            .with_profile(Some("/nonexistent/typthon-profile.json".into()));
        let outcome = compile_source(PROGRAM, &opts).expect("compiles");
        assert!(outcome.is_success());
    }
}
