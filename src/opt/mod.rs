// The optimizer is a level-gated sequence of independent, best-effort passes
// over one SSA function at a time. Every pass implements the Pass trait and
// reports whether it changed the IR; passes that add, remove or retarget
// edges also declare it so the pipeline rebuilds the predecessor/successor
// lists before the next pass runs. Level 1 cleans up (constant folding,
// peephole identities, dead code), level 2 adds common subexpression
// elimination and inline-candidate marking, and level 3 adds the analyses
// and transforms that lean on class and profile information: escape
// analysis, devirtualization, loop unrolling and vectorization marks, and
// profile-guided layout. A pass that does not recognize a shape leaves it
// alone; nothing here can fail a function.

//! Optimization passes and the level-gated pipeline.

pub mod cse;
pub mod dce;
pub mod devirt;
pub mod escape;
pub mod fold;
pub mod inline;
pub mod loops;
pub mod peephole;
pub mod pgo;

use crate::core::OptLevel;
use crate::ir::{ClassTable, Function};
use crate::ssa::build_cfg;

pub use cse::CommonSubexpressions;
pub use dce::DeadCode;
pub use devirt::Devirtualize;
pub use escape::EscapeAnalysis;
pub use fold::ConstantFold;
pub use inline::InlineCandidates;
pub use loops::LoopTransform;
pub use peephole::Peephole;
pub use pgo::{load_profile, read_profile, FunctionProfile, Hotspot, Profile, ProfileGuided};

/// A function-local optimization pass.
pub trait Pass: Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Run over `func`; returns whether the IR changed.
    fn run(&self, func: &mut Function) -> bool;

    /// Whether a change can alter CFG edges or remove blocks.
    fn changes_cfg(&self) -> bool {
        false
    }
}

/// Ordered list of passes for one optimization level.
pub struct Pipeline<'a> {
    passes: Vec<Box<dyn Pass + 'a>>,
}

impl<'a> Pipeline<'a> {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn with_pass(mut self, pass: impl Pass + 'a) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// The standard pipeline for `level`. Class information feeds
    /// devirtualization; the profile, when loaded, feeds PGO.
    pub fn for_level(level: OptLevel, classes: &'a ClassTable, profile: Option<&'a Profile>) -> Self {
        let mut pipeline = Pipeline::new();
        if level == OptLevel::O0 {
            return pipeline;
        }

        pipeline = pipeline.with_pass(ConstantFold).with_pass(Peephole);
        if level >= OptLevel::O3 {
            pipeline = pipeline.with_pass(Devirtualize::new(classes));
        }
        if level >= OptLevel::O2 {
            pipeline = pipeline.with_pass(CommonSubexpressions);
        }
        pipeline = pipeline.with_pass(DeadCode);

        if level >= OptLevel::O3 {
            pipeline = pipeline
                .with_pass(LoopTransform)
                .with_pass(ConstantFold)
                .with_pass(DeadCode)
                .with_pass(EscapeAnalysis);
        }
        if level >= OptLevel::O2 {
            pipeline = pipeline.with_pass(InlineCandidates);
        }
        if level >= OptLevel::O3 {
            if let Some(profile) = profile {
                pipeline = pipeline.with_pass(ProfileGuided::new(profile));
            }
        }
        pipeline
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass over `func` in order.
    pub fn run(&self, func: &mut Function) {
        for pass in &self.passes {
            let changed = pass.run(func);
            log::trace!("{}: pass {} changed={}", func.name, pass.name(), changed);
            if changed && pass.changes_cfg() {
                if let Err(err) = build_cfg(func) {
                    log::warn!("{}: CFG rebuild after {} failed: {}", func.name, pass.name(), err);
                }
            }
        }
        log::debug!(
            "Optimized {}: {} blocks, {} instructions",
            func.name,
            func.blocks.len(),
            func.instruction_count()
        );
    }
}

impl Default for Pipeline<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::ssa_function;
    use crate::ir::{Inst, Terminator, Value};

    #[test]
    fn test_level_gating() {
        let classes = ClassTable::new();
        assert!(Pipeline::for_level(OptLevel::O0, &classes, None).pass_names().is_empty());
        assert_eq!(
            Pipeline::for_level(OptLevel::O1, &classes, None).pass_names(),
            vec!["fold", "peephole", "dce"]
        );
        let o2 = Pipeline::for_level(OptLevel::O2, &classes, None).pass_names();
        assert!(o2.contains(&"cse") && o2.contains(&"inline"));
        assert!(!o2.contains(&"escape"));
        let o3 = Pipeline::for_level(OptLevel::O3, &classes, None).pass_names();
        for name in ["devirt", "loops", "escape"] {
            assert!(o3.contains(&name), "missing {}", name);
        }
        assert!(!o3.contains(&"pgo"));
    }

    #[test]
    fn test_o1_folds_constant_function() {
        let mut func = ssa_function(
            "def f() -> int:\n    x = 2 + 3\n    y = x * 4\n    return y - 0\n",
            "f",
        );
        let classes = ClassTable::new();
        Pipeline::for_level(OptLevel::O1, &classes, None).run(&mut func);
        assert_eq!(func.blocks.len(), 1);
        assert!(func.blocks[0].insts.is_empty(), "{}", func);
        assert_eq!(func.blocks[0].term, Terminator::Return(Some(Value::int(20))));
    }

    #[test]
    fn test_o1_prunes_constant_branch() {
        let mut func = ssa_function(
            "def f(a: int) -> int:\n    if 1 > 2:\n        return a\n    return a + 1\n",
            "f",
        );
        let classes = ClassTable::new();
        Pipeline::for_level(OptLevel::O1, &classes, None).run(&mut func);
        assert!(func.block("if_then_0").is_none());
        assert!(func
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .all(|i| matches!(i, Inst::BinOp { .. })));
    }
}
