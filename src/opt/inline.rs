//! Inline-candidate detection. Functions are only marked, never inlined.

use crate::ir::Function;

use super::Pass;

/// Functions below this many instructions in a single block are candidates.
pub const INLINE_INSTRUCTION_LIMIT: usize = 10;

#[derive(Debug, Default, Clone, Copy)]
pub struct InlineCandidates;

impl Pass for InlineCandidates {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run(&self, func: &mut Function) -> bool {
        func.hints.inline_candidate =
            func.blocks.len() == 1 && func.instruction_count() < INLINE_INSTRUCTION_LIMIT;
        if func.hints.inline_candidate {
            log::debug!("{} is an inline candidate", func.name);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::ssa_function;

    #[test]
    fn test_small_single_block_is_marked() {
        let mut func = ssa_function("def add(a: int, b: int) -> int:\n    return a + b\n", "add");
        assert!(!InlineCandidates.run(&mut func));
        assert!(func.hints.inline_candidate);
    }

    #[test]
    fn test_branching_function_is_not_marked() {
        let mut func = ssa_function(
            "def f(a: int) -> int:\n    if a > 0:\n        return 1\n    return 2\n",
            "f",
        );
        InlineCandidates.run(&mut func);
        assert!(!func.hints.inline_candidate);
    }
}
