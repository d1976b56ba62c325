// Dominator tree and dominance frontiers over a function's blocks, indexed by
// block position. The tree is computed with the iterative algorithm of Cooper,
// Harvey and Kennedy: blocks are visited in reverse postorder and each
// immediate dominator is refined by intersecting the dominators of already
// processed predecessors until nothing changes. Frontiers are then collected
// by walking up from each predecessor of a join point to the join's immediate
// dominator. Unreachable blocks have no dominator and appear in no frontier.

//! Dominator tree and dominance frontiers.

use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::ir::Function;

#[derive(Debug, Clone)]
pub struct DomTree {
    /// Reachable blocks in reverse postorder, entry first.
    rpo: Vec<usize>,
    rpo_index: Vec<Option<usize>>,
    /// Immediate dominator of every reachable block; the entry maps to itself.
    idom: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    preds: Vec<Vec<usize>>,
    succs: Vec<Vec<usize>>,
}

impl DomTree {
    /// Compute dominators from the terminators of `func`. Unknown branch
    /// targets are ignored; [`super::build_cfg`] reports them.
    pub fn compute(func: &Function) -> Self {
        let n = func.blocks.len();
        let index: HashMap<&str, usize> = func
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.label.as_str(), i))
            .collect();

        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        for (from, block) in func.blocks.iter().enumerate() {
            for target in block.term.successors() {
                if let Some(&to) = index.get(target) {
                    if !succs[from].contains(&to) {
                        succs[from].push(to);
                        preds[to].push(from);
                    }
                }
            }
        }

        let rpo = reverse_postorder(&succs);
        let mut rpo_index = vec![None; n];
        for (i, &b) in rpo.iter().enumerate() {
            rpo_index[b] = Some(i);
        }

        let mut idom: Vec<Option<usize>> = vec![None; n];
        if let Some(&entry) = rpo.first() {
            idom[entry] = Some(entry);
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<usize> = None;
                for &p in &preds[b] {
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => intersect(&idom, &rpo_index, p, current),
                    });
                }
                if new_idom.is_some() && idom[b] != new_idom {
                    idom[b] = new_idom;
                    changed = true;
                }
            }
        }

        let mut children = vec![Vec::new(); n];
        for &b in rpo.iter().skip(1) {
            if let Some(parent) = idom[b] {
                children[parent].push(b);
            }
        }

        Self {
            rpo,
            rpo_index,
            idom,
            children,
            preds,
            succs,
        }
    }

    /// Reachable blocks in reverse postorder.
    pub fn rpo(&self) -> &[usize] {
        &self.rpo
    }

    pub fn is_reachable(&self, block: usize) -> bool {
        self.rpo_index.get(block).copied().flatten().is_some()
    }

    /// Immediate dominator. `None` for the entry and unreachable blocks.
    pub fn idom(&self, block: usize) -> Option<usize> {
        match self.idom.get(block).copied().flatten() {
            Some(parent) if parent != block => Some(parent),
            _ => None,
        }
    }

    /// Whether `a` dominates `b`. Every reachable block dominates itself.
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cursor = b;
        loop {
            if cursor == a {
                return true;
            }
            match self.idom(cursor) {
                Some(parent) => cursor = parent,
                None => return false,
            }
        }
    }

    /// Children in the dominator tree.
    pub fn children(&self, block: usize) -> &[usize] {
        self.children.get(block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, block: usize) -> &[usize] {
        self.preds.get(block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn successors(&self, block: usize) -> &[usize] {
        self.succs.get(block).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Dominance frontier of every block, sorted by block index.
    pub fn frontiers(&self) -> Vec<Vec<usize>> {
        let mut frontiers: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.idom.len()];
        for &b in &self.rpo {
            let reachable_preds: Vec<usize> = self.preds[b]
                .iter()
                .copied()
                .filter(|&p| self.is_reachable(p))
                .collect();
            if reachable_preds.len() < 2 {
                continue;
            }
            let Some(stop) = self.idom[b] else {
                continue;
            };
            for p in reachable_preds {
                let mut runner = p;
                while runner != stop {
                    frontiers[runner].insert(b);
                    match self.idom[runner] {
                        Some(next) if next != runner => runner = next,
                        _ => break,
                    }
                }
            }
        }
        frontiers.into_iter().map(|f| f.into_iter().collect()).collect()
    }
}

fn intersect(idom: &[Option<usize>], rpo_index: &[Option<usize>], a: usize, b: usize) -> usize {
    let order = |x: usize| rpo_index[x].unwrap_or(usize::MAX);
    let mut finger1 = a;
    let mut finger2 = b;
    while finger1 != finger2 {
        while order(finger1) > order(finger2) {
            match idom[finger1] {
                Some(next) => finger1 = next,
                None => return finger2,
            }
        }
        while order(finger2) > order(finger1) {
            match idom[finger2] {
                Some(next) => finger2 = next,
                None => return finger1,
            }
        }
    }
    finger1
}

/// Iterative depth-first postorder from block 0, reversed.
fn reverse_postorder(succs: &[Vec<usize>]) -> Vec<usize> {
    if succs.is_empty() {
        return Vec::new();
    }
    let mut visited = vec![false; succs.len()];
    let mut post = Vec::with_capacity(succs.len());
    let mut stack = vec![(0usize, 0usize)];
    visited[0] = true;

    while let Some(top) = stack.last_mut() {
        let block = top.0;
        if let Some(&succ) = succs[block].get(top.1) {
            top.1 += 1;
            if !visited[succ] {
                visited[succ] = true;
                stack.push((succ, 0));
            }
        } else {
            post.push(block);
            stack.pop();
        }
    }

    post.reverse();
    post
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Terminator, Type, Value};

    fn func_from(edges: &[(&str, &[&str])]) -> Function {
        let mut func = Function::new("f", vec![], Type::Int);
        for (label, targets) in edges {
            let term = match targets {
                [] => Terminator::Return(None),
                [one] => Terminator::Branch(one.to_string()),
                [t, f] => Terminator::CondBranch {
                    cond: Value::bool(true),
                    if_true: t.to_string(),
                    if_false: f.to_string(),
                },
                _ => panic!("at most two successors"),
            };
            func.blocks.push(Block::new(*label, term));
        }
        func
    }

    #[test]
    fn test_diamond_dominators() {
        let func = func_from(&[
            ("entry", &["a", "b"]),
            ("a", &["join"]),
            ("b", &["join"]),
            ("join", &[]),
        ]);
        let dom = DomTree::compute(&func);
        assert_eq!(dom.idom(0), None);
        assert_eq!(dom.idom(1), Some(0));
        assert_eq!(dom.idom(2), Some(0));
        assert_eq!(dom.idom(3), Some(0));
        assert!(dom.dominates(0, 3));
        assert!(!dom.dominates(1, 3));

        let df = dom.frontiers();
        assert_eq!(df[1], vec![3]);
        assert_eq!(df[2], vec![3]);
        assert!(df[0].is_empty());
        assert!(df[3].is_empty());
    }

    #[test]
    fn test_loop_frontier_includes_header() {
        // entry -> header -> body -> header, header -> exit
        let func = func_from(&[
            ("entry", &["header"]),
            ("header", &["body", "exit"]),
            ("body", &["header"]),
            ("exit", &[]),
        ]);
        let dom = DomTree::compute(&func);
        assert_eq!(dom.idom(2), Some(1));
        assert_eq!(dom.idom(3), Some(1));
        let df = dom.frontiers();
        assert_eq!(df[2], vec![1]);
        assert_eq!(df[1], vec![1]);
        assert_eq!(dom.rpo()[0], 0);
    }

    #[test]
    fn test_unreachable_block_has_no_dominator() {
        let func = func_from(&[("entry", &[]), ("dead", &["entry"])]);
        let dom = DomTree::compute(&func);
        assert!(!dom.is_reachable(1));
        assert_eq!(dom.idom(1), None);
        assert!(!dom.dominates(0, 1));
        assert_eq!(dom.rpo(), &[0]);
    }

    #[test]
    fn test_irreducible_region() {
        // entry branches into both a and b, which branch to each other.
        let func = func_from(&[
            ("entry", &["a", "b"]),
            ("a", &["b", "exit"]),
            ("b", &["a", "exit"]),
            ("exit", &[]),
        ]);
        let dom = DomTree::compute(&func);
        assert_eq!(dom.idom(1), Some(0));
        assert_eq!(dom.idom(2), Some(0));
        assert_eq!(dom.idom(3), Some(0));
        let df = dom.frontiers();
        assert!(df[1].contains(&2));
        assert!(df[2].contains(&1));
    }
}
