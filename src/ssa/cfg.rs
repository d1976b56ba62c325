//! Control-flow edges derived from block terminators.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::core::{CompileError, CompileResult};
use crate::ir::Function;

/// Rebuild `preds`/`succs` on every block from the terminators.
///
/// Fails when a terminator names a label that does not exist or when two
/// blocks share a label.
pub fn build_cfg(func: &mut Function) -> CompileResult<()> {
    let edges = {
        let index = label_index(func)?;
        let mut edges = Vec::new();
        for (from, block) in func.blocks.iter().enumerate() {
            for target in block.term.successors() {
                let Some(&to) = index.get(target) else {
                    return Err(CompileError::BlockLayout {
                        reason: format!(
                            "block '{}' in {} branches to unknown label '{}'",
                            block.label, func.name, target
                        ),
                    });
                };
                edges.push((from, to));
            }
        }
        edges
    };

    for block in &mut func.blocks {
        block.preds.clear();
        block.succs.clear();
    }

    for (from, to) in edges {
        let from_label = func.blocks[from].label.clone();
        let to_label = func.blocks[to].label.clone();
        if !func.blocks[from].succs.contains(&to_label) {
            func.blocks[from].succs.push(to_label);
        }
        if !func.blocks[to].preds.contains(&from_label) {
            func.blocks[to].preds.push(from_label);
        }
    }

    log::trace!("Built CFG for {} ({} blocks)", func.name, func.blocks.len());
    Ok(())
}

/// Map from label to block index. Duplicate labels are an error.
pub fn label_index(func: &Function) -> CompileResult<HashMap<&str, usize>> {
    let mut index = HashMap::with_capacity(func.blocks.len());
    for (i, block) in func.blocks.iter().enumerate() {
        if index.insert(block.label.as_str(), i).is_some() {
            return Err(CompileError::BlockLayout {
                reason: format!("duplicate block label '{}' in {}", block.label, func.name),
            });
        }
    }
    Ok(index)
}

/// Blocks reachable from the entry, by breadth-first search over terminator
/// targets. Unknown targets are ignored.
pub fn reachable_blocks(func: &Function) -> Vec<bool> {
    let mut reachable = vec![false; func.blocks.len()];
    if func.blocks.is_empty() {
        return reachable;
    }
    let index: HashMap<&str, usize> = func
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.label.as_str(), i))
        .collect();

    let mut queue = VecDeque::from([0usize]);
    reachable[0] = true;
    while let Some(b) = queue.pop_front() {
        for target in func.blocks[b].term.successors() {
            if let Some(&s) = index.get(target) {
                if !reachable[s] {
                    reachable[s] = true;
                    queue.push_back(s);
                }
            }
        }
    }
    reachable
}

/// Drop blocks not reachable from the entry, together with phi incomings that
/// name them. Returns the number of blocks removed.
pub fn remove_unreachable_blocks(func: &mut Function) -> usize {
    let reachable = reachable_blocks(func);
    let dead: Vec<String> = func
        .blocks
        .iter()
        .zip(&reachable)
        .filter(|(_, live)| !**live)
        .map(|(b, _)| b.label.clone())
        .collect();
    if dead.is_empty() {
        return 0;
    }

    let mut keep = reachable.into_iter();
    func.blocks.retain(|_| keep.next().unwrap_or(false));
    for block in &mut func.blocks {
        for phi in &mut block.phis {
            for label in &dead {
                phi.remove_incoming(label);
            }
        }
    }
    log::trace!("{}: removed unreachable blocks {:?}", func.name, dead);
    dead.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Block, Phi, Terminator, Type, Value};

    fn diamond() -> Function {
        let mut func = Function::new("f", vec![], Type::Int);
        let c = func.new_temp(Type::Bool);
        func.blocks.push(Block::new(
            "entry",
            Terminator::CondBranch {
                cond: c,
                if_true: "a".to_string(),
                if_false: "b".to_string(),
            },
        ));
        func.blocks.push(Block::new("a", Terminator::Branch("join".to_string())));
        func.blocks.push(Block::new("b", Terminator::Branch("join".to_string())));
        func.blocks.push(Block::new("join", Terminator::Return(None)));
        func
    }

    #[test]
    fn test_diamond_edges() {
        let mut func = diamond();
        build_cfg(&mut func).expect("cfg");
        assert_eq!(func.blocks[0].succs, vec!["a", "b"]);
        assert_eq!(func.blocks[3].preds, vec!["a", "b"]);
        assert!(func.blocks[0].preds.is_empty());
    }

    #[test]
    fn test_unknown_label_is_error() {
        let mut func = diamond();
        func.blocks[1].term = Terminator::Branch("nowhere".to_string());
        let err = build_cfg(&mut func).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_duplicate_label_is_error() {
        let mut func = diamond();
        func.blocks[2].label = "a".to_string();
        assert!(build_cfg(&mut func).is_err());
    }

    #[test]
    fn test_remove_unreachable_drops_incomings() {
        let mut func = diamond();
        func.blocks[0].term = Terminator::Branch("a".to_string());
        let t = func.new_temp(Type::Int);
        let mut phi = Phi::new(t);
        phi.incoming.push(("a".to_string(), Value::int(1)));
        phi.incoming.push(("b".to_string(), Value::int(2)));
        func.blocks[3].phis.push(phi);

        assert_eq!(remove_unreachable_blocks(&mut func), 1);
        let labels: Vec<_> = func.blocks.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["entry", "a", "join"]);
        assert_eq!(func.blocks[2].phis[0].incoming.len(), 1);
    }
}
