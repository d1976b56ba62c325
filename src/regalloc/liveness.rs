// Program points and live ranges for one function in layout order. Every
// block numbers its phis, then its instructions, then its terminator, with
// positions advancing by two from 2; parameters are defined at position 0.
// Block live-in and live-out sets come from the usual backward dataflow, where
// a phi incoming value counts as a use at the end of the predecessor it flows
// from. A value's live range is the hull of its definition, its uses and the
// boundaries of every block it is live across, so values carried around a
// loop stay live over the whole loop. Phi destinations additionally cover the
// terminator of every predecessor, because the edge moves that write them are
// emitted there. Live-in values start one position before their block so a
// call opening the block still splits them. Closure captures are read one
// position after the closure's allocation call, which makes them cross it.

//! Instruction numbering, block liveness and live ranges.

use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};

use crate::ir::{Function, Inst, Value, ValueKey};

/// Position of every phi, instruction and terminator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Numbering {
    pub phis: Vec<Vec<u32>>,
    pub insts: Vec<Vec<u32>>,
    pub terms: Vec<u32>,
    /// Positions of instructions that lower to machine calls, ascending.
    pub call_sites: Vec<u32>,
}

impl Numbering {
    pub const STEP: u32 = 2;
    pub const FIRST: u32 = 2;

    pub fn compute(func: &Function) -> Self {
        let mut numbering = Numbering::default();
        let mut next = Self::FIRST;
        let mut take = || {
            let pos = next;
            next += Self::STEP;
            pos
        };

        for block in &func.blocks {
            numbering
                .phis
                .push(block.phis.iter().map(|_| take()).collect());
            let mut insts = Vec::with_capacity(block.insts.len());
            for inst in &block.insts {
                let pos = take();
                if inst.is_call_site() {
                    numbering.call_sites.push(pos);
                }
                insts.push(pos);
            }
            numbering.insts.push(insts);
            numbering.terms.push(take());
        }
        numbering
    }

    /// First position of block `b`.
    pub fn block_start(&self, b: usize) -> u32 {
        self.phis[b]
            .first()
            .or_else(|| self.insts[b].first())
            .copied()
            .unwrap_or(self.terms[b])
    }

    pub fn block_end(&self, b: usize) -> u32 {
        self.terms[b]
    }
}

/// Live-in and live-out sets per block.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    pub live_in: Vec<HashSet<ValueKey>>,
    pub live_out: Vec<HashSet<ValueKey>>,
}

fn successor_indices(func: &Function) -> Vec<Vec<usize>> {
    let index: HashMap<&str, usize> = func
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.label.as_str(), i))
        .collect();
    func.blocks
        .iter()
        .map(|b| {
            let mut succs: Vec<usize> = Vec::new();
            for target in b.term.successors() {
                if let Some(&s) = index.get(target) {
                    if !succs.contains(&s) {
                        succs.push(s);
                    }
                }
            }
            succs
        })
        .collect()
}

impl Liveness {
    pub fn compute(func: &Function) -> Self {
        let n = func.blocks.len();
        let succs = successor_indices(func);

        // Upward-exposed uses and definitions per block.
        let mut gen: Vec<HashSet<ValueKey>> = vec![HashSet::new(); n];
        let mut kill: Vec<HashSet<ValueKey>> = vec![HashSet::new(); n];
        for (b, block) in func.blocks.iter().enumerate() {
            for phi in &block.phis {
                kill[b].extend(phi.dest.key());
            }
            for inst in &block.insts {
                for key in inst.uses().into_iter().filter_map(Value::key) {
                    if !kill[b].contains(&key) {
                        gen[b].insert(key);
                    }
                }
                kill[b].extend(inst.def().and_then(Value::key));
            }
            for key in block.term.uses().into_iter().filter_map(Value::key) {
                if !kill[b].contains(&key) {
                    gen[b].insert(key);
                }
            }
        }

        // Values each block feeds into successor phis.
        let mut phi_uses: Vec<HashSet<ValueKey>> = vec![HashSet::new(); n];
        for (b, block) in func.blocks.iter().enumerate() {
            for &s in &succs[b] {
                for phi in &func.blocks[s].phis {
                    if let Some(key) = phi.incoming_from(&block.label).and_then(Value::key) {
                        phi_uses[b].insert(key);
                    }
                }
            }
        }

        let mut live_in: Vec<HashSet<ValueKey>> = vec![HashSet::new(); n];
        let mut live_out: Vec<HashSet<ValueKey>> = vec![HashSet::new(); n];
        let mut changed = true;
        while changed {
            changed = false;
            for b in (0..n).rev() {
                let mut out = phi_uses[b].clone();
                for &s in &succs[b] {
                    out.extend(live_in[s].iter().copied());
                }
                let mut inn = gen[b].clone();
                inn.extend(out.iter().filter(|k| !kill[b].contains(*k)).copied());

                if out != live_out[b] || inn != live_in[b] {
                    live_out[b] = out;
                    live_in[b] = inn;
                    changed = true;
                }
            }
        }

        Self { live_in, live_out }
    }
}

/// Live range of one value before splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveRange {
    pub key: ValueKey,
    pub start: u32,
    pub end: u32,
}

/// Hull live ranges for every value that needs a location, ordered by key.
pub fn live_ranges(func: &Function, numbering: &Numbering, liveness: &Liveness) -> Vec<LiveRange> {
    let mut ranges: BTreeMap<ValueKey, (u32, u32)> = BTreeMap::new();
    let mut touch = |key: ValueKey, pos: u32| {
        let range = ranges.entry(key).or_insert((pos, pos));
        range.0 = range.0.min(pos);
        range.1 = range.1.max(pos);
    };

    for index in 0..func.params.len() {
        touch(ValueKey::Param(index as u32), 0);
    }

    let index: HashMap<&str, usize> = func
        .blocks
        .iter()
        .enumerate()
        .map(|(i, b)| (b.label.as_str(), i))
        .collect();

    for (b, block) in func.blocks.iter().enumerate() {
        for (phi, &pos) in block.phis.iter().zip(&numbering.phis[b]) {
            if let Some(dest) = phi.dest.key() {
                touch(dest, pos);
                for (pred, value) in &phi.incoming {
                    let Some(&p) = index.get(pred.as_str()) else {
                        continue;
                    };
                    let edge = numbering.block_end(p);
                    touch(dest, edge);
                    if let Some(key) = value.key() {
                        touch(key, edge);
                    }
                }
            }
        }
        for (inst, &pos) in block.insts.iter().zip(&numbering.insts[b]) {
            // Captures are stored into the closure after its allocation call
            // returns, so they must outlive the call.
            let read_at = match inst {
                Inst::MakeClosure { .. } => pos + 1,
                _ => pos,
            };
            for key in inst.uses().into_iter().filter_map(Value::key) {
                touch(key, read_at);
            }
            if let Some(key) = inst.def().and_then(Value::key) {
                touch(key, pos);
            }
        }
        for key in block.term.uses().into_iter().filter_map(Value::key) {
            touch(key, numbering.terms[b]);
        }
        // Just before the block: a call opening the block must split values
        // that flow through it.
        for &key in &liveness.live_in[b] {
            touch(key, numbering.block_start(b) - 1);
        }
        for &key in &liveness.live_out[b] {
            touch(key, numbering.block_end(b));
        }
    }

    ranges
        .into_iter()
        .map(|(key, (start, end))| LiveRange { key, start, end })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::ssa_function;

    fn range_of(ranges: &[LiveRange], key: ValueKey) -> LiveRange {
        *ranges.iter().find(|r| r.key == key).expect("range")
    }

    #[test]
    fn test_numbering_steps_by_two() {
        let func = ssa_function(
            "def g(x: int) -> int:\n    return x\n\ndef f(a: int) -> int:\n    b = a + 1\n    c = g(b)\n    return c\n",
            "f",
        );
        let numbering = Numbering::compute(&func);
        assert_eq!(numbering.insts[0], vec![2, 4, 6, 8]);
        assert_eq!(numbering.terms[0], 10);
        assert_eq!(numbering.call_sites, vec![6]);
    }

    #[test]
    fn test_param_starts_at_zero() {
        let func = ssa_function("def f(a: int, b: int) -> int:\n    return a + b\n", "f");
        let numbering = Numbering::compute(&func);
        let liveness = Liveness::compute(&func);
        let ranges = live_ranges(&func, &numbering, &liveness);
        let a = range_of(&ranges, ValueKey::Param(0));
        assert_eq!((a.start, a.end), (0, 2));
    }

    #[test]
    fn test_loop_carried_value_covers_loop() {
        let func = ssa_function(
            "def f(n: int) -> int:\n    total = 0\n    i = 0\n    while i < n:\n        total = total + i\n        i = i + 1\n    return total\n",
            "f",
        );
        let numbering = Numbering::compute(&func);
        let liveness = Liveness::compute(&func);
        let ranges = live_ranges(&func, &numbering, &liveness);

        let header = func.block_index("while_header_0").expect("header");
        let body = func.block_index("while_body_0").expect("body");
        // `n` is live around the back edge.
        assert!(liveness.live_in[header].contains(&ValueKey::Param(0)));
        assert!(liveness.live_out[body].contains(&ValueKey::Param(0)));
        let n = range_of(&ranges, ValueKey::Param(0));
        assert!(n.end >= numbering.block_end(body));

        // Header phis stay live until the body's back-edge moves.
        for phi in &func.blocks[header].phis {
            let range = range_of(&ranges, phi.dest.key().expect("key"));
            assert!(range.end >= numbering.block_end(body));
            assert!(range.start <= numbering.block_end(0));
        }
    }
}
