//! Parallel-move sequencing.
//!
//! Edge moves and call-split moves are specified as a set that happens all
//! at once. [`sequentialize`] orders them so that no location is overwritten
//! while a pending move still reads it, breaking each cycle by parking one
//! value in the target's cycle scratch register.

use crate::regalloc::Location;

/// Where a move reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveSrc {
    Loc(Location),
    Imm(i64),
    /// The cycle scratch register.
    Scratch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub src: MoveSrc,
    pub dst: Location,
}

impl Move {
    pub fn new(src: MoveSrc, dst: Location) -> Self {
        Self { src, dst }
    }

    fn is_identity(&self) -> bool {
        self.src == MoveSrc::Loc(self.dst)
    }
}

/// One sequential step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Move(Move),
    /// Copy a location into the cycle scratch register.
    ToScratch(Location),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveState {
    Pending,
    OnStack,
    Emitted,
}

struct Sequencer {
    moves: Vec<Move>,
    states: Vec<MoveState>,
    steps: Vec<Step>,
}

impl Sequencer {
    fn visit(&mut self, index: usize) {
        self.states[index] = MoveState::OnStack;
        let dst = self.moves[index].dst;

        // Every reader of our destination has to run first.
        for reader in 0..self.moves.len() {
            if reader == index || self.moves[reader].src != MoveSrc::Loc(dst) {
                continue;
            }
            match self.states[reader] {
                MoveState::Pending => self.visit(reader),
                MoveState::OnStack => {
                    self.steps.push(Step::ToScratch(dst));
                    self.moves[reader].src = MoveSrc::Scratch;
                }
                MoveState::Emitted => {}
            }
        }

        self.steps.push(Step::Move(self.moves[index]));
        self.states[index] = MoveState::Emitted;
    }
}

/// Order a parallel move set. Every destination must be distinct; moves whose
/// source already is their destination are dropped.
pub fn sequentialize(moves: &[Move]) -> Vec<Step> {
    let moves: Vec<Move> = moves.iter().copied().filter(|m| !m.is_identity()).collect();
    debug_assert!(
        moves
            .iter()
            .enumerate()
            .all(|(i, a)| moves[i + 1..].iter().all(|b| a.dst != b.dst)),
        "parallel move set writes a location twice"
    );

    let count = moves.len();
    let mut sequencer = Sequencer {
        moves,
        states: vec![MoveState::Pending; count],
        steps: Vec::with_capacity(count + 1),
    };
    for index in 0..count {
        if sequencer.states[index] == MoveState::Pending {
            sequencer.visit(index);
        }
    }
    sequencer.steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AsmReg;
    use hashbrown::HashMap;

    fn reg(id: u8) -> Location {
        Location::Reg(AsmReg::gp(id))
    }

    fn mv(src: Location, dst: Location) -> Move {
        Move::new(MoveSrc::Loc(src), dst)
    }

    /// Run the steps over a machine state where every location initially
    /// holds a distinct value, and compare with the parallel semantics.
    fn check(moves: &[Move]) -> Vec<Step> {
        let mut state: HashMap<Location, i64> = HashMap::new();
        for m in moves {
            for loc in [Some(m.dst), if let MoveSrc::Loc(l) = m.src { Some(l) } else { None }]
                .into_iter()
                .flatten()
            {
                let next = state.len() as i64 + 100;
                state.entry(loc).or_insert(next);
            }
        }
        let read = |state: &HashMap<Location, i64>, src: MoveSrc, scratch: i64| match src {
            MoveSrc::Loc(l) => state[&l],
            MoveSrc::Imm(v) => v,
            MoveSrc::Scratch => scratch,
        };

        let mut expected = state.clone();
        for m in moves {
            expected.insert(m.dst, read(&state, m.src, 0));
        }

        let steps = sequentialize(moves);
        let mut scratch = 0;
        for step in &steps {
            match *step {
                Step::ToScratch(loc) => scratch = state[&loc],
                Step::Move(m) => {
                    let value = read(&state, m.src, scratch);
                    state.insert(m.dst, value);
                }
            }
        }
        assert_eq!(state, expected, "steps: {:?}", steps);
        steps
    }

    #[test]
    fn test_chain_is_ordered() {
        let steps = check(&[mv(reg(1), reg(2)), mv(reg(2), reg(3))]);
        assert_eq!(steps.len(), 2);
        assert!(!steps.iter().any(|s| matches!(s, Step::ToScratch(_))));
    }

    #[test]
    fn test_swap_uses_scratch_once() {
        let steps = check(&[mv(reg(1), reg(2)), mv(reg(2), reg(1))]);
        assert_eq!(steps.iter().filter(|s| matches!(s, Step::ToScratch(_))).count(), 1);
        assert_eq!(steps.len(), 3);
    }

    #[test]
    fn test_rotation_and_fan_out() {
        check(&[
            mv(reg(1), reg(2)),
            mv(reg(2), reg(3)),
            mv(reg(3), reg(1)),
            mv(reg(1), Location::Spill(0)),
            Move::new(MoveSrc::Imm(7), reg(4)),
        ]);
        check(&[
            mv(Location::Spill(0), Location::Spill(1)),
            mv(Location::Spill(1), Location::Spill(0)),
            mv(reg(5), reg(6)),
        ]);
    }

    #[test]
    fn test_identity_moves_are_dropped() {
        assert!(sequentialize(&[mv(reg(1), reg(1))]).is_empty());
    }
}
