//! Jump and loop target classification.

use moonlift_bytecode::{Backend, Instruction, OpCode};
use rustc_hash::FxHashMap;

/// How an instruction index is reached by a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Forward if/while exit, loop back-edge, or `goto`.
    Normal,
    /// Head of a `repeat ... until` loop, reached by a backward
    /// conditional jump.
    Repeat,
}

/// Sorted, deduplicated branch targets of one function.
///
/// A target equal to the code length means "falls through to the end".
/// Label ids are indices into the sorted list.
#[derive(Debug, Clone, Default)]
pub struct JumpAnalysis {
    targets: Vec<(usize, TargetKind)>,
    /// Repeat head -> index just past the closing conditional jump.
    repeat_exits: FxHashMap<usize, usize>,
    /// Conditional JMP -> the plain JMP it was threaded through.
    unthreaded: FxHashMap<usize, usize>,
}

/// Classify every branch target of `code`.
pub fn analyze_jumps(code: &[u32], backend: &dyn Backend) -> JumpAnalysis {
    let insns: Vec<Instruction> = code.iter().map(|&raw| backend.decode(raw)).collect();
    JumpAnalysis::from_instructions(&insns)
}

impl JumpAnalysis {
    pub fn from_instructions(code: &[Instruction]) -> Self {
        let len = code.len();
        let mut kinds: FxHashMap<usize, TargetKind> = FxHashMap::default();
        let mut repeat_exits: FxHashMap<usize, usize> = FxHashMap::default();
        let mut unthreaded: FxHashMap<usize, usize> = FxHashMap::default();
        let is_plain_jump = |pc: usize| {
            code[pc].is(OpCode::Jmp)
                && !(pc > 0 && code[pc - 1].opcode().is_some_and(OpCode::is_test))
        };

        for (pc, insn) in code.iter().enumerate() {
            if let Some(target) = insn.jump_target(pc) {
                if (0..=len as i64).contains(&target) {
                    kinds.entry(target as usize).or_insert(TargetKind::Normal);
                }
            }

            let is_test = insn.opcode().is_some_and(OpCode::is_test);
            let Some(next) = code.get(pc + 1) else {
                continue;
            };
            if !is_test || !next.is(OpCode::Jmp) {
                continue;
            }
            let dest = pc as i64 + 2 + next.bx as i64;
            if dest >= 0 && dest <= pc as i64 {
                let dest = dest as usize;
                // A forward exit whose landing JMP goes back (an `if` or
                // inner loop ending a `while` body) gets threaded by the
                // compiler into a backward jump. Undo that when a later
                // plain JMP to the same head exists.
                let landing = (pc + 2..len)
                    .find(|&k| is_plain_jump(k) && k as i64 + 1 + code[k].bx as i64 == dest as i64);
                if let Some(landing) = landing {
                    unthreaded.insert(pc + 1, landing);
                    continue;
                }
                kinds.insert(dest, TargetKind::Repeat);
                let exit = repeat_exits.entry(dest).or_insert(pc + 2);
                *exit = (*exit).max(pc + 2);
            }
        }

        let mut targets: Vec<(usize, TargetKind)> = kinds.into_iter().collect();
        targets.sort_unstable_by_key(|&(pc, _)| pc);
        Self {
            targets,
            repeat_exits,
            unthreaded,
        }
    }

    pub fn targets(&self) -> &[(usize, TargetKind)] {
        &self.targets
    }

    pub fn kind(&self, pc: usize) -> Option<TargetKind> {
        self.label_id(pc).map(|id| self.targets[id].1)
    }

    pub fn is_target(&self, pc: usize) -> bool {
        self.label_id(pc).is_some()
    }

    pub fn label_id(&self, pc: usize) -> Option<usize> {
        self.targets.binary_search_by_key(&pc, |&(t, _)| t).ok()
    }

    /// `L{id}` label for a target.
    pub fn label(&self, pc: usize) -> Option<String> {
        self.label_id(pc).map(|id| format!("L{id}"))
    }

    /// For a repeat head, the index following its `until` test and jump.
    pub fn repeat_exit(&self, head: usize) -> Option<usize> {
        self.repeat_exits.get(&head).copied()
    }

    /// For a conditional JMP at `pc` whose target was threaded backwards,
    /// the plain JMP it originally landed on.
    pub fn unthreaded(&self, pc: usize) -> Option<usize> {
        self.unthreaded.get(&pc).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moonlift_bytecode::Lua54;

    fn encode(code: &[Instruction]) -> Vec<u32> {
        code.iter().map(|insn| Lua54.encode(insn)).collect()
    }

    #[test]
    fn test_forward_and_loop_targets() {
        let code = encode(&[
            Instruction::abx(OpCode::ForPrep, 0, 1), // -> 3
            Instruction::abc(OpCode::Move, 4, 3, 0, false),
            Instruction::abx(OpCode::ForLoop, 0, 2), // -> 1
            Instruction::sj(OpCode::Jmp, 0),         // -> 4
            Instruction::abc(OpCode::Return0, 0, 1, 1, false),
        ]);
        let analysis = analyze_jumps(&code, &Lua54);
        let pcs: Vec<usize> = analysis.targets().iter().map(|&(pc, _)| pc).collect();
        assert_eq!(pcs, vec![1, 3, 4]);
        assert_eq!(analysis.label(3).as_deref(), Some("L1"));
        assert!(!analysis.is_target(2));
    }

    #[test]
    fn test_backward_conditional_is_repeat() {
        // repeat <body> until R0
        let code = encode(&[
            Instruction::abc(OpCode::Move, 1, 0, 0, false),
            Instruction::abc(OpCode::Test, 0, 0, 0, false),
            Instruction::sj(OpCode::Jmp, -3), // -> 0
            Instruction::abc(OpCode::Return0, 0, 1, 1, false),
        ]);
        let analysis = analyze_jumps(&code, &Lua54);
        assert_eq!(analysis.kind(0), Some(TargetKind::Repeat));
        assert_eq!(analysis.repeat_exit(0), Some(3));
    }

    #[test]
    fn test_repeat_wins_over_normal() {
        let code = encode(&[
            Instruction::abc(OpCode::Move, 1, 0, 0, false),
            Instruction::sj(OpCode::Jmp, -2), // plain back jump -> 0
            Instruction::abc(OpCode::Test, 0, 0, 0, false),
            Instruction::sj(OpCode::Jmp, -4), // conditional back jump -> 0
            Instruction::abc(OpCode::Return0, 0, 1, 1, false),
        ]);
        let analysis = analyze_jumps(&code, &Lua54);
        assert_eq!(analysis.kind(0), Some(TargetKind::Repeat));
    }

    #[test]
    fn test_threaded_exit_is_not_repeat() {
        // while R0 do if R1 then R2 = R0 end end
        let code = encode(&[
            Instruction::abc(OpCode::Test, 0, 0, 0, false),
            Instruction::sj(OpCode::Jmp, 4), // -> 6
            Instruction::abc(OpCode::Test, 1, 0, 0, false),
            Instruction::sj(OpCode::Jmp, -4), // threaded -> 0
            Instruction::abc(OpCode::Move, 2, 0, 0, false),
            Instruction::sj(OpCode::Jmp, -6), // back-edge -> 0
            Instruction::abc(OpCode::Return0, 0, 1, 1, false),
        ]);
        let analysis = analyze_jumps(&code, &Lua54);
        assert_eq!(analysis.kind(0), Some(TargetKind::Normal));
        assert_eq!(analysis.unthreaded(3), Some(5));
        assert_eq!(analysis.repeat_exit(0), None);
    }

    #[test]
    fn test_target_at_code_end_is_kept() {
        let code = encode(&[Instruction::sj(OpCode::Jmp, 0)]);
        let analysis = analyze_jumps(&code, &Lua54);
        assert_eq!(analysis.kind(1), Some(TargetKind::Normal));

        let out_of_range = encode(&[Instruction::sj(OpCode::Jmp, 5)]);
        assert!(analyze_jumps(&out_of_range, &Lua54).targets().is_empty());
    }
}
