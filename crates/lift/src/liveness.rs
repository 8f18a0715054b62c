//! Forward register liveness over the raw instruction stream.
//!
//! The tracker drops a pending value once a consumer has inlined it. That is
//! only sound if no later instruction reads the register before it is
//! written again; this module answers that question by walking the control
//! flow graph of the instructions.

use moonlift_bytecode::{Instruction, OpCode, Prototype};

/// Reads and writes of every register, per instruction.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    code: Vec<Instruction>,
    /// Parent registers captured by each child prototype.
    captures: Vec<Vec<u8>>,
}

impl Liveness {
    pub fn new(code: &[Instruction], protos: &[Prototype]) -> Self {
        let captures = protos
            .iter()
            .map(|child| {
                child
                    .upvalues
                    .iter()
                    .filter(|up| up.in_stack)
                    .map(|up| up.index)
                    .collect()
            })
            .collect();
        Self {
            code: code.to_vec(),
            captures,
        }
    }

    /// Whether some path starting at one of `from` reads `reg` before
    /// writing it. Indices past the end of the code are exits.
    pub fn is_live(&self, reg: u8, from: &[usize]) -> bool {
        let mut seen = vec![false; self.code.len()];
        let mut work = from.to_vec();
        while let Some(pc) = work.pop() {
            let Some(insn) = self.code.get(pc) else {
                continue;
            };
            if seen[pc] {
                continue;
            }
            seen[pc] = true;
            if self.reads(insn, reg) {
                return true;
            }
            if writes(insn, reg) {
                continue;
            }
            work.extend(successors(insn, pc));
        }
        false
    }

    /// Whether `reg` is read after the instruction at `pc` runs.
    pub fn is_live_after(&self, reg: u8, pc: usize) -> bool {
        match self.code.get(pc) {
            Some(insn) => !writes(insn, reg) && self.is_live(reg, &successors(insn, pc)),
            None => false,
        }
    }

    fn reads(&self, insn: &Instruction, reg: u8) -> bool {
        use OpCode::*;

        // Unknown opcodes might read anything.
        let Some(op) = insn.opcode() else {
            return true;
        };
        let (reg, a, b, c) = (reg as usize, insn.a as usize, insn.b as usize, insn.c as usize);
        let rk = !insn.k && c == reg;
        match op {
            Move | GetI | GetField | Unm | BNot | Not | Len | AddI | ShrI | ShlI | AddK | SubK
            | MulK | ModK | PowK | DivK | IDivK | BAndK | BOrK | BXorK | TestSet => b == reg,
            GetTable | Add | Sub | Mul | Mod | Pow | Div | IDiv | BAnd | BOr | BXor | Shl
            | Shr => b == reg || c == reg,
            Self_ => b == reg || rk,
            SetUpval | Return1 | Tbc | Test | EqK | EqI | LtI | LeI | GtI | GeI => a == reg,
            Eq | Lt | Le => a == reg || b == reg,
            SetTabUp => rk,
            SetTable => a == reg || b == reg || rk,
            SetI | SetField => a == reg || rk,
            Concat => (a..a + b).contains(&reg),
            Call | TailCall if b == 0 => reg >= a,
            Call | TailCall => (a..a + b).contains(&reg),
            Return if b == 0 => reg >= a,
            Return => (a..a + b - 1).contains(&reg),
            SetList if b == 0 => reg >= a,
            SetList => (a..=a + b).contains(&reg),
            ForPrep => (a..a + 3).contains(&reg),
            TForPrep => (a..a + 4).contains(&reg),
            Closure => usize::try_from(insn.bx)
                .ok()
                .and_then(|index| self.captures.get(index))
                .is_some_and(|regs| regs.iter().any(|&r| r as usize == reg)),
            _ => false,
        }
    }
}

/// Whether the instruction overwrites `reg` on every path through it.
fn writes(insn: &Instruction, reg: u8) -> bool {
    use OpCode::*;

    let Some(op) = insn.opcode() else {
        return false;
    };
    let (reg, a, b, c) = (reg as usize, insn.a as usize, insn.b as usize, insn.c as usize);
    match op {
        Move | LoadI | LoadF | LoadK | LoadKX | LoadFalse | LFalseSkip | LoadTrue | GetUpval
        | GetTabUp | GetTable | GetI | GetField | NewTable | AddI | AddK | SubK | MulK | ModK
        | PowK | DivK | IDivK | BAndK | BOrK | BXorK | ShrI | ShlI | Add | Sub | Mul | Mod
        | Pow | Div | IDiv | BAnd | BOr | BXor | Shl | Shr | Unm | BNot | Not | Len | Concat
        | Closure => a == reg,
        LoadNil => (a..=a + b).contains(&reg),
        Self_ => reg == a || reg == a + 1,
        ForPrep => (a..a + 4).contains(&reg),
        // The callee frame clobbers everything from the function register up.
        Call | TailCall => reg >= a,
        TForCall => reg >= a + 4,
        VarArg if c == 0 => reg >= a,
        VarArg => (a..a + c.saturating_sub(1)).contains(&reg),
        _ => false,
    }
}

/// Instructions that may run right after the one at `pc`.
fn successors(insn: &Instruction, pc: usize) -> Vec<usize> {
    use OpCode::*;

    let target = insn
        .jump_target(pc)
        .and_then(|target| usize::try_from(target).ok());
    match insn.opcode() {
        Some(Jmp) => target.into_iter().collect(),
        Some(ForPrep | ForLoop | TForLoop) => std::iter::once(pc + 1).chain(target).collect(),
        Some(TForPrep) => usize::try_from(pc as i64 + 1 + insn.bx as i64)
            .ok()
            .into_iter()
            .collect(),
        Some(LFalseSkip) => vec![pc + 2],
        Some(op) if op.is_test() => vec![pc + 1, pc + 2],
        Some(Return | Return0 | Return1 | TailCall) => Vec::new(),
        _ => vec![pc + 1],
    }
}
