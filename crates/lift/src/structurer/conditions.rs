//! Conditional jumps: `if`, `while`, `repeat` conditions, short-circuit
//! chains and boolean values.

use moonlift_ast::{BinOp, Block, Expr, IfClause, Stmt};
use moonlift_bytecode::OpCode;
use tracing::{debug, warn};

use super::{BlockKind, Construct, Result, Structurer};

/// Run of test+jump pairs evaluated as one short-circuit condition.
#[derive(Debug)]
struct Chain {
    /// Index of each test instruction.
    tests: Vec<usize>,
    /// First instruction after the last jump.
    fall: usize,
    /// Target of the last jump.
    dest: i64,
}

/// Register loads without calls that may sit between the tests of a chain.
pub(super) fn is_pure_load(op: OpCode) -> bool {
    matches!(
        op,
        OpCode::Move
            | OpCode::LoadI
            | OpCode::LoadF
            | OpCode::LoadK
            | OpCode::LoadFalse
            | OpCode::LoadTrue
            | OpCode::LoadNil
            | OpCode::GetUpval
            | OpCode::GetTabUp
            | OpCode::GetTable
            | OpCode::GetI
            | OpCode::GetField
            | OpCode::AddI
            | OpCode::AddK
            | OpCode::SubK
            | OpCode::MulK
            | OpCode::ModK
            | OpCode::PowK
            | OpCode::DivK
            | OpCode::IDivK
            | OpCode::BAndK
            | OpCode::BOrK
            | OpCode::BXorK
            | OpCode::ShrI
            | OpCode::ShlI
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Div
            | OpCode::IDiv
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::MmBin
            | OpCode::MmBinI
            | OpCode::MmBinK
            | OpCode::Unm
            | OpCode::BNot
            | OpCode::Not
            | OpCode::Len
            | OpCode::Concat
    )
}

/// Opcodes that end a straight-line loop prelude.
fn is_control(op: OpCode) -> bool {
    op.is_test()
        || matches!(
            op,
            OpCode::Jmp
                | OpCode::ForPrep
                | OpCode::ForLoop
                | OpCode::TForPrep
                | OpCode::TForCall
                | OpCode::TForLoop
                | OpCode::Return
                | OpCode::Return0
                | OpCode::Return1
                | OpCode::TailCall
        )
}

impl<'a> Structurer<'a> {
    /// Target of the jump following the test at `test`, with compiler
    /// jump threading undone.
    fn test_dest(&self, test: usize) -> i64 {
        match self.jumps.unthreaded(test + 1) {
            Some(landing) => landing as i64,
            None => self.jump_target(test + 1),
        }
    }

    /// The tested condition itself, ignoring the k flag.
    fn comparison(&mut self, pc: usize) -> Result<Expr> {
        let insn = self.code[pc];
        let a = insn.a;
        // The C operand flags a float immediate.
        let number = |n: i32| {
            if insn.c != 0 {
                Expr::number(n as f64)
            } else {
                Expr::integer(n as i64)
            }
        };
        Ok(match insn.opcode() {
            Some(OpCode::Eq) => Expr::binary(BinOp::CompareEq, self.read(a, pc)?, self.read(insn.b, pc)?),
            Some(OpCode::Lt) => Expr::binary(BinOp::CompareLt, self.read(a, pc)?, self.read(insn.b, pc)?),
            Some(OpCode::Le) => Expr::binary(BinOp::CompareLe, self.read(a, pc)?, self.read(insn.b, pc)?),
            Some(OpCode::EqK) => {
                let left = self.read(a, pc)?;
                Expr::binary(BinOp::CompareEq, left, self.constant(insn.b as usize, pc)?)
            }
            Some(OpCode::EqI) => Expr::binary(BinOp::CompareEq, self.read(a, pc)?, number(insn.sb())),
            Some(OpCode::LtI) => Expr::binary(BinOp::CompareLt, self.read(a, pc)?, number(insn.sb())),
            Some(OpCode::LeI) => Expr::binary(BinOp::CompareLe, self.read(a, pc)?, number(insn.sb())),
            Some(OpCode::GtI) => Expr::binary(BinOp::CompareGt, self.read(a, pc)?, number(insn.sb())),
            Some(OpCode::GeI) => Expr::binary(BinOp::CompareGe, self.read(a, pc)?, number(insn.sb())),
            Some(OpCode::TestSet) => self.read(insn.b, pc)?,
            _ => self.read(a, pc)?,
        })
    }

    /// Condition under which the test at `pc` skips its jump and falls
    /// through into the body.
    fn body_condition(&mut self, pc: usize) -> Result<Expr> {
        let cond = self.comparison(pc)?;
        Ok(if self.code[pc].k { cond.negate() } else { cond })
    }

    fn is_test_pair(&self, pc: usize) -> bool {
        self.is_test(pc) && self.is_op(pc + 1, OpCode::Jmp) && !self.jumps.is_target(pc + 1)
    }

    /// Whether the pure load at `pc` leaves its value pending rather than
    /// assigning a named local.
    fn is_chain_load(&self, pc: usize) -> bool {
        let insn = self.code[pc];
        insn.opcode().is_some_and(is_pure_load)
            && !self.jumps.is_target(pc)
            && self.tracker.names().debug_name(insn.a, pc + 1).is_none()
    }

    fn scan_chain(&self, pc: usize) -> Option<Chain> {
        if !self.is_test_pair(pc) {
            return None;
        }
        let mut pairs = vec![pc];
        let mut next = pc + 2;
        loop {
            let mut k = next;
            while k < self.code.len() && self.is_chain_load(k) {
                k += 1;
            }
            if k >= self.code.len()
                || self.jumps.is_target(k)
                || !self.is_test_pair(k)
                || self.boolean_pattern(k).is_some()
            {
                break;
            }
            pairs.push(k);
            next = k + 2;
        }

        // The longest prefix whose earlier jumps all land on either the
        // body or the final target.
        for n in (0..pairs.len()).rev() {
            let last = pairs[n];
            let fall = last + 2;
            let dest = self.test_dest(last);
            let closed = pairs[..n].iter().all(|&p| {
                let d = self.test_dest(p);
                d == fall as i64 || d == dest
            });
            if closed {
                pairs.truncate(n + 1);
                return Some(Chain {
                    tests: pairs,
                    fall,
                    dest,
                });
            }
        }
        None
    }

    /// Evaluate the loads of `chain` and fold its tests into one condition
    /// for entering the body.
    fn chain_condition(&mut self, chain: &Chain) -> Result<Expr> {
        let mut conds: Vec<(Expr, bool)> = Vec::with_capacity(chain.tests.len());
        let mut next = chain.tests[0];
        for (n, &test) in chain.tests.iter().enumerate() {
            while next < test {
                next += self.dispatch(next)?.max(1);
            }
            let cond = self.body_condition(test)?;
            let to_body = n + 1 < chain.tests.len() && self.test_dest(test) == chain.fall as i64;
            conds.push((cond, to_body));
            next = test + 2;
        }

        let Some((mut expr, _)) = conds.pop() else {
            return Ok(Expr::boolean(true));
        };
        while let Some((cond, to_body)) = conds.pop() {
            expr = if to_body {
                Expr::binary(BinOp::Or, cond.negate(), expr)
            } else {
                Expr::binary(BinOp::And, cond, expr)
            };
        }
        Ok(expr)
    }

    /// `cmp; JMP +1; LFALSESKIP r; LOADTRUE r` stores a comparison result.
    /// Returns `r`.
    pub(super) fn boolean_pattern(&self, pc: usize) -> Option<u8> {
        let insn = self.code.get(pc)?;
        let op = insn.opcode()?;
        if !op.is_test() || matches!(op, OpCode::Test | OpCode::TestSet) {
            return None;
        }
        let jmp = self.code.get(pc + 1)?;
        let skip = self.code.get(pc + 2)?;
        let load = self.code.get(pc + 3)?;
        let matched = jmp.is(OpCode::Jmp)
            && jmp.bx == 1
            && skip.is(OpCode::LFalseSkip)
            && load.is(OpCode::LoadTrue)
            && skip.a == load.a
            && !self.jumps.is_target(pc + 1)
            && !self.jumps.is_target(pc + 2);
        matched.then_some(skip.a)
    }

    fn boolean_value(&mut self, pc: usize, reg: u8) -> Result<usize> {
        // The jump to LOADTRUE is taken when the comparison equals k.
        let cond = self.comparison(pc)?;
        let value = if self.code[pc].k { cond } else { cond.negate() };
        self.write(reg, value, pc + 3)?;
        Ok(4)
    }

    /// `TESTSET A B k; JMP end; <A = rest>` computes `B or rest` (k set)
    /// or `B and rest`. Returns the end of the value block.
    pub(super) fn value_testset_end(&self, pc: usize) -> Option<usize> {
        let insn = self.code.get(pc)?;
        if !insn.is(OpCode::TestSet) || !self.is_op(pc + 1, OpCode::Jmp) {
            return None;
        }
        let end = self.jump_target(pc + 1);
        if end <= pc as i64 + 2 || end > self.code.len() as i64 {
            return None;
        }
        let end = end as usize;
        let writes_target = self.code[end - 1].a == insn.a;
        (writes_target && self.is_value_block(pc + 2, end, insn.a)).then_some(end)
    }

    fn is_value_block(&self, from: usize, to: usize, target: u8) -> bool {
        let mut j = from;
        while j < to {
            if j > from && self.jumps.is_target(j) {
                return false;
            }
            if let Some(end) = self.value_testset_end(j) {
                if end > to {
                    return false;
                }
                j = end;
                continue;
            }
            let insn = self.code[j];
            let Some(op) = insn.opcode() else {
                return false;
            };
            let ok = match op {
                OpCode::Call | OpCode::VarArg => insn.a >= target && matches!(insn.c, 0 | 2),
                OpCode::LoadKX | OpCode::ExtraArg => true,
                OpCode::NewTable
                | OpCode::Self_
                | OpCode::Closure
                | OpCode::SetField
                | OpCode::SetI
                | OpCode::SetTable
                | OpCode::SetList => insn.a >= target,
                _ => is_pure_load(op),
            };
            if !ok {
                return false;
            }
            j += 1;
        }
        true
    }

    fn value_testset(&mut self, pc: usize, end: usize) -> Result<usize> {
        let insn = self.code[pc];
        let first = self.read(insn.b, pc)?;
        self.feeding += 1;
        let mut j = pc + 2;
        let mut result = Ok(());
        while j < end {
            match self.dispatch(j) {
                Ok(n) => j += n.max(1),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        self.feeding -= 1;
        result?;

        let rest = self.tracker.get(insn.a, end);
        self.tracker.clear(insn.a);
        let op = if insn.k { BinOp::Or } else { BinOp::And };
        self.write(insn.a, Expr::binary(op, first, rest), end - 1)?;
        Ok(end - pc)
    }

    /// Structure the test at `pc` and everything chained to it.
    pub(super) fn conditional(&mut self, pc: usize) -> Result<usize> {
        if let Some(reg) = self.boolean_pattern(pc) {
            return self.boolean_value(pc, reg);
        }
        if let Some(end) = self.value_testset_end(pc) {
            return self.value_testset(pc, end);
        }
        let chain = self
            .scan_chain(pc)
            .filter(|chain| (0..=self.code.len() as i64).contains(&chain.dest));
        let Some(chain) = chain else {
            warn!(pc, "test without a usable jump");
            // Evaluated into a discarded local.
            let cond = self.comparison(pc)?;
            self.emit(Stmt::Comment(format!("unstructured test at {pc}")));
            self.emit(Stmt::local(Expr::local("_"), cond));
            return Ok(1);
        };

        let cond = self.chain_condition(&chain)?;
        let consumed = chain.fall - pc;
        let dest = chain.dest as usize;
        self.flush_all(&[chain.fall, dest]);
        debug!(pc, dest, tests = chain.tests.len(), "conditional");

        if dest <= pc {
            self.close_repeat(pc, dest, cond);
        } else if self.is_loop_exit(self.stack.len(), chain.dest) {
            // `if c then break end` jumps straight to the loop exit.
            self.emit(Stmt::If {
                clauses: vec![IfClause {
                    condition: Some(cond.negate()),
                    body: Block {
                        stmts: vec![Stmt::Break],
                    },
                }],
            });
        } else if let Some((head, back_edge)) = self.while_loop(pc, dest) {
            self.open_while(cond, head, back_edge, dest);
        } else {
            self.push_block(
                BlockKind::If,
                pc,
                dest,
                usize::MAX,
                Construct::If {
                    clauses: Vec::new(),
                    condition: Some(cond),
                },
                Block::new(),
            );
        }
        Ok(consumed)
    }

    /// A plain JMP right before `dest` going back to a straight-line head
    /// at or before `first_test` makes the construct a `while` loop.
    fn while_loop(&self, first_test: usize, dest: usize) -> Option<(usize, usize)> {
        let back_edge = dest.checked_sub(1)?;
        if back_edge <= first_test + 1 || !self.is_plain_jump(back_edge) {
            return None;
        }
        let head = self.jump_target(back_edge);
        if head < 0 || head > first_test as i64 {
            return None;
        }
        let head = head as usize;
        let floor = self.stack.last().map_or(0, |b| b.start_pc);
        let straight = (head..first_test).all(|j| {
            self.code[j]
                .opcode()
                .is_some_and(|op| !is_control(op))
        });
        (head >= floor && straight).then_some((head, back_edge))
    }

    fn open_while(&mut self, cond: Expr, head: usize, back_edge: usize, dest: usize) {
        let mut body = Block::new();
        let mut condition = cond;
        let current = self.current_id();
        let prelude_at = self
            .marks
            .get(&head)
            .filter(|mark| mark.block == current)
            .map(|mark| mark.len);
        if let Some(at) = prelude_at {
            if self.body().stmts.len() > at {
                // Statements recomputed before every test stay in the loop.
                body.stmts = self.body().stmts.split_off(at);
                body.push(Stmt::If {
                    clauses: vec![IfClause {
                        condition: Some(condition.negate()),
                        body: Block {
                            stmts: vec![Stmt::Break],
                        },
                    }],
                });
                condition = Expr::boolean(true);
            }
        }
        self.push_block(
            BlockKind::While,
            head,
            back_edge + 1,
            dest,
            Construct::While { condition },
            body,
        );
    }

    /// The `until` test of the repeat loop starting at `head`.
    fn close_repeat(&mut self, pc: usize, head: usize, cond: Expr) {
        let Some(idx) = self
            .stack
            .iter()
            .rposition(|b| b.kind == BlockKind::Repeat && b.start_pc == head)
        else {
            warn!(pc, head, "backward conditional jump without a repeat loop");
            let body = match self.jumps.label(head) {
                Some(label) => Stmt::Goto(label),
                None => Stmt::Comment(format!("jump to {head}")),
            };
            self.emit(Stmt::If {
                clauses: vec![IfClause {
                    condition: Some(cond.negate()),
                    body: Block { stmts: vec![body] },
                }],
            });
            return;
        };
        while self.stack.len() > idx + 1 {
            self.flush_all(&[pc]);
            self.pop_block();
        }
        if let Construct::Repeat { condition } = &mut self.stack[idx].construct {
            *condition = Some(cond);
        }
        self.pop_block();
    }
}
