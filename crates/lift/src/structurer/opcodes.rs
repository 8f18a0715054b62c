use moonlift_ast::{is_identifier, BinOp, Block, Expr, Literal, Stmt, UnOp};
use moonlift_bytecode::{Instruction, OpCode};
use tracing::{debug, warn};

use super::{BlockKind, Construct, Result, Structurer};

/// Binary operator of an arithmetic or bitwise opcode.
fn arith_op(op: OpCode) -> Option<BinOp> {
    Some(match op {
        OpCode::Add | OpCode::AddK | OpCode::AddI => BinOp::Add,
        OpCode::Sub | OpCode::SubK => BinOp::Sub,
        OpCode::Mul | OpCode::MulK => BinOp::Mul,
        OpCode::Mod | OpCode::ModK => BinOp::Mod,
        OpCode::Pow | OpCode::PowK => BinOp::Pow,
        OpCode::Div | OpCode::DivK => BinOp::Div,
        OpCode::IDiv | OpCode::IDivK => BinOp::FloorDiv,
        OpCode::BAnd | OpCode::BAndK => BinOp::BitAnd,
        OpCode::BOr | OpCode::BOrK => BinOp::BitOr,
        OpCode::BXor | OpCode::BXorK => BinOp::BitXor,
        OpCode::Shl | OpCode::ShlI => BinOp::Shl,
        OpCode::Shr | OpCode::ShrI => BinOp::Shr,
        _ => return None,
    })
}

fn unary_op(op: OpCode) -> Option<UnOp> {
    Some(match op {
        OpCode::Unm => UnOp::Minus,
        OpCode::BNot => UnOp::BitNot,
        OpCode::Not => UnOp::Not,
        OpCode::Len => UnOp::Len,
        _ => return None,
    })
}

impl<'a> Structurer<'a> {
    /// Translate the instruction at `pc`, returning how many instructions
    /// were consumed.
    pub(super) fn dispatch(&mut self, pc: usize) -> Result<usize> {
        let insn = self.code[pc];
        let Some(op) = insn.opcode() else {
            warn!(pc, op = insn.op, "unknown opcode");
            self.emit(Stmt::Comment(format!("unknown opcode {}", insn.op)));
            return Ok(1);
        };
        let a = insn.a;

        match op {
            OpCode::Move => {
                let value = self.read(insn.b, pc)?;
                self.write(a, value, pc)?;
            }
            OpCode::LoadI => self.write(a, Expr::integer(insn.bx as i64), pc)?,
            OpCode::LoadF => self.write(a, Expr::number(insn.bx as f64), pc)?,
            OpCode::LoadK => {
                let value = self.constant(insn.bx as usize, pc)?;
                self.write(a, value, pc)?;
            }
            OpCode::LoadKX => {
                let index = self
                    .code
                    .get(pc + 1)
                    .filter(|next| next.is(OpCode::ExtraArg))
                    .map_or(usize::MAX, |next| next.bx as usize);
                let value = self.constant(index, pc)?;
                self.write(a, value, pc)?;
                return Ok(2);
            }
            OpCode::LoadFalse | OpCode::LFalseSkip => self.write(a, Expr::boolean(false), pc)?,
            OpCode::LoadTrue => self.write(a, Expr::boolean(true), pc)?,
            OpCode::LoadNil => {
                for reg in a..=a.saturating_add(insn.b) {
                    self.write(reg, Expr::nil(), pc)?;
                }
            }

            OpCode::GetUpval => {
                let value = self.upvalue(insn.b as usize, pc)?;
                self.write(a, value, pc)?;
            }
            OpCode::SetUpval => {
                let value = self.read(a, pc)?;
                let target = self.upvalue(insn.b as usize, pc)?;
                if let Expr::Variable { name, .. } = &target {
                    let name = name.clone();
                    self.flush_readers(&name, pc);
                }
                self.store(target, value, pc);
            }
            OpCode::GetTabUp => {
                let table = self.upvalue(insn.b as usize, pc)?;
                let key = self.constant(insn.c as usize, pc)?;
                self.write(a, Expr::index(table, key), pc)?;
            }
            OpCode::GetTable => {
                let table = self.read(insn.b, pc)?;
                let key = self.read(insn.c, pc)?;
                self.write(a, Expr::index(table, key), pc)?;
            }
            OpCode::GetI => {
                let table = self.read(insn.b, pc)?;
                self.write(a, Expr::index(table, Expr::integer(insn.c as i64)), pc)?;
            }
            OpCode::GetField => {
                let table = self.read(insn.b, pc)?;
                let key = self.constant(insn.c as usize, pc)?;
                self.write(a, Expr::index(table, key), pc)?;
            }
            OpCode::SetTabUp => {
                let table = self.upvalue(a as usize, pc)?;
                let key = self.constant(insn.b as usize, pc)?;
                let value = self.rk(&insn, pc)?;
                self.store(Expr::index(table, key), value, pc);
            }
            OpCode::SetTable => {
                let table = self.read(a, pc)?;
                let key = self.read(insn.b, pc)?;
                let value = self.rk(&insn, pc)?;
                self.store(Expr::index(table, key), value, pc);
            }
            OpCode::SetI => {
                let table = self.read(a, pc)?;
                let value = self.rk(&insn, pc)?;
                self.store(Expr::index(table, Expr::integer(insn.b as i64)), value, pc);
            }
            OpCode::SetField => {
                let table = self.read(a, pc)?;
                let key = self.constant(insn.b as usize, pc)?;
                let value = self.rk(&insn, pc)?;
                self.store(Expr::index(table, key), value, pc);
            }

            OpCode::NewTable => return self.table_constructor(pc),
            OpCode::SetList => self.standalone_setlist(pc, &insn)?,
            OpCode::Self_ => {
                let object = self.read(insn.b, pc)?;
                let key = self.rk(&insn, pc)?;
                let method = match &key {
                    Expr::Literal(Literal::String(bytes)) if is_identifier(bytes) => {
                        String::from_utf8(bytes.clone()).ok()
                    }
                    _ => None,
                };
                // Both halves are consumed by the CALL that follows.
                self.check_register(a as usize + 1, pc)?;
                self.tracker.set_pending(a + 1, object.clone(), pc);
                self.tracker.set_pending(a, Expr::index(object, key), pc);
                self.method = method.map(|name| (a, name));
            }

            OpCode::AddI => {
                let left = self.read(insn.b, pc)?;
                let imm = insn.sc();
                let value = if imm < 0 {
                    Expr::binary(BinOp::Sub, left, Expr::integer(-(imm as i64)))
                } else {
                    Expr::binary(BinOp::Add, left, Expr::integer(imm as i64))
                };
                self.write(a, value, pc)?;
            }
            OpCode::ShrI => {
                let left = self.read(insn.b, pc)?;
                let value = Expr::binary(BinOp::Shr, left, Expr::integer(insn.sc() as i64));
                self.write(a, value, pc)?;
            }
            OpCode::ShlI => {
                let right = self.read(insn.b, pc)?;
                let value = Expr::binary(BinOp::Shl, Expr::integer(insn.sc() as i64), right);
                self.write(a, value, pc)?;
            }
            OpCode::AddK
            | OpCode::SubK
            | OpCode::MulK
            | OpCode::ModK
            | OpCode::PowK
            | OpCode::DivK
            | OpCode::IDivK
            | OpCode::BAndK
            | OpCode::BOrK
            | OpCode::BXorK => {
                let left = self.read(insn.b, pc)?;
                let right = self.constant(insn.c as usize, pc)?;
                if let Some(bin) = arith_op(op) {
                    self.write(a, Expr::binary(bin, left, right), pc)?;
                }
            }
            OpCode::Add
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
            | OpCode::Shr => {
                let left = self.read(insn.b, pc)?;
                let right = self.read(insn.c, pc)?;
                if let Some(bin) = arith_op(op) {
                    self.write(a, Expr::binary(bin, left, right), pc)?;
                }
            }
            OpCode::Unm | OpCode::BNot | OpCode::Not | OpCode::Len => {
                let operand = self.read(insn.b, pc)?;
                if let Some(un) = unary_op(op) {
                    self.write(a, Expr::unary(un, operand), pc)?;
                }
            }
            OpCode::Concat => {
                let parts = self.read_range(a, insn.b as usize, pc)?;
                let value = parts
                    .into_iter()
                    .rev()
                    .reduce(|acc, part| Expr::binary(BinOp::Concat, part, acc))
                    .unwrap_or_else(|| Expr::string(""));
                self.write(a, value, pc)?;
            }

            OpCode::Jmp => self.jump(pc, &insn),
            OpCode::Eq
            | OpCode::Lt
            | OpCode::Le
            | OpCode::EqK
            | OpCode::EqI
            | OpCode::LtI
            | OpCode::LeI
            | OpCode::GtI
            | OpCode::GeI
            | OpCode::Test
            | OpCode::TestSet => return self.conditional(pc),

            OpCode::Call => self.call(pc, &insn)?,
            OpCode::TailCall => {
                let call = self.call_expr(pc, &insn)?;
                self.flush_volatile(pc);
                let mut out = Vec::new();
                self.tracker.set_top(a, call, &mut out);
                self.emit_all(out);
            }
            OpCode::Return => {
                let values = if insn.b == 0 {
                    let top = self.tracker.take_top();
                    self.flush_all(&[pc]);
                    match top {
                        Some((reg, expr)) if reg >= a => {
                            let mut values = self.read_range(a, (reg - a) as usize, pc)?;
                            values.push(expr);
                            values
                        }
                        Some((_, expr)) => vec![expr],
                        None => vec![Expr::VarArg],
                    }
                } else {
                    self.flush_all(&[pc]);
                    self.read_range(a, insn.b as usize - 1, pc)?
                };
                self.emit(Stmt::Return { values });
            }
            OpCode::Return0 => {
                self.flush_all(&[pc]);
                self.emit(Stmt::Return { values: Vec::new() });
            }
            OpCode::Return1 => {
                self.flush_all(&[pc]);
                let value = self.read(a, pc)?;
                self.emit(Stmt::Return {
                    values: vec![value],
                });
            }
            OpCode::VarArg => match insn.c {
                0 => {
                    let mut out = Vec::new();
                    self.tracker.set_top(a, Expr::VarArg, &mut out);
                    self.emit_all(out);
                }
                1 => {}
                2 => self.write(a, Expr::VarArg, pc)?,
                c => self.multi_assign(a, c as usize - 1, Expr::VarArg, pc)?,
            },

            OpCode::ForPrep => self.for_prep(pc, &insn)?,
            OpCode::TForPrep => self.tfor_prep(pc, &insn)?,
            OpCode::ForLoop | OpCode::TForLoop => {
                self.flush_all(&[pc]);
                self.close_loop(pc);
            }
            OpCode::Closure => return self.closure(pc, &insn),

            OpCode::TForCall
            | OpCode::MmBin
            | OpCode::MmBinI
            | OpCode::MmBinK
            | OpCode::Close
            | OpCode::Tbc
            | OpCode::VarArgPrep
            | OpCode::ExtraArg => {}
        }
        Ok(1)
    }

    /// Assignment to a table slot or upvalue.
    fn store(&mut self, target: Expr, value: Expr, pc: usize) {
        self.flush_volatile(pc);
        self.emit(Stmt::assign(target, value));
    }

    fn jump(&mut self, pc: usize, insn: &Instruction) {
        let target = pc as i64 + 1 + insn.bx as i64;
        let depth = self.stack.len();

        let else_skip = self.stack.iter().enumerate().any(|(idx, b)| {
            b.kind == BlockKind::If
                && b.end_pc == pc + 1
                && matches!(
                    b.construct,
                    Construct::If {
                        condition: Some(_),
                        ..
                    }
                )
                && self.else_end(idx, pc, target).is_some()
        });
        let back_edge = self.stack.iter().any(|b| {
            b.kind == BlockKind::While && b.end_pc == pc + 1 && b.start_pc as i64 == target
        });
        if else_skip || back_edge {
            return;
        }

        self.flush_all(&[pc]);
        if self.is_loop_exit(depth, target) {
            self.emit(Stmt::Break);
            return;
        }
        if self.close_infinite_loop(pc, target) {
            return;
        }
        match usize::try_from(target).ok().and_then(|t| self.jumps.label(t)) {
            Some(label) => self.emit(Stmt::Goto(label)),
            None => {
                warn!(pc, target, "jump out of range");
                self.emit(Stmt::Comment(format!("jump to {target} out of range")));
            }
        }
    }

    /// A plain backward jump to a label earlier in the current block closes
    /// a `while true` loop over the statements since that label.
    fn close_infinite_loop(&mut self, pc: usize, target: i64) -> bool {
        if target < 0 || target as usize > pc {
            return false;
        }
        let Some(&mark) = self.marks.get(&(target as usize)) else {
            return false;
        };
        if mark.block != self.current_id() || self.body().stmts.len() < mark.len {
            return false;
        }
        debug!(head = target, back_edge = pc, "infinite loop");
        let stmts = self.body().stmts.split_off(mark.len);
        let mut body = Block { stmts };
        if let Some(exit) = self.jumps.label(pc + 1) {
            gotos_to_breaks(&mut body, &exit);
        }
        self.emit(Stmt::While {
            condition: Expr::boolean(true),
            body,
        });
        true
    }

    /// Callee and arguments of the CALL or TAILCALL `insn`.
    fn call_expr(&mut self, pc: usize, insn: &Instruction) -> Result<Expr> {
        let a = insn.a;
        let method = self.method.take().filter(|(reg, _)| *reg == a);
        let (callee, method, first_arg) = match method {
            Some((_, name)) => {
                let object = self.read(a.saturating_add(1), pc)?;
                // The looked-up function is subsumed by the method call.
                self.read(a, pc)?;
                (object, Some(name), a.saturating_add(2))
            }
            None => (self.read(a, pc)?, None, a.saturating_add(1)),
        };
        let args = if insn.b == 0 {
            self.read_open(first_arg, pc)?
        } else {
            let count = (a as usize + insn.b as usize).saturating_sub(first_arg as usize);
            self.read_range(first_arg, count, pc)?
        };
        Ok(Expr::Call {
            callee: Box::new(callee),
            method,
            args,
        })
    }

    fn call(&mut self, pc: usize, insn: &Instruction) -> Result<()> {
        let a = insn.a;
        let call = self.call_expr(pc, insn)?;
        self.flush_volatile(pc);

        let feeds_generic_for = self
            .code
            .get(pc + 1)
            .is_some_and(|next| next.is(OpCode::TForPrep) && next.a == a);
        if feeds_generic_for || insn.c == 0 {
            let mut out = Vec::new();
            self.tracker.set_top(a, call, &mut out);
            self.emit_all(out);
            return Ok(());
        }
        match insn.c {
            1 => self.emit(Stmt::Expr(call)),
            2 => self.write(a, call, pc)?,
            c => self.multi_assign(a, c as usize - 1, call, pc)?,
        }
        Ok(())
    }

    /// `targets = value` for a value producing `count` results into
    /// consecutive registers from `base`.
    fn multi_assign(&mut self, base: u8, count: usize, value: Expr, pc: usize) -> Result<()> {
        self.check_register(base as usize + count - 1, pc)?;
        let names = self.tracker.names();
        let is_local = names.starts_at(base, pc + 1);
        let mut targets: Vec<Expr> = (0..count)
            .map(|n| names.target(base + n as u8, pc))
            .collect();
        let mut values = vec![value];

        // Lower registers declared in the same `local` statement.
        if is_local {
            let mut reg = base;
            while reg > 0 && self.tracker.names().starts_at(reg - 1, pc + 1) {
                reg -= 1;
                let Some(expr) = self.tracker.peek(reg).cloned() else {
                    break;
                };
                self.tracker.clear(reg);
                targets.insert(0, self.tracker.names().target(reg, pc));
                values.insert(0, expr);
            }
        }

        self.flush_all_after(pc);
        let synthetic: Vec<bool> = (0..count)
            .map(|n| self.tracker.names().debug_name(base + n as u8, pc + 1).is_none())
            .collect();
        for (n, synthetic) in synthetic.into_iter().enumerate() {
            self.tracker.assigned(base + n as u8, synthetic);
        }
        self.emit(Stmt::Assignment {
            targets,
            values,
            is_local,
        });
        Ok(())
    }

    fn standalone_setlist(&mut self, pc: usize, insn: &Instruction) -> Result<()> {
        let table = self.read(insn.a, pc)?;
        let values = if insn.b == 0 {
            warn!(pc, "list store of an open result outside a constructor");
            self.read_open(insn.a.saturating_add(1), pc)?
        } else {
            self.read_range(insn.a.saturating_add(1), insn.b as usize, pc)?
        };
        self.flush_volatile(pc);
        for (n, value) in values.into_iter().enumerate() {
            let index = Expr::integer((insn.c as usize + n + 1) as i64);
            self.emit(Stmt::assign(Expr::index(table.clone(), index), value));
        }
        Ok(())
    }

    fn for_prep(&mut self, pc: usize, insn: &Instruction) -> Result<()> {
        let a = insn.a;
        let end = (pc as i64 + insn.bx as i64 + 2).max(pc as i64 + 1) as usize;
        self.check_register(a as usize + 3, pc)?;
        let start = self.read(a, pc)?;
        let limit = self.read(a + 1, pc)?;
        let step = self.read(a + 2, pc)?;
        let var = self.tracker.names().register(a + 3, pc + 1);
        self.flush_all_after(pc);
        let step = (step != Expr::integer(1) && step != Expr::number(1.0)).then_some(step);
        self.push_block(
            BlockKind::Loop,
            pc,
            end,
            end,
            Construct::ForNum {
                var,
                start,
                limit,
                step,
            },
            Block::new(),
        );
        Ok(())
    }

    fn tfor_prep(&mut self, pc: usize, insn: &Instruction) -> Result<()> {
        let a = insn.a;
        let call_pc = pc as i64 + 1 + insn.bx as i64;
        let count = usize::try_from(call_pc)
            .ok()
            .and_then(|call| self.code.get(call))
            .filter(|call| call.is(OpCode::TForCall))
            .map_or(1, |call| call.c.max(1) as usize);
        self.check_register(a as usize + 3 + count, pc)?;

        let vars = (0..count)
            .map(|n| self.tracker.names().register(a + 4 + n as u8, pc + 1))
            .collect();
        let iterators = match self.tracker.take_top() {
            Some((top, expr)) if top >= a => {
                let mut values = self.read_range(a, (top - a) as usize, pc)?;
                values.push(expr);
                values
            }
            other => {
                if let Some((_, expr)) = other {
                    self.emit(Stmt::Expr(expr));
                }
                let mut values = self.read_range(a, 3, pc)?;
                while values.len() > 1 && values.last().is_some_and(Expr::is_nil) {
                    values.pop();
                }
                values
            }
        };
        self.flush_all_after(pc);
        // TFORCALL, TFORLOOP, then the exit.
        let end = (call_pc + 2).max(pc as i64 + 1) as usize;
        self.push_block(
            BlockKind::Loop,
            pc,
            end,
            end,
            Construct::ForIn { vars, iterators },
            Block::new(),
        );
        Ok(())
    }

    fn close_loop(&mut self, pc: usize) {
        let Some(idx) = self.stack.iter().rposition(|b| b.kind == BlockKind::Loop) else {
            warn!(pc, "loop instruction without an open loop");
            return;
        };
        if self.stack[idx].end_pc != pc + 1 {
            warn!(pc, end = self.stack[idx].end_pc, "loop instruction does not end its loop");
            return;
        }
        while self.stack.len() > idx + 1 {
            self.flush_all(&[pc]);
            self.pop_block();
        }
        self.flush_all(&[pc]);
        self.pop_block();
    }
}

/// Rewrite `goto exit` into `break`, outside nested loops.
fn gotos_to_breaks(block: &mut Block, exit: &str) {
    for stmt in &mut block.stmts {
        match stmt {
            Stmt::Goto(label) if label == exit => *stmt = Stmt::Break,
            Stmt::If { clauses } => {
                for clause in clauses {
                    gotos_to_breaks(&mut clause.body, exit);
                }
            }
            Stmt::Block(inner) => gotos_to_breaks(inner, exit),
            _ => {}
        }
    }
}
