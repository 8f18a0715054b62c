//! Multi-instruction idioms recognized by looking past the current
//! instruction: table constructors and named function definitions.

use moonlift_ast::{is_identifier, Expr, FunctionDecl, Stmt, TableField};
use moonlift_bytecode::constant::Constant;
use moonlift_bytecode::{Instruction, OpCode};
use tracing::debug;

use super::conditions::is_pure_load;
use super::{Result, Structurer};

impl<'a> Structurer<'a> {
    /// Whether the instruction at `pc` computes a field value for the
    /// table being built in `table`.
    fn feeds(&self, pc: usize, table: u8) -> bool {
        let insn = self.code[pc];
        let Some(op) = insn.opcode() else {
            return false;
        };
        if op.is_test() {
            return self.boolean_pattern(pc).is_some_and(|reg| reg > table)
                || (self.value_testset_end(pc).is_some() && insn.a > table);
        }
        if insn.a <= table {
            return false;
        }
        match op {
            OpCode::Call | OpCode::VarArg => matches!(insn.c, 0 | 2),
            OpCode::LoadKX | OpCode::NewTable | OpCode::Self_ | OpCode::Closure => true,
            _ => is_pure_load(op),
        }
    }

    /// NEWTABLE at `pc` and the field stores that fill it, as one table
    /// constructor.
    pub(super) fn table_constructor(&mut self, pc: usize) -> Result<usize> {
        let table = self.code[pc].a;
        self.check_register(table as usize, pc)?;
        let mut fields = Vec::new();
        let mut next = pc + 1;

        self.feeding += 1;
        let scanned = self.constructor_fields(table, &mut next, &mut fields);
        self.feeding -= 1;
        scanned?;

        debug!(pc, fields = fields.len(), consumed = next - pc, "table constructor");
        self.write(table, Expr::Table { fields }, next - 1)?;
        Ok(next - pc)
    }

    fn constructor_fields(
        &mut self,
        table: u8,
        next: &mut usize,
        fields: &mut Vec<TableField>,
    ) -> Result<()> {
        while *next < self.code.len() {
            let pc = *next;
            if self.jumps.is_target(pc) {
                break;
            }
            let insn = self.code[pc];
            match insn.opcode() {
                Some(OpCode::ExtraArg | OpCode::MmBin | OpCode::MmBinI | OpCode::MmBinK) => {
                    *next += 1;
                }
                Some(OpCode::SetField) if insn.a == table => {
                    let key = self.constant(insn.b as usize, pc)?;
                    let value = self.rk(&insn, pc)?;
                    fields.push(TableField {
                        key: Some(key),
                        value,
                    });
                    *next += 1;
                }
                Some(OpCode::SetI) if insn.a == table => {
                    let value = self.rk(&insn, pc)?;
                    fields.push(TableField {
                        key: Some(Expr::integer(insn.b as i64)),
                        value,
                    });
                    *next += 1;
                }
                Some(OpCode::SetTable) if insn.a == table => {
                    let key = self.read(insn.b, pc)?;
                    let value = self.rk(&insn, pc)?;
                    fields.push(TableField {
                        key: Some(key),
                        value,
                    });
                    *next += 1;
                }
                Some(OpCode::SetList) if insn.a == table => {
                    let values = if insn.b == 0 {
                        self.read_open(table + 1, pc)?
                    } else {
                        self.read_range(table + 1, insn.b as usize, pc)?
                    };
                    fields.extend(values.into_iter().map(|value| TableField { key: None, value }));
                    *next += 1 + insn.k as usize;
                }
                _ if self.feeds(pc, table) => {
                    *next += self.dispatch(pc)?.max(1);
                }
                _ => break,
            }
        }
        Ok(())
    }

    fn identifier_constant(&self, index: usize) -> Option<String> {
        match self.proto.constants.get(index)? {
            Constant::String(bytes) if is_identifier(bytes) => String::from_utf8(bytes.clone()).ok(),
            _ => None,
        }
    }

    /// CLOSURE at `pc`, named after the variable or field it is stored
    /// into when that store follows immediately.
    pub(super) fn closure(&mut self, pc: usize, insn: &Instruction) -> Result<usize> {
        let reg = insn.a;
        self.check_register(reg as usize, pc)?;
        let mut decl = self.lift_child(pc, insn.bx as usize)?;
        if self.feeding > 0 {
            self.write(reg, Expr::Closure(Box::new(decl)), pc)?;
            return Ok(1);
        }

        let names = self.tracker.names();
        let named = match names.debug_name(reg, pc) {
            Some(name) => Some((name.to_owned(), names.starts_at(reg, pc))),
            // `local function f` brings `f` into scope right after the
            // closure, like a lone `local f = function`.
            None if names.starts_at(reg, pc + 1) && names.locals_starting_at(pc + 1).len() == 1 => {
                Some((names.register(reg, pc + 1), true))
            }
            None => None,
        };
        if let Some((name, is_local)) = named {
            if !is_local {
                self.flush_readers(&name, pc);
            }
            self.tracker.assigned(reg, false);
            decl.name = Some(name);
            decl.is_local = is_local;
            self.define(decl);
            return Ok(1);
        }

        let next = self
            .code
            .get(pc + 1)
            .copied()
            .filter(|_| !self.jumps.is_target(pc + 1));
        if let Some(next) = next {
            if let Some(consumed) = self.named_by_store(pc, reg, &next, &mut decl)? {
                self.define(decl);
                return Ok(consumed);
            }
        }

        self.write(reg, Expr::Closure(Box::new(decl)), pc)?;
        Ok(1)
    }

    /// Name `decl` after the store `next` of register `reg`, if it is one.
    /// Sets `decl.name` and returns the instructions consumed.
    fn named_by_store(
        &mut self,
        pc: usize,
        reg: u8,
        next: &Instruction,
        decl: &mut FunctionDecl,
    ) -> Result<Option<usize>> {
        match next.opcode() {
            Some(OpCode::SetTabUp) if !next.k && next.c == reg => {
                let Some(field) = self.identifier_constant(next.b as usize) else {
                    return Ok(None);
                };
                let table = self.upvalue(next.a as usize, pc + 1)?;
                let name = if table.is_env() {
                    field
                } else {
                    match table.dotted_name() {
                        Some(base) => format!("{base}.{field}"),
                        None => return Ok(None),
                    }
                };
                self.flush_volatile(pc + 1);
                decl.name = Some(name);
                Ok(Some(2))
            }
            Some(OpCode::Move) if next.b == reg => {
                let target = next.a;
                let Some(name) = self
                    .tracker
                    .names()
                    .debug_name(target, pc + 2)
                    .map(str::to_owned)
                else {
                    return Ok(None);
                };
                self.check_register(target as usize, pc + 1)?;
                let is_local = self.tracker.names().starts_at(target, pc + 2);
                if !is_local {
                    self.flush_readers(&name, pc + 1);
                }
                self.tracker.assigned(target, false);
                decl.name = Some(name);
                decl.is_local = is_local;
                Ok(Some(2))
            }
            Some(OpCode::SetField) if !next.k && next.c == reg => {
                let Some(field) = self.identifier_constant(next.b as usize) else {
                    return Ok(None);
                };
                let Some(base) = self.read(next.a, pc + 1)?.dotted_name() else {
                    return Ok(None);
                };
                let name = if decl.params.first().map(String::as_str) == Some("self") {
                    decl.params.remove(0);
                    format!("{base}:{field}")
                } else {
                    format!("{base}.{field}")
                };
                self.flush_volatile(pc + 1);
                decl.name = Some(name);
                Ok(Some(2))
            }
            _ => Ok(None),
        }
    }

    fn define(&mut self, decl: FunctionDecl) {
        debug!(name = decl.name.as_deref().unwrap_or(""), is_local = decl.is_local, "function definition");
        self.emit(Stmt::Function(decl));
    }
}
