//! Per-register pending expressions.
//!
//! A register write that is side-effect free is held back instead of being
//! assigned to a variable, so that its consumer can inline it. Anything
//! still held at a block boundary is materialized as an assignment, as is an
//! inlined value whose register is read again later.

use moonlift_ast::{BinOp, Expr, Stmt};

use crate::liveness::Liveness;
use crate::names::Names;

#[derive(Debug, Clone)]
struct Pending {
    expr: Expr,
    /// Variable the value is assigned to if it has to be materialized.
    target: Expr,
    /// Whether a consumer has already inlined the value.
    read: bool,
    /// Materialize as a `local` declaration.
    declare: bool,
}

/// Register expression tracker for one function body.
#[derive(Debug)]
pub struct Tracker {
    names: Names,
    slots: Vec<Option<Pending>>,
    /// Registers whose latest value was assigned to their synthetic name.
    synthetic: Vec<bool>,
    /// Open multi-result value (CALL/VARARG with C=0) and its base register.
    top: Option<(u8, Expr)>,
    liveness: Liveness,
}

/// Whether `expr` may be duplicated into its consumers.
pub fn is_inlinable(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(_) | Expr::Variable { .. } => true,
        Expr::Unary { operand, .. } => is_inlinable(operand),
        Expr::Binary { left, right, .. } => is_inlinable(left) && is_inlinable(right),
        Expr::Call { .. } | Expr::Table { .. } | Expr::Closure(_) | Expr::VarArg => false,
    }
}

/// Whether a later store or call could change the value of `expr`.
fn is_volatile(expr: &Expr) -> bool {
    expr.any(&mut |e| {
        matches!(
            e,
            Expr::Binary {
                op: BinOp::Index,
                ..
            } | Expr::Variable {
                is_upvalue: true,
                ..
            }
        )
    })
}

fn materialize(pending: Pending) -> Stmt {
    Stmt::Assignment {
        targets: vec![pending.target],
        values: vec![pending.expr],
        is_local: pending.declare,
    }
}

impl Tracker {
    pub fn new(names: Names, registers: usize) -> Self {
        Self {
            names,
            slots: vec![None; registers],
            synthetic: vec![false; registers],
            top: None,
            liveness: Liveness::default(),
        }
    }

    /// Use `liveness` to decide whether inlined values are read again.
    /// Without it every inlined value is treated as dead.
    pub fn with_liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = liveness;
        self
    }

    pub fn names(&self) -> &Names {
        &self.names
    }

    fn slot(&mut self, reg: u8) -> &mut Option<Pending> {
        let idx = reg as usize;
        if idx >= self.slots.len() {
            self.slots.resize(idx + 1, None);
            self.synthetic.resize(idx + 1, false);
        }
        &mut self.slots[idx]
    }

    fn mark_synthetic(&mut self, reg: u8, value: bool) {
        self.slot(reg);
        self.synthetic[reg as usize] = value;
    }

    /// The value of `reg` as read at `pc`: a copy of the pending expression
    /// (which stays pending) or the register's variable.
    pub fn get(&mut self, reg: u8, pc: usize) -> Expr {
        if let Some(pending) = self.slot(reg) {
            pending.read = true;
            return pending.expr.clone();
        }
        self.names.variable(reg, pc)
    }

    /// The pending expression of `reg`, without marking it read.
    pub fn peek(&self, reg: u8) -> Option<&Expr> {
        self.slots.get(reg as usize)?.as_ref().map(|p| &p.expr)
    }

    /// Record the write of `expr` into `reg` by the instruction at `pc`.
    pub fn set(&mut self, reg: u8, expr: Expr, pc: usize, out: &mut Vec<Stmt>) {
        let target = self.names.target(reg, pc);
        if let Expr::Variable { name, .. } = &target {
            let name = name.clone();
            self.flush_readers(&name, Some(reg), pc, out);
        }
        // An unread previous value is dead.
        *self.slot(reg) = None;

        if self.names.starts_at(reg, pc + 1) {
            // Declared together with its siblings at the next instruction.
            *self.slot(reg) = Some(Pending {
                expr,
                target,
                read: false,
                declare: true,
            });
            self.mark_synthetic(reg, false);
            return;
        }
        let named = self.names.debug_name(reg, pc + 1).is_some();
        if named || !is_inlinable(&expr) {
            out.push(Stmt::assign(target, expr));
            self.mark_synthetic(reg, !named);
            return;
        }
        *self.slot(reg) = Some(Pending {
            expr,
            target,
            read: false,
            declare: false,
        });
        self.mark_synthetic(reg, false);
    }

    /// Hold `expr` in `reg` regardless of inlinability. Used for values
    /// consumed exactly once by an enclosing construct (table fields).
    pub fn set_pending(&mut self, reg: u8, expr: Expr, pc: usize) {
        let target = self.names.target(reg, pc);
        *self.slot(reg) = Some(Pending {
            expr,
            target,
            read: false,
            declare: false,
        });
        self.mark_synthetic(reg, false);
    }

    /// Forget the contents of `reg` without emitting anything. The register
    /// now holds an ordinary named value.
    pub fn clear(&mut self, reg: u8) {
        *self.slot(reg) = None;
        self.mark_synthetic(reg, false);
    }

    /// Record that `reg` was assigned by an emitted statement, to its
    /// synthetic name when `synthetic` is set.
    pub fn assigned(&mut self, reg: u8, synthetic: bool) {
        *self.slot(reg) = None;
        self.mark_synthetic(reg, synthetic);
    }

    /// Materialize pending values that read the variable `name`, before it
    /// is overwritten by the instruction at `pc`.
    pub fn flush_readers(
        &mut self,
        name: &str,
        except: Option<u8>,
        pc: usize,
        out: &mut Vec<Stmt>,
    ) {
        self.flush_where(
            |reg, p| Some(reg) != except && p.expr.reads_variable(name),
            |liveness, reg| liveness.is_live_after(reg, pc),
            out,
        );
    }

    /// Materialize pending values that read tables or upvalues, before the
    /// call or store at `pc` that may change them.
    pub fn flush_volatile(&mut self, pc: usize, out: &mut Vec<Stmt>) {
        self.flush_where(
            |_, p| is_volatile(&p.expr),
            |liveness, reg| liveness.is_live_after(reg, pc),
            out,
        );
    }

    /// Emit the pending value of `reg`, if any, as an assignment and clear
    /// the slot.
    pub fn flush(&mut self, reg: u8, out: &mut Vec<Stmt>) {
        if let Some(pending) = self.slot(reg).take() {
            self.mark_synthetic(reg, !pending.declare);
            out.push(materialize(pending));
        }
    }

    /// Flush every register and any open multi-result value, with execution
    /// resuming at each of `from`.
    pub fn flush_all(&mut self, from: &[usize], out: &mut Vec<Stmt>) {
        self.flush_where(|_, _| true, |liveness, reg| liveness.is_live(reg, from), out);
        self.flush_top(out);
    }

    /// Flush every register and any open multi-result value, with execution
    /// resuming after the instruction at `pc`.
    pub fn flush_all_after(&mut self, pc: usize, out: &mut Vec<Stmt>) {
        self.flush_where(|_, _| true, |liveness, reg| liveness.is_live_after(reg, pc), out);
        self.flush_top(out);
    }

    fn flush_top(&mut self, out: &mut Vec<Stmt>) {
        if let Some((_, expr)) = self.top.take() {
            out.push(Stmt::Expr(expr));
        }
    }

    /// Clear the slots selected by `hit`. An unread value is emitted; an
    /// inlined one only if `live` says its register is read again.
    fn flush_where(
        &mut self,
        hit: impl Fn(u8, &Pending) -> bool,
        live: impl Fn(&Liveness, u8) -> bool,
        out: &mut Vec<Stmt>,
    ) {
        for idx in 0..self.slots.len() {
            let reg = idx as u8;
            if !self.slots[idx].as_ref().is_some_and(|p| hit(reg, p)) {
                continue;
            }
            let Some(pending) = self.slots[idx].take() else {
                continue;
            };
            if !pending.read || pending.declare || live(&self.liveness, reg) {
                self.synthetic[idx] = !pending.declare;
                out.push(materialize(pending));
            }
        }
    }

    /// Declare the named locals whose scope opens at `pc` from the values
    /// their registers hold, as one `local` statement.
    pub fn declare_locals(&mut self, pc: usize, out: &mut Vec<Stmt>) {
        let mut targets = Vec::new();
        let mut values = Vec::new();
        for (reg, name) in self.names.locals_starting_at(pc) {
            if let Some(pending) = self.slot(reg).take() {
                targets.push(Expr::local(name));
                values.push(pending.expr);
            } else if self.synthetic.get(reg as usize).copied().unwrap_or(false) {
                targets.push(Expr::local(name));
                values.push(Expr::local(self.names.synthetic(reg)));
                self.mark_synthetic(reg, false);
            }
        }
        if !targets.is_empty() {
            out.push(Stmt::Assignment {
                targets,
                values,
                is_local: true,
            });
        }
    }

    /// Open a multi-result value based at `reg`. A previous one that was
    /// never consumed is emitted as a statement.
    pub fn set_top(&mut self, reg: u8, expr: Expr, out: &mut Vec<Stmt>) {
        if let Some((_, old)) = self.top.replace((reg, expr)) {
            out.push(Stmt::Expr(old));
        }
    }

    pub fn take_top(&mut self) -> Option<(u8, Expr)> {
        self.top.take()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.top.is_none() && self.slots.iter().all(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moonlift_bytecode::proto::{LocalVar, Prototype};

    fn tracker(locals: Vec<LocalVar>) -> Tracker {
        let proto = Prototype {
            num_params: 1,
            max_stack_size: 8,
            local_vars: locals,
            ..Prototype::default()
        };
        Tracker::new(Names::new(&proto), 8)
    }

    #[test]
    fn test_get_returns_copy_and_keeps_slot() {
        let mut t = tracker(vec![]);
        let mut out = Vec::new();
        t.set(1, Expr::number(2.0), 0, &mut out);
        assert!(out.is_empty());
        assert_eq!(t.get(1, 1), Expr::number(2.0));
        assert_eq!(t.get(1, 2), Expr::number(2.0));
        assert_eq!(t.get(2, 2), Expr::local("v2"));
        assert_eq!(t.get(0, 2), Expr::local("P0"));
    }

    #[test]
    fn test_unread_value_is_dropped_on_overwrite() {
        let mut t = tracker(vec![]);
        let mut out = Vec::new();
        t.set(1, Expr::number(1.0), 0, &mut out);
        t.set(1, Expr::number(2.0), 1, &mut out);
        t.flush_all(&[], &mut out);
        assert_eq!(out, vec![Stmt::assign(Expr::local("v1"), Expr::number(2.0))]);
        assert!(t.is_empty());
    }

    #[test]
    fn test_flush_all_skips_consumed_values() {
        let mut t = tracker(vec![]);
        let mut out = Vec::new();
        t.set(1, Expr::local("P0"), 0, &mut out);
        let _ = t.get(1, 1);
        t.set(2, Expr::string("x"), 1, &mut out);
        t.flush_all(&[], &mut out);
        assert_eq!(out, vec![Stmt::assign(Expr::local("v2"), Expr::string("x"))]);
        assert!(t.is_empty());
    }

    #[test]
    fn test_consumed_value_kept_when_read_again() {
        use moonlift_bytecode::{Instruction, OpCode};

        // 0 LOADI 1 2; 1 MOVE 2 1; 2 RETURN1 1
        let code = vec![
            Instruction::abx(OpCode::LoadI, 1, 2),
            Instruction::abc(OpCode::Move, 2, 1, 0, false),
            Instruction::abc(OpCode::Return1, 1, 2, 1, false),
        ];
        let mut t = tracker(vec![]).with_liveness(Liveness::new(&code, &[]));
        let mut out = Vec::new();
        t.set(1, Expr::integer(2), 0, &mut out);
        assert_eq!(t.get(1, 1), Expr::integer(2));
        t.flush_all(&[2], &mut out);
        assert_eq!(out, vec![Stmt::assign(Expr::local("v1"), Expr::integer(2))]);
        assert_eq!(t.get(1, 2), Expr::local("v1"));
    }

    #[test]
    fn test_flush_single_register() {
        let mut t = tracker(vec![]);
        let mut out = Vec::new();
        t.set(1, Expr::integer(3), 0, &mut out);
        let _ = t.get(1, 1);
        t.flush(1, &mut out);
        t.flush(2, &mut out);
        assert_eq!(out, vec![Stmt::assign(Expr::local("v1"), Expr::integer(3))]);
        assert!(t.is_empty());
    }

    #[test]
    fn test_non_inlinable_is_materialized() {
        let mut t = tracker(vec![]);
        let mut out = Vec::new();
        let call = Expr::call(Expr::local("f"), vec![]);
        t.set(2, call.clone(), 4, &mut out);
        assert_eq!(out, vec![Stmt::assign(Expr::local("v2"), call)]);
        assert_eq!(t.get(2, 5), Expr::local("v2"));
    }

    #[test]
    fn test_named_local_write_is_materialized() {
        let mut t = tracker(vec![LocalVar {
            name: "x".into(),
            start_pc: 0,
            end_pc: 10,
        }]);
        let mut out = Vec::new();
        t.set(0, Expr::number(5.0), 3, &mut out);
        assert_eq!(out, vec![Stmt::assign(Expr::local("x"), Expr::number(5.0))]);
    }

    #[test]
    fn test_locals_declared_together() {
        let locals = vec![
            LocalVar {
                name: "a".into(),
                start_pc: 2,
                end_pc: 9,
            },
            LocalVar {
                name: "b".into(),
                start_pc: 2,
                end_pc: 9,
            },
        ];
        let mut t = tracker(locals);
        let mut out = Vec::new();
        t.set(0, Expr::number(1.0), 0, &mut out);
        t.set(1, Expr::number(2.0), 1, &mut out);
        assert!(out.is_empty());
        t.declare_locals(2, &mut out);
        assert_eq!(
            out,
            vec![Stmt::Assignment {
                targets: vec![Expr::local("a"), Expr::local("b")],
                values: vec![Expr::number(1.0), Expr::number(2.0)],
                is_local: true,
            }]
        );
        assert_eq!(t.get(0, 3), Expr::local("a"));
    }

    #[test]
    fn test_write_flushes_pending_readers() {
        let mut t = tracker(vec![LocalVar {
            name: "x".into(),
            start_pc: 0,
            end_pc: 10,
        }]);
        let mut out = Vec::new();
        let sum = Expr::binary(BinOp::Add, Expr::local("x"), Expr::number(1.0));
        t.set(3, sum.clone(), 1, &mut out);
        t.set(0, Expr::number(9.0), 2, &mut out);
        assert_eq!(
            out,
            vec![
                Stmt::assign(Expr::local("v3"), sum),
                Stmt::assign(Expr::local("x"), Expr::number(9.0)),
            ]
        );
    }

    #[test]
    fn test_volatile_reads_flushed_before_side_effects() {
        let mut t = tracker(vec![]);
        let mut out = Vec::new();
        let field = Expr::index(Expr::local("t"), Expr::string("k"));
        t.set(2, field.clone(), 0, &mut out);
        t.set(3, Expr::number(1.0), 1, &mut out);
        t.flush_volatile(1, &mut out);
        assert_eq!(out, vec![Stmt::assign(Expr::local("v2"), field)]);
        assert_eq!(t.peek(3), Some(&Expr::number(1.0)));
    }

    #[test]
    fn test_unconsumed_top_becomes_statement() {
        let mut t = tracker(vec![]);
        let mut out = Vec::new();
        let call = Expr::call(Expr::local("f"), vec![]);
        t.set_top(1, call.clone(), &mut out);
        t.flush_all(&[], &mut out);
        assert_eq!(out, vec![Stmt::Expr(call)]);
    }

    #[test]
    fn test_inlinable_predicate() {
        assert!(is_inlinable(&Expr::binary(
            BinOp::Add,
            Expr::local("a"),
            Expr::unary(moonlift_ast::UnOp::Minus, Expr::number(1.0))
        )));
        assert!(!is_inlinable(&Expr::VarArg));
        assert!(!is_inlinable(&Expr::Table { fields: vec![] }));
        assert!(!is_inlinable(&Expr::binary(
            BinOp::Add,
            Expr::call(Expr::local("f"), vec![]),
            Expr::number(1.0)
        )));
    }
}
