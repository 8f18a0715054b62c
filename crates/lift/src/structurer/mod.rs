//! Single-pass structuring of a function body into statements.
//!
//! The structurer walks the instruction stream once, keeping an explicit
//! stack of open control constructs. Each stack entry owns the construct
//! under construction and the block being filled; popping seals the body
//! into the construct and appends it to the parent block.

mod conditions;
mod lookahead;
mod opcodes;

use std::mem;

use moonlift_ast::{Block, Expr, FunctionDecl, IfClause, Stmt};
use moonlift_bytecode::constant::Constant;
use moonlift_bytecode::{Backend, Instruction, OpCode, Prototype};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::DecompileError;
use crate::jumps::{JumpAnalysis, TargetKind};
use crate::liveness::Liveness;
use crate::names::Names;
use crate::tracker::Tracker;
use crate::LiftContext;

pub(crate) type Result<T> = std::result::Result<T, DecompileError>;

/// Longest JMP-to-JMP chain followed when resolving a final target.
const MAX_JUMP_CHAIN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    If,
    While,
    Repeat,
    /// Numeric or generic `for`.
    Loop,
}

#[derive(Debug)]
enum Construct {
    If {
        clauses: Vec<IfClause>,
        /// Condition of the clause being filled; `None` once in `else`.
        condition: Option<Expr>,
    },
    While {
        condition: Expr,
    },
    Repeat {
        condition: Option<Expr>,
    },
    ForNum {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
    },
    ForIn {
        vars: Vec<String>,
        iterators: Vec<Expr>,
    },
}

/// An entry of the block stack.
#[derive(Debug)]
struct OpenBlock {
    id: usize,
    kind: BlockKind,
    start_pc: usize,
    /// First instruction index past the construct.
    end_pc: usize,
    /// Where a `break` out of this loop lands.
    exit_pc: usize,
    construct: Construct,
    body: Block,
}

impl OpenBlock {
    fn seal(self) -> Stmt {
        let body = self.body;
        match self.construct {
            Construct::If {
                mut clauses,
                condition,
            } => {
                clauses.push(IfClause { condition, body });
                Stmt::If { clauses }
            }
            Construct::While { condition } => Stmt::While { condition, body },
            Construct::Repeat { condition } => Stmt::Repeat {
                body,
                condition: condition.unwrap_or_else(|| Expr::boolean(true)),
            },
            Construct::ForNum {
                var,
                start,
                limit,
                step,
            } => Stmt::ForNum {
                var,
                start,
                limit,
                step,
                body,
            },
            Construct::ForIn { vars, iterators } => Stmt::ForIn {
                vars,
                iterators,
                body,
            },
        }
    }
}

/// Position in a block right after a label was emitted.
#[derive(Debug, Clone, Copy)]
struct Mark {
    block: usize,
    len: usize,
}

pub(crate) struct Structurer<'a> {
    proto: &'a Prototype,
    backend: &'a dyn Backend,
    ctx: &'a mut LiftContext,
    path: Vec<usize>,
    code: Vec<Instruction>,
    jumps: JumpAnalysis,
    tracker: Tracker,
    stack: Vec<OpenBlock>,
    root: Block,
    next_block_id: usize,
    marks: FxHashMap<usize, Mark>,
    /// SELF seen for this base register, with the method name.
    method: Option<(u8, String)>,
    /// Depth of table constructors being assembled.
    feeding: usize,
}

impl<'a> Structurer<'a> {
    pub(crate) fn new(
        proto: &'a Prototype,
        backend: &'a dyn Backend,
        ctx: &'a mut LiftContext,
        path: Vec<usize>,
    ) -> Self {
        let code: Vec<Instruction> = proto.code.iter().map(|&raw| backend.decode(raw)).collect();
        let jumps = JumpAnalysis::from_instructions(&code);
        let tracker = Tracker::new(Names::new(proto), proto.max_stack_size as usize)
            .with_liveness(Liveness::new(&code, &proto.protos));
        Self {
            proto,
            backend,
            ctx,
            path,
            code,
            jumps,
            tracker,
            stack: Vec::new(),
            root: Block::new(),
            next_block_id: 1,
            marks: FxHashMap::default(),
            method: None,
            feeding: 0,
        }
    }

    /// Structure the whole function. The block stack is empty on return.
    pub(crate) fn run(mut self) -> Result<FunctionDecl> {
        debug!(
            path = ?self.path,
            instructions = self.code.len(),
            targets = self.jumps.targets().len(),
            "structuring function"
        );
        let len = self.code.len();
        let mut pc = 0;
        while pc < len {
            self.declare_locals(pc);
            if self.jumps.is_target(pc) {
                self.flush_all(&[pc]);
            }
            self.close_blocks(pc);
            if self.jumps.kind(pc) == Some(TargetKind::Repeat) {
                self.open_repeat(pc);
            }
            self.emit_label(pc);
            pc += self.dispatch(pc)?.max(1);
        }

        self.declare_locals(len);
        self.flush_all(&[]);
        while !self.stack.is_empty() {
            self.flush_all(&[]);
            self.pop_block();
        }
        self.emit_label(len);

        let names = self.tracker.names();
        Ok(FunctionDecl {
            name: None,
            is_local: false,
            params: names.params(),
            is_vararg: self.proto.is_vararg,
            body: self.root,
        })
    }

    // ---- output ----

    fn current_id(&self) -> usize {
        self.stack.last().map_or(0, |b| b.id)
    }

    fn body(&mut self) -> &mut Block {
        match self.stack.last_mut() {
            Some(block) => &mut block.body,
            None => &mut self.root,
        }
    }

    fn emit(&mut self, stmt: Stmt) {
        self.body().push(stmt);
    }

    fn emit_all(&mut self, stmts: Vec<Stmt>) {
        self.body().stmts.extend(stmts);
    }

    fn emit_label(&mut self, pc: usize) {
        if let Some(label) = self.jumps.label(pc) {
            self.emit(Stmt::Label(label));
            let mark = Mark {
                block: self.current_id(),
                len: self.body().stmts.len(),
            };
            self.marks.insert(pc, mark);
        }
    }

    /// Flush the tracker with execution resuming at each of `from`.
    fn flush_all(&mut self, from: &[usize]) {
        let mut out = Vec::new();
        self.tracker.flush_all(from, &mut out);
        self.emit_all(out);
    }

    fn flush_all_after(&mut self, pc: usize) {
        let mut out = Vec::new();
        self.tracker.flush_all_after(pc, &mut out);
        self.emit_all(out);
    }

    fn flush_volatile(&mut self, pc: usize) {
        let mut out = Vec::new();
        self.tracker.flush_volatile(pc, &mut out);
        self.emit_all(out);
    }

    fn flush_readers(&mut self, name: &str, pc: usize) {
        let mut out = Vec::new();
        self.tracker.flush_readers(name, None, pc, &mut out);
        self.emit_all(out);
    }

    fn declare_locals(&mut self, pc: usize) {
        let mut out = Vec::new();
        self.tracker.declare_locals(pc, &mut out);
        self.emit_all(out);
    }

    // ---- operands ----

    fn check_register(&self, register: usize, pc: usize) -> Result<()> {
        if register >= self.proto.max_stack_size as usize {
            return Err(DecompileError::RegisterOutOfRange {
                pc,
                register,
                max_stack_size: self.proto.max_stack_size,
            });
        }
        Ok(())
    }

    fn read(&mut self, reg: u8, pc: usize) -> Result<Expr> {
        self.check_register(reg as usize, pc)?;
        Ok(self.tracker.get(reg, pc))
    }

    fn read_range(&mut self, from: u8, count: usize, pc: usize) -> Result<Vec<Expr>> {
        let mut values = Vec::with_capacity(count);
        for reg in from as usize..from as usize + count {
            self.check_register(reg, pc)?;
            values.push(self.tracker.get(reg as u8, pc));
        }
        Ok(values)
    }

    /// Values from `from` up to an open multi-result, or `...` when there
    /// is none.
    fn read_open(&mut self, from: u8, pc: usize) -> Result<Vec<Expr>> {
        match self.tracker.take_top() {
            Some((top, expr)) if top >= from => {
                let mut values = self.read_range(from, (top - from) as usize, pc)?;
                values.push(expr);
                Ok(values)
            }
            Some((_, expr)) => Ok(vec![expr]),
            None => Ok(vec![Expr::VarArg]),
        }
    }

    fn write(&mut self, reg: u8, expr: Expr, pc: usize) -> Result<()> {
        self.check_register(reg as usize, pc)?;
        if self.feeding > 0 {
            self.tracker.set_pending(reg, expr, pc);
            return Ok(());
        }
        let mut out = Vec::new();
        self.tracker.set(reg, expr, pc, &mut out);
        self.emit_all(out);
        Ok(())
    }

    fn constant(&self, index: usize, pc: usize) -> Result<Expr> {
        let constant = self
            .proto
            .constants
            .get(index)
            .ok_or(DecompileError::ConstantOutOfRange { pc, index })?;
        Ok(match constant {
            Constant::Nil => Expr::nil(),
            Constant::Boolean(b) => Expr::boolean(*b),
            Constant::Integer(n) => Expr::integer(*n),
            Constant::Float(n) => Expr::number(*n),
            Constant::String(bytes) => Expr::string(bytes.clone()),
        })
    }

    /// Operand C as constant (k set) or register.
    fn rk(&mut self, insn: &Instruction, pc: usize) -> Result<Expr> {
        if insn.k {
            self.constant(insn.c as usize, pc)
        } else {
            self.read(insn.c, pc)
        }
    }

    fn upvalue(&self, index: usize, pc: usize) -> Result<Expr> {
        if index >= self.proto.upvalues.len() {
            return Err(DecompileError::UpvalueOutOfRange { pc, index });
        }
        Ok(self.tracker.names().upvalue(index))
    }

    // ---- control flow helpers ----

    fn is_op(&self, pc: usize, op: OpCode) -> bool {
        self.code.get(pc).is_some_and(|insn| insn.is(op))
    }

    fn is_test(&self, pc: usize) -> bool {
        self.code
            .get(pc)
            .and_then(Instruction::opcode)
            .is_some_and(OpCode::is_test)
    }

    /// Whether the JMP at `pc` is unconditional (not the jump half of a test).
    fn is_plain_jump(&self, pc: usize) -> bool {
        self.is_op(pc, OpCode::Jmp) && !(pc > 0 && self.is_test(pc - 1))
    }

    fn jump_target(&self, pc: usize) -> i64 {
        pc as i64 + 1 + self.code[pc].bx as i64
    }

    /// Follow unconditional JMP chains from `target`.
    fn final_target(&self, mut target: i64) -> i64 {
        for _ in 0..MAX_JUMP_CHAIN {
            if target < 0 || !self.is_plain_jump(target as usize) {
                break;
            }
            target = self.jump_target(target as usize);
        }
        target
    }

    /// Exit of the innermost loop among the first `depth` stack entries.
    fn loop_exit(&self, depth: usize) -> Option<usize> {
        self.stack[..depth]
            .iter()
            .rev()
            .find(|b| b.kind != BlockKind::If)
            .map(|b| b.exit_pc)
    }

    /// Whether a jump to `target` leaves the innermost loop.
    fn is_loop_exit(&self, depth: usize, target: i64) -> bool {
        self.loop_exit(depth)
            .is_some_and(|exit| self.final_target(exit as i64) == self.final_target(target))
    }

    // ---- block stack ----

    fn push_block(
        &mut self,
        kind: BlockKind,
        start_pc: usize,
        end_pc: usize,
        exit_pc: usize,
        construct: Construct,
        body: Block,
    ) {
        debug!(?kind, start_pc, end_pc, "open block");
        let id = self.next_block_id;
        self.next_block_id += 1;
        self.stack.push(OpenBlock {
            id,
            kind,
            start_pc,
            end_pc,
            exit_pc,
            construct,
            body,
        });
    }

    fn pop_block(&mut self) {
        if let Some(block) = self.stack.pop() {
            debug!(kind = ?block.kind, start_pc = block.start_pc, "close block");
            let stmt = block.seal();
            self.emit(stmt);
        }
    }

    fn open_repeat(&mut self, pc: usize) {
        let exit = self.jumps.repeat_exit(pc).unwrap_or(usize::MAX);
        self.push_block(
            BlockKind::Repeat,
            pc,
            usize::MAX,
            exit,
            Construct::Repeat { condition: None },
            Block::new(),
        );
    }

    /// Close every block that ends at or before `pc`, turning an `if` whose
    /// then-part ends in a forward jump into its `else` part instead.
    fn close_blocks(&mut self, pc: usize) {
        while let Some(idx) = self
            .stack
            .iter()
            .position(|b| b.kind != BlockKind::Repeat && b.end_pc <= pc)
        {
            // An outer construct ending first closes everything inside it.
            while self.stack.len() > idx + 1 {
                self.flush_all(&[pc]);
                self.pop_block();
            }
            self.flush_all(&[pc]);
            if let Some(end) = self.else_transition(idx, pc) {
                self.begin_else(end);
                continue;
            }
            self.pop_block();
        }
    }

    /// If the `if` at stack index `idx` ends at `pc` with a jump over an
    /// `else` part, the end of that part.
    fn else_transition(&self, idx: usize, pc: usize) -> Option<usize> {
        let block = &self.stack[idx];
        let in_then = matches!(
            block.construct,
            Construct::If {
                condition: Some(_),
                ..
            }
        );
        if !in_then || pc == 0 || !self.is_plain_jump(pc - 1) {
            return None;
        }
        self.else_end(idx, pc - 1, self.jump_target(pc - 1))
    }

    /// Where the `else` part of the `if` at stack index `idx` ends, given
    /// the skip jump at `jmp_pc` to `target`.
    fn else_end(&self, idx: usize, jmp_pc: usize, target: i64) -> Option<usize> {
        if target > jmp_pc as i64 + 1 && !self.is_loop_exit(idx, target) {
            return Some(target as usize);
        }
        // A skip to the back-edge of an enclosing `while` is threaded to
        // the loop head; the else part then runs to the back-edge.
        let enclosing = self.stack[..idx]
            .iter()
            .rev()
            .find(|b| b.kind != BlockKind::If)?;
        if enclosing.kind == BlockKind::While
            && target == enclosing.start_pc as i64
            && enclosing.end_pc > jmp_pc + 2
        {
            return Some(enclosing.end_pc - 1);
        }
        None
    }

    fn begin_else(&mut self, end: usize) {
        let Some(block) = self.stack.last_mut() else {
            return;
        };
        debug!(start_pc = block.start_pc, end, "else transition");
        block.end_pc = end;
        let body = mem::take(&mut block.body);
        if let Construct::If { clauses, condition } = &mut block.construct {
            clauses.push(IfClause {
                condition: condition.take(),
                body,
            });
        }
    }

    /// Lift nested prototype `index`, created by the CLOSURE at `pc`.
    fn lift_child(&mut self, pc: usize, index: usize) -> Result<FunctionDecl> {
        let child = self
            .proto
            .protos
            .get(index)
            .ok_or(DecompileError::ProtoOutOfRange { pc, index })?;
        let mut path = self.path.clone();
        path.push(index);
        crate::lift_function(child, self.backend, self.ctx, path).map_err(|err| {
            DecompileError::Nested {
                pc,
                source: Box::new(err),
            }
        })
    }
}
