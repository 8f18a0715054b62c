use crate::expr::Expr;

/// A sequence of statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}

/// A statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `do ... end`
    Block(Block),

    /// `[local] t1, t2, ... = v1, v2, ...`
    Assignment {
        targets: Vec<Expr>,
        values: Vec<Expr>,
        is_local: bool,
    },

    /// `if c then ... elseif c then ... else ... end`.
    /// Only the last clause may lack a condition (the `else`).
    If { clauses: Vec<IfClause> },

    While { condition: Expr, body: Block },

    Repeat { body: Block, condition: Expr },

    /// `for var = start, limit[, step] do ... end`
    ForNum {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },

    /// `for v1, v2 in iterators do ... end`
    ForIn {
        vars: Vec<String>,
        iterators: Vec<Expr>,
        body: Block,
    },

    /// `[local] function name(...) ... end`
    Function(FunctionDecl),

    Return { values: Vec<Expr> },

    Break,

    /// `::name::`
    Label(String),

    Goto(String),

    /// Expression evaluated for its effect (calls).
    Expr(Expr),

    /// `-- text`, for constructs that could not be decompiled.
    Comment(String),
}

/// One arm of an `if` chain.
#[derive(Debug, Clone, PartialEq)]
pub struct IfClause {
    /// `None` marks the trailing `else`.
    pub condition: Option<Expr>,
    pub body: Block,
}

/// A function, named (statement form) or anonymous (inside `Expr::Closure`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionDecl {
    /// Dotted name, with `:` before the last segment for methods.
    pub name: Option<String>,
    pub is_local: bool,
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Block,
}

impl Stmt {
    pub fn assign(target: Expr, value: Expr) -> Self {
        Stmt::Assignment {
            targets: vec![target],
            values: vec![value],
            is_local: false,
        }
    }

    pub fn local(target: Expr, value: Expr) -> Self {
        Stmt::Assignment {
            targets: vec![target],
            values: vec![value],
            is_local: true,
        }
    }
}
