use crate::ident::is_identifier;
use crate::stmt::FunctionDecl;
use crate::types::{BinOp, Literal, UnOp};

/// An expression node.
///
/// Field and index access share `Binary { op: BinOp::Index, .. }`; whether it
/// prints as `a.b` or `a[b]` is decided by the renderer from the key.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),

    /// A named local, global or upvalue.
    Variable { name: String, is_upvalue: bool },

    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary { op: UnOp, operand: Box<Expr> },

    /// `callee(args)`, or `callee:method(args)` when `method` is set.
    Call {
        callee: Box<Expr>,
        method: Option<String>,
        args: Vec<Expr>,
    },

    /// Table constructor `{ ... }`.
    Table { fields: Vec<TableField> },

    /// Anonymous `function ... end`.
    Closure(Box<FunctionDecl>),

    /// `...`
    VarArg,
}

/// One field of a table constructor. Positional fields have no key.
#[derive(Debug, Clone, PartialEq)]
pub struct TableField {
    pub key: Option<Expr>,
    pub value: Expr,
}

impl Expr {
    pub fn nil() -> Self {
        Expr::Literal(Literal::Nil)
    }

    pub fn boolean(value: bool) -> Self {
        Expr::Literal(Literal::Boolean(value))
    }

    pub fn number(value: f64) -> Self {
        Expr::Literal(Literal::Number(value))
    }

    pub fn integer(value: i64) -> Self {
        Expr::Literal(Literal::Integer(value))
    }

    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        Expr::Literal(Literal::String(bytes.into()))
    }

    pub fn local(name: impl Into<String>) -> Self {
        Expr::Variable {
            name: name.into(),
            is_upvalue: false,
        }
    }

    pub fn upvalue(name: impl Into<String>) -> Self {
        Expr::Variable {
            name: name.into(),
            is_upvalue: true,
        }
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn index(base: Expr, key: Expr) -> Self {
        Expr::binary(BinOp::Index, base, key)
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            method: None,
            args,
        }
    }

    /// Whether this is the global environment table `_ENV`.
    pub fn is_env(&self) -> bool {
        matches!(self, Expr::Variable { name, .. } if name == "_ENV")
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Expr::Literal(Literal::Nil))
    }

    /// Apply `not` to a condition, folding double negation and flipping
    /// comparisons.
    pub fn negate(self) -> Expr {
        match self {
            Expr::Unary {
                op: UnOp::Not,
                operand,
            } => *operand,
            Expr::Binary { op, left, right } => match op.negate_comparison() {
                Some(negated) => Expr::Binary {
                    op: negated,
                    left,
                    right,
                },
                None => Expr::unary(UnOp::Not, Expr::Binary { op, left, right }),
            },
            Expr::Literal(Literal::Boolean(b)) => Expr::boolean(!b),
            other => Expr::unary(UnOp::Not, other),
        }
    }

    /// The dotted source name this expression denotes, if it is a chain of
    /// identifier-keyed field reads rooted at a variable (`a.b.c`). Reads
    /// through `_ENV` yield the bare global name.
    pub fn dotted_name(&self) -> Option<String> {
        match self {
            Expr::Variable { name, .. } => Some(name.clone()),
            Expr::Binary {
                op: BinOp::Index,
                left,
                right,
            } => {
                let Expr::Literal(Literal::String(key)) = right.as_ref() else {
                    return None;
                };
                if !is_identifier(key) {
                    return None;
                }
                let key = String::from_utf8_lossy(key);
                if left.is_env() {
                    return Some(key.into_owned());
                }
                Some(format!("{}.{}", left.dotted_name()?, key))
            }
            _ => None,
        }
    }

    /// Visit this expression and all sub-expressions, stopping at closure
    /// boundaries.
    pub fn any(&self, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Expr::Binary { left, right, .. } => left.any(pred) || right.any(pred),
            Expr::Unary { operand, .. } => operand.any(pred),
            Expr::Call { callee, args, .. } => {
                callee.any(pred) || args.iter().any(|arg| arg.any(pred))
            }
            Expr::Table { fields } => fields.iter().any(|field| {
                field.key.as_ref().is_some_and(|key| key.any(pred)) || field.value.any(pred)
            }),
            Expr::Literal(_) | Expr::Variable { .. } | Expr::Closure(_) | Expr::VarArg => false,
        }
    }

    /// Whether the expression reads the variable `name`.
    pub fn reads_variable(&self, name: &str) -> bool {
        self.any(&mut |e| matches!(e, Expr::Variable { name: n, .. } if n == name))
    }
}
