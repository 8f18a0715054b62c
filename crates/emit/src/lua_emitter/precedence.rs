use moonlift_ast::{BinOp, Expr, Literal};

/// Operator precedence levels (higher = binds tighter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct Precedence(pub(super) u8);

impl Precedence {
    pub(super) const OR: Self = Precedence(1);
    pub(super) const AND: Self = Precedence(2);
    pub(super) const COMPARE: Self = Precedence(3);
    pub(super) const BIT_OR: Self = Precedence(4);
    pub(super) const BIT_XOR: Self = Precedence(5);
    pub(super) const BIT_AND: Self = Precedence(6);
    pub(super) const SHIFT: Self = Precedence(7);
    pub(super) const CONCAT: Self = Precedence(8);
    pub(super) const ADD: Self = Precedence(9);
    pub(super) const MUL: Self = Precedence(10);
    pub(super) const UNARY: Self = Precedence(11);
    pub(super) const POW: Self = Precedence(12);

    pub(super) const POSTFIX: Self = Precedence(14);
    const ATOM: Self = Precedence(20);
}

pub(super) fn binop_precedence(op: BinOp) -> Precedence {
    match op {
        BinOp::Or => Precedence::OR,
        BinOp::And => Precedence::AND,
        BinOp::CompareEq
        | BinOp::CompareNe
        | BinOp::CompareLt
        | BinOp::CompareLe
        | BinOp::CompareGt
        | BinOp::CompareGe => Precedence::COMPARE,
        BinOp::BitOr => Precedence::BIT_OR,
        BinOp::BitXor => Precedence::BIT_XOR,
        BinOp::BitAnd => Precedence::BIT_AND,
        BinOp::Shl | BinOp::Shr => Precedence::SHIFT,
        BinOp::Concat => Precedence::CONCAT,
        BinOp::Add | BinOp::Sub => Precedence::ADD,
        BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => Precedence::MUL,
        BinOp::Pow => Precedence::POW,
        BinOp::Index => Precedence::POSTFIX,
    }
}

/// `..` and `^` group to the right; everything else to the left.
pub(super) fn is_right_assoc(op: BinOp) -> bool {
    matches!(op, BinOp::Concat | BinOp::Pow)
}

pub(super) fn expr_precedence(expr: &Expr) -> Precedence {
    match expr {
        Expr::Binary { op, .. } => binop_precedence(*op),
        Expr::Unary { .. } => Precedence::UNARY,
        // A negative literal prints with a leading minus.
        Expr::Literal(Literal::Number(n)) if n.is_sign_negative() && *n != 0.0 => Precedence::UNARY,
        Expr::Literal(Literal::Integer(n)) if *n < 0 => Precedence::UNARY,
        _ => Precedence::ATOM,
    }
}

/// Whether `expr` can stand before `.`, `[`, `:` or `(` without parentheses.
pub(super) fn is_prefix_expr(expr: &Expr) -> bool {
    match expr {
        Expr::Variable { .. } | Expr::Call { .. } => true,
        Expr::Binary { op, .. } => *op == BinOp::Index,
        _ => false,
    }
}
