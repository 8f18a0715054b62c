/// Literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Boolean(bool),
    /// Lua 5.4 integer subtype.
    Integer(i64),
    /// Float subtype.
    Number(f64),
    /// Raw bytes; Lua strings are not required to be UTF-8.
    String(Vec<u8>),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Concat,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    CompareNe,
    CompareEq,
    CompareLt,
    CompareLe,
    CompareGt,
    CompareGe,
    And,
    Or,
    /// Table indexing `base[key]`, rendered as `base.key` for identifier keys.
    Index,
}

impl BinOp {
    /// Source spelling of the operator. `Index` has no infix form.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Concat => "..",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "~",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::CompareNe => "~=",
            BinOp::CompareEq => "==",
            BinOp::CompareLt => "<",
            BinOp::CompareLe => "<=",
            BinOp::CompareGt => ">",
            BinOp::CompareGe => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Index => "[",
        }
    }

    /// The comparison that holds exactly when `self` does not.
    pub fn negate_comparison(self) -> Option<BinOp> {
        Some(match self {
            BinOp::CompareEq => BinOp::CompareNe,
            BinOp::CompareNe => BinOp::CompareEq,
            BinOp::CompareLt => BinOp::CompareGe,
            BinOp::CompareGe => BinOp::CompareLt,
            BinOp::CompareLe => BinOp::CompareGt,
            BinOp::CompareGt => BinOp::CompareLe,
            _ => return None,
        })
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Minus,
    Len,
    BitNot,
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Not => "not ",
            UnOp::Minus => "-",
            UnOp::Len => "#",
            UnOp::BitNot => "~",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negate_comparison_is_an_involution() {
        for op in [
            BinOp::CompareEq,
            BinOp::CompareNe,
            BinOp::CompareLt,
            BinOp::CompareLe,
            BinOp::CompareGt,
            BinOp::CompareGe,
        ] {
            let negated = op.negate_comparison().unwrap();
            assert_ne!(negated, op);
            assert_eq!(negated.negate_comparison(), Some(op));
        }
        assert_eq!(BinOp::Add.negate_comparison(), None);
    }
}
