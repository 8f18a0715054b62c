use std::fmt::Write;

use moonlift_ast::{is_identifier, BinOp, Expr, Literal, TableField, UnOp};

use super::precedence::{
    binop_precedence, expr_precedence, is_prefix_expr, is_right_assoc, Precedence,
};
use super::LuaEmitter;

impl<'a> LuaEmitter<'a> {
    pub(crate) fn emit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(lit) => self.emit_literal(lit),

            Expr::Variable { name, .. } => self.output.push_str(name),

            Expr::VarArg => self.output.push_str("..."),

            Expr::Binary {
                op: BinOp::Index,
                left,
                right,
            } => self.emit_index(left, right),

            Expr::Binary { op, left, right } => {
                let prec = binop_precedence(*op);
                let (left_prec, right_prec) = if is_right_assoc(*op) {
                    (Precedence(prec.0 + 1), prec)
                } else {
                    (prec, Precedence(prec.0 + 1))
                };
                self.emit_expr_parens(left, left_prec);
                let _ = write!(self.output, " {} ", op.symbol());
                self.emit_expr_parens(right, right_prec);
            }

            Expr::Unary { op, operand } => {
                self.output.push_str(op.symbol());
                // `- -x` and `~ ~x`, never `--x` (a comment).
                if matches!(op, UnOp::Minus | UnOp::BitNot)
                    && expr_precedence(operand) == Precedence::UNARY
                {
                    self.output.push(' ');
                }
                self.emit_expr_parens(operand, Precedence::UNARY);
            }

            Expr::Call {
                callee,
                method,
                args,
            } => {
                self.emit_prefix(callee);
                if let Some(method) = method {
                    self.output.push(':');
                    self.output.push_str(method);
                }
                self.output.push('(');
                self.emit_expr_list(args);
                self.output.push(')');
            }

            Expr::Table { fields } => self.emit_table(fields),

            Expr::Closure(decl) => self.emit_function_decl(decl),
        }
    }

    pub(crate) fn emit_expr_list(&mut self, exprs: &[Expr]) {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.output.push_str(", ");
            }
            self.emit_expr(expr);
        }
    }

    /// `_ENV.x` prints as the global `x`; identifier keys use `.`.
    fn emit_index(&mut self, base: &Expr, key: &Expr) {
        if let Expr::Literal(Literal::String(name)) = key {
            if is_identifier(name) {
                let name = String::from_utf8_lossy(name);
                if !base.is_env() {
                    self.emit_prefix(base);
                    self.output.push('.');
                }
                self.output.push_str(&name);
                return;
            }
        }
        self.emit_prefix(base);
        self.output.push('[');
        self.emit_expr(key);
        self.output.push(']');
    }

    fn emit_table(&mut self, fields: &[TableField]) {
        if fields.is_empty() {
            self.output.push_str("{}");
            return;
        }
        self.output.push_str("{ ");
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.output.push_str(", ");
            }
            match &field.key {
                Some(Expr::Literal(Literal::String(name))) if is_identifier(name) => {
                    self.output.push_str(&String::from_utf8_lossy(name));
                    self.output.push_str(" = ");
                }
                Some(key) => {
                    self.output.push('[');
                    self.emit_expr(key);
                    self.output.push_str("] = ");
                }
                None => {}
            }
            self.emit_expr(&field.value);
        }
        self.output.push_str(" }");
    }

    pub(crate) fn emit_literal(&mut self, lit: &Literal) {
        match lit {
            Literal::Nil => self.output.push_str("nil"),
            Literal::Boolean(true) => self.output.push_str("true"),
            Literal::Boolean(false) => self.output.push_str("false"),
            Literal::Integer(n) => self.emit_integer(*n),
            Literal::Number(n) => self.emit_number(*n),
            Literal::String(bytes) => self.emit_string(bytes),
        }
    }

    fn emit_integer(&mut self, n: i64) {
        // `-9223372036854775808` would read back as a float.
        if n == i64::MIN {
            self.output.push_str("math.mininteger");
        } else {
            let _ = write!(self.output, "{n}");
        }
    }

    fn emit_number(&mut self, n: f64) {
        if n.is_infinite() {
            if n.is_sign_positive() {
                self.output.push_str("math.huge");
            } else {
                self.output.push_str("-math.huge");
            }
        } else if n.is_nan() {
            self.output.push_str("(0/0)");
        } else if n.fract() == 0.0 && n.abs() < 1e15 {
            // Format integers without decimal point
            let _ = write!(self.output, "{}", n as i64);
        } else if n.fract() == 0.0 {
            let _ = write!(self.output, "{:e}", n);
        } else {
            let _ = write!(self.output, "{}", n);
        }
    }

    pub(crate) fn emit_string(&mut self, bytes: &[u8]) {
        self.output.push('"');
        for &b in bytes {
            match b {
                b'\\' => self.output.push_str("\\\\"),
                b'"' => self.output.push_str("\\\""),
                b'\n' => self.output.push_str("\\n"),
                b'\r' => self.output.push_str("\\r"),
                b'\t' => self.output.push_str("\\t"),
                0x07 => self.output.push_str("\\a"),
                0x08 => self.output.push_str("\\b"),
                0x0c => self.output.push_str("\\f"),
                0x0b => self.output.push_str("\\v"),
                0x20..=0x7e => self.output.push(b as char),
                _ => {
                    let _ = write!(self.output, "\\x{:02X}", b);
                }
            }
        }
        self.output.push('"');
    }

    /// Emit an expression in callee or indexed position.
    fn emit_prefix(&mut self, expr: &Expr) {
        if is_prefix_expr(expr) {
            self.emit_expr(expr);
        } else {
            self.output.push('(');
            self.emit_expr(expr);
            self.output.push(')');
        }
    }

    /// Emit an expression, wrapping in parentheses if its precedence is lower.
    fn emit_expr_parens(&mut self, expr: &Expr, min_prec: Precedence) {
        if expr_precedence(expr) < min_prec {
            self.output.push('(');
            self.emit_expr(expr);
            self.output.push(')');
        } else {
            self.emit_expr(expr);
        }
    }
}
