use moonlift_ast::{BinOp, Block, Expr, Stmt};

use super::LuaEmitter;

impl<'a> LuaEmitter<'a> {
    pub(crate) fn emit_stmts(&mut self, stmts: &[Stmt]) {
        for (i, stmt) in stmts.iter().enumerate() {
            // `return` must end its block.
            if matches!(stmt, Stmt::Return { .. }) && i + 1 < stmts.len() {
                self.write_indent();
                self.output.push_str("do ");
                self.emit_return(stmt);
                self.output.push_str(" end\n");
                continue;
            }
            self.emit_stmt(stmt);
        }
    }

    fn emit_block(&mut self, block: &Block) {
        self.indent += 1;
        self.emit_stmts(&block.stmts);
        self.indent -= 1;
    }

    fn emit_end(&mut self) {
        self.write_indent();
        self.output.push_str("end\n");
    }

    pub(crate) fn emit_stmt(&mut self, stmt: &Stmt) {
        self.write_indent();
        match stmt {
            Stmt::Block(block) => {
                self.output.push_str("do\n");
                self.emit_block(block);
                self.emit_end();
            }

            Stmt::Assignment {
                targets,
                values,
                is_local,
            } => {
                if *is_local {
                    self.output.push_str("local ");
                }
                self.emit_expr_list(targets);
                // `local a, b` already starts out nil.
                if !(*is_local && values.iter().all(Expr::is_nil)) {
                    self.output.push_str(" = ");
                    self.emit_expr_list(values);
                }
                self.output.push('\n');
            }

            Stmt::If { clauses } => {
                for (i, clause) in clauses.iter().enumerate() {
                    if i > 0 {
                        self.write_indent();
                    }
                    match (&clause.condition, i) {
                        (Some(condition), 0) => {
                            self.output.push_str("if ");
                            self.emit_expr(condition);
                            self.output.push_str(" then\n");
                        }
                        (Some(condition), _) => {
                            self.output.push_str("elseif ");
                            self.emit_expr(condition);
                            self.output.push_str(" then\n");
                        }
                        (None, _) => self.output.push_str("else\n"),
                    }
                    self.emit_block(&clause.body);
                }
                self.emit_end();
            }

            Stmt::While { condition, body } => {
                self.output.push_str("while ");
                self.emit_expr(condition);
                self.output.push_str(" do\n");
                self.emit_block(body);
                self.emit_end();
            }

            Stmt::Repeat { body, condition } => {
                self.output.push_str("repeat\n");
                self.emit_block(body);
                self.write_indent();
                self.output.push_str("until ");
                self.emit_expr(condition);
                self.output.push('\n');
            }

            Stmt::ForNum {
                var,
                start,
                limit,
                step,
                body,
            } => {
                self.output.push_str("for ");
                self.output.push_str(var);
                self.output.push_str(" = ");
                self.emit_expr(start);
                self.output.push_str(", ");
                self.emit_expr(limit);
                if let Some(step) = step {
                    self.output.push_str(", ");
                    self.emit_expr(step);
                }
                self.output.push_str(" do\n");
                self.emit_block(body);
                self.emit_end();
            }

            Stmt::ForIn {
                vars,
                iterators,
                body,
            } => {
                self.output.push_str("for ");
                self.output.push_str(&vars.join(", "));
                self.output.push_str(" in ");
                self.emit_expr_list(iterators);
                self.output.push_str(" do\n");
                self.emit_block(body);
                self.emit_end();
            }

            Stmt::Function(decl) => {
                self.emit_function_decl(decl);
                self.output.push('\n');
            }

            Stmt::Return { .. } => {
                self.emit_return(stmt);
                self.output.push('\n');
            }

            Stmt::Break => self.output.push_str("break\n"),

            Stmt::Label(name) => {
                self.output.push_str("::");
                self.output.push_str(name);
                self.output.push_str("::\n");
            }

            Stmt::Goto(name) => {
                self.output.push_str("goto ");
                self.output.push_str(name);
                self.output.push('\n');
            }

            Stmt::Expr(expr) => {
                // A line starting with `(` would continue the previous call.
                if matches!(expr, Expr::Call { callee, .. } if !is_bare_callee(callee)) {
                    self.output.push(';');
                }
                self.emit_expr(expr);
                self.output.push('\n');
            }

            Stmt::Comment(text) => {
                self.output.push_str("-- ");
                self.output.push_str(text);
                self.output.push('\n');
            }
        }
    }

    fn emit_return(&mut self, stmt: &Stmt) {
        let Stmt::Return { values } = stmt else {
            return;
        };
        self.output.push_str("return");
        if !values.is_empty() {
            self.output.push(' ');
            self.emit_expr_list(values);
        }
    }
}

/// Whether a call through `callee` starts with a name rather than `(`.
fn is_bare_callee(callee: &Expr) -> bool {
    match callee {
        Expr::Variable { .. } => true,
        Expr::Call { callee, .. } => is_bare_callee(callee),
        Expr::Binary {
            op: BinOp::Index,
            left,
            ..
        } => is_bare_callee(left),
        _ => false,
    }
}
