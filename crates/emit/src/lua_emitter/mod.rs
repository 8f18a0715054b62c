mod exprs;
mod precedence;
mod stmts;

use moonlift_ast::{Block, FunctionDecl, Stmt};

/// Layout knobs for rendered source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitOptions {
    /// Spaces per nesting level.
    pub indent: usize,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self { indent: 2 }
    }
}

/// Emit a single function to Lua source text including signature.
pub fn emit_function(decl: &FunctionDecl, options: &EmitOptions) -> String {
    let mut emitter = LuaEmitter::new(options);
    emitter.write_indent();
    emitter.emit_function_decl(decl);
    emitter.output.push('\n');
    emitter.output
}

/// Emit a main chunk: the body of `decl` as top-level statements.
pub fn emit_chunk(decl: &FunctionDecl, options: &EmitOptions) -> String {
    let mut emitter = LuaEmitter::new(options);
    emitter.emit_body(&decl.body);
    emitter.output
}

pub struct LuaEmitter<'a> {
    pub output: String,
    pub(crate) indent: usize,
    options: &'a EmitOptions,
}

impl<'a> LuaEmitter<'a> {
    pub fn new(options: &'a EmitOptions) -> Self {
        Self {
            output: String::new(),
            indent: 0,
            options,
        }
    }

    /// `function name(params)`, the body one level deeper, then `end`
    /// (without a trailing newline). `local` is prefixed for local
    /// functions; `name` is omitted for anonymous ones.
    pub(crate) fn emit_function_decl(&mut self, decl: &FunctionDecl) {
        if decl.is_local && decl.name.is_some() {
            self.output.push_str("local ");
        }
        self.output.push_str("function");
        if let Some(name) = &decl.name {
            self.output.push(' ');
            self.output.push_str(name);
        }
        self.emit_params(decl);
        self.indent += 1;
        self.emit_body(&decl.body);
        self.indent -= 1;
        self.write_indent();
        self.output.push_str("end");
    }

    /// Emit just the parameter list: `(params...)\n`
    fn emit_params(&mut self, decl: &FunctionDecl) {
        self.output.push('(');
        self.output.push_str(&decl.params.join(", "));
        if decl.is_vararg {
            if !decl.params.is_empty() {
                self.output.push_str(", ");
            }
            self.output.push_str("...");
        }
        self.output.push_str(")\n");
    }

    /// Emit a function body, dropping the implicit final `return`.
    pub(crate) fn emit_body(&mut self, body: &Block) {
        let stmts = match body.stmts.split_last() {
            Some((Stmt::Return { values }, rest)) if values.is_empty() => rest,
            _ => &body.stmts[..],
        };
        self.emit_stmts(stmts);
    }

    pub(crate) fn write_indent(&mut self) {
        let width = self.indent * self.options.indent;
        self.output.extend(std::iter::repeat(' ').take(width));
    }
}
