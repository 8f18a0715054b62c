use moonlift_ast::{is_identifier, Expr};
use moonlift_bytecode::proto::Prototype;
use moonlift_bytecode::scope_tree::ScopeTree;

/// Register and upvalue naming for one function.
///
/// Debug names are used only when they are valid identifiers; compiler
/// internals such as `(for state)` fall back to synthetic names (`P0` for
/// parameters, `v3` for other registers, `upval_1` for upvalues).
#[derive(Debug, Clone)]
pub struct Names {
    scopes: ScopeTree,
    upvalues: Vec<Option<String>>,
    num_params: u8,
}

impl Names {
    pub fn new(proto: &Prototype) -> Self {
        Self {
            scopes: proto.scope_tree(),
            upvalues: proto.upvalues.iter().map(|u| u.name.clone()).collect(),
            num_params: proto.num_params,
        }
    }

    /// Debug name of `register` while executing `pc`.
    pub fn debug_name(&self, register: u8, pc: usize) -> Option<&str> {
        self.scopes
            .lookup(register, pc)
            .filter(|name| is_identifier(name.as_bytes()))
    }

    /// Whether a named local living in `register` comes into scope at `pc`.
    pub fn starts_at(&self, register: u8, pc: usize) -> bool {
        self.scopes.all_scopes().iter().any(|s| {
            s.register == register && s.pc_range.start == pc && is_identifier(s.name.as_bytes())
        })
    }

    /// Named locals that come into scope at `pc`, by register.
    pub fn locals_starting_at(&self, pc: usize) -> Vec<(u8, String)> {
        let mut locals: Vec<(u8, String)> = self
            .scopes
            .all_scopes()
            .iter()
            .filter(|s| s.pc_range.start == pc && is_identifier(s.name.as_bytes()))
            .map(|s| (s.register, s.name.clone()))
            .collect();
        locals.sort_by_key(|&(register, _)| register);
        locals.dedup_by_key(|&mut (register, _)| register);
        locals
    }

    pub fn synthetic(&self, register: u8) -> String {
        if register < self.num_params {
            format!("P{register}")
        } else {
            format!("v{register}")
        }
    }

    /// Source name of `register` as read at `pc`.
    pub fn register(&self, register: u8, pc: usize) -> String {
        match self.debug_name(register, pc) {
            Some(name) => name.to_owned(),
            None => self.synthetic(register),
        }
    }

    /// Variable read of `register` at `pc`.
    pub fn variable(&self, register: u8, pc: usize) -> Expr {
        Expr::local(self.register(register, pc))
    }

    /// Variable written by the instruction at `pc`. Names are taken after
    /// the write, since a fresh local's scope opens at the next instruction.
    pub fn target(&self, register: u8, pc: usize) -> Expr {
        Expr::local(self.register(register, pc + 1))
    }

    pub fn upvalue(&self, index: usize) -> Expr {
        match self.upvalues.get(index).and_then(Option::as_deref) {
            Some(name) if is_identifier(name.as_bytes()) => Expr::upvalue(name),
            _ => Expr::upvalue(format!("upval_{index}")),
        }
    }

    /// Parameter names as declared by the function.
    pub fn params(&self) -> Vec<String> {
        (0..self.num_params).map(|r| self.register(r, 0)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moonlift_bytecode::proto::{LocalVar, UpvalDesc};

    fn local(name: &str, start_pc: u32, end_pc: u32) -> LocalVar {
        LocalVar {
            name: name.into(),
            start_pc,
            end_pc,
        }
    }

    #[test]
    fn test_internal_names_fall_back_to_synthetic() {
        let proto = Prototype {
            num_params: 1,
            local_vars: vec![local("self", 0, 10), local("(for state)", 2, 8)],
            ..Prototype::default()
        };
        let names = Names::new(&proto);
        assert_eq!(names.register(0, 3), "self");
        assert_eq!(names.register(1, 3), "v1");
        assert!(!names.starts_at(1, 2));
        assert_eq!(names.params(), vec!["self".to_string()]);
    }

    #[test]
    fn test_stripped_names() {
        let proto = Prototype {
            num_params: 2,
            upvalues: vec![UpvalDesc {
                name: None,
                in_stack: true,
                index: 0,
                kind: 0,
            }],
            ..Prototype::default()
        };
        let names = Names::new(&proto);
        assert_eq!(names.params(), vec!["P0".to_string(), "P1".to_string()]);
        assert_eq!(names.register(2, 0), "v2");
        assert_eq!(names.upvalue(0), Expr::upvalue("upval_0"));
    }

    #[test]
    fn test_target_names_follow_the_write() {
        let proto = Prototype {
            local_vars: vec![local("a", 1, 5), local("b", 2, 5)],
            ..Prototype::default()
        };
        let names = Names::new(&proto);
        assert_eq!(names.target(0, 0), Expr::local("a"));
        assert_eq!(names.variable(0, 0), Expr::local("v0"));
        assert_eq!(
            names.locals_starting_at(2),
            vec![(1, "b".to_string())]
        );
    }
}
