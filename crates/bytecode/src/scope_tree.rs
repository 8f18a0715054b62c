use std::ops::Range;

use crate::proto::LocalVar;

/// A local variable scope from bytecode debug info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalScope {
    pub register: u8,
    pub name: String,
    /// PC range where this variable is in scope: [start, end).
    pub pc_range: Range<usize>,
}

/// Interval-based lookup for register-to-variable-name mapping.
#[derive(Debug, Clone, Default)]
pub struct ScopeTree {
    /// Sorted by (register, start_pc) for efficient lookup.
    scopes: Vec<LocalScope>,
}

impl ScopeTree {
    /// Build a ScopeTree from entries that already carry their register.
    pub fn new(mut scopes: Vec<LocalScope>) -> Self {
        scopes.sort_by_key(|s| (s.register, s.pc_range.start));
        Self { scopes }
    }

    /// Build a ScopeTree from a prototype's `locvars` table.
    ///
    /// Lua stores locals in declaration order without registers. A local
    /// lives in the register equal to the number of earlier locals still
    /// active at its start PC, which is how the code generator allocates them.
    pub fn from_locals(locals: &[LocalVar]) -> Self {
        let scopes = locals
            .iter()
            .enumerate()
            .map(|(i, local)| {
                let start = local.start_pc as usize;
                let register = locals[..i]
                    .iter()
                    .filter(|earlier| {
                        (earlier.start_pc as usize) <= start && start < earlier.end_pc as usize
                    })
                    .count();
                LocalScope {
                    register: register.min(u8::MAX as usize) as u8,
                    name: local.name.clone(),
                    pc_range: start..local.end_pc as usize,
                }
            })
            .collect();
        Self::new(scopes)
    }

    /// Look up the variable name for a register at an exact PC.
    ///
    /// Returns the narrowest enclosing scope (largest start_pc that contains
    /// this PC).
    pub fn lookup(&self, register: u8, pc: usize) -> Option<&str> {
        self.scope_for(register, pc).map(|s| s.name.as_str())
    }

    /// Whether a scope for `register` opens exactly at `pc`, i.e. the
    /// instruction at `pc - 1` initialises a freshly declared local.
    pub fn starts_at(&self, register: u8, pc: usize) -> bool {
        self.scopes
            .iter()
            .any(|s| s.register == register && s.pc_range.start == pc)
    }

    fn scope_for(&self, register: u8, pc: usize) -> Option<&LocalScope> {
        self.scopes
            .iter()
            .filter(|s| s.register == register && s.pc_range.start <= pc && pc < s.pc_range.end)
            .max_by_key(|s| s.pc_range.start)
    }

    /// Get all scopes.
    pub fn all_scopes(&self) -> &[LocalScope] {
        &self.scopes
    }
}
