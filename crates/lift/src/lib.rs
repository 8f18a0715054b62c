//! Lifting of Lua 5.4 prototypes into structured syntax trees.
//!
//! Each function is decompiled in a single forward pass: jump targets are
//! classified up front ([`jumps`]), register values are tracked so that
//! single-use expressions inline into their consumers ([`tracker`]), and
//! control constructs are recovered from the branch shapes the reference
//! compiler emits.

mod cleanup;
pub mod error;
pub mod jumps;
pub mod liveness;
pub mod names;
mod structurer;
pub mod tracker;

use moonlift_ast::FunctionDecl;
use moonlift_bytecode::{Backend, Prototype};
use rustc_hash::FxHashSet;

pub use error::DecompileError;
pub use jumps::{analyze_jumps, JumpAnalysis, TargetKind};
pub use names::Names;

/// State shared by the functions of one decompilation.
#[derive(Debug, Default)]
pub struct LiftContext {
    /// Paths (child indices from the root) of every prototype lifted so far.
    visited: FxHashSet<Vec<usize>>,
    keep_labels: bool,
}

impl LiftContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep every label in the output, not only the ones a `goto` uses.
    pub fn with_labels(mut self, keep: bool) -> Self {
        self.keep_labels = keep;
        self
    }

    /// Whether the prototype at `path` has been lifted.
    pub fn is_visited(&self, path: &[usize]) -> bool {
        self.visited.contains(path)
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }
}

/// Lift `proto`, found at `path` in the prototype tree, and every closure
/// it creates.
pub fn lift_function(
    proto: &Prototype,
    backend: &dyn Backend,
    ctx: &mut LiftContext,
    path: Vec<usize>,
) -> Result<FunctionDecl, DecompileError> {
    ctx.visited.insert(path.clone());
    let mut decl = structurer::Structurer::new(proto, backend, ctx, path).run()?;
    cleanup::simplify(&mut decl.body, ctx.keep_labels);
    Ok(decl)
}

/// Lift a root prototype with a fresh context.
pub fn decompile_function(
    proto: &Prototype,
    backend: &dyn Backend,
) -> Result<FunctionDecl, DecompileError> {
    let mut ctx = LiftContext::new();
    lift_function(proto, backend, &mut ctx, Vec::new())
}
