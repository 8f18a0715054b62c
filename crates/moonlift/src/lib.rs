//! Moonlift, a Lua 5.4 bytecode decompiler.
//!
//! This crate ties the pipeline together: load a binary chunk, lift every
//! prototype into a syntax tree, give plugins a chance to rewrite each tree,
//! and render the result as Lua source.

use moonlift_ast::FunctionDecl;
use moonlift_bytecode::{Backend, LoadError, Lua54, Prototype};
use moonlift_emit::{emit_chunk, emit_function, EmitOptions};
use moonlift_lift::{lift_function, LiftContext};
use thiserror::Error;
use tracing::debug;

pub use moonlift_ast as ast;
pub use moonlift_bytecode as bytecode;
pub use moonlift_lift::DecompileError;

/// Anything that can go wrong between raw bytes and source text.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Decompile(#[from] DecompileError),
}

/// Hook run on each top-level function tree before it is rendered.
pub trait Plugin {
    fn on_ast_process(&self, decl: &mut FunctionDecl);
}

pub struct Options {
    pub backend: Box<dyn Backend>,
    pub emit: EmitOptions,
    pub plugins: Vec<Box<dyn Plugin>>,
    /// List prototypes no CLOSURE instruction refers to after the main body.
    pub trailing: bool,
    /// Keep labels that no `goto` targets.
    pub labels: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            backend: Box::new(Lua54),
            emit: EmitOptions::default(),
            plugins: Vec::new(),
            trailing: true,
            labels: false,
        }
    }
}

impl Options {
    pub fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    fn process(&self, decl: &mut FunctionDecl) {
        for plugin in &self.plugins {
            plugin.on_ast_process(decl);
        }
    }
}

/// A prototype that was never instantiated by its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Unreferenced {
    /// Child indices leading from the main function to this prototype.
    pub path: Vec<usize>,
    pub decl: FunctionDecl,
}

/// The decompiled main function plus any unreferenced prototypes.
#[derive(Debug, Clone, PartialEq)]
pub struct Decompiled {
    pub main: FunctionDecl,
    pub unreferenced: Vec<Unreferenced>,
}

impl Decompiled {
    /// Render the main body as a chunk, followed by the unreferenced
    /// functions.
    pub fn render(&self, options: &EmitOptions) -> String {
        let mut out = emit_chunk(&self.main, options);
        for item in &self.unreferenced {
            let path: Vec<String> = item.path.iter().map(usize::to_string).collect();
            out.push_str(&format!("\n-- unreferenced function {}\n", path.join(".")));
            out.push_str(&emit_function(&item.decl, options));
        }
        out
    }
}

/// Decompile a single prototype (and the closures it creates). Every jump
/// target keeps its label; rendering through [`decompile_with`] drops the
/// ones no `goto` uses unless [`Options::labels`] is set.
pub fn decompile(proto: &Prototype, backend: &dyn Backend) -> Result<FunctionDecl, DecompileError> {
    let mut ctx = LiftContext::new().with_labels(true);
    lift_function(proto, backend, &mut ctx, Vec::new())
}

/// Decompile `proto` with plugins applied, collecting every prototype in
/// the tree that the main function never reaches.
pub fn decompile_with(proto: &Prototype, options: &Options) -> Result<Decompiled, DecompileError> {
    let backend = options.backend.as_ref();
    let mut ctx = LiftContext::new().with_labels(options.labels);
    let mut main = lift_function(proto, backend, &mut ctx, Vec::new())?;
    options.process(&mut main);

    let mut unreferenced = Vec::new();
    if options.trailing {
        let mut paths = Vec::new();
        collect_paths(proto, &mut Vec::new(), &mut paths);
        for (path, child) in paths {
            // Lifting an unreferenced parent visits its own closures.
            if ctx.is_visited(&path) {
                continue;
            }
            debug!(?path, "lifting unreferenced prototype");
            let mut decl = lift_function(child, backend, &mut ctx, path.clone())?;
            options.process(&mut decl);
            unreferenced.push(Unreferenced { path, decl });
        }
    }

    debug!(
        lifted = ctx.visited_count(),
        unreferenced = unreferenced.len(),
        "decompiled prototype tree"
    );
    Ok(Decompiled { main, unreferenced })
}

/// Load a binary chunk and render it as Lua source.
pub fn decompile_chunk(bytes: &[u8], options: &Options) -> Result<String, Error> {
    let chunk = moonlift_bytecode::undump(bytes)?;
    let decompiled = decompile_with(&chunk.main, options)?;
    Ok(decompiled.render(&options.emit))
}

/// Every nested prototype below `proto`, parents before children.
fn collect_paths<'p>(
    proto: &'p Prototype,
    prefix: &mut Vec<usize>,
    out: &mut Vec<(Vec<usize>, &'p Prototype)>,
) {
    for (i, child) in proto.protos.iter().enumerate() {
        prefix.push(i);
        out.push((prefix.clone(), child));
        collect_paths(child, prefix, out);
        prefix.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_paths_is_preorder() {
        let leaf = Prototype::default();
        let middle = Prototype {
            protos: vec![leaf.clone()],
            ..Prototype::default()
        };
        let root = Prototype {
            protos: vec![middle, leaf],
            ..Prototype::default()
        };
        let mut paths = Vec::new();
        collect_paths(&root, &mut Vec::new(), &mut paths);
        let paths: Vec<Vec<usize>> = paths.into_iter().map(|(path, _)| path).collect();
        assert_eq!(paths, vec![vec![0], vec![0, 0], vec![1]]);
    }
}
