//! Tree rewrites applied to each structured function body.

use moonlift_ast::{Block, IfClause, Stmt};
use rustc_hash::FxHashSet;

/// Drop labels no `goto` refers to (unless `keep_labels`), then fold
/// `else if` nests into `elseif` clauses.
pub(crate) fn simplify(body: &mut Block, keep_labels: bool) {
    if !keep_labels {
        let mut used = FxHashSet::default();
        collect_gotos(body, &mut used);
        prune_labels(body, &used);
    }
    merge_elseif(body);
}

/// Blocks directly nested in `stmt`. Function bodies are separate scopes
/// and are not included.
fn child_blocks(stmt: &mut Stmt) -> Vec<&mut Block> {
    match stmt {
        Stmt::Block(block) => vec![block],
        Stmt::If { clauses } => clauses.iter_mut().map(|c| &mut c.body).collect(),
        Stmt::While { body, .. }
        | Stmt::Repeat { body, .. }
        | Stmt::ForNum { body, .. }
        | Stmt::ForIn { body, .. } => vec![body],
        _ => Vec::new(),
    }
}

fn collect_gotos(block: &mut Block, used: &mut FxHashSet<String>) {
    for stmt in &mut block.stmts {
        if let Stmt::Goto(label) = stmt {
            used.insert(label.clone());
        }
        for child in child_blocks(stmt) {
            collect_gotos(child, used);
        }
    }
}

fn prune_labels(block: &mut Block, used: &FxHashSet<String>) {
    block
        .stmts
        .retain(|stmt| !matches!(stmt, Stmt::Label(label) if !used.contains(label)));
    for stmt in &mut block.stmts {
        for child in child_blocks(stmt) {
            prune_labels(child, used);
        }
    }
}

fn merge_elseif(block: &mut Block) {
    for stmt in &mut block.stmts {
        for child in child_blocks(stmt) {
            merge_elseif(child);
        }
        let Stmt::If { clauses } = stmt else {
            continue;
        };
        loop {
            let n = clauses.len();
            if n < 2 || clauses[n - 1].condition.is_some() {
                break;
            }
            if clauses[n - 1].body.is_empty() {
                clauses.pop();
                continue;
            }
            if !matches!(clauses[n - 1].body.stmts.as_slice(), [Stmt::If { .. }]) {
                break;
            }
            let Some(IfClause { body, .. }) = clauses.pop() else {
                break;
            };
            if let Some(Stmt::If { clauses: inner }) = body.stmts.into_iter().next() {
                clauses.extend(inner);
            }
        }
    }
}
