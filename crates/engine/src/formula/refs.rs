//! Reference extraction from a parsed formula.
//!
//! Collects every cell an expression reads, for dependency graph
//! construction. Ranges are expanded to their constituent cells; ranges
//! are never graph nodes themselves.

use rustc_hash::FxHashSet;

use crate::cell_ref::CellRef;

use super::parser::Expr;

/// Extract the set of cells `expr` reads, deduplicated.
///
/// The edited cell's own address is excluded: a formula that mentions its
/// own cell does not create a self-edge.
pub fn extract_refs(expr: &Expr, editing: CellRef) -> FxHashSet<CellRef> {
    let mut refs = FxHashSet::default();
    collect(expr, &mut refs);
    refs.remove(&editing);
    refs
}

fn collect(expr: &Expr, refs: &mut FxHashSet<CellRef>) {
    match expr {
        Expr::Number(_) | Expr::Text(_) => {}
        Expr::Ref(cell) => {
            refs.insert(*cell);
        }
        Expr::Range { start, end } => {
            for row in start.row..=end.row {
                for col in start.col..=end.col {
                    refs.insert(CellRef::new(row, col));
                }
            }
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect(arg, refs);
            }
        }
        Expr::Neg(inner) => collect(inner, refs),
        Expr::BinaryOp { left, right, .. } => {
            collect(left, refs);
            collect(right, refs);
        }
    }
}
