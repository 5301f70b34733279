//! Dependency graph for formula cells.
//!
//! Tracks precedents (cells a formula reads) and dependents (cells that
//! read a given cell) for cycle checks and ordered recomputation.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a precedent of B)
//! ```
//!
//! This makes "what breaks if I change X?" trivial: follow outgoing edges.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell_ref::CellRef;
use crate::recalc::CycleReport;

/// Persistent dependency graph for formula cells.
///
/// Maintains bidirectional adjacency for O(1) lookups:
/// - `preds[B]` = cells that B depends on (precedents)
/// - `succs[A]` = cells that depend on A (dependents)
///
/// # Invariants
///
/// 1. **Bidirectional consistency:** If A ∈ preds[B] then B ∈ succs[A], and vice versa.
/// 2. **No dangling entries:** Empty sets are removed, not stored.
/// 3. **No duplicate edges:** Set semantics enforced by FxHashSet.
/// 4. **Atomic updates:** `replace_edges` is the only mutator that touches both maps.
///
/// Acyclicity is enforced at the edit boundary: callers must consult
/// `would_create_cycle` before committing a new edge set.
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    /// Precedents: for each formula cell B, the cells A it depends on.
    /// B -> {A1, A2, ...}
    preds: FxHashMap<CellRef, FxHashSet<CellRef>>,

    /// Dependents: for each referenced cell A, the formula cells B that depend on it.
    /// A -> {B1, B2, ...}
    succs: FxHashMap<CellRef, FxHashSet<CellRef>>,
}

impl DepGraph {
    /// Create an empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cells this formula cell depends on (precedents).
    pub fn precedents(&self, cell: CellRef) -> impl Iterator<Item = CellRef> + '_ {
        self.preds
            .get(&cell)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Returns the cells that depend on this cell (dependents).
    pub fn dependents(&self, cell: CellRef) -> impl Iterator<Item = CellRef> + '_ {
        self.succs
            .get(&cell)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    /// Returns true if this cell has tracked precedents.
    pub fn has_precedents(&self, cell: CellRef) -> bool {
        self.preds.contains_key(&cell)
    }

    /// Returns the number of cells with precedents in the graph.
    pub fn tracked_cell_count(&self) -> usize {
        self.preds.len()
    }

    /// Cells with at least one precedent, i.e. formula cells that read
    /// something.
    pub fn tracked_cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        self.preds.keys().copied()
    }

    /// Replace all edges for a formula cell atomically.
    ///
    /// This is the primary mutation API. It:
    /// 1. Removes the cell from all its old precedents' successor sets
    /// 2. Clears the cell's precedent set
    /// 3. Adds the cell to all new precedents' successor sets
    /// 4. Sets the cell's new precedent set
    ///
    /// Pass an empty set to clear all edges for this cell.
    pub fn replace_edges(&mut self, formula_cell: CellRef, new_preds: FxHashSet<CellRef>) {
        // Step 1: Remove old edges
        if let Some(old_preds) = self.preds.remove(&formula_cell) {
            for pred in old_preds {
                if let Some(deps) = self.succs.get_mut(&pred) {
                    deps.remove(&formula_cell);
                    // Clean up empty entries (invariant: no dangling)
                    if deps.is_empty() {
                        self.succs.remove(&pred);
                    }
                }
            }
        }

        // Step 2: If no new precedents, we're done (cell is not a formula or has no refs)
        if new_preds.is_empty() {
            return;
        }

        // Step 3: Add new edges
        for pred in &new_preds {
            self.succs.entry(*pred).or_default().insert(formula_cell);
        }

        // Step 4: Store new precedents
        self.preds.insert(formula_cell, new_preds);
    }

    /// Clear all edges for a cell (formula removed or cell cleared).
    ///
    /// Convenience wrapper around `replace_edges` with an empty set.
    pub fn clear_cell(&mut self, cell: CellRef) {
        self.replace_edges(cell, FxHashSet::default());
    }

    /// Check if committing `new_preds` as `cell`'s precedents would create
    /// a cycle.
    ///
    /// Does not modify the graph. Returns `Some(CycleReport)` if a cycle
    /// would be introduced, `None` otherwise.
    ///
    /// # Algorithm
    ///
    /// A cycle is created if any of `new_preds` can reach `cell` through
    /// the existing graph, i.e. already (transitively) depends on it. We
    /// DFS from `cell` following dependent edges and check whether we hit
    /// any of `new_preds`.
    pub fn would_create_cycle(
        &self,
        cell: CellRef,
        new_preds: &FxHashSet<CellRef>,
    ) -> Option<CycleReport> {
        // Self-reference check
        if new_preds.contains(&cell) {
            return Some(CycleReport::self_reference(cell));
        }

        let mut visited = FxHashSet::default();
        let mut stack = vec![cell];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }

            if let Some(deps) = self.succs.get(&current) {
                for &dep in deps {
                    if new_preds.contains(&dep) {
                        // Found a path cell → ... → dep, so the new edge
                        // dep → cell would close a loop.
                        return Some(CycleReport::cycle(vec![dep, cell]));
                    }
                    stack.push(dep);
                }
            }
        }

        None
    }

    /// Kahn's algorithm restricted to `subset`.
    ///
    /// Returns `(order, stuck)`: cells in dependency order (precedents
    /// before dependents, deterministic tie-breaking by CellRef), plus the
    /// cells that could not be ordered because they sit in or downstream
    /// of a cycle. `stuck` is empty whenever the subset is acyclic.
    ///
    /// Only edges between subset members count toward in-degrees; a
    /// precedent outside the subset is assumed already up to date.
    pub fn topo_order_within(
        &self,
        subset: &FxHashSet<CellRef>,
    ) -> (Vec<CellRef>, Vec<CellRef>) {
        if subset.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let mut in_degree: FxHashMap<CellRef, usize> = FxHashMap::default();
        for &cell in subset {
            let deg = self
                .preds
                .get(&cell)
                .map(|preds| preds.iter().filter(|p| subset.contains(p)).count())
                .unwrap_or(0);
            in_degree.insert(cell, deg);
        }

        // Seed with zero in-degree cells, sorted descending so the
        // smallest CellRef is popped first.
        let mut ready: Vec<CellRef> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&cell, _)| cell)
            .collect();
        ready.sort_by(|a, b| b.cmp(a));

        let mut order = Vec::with_capacity(subset.len());

        while let Some(cell) = ready.pop() {
            order.push(cell);

            if let Some(deps) = self.succs.get(&cell) {
                let mut unblocked = Vec::new();
                for &dep in deps {
                    if let Some(deg) = in_degree.get_mut(&dep) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            unblocked.push(dep);
                        }
                    }
                }
                unblocked.sort();
                for cell in unblocked.into_iter().rev() {
                    ready.push(cell);
                }
            }
        }

        let stuck: Vec<CellRef> = if order.len() < subset.len() {
            let ordered: FxHashSet<CellRef> = order.iter().copied().collect();
            let mut stuck: Vec<CellRef> = subset
                .iter()
                .filter(|c| !ordered.contains(c))
                .copied()
                .collect();
            stuck.sort();
            stuck
        } else {
            Vec::new()
        };

        (order, stuck)
    }

    /// Check all invariants. Panics if any are violated.
    ///
    /// Only available in test builds.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        // Invariant 1: Bidirectional consistency (preds → succs)
        for (formula_cell, preds) in &self.preds {
            for pred in preds {
                assert!(
                    self.succs
                        .get(pred)
                        .map_or(false, |s| s.contains(formula_cell)),
                    "Missing succ edge: {} should have {} in dependents",
                    pred,
                    formula_cell
                );
            }
        }

        // Invariant 1: Bidirectional consistency (succs → preds)
        for (cell, dependents) in &self.succs {
            for dep in dependents {
                assert!(
                    self.preds.get(dep).map_or(false, |s| s.contains(cell)),
                    "Missing pred edge: {} should have {} in precedents",
                    dep,
                    cell
                );
            }
        }

        // Invariant 2: No empty sets stored
        for (cell, preds) in &self.preds {
            assert!(!preds.is_empty(), "Empty preds set stored for {}", cell);
        }
        for (cell, succs) in &self.succs {
            assert!(!succs.is_empty(), "Empty succs set stored for {}", cell);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(row: usize, col: usize) -> CellRef {
        CellRef::new(row, col)
    }

    fn set(cells: &[CellRef]) -> FxHashSet<CellRef> {
        cells.iter().copied().collect()
    }

    #[test]
    fn test_replace_edges_bidirectional() {
        let mut g = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);

        g.replace_edges(b1, set(&[a1]));
        g.assert_consistent();

        assert_eq!(g.precedents(b1).collect::<Vec<_>>(), vec![a1]);
        assert_eq!(g.dependents(a1).collect::<Vec<_>>(), vec![b1]);
    }

    #[test]
    fn test_replace_edges_removes_stale() {
        let mut g = DepGraph::new();
        let a1 = cell(0, 0);
        let a2 = cell(1, 0);
        let b1 = cell(0, 1);

        g.replace_edges(b1, set(&[a1]));
        g.replace_edges(b1, set(&[a2]));
        g.assert_consistent();

        assert_eq!(g.dependents(a1).count(), 0);
        assert_eq!(g.dependents(a2).collect::<Vec<_>>(), vec![b1]);
    }

    #[test]
    fn test_clear_cell_removes_reverse_edges() {
        let mut g = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);

        g.replace_edges(b1, set(&[a1]));
        g.clear_cell(b1);
        g.assert_consistent();

        assert!(!g.has_precedents(b1));
        assert_eq!(g.dependents(a1).count(), 0);
        assert_eq!(g.tracked_cell_count(), 0);
    }

    #[test]
    fn test_clear_preserves_own_dependents() {
        let mut g = DepGraph::new();
        let a1 = cell(0, 0);
        let b1 = cell(0, 1);
        let c1 = cell(0, 2);

        g.replace_edges(b1, set(&[a1]));
        g.replace_edges(c1, set(&[b1]));
        // Clearing B1's own reads must not detach C1 from B1.
        g.clear_cell(b1);
        g.assert_consistent();

        assert_eq!(g.dependents(b1).collect::<Vec<_>>(), vec![c1]);
    }

    #[test]
    fn test_empty_edge_set_not_stored() {
        let mut g = DepGraph::new();
        g.replace_edges(cell(0, 0), FxHashSet::default());
        assert_eq!(g.tracked_cell_count(), 0);
    }

    #[test]
    fn test_would_create_cycle_self_reference() {
        let g = DepGraph::new();
        let a1 = cell(0, 0);
        let report = g.would_create_cycle(a1, &set(&[a1]));
        assert!(report.is_some());
        assert!(report.unwrap().message.contains("itself"));
    }

    #[test]
    fn test_would_create_cycle_direct() {
        let mut g = DepGraph::new();
        let a1 = cell(0, 0);
        let a2 = cell(1, 0);

        // A1 reads A2; setting A2 to read A1 closes the loop.
        g.replace_edges(a1, set(&[a2]));
        assert!(g.would_create_cycle(a2, &set(&[a1])).is_some());
        assert!(g.would_create_cycle(a2, &set(&[cell(2, 0)])).is_none());
    }

    #[test]
    fn test_would_create_cycle_transitive() {
        let mut g = DepGraph::new();
        let a = cell(0, 0);
        let b = cell(1, 0);
        let c = cell(2, 0);

        g.replace_edges(b, set(&[a]));
        g.replace_edges(c, set(&[b]));
        // A reading C would close A → B → C → A.
        assert!(g.would_create_cycle(a, &set(&[c])).is_some());
    }

    #[test]
    fn test_would_create_cycle_does_not_mutate() {
        let mut g = DepGraph::new();
        let a1 = cell(0, 0);
        let a2 = cell(1, 0);
        g.replace_edges(a1, set(&[a2]));

        let before = g.tracked_cell_count();
        let _ = g.would_create_cycle(a2, &set(&[a1]));
        assert_eq!(g.tracked_cell_count(), before);
        g.assert_consistent();
    }

    #[test]
    fn test_topo_order_chain() {
        let mut g = DepGraph::new();
        let a = cell(0, 0);
        let b = cell(1, 0);
        let c = cell(2, 0);

        g.replace_edges(b, set(&[a]));
        g.replace_edges(c, set(&[b]));

        let subset = set(&[b, c]);
        let (order, stuck) = g.topo_order_within(&subset);
        assert_eq!(order, vec![b, c]);
        assert!(stuck.is_empty());
    }

    #[test]
    fn test_topo_order_diamond() {
        let mut g = DepGraph::new();
        let a = cell(0, 0);
        let b = cell(0, 1);
        let c = cell(0, 2);
        let d = cell(0, 3);

        g.replace_edges(b, set(&[a]));
        g.replace_edges(c, set(&[a]));
        g.replace_edges(d, set(&[b, c]));

        let subset = set(&[b, c, d]);
        let (order, stuck) = g.topo_order_within(&subset);
        assert!(stuck.is_empty());
        assert_eq!(order.len(), 3);
        // D evaluates last, after both arms of the diamond.
        assert_eq!(order[2], d);
    }

    #[test]
    fn test_topo_order_deterministic() {
        let mut g = DepGraph::new();
        let a = cell(0, 0);
        let deps: Vec<CellRef> = (1..6).map(|r| cell(r, 0)).collect();
        for &d in &deps {
            g.replace_edges(d, set(&[a]));
        }

        let subset: FxHashSet<CellRef> = deps.iter().copied().collect();
        let (order, _) = g.topo_order_within(&subset);
        assert_eq!(order, deps);
    }

    #[test]
    fn test_topo_order_reports_stuck_cells() {
        let mut g = DepGraph::new();
        let a = cell(0, 0);
        let b = cell(1, 0);
        let c = cell(2, 0);

        // A and B form a cycle (inserted directly, as a loaded file could);
        // C hangs downstream of it.
        g.replace_edges(a, set(&[b]));
        g.replace_edges(b, set(&[a]));
        g.replace_edges(c, set(&[b]));

        let subset = set(&[a, b, c]);
        let (order, stuck) = g.topo_order_within(&subset);
        assert!(order.is_empty());
        assert_eq!(stuck, vec![a, b, c]);
    }
}
