//! The formula engine: one grid, one dependency graph, consistent derived
//! values.
//!
//! All content mutation goes through [`Engine::set_cell_content`]. Every
//! call completes a full propagation pass before returning, so callers
//! never observe a dependent holding a stale computed value.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::cell::{CellContent, CellStyle};
use crate::cell_ref::CellRef;
use crate::dep_graph::DepGraph;
use crate::formula::eval::{self, CellError, CellLookup, Value};
use crate::formula::parser;
use crate::formula::refs::extract_refs;
use crate::recalc::{CycleReport, RecalcSummary};
use crate::sheet::Sheet;

/// One engine instance per open document. Owns the grid and the graph
/// exclusively; no external component mutates either directly.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    sheet: Sheet,
    dep_graph: DepGraph,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an engine from raw sheet contents: re-parse formulas,
    /// reconstruct the dependency graph with the same reference-extraction
    /// logic used for live edits, and evaluate every formula once in
    /// dependency order.
    pub fn from_sheet(sheet: Sheet) -> Self {
        let mut engine = Self {
            sheet,
            dep_graph: DepGraph::new(),
        };
        engine.sheet.reparse_formulas();
        engine.rebuild_dep_graph();
        engine.recompute_all();
        engine
    }

    pub fn sheet(&self) -> &Sheet {
        &self.sheet
    }

    pub fn dep_graph(&self) -> &DepGraph {
        &self.dep_graph
    }

    // =========================================================================
    // Edit Operation
    // =========================================================================

    /// Set a cell's content from raw text (literal, or formula when the
    /// text starts with '=') and recalculate every transitive dependent.
    ///
    /// A formula whose reference set would close a cycle is rejected: no
    /// edges are committed, the cell's old edges and cached value are
    /// discarded, and the cell displays the circular marker until
    /// corrected. Only the edited cell is pinned; its dependents pick the
    /// marker up through ordinary propagation. The typed text is retained
    /// so the user can edit it back.
    ///
    /// Malformed formulas are not an `Err`: they degrade to the evaluation
    /// error marker and propagate like any value.
    pub fn set_cell_content(
        &mut self,
        cell: CellRef,
        text: &str,
    ) -> Result<RecalcSummary, CycleReport> {
        let start = Instant::now();
        let content = CellContent::from_input(text);

        let rejection = match &content {
            CellContent::Formula { ast: Some(ast), .. } => {
                let new_preds = extract_refs(ast, cell);
                match self.dep_graph.would_create_cycle(cell, &new_preds) {
                    Some(report) => Some(report),
                    None => {
                        self.dep_graph.replace_edges(cell, new_preds);
                        None
                    }
                }
            }
            // Literals, empty input and unparseable formulas carry no edges.
            _ => {
                self.dep_graph.clear_cell(cell);
                None
            }
        };

        if let Some(report) = rejection {
            self.dep_graph.clear_cell(cell);
            self.sheet.set_content(cell, content);
            self.sheet
                .set_computed(cell, Some(Value::Error(CellError::Circular)));
            self.recalc_dependents(cell);
            return Err(report);
        }

        let evaluates = matches!(&content, CellContent::Formula { ast: Some(_), .. });
        let parse_failed = matches!(&content, CellContent::Formula { ast: None, .. });
        self.sheet.set_content(cell, content);

        let mut summary = RecalcSummary::new();
        if evaluates {
            let value = self.evaluate_cell(cell);
            self.sheet.set_computed(cell, Some(value));
            summary.cells_recomputed += 1;
        } else if parse_failed {
            self.sheet
                .set_computed(cell, Some(Value::Error(CellError::Eval)));
        }

        let propagated = self.recalc_dependents(cell);
        summary.cells_recomputed += propagated.cells_recomputed;
        summary.max_depth = summary.max_depth.max(propagated.max_depth);
        summary.had_cycles = propagated.had_cycles;
        summary.duration_ms = start.elapsed().as_millis() as u64;
        Ok(summary)
    }

    /// Clear a cell: remove its formula and outgoing edges, reset to a
    /// blank literal, and recalculate dependents.
    pub fn clear_cell(&mut self, cell: CellRef) -> RecalcSummary {
        match self.set_cell_content(cell, "") {
            Ok(summary) => summary,
            // Empty input never forms a cycle.
            Err(_) => RecalcSummary::new(),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Last computed/stored display text for a cell. Pure read.
    pub fn get_display_value(&self, cell: CellRef) -> String {
        self.sheet.display(cell)
    }

    /// The editable text of a cell: formula source for formulas, literal
    /// rendering otherwise.
    pub fn get_cell_text(&self, cell: CellRef) -> String {
        self.sheet.raw(cell)
    }

    /// Grid accessor form of the edit operation.
    pub fn set_cell_text(
        &mut self,
        cell: CellRef,
        text: &str,
    ) -> Result<RecalcSummary, CycleReport> {
        self.set_cell_content(cell, text)
    }

    pub fn get_cell_style(&self, cell: CellRef) -> CellStyle {
        self.sheet.style(cell)
    }

    /// Styling is orthogonal to evaluation; no recalculation happens here.
    pub fn set_cell_style(&mut self, cell: CellRef, style: CellStyle) {
        self.sheet.set_style(cell, style);
    }

    /// Evaluate a formula body (without the leading '=') against the
    /// current grid snapshot. Referenced formula cells are re-derived from
    /// their stored ASTs, not read from cache.
    pub fn evaluate(&self, body: &str) -> Value {
        match parser::parse_body(body) {
            Ok(expr) => {
                let lookup = SnapshotLookup::new(&self.sheet);
                eval::evaluate(&expr, &lookup)
            }
            Err(_) => Value::Error(CellError::Eval),
        }
    }

    /// Cells this cell's formula reads, sorted.
    pub fn precedents(&self, cell: CellRef) -> Vec<CellRef> {
        let mut preds: Vec<CellRef> = self.dep_graph.precedents(cell).collect();
        preds.sort();
        preds
    }

    /// Cells whose formulas read this cell, sorted.
    pub fn dependents(&self, cell: CellRef) -> Vec<CellRef> {
        let mut deps: Vec<CellRef> = self.dep_graph.dependents(cell).collect();
        deps.sort();
        deps
    }

    // =========================================================================
    // Rebuild (load path)
    // =========================================================================

    /// Rebuild the dependency graph from scratch by re-extracting the
    /// reference set of every stored formula.
    pub fn rebuild_dep_graph(&mut self) {
        let mut edges: Vec<(CellRef, FxHashSet<CellRef>)> = Vec::new();
        for (&cell, c) in self.sheet.cells_iter() {
            if let Some(ast) = c.content.formula_ast() {
                let refs = extract_refs(ast, cell);
                if !refs.is_empty() {
                    edges.push((cell, refs));
                }
            }
        }

        self.dep_graph = DepGraph::new();
        for (cell, refs) in edges {
            self.dep_graph.replace_edges(cell, refs);
        }
    }

    /// Evaluate every formula cell once, precedents before dependents.
    ///
    /// Cells Kahn's algorithm cannot order (a cycle in a hand-edited file;
    /// live edits reject cycles up front) are pinned with the circular
    /// marker instead of failing the load.
    pub fn recompute_all(&mut self) -> RecalcSummary {
        let start = Instant::now();
        let mut summary = RecalcSummary::new();

        // Formulas that read nothing (constants, parse failures) feed the
        // tracked cells but depend on no one, so they go first.
        let mut standalone: Vec<CellRef> = Vec::new();
        let mut tracked: FxHashSet<CellRef> = FxHashSet::default();
        for (&cell, c) in self.sheet.cells_iter() {
            if c.content.is_formula() {
                if self.dep_graph.has_precedents(cell) {
                    tracked.insert(cell);
                } else {
                    standalone.push(cell);
                }
            }
        }
        standalone.sort();

        let mut depths: FxHashMap<CellRef, usize> = FxHashMap::default();

        for &cell in &standalone {
            let value = self.evaluate_cell(cell);
            self.sheet.set_computed(cell, Some(value));
            depths.insert(cell, 1);
            summary.max_depth = summary.max_depth.max(1);
            summary.cells_recomputed += 1;
        }

        let (order, stuck) = self.dep_graph.topo_order_within(&tracked);

        for &cell in &order {
            let depth = self
                .dep_graph
                .precedents(cell)
                .filter_map(|p| depths.get(&p).copied())
                .max()
                .map_or(1, |d| d + 1);
            depths.insert(cell, depth);
            summary.max_depth = summary.max_depth.max(depth);

            let value = self.evaluate_cell(cell);
            self.sheet.set_computed(cell, Some(value));
            summary.cells_recomputed += 1;
        }

        for &cell in &stuck {
            self.sheet
                .set_computed(cell, Some(Value::Error(CellError::Circular)));
            summary.had_cycles = true;
            summary.cells_recomputed += 1;
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        summary
    }

    // =========================================================================
    // Propagation
    // =========================================================================

    /// Recompute every transitive dependent of `changed`, precedents
    /// before dependents. Worklist plus visited set keeps this O(edges)
    /// even for diamond-shaped graphs; every affected formula is
    /// evaluated exactly once.
    fn recalc_dependents(&mut self, changed: CellRef) -> RecalcSummary {
        let mut summary = RecalcSummary::new();

        let mut affected: FxHashSet<CellRef> = FxHashSet::default();
        let mut queue: VecDeque<CellRef> = self.dep_graph.dependents(changed).collect();
        while let Some(current) = queue.pop_front() {
            if !affected.insert(current) {
                continue;
            }
            for dep in self.dep_graph.dependents(current) {
                if !affected.contains(&dep) {
                    queue.push_back(dep);
                }
            }
        }

        if affected.is_empty() {
            return summary;
        }

        let (order, stuck) = self.dep_graph.topo_order_within(&affected);

        let mut depths: FxHashMap<CellRef, usize> = FxHashMap::default();
        for &cell in &order {
            let depth = self
                .dep_graph
                .precedents(cell)
                .filter_map(|p| depths.get(&p).copied())
                .max()
                .map_or(1, |d| d + 1);
            depths.insert(cell, depth);
            summary.max_depth = summary.max_depth.max(depth);

            let value = self.evaluate_cell(cell);
            self.sheet.set_computed(cell, Some(value));
            summary.cells_recomputed += 1;
        }

        // Unorderable cells can only show up when a loaded file carried a
        // cycle; keep them pinned rather than evaluating them stale.
        for &cell in &stuck {
            self.sheet
                .set_computed(cell, Some(Value::Error(CellError::Circular)));
            summary.had_cycles = true;
            summary.cells_recomputed += 1;
        }

        summary
    }

    /// Evaluate one cell's formula against committed values.
    fn evaluate_cell(&self, cell: CellRef) -> Value {
        match self.sheet.cell(cell).map(|c| &c.content) {
            Some(CellContent::Formula { ast: Some(ast), .. }) => {
                let lookup = CachedLookup {
                    sheet: &self.sheet,
                    current: cell,
                };
                eval::evaluate(ast, &lookup)
            }
            Some(CellContent::Formula { ast: None, .. }) => Value::Error(CellError::Eval),
            _ => Value::Empty,
        }
    }
}

// =============================================================================
// Lookups
// =============================================================================

/// Lookup used during propagation: literal cells read their content,
/// formula cells read their last committed value. The cell being evaluated
/// reads as empty: it carries no self-edge, so its own slot must not feed
/// a stale value back into the result.
struct CachedLookup<'a> {
    sheet: &'a Sheet,
    current: CellRef,
}

impl CellLookup for CachedLookup<'_> {
    fn value(&self, at: CellRef) -> Value {
        if at == self.current {
            return Value::Empty;
        }
        let cell = match self.sheet.cell(at) {
            Some(cell) => cell,
            None => return Value::Empty,
        };
        match &cell.content {
            CellContent::Empty => Value::Empty,
            CellContent::Number(n) => Value::Number(*n),
            CellContent::Text(s) => Value::Text(s.clone()),
            CellContent::Formula { .. } => cell.computed.clone().unwrap_or(Value::Empty),
        }
    }
}

/// Lookup used by [`Engine::evaluate`]: formula cells are re-derived from
/// their stored ASTs instead of read from cache. Committed edges are
/// acyclic, so the in-flight set only trips when a pinned error cell's
/// source still names a cycle; it then yields the circular marker instead
/// of recursing forever.
struct SnapshotLookup<'a> {
    sheet: &'a Sheet,
    in_flight: RefCell<FxHashSet<CellRef>>,
}

impl<'a> SnapshotLookup<'a> {
    fn new(sheet: &'a Sheet) -> Self {
        Self {
            sheet,
            in_flight: RefCell::new(FxHashSet::default()),
        }
    }
}

impl CellLookup for SnapshotLookup<'_> {
    fn value(&self, at: CellRef) -> Value {
        let cell = match self.sheet.cell(at) {
            Some(cell) => cell,
            None => return Value::Empty,
        };
        match &cell.content {
            CellContent::Empty => Value::Empty,
            CellContent::Number(n) => Value::Number(*n),
            CellContent::Text(s) => Value::Text(s.clone()),
            CellContent::Formula { ast: Some(ast), .. } => {
                if !self.in_flight.borrow_mut().insert(at) {
                    return Value::Error(CellError::Circular);
                }
                let value = eval::evaluate(ast, self);
                self.in_flight.borrow_mut().remove(&at);
                value
            }
            CellContent::Formula { ast: None, .. } => Value::Error(CellError::Eval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::EngineHarness;

    #[test]
    fn test_literal_set_and_display() {
        let mut h = EngineHarness::new();
        h.set("A1", "5");
        h.set("B1", "hello");
        assert_eq!(h.display("A1"), "5");
        assert_eq!(h.display("B1"), "hello");
        assert_eq!(h.display("C9"), "");
    }

    #[test]
    fn test_formula_evaluates_on_edit() {
        let mut h = EngineHarness::new();
        h.set("A1", "5");
        h.set("A2", "=A1*2");
        assert_eq!(h.display("A2"), "10");
        assert_eq!(h.raw("A2"), "=A1*2");
    }

    #[test]
    fn test_dependents_update_on_literal_change() {
        let mut h = EngineHarness::new();
        h.set("A1", "5");
        h.set("A2", "=A1*2");
        assert_eq!(h.display("A2"), "10");

        // No explicit recompute call on A2.
        h.set("A1", "7");
        assert_eq!(h.display("A2"), "14");
    }

    #[test]
    fn test_function_form_agrees_with_operator() {
        let mut h = EngineHarness::new();
        h.set("A1", "5");
        h.set("A2", "=A1*2");
        h.set("A3", "=MUL(A1,2)");
        assert_eq!(h.display("A2"), h.display("A3"));
    }

    #[test]
    fn test_sum_average_over_range() {
        let mut h = EngineHarness::new();
        h.set("A1", "1");
        h.set("A2", "2");
        h.set("A3", "3");
        h.set("B1", "=SUM(A1:A3)");
        h.set("B2", "=AVERAGE(A1:A3)");
        assert_eq!(h.display("B1"), "6");
        assert_eq!(h.display("B2"), "2");
    }

    #[test]
    fn test_div_by_zero_displays_error_marker() {
        let mut h = EngineHarness::new();
        h.set("A1", "1");
        h.set("B1", "=DIV(A1,0)");
        assert_eq!(h.display("B1"), "#ERROR!");
    }

    #[test]
    fn test_clear_cell_propagates_zero() {
        let mut h = EngineHarness::new();
        h.set("A1", "3");
        h.set("A2", "=SUM(A1:A1)");
        assert_eq!(h.display("A2"), "3");

        h.engine_mut().clear_cell(CellRef::parse("A1").unwrap());
        assert_eq!(h.display("A2"), "0");
        assert_eq!(h.display("A1"), "");
    }

    #[test]
    fn test_second_edit_of_cycle_rejected() {
        let mut h = EngineHarness::new();
        assert!(h.set("A1", "=A2"));
        assert!(!h.set("A2", "=A1"));

        // The edited cell is pinned; A1 keeps its committed formula and
        // shows the marker through ordinary propagation.
        assert_eq!(h.display("A2"), "#CIRC!");
        assert_eq!(h.display("A1"), "#CIRC!");
        assert_eq!(h.raw("A1"), "=A2");
        assert_eq!(h.raw("A2"), "=A1");

        // No edges were committed for the rejected edit.
        assert!(h.engine().precedents(CellRef::parse("A2").unwrap()).is_empty());
    }

    #[test]
    fn test_cycle_recovery() {
        let mut h = EngineHarness::new();
        h.set("A1", "=A2");
        h.set("A2", "=A1");
        h.set("A2", "5");
        assert_eq!(h.display("A2"), "5");
        assert_eq!(h.display("A1"), "5");
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut h = EngineHarness::new();
        // The reference to the edited cell itself is excluded, so this is
        // a formula with no reads, not a cycle.
        assert!(h.set("A1", "=A1+1"));
        assert_eq!(h.display("A1"), "1");
    }

    #[test]
    fn test_transitive_cycle_rejected() {
        let mut h = EngineHarness::new();
        assert!(h.set("B1", "=A1+1"));
        assert!(h.set("C1", "=B1+1"));
        assert!(!h.set("A1", "=C1"));
        assert_eq!(h.display("A1"), "#CIRC!");
    }

    #[test]
    fn test_error_contagion_through_chain() {
        let mut h = EngineHarness::new();
        h.set("A1", "oops");
        h.set("B1", "=A1+1");
        h.set("C1", "=B1*2");
        assert_eq!(h.display("B1"), "#ERROR!");
        assert_eq!(h.display("C1"), "#ERROR!");

        h.set("A1", "2");
        assert_eq!(h.display("B1"), "3");
        assert_eq!(h.display("C1"), "6");
    }

    #[test]
    fn test_malformed_formula_pins_error_and_propagates() {
        let mut h = EngineHarness::new();
        h.set("A1", "=SUM(");
        h.set("B1", "=A1+1");
        assert_eq!(h.display("A1"), "#ERROR!");
        assert_eq!(h.display("B1"), "#ERROR!");
        assert_eq!(h.raw("A1"), "=SUM(");
    }

    #[test]
    fn test_unknown_function_is_eval_error() {
        let mut h = EngineHarness::new();
        h.set("A1", "=BOGUS(1)");
        assert_eq!(h.display("A1"), "#ERROR!");
    }

    #[test]
    fn test_range_including_self_has_no_self_edge() {
        let mut h = EngineHarness::new();
        h.set("A1", "1");
        h.set("C1", "2");
        assert!(h.set("B1", "=SUM(A1:C1)"));
        // B1 reads A1 and C1 only; its own slot reads as empty.
        assert_eq!(h.display("B1"), "3");

        h.set("A1", "10");
        assert_eq!(h.display("B1"), "12");
    }

    #[test]
    fn test_diamond_recalculates_each_cell_once() {
        let mut h = EngineHarness::new();
        h.set("A1", "1");
        h.set("B1", "=A1+1");
        h.set("C1", "=A1+2");
        h.set("D1", "=B1+C1");
        assert_eq!(h.display("D1"), "5");

        let summary = h
            .engine_mut()
            .set_cell_content(CellRef::parse("A1").unwrap(), "2")
            .unwrap();
        assert_eq!(h.display("D1"), "7");
        assert_eq!(summary.cells_recomputed, 3);
        assert_eq!(summary.max_depth, 2);
    }

    #[test]
    fn test_deep_chain_uses_worklist_not_recursion() {
        let mut h = EngineHarness::new();
        h.set("A1", "1");
        for row in 2..=200 {
            let formula = format!("=A{}+1", row - 1);
            h.set(&format!("A{}", row), &formula);
        }
        assert_eq!(h.display("A200"), "200");

        h.set("A1", "2");
        assert_eq!(h.display("A200"), "201");
    }

    #[test]
    fn test_evaluate_snapshot_rederives_formulas() {
        let mut h = EngineHarness::new();
        h.set("A1", "1");
        h.set("A2", "=A1+1");
        let value = h.engine().evaluate("A2*10");
        assert_eq!(value, Value::Number(20.0));
    }

    #[test]
    fn test_evaluate_malformed_body() {
        let h = EngineHarness::new();
        assert_eq!(h.engine().evaluate("SUM("), Value::Error(CellError::Eval));
        assert_eq!(h.engine().evaluate(""), Value::Error(CellError::Eval));
    }

    #[test]
    fn test_concatenate() {
        let mut h = EngineHarness::new();
        h.set("A1", "world");
        h.set("B1", "=CONCATENATE(\"hello \",A1)");
        assert_eq!(h.display("B1"), "hello world");
    }

    #[test]
    fn test_style_is_orthogonal_to_evaluation() {
        let mut h = EngineHarness::new();
        h.set("A1", "5");
        h.set("B1", "=A1*2");

        let at = CellRef::parse("B1").unwrap();
        let style = CellStyle {
            bold: true,
            fg_color: Some("#FF0000".to_string()),
            ..Default::default()
        };
        h.engine_mut().set_cell_style(at, style.clone());
        assert_eq!(h.engine().get_cell_style(at), style);
        assert_eq!(h.display("B1"), "10");
    }

    #[test]
    fn test_consistency_with_full_recompute() {
        let mut h = EngineHarness::new();
        let edits = [
            ("A1", "1"),
            ("A2", "2"),
            ("A3", "=SUM(A1:A2)"),
            ("B1", "=A3*10"),
            ("B2", "=MAX(A1:A3,B1)"),
            ("A1", "7"),
            ("A2", "=A1+1"),
            ("A3", "=AVERAGE(A1:A2)"),
            ("C1", "=CONCATENATE(A1,\"-\",B1)"),
            ("A1", ""),
        ];
        for (at, text) in edits {
            h.set(at, text);
            h.assert_matches_full_recompute();
        }
    }

    #[test]
    fn test_set_cell_text_is_the_edit_operation() {
        let mut h = EngineHarness::new();
        let a1 = CellRef::parse("A1").unwrap();
        let b1 = CellRef::parse("B1").unwrap();
        h.engine_mut().set_cell_text(a1, "4").unwrap();
        h.engine_mut().set_cell_text(b1, "=A1+1").unwrap();
        assert_eq!(h.display("B1"), "5");
    }

    #[test]
    fn test_summary_log_line_smoke() {
        let mut h = EngineHarness::new();
        h.set("A1", "1");
        let summary = h
            .engine_mut()
            .set_cell_content(CellRef::parse("B1").unwrap(), "=A1+1")
            .unwrap();
        assert!(summary.log_line().contains("cells"));
        assert!(!summary.had_cycles);
    }
}
