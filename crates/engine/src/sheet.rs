//! Sparse cell grid with styles.
//!
//! The sheet stores raw content and styling only; derived values and the
//! dependency graph live on the engine, which owns all mutation ordering.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cell::{Cell, CellContent, CellStyle};
use crate::cell_ref::CellRef;
use crate::formula::eval::Value;
use crate::formula::parser;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sheet {
    cells: FxHashMap<CellRef, Cell>,
}

impl Sheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell(&self, at: CellRef) -> Option<&Cell> {
        self.cells.get(&at)
    }

    /// Store classified content at a cell. A cell that ends up empty with
    /// default styling is removed from the map entirely.
    pub fn set_content(&mut self, at: CellRef, content: CellContent) {
        let cell = self.cells.entry(at).or_insert_with(Cell::new);
        cell.content = content;
        cell.computed = None;
        self.prune(at);
    }

    /// Classify raw input and store it. Convenience over `set_content`.
    pub fn set_input(&mut self, at: CellRef, input: &str) {
        self.set_content(at, CellContent::from_input(input));
    }

    /// Record the engine-computed value for a formula cell. No effect on
    /// cells absent from the map.
    pub fn set_computed(&mut self, at: CellRef, value: Option<Value>) {
        if let Some(cell) = self.cells.get_mut(&at) {
            cell.computed = value;
        }
    }

    /// The editable text of a cell: formula source for formulas, literal
    /// rendering otherwise.
    pub fn raw(&self, at: CellRef) -> String {
        self.cells
            .get(&at)
            .map(|c| c.content.raw())
            .unwrap_or_default()
    }

    /// The display text of a cell.
    pub fn display(&self, at: CellRef) -> String {
        self.cells.get(&at).map(|c| c.display()).unwrap_or_default()
    }

    pub fn style(&self, at: CellRef) -> CellStyle {
        self.cells
            .get(&at)
            .map(|c| c.style.clone())
            .unwrap_or_default()
    }

    pub fn set_style(&mut self, at: CellRef, style: CellStyle) {
        let cell = self.cells.entry(at).or_insert_with(Cell::new);
        cell.style = style;
        self.prune(at);
    }

    pub fn cells_iter(&self) -> impl Iterator<Item = (&CellRef, &Cell)> {
        self.cells.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Smallest (rows, cols) box containing every occupied cell.
    pub fn extent(&self) -> (usize, usize) {
        let mut rows = 0;
        let mut cols = 0;
        for at in self.cells.keys() {
            rows = rows.max(at.row + 1);
            cols = cols.max(at.col + 1);
        }
        (rows, cols)
    }

    /// Re-parse any formula whose AST was dropped (e.g. across
    /// serialization or hand-constructed content).
    pub fn reparse_formulas(&mut self) {
        for cell in self.cells.values_mut() {
            if let CellContent::Formula { source, ast } = &mut cell.content {
                if ast.is_none() {
                    *ast = parser::parse(source).ok();
                }
            }
        }
    }

    fn prune(&mut self, at: CellRef) {
        if let Some(cell) = self.cells.get(&at) {
            if cell.content.is_empty() && cell.style.is_default() {
                self.cells.remove(&at);
            }
        }
    }
}
