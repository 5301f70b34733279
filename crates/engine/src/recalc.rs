//! Recalculation reporting types.

use crate::cell_ref::CellRef;

/// Report from a propagation pass or a full recompute.
#[derive(Debug, Clone, Default)]
pub struct RecalcSummary {
    /// Time taken in milliseconds.
    pub duration_ms: u64,

    /// Number of formula cells that were recomputed.
    pub cells_recomputed: usize,

    /// Maximum dependency depth encountered.
    /// A formula with no formula precedents has depth 1; a formula
    /// depending on another formula has depth = max(precedent depths) + 1.
    pub max_depth: usize,

    /// True if unorderable cells were found and pinned with the circular
    /// marker. Only possible when recomputing a loaded file; live edits
    /// reject cycles up front.
    pub had_cycles: bool,
}

impl RecalcSummary {
    /// Create a new empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Format as a concise one-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} cells in {}ms, depth={}, cycles={}",
            self.cells_recomputed, self.duration_ms, self.max_depth, self.had_cycles
        )
    }

    /// Format as a one-line log entry.
    ///
    /// Format: `[recalc]    3ms  12 cells  depth=4  cycles=0`
    pub fn log_line(&self) -> String {
        format!(
            "[recalc] {:>4}ms  {} cells  depth={}  cycles={}",
            self.duration_ms,
            self.cells_recomputed,
            self.max_depth,
            if self.had_cycles { 1 } else { 0 },
        )
    }
}

/// Report when cycle detection rejects an edit.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Cells participating in the detected cycle.
    /// May be a subset for large cycles.
    pub cells: Vec<CellRef>,

    /// Human-readable description of the cycle.
    pub message: String,
}

impl CycleReport {
    /// Create a new cycle report.
    pub fn new(cells: Vec<CellRef>, message: impl Into<String>) -> Self {
        Self {
            cells,
            message: message.into(),
        }
    }

    /// Create a cycle report for a self-referencing cell.
    pub fn self_reference(cell: CellRef) -> Self {
        Self {
            cells: vec![cell],
            message: format!("Cell {} references itself", cell),
        }
    }

    /// Create a cycle report for a multi-cell cycle.
    pub fn cycle(cells: Vec<CellRef>) -> Self {
        let cell_list: Vec<String> = cells.iter().map(|c| c.to_string()).collect();
        let message = if cells.len() <= 5 {
            format!("Circular reference: {}", cell_list.join(" → "))
        } else {
            format!(
                "Circular reference involving {} cells: {} → ... → {}",
                cells.len(),
                cell_list[0],
                cell_list[cell_list.len() - 1]
            )
        };
        Self { cells, message }
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CycleReport {}
