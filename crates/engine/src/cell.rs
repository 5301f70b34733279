use serde::{Deserialize, Serialize};

use crate::formula::eval::Value;
use crate::formula::parser::{self, Expr};

/// Visual styling for a cell: font metadata and colors.
///
/// Orthogonal to formula evaluation; carried through save/load untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CellStyle {
    /// None = inherit the application default
    pub font_family: Option<String>,
    /// Point size; None = inherit
    pub font_size: Option<f32>,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    /// Foreground color as "#RRGGBB"
    pub fg_color: Option<String>,
    /// Background color as "#RRGGBB"
    pub bg_color: Option<String>,
}

impl CellStyle {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// What the user typed into a cell, classified on entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum CellContent {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    /// A formula keeps its source text; `ast` is None when parsing failed
    /// (the cell then displays the evaluation error marker).
    Formula {
        source: String,
        #[serde(skip)]
        ast: Option<Expr>,
    },
}

impl CellContent {
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return CellContent::Empty;
        }

        if trimmed.starts_with('=') {
            let ast = parser::parse(trimmed).ok();
            return CellContent::Formula {
                source: trimmed.to_string(),
                ast,
            };
        }

        if let Ok(num) = trimmed.parse::<f64>() {
            return CellContent::Number(num);
        }

        CellContent::Text(trimmed.to_string())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellContent::Empty)
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellContent::Formula { .. })
    }

    pub fn formula_ast(&self) -> Option<&Expr> {
        match self {
            CellContent::Formula { ast, .. } => ast.as_ref(),
            _ => None,
        }
    }

    /// The editable text of the cell: formula source for formulas, literal
    /// rendering otherwise.
    pub fn raw(&self) -> String {
        match self {
            CellContent::Empty => String::new(),
            CellContent::Number(n) => format_number(*n),
            CellContent::Text(s) => s.clone(),
            CellContent::Formula { source, .. } => source.clone(),
        }
    }
}

/// Integers render without a decimal point.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cell {
    pub content: CellContent,
    /// Last computed value for formula cells; kept in sync by the engine.
    /// None for literal cells and for formulas not yet evaluated.
    #[serde(skip)]
    pub computed: Option<Value>,
    pub style: CellStyle,
}

impl Cell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, input: &str) {
        self.content = CellContent::from_input(input);
        self.computed = None;
    }

    /// Display text: the computed value for formulas, the literal otherwise.
    pub fn display(&self) -> String {
        match (&self.content, &self.computed) {
            (CellContent::Formula { .. }, Some(value)) => value.to_display(),
            (CellContent::Formula { .. }, None) => String::new(),
            (content, _) => content.raw(),
        }
    }
}
