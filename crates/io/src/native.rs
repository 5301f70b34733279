// Native .sheet format using SQLite

use std::path::Path;

use rusqlite::{params, Connection};

use simplesheet_engine::cell::{CellContent, CellStyle};
use simplesheet_engine::cell_ref::CellRef;
use simplesheet_engine::engine::Engine;
use simplesheet_engine::sheet::Sheet;

use crate::error::{Result, StorageError};
use crate::NATIVE_FORMAT_VERSION;

const SCHEMA: &str = r##"
CREATE TABLE IF NOT EXISTS cells (
    row INTEGER NOT NULL,
    col INTEGER NOT NULL,
    value_type INTEGER NOT NULL,  -- 0=empty, 1=number, 2=text, 3=formula
    value_num REAL,
    value_text TEXT,
    fmt_font_family TEXT,         -- NULL = inherit
    fmt_font_size REAL,           -- NULL = inherit
    fmt_bold INTEGER DEFAULT 0,
    fmt_italic INTEGER DEFAULT 0,
    fmt_underline INTEGER DEFAULT 0,
    fmt_fg_color TEXT,            -- "#RRGGBB"
    fmt_bg_color TEXT,            -- "#RRGGBB"
    PRIMARY KEY (row, col)
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"##;

// Value type constants
const TYPE_EMPTY: i32 = 0;
const TYPE_NUMBER: i32 = 1;
const TYPE_TEXT: i32 = 2;
const TYPE_FORMULA: i32 = 3;

/// Save every populated cell (content and/or styling) plus format metadata.
pub fn save(engine: &Engine, path: &Path) -> Result<()> {
    // Delete existing file if present (SQLite will create fresh)
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;

    conn.execute(
        "INSERT INTO meta (key, value) VALUES (?1, ?2)",
        params!["version", NATIVE_FORMAT_VERSION.to_string()],
    )?;

    // Save cells inside one transaction; sorted so the file is deterministic.
    conn.execute("BEGIN TRANSACTION", [])?;

    {
        let mut stmt = conn.prepare(
            "INSERT INTO cells (row, col, value_type, value_num, value_text, \
             fmt_font_family, fmt_font_size, fmt_bold, fmt_italic, fmt_underline, \
             fmt_fg_color, fmt_bg_color) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;

        let mut cells: Vec<(&CellRef, &simplesheet_engine::cell::Cell)> =
            engine.sheet().cells_iter().collect();
        cells.sort_by_key(|(at, _)| **at);

        for (at, cell) in cells {
            let (value_type, value_num, value_text): (i32, Option<f64>, Option<String>) =
                match &cell.content {
                    CellContent::Empty => (TYPE_EMPTY, None, None),
                    CellContent::Number(n) => (TYPE_NUMBER, Some(*n), None),
                    CellContent::Text(s) => (TYPE_TEXT, None, Some(s.clone())),
                    CellContent::Formula { source, .. } => {
                        (TYPE_FORMULA, None, Some(source.clone()))
                    }
                };

            let style = &cell.style;
            stmt.execute(params![
                at.row as i64,
                at.col as i64,
                value_type,
                value_num,
                value_text,
                style.font_family.as_deref(),
                style.font_size.map(|s| s as f64),
                style.bold as i32,
                style.italic as i32,
                style.underline as i32,
                style.fg_color.as_deref(),
                style.bg_color.as_deref(),
            ])?;
        }
    }

    conn.execute("COMMIT", [])?;

    Ok(())
}

/// Load a workbook and rebuild its engine: the dependency graph is
/// reconstructed from every stored formula with the same reference-parsing
/// logic used for live edits, and all formulas are evaluated once in
/// dependency order before first display.
pub fn load(path: &Path) -> Result<Engine> {
    let conn = Connection::open(path)?;

    let version: u32 = conn
        .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
            let s: String = row.get(0)?;
            Ok(s.parse().unwrap_or(0))
        })
        .unwrap_or(NATIVE_FORMAT_VERSION);
    if version > NATIVE_FORMAT_VERSION {
        return Err(StorageError::UnsupportedVersion(version));
    }

    let mut sheet = Sheet::new();

    let mut stmt = conn.prepare(
        "SELECT row, col, value_type, value_num, value_text, \
         fmt_font_family, fmt_font_size, fmt_bold, fmt_italic, fmt_underline, \
         fmt_fg_color, fmt_bg_color FROM cells",
    )?;

    let rows = stmt.query_map([], |row| {
        let r: i64 = row.get(0)?;
        let c: i64 = row.get(1)?;
        let value_type: i32 = row.get(2)?;
        let value_num: Option<f64> = row.get(3)?;
        let value_text: Option<String> = row.get(4)?;
        let font_family: Option<String> = row.get(5)?;
        let font_size: Option<f64> = row.get(6)?;
        let bold: i32 = row.get(7).unwrap_or(0);
        let italic: i32 = row.get(8).unwrap_or(0);
        let underline: i32 = row.get(9).unwrap_or(0);
        let fg_color: Option<String> = row.get(10)?;
        let bg_color: Option<String> = row.get(11)?;
        Ok((
            (r as usize, c as usize),
            (value_type, value_num, value_text),
            (font_family, font_size, bold, italic, underline, fg_color, bg_color),
        ))
    })?;

    for row in rows {
        let ((r, c), (value_type, value_num, value_text), style_cols) = row?;
        let at = CellRef::new(r, c);

        let (font_family, font_size, bold, italic, underline, fg_color, bg_color) = style_cols;
        let style = CellStyle {
            font_family,
            font_size: font_size.map(|s| s as f32),
            bold: bold != 0,
            italic: italic != 0,
            underline: underline != 0,
            fg_color,
            bg_color,
        };
        if !style.is_default() {
            sheet.set_style(at, style);
        }

        let content = match value_type {
            TYPE_EMPTY => CellContent::Empty,
            TYPE_NUMBER => CellContent::Number(value_num.unwrap_or(0.0)),
            TYPE_TEXT => CellContent::Text(value_text.unwrap_or_default()),
            TYPE_FORMULA => CellContent::Formula {
                // The AST is rebuilt by the engine's load path.
                source: value_text.unwrap_or_default(),
                ast: None,
            },
            other => {
                return Err(StorageError::Malformed(format!(
                    "unknown cell value type {}",
                    other
                )))
            }
        };
        if !content.is_empty() {
            sheet.set_content(at, content);
        }
    }

    Ok(Engine::from_sheet(sheet))
}
