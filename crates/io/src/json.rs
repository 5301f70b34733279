// JSON export

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use simplesheet_engine::cell_ref::CellRef;
use simplesheet_engine::engine::Engine;

use crate::error::Result;

/// Export the grid as a JSON array of arrays of display strings.
/// Trailing empty cells and rows are trimmed.
pub fn export(engine: &Engine, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);

    let (total_rows, total_cols) = engine.sheet().extent();

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut last_non_empty_row = 0;

    for row in 0..total_rows {
        let mut record: Vec<String> = Vec::new();
        let mut last_non_empty_col = 0;

        for col in 0..total_cols {
            let value = engine.get_display_value(CellRef::new(row, col));
            if !value.is_empty() {
                last_non_empty_col = col + 1;
                last_non_empty_row = row + 1;
            }
            record.push(value);
        }

        record.truncate(last_non_empty_col);
        rows.push(record);
    }

    rows.truncate(last_non_empty_row);

    serde_json::to_writer_pretty(writer, &rows)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn at(addr: &str) -> CellRef {
        CellRef::parse(addr).unwrap()
    }

    #[test]
    fn test_json_export() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.json");

        let mut engine = Engine::new();
        engine.set_cell_content(at("A1"), "Name").unwrap();
        engine.set_cell_content(at("B1"), "Value").unwrap();
        engine.set_cell_content(at("A2"), "Alice").unwrap();
        engine.set_cell_content(at("B2"), "42").unwrap();
        engine.set_cell_content(at("A3"), "Total").unwrap();
        engine.set_cell_content(at("B3"), "=SUM(B2:B2)").unwrap();

        export(&engine, &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let parsed: Vec<Vec<String>> = serde_json::from_str(&content).unwrap();

        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], vec!["Name", "Value"]);
        assert_eq!(parsed[1], vec!["Alice", "42"]);
        assert_eq!(parsed[2], vec!["Total", "42"]);
    }

    #[test]
    fn test_json_export_empty_grid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.json");

        export(&Engine::new(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let parsed: Vec<Vec<String>> = serde_json::from_str(&content).unwrap();
        assert!(parsed.is_empty());
    }
}
