use std::path::Path;

/// One cell of a report grid. Provider exports mix text, numbers and blanks;
/// datetimes arrive as text once the workbook is flattened to CSV.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Blank,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Blank => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    /// Cell content as trimmed text, or None for blanks.
    pub fn text(&self) -> Option<String> {
        match self {
            Cell::Blank => None,
            Cell::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t.to_string())
                }
            }
            Cell::Number(n) => Some(format_number(*n)),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

pub type Grid = Vec<Vec<Cell>>;

/// Concatenated lower-cased text of a row's non-blank cells, space-joined.
pub fn row_text_lower(row: &[Cell]) -> String {
    let parts: Vec<String> = row
        .iter()
        .filter_map(|c| c.text())
        .map(|t| t.to_lowercase())
        .collect();
    parts.join(" ")
}

pub fn row_is_blank(row: &[Cell]) -> bool {
    row.iter().all(|c| c.is_blank())
}

fn cell_from_str(raw: &str) -> Cell {
    let t = raw.trim();
    if t.is_empty() {
        return Cell::Blank;
    }
    // Keep anything that is not a clean number as text. Names like
    // "1h 27m 29s" or "2/15/26, 6:12:54 PM" must stay verbatim.
    if let Ok(n) = t.parse::<f64>() {
        return Cell::Number(n);
    }
    Cell::Text(t.to_string())
}

/// Load a report grid from a CSV export. Unreadable or malformed files are
/// fatal here, before any section parsing starts.
pub fn load_csv(path: &Path) -> anyhow::Result<Grid> {
    let file = std::fs::File::open(path)
        .map_err(|e| anyhow::anyhow!("cannot open report file {}: {}", path.display(), e))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);
    let mut grid: Grid = Vec::new();
    for rec in reader.records() {
        let rec = rec.map_err(|e| anyhow::anyhow!("corrupt report file: {}", e))?;
        grid.push(rec.iter().map(cell_from_str).collect());
    }
    Ok(grid)
}

/// Decode a grid supplied inline over IPC as a JSON array of rows. Cells may
/// be strings, numbers or null.
pub fn from_json(value: &serde_json::Value) -> anyhow::Result<Grid> {
    let rows = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("grid must be an array of rows"))?;
    let mut grid: Grid = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let cells = row
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("grid row {} must be an array", i))?;
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(match cell {
                serde_json::Value::Null => Cell::Blank,
                serde_json::Value::String(s) => {
                    if s.trim().is_empty() {
                        Cell::Blank
                    } else {
                        Cell::Text(s.trim().to_string())
                    }
                }
                serde_json::Value::Number(n) => {
                    Cell::Number(n.as_f64().unwrap_or(0.0))
                }
                other => {
                    anyhow::bail!("grid row {} has unsupported cell {}", i, other)
                }
            });
        }
        grid.push(out);
    }
    Ok(grid)
}
