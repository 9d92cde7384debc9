//! Raw tabular sheet data
//!
//! A workbook is read from a JSON document mapping sheet names to arrays of
//! row objects:
//!
//! ```text
//! {
//!   "RawData_A": [ { "Time (h)": 0.5, "Conc": 3.1 }, ... ],
//!   "RawData_B": [ { "Dose (mg)": 100 } ]
//! }
//! ```
//!
//! Sheet and column order follow the document.

use std::path::Path;

use eyre::{Context, Result, eyre};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// One sheet: rows of named fields
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    name: String,
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl SheetTable {
    /// Build a table from row objects; columns are collected in first-seen order
    pub fn from_rows(name: impl Into<String>, rows: Vec<Map<String, Value>>) -> Self {
        let name = name.into();
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        debug!(%name, rows = rows.len(), columns = columns.len(), "SheetTable::from_rows: called");
        Self { name, columns, rows }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render as CSV with a header row and no index column
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(
            &self
                .columns
                .iter()
                .map(|c| csv_field(c))
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push('\n');
        for row in &self.rows {
            let line = self
                .columns
                .iter()
                .map(|c| csv_field(&cell_text(row.get(c))))
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

fn cell_text(cell: Option<&Value>) -> String {
    match cell {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => other.to_string(),
    }
}

fn csv_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// All sheets of one input file
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: IndexMap<String, SheetTable>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a workbook JSON document from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(?path, "Workbook::load: called");
        let content = std::fs::read_to_string(path).context(format!("Failed to read workbook {}", path.display()))?;
        let workbook =
            Self::from_json_str(&content).context(format!("Failed to parse workbook {}", path.display()))?;
        info!(path = %path.display(), sheets = workbook.len(), "Loaded workbook");
        Ok(workbook)
    }

    /// Parse a workbook JSON document
    pub fn from_json_str(content: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(content)?;
        let Value::Object(sheets) = root else {
            return Err(eyre!("workbook must be a JSON object of sheet name -> rows"));
        };

        let mut workbook = Self::new();
        for (name, rows) in sheets {
            let Value::Array(rows) = rows else {
                return Err(eyre!("sheet '{}' must be an array of row objects", name));
            };
            let rows = rows
                .into_iter()
                .enumerate()
                .map(|(i, row)| match row {
                    Value::Object(map) => Ok(map),
                    _ => Err(eyre!("sheet '{}' row {} is not an object", name, i + 1)),
                })
                .collect::<Result<Vec<_>>>()?;
            workbook.insert(SheetTable::from_rows(name, rows));
        }
        Ok(workbook)
    }

    pub fn insert(&mut self, table: SheetTable) {
        self.sheets.insert(table.name.clone(), table);
    }

    pub fn get(&self, name: &str) -> Option<&SheetTable> {
        self.sheets.get(name)
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }
}
