//! In-memory tabular dataset.
//!
//! Cells are kept as strings; typing is the schema's job, not the
//! container's. Headers are preserved in file order so a round trip
//! through [`Dataset::to_csv_string`] is byte-stable.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Not parseable as tabular data: {0}")]
    Malformed(String),

    #[error("Dataset has no header row")]
    MissingHeader,
}

/// One tabular dataset: a header row plus zero or more data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    /// Parse CSV text. Rows may be ragged (short rows validate as missing
    /// values rather than failing the parse).
    pub fn from_csv_str(text: &str) -> Result<Self, DatasetError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| DatasetError::Malformed(e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(DatasetError::MissingHeader);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| DatasetError::Malformed(e.to_string()))?;
            rows.push(record.iter().map(|v| v.to_string()).collect());
        }

        Ok(Self { headers, rows })
    }

    /// Read a CSV file from disk.
    pub fn from_csv_path(path: &Path) -> Result<Self, DatasetError> {
        let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_csv_str(&text)
    }

    /// Serialize back to CSV text.
    pub fn to_csv_string(&self) -> String {
        let mut writer = csv::Writer::from_writer(Vec::new());
        // Writing in-memory strings cannot fail.
        let _ = writer.write_record(&self.headers);
        for row in &self.rows {
            let _ = writer.write_record(row);
        }
        let bytes = writer.into_inner().unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Index of a named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell value at (row, column index); `None` when the row is short.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows.get(row).and_then(|r| r.get(col)).map(|s| s.as_str())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_csv() {
        let ds = Dataset::from_csv_str("Date,PnL\n2024-01-10,1.5\n2024-01-11,-0.3\n").unwrap();
        assert_eq!(ds.headers, vec!["Date", "PnL"]);
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.cell(0, 1), Some("1.5"));
    }

    #[test]
    fn test_ragged_rows_allowed() {
        let ds = Dataset::from_csv_str("A,B,C\n1,2,3\n4,5\n").unwrap();
        assert_eq!(ds.rows[1].len(), 2);
        assert_eq!(ds.cell(1, 2), None);
    }

    #[test]
    fn test_round_trip_is_stable() {
        let text = "Ticker,Exit\nTSLA,2024-01-10\nAAPL,2024-03-02\n";
        let ds = Dataset::from_csv_str(text).unwrap();
        assert_eq!(ds.to_csv_string(), text);
    }

    #[test]
    fn test_empty_input_is_malformed() {
        assert!(Dataset::from_csv_str("").is_err());
    }
}
