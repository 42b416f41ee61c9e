//! Streaming CSV row source
//!
//! Pull-based: rows decode one at a time off the file and the input is never
//! buffered whole, so file size has no bearing on memory use. The header row
//! defines field names, fields are whitespace-trimmed, and empty lines never
//! surface as records.

use csv_async::{AsyncReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs::File;
use tokio_stream::StreamExt;

use crate::error::Result;

/// One decoded data row
#[derive(Debug, Clone)]
pub struct CsvRow {
    /// 1-based position within the file's data section (the header row is
    /// not counted)
    pub position: u64,
    fields: HashMap<String, String>,
}

impl CsvRow {
    /// Field value by header name; `None` when the row is shorter than the
    /// header or the column does not exist
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    #[cfg(test)]
    pub(crate) fn from_fields(position: u64, fields: HashMap<String, String>) -> Self {
        Self { position, fields }
    }
}

/// Streaming reader over one CSV file
pub struct RowStream {
    headers: StringRecord,
    records: csv_async::StringRecordsIntoStream<'static, File>,
    position: u64,
}

impl RowStream {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await?;
        let mut reader = AsyncReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .create_reader(file);
        let headers = reader.headers().await?.clone();
        Ok(Self {
            headers,
            records: reader.into_records(),
            position: 0,
        })
    }

    /// Position of the most recently yielded row; 0 before the first row.
    ///
    /// Advances for every record the decoder yields, including rows a caller
    /// later rejects, so positions always refer to the input rather than to
    /// what was accepted.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Next data row, or `None` at end of input.
    ///
    /// Fields beyond the header width are dropped and missing trailing
    /// fields are simply absent from the row.
    pub async fn try_next(&mut self) -> Result<Option<CsvRow>> {
        match self.records.next().await {
            Some(record) => {
                let record = record?;
                self.position += 1;
                let fields = self
                    .headers
                    .iter()
                    .zip(record.iter())
                    .map(|(header, value)| (header.to_string(), value.to_string()))
                    .collect();
                Ok(Some(CsvRow {
                    position: self.position,
                    fields,
                }))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn rows_of(contents: &str) -> Vec<CsvRow> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.csv");
        std::fs::write(&path, contents).unwrap();

        let mut stream = RowStream::open(&path).await.unwrap();
        let mut rows = Vec::new();
        while let Some(row) = stream.try_next().await.unwrap() {
            rows.push(row);
        }
        rows
    }

    #[tokio::test]
    async fn test_rows_keyed_by_header() {
        let rows = rows_of("name,age\nAda,36\nGrace,45\n").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some("Ada"));
        assert_eq!(rows[0].get("age"), Some("36"));
        assert_eq!(rows[1].get("name"), Some("Grace"));
    }

    #[tokio::test]
    async fn test_positions_are_one_based_data_rows() {
        let rows = rows_of("name\nAda\nGrace\nKatherine\n").await;
        let positions: Vec<u64> = rows.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_fields_are_trimmed() {
        let rows = rows_of("name , age\n  Ada ,  36 \n").await;
        assert_eq!(rows[0].get("name"), Some("Ada"));
        assert_eq!(rows[0].get("age"), Some("36"));
    }

    #[tokio::test]
    async fn test_empty_lines_are_skipped() {
        let rows = rows_of("name,age\nAda,36\n\nGrace,45\n").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].position, 2);
    }

    #[tokio::test]
    async fn test_short_and_long_rows_are_tolerated() {
        let rows = rows_of("name,age,position\nAda\nGrace,45,Engineer,extra\n").await;
        assert_eq!(rows[0].get("name"), Some("Ada"));
        assert_eq!(rows[0].get("age"), None);
        assert_eq!(rows[1].get("position"), Some("Engineer"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = RowStream::open(&dir.path().join("absent.csv")).await;
        assert!(result.is_err());
    }
}
