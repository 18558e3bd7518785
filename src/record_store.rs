//! In-memory record table built from seed CSV bytes or a persisted worksheet.
//!
//! Cells are kept as strings exactly as they arrived. The only columns the
//! pipeline interprets are the link and the two enrichment fields.

use crate::error::{EnrichError, Result};
use log::{info, warn};

pub const LINK_COLUMN: &str = "result link";
pub const ABSTRACT_COLUMN: &str = "abstract";
pub const CLAIM1_COLUMN: &str = "claim1";
pub const FIGURE_LINK_COLUMN: &str = "representative figure link";

/// Header names accepted for the link column.
const LINK_ALIASES: [&str; 3] = [LINK_COLUMN, "link", "url"];

/// Default position of the header row in an exported search CSV: one
/// banner line comes first.
pub const DEFAULT_HEADER_ROW: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Abstract,
    Claim1,
}

impl Field {
    pub const ALL: [Field; 2] = [Field::Abstract, Field::Claim1];

    pub fn column(self) -> &'static str {
        match self {
            Field::Abstract => ABSTRACT_COLUMN,
            Field::Claim1 => CLAIM1_COLUMN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    link_idx: usize,
    abstract_idx: usize,
    claim1_idx: usize,
}

impl RecordTable {
    /// Parses seed CSV bytes. Everything before `header_row` is banner text.
    pub fn ingest(csv_bytes: &[u8], header_row: usize) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(csv_bytes);

        let mut header: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        for (idx, result) in rdr.records().enumerate() {
            let record = result?;
            if idx < header_row {
                continue;
            }
            let cells: Vec<String> = record.iter().map(str::to_string).collect();
            if header.is_none() {
                header = Some(cells);
            } else {
                rows.push(cells);
            }
        }

        let header = header.ok_or_else(|| {
            EnrichError::MalformedInput(format!("no header found at row {}", header_row))
        })?;
        let table = Self::normalize(header, rows)?;
        info!("Ingested {} seed records ({} columns).", table.len(), table.columns.len());
        Ok(table)
    }

    /// Rebuilds a table from worksheet rows, the first row being the header.
    /// Worksheet reads drop trailing empty cells, so short rows are padded.
    pub fn from_external_table(mut rows: Vec<Vec<String>>) -> Result<Self> {
        if rows.is_empty() {
            return Err(EnrichError::MalformedInput("persisted table has no header".into()));
        }
        let header = rows.remove(0);
        let table = Self::normalize(header, rows)?;
        info!("Rehydrated {} records from the results worksheet.", table.len());
        Ok(table)
    }

    fn normalize(header: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();
        if header.iter().all(|h| h.is_empty()) {
            return Err(EnrichError::MalformedInput("header row is empty".into()));
        }

        let width = header.len();
        let rows = rows
            .into_iter()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|c| !c.trim().is_empty()))
            .map(|(i, mut row)| {
                if row.len() > width {
                    warn!("Row {} has {} cells, header has {}; extra cells dropped.", i, row.len(), width);
                }
                row.resize(width, String::new());
                row
            })
            .collect();

        let mut table = RecordTable {
            columns: header,
            rows,
            link_idx: 0,
            abstract_idx: 0,
            claim1_idx: 0,
        };

        if let Some(idx) = table.column_index(FIGURE_LINK_COLUMN) {
            table.remove_column(idx);
        }
        table.link_idx = table
            .columns
            .iter()
            .position(|c| LINK_ALIASES.iter().any(|a| c.eq_ignore_ascii_case(a)))
            .ok_or_else(|| {
                EnrichError::MalformedInput(format!("missing required column '{}'", LINK_COLUMN))
            })?;
        table.ensure_column(ABSTRACT_COLUMN);
        table.ensure_column(CLAIM1_COLUMN);
        table.reindex();
        Ok(table)
    }

    fn reindex(&mut self) {
        if let Some(i) = self.column_index(ABSTRACT_COLUMN) {
            self.abstract_idx = i;
        }
        if let Some(i) = self.column_index(CLAIM1_COLUMN) {
            self.claim1_idx = i;
        }
    }

    fn remove_column(&mut self, idx: usize) {
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        for i in [&mut self.link_idx, &mut self.abstract_idx, &mut self.claim1_idx] {
            if *i > idx {
                *i -= 1;
            }
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Removes a column if present. The link and enrichment columns are
    /// never removed, whatever their header spelling.
    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        if [self.link_idx, self.abstract_idx, self.claim1_idx].contains(&idx) {
            return false;
        }
        self.remove_column(idx);
        true
    }

    /// Appends `name` as an empty-string column if it is not there yet.
    pub fn ensure_column(&mut self, name: &str) {
        if self.column_index(name).is_some() {
            return;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.reindex();
    }

    /// Keeps only the named columns, in the given order. The link and the
    /// enrichment columns always survive.
    pub fn project(&mut self, keep: &[&str]) {
        let mut order: Vec<usize> = keep.iter().filter_map(|k| self.column_index(k)).collect();
        for required in [self.link_idx, self.abstract_idx, self.claim1_idx] {
            if !order.contains(&required) {
                order.push(required);
            }
        }
        self.columns = order.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            *row = order.iter().map(|&i| row[i].clone()).collect();
        }
        let moved = |old: usize| order.iter().position(|&i| i == old).unwrap_or(old);
        self.link_idx = moved(self.link_idx);
        self.abstract_idx = moved(self.abstract_idx);
        self.claim1_idx = moved(self.claim1_idx);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, idx: usize) -> Option<&[String]> {
        self.rows.get(idx).map(Vec::as_slice)
    }

    pub fn link(&self, idx: usize) -> &str {
        self.rows.get(idx).map_or("", |r| r[self.link_idx].as_str())
    }

    pub fn field(&self, idx: usize, field: Field) -> &str {
        let col = self.field_index(field);
        self.rows.get(idx).map_or("", |r| r[col].as_str())
    }

    pub fn set_field(&mut self, idx: usize, field: Field, value: String) {
        let col = self.field_index(field);
        if let Some(row) = self.rows.get_mut(idx) {
            row[col] = value;
        }
    }

    fn field_index(&self, field: Field) -> usize {
        match field {
            Field::Abstract => self.abstract_idx,
            Field::Claim1 => self.claim1_idx,
        }
    }

    /// True when both enrichment fields hold non-blank text.
    pub fn is_filled(&self, idx: usize) -> bool {
        Field::ALL.iter().all(|&f| !self.field(idx, f).trim().is_empty())
    }

    /// Header row followed by data rows, the shape written to the store.
    pub fn to_rows(&self) -> Vec<Vec<String>> {
        let mut out = Vec::with_capacity(self.rows.len() + 1);
        out.push(self.columns.clone());
        out.extend(self.rows.iter().cloned());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "search URL:,https://patents.example/?q=widget\n\
id,title,result link,representative figure link\n\
US-1,Widget,https://patents.example/patent/US1,https://img/1.png\n\
US-2,Gadget,https://patents.example/patent/US2,https://img/2.png\n";

    #[test]
    fn ingest_drops_figure_link_and_adds_enrichment_columns() {
        let table = RecordTable::ingest(SEED.as_bytes(), DEFAULT_HEADER_ROW).unwrap();
        assert_eq!(table.columns(), ["id", "title", "result link", "abstract", "claim1"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.link(1), "https://patents.example/patent/US2");
        assert_eq!(table.field(0, Field::Abstract), "");
        assert_eq!(table.field(0, Field::Claim1), "");
    }

    #[test]
    fn ingest_keeps_existing_enrichment_values() {
        let csv = "banner\nresult link,abstract,claim1,priority\nhttps://a,x,y,2001\nhttps://b,,,2002\n";
        let table = RecordTable::ingest(csv.as_bytes(), 1).unwrap();
        assert_eq!(table.columns(), ["result link", "abstract", "claim1", "priority"]);
        assert!(table.is_filled(0));
        assert!(!table.is_filled(1));
        assert_eq!(table.row(1).unwrap()[3], "2002");
    }

    #[test]
    fn ingest_without_link_column_is_malformed() {
        let csv = "banner\nid,title\n1,x\n";
        let err = RecordTable::ingest(csv.as_bytes(), 1).unwrap_err();
        assert!(matches!(err, EnrichError::MalformedInput(_)));
    }

    #[test]
    fn ingest_without_header_row_is_malformed() {
        let err = RecordTable::ingest(b"only a banner\n", 1).unwrap_err();
        assert!(matches!(err, EnrichError::MalformedInput(_)));
    }

    #[test]
    fn short_rows_are_padded() {
        let csv = "banner\nresult link,title,extra\nhttps://a\n";
        let table = RecordTable::ingest(csv.as_bytes(), 1).unwrap();
        assert_eq!(table.row(0).unwrap().len(), 5);
        assert_eq!(table.field(0, Field::Claim1), "");
    }

    #[test]
    fn external_table_round_trips_through_rows() {
        let table = RecordTable::ingest(SEED.as_bytes(), 1).unwrap();
        let rehydrated = RecordTable::from_external_table(table.to_rows()).unwrap();
        assert_eq!(rehydrated, table);
    }

    #[test]
    fn external_table_with_figure_column_is_normalized() {
        let rows = vec![
            vec!["result link".to_string(), "representative figure link".to_string()],
            vec!["https://a".to_string(), "https://img".to_string()],
        ];
        let table = RecordTable::from_external_table(rows).unwrap();
        assert_eq!(table.columns(), ["result link", "abstract", "claim1"]);
    }

    #[test]
    fn project_keeps_required_columns() {
        let mut table = RecordTable::ingest(SEED.as_bytes(), 1).unwrap();
        table.project(&["title"]);
        assert_eq!(table.columns(), ["title", "result link", "abstract", "claim1"]);
        table.set_field(0, Field::Claim1, "1. A widget.".into());
        assert_eq!(table.row(0).unwrap()[3], "1. A widget.");
        assert_eq!(table.link(0), "https://patents.example/patent/US1");
    }

    #[test]
    fn enrichment_columns_cannot_be_dropped() {
        let mut table = RecordTable::ingest(SEED.as_bytes(), 1).unwrap();
        assert!(!table.drop_column(ABSTRACT_COLUMN));
        assert!(table.drop_column("title"));
        assert_eq!(table.columns(), ["id", "result link", "abstract", "claim1"]);
    }

    #[test]
    fn link_column_survives_drop_under_any_spelling() {
        let csv = "banner\nResult Link,title\nhttps://a,x\n";
        let mut table = RecordTable::ingest(csv.as_bytes(), 1).unwrap();
        assert!(!table.drop_column("Result Link"));
        assert_eq!(table.columns(), ["Result Link", "title", "abstract", "claim1"]);
        assert_eq!(table.link(0), "https://a");

        assert!(table.drop_column("title"));
        assert_eq!(table.link(0), "https://a");
        table.set_field(0, Field::Abstract, "abs".into());
        assert_eq!(table.row(0).unwrap(), ["https://a", "abs", ""]);
    }

    #[test]
    fn dropping_a_column_before_the_link_keeps_link_in_place() {
        let csv = "banner\nid,url,note\n1,https://a,n\n";
        let mut table = RecordTable::ingest(csv.as_bytes(), 1).unwrap();
        assert!(table.drop_column("id"));
        assert_eq!(table.link(0), "https://a");
        assert!(!table.drop_column("url"));
    }
}
