//! Decides where a run starts and which rows still need a visit.
//!
//! Nothing is persisted locally: the results worksheet is the only record
//! of progress, so the pending set is recomputed from the table every run.

use crate::record_store::RecordTable;
use log::{info, warn};

/// How the record table for this run was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Worksheet was empty; table came from fresh seed ingestion.
    ColdStart,
    /// Worksheet already held a table; it was rehydrated.
    Resume,
}

impl StartMode {
    /// A worksheet counts as populated when it has a header and at least
    /// one non-blank cell.
    pub fn for_worksheet(rows: Option<&[Vec<String>]>) -> Self {
        match rows {
            Some(rows) if rows.iter().flatten().any(|c| !c.trim().is_empty()) => StartMode::Resume,
            _ => StartMode::ColdStart,
        }
    }
}

/// Unfilled rows split into those a run can visit and those it cannot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pending {
    /// Row indices, in table order, whose abstract or first claim is blank.
    pub rows: Vec<usize>,
    /// Unfilled rows with no link; they can never be visited.
    pub skipped: Vec<usize>,
}

pub fn pending(table: &RecordTable) -> Pending {
    let mut out = Pending::default();
    for idx in 0..table.len() {
        if table.is_filled(idx) {
            continue;
        }
        if table.link(idx).trim().is_empty() {
            warn!("Skipping row {}: no result link.", idx);
            out.skipped.push(idx);
            continue;
        }
        out.rows.push(idx);
    }
    info!(
        "{} of {} rows pending ({} without a link skipped).",
        out.rows.len(),
        table.len(),
        out.skipped.len()
    );
    out
}

/// Rows that still miss at least one field, links or not.
pub fn unfilled_count(table: &RecordTable) -> usize {
    (0..table.len()).filter(|&i| !table.is_filled(i)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::Field;

    fn table(rows: &[(&str, &str, &str)]) -> RecordTable {
        let mut data = vec![vec!["result link".to_string(), "abstract".into(), "claim1".into()]];
        for (link, abs, claim) in rows {
            data.push(vec![link.to_string(), abs.to_string(), claim.to_string()]);
        }
        RecordTable::from_external_table(data).unwrap()
    }

    #[test]
    fn pending_lists_rows_missing_either_field_in_order() {
        let t = table(&[
            ("https://a", "", ""),
            ("https://b", "x", "y"),
            ("https://c", "x", " "),
            ("https://d", "\t", "y"),
        ]);
        assert_eq!(pending(&t).rows, vec![0, 2, 3]);
    }

    #[test]
    fn rows_without_link_are_excluded() {
        let t = table(&[("  ", "", ""), ("https://b", "", "")]);
        let p = pending(&t);
        assert_eq!(p.rows, vec![1]);
        assert_eq!(p.skipped, vec![0]);
        assert_eq!(unfilled_count(&t), 2);
    }

    #[test]
    fn pending_reflects_current_values() {
        let mut t = table(&[("https://a", "", ""), ("https://b", "", "")]);
        t.set_field(0, Field::Abstract, "x".into());
        t.set_field(0, Field::Claim1, "y".into());
        assert_eq!(pending(&t).rows, vec![1]);
    }

    #[test]
    fn start_mode_from_worksheet_contents() {
        assert_eq!(StartMode::for_worksheet(None), StartMode::ColdStart);
        let blank = vec![vec![String::new()]];
        assert_eq!(StartMode::for_worksheet(Some(&blank)), StartMode::ColdStart);
        let filled = vec![vec!["result link".to_string()]];
        assert_eq!(StartMode::for_worksheet(Some(&filled)), StartMode::Resume);
    }
}
