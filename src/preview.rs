//! Bounded previews of finished reports.

use crate::error::Result;
use csv::{ByteRecord, ReaderBuilder, StringRecord};

/// The first rows of a report and its total row count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Data rows in the whole report, header excluded.
    pub total_rows: usize,
}

/// Decodes the first `limit` rows of a report and counts the rest.
///
/// Rows past the limit are scanned as raw byte records, reusing a single
/// buffer, so memory stays proportional to `limit`. Read-only: calling it
/// any number of times on the same bytes gives the same result.
pub fn preview(report: &[u8], limit: usize) -> Result<Preview> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(report);
    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();

    let mut rows = Vec::with_capacity(limit.min(1024));
    let mut record = StringRecord::new();
    while rows.len() < limit && reader.read_record(&mut record)? {
        rows.push(record.iter().map(String::from).collect());
    }

    let mut total_rows = rows.len();
    let mut raw = ByteRecord::new();
    while reader.read_byte_record(&mut raw)? {
        total_rows += 1;
    }

    Ok(Preview {
        headers,
        rows,
        total_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "po_number,line_amount,note\n\
                          PO-1,10.0000,plain\n\
                          PO-2,20.0000,\"multi\nline\"\n\
                          PO-3,30.0000,\n";

    #[test]
    fn test_preview_limits_rows_and_counts_all() {
        let preview = preview(REPORT.as_bytes(), 2).unwrap();

        assert_eq!(preview.headers, vec!["po_number", "line_amount", "note"]);
        assert_eq!(preview.rows.len(), 2);
        assert_eq!(preview.rows[1][2], "multi\nline");
        assert_eq!(preview.total_rows, 3);
    }

    #[test]
    fn test_limit_larger_than_report() {
        let preview = preview(REPORT.as_bytes(), 10).unwrap();
        assert_eq!(preview.rows.len(), 3);
        assert_eq!(preview.total_rows, 3);
    }

    #[test]
    fn test_zero_limit_still_counts() {
        let preview = preview(REPORT.as_bytes(), 0).unwrap();
        assert!(preview.rows.is_empty());
        assert_eq!(preview.total_rows, 3);
    }

    #[test]
    fn test_preview_is_repeatable() {
        let first = preview(REPORT.as_bytes(), 2).unwrap();
        let second = preview(REPORT.as_bytes(), 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_report() {
        let preview = preview(b"", 10).unwrap();
        assert!(preview.headers.is_empty());
        assert_eq!(preview.total_rows, 0);
    }
}
