//! Canonical record shapes shared by every stage of the pipeline.

use crate::money::{Amount, Rate};
use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;

/// One normalized report line as read from a sheet.
///
/// `extras` holds every column the header table does not map, keyed by its
/// trimmed header and kept in sheet order so the combined report can write
/// them back verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Name of the sheet the row came from.
    pub sheet: String,
    pub po_number: String,
    pub invoice_number: String,
    pub line_number: i64,
    pub currency: String,
    /// Invoiced amount in the transaction currency. Blank cells read as zero.
    pub line_amount: Amount,
    pub amount_received: Option<Amount>,
    /// Present only on sheets carrying a rate column or both currency amounts.
    pub exchange_rate: Option<Rate>,
    pub grn_amount: Option<Amount>,
    pub extras: IndexMap<String, String>,
}

impl Record {
    /// Returns the composite key this line aggregates under.
    pub fn key(&self) -> AggregationKey {
        AggregationKey::new(&self.po_number, &self.invoice_number, self.line_number)
    }
}

/// `(po_number, invoice_number, line_number)`: one logical invoice line.
///
/// Equality is exact. Values are only trimmed at ingestion; no case folding
/// is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregationKey {
    pub po_number: String,
    pub invoice_number: String,
    pub line_number: i64,
}

impl AggregationKey {
    pub fn new(po_number: &str, invoice_number: &str, line_number: i64) -> Self {
        AggregationKey {
            po_number: po_number.to_string(),
            invoice_number: invoice_number.to_string(),
            line_number,
        }
    }
}

impl fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.po_number, self.invoice_number, self.line_number
        )
    }
}

/// Typed view of one combined-report row, as re-read by the aggregator and
/// the detail calculator. Free-form columns are ignored here.
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedRow {
    pub po_number: String,
    pub invoice_number: String,
    pub line_number: i64,
    #[serde(default)]
    pub currency: String,
    pub line_amount: Amount,
    pub amount_received: Option<Amount>,
    pub exchange_rate: Option<Rate>,
    pub grn_amount: Option<Amount>,
}

impl CombinedRow {
    /// Returns the composite key this row aggregates under.
    pub fn key(&self) -> AggregationKey {
        AggregationKey::new(&self.po_number, &self.invoice_number, self.line_number)
    }

    /// Amount received, with blanks counted as zero.
    pub fn received_or_zero(&self) -> Amount {
        self.amount_received.unwrap_or(Amount::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csv::ReaderBuilder;

    #[test]
    fn test_key_ordering_is_po_then_invoice_then_line() {
        let mut keys = vec![
            AggregationKey::new("PO-2", "INV-1", 1),
            AggregationKey::new("PO-1", "INV-9", 2),
            AggregationKey::new("PO-1", "INV-9", 1),
            AggregationKey::new("PO-1", "INV-10", 7),
        ];
        keys.sort();

        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "(PO-1, INV-10, 7)",
                "(PO-1, INV-9, 1)",
                "(PO-1, INV-9, 2)",
                "(PO-2, INV-1, 1)"
            ]
        );
    }

    #[test]
    fn test_key_is_case_sensitive() {
        assert_ne!(
            AggregationKey::new("po-1", "INV-1", 1),
            AggregationKey::new("PO-1", "INV-1", 1)
        );
    }

    #[test]
    fn test_combined_row_reads_blank_optionals_as_none() {
        let csv = "report_type,po_number,invoice_number,line_number,currency,line_amount,amount_received,exchange_rate,grn_amount,Supplier\n\
                   Combined,PO-100,INV-5,1,USD,200.0000,,,,ACME\n";
        let mut reader = ReaderBuilder::new().from_reader(csv.as_bytes());
        let row: CombinedRow = reader.deserialize().next().unwrap().unwrap();

        assert_eq!(row.key(), AggregationKey::new("PO-100", "INV-5", 1));
        assert_eq!(row.line_amount.to_string(), "200.0000");
        assert!(row.amount_received.is_none());
        assert!(row.exchange_rate.is_none());
        assert_eq!(row.received_or_zero(), Amount::ZERO);
    }
}
