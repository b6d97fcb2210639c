//! The Combined Report: every normalized record, sheet after sheet.
//!
//! [`CombinedWriter`] serializes records one at a time. [`BatchReader`] reads
//! the finished report back in fixed-size batches for the aggregation and
//! detail passes.

use crate::context::{ReportContext, ReportKind, METADATA_COLUMNS};
use crate::error::{ReportError, Resource, Result};
use crate::record::{CombinedRow, Record};
use crate::schema::Field;
use csv::{ReaderBuilder, StringRecord, Writer};
use log::debug;
use std::io::Write;

/// Column naming the sheet each combined row came from.
pub const SOURCE_SHEET_COLUMN: &str = "source_sheet";

/// Incremental writer for the Combined Report.
///
/// The header is written with the first record. Its free-form columns are
/// taken from that record; later records fill those columns by name, leave
/// missing ones blank and drop any others.
pub struct CombinedWriter<W: Write> {
    writer: Writer<W>,
    stamp: [String; 3],
    extra_columns: Option<Vec<String>>,
    rows: usize,
}

impl<W: Write> CombinedWriter<W> {
    pub fn new(writer: W, ctx: &ReportContext) -> Self {
        CombinedWriter {
            writer: Writer::from_writer(writer),
            stamp: ctx.stamp(ReportKind::Combined),
            extra_columns: None,
            rows: 0,
        }
    }

    /// Appends one record.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        if self.extra_columns.is_none() {
            let extras: Vec<String> = record.extras.keys().cloned().collect();
            let header = METADATA_COLUMNS
                .iter()
                .copied()
                .chain(Field::ALL.iter().map(|f| f.name()))
                .chain(extras.iter().map(String::as_str))
                .chain(std::iter::once(SOURCE_SHEET_COLUMN));
            self.writer.write_record(header)?;
            debug!("Combined report carries {} free-form columns", extras.len());
            self.extra_columns = Some(extras);
        }

        let extras = self.extra_columns.as_deref().unwrap_or_default();
        let mut fields: Vec<String> = Vec::with_capacity(3 + Field::ALL.len() + extras.len() + 1);
        fields.extend(self.stamp.iter().cloned());
        fields.push(record.po_number.clone());
        fields.push(record.invoice_number.clone());
        fields.push(record.line_number.to_string());
        fields.push(record.currency.clone());
        fields.push(record.line_amount.to_string());
        fields.push(optional(record.amount_received));
        fields.push(optional(record.exchange_rate));
        fields.push(optional(record.grn_amount));
        for name in extras {
            fields.push(record.extras.get(name).cloned().unwrap_or_default());
        }
        fields.push(record.sheet.clone());

        self.writer.write_record(&fields)?;
        self.rows += 1;
        Ok(())
    }

    /// Records written so far.
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| ReportError::Io(e.into_error()))
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// One combined-report row: the raw cells plus their typed view.
#[derive(Debug, Clone)]
pub struct CombinedLine {
    pub raw: StringRecord,
    pub row: CombinedRow,
}

/// Reads a Combined Report in batches of at most `chunk_size` rows.
///
/// Each batch is returned by value; dropping it releases its buffers before
/// the next batch is read.
pub struct BatchReader<'a> {
    reader: csv::Reader<&'a [u8]>,
    headers: StringRecord,
    chunk_size: usize,
    max_batch_bytes: usize,
    batches: usize,
}

impl<'a> BatchReader<'a> {
    pub fn new(combined: &'a [u8], chunk_size: usize, max_batch_bytes: usize) -> Result<Self> {
        let mut reader = ReaderBuilder::new().from_reader(combined);
        let headers = reader.headers()?.clone();
        Ok(BatchReader {
            reader,
            headers,
            chunk_size,
            max_batch_bytes,
            batches: 0,
        })
    }

    pub fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// Batches returned so far.
    pub fn batches_read(&self) -> usize {
        self.batches
    }

    /// Reads the next batch, or `None` at end of input.
    pub fn next_batch(&mut self) -> Result<Option<Vec<CombinedLine>>> {
        let start = self.reader.position().byte() as usize;
        let mut batch = Vec::with_capacity(self.chunk_size.min(4096));
        let mut raw = StringRecord::new();

        while batch.len() < self.chunk_size && self.reader.read_record(&mut raw)? {
            let used = self.reader.position().byte() as usize - start;
            if used > self.max_batch_bytes {
                return Err(ReportError::ResourceExhausted {
                    resource: Resource::BatchBytes,
                    limit: self.max_batch_bytes,
                    observed: used,
                });
            }
            let row: CombinedRow = raw.deserialize(Some(&self.headers))?;
            batch.push(CombinedLine {
                raw: raw.clone(),
                row,
            });
        }

        if batch.is_empty() {
            return Ok(None);
        }
        self.batches += 1;
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DateRange;
    use crate::money::Amount;
    use indexmap::IndexMap;
    use std::str::FromStr;

    fn record(po: &str, line: i64, supplier: &str, sheet: &str) -> Record {
        let mut extras = IndexMap::new();
        extras.insert("Supplier".to_string(), supplier.to_string());
        Record {
            sheet: sheet.to_string(),
            po_number: po.to_string(),
            invoice_number: "INV-1".to_string(),
            line_number: line,
            currency: "USD".to_string(),
            line_amount: Amount::from_str("12.5").unwrap(),
            amount_received: None,
            exchange_rate: None,
            grn_amount: None,
            extras,
        }
    }

    fn write(records: &[Record]) -> String {
        let ctx = ReportContext::new()
            .with_date_range(DateRange::new("01-01-2024", "31-01-2024"))
            .with_generated_at("2024-02-01 10:15:00");
        let mut writer = CombinedWriter::new(Vec::new(), &ctx);
        for record in records {
            writer.write_record(record).unwrap();
        }
        assert_eq!(writer.rows_written(), records.len());
        String::from_utf8(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_header_and_row_layout() {
        let output = write(&[record("PO-1", 1, "ACME", "Sheet1")]);
        let mut lines = output.lines();

        assert_eq!(
            lines.next().unwrap(),
            "report_type,date_range,generated_at,po_number,invoice_number,line_number,currency,\
             line_amount,amount_received,exchange_rate,grn_amount,Supplier,source_sheet"
        );
        assert_eq!(
            lines.next().unwrap(),
            "Combined,01-01-2024 to 31-01-2024,2024-02-01 10:15:00,PO-1,INV-1,1,USD,12.5000,,,,ACME,Sheet1"
        );
    }

    #[test]
    fn test_rows_keep_input_order_without_dedup() {
        let output = write(&[
            record("PO-2", 1, "B", "Sheet1"),
            record("PO-1", 1, "A", "Sheet1"),
            record("PO-2", 1, "B", "Sheet2"),
        ]);
        let pos: Vec<&str> = output
            .lines()
            .skip(1)
            .map(|l| l.split(',').nth(3).unwrap())
            .collect();
        assert_eq!(pos, vec!["PO-2", "PO-1", "PO-2"]);
    }

    #[test]
    fn test_batches_cover_every_row() {
        let records: Vec<Record> = (1..=5).map(|i| record("PO-1", i, "A", "Sheet1")).collect();
        let output = write(&records);

        let mut reader = BatchReader::new(output.as_bytes(), 2, usize::MAX).unwrap();
        let mut sizes = Vec::new();
        while let Some(batch) = reader.next_batch().unwrap() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(reader.batches_read(), 3);
    }

    #[test]
    fn test_batch_byte_ceiling() {
        let records: Vec<Record> = (1..=3).map(|i| record("PO-1", i, "A", "Sheet1")).collect();
        let output = write(&records);

        let mut reader = BatchReader::new(output.as_bytes(), 10, 32).unwrap();
        assert!(matches!(
            reader.next_batch(),
            Err(ReportError::ResourceExhausted {
                resource: Resource::BatchBytes,
                ..
            })
        ));
    }
}
