//! The ProcessedDetailed Report: one annotated row per combined row.
//!
//! Runs after aggregation has finished, because whether a row is a duplicate
//! depends on the final occurrence count of its key. Only the first-seen row
//! of a key keeps its line amount; later rows carry zero, so summing the
//! adjusted column per key reproduces the Processed Report's
//! `adjusted_line_amount`.

use crate::aggregate::{KeyOccurrence, KeyOccurrenceIndex};
use crate::combined::CombinedLine;
use crate::context::{ReportContext, ReportKind};
use crate::error::{ReportError, Result};
use crate::money::{Amount, Rate};
use crate::record::{AggregationKey, CombinedRow};
use crate::schema::Field;
use csv::{StringRecord, Writer};
use log::{debug, warn};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::HashMap;
use std::io::Write;

/// Derived fields appended to a combined row.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedRecord {
    pub duplicate_indicator: bool,
    /// 1-based position among rows sharing the key, in stream order.
    pub duplicate_index: u64,
    pub adjusted_line_amount: Amount,
    pub conversion_rate: Rate,
    pub sar_amount: Amount,
    pub amount_received_sar: Amount,
    pub grn_amount: Amount,
    pub grn_amount_sar: Amount,
}

impl DetailedRecord {
    /// Columns appended after the combined columns.
    pub const COLUMNS: [&'static str; 7] = [
        "duplicate_indicator",
        "duplicate_index",
        "adjusted_line_amount",
        "conversion_rate",
        "sar_amount",
        "amount_received_sar",
        "grn_amount_sar",
    ];

    /// Computes the derived fields of one row.
    ///
    /// The row's own exchange rate wins over the key's resolved rate; with
    /// neither, the rate is 1. Fails when a converted amount no longer fits
    /// 4 decimal places.
    pub fn compute(
        row: &CombinedRow,
        occurrence: &KeyOccurrence,
        duplicate_index: u64,
    ) -> Result<Self> {
        let adjusted_line_amount = if duplicate_index > 1 {
            Amount::ZERO
        } else {
            row.line_amount
        };
        let conversion_rate = row
            .exchange_rate
            .or(occurrence.resolved_rate)
            .unwrap_or(Rate::ONE);
        let received = row.received_or_zero();
        let overflow = |field| ReportError::AmountOverflow {
            key: row.key().to_string(),
            field,
        };

        Ok(DetailedRecord {
            duplicate_indicator: occurrence.is_duplicate(),
            duplicate_index,
            adjusted_line_amount,
            conversion_rate,
            sar_amount: row
                .line_amount
                .checked_mul(conversion_rate)
                .ok_or_else(|| overflow("sar_amount"))?,
            amount_received_sar: received
                .checked_mul(conversion_rate)
                .ok_or_else(|| overflow("amount_received_sar"))?,
            grn_amount: row.grn_amount.unwrap_or(Amount::ZERO),
            grn_amount_sar: received
                .checked_sub(adjusted_line_amount)
                .and_then(|net| net.checked_mul(conversion_rate))
                .ok_or_else(|| overflow("grn_amount_sar"))?,
        })
    }

    fn appended_fields(&self) -> [String; 7] {
        [
            self.duplicate_indicator.to_string(),
            self.duplicate_index.to_string(),
            self.adjusted_line_amount.to_string(),
            self.conversion_rate.to_string(),
            self.sar_amount.to_string(),
            self.amount_received_sar.to_string(),
            self.grn_amount_sar.to_string(),
        ]
    }
}

/// Writes the detailed report batch by batch from a finished key index.
pub struct DetailCalculator<'i, 'p, W: Write> {
    index: &'i KeyOccurrenceIndex,
    /// Rows seen so far per key, borrowing keys from the index.
    seen: HashMap<&'i AggregationKey, u64>,
    pool: &'p ThreadPool,
    writer: Writer<W>,
    stamp: [String; 3],
    grn_column: Option<usize>,
    rows: usize,
}

impl<'i, 'p, W: Write> DetailCalculator<'i, 'p, W> {
    /// Writes the header: the combined columns followed by the derived ones.
    pub fn new(
        index: &'i KeyOccurrenceIndex,
        pool: &'p ThreadPool,
        writer: W,
        combined_headers: &StringRecord,
        ctx: &ReportContext,
    ) -> Result<Self> {
        let mut writer = Writer::from_writer(writer);
        writer.write_record(
            combined_headers
                .iter()
                .chain(DetailedRecord::COLUMNS.iter().copied()),
        )?;

        Ok(DetailCalculator {
            index,
            seen: HashMap::with_capacity(index.len()),
            pool,
            writer,
            stamp: ctx.stamp(ReportKind::ProcessedDetailed),
            grn_column: combined_headers
                .iter()
                .position(|h| h == Field::GrnAmount.name()),
            rows: 0,
        })
    }

    /// Annotates and writes one batch. Batches must arrive in stream order.
    pub fn consume_batch(&mut self, batch: &[CombinedLine]) -> Result<()> {
        // Positions depend on stream order, so they are assigned serially.
        let positioned: Vec<(KeyOccurrence, u64)> = batch
            .iter()
            .map(|line| self.position(&line.row))
            .collect();

        let computed: Vec<DetailedRecord> = self.pool.install(|| {
            batch
                .par_iter()
                .zip(positioned.par_iter())
                .map(|(line, (occurrence, index))| {
                    DetailedRecord::compute(&line.row, occurrence, *index)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        for (line, detail) in batch.iter().zip(computed) {
            self.write_row(&line.raw, &detail)?;
        }
        self.rows += batch.len();
        debug!("Wrote {} detailed rows", self.rows);
        Ok(())
    }

    fn position(&mut self, row: &CombinedRow) -> (KeyOccurrence, u64) {
        let key = row.key();
        let index: &'i KeyOccurrenceIndex = self.index;
        match index.get_key_value(&key) {
            Some((stored, occurrence)) => {
                let seen = self.seen.entry(stored).or_insert(0);
                *seen += 1;
                (*occurrence, *seen)
            }
            None => {
                warn!("Key {} missing from the occurrence index", key);
                (
                    KeyOccurrence {
                        count: 1,
                        resolved_rate: None,
                    },
                    1,
                )
            }
        }
    }

    fn write_row(&mut self, raw: &StringRecord, detail: &DetailedRecord) -> Result<()> {
        let grn = detail.grn_amount.to_string();
        let combined = raw.iter().enumerate().map(|(idx, value)| {
            if idx < self.stamp.len() {
                self.stamp[idx].as_str()
            } else if Some(idx) == self.grn_column {
                grn.as_str()
            } else {
                value
            }
        });
        let appended = detail.appended_fields();
        self.writer
            .write_record(combined.chain(appended.iter().map(String::as_str)))?;
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| ReportError::Io(e.into_error()))
    }
}
