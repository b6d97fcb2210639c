//! Chunked aggregation into the Processed Report.
//!
//! The aggregator keeps one [`AggregateState`] per [`AggregationKey`] for the
//! whole pass and nothing else: each batch is split into contiguous slices,
//! the slices are folded in parallel, and the partial results are merged back
//! in slice order by a single writer. Merging in order keeps first-seen
//! values (exchange rate, currency, first line amount) tied to stream order.

use crate::combined::CombinedLine;
use crate::context::{ReportContext, ReportKind, METADATA_COLUMNS};
use crate::error::{ReportError, Resource, Result};
use crate::money::{Amount, Rate};
use crate::record::{AggregationKey, CombinedRow};
use csv::Writer;
use indexmap::IndexMap;
use log::debug;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io::Write;

/// Running totals for one key.
///
/// # Invariants
///
/// - `occurrence_count >= 1` once the state exists
/// - `first_line_amount` and `currency` come from the first row seen
/// - `resolved_exchange_rate`, once set, never changes
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateState {
    pub currency: String,
    pub occurrence_count: u64,
    pub sum_line_amount: Amount,
    pub sum_amount_received: Amount,
    /// Line amount of the first-seen row; the only amount that survives
    /// deduplication.
    pub first_line_amount: Amount,
    /// First non-null exchange rate seen for the key.
    pub resolved_exchange_rate: Option<Rate>,
}

impl AggregateState {
    /// Starts a state from the first row seen for a key.
    pub fn from_row(row: &CombinedRow) -> Self {
        AggregateState {
            currency: row.currency.clone(),
            occurrence_count: 1,
            sum_line_amount: row.line_amount,
            sum_amount_received: row.received_or_zero(),
            first_line_amount: row.line_amount,
            resolved_exchange_rate: row.exchange_rate,
        }
    }

    /// Folds in a later row with the same key.
    pub fn observe(&mut self, row: &CombinedRow) -> Result<()> {
        let overflowed = |field| overflow(&row.key(), field);
        self.sum_line_amount = self
            .sum_line_amount
            .checked_add(row.line_amount)
            .ok_or_else(|| overflowed("line_amount"))?;
        self.sum_amount_received = self
            .sum_amount_received
            .checked_add(row.received_or_zero())
            .ok_or_else(|| overflowed("amount_received"))?;
        self.occurrence_count += 1;
        if self.resolved_exchange_rate.is_none() {
            self.resolved_exchange_rate = row.exchange_rate;
        }
        Ok(())
    }

    /// Folds in the state of rows that come after this state's rows.
    pub fn absorb(&mut self, key: &AggregationKey, later: AggregateState) -> Result<()> {
        self.sum_line_amount = self
            .sum_line_amount
            .checked_add(later.sum_line_amount)
            .ok_or_else(|| overflow(key, "line_amount"))?;
        self.sum_amount_received = self
            .sum_amount_received
            .checked_add(later.sum_amount_received)
            .ok_or_else(|| overflow(key, "amount_received"))?;
        self.occurrence_count += later.occurrence_count;
        if self.resolved_exchange_rate.is_none() {
            self.resolved_exchange_rate = later.resolved_exchange_rate;
        }
        Ok(())
    }

    pub fn is_duplicate(&self) -> bool {
        self.occurrence_count > 1
    }
}

/// One row of the Processed Report.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub key: AggregationKey,
    pub currency: String,
    pub line_amount: Amount,
    pub adjusted_line_amount: Amount,
    pub amount_received: Amount,
    pub conversion_rate: Rate,
    pub difference: Amount,
    pub difference_sar: Amount,
    pub occurrence_count: u64,
    pub duplicate_flag: bool,
}

impl ProcessedRecord {
    /// Column names, after the metadata columns.
    pub const COLUMNS: [&'static str; 12] = [
        "po_number",
        "invoice_number",
        "line_number",
        "currency",
        "line_amount",
        "adjusted_line_amount",
        "amount_received",
        "conversion_rate",
        "difference",
        "difference_sar",
        "occurrence_count",
        "duplicate_flag",
    ];

    /// Finalizes a key's state. A key that never saw an exchange rate
    /// converts at 1.
    pub fn from_state(key: AggregationKey, state: &AggregateState) -> Result<Self> {
        let conversion_rate = state.resolved_exchange_rate.unwrap_or(Rate::ONE);
        let difference = state
            .sum_line_amount
            .checked_sub(state.sum_amount_received)
            .ok_or_else(|| overflow(&key, "difference"))?;
        let difference_sar = difference
            .checked_mul(conversion_rate)
            .ok_or_else(|| overflow(&key, "difference_sar"))?;
        Ok(ProcessedRecord {
            key,
            currency: state.currency.clone(),
            line_amount: state.sum_line_amount,
            adjusted_line_amount: state.first_line_amount,
            amount_received: state.sum_amount_received,
            conversion_rate,
            difference,
            difference_sar,
            occurrence_count: state.occurrence_count,
            duplicate_flag: state.is_duplicate(),
        })
    }

    fn fields(&self) -> [String; 12] {
        [
            self.key.po_number.clone(),
            self.key.invoice_number.clone(),
            self.key.line_number.to_string(),
            self.currency.clone(),
            self.line_amount.to_string(),
            self.adjusted_line_amount.to_string(),
            self.amount_received.to_string(),
            self.conversion_rate.to_string(),
            self.difference.to_string(),
            self.difference_sar.to_string(),
            self.occurrence_count.to_string(),
            self.duplicate_flag.to_string(),
        ]
    }
}

/// What the detail pass needs to know about a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOccurrence {
    pub count: u64,
    pub resolved_rate: Option<Rate>,
}

impl KeyOccurrence {
    pub fn is_duplicate(&self) -> bool {
        self.count > 1
    }
}

/// Final occurrence counts per key, handed from the aggregator to the detail
/// calculator once aggregation is complete.
#[derive(Debug, Default)]
pub struct KeyOccurrenceIndex {
    entries: HashMap<AggregationKey, KeyOccurrence>,
}

impl KeyOccurrenceIndex {
    pub fn get(&self, key: &AggregationKey) -> Option<&KeyOccurrence> {
        self.entries.get(key)
    }

    /// Like [`get`](Self::get), but also lends out the stored key.
    pub fn get_key_value(&self, key: &AggregationKey) -> Option<(&AggregationKey, &KeyOccurrence)> {
        self.entries.get_key_value(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of keys seen more than once.
    pub fn duplicate_keys(&self) -> usize {
        self.entries.values().filter(|o| o.is_duplicate()).count()
    }
}

/// Batch-by-batch aggregator over the Combined Report.
pub struct ChunkedAggregator<'p> {
    states: HashMap<AggregationKey, AggregateState>,
    pool: &'p ThreadPool,
    max_tracked_keys: usize,
    rows: usize,
}

impl<'p> ChunkedAggregator<'p> {
    pub fn new(pool: &'p ThreadPool, max_tracked_keys: usize) -> Self {
        ChunkedAggregator {
            states: HashMap::new(),
            pool,
            max_tracked_keys,
            rows: 0,
        }
    }

    /// Folds one batch into the running state. Batches must arrive in
    /// stream order.
    pub fn consume_batch(&mut self, batch: &[CombinedLine]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let slice_len = batch.len().div_ceil(self.pool.current_num_threads()).max(1);
        let partials: Vec<IndexMap<AggregationKey, AggregateState>> = self
            .pool
            .install(|| {
                batch
                    .par_chunks(slice_len)
                    .map(aggregate_slice)
                    .collect::<Result<Vec<_>>>()
            })?;

        for partial in partials {
            for (key, state) in partial {
                match self.states.entry(key) {
                    Entry::Occupied(mut entry) => {
                        let key = entry.key().clone();
                        entry.get_mut().absorb(&key, state)?;
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(state);
                    }
                }
            }
            if self.states.len() > self.max_tracked_keys {
                return Err(ReportError::ResourceExhausted {
                    resource: Resource::TrackedKeys,
                    limit: self.max_tracked_keys,
                    observed: self.states.len(),
                });
            }
        }

        self.rows += batch.len();
        debug!(
            "Aggregated {} rows, {} distinct keys so far",
            self.rows,
            self.states.len()
        );
        Ok(())
    }

    /// Writes the Processed Report, sorted by key, and returns the writer
    /// together with the occurrence index for the detail pass. The key map
    /// is consumed in the process.
    pub fn finish<W: Write>(self, writer: W, ctx: &ReportContext) -> Result<(W, KeyOccurrenceIndex)> {
        let stamp = ctx.stamp(ReportKind::Processed);
        let mut csv_writer = Writer::from_writer(writer);
        csv_writer.write_record(METADATA_COLUMNS.iter().chain(ProcessedRecord::COLUMNS.iter()))?;

        let mut states: Vec<(AggregationKey, AggregateState)> = self.states.into_iter().collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));

        let mut entries = HashMap::with_capacity(states.len());
        for (key, state) in states {
            let processed = ProcessedRecord::from_state(key, &state)?;
            csv_writer.write_record(stamp.iter().chain(processed.fields().iter()))?;
            entries.insert(
                processed.key,
                KeyOccurrence {
                    count: state.occurrence_count,
                    resolved_rate: state.resolved_exchange_rate,
                },
            );
        }

        let writer = csv_writer
            .into_inner()
            .map_err(|e| ReportError::Io(e.into_error()))?;
        Ok((writer, KeyOccurrenceIndex { entries }))
    }
}

/// Folds a contiguous slice of rows, preserving first-seen order.
fn aggregate_slice(lines: &[CombinedLine]) -> Result<IndexMap<AggregationKey, AggregateState>> {
    let mut partial: IndexMap<AggregationKey, AggregateState> = IndexMap::new();
    for line in lines {
        match partial.get_mut(&line.row.key()) {
            Some(state) => state.observe(&line.row)?,
            None => {
                partial.insert(line.row.key(), AggregateState::from_row(&line.row));
            }
        }
    }
    Ok(partial)
}

fn overflow(key: &AggregationKey, field: &'static str) -> ReportError {
    ReportError::AmountOverflow {
        key: key.to_string(),
        field,
    }
}
