//! End-to-end report processing.
//!
//! A run makes three passes:
//!
//! 1. workbook → Combined Report, one record at a time
//! 2. Combined Report → Processed Report, in batches
//! 3. Combined Report → ProcessedDetailed Report, in batches, using the
//!    occurrence index left by pass 2
//!
//! Any terminal error, including cancellation, discards everything written
//! so far; callers get either all three reports or none.

use crate::aggregate::ChunkedAggregator;
use crate::combined::{BatchReader, CombinedWriter};
use crate::config::ProcessorConfig;
use crate::context::{ReportContext, ReportKind};
use crate::detail::DetailCalculator;
use crate::error::{ReportError, Result};
use crate::schema::HEADER_MAP_VERSION;
use crate::sheet::{ingest, SheetSource, Workbook};
use log::info;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// The three reports of a successful run.
#[derive(Debug, Clone)]
pub struct ReportOutputs {
    pub combined: Vec<u8>,
    pub processed: Vec<u8>,
    pub detailed: Vec<u8>,
    pub summary: RunSummary,
}

impl ReportOutputs {
    /// The bytes of one report.
    pub fn report(&self, kind: ReportKind) -> &[u8] {
        match kind {
            ReportKind::Combined => &self.combined,
            ReportKind::Processed => &self.processed,
            ReportKind::ProcessedDetailed => &self.detailed,
        }
    }
}

/// Counters describing a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Header alias table the sheets were mapped with.
    pub header_map_version: u32,
    pub sheets_read: usize,
    pub sheets_skipped: usize,
    pub malformed_rows: usize,
    pub combined_rows: usize,
    pub distinct_keys: usize,
    pub duplicate_keys: usize,
    pub batches: usize,
}

/// Converts report workbooks into Combined, Processed and ProcessedDetailed
/// reports.
///
/// Holds only configuration; all per-run state lives inside a single call.
#[derive(Debug, Clone)]
pub struct ReportProcessor {
    config: ProcessorConfig,
}

impl ReportProcessor {
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        Ok(ReportProcessor { config })
    }

    /// Processes a workbook held in memory (`.xls`, `.xlsx`, `.xlsb`, `.ods`).
    pub fn process(&self, container: Vec<u8>, ctx: &ReportContext) -> Result<ReportOutputs> {
        self.process_source(Workbook::from_bytes(container)?, ctx)
    }

    /// Processes any sheet source.
    pub fn process_source<S: SheetSource>(
        &self,
        source: S,
        ctx: &ReportContext,
    ) -> Result<ReportOutputs> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()?;
        let mut summary = RunSummary {
            header_map_version: HEADER_MAP_VERSION,
            ..RunSummary::default()
        };

        let combined = self.write_combined(source, ctx, &mut summary)?;
        let (processed, detailed) = self.write_derived(&combined, &pool, ctx, &mut summary)?;

        info!(
            "Processed {} rows from {} sheet(s) with header map v{}: {} keys, {} duplicated, {} malformed rows skipped",
            summary.combined_rows,
            summary.sheets_read,
            summary.header_map_version,
            summary.distinct_keys,
            summary.duplicate_keys,
            summary.malformed_rows
        );

        Ok(ReportOutputs {
            combined,
            processed,
            detailed,
            summary,
        })
    }

    /// Pass 1: streams records into the Combined Report.
    fn write_combined<S: SheetSource>(
        &self,
        source: S,
        ctx: &ReportContext,
        summary: &mut RunSummary,
    ) -> Result<Vec<u8>> {
        let mut records = ingest(source);
        let mut writer = CombinedWriter::new(Vec::new(), ctx);

        for record in records.by_ref() {
            writer.write_record(&record?)?;
            if writer.rows_written() % self.config.chunk_size == 0 {
                ctx.checkpoint(writer.rows_written() / self.config.chunk_size)?;
            }
        }

        let stats = records.stats();
        summary.sheets_read = stats.sheets_read;
        summary.sheets_skipped = stats.sheets_skipped;
        summary.malformed_rows = stats.malformed_rows;
        summary.combined_rows = writer.rows_written();

        if writer.rows_written() == 0 {
            return Err(ReportError::EmptyWorkbook);
        }
        writer.finish()
    }

    /// Passes 2 and 3: aggregation, then detail annotation.
    fn write_derived(
        &self,
        combined: &[u8],
        pool: &ThreadPool,
        ctx: &ReportContext,
        summary: &mut RunSummary,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut batches = self.batches(combined)?;
        let mut aggregator = ChunkedAggregator::new(pool, self.config.max_tracked_keys);
        while let Some(batch) = batches.next_batch()? {
            aggregator.consume_batch(&batch)?;
            ctx.checkpoint(batches.batches_read())?;
        }
        summary.batches = batches.batches_read();
        let (processed, index) = aggregator.finish(Vec::new(), ctx)?;
        summary.distinct_keys = index.len();
        summary.duplicate_keys = index.duplicate_keys();

        let mut batches = self.batches(combined)?;
        let mut detail = DetailCalculator::new(&index, pool, Vec::new(), batches.headers(), ctx)?;
        while let Some(batch) = batches.next_batch()? {
            detail.consume_batch(&batch)?;
            ctx.checkpoint(batches.batches_read())?;
        }
        let detailed = detail.finish()?;

        Ok((processed, detailed))
    }

    fn batches<'a>(&self, combined: &'a [u8]) -> Result<BatchReader<'a>> {
        BatchReader::new(
            combined,
            self.config.chunk_size,
            self.config.max_batch_bytes,
        )
    }
}

/// Processes a workbook with default settings and the given batch size.
pub fn process(container: Vec<u8>, chunk_size: usize) -> Result<ReportOutputs> {
    let config = ProcessorConfig::default().with_chunk_size(chunk_size);
    ReportProcessor::new(config)?.process(container, &ReportContext::default())
}
