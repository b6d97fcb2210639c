//! # PO Report Engine
//!
//! A streaming processor that turns a multi-sheet purchase-order report
//! workbook into three CSV reports:
//!
//! - **Combined**: every row of every sheet, normalized, in sheet order
//! - **Processed**: one row per `(po_number, invoice_number, line_number)`
//!   with summed amounts, conversion rate and difference
//! - **ProcessedDetailed**: every combined row with duplicate status and
//!   settlement-currency (SAR) amounts
//!
//! ## Design Principles
//!
//! - **Fixed-point arithmetic**: amounts use 4 decimal places, rates 6, via `rust_decimal`
//! - **Bounded memory**: one sheet while reading, one batch plus the key map while aggregating
//! - **Deterministic output**: processed rows sorted by key, first-seen values follow stream order
//! - **All or nothing**: terminal errors return no reports
//!
//! ## Example
//!
//! ```no_run
//! use po_report_engine::{preview, process};
//!
//! let workbook = std::fs::read("po_report.xlsx").unwrap();
//! let outputs = process(workbook, 10_000).unwrap();
//! let first_rows = preview(&outputs.processed, 10).unwrap();
//! println!("{} processed rows", first_rows.total_rows);
//! ```

pub mod aggregate;
pub mod combined;
pub mod config;
pub mod context;
pub mod detail;
pub mod error;
pub mod money;
pub mod pipeline;
pub mod preview;
pub mod record;
pub mod schema;
pub mod sheet;

pub use aggregate::{AggregateState, KeyOccurrence, KeyOccurrenceIndex, ProcessedRecord};
pub use config::ProcessorConfig;
pub use context::{CancellationToken, DateRange, ReportContext, ReportKind};
pub use detail::DetailedRecord;
pub use error::{ReportError, Resource, Result};
pub use money::{Amount, Rate};
pub use pipeline::{process, ReportOutputs, ReportProcessor, RunSummary};
pub use preview::{preview, Preview};
pub use record::{AggregationKey, Record};
pub use schema::HEADER_MAP_VERSION;
pub use sheet::{ingest, IngestStats, MemoryWorkbook, RecordStream, SheetSource, Workbook};
