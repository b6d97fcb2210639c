//! Error types for the report engine.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, ReportError>;

/// Which configured ceiling a run ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Distinct aggregation keys tracked by the aggregator.
    TrackedKeys,
    /// Raw bytes buffered for one batch.
    BatchBytes,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::TrackedKeys => f.write_str("tracked keys"),
            Resource::BatchBytes => f.write_str("batch bytes"),
        }
    }
}

/// Errors that can occur while producing reports.
#[derive(Error, Debug)]
pub enum ReportError {
    /// Failed to open, read or write a file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding or decoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The spreadsheet container could not be opened or a sheet could not be read
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    /// Worker pool could not be started
    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// One row failed type coercion. Recovered: the row is skipped.
    #[error("Malformed record in sheet '{sheet}' at row {row}: {message}")]
    MalformedRecord {
        sheet: String,
        row: usize,
        message: String,
    },

    /// The workbook has no sheets, or no data rows in any sheet
    #[error("Workbook contains no sheets or no data rows")]
    EmptyWorkbook,

    /// A column needed to form the aggregation key is missing
    #[error("Inconsistent schema in sheet '{sheet}': missing {column}")]
    InconsistentSchema { sheet: String, column: String },

    /// A configured memory ceiling was exceeded
    #[error("Resource exhausted: {resource} reached {observed}, limit is {limit}; reduce the chunk size or split the input")]
    ResourceExhausted {
        resource: Resource,
        limit: usize,
        observed: usize,
    },

    /// A sum or conversion no longer fits the fixed-point scale
    #[error("Amount overflow computing {field} for key {key}")]
    AmountOverflow { key: String, field: &'static str },

    /// The run was cancelled at a batch boundary
    #[error("Processing cancelled after {batches} batch(es)")]
    Cancelled { batches: usize },

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing command line arguments
    #[error("Missing arguments. Usage: po-report-engine <workbook> <output-dir> [from-date] [to-date]")]
    MissingArgument,
}

impl ReportError {
    /// Returns `true` for errors that only affect a single row.
    pub fn is_row_level(&self) -> bool {
        matches!(self, ReportError::MalformedRecord { .. })
    }
}
