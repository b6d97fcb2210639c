//! Per-request context: report metadata and cancellation.
//!
//! Nothing here is shared between requests. Every call to
//! [`ReportProcessor::process`](crate::ReportProcessor::process) gets its own
//! context, and with it its own cancellation flag.

use crate::error::{ReportError, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The three reports a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    Combined,
    Processed,
    ProcessedDetailed,
}

impl ReportKind {
    pub const ALL: [ReportKind; 3] = [
        ReportKind::Combined,
        ReportKind::Processed,
        ReportKind::ProcessedDetailed,
    ];

    /// Value written to the `report_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Combined => "Combined",
            ReportKind::Processed => "Processed",
            ReportKind::ProcessedDetailed => "ProcessedDetailed",
        }
    }

    /// Download file name, e.g.
    /// `Processed_PO_Report_01012024_to_31012024_20240201_101500.csv`.
    pub fn file_name(&self, date_range: Option<&DateRange>, stamp: &str) -> String {
        match date_range {
            Some(range) => format!(
                "{}_PO_Report_{}_to_{}_{}.csv",
                self.as_str(),
                range.from.replace('-', ""),
                range.to.replace('-', ""),
                stamp
            ),
            None => format!("{}_PO_Report_{}.csv", self.as_str(), stamp),
        }
    }
}

/// Reporting period the source workbook was generated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub from: String,
    pub to: String,
}

impl DateRange {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        DateRange {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.from, self.to)
    }
}

/// Cooperative cancellation flag, checked at batch boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Takes effect at the next batch boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context for one processing request.
///
/// `generated_at` is caller-supplied so that two runs over the same workbook
/// with the same context produce byte-identical reports.
#[derive(Debug, Clone, Default)]
pub struct ReportContext {
    pub date_range: Option<DateRange>,
    pub generated_at: Option<String>,
    pub cancel: CancellationToken,
}

impl ReportContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_generated_at(mut self, generated_at: impl Into<String>) -> Self {
        self.generated_at = Some(generated_at.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Metadata cells that lead every row of a `kind` report.
    pub(crate) fn stamp(&self, kind: ReportKind) -> [String; 3] {
        [
            kind.as_str().to_string(),
            self.date_range
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_default(),
            self.generated_at.clone().unwrap_or_default(),
        ]
    }

    /// Fails with `Cancelled` if cancellation was requested.
    pub(crate) fn checkpoint(&self, batches: usize) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ReportError::Cancelled { batches });
        }
        Ok(())
    }
}

/// Column names of the metadata cells produced by [`ReportContext::stamp`].
pub const METADATA_COLUMNS: [&str; 3] = ["report_type", "date_range", "generated_at"];
