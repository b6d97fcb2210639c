//! Sheet reading and record normalization.
//!
//! [`RecordStream`] walks a workbook sheet by sheet. Only the current sheet's
//! cells are loaded; the previous sheet is dropped before the next one is
//! opened. Each row is normalized into a [`Record`] through the sheet's
//! [`SheetLayout`].
//!
//! The reporting service writes a header row on its first sheet only and
//! splits long reports into headerless continuation sheets. Such sheets reuse
//! the most recent header layout when their width matches it and are skipped
//! with a warning otherwise.

use crate::error::{ReportError, Result};
use crate::money::{parse_decimal, Amount, Rate};
use crate::record::Record;
use crate::schema::{Field, RatePart, SheetLayout};
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader, Sheets};
use indexmap::IndexMap;
use log::{debug, warn};
use rust_decimal::Decimal;
use std::fs;
use std::io::Cursor;
use std::path::Path;

/// How date cells are written into the reports.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A multi-sheet spreadsheet container.
pub trait SheetSource {
    /// Sheet names in container order.
    fn sheet_names(&self) -> Vec<String>;

    /// Loads the cells of one sheet.
    fn load_sheet(&mut self, name: &str) -> Result<Range<Data>>;
}

/// An `.xls`, `.xlsx`, `.xlsb` or `.ods` workbook held in memory.
pub struct Workbook {
    sheets: Sheets<Cursor<Vec<u8>>>,
}

impl Workbook {
    /// Opens a workbook from raw bytes; the format is detected from content.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let sheets = open_workbook_auto_from_rs(Cursor::new(bytes))?;
        Ok(Workbook { sheets })
    }

    /// Reads and opens a workbook file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Workbook::from_bytes(fs::read(path)?)
    }
}

impl SheetSource for Workbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.sheet_names()
    }

    fn load_sheet(&mut self, name: &str) -> Result<Range<Data>> {
        Ok(self.sheets.worksheet_range(name)?)
    }
}

/// Workbook built in memory, for tests and for callers that already hold
/// decoded cells.
#[derive(Debug, Default)]
pub struct MemoryWorkbook {
    sheets: Vec<(String, Option<Range<Data>>)>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sheet. Rows may have different lengths; short rows are
    /// padded with empty cells.
    pub fn with_sheet(mut self, name: impl Into<String>, rows: Vec<Vec<Data>>) -> Self {
        let height = rows.len();
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);

        let range = if height == 0 || width == 0 {
            Range::empty()
        } else {
            let mut range = Range::new((0, 0), ((height - 1) as u32, (width - 1) as u32));
            for (r, row) in rows.into_iter().enumerate() {
                for (c, cell) in row.into_iter().enumerate() {
                    range.set_value((r as u32, c as u32), cell);
                }
            }
            range
        };

        self.sheets.push((name.into(), Some(range)));
        self
    }
}

impl SheetSource for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn load_sheet(&mut self, name: &str) -> Result<Range<Data>> {
        self.sheets
            .iter_mut()
            .find(|(sheet, _)| sheet == name)
            .and_then(|(_, range)| range.take())
            .ok_or(ReportError::Spreadsheet(calamine::Error::Msg(
                "sheet missing or already read",
            )))
    }
}

/// Counters collected while reading a workbook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Sheets whose rows were read.
    pub sheets_read: usize,
    /// Continuation sheets skipped for a column-count mismatch.
    pub sheets_skipped: usize,
    /// Records produced.
    pub records: usize,
    /// Rows dropped as `MalformedRecord`.
    pub malformed_rows: usize,
}

/// Lazily reads normalized records from a workbook.
pub fn ingest<S: SheetSource>(source: S) -> RecordStream<S> {
    RecordStream::new(source)
}

/// Iterator over the records of a workbook, sheet by sheet.
///
/// Malformed rows are logged and skipped. Workbook-level failures are
/// yielded once as `Err`, after which the stream ends. The stream cannot be
/// restarted.
pub struct RecordStream<S: SheetSource> {
    source: S,
    pending: std::vec::IntoIter<String>,
    current: Option<SheetCursor>,
    template: Option<SheetLayout>,
    stats: IngestStats,
    started: bool,
    finished: bool,
}

struct SheetCursor {
    name: String,
    layout: SheetLayout,
    range: Range<Data>,
    next_row: usize,
    /// 1-based sheet row number of the range's first row.
    first_row_number: usize,
}

impl<S: SheetSource> RecordStream<S> {
    fn new(source: S) -> Self {
        RecordStream {
            source,
            pending: Vec::new().into_iter(),
            current: None,
            template: None,
            stats: IngestStats::default(),
            started: false,
            finished: false,
        }
    }

    /// Counters so far. Final once the stream is exhausted.
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Opens the next sheet. Returns `Ok(false)` once no sheets remain.
    fn open_next_sheet(&mut self) -> Result<bool> {
        let Some(name) = self.pending.next() else {
            return Ok(false);
        };

        let range = self.source.load_sheet(&name)?;
        self.stats.sheets_read += 1;
        if range.is_empty() {
            debug!("Sheet '{}' is empty", name);
            return Ok(true);
        }

        let first_row_number = range.start().map(|(row, _)| row as usize + 1).unwrap_or(1);
        let header: Vec<String> = (0..range.width())
            .map(|col| cell_text(range.get((0, col))))
            .collect();

        let (layout, next_row) = match SheetLayout::from_header_row(&header) {
            Some(layout) => {
                layout.require_key_columns(&name)?;
                self.template = Some(layout.clone());
                (layout, 1)
            }
            None => match &self.template {
                Some(template) if template.width() == range.width() => (template.clone(), 0),
                Some(template) => {
                    warn!(
                        "Skipping sheet '{}' due to column mismatch: expected {}, got {}",
                        name,
                        template.width(),
                        range.width()
                    );
                    self.stats.sheets_read -= 1;
                    self.stats.sheets_skipped += 1;
                    return Ok(true);
                }
                None => {
                    return Err(ReportError::InconsistentSchema {
                        sheet: name,
                        column: "header row".to_string(),
                    })
                }
            },
        };

        debug!(
            "Reading sheet '{}' ({} rows, {} columns)",
            name,
            range.height() - next_row,
            range.width()
        );
        self.current = Some(SheetCursor {
            name,
            layout,
            range,
            next_row,
            first_row_number,
        });
        Ok(true)
    }
}

impl<S: SheetSource> Iterator for RecordStream<S> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            let names = self.source.sheet_names();
            if names.is_empty() {
                self.finished = true;
                return Some(Err(ReportError::EmptyWorkbook));
            }
            self.pending = names.into_iter();
        }

        loop {
            if self.finished {
                return None;
            }

            let Some(cursor) = self.current.as_mut() else {
                match self.open_next_sheet() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.finished = true;
                        return None;
                    }
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
            };

            if cursor.next_row >= cursor.range.height() {
                // Releases the sheet's cells before the next sheet is loaded.
                self.current = None;
                continue;
            }

            let row_idx = cursor.next_row;
            cursor.next_row += 1;
            let row_number = cursor.first_row_number + row_idx;
            let raw: Vec<&Data> = (0..cursor.range.width())
                .map(|col| cursor.range.get((row_idx, col)).unwrap_or(&Data::Empty))
                .collect();

            if raw.iter().all(|cell| is_blank(cell)) {
                continue;
            }

            match normalize_row(&cursor.layout, &cursor.name, row_number, &raw) {
                Ok(record) => {
                    self.stats.records += 1;
                    return Some(Ok(record));
                }
                Err(e) if e.is_row_level() => {
                    warn!("{}", e);
                    self.stats.malformed_rows += 1;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Maps one raw row onto the canonical record shape.
pub fn normalize_row(
    layout: &SheetLayout,
    sheet: &str,
    row: usize,
    raw: &[&Data],
) -> Result<Record> {
    let cell = |field: Field| layout.position(field).and_then(|idx| raw.get(idx).copied());
    let malformed = |message: String| ReportError::MalformedRecord {
        sheet: sheet.to_string(),
        row,
        message,
    };

    let po_number = cell_text(cell(Field::PoNumber));
    if po_number.is_empty() {
        return Err(ReportError::InconsistentSchema {
            sheet: sheet.to_string(),
            column: format!("po_number at row {}", row),
        });
    }

    let line_number = cell_line_number(cell(Field::LineNumber))
        .map_err(|e| malformed(format!("line_number {}", e)))?;
    let line_amount = cell_amount(cell(Field::LineAmount))
        .map_err(|e| malformed(format!("line_amount {}", e)))?
        .unwrap_or(Amount::ZERO);
    let amount_received = cell_amount(cell(Field::AmountReceived))
        .map_err(|e| malformed(format!("amount_received {}", e)))?;
    let grn_amount = cell_amount(cell(Field::GrnAmount))
        .map_err(|e| malformed(format!("grn_amount {}", e)))?;
    let exchange_rate = match cell_rate(cell(Field::ExchangeRate))
        .map_err(|e| malformed(format!("exchange_rate {}", e)))?
    {
        Some(rate) => Some(rate),
        None => derived_rate(layout, raw),
    };

    let extras: IndexMap<String, String> = layout
        .extras()
        .map(|(idx, name)| (name.to_string(), cell_text(raw.get(idx).copied())))
        .collect();

    Ok(Record {
        sheet: sheet.to_string(),
        po_number,
        invoice_number: cell_text(cell(Field::InvoiceNumber)),
        line_number,
        currency: cell_text(cell(Field::Currency)),
        line_amount,
        amount_received,
        exchange_rate,
        grn_amount,
        extras,
    })
}

/// Functional / transaction amount, when a sheet carries both and the
/// transaction amount is non-zero.
fn derived_rate(layout: &SheetLayout, raw: &[&Data]) -> Option<Rate> {
    let amount = |part: RatePart| {
        layout
            .rate_part_position(part)
            .and_then(|idx| raw.get(idx).copied())
            .and_then(|cell| cell_amount(Some(cell)).ok().flatten())
    };
    let functional = amount(RatePart::Functional)?;
    let transaction = amount(RatePart::Transaction)?;
    functional.ratio(transaction)
}

fn is_blank(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Cell contents as trimmed text.
fn cell_text(cell: Option<&Data>) -> String {
    match cell {
        None | Some(Data::Empty) => String::new(),
        Some(Data::String(s)) => s.trim().to_string(),
        Some(Data::Float(f)) => f.to_string(),
        Some(Data::Int(i)) => i.to_string(),
        Some(Data::DateTime(dt)) => match dt.as_datetime() {
            Some(datetime) => datetime.format(DATETIME_FORMAT).to_string(),
            None => dt.as_f64().to_string(),
        },
        Some(Data::DateTimeIso(s)) | Some(Data::DurationIso(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

/// Amount cell at 4 decimal places. Values too large for that scale are an
/// error, like text that is not a number.
fn cell_amount(cell: Option<&Data>) -> std::result::Result<Option<Amount>, String> {
    match cell {
        Some(Data::Float(f)) => Amount::from_f64(*f)
            .map(Some)
            .ok_or_else(|| format!("is out of range: {}", f)),
        other => match cell_decimal(other)? {
            Some(value) => Amount::new(value)
                .map(Some)
                .ok_or_else(|| format!("is out of range: {}", value)),
            None => Ok(None),
        },
    }
}

/// Rate cell at 6 decimal places.
fn cell_rate(cell: Option<&Data>) -> std::result::Result<Option<Rate>, String> {
    match cell {
        Some(Data::Float(f)) => Rate::from_f64(*f)
            .map(Some)
            .ok_or_else(|| format!("is out of range: {}", f)),
        other => match cell_decimal(other)? {
            Some(value) => Rate::new(value)
                .map(Some)
                .ok_or_else(|| format!("is out of range: {}", value)),
            None => Ok(None),
        },
    }
}

/// Numeric cell as a decimal. Blank cells are `None`; text that is not a
/// number is an error.
fn cell_decimal(cell: Option<&Data>) -> std::result::Result<Option<Decimal>, String> {
    match cell {
        None | Some(Data::Empty) => Ok(None),
        Some(Data::Float(f)) => Decimal::try_from(*f)
            .map(Some)
            .map_err(|_| format!("is not a finite number: {}", f)),
        Some(Data::Int(i)) => Ok(Some(Decimal::from(*i))),
        Some(Data::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Data::String(s)) => parse_decimal(s)
            .map(Some)
            .map_err(|_| format!("is not a number: '{}'", s.trim())),
        Some(other) => Err(format!("is not a number: '{}'", other)),
    }
}

/// Line numbers arrive as floats from most readers; they must be integral.
/// Blank cells read as line 0.
fn cell_line_number(cell: Option<&Data>) -> std::result::Result<i64, String> {
    let value = match cell_decimal(cell)? {
        Some(value) => value,
        None => return Ok(0),
    };
    if !value.fract().is_zero() {
        return Err(format!("is not a whole number: {}", value));
    }
    i64::try_from(value.trunc()).map_err(|_| format!("is out of range: {}", value))
}
