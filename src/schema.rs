//! Header-to-field mapping for report sheets.
//!
//! The reporting service labels columns with human-readable headers whose
//! spelling drifts between report versions. Every accepted spelling is listed
//! here once; bump [`HEADER_MAP_VERSION`] when the table changes. Each run
//! reports the version it mapped with in its `RunSummary`.

use crate::error::{ReportError, Result};

/// Version of the header alias table below.
pub const HEADER_MAP_VERSION: u32 = 1;

/// Canonical record fields that sheet columns map onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    PoNumber,
    InvoiceNumber,
    LineNumber,
    Currency,
    LineAmount,
    AmountReceived,
    ExchangeRate,
    GrnAmount,
}

impl Field {
    /// Fields that form the aggregation key. A sheet missing any of them
    /// cannot be aggregated.
    pub const KEY: [Field; 3] = [Field::PoNumber, Field::InvoiceNumber, Field::LineNumber];

    /// All fields in combined-report column order.
    pub const ALL: [Field; 8] = [
        Field::PoNumber,
        Field::InvoiceNumber,
        Field::LineNumber,
        Field::Currency,
        Field::LineAmount,
        Field::AmountReceived,
        Field::ExchangeRate,
        Field::GrnAmount,
    ];

    /// Canonical column name used in every output report.
    pub fn name(&self) -> &'static str {
        match self {
            Field::PoNumber => "po_number",
            Field::InvoiceNumber => "invoice_number",
            Field::LineNumber => "line_number",
            Field::Currency => "currency",
            Field::LineAmount => "line_amount",
            Field::AmountReceived => "amount_received",
            Field::ExchangeRate => "exchange_rate",
            Field::GrnAmount => "grn_amount",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Field::PoNumber => &["po number", "po_number", "po no", "po #"],
            Field::InvoiceNumber => &["invoice number", "invoice_number", "invoice no", "invoice num"],
            Field::LineNumber => &["invoice line number", "line_number", "line number", "invoice line num"],
            Field::Currency => &["currency", "currency code"],
            Field::LineAmount => &["line amount", "line_amount"],
            Field::AmountReceived => &["amount received", "amount_received"],
            Field::ExchangeRate => &["exchange rate", "exchange_rate", "conversion rate"],
            Field::GrnAmount => &["grn amount", "grn_amount"],
        }
    }

    /// Looks up the field a sheet header maps to, ignoring case and
    /// surrounding whitespace.
    pub fn for_header(header: &str) -> Option<Field> {
        let wanted = header.trim().to_lowercase();
        Field::ALL
            .into_iter()
            .find(|field| field.aliases().contains(&wanted.as_str()))
    }
}

/// Columns used to derive an exchange rate when a sheet has no rate column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePart {
    /// Amount in the settlement (functional) currency.
    Functional,
    /// Amount in the transaction currency.
    Transaction,
}

impl RatePart {
    fn for_header(header: &str) -> Option<RatePart> {
        match header.trim().to_lowercase().as_str() {
            "amount in functional currency" => Some(RatePart::Functional),
            "amount in transaction currency" => Some(RatePart::Transaction),
            _ => None,
        }
    }
}

/// What one sheet column holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    /// A canonical record field.
    Field(Field),
    /// A free-form column preserved verbatim under its trimmed header.
    Extra {
        name: String,
        rate_part: Option<RatePart>,
    },
}

/// Column layout of one sheet, derived from its header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    columns: Vec<Column>,
}

impl SheetLayout {
    /// Builds a layout from a header row.
    ///
    /// Returns `None` when no cell matches a known field, meaning the row is
    /// data rather than a header.
    pub fn from_header_row<S: AsRef<str>>(cells: &[S]) -> Option<SheetLayout> {
        let mut columns = Vec::with_capacity(cells.len());
        let mut mapped = 0;

        for cell in cells {
            let header = cell.as_ref().trim();
            // First occurrence wins when a report repeats a header.
            match Field::for_header(header) {
                Some(field) if !columns.contains(&Column::Field(field)) => {
                    mapped += 1;
                    columns.push(Column::Field(field));
                }
                _ => columns.push(Column::Extra {
                    name: header.to_string(),
                    rate_part: RatePart::for_header(header),
                }),
            }
        }

        if mapped == 0 {
            return None;
        }
        Some(SheetLayout { columns })
    }

    /// Fails with `InconsistentSchema` when a key column is absent.
    pub fn require_key_columns(&self, sheet: &str) -> Result<()> {
        for field in Field::KEY {
            if self.position(field).is_none() {
                return Err(ReportError::InconsistentSchema {
                    sheet: sheet.to_string(),
                    column: field.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Number of columns in the sheet.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column index holding `field`, if the sheet has it.
    pub fn position(&self, field: Field) -> Option<usize> {
        self.columns.iter().position(|c| *c == Column::Field(field))
    }

    /// Column index of a rate-derivation column, if present.
    pub fn rate_part_position(&self, part: RatePart) -> Option<usize> {
        self.columns.iter().position(|c| match c {
            Column::Extra { rate_part, .. } => *rate_part == Some(part),
            Column::Field(_) => false,
        })
    }

    /// Free-form columns as `(index, header)` pairs, in sheet order.
    pub fn extras(&self) -> impl Iterator<Item = (usize, &str)> {
        self.columns.iter().enumerate().filter_map(|(idx, c)| match c {
            Column::Extra { name, .. } => Some((idx, name.as_str())),
            Column::Field(_) => None,
        })
    }
}
