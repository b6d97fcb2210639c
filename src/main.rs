//! PO Report Engine CLI
//!
//! Reads a report workbook and writes the Combined, Processed and
//! ProcessedDetailed CSV reports into an output directory.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- po_report.xlsx out/ 01-01-2024 31-01-2024
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `warn` to control logging verbosity
//! - `PO_CHUNK_SIZE`, `PO_WORKERS`, `PO_MAX_KEYS`, `PO_MAX_BATCH_BYTES`: processing limits

use chrono::Local;
use log::{debug, info};
use po_report_engine::{
    preview, DateRange, ProcessorConfig, ReportContext, ReportError, ReportKind, ReportProcessor,
    Result,
};
use std::env;
use std::fs;
use std::path::Path;
use std::process;

const PREVIEW_ROWS: usize = 10;

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        return Err(ReportError::MissingArgument);
    }

    let input_path = &args[1];
    let output_dir = Path::new(&args[2]);
    let date_range = match (args.get(3), args.get(4)) {
        (Some(from), Some(to)) => Some(DateRange::new(from.as_str(), to.as_str())),
        (Some(from), None) => Some(DateRange::new(
            from.as_str(),
            Local::now().format("%d-%m-%Y").to_string(),
        )),
        _ => None,
    };

    let now = Local::now();
    let mut ctx = ReportContext::new().with_generated_at(now.format("%Y-%m-%d %H:%M:%S").to_string());
    if let Some(range) = date_range.clone() {
        ctx = ctx.with_date_range(range);
    }

    let processor = ReportProcessor::new(ProcessorConfig::from_env())?;
    let outputs = processor.process(fs::read(input_path)?, &ctx)?;

    fs::create_dir_all(output_dir)?;
    let stamp = now.format("%Y%m%d_%H%M%S").to_string();
    for kind in ReportKind::ALL {
        let bytes = outputs.report(kind);
        let path = output_dir.join(kind.file_name(date_range.as_ref(), &stamp));
        fs::write(&path, bytes)?;

        let summary = preview(bytes, PREVIEW_ROWS)?;
        info!(
            "{} report: {} rows, {} columns",
            kind.as_str(),
            summary.total_rows,
            summary.headers.len()
        );
        debug!("{} columns: {}", kind.as_str(), summary.headers.join(","));
        for row in &summary.rows {
            debug!("{} row: {}", kind.as_str(), row.join(","));
        }
        println!("{}", path.display());
    }

    Ok(())
}
