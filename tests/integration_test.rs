//! Integration tests against real `.xlsx` workbooks, through the library
//! entry point and the CLI binary.

use assert_cmd::Command;
use po_report_engine::{preview, process, ReportError};
use predicates::prelude::*;
use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};
use std::fs;
use tempfile::TempDir;

#[derive(Clone)]
enum Cell {
    Text(&'static str),
    Number(f64),
    Blank,
}

use Cell::{Blank, Number, Text};

const HEADER: [Cell; 8] = [
    Text("Po Number"),
    Text("POCharge A/c"),
    Text("Supplier"),
    Text("Currency"),
    Text("Invoice Number"),
    Text("Invoice Line Number"),
    Text("Line Amount"),
    Text("Amount Received"),
];

/// Builds an xlsx file in memory; one `(name, rows)` pair per sheet.
fn build_xlsx(sheets: &[(&str, Vec<Vec<Cell>>)]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    for (name, rows) in sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(*name).unwrap();
        for (r, row) in rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                match cell {
                    Text(v) => {
                        worksheet.write_string(r as u32, c as u16, *v).unwrap();
                    }
                    Number(v) => {
                        worksheet.write_number(r as u32, c as u16, *v).unwrap();
                    }
                    Blank => {}
                }
            }
        }
    }
    workbook.save_to_buffer().unwrap()
}

fn sample_workbook() -> Vec<u8> {
    build_xlsx(&[
        (
            "Sheet1",
            vec![
                HEADER.to_vec(),
                vec![
                    Text("PO-100"),
                    Text("4001"),
                    Text("ACME"),
                    Text("USD"),
                    Text("INV-5"),
                    Number(1.0),
                    Number(200.0),
                    Number(0.0),
                ],
                vec![
                    Text("PO-200"),
                    Text("4002"),
                    Text("Globex"),
                    Text("SAR"),
                    Text("INV-9"),
                    Number(1.0),
                    Number(75.5),
                    Blank,
                ],
            ],
        ),
        (
            "Sheet2",
            vec![vec![
                Text("PO-100"),
                Text("4001"),
                Text("ACME"),
                Text("USD"),
                Text("INV-5"),
                Number(1.0),
                Number(50.0),
                Number(50.0),
            ]],
        ),
    ])
}

// ==================== LIBRARY ====================

#[test]
fn test_xlsx_workbook_produces_three_reports() {
    let outputs = process(sample_workbook(), 10_000).unwrap();

    let combined = preview(&outputs.combined, 10).unwrap();
    assert_eq!(combined.total_rows, 3);
    assert!(combined.headers.contains(&"POCharge A/c".to_string()));
    assert_eq!(combined.headers.last().unwrap(), "source_sheet");
    assert_eq!(combined.rows[2].last().unwrap(), "Sheet2");

    let processed = preview(&outputs.processed, 10).unwrap();
    assert_eq!(processed.total_rows, 2);
    let po_100 = &processed.rows[0];
    let column = |name: &str| processed.headers.iter().position(|h| h == name).unwrap();
    assert_eq!(po_100[column("po_number")], "PO-100");
    assert_eq!(po_100[column("line_amount")], "250.0000");
    assert_eq!(po_100[column("difference")], "200.0000");
    assert_eq!(po_100[column("duplicate_flag")], "true");

    let detailed = preview(&outputs.detailed, 10).unwrap();
    assert_eq!(detailed.total_rows, 3);
}

#[test]
fn test_date_cells_are_written_as_timestamps() {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let headers = ["Po Number", "Invoice Number", "Invoice Line Number", "Line Amount", "PO Date"];
    for (c, header) in headers.iter().enumerate() {
        worksheet.write_string(0, c as u16, *header).unwrap();
    }
    worksheet.write_string(1, 0, "PO-1").unwrap();
    worksheet.write_string(1, 1, "INV-1").unwrap();
    worksheet.write_number(1, 2, 1.0).unwrap();
    worksheet.write_number(1, 3, 10.0).unwrap();
    let date = ExcelDateTime::from_ymd(2024, 3, 15).unwrap();
    let format = Format::new().set_num_format("yyyy-mm-dd");
    worksheet.write_datetime_with_format(1, 4, &date, &format).unwrap();
    let bytes = workbook.save_to_buffer().unwrap();

    let outputs = process(bytes, 10_000).unwrap();
    let combined = preview(&outputs.combined, 1).unwrap();
    let column = combined.headers.iter().position(|h| h == "PO Date").unwrap();
    assert_eq!(combined.rows[0][column], "2024-03-15 00:00:00");

    let detailed = preview(&outputs.detailed, 1).unwrap();
    let column = detailed.headers.iter().position(|h| h == "PO Date").unwrap();
    assert_eq!(detailed.rows[0][column], "2024-03-15 00:00:00");
}

#[test]
fn test_garbage_bytes_are_a_spreadsheet_error() {
    assert!(matches!(
        process(b"definitely not a workbook".to_vec(), 10_000),
        Err(ReportError::Spreadsheet(_))
    ));
}

// ==================== CLI ====================

#[test]
fn test_cli_writes_reports_to_output_dir() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("po_report.xlsx");
    fs::write(&input, sample_workbook()).unwrap();
    let out_dir = dir.path().join("out");

    let mut cmd = Command::cargo_bin("po-report-engine").unwrap();
    cmd.arg(&input)
        .arg(&out_dir)
        .arg("01-01-2024")
        .arg("31-01-2024")
        .assert()
        .success()
        .stdout(predicate::str::contains("Combined_PO_Report_01012024_to_31012024_"));

    let mut names: Vec<String> = fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 3);
    assert!(names[0].starts_with("Combined_PO_Report_"));
    assert!(names[1].starts_with("ProcessedDetailed_PO_Report_"));
    assert!(names[2].starts_with("Processed_PO_Report_"));

    let combined = fs::read_to_string(out_dir.join(&names[0])).unwrap();
    assert!(combined.lines().nth(1).unwrap().starts_with("Combined,01-01-2024 to 31-01-2024,"));
}

#[test]
fn test_cli_missing_file_error() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("po-report-engine").unwrap();
    cmd.arg("nonexistent.xlsx")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_cli_missing_argument_error() {
    let mut cmd = Command::cargo_bin("po-report-engine").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Missing arguments"));
}
