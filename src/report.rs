use crate::error::{PipelineError, PipelineResult};
use log::debug;
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet, XlsxError};
use std::path::{Path, PathBuf};

const HEADER_FILL: u32 = 0x1F4E79;
const FLAG_TRUE_FILL: u32 = 0xFFD7D7;
const FLAG_FALSE_FILL: u32 = 0xD7FFD7;
const MAX_COLUMN_WIDTH: usize = 45;

#[derive(Debug, Clone, PartialEq)]
pub enum ReportValue {
    Text(String),
    Number(f64),
    /// Boolean cell, highlighted red when true and green when false.
    Flag(bool),
    Blank,
}

impl ReportValue {
    fn display_len(&self) -> usize {
        match self {
            ReportValue::Text(s) => s.chars().count(),
            ReportValue::Number(n) => n.to_string().len(),
            ReportValue::Flag(b) => if *b { 4 } else { 5 },
            ReportValue::Blank => 0,
        }
    }
}

impl From<Option<f64>> for ReportValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(ReportValue::Blank, ReportValue::Number)
    }
}

/// Writes one sheet with the rows in the given order. The file at
/// `output_path` is only replaced once the whole workbook is built.
pub fn write(
    output_path: &Path,
    sheet_name: &str,
    header: &[&str],
    rows: &[Vec<ReportValue>],
) -> PipelineResult<()> {
    let io_error = |reason: String| PipelineError::IoWrite {
        path: output_path.to_path_buf(),
        reason,
    };

    let buffer = build_workbook(sheet_name, header, rows)
        .map_err(|e| io_error(format!("Failed to build workbook: {}", e)))?;

    create_output_directory_for_path(output_path).map_err(io_error)?;

    let partial = partial_path(output_path);
    if let Err(e) = std::fs::write(&partial, &buffer) {
        let _ = std::fs::remove_file(&partial);
        return Err(io_error(e.to_string()));
    }
    if let Err(e) = std::fs::rename(&partial, output_path) {
        let _ = std::fs::remove_file(&partial);
        return Err(io_error(e.to_string()));
    }

    debug!(
        "Wrote {} rows to sheet '{}' of {}",
        rows.len(),
        sheet_name,
        output_path.display()
    );
    Ok(())
}

fn build_workbook(
    sheet_name: &str,
    header: &[&str],
    rows: &[Vec<ReportValue>],
) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet().set_name(sheet_name)?;

    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_FILL))
        .set_text_wrap()
        .set_align(FormatAlign::Center)
        .set_align(FormatAlign::VerticalCenter);
    let flag_true = Format::new().set_background_color(Color::RGB(FLAG_TRUE_FILL));
    let flag_false = Format::new().set_background_color(Color::RGB(FLAG_FALSE_FILL));

    let mut widths: Vec<usize> = header
        .iter()
        .map(|h| h.lines().map(|l| l.chars().count()).max().unwrap_or(0))
        .collect();

    // Headers
    for (col, title) in header.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *title, &header_format)?;
    }
    worksheet.set_row_height(0, 30)?;

    // Data
    for (index, values) in rows.iter().enumerate() {
        let row = index as u32 + 1; // Skip header row
        for (col, value) in values.iter().enumerate() {
            let col_u16 = col as u16;
            match value {
                ReportValue::Text(s) => {
                    worksheet.write_string(row, col_u16, s)?;
                }
                ReportValue::Number(n) => {
                    worksheet.write_number(row, col_u16, *n)?;
                }
                ReportValue::Flag(b) => {
                    let format = if *b { &flag_true } else { &flag_false };
                    worksheet.write_boolean_with_format(row, col_u16, *b, format)?;
                }
                ReportValue::Blank => {}
            }
            if col >= widths.len() {
                widths.resize(col + 1, 0);
            }
            widths[col] = widths[col].max(value.display_len());
        }
    }

    finish_layout(worksheet, &widths, rows.len(), header.len())?;
    workbook.save_to_buffer()
}

fn finish_layout(
    worksheet: &mut Worksheet,
    widths: &[usize],
    row_count: usize,
    column_count: usize,
) -> Result<(), XlsxError> {
    worksheet.set_freeze_panes(1, 0)?;
    if column_count > 0 {
        worksheet.autofilter(0, 0, row_count as u32, (column_count - 1) as u16)?;
    }
    for (col, width) in widths.iter().enumerate() {
        let width = (*width + 2).min(MAX_COLUMN_WIDTH);
        worksheet.set_column_width(col as u16, width as f64)?;
    }
    Ok(())
}

fn partial_path(output_path: &Path) -> PathBuf {
    let mut name = output_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    output_path.with_file_name(name)
}

fn create_output_directory_for_path(file_path: &Path) -> Result<(), String> {
    if let Some(parent_dir) = file_path.parent() {
        if parent_dir.as_os_str().is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(parent_dir).map_err(|e| {
            format!(
                "Failed to create directory '{}': {}",
                parent_dir.display(),
                e
            )
        })?;
    }
    Ok(())
}
