use crate::error::{PipelineError, PipelineResult};
use calamine::{open_workbook_auto, Data, Range, Reader};
use chrono::{Days, NaiveDate, NaiveDateTime};
use log::debug;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Excel date serial (days since 1899-12-30).
    Date(f64),
    /// Formula error such as `#N/A`; never a value.
    Error(String),
}

static EMPTY: Cell = Cell::Empty;

const DATE_FORMATS: [&str; 7] = [
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%Y/%m/%d",
];

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%d-%m-%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

impl Cell {
    fn from_text(raw: &str) -> Cell {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Cell::Number(n) => Some(format_number(*n)),
            Cell::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
            Cell::Date(serial) => Some(
                excel_serial_to_date(*serial)
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| format_number(*serial)),
            ),
            Cell::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Cell::Error(e) => Some(e.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        let value = match self {
            Cell::Number(n) => *n,
            Cell::Text(s) => {
                let cleaned: String = s
                    .chars()
                    .filter(|c| *c != ',' && !c.is_whitespace())
                    .collect();
                cleaned.parse::<f64>().ok()?
            }
            _ => return None,
        };
        value.is_finite().then_some(value)
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(serial) | Cell::Number(serial) => excel_serial_to_date(*serial),
            Cell::Text(s) => parse_date_text(s.trim()),
            _ => None,
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::from_text(s),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => Cell::Date(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::from_text(s),
            Data::Error(e) => Cell::Error(e.to_string()),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_days(Days::new(serial.floor() as u64))
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|dt| dt.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        })
}

#[derive(Debug, Clone, PartialEq)]
pub enum SheetSelector {
    First,
    /// Case-insensitive, whitespace-trimmed name match.
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub source_name: String,
    /// 1-based spreadsheet line of `rows[0]`.
    pub first_line: usize,
    pub rows: Vec<Vec<Cell>>,
}

impl RawTable {
    pub fn new(source_name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        RawTable {
            source_name: source_name.into(),
            first_line: 1,
            rows,
        }
    }

    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn line_of(&self, row: usize) -> usize {
        self.first_line + row
    }

    pub fn from_csv_reader<R: Read>(
        source_name: impl Into<String>,
        reader: R,
    ) -> Result<Self, csv::Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for result in csv_reader.byte_records() {
            let record = result?;
            let row: Vec<Cell> = record
                .iter()
                .map(|field| {
                    let text = String::from_utf8_lossy(field);
                    Cell::from_text(text.trim_start_matches('\u{feff}'))
                })
                .collect();
            rows.push(row);
        }

        Ok(RawTable::new(source_name, rows))
    }

    pub fn from_range(source_name: impl Into<String>, range: &Range<Data>) -> Self {
        let first_line = range.start().map_or(1, |(row, _)| row as usize + 1);
        let rows = range
            .rows()
            .map(|row| row.iter().map(Cell::from).collect())
            .collect();
        RawTable {
            source_name: source_name.into(),
            first_line,
            rows,
        }
    }

    pub fn read_csv(path: &Path, role: &str) -> PipelineResult<Self> {
        ensure_readable(path, role)?;
        let file =
            std::fs::File::open(path).map_err(|e| PipelineError::missing_input(role, path, e))?;
        let table = Self::from_csv_reader(display_name(path), file)
            .map_err(|e| PipelineError::missing_input(role, path, e))?;
        debug!("Read {} rows from {}", table.rows.len(), path.display());
        Ok(table)
    }

    pub fn read_sheet(path: &Path, role: &str, selector: &SheetSelector) -> PipelineResult<Self> {
        ensure_readable(path, role)?;
        let mut workbook =
            open_workbook_auto(path).map_err(|e| PipelineError::missing_input(role, path, e))?;

        let sheet_names = workbook.sheet_names();
        let sheet = match selector {
            SheetSelector::First => sheet_names.first().cloned(),
            SheetSelector::Named(wanted) => find_sheet(&sheet_names, wanted),
        };
        let sheet = sheet.ok_or_else(|| PipelineError::SheetNotFound {
            path: path.to_path_buf(),
            sheet: match selector {
                SheetSelector::First => "(first sheet)".to_string(),
                SheetSelector::Named(wanted) => wanted.clone(),
            },
            available: sheet_names.clone(),
        })?;

        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| PipelineError::missing_input(role, path, e))?;
        let table = Self::from_range(format!("{} [{}]", display_name(path), sheet), &range);
        debug!(
            "Read {} rows from sheet '{}' of {}",
            table.rows.len(),
            sheet,
            path.display()
        );
        Ok(table)
    }

    // CSV files have no sheets; the selector only applies to workbooks
    pub fn read_any(path: &Path, role: &str, selector: &SheetSelector) -> PipelineResult<Self> {
        if is_csv(path) {
            Self::read_csv(path, role)
        } else {
            Self::read_sheet(path, role, selector)
        }
    }
}

pub fn find_sheet(sheet_names: &[String], wanted: &str) -> Option<String> {
    let wanted = wanted.trim().to_lowercase();
    sheet_names
        .iter()
        .find(|name| name.trim().to_lowercase() == wanted)
        .cloned()
}

pub fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

pub fn ensure_readable(path: &Path, role: &str) -> PipelineResult<()> {
    let metadata =
        std::fs::metadata(path).map_err(|e| PipelineError::missing_input(role, path, e))?;
    if !metadata.is_file() {
        return Err(PipelineError::missing_input(role, path, "not a regular file"));
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_reader_keeps_ragged_rows_and_strips_bom() {
        let data = "\u{feff}ItemCode,Location,Qty\nA1,Ward 1, 5 \n\nTotal,,5,extra\n";
        let table = RawTable::from_csv_reader("stock.csv", data.as_bytes()).unwrap();
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.cell(0, 0), &Cell::Text("ItemCode".to_string()));
        assert_eq!(table.cell(1, 2), &Cell::Text("5".to_string()));
        assert_eq!(table.rows[2].len(), 4);
        assert_eq!(table.cell(9, 9), &Cell::Empty);
    }

    #[test]
    fn numbers_from_text_and_cells() {
        assert_eq!(Cell::Text("1,234.5".into()).as_number(), Some(1234.5));
        assert_eq!(Cell::Number(7.0).as_number(), Some(7.0));
        assert_eq!(Cell::Text("N/A".into()).as_number(), None);
        assert_eq!(Cell::Text("NaN".into()).as_number(), None);
        assert_eq!(Cell::Empty.as_number(), None);
        assert_eq!(Cell::Bool(true).as_number(), None);
    }

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(Cell::Number(10023.0).as_text().as_deref(), Some("10023"));
        assert_eq!(Cell::Number(2.5).as_text().as_deref(), Some("2.5"));
        assert_eq!(Cell::Text("  ".into()).as_text(), None);
    }

    #[test]
    fn error_cells_have_no_value() {
        let cell = Cell::from(&Data::Error(calamine::CellErrorType::NA));
        assert_eq!(cell.error(), Some("#N/A"));
        assert!(!cell.is_blank());
        assert_eq!(cell.as_text(), None);
        assert_eq!(cell.as_number(), None);
        assert_eq!(cell.as_date(), None);
    }

    #[test]
    fn dates_from_serials_and_text() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(Cell::Date(45366.0).as_date(), Some(expected));
        assert_eq!(Cell::Date(45366.75).as_date(), Some(expected));
        assert_eq!(Cell::Text("2024-03-15".into()).as_date(), Some(expected));
        assert_eq!(Cell::Text("15/03/2024".into()).as_date(), Some(expected));
        assert_eq!(Cell::Text("15-Mar-2024".into()).as_date(), Some(expected));
        assert_eq!(Cell::Text("2024-03-15 10:30:00".into()).as_date(), Some(expected));
        assert_eq!(Cell::Text("soon".into()).as_date(), None);
    }

    #[test]
    fn sheet_lookup_ignores_case_and_padding() {
        let names = vec!["Summary".to_string(), " Raw Data ".to_string()];
        assert_eq!(find_sheet(&names, "RAW DATA"), Some(" Raw Data ".to_string()));
        assert_eq!(find_sheet(&names, "raw"), None);
    }

    #[test]
    fn missing_file_is_reported_with_role() {
        let err = RawTable::read_csv(Path::new("/nonexistent/stock.csv"), "Global stock report")
            .unwrap_err();
        assert_eq!(err.kind(), "missing_input_file");
        assert!(err.to_string().starts_with("Global stock report"));
    }

    #[test]
    fn extension_dispatch() {
        assert!(is_csv(Path::new("Material_Global_Stock_Report.CSV")));
        assert!(!is_csv(Path::new("Expected_Items_Material.xlsx")));
    }
}
