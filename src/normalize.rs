use crate::context::{RunContext, WarningKind};
use crate::error::{PipelineError, PipelineResult};
use crate::headers::{locate_header, ColumnMap, Field, HeaderMatch};
use crate::table::{Cell, RawTable};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static TRAILING_ZERO_FRACTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\.0+$").unwrap());

const NON_DATA_MARKERS: [&str; 4] = ["total", "grand total", "subtotal", "sub total"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemKey(String);

impl ItemKey {
    /// Normalizes raw text. Returns `None` for blank input; never fails.
    pub fn normalize(raw: &str) -> Option<ItemKey> {
        let trimmed = raw.trim().trim_start_matches('\'').trim();
        if trimmed.is_empty() {
            return None;
        }
        let collapsed = WHITESPACE.replace_all(trimmed, " ").to_uppercase();
        let key = match TRAILING_ZERO_FRACTION.captures(&collapsed) {
            Some(caps) => caps[1].to_string(),
            None => collapsed,
        };
        Some(ItemKey(key))
    }

    pub fn from_cell(cell: &Cell) -> Option<ItemKey> {
        cell.as_text().and_then(|text| ItemKey::normalize(&text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_non_data_marker(&self) -> bool {
        let lower = self.0.to_lowercase();
        NON_DATA_MARKERS.contains(&lower.as_str()) || lower.starts_with("total ")
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockRecord {
    pub key: ItemKey,
    pub location: Option<String>,
    pub batch: Option<String>,
    pub order_date: Option<NaiveDate>,
    /// Always non-negative.
    pub quantity: f64,
    pub line: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub required: &'static [Field],
}

pub const STOCK_LAYOUT: Layout = Layout {
    required: &[Field::ItemCode, Field::Quantity],
};

pub fn locate_columns(
    table: &RawTable,
    layout: &Layout,
    ctx: &RunContext,
) -> PipelineResult<HeaderMatch> {
    locate_header(&table.rows, layout.required, ctx.settings.header_scan_rows).map_err(
        |missing| PipelineError::Structural {
            source_name: table.source_name.clone(),
            missing: missing.iter().map(|f| f.label().to_string()).collect(),
        },
    )
}

pub struct DataRow<'a> {
    pub line: usize,
    cells: &'a [Cell],
    columns: &'a ColumnMap,
}

impl<'a> DataRow<'a> {
    pub fn get(&self, field: Field) -> &'a Cell {
        static EMPTY: Cell = Cell::Empty;
        self.columns
            .column(field)
            .and_then(|col| self.cells.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn text(&self, field: Field) -> Option<String> {
        self.get(field).as_text()
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(Cell::is_blank)
    }
}

pub fn data_rows<'a>(
    table: &'a RawTable,
    header: &'a HeaderMatch,
) -> impl Iterator<Item = DataRow<'a>> + 'a {
    table
        .rows
        .iter()
        .enumerate()
        .skip(header.row_index + 1)
        .map(move |(index, cells)| DataRow {
            line: table.line_of(index),
            cells,
            columns: &header.columns,
        })
}

pub fn row_key(row: &DataRow<'_>, source: &str, ctx: &mut RunContext) -> Option<ItemKey> {
    let cell = row.get(Field::ItemCode);
    let Some(key) = ItemKey::from_cell(cell) else {
        let reason = match cell.error() {
            Some(error) => format!("item code is an error value '{}'", error),
            None if row.is_blank() => "blank row".to_string(),
            None => "blank item code".to_string(),
        };
        ctx.warn(WarningKind::SkippedRow, source, Some(row.line), reason);
        return None;
    };
    if key.is_non_data_marker() {
        ctx.warn(
            WarningKind::SkippedRow,
            source,
            Some(row.line),
            format!("non-data row '{}'", key),
        );
        return None;
    }
    Some(key)
}

pub fn coerce_quantity(
    cell: &Cell,
    key: &ItemKey,
    line: usize,
    source: &str,
    ctx: &mut RunContext,
) -> f64 {
    match cell.as_number() {
        Some(qty) if qty >= 0.0 => qty,
        Some(qty) => {
            ctx.warn(
                WarningKind::QuantityCoerced,
                source,
                Some(line),
                format!("negative quantity {} for item {} counted as 0", qty, key),
            );
            0.0
        }
        None => {
            let shown = cell
                .as_text()
                .or_else(|| cell.error().map(str::to_string))
                .unwrap_or_default();
            ctx.warn(
                WarningKind::QuantityCoerced,
                source,
                Some(line),
                format!("quantity '{}' for item {} counted as 0", shown, key),
            );
            0.0
        }
    }
}

/// Turns a stock-shaped table into records. Rows without an item key are
/// skipped; bad quantities count as 0. Both leave a warning in `ctx`.
pub fn normalize(table: &RawTable, ctx: &mut RunContext) -> PipelineResult<Vec<StockRecord>> {
    let header = locate_columns(table, &STOCK_LAYOUT, ctx)?;
    let source = table.source_name.as_str();

    let mut records = Vec::new();
    for row in data_rows(table, &header) {
        let Some(key) = row_key(&row, source, ctx) else {
            continue;
        };
        let quantity = coerce_quantity(row.get(Field::Quantity), &key, row.line, source, ctx);
        records.push(StockRecord {
            key,
            location: row.text(Field::Location),
            batch: row.text(Field::Batch),
            order_date: row.get(Field::OrderDate).as_date(),
            quantity,
            line: row.line,
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn context() -> RunContext {
        RunContext::new(
            Settings::default(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        )
    }

    fn table(csv: &str) -> RawTable {
        RawTable::from_csv_reader("stock.csv", csv.as_bytes()).unwrap()
    }

    #[test]
    fn item_keys_unify_formatting() {
        let a = ItemKey::normalize("  med-0042 ").unwrap();
        let b = ItemKey::normalize("MED-0042").unwrap();
        assert_eq!(a, b);
        assert_eq!(
            ItemKey::normalize("10023.0"),
            ItemKey::from_cell(&Cell::Number(10023.0))
        );
        assert_eq!(ItemKey::normalize("'10023").unwrap().as_str(), "10023");
        assert_eq!(ItemKey::normalize("ab   12").unwrap().as_str(), "AB 12");
        assert_eq!(ItemKey::normalize("   "), None);
        assert_eq!(ItemKey::from_cell(&Cell::Empty), None);
    }

    #[test]
    fn markers_are_recognized() {
        for marker in ["Total", "GRAND TOTAL", "Sub Total", "Total Ward 3"] {
            assert!(ItemKey::normalize(marker).unwrap().is_non_data_marker(), "{}", marker);
        }
        assert!(!ItemKey::normalize("TOTALCARE-10").unwrap().is_non_data_marker());
    }

    #[test]
    fn malformed_quantity_is_coerced_and_row_kept() {
        let mut ctx = context();
        let records = normalize(
            &table("ItemCode,Location,Qty\nA1,Ward 1,4\nB2,Ward 2,N/A\n"),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].key.as_str(), "B2");
        assert_eq!(records[1].quantity, 0.0);
        assert_eq!(records[1].line, 3);
        assert_eq!(ctx.warnings().len(), 1);
        assert_eq!(ctx.warning_count(WarningKind::QuantityCoerced), 1);
    }

    #[test]
    fn noise_rows_are_skipped_with_warnings() {
        let mut ctx = context();
        let csv = "\
Global Stock Report,,
ItemCode,Location,Qty
A1,Ward 1,4
,Ward 2,9
,,
Grand Total,,13
";
        let records = normalize(&table(csv), &mut ctx).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].location.as_deref(), Some("Ward 1"));
        assert_eq!(ctx.warning_count(WarningKind::SkippedRow), 3);
    }

    #[test]
    fn error_cell_in_item_code_skips_row() {
        let mut ctx = context();
        let table = RawTable::new(
            "stock.xlsx [RAW DATA]",
            vec![
                vec![Cell::Text("Item Code".into()), Cell::Text("Qty".into())],
                vec![Cell::Error("#N/A".into()), Cell::Number(5.0)],
                vec![Cell::Text("A1".into()), Cell::Number(2.0)],
            ],
        );
        let records = normalize(&table, &mut ctx).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key.as_str(), "A1");
        assert_eq!(records[0].quantity, 2.0);
        assert_eq!(ctx.warning_count(WarningKind::SkippedRow), 1);
        assert_eq!(ctx.warnings()[0].line, Some(2));
        assert!(ctx.warnings()[0].message.contains("#N/A"));
    }

    #[test]
    fn error_cell_in_quantity_is_coerced() {
        let mut ctx = context();
        let table = RawTable::new(
            "stock.xlsx",
            vec![
                vec![Cell::Text("Item Code".into()), Cell::Text("Qty".into())],
                vec![Cell::Text("A1".into()), Cell::Error("#VALUE!".into())],
            ],
        );
        let records = normalize(&table, &mut ctx).unwrap();
        assert_eq!(records[0].quantity, 0.0);
        assert!(ctx.warnings()[0].message.contains("#VALUE!"));
    }

    #[test]
    fn negative_quantity_is_clamped() {
        let mut ctx = context();
        let records = normalize(&table("ItemCode,Qty\nA1,-5\n"), &mut ctx).unwrap();
        assert_eq!(records[0].quantity, 0.0);
        assert_eq!(ctx.warning_count(WarningKind::QuantityCoerced), 1);
    }

    #[test]
    fn missing_header_is_structural() {
        let mut ctx = context();
        let err = normalize(&table("A1,Ward 1,4\nB2,Ward 2,5\n"), &mut ctx).unwrap_err();
        match err {
            PipelineError::Structural {
                source_name,
                missing,
            } => {
                assert_eq!(source_name, "stock.csv");
                assert_eq!(missing, vec!["item code", "quantity"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn optional_columns_are_carried() {
        let mut ctx = context();
        let csv = "Item Code,Store Name,Batch No,POCreated Date,Pen.Qty\nA1,MMS,B-7,2024-05-20,12\n";
        let records = normalize(&table(csv), &mut ctx).unwrap();
        assert_eq!(records[0].location.as_deref(), Some("MMS"));
        assert_eq!(records[0].batch.as_deref(), Some("B-7"));
        assert_eq!(records[0].order_date, NaiveDate::from_ymd_opt(2024, 5, 20));
        assert_eq!(records[0].quantity, 12.0);
    }
}
