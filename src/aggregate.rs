use crate::context::{JobKind, RunContext, RunOutcome, RunSummary, WarningKind};
use crate::error::{PipelineError, PipelineResult};
use crate::normalize::{normalize, ItemKey, StockRecord};
use crate::report::{self, ReportValue};
use crate::table::{RawTable, SheetSelector};
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const GLOBAL_STOCK_SHEET: &str = "output";
pub const GLOBAL_STOCK_HEADER: [&str; 2] = ["Item Code", "Total Global Stock"];
pub const MAIN_STORE_SHEET: &str = "OUTPUT";
pub const MAIN_STORE_HEADER: [&str; 2] = ["Item\nCode", "Sum of Qty."];

const GLOBAL_ROLE: &str = "Global stock report";
const MAIN_STORE_ROLE: &str = "Main store stock report";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedStock {
    pub key: ItemKey,
    pub total_quantity: f64,
}

pub fn aggregate(records: &[StockRecord]) -> Vec<AggregatedStock> {
    let mut totals: BTreeMap<&ItemKey, f64> = BTreeMap::new();
    for record in records {
        *totals.entry(&record.key).or_insert(0.0) += record.quantity;
    }
    totals
        .into_iter()
        .map(|(key, total_quantity)| AggregatedStock {
            key: key.clone(),
            total_quantity,
        })
        .collect()
}

pub fn lookup_map(items: Vec<AggregatedStock>) -> BTreeMap<ItemKey, f64> {
    items
        .into_iter()
        .map(|item| (item.key, item.total_quantity))
        .collect()
}

pub fn total_quantity(items: &[AggregatedStock]) -> f64 {
    items.iter().map(|item| item.total_quantity).sum()
}

fn matches_name(value: Option<&str>, wanted: &str) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case(wanted.trim()))
}

pub fn aggregate_global(
    csv_path: &Path,
    ctx: &mut RunContext,
) -> PipelineResult<Vec<AggregatedStock>> {
    ctx.progress("Loading input file…");
    let table = RawTable::read_any(csv_path, GLOBAL_ROLE, &SheetSelector::First)?;
    ctx.progress(&format!("  Loaded {} rows", table.rows.len()));

    ctx.progress("Cleaning data…");
    let records = normalize(&table, ctx)?;
    let excluded = ctx.settings.global.excluded_locations.clone();
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        let skip = excluded
            .iter()
            .any(|loc| matches_name(record.location.as_deref(), loc));
        if skip {
            ctx.warn(
                WarningKind::FilteredRow,
                &table.source_name,
                Some(record.line),
                format!(
                    "location '{}' excluded from global stock",
                    record.location.as_deref().unwrap_or_default()
                ),
            );
        } else {
            kept.push(record);
        }
    }

    ctx.progress("Aggregating…");
    let items = aggregate(&kept);
    ctx.progress(&format!(
        "  {} rows → {} unique items",
        kept.len(),
        items.len()
    ));
    Ok(items)
}

pub fn aggregate_main_store(
    xlsx_path: &Path,
    ctx: &mut RunContext,
) -> PipelineResult<Vec<AggregatedStock>> {
    ctx.progress("Loading input file…");
    let sheet = ctx.settings.main_store.sheet_name.clone();
    let table = RawTable::read_sheet(xlsx_path, MAIN_STORE_ROLE, &SheetSelector::Named(sheet))?;
    ctx.progress(&format!("  Loaded {} rows from '{}'", table.rows.len(), table.source_name));

    ctx.progress("Verifying data quality…");
    let records = normalize(&table, ctx)?;
    let store = ctx.settings.main_store.store_name.clone();
    let records: Vec<StockRecord> = match store {
        Some(store) => {
            let mut kept = Vec::with_capacity(records.len());
            for record in records {
                if matches_name(record.location.as_deref(), &store) {
                    kept.push(record);
                } else {
                    ctx.warn(
                        WarningKind::FilteredRow,
                        &table.source_name,
                        Some(record.line),
                        format!(
                            "row from store '{}' is not '{}'",
                            record.location.as_deref().unwrap_or_default(),
                            store
                        ),
                    );
                }
            }
            kept
        }
        None => records,
    };

    ctx.progress("Aggregating by Item Code…");
    // Batch rows must roll up without losing quantity
    let input_total: f64 = records.iter().map(|r| r.quantity).sum();
    let items = aggregate(&records);
    let output_total = total_quantity(&items);
    if (input_total - output_total).abs() >= 0.01 {
        return Err(PipelineError::ConservationMismatch {
            input: input_total,
            output: output_total,
        });
    }
    debug!(
        "Main store batches: {} records, {} items, total {:.2}",
        records.len(),
        items.len(),
        output_total
    );
    ctx.progress(&format!(
        "  {} batch records → {} unique items",
        records.len(),
        items.len()
    ));
    Ok(items)
}

fn lookup_rows(items: &[AggregatedStock]) -> Vec<Vec<ReportValue>> {
    items
        .iter()
        .map(|item| {
            vec![
                ReportValue::Text(item.key.to_string()),
                ReportValue::Number(item.total_quantity),
            ]
        })
        .collect()
}

fn write_lookup(
    job: JobKind,
    items: &[AggregatedStock],
    output: &Path,
    sheet: &str,
    header: &[&str],
    mut ctx: RunContext,
) -> PipelineResult<RunSummary> {
    ctx.progress(&format!("Exporting to {}…", output.display()));
    report::write(output, sheet, header, &lookup_rows(items))?;
    Ok(ctx.finish(RunOutcome {
        job,
        output_path: output.to_path_buf(),
        row_count: items.len(),
        total_quantity: total_quantity(items),
        reorder: None,
    }))
}

/// Builds `Material_Global_Stock_Lookup.xlsx` from the global stock report.
pub fn run_global_stock(
    input: &Path,
    output: &Path,
    mut ctx: RunContext,
) -> PipelineResult<RunSummary> {
    let items = aggregate_global(input, &mut ctx)?;
    write_lookup(
        JobKind::GlobalStock,
        &items,
        output,
        GLOBAL_STOCK_SHEET,
        &GLOBAL_STOCK_HEADER,
        ctx,
    )
}

/// Builds `Material_Main_Store_Stock_Lookup.xlsx` from the batch stock workbook.
pub fn run_main_store(
    input: &Path,
    output: &Path,
    mut ctx: RunContext,
) -> PipelineResult<RunSummary> {
    let items = aggregate_main_store(input, &mut ctx)?;
    write_lookup(
        JobKind::MainStore,
        &items,
        output,
        MAIN_STORE_SHEET,
        &MAIN_STORE_HEADER,
        ctx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use chrono::NaiveDate;
    use std::collections::HashSet;

    fn record(key: &str, quantity: f64) -> StockRecord {
        StockRecord {
            key: ItemKey::normalize(key).unwrap(),
            location: None,
            batch: None,
            order_date: None,
            quantity,
            line: 1,
        }
    }

    fn context(settings: Settings) -> RunContext {
        RunContext::new(settings, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
    }

    #[test]
    fn aggregation_is_unique_sorted_and_conserving() {
        let records = vec![
            record("C3", 1.0),
            record("a1", 2.5),
            record("B2", 4.0),
            record("A1", 0.5),
            record("c3", 10.0),
        ];
        let items = aggregate(&records);

        let keys: Vec<&str> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["A1", "B2", "C3"]);
        let unique: HashSet<_> = items.iter().map(|i| &i.key).collect();
        assert_eq!(unique.len(), items.len());

        let input_total: f64 = records.iter().map(|r| r.quantity).sum();
        assert_eq!(total_quantity(&items), input_total);
        assert_eq!(items[0].total_quantity, 3.0);
    }

    #[test]
    fn empty_input_aggregates_to_nothing() {
        assert!(aggregate(&[]).is_empty());
    }

    #[test]
    fn excluded_locations_are_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.csv");
        std::fs::write(
            &path,
            "ItemCode,Description,Location,Qty\n\
             A1,Gauze,Ward 1,4\n\
             A1,Gauze,Intransit Store,6\n\
             B2,Saline,ICU,2\n",
        )
        .unwrap();

        let mut settings = Settings::default();
        settings.global.excluded_locations = vec!["intransit store".to_string()];
        let mut ctx = context(settings);
        let items = aggregate_global(&path, &mut ctx).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].total_quantity, 4.0);
        assert_eq!(ctx.warning_count(WarningKind::FilteredRow), 1);
    }

    #[test]
    fn lookup_map_keeps_totals() {
        let map = lookup_map(aggregate(&[record("A1", 3.0), record("A1", 2.0)]));
        assert_eq!(map[&ItemKey::normalize("A1").unwrap()], 5.0);
    }
}
