use crate::aggregate::{aggregate, lookup_map};
use crate::context::{JobKind, ReorderStats, RunContext, RunOutcome, RunSummary, WarningKind};
use crate::error::{PipelineError, PipelineResult};
use crate::headers::Field;
use crate::normalize::{
    data_rows, locate_columns, normalize, row_key, DataRow, ItemKey, Layout, StockRecord,
};
use crate::report::{self, ReportValue};
use crate::table::{ensure_readable, RawTable, SheetSelector};
use chrono::Days;
use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

pub const REPORT_SHEET: &str = "Inventory Calculation";
pub const REPORT_HEADER: [&str; 15] = [
    "Item Code",
    "Description",
    "Min Stock Level",
    "Max Stock Level",
    "Global stock",
    "Main Store Stock",
    "Pending PO",
    "Effective Stock",
    "Reorder Needed?",
    "Order Qty",
    "Pack size",
    "Order Qty (Packs)",
    "ADC",
    "Global Stock Days",
    "Main Store Stock Days",
];

const CATALOG_ROLE: &str = "Master catalog";
const GLOBAL_LOOKUP_ROLE: &str = "Global stock lookup";
const MAIN_STORE_LOOKUP_ROLE: &str = "Main store stock lookup";
const PENDING_ROLE: &str = "Pending orders";

const CATALOG_LAYOUT: Layout = Layout {
    required: &[Field::ItemCode, Field::MinLevel, Field::MaxLevel],
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReorderInputs {
    pub catalog: PathBuf,
    pub global_stock: PathBuf,
    pub main_store_stock: PathBuf,
    pub pending_orders: PathBuf,
}

impl ReorderInputs {
    fn roles(&self) -> [(&'static str, &Path); 4] {
        [
            (CATALOG_ROLE, self.catalog.as_path()),
            (GLOBAL_LOOKUP_ROLE, self.global_stock.as_path()),
            (MAIN_STORE_LOOKUP_ROLE, self.main_store_stock.as_path()),
            (PENDING_ROLE, self.pending_orders.as_path()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub key: ItemKey,
    pub description: String,
    pub min_level: f64,
    pub max_level: f64,
    pub pack_size: Option<f64>,
    /// Average daily consumption.
    pub adc: Option<f64>,
    pub unit_cost: Option<f64>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReorderRow {
    pub key: ItemKey,
    pub description: String,
    pub global_stock: f64,
    pub main_store_stock: f64,
    pub pending_quantity: f64,
    pub min_level: f64,
    pub max_level: f64,
    pub effective_stock: f64,
    pub reorder: bool,
    pub suggested_order_qty: f64,
    pub pack_size: Option<f64>,
    pub packed_order_qty: f64,
    pub adc: Option<f64>,
    pub unit_cost: Option<f64>,
    pub global_stock_days: f64,
    pub main_store_stock_days: f64,
}

impl ReorderRow {
    pub fn compute(
        entry: &CatalogEntry,
        global_stock: f64,
        main_store_stock: f64,
        pending_quantity: f64,
    ) -> Self {
        let effective_stock = global_stock + main_store_stock + pending_quantity;
        let reorder = effective_stock < entry.min_level;
        let suggested_order_qty = if reorder {
            (entry.max_level - effective_stock).max(0.0)
        } else {
            0.0
        };
        let packed_order_qty = match entry.pack_size {
            Some(pack) if pack > 0.0 && suggested_order_qty > 0.0 => {
                (suggested_order_qty / pack).ceil() * pack
            }
            _ => suggested_order_qty,
        };

        ReorderRow {
            key: entry.key.clone(),
            description: entry.description.clone(),
            global_stock,
            main_store_stock,
            pending_quantity,
            min_level: entry.min_level,
            max_level: entry.max_level,
            effective_stock,
            reorder,
            suggested_order_qty,
            pack_size: entry.pack_size,
            packed_order_qty,
            adc: entry.adc,
            unit_cost: entry.unit_cost,
            global_stock_days: stock_days(global_stock, entry.adc),
            main_store_stock_days: stock_days(main_store_stock, entry.adc),
        }
    }

    pub fn order_value(&self) -> f64 {
        self.unit_cost
            .map_or(0.0, |cost| self.suggested_order_qty * cost)
    }

    fn to_report_row(&self) -> Vec<ReportValue> {
        vec![
            ReportValue::Text(self.key.to_string()),
            ReportValue::Text(self.description.clone()),
            ReportValue::Number(self.min_level),
            ReportValue::Number(self.max_level),
            ReportValue::Number(self.global_stock),
            ReportValue::Number(self.main_store_stock),
            ReportValue::Number(self.pending_quantity),
            ReportValue::Number(self.effective_stock),
            ReportValue::Flag(self.reorder),
            ReportValue::Number(self.suggested_order_qty),
            ReportValue::from(self.pack_size),
            ReportValue::Number(self.packed_order_qty),
            ReportValue::from(self.adc),
            ReportValue::Number(self.global_stock_days),
            ReportValue::Number(self.main_store_stock_days),
        ]
    }
}

fn stock_days(stock: f64, adc: Option<f64>) -> f64 {
    match adc {
        Some(adc) if adc > 0.0 => (stock / adc).round(),
        _ => 0.0,
    }
}

fn level(
    row: &DataRow<'_>,
    field: Field,
    key: &ItemKey,
    source: &str,
    ctx: &mut RunContext,
) -> f64 {
    let cell = row.get(field);
    match cell.as_number() {
        Some(value) => value,
        None => {
            ctx.warn(
                WarningKind::LevelCoerced,
                source,
                Some(row.line),
                format!(
                    "{} '{}' for item {} counted as 0",
                    field.label(),
                    cell.as_text().unwrap_or_default(),
                    key
                ),
            );
            0.0
        }
    }
}

pub fn load_catalog(table: &RawTable, ctx: &mut RunContext) -> PipelineResult<Vec<CatalogEntry>> {
    let header = locate_columns(table, &CATALOG_LAYOUT, ctx)?;
    let source = table.source_name.as_str();

    let mut entries: Vec<CatalogEntry> = Vec::new();
    let mut seen: HashMap<ItemKey, usize> = HashMap::new();
    for row in data_rows(table, &header) {
        let Some(key) = row_key(&row, source, ctx) else {
            continue;
        };
        if let Some(first_line) = seen.get(&key) {
            return Err(PipelineError::DuplicateCatalogItem {
                key: key.to_string(),
                first_line: *first_line,
                line: row.line,
            });
        }
        seen.insert(key.clone(), row.line);

        let min_level = level(&row, Field::MinLevel, &key, source, ctx);
        let max_level = level(&row, Field::MaxLevel, &key, source, ctx);
        entries.push(CatalogEntry {
            description: row.text(Field::Description).unwrap_or_default(),
            pack_size: row.get(Field::PackSize).as_number(),
            adc: row.get(Field::Adc).as_number(),
            unit_cost: row.get(Field::UnitCost).as_number(),
            key,
            min_level,
            max_level,
            line: row.line,
        });
    }

    Ok(entries)
}

fn lookup_totals(table: &RawTable, ctx: &mut RunContext) -> PipelineResult<BTreeMap<ItemKey, f64>> {
    let records = normalize(table, ctx)?;
    Ok(lookup_map(aggregate(&records)))
}

fn filter_pending(
    records: Vec<StockRecord>,
    source: &str,
    ctx: &mut RunContext,
) -> Vec<StockRecord> {
    let store = ctx.settings.pending.store_name.clone();
    let cutoff = ctx
        .settings
        .pending
        .window_days
        .and_then(|days| ctx.as_of.checked_sub_days(Days::new(days.max(0) as u64)));

    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        if let Some(store) = store.as_deref() {
            let same_store = record
                .location
                .as_deref()
                .is_some_and(|loc| loc.trim().eq_ignore_ascii_case(store.trim()));
            if !same_store {
                ctx.warn(
                    WarningKind::FilteredRow,
                    source,
                    Some(record.line),
                    format!(
                        "pending order for store '{}' is not '{}'",
                        record.location.as_deref().unwrap_or_default(),
                        store
                    ),
                );
                continue;
            }
        }
        if let Some(cutoff) = cutoff {
            match record.order_date {
                Some(date) if date >= cutoff => {}
                Some(date) => {
                    ctx.warn(
                        WarningKind::FilteredRow,
                        source,
                        Some(record.line),
                        format!("order dated {} is before {}", date, cutoff),
                    );
                    continue;
                }
                None => {
                    ctx.warn(
                        WarningKind::FilteredRow,
                        source,
                        Some(record.line),
                        "order without a readable date",
                    );
                    continue;
                }
            }
        }
        kept.push(record);
    }
    kept
}

fn pending_totals(table: &RawTable, ctx: &mut RunContext) -> PipelineResult<BTreeMap<ItemKey, f64>> {
    let records = normalize(table, ctx)?;
    let records = filter_pending(records, &table.source_name, ctx);
    ctx.progress(&format!("  {} PO lines after filters", records.len()));
    Ok(lookup_map(aggregate(&records)))
}

struct InputTables {
    catalog: RawTable,
    global_stock: RawTable,
    main_store_stock: RawTable,
    pending_orders: RawTable,
}

fn read_inputs(inputs: &ReorderInputs, ctx: &mut RunContext) -> PipelineResult<InputTables> {
    // Every file is read before any row is interpreted
    for (role, path) in inputs.roles() {
        ensure_readable(path, role)?;
    }

    let catalog_sheet = match ctx.settings.catalog.sheet_name.clone() {
        Some(name) => SheetSelector::Named(name),
        None => SheetSelector::First,
    };
    ctx.progress("Loading Master Data…");
    let catalog = RawTable::read_any(&inputs.catalog, CATALOG_ROLE, &catalog_sheet)?;
    ctx.progress("Loading Global Stock…");
    let global_stock =
        RawTable::read_any(&inputs.global_stock, GLOBAL_LOOKUP_ROLE, &SheetSelector::First)?;
    ctx.progress("Loading Main Store Stock…");
    let main_store_stock = RawTable::read_any(
        &inputs.main_store_stock,
        MAIN_STORE_LOOKUP_ROLE,
        &SheetSelector::First,
    )?;
    ctx.progress("Loading Pending PO…");
    let pending_orders =
        RawTable::read_any(&inputs.pending_orders, PENDING_ROLE, &SheetSelector::First)?;

    Ok(InputTables {
        catalog,
        global_stock,
        main_store_stock,
        pending_orders,
    })
}

/// Joins the four inputs into one row per catalog entry.
pub fn compute_reorder(
    inputs: &ReorderInputs,
    ctx: &mut RunContext,
) -> PipelineResult<Vec<ReorderRow>> {
    let tables = read_inputs(inputs, ctx)?;

    let catalog = load_catalog(&tables.catalog, ctx)?;
    ctx.progress(&format!("  {} catalog items", catalog.len()));

    ctx.progress("Merging Global Stock…");
    let global = lookup_totals(&tables.global_stock, ctx)?;
    ctx.progress("Merging Main Store Stock…");
    let main_store = lookup_totals(&tables.main_store_stock, ctx)?;
    ctx.progress("Processing Pending PO…");
    let pending = pending_totals(&tables.pending_orders, ctx)?;

    ctx.progress("Calculating inventory metrics…");
    // One row per catalog entry, in catalog order; absent quantities count as 0
    let mut rows = Vec::with_capacity(catalog.len());
    for entry in &catalog {
        let global_stock = global.get(&entry.key).copied();
        let main_store_stock = main_store.get(&entry.key).copied();
        let pending_quantity = pending.get(&entry.key).copied();
        if global_stock.is_none() && main_store_stock.is_none() && pending_quantity.is_none() {
            ctx.warn(
                WarningKind::UnmatchedCatalogItem,
                &tables.catalog.source_name,
                Some(entry.line),
                format!("no stock or pending orders found for item {}", entry.key),
            );
        }
        rows.push(ReorderRow::compute(
            entry,
            global_stock.unwrap_or(0.0),
            main_store_stock.unwrap_or(0.0),
            pending_quantity.unwrap_or(0.0),
        ));
    }

    let catalogued: HashSet<&ItemKey> = catalog.iter().map(|entry| &entry.key).collect();
    let uncatalogued = global
        .keys()
        .chain(main_store.keys())
        .filter(|key| !catalogued.contains(key))
        .count();
    if uncatalogued > 0 {
        debug!("{} stock lookup keys have no catalog entry", uncatalogued);
    }
    info!(
        "{} items, {} need reorder",
        rows.len(),
        rows.iter().filter(|r| r.reorder).count()
    );

    Ok(rows)
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub fn reorder_stats(rows: &[ReorderRow]) -> ReorderStats {
    ReorderStats {
        flagged: rows.iter().filter(|r| r.reorder).count(),
        order_value: rows.iter().map(ReorderRow::order_value).sum(),
        avg_global_stock_days: mean(rows.iter().map(|r| r.global_stock_days)),
        avg_main_store_stock_days: mean(rows.iter().map(|r| r.main_store_stock_days)),
    }
}

/// Builds `INVENTORY_CALCULATION.xlsx`.
pub fn run_reorder(
    inputs: &ReorderInputs,
    output: &Path,
    mut ctx: RunContext,
) -> PipelineResult<RunSummary> {
    let rows = compute_reorder(inputs, &mut ctx)?;

    ctx.progress(&format!("Exporting to {}…", output.display()));
    let report_rows: Vec<Vec<ReportValue>> = rows.iter().map(ReorderRow::to_report_row).collect();
    report::write(output, REPORT_SHEET, &REPORT_HEADER, &report_rows)?;

    let total_order: f64 = rows.iter().map(|r| r.suggested_order_qty).sum();
    Ok(ctx.finish(RunOutcome {
        job: JobKind::Reorder,
        output_path: output.to_path_buf(),
        row_count: rows.len(),
        total_quantity: total_order,
        reorder: Some(reorder_stats(&rows)),
    }))
}
