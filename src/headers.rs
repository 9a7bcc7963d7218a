use crate::table::Cell;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    ItemCode,
    Description,
    Location,
    Batch,
    Quantity,
    MinLevel,
    MaxLevel,
    PackSize,
    Adc,
    UnitCost,
    OrderDate,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::ItemCode,
        Field::Description,
        Field::Location,
        Field::Batch,
        Field::Quantity,
        Field::MinLevel,
        Field::MaxLevel,
        Field::PackSize,
        Field::Adc,
        Field::UnitCost,
        Field::OrderDate,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Field::ItemCode => "item code",
            Field::Description => "description",
            Field::Location => "location",
            Field::Batch => "batch",
            Field::Quantity => "quantity",
            Field::MinLevel => "min level",
            Field::MaxLevel => "max level",
            Field::PackSize => "pack size",
            Field::Adc => "ADC",
            Field::UnitCost => "unit cost",
            Field::OrderDate => "order date",
        }
    }

    /// Folded aliases, most preferred first.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::ItemCode => &[
                "itemcode",
                "itemno",
                "itemnumber",
                "materialcode",
                "item",
                "sku",
                "code",
            ],
            Field::Description => &[
                "description",
                "itemdescription",
                "materialdescription",
                "itemname",
                "desc",
            ],
            Field::Location => &[
                "location",
                "locationname",
                "storename",
                "store",
                "warehouse",
            ],
            Field::Batch => &["batchno", "batch", "batchnumber", "lotno", "lot"],
            Field::Quantity => &[
                "penqty",
                "pendingqty",
                "pendingquantity",
                "qty",
                "quantity",
                "sumofqty",
                "totalglobalstock",
                "totalquantity",
                "totalstock",
                "stockqty",
                "onhand",
                "stock",
            ],
            Field::MinLevel => &["minstocklevel", "minlevel", "minstock", "minimum", "min"],
            Field::MaxLevel => &["maxstocklevel", "maxlevel", "maxstock", "maximum", "max"],
            Field::PackSize => &["packsize", "pack", "packqty"],
            Field::Adc => &["adc", "averagedailyconsumption", "avgdailyconsumption"],
            Field::UnitCost => &["unitcost", "costperunit", "unitprice"],
            Field::OrderDate => &["pocreateddate", "podate", "orderdate", "createddate"],
        }
    }
}

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

static ALIAS_TABLE: Lazy<HashMap<&'static str, (Field, usize)>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for field in Field::ALL {
        for (rank, alias) in field.aliases().iter().enumerate() {
            table.insert(*alias, (field, rank));
        }
    }
    table
});

pub fn fold_header(raw: &str) -> String {
    NON_ALNUM
        .replace_all(&raw.to_lowercase(), "")
        .into_owned()
}

pub fn canonical_field(raw: &str) -> Option<Field> {
    lookup(raw).map(|(field, _)| field)
}

fn lookup(raw: &str) -> Option<(Field, usize)> {
    ALIAS_TABLE.get(fold_header(raw).as_str()).copied()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    columns: HashMap<Field, usize>,
}

impl ColumnMap {
    pub fn from_header_row(row: &[Cell]) -> Self {
        let mut best: HashMap<Field, (usize, usize)> = HashMap::new();
        for (col, cell) in row.iter().enumerate() {
            let Some(text) = cell.as_text() else {
                continue;
            };
            // Earliest-ranked alias wins, then the leftmost column
            if let Some((field, rank)) = lookup(&text) {
                best.entry(field)
                    .and_modify(|current| {
                        if rank < current.0 {
                            *current = (rank, col);
                        }
                    })
                    .or_insert((rank, col));
            }
        }
        ColumnMap {
            columns: best
                .into_iter()
                .map(|(field, (_, col))| (field, col))
                .collect(),
        }
    }

    pub fn column(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn has(&self, field: Field) -> bool {
        self.columns.contains_key(&field)
    }

    fn missing(&self, required: &[Field]) -> Vec<Field> {
        required.iter().copied().filter(|f| !self.has(*f)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMatch {
    pub row_index: usize,
    pub columns: ColumnMap,
}

/// Finds the first row within `scan_rows` that resolves every required field,
/// or returns what the best candidate row is missing.
pub fn locate_header(
    rows: &[Vec<Cell>],
    required: &[Field],
    scan_rows: usize,
) -> Result<HeaderMatch, Vec<Field>> {
    let mut best_missing: Option<Vec<Field>> = None;

    for (row_index, row) in rows.iter().take(scan_rows).enumerate() {
        let columns = ColumnMap::from_header_row(row);
        let missing = columns.missing(required);
        if missing.is_empty() {
            return Ok(HeaderMatch { row_index, columns });
        }
        let better = best_missing
            .as_ref()
            .map_or(true, |current| missing.len() < current.len());
        if better {
            best_missing = Some(missing);
        }
    }

    Err(best_missing.unwrap_or_else(|| required.to_vec()))
}
