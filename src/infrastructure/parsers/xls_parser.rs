use calamine::{open_workbook_auto, DataType, Range, Reader};
use chrono::NaiveDate;
use tracing::{debug, info, warn, error};
use crate::{
    config::SheetLayout,
    domain::{
        error::IngestionError,
        models::{LocalFile, TradeRecord, PRODUCT_ID_LEN},
        ports::TableExtractor,
    },
};

/// Reads the first worksheet of a trading bulletin with calamine.
pub struct CalamineExtractor {
    layout: SheetLayout,
}

impl CalamineExtractor {
    pub fn new(layout: SheetLayout) -> Self {
        Self { layout }
    }
}

impl TableExtractor for CalamineExtractor {
    fn extract(&self, file: &LocalFile) -> Result<Vec<TradeRecord>, IngestionError> {
        debug!("Opening workbook {}", file.path.display());
        let mut workbook = open_workbook_auto(&file.path).map_err(|e| {
            error!("Failed to open workbook {}: {}", file.path.display(), e);
            IngestionError::Parse(e.to_string())
        })?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| IngestionError::Parse(format!("{} has no worksheets", file.path.display())))?
            .map_err(|e| IngestionError::Parse(e.to_string()))?;

        extract_records(&range, &self.layout, file.report_date)
    }
}

/// Turns a bulletin sheet into trade records.
///
/// The trade date comes from the header cell when it parses, falling back to
/// `fallback_date` (the date embedded in the report link). Sheets in another
/// unit of measure yield no records. Rows are read from `start_row` until the
/// sentinel row; rows with a malformed product id or a placeholder contract
/// count are skipped. The scan never passes the last row of the sheet: a
/// missing sentinel is reported as [`IngestionError::MissingSentinel`].
pub fn extract_records(
    range: &Range<DataType>,
    layout: &SheetLayout,
    fallback_date: NaiveDate,
) -> Result<Vec<TradeRecord>, IngestionError> {
    let date = trade_date(range, layout, fallback_date);

    let unit = cell_text(range, layout.unit_cell);
    if unit != layout.unit_marker {
        info!("Skipping sheet dated {}: unit of measure is {:?}", date, unit);
        return Ok(Vec::new());
    }

    let last_row = match range.end() {
        Some((row, _)) => row,
        None => return Err(IngestionError::Parse("sheet is empty".to_string())),
    };

    let first = layout.first_column;
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for row in layout.start_row..=last_row {
        let product_id = cell_text(range, (row, first));
        if product_id == layout.sentinel {
            info!("Extracted {} records dated {} ({} rows skipped)", records.len(), date, skipped);
            return Ok(records);
        }

        let contracts = cell_text(range, (row, layout.contract_column));
        if product_id.chars().count() != PRODUCT_ID_LEN || contracts == layout.skip_marker {
            skipped += 1;
            continue;
        }

        let volume = cell_int(range, (row, first + 3))?;
        let total = cell_int(range, (row, first + 4))?;
        let count = cell_int(range, (row, layout.contract_column))?;

        if let Some(record) = TradeRecord::new(
            &product_id,
            &cell_text(range, (row, first + 1)),
            &cell_text(range, (row, first + 2)),
            volume,
            total,
            count,
            date,
        ) {
            records.push(record);
        }
    }

    error!("No {:?} row found between rows {} and {}", layout.sentinel, layout.start_row, last_row);
    Err(IngestionError::MissingSentinel {
        sentinel: layout.sentinel.clone(),
        last_row,
    })
}

fn trade_date(range: &Range<DataType>, layout: &SheetLayout, fallback: NaiveDate) -> NaiveDate {
    let header = cell_text(range, layout.date_cell);
    let raw = header.rsplit(':').next().unwrap_or("").trim();

    match NaiveDate::parse_from_str(raw, "%d.%m.%Y") {
        Ok(date) => {
            if date != fallback {
                warn!("Header date {} differs from link date {}; using header", date, fallback);
            }
            date
        }
        Err(_) => {
            debug!("Header date {:?} unreadable, using link date {}", header, fallback);
            fallback
        }
    }
}

fn cell_text(range: &Range<DataType>, pos: (u32, u32)) -> String {
    match range.get_value(pos) {
        Some(DataType::String(s)) => s.trim().to_string(),
        Some(DataType::Int(i)) => i.to_string(),
        Some(DataType::Float(f)) if f.fract() == 0.0 => format!("{}", *f as i64),
        Some(DataType::Float(f)) => f.to_string(),
        _ => String::new(),
    }
}

/// Non-negative integer cell. Fractional values are truncated.
fn cell_int(range: &Range<DataType>, pos: (u32, u32)) -> Result<i64, IngestionError> {
    let value = match range.get_value(pos) {
        Some(DataType::Int(i)) => Some(*i),
        Some(DataType::Float(f)) if f.is_finite() => Some(f.trunc() as i64),
        Some(DataType::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    };

    match value {
        Some(v) if v >= 0 => Ok(v),
        _ => Err(IngestionError::Parse(format!(
            "expected a non-negative number at row {}, column {}, found {:?}",
            pos.0,
            pos.1,
            range.get_value(pos)
        ))),
    }
}
