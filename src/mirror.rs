//! Remote spreadsheet mirror: the operations the sync engine needs from any
//! spreadsheet backend, plus the sheet layout shared by every backend.
//!
//! Rows and columns are 1-based sheet coordinates. Row 1 holds the header,
//! so record `i` of `read_records` lives on row `i + 2`.

use serde_json::{Map, Value};

use crate::error::{MirrorError, MirrorResult};

pub const PRODUCTS_SHEET: &str = "Products";
pub const SALES_SHEET: &str = "Sales";

pub const COL_CODE: &str = "Code";
pub const COL_NAME: &str = "Name";
pub const COL_PRICE: &str = "Price";
pub const COL_STOCK: &str = "Stock";

/// Column positions in the "Products" sheet.
pub const CODE_COLUMN: usize = 1;
pub const NAME_COLUMN: usize = 2;
pub const PRICE_COLUMN: usize = 3;
pub const STOCK_COLUMN: usize = 4;

pub const PRODUCT_HEADERS: [&str; 4] = [COL_CODE, COL_NAME, COL_PRICE, COL_STOCK];
pub const SALES_HEADERS: [&str; 5] = ["Timestamp", "TicketId", "Cashier", "Total", "Summary"];

/// First data row below the header.
pub const FIRST_DATA_ROW: usize = 2;

/// One data row keyed by header name.
pub type SheetRecord = Map<String, Value>;

/// A staged single-cell write for `batch_update`.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub row: usize,
    pub column: usize,
    pub value: Value,
}

impl CellUpdate {
    /// A1 reference such as `D7`.
    pub fn a1(&self) -> String {
        format!("{}{}", column_letter(self.column), self.row)
    }
}

/// Operations required of a spreadsheet backend. Every call is a blocking
/// round trip; no retries happen at this layer.
pub trait SheetClient: Send + Sync {
    fn read_records(&self, sheet: &str) -> MirrorResult<Vec<SheetRecord>>;

    fn append_row(&self, sheet: &str, row: Vec<Value>) -> MirrorResult<()>;

    /// Row number of the first cell in `column` whose text equals `key`.
    fn find_row(&self, sheet: &str, column: usize, key: &str) -> MirrorResult<Option<usize>>;

    fn update_cell(&self, sheet: &str, row: usize, column: usize, value: Value)
        -> MirrorResult<()>;

    fn delete_row(&self, sheet: &str, row: usize) -> MirrorResult<()>;

    fn batch_update(&self, sheet: &str, updates: &[CellUpdate]) -> MirrorResult<()>;
}

/// Backend used when no spreadsheet is configured; every call fails so the
/// engines fall back to local-only operation.
pub struct UnconfiguredSheets {
    reason: String,
}

impl UnconfiguredSheets {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> MirrorResult<T> {
        Err(MirrorError::NotConfigured(self.reason.clone()))
    }
}

impl SheetClient for UnconfiguredSheets {
    fn read_records(&self, _sheet: &str) -> MirrorResult<Vec<SheetRecord>> {
        self.fail()
    }

    fn append_row(&self, _sheet: &str, _row: Vec<Value>) -> MirrorResult<()> {
        self.fail()
    }

    fn find_row(&self, _sheet: &str, _column: usize, _key: &str) -> MirrorResult<Option<usize>> {
        self.fail()
    }

    fn update_cell(
        &self,
        _sheet: &str,
        _row: usize,
        _column: usize,
        _value: Value,
    ) -> MirrorResult<()> {
        self.fail()
    }

    fn delete_row(&self, _sheet: &str, _row: usize) -> MirrorResult<()> {
        self.fail()
    }

    fn batch_update(&self, _sheet: &str, _updates: &[CellUpdate]) -> MirrorResult<()> {
        self.fail()
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by backends
// ---------------------------------------------------------------------------

/// Spreadsheet column letters: 1 -> A, 26 -> Z, 27 -> AA.
pub fn column_letter(column: usize) -> String {
    let mut n = column.max(1);
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Text form of a cell, matching how a key typed into a sheet compares:
/// integral numbers lose any fractional part, empty cells become "".
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 1e15) {
                format!("{f:.0}")
            } else {
                n.to_string()
            }
        }
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Turn a raw value grid (header row first) into header-keyed records.
/// Short rows are padded with empty strings.
pub fn records_from_grid(grid: &[Vec<Value>]) -> Vec<SheetRecord> {
    let Some((header, rows)) = grid.split_first() else {
        return Vec::new();
    };
    let headers: Vec<String> = header.iter().map(cell_text).collect();

    rows.iter()
        .map(|row| {
            headers
                .iter()
                .enumerate()
                .map(|(i, h)| {
                    let value = row
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| Value::String(String::new()));
                    (h.clone(), value)
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
pub mod testing {
    //! In-memory spreadsheet with failure injection.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemorySheets {
        sheets: Mutex<HashMap<String, Vec<Vec<Value>>>>,
        offline: AtomicBool,
        /// Number of successful writes allowed before every write fails.
        write_budget: Mutex<Option<usize>>,
        pub reads: AtomicUsize,
        pub writes: AtomicUsize,
        pub batch_calls: AtomicUsize,
    }

    impl MemorySheets {
        pub fn with_standard_sheets() -> Self {
            let sheets = Self::default();
            sheets.set_grid(
                PRODUCTS_SHEET,
                vec![PRODUCT_HEADERS.iter().map(|h| Value::from(*h)).collect()],
            );
            sheets.set_grid(
                SALES_SHEET,
                vec![SALES_HEADERS.iter().map(|h| Value::from(*h)).collect()],
            );
            sheets
        }

        pub fn set_grid(&self, sheet: &str, grid: Vec<Vec<Value>>) {
            self.sheets.lock().unwrap().insert(sheet.to_string(), grid);
        }

        pub fn grid(&self, sheet: &str) -> Vec<Vec<Value>> {
            self.sheets
                .lock()
                .unwrap()
                .get(sheet)
                .cloned()
                .unwrap_or_default()
        }

        pub fn push_product(&self, code: Value, name: &str, price: Value, stock: Value) {
            let mut sheets = self.sheets.lock().unwrap();
            sheets
                .entry(PRODUCTS_SHEET.to_string())
                .or_default()
                .push(vec![code, Value::from(name), price, stock]);
        }

        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn fail_writes_after(&self, successful_writes: usize) {
            *self.write_budget.lock().unwrap() = Some(successful_writes);
        }

        fn check_online(&self) -> MirrorResult<()> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(MirrorError::Network(
                    "Cannot reach spreadsheet API at memory://".to_string(),
                ));
            }
            Ok(())
        }

        fn begin_write(&self) -> MirrorResult<()> {
            self.check_online()?;
            let mut budget = self.write_budget.lock().unwrap();
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(MirrorError::Status(
                        "Spreadsheet API server error (HTTP 503)".to_string(),
                    ));
                }
                *remaining -= 1;
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn with_sheet<T>(
            &self,
            sheet: &str,
            f: impl FnOnce(&mut Vec<Vec<Value>>) -> MirrorResult<T>,
        ) -> MirrorResult<T> {
            let mut sheets = self.sheets.lock().unwrap();
            let grid = sheets
                .get_mut(sheet)
                .ok_or_else(|| MirrorError::Status(format!("Unable to parse range: {sheet}")))?;
            f(grid)
        }

        fn set_cell(grid: &mut [Vec<Value>], row: usize, column: usize, value: Value) {
            if let Some(r) = grid.get_mut(row - 1) {
                while r.len() < column {
                    r.push(Value::String(String::new()));
                }
                r[column - 1] = value;
            }
        }
    }

    impl SheetClient for MemorySheets {
        fn read_records(&self, sheet: &str) -> MirrorResult<Vec<SheetRecord>> {
            self.check_online()?;
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.with_sheet(sheet, |grid| Ok(records_from_grid(grid)))
        }

        fn append_row(&self, sheet: &str, row: Vec<Value>) -> MirrorResult<()> {
            self.begin_write()?;
            self.with_sheet(sheet, |grid| {
                grid.push(row);
                Ok(())
            })
        }

        fn find_row(&self, sheet: &str, column: usize, key: &str) -> MirrorResult<Option<usize>> {
            self.check_online()?;
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.with_sheet(sheet, |grid| {
                Ok(grid
                    .iter()
                    .enumerate()
                    .skip(1)
                    .find(|(_, r)| r.get(column - 1).map(cell_text).as_deref() == Some(key))
                    .map(|(i, _)| i + 1))
            })
        }

        fn update_cell(
            &self,
            sheet: &str,
            row: usize,
            column: usize,
            value: Value,
        ) -> MirrorResult<()> {
            self.begin_write()?;
            self.with_sheet(sheet, |grid| {
                Self::set_cell(grid, row, column, value);
                Ok(())
            })
        }

        fn delete_row(&self, sheet: &str, row: usize) -> MirrorResult<()> {
            self.begin_write()?;
            self.with_sheet(sheet, |grid| {
                if row >= 1 && row <= grid.len() {
                    grid.remove(row - 1);
                }
                Ok(())
            })
        }

        fn batch_update(&self, sheet: &str, updates: &[CellUpdate]) -> MirrorResult<()> {
            self.begin_write()?;
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            self.with_sheet(sheet, |grid| {
                for u in updates {
                    Self::set_cell(grid, u.row, u.column, u.value.clone());
                }
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(4), "D");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(52), "AZ");
        assert_eq!(column_letter(703), "AAA");
    }

    #[test]
    fn cell_update_a1_reference() {
        let u = CellUpdate {
            row: 7,
            column: STOCK_COLUMN,
            value: json!(3),
        };
        assert_eq!(u.a1(), "D7");
    }

    #[test]
    fn cell_text_normalizes_numeric_keys() {
        assert_eq!(cell_text(&json!(7501234567890_i64)), "7501234567890");
        assert_eq!(cell_text(&json!(42.0)), "42");
        assert_eq!(cell_text(&json!(" 0042 ")), "0042");
        assert_eq!(cell_text(&Value::Null), "");
        assert_eq!(cell_text(&json!(1.5)), "1.5");
    }

    #[test]
    fn records_pad_short_rows() {
        let grid = vec![
            vec![json!("Code"), json!("Name"), json!("Price"), json!("Stock")],
            vec![json!("1"), json!("Pen"), json!(5), json!(10)],
            vec![json!("2"), json!("Clip")],
        ];
        let records = records_from_grid(&grid);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["Name"], json!("Pen"));
        assert_eq!(records[1]["Price"], json!(""));
        assert_eq!(records[1]["Stock"], json!(""));
    }

    #[test]
    fn empty_grid_has_no_records() {
        assert!(records_from_grid(&[]).is_empty());
        assert!(records_from_grid(&[vec![json!("Code")]]).is_empty());
    }

    #[test]
    fn unconfigured_backend_fails_every_call() {
        let sheets = UnconfiguredSheets::new("no spreadsheet id");
        assert!(matches!(
            sheets.read_records(PRODUCTS_SHEET),
            Err(MirrorError::NotConfigured(_))
        ));
        assert!(sheets.append_row(SALES_SHEET, vec![]).is_err());
        assert!(sheets.batch_update(PRODUCTS_SHEET, &[]).is_err());
    }
}
