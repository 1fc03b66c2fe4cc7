//! Catalog sync engine and local catalog access.
//!
//! The mirror's "Products" sheet is the catalog of record. `sync_down`
//! replaces the local products table with the sheet contents in a single
//! transaction; creates, edits and deletes go to the sheet first and are
//! followed by a full re-pull. A checkout's stock decrements reach the sheet
//! as one table read plus one batch write.
//!
//! Mirror failures come back as `MirrorResult` and never abort a local
//! operation. Local store failures propagate as `PosError`.

use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::db::{self, DbState};
use crate::error::{MirrorError, MirrorResult, PosError, PosResult};
use crate::mirror::{
    cell_text, CellUpdate, SheetClient, SheetRecord, CODE_COLUMN, COL_CODE, COL_NAME, COL_PRICE,
    COL_STOCK, FIRST_DATA_ROW, NAME_COLUMN, PRICE_COLUMN, PRODUCTS_SHEET, SALES_SHEET,
    STOCK_COLUMN,
};
use crate::models::{Product, ProductDraft, Screen};
use crate::session::Session;

const SETTINGS_CATEGORY: &str = "sync";
const LAST_SYNC_KEY: &str = "last_catalog_sync";

/// Outcome of a full pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub success: bool,
    pub message: String,
    pub synced: usize,
    /// Store-local time of a successful non-empty pull.
    pub synced_at: Option<String>,
}

impl SyncReport {
    fn failed(err: &MirrorError) -> Self {
        Self {
            success: false,
            message: format!("Error: {err}"),
            synced: 0,
            synced_at: None,
        }
    }
}

/// One product's quantity sold in a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub barcode: String,
    pub quantity: i64,
}

/// A sale as relayed to the "Sales" history sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleHistoryEntry {
    pub timestamp: String,
    pub sale_id: i64,
    pub cashier: String,
    pub total: Decimal,
    pub summary: String,
}

/// Mirror-facing side of the catalog. The replace-all pull lives behind this
/// trait so a merging strategy can replace it without touching checkout.
pub trait CatalogSync {
    /// Pull the whole remote catalog into the local store.
    fn sync_down(&self, db: &DbState) -> PosResult<SyncReport>;

    /// Append a product row. No existence check.
    fn push_create(&self, draft: &ProductDraft) -> MirrorResult<()>;

    /// Overwrite name, price and stock of the row keyed by `barcode`.
    fn push_edit(&self, barcode: &str, draft: &ProductDraft) -> MirrorResult<()>;

    /// Delete the row keyed by `barcode`; a missing row is not an error.
    fn push_delete(&self, barcode: &str) -> MirrorResult<()>;

    /// Apply a checkout's stock decrements in one batch write.
    fn push_stock_batch(&self, changes: &[StockChange]) -> MirrorResult<()>;

    /// Append a sale to the history sheet.
    fn record_sale(&self, entry: &SaleHistoryEntry) -> MirrorResult<()>;
}

/// Spreadsheet-backed catalog using full delete-and-reinsert pulls.
pub struct SheetCatalog {
    sheets: Arc<dyn SheetClient>,
    config: StoreConfig,
}

impl SheetCatalog {
    pub fn new(sheets: Arc<dyn SheetClient>, config: StoreConfig) -> Self {
        Self { sheets, config }
    }
}

impl CatalogSync for SheetCatalog {
    fn sync_down(&self, db: &DbState) -> PosResult<SyncReport> {
        let records = match self.sheets.read_records(PRODUCTS_SHEET) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "catalog pull failed");
                return Ok(SyncReport::failed(&e));
            }
        };

        let drafts = match parse_remote_catalog(&records) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "catalog pull rejected, local catalog left untouched");
                return Ok(SyncReport::failed(&e));
            }
        };

        let mut conn = db.lock()?;
        replace_products(&mut conn, &drafts)?;

        if records.is_empty() {
            info!("remote catalog is empty, local catalog cleared");
            return Ok(SyncReport {
                success: true,
                message: "Remote catalog is empty.".to_string(),
                synced: 0,
                synced_at: None,
            });
        }

        let now = self.config.now_local();
        db::set_setting(&conn, SETTINGS_CATEGORY, LAST_SYNC_KEY, &now)?;
        info!(products = drafts.len(), "catalog pulled from mirror");
        Ok(SyncReport {
            success: true,
            message: format!("Synced: {} products.", drafts.len()),
            synced: drafts.len(),
            synced_at: Some(now),
        })
    }

    fn push_create(&self, draft: &ProductDraft) -> MirrorResult<()> {
        let row = vec![
            Value::String(draft.barcode.clone()),
            Value::String(draft.name.clone()),
            decimal_value(draft.price),
            Value::from(draft.stock),
        ];
        self.sheets
            .append_row(PRODUCTS_SHEET, row)
            .inspect_err(|e| warn!(barcode = %draft.barcode, error = %e, "push create failed"))
    }

    fn push_edit(&self, barcode: &str, draft: &ProductDraft) -> MirrorResult<()> {
        let row = self
            .sheets
            .find_row(PRODUCTS_SHEET, CODE_COLUMN, barcode)?
            .ok_or_else(|| MirrorError::RowNotFound(barcode.to_string()))?;

        // Three independent writes; a failure part way leaves the row mixed.
        let writes = [
            (NAME_COLUMN, Value::String(draft.name.clone())),
            (PRICE_COLUMN, decimal_value(draft.price)),
            (STOCK_COLUMN, Value::from(draft.stock)),
        ];
        for (column, value) in writes {
            self.sheets
                .update_cell(PRODUCTS_SHEET, row, column, value)
                .inspect_err(|e| {
                    warn!(barcode, row, column, error = %e, "push edit failed part way")
                })?;
        }
        info!(barcode, row, "product edited on mirror");
        Ok(())
    }

    fn push_delete(&self, barcode: &str) -> MirrorResult<()> {
        match self.sheets.find_row(PRODUCTS_SHEET, CODE_COLUMN, barcode)? {
            Some(row) => {
                self.sheets.delete_row(PRODUCTS_SHEET, row)?;
                info!(barcode, row, "product deleted on mirror");
            }
            None => debug!(barcode, "delete skipped, row not on mirror"),
        }
        Ok(())
    }

    fn push_stock_batch(&self, changes: &[StockChange]) -> MirrorResult<()> {
        let records = self.sheets.read_records(PRODUCTS_SHEET)?;
        let updates = stage_stock_updates(&records, changes)?;
        if updates.is_empty() {
            let keys: Vec<&str> = changes.iter().map(|c| c.barcode.as_str()).collect();
            return Err(MirrorError::RowNotFound(keys.join(", ")));
        }
        self.sheets.batch_update(PRODUCTS_SHEET, &updates)?;
        info!(cells = updates.len(), "stock batch pushed to mirror");
        Ok(())
    }

    fn record_sale(&self, entry: &SaleHistoryEntry) -> MirrorResult<()> {
        let row = vec![
            Value::String(entry.timestamp.clone()),
            Value::from(entry.sale_id),
            Value::String(entry.cashier.clone()),
            decimal_value(entry.total),
            Value::String(entry.summary.clone()),
        ];
        self.sheets.append_row(SALES_SHEET, row)
    }
}

// ---------------------------------------------------------------------------
// Remote row parsing
// ---------------------------------------------------------------------------

/// Money as a JSON number so the sheet can sum it.
fn decimal_value(amount: Decimal) -> Value {
    amount
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(amount.to_string()))
}

fn parse_price(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .map(|d| d.normalize())
}

/// Integer coercion: fractional numbers truncate, text must be an integer.
/// Values outside the i64 range are rejected.
fn parse_stock(value: &Value) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .map(f64::trunc)
                .filter(|f| f.is_finite() && *f >= -LIMIT && *f < LIMIT)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn field<'a>(record: &'a SheetRecord, key: &str) -> &'a Value {
    static EMPTY: Value = Value::Null;
    record.get(key).unwrap_or(&EMPTY)
}

/// Validate every remote row. Rows with an empty code are skipped; any
/// other malformed row rejects the whole pull.
fn parse_remote_catalog(records: &[SheetRecord]) -> MirrorResult<Vec<ProductDraft>> {
    let mut seen = HashSet::new();
    let mut drafts = Vec::with_capacity(records.len());

    for (i, record) in records.iter().enumerate() {
        let row = i + FIRST_DATA_ROW;
        let barcode = cell_text(field(record, COL_CODE));
        if barcode.is_empty() {
            continue;
        }
        let malformed = |reason: String| MirrorError::MalformedRow { row, reason };

        let price = parse_price(field(record, COL_PRICE))
            .ok_or_else(|| malformed(format!("price {} is not a number", field(record, COL_PRICE))))?;
        if price.is_sign_negative() && !price.is_zero() {
            return Err(malformed(format!("price {price} is negative")));
        }
        let stock = parse_stock(field(record, COL_STOCK))
            .ok_or_else(|| malformed(format!("stock {} is not an integer", field(record, COL_STOCK))))?;
        if !seen.insert(barcode.clone()) {
            return Err(malformed(format!("duplicate code {barcode}")));
        }

        drafts.push(ProductDraft {
            barcode,
            name: cell_text(field(record, COL_NAME)),
            price,
            stock,
        });
    }
    Ok(drafts)
}

/// Stage `remote_stock - sold` for each product present on the sheet.
/// Quantities for the same code are summed; the first row holding a code
/// is the one written.
fn stage_stock_updates(
    records: &[SheetRecord],
    changes: &[StockChange],
) -> MirrorResult<Vec<CellUpdate>> {
    let mut rows: HashMap<String, (usize, &Value)> = HashMap::new();
    for (i, record) in records.iter().enumerate() {
        let code = cell_text(field(record, COL_CODE));
        if code.is_empty() {
            continue;
        }
        rows.entry(code)
            .or_insert((i + FIRST_DATA_ROW, field(record, COL_STOCK)));
    }

    let mut sold: Vec<(String, i64)> = Vec::new();
    for change in changes {
        match sold.iter_mut().find(|(code, _)| *code == change.barcode) {
            Some((_, qty)) => *qty += change.quantity,
            None => sold.push((change.barcode.clone(), change.quantity)),
        }
    }

    let mut updates = Vec::with_capacity(sold.len());
    for (code, qty) in sold {
        let Some((row, current)) = rows.get(&code) else {
            warn!(barcode = %code, "stock push skipped, code not on mirror");
            continue;
        };
        let current = parse_stock(current).ok_or_else(|| MirrorError::MalformedRow {
            row: *row,
            reason: format!("stock {current} is not an integer"),
        })?;
        let remaining = current
            .checked_sub(qty)
            .ok_or_else(|| MirrorError::MalformedRow {
                row: *row,
                reason: format!("stock {current} minus {qty} overflows"),
            })?;
        updates.push(CellUpdate {
            row: *row,
            column: STOCK_COLUMN,
            value: Value::from(remaining),
        });
    }
    Ok(updates)
}

/// Delete every local product and insert `drafts`, atomically.
fn replace_products(conn: &mut Connection, drafts: &[ProductDraft]) -> PosResult<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM products", [])?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO products (barcode, name, price, stock) VALUES (?1, ?2, ?3, ?4)")?;
        for d in drafts {
            stmt.execute(params![d.barcode, d.name, d.price.to_string(), d.stock])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Local catalog queries
// ---------------------------------------------------------------------------

pub fn list_products(db: &DbState) -> PosResult<Vec<Product>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM products ORDER BY id",
        Product::COLUMNS
    ))?;
    let rows = stmt.query_map([], Product::from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_product(db: &DbState, id: i64) -> PosResult<Option<Product>> {
    let conn = db.lock()?;
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM products WHERE id = ?1", Product::COLUMNS),
            params![id],
            Product::from_row,
        )
        .optional()?)
}

pub(crate) fn find_by_barcode(conn: &Connection, barcode: &str) -> PosResult<Option<Product>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM products WHERE barcode = ?1", Product::COLUMNS),
            params![barcode],
            Product::from_row,
        )
        .optional()?)
}

/// First product (by id) whose name contains `fragment`, case-sensitively.
pub(crate) fn find_by_name_fragment(
    conn: &Connection,
    fragment: &str,
) -> PosResult<Option<Product>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM products WHERE instr(name, ?1) > 0 ORDER BY id LIMIT 1",
                Product::COLUMNS
            ),
            params![fragment],
            Product::from_row,
        )
        .optional()?)
}

pub fn last_sync_time(db: &DbState) -> PosResult<Option<String>> {
    let conn = db.lock()?;
    Ok(db::get_setting(&conn, SETTINGS_CATEGORY, LAST_SYNC_KEY))
}

// ---------------------------------------------------------------------------
// Session-level flows
// ---------------------------------------------------------------------------

fn apply_report(session: &mut Session, report: &SyncReport) {
    if let Some(at) = &report.synced_at {
        session.record_sync(at);
    }
}

/// Pull the catalog once per session, on its first interaction. The flag is
/// set even when the pull fails so a dead mirror does not stall every click.
pub fn ensure_session_synced(
    db: &DbState,
    catalog: &dyn CatalogSync,
    session: &mut Session,
) -> PosResult<Option<SyncReport>> {
    if !session.needs_catalog_sync() {
        return Ok(None);
    }
    let report = catalog.sync_down(db)?;
    apply_report(session, &report);
    session.mark_catalog_synced();
    Ok(Some(report))
}

/// Explicit "reload from mirror".
pub fn reload(
    db: &DbState,
    catalog: &dyn CatalogSync,
    session: &mut Session,
) -> PosResult<SyncReport> {
    session.require_user()?;
    let report = catalog.sync_down(db)?;
    apply_report(session, &report);
    Ok(report)
}

/// Result of an inventory-screen change: the mirror push, then the re-pull
/// when one ran.
#[derive(Debug)]
pub struct InventoryOutcome {
    pub push: MirrorResult<()>,
    pub resync: Option<SyncReport>,
}

fn validate_draft(draft: &ProductDraft) -> PosResult<()> {
    if draft.barcode.trim().is_empty() || draft.name.trim().is_empty() {
        return Err(PosError::InvalidInput(
            "Product code and name are required".to_string(),
        ));
    }
    if draft.price.is_sign_negative() && !draft.price.is_zero() {
        return Err(PosError::InvalidInput("Price cannot be negative".to_string()));
    }
    Ok(())
}

/// Add a product: push to the mirror, then re-pull regardless of the push.
pub fn add_product(
    db: &DbState,
    catalog: &dyn CatalogSync,
    session: &mut Session,
    draft: &ProductDraft,
) -> PosResult<InventoryOutcome> {
    session.require_screen(Screen::Inventory)?;
    validate_draft(draft)?;

    let draft = ProductDraft {
        barcode: draft.barcode.trim().to_string(),
        name: draft.name.trim().to_string(),
        ..draft.clone()
    };
    let push = catalog.push_create(&draft);
    let report = catalog.sync_down(db)?;
    apply_report(session, &report);
    Ok(InventoryOutcome {
        push,
        resync: Some(report),
    })
}

/// Save the product currently under edit. The re-pull (and the end of the
/// edit) happen only when the mirror accepted the change.
pub fn save_edit(
    db: &DbState,
    catalog: &dyn CatalogSync,
    session: &mut Session,
    name: &str,
    price: Decimal,
    stock: i64,
) -> PosResult<InventoryOutcome> {
    session.require_screen(Screen::Inventory)?;
    let id = session
        .editing_product()
        .ok_or_else(|| PosError::InvalidInput("No product is being edited".to_string()))?;
    let product = get_product(db, id)?
        .ok_or_else(|| PosError::NotFound(format!("product {id}")))?;

    let draft = ProductDraft {
        barcode: product.barcode.clone(),
        name: name.trim().to_string(),
        price,
        stock,
    };
    validate_draft(&draft)?;

    let push = catalog.push_edit(&product.barcode, &draft);
    if push.is_err() {
        return Ok(InventoryOutcome { push, resync: None });
    }
    let report = catalog.sync_down(db)?;
    apply_report(session, &report);
    session.cancel_edit();
    Ok(InventoryOutcome {
        push,
        resync: Some(report),
    })
}

/// Delete a product by local id: push the delete, then re-pull.
pub fn delete_product(
    db: &DbState,
    catalog: &dyn CatalogSync,
    session: &mut Session,
    product_id: i64,
) -> PosResult<InventoryOutcome> {
    session.require_screen(Screen::Inventory)?;
    let product = get_product(db, product_id)?
        .ok_or_else(|| PosError::NotFound(format!("product {product_id}")))?;

    let push = catalog.push_delete(&product.barcode);
    let report = catalog.sync_down(db)?;
    apply_report(session, &report);
    Ok(InventoryOutcome {
        push,
        resync: Some(report),
    })
}
