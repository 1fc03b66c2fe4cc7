//! Checkout: turn the session's cart into a persisted sale.
//!
//! The local write (header, line snapshots, stock decrements) is one SQLite
//! transaction. The mirror relay runs after commit and can only report
//! failure; it never undoes the sale.

use chrono::Utc;
use rusqlite::params;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{CatalogSync, SaleHistoryEntry, StockChange};
use crate::config::StoreConfig;
use crate::db::DbState;
use crate::error::PosResult;
use crate::models::Screen;
use crate::receipt::{self, ReceiptDoc, ReceiptItem};
use crate::session::Session;

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReceipt {
    pub sale_id: i64,
    pub receipt_text: String,
    pub total: Decimal,
    pub tendered: Decimal,
    pub change: Decimal,
    /// Sale row reached the "Sales" sheet.
    pub history_recorded: bool,
    /// Stock decrements reached the "Products" sheet.
    pub stock_pushed: bool,
}

/// "(3)Pen, (1)Notebook"
fn sale_summary(items: &[ReceiptItem]) -> String {
    items
        .iter()
        .map(|i| format!("({}){}", i.quantity, i.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Persist the cart as a sale, print the receipt, relay to the mirror and
/// clear the cart.
///
/// `tendered >= total` is the caller's responsibility (see
/// [`crate::cart::check_tender`]). An empty cart records a zero-total sale.
/// Stock is decremented unconditionally and may go negative.
pub fn checkout(
    db: &DbState,
    catalog: &dyn CatalogSync,
    config: &StoreConfig,
    session: &mut Session,
    tendered: Decimal,
) -> PosResult<CheckoutReceipt> {
    let cashier = session.require_screen(Screen::PointOfSale)?.name.clone();
    session.touch(Utc::now());

    let lines = session.cart.lines().to_vec();
    let total = session.cart.total();
    let timestamp = config.now_local();

    let sale_id = {
        let mut conn = db.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO sales (timestamp, total, cashier) VALUES (?1, ?2, ?3)",
            params![timestamp, total.to_string(), cashier],
        )?;
        let sale_id = tx.last_insert_rowid();
        {
            let mut insert_line = tx.prepare(
                "INSERT INTO sale_lines (sale_id, product_name, quantity, unit_price, subtotal)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut decrement =
                tx.prepare("UPDATE products SET stock = stock - ?1 WHERE barcode = ?2")?;
            for line in &lines {
                insert_line.execute(params![
                    sale_id,
                    line.name,
                    line.quantity,
                    line.unit_price.to_string(),
                    line.subtotal.to_string()
                ])?;
                decrement.execute(params![line.quantity, line.barcode])?;
            }
        }
        tx.commit()?;
        sale_id
    };
    info!(sale_id, %total, lines = lines.len(), cashier = %cashier, "sale committed");

    let items: Vec<ReceiptItem> = lines
        .iter()
        .map(|l| ReceiptItem {
            name: l.name.clone(),
            quantity: l.quantity,
            subtotal: l.subtotal,
        })
        .collect();
    let doc = ReceiptDoc {
        sale_id,
        timestamp: timestamp.clone(),
        cashier: cashier.clone(),
        items,
        total,
        tendered,
    };
    let receipt_text = receipt::render_text(&doc, config);

    let history = catalog.record_sale(&SaleHistoryEntry {
        timestamp,
        sale_id,
        cashier,
        total,
        summary: sale_summary(&doc.items),
    });
    if let Err(e) = &history {
        warn!(sale_id, error = %e, "sale not relayed to mirror history");
    }

    let changes: Vec<StockChange> = lines
        .iter()
        .map(|l| StockChange {
            barcode: l.barcode.clone(),
            quantity: l.quantity,
        })
        .collect();
    let stock_pushed = if changes.is_empty() {
        false
    } else {
        match catalog.push_stock_batch(&changes) {
            Ok(()) => {
                session.record_sync(&config.now_local());
                true
            }
            Err(e) => {
                warn!(sale_id, error = %e, "stock decrements not relayed to mirror");
                false
            }
        }
    };

    session.cart.clear();

    Ok(CheckoutReceipt {
        sale_id,
        receipt_text,
        total,
        tendered,
        change: doc.change(),
        history_recorded: history.is_ok(),
        stock_pushed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::{check_tender, resolve_scan};
    use crate::catalog::{self, SheetCatalog};
    use crate::db::open_in_memory_for_test;
    use crate::mirror::testing::MemorySheets;
    use crate::mirror::{PRODUCTS_SHEET, SALES_SHEET};
    use crate::models::{Role, Sale, SaleLine};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        db: DbState,
        sheets: Arc<MemorySheets>,
        catalog: SheetCatalog,
        config: StoreConfig,
        session: Session,
    }

    fn fixture() -> Fixture {
        let db = open_in_memory_for_test();
        let sheets = Arc::new(MemorySheets::with_standard_sheets());
        sheets.push_product(json!("7501"), "Pen", json!(5), json!(10));
        sheets.push_product(json!("7502"), "Notebook", json!(20), json!(4));
        let config = StoreConfig::default();
        let catalog = SheetCatalog::new(sheets.clone(), config.clone());
        assert!(catalog.sync_down(&db).unwrap().success);

        let mut session = Session::new(3600);
        session.establish("Cajero1", Role::Employee, Utc::now());
        Fixture {
            db,
            sheets,
            catalog,
            config,
            session,
        }
    }

    fn scan(f: &mut Fixture, code: &str, qty: i64) {
        f.session.scan_input = code.to_string();
        f.session.scan_quantity = qty;
        resolve_scan(&f.db, &mut f.session, 5).unwrap();
    }

    fn stock_of(db: &DbState, barcode: &str) -> i64 {
        let conn = db.lock().unwrap();
        catalog::find_by_barcode(&conn, barcode)
            .unwrap()
            .map(|p| p.stock)
            .unwrap()
    }

    #[test]
    fn pen_and_notebook_sale() {
        let mut f = fixture();
        scan(&mut f, "7501", 3);
        scan(&mut f, "7502", 1);
        assert_eq!(check_tender(f.session.cart.total(), dec!(40.00)).unwrap(), dec!(5.00));

        let receipt = checkout(&f.db, &f.catalog, &f.config, &mut f.session, dec!(40.00)).unwrap();

        assert_eq!(receipt.total, dec!(35.00));
        assert_eq!(receipt.change, dec!(5.00));
        assert!(receipt.receipt_text.contains("3 x Pen             $ 15.00"));
        assert!(receipt.receipt_text.contains("1 x Notebook        $ 20.00"));
        assert!(receipt
            .receipt_text
            .contains("TOTAL : $35.00\nPAGO : $40.00\nCAMBIO : $5.00"));
        assert!(receipt.history_recorded);
        assert!(receipt.stock_pushed);
        assert!(f.session.cart.is_empty());
        assert_ne!(f.session.last_sync_label(), "Pending");

        assert_eq!(stock_of(&f.db, "7501"), 7);
        assert_eq!(stock_of(&f.db, "7502"), 3);

        let conn = f.db.lock().unwrap();
        let sale = conn
            .query_row(
                "SELECT id, timestamp, total, cashier FROM sales WHERE id = ?1",
                [receipt.sale_id],
                Sale::from_row,
            )
            .unwrap();
        assert_eq!(sale.total, dec!(35.00));
        assert_eq!(sale.cashier, "Cajero1");

        let mut stmt = conn
            .prepare(
                "SELECT id, sale_id, product_name, quantity, unit_price, subtotal
                 FROM sale_lines WHERE sale_id = ?1 ORDER BY id",
            )
            .unwrap();
        let lines: Vec<SaleLine> = stmt
            .query_map([receipt.sale_id], SaleLine::from_row)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines.len(), 2);
        let line_sum: Decimal = lines.iter().map(|l| l.subtotal).sum();
        assert_eq!(line_sum, sale.total);
        assert_eq!(lines[0].product_name, "Pen");
        assert_eq!(lines[0].quantity, 3);
    }

    #[test]
    fn mirror_receives_history_row_and_stock() {
        let mut f = fixture();
        scan(&mut f, "7501", 3);
        scan(&mut f, "7502", 1);
        let receipt = checkout(&f.db, &f.catalog, &f.config, &mut f.session, dec!(40)).unwrap();

        let sales = f.sheets.grid(SALES_SHEET);
        assert_eq!(sales.len(), 2);
        assert_eq!(sales[1][1], json!(receipt.sale_id));
        assert_eq!(sales[1][2], json!("Cajero1"));
        assert_eq!(sales[1][3], json!(35.0));
        assert_eq!(sales[1][4], json!("(3)Pen, (1)Notebook"));

        let products = f.sheets.grid(PRODUCTS_SHEET);
        assert_eq!(products[1][3], json!(7));
        assert_eq!(products[2][3], json!(3));
    }

    #[test]
    fn offline_mirror_still_persists_sale() {
        let mut f = fixture();
        scan(&mut f, "7501", 2);
        f.sheets.set_offline(true);

        let receipt = checkout(&f.db, &f.catalog, &f.config, &mut f.session, dec!(10)).unwrap();

        assert!(!receipt.history_recorded);
        assert!(!receipt.stock_pushed);
        assert!(receipt.receipt_text.contains("TICKET #"));
        // The fixture pulled through the catalog directly, so only a
        // successful stock push could have advanced the label.
        assert_eq!(f.session.last_sync_label(), "Pending");
        assert_eq!(stock_of(&f.db, "7501"), 8);
        assert!(f.session.cart.is_empty());
        let count: i64 = f
            .db
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM sales", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn stock_decrement_is_unconditional() {
        let mut f = fixture();
        scan(&mut f, "7502", 4);
        {
            let conn = f.db.lock().unwrap();
            conn.execute("UPDATE products SET stock = 1 WHERE barcode = '7502'", [])
                .unwrap();
        }
        checkout(&f.db, &f.catalog, &f.config, &mut f.session, dec!(80)).unwrap();
        assert_eq!(stock_of(&f.db, "7502"), -3);
    }

    #[test]
    fn empty_cart_records_zero_sale() {
        let mut f = fixture();
        let receipt = checkout(&f.db, &f.catalog, &f.config, &mut f.session, Decimal::ZERO).unwrap();
        assert_eq!(receipt.total, Decimal::ZERO);
        assert!(!receipt.stock_pushed);
        assert!(receipt.receipt_text.contains("TOTAL : $0.00"));
    }
}
