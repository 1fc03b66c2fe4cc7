//! Cart building: scan resolution, line merging, totals.
//!
//! Nothing here touches stock. The stock check happens once, at scan time,
//! against the local catalog; checkout decrements without re-checking.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog;
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{Product, Screen};
use crate::session::Session;

/// One product in the cart. Name and price are snapshots taken at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub product_id: i64,
    pub barcode: String,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i64,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Cart {
    lines: Vec<CartLine>,
}

/// What a scan did, for the shell to surface as a notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nothing was typed.
    Empty,
    Added {
        name: String,
        quantity: i64,
        /// Stock left after the cart's projected use, when under the
        /// low-stock threshold.
        low_stock: Option<i64>,
    },
    NotFound,
    InsufficientStock { available: i64 },
}

impl Cart {
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn total(&self) -> Decimal {
        self.lines.iter().map(|l| l.subtotal).sum()
    }

    /// Quantity of `product_id` already in the cart.
    pub fn quantity_of(&self, product_id: i64) -> i64 {
        self.lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map_or(0, |l| l.quantity)
    }

    /// Add `quantity` units of `product`, merging with an existing line.
    /// Only the requested quantity is checked against stock.
    pub fn add(&mut self, product: &Product, quantity: i64) -> ScanOutcome {
        if quantity > product.stock {
            return ScanOutcome::InsufficientStock {
                available: product.stock,
            };
        }

        match self.lines.iter_mut().find(|l| l.product_id == product.id) {
            Some(line) => {
                line.quantity += quantity;
                line.subtotal = line.unit_price * Decimal::from(line.quantity);
            }
            None => self.lines.push(CartLine {
                product_id: product.id,
                barcode: product.barcode.clone(),
                name: product.name.clone(),
                unit_price: product.price,
                quantity,
                subtotal: product.price * Decimal::from(quantity),
            }),
        }

        ScanOutcome::Added {
            name: product.name.clone(),
            quantity,
            low_stock: None,
        }
    }

    /// Drop the line at `index`. Out-of-range indexes are ignored.
    pub fn remove_line(&mut self, index: usize) -> Option<CartLine> {
        (index < self.lines.len()).then(|| self.lines.remove(index))
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Tendered amount must cover the total. The shell calls this before
/// `checkout`; checkout itself does not re-check.
pub fn check_tender(total: Decimal, tendered: Decimal) -> PosResult<Decimal> {
    if tendered < total {
        return Err(PosError::InvalidInput(format!(
            "Amount tendered {tendered} is less than total {total}"
        )));
    }
    Ok(tendered - total)
}

/// Resolve the session's scan field into a product and add it to the cart.
///
/// Lookup is exact barcode first, then the first product whose name contains
/// the input (case-sensitive). The scan field is cleared whatever happens.
pub fn resolve_scan(
    db: &DbState,
    session: &mut Session,
    low_stock_threshold: i64,
) -> PosResult<ScanOutcome> {
    session.require_screen(Screen::PointOfSale)?;
    session.touch(Utc::now());

    let input = std::mem::take(&mut session.scan_input);
    let input = input.trim();
    if input.is_empty() {
        return Ok(ScanOutcome::Empty);
    }
    let quantity = session.scan_quantity;
    if quantity < 1 {
        return Err(PosError::InvalidInput(
            "Quantity must be at least 1".to_string(),
        ));
    }

    let product = {
        let conn = db.lock()?;
        match catalog::find_by_barcode(&conn, input)? {
            Some(p) => Some(p),
            None => catalog::find_by_name_fragment(&conn, input)?,
        }
    };
    let Some(product) = product else {
        debug!(input, "scan matched no product");
        return Ok(ScanOutcome::NotFound);
    };

    let (name, quantity) = match session.cart.add(&product, quantity) {
        ScanOutcome::Added { name, quantity, .. } => (name, quantity),
        refused => {
            debug!(barcode = %product.barcode, quantity, stock = product.stock, "scan refused, insufficient stock");
            return Ok(refused);
        }
    };

    let projected = product.stock - session.cart.quantity_of(product.id);
    let low_stock = (projected < low_stock_threshold).then_some(projected);
    if let Some(left) = low_stock {
        warn!(barcode = %product.barcode, left, "low stock after scan");
    }
    Ok(ScanOutcome::Added {
        name,
        quantity,
        low_stock,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_for_test;
    use crate::models::Role;
    use rust_decimal_macros::dec;

    fn product(id: i64, barcode: &str, name: &str, price: Decimal, stock: i64) -> Product {
        Product {
            id,
            barcode: barcode.to_string(),
            name: name.to_string(),
            price,
            stock,
        }
    }

    fn seeded_db() -> DbState {
        let db = open_in_memory_for_test();
        {
            let conn = db.lock().unwrap();
            conn.execute_batch(
                "INSERT INTO products (barcode, name, price, stock) VALUES
                    ('7501', 'Pen', '5.00', 10),
                    ('7502', 'Notebook', '20.00', 3),
                    ('7503', 'Pencil case', '35.50', 7);",
            )
            .unwrap();
        }
        db
    }

    fn cashier_session() -> Session {
        let mut session = Session::new(3600);
        session.establish("Cajero1", Role::Employee, Utc::now());
        session
    }

    #[test]
    fn repeated_scans_merge_into_one_line() {
        let pen = product(1, "7501", "Pen", dec!(5.00), 10);
        let mut cart = Cart::default();
        for qty in [1, 2, 4] {
            assert!(matches!(cart.add(&pen, qty), ScanOutcome::Added { .. }));
        }
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 7);
        assert_eq!(cart.lines()[0].subtotal, dec!(35.00));
        assert_eq!(cart.total(), dec!(35.00));
    }

    #[test]
    fn oversized_scan_leaves_cart_unchanged() {
        let notebook = product(2, "7502", "Notebook", dec!(20), 3);
        let mut cart = Cart::default();
        cart.add(&notebook, 1);
        let before = cart.clone();

        assert_eq!(
            cart.add(&notebook, 4),
            ScanOutcome::InsufficientStock { available: 3 }
        );
        assert_eq!(cart, before);
    }

    #[test]
    fn remove_and_clear() {
        let pen = product(1, "7501", "Pen", dec!(5), 10);
        let notebook = product(2, "7502", "Notebook", dec!(20), 3);
        let mut cart = Cart::default();
        cart.add(&pen, 1);
        cart.add(&notebook, 1);

        assert!(cart.remove_line(5).is_none());
        assert_eq!(cart.remove_line(0).map(|l| l.name), Some("Pen".to_string()));
        assert_eq!(cart.total(), dec!(20));
        cart.clear();
        assert!(cart.is_empty());
        assert_eq!(cart.total(), Decimal::ZERO);
    }

    #[test]
    fn tender_must_cover_total() {
        assert_eq!(check_tender(dec!(35.00), dec!(40)).unwrap(), dec!(5.00));
        assert_eq!(check_tender(dec!(35.00), dec!(35)).unwrap(), Decimal::ZERO);
        assert!(matches!(
            check_tender(dec!(35.00), dec!(34.99)),
            Err(PosError::InvalidInput(_))
        ));
    }

    #[test]
    fn scan_by_barcode_then_name_fragment() {
        let db = seeded_db();
        let mut session = cashier_session();

        session.scan_input = "7501".into();
        session.scan_quantity = 3;
        let outcome = resolve_scan(&db, &mut session, 5).unwrap();
        assert!(matches!(outcome, ScanOutcome::Added { ref name, quantity: 3, .. } if name == "Pen"));
        assert!(session.scan_input.is_empty());

        session.scan_input = "Pencil".into();
        session.scan_quantity = 1;
        let outcome = resolve_scan(&db, &mut session, 5).unwrap();
        assert!(matches!(outcome, ScanOutcome::Added { ref name, .. } if name == "Pencil case"));
        assert_eq!(session.cart.lines().len(), 2);
    }

    #[test]
    fn name_fragment_is_case_sensitive() {
        let db = seeded_db();
        let mut session = cashier_session();
        session.scan_input = "notebook".into();
        assert_eq!(
            resolve_scan(&db, &mut session, 5).unwrap(),
            ScanOutcome::NotFound
        );
        assert!(session.cart.is_empty());
        assert!(session.scan_input.is_empty());
    }

    #[test]
    fn low_stock_warning_counts_cart_quantity() {
        let db = seeded_db();
        let mut session = cashier_session();

        session.scan_input = "7501".into();
        session.scan_quantity = 4;
        let outcome = resolve_scan(&db, &mut session, 5).unwrap();
        assert!(matches!(outcome, ScanOutcome::Added { low_stock: None, .. }));

        session.scan_input = "7501".into();
        session.scan_quantity = 2;
        let outcome = resolve_scan(&db, &mut session, 5).unwrap();
        assert!(matches!(outcome, ScanOutcome::Added { low_stock: Some(4), .. }));
    }

    #[test]
    fn scan_checks_only_requested_quantity() {
        let db = seeded_db();
        let mut session = cashier_session();
        for _ in 0..2 {
            session.scan_input = "7502".into();
            session.scan_quantity = 2;
            resolve_scan(&db, &mut session, 5).unwrap();
        }
        assert_eq!(session.cart.quantity_of(2), 4);

        session.scan_input = "7502".into();
        session.scan_quantity = 4;
        assert_eq!(
            resolve_scan(&db, &mut session, 5).unwrap(),
            ScanOutcome::InsufficientStock { available: 3 }
        );
        assert_eq!(session.cart.quantity_of(2), 4);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let db = seeded_db();
        let mut session = cashier_session();
        session.scan_input = "7501".into();
        session.scan_quantity = 0;
        assert!(matches!(
            resolve_scan(&db, &mut session, 5),
            Err(PosError::InvalidInput(_))
        ));
        assert!(session.cart.is_empty());
    }

    #[test]
    fn scanning_requires_login() {
        let db = seeded_db();
        let mut session = Session::new(3600);
        session.scan_input = "7501".into();
        assert!(matches!(
            resolve_scan(&db, &mut session, 5),
            Err(PosError::NotLoggedIn)
        ));
    }
}
