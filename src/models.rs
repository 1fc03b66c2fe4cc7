//! Domain records shared across the engines.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::decimal_column;

/// A sellable catalog entry. `barcode` is the identity shared with the
/// remote "Products" sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub barcode: String,
    pub name: String,
    pub price: Decimal,
    pub stock: i64,
}

impl Product {
    pub(crate) const COLUMNS: &'static str = "id, barcode, name, price, stock";

    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            barcode: row.get(1)?,
            name: row.get(2)?,
            price: decimal_column(row, 3)?,
            stock: row.get(4)?,
        })
    }
}

/// Product fields as they travel to and from the mirror (no local id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDraft {
    pub barcode: String,
    pub name: String,
    pub price: Decimal,
    pub stock: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Manager,
    Employee,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Manager => "Manager",
            Role::Employee => "Employee",
        }
    }

    /// Managers see every screen; employees only the register.
    pub fn can_access(self, screen: Screen) -> bool {
        match self {
            Role::Manager => true,
            Role::Employee => screen == Screen::PointOfSale,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Manager" | "Gerente" => Ok(Role::Manager),
            "Employee" | "Empleado" => Ok(Role::Employee),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Screen {
    PointOfSale,
    Reports,
    Inventory,
    Users,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: i64,
    pub timestamp: String,
    pub total: Decimal,
    pub cashier: String,
}

impl Sale {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            total: decimal_column(row, 2)?,
            cashier: row.get(3)?,
        })
    }
}

/// Historic line snapshot; not linked to the live product row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub id: i64,
    pub sale_id: i64,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl SaleLine {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sale_id: row.get(1)?,
            product_name: row.get(2)?,
            quantity: row.get(3)?,
            unit_price: decimal_column(row, 4)?,
            subtotal: decimal_column(row, 5)?,
        })
    }
}
