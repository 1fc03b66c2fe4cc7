//! Sales dashboard figures and the spreadsheet export.
//!
//! Money columns are TEXT, so totals are summed here as `Decimal` rather
//! than in SQL.

use chrono::{NaiveDateTime, Timelike};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::models::{Sale, Screen};
use crate::session::Session;

pub const TOP_PRODUCTS_LIMIT: usize = 5;
const EXPORT_FILE_NAME: &str = "reporte.xlsx";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SalesSummary {
    pub revenue: Decimal,
    pub tickets: i64,
    pub average_ticket: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductSales {
    pub name: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HourlyRevenue {
    pub hour: u32,
    pub revenue: Decimal,
}

pub fn list_sales(db: &DbState, session: &Session) -> PosResult<Vec<Sale>> {
    session.require_screen(Screen::Reports)?;
    load_sales(db)
}

fn load_sales(db: &DbState) -> PosResult<Vec<Sale>> {
    let conn = db.lock()?;
    let mut stmt = conn.prepare("SELECT id, timestamp, total, cashier FROM sales ORDER BY id")?;
    let rows = stmt.query_map([], Sale::from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Revenue, ticket count and average ticket. `None` when nothing has been
/// sold yet.
pub fn sales_summary(db: &DbState, session: &Session) -> PosResult<Option<SalesSummary>> {
    session.require_screen(Screen::Reports)?;
    let sales = load_sales(db)?;
    if sales.is_empty() {
        return Ok(None);
    }
    let revenue: Decimal = sales.iter().map(|s| s.total).sum();
    let tickets = sales.len() as i64;
    Ok(Some(SalesSummary {
        revenue,
        tickets,
        average_ticket: (revenue / Decimal::from(tickets)).round_dp(2),
    }))
}

/// Best sellers by units, ties broken by name.
pub fn top_products(db: &DbState, session: &Session, limit: usize) -> PosResult<Vec<ProductSales>> {
    session.require_screen(Screen::Reports)?;
    let conn = db.lock()?;
    let mut stmt = conn.prepare(
        "SELECT product_name, SUM(quantity) AS sold
         FROM sale_lines
         GROUP BY product_name
         ORDER BY sold DESC, product_name ASC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        Ok(ProductSales {
            name: row.get(0)?,
            quantity: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Revenue grouped by hour of day (store-local), only hours with sales.
pub fn revenue_by_hour(db: &DbState, session: &Session) -> PosResult<Vec<HourlyRevenue>> {
    session.require_screen(Screen::Reports)?;
    let mut buckets = [Decimal::ZERO; 24];
    let mut seen = [false; 24];

    for sale in load_sales(db)? {
        let at = NaiveDateTime::parse_from_str(&sale.timestamp, TIMESTAMP_FORMAT).map_err(|e| {
            PosError::InvalidInput(format!("sale {} has bad timestamp: {e}", sale.id))
        })?;
        let hour = at.hour() as usize;
        buckets[hour] += sale.total;
        seen[hour] = true;
    }

    Ok((0..24)
        .filter(|h| seen[*h])
        .map(|h| HourlyRevenue {
            hour: h as u32,
            revenue: buckets[h],
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Spreadsheet export
// ---------------------------------------------------------------------------

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Sheet1" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

const EXPORT_HEADERS: [&str; 4] = ["id", "timestamp", "total", "cashier"];

enum Cell<'a> {
    Text(&'a str),
    Number(String),
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn cell_xml(reference: &str, cell: &Cell<'_>) -> String {
    match cell {
        Cell::Text(s) => format!(
            r#"<c r="{reference}" t="inlineStr"><is><t>{}</t></is></c>"#,
            xml_escape(s)
        ),
        Cell::Number(n) => format!(r#"<c r="{reference}"><v>{n}</v></c>"#),
    }
}

fn worksheet_xml(sales: &[Sale]) -> String {
    let mut rows = Vec::with_capacity(sales.len() + 1);
    let header: Vec<Cell<'_>> = EXPORT_HEADERS.iter().map(|h| Cell::Text(h)).collect();
    rows.push(header);
    for sale in sales {
        rows.push(vec![
            Cell::Number(sale.id.to_string()),
            Cell::Text(&sale.timestamp),
            Cell::Number(sale.total.normalize().to_string()),
            Cell::Text(&sale.cashier),
        ]);
    }

    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, cells) in rows.iter().enumerate() {
        let row_num = r + 1;
        xml.push_str(&format!(r#"<row r="{row_num}">"#));
        for (c, cell) in cells.iter().enumerate() {
            let reference = format!("{}{row_num}", crate::mirror::column_letter(c + 1));
            xml.push_str(&cell_xml(&reference, cell));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

/// Build a one-sheet `.xlsx` workbook, one row per sale.
pub fn sales_xlsx_bytes(sales: &[Sale]) -> PosResult<Vec<u8>> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let sheet = worksheet_xml(sales);
    let parts: [(&str, &str); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML),
        ("_rels/.rels", ROOT_RELS_XML),
        ("xl/workbook.xml", WORKBOOK_XML),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML),
        ("xl/worksheets/sheet1.xml", &sheet),
    ];
    for (name, body) in parts {
        zip.start_file(name, options)
            .map_err(|e| PosError::Export(e.to_string()))?;
        zip.write_all(body.as_bytes())?;
    }

    let cursor = zip.finish().map_err(|e| PosError::Export(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Write every sale to `reporte.xlsx` under `output_dir`.
pub fn export_sales_xlsx(db: &DbState, session: &Session, output_dir: &Path) -> PosResult<PathBuf> {
    session.require_screen(Screen::Reports)?;
    let sales = load_sales(db)?;
    let bytes = sales_xlsx_bytes(&sales)?;

    fs::create_dir_all(output_dir)?;
    let path = output_dir.join(EXPORT_FILE_NAME);
    fs::write(&path, bytes)?;
    info!(path = %path.display(), sales = sales.len(), "sales exported");
    Ok(path)
}
