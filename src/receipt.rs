//! Plain-text sale receipt, fixed 30-column layout.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::StoreConfig;

const RULE_WIDTH: usize = 30;
const ITEM_NAME_WIDTH: usize = 15;
const FOOTER_TEXT: &str = "¡Gracias por su compra!";

#[derive(Debug, Clone)]
pub struct ReceiptItem {
    pub name: String,
    pub quantity: i64,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone)]
pub struct ReceiptDoc {
    pub sale_id: i64,
    pub timestamp: String,
    pub cashier: String,
    pub items: Vec<ReceiptItem>,
    pub total: Decimal,
    pub tendered: Decimal,
}

impl ReceiptDoc {
    pub fn change(&self) -> Decimal {
        self.tendered - self.total
    }
}

/// Two decimal places, half away from zero.
pub fn money(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.2}")
}

fn truncate_pad(text: &str, width: usize) -> String {
    let cut: String = text.chars().take(width).collect();
    format!("{cut:<width$}")
}

fn rule() -> String {
    "-".repeat(RULE_WIDTH)
}

pub fn render_text(doc: &ReceiptDoc, cfg: &StoreConfig) -> String {
    let currency = &cfg.currency;
    let mut out = String::new();

    out.push_str(&format!("{}\n{}\n\n", cfg.store_name, cfg.location));
    out.push_str(&format!("TICKET #{}\n", doc.sale_id));
    out.push_str(&format!("FECHA: {}\n", doc.timestamp));
    out.push_str(&format!("ATENDIÓ: {}\n", doc.cashier));
    out.push_str(&rule());
    out.push('\n');

    for item in &doc.items {
        out.push_str(&format!(
            "{} x {} {currency}{:>6}\n",
            item.quantity,
            truncate_pad(&item.name, ITEM_NAME_WIDTH),
            money(item.subtotal)
        ));
    }

    out.push_str(&rule());
    out.push('\n');
    out.push_str(&format!("TOTAL : {currency}{}\n", money(doc.total)));
    out.push_str(&format!("PAGO : {currency}{}\n", money(doc.tendered)));
    out.push_str(&format!("CAMBIO : {currency}{}\n", money(doc.change())));
    out.push_str(&rule());
    out.push('\n');
    out.push_str(FOOTER_TEXT);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> ReceiptDoc {
        ReceiptDoc {
            sale_id: 12,
            timestamp: "2024-05-01 10:15:00".to_string(),
            cashier: "Cajero1".to_string(),
            items: vec![
                ReceiptItem {
                    name: "Pen".to_string(),
                    quantity: 3,
                    subtotal: dec!(15),
                },
                ReceiptItem {
                    name: "Notebook".to_string(),
                    quantity: 1,
                    subtotal: dec!(20.00),
                },
            ],
            total: dec!(35.00),
            tendered: dec!(40),
        }
    }

    #[test]
    fn money_rounds_to_cents() {
        assert_eq!(money(dec!(5)), "5.00");
        assert_eq!(money(dec!(2.005)), "2.01");
        assert_eq!(money(dec!(-0.5)), "-0.50");
        assert_eq!(money(dec!(1234.5)), "1234.50");
    }

    #[test]
    fn renders_header_lines_and_footer() {
        let text = render_text(&sample(), &StoreConfig::default());
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Papelería La Esperanza");
        assert_eq!(lines[1], "Guadalajara, Jal.");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "TICKET #12");
        assert_eq!(lines[4], "FECHA: 2024-05-01 10:15:00");
        assert_eq!(lines[5], "ATENDIÓ: Cajero1");
        assert_eq!(lines[6], "-".repeat(30));
        assert_eq!(lines[7], "3 x Pen             $ 15.00");
        assert_eq!(lines[8], "1 x Notebook        $ 20.00");
        assert!(text.contains("TOTAL : $35.00\nPAGO : $40.00\nCAMBIO : $5.00\n"));
        assert_eq!(*lines.last().unwrap(), "¡Gracias por su compra!");
    }

    #[test]
    fn long_names_are_cut_to_column() {
        let mut doc = sample();
        doc.items = vec![ReceiptItem {
            name: "Cuaderno profesional cuadro chico".to_string(),
            quantity: 2,
            subtotal: dec!(118),
        }];
        let text = render_text(&doc, &StoreConfig::default());
        assert!(text.contains("2 x Cuaderno profes $118.00\n"));
    }
}
