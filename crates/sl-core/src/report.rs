//! Aggregate figures and chart series derived from the product collection.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::{derive_alert_status, AlertStatus, Product};

/// One bar per product: what is on hand and what has gone out.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartBar {
    pub label: String,
    pub stock: u64,
    pub units_out: u64,
}

/// Summary of the whole inventory.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StockReport {
    pub product_count: usize,
    pub units_on_hand: u64,
    pub units_out: u64,
    pub ok_count: usize,
    pub low_count: usize,
    pub critical_count: usize,
    /// Sum of stock times purchase price.
    pub value_at_cost: Decimal,
    /// Sum of stock times selling price.
    pub value_at_retail: Decimal,
    /// Bars in collection order.
    pub bars: Vec<ChartBar>,
}

impl StockReport {
    /// Compute the report for a product collection.
    pub fn from_products(products: &[Product]) -> Self {
        let mut report = Self {
            product_count: products.len(),
            ..Self::default()
        };
        for product in products {
            report.units_on_hand = report.units_on_hand.saturating_add(product.stock);
            report.units_out = report.units_out.saturating_add(product.units_out);
            match derive_alert_status(product) {
                AlertStatus::Ok => report.ok_count += 1,
                AlertStatus::Low => report.low_count += 1,
                AlertStatus::Critical => report.critical_count += 1,
            }
            let units = Decimal::from(product.stock);
            report.value_at_cost = accumulate(report.value_at_cost, units, product.buy_price);
            report.value_at_retail = accumulate(report.value_at_retail, units, product.sell_price);
            report.bars.push(ChartBar {
                label: product.name.clone(),
                stock: product.stock,
                units_out: product.units_out,
            });
        }
        report
    }
}

fn accumulate(total: Decimal, units: Decimal, price: Decimal) -> Decimal {
    units
        .checked_mul(price)
        .and_then(|value| total.checked_add(value))
        .unwrap_or(Decimal::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::ProductInput;

    fn product(name: &str, stock: i64, min_stock: i64, buy: Decimal, sell: Decimal) -> Product {
        Product::new(
            Uuid::new_v4(),
            ProductInput {
                name: name.into(),
                stock,
                min_stock,
                buy_price: buy,
                sell_price: sell,
                ..ProductInput::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn report_totals_and_bars() {
        let mut nail = product("Nail", 100, 5, Decimal::new(5, 2), Decimal::new(10, 2));
        nail.units_out = 40;
        let products = vec![
            product("Hammer", 0, 5, Decimal::new(800, 2), Decimal::new(1200, 2)),
            nail,
            product("Saw", 3, 5, Decimal::new(15, 0), Decimal::new(25, 0)),
        ];

        let report = StockReport::from_products(&products);

        assert_eq!(report.product_count, 3);
        assert_eq!(report.units_on_hand, 103);
        assert_eq!(report.units_out, 40);
        assert_eq!(
            (report.ok_count, report.low_count, report.critical_count),
            (1, 1, 1)
        );
        assert_eq!(report.value_at_cost, Decimal::new(50, 0));
        assert_eq!(report.value_at_retail, Decimal::new(85, 0));
        let labels: Vec<_> = report.bars.iter().map(|bar| bar.label.as_str()).collect();
        assert_eq!(labels, ["Hammer", "Nail", "Saw"]);
        assert_eq!(report.bars[1].units_out, 40);
    }

    #[test]
    fn empty_report_is_zeroed() {
        assert_eq!(StockReport::from_products(&[]), StockReport::default());
    }
}
