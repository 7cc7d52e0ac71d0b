use std::collections::HashMap;

use chrono::NaiveDate;
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;
use wholesale_settlement::entities::consignment_item;
use wholesale_settlement::services::{
    catalog::ProductSnapshot,
    invoicing::{evaluate_margins, MarginLine},
    pricing::{price_line, DocumentTotals},
    stock_ledger::{plan_fefo, LotSnapshot},
};

fn lot_strategy() -> impl Strategy<Value = LotSnapshot> {
    (0i32..50, prop::option::of(0i64..60)).prop_map(|(quantity, days)| LotSnapshot {
        id: Uuid::new_v4(),
        quantity,
        expiration_date: days.map(|d| {
            NaiveDate::from_ymd_opt(2030, 1, 1).unwrap() + chrono::Duration::days(d)
        }),
    })
}

fn product(tax_rate: Decimal) -> ProductSnapshot {
    ProductSnapshot {
        id: Uuid::new_v4(),
        name: "Producto".into(),
        sku: "SKU-1".into(),
        base_price: Decimal::ONE,
        cost_price: Decimal::ONE,
        tax_rate,
    }
}

proptest! {
    #[test]
    fn fefo_plan_conserves_units(
        lots in prop::collection::vec(lot_strategy(), 0..8),
        requested in 1i32..200,
    ) {
        let on_hand: i32 = lots.iter().map(|l| l.quantity).sum();
        match plan_fefo(&lots, requested) {
            None => prop_assert!(on_hand < requested),
            Some(draws) => {
                prop_assert!(on_hand >= requested);
                let drawn: i32 = draws.iter().map(|d| d.quantity).sum();
                prop_assert_eq!(drawn, requested);

                let by_id: HashMap<Uuid, &LotSnapshot> = lots.iter().map(|l| (l.id, l)).collect();
                for draw in &draws {
                    let lot = by_id[&draw.lot_id];
                    prop_assert!(draw.quantity > 0);
                    prop_assert!(draw.quantity <= lot.quantity);
                }
            }
        }
    }

    #[test]
    fn fefo_plan_never_skips_an_earlier_lot(
        lots in prop::collection::vec(lot_strategy(), 1..8),
        requested in 1i32..200,
    ) {
        if let Some(draws) = plan_fefo(&lots, requested) {
            let by_id: HashMap<Uuid, &LotSnapshot> = lots.iter().map(|l| (l.id, l)).collect();
            // Every lot drawn before the last one must have been emptied.
            for draw in draws.iter().take(draws.len().saturating_sub(1)) {
                prop_assert_eq!(draw.quantity, by_id[&draw.lot_id].quantity);
            }
            let expirations: Vec<_> = draws.iter().map(|d| by_id[&d.lot_id].expiration_date).collect();
            for pair in expirations.windows(2) {
                match (pair[0], pair[1]) {
                    (Some(a), Some(b)) => prop_assert!(a <= b),
                    (None, Some(_)) => prop_assert!(false, "undated lot drawn before a dated one"),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn document_total_is_subtotal_plus_tax(
        lines in prop::collection::vec((1i32..100, 0i64..100_000, 0i64..=100, 0i64..=27), 1..6),
    ) {
        let priced: Vec<_> = lines
            .iter()
            .map(|&(quantity, cents, discount, tax)| {
                let unit_price = Decimal::new(cents, 2);
                let discount = Decimal::from(discount);
                let line = price_line(product(Decimal::from(tax)), quantity, unit_price, discount).unwrap();
                let expected = Decimal::from(quantity) * unit_price * (Decimal::ONE_HUNDRED - discount)
                    / Decimal::ONE_HUNDRED;
                assert_eq!(line.line_total, expected);
                assert_eq!(line.tax_amount, line.line_total * Decimal::from(tax) / Decimal::ONE_HUNDRED);
                line
            })
            .collect();

        let totals = DocumentTotals::from_lines(&priced);
        let subtotal: Decimal = priced.iter().map(|l| l.line_total).sum();
        let tax: Decimal = priced.iter().map(|l| l.tax_amount).sum();
        prop_assert_eq!(totals.subtotal, subtotal);
        prop_assert_eq!(totals.tax_amount, tax);
        prop_assert_eq!(totals.total, totals.subtotal + totals.tax_amount);
    }

    #[test]
    fn margin_gate_follows_aggregate_revenue_and_cost(
        lines in prop::collection::vec((1i64..100_000, 0i64..100_000), 1..6),
    ) {
        let margin_lines: Vec<_> = lines
            .iter()
            .map(|&(revenue, cost)| MarginLine {
                product_id: Uuid::new_v4(),
                revenue: Decimal::new(revenue, 2),
                cost: Decimal::new(cost, 2),
            })
            .collect();
        let revenue: i64 = lines.iter().map(|l| l.0).sum();
        let cost: i64 = lines.iter().map(|l| l.1).sum();

        let report = evaluate_margins(&margin_lines, Decimal::TEN);
        prop_assert_eq!(report.valid, revenue >= cost);
        let losing_lines = lines.iter().filter(|l| l.1 > l.0).count();
        prop_assert!(report.warnings.len() >= losing_lines);
    }

    #[test]
    fn accepted_claims_never_overdraw_an_item(
        delivered in 1i32..50,
        claims in prop::collection::vec((any::<bool>(), 1i32..20), 0..20),
    ) {
        let mut item = consignment_item::Model {
            id: Uuid::new_v4(),
            consignment_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            product_name: "Producto".into(),
            product_sku: "SKU-1".into(),
            unit_price: Decimal::TEN,
            quantity_delivered: delivered,
            quantity_returned: 0,
            quantity_invoiced: 0,
        };

        for (is_return, quantity) in claims {
            if quantity > item.available() {
                continue;
            }
            if is_return {
                item.quantity_returned += quantity;
            } else {
                item.quantity_invoiced += quantity;
            }
            prop_assert!(item.available() >= 0);
            prop_assert!(item.quantity_returned + item.quantity_invoiced <= item.quantity_delivered);
        }
        prop_assert_eq!(item.is_settled(), item.available() == 0);
    }
}
