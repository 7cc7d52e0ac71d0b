mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use chrono::NaiveDate;
use common::{body_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;
use wholesale_settlement::{
    entities::consignment_return_item::ReturnCondition,
    errors::ServiceError,
    services::{
        consignments::{
            ConsignmentLineInput, CreateConsignmentInput, ProcessReturnInput, SettlementLineInput,
        },
        invoicing::InvoiceConsignmentInput,
        quotations::{CreateQuotationInput, QuotationLineInput},
    },
};

fn deliver(customer_id: Uuid, lines: &[(Uuid, i32)]) -> CreateConsignmentInput {
    CreateConsignmentInput {
        customer_id,
        items: lines
            .iter()
            .map(|&(product_id, quantity)| ConsignmentLineInput {
                product_id,
                quantity,
                unit_price: None,
            })
            .collect(),
        notes: None,
    }
}

fn give_back(lines: &[(Uuid, i32)], condition: ReturnCondition) -> ProcessReturnInput {
    ProcessReturnInput {
        items: settle(lines),
        condition,
        reason: Some("no rotó".into()),
        received_by: Some("depósito".into()),
    }
}

fn settle(lines: &[(Uuid, i32)]) -> Vec<SettlementLineInput> {
    lines
        .iter()
        .map(|&(product_id, quantity)| SettlementLineInput {
            product_id,
            quantity,
        })
        .collect()
}

fn bill(lines: &[(Uuid, i32)]) -> InvoiceConsignmentInput {
    InvoiceConsignmentInput {
        items: settle(lines),
        point_of_sale: None,
        payment_method: None,
        payment_reference: None,
    }
}

#[tokio::test]
async fn delivering_all_stock_blocks_the_next_consignment() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(6)).await;
    app.seed_lot(product.id, 10, None).await;

    let detail = app
        .consignments()
        .create(deliver(customer, &[(product.id, 10)]))
        .await
        .expect("first consignment");
    assert_eq!(detail.consignment.status, "ACTIVE");
    assert!(detail.consignment.code.starts_with("CONS-"));
    assert_eq!(detail.consignment.total_value, dec!(100));
    assert_eq!(detail.items[0].quantity_returned, 0);
    assert_eq!(detail.items[0].quantity_invoiced, 0);
    assert_eq!(app.stock(product.id).await, 0);

    let movements = app.movements(detail.consignment.id).await;
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].quantity, -10);
    assert_eq!(movements[0].reason, "CONSIGNMENT_DELIVERY");

    let err = app
        .consignments()
        .create(deliver(customer, &[(product.id, 1)]))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock { product_id, available: 0, requested: 1 }
            if product_id == product.id
    );
}

#[tokio::test]
async fn one_short_line_fails_the_whole_delivery() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let plenty = app.seed_product(dec!(10), dec!(6)).await;
    let scarce = app.seed_product(dec!(10), dec!(6)).await;
    app.seed_lot(plenty.id, 50, None).await;
    app.seed_lot(scarce.id, 2, None).await;

    let err = app
        .consignments()
        .create(deliver(customer, &[(plenty.id, 20), (scarce.id, 5)]))
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock { available: 2, requested: 5, .. }
    );
    assert_eq!(app.stock(plenty.id).await, 50);
    assert_eq!(app.stock(scarce.id).await, 2);
}

#[tokio::test]
async fn overflowing_lines_are_rejected_before_touching_stock() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(6)).await;
    app.seed_lot(product.id, 50, None).await;

    let err = app
        .consignments()
        .create(deliver(customer, &[(product.id, 2_000_000_000), (product.id, 2_000_000_000)]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let err = app
        .consignments()
        .create(CreateConsignmentInput {
            customer_id: customer,
            items: vec![ConsignmentLineInput {
                product_id: product.id,
                quantity: 2,
                unit_price: Some(Decimal::MAX),
            }],
            notes: None,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(app.stock(product.id).await, 50);
}

#[tokio::test]
async fn delivery_consumes_lots_first_expired_first() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(6)).await;
    let undated = app.seed_lot(product.id, 10, None).await;
    let later = app
        .seed_lot(product.id, 3, NaiveDate::from_ymd_opt(2031, 1, 1))
        .await;
    let sooner = app
        .seed_lot(product.id, 4, NaiveDate::from_ymd_opt(2030, 6, 1))
        .await;

    app.consignments()
        .create(deliver(customer, &[(product.id, 6)]))
        .await
        .unwrap();

    assert_eq!(app.lot_quantity(sooner).await, 0);
    assert_eq!(app.lot_quantity(later).await, 1);
    assert_eq!(app.lot_quantity(undated).await, 10);
}

#[tokio::test]
async fn return_then_invoice_the_rest_closes_the_consignment() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(6)).await;
    app.seed_lot(product.id, 10, None).await;
    let id = app
        .consignments()
        .create(deliver(customer, &[(product.id, 10)]))
        .await
        .unwrap()
        .consignment
        .id;

    let outcome = app
        .consignments()
        .process_return(id, give_back(&[(product.id, 4)], ReturnCondition::Good))
        .await
        .expect("return");
    assert!(!outcome.closed);
    assert_eq!(outcome.consignment.status, "PARTIALLY_RETURNED");
    assert_eq!(outcome.consignment.returned_value, dec!(40));
    assert!(outcome.receipt.header.code.starts_with("DEV-"));
    assert_eq!(outcome.receipt.items[0].quantity, 4);
    assert_eq!(app.stock(product.id).await, 4);

    let available = app.consignments().get_available_to_invoice(id).await.unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].available, 6);

    let issued = app
        .invoicing()
        .invoice_from_consignment(id, bill(&[(product.id, 6)]))
        .await
        .expect("invoice the rest");
    assert_eq!(issued.sale.subtotal, dec!(60));
    assert_eq!(issued.sale.channel, "CONSIGNMENT");
    // Stock left the warehouse on delivery; invoicing does not move it again.
    assert_eq!(app.stock(product.id).await, 4);

    let detail = app.consignments().find_one(id).await.unwrap();
    assert_eq!(detail.consignment.status, "CLOSED");
    assert!(detail.consignment.closed_at.is_some());
    assert_eq!(detail.consignment.invoiced_value, dec!(60));
    assert_eq!(detail.items[0].quantity_returned, 4);
    assert_eq!(detail.items[0].quantity_invoiced, 6);
    assert_eq!(detail.returns.len(), 1);
    assert!(app
        .consignments()
        .get_available_to_invoice(id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn over_return_is_rejected_before_any_write() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let a = app.seed_product(dec!(10), dec!(6)).await;
    let b = app.seed_product(dec!(5), dec!(2)).await;
    app.seed_lot(a.id, 10, None).await;
    app.seed_lot(b.id, 5, None).await;
    let id = app
        .consignments()
        .create(deliver(customer, &[(a.id, 5), (b.id, 5)]))
        .await
        .unwrap()
        .consignment
        .id;

    let err = app
        .consignments()
        .process_return(
            id,
            give_back(&[(a.id, 2), (b.id, 3), (b.id, 3)], ReturnCondition::Good),
        )
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InvalidQuantity { product_id, available: 5, requested: 6 }
            if product_id == b.id
    );

    let detail = app.consignments().find_one(id).await.unwrap();
    assert_eq!(detail.consignment.status, "ACTIVE");
    assert!(detail.returns.is_empty());
    assert!(detail.items.iter().all(|i| i.quantity_returned == 0));
    assert_eq!(app.stock(a.id).await, 5);

    let stranger = Uuid::new_v4();
    let err = app
        .consignments()
        .process_return(id, give_back(&[(stranger, 1)], ReturnCondition::Good))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidQuantity { available: 0, .. });
}

#[tokio::test]
async fn damaged_returns_write_off_without_restocking() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(6)).await;
    app.seed_lot(product.id, 10, None).await;
    let id = app
        .consignments()
        .create(deliver(customer, &[(product.id, 10)]))
        .await
        .unwrap()
        .consignment
        .id;

    let outcome = app
        .consignments()
        .process_return(id, give_back(&[(product.id, 3)], ReturnCondition::Damaged))
        .await
        .unwrap();

    assert_eq!(app.stock(product.id).await, 0);
    assert_eq!(outcome.receipt.header.condition, "DAMAGED");
    let movements = app.movements(outcome.receipt.header.id).await;
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].quantity, 0);
    assert_eq!(movements[0].reason, "CONSIGNMENT_RETURN_DAMAGED");
}

#[tokio::test]
async fn closing_is_idempotent_and_final() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(6)).await;
    app.seed_lot(product.id, 10, None).await;
    let service = app.consignments();
    let id = service
        .create(deliver(customer, &[(product.id, 10)]))
        .await
        .unwrap()
        .consignment
        .id;

    let open = service.check_and_close_consignment(id).await.unwrap();
    assert_eq!(open.status, "ACTIVE");

    let outcome = service
        .process_return(id, give_back(&[(product.id, 10)], ReturnCondition::Good))
        .await
        .unwrap();
    assert!(outcome.closed);
    assert_eq!(app.stock(product.id).await, 10);

    let first = service.check_and_close_consignment(id).await.unwrap();
    let second = service.check_and_close_consignment(id).await.unwrap();
    assert_eq!(first.status, "CLOSED");
    assert_eq!(first.closed_at, second.closed_at);

    let err = service
        .process_return(id, give_back(&[(product.id, 1)], ReturnCondition::Good))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidState { status, .. } if status == "CLOSED");

    let err = app
        .invoicing()
        .invoice_from_consignment(id, bill(&[(product.id, 1)]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidState { .. });
}

#[tokio::test]
async fn accepted_quotation_becomes_a_consignment() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(20), dec!(6)).await;
    app.seed_lot(product.id, 10, None).await;

    let quotations = app.quotations();
    let qid = quotations
        .create(CreateQuotationInput {
            customer_id: customer,
            items: vec![QuotationLineInput {
                product_id: product.id,
                quantity: 8,
                unit_price: None,
                discount_percent: Some(dec!(25)),
            }],
            valid_days: None,
            notes: None,
            terms_and_conditions: None,
        })
        .await
        .unwrap()
        .quotation
        .id;

    let err = app.consignments().create_from_quotation(qid).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidState { .. });

    quotations.send(qid).await.unwrap();
    quotations.accept(qid).await.unwrap();

    let detail = app.consignments().create_from_quotation(qid).await.unwrap();
    assert_eq!(detail.consignment.quotation_id, Some(qid));
    assert_eq!(detail.items[0].unit_price, dec!(15));
    assert_eq!(detail.items[0].quantity_delivered, 8);
    assert_eq!(detail.consignment.total_value, dec!(120));
    assert_eq!(app.stock(product.id).await, 2);

    let source = quotations.find_one(qid).await.unwrap().quotation;
    assert_eq!(source.status, "INVOICED");
    assert_eq!(source.converted_to_consignment_id, Some(detail.consignment.id));

    let err = app.consignments().create_from_quotation(qid).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidState { .. });
}

#[tokio::test]
async fn http_delivery_and_availability() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(6)).await;
    app.seed_lot(product.id, 3, None).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/consignments",
            Some(json!({
                "customer_id": customer,
                "items": [{ "product_id": product.id, "quantity": 5 }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["kind"], "insufficient_stock");
    assert!(body["message"].as_str().unwrap().contains("available 3"));

    let response = app
        .request(
            Method::POST,
            "/api/v1/consignments",
            Some(json!({
                "customer_id": customer,
                "items": [{ "product_id": product.id, "quantity": 3 }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let id = body_json(response).await["data"]["consignment"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/consignments/{}/returns", id),
            Some(json!({
                "items": [{ "product_id": product.id, "quantity": 1 }],
                "condition": "GOOD"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/consignments/{}/available", id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"][0]["available"], 2);
}
