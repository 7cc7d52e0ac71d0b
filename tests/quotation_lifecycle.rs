mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{body_json, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;
use wholesale_settlement::{
    entities::quotation::QuotationStatus,
    errors::ServiceError,
    services::quotations::{CreateQuotationInput, QuotationLineInput, UpdateQuotationInput},
};

fn line(product_id: Uuid, quantity: i32) -> QuotationLineInput {
    QuotationLineInput {
        product_id,
        quantity,
        unit_price: None,
        discount_percent: None,
    }
}

fn input(customer_id: Uuid, items: Vec<QuotationLineInput>) -> CreateQuotationInput {
    CreateQuotationInput {
        customer_id,
        items,
        valid_days: None,
        notes: None,
        terms_and_conditions: None,
    }
}

#[tokio::test]
async fn create_prices_lines_and_starts_as_draft() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(6)).await;

    let detail = app
        .quotations()
        .create(input(customer, vec![line(product.id, 10)]))
        .await
        .expect("create quotation");

    let q = &detail.quotation;
    assert_eq!(q.status, QuotationStatus::Draft.as_str());
    assert!(q.code.starts_with("PRES-"));
    assert!(q.code.ends_with("-00001"));
    assert_eq!(q.subtotal, dec!(100));
    assert_eq!(q.tax_amount, dec!(21));
    assert_eq!(q.total, q.subtotal + q.tax_amount);
    assert_eq!(detail.items.len(), 1);
    assert_eq!(detail.items[0].unit_price, dec!(10));
    assert_eq!(detail.items[0].line_total, dec!(100));

    let days = (q.valid_until - q.created_at).num_days();
    assert!((14..=15).contains(&days));
}

#[tokio::test]
async fn price_precedence_and_discount() {
    let app = TestApp::new().await;
    let price_list = Uuid::new_v4();
    let customer = app
        .seed_customer_with_list("MONOTRIBUTISTA", Some(price_list))
        .await;
    let listed = app.seed_product(dec!(10), dec!(5)).await;
    let unlisted = app.seed_product(dec!(20), dec!(5)).await;
    let overridden = app.seed_product(dec!(30), dec!(5)).await;
    app.seed_list_price(price_list, listed.id, dec!(8)).await;
    app.seed_list_price(price_list, overridden.id, dec!(28)).await;

    let detail = app
        .quotations()
        .create(input(
            customer,
            vec![
                line(listed.id, 1),
                line(unlisted.id, 1),
                QuotationLineInput {
                    product_id: overridden.id,
                    quantity: 4,
                    unit_price: Some(dec!(25)),
                    discount_percent: Some(dec!(50)),
                },
            ],
        ))
        .await
        .expect("create quotation");

    let prices: Vec<_> = detail.items.iter().map(|i| i.unit_price).collect();
    assert_eq!(prices, vec![dec!(8), dec!(20), dec!(25)]);
    assert_eq!(detail.items[2].line_total, dec!(50));
    assert_eq!(detail.items[2].tax_amount, dec!(10.5));
    assert_eq!(detail.quotation.subtotal, dec!(78));
}

#[tokio::test]
async fn unknown_customer_and_empty_items_are_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product(dec!(10), dec!(5)).await;

    let err = app
        .quotations()
        .create(input(Uuid::new_v4(), vec![line(product.id, 1)]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));

    let customer = app.seed_customer("EXENTO").await;
    let err = app
        .quotations()
        .create(input(customer, vec![]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn out_of_range_price_is_a_validation_error() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(6)).await;

    let err = app
        .quotations()
        .create(input(
            customer,
            vec![QuotationLineInput {
                unit_price: Some(Decimal::MAX),
                ..line(product.id, 2)
            }],
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains(&product.id.to_string()));

    // The service keeps working afterwards.
    app.quotations()
        .create(input(customer, vec![line(product.id, 2)]))
        .await
        .expect("create after rejected quotation");
}

#[tokio::test]
async fn update_replaces_items_only_while_draft() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let a = app.seed_product(dec!(10), dec!(5)).await;
    let b = app.seed_product(dec!(4), dec!(1)).await;
    let service = app.quotations();

    let created = service
        .create(input(customer, vec![line(a.id, 10), line(b.id, 5)]))
        .await
        .unwrap();
    let id = created.quotation.id;

    let updated = service
        .update(
            id,
            UpdateQuotationInput {
                items: Some(vec![line(b.id, 2)]),
                notes: Some("solo yerba".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.items.len(), 1);
    assert_eq!(updated.quotation.subtotal, dec!(8));
    assert_eq!(updated.quotation.notes.as_deref(), Some("solo yerba"));

    service.send(id).await.unwrap();
    let err = service
        .update(id, UpdateQuotationInput::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidState { status, .. } if status == "SENT");

    let err = service.delete(id).await.unwrap_err();
    assert_matches!(err, ServiceError::InvalidState { .. });
}

#[tokio::test]
async fn status_machine_rejects_out_of_order_transitions() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(5)).await;
    let service = app.quotations();
    let id = service
        .create(input(customer, vec![line(product.id, 1)]))
        .await
        .unwrap()
        .quotation
        .id;

    assert_matches!(
        service.accept(id).await,
        Err(ServiceError::InvalidState { operation: "accept", .. })
    );

    let sent = service.send(id).await.unwrap();
    assert_eq!(sent.status, "SENT");
    assert_matches!(service.send(id).await, Err(ServiceError::InvalidState { .. }));

    let accepted = service.accept(id).await.unwrap();
    assert_eq!(accepted.status, "ACCEPTED");
    assert_matches!(
        service.reject(id, None).await,
        Err(ServiceError::InvalidState { operation: "reject", .. })
    );
}

#[tokio::test]
async fn reject_appends_reason_to_notes() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(5)).await;
    let service = app.quotations();
    let mut create = input(customer, vec![line(product.id, 1)]);
    create.notes = Some("entrega en depósito".into());
    let id = service.create(create).await.unwrap().quotation.id;

    service.send(id).await.unwrap();
    let rejected = service
        .reject(id, Some("precio alto".into()))
        .await
        .unwrap();

    assert_eq!(rejected.status, "REJECTED");
    let notes = rejected.notes.unwrap();
    assert!(notes.starts_with("entrega en depósito"));
    assert!(notes.ends_with("Rejection reason: precio alto"));
}

#[tokio::test]
async fn reading_a_lapsed_sent_quotation_expires_it_and_blocks_accept() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(5)).await;
    let service = app.quotations();
    let mut create = input(customer, vec![line(product.id, 1)]);
    create.valid_days = Some(15);
    let id = service.create(create).await.unwrap().quotation.id;
    service.send(id).await.unwrap();
    app.backdate_quotation(id).await;

    let fetched = service.find_one(id).await.unwrap();
    assert!(fetched.expired_on_read);
    assert_eq!(fetched.quotation.status, "EXPIRED");

    let again = service.find_one(id).await.unwrap();
    assert!(!again.expired_on_read);

    let err = service.accept(id).await.unwrap_err();
    assert_matches!(err, ServiceError::Expired { quotation_id, .. } if quotation_id == id);
}

#[tokio::test]
async fn accept_after_validity_expires_without_prior_read() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(5)).await;
    let service = app.quotations();
    let id = service
        .create(input(customer, vec![line(product.id, 1)]))
        .await
        .unwrap()
        .quotation
        .id;
    service.send(id).await.unwrap();
    app.backdate_quotation(id).await;

    assert_matches!(service.accept(id).await, Err(ServiceError::Expired { .. }));
    let fetched = service.find_one(id).await.unwrap();
    assert_eq!(fetched.quotation.status, "EXPIRED");
    assert!(!fetched.expired_on_read);
}

#[tokio::test]
async fn sweep_expires_only_lapsed_open_quotations() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(5)).await;
    let service = app.quotations();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            service
                .create(input(customer, vec![line(product.id, 1)]))
                .await
                .unwrap()
                .quotation
                .id,
        );
    }
    service.send(ids[1]).await.unwrap();
    service.send(ids[2]).await.unwrap();
    service.accept(ids[2]).await.unwrap();

    app.backdate_quotation(ids[0]).await;
    app.backdate_quotation(ids[1]).await;
    app.backdate_quotation(ids[2]).await;

    assert_eq!(service.expire_old_quotations().await.unwrap(), 2);
    assert_eq!(service.expire_old_quotations().await.unwrap(), 0);

    let statuses: Vec<String> = {
        let mut out = Vec::new();
        for id in &ids {
            out.push(service.find_one(*id).await.unwrap().quotation.status);
        }
        out
    };
    assert_eq!(statuses, vec!["EXPIRED", "EXPIRED", "ACCEPTED", "DRAFT"]);
}

#[tokio::test]
async fn duplicate_copies_items_with_fresh_code() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let a = app.seed_product(dec!(10), dec!(5)).await;
    let b = app.seed_product(dec!(4), dec!(1)).await;
    let service = app.quotations();
    let source = service
        .create(input(customer, vec![line(a.id, 3), line(b.id, 5)]))
        .await
        .unwrap();
    service.send(source.quotation.id).await.unwrap();
    service.reject(source.quotation.id, None).await.unwrap();

    let copy = service.duplicate(source.quotation.id).await.unwrap();

    assert_ne!(copy.quotation.id, source.quotation.id);
    assert_ne!(copy.quotation.code, source.quotation.code);
    assert_eq!(copy.quotation.status, "DRAFT");
    assert_eq!(copy.quotation.total, dec!(60.5));
    assert_eq!(copy.quotation.total, source.quotation.total);
    assert_eq!(copy.items.len(), 2);
    assert_eq!(copy.items[0].product_id, a.id);
    assert_eq!(copy.items[1].quantity, 5);
}

#[tokio::test]
async fn delete_removes_a_draft() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(5)).await;
    let service = app.quotations();
    let id = service
        .create(input(customer, vec![line(product.id, 1)]))
        .await
        .unwrap()
        .quotation
        .id;

    service.delete(id).await.unwrap();
    assert_matches!(service.find_one(id).await, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn http_create_and_fetch() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("RESPONSABLE_INSCRIPTO").await;
    let product = app.seed_product(dec!(10), dec!(5)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/quotations",
            Some(json!({
                "customer_id": customer,
                "items": [{ "product_id": product.id, "quantity": 2 }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let id = body["data"]["quotation"]["id"].as_str().unwrap().to_string();

    let response = app
        .request(Method::GET, &format!("/api/v1/quotations/{}", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["quotation"]["status"], "DRAFT");
    assert_eq!(body["data"]["expired_on_read"], false);

    let response = app
        .request(Method::POST, &format!("/api/v1/quotations/{}/accept", id), None)
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["kind"], "invalid_state");

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/quotations/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
