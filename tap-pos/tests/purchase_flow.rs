use std::sync::Arc;

use tap_core::{PosError, PosEvent, TenantContext, TenantDirectory, TenantId};
use tap_pos::{
    PaymentStatus, PosService, Product, ProductId, Purchase, PurchaseDraft, PurchaseLine,
    SaleDraft, SaleLine, Vendor, VendorStock,
};
use tap_store::{ConnectionManager, MemoryEngine};

/// Test factory functions
async fn service_with_tenant(tenant: &str) -> (PosService<MemoryEngine>, TenantContext) {
    let directory = Arc::new(TenantDirectory::new());
    let tenant_id = TenantId::new(tenant).unwrap();
    directory.provision(tenant_id.clone(), tenant).unwrap();
    let manager = Arc::new(ConnectionManager::new(
        Arc::new(MemoryEngine::new()),
        directory,
    ));
    (PosService::new(manager), TenantContext::new(tenant_id))
}

async fn seed_vendor(service: &PosService<MemoryEngine>, ctx: &TenantContext) -> Vendor {
    service
        .create_vendor(ctx, Vendor::new("North Ridge Distributors"))
        .await
        .unwrap()
}

async fn seed_product(
    service: &PosService<MemoryEngine>,
    ctx: &TenantContext,
    name: &str,
    selling_price: f64,
    stock: i64,
) -> Product {
    service
        .create_product(ctx, Product::new(name, selling_price).with_stock(stock))
        .await
        .unwrap()
}

fn line(product: &Product, quantity: i64, unit_price: f64) -> PurchaseLine {
    PurchaseLine {
        product_id: product.id.clone(),
        quantity,
        unit_price,
    }
}

fn draft(vendor: &Vendor, items: Vec<PurchaseLine>, tax: f64, paid: f64) -> PurchaseDraft {
    PurchaseDraft {
        vendor_id: vendor.id.clone(),
        items,
        tax_amount: tax,
        paid_amount: paid,
        purchased_at: None,
    }
}

/// A1. Purchase Arithmetic And Derived Status
#[tokio::test]
async fn test_purchase_arithmetic_and_status() {
    let (service, ctx) = service_with_tenant("acme").await;
    let vendor = seed_vendor(&service, &ctx).await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 0).await;
    let rum = seed_product(&service, &ctx, "rum", 80.0, 0).await;

    let purchase = service
        .record_purchase(
            &ctx,
            draft(
                &vendor,
                vec![line(&gin, 2, 100.0), line(&rum, 3, 50.0)],
                35.0,
                385.0,
            ),
        )
        .await
        .unwrap();

    assert_eq!(purchase.subtotal, 350.0);
    assert_eq!(purchase.total, 385.0);
    assert_eq!(purchase.due_amount, 0.0);
    assert_eq!(purchase.status, PaymentStatus::Paid);

    // Stock moved and price history was appended.
    let gin_after = service.product(&ctx, &gin.id).await.unwrap();
    assert_eq!(gin_after.stock_qty, 2);
    assert_eq!(gin_after.price_history.len(), 1);
    assert_eq!(gin_after.price_history[0].unit_cost, 100.0);

    // Vendor stock rows were created for both products.
    let rows = service.vendor_stock_report(&ctx, Some(&vendor.id)).await.unwrap();
    assert_eq!(rows.len(), 2);
}

/// A2. Partial And Pending Payment Status
#[tokio::test]
async fn test_partial_and_pending_payment_status() {
    let (service, ctx) = service_with_tenant("acme").await;
    let vendor = seed_vendor(&service, &ctx).await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 0).await;
    let rum = seed_product(&service, &ctx, "rum", 80.0, 0).await;

    let partial = service
        .record_purchase(
            &ctx,
            draft(
                &vendor,
                vec![line(&gin, 2, 100.0), line(&rum, 3, 50.0)],
                35.0,
                200.0,
            ),
        )
        .await
        .unwrap();
    assert_eq!(partial.status, PaymentStatus::Partial);
    assert_eq!(partial.due_amount, 185.0);

    let pending = service
        .record_purchase(&ctx, draft(&vendor, vec![line(&gin, 1, 100.0)], 0.0, 0.0))
        .await
        .unwrap();
    assert_eq!(pending.status, PaymentStatus::Pending);
    assert_eq!(pending.due_amount, 100.0);
}

/// A3. Failed Purchase Leaves No Trace
#[tokio::test]
async fn test_purchase_with_unknown_product_changes_nothing() {
    let (service, ctx) = service_with_tenant("acme").await;
    let vendor = seed_vendor(&service, &ctx).await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 0).await;
    let rum = seed_product(&service, &ctx, "rum", 80.0, 0).await;
    let vodka = seed_product(&service, &ctx, "vodka", 60.0, 0).await;

    let result = service
        .record_purchase(
            &ctx,
            draft(
                &vendor,
                vec![
                    line(&gin, 2, 100.0),
                    line(&rum, 3, 50.0),
                    line(&vodka, 1, 40.0),
                    PurchaseLine {
                        product_id: ProductId::from("ghost"),
                        quantity: 1,
                        unit_price: 10.0,
                    },
                ],
                35.0,
                385.0,
            ),
        )
        .await;
    assert!(matches!(result, Err(PosError::NotFound { .. })));

    // Zero stock changes, zero purchase records, zero vendor-stock rows.
    for product in [&gin, &rum, &vodka] {
        assert_eq!(service.product(&ctx, &product.id).await.unwrap().stock_qty, 0);
    }
    let conn = service.manager().acquire(&ctx.tenant_id).await.unwrap();
    assert!(conn.collection::<Purchase>().find_all().await.unwrap().is_empty());
    assert!(conn
        .collection::<VendorStock>()
        .find_all()
        .await
        .unwrap()
        .is_empty());
}

/// A4. Concurrent Purchases Never Lose An Update
#[tokio::test]
async fn test_concurrent_purchases_net_both_increments() {
    let (service, ctx) = service_with_tenant("acme").await;
    let vendor = seed_vendor(&service, &ctx).await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 0).await;

    let first = service.record_purchase(
        &ctx,
        draft(&vendor, vec![line(&gin, 5, 100.0)], 0.0, 500.0),
    );
    let second = service.record_purchase(
        &ctx,
        draft(&vendor, vec![line(&gin, 5, 100.0)], 0.0, 500.0),
    );

    let (a, b) = tokio::join!(first, second);
    a.unwrap();
    b.unwrap();

    let after = service.product(&ctx, &gin.id).await.unwrap();
    assert_eq!(after.stock_qty, 10);
}

/// A5. Repeat Purchases Upsert Vendor Stock
#[tokio::test]
async fn test_repeat_purchases_upsert_vendor_stock() {
    let (service, ctx) = service_with_tenant("acme").await;
    let vendor = seed_vendor(&service, &ctx).await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 0).await;

    service
        .record_purchase(&ctx, draft(&vendor, vec![line(&gin, 4, 90.0)], 0.0, 360.0))
        .await
        .unwrap();
    service
        .record_purchase(&ctx, draft(&vendor, vec![line(&gin, 6, 95.0)], 0.0, 570.0))
        .await
        .unwrap();

    let rows = service.vendor_stock_report(&ctx, Some(&vendor.id)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].quantity, 10);
    assert_eq!(rows[0].last_unit_price, 95.0);
}

/// A6. Duplicate Lines Fold Onto One Product
#[tokio::test]
async fn test_duplicate_lines_fold() {
    let (service, ctx) = service_with_tenant("acme").await;
    let vendor = seed_vendor(&service, &ctx).await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 0).await;

    let purchase = service
        .record_purchase(
            &ctx,
            draft(
                &vendor,
                vec![line(&gin, 2, 100.0), line(&gin, 3, 110.0)],
                0.0,
                0.0,
            ),
        )
        .await
        .unwrap();

    assert_eq!(purchase.items.len(), 2);
    assert_eq!(purchase.subtotal, 530.0);

    let after = service.product(&ctx, &gin.id).await.unwrap();
    assert_eq!(after.stock_qty, 5);
    assert_eq!(after.price_history.len(), 2);

    let rows = service.vendor_stock_report(&ctx, Some(&vendor.id)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].quantity, 5);
    assert_eq!(rows[0].last_unit_price, 110.0);
}

/// B1. Sale Decrements Stock And Enforces The Floor
#[tokio::test]
async fn test_sale_decrements_and_floors() {
    let (service, ctx) = service_with_tenant("acme").await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 10).await;

    let sale = service
        .record_sale(
            &ctx,
            SaleDraft {
                items: vec![SaleLine {
                    product_id: gin.id.clone(),
                    quantity: 4,
                    unit_price: None,
                }],
                tax_amount: 0.0,
                paid_amount: 600.0,
                sold_at: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(sale.subtotal, 600.0);
    assert_eq!(sale.status, PaymentStatus::Paid);
    assert_eq!(service.product(&ctx, &gin.id).await.unwrap().stock_qty, 6);

    // Selling more than on hand fails and leaves stock untouched.
    let result = service
        .record_sale(
            &ctx,
            SaleDraft {
                items: vec![SaleLine {
                    product_id: gin.id.clone(),
                    quantity: 20,
                    unit_price: None,
                }],
                tax_amount: 0.0,
                paid_amount: 0.0,
                sold_at: None,
            },
        )
        .await;
    assert!(matches!(result, Err(PosError::Validation(_))));
    assert_eq!(service.product(&ctx, &gin.id).await.unwrap().stock_qty, 6);
}

/// B2. Payments Walk Pending -> Partial -> Paid
#[tokio::test]
async fn test_payment_transitions() {
    let (service, ctx) = service_with_tenant("acme").await;
    let vendor = seed_vendor(&service, &ctx).await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 0).await;
    let rum = seed_product(&service, &ctx, "rum", 80.0, 0).await;

    let purchase = service
        .record_purchase(
            &ctx,
            draft(
                &vendor,
                vec![line(&gin, 2, 100.0), line(&rum, 3, 50.0)],
                35.0,
                0.0,
            ),
        )
        .await
        .unwrap();
    assert_eq!(purchase.status, PaymentStatus::Pending);

    let after_first = service
        .record_payment(&ctx, &purchase.id, 200.0)
        .await
        .unwrap();
    assert_eq!(after_first.status, PaymentStatus::Partial);
    assert_eq!(after_first.due_amount, 185.0);

    let after_second = service
        .record_payment(&ctx, &purchase.id, 185.0)
        .await
        .unwrap();
    assert_eq!(after_second.status, PaymentStatus::Paid);
    assert_eq!(after_second.due_amount, 0.0);
}

/// B3. Payment Validation
#[tokio::test]
async fn test_payment_validation() {
    let (service, ctx) = service_with_tenant("acme").await;

    let result = service
        .record_payment(&ctx, &tap_pos::PurchaseId::from("ghost"), 50.0)
        .await;
    assert!(matches!(result, Err(PosError::NotFound { .. })));

    let result = service
        .record_payment(&ctx, &tap_pos::PurchaseId::from("ghost"), 0.0)
        .await;
    assert!(matches!(result, Err(PosError::Validation(_))));
}

/// C1. Events Fire After Commit
#[tokio::test]
async fn test_events_emitted_post_commit() {
    let (service, ctx) = service_with_tenant("acme").await;
    let vendor = seed_vendor(&service, &ctx).await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 0).await;

    let mut events = service.events().subscribe();

    let purchase = service
        .record_purchase(&ctx, draft(&vendor, vec![line(&gin, 2, 100.0)], 0.0, 200.0))
        .await
        .unwrap();

    let event = events.recv().await.unwrap();
    match event {
        PosEvent::PurchaseRecorded {
            purchase_id, total, ..
        } => {
            assert_eq!(purchase_id, purchase.id.to_string());
            assert_eq!(total, 200.0);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

/// C2. Boundary Entity Names Resolve Against The Closed Schema Set
#[tokio::test]
async fn test_record_count_by_entity_name() {
    let (service, ctx) = service_with_tenant("acme").await;
    let vendor = seed_vendor(&service, &ctx).await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 0).await;

    service
        .record_purchase(&ctx, draft(&vendor, vec![line(&gin, 2, 100.0)], 0.0, 0.0))
        .await
        .unwrap();

    assert_eq!(service.record_count(&ctx, "purchases").await.unwrap(), 1);
    assert_eq!(service.record_count(&ctx, "vendor_stock").await.unwrap(), 1);
    assert!(matches!(
        service.record_count(&ctx, "widgets").await,
        Err(PosError::UnknownSchema(_))
    ));
}

/// C3. Draft Validation Rejects Bad Input Before Any Work
#[tokio::test]
async fn test_draft_validation() {
    let (service, ctx) = service_with_tenant("acme").await;
    let vendor = seed_vendor(&service, &ctx).await;
    let gin = seed_product(&service, &ctx, "gin", 150.0, 0).await;

    let empty = service
        .record_purchase(&ctx, draft(&vendor, vec![], 0.0, 0.0))
        .await;
    assert!(matches!(empty, Err(PosError::Validation(_))));

    let negative_qty = service
        .record_purchase(&ctx, draft(&vendor, vec![line(&gin, -2, 100.0)], 0.0, 0.0))
        .await;
    assert!(matches!(negative_qty, Err(PosError::Validation(_))));

    let negative_price = service
        .record_purchase(&ctx, draft(&vendor, vec![line(&gin, 2, -1.0)], 0.0, 0.0))
        .await;
    assert!(matches!(negative_price, Err(PosError::Validation(_))));
}
