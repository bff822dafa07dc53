//! Checkout through the locking gate: all-or-nothing holds, lock ordering, timeouts.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;
use stockhold_core::{
    CheckoutLine, InventoryError, OrderId, ProductId, ReservationStatus, TenantId,
};
use stockhold_runtime::retry::{RetryPolicy, retry_checkout};
use stockhold_runtime::{InventoryConfig, InventoryService};
use stockhold_testing::{InMemoryInventoryStore, RecordingReconciliationSink, test_clock};

fn service_with(
    store: &Arc<InMemoryInventoryStore>,
    config: InventoryConfig,
) -> Arc<InventoryService<InMemoryInventoryStore>> {
    Arc::new(InventoryService::new(
        Arc::clone(store),
        Arc::new(test_clock()),
        Arc::new(RecordingReconciliationSink::new()),
        config,
    ))
}

fn service(store: &Arc<InMemoryInventoryStore>) -> Arc<InventoryService<InMemoryInventoryStore>> {
    service_with(store, InventoryConfig::default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_orders_of_three_against_stock_five() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let (tenant, product) = (TenantId::new(), ProductId::new());
    store.seed_product(tenant, product, 5);
    let service = service(&store);

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .checkout(tenant, OrderId::new(), &[CheckoutLine::new(product, 3)])
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut rejected = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(holds) => {
                assert_eq!(holds.len(), 1);
                succeeded += 1;
            }
            Err(InventoryError::InsufficientStock { available, .. }) => rejected.push(available),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(rejected, vec![2, 2]);
    assert_eq!(service.available(tenant, product).await.unwrap(), 2);
    assert_eq!(store.committed_active_quantity(tenant, product), 3);
}

#[tokio::test]
async fn multi_product_checkout_is_all_or_nothing() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let tenant = TenantId::new();
    let (plenty, scarce) = (ProductId::new(), ProductId::new());
    store.seed_product(tenant, plenty, 10);
    store.seed_product(tenant, scarce, 1);
    let service = service(&store);

    let err = service
        .checkout(
            tenant,
            OrderId::new(),
            &[CheckoutLine::new(plenty, 2), CheckoutLine::new(scarce, 2)],
        )
        .await
        .unwrap_err();

    assert_eq!(
        err,
        InventoryError::InsufficientStock {
            product_id: scarce,
            requested: 2,
            available: 1
        }
    );
    assert!(store.reservations_for_product(plenty).is_empty());
    assert_eq!(service.available(tenant, plenty).await.unwrap(), 10);
}

#[tokio::test]
async fn duplicate_lines_are_merged_into_one_hold() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let (tenant, product) = (TenantId::new(), ProductId::new());
    store.seed_product(tenant, product, 10);
    let service = service(&store);

    let holds = service
        .checkout(
            tenant,
            OrderId::new(),
            &[CheckoutLine::new(product, 2), CheckoutLine::new(product, 1)],
        )
        .await
        .unwrap();

    assert_eq!(holds.len(), 1);
    assert_eq!(holds[0].quantity, 3);
    assert_eq!(service.available(tenant, product).await.unwrap(), 7);
}

#[tokio::test]
async fn second_checkout_for_same_order_is_duplicate() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let (tenant, product) = (TenantId::new(), ProductId::new());
    store.seed_product(tenant, product, 10);
    let service = service(&store);
    let order = OrderId::new();

    service
        .checkout(tenant, order, &[CheckoutLine::new(product, 2)])
        .await
        .unwrap();
    let err = service
        .checkout(tenant, order, &[CheckoutLine::new(product, 2)])
        .await
        .unwrap_err();

    assert_eq!(
        err,
        InventoryError::DuplicateReservation {
            order_id: order,
            product_id: product
        }
    );
    assert_eq!(store.committed_active_quantity(tenant, product), 2);
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let (tenant, product) = (TenantId::new(), ProductId::new());
    store.seed_product(tenant, product, 10);
    let service = service(&store);

    let zero = service
        .checkout(tenant, OrderId::new(), &[CheckoutLine::new(product, 0)])
        .await
        .unwrap_err();
    assert!(matches!(zero, InventoryError::InvalidQuantity { .. }));

    // An order with nothing in it must not commit, or its payment would later
    // settle against no holds at all.
    let order = OrderId::new();
    let empty = service.checkout(tenant, order, &[]).await.unwrap_err();
    assert_eq!(empty, InventoryError::EmptyCart);
    assert!(store.reservations_for_product(product).is_empty());

    let unknown = ProductId::new();
    let missing = service
        .checkout(tenant, OrderId::new(), &[CheckoutLine::new(unknown, 1)])
        .await
        .unwrap_err();
    assert_eq!(missing, InventoryError::ProductNotFound { product_id: unknown });

    // Products are scoped per tenant.
    let other_tenant = service
        .checkout(TenantId::new(), OrderId::new(), &[CheckoutLine::new(product, 1)])
        .await
        .unwrap_err();
    assert!(matches!(other_tenant, InventoryError::ProductNotFound { .. }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_product_sets_in_opposite_order_do_not_deadlock() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let tenant = TenantId::new();
    let (a, b) = (ProductId::new(), ProductId::new());
    store.seed_product(tenant, a, 1_000);
    store.seed_product(tenant, b, 1_000);
    let service = service_with(
        &store,
        InventoryConfig::default().with_lock_timeout(Duration::from_millis(500)),
    );

    let handles: Vec<_> = (0..40)
        .map(|i| {
            let service = Arc::clone(&service);
            let lines = if i % 2 == 0 {
                vec![CheckoutLine::new(a, 1), CheckoutLine::new(b, 1)]
            } else {
                vec![CheckoutLine::new(b, 1), CheckoutLine::new(a, 1)]
            };
            tokio::spawn(async move { service.checkout(tenant, OrderId::new(), &lines).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().expect("checkout should not time out");
    }
    assert_eq!(store.committed_active_quantity(tenant, a), 40);
    assert_eq!(store.committed_active_quantity(tenant, b), 40);
}

#[tokio::test]
async fn lock_timeout_is_retryable_and_reserves_nothing() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let (tenant, product) = (TenantId::new(), ProductId::new());
    store.seed_product(tenant, product, 5);
    let service = service_with(
        &store,
        InventoryConfig::default().with_lock_timeout(Duration::from_millis(30)),
    );
    let order = OrderId::new();

    let guard = store.hold_product_lock(tenant, product).await;
    let err = service
        .checkout(tenant, order, &[CheckoutLine::new(product, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, InventoryError::LockTimeout(_)));
    assert!(err.is_retryable());
    assert!(store.reservations_for_product(product).is_empty());

    drop(guard);
    let policy = RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(5))
        .build();
    let lines = [CheckoutLine::new(product, 1)];
    let holds = retry_checkout(policy, || service.checkout(tenant, order, &lines))
        .await
        .unwrap();
    assert_eq!(holds.len(), 1);
}

#[tokio::test]
async fn cancelled_checkout_leaves_no_hold() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let (tenant, product) = (TenantId::new(), ProductId::new());
    store.seed_product(tenant, product, 5);
    let service = service(&store);

    let guard = store.hold_product_lock(tenant, product).await;
    let pending = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service
                .checkout(tenant, OrderId::new(), &[CheckoutLine::new(product, 2)])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());
    drop(guard);

    assert!(store.reservations_for_product(product).is_empty());
    assert_eq!(service.available(tenant, product).await.unwrap(), 5);
}

#[tokio::test]
async fn release_returns_stock_and_is_idempotent() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let (tenant, product) = (TenantId::new(), ProductId::new());
    store.seed_product(tenant, product, 5);
    let service = service(&store);
    let order = OrderId::new();

    service
        .checkout(tenant, order, &[CheckoutLine::new(product, 4)])
        .await
        .unwrap();
    assert_eq!(service.available(tenant, product).await.unwrap(), 1);

    let first = service.release(order).await.unwrap();
    assert_eq!(first.released.len(), 1);
    assert_eq!(first.released[0].status, ReservationStatus::Released);
    assert_eq!(service.available(tenant, product).await.unwrap(), 5);

    let second = service.release(order).await.unwrap();
    assert!(second.released.is_empty());
    assert_eq!(second.already_terminal, 1);
    assert_eq!(store.stock(tenant, product), Some(5));
}

#[tokio::test]
async fn archived_product_reads_as_not_found() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let (tenant, product) = (TenantId::new(), ProductId::new());
    store.seed_product(tenant, product, 5);
    store.archive_product(tenant, product);
    let service = service(&store);

    assert_eq!(
        service.available(tenant, product).await.unwrap_err(),
        InventoryError::ProductNotFound { product_id: product }
    );
}
