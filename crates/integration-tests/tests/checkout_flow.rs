//! Checkout through payment: order creation, initiation and the webhook that
//! settles it.

use rust_decimal_macros::dec;

use kelp_core::{OrderStatus, PaymentMethod, PaymentOutcome, PaymentStatus};
use kelp_integration_tests::{
    Shop, payfast_gateway, payfast_itn_params, signed_itn_body, stripe_gateway,
    stripe_session_event, stripe_signature_header,
};
use kelp_storefront::db::{MemoryOrderStore, OrderStore, RepositoryError};
use kelp_storefront::payments::{PaymentGateway, WhatsAppGateway};
use kelp_storefront::services::{CheckoutError, ReconcileOutcome};

// =============================================================================
// Stripe
// =============================================================================

#[tokio::test]
async fn test_stripe_order_is_paid_by_webhook() {
    let shop = Shop::new();
    let order = shop.checkout(2, PaymentMethod::Stripe).await.unwrap();

    assert_eq!(order.subtotal, dec!(2598.00));
    assert_eq!(order.shipping_cost, dec!(95.00));
    assert_eq!(order.tax, dec!(389.70));
    assert_eq!(order.total, dec!(3082.70));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);

    // The hosted session charges exactly the order total.
    let form = stripe_gateway().checkout_form(&order).unwrap();
    assert!(form.iter().any(|(k, v)| k == "metadata[orderId]" && *v == order.id.to_string()));

    let body = stripe_session_event("checkout.session.completed", &order, "cs_test_a1", "paid");
    let notification = stripe_gateway()
        .parse_webhook(Some(&stripe_signature_header(&body)), &body)
        .unwrap()
        .unwrap();
    assert_eq!(notification.order_id, order.id);
    assert_eq!(notification.amount, Some(dec!(3082.70)));

    let outcome = shop.reconcile(&notification).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Applied(PaymentOutcome::Paid));

    let stored = shop.store.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.status, OrderStatus::Processing);
    assert_eq!(stored.payment_id.as_deref(), Some("cs_test_a1"));
    assert_eq!(shop.notifier.sent(), vec![order.order_number.clone()]);
}

#[tokio::test]
async fn test_unsettled_session_is_acknowledged_without_change() {
    let shop = Shop::new();
    let order = shop.checkout(1, PaymentMethod::Stripe).await.unwrap();

    let body = stripe_session_event("checkout.session.completed", &order, "cs_test_b2", "unpaid");
    let notification = stripe_gateway()
        .parse_webhook(Some(&stripe_signature_header(&body)), &body)
        .unwrap();

    assert!(notification.is_none());
    let stored = shop.store.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
}

// =============================================================================
// PayFast
// =============================================================================

#[tokio::test]
async fn test_payfast_redirect_and_itn() {
    let shop = Shop::new();
    let order = shop.checkout(1, PaymentMethod::PayFast).await.unwrap();
    let gateway = payfast_gateway();

    let initiation = gateway.initiate(&order).await.unwrap();
    let url = initiation.payment_url.unwrap();
    assert!(url.starts_with("https://sandbox.payfast.co.za/eng/process?"));
    assert!(url.contains(&format!("m_payment_id={}", order.id)));
    assert!(url.contains("&signature="));
    assert!(initiation.chat_url.is_none());

    let body = signed_itn_body(payfast_itn_params(&order, "COMPLETE", "1089250"));
    let notification = gateway.parse_itn(&body).unwrap().unwrap();
    assert_eq!(
        shop.reconcile(&notification).await.unwrap(),
        ReconcileOutcome::Applied(PaymentOutcome::Paid)
    );

    let stored = shop.store.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Paid);
    assert_eq!(stored.payment_id.as_deref(), Some("1089250"));
}

#[tokio::test]
async fn test_cancelled_itn_fails_payment_and_allows_retry() {
    let shop = Shop::new();
    let order = shop.checkout(1, PaymentMethod::PayFast).await.unwrap();

    let body = signed_itn_body(payfast_itn_params(&order, "CANCELLED", "1089251"));
    let notification = payfast_gateway().parse_itn(&body).unwrap().unwrap();
    assert_eq!(
        shop.reconcile(&notification).await.unwrap(),
        ReconcileOutcome::Applied(PaymentOutcome::Failed)
    );

    let stored = shop.store.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Failed);
    assert_eq!(stored.status, OrderStatus::Pending);
    assert!(stored.accepts_payment());
    assert!(shop.notifier.sent().is_empty());

    // A second attempt that succeeds still settles the same order.
    let body = signed_itn_body(payfast_itn_params(&order, "COMPLETE", "1089252"));
    let notification = payfast_gateway().parse_itn(&body).unwrap().unwrap();
    assert_eq!(
        shop.reconcile(&notification).await.unwrap(),
        ReconcileOutcome::Applied(PaymentOutcome::Paid)
    );
    assert_eq!(shop.notifier.sent().len(), 1);
}

// =============================================================================
// WhatsApp
// =============================================================================

#[tokio::test]
async fn test_chat_order_stays_pending() {
    let shop = Shop::new();
    let order = shop.checkout(1, PaymentMethod::WhatsApp).await.unwrap();

    let initiation = WhatsAppGateway::new(Some("+27 71 936 3070"), "Kelp Board Bags")
        .initiate(&order)
        .await
        .unwrap();
    let chat_url = initiation.chat_url.unwrap();
    assert!(chat_url.starts_with("https://wa.me/27719363070?text="));
    assert!(chat_url.contains(order.order_number.as_str()));
    assert!(initiation.payment_url.is_none());

    let stored = shop.store.find_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Pending);
    assert_eq!(stored.payment_status, PaymentStatus::Pending);
    assert_eq!(shop.store.payment_event_count(), 0);
}

// =============================================================================
// Order numbers
// =============================================================================

#[tokio::test]
async fn test_order_number_conflict_is_retried_once() {
    let shop = Shop::with_store(MemoryOrderStore::with_forced_conflicts(1));
    let order = shop.checkout(1, PaymentMethod::Stripe).await.unwrap();
    assert_eq!(shop.store.len(), 1);
    assert!(shop.store.find_by_number(&order.order_number).await.unwrap().is_some());

    let shop = Shop::with_store(MemoryOrderStore::with_forced_conflicts(2));
    let err = shop.checkout(1, PaymentMethod::Stripe).await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::Repository(RepositoryError::Conflict(_))
    ));
    assert!(shop.store.is_empty());
}

#[tokio::test]
async fn test_concurrent_checkouts_get_unique_numbers() {
    let shop = std::sync::Arc::new(Shop::new());

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..64 {
        let shop = shop.clone();
        tasks.spawn(async move { shop.checkout(1, PaymentMethod::PayFast).await });
    }

    let mut numbers = std::collections::HashSet::new();
    while let Some(result) = tasks.join_next().await {
        let order = result.unwrap().unwrap();
        assert!(numbers.insert(order.order_number));
    }
    assert_eq!(numbers.len(), 64);
    assert_eq!(shop.store.len(), 64);
}
