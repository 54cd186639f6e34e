//! Applies verified payment notifications to orders.
//!
//! Provider adapters authenticate and normalize webhook deliveries into a
//! [`PaymentNotification`]; this module decides what that means for the order.
//! Redelivery is harmless: [`OrderStore::apply_payment`] records each distinct
//! notification once, and the confirmation email only goes out on the
//! delivery that actually moved the order to `PAID`.

use rust_decimal::Decimal;
use thiserror::Error;

use kelp_core::{PaymentOutcome, round_money};

use crate::db::{OrderStore, RepositoryError};
use crate::models::PaymentTransition;
use crate::payments::PaymentNotification;
use crate::services::notifications::{NotificationError, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The order moved to the outcome's status.
    Applied(PaymentOutcome),
    /// This exact notification was already processed.
    Duplicate,
    /// Recorded, but the order's current status does not accept it.
    Unchanged,
    /// The referenced order does not exist.
    OrderNotFound,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("amount mismatch: expected {expected}, received {received}")]
    AmountMismatch { expected: Decimal, received: Decimal },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Webhook reconciliation against an order store, notifying on payment.
pub struct WebhookReconciler<'a, S, N> {
    store: &'a S,
    notifier: &'a N,
}

impl<'a, S, N> WebhookReconciler<'a, S, N>
where
    S: OrderStore,
    N: Notifier,
{
    pub const fn new(store: &'a S, notifier: &'a N) -> Self {
        Self { store, notifier }
    }

    /// Apply one authenticated notification.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::AmountMismatch` if a payment reports a
    /// different amount than the order total (nothing is recorded), or
    /// `ReconcileError::Repository` on storage failure.
    #[tracing::instrument(
        skip_all,
        fields(
            provider = %notification.provider,
            order_id = %notification.order_id,
            outcome = %notification.outcome,
            external_id = %notification.external_id,
        )
    )]
    pub async fn reconcile(
        &self,
        notification: &PaymentNotification,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(order) = self.store.find_by_id(notification.order_id).await? else {
            tracing::warn!("payment notification for unknown order");
            return Ok(ReconcileOutcome::OrderNotFound);
        };

        if notification.outcome == PaymentOutcome::Paid
            && let Some(received) = notification.amount
            && round_money(received) != order.total
        {
            tracing::warn!(
                order_number = %order.order_number,
                expected = %order.total,
                received = %received,
                "payment amount does not match order total"
            );
            return Err(ReconcileError::AmountMismatch {
                expected: order.total,
                received,
            });
        }

        let transition = match self.store.apply_payment(&notification.to_update()).await {
            Ok(transition) => transition,
            Err(RepositoryError::NotFound) => return Ok(ReconcileOutcome::OrderNotFound),
            Err(e) => return Err(e.into()),
        };

        match transition {
            PaymentTransition::Duplicate => {
                tracing::info!(order_number = %order.order_number, "duplicate payment notification");
                Ok(ReconcileOutcome::Duplicate)
            }
            PaymentTransition::Unchanged => {
                tracing::info!(
                    order_number = %order.order_number,
                    payment_status = %order.payment_status,
                    "notification does not apply to current payment status"
                );
                Ok(ReconcileOutcome::Unchanged)
            }
            PaymentTransition::Applied => {
                tracing::info!(order_number = %order.order_number, "payment status updated");
                if notification.outcome == PaymentOutcome::Paid {
                    self.notify_paid(notification).await;
                }
                Ok(ReconcileOutcome::Applied(notification.outcome))
            }
        }
    }

    /// Send the confirmation for a freshly paid order. Failures are reported,
    /// never propagated: the payment stays applied.
    async fn notify_paid(&self, notification: &PaymentNotification) {
        let order = match self.store.find_by_id(notification.order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(error = %e, "failed to reload paid order for notification");
                return;
            }
        };

        match self.notifier.notify_order_paid(&order).await {
            Ok(()) => {}
            Err(NotificationError::NotConfigured) => {
                tracing::warn!(order_number = %order.order_number, "order confirmation not sent, email disabled");
            }
            Err(e) => {
                let event_id = sentry::capture_error(&e);
                tracing::error!(
                    error = %e,
                    order_number = %order.order_number,
                    sentry_event_id = %event_id,
                    "failed to send order confirmation"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryOrderStore;
    use crate::models::Order;
    use crate::models::order::fixtures;
    use crate::services::notifications::RecordingNotifier;
    use kelp_core::{OrderId, OrderStatus, PaymentMethod, PaymentStatus};
    use rust_decimal_macros::dec;

    fn notification(order: &Order, outcome: PaymentOutcome, amount: Option<Decimal>) -> PaymentNotification {
        PaymentNotification {
            provider: PaymentMethod::PayFast,
            order_id: order.id,
            outcome,
            external_id: "1089250".into(),
            amount,
            payload: serde_json::json!({ "pf_payment_id": "1089250" }),
        }
    }

    async fn stored_order() -> (MemoryOrderStore, Order) {
        let store = MemoryOrderStore::new();
        let order = fixtures::order(PaymentMethod::PayFast);
        store.insert(&order).await.unwrap();
        (store, order)
    }

    #[tokio::test]
    async fn test_paid_applies_and_notifies_once() {
        let (store, order) = stored_order().await;
        let notifier = RecordingNotifier::default();
        let reconciler = WebhookReconciler::new(&store, &notifier);
        let paid = notification(&order, PaymentOutcome::Paid, Some(dec!(3082.70)));

        assert_eq!(
            reconciler.reconcile(&paid).await.unwrap(),
            ReconcileOutcome::Applied(PaymentOutcome::Paid)
        );
        assert_eq!(
            reconciler.reconcile(&paid).await.unwrap(),
            ReconcileOutcome::Duplicate
        );
        assert_eq!(notifier.sent(), vec![order.order_number.clone()]);

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_amount_mismatch_is_rejected_without_mutation() {
        let (store, order) = stored_order().await;
        let notifier = RecordingNotifier::default();
        let reconciler = WebhookReconciler::new(&store, &notifier);

        let result = reconciler
            .reconcile(&notification(&order, PaymentOutcome::Paid, Some(dec!(1.00))))
            .await;
        assert!(matches!(result, Err(ReconcileError::AmountMismatch { .. })));

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(store.payment_event_count(), 0);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let store = MemoryOrderStore::new();
        let notifier = RecordingNotifier::default();
        let reconciler = WebhookReconciler::new(&store, &notifier);
        let mut orphan = notification(&fixtures::order(PaymentMethod::Stripe), PaymentOutcome::Paid, None);
        orphan.order_id = OrderId::new();

        assert_eq!(
            reconciler.reconcile(&orphan).await.unwrap(),
            ReconcileOutcome::OrderNotFound
        );
    }

    #[tokio::test]
    async fn test_late_failure_is_unchanged() {
        let (store, order) = stored_order().await;
        let notifier = RecordingNotifier::default();
        let reconciler = WebhookReconciler::new(&store, &notifier);

        reconciler
            .reconcile(&notification(&order, PaymentOutcome::Paid, None))
            .await
            .unwrap();
        assert_eq!(
            reconciler
                .reconcile(&notification(&order, PaymentOutcome::Failed, None))
                .await
                .unwrap(),
            ReconcileOutcome::Unchanged
        );
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_payment() {
        let (store, order) = stored_order().await;
        let notifier = RecordingNotifier::failing();
        let reconciler = WebhookReconciler::new(&store, &notifier);

        assert_eq!(
            reconciler
                .reconcile(&notification(&order, PaymentOutcome::Paid, None))
                .await
                .unwrap(),
            ReconcileOutcome::Applied(PaymentOutcome::Paid)
        );
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Paid);
    }

    #[tokio::test]
    async fn test_failure_after_failure_is_applied_without_notifying() {
        let (store, order) = stored_order().await;
        let notifier = RecordingNotifier::default();
        let reconciler = WebhookReconciler::new(&store, &notifier);

        let mut first = notification(&order, PaymentOutcome::Failed, None);
        first.external_id = "attempt-1".into();
        let mut second = first.clone();
        second.external_id = "attempt-2".into();

        assert_eq!(
            reconciler.reconcile(&first).await.unwrap(),
            ReconcileOutcome::Applied(PaymentOutcome::Failed)
        );
        assert_eq!(
            reconciler.reconcile(&second).await.unwrap(),
            ReconcileOutcome::Applied(PaymentOutcome::Failed)
        );
        assert!(notifier.sent().is_empty());
    }
}
