//! In-memory stores with the same semantics as the Postgres repositories.
//!
//! Used by unit and integration tests, and handy for local experiments
//! without a database.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;

use kelp_core::{
    OrderId, OrderNumber, OrderStatus, PaymentMethod, PaymentOutcome, PaymentStatus, ProductId,
};

use super::{Catalog, OrderStore, RepositoryError};
use crate::models::{CatalogProduct, Order, PaymentTransition, PaymentUpdate};

#[derive(Default)]
struct Orders {
    by_id: HashMap<OrderId, Order>,
    numbers: HashMap<OrderNumber, OrderId>,
    events: HashSet<(PaymentMethod, String, PaymentOutcome)>,
    forced_conflicts: usize,
}

/// Order store held in a mutex. One lock covers orders and payment events,
/// so every operation is atomic.
#[derive(Default)]
pub struct MemoryOrderStore {
    inner: Mutex<Orders>,
}

impl MemoryOrderStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` inserts fail with an order-number conflict.
    #[cfg(any(test, feature = "test-util"))]
    #[must_use]
    pub fn with_forced_conflicts(count: usize) -> Self {
        let store = Self::default();
        store.lock().forced_conflicts = count;
        store
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct payment notifications recorded.
    #[must_use]
    pub fn payment_event_count(&self) -> usize {
        self.lock().events.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Orders> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut orders = self.lock();
        if orders.forced_conflicts > 0 {
            orders.forced_conflicts -= 1;
            return Err(RepositoryError::Conflict(
                "order number already exists".to_owned(),
            ));
        }
        if orders.numbers.contains_key(&order.order_number) {
            return Err(RepositoryError::Conflict(
                "order number already exists".to_owned(),
            ));
        }
        orders
            .numbers
            .insert(order.order_number.clone(), order.id);
        orders.by_id.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.lock().by_id.get(&id).cloned())
    }

    async fn find_by_number(
        &self,
        number: &OrderNumber,
    ) -> Result<Option<Order>, RepositoryError> {
        let orders = self.lock();
        Ok(orders
            .numbers
            .get(number)
            .and_then(|id| orders.by_id.get(id))
            .cloned())
    }

    async fn apply_payment(
        &self,
        update: &PaymentUpdate,
    ) -> Result<PaymentTransition, RepositoryError> {
        let mut guard = self.lock();
        let orders = &mut *guard;

        let order = orders
            .by_id
            .get_mut(&update.order_id)
            .ok_or(RepositoryError::NotFound)?;

        let key = (update.provider, update.external_id.clone(), update.outcome);
        if !orders.events.insert(key) {
            return Ok(PaymentTransition::Duplicate);
        }

        if !update.outcome.applies_to(order.payment_status) {
            return Ok(PaymentTransition::Unchanged);
        }

        order.payment_status = update.outcome.payment_status();
        if let Some(status) = update.outcome.order_status() {
            order.status = status;
        }
        if update.outcome == PaymentOutcome::Paid {
            order.payment_id = Some(update.external_id.clone());
        }
        order.payment_data = Some(update.payload.clone());
        order.updated_at = Utc::now();

        Ok(PaymentTransition::Applied)
    }

    async fn set_status(
        &self,
        id: OrderId,
        status: Option<OrderStatus>,
        payment_status: Option<PaymentStatus>,
    ) -> Result<Order, RepositoryError> {
        let mut orders = self.lock();
        let order = orders.by_id.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if let Some(status) = status {
            order.status = status;
        }
        if let Some(payment_status) = payment_status {
            order.payment_status = payment_status;
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

/// Fixed product list.
#[derive(Default)]
pub struct MemoryCatalog {
    products: Mutex<HashMap<ProductId, CatalogProduct>>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new(products: impl IntoIterator<Item = CatalogProduct>) -> Self {
        Self {
            products: Mutex::new(products.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    /// Insert or replace a product, e.g. to simulate a price change.
    pub fn upsert(&self, product: CatalogProduct) {
        self.products
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(product.id, product);
    }
}

impl Catalog for MemoryCatalog {
    async fn products(&self, ids: &[ProductId]) -> Result<Vec<CatalogProduct>, RepositoryError> {
        let products = self.products.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ids
            .iter()
            .filter_map(|id| products.get(id))
            .cloned()
            .collect())
    }
}
