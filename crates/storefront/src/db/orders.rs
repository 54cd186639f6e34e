//! Order repository backed by `PostgreSQL`.
//!
//! Queries are checked at runtime (`query_as` + `FromRow`) and rows are
//! converted into domain types via `TryFrom`, so bad data surfaces as
//! [`RepositoryError::DataCorruption`] instead of a panic.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use kelp_core::{
    Address, CurrencyCode, Email, OrderId, OrderItemId, OrderNumber, OrderStatus, PaymentMethod,
    PaymentOutcome, PaymentStatus, ProductId, VariantId,
};

use super::{OrderStore, RepositoryError};
use crate::models::{Order, OrderItem, PaymentTransition, PaymentUpdate};

const ORDER_COLUMNS: &str = r"
    id, order_number, email, phone, status, payment_status, payment_method,
    payment_id, payment_data, subtotal, discount, shipping_cost, tax, total,
    currency, coupon_code, shipping_address, billing_address, customer_notes,
    created_at, updated_at
";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    order_number: String,
    email: String,
    phone: String,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_method: PaymentMethod,
    payment_id: Option<String>,
    payment_data: Option<serde_json::Value>,
    subtotal: Decimal,
    discount: Decimal,
    shipping_cost: Decimal,
    tax: Decimal,
    total: Decimal,
    currency: String,
    coupon_code: Option<String>,
    shipping_address: serde_json::Value,
    billing_address: serde_json::Value,
    customer_notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: OrderItemId,
    product_id: ProductId,
    variant_id: Option<VariantId>,
    variant_name: Option<String>,
    product_name: String,
    product_slug: String,
    product_image: Option<String>,
    quantity: i32,
    price: Decimal,
    total: Decimal,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        let quantity = u32::try_from(row.quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!(
                "invalid quantity {} on order item {}",
                row.quantity, row.id
            ))
        })?;

        Ok(Self {
            id: row.id,
            product_id: row.product_id,
            variant_id: row.variant_id,
            variant_name: row.variant_name,
            product_name: row.product_name,
            product_slug: row.product_slug,
            product_image: row.product_image,
            quantity,
            price: row.price,
            total: row.total,
        })
    }
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Result<Order, RepositoryError> {
        let id = self.id;
        let corrupt = move |what: &str, e: &dyn std::fmt::Display| {
            RepositoryError::DataCorruption(format!("invalid {what} on order {id}: {e}"))
        };

        let order_number =
            OrderNumber::parse(&self.order_number).map_err(|e| corrupt("order number", &e))?;
        let email = Email::parse(&self.email).map_err(|e| corrupt("email", &e))?;
        let currency = self
            .currency
            .parse::<CurrencyCode>()
            .map_err(|e| corrupt("currency", &e))?;
        let shipping_address: Address = serde_json::from_value(self.shipping_address)
            .map_err(|e| corrupt("shipping address", &e))?;
        let billing_address: Address = serde_json::from_value(self.billing_address)
            .map_err(|e| corrupt("billing address", &e))?;

        Ok(Order {
            id: self.id,
            order_number,
            email,
            phone: self.phone,
            status: self.status,
            payment_status: self.payment_status,
            payment_method: self.payment_method,
            payment_id: self.payment_id,
            payment_data: self.payment_data,
            subtotal: self.subtotal,
            discount: self.discount,
            shipping_cost: self.shipping_cost,
            tax: self.tax,
            total: self.total,
            currency,
            coupon_code: self.coupon_code,
            shipping_address,
            billing_address,
            customer_notes: self.customer_notes,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Repository for order database operations.
pub struct PgOrderStore<'a> {
    pool: &'a PgPool,
}

impl<'a> PgOrderStore<'a> {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    async fn load_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, RepositoryError> {
        let rows: Vec<OrderItemRow> = sqlx::query_as(
            r"
            SELECT id, product_id, variant_id, variant_name, product_name,
                   product_slug, product_image, quantity, price, total
            FROM order_items
            WHERE order_id = $1
            ORDER BY position
            ",
        )
        .bind(order_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(OrderItem::try_from).collect()
    }

    async fn hydrate(&self, row: Option<OrderRow>) -> Result<Option<Order>, RepositoryError> {
        match row {
            Some(row) => {
                let items = self.load_items(row.id).await?;
                Ok(Some(row.into_order(items)?))
            }
            None => Ok(None),
        }
    }
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
) -> Result<(), RepositoryError> {
    for (position, item) in order.items.iter().enumerate() {
        let position = i32::try_from(position)
            .map_err(|_| RepositoryError::DataCorruption("too many order items".to_owned()))?;
        let quantity = i32::try_from(item.quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!("quantity {} out of range", item.quantity))
        })?;

        sqlx::query(
            r"
            INSERT INTO order_items (
                id, order_id, position, product_id, variant_id, variant_name,
                product_name, product_slug, product_image, quantity, price, total
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(item.id)
        .bind(order.id)
        .bind(position)
        .bind(item.product_id)
        .bind(item.variant_id)
        .bind(&item.variant_name)
        .bind(&item.product_name)
        .bind(&item.product_slug)
        .bind(&item.product_image)
        .bind(quantity)
        .bind(item.price)
        .bind(item.total)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

impl OrderStore for PgOrderStore<'_> {
    async fn insert(&self, order: &Order) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO orders (
                id, order_number, email, phone, status, payment_status, payment_method,
                payment_id, payment_data, subtotal, discount, shipping_cost, tax, total,
                currency, coupon_code, shipping_address, billing_address, customer_notes,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21)
            ",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.email.as_str())
        .bind(&order.phone)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.payment_method)
        .bind(&order.payment_id)
        .bind(&order.payment_data)
        .bind(order.subtotal)
        .bind(order.discount)
        .bind(order.shipping_cost)
        .bind(order.tax)
        .bind(order.total)
        .bind(order.currency.code())
        .bind(&order.coupon_code)
        .bind(Json(&order.shipping_address))
        .bind(Json(&order.billing_address))
        .bind(&order.customer_notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::from_insert(e, "order number"))?;

        insert_items(&mut tx, order).await?;
        tx.commit().await?;

        tracing::debug!(order_number = %order.order_number, "order persisted");
        Ok(())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn find_by_number(
        &self,
        number: &OrderNumber,
    ) -> Result<Option<Order>, RepositoryError> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_number = $1");
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(number)
            .fetch_optional(self.pool)
            .await?;
        self.hydrate(row).await
    }

    async fn apply_payment(
        &self,
        update: &PaymentUpdate,
    ) -> Result<PaymentTransition, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Lock the order first so concurrent deliveries for the same order
        // are applied one at a time.
        let current: Option<(PaymentStatus,)> =
            sqlx::query_as("SELECT payment_status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(update.order_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((current,)) = current else {
            return Err(RepositoryError::NotFound);
        };

        let recorded: Option<(Uuid,)> = sqlx::query_as(
            r"
            INSERT INTO payment_events (id, order_id, provider, external_id, outcome, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (provider, external_id, outcome) DO NOTHING
            RETURNING id
            ",
        )
        .bind(Uuid::new_v4())
        .bind(update.order_id)
        .bind(update.provider)
        .bind(&update.external_id)
        .bind(update.outcome.as_str())
        .bind(&update.payload)
        .fetch_optional(&mut *tx)
        .await?;

        if recorded.is_none() {
            return Ok(PaymentTransition::Duplicate);
        }

        if !update.outcome.applies_to(current) {
            tx.commit().await?;
            return Ok(PaymentTransition::Unchanged);
        }

        let payment_id = match update.outcome {
            PaymentOutcome::Paid => Some(update.external_id.as_str()),
            PaymentOutcome::Failed => None,
        };

        sqlx::query(
            r"
            UPDATE orders
            SET payment_status = $2,
                status = COALESCE($3, status),
                payment_id = COALESCE($4, payment_id),
                payment_data = $5,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(update.order_id)
        .bind(update.outcome.payment_status())
        .bind(update.outcome.order_status())
        .bind(payment_id)
        .bind(&update.payload)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PaymentTransition::Applied)
    }

    async fn set_status(
        &self,
        id: OrderId,
        status: Option<OrderStatus>,
        payment_status: Option<PaymentStatus>,
    ) -> Result<Order, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE orders
            SET status = COALESCE($2, status),
                payment_status = COALESCE($3, payment_status),
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status)
        .bind(payment_status)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        self.find_by_id(id).await?.ok_or(RepositoryError::NotFound)
    }
}
