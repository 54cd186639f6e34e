//! Catalog lookups backed by the `products` table.

use sqlx::PgPool;
use uuid::Uuid;

use kelp_core::ProductId;

use super::{Catalog, RepositoryError};
use crate::models::CatalogProduct;

/// Read-only repository over `products`.
pub struct PgCatalog<'a> {
    pool: &'a PgPool,
}

impl<'a> PgCatalog<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }
}

impl Catalog for PgCatalog<'_> {
    async fn products(&self, ids: &[ProductId]) -> Result<Vec<CatalogProduct>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = ids.iter().map(ProductId::as_uuid).collect();
        let products = sqlx::query_as::<_, CatalogProduct>(
            r"
            SELECT id, name, slug, price, inventory, track_inventory, active, image
            FROM products
            WHERE id = ANY($1)
            ",
        )
        .bind(ids)
        .fetch_all(self.pool)
        .await?;

        Ok(products)
    }
}
