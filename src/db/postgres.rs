//! Postgres 后端: 提交/撤销在同一个 sqlx 事务中完成

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;

use super::queries;
use super::store::{CatalogStore, InventoryStore, InventoryTx};
use super::StoreError;
use crate::models::{
    Invoice, InvoiceId, LotId, NewLot, NewPayable, NewProduct, PayableId, Pricing, Product,
    ProductId,
};
use crate::service::text;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_unique_violation(err: sqlx::Error, code: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::DuplicateCode(code.to_string());
        }
    }
    StoreError::Database(err)
}

fn ensure_affected(rows: u64, entity: &'static str, id: i64) -> Result<(), StoreError> {
    if rows == 0 {
        return Err(StoreError::NotFound { entity, id });
    }
    Ok(())
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(queries::get_product(&self.pool, id).await?)
    }

    async fn find_by_supplier_code(
        &self,
        supplier_tax_id: &str,
        supplier_code: &str,
    ) -> Result<Option<Product>, StoreError> {
        Ok(queries::find_by_supplier_code(&self.pool, supplier_tax_id, supplier_code).await?)
    }

    async fn find_by_barcode(&self, barcode: &str) -> Result<Option<Product>, StoreError> {
        Ok(queries::find_by_barcode(&self.pool, barcode).await?)
    }

    async fn search_by_tokens(
        &self,
        tokens: &[String],
        limit: usize,
    ) -> Result<Vec<Product>, StoreError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(queries::search_by_tokens(&self.pool, tokens, limit).await?)
    }

    async fn codes_with_prefix(&self, prefix: &str) -> Result<HashSet<String>, StoreError> {
        let codes = queries::codes_with_prefix(&self.pool, prefix).await?;
        Ok(codes.into_iter().collect())
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        let search_name = text::normalize(&product.name);
        queries::insert_product(&self.pool, &product, &search_name)
            .await
            .map_err(|e| map_unique_violation(e, &product.code))
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgInventoryTx { tx }))
    }

    async fn load_invoices(&self) -> Result<Vec<Invoice>, StoreError> {
        Ok(queries::load_invoices(&self.pool).await?)
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        queries::insert_invoice(&self.pool, invoice)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        return StoreError::DuplicateAccessKey(invoice.access_key.clone());
                    }
                }
                StoreError::Database(e)
            })
    }

    async fn save_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let rows = queries::update_invoice(&self.pool, invoice).await?;
        ensure_affected(rows, "invoice", invoice.id)
    }

    async fn delete_invoice(&self, invoice_id: InvoiceId) -> Result<(), StoreError> {
        let rows = queries::delete_invoice(&self.pool, invoice_id).await?;
        ensure_affected(rows, "invoice", invoice_id)
    }
}

struct PgInventoryTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryTx for PgInventoryTx {
    async fn pricing(&mut self, product_id: ProductId) -> Result<Pricing, StoreError> {
        queries::lock_pricing(&mut self.tx, product_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "product",
                id: product_id,
            })
    }

    async fn update_pricing(
        &mut self,
        product_id: ProductId,
        pricing: &Pricing,
    ) -> Result<Pricing, StoreError> {
        let previous = self.pricing(product_id).await?;
        let rows = queries::update_pricing(&mut self.tx, product_id, pricing).await?;
        ensure_affected(rows, "product", product_id)?;
        Ok(previous)
    }

    async fn add_stock(
        &mut self,
        product_id: ProductId,
        quantity: &BigDecimal,
    ) -> Result<(), StoreError> {
        let rows = queries::adjust_stock(&mut self.tx, product_id, quantity).await?;
        ensure_affected(rows, "product", product_id)
    }

    async fn remove_stock(
        &mut self,
        product_id: ProductId,
        quantity: &BigDecimal,
    ) -> Result<(), StoreError> {
        let available = queries::stock_quantity(&mut self.tx, product_id)
            .await?
            .ok_or(StoreError::NotFound {
                entity: "product",
                id: product_id,
            })?;
        if &available < quantity {
            return Err(StoreError::InsufficientStock {
                product_id,
                available,
                requested: quantity.clone(),
            });
        }
        let delta = BigDecimal::zero() - quantity;
        queries::adjust_stock(&mut self.tx, product_id, &delta).await?;
        Ok(())
    }

    async fn create_lot(&mut self, lot: NewLot) -> Result<LotId, StoreError> {
        Ok(queries::insert_lot(&mut self.tx, &lot).await?)
    }

    async fn delete_lot(&mut self, lot_id: LotId) -> Result<(), StoreError> {
        let rows = queries::delete_lot(&mut self.tx, lot_id).await?;
        ensure_affected(rows, "lot", lot_id)
    }

    async fn create_payable(&mut self, payable: NewPayable) -> Result<PayableId, StoreError> {
        Ok(queries::insert_payable(&mut self.tx, &payable).await?)
    }

    async fn cancel_payable(&mut self, payable_id: PayableId) -> Result<(), StoreError> {
        let rows = queries::cancel_payable(&mut self.tx, payable_id).await?;
        ensure_affected(rows, "payable", payable_id)
    }

    async fn set_supplier_code(
        &mut self,
        supplier_tax_id: &str,
        supplier_code: &str,
        product_id: Option<ProductId>,
    ) -> Result<Option<ProductId>, StoreError> {
        let previous =
            queries::current_supplier_code(&mut self.tx, supplier_tax_id, supplier_code).await?;
        match product_id {
            Some(id) => {
                queries::upsert_supplier_code(&mut self.tx, supplier_tax_id, supplier_code, id)
                    .await?
            }
            None => {
                queries::delete_supplier_code(&mut self.tx, supplier_tax_id, supplier_code).await?
            }
        }
        Ok(previous)
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        let rows = queries::update_invoice(&mut *self.tx, invoice).await?;
        ensure_affected(rows, "invoice", invoice.id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.tx.commit().await?)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(self.tx.rollback().await?)
    }
}
