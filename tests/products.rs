mod common;

use async_trait::async_trait;
use common::*;
use nfe_intake_rust::config::EngineConfig;
use nfe_intake_rust::db::{CatalogStore, StoreError};
use nfe_intake_rust::models::{MatchMethod, NewProduct, NewProductForm, Product, ProductId};
use nfe_intake_rust::{EngineError, ErrorKind, InvoiceLifecycle, MemoryStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// 在建商品前抢先占用同一编码的商品目录, 模拟并发建档
struct RacingCatalog {
    inner: MemoryStore,
    steals_left: AtomicU32,
}

#[async_trait]
impl CatalogStore for RacingCatalog {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        self.inner.get_product(id).await
    }

    async fn find_by_supplier_code(
        &self,
        supplier_tax_id: &str,
        supplier_code: &str,
    ) -> Result<Option<Product>, StoreError> {
        self.inner
            .find_by_supplier_code(supplier_tax_id, supplier_code)
            .await
    }

    async fn find_by_barcode(&self, barcode: &str) -> Result<Option<Product>, StoreError> {
        self.inner.find_by_barcode(barcode).await
    }

    async fn search_by_tokens(
        &self,
        tokens: &[String],
        limit: usize,
    ) -> Result<Vec<Product>, StoreError> {
        self.inner.search_by_tokens(tokens, limit).await
    }

    async fn codes_with_prefix(&self, prefix: &str) -> Result<HashSet<String>, StoreError> {
        self.inner.codes_with_prefix(prefix).await
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        let steal = self
            .steals_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if steal {
            self.inner
                .create_product(NewProduct {
                    name: "Cadastro concorrente".into(),
                    ..product.clone()
                })
                .await?;
        }
        self.inner.create_product(product).await
    }
}

async fn racing_engine(steals: u32) -> (MemoryStore, Arc<InvoiceLifecycle>, i64, i64) {
    let store = MemoryStore::new();
    let catalog = RacingCatalog {
        inner: store.clone(),
        steals_left: AtomicU32::new(steals),
    };
    let lifecycle = Arc::new(InvoiceLifecycle::new(
        Arc::new(catalog),
        Arc::new(store.clone()),
        EngineConfig::default(),
    ));

    let mut item = line("Brinquedo Corda Colorida", "3", "7.50");
    item.supplier_code = Some("XYZ 9".into());
    let invoice = lifecycle.ingest(invoice(1, vec![item])).await.unwrap();
    let item_id = *invoice.items.keys().next().unwrap();
    (store, lifecycle, invoice.id, item_id)
}

#[tokio::test]
async fn code_taken_concurrently_falls_back_to_next_suggestion() {
    let (store, lifecycle, invoice_id, item_id) = racing_engine(1).await;

    let (product, invoice) = lifecycle
        .create_product_from_item(invoice_id, item_id, NewProductForm::default())
        .await
        .unwrap();

    assert_eq!(product.code, "XYZ-9-PRE");
    assert_eq!(product.name, "Brinquedo Corda Colorida");
    let link = invoice.item(item_id).unwrap().link.as_ref().unwrap();
    assert_eq!(link.product_id, product.id);
    assert_eq!(link.method, MatchMethod::CreatedFromItem);

    // 抢占者与新商品都在目录中
    let codes = store.codes_with_prefix("XYZ-9").await.unwrap();
    assert!(codes.contains("XYZ-9"));
    assert!(codes.contains("XYZ-9-PRE"));
}

#[tokio::test]
async fn repeated_code_races_give_up_with_conflict() {
    let (_store, lifecycle, invoice_id, item_id) = racing_engine(3).await;

    let err = lifecycle
        .create_product_from_item(invoice_id, item_id, NewProductForm::default())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Conflict(id) if id == invoice_id));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let invoice = lifecycle.get(invoice_id).unwrap();
    assert!(invoice.item(item_id).unwrap().link.is_none());
    assert_eq!(invoice.version, 1);
}

#[tokio::test]
async fn requested_code_already_in_use_is_a_field_error() {
    let store = MemoryStore::new();
    seed(&store, "CORDA-01", "Brinquedo Corda", "4.00", "8.00").await;
    let lifecycle = engine(&store);
    let invoice = lifecycle
        .ingest(invoice(2, vec![line("Mordedor Osso", "2", "6.00")]))
        .await
        .unwrap();
    let item_id = *invoice.items.keys().next().unwrap();

    let form = NewProductForm {
        code: Some("corda 01".into()),
        ..Default::default()
    };
    let err = lifecycle
        .create_product_from_item(invoice.id, item_id, form)
        .await
        .unwrap_err();
    match err {
        EngineError::Validation(errors) => assert!(errors.has_field("code")),
        other => panic!("expected validation error, got {:?}", other),
    }
}
