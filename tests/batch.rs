mod common;

use async_trait::async_trait;
use common::*;
use nfe_intake_rust::config::EngineConfig;
use nfe_intake_rust::db::{batch_csv_bytes, CatalogStore, StoreError};
use nfe_intake_rust::models::{
    BatchItemResult, NewProduct, Product, ProductId, RawInvoice, RawInvoiceItem,
};
use nfe_intake_rust::service::BatchCancellation;
use nfe_intake_rust::{BatchCoordinator, ErrorKind, InvoiceLifecycle, MemoryStore};
use std::collections::HashSet;
use std::sync::Arc;

fn three_with_malformed_second() -> Vec<RawInvoice> {
    let mut malformed = invoice(2, vec![line("Areia", "1", "10.00")]);
    malformed.access_key = None;
    malformed.items.push(RawInvoiceItem {
        description: Some("Sem quantidade".into()),
        ..Default::default()
    });
    vec![
        invoice(1, vec![line("Ração Cão Adulto 15kg", "2", "100.00")]),
        malformed,
        invoice(3, vec![line("Petisco Bifinho", "10", "3.50")]),
    ]
}

#[tokio::test]
async fn malformed_invoice_does_not_stop_the_batch() {
    let store = MemoryStore::new();
    let lifecycle = engine(&store);
    let batches = BatchCoordinator::new(lifecycle.clone(), 4);

    let run = batches.submit(three_with_malformed_second()).await;

    assert_eq!(run.total, 3);
    assert_eq!(run.succeeded, 2);
    assert_eq!(run.failed, 1);
    assert_eq!(run.skipped, 0);
    let positions: Vec<usize> = run.outcomes.iter().map(|o| o.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);

    assert!(matches!(run.outcomes[0].result, BatchItemResult::Succeeded { .. }));
    match &run.outcomes[1].result {
        BatchItemResult::Failed { kind, reason } => {
            assert_eq!(*kind, ErrorKind::Validation);
            assert!(reason.contains("access_key"));
            assert!(reason.contains("items[2].quantity"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(run.outcomes[2].access_key.as_deref(), Some(access_key(3).as_str()));
    assert!(matches!(run.outcomes[2].result, BatchItemResult::Succeeded { .. }));

    assert_eq!(lifecycle.list().len(), 2);
}

#[tokio::test]
async fn completed_runs_are_kept_and_exportable() {
    let store = MemoryStore::new();
    let batches = BatchCoordinator::new(engine(&store), 2);
    let run = batches.submit(three_with_malformed_second()).await;

    let stored = batches.get(run.id).unwrap();
    assert_eq!(stored.outcomes.len(), 3);
    assert_eq!(batches.list().len(), 1);
    assert!(batches.get(run.id + 1).is_none());

    let csv = String::from_utf8(batch_csv_bytes(&stored).unwrap()).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    assert_eq!(rows.len(), 4);
    assert!(rows[1].starts_with("0,"));
    assert!(rows[2].starts_with("1,,failed,,validation,"));
    assert!(rows[3].contains(",succeeded,"));
}

#[tokio::test]
async fn repeated_access_key_in_one_batch_fails_once() {
    let store = MemoryStore::new();
    let batches = BatchCoordinator::new(engine(&store), 1);
    let run = batches
        .submit(vec![
            invoice(9, vec![line("Areia", "1", "10.00")]),
            invoice(9, vec![line("Areia", "1", "10.00")]),
        ])
        .await;

    assert_eq!(run.succeeded, 1);
    assert_eq!(run.failed, 1);
    assert!(matches!(
        run.outcomes[1].result,
        BatchItemResult::Failed {
            kind: ErrorKind::Validation,
            ..
        }
    ));
}

#[tokio::test]
async fn cancelled_batch_skips_everything_not_started() {
    let store = MemoryStore::new();
    let lifecycle = engine(&store);
    let batches = BatchCoordinator::new(lifecycle.clone(), 2);

    let cancellation = BatchCancellation::new();
    cancellation.cancel();
    let run = batches
        .submit_with_cancellation(three_with_malformed_second(), &cancellation)
        .await;

    assert_eq!(run.total, 3);
    assert_eq!(run.skipped, 3);
    assert!(lifecycle.list().is_empty());
}

/// 第一次文本检索时触发取消的商品目录
struct CancellingCatalog {
    inner: MemoryStore,
    cancellation: BatchCancellation,
}

#[async_trait]
impl CatalogStore for CancellingCatalog {
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
        self.cancellation.cancel();
        self.inner.search_by_tokens(tokens, limit).await
    }

    async fn codes_with_prefix(&self, prefix: &str) -> Result<HashSet<String>, StoreError> {
        self.inner.codes_with_prefix(prefix).await
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        self.inner.create_product(product).await
    }
}

#[tokio::test]
async fn cancellation_mid_batch_keeps_completed_items() {
    let store = MemoryStore::new();
    let cancellation = BatchCancellation::new();
    let catalog = CancellingCatalog {
        inner: store.clone(),
        cancellation: cancellation.clone(),
    };
    let lifecycle = Arc::new(InvoiceLifecycle::new(
        Arc::new(catalog),
        Arc::new(store.clone()),
        EngineConfig::default(),
    ));
    let batches = BatchCoordinator::new(lifecycle.clone(), 1);

    let run = batches
        .submit_with_cancellation(
            vec![
                invoice(1, vec![line("Areia", "1", "10.00")]),
                invoice(2, vec![line("Areia", "1", "10.00")]),
                invoice(3, vec![line("Areia", "1", "10.00")]),
            ],
            &cancellation,
        )
        .await;

    assert_eq!(run.succeeded, 1);
    assert_eq!(run.skipped, 2);
    assert!(matches!(run.outcomes[0].result, BatchItemResult::Succeeded { .. }));
    assert_eq!(lifecycle.list().len(), 1);
}
