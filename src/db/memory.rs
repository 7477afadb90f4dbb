//! 进程内存储: 默认后端, 也是测试替身。
//!
//! 事务在状态副本上执行, commit 时整体换入; 事务期间持有状态锁,
//! 因此同一时刻只有一个写事务。

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::store::{CatalogStore, InventoryStore, InventoryTx};
use super::StoreError;
use crate::models::{
    Invoice, InvoiceId, LotId, NewLot, NewPayable, NewProduct, Payable, PayableId, Pricing,
    Product, ProductId, StockLot,
};
use crate::service::text;

/// 可注入故障的写操作点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    UpdatePricing,
    AddStock,
    RemoveStock,
    CreateLot,
    DeleteLot,
    CreatePayable,
    CancelPayable,
    SetSupplierCode,
    SaveInvoice,
    Commit,
}

#[derive(Debug, Clone, Copy)]
struct FailRule {
    point: FailPoint,
    /// None 表示一直失败
    remaining: Option<u32>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: BTreeMap<ProductId, Product>,
    supplier_codes: BTreeMap<(String, String), ProductId>,
    stock: BTreeMap<ProductId, BigDecimal>,
    lots: BTreeMap<LotId, StockLot>,
    payables: BTreeMap<PayableId, Payable>,
    invoices: BTreeMap<InvoiceId, Invoice>,
    next_product_id: i64,
    next_lot_id: i64,
    next_payable_id: i64,
}

/// 库存相关状态的快照, 用于比较提交前后
#[derive(Debug, Clone, PartialEq)]
pub struct InventorySnapshot {
    pub pricing: BTreeMap<ProductId, Pricing>,
    pub stock: BTreeMap<ProductId, BigDecimal>,
    pub lots: BTreeMap<LotId, StockLot>,
    pub payables: BTreeMap<PayableId, Payable>,
    pub supplier_codes: BTreeMap<(String, String), ProductId>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_rule: Arc<Mutex<Option<FailRule>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        self.create_product(product).await
    }

    pub async fn seed_supplier_code(
        &self,
        supplier_tax_id: &str,
        supplier_code: &str,
        product_id: ProductId,
    ) {
        let mut state = self.state.lock().await;
        state.supplier_codes.insert(
            (supplier_tax_id.to_string(), supplier_code.to_string()),
            product_id,
        );
    }

    pub async fn seed_stock(&self, product_id: ProductId, quantity: BigDecimal) {
        let mut state = self.state.lock().await;
        state.stock.insert(product_id, quantity);
    }

    pub async fn stock_of(&self, product_id: ProductId) -> BigDecimal {
        let state = self.state.lock().await;
        state
            .stock
            .get(&product_id)
            .cloned()
            .unwrap_or_else(BigDecimal::zero)
    }

    pub async fn lots(&self) -> Vec<StockLot> {
        self.state.lock().await.lots.values().cloned().collect()
    }

    pub async fn payables(&self) -> Vec<Payable> {
        self.state.lock().await.payables.values().cloned().collect()
    }

    pub async fn snapshot(&self) -> InventorySnapshot {
        let state = self.state.lock().await;
        InventorySnapshot {
            pricing: state
                .products
                .iter()
                .map(|(id, p)| (*id, p.pricing()))
                .collect(),
            stock: state
                .stock
                .iter()
                .filter(|(_, q)| !q.is_zero())
                .map(|(id, q)| (*id, q.clone()))
                .collect(),
            lots: state.lots.clone(),
            payables: state.payables.clone(),
            supplier_codes: state.supplier_codes.clone(),
        }
    }

    /// 之后每次到达该点都失败, 直到 clear_failures
    pub async fn fail_at(&self, point: FailPoint) {
        *self.fail_rule.lock().await = Some(FailRule {
            point,
            remaining: None,
        });
    }

    /// 到达该点时失败 times 次, 之后恢复正常
    pub async fn fail_times(&self, point: FailPoint, times: u32) {
        *self.fail_rule.lock().await = Some(FailRule {
            point,
            remaining: Some(times),
        });
    }

    pub async fn clear_failures(&self) {
        *self.fail_rule.lock().await = None;
    }
}

async fn check_fail_point(
    rule: &Mutex<Option<FailRule>>,
    point: FailPoint,
) -> Result<(), StoreError> {
    let mut guard = rule.lock().await;
    let Some(current) = guard.as_mut() else {
        return Ok(());
    };
    if current.point != point {
        return Ok(());
    }
    match current.remaining {
        None => {}
        Some(0) => return Ok(()),
        Some(n) => current.remaining = Some(n - 1),
    }
    tracing::debug!("injected failure at {:?}", point);
    Err(StoreError::Unavailable(format!("injected failure at {:?}", point)))
}

fn product_not_found(id: ProductId) -> StoreError {
    StoreError::NotFound {
        entity: "product",
        id,
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn find_by_supplier_code(
        &self,
        supplier_tax_id: &str,
        supplier_code: &str,
    ) -> Result<Option<Product>, StoreError> {
        let state = self.state.lock().await;
        let key = (supplier_tax_id.to_string(), supplier_code.to_string());
        Ok(state
            .supplier_codes
            .get(&key)
            .and_then(|id| state.products.get(id))
            .cloned())
    }

    async fn find_by_barcode(&self, barcode: &str) -> Result<Option<Product>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .products
            .values()
            .find(|p| p.barcode.as_deref() == Some(barcode))
            .cloned())
    }

    async fn search_by_tokens(
        &self,
        tokens: &[String],
        limit: usize,
    ) -> Result<Vec<Product>, StoreError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let wanted: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        let state = self.state.lock().await;

        // 共有 token 多者在前, 同数按 ID; 截断在排序之后
        let mut ranked: Vec<(usize, &Product)> = state
            .products
            .values()
            .filter_map(|p| {
                let name_tokens: HashSet<String> = text::tokens(&p.name).into_iter().collect();
                let shared = name_tokens
                    .iter()
                    .filter(|t| wanted.contains(t.as_str()))
                    .count();
                (shared > 0).then_some((shared, p))
            })
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn codes_with_prefix(&self, prefix: &str) -> Result<HashSet<String>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .products
            .values()
            .filter(|p| p.code.starts_with(prefix))
            .map(|p| p.code.clone())
            .collect())
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, StoreError> {
        let mut state = self.state.lock().await;
        if state.products.values().any(|p| p.code == product.code) {
            return Err(StoreError::DuplicateCode(product.code));
        }
        state.next_product_id += 1;
        let created = Product {
            id: state.next_product_id,
            code: product.code,
            name: product.name,
            barcode: product.barcode,
            cost_price: product.cost_price,
            sale_price: product.sale_price,
            margin: product.margin,
        };
        state.products.insert(created.id, created.clone());
        Ok(created)
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            fail_rule: self.fail_rule.clone(),
        }))
    }

    async fn load_invoices(&self) -> Result<Vec<Invoice>, StoreError> {
        Ok(self.state.lock().await.invoices.values().cloned().collect())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state
            .invoices
            .values()
            .any(|i| i.access_key == invoice.access_key)
        {
            return Err(StoreError::DuplicateAccessKey(invoice.access_key.clone()));
        }
        state.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn save_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        store_existing_invoice(&mut state, invoice)
    }

    async fn delete_invoice(&self, invoice_id: InvoiceId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state
            .invoices
            .remove(&invoice_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: "invoice",
                id: invoice_id,
            })
    }
}

fn store_existing_invoice(state: &mut MemoryState, invoice: &Invoice) -> Result<(), StoreError> {
    match state.invoices.get_mut(&invoice.id) {
        Some(slot) => {
            *slot = invoice.clone();
            Ok(())
        }
        None => Err(StoreError::NotFound {
            entity: "invoice",
            id: invoice.id,
        }),
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_rule: Arc<Mutex<Option<FailRule>>>,
}

impl MemoryTx {
    async fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        check_fail_point(&self.fail_rule, point).await
    }
}

#[async_trait]
impl InventoryTx for MemoryTx {
    async fn pricing(&mut self, product_id: ProductId) -> Result<Pricing, StoreError> {
        self.working
            .products
            .get(&product_id)
            .map(Product::pricing)
            .ok_or_else(|| product_not_found(product_id))
    }

    async fn update_pricing(
        &mut self,
        product_id: ProductId,
        pricing: &Pricing,
    ) -> Result<Pricing, StoreError> {
        self.check(FailPoint::UpdatePricing).await?;
        let product = self
            .working
            .products
            .get_mut(&product_id)
            .ok_or_else(|| product_not_found(product_id))?;
        let previous = product.pricing();
        product.cost_price = pricing.cost_price.clone();
        product.sale_price = pricing.sale_price.clone();
        product.margin = pricing.margin.clone();
        Ok(previous)
    }

    async fn add_stock(
        &mut self,
        product_id: ProductId,
        quantity: &BigDecimal,
    ) -> Result<(), StoreError> {
        self.check(FailPoint::AddStock).await?;
        if !self.working.products.contains_key(&product_id) {
            return Err(product_not_found(product_id));
        }
        let entry = self
            .working
            .stock
            .entry(product_id)
            .or_insert_with(BigDecimal::zero);
        *entry = &*entry + quantity;
        Ok(())
    }

    async fn remove_stock(
        &mut self,
        product_id: ProductId,
        quantity: &BigDecimal,
    ) -> Result<(), StoreError> {
        self.check(FailPoint::RemoveStock).await?;
        let available = self
            .working
            .stock
            .get(&product_id)
            .cloned()
            .unwrap_or_else(BigDecimal::zero);
        if &available < quantity {
            return Err(StoreError::InsufficientStock {
                product_id,
                available,
                requested: quantity.clone(),
            });
        }
        let left = &available - quantity;
        if left.is_zero() {
            self.working.stock.remove(&product_id);
        } else {
            self.working.stock.insert(product_id, left);
        }
        Ok(())
    }

    async fn create_lot(&mut self, lot: NewLot) -> Result<LotId, StoreError> {
        self.check(FailPoint::CreateLot).await?;
        self.working.next_lot_id += 1;
        let id = self.working.next_lot_id;
        self.working.lots.insert(
            id,
            StockLot {
                id,
                product_id: lot.product_id,
                invoice_id: lot.invoice_id,
                lot_number: lot.lot_number,
                quantity: lot.quantity,
                expiry: lot.expiry,
            },
        );
        Ok(id)
    }

    async fn delete_lot(&mut self, lot_id: LotId) -> Result<(), StoreError> {
        self.check(FailPoint::DeleteLot).await?;
        self.working
            .lots
            .remove(&lot_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: "lot",
                id: lot_id,
            })
    }

    async fn create_payable(&mut self, payable: NewPayable) -> Result<PayableId, StoreError> {
        self.check(FailPoint::CreatePayable).await?;
        self.working.next_payable_id += 1;
        let id = self.working.next_payable_id;
        self.working.payables.insert(
            id,
            Payable {
                id,
                invoice_id: payable.invoice_id,
                supplier_tax_id: payable.supplier_tax_id,
                amount: payable.amount,
                due_date: payable.due_date,
            },
        );
        Ok(id)
    }

    async fn cancel_payable(&mut self, payable_id: PayableId) -> Result<(), StoreError> {
        self.check(FailPoint::CancelPayable).await?;
        self.working
            .payables
            .remove(&payable_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: "payable",
                id: payable_id,
            })
    }

    async fn set_supplier_code(
        &mut self,
        supplier_tax_id: &str,
        supplier_code: &str,
        product_id: Option<ProductId>,
    ) -> Result<Option<ProductId>, StoreError> {
        self.check(FailPoint::SetSupplierCode).await?;
        let key = (supplier_tax_id.to_string(), supplier_code.to_string());
        Ok(match product_id {
            Some(id) => self.working.supplier_codes.insert(key, id),
            None => self.working.supplier_codes.remove(&key),
        })
    }

    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.check(FailPoint::SaveInvoice).await?;
        store_existing_invoice(&mut self.working, invoice)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.check(FailPoint::Commit).await?;
        let MemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn new_product(code: &str, name: &str) -> NewProduct {
        NewProduct {
            code: code.to_string(),
            name: name.to_string(),
            barcode: None,
            cost_price: dec("10.00"),
            sale_price: dec("20.00"),
            margin: dec("50.00"),
        }
    }

    #[tokio::test]
    async fn duplicate_codes_are_rejected() {
        let store = MemoryStore::new();
        store.seed_product(new_product("ABC-1", "Areia")).await.unwrap();
        let err = store
            .create_product(new_product("ABC-1", "Outra"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode(code) if code == "ABC-1"));
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_state_untouched() {
        let store = MemoryStore::new();
        let product = store.seed_product(new_product("P1", "Racao")).await.unwrap();
        let before = store.snapshot().await;

        let mut tx = store.begin().await.unwrap();
        tx.add_stock(product.id, &dec("5")).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStore::new();
        let product = store.seed_product(new_product("P1", "Racao")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.add_stock(product.id, &dec("5")).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.stock_of(product.id).await, dec("5"));
    }

    #[tokio::test]
    async fn removing_more_than_available_fails() {
        let store = MemoryStore::new();
        let product = store.seed_product(new_product("P1", "Racao")).await.unwrap();
        store.seed_stock(product.id, dec("2")).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.remove_stock(product.id, &dec("3")).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientStock { .. }));
    }

    #[tokio::test]
    async fn fail_times_recovers_after_failures_are_used_up() {
        let store = MemoryStore::new();
        store.fail_times(FailPoint::CreatePayable, 1).await;
        let payable = NewPayable {
            invoice_id: 1,
            supplier_tax_id: "1".into(),
            amount: dec("1"),
            due_date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };

        let mut tx = store.begin().await.unwrap();
        assert!(tx.create_payable(payable.clone()).await.is_err());
        assert!(tx.create_payable(payable).await.is_ok());
    }

    #[tokio::test]
    async fn token_search_matches_normalized_names() {
        let store = MemoryStore::new();
        store
            .seed_product(new_product("P1", "Ração Cão Adulto 15kg"))
            .await
            .unwrap();
        store
            .seed_product(new_product("P2", "Areia Gato"))
            .await
            .unwrap();

        let found = store
            .search_by_tokens(&["racao".to_string()], 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "P1");
    }

    #[tokio::test]
    async fn token_search_ranks_by_shared_tokens_before_limit() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .seed_product(new_product(&format!("F{}", i), &format!("Ração Marca{} Filhote", i)))
                .await
                .unwrap();
        }
        store
            .seed_product(new_product("ALVO", "Ração Premier Gato Castrado"))
            .await
            .unwrap();

        let tokens: Vec<String> = ["racao", "premier", "gato", "castrado"]
            .iter()
            .map(|t| t.to_string())
            .collect();
        let found = store.search_by_tokens(&tokens, 2).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].code, "ALVO");
        assert_eq!(found[1].code, "F0");
    }
}
