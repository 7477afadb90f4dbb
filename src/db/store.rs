use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashSet;

use super::StoreError;
use crate::models::{
    Invoice, InvoiceId, LotId, NewLot, NewPayable, NewProduct, PayableId, Pricing, Product,
    ProductId,
};

/// 商品目录查询 + 唯一编码登记
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// 供应商编码 -> 商品 (入库提交时学习到的映射)
    async fn find_by_supplier_code(
        &self,
        supplier_tax_id: &str,
        supplier_code: &str,
    ) -> Result<Option<Product>, StoreError>;

    async fn find_by_barcode(&self, barcode: &str) -> Result<Option<Product>, StoreError>;

    /// 名称中包含任一 token 的商品 (已归一化), 用作模糊匹配候选池
    async fn search_by_tokens(
        &self,
        tokens: &[String],
        limit: usize,
    ) -> Result<Vec<Product>, StoreError>;

    async fn codes_with_prefix(&self, prefix: &str) -> Result<HashSet<String>, StoreError>;

    /// 编码重复时返回 `StoreError::DuplicateCode`
    async fn create_product(&self, product: NewProduct) -> Result<Product, StoreError>;
}

/// 发票与库存/价格/应付写操作的存储; 入库提交与撤销走事务
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError>;

    /// 全部已保存的发票 (启动恢复用)
    async fn load_invoices(&self) -> Result<Vec<Invoice>, StoreError>;

    /// 访问密钥重复时返回 `StoreError::DuplicateAccessKey`
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;

    /// 待处理阶段的编辑
    async fn save_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;

    /// 取消时物理删除; 已入库的发票不会走到这里
    async fn delete_invoice(&self, invoice_id: InvoiceId) -> Result<(), StoreError>;
}

/// 一个打开的事务; 未 commit 即丢弃等同于回滚
#[async_trait]
pub trait InventoryTx: Send {
    async fn pricing(&mut self, product_id: ProductId) -> Result<Pricing, StoreError>;

    /// 返回修改前的价格
    async fn update_pricing(
        &mut self,
        product_id: ProductId,
        pricing: &Pricing,
    ) -> Result<Pricing, StoreError>;

    async fn add_stock(
        &mut self,
        product_id: ProductId,
        quantity: &BigDecimal,
    ) -> Result<(), StoreError>;

    async fn remove_stock(
        &mut self,
        product_id: ProductId,
        quantity: &BigDecimal,
    ) -> Result<(), StoreError>;

    async fn create_lot(&mut self, lot: NewLot) -> Result<LotId, StoreError>;

    async fn delete_lot(&mut self, lot_id: LotId) -> Result<(), StoreError>;

    async fn create_payable(&mut self, payable: NewPayable) -> Result<PayableId, StoreError>;

    async fn cancel_payable(&mut self, payable_id: PayableId) -> Result<(), StoreError>;

    /// 设置 (Some) 或清除 (None) 供应商编码映射, 返回原映射
    async fn set_supplier_code(
        &mut self,
        supplier_tax_id: &str,
        supplier_code: &str,
        product_id: Option<ProductId>,
    ) -> Result<Option<ProductId>, StoreError>;

    /// 与库存写操作同一事务保存发票状态和回执
    async fn save_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
