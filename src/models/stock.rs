use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::invoice::InvoiceId;
use super::product::{Pricing, ProductId};

pub type LotId = i64;
pub type PayableId = i64;

/// 库存批次
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct StockLot {
    pub id: LotId,
    pub product_id: ProductId,
    pub invoice_id: InvoiceId,
    pub lot_number: String,
    pub quantity: BigDecimal,
    pub expiry: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLot {
    pub product_id: ProductId,
    pub invoice_id: InvoiceId,
    pub lot_number: String,
    pub quantity: BigDecimal,
    pub expiry: Option<NaiveDate>,
}

/// 应付账款
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Payable {
    pub id: PayableId,
    pub invoice_id: InvoiceId,
    pub supplier_tax_id: String,
    pub amount: BigDecimal,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPayable {
    pub invoice_id: InvoiceId,
    pub supplier_tax_id: String,
    pub amount: BigDecimal,
    pub due_date: NaiveDate,
}

/// 入库数量 (同一商品多行合并)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockEntry {
    pub product_id: ProductId,
    pub quantity: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingChange {
    pub product_id: ProductId,
    pub previous: Pricing,
    pub applied: Pricing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierCodeChange {
    pub supplier_tax_id: String,
    pub supplier_code: String,
    pub product_id: ProductId,
    pub previous: Option<ProductId>,
}

/// 入库提交回执: 撤销时按此逐项冲回
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub committed_at: DateTime<Utc>,
    pub stock: Vec<StockEntry>,
    pub lots: Vec<LotId>,
    pub payable_id: PayableId,
    pub pricing: Vec<PricingChange>,
    pub supplier_codes: Vec<SupplierCodeChange>,
}
