use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::allocation::AllocationMode;
use super::product::ProductLink;
use super::status::{InvoiceStatus, Transition};
use super::stock::CommitReceipt;

pub type InvoiceId = i64;
pub type ItemId = i64;

/// 原始发票记录 (OCR/XML 解析后的输入, 字段均可能缺失)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawInvoice {
    pub access_key: Option<String>,
    pub supplier: Option<RawSupplier>,
    pub issue_date: Option<String>,
    pub total_value: Option<BigDecimal>,
    #[serde(default)]
    pub items: Vec<RawInvoiceItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSupplier {
    pub tax_id: Option<String>,
    pub name: Option<String>,
}

/// 原始发票明细行
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawInvoiceItem {
    pub description: Option<String>,
    pub supplier_code: Option<String>,
    pub barcode: Option<String>,
    pub quantity: Option<BigDecimal>,
    pub unit_value: Option<BigDecimal>,
    pub lot: Option<String>,
    pub expiry: Option<String>,
}

/// 供应商
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub tax_id: String,
    pub name: String,
}

/// 发票主表 (NF-e 入库单)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub access_key: String,
    pub supplier: Supplier,
    pub issue_date: NaiveDate,
    pub total_value: BigDecimal,
    pub status: InvoiceStatus,
    pub stock_entry_applied: bool,
    pub allocation: AllocationMode,
    pub online_percentage: BigDecimal,
    pub store_percentage: BigDecimal,
    /// 明细行 arena: item_id -> item, 保持发票原始行序
    pub items: IndexMap<ItemId, InvoiceItem>,
    /// 每次变更递增, 供客户端判断是否基于最新状态
    pub version: u64,
    pub history: Vec<StatusChange>,
    /// 最近一次入库提交的回执, 撤销时据此冲回
    pub receipt: Option<CommitReceipt>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    pub fn item(&self, item_id: ItemId) -> Option<&InvoiceItem> {
        self.items.get(&item_id)
    }

    pub fn linked_items(&self) -> impl Iterator<Item = &InvoiceItem> {
        self.items.values().filter(|i| i.link.is_some())
    }

    pub fn linked_count(&self) -> usize {
        self.linked_items().count()
    }

    /// 是否曾经入库 (撤销后仍保留历史)
    pub fn was_ever_committed(&self) -> bool {
        self.history.iter().any(|h| h.transition == Transition::Commit)
    }

    pub fn summary(&self) -> InvoiceSummary {
        InvoiceSummary {
            id: self.id,
            access_key: self.access_key.clone(),
            supplier_name: self.supplier.name.clone(),
            issue_date: self.issue_date,
            total_value: self.total_value.clone(),
            status: self.status,
            item_count: self.items.len(),
            linked_count: self.linked_count(),
            version: self.version,
        }
    }
}

/// 发票明细行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub id: ItemId,
    pub line_number: u32,
    pub description: String,
    pub supplier_code: Option<String>,
    pub barcode: Option<String>,
    pub quantity: BigDecimal,
    pub unit_value: BigDecimal,
    pub lot: Option<String>,
    pub expiry: Option<NaiveDate>,
    pub link: Option<ProductLink>,
    /// 线上渠道数量, 仅在 partial 分配模式下有意义
    pub designated_quantity: Option<BigDecimal>,
}

impl InvoiceItem {
    pub fn total_value(&self) -> BigDecimal {
        &self.quantity * &self.unit_value
    }

    pub fn confidence(&self) -> Option<u8> {
        self.link.as_ref().map(|l| l.confidence)
    }
}

/// 状态变更记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: Option<InvoiceStatus>,
    pub to: InvoiceStatus,
    pub transition: Transition,
    pub at: DateTime<Utc>,
}

/// 发票列表摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub id: InvoiceId,
    pub access_key: String,
    pub supplier_name: String,
    pub issue_date: NaiveDate,
    pub total_value: BigDecimal,
    pub status: InvoiceStatus,
    pub item_count: usize,
    pub linked_count: usize,
    pub version: u64,
}
