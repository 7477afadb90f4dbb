use serde::{Deserialize, Serialize};

use super::allocation::{AllocationSummary, ChannelLine};
use super::divergence::Divergence;
use super::invoice::{Invoice, ItemId};
use super::product::{ConfidenceBand, ProductSummary};

/// 明细行视图: 附带置信度分档与差异提示
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemView {
    pub item_id: ItemId,
    pub band: Option<ConfidenceBand>,
    pub product: Option<ProductSummary>,
    pub divergences: Vec<Divergence>,
}

/// 发票详情视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceView {
    pub invoice: Invoice,
    pub allocation: AllocationSummary,
    pub channels: Vec<ChannelLine>,
    pub items: Vec<ItemView>,
}
