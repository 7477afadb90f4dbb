use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::invoice::ItemId;
use super::product::ProductId;

/// 渠道分配 (rateio) 模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    #[default]
    StoreOnly,
    OnlineOnly,
    Partial,
}

/// 发票级分配汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub mode: AllocationMode,
    pub total_value: BigDecimal,
    pub online_value: BigDecimal,
    pub online_percentage: BigDecimal,
    pub store_percentage: BigDecimal,
}

/// 单行渠道拆分 (仅报表用, 不拆分实物库存)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelLine {
    pub item_id: ItemId,
    pub product_id: Option<ProductId>,
    pub store_quantity: BigDecimal,
    pub online_quantity: BigDecimal,
}
