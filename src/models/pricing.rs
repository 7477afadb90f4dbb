use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use super::product::ProductId;

/// 价格复核: 每个已关联商品一条 (不持久化, 提交时才写入)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRevision {
    pub product_id: ProductId,
    pub product_code: String,
    pub product_name: String,
    pub quantity: BigDecimal,
    pub previous_cost: BigDecimal,
    pub previous_price: BigDecimal,
    pub previous_margin: BigDecimal,
    pub new_cost: BigDecimal,
    pub new_price: BigDecimal,
    pub new_margin: BigDecimal,
    pub cost_drift: BigDecimal,
}

/// 复核人对某商品的改价; 售价优先于毛利
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceOverride {
    pub product_id: ProductId,
    pub sale_price: Option<BigDecimal>,
    pub margin: Option<BigDecimal>,
}
