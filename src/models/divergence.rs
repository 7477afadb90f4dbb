use serde::{Deserialize, Serialize};

/// 差异类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceCategory {
    Size,
    Color,
    Flavor,
    Species,
}

/// 严重程度 (声明顺序即排序顺序)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// 发票描述与已关联商品描述之间的差异
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub category: DivergenceCategory,
    pub severity: Severity,
    pub invoice_value: String,
    pub product_value: String,
}
