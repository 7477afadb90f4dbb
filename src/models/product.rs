use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub type ProductId = i64;

/// 商品目录 (catalog product)
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub code: String,
    pub name: String,
    pub barcode: Option<String>,
    pub cost_price: BigDecimal,
    pub sale_price: BigDecimal,
    pub margin: BigDecimal,
}

impl Product {
    pub fn pricing(&self) -> Pricing {
        Pricing {
            cost_price: self.cost_price.clone(),
            sale_price: self.sale_price.clone(),
            margin: self.margin.clone(),
        }
    }

    pub fn summary(&self) -> ProductSummary {
        ProductSummary {
            id: self.id,
            code: self.code.clone(),
            name: self.name.clone(),
        }
    }
}

/// 新建商品
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub code: String,
    pub name: String,
    pub barcode: Option<String>,
    pub cost_price: BigDecimal,
    pub sale_price: BigDecimal,
    pub margin: BigDecimal,
}

/// 从明细行建商品时由前端提交的表单; 空字段取建议值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProductForm {
    pub code: Option<String>,
    pub name: Option<String>,
    pub sale_price: Option<BigDecimal>,
    pub margin: Option<BigDecimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: ProductId,
    pub code: String,
    pub name: String,
}

/// 成本/售价/毛利 三元组
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Pricing {
    pub cost_price: BigDecimal,
    pub sale_price: BigDecimal,
    pub margin: BigDecimal,
}

/// 匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    SupplierCode,
    Barcode,
    FuzzyText,
    Manual,
    CreatedFromItem,
}

/// 明细行与商品的关联
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductLink {
    pub product_id: ProductId,
    /// 0..=100
    pub confidence: u8,
    pub method: MatchMethod,
}

impl ProductLink {
    pub fn manual(product_id: ProductId) -> Self {
        Self {
            product_id,
            confidence: 100,
            method: MatchMethod::Manual,
        }
    }

    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::from_score(self.confidence)
    }
}

/// 置信度分档
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    /// >= 90, 可自动关联
    High,
    /// 70..=89, 需人工确认
    Medium,
    /// < 70, 需人工选择
    Low,
}

impl ConfidenceBand {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => ConfidenceBand::High,
            70..=89 => ConfidenceBand::Medium,
            _ => ConfidenceBand::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries() {
        assert_eq!(ConfidenceBand::from_score(100), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(90), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::from_score(89), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(70), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::from_score(69), ConfidenceBand::Low);
        assert_eq!(ConfidenceBand::from_score(0), ConfidenceBand::Low);
    }

    #[test]
    fn manual_link_is_full_confidence() {
        let link = ProductLink::manual(7);
        assert_eq!(link.confidence, 100);
        assert_eq!(link.band(), ConfidenceBand::High);
    }
}
