use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use super::text;
use crate::models::{MatchMethod, Product, ProductLink};

pub const SUPPLIER_CODE_CONFIDENCE: u8 = 100;
pub const BARCODE_CONFIDENCE: u8 = 95;

/// 文本相似度打分策略 (0..=100)
pub trait TextScorer: Send + Sync {
    fn score_match(&self, invoice_text: &str, product_text: &str) -> u8;
}

/// 默认打分: token 重合度 (Jaccard) 与长度归一化编辑距离的加权和
#[derive(Debug, Clone)]
pub struct TokenEditScorer {
    pub token_weight: f64,
    pub edit_weight: f64,
}

impl Default for TokenEditScorer {
    fn default() -> Self {
        Self {
            token_weight: 0.6,
            edit_weight: 0.4,
        }
    }
}

impl TextScorer for TokenEditScorer {
    fn score_match(&self, invoice_text: &str, product_text: &str) -> u8 {
        let a = text::normalize(invoice_text);
        let b = text::normalize(product_text);
        if a.is_empty() || b.is_empty() {
            return 0;
        }

        let tokens_a: HashSet<&str> = a.split_whitespace().collect();
        let tokens_b: HashSet<&str> = b.split_whitespace().collect();
        let shared = tokens_a.intersection(&tokens_b).count() as f64;
        let union = tokens_a.union(&tokens_b).count() as f64;
        let overlap = if union > 0.0 { shared / union } else { 0.0 };

        let edit = strsim::normalized_levenshtein(&a, &b);

        let combined = self.token_weight * overlap + self.edit_weight * edit;
        (combined * 100.0).round().clamp(0.0, 100.0) as u8
    }
}

/// 一条明细行的候选商品 (由调用方从商品目录取出)
#[derive(Debug, Clone, Default)]
pub struct MatchCandidates {
    pub by_supplier_code: Option<Product>,
    pub by_barcode: Option<Product>,
    pub by_text: Vec<Product>,
}

/// 明细行 -> 商品 匹配器, 纯函数, 不访问存储
#[derive(Clone)]
pub struct Matcher {
    scorer: Arc<dyn TextScorer>,
    floor: u8,
}

impl Matcher {
    pub fn new(floor: u8) -> Self {
        Self::with_scorer(Arc::new(TokenEditScorer::default()), floor)
    }

    pub fn with_scorer(scorer: Arc<dyn TextScorer>, floor: u8) -> Self {
        Self { scorer, floor }
    }

    /// 供应商编码 > 条码 > 文本相似度; 无候选达到下限时返回 None
    pub fn best_match(&self, description: &str, candidates: &MatchCandidates) -> Option<ProductLink> {
        if let Some(product) = &candidates.by_supplier_code {
            return Some(ProductLink {
                product_id: product.id,
                confidence: SUPPLIER_CODE_CONFIDENCE,
                method: MatchMethod::SupplierCode,
            });
        }

        if let Some(product) = &candidates.by_barcode {
            return Some(ProductLink {
                product_id: product.id,
                confidence: BARCODE_CONFIDENCE,
                method: MatchMethod::Barcode,
            });
        }

        let (score, product_id) = self.best_text_candidate(description, &candidates.by_text)?;
        tracing::debug!(
            "fuzzy match '{}' -> product {} score {}",
            description, product_id, score
        );
        Some(ProductLink {
            product_id,
            confidence: score,
            method: MatchMethod::FuzzyText,
        })
    }

    /// 同分时取商品ID最小者, 保证结果稳定
    fn best_text_candidate(&self, description: &str, products: &[Product]) -> Option<(u8, i64)> {
        products
            .par_iter()
            .map(|p| (self.scorer.score_match(description, &p.name), p.id))
            .filter(|(score, _)| *score >= self.floor)
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfidenceBand;
    use bigdecimal::BigDecimal;

    fn product(id: i64, name: &str) -> Product {
        Product {
            id,
            code: format!("P{}", id),
            name: name.to_string(),
            barcode: None,
            cost_price: BigDecimal::from(10),
            sale_price: BigDecimal::from(20),
            margin: BigDecimal::from(50),
        }
    }

    #[test]
    fn supplier_code_wins_outright() {
        let matcher = Matcher::new(40);
        let candidates = MatchCandidates {
            by_supplier_code: Some(product(1, "Qualquer coisa")),
            by_barcode: Some(product(2, "Outra coisa")),
            by_text: vec![product(3, "Ração Cão Adulto 15kg")],
        };
        let link = matcher.best_match("Ração Cão Adulto 15kg", &candidates).unwrap();
        assert_eq!(link.product_id, 1);
        assert_eq!(link.confidence, 100);
        assert_eq!(link.method, MatchMethod::SupplierCode);
    }

    #[test]
    fn barcode_beats_text() {
        let matcher = Matcher::new(40);
        let candidates = MatchCandidates {
            by_barcode: Some(product(2, "Outra coisa")),
            by_text: vec![product(3, "Ração Cão Adulto 15kg")],
            ..Default::default()
        };
        let link = matcher.best_match("Ração Cão Adulto 15kg", &candidates).unwrap();
        assert_eq!(link.product_id, 2);
        assert_eq!(link.confidence, 95);
        assert_eq!(link.band(), ConfidenceBand::High);
    }

    #[test]
    fn identical_text_scores_full() {
        let scorer = TokenEditScorer::default();
        assert_eq!(
            scorer.score_match("RACAO PREMIER CAO ADULTO 15KG", "Ração Premier Cão Adulto 15kg"),
            100
        );
    }

    #[test]
    fn extra_word_lands_in_medium_band() {
        let matcher = Matcher::new(40);
        let candidates = MatchCandidates {
            by_text: vec![product(5, "Ração Premier Cão Adulto 15kg")],
            ..Default::default()
        };
        let link = matcher
            .best_match("RACAO PREMIER CAO ADULTO FRANGO 15KG", &candidates)
            .unwrap();
        assert_eq!(link.method, MatchMethod::FuzzyText);
        assert_eq!(link.band(), ConfidenceBand::Medium);
    }

    #[test]
    fn unrelated_text_is_below_floor() {
        let matcher = Matcher::new(40);
        let candidates = MatchCandidates {
            by_text: vec![product(5, "Areia Sanitária Gato 4kg")],
            ..Default::default()
        };
        assert!(matcher
            .best_match("Coleira antipulgas", &candidates)
            .is_none());
    }

    #[test]
    fn ties_go_to_lowest_product_id() {
        let matcher = Matcher::new(40);
        let candidates = MatchCandidates {
            by_text: vec![
                product(9, "Petisco Bifinho Carne"),
                product(4, "Petisco Bifinho Carne"),
                product(7, "Petisco Bifinho Carne"),
            ],
            ..Default::default()
        };
        let link = matcher.best_match("Petisco Bifinho Carne", &candidates).unwrap();
        assert_eq!(link.product_id, 4);
    }
}
